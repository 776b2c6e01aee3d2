use clap::{Parser, Subcommand};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "envelope-cli")]
#[command(about = "Client CLI for the envelope dispenser", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check dispenser health
    Health,
    /// Create an envelope and print its deposit address
    Fund {
        /// Number of claimants the envelope is split between (1-16)
        #[arg(short, long)]
        recipients: i64,
        /// Token color
        #[arg(short, long, default_value_t = 0)]
        color: u32,
        /// Funder address
        #[arg(short, long)]
        from: String,
    },
    /// Claim a share of an envelope
    Claim {
        /// Envelope address
        #[arg(short, long)]
        envelope: String,
        /// Claimant address
        #[arg(short, long)]
        claimant: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    match cli.command {
        Commands::Health => {
            let res = client.get(format!("{}/health", base)).send().await?;
            print_response(res).await?;
        }
        Commands::Fund { recipients, color, from } => {
            let res = client
                .post(format!("{}/fund", base))
                .json(&json!({ "numRecipients": recipients, "color": color, "from": from }))
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Claim { envelope, claimant } => {
            let res = client
                .post(format!("{}/claim", base))
                .json(&json!({ "envelopeAddr": envelope, "claimantAddr": claimant }))
                .send()
                .await?;
            print_response(res).await?;
        }
    }

    Ok(())
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: dispenser returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        std::process::exit(1);
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
