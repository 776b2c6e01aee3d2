//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with all handlers
//! - Wire up middleware (tracing, timeout, request ID)
//! - Serve on a listener until shutdown is signalled

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::DispenserConfig;
use crate::envelope::EnvelopeLifecycle;
use crate::http::handlers;
use crate::http::request::{propagate_request_id_layer, set_request_id_layer};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub lifecycle: Arc<EnvelopeLifecycle>,
}

/// HTTP surface of the dispenser.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    /// Create a new HTTP server around `lifecycle`.
    pub fn new(config: &DispenserConfig, lifecycle: Arc<EnvelopeLifecycle>) -> Self {
        let state = AppState { lifecycle };
        Self {
            router: Self::build_router(config, state),
        }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &DispenserConfig, state: AppState) -> Router {
        Router::new()
            .route("/fund", post(handlers::fund))
            .route("/claim", post(handlers::claim))
            .route("/health", get(handlers::health))
            .with_state(state)
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(propagate_request_id_layer())
            .layer(TraceLayer::new_for_http())
            .layer(set_request_id_layer())
    }

    /// The router, for serving or in-process requests.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve on `listener` until `shutdown` fires, then finish in-flight requests.
    pub async fn run(self, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}
