//! Envelope model, persisted record form, and payout messages.

use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::blockchain::types::{decimal_u256, Color};
use crate::envelope::store::StoreError;

/// Largest number of claimants an envelope may be split between.
pub const MAX_RECIPIENTS: u8 = 16;

/// Parse a `0x`-prefixed, 40-hex-digit account address.
pub fn parse_address(raw: &str) -> Option<Address> {
    if !raw.starts_with("0x") || raw.len() != 42 {
        return None;
    }
    Address::from_str(raw).ok()
}

/// Canonical store key / seed form of an address: lowercase `0x` hex.
pub fn address_key(address: &Address) -> String {
    alloy::hex::encode_prefixed(address)
}

/// Ordered list of distinct addresses.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AddressList(Vec<Address>);

impl AddressList {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.0.contains(address)
    }

    pub fn as_slice(&self) -> &[Address] {
        &self.0
    }

    pub fn first(&self) -> Option<&Address> {
        self.0.first()
    }

    /// Append `address`, refusing duplicates. Returns whether it was added.
    pub fn push(&mut self, address: Address) -> bool {
        if self.contains(&address) {
            return false;
        }
        self.0.push(address);
        true
    }

    /// Encode as a JSON array of lowercase address strings, in order.
    pub fn encode(&self) -> String {
        let keys: Vec<String> = self.0.iter().map(address_key).collect();
        serde_json::Value::from(keys).to_string()
    }

    /// Decode [`Self::encode`] output, rejecting malformed entries and duplicates.
    pub fn decode(raw: &str) -> Result<Self, String> {
        let entries: Vec<String> =
            serde_json::from_str(raw).map_err(|e| format!("not a list of strings: {}", e))?;

        let mut list = Self::new();
        for entry in entries {
            let address =
                parse_address(&entry).ok_or_else(|| format!("invalid address '{}'", entry))?;
            if !list.push(address) {
                return Err(format!("duplicate address '{}'", entry));
            }
        }
        Ok(list)
    }
}

/// An envelope: a custodial account and the state of its claims.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Derived custodial account; unique key.
    pub address: Address,
    /// Creation time, seconds since the Unix epoch.
    pub created: u64,
    /// Derivation index that produced `address`.
    pub envelope_index: u32,
    pub color: Color,
    /// Highest matching-color balance ever observed. Never decreases.
    pub max_amount: U256,
    /// Funder first, then claimants in claim order.
    pub claimants: AddressList,
    /// Claimants who arrived after every share slot was taken and drained the remainder.
    pub drain_claimants: AddressList,
    /// Share slots beyond the funder, in `1..=16`.
    pub num_recipients: u8,
}

impl Envelope {
    /// A fresh envelope with only the funder recorded.
    pub fn new(address: Address, envelope_index: u32, color: Color, funder: Address, num_recipients: u8) -> Self {
        let mut claimants = AddressList::new();
        claimants.push(funder);

        Self {
            address,
            created: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            envelope_index,
            color,
            max_amount: U256::ZERO,
            claimants,
            drain_claimants: AddressList::new(),
            num_recipients,
        }
    }

    /// The funder, recorded as `claimants[0]`.
    pub fn funder(&self) -> Option<&Address> {
        self.claimants.first()
    }

    /// Number of claims already made against the share slots.
    pub fn claims_made(&self) -> usize {
        self.claimants.len().saturating_sub(1)
    }

    /// Whether `address` is the funder or has already claimed.
    pub fn has_claimed(&self, address: &Address) -> bool {
        self.claimants.contains(address) || self.drain_claimants.contains(address)
    }
}

/// Persisted form of an [`Envelope`]: every field as a string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeRecord {
    pub address: String,
    pub created: String,
    pub envelope_index: String,
    pub color: String,
    pub max_amount: String,
    pub claimants: String,
    #[serde(default)]
    pub drain_claimants: String,
    pub num_recipients: String,
}

impl From<&Envelope> for EnvelopeRecord {
    fn from(envelope: &Envelope) -> Self {
        Self {
            address: address_key(&envelope.address),
            created: envelope.created.to_string(),
            envelope_index: envelope.envelope_index.to_string(),
            color: envelope.color.to_string(),
            max_amount: envelope.max_amount.to_string(),
            claimants: envelope.claimants.encode(),
            drain_claimants: envelope.drain_claimants.encode(),
            num_recipients: envelope.num_recipients.to_string(),
        }
    }
}

impl TryFrom<EnvelopeRecord> for Envelope {
    type Error = StoreError;

    fn try_from(record: EnvelopeRecord) -> Result<Self, Self::Error> {
        let corrupt = |field: &str, detail: String| StoreError::Corrupt {
            address: record.address.clone(),
            detail: format!("{}: {}", field, detail),
        };

        let address = parse_address(&record.address)
            .ok_or_else(|| corrupt("address", "invalid address".to_string()))?;
        let created = record
            .created
            .parse()
            .map_err(|e: std::num::ParseIntError| corrupt("created", e.to_string()))?;
        let envelope_index = record
            .envelope_index
            .parse()
            .map_err(|e: std::num::ParseIntError| corrupt("envelopeIndex", e.to_string()))?;
        let color = record
            .color
            .parse()
            .map_err(|e: std::num::ParseIntError| corrupt("color", e.to_string()))?;
        let max_amount = U256::from_str_radix(&record.max_amount, 10)
            .map_err(|e| corrupt("maxAmount", e.to_string()))?;
        let num_recipients: u8 = record
            .num_recipients
            .parse()
            .map_err(|e: std::num::ParseIntError| corrupt("numRecipients", e.to_string()))?;
        if !(1..=MAX_RECIPIENTS).contains(&num_recipients) {
            return Err(corrupt("numRecipients", format!("{} out of range", num_recipients)));
        }

        let claimants = AddressList::decode(&record.claimants).map_err(|e| corrupt("claimants", e))?;
        if claimants.is_empty() {
            return Err(corrupt("claimants", "missing funder".to_string()));
        }
        if claimants.len() > num_recipients as usize + 1 {
            return Err(corrupt("claimants", "more claimants than slots".to_string()));
        }
        let drain_claimants = if record.drain_claimants.is_empty() {
            AddressList::new()
        } else {
            AddressList::decode(&record.drain_claimants).map_err(|e| corrupt("drainClaimants", e))?
        };

        Ok(Self {
            address,
            created,
            envelope_index,
            color,
            max_amount,
            claimants,
            drain_claimants,
            num_recipients,
        })
    }
}

/// Queue message asking for one claimant's share to be paid out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayoutRequest {
    pub claimant_addr: Address,
    /// Derivation index of the paying envelope account.
    pub address_index: u32,
    pub color: Color,
    #[serde(with = "decimal_u256")]
    pub amount: U256,
}

impl PayoutRequest {
    /// JSON message body.
    pub fn to_message(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse a JSON message body.
    pub fn from_message(body: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    const FUNDER: Address = address!("aabeac30c498d9e26865f34fcaa57dbb935b0daa");
    const CLAIMANT: Address = address!("f3beac30c498d9e26865f34fcaa57dbb935b0d74");
    const ENVELOPE: Address = address!("27f748becc70b70e81177266a55c1c93738a2b07");

    #[test]
    fn test_parse_address() {
        assert_eq!(
            parse_address("0xf3beac30c498d9e26865f34fcaa57dbb935b0d74"),
            Some(CLAIMANT)
        );
        assert!(parse_address("0x123").is_none());
        assert!(parse_address("f3beac30c498d9e26865f34fcaa57dbb935b0d74").is_none());
        assert!(parse_address("0xz3beac30c498d9e26865f34fcaa57dbb935b0d74").is_none());
    }

    #[test]
    fn test_address_list_codec() {
        let mut list = AddressList::new();
        assert!(list.push(FUNDER));
        assert!(list.push(CLAIMANT));
        assert!(!list.push(FUNDER));

        let encoded = list.encode();
        assert_eq!(
            encoded,
            r#"["0xaabeac30c498d9e26865f34fcaa57dbb935b0daa","0xf3beac30c498d9e26865f34fcaa57dbb935b0d74"]"#
        );
        assert_eq!(AddressList::decode(&encoded).unwrap(), list);
    }

    #[test]
    fn test_address_list_rejects_bad_input() {
        assert!(AddressList::decode("not json").is_err());
        assert!(AddressList::decode(r#"["0x123"]"#).is_err());
        let dup = r#"["0xaabeac30c498d9e26865f34fcaa57dbb935b0daa","0xaabeac30c498d9e26865f34fcaa57dbb935b0daa"]"#;
        assert!(AddressList::decode(dup).unwrap_err().contains("duplicate"));
    }

    #[test]
    fn test_record_conversion() {
        let mut envelope = Envelope::new(ENVELOPE, 3, 0, FUNDER, 5);
        envelope.max_amount = U256::from(10).pow(U256::from(21));
        envelope.claimants.push(CLAIMANT);

        let record = EnvelopeRecord::from(&envelope);
        assert_eq!(record.address, "0x27f748becc70b70e81177266a55c1c93738a2b07");
        assert_eq!(record.envelope_index, "3");
        assert_eq!(record.max_amount, "1000000000000000000000");
        assert_eq!(record.num_recipients, "5");
        assert_eq!(record.drain_claimants, "[]");

        let back = Envelope::try_from(record).unwrap();
        assert_eq!(back, envelope);
        assert_eq!(back.funder(), Some(&FUNDER));
        assert_eq!(back.claims_made(), 1);
    }

    #[test]
    fn test_corrupt_record() {
        let mut record = EnvelopeRecord::from(&Envelope::new(ENVELOPE, 3, 0, FUNDER, 5));
        record.num_recipients = "17".to_string();
        let err = Envelope::try_from(record).unwrap_err();
        assert!(err.to_string().contains("numRecipients"));
    }

    #[test]
    fn test_payout_message_schema() {
        let request = PayoutRequest {
            claimant_addr: CLAIMANT,
            address_index: 3,
            color: 0,
            amount: U256::from(10).pow(U256::from(19)),
        };
        let body = request.to_message().unwrap();
        let value: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(value["addressIndex"], 3);
        assert_eq!(value["color"], 0);
        assert_eq!(value["amount"], "10000000000000000000");
        assert_eq!(
            value["claimantAddr"].as_str().unwrap().to_lowercase(),
            "0xf3beac30c498d9e26865f34fcaa57dbb935b0d74"
        );
        assert_eq!(PayoutRequest::from_message(&body).unwrap(), request);
    }
}
