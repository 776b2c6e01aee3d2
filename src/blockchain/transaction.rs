//! Payout transaction assembly, signing and encoding.
//!
//! # Responsibilities
//! - Select unspent inputs covering a requested amount of one color
//! - Balance outputs: one payment, plus one change output when inputs overshoot
//! - Sign every input with the paying account's key
//! - Serialize the signed transaction for broadcast
//!
//! Selection walks the outputs in the order the ledger returned them, so the
//! same unspent set and request always produce the same transaction.

use alloy::primitives::{keccak256, Address, Bytes, B256, U256};
use alloy::signers::Signature;
use thiserror::Error;

use crate::blockchain::types::{ChainError, ChainResult, Color, Outpoint, TxOutput, UnspentOutput};
use crate::blockchain::wallet::DerivedAccount;

/// Encoding version prefix of a payout transaction.
const TX_VERSION: u8 = 1;

/// Reasons a payout cannot be assembled from the current unspent set.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AssemblyError {
    /// The paying account owns no outputs at all.
    #[error("No tokens in the envelope")]
    NoFunds,

    /// The matching-color outputs do not cover the request.
    #[error("Insufficient funds of color {color}: have {available}, need {requested}")]
    InsufficientFunds {
        color: Color,
        available: U256,
        requested: U256,
    },

    /// A zero payout would spend nothing.
    #[error("Payout amount must be positive")]
    ZeroAmount,

    /// Inputs and outputs disagree; never expected from `assemble`.
    #[error("Unbalanced transaction: inputs {inputs}, outputs {outputs}")]
    Unbalanced { inputs: U256, outputs: U256 },

    /// Too many inputs or outputs for the encoding.
    #[error("Transaction too large: {0} entries")]
    TooLarge(usize),

    /// Bytes that are not a payout transaction.
    #[error("Malformed transaction: {0}")]
    Malformed(String),
}

/// A selected input: the outpoint and the output it spends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxInput {
    pub outpoint: Outpoint,
    pub spent: TxOutput,
}

/// A balanced but unsigned payout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedPayout {
    inputs: Vec<TxInput>,
    outputs: Vec<TxOutput>,
}

/// Build a payout of `amount` of `color` from `payer` to `recipient`.
pub fn assemble(
    unspent: &[UnspentOutput],
    payer: Address,
    recipient: Address,
    color: Color,
    amount: U256,
) -> Result<UnsignedPayout, AssemblyError> {
    if unspent.is_empty() {
        return Err(AssemblyError::NoFunds);
    }
    if amount.is_zero() {
        return Err(AssemblyError::ZeroAmount);
    }

    let (inputs, selected_total) = select_inputs(unspent, color, amount)?;

    let mut outputs = vec![TxOutput::new(recipient, amount, color)];
    if selected_total > amount {
        outputs.push(TxOutput::new(payer, selected_total - amount, color));
    }

    let payout = UnsignedPayout { inputs, outputs };
    payout.check_balanced()?;
    Ok(payout)
}

/// Accumulate matching outputs in ledger order until they cover `amount`.
fn select_inputs(
    unspent: &[UnspentOutput],
    color: Color,
    amount: U256,
) -> Result<(Vec<TxInput>, U256), AssemblyError> {
    let mut inputs = Vec::new();
    let mut total = U256::ZERO;

    for candidate in unspent.iter().filter(|u| u.output.color == color) {
        if total >= amount {
            break;
        }
        total = total.saturating_add(candidate.output.value);
        inputs.push(TxInput {
            outpoint: candidate.outpoint.clone(),
            spent: candidate.output.clone(),
        });
    }

    if total < amount {
        return Err(AssemblyError::InsufficientFunds {
            color,
            available: total,
            requested: amount,
        });
    }

    Ok((inputs, total))
}

impl UnsignedPayout {
    pub fn inputs(&self) -> &[TxInput] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[TxOutput] {
        &self.outputs
    }

    /// Total value spent by the inputs.
    pub fn input_total(&self) -> U256 {
        self.inputs
            .iter()
            .fold(U256::ZERO, |acc, i| acc.saturating_add(i.spent.value))
    }

    /// Total value created by the outputs.
    pub fn output_total(&self) -> U256 {
        self.outputs
            .iter()
            .fold(U256::ZERO, |acc, o| acc.saturating_add(o.value))
    }

    fn check_balanced(&self) -> Result<(), AssemblyError> {
        let (inputs, outputs) = (self.input_total(), self.output_total());
        if inputs != outputs {
            return Err(AssemblyError::Unbalanced { inputs, outputs });
        }
        Ok(())
    }

    /// Canonical byte encoding of the unsigned body.
    ///
    /// Layout: version, input count, then each outpoint (length-prefixed),
    /// output count, then each output as value (32 bytes BE), color (4 bytes BE), address.
    pub fn encode(&self) -> Result<Vec<u8>, AssemblyError> {
        let input_count = u8::try_from(self.inputs.len())
            .map_err(|_| AssemblyError::TooLarge(self.inputs.len()))?;
        let output_count = u8::try_from(self.outputs.len())
            .map_err(|_| AssemblyError::TooLarge(self.outputs.len()))?;

        let mut buf = vec![TX_VERSION, input_count];
        for input in &self.inputs {
            let raw = input.outpoint.as_bytes();
            let len = u8::try_from(raw.len()).map_err(|_| AssemblyError::TooLarge(raw.len()))?;
            buf.push(len);
            buf.extend_from_slice(raw);
        }
        buf.push(output_count);
        for output in &self.outputs {
            buf.extend_from_slice(&output.value.to_be_bytes::<32>());
            buf.extend_from_slice(&output.color.to_be_bytes());
            buf.extend_from_slice(output.address.as_slice());
        }
        Ok(buf)
    }

    /// Digest every input signature commits to.
    pub fn signing_hash(&self) -> Result<B256, AssemblyError> {
        Ok(keccak256(self.encode()?))
    }

    /// Sign all inputs with `account`.
    ///
    /// All inputs are owned by the same derived account, so one signature over
    /// the body authorizes each of them.
    pub async fn sign(self, account: &DerivedAccount) -> ChainResult<SignedPayout> {
        let body = self.encode().map_err(|e| ChainError::Wallet(e.to_string()))?;
        let hash = keccak256(&body);
        let signature = account.sign_hash(hash).await?;
        let signatures = vec![signature; self.inputs.len()];

        Ok(SignedPayout {
            payout: self,
            body,
            signatures,
        })
    }
}

/// A payout with one signature per input, ready for broadcast.
#[derive(Debug, Clone)]
pub struct SignedPayout {
    payout: UnsignedPayout,
    body: Vec<u8>,
    signatures: Vec<Signature>,
}

impl SignedPayout {
    pub fn payout(&self) -> &UnsignedPayout {
        &self.payout
    }

    pub fn signatures(&self) -> &[Signature] {
        &self.signatures
    }

    /// Unsigned body followed by the 65-byte signature of each input.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut raw = self.body.clone();
        for signature in &self.signatures {
            raw.extend_from_slice(&signature.as_bytes());
        }
        raw
    }

    /// `0x`-prefixed hex of [`Self::to_bytes`].
    pub fn to_hex(&self) -> String {
        alloy::hex::encode_prefixed(self.to_bytes())
    }

    /// Identifier of the transaction: keccak256 of the full signed encoding.
    pub fn hash(&self) -> B256 {
        keccak256(self.to_bytes())
    }
}

/// A broadcast payout read back from its wire form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPayout {
    pub spent: Vec<Outpoint>,
    pub outputs: Vec<TxOutput>,
    pub signatures: Vec<Signature>,
}

impl DecodedPayout {
    /// Parse the output of [`SignedPayout::to_bytes`].
    pub fn from_bytes(raw: &[u8]) -> Result<Self, AssemblyError> {
        let mut rest = raw;

        let version = take(&mut rest, 1)?[0];
        if version != TX_VERSION {
            return Err(AssemblyError::Malformed(format!("unknown version {}", version)));
        }

        let input_count = take(&mut rest, 1)?[0] as usize;
        let mut spent = Vec::with_capacity(input_count);
        for _ in 0..input_count {
            let len = take(&mut rest, 1)?[0] as usize;
            spent.push(Outpoint(Bytes::copy_from_slice(take(&mut rest, len)?)));
        }

        let output_count = take(&mut rest, 1)?[0] as usize;
        let mut outputs = Vec::with_capacity(output_count);
        for _ in 0..output_count {
            let value = U256::from_be_slice(take(&mut rest, 32)?);
            let mut color = [0u8; 4];
            color.copy_from_slice(take(&mut rest, 4)?);
            let address = Address::from_slice(take(&mut rest, 20)?);
            outputs.push(TxOutput::new(address, value, u32::from_be_bytes(color)));
        }

        let mut signatures = Vec::with_capacity(input_count);
        for _ in 0..input_count {
            let signature = Signature::try_from(take(&mut rest, 65)?)
                .map_err(|e| AssemblyError::Malformed(e.to_string()))?;
            signatures.push(signature);
        }

        if !rest.is_empty() {
            return Err(AssemblyError::Malformed(format!("{} trailing bytes", rest.len())));
        }
        Ok(Self {
            spent,
            outputs,
            signatures,
        })
    }

    /// Parse `0x`-prefixed hex as produced by [`SignedPayout::to_hex`].
    pub fn from_hex(raw: &str) -> Result<Self, AssemblyError> {
        let bytes = alloy::hex::decode(raw).map_err(|e| AssemblyError::Malformed(e.to_string()))?;
        Self::from_bytes(&bytes)
    }
}

/// Split `n` bytes off the front of `rest`.
fn take<'a>(rest: &mut &'a [u8], n: usize) -> Result<&'a [u8], AssemblyError> {
    if rest.len() < n {
        return Err(AssemblyError::Malformed("truncated".to_string()));
    }
    let (head, tail) = rest.split_at(n);
    *rest = tail;
    Ok(head)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    const PAYER: Address = address!("83b3525e17f9eaa92dae3f9924cc333c94c7e98a");
    const CLAIMANT: Address = address!("f3beac30c498d9e26865f34fcaa57dbb935b0d74");

    fn utxo(tag: u8, value: u64, color: Color) -> UnspentOutput {
        UnspentOutput {
            outpoint: Outpoint(Bytes::from(vec![tag; 33])),
            output: TxOutput::new(PAYER, U256::from(value), color),
        }
    }

    #[test]
    fn test_payment_with_change() {
        let unspent = vec![
            utxo(1, 500_000_000_000_000_000, 0),
            utxo(2, 1_000_000_000_000_000_000, 0),
        ];
        let amount = U256::from(130_000_000_000_000u64);

        let payout = assemble(&unspent, PAYER, CLAIMANT, 0, amount).unwrap();

        assert_eq!(payout.inputs().len(), 1);
        assert_eq!(payout.outputs().len(), 2);
        assert_eq!(payout.outputs()[0], TxOutput::new(CLAIMANT, amount, 0));
        assert_eq!(payout.outputs()[1].address, PAYER);
        assert_eq!(
            payout.outputs()[1].value,
            U256::from(500_000_000_000_000_000u64) - amount
        );
        assert_eq!(payout.input_total(), payout.output_total());
    }

    #[test]
    fn test_exact_amount_has_no_change() {
        let unspent = vec![utxo(1, 300, 0), utxo(2, 200, 0), utxo(3, 900, 0)];
        let payout = assemble(&unspent, PAYER, CLAIMANT, 0, U256::from(500)).unwrap();

        assert_eq!(payout.inputs().len(), 2);
        assert_eq!(payout.outputs(), &[TxOutput::new(CLAIMANT, U256::from(500), 0)]);
    }

    #[test]
    fn test_selection_skips_other_colors_and_keeps_order() {
        let unspent = vec![utxo(1, 1000, 5), utxo(2, 40, 0), utxo(3, 1000, 5), utxo(4, 70, 0)];
        let payout = assemble(&unspent, PAYER, CLAIMANT, 0, U256::from(100)).unwrap();

        let tags: Vec<u8> = payout.inputs().iter().map(|i| i.outpoint.as_bytes()[0]).collect();
        assert_eq!(tags, vec![2, 4]);
        assert_eq!(payout.outputs()[1].value, U256::from(10));
        assert!(payout.outputs().iter().all(|o| o.color == 0));
    }

    #[test]
    fn test_no_funds() {
        let err = assemble(&[], PAYER, CLAIMANT, 0, U256::from(1)).unwrap_err();
        assert_eq!(err, AssemblyError::NoFunds);
    }

    #[test]
    fn test_insufficient_funds() {
        let unspent = vec![utxo(1, 10, 0), utxo(2, 1000, 3)];
        let err = assemble(&unspent, PAYER, CLAIMANT, 0, U256::from(11)).unwrap_err();
        assert_eq!(
            err,
            AssemblyError::InsufficientFunds {
                color: 0,
                available: U256::from(10),
                requested: U256::from(11),
            }
        );
    }

    #[test]
    fn test_zero_amount_rejected() {
        let unspent = vec![utxo(1, 10, 0)];
        let err = assemble(&unspent, PAYER, CLAIMANT, 0, U256::ZERO).unwrap_err();
        assert_eq!(err, AssemblyError::ZeroAmount);
    }

    #[test]
    fn test_encoding_is_stable() {
        let unspent = vec![utxo(9, 10, 0)];
        let a = assemble(&unspent, PAYER, CLAIMANT, 0, U256::from(4)).unwrap();
        let b = assemble(&unspent, PAYER, CLAIMANT, 0, U256::from(4)).unwrap();
        assert_eq!(a.signing_hash().unwrap(), b.signing_hash().unwrap());

        let raw = a.encode().unwrap();
        // version + count + (len + 33) + count + 2 * (32 + 4 + 20)
        assert_eq!(raw.len(), 1 + 1 + 34 + 1 + 2 * 56);
        assert_eq!(raw[0], TX_VERSION);
    }

    #[tokio::test]
    async fn test_sign_all_inputs() {
        let deriver = crate::blockchain::wallet::AccountDeriver::from_mnemonic(
            "unable drop gospel simple danger elbow brand head shrug cereal lens grain",
        )
        .unwrap();
        let account = deriver.derive(2).unwrap();
        let payer = account.address();
        let unspent = vec![
            UnspentOutput {
                outpoint: Outpoint(Bytes::from(vec![1; 33])),
                output: TxOutput::new(payer, U256::from(60), 0),
            },
            UnspentOutput {
                outpoint: Outpoint(Bytes::from(vec![2; 33])),
                output: TxOutput::new(payer, U256::from(60), 0),
            },
        ];

        let unsigned = assemble(&unspent, payer, CLAIMANT, 0, U256::from(100)).unwrap();
        let hash = unsigned.signing_hash().unwrap();
        let signed = unsigned.sign(&account).await.unwrap();

        assert_eq!(signed.signatures().len(), 2);
        for signature in signed.signatures() {
            assert_eq!(signature.recover_address_from_prehash(&hash).unwrap(), payer);
        }
        let hex = signed.to_hex();
        assert!(hex.starts_with("0x"));
        assert_eq!(hex.len(), 2 + 2 * signed.to_bytes().len());

        let decoded = DecodedPayout::from_hex(&hex).unwrap();
        assert_eq!(decoded.outputs, signed.payout().outputs());
        assert_eq!(decoded.spent.len(), 2);
        assert_eq!(decoded.signatures.len(), 2);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(DecodedPayout::from_bytes(&[]).is_err());
        assert!(DecodedPayout::from_bytes(&[TX_VERSION + 1, 0, 0]).is_err());
        // Declares one input but carries none
        assert!(DecodedPayout::from_bytes(&[TX_VERSION, 1]).is_err());
        assert!(DecodedPayout::from_hex("0xzz").is_err());
    }
}
