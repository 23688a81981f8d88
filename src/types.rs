//! Common types used throughout the crate

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Per-account submission sequence number.
pub type Nonce = u32;

/// Closed set of failure kinds the orchestrator branches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// Anything without a more specific classification
    Other,
    /// Mined, but ran out of gas (nonce consumed)
    OutOfGas,
    /// Mined, but execution reverted (nonce consumed)
    Reverted,
    /// The node already has a transaction at or above this nonce
    NonceTooLow,
    /// The node sees a gap below this nonce
    NonceTooHigh,
    /// Broadcast, but no receipt was observed in time (nonce consumed)
    ReceiptNotFound,
    /// Account balance cannot cover value + fees
    InsufficientFunds,
}

impl FailureKind {
    /// Whether the ledger has (or may have) consumed the nonce
    pub fn consumes_nonce(&self) -> bool {
        matches!(
            self,
            FailureKind::OutOfGas | FailureKind::Reverted | FailureKind::ReceiptNotFound
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Other => "other",
            FailureKind::OutOfGas => "out_of_gas",
            FailureKind::Reverted => "reverted",
            FailureKind::NonceTooLow => "nonce_too_low",
            FailureKind::NonceTooHigh => "nonce_too_high",
            FailureKind::ReceiptNotFound => "receipt_not_found",
            FailureKind::InsufficientFunds => "insufficient_funds",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error parsing a hex-encoded fixed-size value
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HexParseError {
    #[error("Invalid hex: {0}")]
    InvalidHex(String),

    #[error("Expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

fn decode_fixed<const N: usize>(s: &str) -> Result<[u8; N], HexParseError> {
    let stripped = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(stripped).map_err(|e| HexParseError::InvalidHex(e.to_string()))?;
    let actual = bytes.len();
    bytes.try_into().map_err(|_| HexParseError::InvalidLength {
        expected: N,
        actual,
    })
}

/// 20-byte account address
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub const fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

impl FromStr for Address {
    type Err = HexParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_fixed::<20>(s).map(Self)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// 32-byte transaction hash
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TxHash(pub [u8; 32]);

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxHash({})", self)
    }
}

impl FromStr for TxHash {
    type Err = HexParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_fixed::<32>(s).map(Self)
    }
}

impl Serialize for TxHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TxHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Fee fields stamped onto a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeeFields {
    Legacy {
        gas_price: u128,
    },
    Eip1559 {
        max_fee_per_gas: u128,
        max_priority_fee_per_gas: u128,
    },
}

/// Fee data reported by the node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeeEstimate {
    pub gas_price: u128,
    /// `None` when the node does not support `eth_maxPriorityFeePerGas`
    pub max_priority_fee_per_gas: Option<u128>,
}

/// Caller-supplied submission options
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxOptions {
    /// Fixed gas limit; estimated by the node when absent
    pub gas_limit: Option<u64>,
    /// Fixed fees; derived from a [`FeeEstimate`] when absent
    pub fees: Option<FeeFields>,
    /// Value attached to contract calls
    pub value: u128,
}

impl TxOptions {
    pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = Some(gas_limit);
        self
    }

    pub fn with_fees(mut self, fees: FeeFields) -> Self {
        self.fees = Some(fees);
        self
    }

    pub fn with_value(mut self, value: u128) -> Self {
        self.value = value;
        self
    }
}

/// A fully assembled, nonce-stamped transaction ready for signing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedTransaction {
    pub chain_id: u64,
    pub nonce: Nonce,
    pub from: Address,
    /// `None` for contract creation
    pub to: Option<Address>,
    pub value: u128,
    pub data: Vec<u8>,
    pub gas_limit: u64,
    pub fees: FeeFields,
}

/// Terminal confirmation of a mined transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionReceipt {
    pub transaction_hash: TxHash,
    pub block_number: u64,
    pub gas_used: u64,
    /// `true` when execution succeeded
    pub status: bool,
}

/// Result of a successful submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Mined with a successful receipt
    Confirmed {
        nonce: Nonce,
        receipt: TransactionReceipt,
    },
    /// Broadcast without waiting for a receipt
    Unconfirmed { nonce: Nonce, hash: TxHash },
}

impl SubmitOutcome {
    pub fn nonce(&self) -> Nonce {
        match self {
            SubmitOutcome::Confirmed { nonce, .. } | SubmitOutcome::Unconfirmed { nonce, .. } => {
                *nonce
            }
        }
    }

    pub fn hash(&self) -> TxHash {
        match self {
            SubmitOutcome::Confirmed { receipt, .. } => receipt.transaction_hash,
            SubmitOutcome::Unconfirmed { hash, .. } => *hash,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self, SubmitOutcome::Confirmed { .. })
    }
}
