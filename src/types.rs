//! Core relay types
//!
//! Burn records flow out of the watcher, swaps and signatures live in the
//! store. Swap status is persisted as lowercase text.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Source Chain
// ============================================================================

/// A normalized `LogBurn` event. Produced per poll and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BurnRecord {
    /// Source-chain transaction hash (0x-prefixed, lowercase)
    pub transaction_hash: String,
    /// EIP-55 checksummed burner address
    pub from: String,
    /// Destination-chain recipient (bech32)
    pub to: String,
    /// Burned amount in the smallest on-chain unit
    pub amount: u128,
    /// Per-contract burn nonce
    pub nonce: u64,
    pub block_number: u64,
}

// ============================================================================
// Swap Lifecycle
// ============================================================================

/// Lifecycle state of a swap.
///
/// Legal edges: `Unsigned → Submitted → Confirmed`, `Unsigned → Failed`,
/// `Submitted → Unsigned` (retry) and `Submitted → Failed` (status check error).
/// `Confirmed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwapStatus {
    Unsigned,
    Submitted,
    Confirmed,
    Failed,
}

impl SwapStatus {
    pub const ALL: [SwapStatus; 4] = [
        SwapStatus::Unsigned,
        SwapStatus::Submitted,
        SwapStatus::Confirmed,
        SwapStatus::Failed,
    ];

    /// Get the status as a lowercase string
    pub fn as_str(&self) -> &'static str {
        match self {
            SwapStatus::Unsigned => "unsigned",
            SwapStatus::Submitted => "submitted",
            SwapStatus::Confirmed => "confirmed",
            SwapStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SwapStatus::Confirmed | SwapStatus::Failed)
    }

    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(&self, next: SwapStatus) -> bool {
        use SwapStatus::*;
        matches!(
            (self, next),
            (Unsigned, Submitted)
                | (Unsigned, Failed)
                | (Submitted, Confirmed)
                | (Submitted, Unsigned)
                | (Submitted, Failed)
        )
    }
}

impl fmt::Display for SwapStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SwapStatus {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unsigned" => Ok(SwapStatus::Unsigned),
            "submitted" => Ok(SwapStatus::Submitted),
            "confirmed" => Ok(SwapStatus::Confirmed),
            "failed" => Ok(SwapStatus::Failed),
            other => Err(eyre::eyre!("Unknown swap status: {}", other)),
        }
    }
}

/// Unsigned destination-chain transaction, kept as the JSON the chain
/// client produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnsignedTx(pub serde_json::Value);

impl UnsignedTx {
    /// True when there is nothing to sign
    pub fn is_empty(&self) -> bool {
        match &self.0 {
            serde_json::Value::Null => true,
            serde_json::Value::Object(map) => map.is_empty(),
            serde_json::Value::String(s) => s.is_empty(),
            _ => false,
        }
    }
}

/// A durable swap record, keyed by the source transaction hash
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Swap {
    pub transaction_hash: String,
    pub from: String,
    pub to: String,
    pub amount: u128,
    pub nonce: u64,
    pub unsigned_tx: UnsignedTx,
    pub sequence: u64,
    pub account_number: u64,
    pub status: SwapStatus,
    pub mint_transaction_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// For inserting new swaps
#[derive(Debug, Clone, PartialEq)]
pub struct NewSwap {
    pub transaction_hash: String,
    pub from: String,
    pub to: String,
    pub amount: u128,
    pub nonce: u64,
    pub unsigned_tx: UnsignedTx,
    pub sequence: u64,
    pub account_number: u64,
    pub status: SwapStatus,
}

impl NewSwap {
    /// Build an `Unsigned` swap from a burn and the generated transaction
    pub fn unsigned(
        burn: &BurnRecord,
        unsigned_tx: UnsignedTx,
        sequence: u64,
        account_number: u64,
    ) -> Self {
        Self {
            transaction_hash: burn.transaction_hash.clone(),
            from: burn.from.clone(),
            to: burn.to.clone(),
            amount: burn.amount,
            nonce: burn.nonce,
            unsigned_tx,
            sequence,
            account_number,
            status: SwapStatus::Unsigned,
        }
    }
}

/// One operator's signature over a swap's unsigned transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub operator: String,
    pub transaction_hash: String,
    /// Opaque signature payload as produced by the chain client
    pub signature: String,
}

/// An `Unsigned` swap together with every signature collected for it
#[derive(Debug, Clone, PartialEq)]
pub struct SwapWithSignatures {
    pub swap: Swap,
    pub signatures: Vec<Signature>,
}

/// Swap counts per status, for the status endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub unsigned: i64,
    pub submitted: i64,
    pub confirmed: i64,
    pub failed: i64,
}

impl StatusCounts {
    pub fn add(&mut self, status: SwapStatus, count: i64) {
        match status {
            SwapStatus::Unsigned => self.unsigned += count,
            SwapStatus::Submitted => self.submitted += count,
            SwapStatus::Confirmed => self.confirmed += count,
            SwapStatus::Failed => self.failed += count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_as_str() {
        assert_eq!(SwapStatus::Unsigned.as_str(), "unsigned");
        assert_eq!(SwapStatus::Submitted.as_str(), "submitted");
        assert_eq!(SwapStatus::Confirmed.as_str(), "confirmed");
        assert_eq!(SwapStatus::Failed.as_str(), "failed");
    }

    #[test]
    fn test_status_parse() {
        for status in SwapStatus::ALL {
            assert_eq!(status.as_str().parse::<SwapStatus>().unwrap(), status);
        }
        assert!("signed".parse::<SwapStatus>().is_err());
    }

    #[test]
    fn test_state_machine_edges() {
        use SwapStatus::*;
        assert!(Unsigned.can_transition_to(Submitted));
        assert!(Unsigned.can_transition_to(Failed));
        assert!(Submitted.can_transition_to(Confirmed));
        assert!(Submitted.can_transition_to(Unsigned));
        assert!(!Unsigned.can_transition_to(Confirmed));
        for next in SwapStatus::ALL {
            assert!(!Confirmed.can_transition_to(next));
            assert!(!Failed.can_transition_to(next));
        }
    }

    #[test]
    fn test_unsigned_tx_empty() {
        assert!(UnsignedTx(serde_json::Value::Null).is_empty());
        assert!(UnsignedTx(serde_json::json!({})).is_empty());
        assert!(!UnsignedTx(serde_json::json!({"type": "cosmos-sdk/StdTx"})).is_empty());
    }

    #[test]
    fn test_status_serde_lowercase() {
        let json = serde_json::to_string(&SwapStatus::Submitted).unwrap();
        assert_eq!(json, "\"submitted\"");
    }
}
