//! Error types callers need to match on
//!
//! Everything else travels as `eyre::Report` with context attached.

use thiserror::Error;

/// Errors from the swap store
#[derive(Debug, Error)]
pub enum StoreError {
    /// The swap is missing required fields or is not `unsigned`
    #[error("invalid swap {tx_hash}: {reason}")]
    InvalidSwap { tx_hash: String, reason: String },

    /// A swap with this source transaction hash already exists
    #[error("swap already exists for tx_hash={0}")]
    DuplicateSwap(String),

    #[error(transparent)]
    Backend(#[from] eyre::Report),
}

impl StoreError {
    pub fn invalid(tx_hash: &str, reason: impl Into<String>) -> Self {
        StoreError::InvalidSwap {
            tx_hash: tx_hash.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Backend(eyre::Report::new(e))
    }
}

/// Conditions that stop an operator
#[derive(Debug, Error)]
pub enum OperatorError {
    /// A burn the leader should already have recorded has no swap.
    /// Needs the leader to be checked before the operator is restarted.
    #[error("no swap recorded for burn tx_hash={0}; is the leader running?")]
    MissingSwap(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display() {
        let err = StoreError::invalid("0xabc", "status must be unsigned");
        assert_eq!(err.to_string(), "invalid swap 0xabc: status must be unsigned");

        let err = StoreError::DuplicateSwap("0xabc".to_string());
        assert!(err.to_string().contains("0xabc"));
    }

    #[test]
    fn test_operator_error_wraps_store() {
        let err: OperatorError = StoreError::DuplicateSwap("0x1".to_string()).into();
        assert!(matches!(err, OperatorError::Store(StoreError::DuplicateSwap(_))));
    }
}
