//! Destination-chain operations
//!
//! The relay only needs six things from the Cosmos side. `CliChainClient`
//! provides them by driving the chain's CLI binary; tests substitute their
//! own implementation.

use async_trait::async_trait;
use eyre::Result;
use serde::{Deserialize, Serialize};

use crate::types::{Signature, UnsignedTx};

pub mod cli;

pub use cli::CliChainClient;

/// Outcome of submitting a multisigned transaction
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastResult {
    /// Destination transaction hash. `None` means the chain did not accept it.
    pub txhash: Option<String>,
}

impl BroadcastResult {
    pub fn accepted(txhash: impl Into<String>) -> Self {
        Self {
            txhash: Some(txhash.into()),
        }
    }

    /// Mint hash if the chain returned a non-empty one
    pub fn mint_hash(&self) -> Option<&str> {
        self.txhash.as_deref().filter(|h| !h.is_empty())
    }
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Current sequence of the multisig account
    async fn sequence_number(&self) -> Result<u64>;

    /// Account number of the multisig account
    async fn get_account_number(&self) -> Result<u64>;

    /// Build the unsigned mint transaction for one burn
    async fn generate_token_swap(
        &self,
        src_tx_hash: &str,
        src_sender: &str,
        amount: u128,
        dest_address: &str,
    ) -> Result<UnsignedTx>;

    /// Produce this identity's signature over `unsigned_tx`
    async fn sign_tx(
        &self,
        unsigned_tx: &UnsignedTx,
        sequence: u64,
        account_number: u64,
    ) -> Result<String>;

    /// Combine signatures into a multisig transaction and submit it
    async fn broadcast_token_swap(
        &self,
        signatures: &[Signature],
        unsigned_tx: &UnsignedTx,
        sequence: u64,
        account_number: u64,
    ) -> Result<BroadcastResult>;

    /// Whether the mint for `src_tx_hash` has executed on chain.
    ///
    /// A swap the chain does not know yet is `Ok(false)`; `Err` is reserved
    /// for failures to get an answer at all.
    async fn is_swap_done(&self, src_tx_hash: &str) -> Result<bool>;
}

/// Source burn hash embedded in a generated mint transaction
pub fn burn_tx_hash(unsigned_tx: &UnsignedTx) -> Option<&str> {
    unsigned_tx
        .0
        .pointer("/value/msg/0/value/BurnTxHash")
        .and_then(|v| v.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mint_hash() {
        assert_eq!(BroadcastResult::accepted("0xabc").mint_hash(), Some("0xabc"));
        assert_eq!(BroadcastResult::accepted("").mint_hash(), None);
        assert_eq!(BroadcastResult::default().mint_hash(), None);
    }

    #[test]
    fn test_burn_tx_hash() {
        let tx = UnsignedTx(serde_json::json!({
            "type": "cosmos-sdk/StdTx",
            "value": { "msg": [{ "type": "tokenswap/TokenSwap", "value": { "BurnTxHash": "0xfeed" } }] }
        }));
        assert_eq!(burn_tx_hash(&tx), Some("0xfeed"));
        assert_eq!(burn_tx_hash(&UnsignedTx(serde_json::json!({}))), None);
    }
}
