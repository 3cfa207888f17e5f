//! Durable swap and signature records
//!
//! The backing store gives per-record atomic updates and a uniqueness
//! constraint on the swap key, nothing more. No operation here spans a
//! multi-record transaction.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::types::{NewSwap, Swap, SwapStatus, SwapWithSignatures, StatusCounts};

pub mod memory;
pub mod postgres;

pub use memory::MemorySwapStore;
pub use postgres::PgSwapStore;

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait SwapStore: Send + Sync {
    /// Insert a new `unsigned` swap.
    ///
    /// Fails with `InvalidSwap` on missing fields or a non-`unsigned` status,
    /// and with `DuplicateSwap` when the transaction hash is already known.
    async fn insert_if_absent(&self, swap: &NewSwap) -> StoreResult<()>;

    /// Record an operator signature. Returns false when an identical
    /// payload is already stored.
    async fn insert_signature_if_absent(
        &self,
        operator: &str,
        tx_hash: &str,
        signature: &str,
    ) -> StoreResult<bool>;

    /// Whether `operator` already contributed a signature for `tx_hash`
    async fn has_signed(&self, operator: &str, tx_hash: &str) -> StoreResult<bool>;

    async fn fetch_swap(&self, tx_hash: &str) -> StoreResult<Option<Swap>>;

    async fn find_all_by_status(&self, status: SwapStatus) -> StoreResult<Vec<Swap>>;

    /// Every `unsigned` swap holding at least `threshold` signatures,
    /// returned with those signatures. A threshold of 0 is treated as 1.
    async fn find_above_threshold_unsigned_swaps(
        &self,
        threshold: usize,
    ) -> StoreResult<Vec<SwapWithSignatures>>;

    /// Unconditionally overwrite status and mint hash
    async fn update_swap_status(
        &self,
        tx_hash: &str,
        mint_tx_hash: Option<&str>,
        status: SwapStatus,
    ) -> StoreResult<()>;

    async fn count_by_status(&self) -> StoreResult<StatusCounts>;

    /// Last block a named watcher fully handled
    async fn last_processed_block(&self, watcher: &str) -> StoreResult<Option<u64>>;

    async fn set_last_processed_block(&self, watcher: &str, block: u64) -> StoreResult<()>;
}

/// Quorum size actually applied. A swap with no signatures is never ready.
pub fn quorum_threshold(threshold: usize) -> usize {
    threshold.max(1)
}

/// Reject swaps that must never reach durable state
pub fn validate_swap(swap: &NewSwap) -> StoreResult<()> {
    if swap.transaction_hash.is_empty() {
        return Err(StoreError::invalid("<empty>", "missing transaction hash"));
    }
    if swap.unsigned_tx.is_empty() {
        return Err(StoreError::invalid(
            &swap.transaction_hash,
            "missing unsigned transaction",
        ));
    }
    if swap.to.is_empty() {
        return Err(StoreError::invalid(&swap.transaction_hash, "missing recipient"));
    }
    if swap.status != SwapStatus::Unsigned {
        return Err(StoreError::invalid(
            &swap.transaction_hash,
            format!("status must be unsigned, got {}", swap.status),
        ));
    }
    Ok(())
}
