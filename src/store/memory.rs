//! In-process swap store
//!
//! Same semantics as the Postgres store, backed by a mutex-guarded map.
//! Used by tests and by local runs with `STORE_BACKEND=memory`.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use super::{quorum_threshold, validate_swap, StoreResult, SwapStore};
use crate::error::StoreError;
use crate::types::{NewSwap, Signature, StatusCounts, Swap, SwapStatus, SwapWithSignatures};

#[derive(Default)]
struct Inner {
    swaps: BTreeMap<String, Swap>,
    /// Insertion order keeps query results stable
    signatures: Vec<Signature>,
    cursors: HashMap<String, u64>,
}

#[derive(Default)]
pub struct MemorySwapStore {
    inner: Mutex<Inner>,
}

impl MemorySwapStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<std::sync::MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Backend(eyre::eyre!("memory store mutex poisoned")))
    }
}

#[async_trait]
impl SwapStore for MemorySwapStore {
    async fn insert_if_absent(&self, swap: &NewSwap) -> StoreResult<()> {
        validate_swap(swap)?;

        let mut inner = self.lock()?;
        if inner.swaps.contains_key(&swap.transaction_hash) {
            return Err(StoreError::DuplicateSwap(swap.transaction_hash.clone()));
        }

        let now = Utc::now();
        inner.swaps.insert(
            swap.transaction_hash.clone(),
            Swap {
                transaction_hash: swap.transaction_hash.clone(),
                from: swap.from.clone(),
                to: swap.to.clone(),
                amount: swap.amount,
                nonce: swap.nonce,
                unsigned_tx: swap.unsigned_tx.clone(),
                sequence: swap.sequence,
                account_number: swap.account_number,
                status: swap.status,
                mint_transaction_hash: None,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(())
    }

    async fn insert_signature_if_absent(
        &self,
        operator: &str,
        tx_hash: &str,
        signature: &str,
    ) -> StoreResult<bool> {
        let mut inner = self.lock()?;
        if inner.signatures.iter().any(|s| s.signature == signature) {
            return Ok(false);
        }
        inner.signatures.push(Signature {
            operator: operator.to_string(),
            transaction_hash: tx_hash.to_string(),
            signature: signature.to_string(),
        });
        Ok(true)
    }

    async fn has_signed(&self, operator: &str, tx_hash: &str) -> StoreResult<bool> {
        let inner = self.lock()?;
        Ok(inner
            .signatures
            .iter()
            .any(|s| s.operator == operator && s.transaction_hash == tx_hash))
    }

    async fn fetch_swap(&self, tx_hash: &str) -> StoreResult<Option<Swap>> {
        Ok(self.lock()?.swaps.get(tx_hash).cloned())
    }

    async fn find_all_by_status(&self, status: SwapStatus) -> StoreResult<Vec<Swap>> {
        let inner = self.lock()?;
        let mut swaps: Vec<Swap> = inner
            .swaps
            .values()
            .filter(|s| s.status == status)
            .cloned()
            .collect();
        swaps.sort_by_key(|s| s.sequence);
        Ok(swaps)
    }

    async fn find_above_threshold_unsigned_swaps(
        &self,
        threshold: usize,
    ) -> StoreResult<Vec<SwapWithSignatures>> {
        let threshold = quorum_threshold(threshold);
        // Single lock acquisition gives one consistent snapshot
        let inner = self.lock()?;
        let mut result: Vec<SwapWithSignatures> = inner
            .swaps
            .values()
            .filter(|s| s.status == SwapStatus::Unsigned)
            .filter_map(|swap| {
                let signatures: Vec<Signature> = inner
                    .signatures
                    .iter()
                    .filter(|s| s.transaction_hash == swap.transaction_hash)
                    .cloned()
                    .collect();
                (signatures.len() >= threshold).then(|| SwapWithSignatures {
                    swap: swap.clone(),
                    signatures,
                })
            })
            .collect();
        result.sort_by_key(|s| s.swap.sequence);
        Ok(result)
    }

    async fn update_swap_status(
        &self,
        tx_hash: &str,
        mint_tx_hash: Option<&str>,
        status: SwapStatus,
    ) -> StoreResult<()> {
        let mut inner = self.lock()?;
        let swap = inner
            .swaps
            .get_mut(tx_hash)
            .ok_or_else(|| StoreError::Backend(eyre::eyre!("No swap found for tx_hash={}", tx_hash)))?;
        swap.status = status;
        swap.mint_transaction_hash = mint_tx_hash.map(str::to_string);
        swap.updated_at = Utc::now();
        Ok(())
    }

    async fn count_by_status(&self) -> StoreResult<StatusCounts> {
        let inner = self.lock()?;
        let mut counts = StatusCounts::default();
        for swap in inner.swaps.values() {
            counts.add(swap.status, 1);
        }
        Ok(counts)
    }

    async fn last_processed_block(&self, watcher: &str) -> StoreResult<Option<u64>> {
        Ok(self.lock()?.cursors.get(watcher).copied())
    }

    async fn set_last_processed_block(&self, watcher: &str, block: u64) -> StoreResult<()> {
        self.lock()?.cursors.insert(watcher.to_string(), block);
        Ok(())
    }
}
