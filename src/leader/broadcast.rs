//! Leader broadcast and confirmation sweep
//!
//! Each cycle submits every `unsigned` swap that reached quorum, waits one
//! broadcast interval, then checks every `submitted` swap on chain:
//!
//! - broadcast with a tx hash: `unsigned → submitted`
//! - broadcast without one, or erroring: `unsigned → failed`
//! - mint executed: `submitted → confirmed`
//! - mint unknown: `submitted → unsigned` so the next cycle retries it
//! - status check erroring: `submitted → failed`

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::chain_client::ChainClient;
use crate::error::StoreError;
use crate::metrics;
use crate::retry::{Backoff, RetryConfig};
use crate::shutdown::Shutdown;
use crate::store::SwapStore;
use crate::types::{Swap, SwapStatus, SwapWithSignatures};

/// Counts of what one sweep cycle did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub submitted: usize,
    pub failed: usize,
    pub confirmed: usize,
    pub retried: usize,
}

pub struct BroadcastSweeper {
    store: Arc<dyn SwapStore>,
    client: Arc<dyn ChainClient>,
    threshold: usize,
    broadcast_interval: Duration,
    retry: RetryConfig,
}

impl BroadcastSweeper {
    pub fn new(
        store: Arc<dyn SwapStore>,
        client: Arc<dyn ChainClient>,
        threshold: usize,
        broadcast_interval: Duration,
        retry: RetryConfig,
    ) -> Self {
        Self {
            store,
            client,
            threshold,
            broadcast_interval,
            retry,
        }
    }

    /// Submit every swap at quorum
    pub async fn broadcast_pass(&self, report: &mut SweepReport) -> Result<(), StoreError> {
        let ready = self
            .store
            .find_above_threshold_unsigned_swaps(self.threshold)
            .await?;
        if !ready.is_empty() {
            info!(count = ready.len(), threshold = self.threshold, "Found swaps at quorum");
        }

        for SwapWithSignatures { swap, signatures } in ready {
            let result = self
                .client
                .broadcast_token_swap(&signatures, &swap.unsigned_tx, swap.sequence, swap.account_number)
                .await;

            let (status, mint_hash) = match &result {
                Ok(r) => match r.mint_hash() {
                    Some(hash) => (SwapStatus::Submitted, Some(hash.to_string())),
                    None => {
                        error!(tx_hash = %swap.transaction_hash, stage = "broadcast", "Txhash not found in broadcast result");
                        (SwapStatus::Failed, None)
                    }
                },
                Err(e) => {
                    metrics::record_error("broadcast", &e.to_string());
                    error!(
                        tx_hash = %swap.transaction_hash,
                        stage = "broadcast",
                        error = %e,
                        "Failed to combine signatures or broadcast transaction"
                    );
                    (SwapStatus::Failed, None)
                }
            };

            metrics::record_broadcast(status == SwapStatus::Submitted);
            if self.transition(&swap, mint_hash.as_deref(), status).await {
                match status {
                    SwapStatus::Submitted => report.submitted += 1,
                    _ => report.failed += 1,
                }
            }
        }
        Ok(())
    }

    /// Check every submitted swap on chain, concurrently
    pub async fn confirmation_pass(&self, report: &mut SweepReport) -> Result<(), StoreError> {
        let submitted = self.store.find_all_by_status(SwapStatus::Submitted).await?;
        if submitted.is_empty() {
            return Ok(());
        }
        debug!(count = submitted.len(), "Checking submitted swaps");

        let checks = join_all(submitted.iter().map(|swap| async move {
            (swap, self.client.is_swap_done(&swap.transaction_hash).await)
        }))
        .await;

        for (swap, outcome) in checks {
            match outcome {
                Ok(true) => {
                    info!(
                        tx_hash = %swap.transaction_hash,
                        mint_tx_hash = ?swap.mint_transaction_hash,
                        "Swap confirmed"
                    );
                    if self
                        .transition(swap, swap.mint_transaction_hash.as_deref(), SwapStatus::Confirmed)
                        .await
                    {
                        report.confirmed += 1;
                    }
                }
                Ok(false) => {
                    info!(tx_hash = %swap.transaction_hash, "Swap not executed yet, retrying");
                    if self.transition(swap, None, SwapStatus::Unsigned).await {
                        report.retried += 1;
                    }
                }
                Err(e) => {
                    metrics::record_error("status_check", &e.to_string());
                    error!(
                        tx_hash = %swap.transaction_hash,
                        stage = "status_check",
                        error = %e,
                        "Failed to check swap status"
                    );
                    if self.transition(swap, None, SwapStatus::Failed).await {
                        report.failed += 1;
                    }
                }
            }
        }
        Ok(())
    }

    /// One full cycle: broadcast, wait, confirm. Returns early if stopped
    /// during the wait.
    pub async fn sweep_once(&self, shutdown: &Shutdown) -> Result<SweepReport, StoreError> {
        let mut report = SweepReport::default();
        self.broadcast_pass(&mut report).await?;
        if shutdown.sleep(self.broadcast_interval).await {
            return Ok(report);
        }
        self.confirmation_pass(&mut report).await?;
        Ok(report)
    }

    pub async fn run(self, shutdown: Shutdown) -> eyre::Result<()> {
        let mut backoff = Backoff::new(self.retry.clone());
        info!(
            threshold = self.threshold,
            broadcast_interval_ms = self.broadcast_interval.as_millis() as u64,
            "Broadcast sweep starting"
        );

        while !shutdown.is_stopped() {
            match self.sweep_once(&shutdown).await {
                Ok(report) => {
                    backoff.reset();
                    metrics::set_consecutive_failures("sweep", 0);
                    if report != SweepReport::default() {
                        info!(?report, "Sweep cycle complete");
                    }
                }
                Err(e) => {
                    metrics::record_error("store", &e.to_string());
                    let delay = backoff.next_delay();
                    metrics::set_consecutive_failures("sweep", backoff.consecutive_failures());
                    error!(
                        error = %e,
                        stage = "store",
                        consecutive_failures = backoff.consecutive_failures(),
                        next_backoff_secs = delay.as_secs(),
                        "Store error in broadcast sweep, will retry with backoff"
                    );
                    shutdown.sleep(delay).await;
                }
            }
        }

        info!("Broadcast sweep stopped");
        Ok(())
    }

    /// Write a status change. Illegal edges and store failures are logged
    /// and reported as false.
    async fn transition(&self, swap: &Swap, mint_hash: Option<&str>, to: SwapStatus) -> bool {
        if !swap.status.can_transition_to(to) {
            warn!(
                tx_hash = %swap.transaction_hash,
                from = %swap.status,
                to = %to,
                "Illegal status transition, skipping"
            );
            return false;
        }
        match self
            .store
            .update_swap_status(&swap.transaction_hash, mint_hash, to)
            .await
        {
            Ok(()) => {
                metrics::record_transition(swap.status, to);
                true
            }
            Err(e) => {
                warn!(
                    tx_hash = %swap.transaction_hash,
                    from = %swap.status,
                    to = %to,
                    error = %e,
                    "Failed to update swap status"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain_client::BroadcastResult;
    use crate::store::test_fixtures::new_swap;
    use crate::store::MemorySwapStore;
    use crate::types::{Signature, UnsignedTx};
    use async_trait::async_trait;

    /// Chain client for tests that never reach the chain
    struct OfflineClient;

    #[async_trait]
    impl ChainClient for OfflineClient {
        async fn sequence_number(&self) -> eyre::Result<u64> {
            Err(eyre::eyre!("offline"))
        }

        async fn get_account_number(&self) -> eyre::Result<u64> {
            Err(eyre::eyre!("offline"))
        }

        async fn generate_token_swap(&self, _: &str, _: &str, _: u128, _: &str) -> eyre::Result<UnsignedTx> {
            Err(eyre::eyre!("offline"))
        }

        async fn sign_tx(&self, _: &UnsignedTx, _: u64, _: u64) -> eyre::Result<String> {
            Err(eyre::eyre!("offline"))
        }

        async fn broadcast_token_swap(
            &self,
            _: &[Signature],
            _: &UnsignedTx,
            _: u64,
            _: u64,
        ) -> eyre::Result<BroadcastResult> {
            Err(eyre::eyre!("offline"))
        }

        async fn is_swap_done(&self, _: &str) -> eyre::Result<bool> {
            Err(eyre::eyre!("offline"))
        }
    }

    #[tokio::test]
    async fn test_illegal_transition_is_skipped() {
        let store = Arc::new(MemorySwapStore::new());
        store.insert_if_absent(&new_swap("0x1", 0)).await.unwrap();
        store
            .update_swap_status("0x1", Some("0xabc"), SwapStatus::Confirmed)
            .await
            .unwrap();
        let confirmed = store.fetch_swap("0x1").await.unwrap().unwrap();

        let sweeper = BroadcastSweeper::new(
            store.clone(),
            Arc::new(OfflineClient),
            2,
            Duration::ZERO,
            RetryConfig::default(),
        );
        assert!(!sweeper.transition(&confirmed, None, SwapStatus::Unsigned).await);
        assert!(!sweeper.transition(&confirmed, None, SwapStatus::Failed).await);

        let swap = store.fetch_swap("0x1").await.unwrap().unwrap();
        assert_eq!(swap.status, SwapStatus::Confirmed);
        assert_eq!(swap.mint_transaction_hash.as_deref(), Some("0xabc"));
    }

    #[tokio::test]
    async fn test_legal_transition_is_written() {
        let store = Arc::new(MemorySwapStore::new());
        store.insert_if_absent(&new_swap("0x1", 0)).await.unwrap();
        let unsigned = store.fetch_swap("0x1").await.unwrap().unwrap();

        let sweeper = BroadcastSweeper::new(
            store.clone(),
            Arc::new(OfflineClient),
            2,
            Duration::ZERO,
            RetryConfig::default(),
        );
        assert!(sweeper.transition(&unsigned, Some("0xabc"), SwapStatus::Submitted).await);
        assert_eq!(
            store.fetch_swap("0x1").await.unwrap().unwrap().status,
            SwapStatus::Submitted
        );
    }
}
