//! Operator role: contribute one signature per swap
//!
//! Operators watch the same burns as the leader, but `NB_CONFIRMATIONS`
//! blocks behind the head, and sign swaps the leader has already stored.
//! They have no notion of quorum.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::chain_client::ChainClient;
use crate::error::OperatorError;
use crate::metrics;
use crate::retry::{Backoff, RetryConfig};
use crate::shutdown::Shutdown;
use crate::store::SwapStore;
use crate::types::{BurnRecord, SwapStatus};
use crate::watcher::{BurnLogSource, BurnWatcher};

/// Pause before giving up on a burn the leader never recorded
pub const MISSING_SWAP_PAUSE: Duration = Duration::from_secs(10);

pub struct Operator<S> {
    /// Operator identity, also the key name used to sign
    name: String,
    watcher: BurnWatcher<S>,
    store: Arc<dyn SwapStore>,
    client: Arc<dyn ChainClient>,
    watcher_name: String,
    polling_interval: Duration,
    retry: RetryConfig,
    missing_swap_pause: Duration,
}

impl<S: BurnLogSource> Operator<S> {
    pub fn new(
        name: impl Into<String>,
        watcher: BurnWatcher<S>,
        store: Arc<dyn SwapStore>,
        client: Arc<dyn ChainClient>,
        polling_interval: Duration,
        retry: RetryConfig,
    ) -> Self {
        let name = name.into();
        Self {
            watcher_name: format!("operator:{}", name),
            name,
            watcher,
            store,
            client,
            polling_interval,
            retry,
            missing_swap_pause: MISSING_SWAP_PAUSE,
        }
    }

    pub fn with_missing_swap_pause(mut self, pause: Duration) -> Self {
        self.missing_swap_pause = pause;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sign every `unsigned` swap in the batch this operator has not signed
    /// yet. Returns how many signatures were stored.
    pub async fn handle_batch(&self, burns: &[BurnRecord]) -> Result<usize, OperatorError> {
        let mut signed = 0;
        for burn in burns {
            let tx_hash = burn.transaction_hash.as_str();
            let Some(swap) = self.store.fetch_swap(tx_hash).await? else {
                error!(
                    operator = %self.name,
                    tx_hash,
                    stage = "fetch",
                    "The operator found a LogBurn event unregistered by the leader"
                );
                return Err(OperatorError::MissingSwap(tx_hash.to_string()));
            };

            if swap.status != SwapStatus::Unsigned {
                debug!(tx_hash, status = %swap.status, "Skipping signing");
                continue;
            }
            if self.store.has_signed(&self.name, tx_hash).await? {
                debug!(tx_hash, operator = %self.name, "Already signed, skipping");
                continue;
            }

            let signature = match self
                .client
                .sign_tx(&swap.unsigned_tx, swap.sequence, swap.account_number)
                .await
            {
                Ok(signature) => signature,
                Err(e) => {
                    metrics::record_error("sign", &e.to_string());
                    error!(
                        operator = %self.name,
                        tx_hash,
                        stage = "sign",
                        error = %e,
                        "Cannot sign unsigned tx"
                    );
                    continue;
                }
            };

            match self
                .store
                .insert_signature_if_absent(&self.name, tx_hash, &signature)
                .await
            {
                Ok(true) => {
                    info!(operator = %self.name, tx_hash, "Signed tx hash");
                    metrics::record_signature_submitted(&self.name);
                    signed += 1;
                }
                Ok(false) => {
                    warn!(operator = %self.name, tx_hash, "Identical signature already stored");
                }
                Err(e) => {
                    metrics::record_error("insert_signature", &e.to_string());
                    error!(
                        operator = %self.name,
                        tx_hash,
                        stage = "insert_signature",
                        error = %e,
                        "Failed to store signature"
                    );
                }
            }
        }
        Ok(signed)
    }

    /// Poll and sign until stopped. A burn with no swap stops the operator
    /// with `MissingSwap`, leaving the stored cursor before that batch.
    pub async fn run(mut self, shutdown: Shutdown) -> Result<(), OperatorError> {
        let mut backoff = Backoff::new(self.retry.clone());
        let mut pending: Vec<BurnRecord> = Vec::new();

        info!(
            operator = %self.name,
            next_block = self.watcher.next_block(),
            "Operator starting"
        );

        while !shutdown.is_stopped() {
            if pending.is_empty() {
                match self.watcher.poll().await {
                    Ok(burns) => pending = burns,
                    Err(e) => {
                        metrics::record_error("poll", &e.to_string());
                        let delay = backoff.next_delay();
                        metrics::set_consecutive_failures("operator", backoff.consecutive_failures());
                        error!(
                            operator = %self.name,
                            error = %e,
                            stage = "poll",
                            next_backoff_secs = delay.as_secs(),
                            "Failed to poll burn events, will retry with backoff"
                        );
                        shutdown.sleep(delay).await;
                        continue;
                    }
                }
            }

            match self.handle_batch(&pending).await {
                Ok(signed) => {
                    pending.clear();
                    backoff.reset();
                    metrics::set_consecutive_failures("operator", 0);
                    if signed > 0 {
                        info!(operator = %self.name, signed, "Signed burn batch");
                    }
                    self.persist_cursor().await;
                }
                Err(OperatorError::MissingSwap(tx_hash)) => {
                    error!(
                        operator = %self.name,
                        tx_hash = %tx_hash,
                        "Is the leader running? Stopping operator"
                    );
                    shutdown.sleep(self.missing_swap_pause).await;
                    return Err(OperatorError::MissingSwap(tx_hash));
                }
                Err(OperatorError::Store(e)) => {
                    metrics::record_error("store", &e.to_string());
                    let delay = backoff.next_delay();
                    metrics::set_consecutive_failures("operator", backoff.consecutive_failures());
                    error!(
                        operator = %self.name,
                        error = %e,
                        stage = "store",
                        next_backoff_secs = delay.as_secs(),
                        "Store error while signing, retrying batch with backoff"
                    );
                    shutdown.sleep(delay).await;
                    continue;
                }
            }

            if self.watcher.is_caught_up() {
                shutdown.sleep(self.polling_interval).await;
            }
        }

        info!(operator = %self.name, "Operator stopped");
        Ok(())
    }

    async fn persist_cursor(&self) {
        let Some(block) = self.watcher.last_visited_block() else {
            return;
        };
        if let Err(e) = self
            .store
            .set_last_processed_block(&self.watcher_name, block)
            .await
        {
            warn!(operator = %self.name, error = %e, block, "Failed to persist operator cursor");
        }
    }
}
