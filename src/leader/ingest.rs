//! Leader ingestion: burn events in, `unsigned` swaps out
//!
//! The ingestor is the only writer of new swaps and the only owner of the
//! multisig sequence counter. Each stored swap takes the current sequence;
//! the counter moves only after the insert succeeded.

use eyre::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::chain_client::ChainClient;
use crate::error::StoreError;
use crate::metrics;
use crate::retry::{Backoff, RetryConfig};
use crate::shutdown::Shutdown;
use crate::store::SwapStore;
use crate::types::{BurnRecord, NewSwap};
use crate::watcher::{BurnLogSource, BurnWatcher};

pub struct SwapIngestor<S> {
    watcher: BurnWatcher<S>,
    store: Arc<dyn SwapStore>,
    client: Arc<dyn ChainClient>,
    /// Cursor name in the store
    watcher_name: String,
    polling_interval: Duration,
    retry: RetryConfig,
    sequence: u64,
    account_number: u64,
}

impl<S: BurnLogSource> SwapIngestor<S> {
    pub fn new(
        watcher: BurnWatcher<S>,
        store: Arc<dyn SwapStore>,
        client: Arc<dyn ChainClient>,
        watcher_name: impl Into<String>,
        polling_interval: Duration,
        retry: RetryConfig,
    ) -> Self {
        Self {
            watcher,
            store,
            client,
            watcher_name: watcher_name.into(),
            polling_interval,
            retry,
            sequence: 0,
            account_number: 0,
        }
    }

    /// Sequence the next stored swap will carry
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn account_number(&self) -> u64 {
        self.account_number
    }

    /// Read sequence and account number from the chain, retrying with
    /// backoff. Returns false if stopped before both were read.
    pub async fn load_account(&mut self, shutdown: &Shutdown) -> bool {
        let mut backoff = Backoff::new(self.retry.clone());
        loop {
            if shutdown.is_stopped() {
                return false;
            }
            match self.fetch_account().await {
                Ok((sequence, account_number)) => {
                    self.sequence = sequence;
                    self.account_number = account_number;
                    info!(sequence, account_number, "Loaded multisig account");
                    return true;
                }
                Err(e) => {
                    metrics::record_error("account", &e.to_string());
                    let delay = backoff.next_delay();
                    warn!(
                        error = %e,
                        attempt = backoff.consecutive_failures(),
                        next_backoff_secs = delay.as_secs(),
                        "Failed to load multisig account, will retry with backoff"
                    );
                    if shutdown.sleep(delay).await {
                        return false;
                    }
                }
            }
        }
    }

    async fn fetch_account(&self) -> Result<(u64, u64)> {
        let sequence = self.client.sequence_number().await?;
        let account_number = self.client.get_account_number().await?;
        Ok((sequence, account_number))
    }

    /// Create swaps for a batch of burns. Returns how many were stored.
    ///
    /// Generation failures and rejected swaps are logged per burn. A store
    /// backend failure aborts the batch so the caller can retry it; swaps
    /// stored before the failure are skipped on the retry.
    pub async fn ingest(&mut self, burns: &[BurnRecord]) -> Result<usize, StoreError> {
        let mut created = 0;
        for burn in burns {
            if self.store.fetch_swap(&burn.transaction_hash).await?.is_some() {
                info!(tx_hash = %burn.transaction_hash, "Swap already exists, skipping");
                continue;
            }

            let unsigned_tx = match self
                .client
                .generate_token_swap(&burn.transaction_hash, &burn.from, burn.amount, &burn.to)
                .await
            {
                Ok(tx) => tx,
                Err(e) => {
                    metrics::record_error("generate", &e.to_string());
                    error!(
                        tx_hash = %burn.transaction_hash,
                        stage = "generate",
                        error = %e,
                        "Cannot create unsigned tx"
                    );
                    continue;
                }
            };

            let swap = NewSwap::unsigned(burn, unsigned_tx, self.sequence, self.account_number);
            match self.store.insert_if_absent(&swap).await {
                Ok(()) => {
                    info!(
                        tx_hash = %burn.transaction_hash,
                        sequence = self.sequence,
                        to = %burn.to,
                        amount = %burn.amount,
                        "Stored unsigned swap"
                    );
                    metrics::record_swap_created();
                    self.sequence += 1;
                    created += 1;
                }
                Err(StoreError::DuplicateSwap(hash)) => {
                    warn!(tx_hash = %hash, "Swap already exists, skipping");
                }
                Err(e @ StoreError::InvalidSwap { .. }) => {
                    metrics::record_error("insert", &e.to_string());
                    error!(
                        tx_hash = %burn.transaction_hash,
                        stage = "insert",
                        error = %e,
                        "Rejected unsigned swap"
                    );
                }
                // Skipping here would let the cursor move past this burn
                Err(e @ StoreError::Backend(_)) => return Err(e),
            }
        }
        Ok(created)
    }

    /// Poll, ingest and persist the cursor until stopped
    pub async fn run(mut self, shutdown: Shutdown) -> Result<()> {
        if !self.load_account(&shutdown).await {
            info!("Stop requested before the multisig account was loaded");
            return Ok(());
        }

        let mut backoff = Backoff::new(self.retry.clone());
        // Burns from a poll whose ingestion hit a store error
        let mut pending: Vec<BurnRecord> = Vec::new();

        info!(
            next_block = self.watcher.next_block(),
            sequence = self.sequence,
            "Leader ingestion starting"
        );

        while !shutdown.is_stopped() {
            if pending.is_empty() {
                match self.watcher.poll().await {
                    Ok(burns) => pending = burns,
                    Err(e) => {
                        metrics::record_error("poll", &e.to_string());
                        let delay = backoff.next_delay();
                        metrics::set_consecutive_failures("ingest", backoff.consecutive_failures());
                        error!(
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

            match self.ingest(&pending).await {
                Ok(created) => {
                    pending.clear();
                    backoff.reset();
                    metrics::set_consecutive_failures("ingest", 0);
                    if created > 0 {
                        info!(created, sequence = self.sequence, "Ingested burn batch");
                    }
                    self.persist_cursor().await;
                }
                Err(e) => {
                    metrics::record_error("store", &e.to_string());
                    let delay = backoff.next_delay();
                    metrics::set_consecutive_failures("ingest", backoff.consecutive_failures());
                    error!(
                        error = %e,
                        stage = "store",
                        pending = pending.len(),
                        next_backoff_secs = delay.as_secs(),
                        "Store error during ingestion, retrying batch with backoff"
                    );
                    shutdown.sleep(delay).await;
                    continue;
                }
            }

            if self.watcher.is_caught_up() {
                shutdown.sleep(self.polling_interval).await;
            }
        }

        info!(sequence = self.sequence, "Leader ingestion stopped");
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
            warn!(error = %e, block, "Failed to persist leader cursor");
        }
    }
}
