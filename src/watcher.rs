//! Source-chain burn watcher
//!
//! Pull-based: each `poll()` visits the next range of blocks, returns the
//! valid burns found in it and moves the cursor past the whole range. RPC
//! errors go back to the caller, which decides when to try again.

use alloy::primitives::{Address, U256};
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::rpc::types::Filter;
use alloy::sol;
use alloy::sol_types::SolEvent;
use alloy::transports::http::{Client, Http};
use async_trait::async_trait;
use eyre::{eyre, Result, WrapErr};
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::address::{recipient_from_bytes, validate_cosmos_address};
use crate::metrics;
use crate::store::SwapStore;
use crate::types::BurnRecord;

sol! {
    /// Emitted by the swap contract when tokens are burned for a mint
    event LogBurn(address _from, bytes _to, uint256 _amount, uint256 _nonce);
}

/// A `LogBurn` event as the source chain reports it, before validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBurnLog {
    pub transaction_hash: String,
    pub block_number: u64,
    pub from: Address,
    /// ASCII bytes of the destination address
    pub to: Vec<u8>,
    pub amount: U256,
    pub nonce: U256,
}

/// Where burn events come from
#[async_trait]
pub trait BurnLogSource: Send + Sync {
    /// Current head block number
    async fn latest_block(&self) -> Result<u64>;

    /// Every `LogBurn` in `[from_block, to_block]`, in chain order
    async fn burn_logs(&self, from_block: u64, to_block: u64) -> Result<Vec<RawBurnLog>>;
}

#[async_trait]
impl<T: BurnLogSource + ?Sized> BurnLogSource for std::sync::Arc<T> {
    async fn latest_block(&self) -> Result<u64> {
        (**self).latest_block().await
    }

    async fn burn_logs(&self, from_block: u64, to_block: u64) -> Result<Vec<RawBurnLog>> {
        (**self).burn_logs(from_block, to_block).await
    }
}

/// `BurnLogSource` reading the swap contract over JSON-RPC
pub struct EvmBurnLogSource {
    provider: RootProvider<Http<Client>>,
    swap_address: Address,
}

impl EvmBurnLogSource {
    pub fn new(rpc_url: &str, swap_address: &str) -> Result<Self> {
        let url = rpc_url.parse().wrap_err("Failed to parse RPC URL")?;
        let provider = ProviderBuilder::new().on_http(url);

        let swap_address =
            Address::from_str(swap_address).wrap_err("Invalid swap contract address")?;

        Ok(Self {
            provider,
            swap_address,
        })
    }
}

#[async_trait]
impl BurnLogSource for EvmBurnLogSource {
    async fn latest_block(&self) -> Result<u64> {
        self.provider
            .get_block_number()
            .await
            .wrap_err("Failed to get block number")
    }

    async fn burn_logs(&self, from_block: u64, to_block: u64) -> Result<Vec<RawBurnLog>> {
        let filter = Filter::new()
            .address(self.swap_address)
            .event_signature(LogBurn::SIGNATURE_HASH)
            .from_block(from_block)
            .to_block(to_block);

        let logs = self
            .provider
            .get_logs(&filter)
            .await
            .wrap_err_with(|| format!("Failed to get logs for blocks {}-{}", from_block, to_block))?;

        let mut burns = Vec::with_capacity(logs.len());
        for log in logs {
            let tx_hash = log
                .transaction_hash
                .ok_or_else(|| eyre!("Missing transaction hash"))?;
            let block_number = log
                .block_number
                .ok_or_else(|| eyre!("Missing block number"))?;

            let decoded = log
                .log_decode::<LogBurn>()
                .wrap_err_with(|| format!("Failed to decode LogBurn in {:?}", tx_hash))?;
            let event = decoded.inner.data;

            burns.push(RawBurnLog {
                transaction_hash: format!("{:?}", tx_hash),
                block_number,
                from: event._from,
                to: event._to.to_vec(),
                amount: event._amount,
                nonce: event._nonce,
            });
        }

        Ok(burns)
    }
}

/// Watcher settings for one role
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Metrics and log label
    pub role: String,
    /// First block to visit
    pub start_block: u64,
    /// Blocks behind head to stay; 0 for the leader
    pub confirmation_delay: u64,
    pub max_block_range: u64,
    pub bech32_prefix: String,
}

pub struct BurnWatcher<S> {
    source: S,
    config: WatcherConfig,
    next_block: u64,
    /// Highest block the last poll was allowed to visit
    last_safe_head: Option<u64>,
}

impl<S: BurnLogSource> BurnWatcher<S> {
    pub fn new(source: S, config: WatcherConfig) -> Self {
        let next_block = config.start_block;
        Self {
            source,
            config,
            next_block,
            last_safe_head: None,
        }
    }

    /// Start from the later of the configured block and the block after the
    /// persisted cursor for `watcher_name`
    pub async fn resume(
        source: S,
        mut config: WatcherConfig,
        store: &dyn SwapStore,
        watcher_name: &str,
    ) -> Result<Self> {
        let stored = store
            .last_processed_block(watcher_name)
            .await
            .wrap_err("Failed to load watcher cursor")?;
        if let Some(last) = stored {
            config.start_block = config.start_block.max(last.saturating_add(1));
        }
        info!(
            watcher = %watcher_name,
            stored = ?stored,
            start_block = config.start_block,
            "Resuming burn watcher"
        );
        Ok(Self::new(source, config))
    }

    /// Next block the watcher will visit
    pub fn next_block(&self) -> u64 {
        self.next_block
    }

    /// Last block fully visited, if any
    pub fn last_visited_block(&self) -> Option<u64> {
        self.next_block
            .checked_sub(1)
            .filter(|last| *last >= self.config.start_block)
    }

    /// False while the last poll left blocks behind because of the range cap
    pub fn is_caught_up(&self) -> bool {
        self.last_safe_head
            .map_or(true, |safe_head| self.next_block > safe_head)
    }

    /// Visit the next block range and return its valid burns
    pub async fn poll(&mut self) -> Result<Vec<BurnRecord>> {
        let head = self.source.latest_block().await?;

        let Some(safe_head) = head.checked_sub(self.config.confirmation_delay) else {
            return Ok(Vec::new());
        };
        self.last_safe_head = Some(safe_head);
        if safe_head < self.next_block {
            return Ok(Vec::new());
        }

        let from_block = self.next_block;
        let to_block = safe_head.min(
            from_block
                .saturating_add(self.config.max_block_range)
                .saturating_sub(1),
        );

        let logs = self.source.burn_logs(from_block, to_block).await?;
        self.next_block = to_block + 1;

        let role = self.config.role.as_str();
        metrics::record_block_visited(role, to_block);
        metrics::record_successful_poll(role);

        debug!(
            role,
            delay = self.config.confirmation_delay,
            from_block,
            to_block,
            count = logs.len(),
            "Visited source blocks"
        );

        let mut burns = Vec::with_capacity(logs.len());
        for log in logs {
            match self.normalize(log) {
                Some(burn) => {
                    metrics::record_burn_detected(role);
                    burns.push(burn);
                }
                None => metrics::record_burn_rejected(role),
            }
        }
        Ok(burns)
    }

    /// Turn a raw log into a burn record, or drop it when the recipient is
    /// not a valid destination address or the amount or nonce does not fit
    fn normalize(&self, log: RawBurnLog) -> Option<BurnRecord> {
        let to = match recipient_from_bytes(&log.to)
            .and_then(|to| validate_cosmos_address(&to, &self.config.bech32_prefix).map(|_| to))
        {
            Ok(to) => to,
            Err(e) => {
                warn!(
                    tx_hash = %log.transaction_hash,
                    recipient = %String::from_utf8_lossy(&log.to),
                    error = %e,
                    "Invalid recipient, dropping burn"
                );
                return None;
            }
        };

        // A mint must carry exactly the burned amount
        let Ok(amount) = u128::try_from(log.amount) else {
            warn!(
                tx_hash = %log.transaction_hash,
                amount = %log.amount,
                "Burn amount exceeds u128::MAX, dropping burn"
            );
            return None;
        };
        let Ok(nonce) = u64::try_from(log.nonce) else {
            warn!(
                tx_hash = %log.transaction_hash,
                nonce = %log.nonce,
                "Burn nonce exceeds u64::MAX, dropping burn"
            );
            return None;
        };

        Some(BurnRecord {
            transaction_hash: log.transaction_hash.to_lowercase(),
            from: log.from.to_checksum(None),
            to,
            amount,
            nonce,
            block_number: log.block_number,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::test_source::{raw_burn, ScriptedSource};
    use super::*;
    use crate::address::encode_test_address;
    use crate::store::MemorySwapStore;

    fn config(start_block: u64, delay: u64, range: u64) -> WatcherConfig {
        WatcherConfig {
            role: "test".to_string(),
            start_block,
            confirmation_delay: delay,
            max_block_range: range,
            bech32_prefix: "kamut".to_string(),
        }
    }

    fn valid_recipient() -> String {
        encode_test_address(&[9u8; 20], "kamut")
    }

    #[tokio::test]
    async fn test_poll_returns_valid_burns_and_advances() {
        let source = ScriptedSource::default();
        source.set_head(20);
        source.logs.lock().unwrap().extend([
            raw_burn(1, 5, &valid_recipient()),
            raw_burn(2, 7, &valid_recipient()),
        ]);

        let mut watcher = BurnWatcher::new(source, config(0, 0, 10_000));
        let burns = watcher.poll().await.unwrap();

        assert_eq!(burns.len(), 2);
        assert_eq!(burns[0].nonce, 1);
        assert_eq!(burns[0].amount, 1_000_000);
        assert_eq!(burns[0].from, Address::repeat_byte(0xab).to_checksum(None));
        assert_eq!(watcher.next_block(), 21);

        // Nothing new: no query, no movement
        assert!(watcher.poll().await.unwrap().is_empty());
        assert_eq!(watcher.next_block(), 21);
    }

    #[tokio::test]
    async fn test_invalid_recipients_dropped_cursor_still_moves() {
        let source = ScriptedSource::default();
        source.set_head(10);
        source.logs.lock().unwrap().extend([
            raw_burn(1, 2, "not-an-address"),
            raw_burn(2, 3, &encode_test_address(&[9u8; 20], "cosmos")),
            raw_burn(3, 4, &valid_recipient()),
        ]);

        let mut watcher = BurnWatcher::new(source, config(0, 0, 10_000));
        let burns = watcher.poll().await.unwrap();
        assert_eq!(burns.len(), 1);
        assert_eq!(burns[0].nonce, 3);
        assert_eq!(watcher.next_block(), 11);
    }

    #[tokio::test]
    async fn test_confirmation_delay() {
        let source = ScriptedSource::default();
        source.set_head(15);
        source.logs.lock().unwrap().push(raw_burn(1, 5, &valid_recipient()));

        let mut watcher = BurnWatcher::new(source, config(0, 12, 10_000));
        assert!(watcher.poll().await.unwrap().is_empty());
        assert_eq!(watcher.next_block(), 4);

        watcher.source.set_head(17);
        assert_eq!(watcher.poll().await.unwrap().len(), 1);
        assert_eq!(watcher.next_block(), 6);
    }

    #[tokio::test]
    async fn test_head_below_delay_is_noop() {
        let source = ScriptedSource::default();
        source.set_head(3);
        let mut watcher = BurnWatcher::new(source, config(0, 12, 10_000));
        assert!(watcher.poll().await.unwrap().is_empty());
        assert_eq!(watcher.next_block(), 0);
        assert!(watcher.source.queries.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_range_is_capped() {
        let source = ScriptedSource::default();
        source.set_head(250);
        let mut watcher = BurnWatcher::new(source, config(0, 0, 100));

        watcher.poll().await.unwrap();
        assert!(!watcher.is_caught_up());
        watcher.poll().await.unwrap();
        watcher.poll().await.unwrap();
        assert!(watcher.is_caught_up());
        assert_eq!(
            *watcher.source.queries.lock().unwrap(),
            vec![(0, 99), (100, 199), (200, 250)]
        );
    }

    #[tokio::test]
    async fn test_rpc_error_propagates_without_moving() {
        let source = ScriptedSource::default();
        *source.fail.lock().unwrap() = true;
        let mut watcher = BurnWatcher::new(source, config(5, 0, 100));
        assert!(watcher.poll().await.is_err());
        assert_eq!(watcher.next_block(), 5);
        assert_eq!(watcher.last_visited_block(), None);
    }

    #[tokio::test]
    async fn test_oversized_amount_dropped_cursor_still_moves() {
        let source = ScriptedSource::default();
        source.set_head(10);
        let mut oversized = raw_burn(1, 2, &valid_recipient());
        oversized.amount = U256::MAX;
        let mut widest = raw_burn(2, 3, &valid_recipient());
        widest.amount = U256::from(u128::MAX);
        source.logs.lock().unwrap().extend([oversized, widest]);

        let mut watcher = BurnWatcher::new(source, config(0, 0, 100));
        let burns = watcher.poll().await.unwrap();
        assert_eq!(burns.len(), 1);
        assert_eq!(burns[0].nonce, 2);
        assert_eq!(burns[0].amount, u128::MAX);
        assert_eq!(watcher.next_block(), 11);
    }

    #[test]
    fn test_oversized_nonce_dropped() {
        let mut log = raw_burn(1, 1, &valid_recipient());
        log.nonce = U256::from(u64::MAX) + U256::from(1u8);
        let watcher = BurnWatcher::new(ScriptedSource::default(), config(0, 0, 100));
        assert!(watcher.normalize(log).is_none());
    }

    #[tokio::test]
    async fn test_resume_from_stored_cursor() {
        let store = MemorySwapStore::new();
        let watcher =
            BurnWatcher::resume(ScriptedSource::default(), config(10, 0, 100), &store, "leader")
                .await
                .unwrap();
        assert_eq!(watcher.next_block(), 10);

        store.set_last_processed_block("leader", 41).await.unwrap();
        let watcher =
            BurnWatcher::resume(ScriptedSource::default(), config(10, 0, 100), &store, "leader")
                .await
                .unwrap();
        assert_eq!(watcher.next_block(), 42);

        store.set_last_processed_block("leader", 3).await.unwrap();
        let watcher =
            BurnWatcher::resume(ScriptedSource::default(), config(10, 0, 100), &store, "leader")
                .await
                .unwrap();
        assert_eq!(watcher.next_block(), 10);
    }
}
