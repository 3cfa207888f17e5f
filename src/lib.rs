//! Tokenswap relay
//!
//! Relays `LogBurn` events from an EVM chain to a Cosmos-SDK chain. A single
//! leader records every burn as an unsigned mint transaction; independent
//! operators sign it; once a swap holds `MULTISIG_THRESHOLD` signatures the
//! leader combines them, broadcasts the multisig transaction and tracks it
//! until the mint is confirmed.

pub mod address;
pub mod api;
pub mod chain_client;
pub mod config;
pub mod error;
pub mod leader;
pub mod metrics;
pub mod operator;
pub mod retry;
pub mod shutdown;
pub mod store;
pub mod types;
pub mod watcher;

pub use chain_client::{BroadcastResult, ChainClient};
pub use error::{OperatorError, StoreError};
pub use shutdown::Shutdown;
pub use store::{MemorySwapStore, PgSwapStore, SwapStore};
pub use types::{BurnRecord, NewSwap, Signature, Swap, SwapStatus, SwapWithSignatures, UnsignedTx};
