//! Leader role
//!
//! Runs ingestion and the broadcast sweep as two tasks over the same store
//! and chain client.

use eyre::Result;
use tracing::{error, info};

use crate::shutdown::Shutdown;
use crate::watcher::BurnLogSource;

pub mod broadcast;
pub mod ingest;

pub use broadcast::{BroadcastSweeper, SweepReport};
pub use ingest::SwapIngestor;

pub struct Leader<S> {
    ingestor: SwapIngestor<S>,
    sweeper: BroadcastSweeper,
}

impl<S: BurnLogSource + 'static> Leader<S> {
    pub fn new(ingestor: SwapIngestor<S>, sweeper: BroadcastSweeper) -> Self {
        Self { ingestor, sweeper }
    }

    /// Run both tasks until `shutdown` is triggered. If either task ends
    /// early the other is asked to stop too.
    pub async fn run(self, shutdown: Shutdown) -> Result<()> {
        info!("Leader starting");

        let ingest = tokio::spawn(self.ingestor.run(shutdown.clone()));
        let sweep = tokio::spawn(self.sweeper.run(shutdown.clone()));

        let (ingest_result, sweep_result) = tokio::join!(
            Self::supervise("ingest", ingest, &shutdown),
            Self::supervise("sweep", sweep, &shutdown),
        );

        info!("Leader stopped");
        ingest_result.and(sweep_result)
    }

    async fn supervise(
        name: &'static str,
        handle: tokio::task::JoinHandle<Result<()>>,
        shutdown: &Shutdown,
    ) -> Result<()> {
        let result = match handle.await {
            Ok(result) => result,
            Err(e) => Err(eyre::eyre!("{} task panicked: {}", name, e)),
        };
        if let Err(e) = &result {
            error!(task = name, error = %e, "Leader task failed");
        }
        shutdown.trigger();
        result
    }
}
