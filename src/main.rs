use std::net::SocketAddr;
use std::sync::Arc;

use eyre::{eyre, WrapErr};
use tokenswap_relay::api::{self, AppState};
use tokenswap_relay::chain_client::{ChainClient, CliChainClient};
use tokenswap_relay::config::{Config, Role, StoreBackend};
use tokenswap_relay::leader::{BroadcastSweeper, Leader, SwapIngestor};
use tokenswap_relay::metrics;
use tokenswap_relay::operator::Operator;
use tokenswap_relay::retry::RetryConfig;
use tokenswap_relay::shutdown::Shutdown;
use tokenswap_relay::store::{MemorySwapStore, PgSwapStore, SwapStore};
use tokenswap_relay::watcher::{BurnWatcher, EvmBurnLogSource, WatcherConfig};

fn main() -> eyre::Result<()> {
    // Install color-eyre for better error reporting
    color_eyre::install()?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> eyre::Result<()> {
    init_logging();

    tracing::info!("Starting tokenswap relay");

    let config = Config::load()?;
    tracing::info!(
        role = config.role.as_str(),
        chain_id = %config.cosmos.chain_id,
        swap_contract = %config.evm.swap_contract_address,
        threshold = config.relay.multisig_threshold,
        "Configuration loaded"
    );

    let store: Arc<dyn SwapStore> = match config.database.backend {
        StoreBackend::Postgres => {
            let url = config
                .database
                .url
                .as_deref()
                .ok_or_else(|| eyre!("DATABASE_URL is required for the postgres backend"))?;
            let store = PgSwapStore::connect(url).await?;
            tracing::info!("Database connected, migrations complete");
            Arc::new(store)
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store; swaps are lost on restart");
            Arc::new(MemorySwapStore::new())
        }
    };

    let cli_client = CliChainClient::new(&config.cosmos)?;
    cli_client.prepare().await?;
    let client: Arc<dyn ChainClient> = Arc::new(cli_client);

    let shutdown = Shutdown::new();
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        signal_shutdown.trigger();
    });

    let api_addr = SocketAddr::from(([0, 0, 0, 0], config.api_port));
    let api_state = AppState::new(store.clone(), config.role);
    let api_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = api::start_api_server(api_addr, api_state, api_shutdown).await {
            tracing::error!(error = %e, "API server error");
        }
    });

    let source = EvmBurnLogSource::new(&config.evm.rpc_url, &config.evm.swap_contract_address)?;
    let watcher_config = WatcherConfig {
        role: config.role.as_str().to_string(),
        start_block: config.evm.from_block,
        confirmation_delay: config.confirmation_delay(),
        max_block_range: config.evm.max_block_range,
        bech32_prefix: config.cosmos.bech32_prefix.clone(),
    };
    let watcher_name = config.watcher_name();
    let watcher =
        BurnWatcher::resume(source, watcher_config, store.as_ref(), &watcher_name).await?;

    metrics::UP.set(1.0);
    let retry = RetryConfig::default();

    let result = match config.role {
        Role::Leader => {
            let ingestor = SwapIngestor::new(
                watcher,
                store.clone(),
                client.clone(),
                watcher_name,
                config.relay.polling_interval(),
                retry.clone(),
            );
            let sweeper = BroadcastSweeper::new(
                store.clone(),
                client.clone(),
                config.relay.multisig_threshold,
                config.relay.broadcast_interval(),
                retry,
            );
            Leader::new(ingestor, sweeper).run(shutdown.clone()).await
        }
        Role::Operator => {
            let name = config
                .cosmos
                .operator_user
                .clone()
                .ok_or_else(|| eyre!("OPERATOR_USER is required when RELAY_ROLE=operator"))?;
            Operator::new(
                name,
                watcher,
                store.clone(),
                client.clone(),
                config.relay.polling_interval(),
                retry,
            )
            .run(shutdown.clone())
            .await
            .wrap_err("Operator stopped")
        }
    };

    metrics::UP.set(0.0);
    shutdown.trigger();
    result?;

    tracing::info!("Tokenswap relay stopped");
    Ok(())
}

/// Initialize tracing/logging with structured output
fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tokenswap_relay=debug"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(filter)
        .init();
}

/// Wait for shutdown signals (SIGINT/SIGTERM)
async fn wait_for_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
