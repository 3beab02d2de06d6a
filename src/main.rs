use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

use soluna_claims::chain::ChainClient;
use soluna_claims::config::ClaimsConfig;
use soluna_claims::disbursement::Disburser;
use soluna_claims::rpc::{ConfirmationPolicy, RpcClient};
use soluna_claims::state::AppState;
use soluna_claims::store::{ClaimStore, PgClaimStore};
use soluna_claims::{connect_database, http, init_tracing, run_migrations};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let config = ClaimsConfig::load().context("Failed to load configuration")?;
    let database = connect_database(&config.database).await?;
    run_migrations(&database).await?;

    let rpc_client = RpcClient::new(
        &config.chain,
        ConfirmationPolicy::from(&config.disbursement),
    )
    .context("Failed to initialize RPC client")?;
    info!(
        rpc_timeout_ms = rpc_client.timeout().as_millis() as u64,
        "Chain RPC client ready"
    );

    let store: Arc<dyn ClaimStore> = Arc::new(PgClaimStore::new(database));
    let chain: Arc<dyn ChainClient> = Arc::new(rpc_client);
    let app_state = AppState::new(Arc::clone(&store), Arc::clone(&chain));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker_handle = if config.disbursement.enabled {
        let disburser = Disburser::new(store, chain, config.disbursement.clone())?
            .with_explorer(config.chain.explorer_tx_url.clone());
        Some(tokio::spawn(async move {
            if let Err(err) = disburser.run(shutdown_rx).await {
                error!("Disbursement loop terminated with error: {err}");
            }
        }))
    } else {
        info!("Disbursement disabled; serving intake only");
        None
    };

    let listener = TcpListener::bind(config.server.address())
        .await
        .context("Failed to bind HTTP listener")?;
    let local_addr = listener
        .local_addr()
        .context("Failed to obtain listener address")?;
    info!("Soluna claims API listening on {local_addr}");

    let router: Router = http::router(app_state);
    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal(shutdown_tx.clone()))
        .await
        .context("HTTP server exited with error")?;

    shutdown_tx.send(true).ok();
    if let Some(handle) = worker_handle {
        if let Err(join_err) = handle.await {
            error!("Disbursement task join error: {join_err}");
        }
    }

    Ok(())
}

async fn shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {err}");
        return;
    }
    shutdown_tx.send(true).ok();
    info!("Shutdown signal dispatched");
}
