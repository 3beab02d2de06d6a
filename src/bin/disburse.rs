//! Runs a single disbursement tick and exits. Intended for cron-style
//! scheduling when the server runs with `disbursement.enabled = false`.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use soluna_claims::config::ClaimsConfig;
use soluna_claims::disbursement::Disburser;
use soluna_claims::rpc::{ConfirmationPolicy, RpcClient};
use soluna_claims::store::PgClaimStore;
use soluna_claims::{connect_database, init_tracing, run_migrations};

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

    let disburser = Disburser::new(
        Arc::new(PgClaimStore::new(database)),
        Arc::new(rpc_client),
        config.disbursement.clone(),
    )?
    .with_explorer(config.chain.explorer_tx_url.clone());

    let report = disburser
        .tick()
        .await
        .context("Disbursement tick aborted")?;
    info!(
        completed = report.completed,
        failed = report.failed,
        ambiguous = report.ambiguous,
        reconciled = report.reconciled,
        "One-shot disbursement finished"
    );
    Ok(())
}
