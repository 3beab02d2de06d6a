//! Background disbursement of pending claims.
//!
//! Each tick first re-checks stale in-flight claims, then pays up to
//! `batch_size` new claims oldest first. Per claim:
//!
//! ```text
//! PENDING --submit rejected---------------------------> FAILED (no tx_hash)
//! PENDING --submit unanswered-------------------------> FAILED (no tx_hash, ambiguous)
//! PENDING --submit ok--> PENDING + tx_hash (committed) --confirmed--> COMPLETED
//!                                                     --reverted---> FAILED (tx_hash kept)
//!                                                     --timed out--> FAILED (tx_hash kept, ambiguous)
//! ```
//!
//! A claim is never submitted twice: selection skips rows locked by other
//! workers and rows that already carry a `tx_hash`.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{TimeDelta, Utc};
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::chain::{ChainClient, ChainError, Confirmation, TxHandle};
use crate::claims::{
    AMBIGUOUS_ERROR_PREFIX, REVERTED_ERROR_PREFIX, Resolution, SUBMISSION_AMBIGUOUS_ERROR_PREFIX,
    SUBMISSION_ERROR_PREFIX, format_units,
};
use crate::config::DisbursementConfig;
use crate::store::{ClaimLock, ClaimStore, StoreError};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub completed: usize,
    pub failed: usize,
    pub ambiguous: usize,
    pub reconciled: usize,
}

impl TickReport {
    pub fn resolved(&self) -> usize {
        self.completed + self.failed + self.ambiguous
    }
}

pub struct Disburser {
    store: Arc<dyn ClaimStore>,
    chain: Arc<dyn ChainClient>,
    config: DisbursementConfig,
    amount: u128,
    explorer_tx_url: Option<String>,
}

impl Disburser {
    pub fn new(
        store: Arc<dyn ClaimStore>,
        chain: Arc<dyn ChainClient>,
        config: DisbursementConfig,
    ) -> Result<Self> {
        config.ensure_bounds()?;
        let amount = config
            .transfer_amount()
            .context("Failed to derive transfer amount")?;
        Ok(Self {
            store,
            chain,
            config,
            amount,
            explorer_tx_url: None,
        })
    }

    pub fn with_explorer(mut self, explorer_tx_url: Option<String>) -> Self {
        self.explorer_tx_url = explorer_tx_url.filter(|url| !url.is_empty());
        self
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            amount = %format_units(self.amount, self.config.decimals),
            raw_amount = %self.amount,
            batch_size = self.config.batch_size,
            "Starting disbursement loop"
        );

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    match changed {
                        Ok(_) => {
                            if *shutdown.borrow() {
                                info!("Disbursement shutdown signal received");
                                break;
                            }
                        }
                        Err(_) => {
                            warn!("Shutdown channel closed unexpectedly. Exiting disbursement loop");
                            break;
                        }
                    }
                }
                _ = sleep(self.config.poll_interval()) => {
                    // Store outages end the tick; unprocessed claims stay PENDING.
                    if let Err(err) = self.tick().await {
                        error!("Disbursement tick aborted: {err}");
                    }
                }
            }
        }

        Ok(())
    }

    /// One full pass: reconcile stale in-flight claims, then pay a batch.
    pub async fn tick(&self) -> Result<TickReport, StoreError> {
        let mut report = TickReport::default();
        let limit = self.config.batch_size as usize;

        self.reconcile_stale(&mut report, limit).await?;

        for _ in 0..limit {
            let Some(lock) = self.store.lock_next_pending().await? else {
                break;
            };
            self.disburse(lock, &mut report).await?;
        }

        if report.resolved() > 0 || report.reconciled > 0 {
            info!(
                completed = report.completed,
                failed = report.failed,
                ambiguous = report.ambiguous,
                reconciled = report.reconciled,
                "Disbursement tick finished"
            );
        } else {
            debug!("No pending claims");
        }
        Ok(report)
    }

    async fn disburse(
        &self,
        lock: Box<dyn ClaimLock>,
        report: &mut TickReport,
    ) -> Result<(), StoreError> {
        let claim = lock.claim().clone();
        debug!(
            claim_id = claim.id,
            wallet = %claim.recipient_address,
            "Submitting transfer"
        );

        let handle = match self.chain.submit(&claim.recipient_address, self.amount).await {
            Ok(handle) => handle,
            Err(err) => {
                let message = submission_failure_message(&err);
                if matches!(err, ChainError::Submission(_)) {
                    warn!(claim_id = claim.id, "Transfer submission failed: {err}");
                    report.failed += 1;
                } else {
                    error!(
                        claim_id = claim.id,
                        wallet = %claim.recipient_address,
                        "Transfer may have been broadcast; check the sender history before paying again: {err}"
                    );
                    report.ambiguous += 1;
                }
                lock.resolve(Resolution::Failed { message }).await?;
                return Ok(());
            }
        };

        // Committed before waiting so a crash cannot lose a broadcast hash.
        if let Err(err) = lock.record_broadcast(handle.as_str()).await {
            error!(
                claim_id = claim.id,
                tx_hash = %handle,
                "Broadcast transfer could not be recorded; check this hash before the claim is paid again: {err}"
            );
            return Err(err);
        }
        match &self.explorer_tx_url {
            Some(base) => info!(claim_id = claim.id, tx_hash = %handle, "Transfer broadcast: {base}{handle}"),
            None => info!(claim_id = claim.id, tx_hash = %handle, "Transfer broadcast"),
        }

        let outcome = self.chain.await_confirmation(&handle).await;
        self.settle(claim.id, &handle, outcome, report).await
    }

    /// Resolves claims whose broadcast was recorded but never settled, by
    /// checking the existing transaction. Nothing is re-submitted here.
    async fn reconcile_stale(
        &self,
        report: &mut TickReport,
        limit: usize,
    ) -> Result<(), StoreError> {
        let stale_after = TimeDelta::seconds(self.config.stale_after_secs as i64);
        let cutoff = Utc::now() - stale_after;

        for _ in 0..limit {
            let Some(claim) = self.store.lease_stale_in_flight(cutoff).await? else {
                break;
            };
            let Some(tx_hash) = claim.tx_hash.as_deref() else {
                continue;
            };
            warn!(
                claim_id = claim.id,
                tx_hash = %tx_hash,
                "Reconciling stale in-flight claim"
            );
            let handle = TxHandle::new(tx_hash);
            let outcome = self.chain.await_confirmation(&handle).await;
            report.reconciled += 1;
            self.settle(claim.id, &handle, outcome, report).await?;
        }
        Ok(())
    }

    async fn settle(
        &self,
        id: i64,
        handle: &TxHandle,
        outcome: Confirmation,
        report: &mut TickReport,
    ) -> Result<(), StoreError> {
        match self.store.resolve(id, resolution_for(handle, outcome)).await {
            Ok(claim) => {
                match outcome {
                    Confirmation::Confirmed => report.completed += 1,
                    Confirmation::Reverted => report.failed += 1,
                    Confirmation::TimedOut => report.ambiguous += 1,
                }
                info!(
                    claim_id = id,
                    tx_hash = %handle,
                    status = %claim.status,
                    "Claim resolved"
                );
                Ok(())
            }
            Err(StoreError::NotPending { id }) => {
                warn!(claim_id = id, tx_hash = %handle, "Claim already resolved elsewhere");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}

fn submission_failure_message(err: &ChainError) -> String {
    match err {
        ChainError::Submission(_) => format!("{SUBMISSION_ERROR_PREFIX}: {err}"),
        ChainError::SubmissionUnknown(_) | ChainError::InvalidResponse(_) => {
            format!("{SUBMISSION_AMBIGUOUS_ERROR_PREFIX}: {err}")
        }
    }
}

fn resolution_for(handle: &TxHandle, outcome: Confirmation) -> Resolution {
    match outcome {
        Confirmation::Confirmed => Resolution::Completed {
            tx_hash: handle.to_string(),
        },
        Confirmation::Reverted => Resolution::Failed {
            message: format!("{REVERTED_ERROR_PREFIX}: transaction {handle} reverted on-chain"),
        },
        Confirmation::TimedOut => Resolution::Failed {
            message: format!(
                "{AMBIGUOUS_ERROR_PREFIX}: transaction {handle} was broadcast but not confirmed; \
                 check it on-chain before paying this wallet again"
            ),
        },
    }
}
