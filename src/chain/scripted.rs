//! Chain client double driven by per-wallet scripts.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::claims::normalize_wallet;

use super::{ChainClient, ChainError, Confirmation, TxHandle};

#[derive(Debug, Clone)]
pub enum Script {
    Broadcast {
        tx_hash: String,
        outcome: Confirmation,
    },
    Reject(String),
    /// The node never answered `submit`.
    Unanswered(String),
}

pub struct ScriptedChain {
    scripts: Mutex<HashMap<String, Script>>,
    submissions: Mutex<Vec<(String, u128)>>,
    next_hash: AtomicU64,
    submit_delay: Duration,
    reachable: AtomicBool,
}

impl Default for ScriptedChain {
    fn default() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            submissions: Mutex::new(Vec::new()),
            next_hash: AtomicU64::new(1),
            submit_delay: Duration::ZERO,
            reachable: AtomicBool::new(true),
        }
    }
}

impl ScriptedChain {
    /// Unscripted wallets get a fresh hash and confirm.
    pub fn new() -> Self {
        Self::default()
    }

    /// Yields inside `submit` so concurrent ticks interleave.
    pub fn with_submit_delay(mut self, delay: Duration) -> Self {
        self.submit_delay = delay;
        self
    }

    pub fn script(&self, wallet: &str, script: Script) {
        self.scripts
            .lock()
            .unwrap()
            .insert(normalize_wallet(wallet), script);
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn submissions(&self) -> Vec<(String, u128)> {
        self.submissions.lock().unwrap().clone()
    }

    fn outcome_for(&self, handle: &TxHandle) -> Confirmation {
        self.scripts
            .lock()
            .unwrap()
            .values()
            .find_map(|script| match script {
                Script::Broadcast { tx_hash, outcome } if tx_hash == handle.as_str() => {
                    Some(*outcome)
                }
                _ => None,
            })
            .unwrap_or(Confirmation::Confirmed)
    }
}

#[async_trait]
impl ChainClient for ScriptedChain {
    async fn submit(&self, to: &str, amount: u128) -> Result<TxHandle, ChainError> {
        self.submissions
            .lock()
            .unwrap()
            .push((to.to_string(), amount));
        if !self.submit_delay.is_zero() {
            tokio::time::sleep(self.submit_delay).await;
        }

        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(&normalize_wallet(to))
            .cloned();
        match script {
            Some(Script::Reject(reason)) => Err(ChainError::Submission(reason)),
            Some(Script::Unanswered(reason)) => Err(ChainError::SubmissionUnknown(reason)),
            Some(Script::Broadcast { tx_hash, .. }) => Ok(TxHandle::new(tx_hash)),
            None => {
                let n = self.next_hash.fetch_add(1, Ordering::SeqCst);
                Ok(TxHandle::new(format!("0x{n:064x}")))
            }
        }
    }

    async fn await_confirmation(&self, handle: &TxHandle) -> Confirmation {
        self.outcome_for(handle)
    }

    async fn ping(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }
}
