//! Periodic breach sweep
//!
//! Enforces every ACTIVE contract past its deadline. Failures are logged and
//! picked up again on the next tick.

use super::{BreachReceipt, SlaManager};
use crate::error::{ErrorKind, Result};
use crate::types::ContractId;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Whatever should happen when a contract is found in breach
#[async_trait::async_trait]
pub trait BreachHandler: Send + Sync {
    async fn handle_breach(&self, id: &ContractId) -> Result<BreachReceipt>;
}

#[async_trait::async_trait]
impl BreachHandler for SlaManager {
    async fn handle_breach(&self, id: &ContractId) -> Result<BreachReceipt> {
        self.enforce_breach(id).await
    }
}

pub struct BreachWatcher {
    sla: Arc<SlaManager>,
    handler: Arc<dyn BreachHandler>,
    every: Duration,
}

impl BreachWatcher {
    pub fn new(sla: Arc<SlaManager>, handler: Arc<dyn BreachHandler>, every: Duration) -> Self {
        Self { sla, handler, every }
    }

    /// Enforce every overdue contract once; returns how many were enforced
    pub async fn sweep(&self) -> usize {
        let overdue = match self.sla.overdue_contracts() {
            Ok(ids) => ids,
            Err(err) => {
                warn!(error = %err, "breach sweep could not list contracts");
                return 0;
            }
        };

        let mut enforced = 0;
        for id in overdue {
            match self.handler.handle_breach(&id).await {
                Ok(receipt) => {
                    enforced += 1;
                    debug!(contract_id = %id, slashed = %receipt.bond_slashed, "sweep enforced breach");
                }
                // Raced with delivery or a manual enforcement.
                Err(err) if err.kind() == ErrorKind::AlreadyProcessed => {
                    debug!(contract_id = %id, "contract closed before sweep reached it");
                }
                Err(err) => {
                    warn!(contract_id = %id, error = %err, "breach enforcement failed, retrying next sweep");
                }
            }
        }

        if enforced > 0 {
            info!(enforced, "breach sweep finished");
        }
        enforced
    }

    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.sweep().await;
                }
            }
        }
        debug!("breach watcher stopped");
    }

    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }
}
