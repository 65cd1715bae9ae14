use crate::auction::{AuctionEngine, ClearOutcome, Intent, IntentStatus};
use crate::clock::Clock;
use crate::config::RetryConfig;
use crate::error::{ErrorKind, Result};
use crate::scheduler::model::{ClearingJob, JobState};
use crate::store::Repo;
use crate::types::IntentId;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// What a startup reconciliation did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Pending jobs already past due, cleared during reconcile
    pub cleared_overdue: usize,
    /// Pending jobs with a future deadline, armed again
    pub rearmed: usize,
    /// AUCTION intents that had no job at all
    pub recreated: usize,
}

/// Fires `AuctionEngine::clear` once per intent at its deadline
///
/// Jobs are persisted before the timer is armed, and [`reconcile`] re-arms
/// whatever a previous process left pending.
///
/// [`reconcile`]: ClearingScheduler::reconcile
pub struct ClearingScheduler {
    jobs: Repo<ClearingJob>,
    intents: Repo<Intent>,
    engine: Arc<AuctionEngine>,
    clock: Arc<dyn Clock>,
    retry: RetryConfig,
    cancel: CancellationToken,
    tasks: TaskTracker,
}

impl ClearingScheduler {
    pub fn new(
        jobs: Repo<ClearingJob>,
        intents: Repo<Intent>,
        engine: Arc<AuctionEngine>,
        clock: Arc<dyn Clock>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            jobs,
            intents,
            engine,
            clock,
            retry,
            cancel: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    /// Persist a clearing job and arm its timer
    ///
    /// A failed write is logged and the timer armed anyway; the intent's
    /// AUCTION status is enough for `reconcile` to rebuild the job later.
    pub fn enqueue(self: &Arc<Self>, intent_id: IntentId, due_at: DateTime<Utc>) {
        let job = ClearingJob::new(intent_id.clone(), due_at, self.clock.now());
        if let Err(err) = self.jobs.put(job) {
            warn!(intent_id = %intent_id, error = %err, "could not persist clearing job");
        }
        self.arm(intent_id, due_at);
    }

    /// Rebuild timers after a restart
    pub async fn reconcile(self: &Arc<Self>) -> Result<ReconcileReport> {
        let now = self.clock.now();
        let jobs = self.jobs.list()?;
        let mut report = ReconcileReport::default();
        let known: BTreeSet<IntentId> = jobs.iter().map(|job| job.intent_id.clone()).collect();

        for job in jobs.into_iter().filter(ClearingJob::is_pending) {
            if job.is_due(now) {
                self.run_job(&job.intent_id).await;
                report.cleared_overdue += 1;
            } else {
                self.arm(job.intent_id, job.due_at);
                report.rearmed += 1;
            }
        }

        let orphans: Vec<Intent> = self
            .intents
            .list()?
            .into_iter()
            .filter(|intent| intent.status == IntentStatus::Auction && !known.contains(&intent.id))
            .collect();
        for intent in orphans {
            warn!(intent_id = %intent.id, "intent in auction had no clearing job, recreating");
            if intent.auction_ends_at <= now {
                let job = ClearingJob::new(intent.id.clone(), intent.auction_ends_at, now);
                if let Err(err) = self.jobs.put(job) {
                    warn!(intent_id = %intent.id, error = %err, "could not persist clearing job");
                }
                self.run_job(&intent.id).await;
            } else {
                self.enqueue(intent.id.clone(), intent.auction_ends_at);
            }
            report.recreated += 1;
        }

        info!(
            cleared = report.cleared_overdue,
            rearmed = report.rearmed,
            recreated = report.recreated,
            "clearing jobs reconciled"
        );
        Ok(report)
    }

    pub fn pending_jobs(&self) -> Result<Vec<ClearingJob>> {
        Ok(self.jobs.list()?.into_iter().filter(ClearingJob::is_pending).collect())
    }

    /// Cancel armed timers and wait for in-flight clears to finish
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.tasks.close();
        self.tasks.wait().await;
        debug!("clearing scheduler stopped");
    }

    fn arm(self: &Arc<Self>, intent_id: IntentId, due_at: DateTime<Utc>) {
        let delay = (due_at - self.clock.now()).to_std().unwrap_or(Duration::ZERO);
        let scheduler = Arc::clone(self);
        let cancel = self.cancel.clone();

        self.tasks.spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(intent_id = %intent_id, "clearing timer cancelled");
                }
                _ = sleep(delay) => {
                    scheduler.run_job(&intent_id).await;
                }
            }
        });
    }

    /// Clear with backoff on retryable failures; leaves the job pending if
    /// every attempt fails
    async fn run_job(&self, intent_id: &IntentId) {
        let mut attempt = 0;
        loop {
            match self.engine.clear(intent_id).await {
                Ok(outcome) => {
                    let label = match &outcome {
                        ClearOutcome::Awarded { .. } => "awarded",
                        ClearOutcome::Expired => "expired",
                        ClearOutcome::AlreadyCleared { .. } => "already cleared",
                    };
                    debug!(intent_id = %intent_id, outcome = label, "clearing job ran");
                    self.finish(intent_id, attempt + 1, None);
                    return;
                }
                Err(err) if !err.is_retryable() => {
                    if err.kind() == ErrorKind::NotFound {
                        warn!(intent_id = %intent_id, "clearing job for unknown intent dropped");
                    } else {
                        error!(intent_id = %intent_id, error = %err, "clearing failed permanently");
                    }
                    self.finish(intent_id, attempt + 1, Some(err.to_string()));
                    return;
                }
                Err(err) => {
                    attempt += 1;
                    self.record_failure(intent_id, attempt, &err.to_string());
                    if attempt > self.retry.max_retries {
                        error!(
                            intent_id = %intent_id,
                            attempts = attempt,
                            error = %err,
                            "clearing retries exhausted, job left pending"
                        );
                        return;
                    }

                    let delay = self.retry.delay_for_attempt(attempt);
                    warn!(intent_id = %intent_id, attempt, ?delay, error = %err, "clearing failed, retrying");
                    tokio::select! {
                        _ = self.cancel.cancelled() => return,
                        _ = sleep(delay) => {}
                    }
                }
            }
        }
    }

    fn finish(&self, intent_id: &IntentId, attempts: u32, last_error: Option<String>) {
        self.update(intent_id, |job, now| {
            job.state = JobState::Done;
            job.attempts = job.attempts.max(attempts);
            if last_error.is_some() {
                job.last_error = last_error;
            }
            job.completed_at = Some(now);
        });
    }

    fn record_failure(&self, intent_id: &IntentId, attempts: u32, message: &str) {
        self.update(intent_id, |job, _| {
            job.attempts = attempts;
            job.last_error = Some(message.to_string());
        });
    }

    fn update(&self, intent_id: &IntentId, change: impl FnOnce(&mut ClearingJob, DateTime<Utc>)) {
        let now = self.clock.now();
        let result = self.jobs.get(intent_id).and_then(|job| {
            let mut job = job.unwrap_or_else(|| ClearingJob::new(intent_id.clone(), now, now));
            change(&mut job, now);
            job.updated_at = now;
            self.jobs.put(job)
        });
        if let Err(err) = result {
            warn!(intent_id = %intent_id, error = %err, "could not update clearing job");
        }
    }
}
