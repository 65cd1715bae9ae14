//! Pricing Experiment Engine
//!
//! A multi-armed bandit over price points. Every read-modify-write on an
//! experiment runs under that experiment's lock so pull counts and rewards
//! are never lost to a concurrent update.

pub mod bandit;
pub mod model;

pub use model::{Arm, ArmChoice, ArmSpec, BestArm, Experiment, Selection};

use crate::clock::Clock;
use crate::config::PricingConfig;
use crate::error::{MarketError, OptionExt, Result};
use crate::locks::KeyedLocks;
use crate::money::Amount;
use crate::store::Repo;
use crate::types::{AccountId, ArmId, ExperimentId};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

pub struct PricingEngine {
    experiments: Repo<Experiment>,
    clock: Arc<dyn Clock>,
    config: PricingConfig,
    rng: Mutex<StdRng>,
    locks: KeyedLocks<ExperimentId>,
}

impl PricingEngine {
    pub fn new(experiments: Repo<Experiment>, clock: Arc<dyn Clock>, config: PricingConfig) -> Self {
        Self::with_rng(experiments, clock, config, StdRng::from_entropy())
    }

    /// Deterministic arm selection for tests and replays
    pub fn with_seed(
        experiments: Repo<Experiment>,
        clock: Arc<dyn Clock>,
        config: PricingConfig,
        seed: u64,
    ) -> Self {
        Self::with_rng(experiments, clock, config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(
        experiments: Repo<Experiment>,
        clock: Arc<dyn Clock>,
        config: PricingConfig,
        rng: StdRng,
    ) -> Self {
        Self {
            experiments,
            clock,
            config,
            rng: Mutex::new(rng),
            locks: KeyedLocks::new(),
        }
    }

    pub fn start_experiment(
        &self,
        owner: &AccountId,
        arms: Vec<ArmSpec>,
        epsilon: Option<f64>,
    ) -> Result<ExperimentId> {
        if owner.as_str().trim().is_empty() {
            return Err(MarketError::validation("owner", "must not be empty"));
        }
        if arms.is_empty() {
            return Err(MarketError::validation("arms", "at least one arm is required"));
        }
        let mut seen = BTreeSet::new();
        for arm in &arms {
            if arm.id.as_str().trim().is_empty() {
                return Err(MarketError::validation("arms", "arm ids must not be empty"));
            }
            if !seen.insert(arm.id.clone()) {
                return Err(MarketError::validation("arms", format!("duplicate arm id '{}'", arm.id)));
            }
            if arm.price.is_negative() {
                return Err(MarketError::validation("arms", format!("arm '{}' has a negative price", arm.id)));
            }
        }
        let epsilon = epsilon.unwrap_or(self.config.default_epsilon);
        if !(0.0..=1.0).contains(&epsilon) {
            return Err(MarketError::validation("epsilon", "must be within [0, 1]"));
        }

        let experiment = Experiment {
            id: ExperimentId::generate(),
            owner: owner.clone(),
            arms: arms.into_iter().map(|spec| Arm::new(spec.id, spec.price)).collect(),
            epsilon,
            created_at: self.clock.now(),
        };
        self.experiments.put(experiment.clone())?;

        info!(
            experiment_id = %experiment.id,
            owner = %owner,
            arms = experiment.arms.len(),
            epsilon,
            "pricing experiment started"
        );
        Ok(experiment.id)
    }

    /// Pick the next arm and count the pull in the same step
    pub async fn next_arm(&self, owner: &AccountId, id: &ExperimentId) -> Result<ArmChoice> {
        let _guard = self.locks.lock(id).await;
        let mut experiment = self.get(owner, id)?;

        let (index, selection) = {
            let mut rng = self.rng.lock();
            bandit::choose(&experiment.arms, experiment.epsilon, &mut *rng)
        };
        let arm = &mut experiment.arms[index];
        arm.pulls += 1;
        let choice = ArmChoice {
            arm_id: arm.id.clone(),
            price: arm.price,
            selection,
        };
        self.experiments.put(experiment)?;

        debug!(experiment_id = %id, arm_id = %choice.arm_id, ?selection, "arm selected");
        Ok(choice)
    }

    /// Add revenue to an arm; history is only ever appended to
    pub async fn record_outcome(
        &self,
        owner: &AccountId,
        id: &ExperimentId,
        arm_id: &ArmId,
        revenue: Amount,
    ) -> Result<Arm> {
        if revenue.is_negative() {
            return Err(MarketError::validation("revenue", "must be non-negative"));
        }

        let _guard = self.locks.lock(id).await;
        let mut experiment = self.get(owner, id)?;
        let arm = experiment
            .arms
            .iter_mut()
            .find(|arm| &arm.id == arm_id)
            .ok_or_not_found("arm", arm_id)?;
        arm.cumulative_reward = arm.cumulative_reward.checked_add(revenue)?;
        let updated = arm.clone();
        self.experiments.put(experiment)?;

        debug!(experiment_id = %id, arm_id = %arm_id, revenue = %revenue, "outcome recorded");
        Ok(updated)
    }

    /// Arm with the highest average revenue per pull
    pub fn best_arm(&self, owner: &AccountId, id: &ExperimentId) -> Result<BestArm> {
        let experiment = self.get(owner, id)?;
        let best = &experiment.arms[bandit::argmax(&experiment.arms, Arm::mean_reward)];
        Ok(BestArm {
            arm_id: best.id.clone(),
            price: best.price,
            avg_revenue: best.mean_reward(),
            pulls: best.pulls,
        })
    }

    /// Experiments are only visible to their owner
    pub fn get(&self, owner: &AccountId, id: &ExperimentId) -> Result<Experiment> {
        self.experiments
            .get(id)?
            .filter(|experiment| &experiment.owner == owner)
            .ok_or_not_found("experiment", id)
    }

    pub fn list_experiments(&self, owner: &AccountId) -> Result<Vec<Experiment>> {
        let mut experiments: Vec<Experiment> = self
            .experiments
            .list()?
            .into_iter()
            .filter(|experiment| &experiment.owner == owner)
            .collect();
        experiments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(experiments)
    }
}
