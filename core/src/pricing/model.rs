use crate::money::Amount;
use crate::store::Record;
use crate::types::{AccountId, ArmId, ExperimentId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One priced variant and its running statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Arm {
    pub id: ArmId,
    pub price: Amount,
    #[serde(default)]
    pub pulls: u64,
    #[serde(default)]
    pub cumulative_reward: Amount,
}

impl Arm {
    pub fn new(id: ArmId, price: Amount) -> Self {
        Self {
            id,
            price,
            pulls: 0,
            cumulative_reward: Amount::ZERO,
        }
    }

    /// Average revenue per pull in major units; zero before the first pull
    pub fn mean_reward(&self) -> f64 {
        if self.pulls == 0 {
            0.0
        } else {
            self.cumulative_reward.as_major_f64() / self.pulls as f64
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Experiment {
    pub id: ExperimentId,
    pub owner: AccountId,
    pub arms: Vec<Arm>,
    pub epsilon: f64,
    pub created_at: DateTime<Utc>,
}

impl Experiment {
    pub fn total_pulls(&self) -> u64 {
        self.arms.iter().map(|arm| arm.pulls).sum()
    }

    pub fn arm(&self, id: &ArmId) -> Option<&Arm> {
        self.arms.iter().find(|arm| &arm.id == id)
    }
}

impl Record for Experiment {
    type Key = ExperimentId;
    const KIND: &'static str = "experiment";
    const COLLECTION: &'static str = "pricing_experiments";

    fn key(&self) -> &ExperimentId {
        &self.id
    }
}

/// Arm definition supplied when an experiment starts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmSpec {
    pub id: ArmId,
    pub price: Amount,
}

impl ArmSpec {
    pub fn new(id: impl Into<ArmId>, price: Amount) -> Self {
        Self {
            id: id.into(),
            price,
        }
    }
}

/// Why an arm was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Selection {
    ColdStart,
    Explore,
    Exploit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmChoice {
    pub arm_id: ArmId,
    pub price: Amount,
    pub selection: Selection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestArm {
    pub arm_id: ArmId,
    pub price: Amount,
    pub avg_revenue: f64,
    pub pulls: u64,
}
