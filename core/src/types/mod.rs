//! Shared marketplace types

pub mod events;
pub mod ids;

pub use events::IntentEvent;
pub use ids::{AccountId, ArmId, BidId, ContractId, ExperimentId, IntentId};
