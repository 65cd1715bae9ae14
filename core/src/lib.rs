pub mod auction;
pub mod bond;
pub mod clock;
pub mod config;
pub mod error;
pub mod ledger;
pub mod locks;
pub mod market;
pub mod money;
pub mod notify;
pub mod pricing;
pub mod scheduler;
pub mod sla;
pub mod store;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports for convenience
pub use config::MarketConfig;
pub use error::{ErrorKind, MarketError, Result};
pub use market::Marketplace;
pub use money::{Amount, Currency, Rate};
