//! Identifier types
//!
//! Type-safe identifiers for entities across the marketplace. Generated ids
//! carry a short kind prefix (`int_`, `bid_`, `sla_`, `exp_`) so they are
//! recognizable in logs and ledger references.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
    ($(#[$meta:meta])* $name:ident, prefix = $prefix:literal) => {
        string_id!($(#[$meta])* $name);

        impl $name {
            /// Generate a fresh random id
            pub fn generate() -> Self {
                let raw = Uuid::new_v4().simple().to_string();
                Self(format!("{}{}", $prefix, &raw[..12]))
            }
        }
    };
}

string_id!(
    /// Identifier of a published intent
    IntentId,
    prefix = "int_"
);

string_id!(
    /// Identifier of a bid against an intent
    BidId,
    prefix = "bid_"
);

string_id!(
    /// Identifier of an SLA contract
    ContractId,
    prefix = "sla_"
);

string_id!(
    /// Identifier of a pricing experiment
    ExperimentId,
    prefix = "exp_"
);

string_id!(
    /// Variant id of a pricing arm, chosen by the experiment owner
    ArmId
);

string_id!(
    /// Ledger account (requester, agent, experiment owner or pool)
    AccountId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_prefixed_and_unique() {
        let a = IntentId::generate();
        let b = IntentId::generate();
        assert!(a.as_str().starts_with("int_"));
        assert_eq!(a.as_str().len(), 16);
        assert_ne!(a, b);
        assert!(ContractId::generate().to_string().starts_with("sla_"));
    }

    #[test]
    fn test_ids_serialize_as_plain_strings() {
        let id = AccountId::new("agent-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"agent-1\"");
        let back: AccountId = serde_json::from_str("\"agent-1\"").unwrap();
        assert_eq!(back, id);
    }
}
