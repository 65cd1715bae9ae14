//! Structured error types for the clearing core
//!
//! Every exposed operation returns either its payload or a [`MarketError`]
//! carrying enough context (ids, current status, thresholds) for the caller
//! to decide whether to retry.

use crate::ledger::LedgerError;
use crate::money::{Amount, MoneyError};
use crate::store::StoreError;
use std::fmt;
use thiserror::Error;

/// Primary error type for marketplace operations
#[derive(Error, Debug)]
pub enum MarketError {
    // =========================================================================
    // Caller-facing taxonomy
    // =========================================================================
    /// Unknown intent, bid, contract, bond or experiment
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Operation not valid for the entity's current status
    #[error("cannot {action} {kind} {id} while it is {status}")]
    InvalidState {
        kind: &'static str,
        id: String,
        status: String,
        action: &'static str,
    },

    /// Malformed or out-of-range input
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    /// Balance check failed; nothing was moved
    #[error("insufficient funds in {account}: required {required}, available {available}")]
    InsufficientFunds {
        account: String,
        required: Amount,
        available: Amount,
    },

    /// Duplicate enforcement, delivery or stake
    #[error("{kind} {id} already processed (status {status})")]
    AlreadyProcessed {
        kind: &'static str,
        id: String,
        status: String,
    },

    // =========================================================================
    // Collaborator failures
    // =========================================================================
    #[error("ledger error: {0}")]
    Ledger(LedgerError),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

/// The taxonomy a [`MarketError`] belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidState,
    Validation,
    InsufficientFunds,
    AlreadyProcessed,
    Unavailable,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::InvalidState => "invalid_state",
            ErrorKind::Validation => "validation_error",
            ErrorKind::InsufficientFunds => "insufficient_funds",
            ErrorKind::AlreadyProcessed => "already_processed",
            ErrorKind::Unavailable => "unavailable",
        };
        f.write_str(name)
    }
}

impl MarketError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn invalid_state(
        kind: &'static str,
        id: impl ToString,
        status: impl ToString,
        action: &'static str,
    ) -> Self {
        Self::InvalidState {
            kind,
            id: id.to_string(),
            status: status.to_string(),
            action,
        }
    }

    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn already_processed(kind: &'static str, id: impl ToString, status: impl ToString) -> Self {
        Self::AlreadyProcessed {
            kind,
            id: id.to_string(),
            status: status.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::InvalidState { .. } => ErrorKind::InvalidState,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            Self::AlreadyProcessed { .. } => ErrorKind::AlreadyProcessed,
            Self::Ledger(_) | Self::Store(_) => ErrorKind::Unavailable,
        }
    }

    /// Check if error is retryable (transient)
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Ledger(err) => err.is_retryable(),
            Self::Store(err) => err.is_retryable(),

            // Never retry these; the same call will fail the same way
            Self::NotFound { .. }
            | Self::InvalidState { .. }
            | Self::Validation { .. }
            | Self::InsufficientFunds { .. }
            | Self::AlreadyProcessed { .. } => false,
        }
    }
}

impl From<LedgerError> for MarketError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientFunds {
                account,
                required,
                available,
            } => Self::InsufficientFunds {
                account: account.to_string(),
                required,
                available,
            },
            LedgerError::InvalidAmount { amount, reason } => Self::Validation {
                field: "amount".to_string(),
                reason: format!("{} ({})", reason, amount),
            },
            other => Self::Ledger(other),
        }
    }
}

impl From<MoneyError> for MarketError {
    fn from(err: MoneyError) -> Self {
        Self::Validation {
            field: "amount".to_string(),
            reason: err.to_string(),
        }
    }
}

/// Result type alias using MarketError
pub type Result<T> = std::result::Result<T, MarketError>;

/// Extension trait for converting repository misses to MarketError
pub trait OptionExt<T> {
    fn ok_or_not_found(self, kind: &'static str, id: impl ToString) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_not_found(self, kind: &'static str, id: impl ToString) -> Result<T> {
        self.ok_or_else(|| MarketError::not_found(kind, id))
    }
}
