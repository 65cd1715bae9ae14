use super::{Basis, Ledger, LedgerEntry, LedgerError};
use crate::clock::Clock;
use crate::money::{Amount, Currency};
use crate::types::AccountId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default)]
struct LedgerState {
    balances: HashMap<(AccountId, Currency), Amount>,
    entries: HashMap<AccountId, Vec<LedgerEntry>>,
}

/// Process-local ledger with per-(account, currency) balances
pub struct InMemoryLedger {
    state: Mutex<LedgerState>,
    clock: Arc<dyn Clock>,
}

impl InMemoryLedger {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(LedgerState::default()),
            clock,
        }
    }

    /// Fund an account outside of any marketplace flow
    pub fn deposit(&self, account: &AccountId, amount: Amount, currency: Currency) {
        let mut state = self.state.lock();
        let balance = state
            .balances
            .entry((account.clone(), currency))
            .or_insert(Amount::ZERO);
        *balance = Amount::from_cents(balance.cents().saturating_add(amount.cents()));
    }

    pub fn entries(&self, account: &AccountId) -> Vec<LedgerEntry> {
        self.state
            .lock()
            .entries
            .get(account)
            .cloned()
            .unwrap_or_default()
    }

    /// Sum of every balance in `currency`
    pub fn total(&self, currency: Currency) -> Amount {
        let state = self.state.lock();
        Amount::from_cents(
            state
                .balances
                .iter()
                .filter(|((_, c), _)| *c == currency)
                .map(|(_, amount)| amount.cents())
                .sum(),
        )
    }

    fn check_positive(amount: Amount) -> Result<(), LedgerError> {
        if amount.is_positive() {
            Ok(())
        } else {
            Err(LedgerError::InvalidAmount {
                amount,
                reason: "ledger movements must be positive".to_string(),
            })
        }
    }
}

#[async_trait::async_trait]
impl Ledger for InMemoryLedger {
    async fn credit(
        &self,
        account: &AccountId,
        amount: Amount,
        currency: Currency,
        basis: Basis,
        reference: &str,
    ) -> Result<LedgerEntry, LedgerError> {
        Self::check_positive(amount)?;
        let mut state = self.state.lock();
        let balance = state
            .balances
            .entry((account.clone(), currency))
            .or_insert(Amount::ZERO);
        *balance = balance
            .checked_add(amount)
            .map_err(|e| LedgerError::InvalidAmount {
                amount,
                reason: e.to_string(),
            })?;

        let entry = LedgerEntry {
            ts: self.clock.now(),
            amount,
            currency,
            basis,
            reference: reference.to_string(),
            settled: false,
        };
        state
            .entries
            .entry(account.clone())
            .or_default()
            .push(entry.clone());
        Ok(entry)
    }

    async fn debit(
        &self,
        account: &AccountId,
        amount: Amount,
        currency: Currency,
        basis: Basis,
        reference: &str,
    ) -> Result<LedgerEntry, LedgerError> {
        Self::check_positive(amount)?;
        let mut state = self.state.lock();
        let available = state
            .balances
            .get(&(account.clone(), currency))
            .copied()
            .unwrap_or(Amount::ZERO);
        if available < amount {
            return Err(LedgerError::InsufficientFunds {
                account: account.clone(),
                required: amount,
                available,
            });
        }
        state
            .balances
            .insert((account.clone(), currency), Amount::from_cents(available.cents() - amount.cents()));

        let entry = LedgerEntry {
            ts: self.clock.now(),
            amount: -amount,
            currency,
            basis,
            reference: reference.to_string(),
            settled: false,
        };
        state
            .entries
            .entry(account.clone())
            .or_default()
            .push(entry.clone());
        Ok(entry)
    }

    async fn balance(&self, account: &AccountId, currency: Currency) -> Result<Amount, LedgerError> {
        Ok(self
            .state
            .lock()
            .balances
            .get(&(account.clone(), currency))
            .copied()
            .unwrap_or(Amount::ZERO))
    }

    async fn record(&self, account: &AccountId, entry: LedgerEntry) -> Result<(), LedgerError> {
        self.state
            .lock()
            .entries
            .entry(account.clone())
            .or_default()
            .push(entry);
        Ok(())
    }

    async fn mark_settled(&self, account: &AccountId, basis: Basis, reference: &str) -> Result<bool, LedgerError> {
        let mut state = self.state.lock();
        let Some(entries) = state.entries.get_mut(account) else {
            return Ok(false);
        };
        match entries
            .iter_mut()
            .rev()
            .find(|e| !e.settled && e.basis == basis && e.reference == reference)
        {
            Some(entry) => {
                entry.settled = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
