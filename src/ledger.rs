//! Balance/transfer primitive the guard sits in front of.
//!
//! The guard never owns balances. Hosts implement [`LedgerFacade`] over
//! whatever holds them; [`InMemoryLedger`] backs the replay harness and tests.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::LedgerError;
use crate::types::{Address, Amount};

/// One leg of an administrative batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Move {
    pub from: Address,
    pub to: Address,
    #[serde(with = "crate::types::amount_string")]
    pub amount: Amount,
}

pub trait LedgerFacade {
    fn balance_of(&self, who: &Address) -> Amount;

    fn transfer(&mut self, from: &Address, to: &Address, amount: Amount) -> Result<(), LedgerError>;

    /// Current liquidity held by the pool.
    fn pool_balance(&self, pool: &Address) -> Amount {
        self.balance_of(pool)
    }

    /// Apply every move or none of them.
    ///
    /// The default applies moves in order and, on failure, replays the
    /// applied ones in reverse. Ledgers that can validate up front should
    /// override it.
    fn apply_batch(&mut self, moves: &[Move]) -> Result<(), LedgerError> {
        for (i, m) in moves.iter().enumerate() {
            if let Err(err) = self.transfer(&m.from, &m.to, m.amount) {
                for done in moves[..i].iter().rev() {
                    self.transfer(&done.to, &done.from, done.amount)?;
                }
                return Err(err);
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InMemoryLedger {
    balances: HashMap<Address, Amount>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_balances(balances: impl IntoIterator<Item = (Address, Amount)>) -> Self {
        let mut ledger = Self::new();
        for (who, amount) in balances {
            ledger.mint(who, amount);
        }
        ledger
    }

    pub fn mint(&mut self, who: Address, amount: Amount) {
        let bal = self.balances.entry(who).or_insert(0);
        *bal = bal.saturating_add(amount);
    }

    pub fn total_supply(&self) -> Amount {
        self.balances.values().fold(0, |acc, b| acc.saturating_add(*b))
    }
}

impl LedgerFacade for InMemoryLedger {
    fn balance_of(&self, who: &Address) -> Amount {
        self.balances.get(who).copied().unwrap_or(0)
    }

    fn transfer(&mut self, from: &Address, to: &Address, amount: Amount) -> Result<(), LedgerError> {
        let available = self.balance_of(from);
        if available < amount {
            return Err(LedgerError::InsufficientBalance {
                who: *from,
                needed: amount,
                available,
            });
        }
        if from == to {
            return Ok(());
        }
        let credited = self
            .balance_of(to)
            .checked_add(amount)
            .ok_or(LedgerError::Overflow { who: *to })?;
        self.balances.insert(*from, available - amount);
        self.balances.insert(*to, credited);
        Ok(())
    }

    fn apply_batch(&mut self, moves: &[Move]) -> Result<(), LedgerError> {
        // Dry run on a scratch copy of the touched accounts.
        let mut scratch: HashMap<Address, Amount> = HashMap::new();
        for m in moves {
            let from_bal = *scratch.entry(m.from).or_insert_with(|| self.balance_of(&m.from));
            if from_bal < m.amount {
                return Err(LedgerError::InsufficientBalance {
                    who: m.from,
                    needed: m.amount,
                    available: from_bal,
                });
            }
            scratch.insert(m.from, from_bal - m.amount);
            let to_bal = *scratch.entry(m.to).or_insert_with(|| self.balance_of(&m.to));
            let credited = to_bal
                .checked_add(m.amount)
                .ok_or(LedgerError::Overflow { who: m.to })?;
            scratch.insert(m.to, credited);
        }
        self.balances.extend(scratch);
        Ok(())
    }
}
