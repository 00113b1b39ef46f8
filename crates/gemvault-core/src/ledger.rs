//! # Currency Ledger
//!
//! Append-only, per-account ledger for points, gems, keys and gold.
//!
//! ## Guarantees
//!
//! | Property | Mechanism |
//! |----------|-----------|
//! | Non-negative balances | debits check the snapshot before posting |
//! | Auditability | one immutable [`LedgerEntry`] per posting, [`Ledger::audit`] replays them |
//! | Single writer per account | each account book sits behind its own mutex |
//! | Idempotent retries | `(currency, correlation_id)` is unique within an account |
//! | All-or-nothing compound updates | [`Ledger::transact`] rolls back on error |

use crate::clock::Clock;
use crate::error::{Result, VaultError};
use crate::types::{AccountId, Balances, Currency, ReasonCode, Tier};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Immutable record of one balance change
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Position in the account's log, starting at 0
    pub sequence: u64,
    pub account_id: AccountId,
    pub currency: Currency,
    /// Signed change applied to the balance
    pub delta: i64,
    /// Balance immediately after this entry
    pub balance_after: u64,
    pub reason: ReasonCode,
    /// Idempotency key supplied by the caller
    pub correlation_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Result of a credit or debit
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerReceipt {
    pub entry: LedgerEntry,
    /// Balance after the posting
    pub balance: u64,
    /// True when the posting was a retry answered from the log
    pub replayed: bool,
}

/// Read-only view of an account
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub account_id: AccountId,
    pub tier: Tier,
    pub balances: Balances,
    pub opened_at: DateTime<Utc>,
    pub entry_count: u64,
}

struct Checkpoint {
    entries: usize,
    balances: Balances,
    tier: Tier,
}

/// Mutable state of one account, only reachable under its lock
pub struct AccountBook {
    account_id: AccountId,
    tier: Tier,
    opened_at: DateTime<Utc>,
    balances: Balances,
    entries: Vec<LedgerEntry>,
    receipts: HashMap<(Currency, String), usize>,
    now: DateTime<Utc>,
}

impl AccountBook {
    fn new(account_id: AccountId, tier: Tier, opened_at: DateTime<Utc>) -> Self {
        Self {
            account_id,
            tier,
            opened_at,
            balances: Balances::default(),
            entries: Vec::new(),
            receipts: HashMap::new(),
            now: opened_at,
        }
    }

    pub fn account_id(&self) -> &AccountId {
        &self.account_id
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn set_tier(&mut self, tier: Tier) {
        self.tier = tier;
    }

    pub fn balance(&self, currency: Currency) -> u64 {
        self.balances.get(currency)
    }

    pub fn balances(&self) -> Balances {
        self.balances
    }

    /// Time captured when the account lock was taken
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    /// Add `amount` to a balance
    pub fn credit(
        &mut self,
        currency: Currency,
        amount: u64,
        reason: ReasonCode,
        correlation_id: &str,
    ) -> Result<LedgerReceipt> {
        let delta = signed_amount(amount)?;
        self.post(currency, delta, reason, correlation_id)
    }

    /// Remove `amount` from a balance, failing without effect if it would go negative
    pub fn debit(
        &mut self,
        currency: Currency,
        amount: u64,
        reason: ReasonCode,
        correlation_id: &str,
    ) -> Result<LedgerReceipt> {
        let delta = signed_amount(amount)?;
        self.post(currency, -delta, reason, correlation_id)
    }

    /// Look up an earlier posting by its idempotency key
    pub fn receipt(&self, currency: Currency, correlation_id: &str) -> Option<&LedgerEntry> {
        self.receipts
            .get(&(currency, correlation_id.to_string()))
            .map(|&idx| &self.entries[idx])
    }

    fn post(
        &mut self,
        currency: Currency,
        delta: i64,
        reason: ReasonCode,
        correlation_id: &str,
    ) -> Result<LedgerReceipt> {
        if let Some(previous) = self.receipt(currency, correlation_id) {
            if previous.delta != delta {
                return Err(VaultError::IdempotencyConflict {
                    scope: format!("{currency} posting"),
                    correlation_id: correlation_id.to_string(),
                });
            }
            tracing::debug!(
                account = %self.account_id,
                %currency,
                correlation_id,
                "Replayed ledger posting"
            );
            return Ok(LedgerReceipt {
                balance: previous.balance_after,
                entry: previous.clone(),
                replayed: true,
            });
        }

        let current = self.balances.get(currency);
        let magnitude = delta.unsigned_abs();
        let balance_after = if delta >= 0 {
            current
                .checked_add(magnitude)
                .ok_or(VaultError::Overflow(currency))?
        } else {
            current
                .checked_sub(magnitude)
                .ok_or(VaultError::InsufficientBalance {
                    currency,
                    available: current,
                    requested: magnitude,
                })?
        };

        let entry = LedgerEntry {
            sequence: self.entries.len() as u64,
            account_id: self.account_id.clone(),
            currency,
            delta,
            balance_after,
            reason,
            correlation_id: correlation_id.to_string(),
            timestamp: self.now,
        };

        *self.balances.get_mut(currency) = balance_after;
        self.receipts
            .insert((currency, entry.correlation_id.clone()), self.entries.len());
        self.entries.push(entry.clone());

        tracing::debug!(
            account = %self.account_id,
            %currency,
            delta,
            balance = balance_after,
            reason = %entry.reason,
            correlation_id,
            "Ledger posting"
        );

        Ok(LedgerReceipt {
            entry,
            balance: balance_after,
            replayed: false,
        })
    }

    /// Sum of all deltas per currency
    pub fn replay(&self) -> HashMap<Currency, i128> {
        let mut totals: HashMap<Currency, i128> =
            Currency::ALL.iter().map(|c| (*c, 0i128)).collect();
        for entry in &self.entries {
            *totals.entry(entry.currency).or_insert(0) += entry.delta as i128;
        }
        totals
    }

    pub fn snapshot(&self) -> AccountSnapshot {
        AccountSnapshot {
            account_id: self.account_id.clone(),
            tier: self.tier,
            balances: self.balances,
            opened_at: self.opened_at,
            entry_count: self.entries.len() as u64,
        }
    }

    fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            entries: self.entries.len(),
            balances: self.balances,
            tier: self.tier,
        }
    }

    fn rollback(&mut self, checkpoint: Checkpoint) {
        for entry in self.entries.drain(checkpoint.entries..) {
            self.receipts.remove(&(entry.currency, entry.correlation_id));
        }
        self.balances = checkpoint.balances;
        self.tier = checkpoint.tier;
    }
}

fn signed_amount(amount: u64) -> Result<i64> {
    match i64::try_from(amount) {
        Ok(delta) if delta > 0 => Ok(delta),
        _ => Err(VaultError::InvalidAmount(amount)),
    }
}

/// Notified of every committed posting, under the account lock
pub trait PostingObserver: Send + Sync {
    fn on_posting(&self, entry: &LedgerEntry);
}

/// Multi-account ledger
pub struct Ledger {
    accounts: DashMap<AccountId, Arc<Mutex<AccountBook>>>,
    clock: Arc<dyn Clock>,
    observer: Option<Arc<dyn PostingObserver>>,
}

impl Ledger {
    /// Create an empty ledger reading time from `clock`
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            accounts: DashMap::new(),
            clock,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn PostingObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Open an account with zero balances
    pub fn open_account(&self, account_id: AccountId, tier: Tier) -> Result<AccountSnapshot> {
        match self.accounts.entry(account_id.clone()) {
            Entry::Occupied(_) => Err(VaultError::AccountExists(account_id)),
            Entry::Vacant(slot) => {
                let book = AccountBook::new(account_id.clone(), tier, self.clock.now());
                let snapshot = book.snapshot();
                slot.insert(Arc::new(Mutex::new(book)));
                tracing::info!(account = %account_id, %tier, "Opened account");
                Ok(snapshot)
            }
        }
    }

    pub fn contains(&self, account_id: &AccountId) -> bool {
        self.accounts.contains_key(account_id)
    }

    pub fn account_count(&self) -> usize {
        self.accounts.len()
    }

    fn book(&self, account_id: &AccountId) -> Result<Arc<Mutex<AccountBook>>> {
        self.accounts
            .get(account_id)
            .map(|book| Arc::clone(book.value()))
            .ok_or_else(|| VaultError::AccountNotFound(account_id.clone()))
    }

    /// Run `f` with exclusive access to one account
    ///
    /// Postings made by `f` are undone if it returns an error, so a compound
    /// mutation either lands completely or not at all.
    pub fn transact<T, F>(&self, account_id: &AccountId, f: F) -> Result<T>
    where
        F: FnOnce(&mut AccountBook) -> Result<T>,
    {
        let book = self.book(account_id)?;
        let mut guard = book.lock();
        guard.now = self.clock.now();
        let checkpoint = guard.checkpoint();
        let committed_from = checkpoint.entries;
        match f(&mut *guard) {
            Ok(value) => {
                if let Some(observer) = &self.observer {
                    for entry in &guard.entries[committed_from..] {
                        observer.on_posting(entry);
                    }
                }
                Ok(value)
            }
            Err(err) => {
                guard.rollback(checkpoint);
                Err(err)
            }
        }
    }

    /// Read from one account under its lock
    pub fn inspect<T, F>(&self, account_id: &AccountId, f: F) -> Result<T>
    where
        F: FnOnce(&AccountBook) -> T,
    {
        let book = self.book(account_id)?;
        let guard = book.lock();
        Ok(f(&*guard))
    }

    pub fn credit(
        &self,
        account_id: &AccountId,
        currency: Currency,
        amount: u64,
        reason: ReasonCode,
        correlation_id: &str,
    ) -> Result<LedgerReceipt> {
        self.transact(account_id, |book| {
            book.credit(currency, amount, reason, correlation_id)
        })
    }

    pub fn debit(
        &self,
        account_id: &AccountId,
        currency: Currency,
        amount: u64,
        reason: ReasonCode,
        correlation_id: &str,
    ) -> Result<LedgerReceipt> {
        self.transact(account_id, |book| {
            book.debit(currency, amount, reason, correlation_id)
        })
    }

    pub fn balance(&self, account_id: &AccountId, currency: Currency) -> Result<u64> {
        self.inspect(account_id, |book| book.balance(currency))
    }

    pub fn account(&self, account_id: &AccountId) -> Result<AccountSnapshot> {
        self.inspect(account_id, AccountBook::snapshot)
    }

    pub fn entries(&self, account_id: &AccountId) -> Result<Vec<LedgerEntry>> {
        self.inspect(account_id, |book| book.entries.clone())
    }

    /// Change an account's tier, returning the previous one
    pub fn set_tier(&self, account_id: &AccountId, tier: Tier) -> Result<Tier> {
        self.transact(account_id, |book| {
            let previous = book.tier;
            book.set_tier(tier);
            if previous != tier {
                tracing::info!(account = %account_id, from = %previous, to = %tier, "Tier changed");
            }
            Ok(previous)
        })
    }

    /// Replay the account's entries and compare against its balances
    pub fn audit(&self, account_id: &AccountId) -> Result<AccountSnapshot> {
        self.inspect(account_id, |book| {
            let totals = book.replay();
            for currency in Currency::ALL {
                let replayed = totals.get(&currency).copied().unwrap_or(0);
                let snapshot = book.balance(currency);
                if replayed != snapshot as i128 {
                    tracing::error!(
                        account = %account_id,
                        %currency,
                        snapshot,
                        replayed = replayed as i64,
                        "Ledger replay mismatch"
                    );
                    return Err(VaultError::LedgerInconsistent {
                        account: account_id.clone(),
                        currency,
                        snapshot,
                        replayed,
                    });
                }
            }
            Ok(book.snapshot())
        })?
    }
}
