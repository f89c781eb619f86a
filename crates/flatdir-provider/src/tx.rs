//! Unit-of-work: deferred commit of one user's changes.
//!
//! A view never writes to the record store directly. It stages changes on
//! a working copy held by its `UnitOfWork`; the first staged change enlists
//! the unit with the host operation, and the host commits or rolls back
//! every enlisted unit when the operation ends.
//!
//! Commit applies the fields the unit changed to the store's current record
//! and, if the store is dirty, flushes it. Fields the unit never touched keep
//! whatever other operations committed meanwhile. Rollback drops the staged copy. Changes made directly on the
//! store (registration, removal) are outside any unit and are never undone.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{error, info, warn};
use parking_lot::Mutex;

use flatdir_core::{DirError, DirResult, KeyChangePolicy, RecordStore, UserRecord};

use crate::host::TransactionManager;

/// Lifecycle of a unit of work. There is no separate "started" state:
/// a unit is either still open or finished one way or the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    NotStarted,
    Committed,
    RolledBack,
}

impl TxState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxState::NotStarted => "NOT_STARTED",
            TxState::Committed => "COMMITTED",
            TxState::RolledBack => "ROLLED_BACK",
        }
    }
}

/// What commit does when the store flush fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushFailurePolicy {
    /// Return the flush error from `commit()`
    FailFast,
    /// Retry retryable errors up to `attempts` more times, sleeping `backoff` between tries
    Retry { attempts: u32, backoff: Duration },
    /// Log the error and report the commit as successful
    LogAndContinue,
}

impl Default for FlushFailurePolicy {
    fn default() -> Self { FlushFailurePolicy::FailFast }
}

/// Something the host can complete at the end of an operation.
pub trait Transaction: Send + Sync {
    fn state(&self) -> TxState;
    fn commit(&self) -> DirResult<()>;
    fn rollback(&self) -> DirResult<()>;
}

/// Pending changes to one user record.
pub struct UnitOfWork {
    store: Arc<RecordStore>,
    /// Key the record is indexed under in the store
    indexed_key: String,
    /// Working copy the view reads and writes
    staged: Mutex<UserRecord>,
    /// The record as last applied; staged fields that differ from it are
    /// the unit's changes
    base: Mutex<UserRecord>,
    /// Set once a write has been staged
    changed: AtomicBool,
    state: Mutex<TxState>,
    /// Latched on first enlistment
    enlisted: AtomicBool,
    policy: FlushFailurePolicy,
}

impl UnitOfWork {
    /// Open a unit over `record`, which must be the store's current copy.
    pub fn new(store: Arc<RecordStore>, record: UserRecord, policy: FlushFailurePolicy) -> Self {
        Self {
            store,
            indexed_key: record.key.clone(),
            base: Mutex::new(record.clone()),
            staged: Mutex::new(record),
            changed: AtomicBool::new(false),
            state: Mutex::new(TxState::NotStarted),
            enlisted: AtomicBool::new(false),
            policy,
        }
    }

    /// Key the record is indexed under (unaffected by staged key changes).
    pub fn indexed_key(&self) -> &str {
        &self.indexed_key
    }

    /// Read the working copy.
    pub fn read<R>(&self, f: impl FnOnce(&UserRecord) -> R) -> R {
        let staged = self.staged.lock();
        f(&staged)
    }

    /// Stage a change on the working copy.
    pub fn stage<R>(&self, f: impl FnOnce(&mut UserRecord) -> R) -> DirResult<R> {
        let state = self.state.lock();
        if *state != TxState::NotStarted {
            return Err(DirError::InvalidTransactionState {
                state: state.as_str(),
                operation: "stage a change on",
            });
        }
        let mut staged = self.staged.lock();
        let result = f(&mut staged);
        self.changed.store(true, Ordering::Release);
        Ok(result)
    }

    /// Whether a change has been staged and not yet committed or discarded.
    pub fn has_pending(&self) -> bool {
        self.changed.load(Ordering::Acquire)
    }

    /// Whether the unit has been handed to a transaction manager.
    pub fn is_enlisted(&self) -> bool {
        self.enlisted.load(Ordering::Acquire)
    }

    /// Enlist with `manager` unless already enlisted or finished.
    /// Returns true if this call enlisted the unit.
    pub fn enlist(self: &Arc<Self>, manager: &dyn TransactionManager) -> bool {
        if self.state() != TxState::NotStarted {
            return false;
        }
        if self.enlisted.swap(true, Ordering::AcqRel) {
            return false;
        }
        manager.enlist_after_completion(Arc::clone(self) as Arc<dyn Transaction>);
        true
    }

    /// Push the staged changes into the store.
    ///
    /// Only fields that differ from the base are written, merged into the
    /// store's current record under its write lock. On success the base
    /// moves to the staged copy, so applying again (a commit retried after
    /// a failed flush) finds nothing left to do.
    fn apply(&self) -> DirResult<()> {
        if !self.has_pending() {
            return Ok(());
        }
        let staged = self.staged.lock().clone();
        let mut base = self.base.lock();

        if staged.key != base.key {
            match self.store.config().key_change_policy {
                KeyChangePolicy::Reject => {
                    return Err(DirError::KeyChangeRejected {
                        current: base.key.clone(),
                        requested: staged.key,
                    });
                }
                KeyChangePolicy::Rekey => match self.store.rekey(&base.key, &staged.key) {
                    Ok(()) => base.key = staged.key.clone(),
                    Err(DirError::NotFound { .. }) => {
                        warn!("User {} left the store before commit, rename to {} dropped", base.key, staged.key);
                        *base = staged;
                        return Ok(());
                    }
                    Err(e) => return Err(e),
                },
            }
        }

        let found = self.store.modify(&base.key, |current| merge_changes(&base, &staged, current));
        if !found {
            warn!("User {} left the store before commit, staged changes dropped", base.key);
        }
        *base = staged;
        Ok(())
    }

    /// Flush the store according to the failure policy.
    fn persist(&self) -> DirResult<()> {
        match self.policy {
            FlushFailurePolicy::FailFast => self.store.persist().map(|_| ()),
            FlushFailurePolicy::Retry { attempts, backoff } => {
                let mut tries = 0;
                loop {
                    match self.store.persist() {
                        Ok(_) => return Ok(()),
                        Err(e) if e.is_retryable() && tries < attempts => {
                            tries += 1;
                            warn!("Flush attempt {} failed, retrying: {}", tries, e);
                            thread::sleep(backoff);
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
            FlushFailurePolicy::LogAndContinue => {
                if let Err(e) = self.store.persist() {
                    error!("Flush failed during commit, changes remain in memory only: {}", e);
                }
                Ok(())
            }
        }
    }
}

/// Copy into `current` every field that differs between `base` and `staged`.
fn merge_changes(base: &UserRecord, staged: &UserRecord, current: &mut UserRecord) {
    fn take(base: &Option<String>, staged: &Option<String>, current: &mut Option<String>) {
        if base != staged {
            current.clone_from(staged);
        }
    }
    take(&base.first_name, &staged.first_name, &mut current.first_name);
    take(&base.last_name, &staged.last_name, &mut current.last_name);
    take(&base.email, &staged.email, &mut current.email);
    take(&base.password, &staged.password, &mut current.password);
    take(&base.favourite_line, &staged.favourite_line, &mut current.favourite_line);
}

impl Transaction for UnitOfWork {
    fn state(&self) -> TxState {
        *self.state.lock()
    }

    /// Apply and flush.
    ///
    /// A rejected change (key policy, duplicate key) rolls the unit back.
    /// A flush error leaves the unit open with its change applied in memory,
    /// so calling `commit()` again retries the flush without re-applying.
    /// A record removed before commit drops the change, rename included,
    /// and the commit still succeeds.
    fn commit(&self) -> DirResult<()> {
        let mut state = self.state.lock();
        if *state != TxState::NotStarted {
            return Err(DirError::InvalidTransactionState {
                state: state.as_str(),
                operation: "commit",
            });
        }

        info!("Committing changes to user {}", self.indexed_key);
        if let Err(e) = self.apply() {
            *state = TxState::RolledBack;
            self.changed.store(false, Ordering::Release);
            return Err(e);
        }

        if self.store.is_dirty() {
            self.persist()?;
        }

        *state = TxState::Committed;
        self.changed.store(false, Ordering::Release);
        Ok(())
    }

    fn rollback(&self) -> DirResult<()> {
        let mut state = self.state.lock();
        if *state != TxState::NotStarted {
            return Err(DirError::InvalidTransactionState {
                state: state.as_str(),
                operation: "roll back",
            });
        }
        info!("Rolling back staged changes to user {}", self.indexed_key);
        *state = TxState::RolledBack;
        self.changed.store(false, Ordering::Release);
        Ok(())
    }
}

impl std::fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("indexed_key", &self.indexed_key)
            .field("state", &self.state())
            .field("pending", &self.has_pending())
            .field("enlisted", &self.is_enlisted())
            .finish()
    }
}
