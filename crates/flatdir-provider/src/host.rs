//! Host-side collaborators.
//!
//! The identity host owns two things the provider needs: a transaction
//! manager that completes enlisted units at the end of an operation, and
//! its own per-user attribute storage. Both are traits here, with simple
//! in-memory implementations for embedding and tests.

use std::sync::Arc;

use hashbrown::HashMap;
use log::debug;
use parking_lot::Mutex;

use flatdir_core::DirResult;

use crate::tx::{Transaction, TxState};

/// Accepts units of work to be completed when the host operation ends.
pub trait TransactionManager: Send + Sync {
    fn enlist_after_completion(&self, tx: Arc<dyn Transaction>);
}

/// The host's own attribute storage for federated users.
pub trait AttributeStore: Send + Sync {
    /// All attributes of `user_id`.
    fn attributes(&self, user_id: &str) -> HashMap<String, Vec<String>>;

    /// Replace the values of one attribute.
    fn set_attribute(&self, user_id: &str, name: &str, values: Vec<String>);

    /// Replace one attribute with a single value.
    fn set_single_attribute(&self, user_id: &str, name: &str, value: String) {
        self.set_attribute(user_id, name, vec![value]);
    }

    /// Drop everything stored for `user_id`.
    fn remove_user(&self, user_id: &str);
}

/// One host operation: collects enlisted units, then commits or rolls
/// them back together.
#[derive(Default)]
pub struct HostOperation {
    enlisted: Mutex<Vec<Arc<dyn Transaction>>>,
}

impl HostOperation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of units waiting for completion.
    pub fn enlisted_count(&self) -> usize {
        self.enlisted.lock().len()
    }

    /// Commit every enlisted unit in enlistment order.
    ///
    /// On the first failure the remaining open units are rolled back and
    /// the error is returned.
    pub fn complete(&self) -> DirResult<()> {
        let units = std::mem::take(&mut *self.enlisted.lock());
        debug!("Completing host operation with {} units", units.len());

        let mut iter = units.into_iter();
        while let Some(unit) = iter.next() {
            if let Err(e) = unit.commit() {
                for rest in iter {
                    if rest.state() == TxState::NotStarted {
                        let _ = rest.rollback();
                    }
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Roll back every enlisted unit that is still open.
    pub fn abort(&self) {
        let units = std::mem::take(&mut *self.enlisted.lock());
        debug!("Aborting host operation with {} units", units.len());
        for unit in units {
            if unit.state() == TxState::NotStarted {
                let _ = unit.rollback();
            }
        }
    }
}

impl TransactionManager for HostOperation {
    fn enlist_after_completion(&self, tx: Arc<dyn Transaction>) {
        self.enlisted.lock().push(tx);
    }
}

/// Attribute storage held in memory.
#[derive(Debug, Default)]
pub struct MemoryAttributes {
    users: Mutex<HashMap<String, HashMap<String, Vec<String>>>>,
}

impl MemoryAttributes {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AttributeStore for MemoryAttributes {
    fn attributes(&self, user_id: &str) -> HashMap<String, Vec<String>> {
        self.users.lock().get(user_id).cloned().unwrap_or_default()
    }

    fn set_attribute(&self, user_id: &str, name: &str, values: Vec<String>) {
        self.users
            .lock()
            .entry(user_id.to_string())
            .or_default()
            .insert(name.to_string(), values);
    }

    fn remove_user(&self, user_id: &str) {
        self.users.lock().remove(user_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flatdir_core::DirError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Records the order units are driven in.
    struct Probe {
        id: usize,
        fail: bool,
        state: Mutex<TxState>,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Probe {
        fn new(id: usize, fail: bool, log: &Arc<Mutex<Vec<String>>>) -> Arc<Self> {
            Arc::new(Self { id, fail, state: Mutex::new(TxState::NotStarted), log: Arc::clone(log) })
        }
    }

    impl Transaction for Probe {
        fn state(&self) -> TxState { *self.state.lock() }

        fn commit(&self) -> DirResult<()> {
            self.log.lock().push(format!("commit {}", self.id));
            if self.fail {
                return Err(DirError::NotFound { key: self.id.to_string() });
            }
            *self.state.lock() = TxState::Committed;
            Ok(())
        }

        fn rollback(&self) -> DirResult<()> {
            self.log.lock().push(format!("rollback {}", self.id));
            *self.state.lock() = TxState::RolledBack;
            Ok(())
        }
    }

    #[test]
    fn test_complete_commits_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let op = HostOperation::new();
        for id in 0..3 {
            op.enlist_after_completion(Probe::new(id, false, &log));
        }
        op.complete().unwrap();
        assert_eq!(*log.lock(), vec!["commit 0", "commit 1", "commit 2"]);
        assert_eq!(op.enlisted_count(), 0);
    }

    #[test]
    fn test_complete_rolls_back_rest_on_failure() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let op = HostOperation::new();
        op.enlist_after_completion(Probe::new(0, false, &log));
        op.enlist_after_completion(Probe::new(1, true, &log));
        op.enlist_after_completion(Probe::new(2, false, &log));

        assert!(op.complete().is_err());
        assert_eq!(*log.lock(), vec!["commit 0", "commit 1", "rollback 2"]);
    }

    #[test]
    fn test_abort() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let op = HostOperation::new();
        op.enlist_after_completion(Probe::new(0, false, &log));
        op.abort();
        assert_eq!(*log.lock(), vec!["rollback 0"]);
        assert_eq!(op.enlisted_count(), 0);
    }

    #[test]
    fn test_memory_attributes() {
        let attrs = MemoryAttributes::new();
        assert!(attrs.attributes("u").is_empty());

        attrs.set_single_attribute("u", "house", "Stark".into());
        attrs.set_attribute("u", "titles", vec!["Lord Commander".into(), "King in the North".into()]);
        let all = attrs.attributes("u");
        assert_eq!(all["house"], vec!["Stark".to_string()]);
        assert_eq!(all["titles"].len(), 2);

        attrs.remove_user("u");
        assert!(attrs.attributes("u").is_empty());
    }

    #[test]
    fn test_enlist_from_many_threads() {
        let op = Arc::new(HostOperation::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        let counter = Arc::new(AtomicUsize::new(0));
        let mut handles = vec![];
        for t in 0..4 {
            let op = Arc::clone(&op);
            let log = Arc::clone(&log);
            let counter = Arc::clone(&counter);
            handles.push(std::thread::spawn(move || {
                for i in 0..10 {
                    op.enlist_after_completion(Probe::new(t * 10 + i, false, &log));
                    counter.fetch_add(1, Ordering::Relaxed);
                }
            }));
        }
        for h in handles { h.join().unwrap(); }
        assert_eq!(op.enlisted_count(), counter.load(Ordering::Relaxed));
        op.complete().unwrap();
        assert_eq!(log.lock().len(), 40);
    }
}
