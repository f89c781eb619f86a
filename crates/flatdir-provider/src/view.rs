//! User view handed to the host.
//!
//! Reads come from the unit of work's working copy, so a view sees its own
//! staged changes. Writes to record fields stage on the unit and enlist it;
//! the `favouriteLine` attribute is a record field too and never reaches
//! the host's attribute storage. Every other attribute is the host's.

use std::sync::Arc;

use hashbrown::HashMap;
use log::debug;

use flatdir_core::{DirError, DirResult, KeyChangePolicy, UserRecord};

use crate::host::{AttributeStore, TransactionManager};
use crate::storage_id::StorageId;
use crate::tx::UnitOfWork;

/// Attribute name backed by `UserRecord::favourite_line`.
pub const FAVOURITE_LINE: &str = "favouriteLine";

/// One federated user as seen by the host during an operation.
pub struct UserView {
    id: StorageId,
    unit: Arc<UnitOfWork>,
    transactions: Arc<dyn TransactionManager>,
    attributes: Arc<dyn AttributeStore>,
    key_change_policy: KeyChangePolicy,
}

impl UserView {
    pub(crate) fn new(
        component_id: &str,
        unit: Arc<UnitOfWork>,
        transactions: Arc<dyn TransactionManager>,
        attributes: Arc<dyn AttributeStore>,
        key_change_policy: KeyChangePolicy,
    ) -> Self {
        Self {
            id: StorageId::new(component_id, unit.indexed_key()),
            unit,
            transactions,
            attributes,
            key_change_policy,
        }
    }

    /// Host id of this user (`f:<component>:<key>`).
    pub fn id(&self) -> String {
        self.id.to_string()
    }

    pub fn username(&self) -> String {
        self.unit.read(|r| r.key.clone())
    }

    pub fn first_name(&self) -> Option<String> {
        self.unit.read(|r| r.first_name.clone())
    }

    pub fn last_name(&self) -> Option<String> {
        self.unit.read(|r| r.last_name.clone())
    }

    pub fn email(&self) -> Option<String> {
        self.unit.read(|r| r.email.clone())
    }

    pub fn favourite_line(&self) -> Option<String> {
        self.unit.read(|r| r.favourite_line.clone())
    }

    /// Copy of the working record.
    pub fn record(&self) -> UserRecord {
        self.unit.read(|r| r.clone())
    }

    /// The unit of work carrying this view's changes.
    pub fn unit_of_work(&self) -> &Arc<UnitOfWork> {
        &self.unit
    }

    /// Host attributes merged with `favouriteLine` from the record.
    pub fn attributes(&self) -> HashMap<String, Vec<String>> {
        let mut all = self.attributes.attributes(&self.id());
        if let Some(line) = self.favourite_line() {
            all.insert(FAVOURITE_LINE.to_string(), vec![line]);
        }
        all
    }

    pub fn attribute(&self, name: &str) -> Option<Vec<String>> {
        if name == FAVOURITE_LINE {
            return self.favourite_line().map(|line| vec![line]);
        }
        self.attributes.attributes(&self.id()).remove(name)
    }

    pub fn first_attribute(&self, name: &str) -> Option<String> {
        self.attribute(name).and_then(|values| values.into_iter().next())
    }

    /// Change the user's key.
    ///
    /// Fails immediately under `KeyChangePolicy::Reject`; under `Rekey` the
    /// entry moves when the unit commits.
    pub fn set_username(&self, username: &str) -> DirResult<()> {
        debug!("Setting username of {} to {}", self.unit.indexed_key(), username);
        if self.key_change_policy == KeyChangePolicy::Reject && username != self.unit.indexed_key() {
            return Err(DirError::KeyChangeRejected {
                current: self.unit.indexed_key().to_string(),
                requested: username.to_string(),
            });
        }
        let username = username.to_string();
        self.stage(move |r| r.key = username)
    }

    pub fn set_first_name(&self, first_name: &str) -> DirResult<()> {
        debug!("Setting firstName of {}", self.unit.indexed_key());
        let value = first_name.to_string();
        self.stage(move |r| r.first_name = Some(value))
    }

    pub fn set_last_name(&self, last_name: &str) -> DirResult<()> {
        debug!("Setting lastName of {}", self.unit.indexed_key());
        let value = last_name.to_string();
        self.stage(move |r| r.last_name = Some(value))
    }

    pub fn set_email(&self, email: &str) -> DirResult<()> {
        debug!("Setting email of {}", self.unit.indexed_key());
        let value = email.to_string();
        self.stage(move |r| r.email = Some(value))
    }

    pub fn set_single_attribute(&self, name: &str, value: &str) -> DirResult<()> {
        self.set_attribute(name, vec![value.to_string()])
    }

    /// Set an attribute. `favouriteLine` stages its first value on the
    /// record (no values clears it); anything else goes to the host.
    pub fn set_attribute(&self, name: &str, values: Vec<String>) -> DirResult<()> {
        debug!("Setting attribute {} of {}", name, self.unit.indexed_key());
        if name == FAVOURITE_LINE {
            let line = values.into_iter().next();
            return self.stage(move |r| r.favourite_line = line);
        }
        self.attributes.set_attribute(&self.id(), name, values);
        Ok(())
    }

    fn stage(&self, f: impl FnOnce(&mut UserRecord)) -> DirResult<()> {
        self.unit.stage(f)?;
        self.unit.enlist(self.transactions.as_ref());
        Ok(())
    }
}

impl std::fmt::Debug for UserView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserView")
            .field("id", &self.id.to_string())
            .field("unit", &self.unit)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{HostOperation, MemoryAttributes};
    use crate::tx::{FlushFailurePolicy, Transaction};
    use flatdir_core::{Config, RecordStore};
    use tempfile::TempDir;

    struct Fixture {
        store: Arc<RecordStore>,
        op: Arc<HostOperation>,
        attrs: Arc<MemoryAttributes>,
        _dir: TempDir,
    }

    impl Fixture {
        fn new(config: Config) -> Self {
            let dir = TempDir::new().unwrap();
            let store = RecordStore::open(dir.path().join("userDB.json"), config).unwrap();
            store.insert(UserRecord::new("Jon", "Snow", "jon@winterfell.com", "winter")).unwrap();
            store.flush().unwrap();
            Self {
                store: Arc::new(store),
                op: Arc::new(HostOperation::new()),
                attrs: Arc::new(MemoryAttributes::new()),
                _dir: dir,
            }
        }

        fn view(&self) -> UserView {
            let record = self.store.get("jon@winterfell.com").unwrap();
            let unit = Arc::new(UnitOfWork::new(Arc::clone(&self.store), record, FlushFailurePolicy::FailFast));
            UserView::new(
                "comp",
                unit,
                Arc::clone(&self.op) as Arc<dyn TransactionManager>,
                Arc::clone(&self.attrs) as Arc<dyn AttributeStore>,
                self.store.config().key_change_policy,
            )
        }
    }

    #[test]
    fn test_reads() {
        let fx = Fixture::new(Config::strict());
        let view = fx.view();
        assert_eq!(view.id(), "f:comp:jon@winterfell.com");
        assert_eq!(view.username(), "jon@winterfell.com");
        assert_eq!(view.first_name().as_deref(), Some("Jon"));
        assert_eq!(view.last_name().as_deref(), Some("Snow"));
        assert_eq!(view.email().as_deref(), Some("jon@winterfell.com"));
        assert_eq!(view.first_attribute(FAVOURITE_LINE).as_deref(), Some("winter"));
    }

    #[test]
    fn test_writes_are_staged_until_commit() {
        let fx = Fixture::new(Config::strict());
        let view = fx.view();
        view.set_first_name("Aegon").unwrap();
        view.set_last_name("Targaryen").unwrap();

        assert_eq!(view.first_name().as_deref(), Some("Aegon"));
        assert_eq!(fx.store.get("jon@winterfell.com").unwrap().first_name.as_deref(), Some("Jon"));
        assert_eq!(fx.op.enlisted_count(), 1);

        fx.op.complete().unwrap();
        let stored = fx.store.get("jon@winterfell.com").unwrap();
        assert_eq!(stored.first_name.as_deref(), Some("Aegon"));
        assert_eq!(stored.last_name.as_deref(), Some("Targaryen"));
        assert!(!fx.store.is_dirty());
    }

    #[test]
    fn test_favourite_line_stays_out_of_host_storage() {
        let fx = Fixture::new(Config::strict());
        let view = fx.view();
        view.set_attribute(FAVOURITE_LINE, vec!["You know nothing".into()]).unwrap();
        view.set_single_attribute("house", "Stark").unwrap();

        let host_side = fx.attrs.attributes(&view.id());
        assert!(!host_side.contains_key(FAVOURITE_LINE));
        assert_eq!(host_side["house"], vec!["Stark".to_string()]);

        let merged = view.attributes();
        assert_eq!(merged[FAVOURITE_LINE], vec!["You know nothing".to_string()]);
        assert_eq!(merged["house"], vec!["Stark".to_string()]);

        fx.op.complete().unwrap();
        assert_eq!(
            fx.store.get("jon@winterfell.com").unwrap().favourite_line.as_deref(),
            Some("You know nothing")
        );
    }

    #[test]
    fn test_host_attribute_alone_does_not_enlist() {
        let fx = Fixture::new(Config::strict());
        let view = fx.view();
        view.set_single_attribute("house", "Stark").unwrap();
        assert_eq!(fx.op.enlisted_count(), 0);
        assert!(!view.unit_of_work().has_pending());
    }

    #[test]
    fn test_rollback_leaves_store_untouched() {
        let fx = Fixture::new(Config::strict());
        let view = fx.view();
        view.set_email("lord.commander@nightswatch.org").unwrap();
        fx.op.abort();

        assert_eq!(view.unit_of_work().state(), crate::tx::TxState::RolledBack);
        assert_eq!(fx.store.get("jon@winterfell.com").unwrap().email.as_deref(), Some("jon@winterfell.com"));
        assert!(view.set_email("again@nightswatch.org").is_err());
    }

    #[test]
    fn test_username_change_rejected() {
        let fx = Fixture::new(Config::strict());
        let view = fx.view();
        let err = view.set_username("aegon").unwrap_err();
        assert!(matches!(err, DirError::KeyChangeRejected { .. }));
        // Setting the same key is not a change
        view.set_username("jon@winterfell.com").unwrap();
    }

    #[test]
    fn test_username_change_rekeys_on_commit() {
        let fx = Fixture::new(Config::compatible());
        let view = fx.view();
        view.set_username("aegon").unwrap();
        assert!(fx.store.contains_key("jon@winterfell.com"));

        view.unit_of_work().commit().unwrap();
        assert!(!fx.store.contains_key("jon@winterfell.com"));
        assert_eq!(fx.store.get("aegon").unwrap().first_name.as_deref(), Some("Jon"));
    }
}
