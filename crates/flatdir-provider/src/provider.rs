//! Per-operation user provider.
//!
//! A `FileUserProvider` lives for one host operation. It hands out
//! `UserView`s through its session cache, so every lookup of the same user
//! in that operation returns the same view and the same unit of work.
//! Registration and removal act on the store directly and are not undone
//! by a rollback.

use std::sync::Arc;

use hashbrown::HashMap;
use log::{debug, info};

use flatdir_core::{DirResult, RecordStore, UserRecord};

use crate::cache::SessionCache;
use crate::credential::{self, PASSWORD};
use crate::host::{AttributeStore, TransactionManager};
use crate::storage_id::StorageId;
use crate::tx::{FlushFailurePolicy, UnitOfWork};
use crate::view::UserView;

/// Search parameter naming the keyword for username search.
pub const USERNAME_PARAM: &str = "username";

/// Provider settings that are not store settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    /// Component id used in host ids (`f:<component_id>:<key>`)
    pub component_id: String,
    /// What commit does when flushing the store fails
    pub flush_failure: FlushFailurePolicy,
}

impl ProviderConfig {
    pub fn new(component_id: impl Into<String>) -> Self {
        Self {
            component_id: component_id.into(),
            flush_failure: FlushFailurePolicy::default(),
        }
    }

    pub fn with_flush_failure(mut self, policy: FlushFailurePolicy) -> Self {
        self.flush_failure = policy;
        self
    }
}

/// Users from one flat file, as seen by one host operation.
pub struct FileUserProvider {
    store: Arc<RecordStore>,
    config: ProviderConfig,
    transactions: Arc<dyn TransactionManager>,
    attributes: Arc<dyn AttributeStore>,
    cache: SessionCache<UserView>,
}

impl FileUserProvider {
    pub fn new(
        store: Arc<RecordStore>,
        config: ProviderConfig,
        transactions: Arc<dyn TransactionManager>,
        attributes: Arc<dyn AttributeStore>,
    ) -> Self {
        Self {
            store,
            config,
            transactions,
            attributes,
            cache: SessionCache::new(),
        }
    }

    // -- Lookup --

    /// Look up a user by host id. Bare keys are accepted as-is.
    pub fn get_user_by_id(&self, id: &str) -> Option<Arc<UserView>> {
        let storage_id = StorageId::parse(id);
        debug!("Looking up user via id: id={} key={}", id, storage_id.external_id());
        self.lookup(storage_id.external_id())
    }

    pub fn get_user_by_username(&self, username: &str) -> Option<Arc<UserView>> {
        debug!("Looking up user via username: {}", username);
        self.lookup(username)
    }

    /// Look up a user by email, mapped to a key by the store's email lookup.
    pub fn get_user_by_email(&self, email: &str) -> Option<Arc<UserView>> {
        let key = self.store.config().email_lookup.key_for(email);
        debug!("Looking up user via email: email={} key={}", email, key);
        self.lookup(&key)
    }

    // -- Query --

    pub fn users_count(&self) -> usize {
        self.store.count()
    }

    /// One page of users ordered by key.
    pub fn users(&self, offset: usize, limit: usize) -> Vec<Arc<UserView>> {
        debug!("Listing users: offset={} limit={}", offset, limit);
        self.adopt_all(self.store.list(offset, limit))
    }

    pub fn all_users(&self) -> Vec<Arc<UserView>> {
        self.users(0, usize::MAX)
    }

    /// Users whose key, first name or last name contains `keyword`,
    /// ignoring case.
    pub fn search(&self, keyword: &str) -> Vec<Arc<UserView>> {
        debug!("Searching for user: {}", keyword);
        let mut found = self.store.find(keyword);
        found.sort_by(|a, b| a.key.cmp(&b.key));
        self.adopt_all(found)
    }

    pub fn search_paged(&self, keyword: &str, offset: usize, limit: usize) -> Vec<Arc<UserView>> {
        self.adopt_all(self.store.find_paged(keyword, offset, limit))
    }

    /// Search by parameter map. No parameters lists every user; otherwise
    /// only `username` is understood.
    pub fn search_by_params(&self, params: &HashMap<String, String>) -> Vec<Arc<UserView>> {
        debug!("Searching for user: params={:?}", params);
        if params.is_empty() {
            return self.all_users();
        }
        match params.get(USERNAME_PARAM) {
            Some(keyword) => self.search(keyword),
            None => Vec::new(),
        }
    }

    // -- Registration --

    /// Register `username` with a placeholder credential.
    ///
    /// The record is inserted right away; the returned view's unit is
    /// enlisted so the host operation flushes it on completion.
    pub fn add_user(&self, username: &str) -> DirResult<Arc<UserView>> {
        info!("Adding new user to file directory: username={}", username);
        let mut record = UserRecord::with_key(username);
        record.password = Some(username.to_string());
        self.store.insert(record.clone())?;

        let view = Arc::new(self.build_view(record));
        view.unit_of_work().enlist(self.transactions.as_ref());
        self.cache.insert(username, Arc::clone(&view));
        Ok(view)
    }

    /// Remove `username` and flush. Returns whether the user existed.
    pub fn remove_user(&self, username: &str) -> DirResult<bool> {
        info!("Removing user: {}", username);
        self.cache.remove(username);
        let removed = self.store.remove(username).is_some();
        if removed {
            let id = StorageId::new(self.config.component_id.as_str(), username);
            self.attributes.remove_user(&id.to_string());
        }
        self.store.persist()?;
        Ok(removed)
    }

    // -- Credentials --

    pub fn supports_credential_type(&self, credential_type: &str) -> bool {
        credential_type == PASSWORD
    }

    /// Whether `username` has a credential of `credential_type`.
    pub fn is_configured_for(&self, username: &str, credential_type: &str) -> bool {
        self.supports_credential_type(credential_type)
            && self
                .store
                .get(username)
                .map_or(false, |record| record.password.is_some())
    }

    /// Check `plaintext` against the stored credential of `username`.
    pub fn is_valid(&self, username: &str, credential_type: &str, plaintext: &str) -> bool {
        if !self.supports_credential_type(credential_type) {
            return false;
        }
        match self.store.get(username).and_then(|record| record.password) {
            Some(stored) => credential::verify_password(&stored, plaintext),
            None => false,
        }
    }

    // -- Lifecycle --

    /// End of the host operation. Drops cached views; enlisted units are
    /// the host's to complete.
    pub fn close(&self) {
        info!("Closing provider, dropping {} cached views", self.cache.len());
        self.cache.clear();
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    pub fn cached_views(&self) -> usize {
        self.cache.len()
    }

    /// Cached view for `key`, or a fresh one over the store's record.
    ///
    /// Views stay cached under the key they were looked up by. A rename
    /// committed during the operation is not reflected: the old view keeps
    /// its id, and looking up the new key builds a second view.
    fn lookup(&self, key: &str) -> Option<Arc<UserView>> {
        self.cache
            .get_or_create(key, || self.store.get(key).map(|record| self.build_view(record)))
    }

    fn adopt_all(&self, records: Vec<UserRecord>) -> Vec<Arc<UserView>> {
        records
            .into_iter()
            .filter_map(|record| {
                let key = record.key.clone();
                self.cache.get_or_create(&key, || Some(self.build_view(record)))
            })
            .collect()
    }

    fn build_view(&self, record: UserRecord) -> UserView {
        let unit = Arc::new(UnitOfWork::new(
            Arc::clone(&self.store),
            record,
            self.config.flush_failure,
        ));
        UserView::new(
            &self.config.component_id,
            unit,
            Arc::clone(&self.transactions),
            Arc::clone(&self.attributes),
            self.store.config().key_change_policy,
        )
    }
}

impl std::fmt::Debug for FileUserProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileUserProvider")
            .field("component_id", &self.config.component_id)
            .field("store", &self.store)
            .field("cached_views", &self.cache.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{HostOperation, MemoryAttributes};
    use flatdir_core::{Config, DirError};
    use tempfile::TempDir;

    fn seeded(config: Config) -> (FileUserProvider, Arc<HostOperation>, Arc<MemoryAttributes>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::open(dir.path().join("userDB.json"), config).unwrap();
        store.insert(UserRecord::new("Jon", "Snow", "jon.snow@winterfell.com", "There is only one war that matters")).unwrap();
        store.insert(UserRecord::new("Tyrion", "Lannister", "tyrion.lannister@casterlyrock.com", "I drink and I know things")).unwrap();
        store.insert(UserRecord::new("Ygritte", "Snow", "Ygritte@wild.com", "You know nothing")).unwrap();
        store.flush().unwrap();

        let op = Arc::new(HostOperation::new());
        let attrs = Arc::new(MemoryAttributes::new());
        let provider = FileUserProvider::new(
            Arc::new(store),
            ProviderConfig::new("comp"),
            Arc::clone(&op) as Arc<dyn TransactionManager>,
            Arc::clone(&attrs) as Arc<dyn AttributeStore>,
        );
        (provider, op, attrs, dir)
    }

    #[test]
    fn test_lookups_share_one_view() {
        let (provider, _op, _attrs, _dir) = seeded(Config::strict());
        let by_name = provider.get_user_by_username("jon.snow@winterfell.com").unwrap();
        let by_id = provider.get_user_by_id("f:comp:jon.snow@winterfell.com").unwrap();
        let by_email = provider.get_user_by_email("Jon.Snow@Winterfell.com").unwrap();
        assert!(Arc::ptr_eq(&by_name, &by_id));
        assert!(Arc::ptr_eq(&by_name, &by_email));
        assert_eq!(provider.cached_views(), 1);
    }

    #[test]
    fn test_missing_user() {
        let (provider, _op, _attrs, _dir) = seeded(Config::strict());
        assert!(provider.get_user_by_username("hodor").is_none());
        assert!(provider.get_user_by_id("f:comp:hodor").is_none());
        assert_eq!(provider.cached_views(), 0);
    }

    #[test]
    fn test_email_strip_domain() {
        let mut config = Config::strict();
        config.email_lookup = flatdir_core::EmailLookup::StripDomain("flyer.com".into());
        let (provider, _op, _attrs, _dir) = seeded(config);
        provider.add_user("arya").unwrap();
        assert_eq!(provider.get_user_by_email("arya@flyer.com").unwrap().username(), "arya");
    }

    #[test]
    fn test_listing_and_search() {
        let (provider, _op, _attrs, _dir) = seeded(Config::strict());
        assert_eq!(provider.users_count(), 3);

        let page: Vec<String> = provider.users(1, 1).iter().map(|v| v.username()).collect();
        assert_eq!(page, vec!["tyrion.lannister@casterlyrock.com"]);
        assert_eq!(provider.all_users().len(), 3);

        let snows: Vec<String> = provider.search("SNOW").iter().map(|v| v.username()).collect();
        assert_eq!(snows, vec!["jon.snow@winterfell.com", "ygritte@wild.com"]);
        assert_eq!(provider.search_paged("snow", 1, 10).len(), 1);

        // Listed views are the cached ones
        let jon = provider.get_user_by_username("jon.snow@winterfell.com").unwrap();
        assert!(Arc::ptr_eq(&jon, &provider.search("jon")[0]));
    }

    #[test]
    fn test_search_by_params() {
        let (provider, _op, _attrs, _dir) = seeded(Config::strict());
        let mut params = HashMap::new();
        assert_eq!(provider.search_by_params(&params).len(), 3);

        params.insert("email".to_string(), "x".to_string());
        assert!(provider.search_by_params(&params).is_empty());

        params.insert(USERNAME_PARAM.to_string(), "lannister".to_string());
        assert_eq!(provider.search_by_params(&params).len(), 1);
    }

    #[test]
    fn test_add_user_flushes_on_complete() {
        let (provider, op, _attrs, _dir) = seeded(Config::strict());
        let view = provider.add_user("arya").unwrap();
        assert_eq!(view.id(), "f:comp:arya");
        assert!(provider.store().is_dirty());
        assert_eq!(op.enlisted_count(), 1);

        // Staging on the registered view does not enlist twice
        view.set_first_name("Arya").unwrap();
        assert_eq!(op.enlisted_count(), 1);

        op.complete().unwrap();
        assert!(!provider.store().is_dirty());
        let reloaded = RecordStore::load(provider.store().path()).unwrap();
        assert!(reloaded.iter().any(|r| r.key == "arya" && r.first_name.as_deref() == Some("Arya")));
    }

    #[test]
    fn test_add_existing_user_rejected() {
        let (provider, _op, _attrs, _dir) = seeded(Config::strict());
        let err = provider.add_user("ygritte@wild.com").unwrap_err();
        assert!(matches!(err, DirError::DuplicateKey { .. }));
    }

    #[test]
    fn test_remove_user() {
        let (provider, _op, attrs, _dir) = seeded(Config::strict());
        let view = provider.get_user_by_username("ygritte@wild.com").unwrap();
        view.set_single_attribute("clan", "Free Folk").unwrap();

        assert!(provider.remove_user("ygritte@wild.com").unwrap());
        assert!(provider.get_user_by_username("ygritte@wild.com").is_none());
        assert!(attrs.attributes("f:comp:ygritte@wild.com").is_empty());
        assert!(!provider.store().is_dirty());

        assert!(!provider.remove_user("ygritte@wild.com").unwrap());
    }

    #[test]
    fn test_credentials() {
        let (provider, _op, _attrs, _dir) = seeded(Config::strict());
        let mut record = provider.store().get("jon.snow@winterfell.com").unwrap();
        record.password = Some(credential::hash_password("ghost"));
        provider.store().update(record);

        assert!(provider.supports_credential_type(PASSWORD));
        assert!(!provider.supports_credential_type("otp"));
        assert!(provider.is_configured_for("jon.snow@winterfell.com", PASSWORD));
        assert!(!provider.is_configured_for("hodor", PASSWORD));
        assert!(provider.is_valid("jon.snow@winterfell.com", PASSWORD, "ghost"));
        assert!(!provider.is_valid("jon.snow@winterfell.com", PASSWORD, "Ghost"));
        assert!(!provider.is_valid("jon.snow@winterfell.com", "otp", "ghost"));

        // Placeholder password is plaintext and never matches a digest
        let registered = provider.add_user("arya").unwrap();
        assert!(provider.is_configured_for(&registered.username(), PASSWORD));
        assert!(!provider.is_valid("arya", PASSWORD, "arya"));
    }

    #[test]
    fn test_unconfigured_user() {
        let (provider, _op, _attrs, _dir) = seeded(Config::strict());
        provider.store().insert(UserRecord::with_key("hodor")).unwrap();
        assert!(!provider.is_configured_for("hodor", PASSWORD));
        assert!(!provider.is_valid("hodor", PASSWORD, ""));
    }

    #[test]
    fn test_rename_keeps_cached_view_under_old_key() {
        let (provider, op, _attrs, _dir) = seeded(Config::compatible());
        let jon = provider.get_user_by_username("jon.snow@winterfell.com").unwrap();
        jon.set_username("aegon").unwrap();
        op.complete().unwrap();

        assert_eq!(jon.id(), "f:comp:jon.snow@winterfell.com");
        assert!(Arc::ptr_eq(&jon, &provider.get_user_by_username("jon.snow@winterfell.com").unwrap()));
        let renamed = provider.get_user_by_username("aegon").unwrap();
        assert!(!Arc::ptr_eq(&jon, &renamed));
        assert_eq!(renamed.first_name().as_deref(), Some("Jon"));
    }

    #[test]
    fn test_close_clears_cache() {
        let (provider, _op, _attrs, _dir) = seeded(Config::strict());
        provider.all_users();
        assert_eq!(provider.cached_views(), 3);
        provider.close();
        assert_eq!(provider.cached_views(), 0);
    }
}
