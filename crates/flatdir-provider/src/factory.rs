//! Provider factory: owns the shared store and creates one provider per
//! host operation.

use std::path::Path;
use std::sync::Arc;

use hashbrown::HashMap;
use log::info;

use flatdir_core::{Config, DirResult, RecordStore, UserRecord};

use crate::host::{AttributeStore, TransactionManager};
use crate::provider::{FileUserProvider, ProviderConfig};

/// Id the factory registers under.
pub const PROVIDER_ID: &str = "file-user-storage-provider";

/// Conventional file name of the directory inside its data directory.
pub const DEFAULT_FILE_NAME: &str = "userDB.json";

/// Factory configuration key read by `init`.
pub const SOME_PROPERTY: &str = "someProperty";

/// Kind of value a configuration property holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    String,
}

/// One administrator-visible configuration property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigProperty {
    pub name: &'static str,
    pub label: &'static str,
    pub help_text: &'static str,
    pub kind: PropertyKind,
    pub default_value: &'static str,
}

/// Creates providers over one shared record store.
pub struct ProviderFactory {
    store: Arc<RecordStore>,
    provider_config: ProviderConfig,
    some_property: Option<String>,
}

impl ProviderFactory {
    pub fn new(store: Arc<RecordStore>, provider_config: ProviderConfig) -> Self {
        Self { store, provider_config, some_property: None }
    }

    /// Open the store at `path` and build a factory over it.
    pub fn open<P: AsRef<Path>>(path: P, config: Config, provider_config: ProviderConfig) -> DirResult<Self> {
        let store = RecordStore::open(path, config)?;
        Ok(Self::new(Arc::new(store), provider_config))
    }

    pub fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    /// Properties shown to administrators. Informational only.
    pub fn config_properties(&self) -> Vec<ConfigProperty> {
        vec![ConfigProperty {
            name: "myParam",
            label: "My Param",
            help_text: "Some Description",
            kind: PropertyKind::String,
            default_value: "some value",
        }]
    }

    /// Read factory-level settings.
    pub fn init(&mut self, settings: &HashMap<String, String>) {
        self.some_property = settings.get(SOME_PROPERTY).cloned();
        info!("Configured {} with someProperty: {:?}", PROVIDER_ID, self.some_property);
    }

    pub fn some_property(&self) -> Option<&str> {
        self.some_property.as_deref()
    }

    /// Insert `records` and flush, but only into an empty store.
    /// Returns how many records were inserted.
    pub fn seed_if_empty(&self, records: Vec<UserRecord>) -> DirResult<usize> {
        if !self.store.is_empty() {
            return Ok(0);
        }
        info!("User directory is empty, populating it with {} records", records.len());
        let count = records.len();
        for record in records {
            self.store.insert(record)?;
        }
        self.store.persist()?;
        Ok(count)
    }

    /// The three demo users a fresh directory starts with.
    pub fn demo_records() -> Vec<UserRecord> {
        vec![
            UserRecord::new("Jon", "Snow", "jon.snow@winterfell.com", "There is only one war that matters"),
            UserRecord::new("Tyrion", "Lannister", "tyrion.lannister@casterlyrock.com", "I drink and I know things"),
            UserRecord::new("Ygritte", "Snow", "Ygritte@wild.com", "You know nothing"),
        ]
    }

    /// Provider for one host operation.
    pub fn create(
        &self,
        transactions: Arc<dyn TransactionManager>,
        attributes: Arc<dyn AttributeStore>,
    ) -> FileUserProvider {
        info!("Creating provider for component {}", self.provider_config.component_id);
        FileUserProvider::new(
            Arc::clone(&self.store),
            self.provider_config.clone(),
            transactions,
            attributes,
        )
    }

    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    pub fn provider_config(&self) -> &ProviderConfig {
        &self.provider_config
    }
}

impl std::fmt::Debug for ProviderFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderFactory")
            .field("id", &PROVIDER_ID)
            .field("path", &self.store.path())
            .field("entries", &self.store.count())
            .finish()
    }
}
