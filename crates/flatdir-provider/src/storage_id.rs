//! Storage identifiers for users federated from a flatdir store.
//!
//! The host addresses federated users as `f:<component-id>:<key>`, mapping
//! its own id space onto the store's flat key namespace. The core only
//! ever sees `<key>`.

use std::fmt;

/// Prefix marking an id as belonging to a federated storage component.
pub const FEDERATED_PREFIX: &str = "f";

/// A parsed host user id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageId {
    /// Component that owns the user; `None` for ids without the federated prefix
    component_id: Option<String>,
    /// Key in the record store
    external_id: String,
}

impl StorageId {
    /// Build the id the host uses for `key` in `component_id`.
    pub fn new(component_id: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            component_id: Some(component_id.into()),
            external_id: key.into(),
        }
    }

    /// Parse a host id. Anything without the `f:<component>:` prefix is
    /// taken to be a bare key. Keys may themselves contain `:`.
    pub fn parse(id: &str) -> Self {
        let federated = id
            .strip_prefix(FEDERATED_PREFIX)
            .and_then(|rest| rest.strip_prefix(':'))
            .and_then(|rest| rest.split_once(':'));

        match federated {
            Some((component, key)) => Self {
                component_id: Some(component.to_string()),
                external_id: key.to_string(),
            },
            None => Self {
                component_id: None,
                external_id: id.to_string(),
            },
        }
    }

    /// The record store key.
    pub fn external_id(&self) -> &str {
        &self.external_id
    }

    /// The owning component, if the id was federated.
    pub fn component_id(&self) -> Option<&str> {
        self.component_id.as_deref()
    }

    /// Whether the id carried the federated prefix.
    pub fn is_federated(&self) -> bool {
        self.component_id.is_some()
    }
}

impl fmt::Display for StorageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.component_id {
            Some(component) => write!(f, "{}:{}:{}", FEDERATED_PREFIX, component, self.external_id),
            None => f.write_str(&self.external_id),
        }
    }
}
