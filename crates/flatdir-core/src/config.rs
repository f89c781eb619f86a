//! Configuration for a flatdir record store
//!
//! Two presets cover the common cases: `strict()` rejects silent data
//! loss, `compatible()` reproduces the permissive behaviour of older
//! directories (duplicate inserts overwrite, no flush bound).

use std::time::Duration;

/// What `insert` does when the key is already present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicatePolicy {
    /// Replace the existing record
    Overwrite,
    /// Fail with `DirError::DuplicateKey`
    Reject,
}

/// Whether a user's key may change after it has been indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyChangePolicy {
    /// Key changes fail with `DirError::KeyChangeRejected`
    Reject,
    /// Key changes move the entry atomically on commit
    Rekey,
}

/// How an email address maps onto a user key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmailLookup {
    /// The lower-cased email is the key
    Alias,
    /// Strip a fixed `@domain` suffix, the remainder is the key
    StripDomain(String),
}

impl EmailLookup {
    /// Translate an email address into the key to look up.
    pub fn key_for(&self, email: &str) -> String {
        match self {
            EmailLookup::Alias => email.to_lowercase(),
            EmailLookup::StripDomain(domain) => {
                let suffix = if domain.starts_with('@') {
                    domain.clone()
                } else {
                    format!("@{}", domain)
                };
                email.strip_suffix(suffix.as_str()).unwrap_or(email).to_string()
            }
        }
    }
}

/// Record store configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Behaviour of `insert` on an existing key
    pub duplicate_policy: DuplicatePolicy,
    /// Behaviour of key changes made through a view
    pub key_change_policy: KeyChangePolicy,
    /// Email to key mapping used by email lookups
    pub email_lookup: EmailLookup,
    /// Upper bound on a single flush; `None` waits indefinitely
    pub flush_timeout: Option<Duration>,
    /// Sync file data and the parent directory on every flush
    pub durable_sync: bool,
}

impl Config {
    /// Reject duplicates and key changes, bound flushes to five seconds.
    pub fn strict() -> Self {
        Self {
            duplicate_policy: DuplicatePolicy::Reject,
            key_change_policy: KeyChangePolicy::Reject,
            email_lookup: EmailLookup::Alias,
            flush_timeout: Some(Duration::from_secs(5)),
            durable_sync: true,
        }
    }

    /// Overwrite on duplicate insert and re-key on key change, no flush bound.
    pub fn compatible() -> Self {
        Self {
            duplicate_policy: DuplicatePolicy::Overwrite,
            key_change_policy: KeyChangePolicy::Rekey,
            email_lookup: EmailLookup::Alias,
            flush_timeout: None,
            durable_sync: true,
        }
    }

    /// Validate all configuration parameters
    pub fn validate(&self) -> Result<(), String> {
        if let Some(timeout) = self.flush_timeout {
            if timeout.is_zero() {
                return Err("flush_timeout must be > 0 when set".into());
            }
        }
        if let EmailLookup::StripDomain(domain) = &self.email_lookup {
            let bare = domain.trim_start_matches('@');
            if bare.is_empty() || bare.contains('@') {
                return Err(format!("email_lookup domain is not a domain: {:?}", domain));
            }
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self { Self::strict() }
}
