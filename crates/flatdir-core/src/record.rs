//! User record, the unit stored in the directory.

use serde::{Deserialize, Serialize};

/// One user in the directory.
///
/// `key` is the primary key and is persisted as `username`. Every other
/// field may be absent; absent fields serialize as `null`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    #[serde(rename = "username")]
    pub key: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    /// Stored credential: a digest, or a plaintext placeholder for freshly registered users
    #[serde(default)]
    pub password: Option<String>,
    /// Free-form custom attribute kept only in the flat file
    #[serde(default)]
    pub favourite_line: Option<String>,
}

impl UserRecord {
    /// Record with only a key.
    pub fn with_key(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            first_name: None,
            last_name: None,
            email: None,
            password: None,
            favourite_line: None,
        }
    }

    /// Build a fully populated record. The key is the lower-cased email and
    /// the password is a placeholder equal to the key.
    pub fn new(
        first_name: impl Into<String>,
        last_name: impl Into<String>,
        email: impl Into<String>,
        favourite_line: impl Into<String>,
    ) -> Self {
        let email = email.into();
        let key = email.to_lowercase();
        Self {
            password: Some(key.clone()),
            key,
            first_name: Some(first_name.into()),
            last_name: Some(last_name.into()),
            email: Some(email),
            favourite_line: Some(favourite_line.into()),
        }
    }
}
