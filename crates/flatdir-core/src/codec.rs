//! Persisted file codec
//!
//! The directory file is a JSON array of user objects:
//!
//! ```text
//! [{"username":"jon","firstName":"Jon","lastName":"Snow",
//!   "email":"jon@winterfell.com","password":"…","favouriteLine":"…"}, …]
//! ```
//!
//! An empty (or whitespace-only) file decodes to no records. Anything else
//! that is not a valid array of user objects is a decode error; nothing is
//! ever silently dropped.

use std::path::Path;

use crate::error::{DirError, DirResult};
use crate::record::UserRecord;

/// Serialize the full record set. Records are written in key order so
/// identical sets always produce identical bytes.
pub fn encode_records<'a, I>(records: I) -> DirResult<Vec<u8>>
where
    I: IntoIterator<Item = &'a UserRecord>,
{
    let mut sorted: Vec<&UserRecord> = records.into_iter().collect();
    sorted.sort_by(|a, b| a.key.cmp(&b.key));

    serde_json::to_vec_pretty(&sorted).map_err(|e| DirError::Encode {
        message: e.to_string(),
    })
}

/// Decode the persisted bytes read from `path`.
pub fn decode_records(path: &Path, bytes: &[u8]) -> DirResult<Vec<UserRecord>> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }

    serde_json::from_slice::<Vec<UserRecord>>(bytes).map_err(|e| DirError::Decode {
        path: path.to_path_buf(),
        line: e.line(),
        column: e.column(),
        message: e.to_string(),
    })
}

/// CRC32C fingerprint of an encoded payload, used to skip rewriting
/// byte-identical content.
pub fn fingerprint(payload: &[u8]) -> u32 {
    crc32c::crc32c(payload)
}
