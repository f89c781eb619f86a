//! Query engine: linear scans over a record snapshot.
//!
//! Exact key lookups go straight to the store index; everything here is
//! O(n) over the directory, which is fine at the few-thousand-record scale
//! the store targets.

use crate::record::UserRecord;

/// Case-insensitive substring match against key, first name and last name.
/// Absent fields never match. An empty keyword matches every record.
pub fn matches_keyword(record: &UserRecord, folded_keyword: &str) -> bool {
    let hit = |field: Option<&str>| {
        field.map_or(false, |value| value.to_lowercase().contains(folded_keyword))
    };
    hit(Some(record.key.as_str()))
        || hit(record.first_name.as_deref())
        || hit(record.last_name.as_deref())
}

/// Filter `records` down to keyword matches. Result order follows input order.
pub fn search<'a, I>(records: I, keyword: &str) -> Vec<UserRecord>
where
    I: IntoIterator<Item = &'a UserRecord>,
{
    let folded = keyword.to_lowercase();
    records
        .into_iter()
        .filter(|rec| matches_keyword(rec, &folded))
        .cloned()
        .collect()
}

/// Sort by key, skip `offset`, take at most `limit`.
///
/// Each call pages over whatever snapshot it is given; pages taken from
/// different snapshots may overlap or miss records if the store changed
/// in between.
pub fn paginate(mut records: Vec<UserRecord>, offset: usize, limit: usize) -> Vec<UserRecord> {
    records.sort_by(|a, b| a.key.cmp(&b.key));
    records.into_iter().skip(offset).take(limit).collect()
}
