//! Record store, the heart of flatdir.
//!
//! RecordStore keeps every user record in a RAM hash table and persists the
//! whole set to a single file on flush.
//!
//! **Read path**: RAM only (concurrent via RwLock)
//! **Write path**: RAM under the write lock, then mark dirty
//! **Flush path**: serialize a snapshot, replace the file atomically
//!
//! One store owns one file. Two stores (or two processes) pointed at the
//! same path will overwrite each other's flushes.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use hashbrown::HashMap;
use log::{debug, error, info, warn};
use parking_lot::{Mutex, RwLock};

use crate::codec::{decode_records, encode_records, fingerprint};
use crate::config::{Config, DuplicatePolicy};
use crate::durability::replace_file;
use crate::error::{DirError, DirResult};
use crate::query;
use crate::record::UserRecord;
use crate::tracker::ChangeTracker;

type Index = HashMap<String, UserRecord>;

/// State guarded by the flush mutex.
#[derive(Debug, Default)]
struct FlushState {
    /// CRC32C of the payload last written by this store
    last_fingerprint: Option<u32>,
}

/// In-memory user index backed by one persisted file.
///
/// All public methods take `&self`; share the store as `Arc<RecordStore>`.
/// Readers (`get`, `all`, `find`, …) run concurrently with each other.
/// Writers (`insert`, `update`, `rekey`, `remove`) hold the index write
/// lock and exclude readers. Flushes serialize on their own mutex and only
/// hold the index read lock while taking the snapshot.
pub struct RecordStore {
    /// RAM working set
    index: Arc<RwLock<Index>>,
    /// Single flusher at a time
    flush_state: Arc<Mutex<FlushState>>,
    /// Mutation generations and flush statistics
    tracker: Arc<ChangeTracker>,
    /// Persisted file
    path: PathBuf,
    /// Store configuration
    config: Config,
}

impl RecordStore {
    /// Open the store at `path`, loading every record in the file.
    ///
    /// A missing file (and missing parent directories) is created empty.
    /// A file that exists but cannot be decoded fails the open.
    pub fn open<P: AsRef<Path>>(path: P, config: Config) -> DirResult<Self> {
        config.validate().map_err(|reason| DirError::InvalidConfig { reason })?;

        let path = path.as_ref().to_path_buf();
        let records = Self::load(&path)?;

        let mut index = Index::with_capacity(records.len());
        for record in records {
            if let Some(previous) = index.insert(record.key.clone(), record) {
                warn!("Duplicate key {} in {}, keeping the later entry", previous.key, path.display());
            }
        }

        info!("Loaded {} user records from {}", index.len(), path.display());

        Ok(Self {
            index: Arc::new(RwLock::new(index)),
            flush_state: Arc::new(Mutex::new(FlushState::default())),
            tracker: Arc::new(ChangeTracker::new()),
            path,
            config,
        })
    }

    /// Read and decode the file at `path`.
    ///
    /// Absent file: an empty file is created and no records are returned.
    pub fn load(path: &Path) -> DirResult<Vec<UserRecord>> {
        match fs::read(path) {
            Ok(bytes) => decode_records(path, &bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    fs::create_dir_all(parent).map_err(|e| DirError::Io {
                        path: Some(parent.to_path_buf()),
                        kind: e.kind(),
                        message: format!("Failed to create directory: {}", e),
                    })?;
                }
                fs::File::create(path).map_err(|e| DirError::Io {
                    path: Some(path.to_path_buf()),
                    kind: e.kind(),
                    message: format!("Failed to create empty user file: {}", e),
                })?;
                info!("No user file at {}, created an empty one", path.display());
                Ok(Vec::new())
            }
            Err(e) => Err(DirError::Io {
                path: Some(path.to_path_buf()),
                kind: e.kind(),
                message: format!("Failed to read user file: {}", e),
            }),
        }
    }

    /// Get a copy of the record for `key`.
    pub fn get(&self, key: &str) -> Option<UserRecord> {
        let index = self.index.read();
        index.get(key).cloned()
    }

    /// Check if `key` is indexed.
    pub fn contains_key(&self, key: &str) -> bool {
        let index = self.index.read();
        index.contains_key(key)
    }

    /// Look a user up by email according to the configured `EmailLookup`.
    pub fn get_by_email(&self, email: &str) -> Option<UserRecord> {
        let key = self.config.email_lookup.key_for(email);
        self.get(&key)
    }

    /// Add a record under `record.key`.
    ///
    /// With `DuplicatePolicy::Overwrite` an existing record is replaced;
    /// with `Reject` the call fails and the index is unchanged.
    pub fn insert(&self, record: UserRecord) -> DirResult<()> {
        let mut index = self.index.write();
        if self.config.duplicate_policy == DuplicatePolicy::Reject && index.contains_key(&record.key) {
            return Err(DirError::DuplicateKey { key: record.key });
        }
        debug!("Inserting user {}", record.key);
        index.insert(record.key.clone(), record);
        self.tracker.mark_dirty();
        Ok(())
    }

    /// Replace the record indexed under `record.key`.
    ///
    /// Returns false (and changes nothing) when no record has that key.
    /// The index key is never changed here: a record whose key field was
    /// edited does not move, use `rekey` for that.
    pub fn update(&self, record: UserRecord) -> bool {
        let mut index = self.index.write();
        match index.get_mut(&record.key) {
            Some(slot) => {
                if *slot != record {
                    debug!("Updating user {}", record.key);
                    *slot = record;
                    self.tracker.mark_dirty();
                }
                true
            }
            None => {
                debug!("Update for unknown user {} ignored", record.key);
                false
            }
        }
    }

    /// Edit the record at `key` in place under the write lock.
    ///
    /// Returns false (and runs nothing) when no record has that key. The
    /// record stays indexed under `key` whatever `f` does to its key field.
    /// Marks the store dirty only if `f` changed something.
    pub fn modify<F>(&self, key: &str, f: F) -> bool
    where
        F: FnOnce(&mut UserRecord),
    {
        let mut index = self.index.write();
        let slot = match index.get_mut(key) {
            Some(slot) => slot,
            None => {
                debug!("Modify for unknown user {} ignored", key);
                return false;
            }
        };
        let before = slot.clone();
        f(slot);
        slot.key = before.key.clone();
        if *slot != before {
            debug!("Modified user {}", key);
            self.tracker.mark_dirty();
        }
        true
    }

    /// Move the record at `old` to `new`, rewriting its key field.
    pub fn rekey(&self, old: &str, new: &str) -> DirResult<()> {
        let mut index = self.index.write();
        if !index.contains_key(old) {
            return Err(DirError::NotFound { key: old.to_string() });
        }
        if old == new {
            return Ok(());
        }
        if index.contains_key(new) {
            return Err(DirError::DuplicateKey { key: new.to_string() });
        }
        if let Some(mut record) = index.remove(old) {
            info!("Re-keying user {} to {}", old, new);
            record.key = new.to_string();
            index.insert(new.to_string(), record);
            self.tracker.mark_dirty();
        }
        Ok(())
    }

    /// Remove and return the record for `key`. Absent keys are a no-op.
    pub fn remove(&self, key: &str) -> Option<UserRecord> {
        let mut index = self.index.write();
        let removed = index.remove(key);
        if removed.is_some() {
            debug!("Removed user {}", key);
            self.tracker.mark_dirty();
        }
        removed
    }

    /// Number of records.
    pub fn count(&self) -> usize {
        let index = self.index.read();
        index.len()
    }

    /// Returns true if the store has no records.
    pub fn is_empty(&self) -> bool {
        let index = self.index.read();
        index.is_empty()
    }

    /// Snapshot of every record, in no particular order.
    pub fn all(&self) -> Vec<UserRecord> {
        let index = self.index.read();
        index.values().cloned().collect()
    }

    /// Records whose key, first name or last name contains `keyword`,
    /// compared case-insensitively. Unordered.
    pub fn find(&self, keyword: &str) -> Vec<UserRecord> {
        let index = self.index.read();
        query::search(index.values(), keyword)
    }

    /// One page of all records ordered by key.
    ///
    /// Each call pages over a fresh snapshot; it is not a stable cursor.
    pub fn list(&self, offset: usize, limit: usize) -> Vec<UserRecord> {
        query::paginate(self.all(), offset, limit)
    }

    /// One page of `find(keyword)` ordered by key.
    pub fn find_paged(&self, keyword: &str, offset: usize, limit: usize) -> Vec<UserRecord> {
        query::paginate(self.find(keyword), offset, limit)
    }

    /// Write the full record set to the persisted file, replacing it atomically.
    ///
    /// When `Config::flush_timeout` is set the write runs on a worker thread
    /// and the call returns `DirError::FlushTimeout` if it does not finish
    /// in time. The store stays dirty after any failure.
    ///
    /// A timed-out write keeps running and is booked once, when it ends:
    /// as a write if it succeeds, as a failure if it does not. The timeout
    /// itself is not counted in `failed_flushes`.
    pub fn flush(&self) -> DirResult<()> {
        let result = match self.config.flush_timeout {
            None => {
                let mut state = self.flush_state.lock();
                write_snapshot(&self.index, &self.tracker, &mut state, &self.path, self.config.durable_sync)
            }
            Some(timeout) => self.flush_bounded(timeout),
        };

        match &result {
            Err(e @ DirError::FlushTimeout { .. }) => warn!("{}", e),
            Err(e) => {
                self.tracker.record_failure();
                error!("Flush of {} failed: {}", self.path.display(), e);
            }
            Ok(()) => {}
        }
        result
    }

    /// Flush only if the store changed since the last flush.
    /// Returns whether a flush ran.
    pub fn persist(&self) -> DirResult<bool> {
        if !self.tracker.is_dirty() {
            return Ok(false);
        }
        self.flush()?;
        Ok(true)
    }

    fn flush_bounded(&self, timeout: Duration) -> DirResult<()> {
        let (tx, rx) = mpsc::sync_channel(1);
        let index = Arc::clone(&self.index);
        let tracker = Arc::clone(&self.tracker);
        let flush_state = Arc::clone(&self.flush_state);
        let path = self.path.clone();
        let durable = self.config.durable_sync;

        thread::Builder::new()
            .name("flatdir-flush".to_string())
            .spawn(move || {
                let mut state = flush_state.lock();
                let result = write_snapshot(&index, &tracker, &mut state, &path, durable);
                // Caller gave up waiting, nobody else will see an error
                if let Err(mpsc::SendError(Err(e))) = tx.send(result) {
                    tracker.record_failure();
                    error!("Abandoned flush of {} failed: {}", path.display(), e);
                }
            })
            .map_err(|e| DirError::Io {
                path: Some(self.path.clone()),
                kind: e.kind(),
                message: format!("Failed to spawn flush thread: {}", e),
            })?;

        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(DirError::FlushTimeout {
                path: self.path.clone(),
                timeout,
            }),
            Err(RecvTimeoutError::Disconnected) => Err(DirError::Io {
                path: Some(self.path.clone()),
                kind: std::io::ErrorKind::Other,
                message: "Flush thread exited without a result".to_string(),
            }),
        }
    }

    /// True when the index holds changes not yet flushed.
    pub fn is_dirty(&self) -> bool {
        self.tracker.is_dirty()
    }

    /// Mutation and flush bookkeeping.
    pub fn tracker(&self) -> &ChangeTracker {
        &self.tracker
    }

    /// Persisted file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Store configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }
}

/// Snapshot the index and replace the file with it.
///
/// The caller holds the flush mutex, so snapshots reach the file in
/// generation order.
fn write_snapshot(
    index: &RwLock<Index>,
    tracker: &ChangeTracker,
    state: &mut FlushState,
    path: &Path,
    durable: bool,
) -> DirResult<()> {
    let (generation, payload) = {
        let index = index.read();
        (tracker.generation(), encode_records(index.values())?)
    };

    let checksum = fingerprint(&payload);
    if state.last_fingerprint == Some(checksum) && path.exists() {
        debug!("Snapshot of {} unchanged, skipping write", path.display());
        tracker.mark_flushed(generation);
        return Ok(());
    }

    replace_file(path, &payload, durable)?;
    state.last_fingerprint = Some(checksum);
    tracker.mark_flushed(generation);
    tracker.record_write();
    info!("Flushed {} bytes to {}", payload.len(), path.display());
    Ok(())
}

impl std::fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore")
            .field("path", &self.path)
            .field("records", &self.count())
            .field("dirty", &self.is_dirty())
            .finish()
    }
}
