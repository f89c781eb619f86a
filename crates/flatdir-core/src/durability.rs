//! Platform-specific durable sync and crash-safe file replacement
//!
//! Each platform has different guarantees for when data is actually written to persistent storage.
//! `durable_sync` maps to the strongest durability guarantee available on each platform, and
//! `replace_file` builds the temp-file + rename pattern on top of it so that a failed flush
//! never leaves a truncated directory file behind.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{DirError, DirResult};

/// Distinguishes temp files of concurrent or abandoned flushes.
static TEMP_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Ensures data is durably written to persistent storage before returning.
///
/// Platform behaviors:
/// - Linux: fdatasync() - syncs data but not metadata (faster than fsync)
/// - macOS/iOS: fcntl(F_FULLFSYNC) - bypasses disk cache, ensures data reaches physical media
/// - Windows: FlushFileBuffers() - flushes internal buffers and requests device flush
/// - Other: file.sync_data() - Rust stdlib fallback
///
/// The call may block for extended periods during heavy I/O; do not hold the index lock across it.
pub fn durable_sync(file: &File) -> io::Result<()> {
    #[cfg(target_os = "linux")]
    {
        use std::os::unix::io::AsRawFd;
        let fd = file.as_raw_fd();
        // SAFETY: fdatasync is a POSIX system call that operates on a valid file descriptor.
        // We obtain the fd from a valid File reference, so it is guaranteed to be open.
        let result = unsafe { libc::fdatasync(fd) };
        if result == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    #[cfg(any(target_os = "macos", target_os = "ios"))]
    {
        // Plain fsync() on Apple platforms only reaches the drive's volatile cache.
        use std::os::unix::io::AsRawFd;
        let fd = file.as_raw_fd();
        // SAFETY: fcntl with F_FULLFSYNC is a macOS system call that operates on a valid fd.
        // We obtain the fd from a valid File reference, so it is guaranteed to be open.
        let result = unsafe { libc::fcntl(fd, libc::F_FULLFSYNC) };
        if result == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    #[cfg(target_os = "windows")]
    {
        use std::os::windows::io::AsRawHandle;
        use winapi::um::fileapi::FlushFileBuffers;
        let handle = file.as_raw_handle();
        // SAFETY: FlushFileBuffers is a Windows API call on a valid file handle.
        // We obtain the handle from a valid File reference.
        let result = unsafe { FlushFileBuffers(handle as *mut _) };
        if result != 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "ios", target_os = "windows")))]
    {
        file.sync_data()
    }
}

/// Sync the directory entry table so a completed rename survives power loss.
///
/// Directories cannot be opened as files on Windows; the rename there is
/// already journaled by NTFS, so this is a no-op.
pub fn sync_parent_dir(path: &Path) -> DirResult<()> {
    #[cfg(unix)]
    {
        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let dir = File::open(parent).map_err(|e| DirError::Io {
            path: Some(parent.to_path_buf()),
            kind: e.kind(),
            message: format!("Failed to open directory for sync: {}", e),
        })?;
        durable_sync(&dir).map_err(|e| DirError::Io {
            path: Some(parent.to_path_buf()),
            kind: e.kind(),
            message: format!("Failed to sync directory: {}", e),
        })?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}

/// Temp file path next to `target`, unique within this process.
fn temp_path_for(target: &Path) -> PathBuf {
    let seq = TEMP_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "flatdir".to_string());
    target.with_file_name(format!(".{}.{}-{}.tmp", name, std::process::id(), seq))
}

/// Replace `target` with `payload` atomically.
///
/// 1. Write payload to a temp file in the same directory
/// 2. durable_sync the temp file (when `durable`)
/// 3. Rename temp file over target (atomic on POSIX)
/// 4. durable_sync the parent directory (when `durable`)
///
/// A crash before step 3 leaves the old file intact and an orphaned temp
/// file; after step 3 the new content is in place.
pub fn replace_file(target: &Path, payload: &[u8], durable: bool) -> DirResult<()> {
    let temp = temp_path_for(target);

    let result = write_and_rename(target, &temp, payload, durable);
    if result.is_err() {
        let _ = fs::remove_file(&temp);
    }
    result
}

fn write_and_rename(target: &Path, temp: &Path, payload: &[u8], durable: bool) -> DirResult<()> {
    {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(temp)
            .map_err(|e| DirError::Io {
                path: Some(temp.to_path_buf()),
                kind: e.kind(),
                message: format!("Failed to create temp file: {}", e),
            })?;

        file.write_all(payload).map_err(|e| DirError::Io {
            path: Some(temp.to_path_buf()),
            kind: e.kind(),
            message: format!("Failed to write temp file: {}", e),
        })?;

        if durable {
            durable_sync(&file).map_err(|e| DirError::Io {
                path: Some(temp.to_path_buf()),
                kind: e.kind(),
                message: format!("Failed to sync temp file: {}", e),
            })?;
        }
    }

    fs::rename(temp, target).map_err(|e| DirError::Io {
        path: Some(target.to_path_buf()),
        kind: e.kind(),
        message: format!("Failed to rename temp file over target: {}", e),
    })?;

    if durable {
        sync_parent_dir(target)?;
    }
    Ok(())
}
