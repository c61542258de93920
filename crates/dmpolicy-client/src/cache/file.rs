//! JSON file cache with atomic replacement.
//!
//! Writes go through `NamedTempFile` in the cache directory, fsync, then
//! `persist()` (rename) so a crash never leaves a torn cache file. Each
//! `store` gets a sequence number; a write that lost the race to a newer one
//! is skipped.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;

use dmpolicy_core::error::{DmPolicyError, Result};

use super::{CachedState, PolicyCache};

pub struct FileCache {
    dir: PathBuf,
    path: PathBuf,
    next_seq: AtomicU64,
    // last sequence number written to disk
    written: Arc<Mutex<u64>>,
    pending: Mutex<Vec<JoinHandle<()>>>,
}

impl FileCache {
    pub const FILE_NAME: &'static str = "policy_cache.json";

    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let path = dir.join(Self::FILE_NAME);
        Self {
            dir,
            path,
            next_seq: AtomicU64::new(1),
            written: Arc::new(Mutex::new(0)),
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the cache file. `Ok(None)` if it does not exist.
    pub fn read(&self) -> Result<Option<CachedState>> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(DmPolicyError::Cache(format!(
                    "read {} failed: {e}",
                    self.path.display()
                )))
            }
        };
        let state = serde_json::from_slice(&raw)
            .map_err(|e| DmPolicyError::Cache(format!("decode {} failed: {e}", self.path.display())))?;
        Ok(Some(state))
    }

    /// Wait for every write issued so far.
    pub async fn flush(&self) {
        let handles = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *pending)
        };
        for h in handles {
            if let Err(e) = h.await {
                tracing::warn!(error = %e, "cache write task failed");
            }
        }
    }
}

impl PolicyCache for FileCache {
    fn load(&self) -> Option<CachedState> {
        match self.read() {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(error = %e, "ignoring unreadable policy cache");
                None
            }
        }
    }

    fn store(&self, state: CachedState) {
        let bytes = match serde_json::to_vec_pretty(&state) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(error = %e, "policy cache encode failed");
                return;
            }
        };
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let dir = self.dir.clone();
        let path = self.path.clone();
        let written = Arc::clone(&self.written);

        let job = move || write_if_newer(&written, seq, &dir, &path, &bytes);

        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                let h = rt.spawn_blocking(job);
                let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
                pending.retain(|h| !h.is_finished());
                pending.push(h);
            }
            // no runtime (sync callers, tools): write inline
            Err(_) => job(),
        }
    }
}

fn write_if_newer(written: &Mutex<u64>, seq: u64, dir: &Path, path: &Path, bytes: &[u8]) {
    let mut last = written.lock().unwrap_or_else(|e| e.into_inner());
    if seq < *last {
        tracing::debug!(seq, last = *last, "skipping stale policy cache write");
        return;
    }
    match write_atomic(dir, path, bytes) {
        Ok(()) => {
            *last = seq;
            tracing::debug!(path = %path.display(), bytes = bytes.len(), "policy cache written");
        }
        Err(e) => tracing::warn!(error = %e, "policy cache write failed"),
    }
}

fn write_atomic(dir: &Path, path: &Path, bytes: &[u8]) -> Result<()> {
    fs::create_dir_all(dir)
        .map_err(|e| DmPolicyError::Cache(format!("create {} failed: {e}", dir.display())))?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .map_err(|e| DmPolicyError::Cache(format!("temp file in {} failed: {e}", dir.display())))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file()
            .set_permissions(fs::Permissions::from_mode(0o600))
            .map_err(|e| DmPolicyError::Cache(format!("chmod temp file failed: {e}")))?;
    }

    tmp.as_file_mut()
        .write_all(bytes)
        .map_err(|e| DmPolicyError::Cache(format!("write temp file failed: {e}")))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| DmPolicyError::Cache(format!("sync temp file failed: {e}")))?;
    tmp.persist(path)
        .map_err(|e| DmPolicyError::Cache(format!("persist {} failed: {e}", path.display())))?;
    Ok(())
}
