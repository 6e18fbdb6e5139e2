//! Sandbox FS (C1): isolated per-run working directories carved out of a
//! workspace cache root, preferring a RAM-backed filesystem when one is
//! available so per-site I/O never touches spinning/network disks.

use std::path::{Path, PathBuf};

use crate::error::{WorkspaceError, WorkspaceResult};

const SHM_CANDIDATES: [&str; 1] = ["/dev/shm"];

/// A pool of slot directories `{root}/0 .. {root}/{capacity-1}`, each an
/// exclusive working directory for one engine invocation at a time.
#[derive(Debug, Clone)]
pub struct SandboxPool {
    root: PathBuf,
    capacity: usize,
}

impl SandboxPool {
    /// Picks a RAM-backed root if one exists and is writable, otherwise a
    /// directory under the workspace cache root.
    pub fn new(cache_root: &Path, capacity: usize) -> WorkspaceResult<Self> {
        let root = ram_backed_root(cache_root).unwrap_or_else(|| cache_root.join("sandbox"));
        std::fs::create_dir_all(&root).map_err(|e| WorkspaceError::io(&root, e))?;
        for slot in 0..capacity {
            let dir = root.join(slot.to_string());
            std::fs::create_dir_all(&dir).map_err(|e| WorkspaceError::io(&dir, e))?;
        }
        Ok(Self { root, capacity })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the path for a given slot index and clears any leftover
    /// contents from a prior run.
    pub fn acquire(&self, slot: usize) -> WorkspaceResult<PathBuf> {
        let dir = self.root.join(slot.to_string());
        clear_dir(&dir)?;
        Ok(dir)
    }

    /// Clears the slot's contents; the slot index itself is returned to the
    /// pool by the caller (Worker Pool owns the free-list).
    pub fn release(&self, slot: usize) -> WorkspaceResult<()> {
        let dir = self.root.join(slot.to_string());
        clear_dir(&dir)
    }

    /// Recursively removes the whole sandbox root. Called once by the
    /// Workspace on close; best-effort per the cleanup-errors policy.
    pub fn close(&self) {
        if let Err(err) = std::fs::remove_dir_all(&self.root) {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(root = %self.root.display(), error = %err, "sandbox pool cleanup failed");
            }
        }
    }
}

fn clear_dir(dir: &Path) -> WorkspaceResult<()> {
    if dir.exists() {
        std::fs::remove_dir_all(dir).map_err(|e| WorkspaceError::io(dir, e))?;
    }
    std::fs::create_dir_all(dir).map_err(|e| WorkspaceError::io(dir, e))
}

fn ram_backed_root(cache_root: &Path) -> Option<PathBuf> {
    for candidate in SHM_CANDIDATES {
        let base = Path::new(candidate);
        if base.is_dir() {
            let probe = base.join(format!(".geo_epic_probe_{}", std::process::id()));
            if std::fs::write(&probe, b"").is_ok() {
                let _ = std::fs::remove_file(&probe);
                let unique = cache_root
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "geo_epic".to_string());
                return Some(base.join(unique));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_clears_previous_contents() {
        let dir = tempfile::tempdir().unwrap();
        let pool = SandboxPool::new(dir.path(), 2).unwrap();
        let slot = pool.acquire(0).unwrap();
        std::fs::write(slot.join("leftover.txt"), b"stale").unwrap();
        let reacquired = pool.acquire(0).unwrap();
        assert!(!reacquired.join("leftover.txt").exists());
        pool.close();
        assert!(!dir.path().join("sandbox").exists() || !dir.path().join("sandbox").join("0").exists());
    }
}
