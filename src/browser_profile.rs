//! Per-identity browser profile directories
//!
//! Every privacy context gets its own Chrome user-data directory; sharing
//! one causes SingletonLock conflicts between concurrent instances. Naming
//! is UUID-based so restarted processes never collide with leftovers.

use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// RAII wrapper for a profile directory.
///
/// Removes the directory on drop unless ownership was transferred with
/// [`BrowserProfile::into_path`], so abandoned profiles don't accumulate.
#[derive(Debug)]
pub struct BrowserProfile {
    path: PathBuf,
    cleanup_on_drop: bool,
}

impl BrowserProfile {
    /// Create a fresh, uniquely named profile directory under `root`
    /// (or the system temp directory when `root` is `None`).
    pub fn create(root: Option<&Path>, prefix: &str) -> std::io::Result<Self> {
        let base = root
            .map(Path::to_path_buf)
            .unwrap_or_else(std::env::temp_dir);
        let path = base.join(format!("{prefix}_{}", Uuid::new_v4().simple()));
        std::fs::create_dir_all(&path)?;
        debug!("Created browser profile at {}", path.display());
        Ok(Self {
            path,
            cleanup_on_drop: true,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Consume the profile and return the path, disabling auto-cleanup.
    /// Use when another owner (the browser instance) takes over removal.
    pub fn into_path(mut self) -> PathBuf {
        self.cleanup_on_drop = false;
        std::mem::take(&mut self.path)
    }
}

impl Drop for BrowserProfile {
    fn drop(&mut self) {
        if self.cleanup_on_drop && self.path.exists() {
            if let Err(e) = std::fs::remove_dir_all(&self.path) {
                warn!(
                    "Failed to remove profile directory {}: {}",
                    self.path.display(),
                    e
                );
            }
        }
    }
}

/// Remove a profile directory left behind by a closed browser instance.
pub fn remove_profile_dir(path: &Path) {
    if !path.exists() {
        return;
    }
    if let Err(e) = std::fs::remove_dir_all(path) {
        warn!("Failed to remove profile directory {}: {}", path.display(), e);
    }
}
