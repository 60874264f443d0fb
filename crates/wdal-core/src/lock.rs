//! Keyed async mutex.
//!
//! Serializes work that touches a shared on-disk resource, keyed by a
//! normalized path. Lives for the whole process; sessions that share a
//! bootstrap path share a slot.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

static SHARED: OnceLock<KeyedLock> = OnceLock::new();

#[derive(Debug, Default, Clone)]
pub struct KeyedLock {
    slots: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl KeyedLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide instance.
    pub fn shared() -> Self {
        SHARED.get_or_init(KeyedLock::new).clone()
    }

    /// Run `work` while holding the slot for `key`.
    pub async fn acquire<F, T>(&self, key: &str, work: F) -> T
    where
        F: Future<Output = T>,
    {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            slots.entry(key.to_string()).or_default().clone()
        };
        let _guard = slot.lock().await;
        work.await
    }

    /// Lock key for a filesystem path: `.` dropped, `..` folded, no trailing slash.
    pub fn path_key(path: &Path) -> String {
        let mut normalized = PathBuf::new();
        for component in path.components() {
            match component {
                Component::CurDir => {}
                Component::ParentDir => {
                    if !normalized.pop() {
                        normalized.push("..");
                    }
                }
                other => normalized.push(other.as_os_str()),
            }
        }
        normalized.to_string_lossy().into_owned()
    }
}
