//! Small persisted key/value store.
//!
//! Items live at `<home>/.config/wdal/state/<module>/<item>.json` as
//! `{"value": "...", "updated_at": "<rfc3339>"}`. Writes go through a
//! temporary file and a rename so readers never see a partial item.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::home::get_home_dir;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("state store I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("state item {} is malformed: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("cannot locate state directory: {0}")]
    Home(String),
}

#[derive(Debug, Serialize, Deserialize)]
struct ItemPayload {
    value: String,
    updated_at: DateTime<Utc>,
}

/// Directory-backed store scoped to one module name.
#[derive(Debug, Clone)]
pub struct StateStore {
    root: PathBuf,
}

impl StateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store for `module` under the resolved home directory.
    pub fn for_module(module: &str) -> Result<Self, StoreError> {
        let home = get_home_dir().map_err(|e| StoreError::Home(e.to_string()))?;
        Ok(Self::in_home(&home, module))
    }

    pub fn in_home(home: &Path, module: &str) -> Self {
        Self::new(
            home.join(".config")
                .join("wdal")
                .join("state")
                .join(sanitize(module)),
        )
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn item_path(&self, item: &str) -> PathBuf {
        self.root.join(format!("{}.json", sanitize(item)))
    }

    /// Value of `item`, or `None` if it was never written.
    pub async fn get(&self, item: &str) -> Result<Option<String>, StoreError> {
        let path = self.item_path(item);
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        let payload: ItemPayload =
            serde_json::from_str(&contents).map_err(|source| StoreError::Json { path, source })?;
        Ok(Some(payload.value))
    }

    pub async fn set(&self, item: &str, value: &str) -> Result<(), StoreError> {
        let path = self.item_path(item);
        let io_err = |source| StoreError::Io {
            path: path.clone(),
            source,
        };

        tokio::fs::create_dir_all(&self.root).await.map_err(io_err)?;
        let payload = ItemPayload {
            value: value.to_string(),
            updated_at: Utc::now(),
        };
        let json = serde_json::to_string_pretty(&payload).map_err(|source| StoreError::Json {
            path: path.clone(),
            source,
        })?;

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, &path).await.map_err(io_err)
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
        .collect()
}
