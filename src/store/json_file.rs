//! JSON file store with write-to-temp-then-rename saves.

use std::ffi::OsString;
use std::io::ErrorKind;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::StoreError;
use crate::store::traits::{Document, StateStore, decode, encode};

/// A document persisted as a single pretty-printed JSON file.
pub struct JsonFileStore<T> {
    path: PathBuf,
    _doc: PhantomData<fn() -> T>,
}

impl<T> JsonFileStore<T> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _doc: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sibling temp file: `<name>.tmp` in the same directory, so the final
    /// rename never crosses a filesystem boundary.
    fn tmp_path(&self) -> PathBuf {
        let mut name: OsString = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| OsString::from("state"));
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl<T: Document> StateStore<T> for JsonFileStore<T> {
    async fn load(&self) -> Result<T, StoreError> {
        let raw = match fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "State file missing, starting empty");
                return Ok(T::default());
            }
            Err(e) if e.kind() == ErrorKind::InvalidData => {
                return Err(StoreError::Corrupt {
                    path: self.path.clone(),
                    reason: e.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };
        decode(&raw, &self.location())
    }

    async fn save(&self, value: &T) -> Result<(), StoreError> {
        let json = encode(value)?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await?;
        }

        let tmp = self.tmp_path();
        let written = match write_synced(&tmp, json.as_bytes()).await {
            Ok(()) => fs::rename(&tmp, &self.path).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        sync_parent(&self.path).await?;
        debug!(path = %self.path.display(), bytes = json.len(), "State saved");
        Ok(())
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

async fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await
}

/// Make the rename itself durable.
#[cfg(unix)]
async fn sync_parent(path: &Path) -> std::io::Result<()> {
    match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => fs::File::open(parent).await?.sync_all().await,
        None => fs::File::open(".").await?.sync_all().await,
    }
}

#[cfg(not(unix))]
async fn sync_parent(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
