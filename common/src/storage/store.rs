use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::{path::Path as ObjPath, ObjectStore, PutPayload};

use crate::storage::types::index_entry::IndexEntry;
use crate::utils::config::{AppConfig, StorageKind};

pub type DynStore = Arc<dyn ObjectStore>;

/// Raw compressed archive records, laid out as `<bucket>/<domain>/<digest>.gz`.
///
/// Records land here before they are decompressed, so a later run can parse
/// them again without touching the network.
#[derive(Clone)]
pub struct StorageManager {
    store: DynStore,
}

impl StorageManager {
    /// Open the backend selected by `cfg.storage`.
    ///
    /// The local backend lives under `<data_dir>/records`, created on demand.
    pub async fn new(cfg: &AppConfig) -> object_store::Result<Self> {
        match cfg.storage {
            StorageKind::Local => {
                let base = resolve_base_dir(cfg).join("records");
                tokio::fs::create_dir_all(&base)
                    .await
                    .map_err(|e| object_store::Error::Generic {
                        store: "LocalFileSystem",
                        source: e.into(),
                    })?;
                let store = LocalFileSystem::new_with_prefix(&base)?;
                Ok(Self::from_store(Arc::new(store)))
            }
            StorageKind::Memory => Ok(Self::from_store(Arc::new(InMemory::new()))),
        }
    }

    pub fn from_store(store: DynStore) -> Self {
        Self { store }
    }

    pub async fn put(&self, location: &str, data: Bytes) -> object_store::Result<()> {
        self.store
            .put(&ObjPath::from(location), PutPayload::from_bytes(data))
            .await
            .map(|_| ())
    }

    pub async fn get(&self, location: &str) -> object_store::Result<Bytes> {
        self.store.get(&ObjPath::from(location)).await?.bytes().await
    }

    /// Write the raw bytes of `entry`, returning the location used.
    pub async fn store_raw_record(
        &self,
        bucket: &str,
        entry: &IndexEntry,
        raw: Bytes,
    ) -> object_store::Result<String> {
        let location = entry.raw_record_location(bucket);
        self.put(&location, raw).await?;
        Ok(location)
    }

    pub async fn load_raw_record(
        &self,
        bucket: &str,
        entry: &IndexEntry,
    ) -> object_store::Result<Option<Bytes>> {
        match self.get(&entry.raw_record_location(bucket)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// `data_dir` as an absolute path; relative values hang off the working directory.
pub fn resolve_base_dir(cfg: &AppConfig) -> PathBuf {
    let data_dir = Path::new(&cfg.data_dir);
    if data_dir.is_absolute() {
        data_dir.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(data_dir)
    }
}
