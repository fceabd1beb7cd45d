use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use super::StoreError;

/// Key/value persistence. Each `set` replaces the whole value of one key
/// atomically; there is no cross-key transaction.
#[async_trait]
pub trait Persistence: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;
    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
pub struct MemoryPersistence {
    data: Mutex<HashMap<String, Value>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Persistence for MemoryPersistence {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.data.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.data.lock().await.insert(key.to_string(), value);
        Ok(())
    }
}

/// One pretty-printed JSON file per key under a base directory.
#[derive(Debug, Clone)]
pub struct FilePersistence {
    base_path: PathBuf,
}

impl FilePersistence {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.base_path.join(format!("{}.json", key))
    }
}

#[async_trait]
impl Persistence for FilePersistence {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        match tokio::fs::read_to_string(self.path_for(key)).await {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.base_path).await?;
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(&value)?;
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}
