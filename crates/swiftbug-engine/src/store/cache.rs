use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub const CACHE_CAPACITY: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub data: Value,
    /// Epoch milliseconds.
    pub fetched_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheInfo {
    pub size: usize,
    /// Length of the serialized cache, in bytes.
    pub total_size: usize,
    pub keys: Vec<String>,
}

/// URL -> fetched report, bounded by evicting the oldest fetch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FetchCache {
    entries: BTreeMap<String, CacheEntry>,
}

impl FetchCache {
    pub fn get(&self, url: &str) -> Option<&CacheEntry> {
        self.entries.get(url)
    }

    /// Returns the evicted URLs.
    pub fn insert(&mut self, url: &str, data: Value, fetched_at: i64) -> Vec<String> {
        self.entries
            .insert(url.to_string(), CacheEntry { data, fetched_at });
        let mut evicted = Vec::new();
        while self.entries.len() > CACHE_CAPACITY {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, e)| e.fetched_at)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(key) => {
                    self.entries.remove(&key);
                    evicted.push(key);
                }
                None => break,
            }
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub fn info(&self) -> CacheInfo {
        CacheInfo {
            size: self.entries.len(),
            total_size: serde_json::to_string(&self.entries)
                .map(|s| s.len())
                .unwrap_or(0),
            keys: self.entries.keys().cloned().collect(),
        }
    }
}
