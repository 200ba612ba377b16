use anyhow::Result;
use dashmap::DashMap;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    path::Path,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use super::sources::PriceSourceKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockTag {
    Latest,
    Number(u64),
}

impl From<Option<u64>> for BlockTag {
    fn from(block: Option<u64>) -> Self {
        block.map_or(BlockTag::Latest, BlockTag::Number)
    }
}

/// Cache identity: (chain, token symbol, block). Symbols are stored uppercased.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PriceKey {
    pub chain_id: u64,
    pub symbol: String,
    pub block: BlockTag,
}

impl PriceKey {
    pub fn new(chain_id: u64, symbol: &str, block: Option<u64>) -> Self {
        Self {
            chain_id,
            symbol: symbol.to_uppercase(),
            block: block.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceCacheEntry {
    pub price_usd: f64,
    pub source: PriceSourceKind,
    pub confidence: f64,
    /// Unix seconds the price was observed at its source.
    pub timestamp: i64,
    /// Unix seconds when the entry was stored. Expiry counts from here.
    #[serde(default)]
    pub cached_at: i64,
    pub token_symbol: String,
    pub chain_id: u64,
    pub block_number: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub by_source: BTreeMap<PriceSourceKind, usize>,
    pub chains: BTreeSet<u64>,
    pub max_age_secs: u64,
}

#[derive(Serialize, Deserialize)]
struct PersistedEntry {
    key: PriceKey,
    entry: PriceCacheEntry,
}

/// Shared price cache. Entries are replaced whole, never edited.
pub struct PriceCache {
    entries: DashMap<PriceKey, PriceCacheEntry>,
    max_age: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl PriceCache {
    pub fn new(max_age: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            max_age,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn get(&self, chain_id: u64, symbol: &str, block: Option<u64>) -> Option<PriceCacheEntry> {
        let key = PriceKey::new(chain_id, symbol, block);
        let entry = self.entries.get(&key).map(|e| e.value().clone());

        match entry {
            Some(entry) if !self.is_expired(&entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry)
            }
            Some(_) => {
                debug!("Expired price for {:?}", key);
                self.evict_if_expired(&key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Drops the entry at `key` only if it is still expired, leaving a concurrent refresh in place.
    fn evict_if_expired(&self, key: &PriceKey) {
        self.entries.remove_if(key, |_, entry| self.is_expired(entry));
    }

    pub fn set(&self, entry: PriceCacheEntry) {
        let key = PriceKey::new(entry.chain_id, &entry.token_symbol, entry.block_number);
        self.entries.insert(key, entry);
    }

    pub fn clear(&self, chain_id: Option<u64>) {
        match chain_id {
            Some(chain_id) => self.entries.retain(|key, _| key.chain_id != chain_id),
            None => self.entries.clear(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let mut by_source = BTreeMap::new();
        let mut chains = BTreeSet::new();
        for item in self.entries.iter() {
            *by_source.entry(item.value().source).or_insert(0) += 1;
            chains.insert(item.key().chain_id);
        }

        CacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            by_source,
            chains,
            max_age_secs: self.max_age.as_secs(),
        }
    }

    /// Writes every live entry to `path` as JSON.
    pub fn persist(&self, path: &Path) -> Result<usize> {
        let snapshot: Vec<PersistedEntry> = self
            .entries
            .iter()
            .filter(|item| !self.is_expired(item.value()))
            .map(|item| PersistedEntry {
                key: item.key().clone(),
                entry: item.value().clone(),
            })
            .collect();

        fs::write(path, serde_json::to_vec_pretty(&snapshot)?)?;
        info!("Persisted {} prices to {}", snapshot.len(), path.display());
        Ok(snapshot.len())
    }

    /// Loads entries written by `persist`, skipping expired ones.
    pub fn load(&self, path: &Path) -> Result<usize> {
        let snapshot: Vec<PersistedEntry> = serde_json::from_slice(&fs::read(path)?)?;
        let mut loaded = 0;
        for PersistedEntry { key, entry } in snapshot {
            if self.is_expired(&entry) {
                continue;
            }
            self.entries.insert(key, entry);
            loaded += 1;
        }
        info!("Loaded {} prices from {}", loaded, path.display());
        Ok(loaded)
    }

    fn is_expired(&self, entry: &PriceCacheEntry) -> bool {
        let age = chrono::Utc::now().timestamp() - entry.cached_at;
        age > self.max_age.as_secs() as i64
    }
}
