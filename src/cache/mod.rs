//! Keyed byte store with TTL and insertion-order (FIFO, not LRU) eviction, with an
//! optional disk mirror for entries that overflow the in-memory store's lifetime.

use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use tempfile::Builder;
use tokio::sync::Mutex;
use tracing::{debug, warn};

struct Entry {
    bytes: Vec<u8>,
    expires_at: Option<Instant>,
}

/// Configuration for a [`Cache`]. Zero/`None` disables the corresponding limit.
#[derive(Debug, Clone)]
pub struct Config {
    pub ttl: Option<Duration>,
    pub max_entries: Option<usize>,
    pub max_bytes: Option<u64>,
    pub disk_dir: Option<PathBuf>,
}

struct State {
    entries: HashMap<String, Entry>,
    order: VecDeque<String>,
    total_bytes: u64,
}

/// A single-mutex, FIFO-eviction byte cache with an optional hashed-filename disk mirror.
pub struct Cache {
    config: Config,
    state: Mutex<State>,
}

impl Cache {
    pub fn new(config: Config) -> Self {
        Self { config, state: Mutex::new(State { entries: HashMap::new(), order: VecDeque::new(), total_bytes: 0 }) }
    }

    /// Looks up `key`, consulting the disk mirror on a memory miss.
    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        {
            let mut state = self.state.lock().await;
            if let Some(entry) = state.entries.get(key) {
                if let Some(expires_at) = entry.expires_at {
                    if Instant::now() >= expires_at {
                        let bytes_len = entry.bytes.len() as u64;
                        state.entries.remove(key);
                        state.order.retain(|k| k != key);
                        state.total_bytes = state.total_bytes.saturating_sub(bytes_len);
                        debug!(key, "cache entry expired");
                    } else {
                        debug!(key, "cache hit");
                        return Some(entry.bytes.clone());
                    }
                } else {
                    debug!(key, "cache hit");
                    return Some(entry.bytes.clone());
                }
            }
        }
        self.get_from_disk(key).await
    }

    /// Inserts `value` under `key`, evicting the oldest entries until the configured
    /// count/byte caps hold again.
    pub async fn set(&self, key: &str, value: Vec<u8>) {
        let mut state = self.state.lock().await;
        if let Some(old) = state.entries.remove(key) {
            state.total_bytes = state.total_bytes.saturating_sub(old.bytes.len() as u64);
            state.order.retain(|k| k != key);
        }

        let expires_at = self.config.ttl.filter(|d| !d.is_zero()).map(|d| Instant::now() + d);
        state.total_bytes += value.len() as u64;
        state.order.push_back(key.to_string());
        state.entries.insert(key.to_string(), Entry { bytes: value.clone(), expires_at });

        while Self::over_capacity(&self.config, &state) {
            if let Some(oldest) = state.order.pop_front() {
                if let Some(entry) = state.entries.remove(&oldest) {
                    state.total_bytes = state.total_bytes.saturating_sub(entry.bytes.len() as u64);
                }
            } else {
                break;
            }
        }
        drop(state);

        self.set_on_disk(key, &value).await;
    }

    fn over_capacity(config: &Config, state: &State) -> bool {
        let over_count = config.max_entries.map(|max| max > 0 && state.entries.len() > max).unwrap_or(false);
        let over_bytes = config.max_bytes.map(|max| max > 0 && state.total_bytes > max).unwrap_or(false);
        over_count || over_bytes
    }

    fn disk_path(&self, key: &str) -> Option<PathBuf> {
        let dir = self.config.disk_dir.as_ref()?;
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        let hash = hasher.finalize();
        Some(dir.join(hex::encode(hash)))
    }

    async fn get_from_disk(&self, key: &str) -> Option<Vec<u8>> {
        let path = self.disk_path(key)?;
        let meta = tokio::fs::metadata(&path).await.ok()?;
        if let Some(ttl) = self.config.ttl.filter(|d| !d.is_zero()) {
            let mtime = meta.modified().ok()?;
            if SystemTime::now().duration_since(mtime).unwrap_or(Duration::MAX) > ttl {
                let _ = tokio::fs::remove_file(&path).await;
                return None;
            }
        }
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let now = SystemTime::now();
                let _ = filetime_touch(&path, now).await;
                debug!(key, "disk cache hit");
                Some(bytes)
            }
            Err(err) => {
                warn!(key, %err, "disk cache read failed");
                None
            }
        }
    }

    async fn set_on_disk(&self, key: &str, value: &[u8]) {
        let Some(path) = self.disk_path(key) else { return };
        if let Some(max) = self.config.max_bytes {
            if max > 0 && value.len() as u64 > max {
                return;
            }
        }
        if let Err(err) = write_atomic(&path, value).await {
            warn!(key, %err, "disk cache write failed, continuing without it");
            return;
        }
        self.evict_disk().await;
    }

    async fn evict_disk(&self) {
        let Some(dir) = &self.config.disk_dir else { return };
        let mut files: Vec<(PathBuf, SystemTime)> = Vec::new();
        let mut read_dir = match tokio::fs::read_dir(dir).await {
            Ok(rd) => rd,
            Err(_) => return,
        };
        while let Ok(Some(entry)) = read_dir.next_entry().await {
            let path = entry.path();
            if path.extension().is_some() {
                continue;
            }
            if let Ok(meta) = entry.metadata().await {
                let ttl = self.config.ttl.filter(|d| !d.is_zero());
                let mtime = meta.modified().ok();
                if let (Some(ttl), Some(mtime)) = (ttl, mtime) {
                    if SystemTime::now().duration_since(mtime).unwrap_or(Duration::ZERO) > ttl {
                        let _ = tokio::fs::remove_file(&path).await;
                        continue;
                    }
                }
                if let Some(mtime) = mtime {
                    files.push((path, mtime));
                }
            }
        }
        files.sort_by_key(|(_, mtime)| *mtime);

        let max_entries = self.config.max_entries.filter(|m| *m > 0);
        let max_bytes = self.config.max_bytes.filter(|m| *m > 0);
        if max_entries.is_none() && max_bytes.is_none() {
            return;
        }
        let mut total: u64 = 0;
        for (path, _) in &files {
            if let Ok(meta) = tokio::fs::metadata(path).await {
                total += meta.len();
            }
        }
        let mut count = files.len();
        let mut idx = 0;
        while idx < files.len() {
            let exceeds_count = max_entries.map(|max| count > max).unwrap_or(false);
            let exceeds_bytes = max_bytes.map(|max| total > max).unwrap_or(false);
            if !exceeds_count && !exceeds_bytes {
                break;
            }
            let (path, _) = &files[idx];
            if let Ok(meta) = tokio::fs::metadata(path).await {
                total = total.saturating_sub(meta.len());
            }
            let _ = tokio::fs::remove_file(path).await;
            count -= 1;
            idx += 1;
        }
    }
}

async fn filetime_touch(path: &Path, _now: SystemTime) -> std::io::Result<()> {
    let bytes = tokio::fs::read(path).await?;
    write_atomic(path, &bytes).await
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "no parent dir"))?;
    tokio::fs::create_dir_all(dir).await?;
    // OS-guaranteed-unique name: a nanosecond stamp can collide between two concurrent
    // touches of entries landing in the same mirror dir, truncating one writer's bytes.
    let named = Builder::new().prefix(".tmp-").tempfile_in(dir)?;
    let (_file, temp_path) = named.into_parts();
    let tmp = temp_path.keep().map_err(|e| e.error)?;
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await
}

mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{b:02x}")).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(max_entries: Option<usize>) -> Cache {
        Cache::new(Config { ttl: None, max_entries, max_bytes: None, disk_dir: None })
    }

    #[tokio::test]
    async fn fifo_eviction_by_count() {
        let c = cache(Some(3));
        c.set("a", b"1".to_vec()).await;
        c.set("b", b"1".to_vec()).await;
        c.set("c", b"1".to_vec()).await;
        c.set("d", b"1".to_vec()).await;

        assert!(c.get("a").await.is_none());
        assert!(c.get("d").await.is_some());
        assert!(c.get("b").await.is_some());
        assert!(c.get("c").await.is_some());
    }

    #[tokio::test]
    async fn reinsert_moves_to_tail() {
        let c = cache(Some(2));
        c.set("a", b"1".to_vec()).await;
        c.set("b", b"1".to_vec()).await;
        c.set("a", b"2".to_vec()).await;
        c.set("c", b"1".to_vec()).await;

        assert!(c.get("b").await.is_none());
        assert_eq!(c.get("a").await, Some(b"2".to_vec()));
        assert!(c.get("c").await.is_some());
    }

    #[tokio::test]
    async fn zero_ttl_means_no_expiry() {
        let c = Cache::new(Config { ttl: Some(Duration::ZERO), max_entries: None, max_bytes: None, disk_dir: None });
        c.set("a", b"1".to_vec()).await;
        assert!(c.get("a").await.is_some());
    }

    #[tokio::test]
    async fn disk_mirror_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let c = Cache::new(Config { ttl: None, max_entries: None, max_bytes: None, disk_dir: Some(dir.path().to_path_buf()) });
        c.set("k", b"hello".to_vec()).await;
        // force a memory miss by constructing a fresh cache pointed at the same dir
        let c2 = Cache::new(Config { ttl: None, max_entries: None, max_bytes: None, disk_dir: Some(dir.path().to_path_buf()) });
        assert_eq!(c2.get("k").await, Some(b"hello".to_vec()));
    }
}
