//! Named, user-writable slots holding raw APL text, persisted as individual `.apl` files.
//! The directory is the source of truth; the store itself only validates names and
//! serializes access.

use std::path::{Path, PathBuf};
use tempfile::Builder;
use tokio::sync::Mutex;

const NAME_MAX_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    InvalidName(String),
    Io(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidName(name) => write!(f, "invalid slot name: {name}"),
            Error::Io(s) => write!(f, "i/o error: {s}"),
        }
    }
}

impl std::error::Error for Error {}

/// Validates a slot name against `[A-Za-z0-9._-]{1,64}`, rejecting path separators and `..`.
pub fn validate_name(name: &str) -> Result<(), Error> {
    let valid_len = !name.is_empty() && name.len() <= NAME_MAX_LEN;
    let valid_chars = name.chars().all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-');
    if valid_len && valid_chars && name != ".." {
        Ok(())
    } else {
        Err(Error::InvalidName(name.to_string()))
    }
}

/// Serializes reads/writes against the on-disk `.apl` slots under `dir`.
pub struct QueryStore {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl QueryStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir, lock: Mutex::new(()) }
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.apl"))
    }

    pub async fn list(&self) -> Result<Vec<String>, Error> {
        let _guard = self.lock.lock().await;
        let mut names = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(Error::Io(e.to_string())),
        };
        while let Some(entry) = entries.next_entry().await.map_err(|e| Error::Io(e.to_string()))? {
            if let Some(stem) = entry.path().file_stem().and_then(|s| s.to_str()) {
                if entry.path().extension().and_then(|e| e.to_str()) == Some("apl") {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    pub async fn exists(&self, name: &str) -> Result<bool, Error> {
        validate_name(name)?;
        let _guard = self.lock.lock().await;
        Ok(tokio::fs::metadata(self.path_for(name)).await.is_ok())
    }

    pub async fn read(&self, name: &str) -> Result<Vec<u8>, Error> {
        validate_name(name)?;
        let _guard = self.lock.lock().await;
        match tokio::fs::read(self.path_for(name)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(Error::Io(e.to_string())),
        }
    }

    /// Overwrites the slot's entire contents (the adapter accumulates offset writes into
    /// a whole-file buffer before calling this, matching `apl`'s write semantics).
    pub async fn write_whole(&self, name: &str, contents: &[u8]) -> Result<(), Error> {
        validate_name(name)?;
        let _guard = self.lock.lock().await;
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| Error::Io(e.to_string()))?;
        let path = self.path_for(name);
        // An OS-provided unique name avoids two concurrent writers to the same slot
        // colliding on a shared temp path and truncating each other's write.
        let named = Builder::new().prefix(&format!(".tmp-{name}-")).tempfile_in(&self.dir).map_err(|e| Error::Io(e.to_string()))?;
        let (_file, temp_path) = named.into_parts();
        let tmp = temp_path.keep().map_err(|e| Error::Io(e.error.to_string()))?;
        tokio::fs::write(&tmp, contents).await.map_err(|e| Error::Io(e.to_string()))?;
        tokio::fs::rename(&tmp, &path).await.map_err(|e| Error::Io(e.to_string()))
    }

    /// Truncates the slot to zero bytes (a size-zero `SETATTR` on `apl`).
    pub async fn truncate(&self, name: &str) -> Result<(), Error> {
        self.write_whole(name, &[]).await
    }

    pub async fn remove(&self, name: &str) -> Result<(), Error> {
        validate_name(name)?;
        let _guard = self.lock.lock().await;
        match tokio::fs::remove_file(self.path_for(name)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(e.to_string())),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_validation() {
        assert!(validate_name("demo").is_ok());
        assert!(validate_name("demo.v2").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("..").is_err());
        assert!(validate_name("a/b").is_err());
        assert!(validate_name(&"a".repeat(65)).is_err());
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = QueryStore::new(dir.path().to_path_buf());
        store.write_whole("demo", b"['logs'] | take 5").await.unwrap();
        assert_eq!(store.read("demo").await.unwrap(), b"['logs'] | take 5");
    }

    #[tokio::test]
    async fn truncate_yields_zero_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let store = QueryStore::new(dir.path().to_path_buf());
        store.write_whole("demo", b"hello").await.unwrap();
        store.truncate("demo").await.unwrap();
        assert_eq!(store.read("demo").await.unwrap(), Vec::<u8>::new());
    }

    #[tokio::test]
    async fn read_of_unknown_slot_is_empty_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = QueryStore::new(dir.path().to_path_buf());
        assert_eq!(store.read("nope").await.unwrap(), Vec::<u8>::new());
    }

    #[tokio::test]
    async fn list_reflects_written_slots() {
        let dir = tempfile::tempdir().unwrap();
        let store = QueryStore::new(dir.path().to_path_buf());
        store.write_whole("b", b"1").await.unwrap();
        store.write_whole("a", b"2").await.unwrap();
        assert_eq!(store.list().await.unwrap(), vec!["a".to_string(), "b".to_string()]);
    }
}
