//! A single-writer sink that buffers in memory until it exceeds a size threshold, then
//! switches to a file-backed mode for the remainder. Callers see one `write` interface
//! regardless of which mode it ends in.

use super::Payload;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::Builder;
use tokio::io::AsyncWriteExt;

/// Owns a temp file on disk; unlinks it when the last reference is dropped.
pub struct SpillFile {
    path: PathBuf,
}

impl SpillFile {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SpillFile {
    fn drop(&mut self) {
        let path = self.path.clone();
        // Dropped from both sync and async contexts; removing via std keeps this fn
        // synchronous so Drop doesn't need a runtime handle.
        let _ = std::fs::remove_file(path);
    }
}

pub struct SpillWriter {
    buffer: Vec<u8>,
    file: Option<(tokio::fs::File, PathBuf)>,
    max_in_memory: u64,
    written: u64,
    temp_dir: PathBuf,
}

impl SpillWriter {
    pub fn new(max_in_memory: u64, temp_dir: PathBuf) -> Self {
        Self { buffer: Vec::new(), file: None, max_in_memory, written: 0, temp_dir }
    }

    pub async fn write(&mut self, chunk: &[u8]) -> std::io::Result<()> {
        if let Some((file, _)) = &mut self.file {
            file.write_all(chunk).await?;
            self.written += chunk.len() as u64;
            return Ok(());
        }

        if self.max_in_memory > 0 && self.buffer.len() as u64 + chunk.len() as u64 > self.max_in_memory {
            tokio::fs::create_dir_all(&self.temp_dir).await?;
            // Atomically creates a uniquely-named file; a nanosecond timestamp can collide
            // under concurrent spills and `File::create` would silently truncate the loser.
            let named = Builder::new().prefix("apl-fs-spill-").tempfile_in(&self.temp_dir)?;
            let (std_file, temp_path) = named.into_parts();
            let path = temp_path.keep().map_err(|e| e.error)?;
            let mut file = tokio::fs::File::from_std(std_file);
            file.write_all(&self.buffer).await?;
            file.write_all(chunk).await?;
            self.written = self.buffer.len() as u64 + chunk.len() as u64;
            self.buffer.clear();
            self.file = Some((file, path));
        } else {
            self.buffer.extend_from_slice(chunk);
            self.written += chunk.len() as u64;
        }
        Ok(())
    }

    pub async fn finish(mut self) -> std::io::Result<Payload> {
        if let Some((mut file, path)) = self.file.take() {
            file.flush().await?;
            Ok(Payload::File { file: Arc::new(SpillFile { path }), size: self.written })
        } else {
            Ok(Payload::Bytes(Arc::new(self.buffer)))
        }
    }
}
