//! On-disk CSV cache.
//!
//! Entries are flat files `<key>_<index>.csv` in one directory. Any entry for
//! a key counts as a hit for the whole key: the extractor is not called and
//! every stored page is returned as-is, ordered by index.

use crate::config::CacheKeyMode;
use crate::error::Pdf2CsvError;
use crate::pipeline::input::ResolvedInput;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Compute the cache key for an input.
///
/// [`CacheKeyMode::FileName`] hashes only the base filename, so two
/// different documents that share a name share cache entries.
pub fn cache_key(input: &ResolvedInput, mode: CacheKeyMode) -> String {
    match mode {
        CacheKeyMode::Content => {
            let mut hasher = Sha256::new();
            hasher.update(&input.bytes);
            hex::encode(hasher.finalize())
        }
        CacheKeyMode::FileName => format!("{:x}", md5::compute(input.file_name.as_bytes())),
    }
}

/// A directory of cached CSV results.
#[derive(Debug, Clone)]
pub struct CsvCache {
    dir: PathBuf,
}

impl CsvCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the entry for page `index` (0-based) under `key`.
    pub fn entry_path(&self, key: &str, index: usize) -> PathBuf {
        self.dir.join(format!("{key}_{index}.csv"))
    }

    /// Create the cache directory if it does not exist yet.
    pub async fn ensure_dir(&self) -> Result<(), Pdf2CsvError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| self.io_error(&self.dir, e))
    }

    /// Read every entry stored under `key`, ordered by index.
    ///
    /// Returns `None` when there is no entry at all.
    pub async fn load(&self, key: &str) -> Result<Option<Vec<String>>, Pdf2CsvError> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| self.io_error(&self.dir, e))?;

        let mut found: Vec<(usize, PathBuf)> = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| self.io_error(&self.dir, e))?
        {
            let name = entry.file_name();
            if let Some(index) = entry_index(&name.to_string_lossy(), key) {
                found.push((index, entry.path()));
            }
        }

        if found.is_empty() {
            debug!("Cache miss for {}", key);
            return Ok(None);
        }
        found.sort_by_key(|(index, _)| *index);

        let mut contents = Vec::with_capacity(found.len());
        for (_, path) in &found {
            let text = tokio::fs::read_to_string(path)
                .await
                .map_err(|e| self.io_error(path, e))?;
            contents.push(text);
        }

        info!("Cache hit for {}: {} entries", key, contents.len());
        Ok(Some(contents))
    }

    /// Write one entry per page. Each file is written to a temporary name
    /// and renamed into place, so a reader never sees a half-written entry.
    pub async fn store(&self, key: &str, pages: &[String]) -> Result<Vec<PathBuf>, Pdf2CsvError> {
        self.ensure_dir().await?;

        let mut written = Vec::with_capacity(pages.len());
        for (index, csv) in pages.iter().enumerate() {
            let path = self.entry_path(key, index);
            let tmp_path = path.with_extension("csv.tmp");
            tokio::fs::write(&tmp_path, csv)
                .await
                .map_err(|e| self.io_error(&tmp_path, e))?;
            tokio::fs::rename(&tmp_path, &path)
                .await
                .map_err(|e| self.io_error(&path, e))?;
            written.push(path);
        }

        debug!("Stored {} cache entries for {}", written.len(), key);
        Ok(written)
    }

    fn io_error(&self, path: &Path, source: std::io::Error) -> Pdf2CsvError {
        Pdf2CsvError::CacheIo {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// `Some(n)` when `file_name` is exactly `<key>_<n>.csv`.
fn entry_index(file_name: &str, key: &str) -> Option<usize> {
    file_name
        .strip_prefix(key)?
        .strip_prefix('_')?
        .strip_suffix(".csv")?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(name: &str, bytes: &[u8]) -> ResolvedInput {
        ResolvedInput::from_bytes(bytes.to_vec(), name)
    }

    #[test]
    fn filename_key_matches_md5_of_stem() {
        // md5("report")
        assert_eq!(
            cache_key(&input("report.pdf", b"a"), CacheKeyMode::FileName),
            "e98d2f001da5678b39482efbdf5770dc"
        );
    }

    #[test]
    fn filename_key_collides_for_same_name() {
        let a = cache_key(&input("/a/report.pdf", b"one"), CacheKeyMode::FileName);
        let b = cache_key(&input("/b/report.pdf", b"two"), CacheKeyMode::FileName);
        assert_eq!(a, b);
    }

    #[test]
    fn content_key_separates_same_name() {
        let a = cache_key(&input("report.pdf", b"one"), CacheKeyMode::Content);
        let b = cache_key(&input("report.pdf", b"two"), CacheKeyMode::Content);
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn entry_index_parsing() {
        assert_eq!(entry_index("abc_0.csv", "abc"), Some(0));
        assert_eq!(entry_index("abc_12.csv", "abc"), Some(12));
        assert_eq!(entry_index("abc_x.csv", "abc"), None);
        assert_eq!(entry_index("abcd_1.csv", "abc"), None);
        assert_eq!(entry_index("abc_1.csv.tmp", "abc"), None);
    }

    #[tokio::test]
    async fn store_then_load_in_index_order() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CsvCache::new(dir.path().join("nested/cache"));
        let pages: Vec<String> = (0..12).map(|i| format!("{i},x\n")).collect();

        cache.store("k", &pages).await.unwrap();
        let loaded = cache.load("k").await.unwrap().unwrap();

        assert_eq!(loaded, pages);
        assert!(cache.entry_path("k", 11).exists());
    }

    #[tokio::test]
    async fn missing_key_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CsvCache::new(dir.path());
        cache.store("other", &["a\n".to_string()]).await.unwrap();
        assert!(cache.load("k").await.unwrap().is_none());
    }
}
