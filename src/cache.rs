//! Explicit memoization of analysis results.
//!
//! Results are keyed by a [`Fingerprint`] of the archive bytes, the analysis
//! settings and the day the retention window is anchored on. Entries live in
//! memory and, optionally, as JSON files in a cache directory. Nothing is
//! cached implicitly: callers decide when to look up, insert and invalidate.

use crate::config::AnalysisSettings;
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Cache errors.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialize error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Content fingerprint identifying one analysis input.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Hash `input` to the end together with the settings and anchor day.
    pub fn compute<R: Read>(
        mut input: R,
        settings: &AnalysisSettings,
        anchor: NaiveDate,
    ) -> Result<Self, CacheError> {
        let mut hasher = Sha256::new();
        std::io::copy(&mut input, &mut hasher)?;
        hasher.update(b"\0settings\0");
        hasher.update(serde_json::to_vec(settings)?);
        hasher.update(b"\0anchor\0");
        hasher.update(anchor.to_string().as_bytes());
        Ok(Self(format!("{:x}", hasher.finalize())))
    }

    /// Lowercase hex digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// In-memory result cache with optional on-disk persistence.
pub struct ResultCache<T> {
    entries: HashMap<Fingerprint, T>,
    persist_dir: Option<PathBuf>,
}

impl<T> ResultCache<T>
where
    T: Serialize + DeserializeOwned,
{
    /// Create a cache that only lives as long as the value.
    pub fn in_memory() -> Self {
        Self {
            entries: HashMap::new(),
            persist_dir: None,
        }
    }

    /// Create a cache that also reads and writes `dir`.
    pub fn with_persistence(dir: impl Into<PathBuf>) -> Self {
        Self {
            entries: HashMap::new(),
            persist_dir: Some(dir.into()),
        }
    }

    /// Look up a result, loading it from disk if necessary.
    pub fn get(&mut self, key: &Fingerprint) -> Option<&T> {
        if !self.entries.contains_key(key) {
            let loaded = self.load(key)?;
            self.entries.insert(key.clone(), loaded);
        }
        self.entries.get(key)
    }

    /// Store a result.
    pub fn insert(&mut self, key: Fingerprint, value: T) -> Result<(), CacheError> {
        if let Some(path) = self.entry_path(&key) {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, serde_json::to_vec(&value)?)?;
            tracing::debug!(path = %path.display(), "cached analysis result");
        }
        self.entries.insert(key, value);
        Ok(())
    }

    /// Drop one entry. Returns whether anything was removed.
    pub fn invalidate(&mut self, key: &Fingerprint) -> Result<bool, CacheError> {
        let mut removed = self.entries.remove(key).is_some();
        if let Some(path) = self.entry_path(key) {
            if path.exists() {
                std::fs::remove_file(&path)?;
                removed = true;
            }
        }
        Ok(removed)
    }

    /// Drop every entry, in memory and on disk. Returns the number of
    /// persisted files removed.
    pub fn clear(&mut self) -> Result<usize, CacheError> {
        self.entries.clear();
        let Some(dir) = self.persist_dir.as_deref() else {
            return Ok(0);
        };
        if !dir.exists() {
            return Ok(0);
        }

        let mut removed = 0;
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if is_cache_file(&path) {
                std::fs::remove_file(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Number of entries held in memory.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry_path(&self, key: &Fingerprint) -> Option<PathBuf> {
        self.persist_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.json", key.as_str())))
    }

    fn load(&self, key: &Fingerprint) -> Option<T> {
        let path = self.entry_path(key)?;
        let content = std::fs::read(&path).ok()?;
        match serde_json::from_slice(&content) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable cache entry");
                None
            }
        }
    }
}

fn is_cache_file(path: &Path) -> bool {
    path.is_file() && path.extension().is_some_and(|ext| ext == "json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn anchor() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    fn key(bytes: &[u8], settings: &AnalysisSettings) -> Fingerprint {
        Fingerprint::compute(Cursor::new(bytes), settings, anchor()).unwrap()
    }

    #[test]
    fn test_fingerprint_depends_on_inputs() {
        let settings = AnalysisSettings::default();
        let base = key(b"archive", &settings);

        assert_eq!(base, key(b"archive", &settings));
        assert_eq!(base.as_str().len(), 64);
        assert_ne!(base, key(b"archive2", &settings));

        let other_settings = AnalysisSettings {
            window_days: 7,
            ..AnalysisSettings::default()
        };
        assert_ne!(base, key(b"archive", &other_settings));

        let next_day = Fingerprint::compute(
            Cursor::new(b"archive"),
            &settings,
            anchor().succ_opt().unwrap(),
        )
        .unwrap();
        assert_ne!(base, next_day);
    }

    #[test]
    fn test_in_memory_cache() {
        let settings = AnalysisSettings::default();
        let mut cache: ResultCache<Vec<u32>> = ResultCache::in_memory();
        let k = key(b"a", &settings);

        assert!(cache.get(&k).is_none());
        cache.insert(k.clone(), vec![1, 2, 3]).unwrap();
        assert_eq!(cache.get(&k), Some(&vec![1, 2, 3]));
        assert!(cache.get(&key(b"b", &settings)).is_none());

        assert!(cache.invalidate(&k).unwrap());
        assert!(cache.get(&k).is_none());
        assert!(!cache.invalidate(&k).unwrap());
    }

    #[test]
    fn test_persisted_entries_survive() {
        let dir = tempfile::tempdir().unwrap();
        let settings = AnalysisSettings::default();
        let k = key(b"a", &settings);

        {
            let mut cache: ResultCache<String> = ResultCache::with_persistence(dir.path());
            cache.insert(k.clone(), "result".to_string()).unwrap();
        }

        let mut cache: ResultCache<String> = ResultCache::with_persistence(dir.path());
        assert!(cache.is_empty());
        assert_eq!(cache.get(&k).map(String::as_str), Some("result"));

        cache.insert(key(b"b", &settings), "other".to_string()).unwrap();
        assert_eq!(cache.clear().unwrap(), 2);
        assert!(cache.get(&k).is_none());
    }

    #[test]
    fn test_corrupt_entry_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let k = key(b"a", &AnalysisSettings::default());
        std::fs::write(dir.path().join(format!("{k}.json")), b"{not json").unwrap();

        let mut cache: ResultCache<String> = ResultCache::with_persistence(dir.path());
        assert!(cache.get(&k).is_none());
    }
}
