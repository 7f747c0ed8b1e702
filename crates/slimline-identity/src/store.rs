//! Persisted mapping between original and replacement content hashes.
//!
//! # Design
//!
//! - The whole relation lives in memory behind an `RwLock`; rewrites only take the read
//!   side. Both directions are indexed so lookups are O(1) either way.
//! - The backing file is append-only text, one `<replacement>,<original>` record per line.
//!   A record is written and synced before it becomes visible to readers.
//! - Loading is forgiving: malformed lines (including a torn final line after a crash)
//!   are skipped with a warning and never abort startup.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard};

use tracing::{debug, warn};

use crate::error::{IdentityError, IdentityResult};
use crate::hash::ContentHash;

/// One substitution: the upstream stores `replacement` where the client uploaded `original`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashPair {
    /// Hash of the converted file the upstream actually holds.
    pub replacement: ContentHash,
    /// Hash of the file the client sent.
    pub original: ContentHash,
}

/// Shared handle to the hash identity store.
#[derive(Clone)]
pub struct HashStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    path: PathBuf,
    maps: RwLock<Maps>,
    writer: Mutex<File>,
}

#[derive(Default)]
pub(crate) struct Maps {
    by_replacement: HashMap<ContentHash, ContentHash>,
    by_original: HashMap<ContentHash, ContentHash>,
}

impl Maps {
    pub(crate) fn original_for(&self, replacement: &str) -> Option<&ContentHash> {
        self.by_replacement.get(replacement)
    }

    pub(crate) fn replacement_for(&self, original: &str) -> Option<&ContentHash> {
        self.by_original.get(original)
    }

    fn contains(&self, pair: &HashPair) -> bool {
        self.by_replacement.get(&pair.replacement) == Some(&pair.original)
    }

    fn insert(&mut self, pair: HashPair) {
        self.by_original
            .insert(pair.original.clone(), pair.replacement.clone());
        self.by_replacement.insert(pair.replacement, pair.original);
    }
}

impl HashStore {
    /// Open (or create) the store at `path` and load every readable record.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Io`] when the parent directory cannot be created or the
    /// file cannot be read or opened for appending.
    pub fn open(path: impl Into<PathBuf>) -> IdentityResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|err| IdentityError::io("store.create_dir", parent, err))?;
        }

        let existing = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(IdentityError::io("store.read", &path, err)),
        };
        let maps = load_records(&path, &existing);

        let mut writer = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|err| IdentityError::io("store.open", &path, err))?;
        if existing.last().is_some_and(|last| *last != b'\n') {
            warn!(path = %path.display(), "terminating torn final record");
            writer
                .write_all(b"\n")
                .and_then(|()| writer.sync_data())
                .map_err(|err| IdentityError::io("store.repair", &path, err))?;
        }

        debug!(
            path = %path.display(),
            records = maps.by_replacement.len(),
            "loaded hash identity store"
        );
        Ok(Self {
            inner: Arc::new(StoreInner {
                path,
                maps: RwLock::new(maps),
                writer: Mutex::new(writer),
            }),
        })
    }

    /// Persist `pair` and make it visible to lookups.
    ///
    /// Returns `false` when the exact pair was already known and nothing was written.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Io`] when the append or sync fails; the pair is then not
    /// visible to lookups.
    pub async fn record(&self, pair: HashPair) -> IdentityResult<bool> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || inner.append(pair))
            .await
            .map_err(|source| IdentityError::Join { source })?
    }

    /// Original hash for a hash the upstream reports, if it was substituted.
    #[must_use]
    pub fn original_for(&self, replacement: &str) -> Option<ContentHash> {
        self.maps().original_for(replacement).cloned()
    }

    /// Replacement hash recorded for an original upload.
    #[must_use]
    pub fn replacement_for(&self, original: &str) -> Option<ContentHash> {
        self.maps().replacement_for(original).cloned()
    }

    /// Number of recorded pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.maps().by_replacement.len()
    }

    /// Whether no substitutions are known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub(crate) fn maps(&self) -> RwLockReadGuard<'_, Maps> {
        self.inner
            .maps
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl StoreInner {
    fn append(&self, pair: HashPair) -> IdentityResult<bool> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        if self
            .maps
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&pair)
        {
            return Ok(false);
        }

        let line = format!("{},{}\n", pair.replacement, pair.original);
        writer
            .write_all(line.as_bytes())
            .and_then(|()| writer.sync_data())
            .map_err(|err| IdentityError::io("store.append", &self.path, err))?;

        self.maps
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(pair);
        Ok(true)
    }
}

fn load_records(path: &Path, contents: &[u8]) -> Maps {
    let mut maps = Maps::default();
    for (index, raw) in contents.split(|byte| *byte == b'\n').enumerate() {
        if raw.is_empty() {
            continue;
        }
        match parse_record(raw) {
            Ok(pair) => maps.insert(pair),
            Err(reason) => warn!(
                path = %path.display(),
                line = index + 1,
                reason,
                "skipping unreadable hash record"
            ),
        }
    }
    maps
}

fn parse_record(raw: &[u8]) -> Result<HashPair, &'static str> {
    let line = std::str::from_utf8(raw).map_err(|_| "not_utf8")?;
    let line = line.trim_end_matches('\r');
    let (replacement, original) = line.split_once(',').ok_or("missing_separator")?;
    let replacement = ContentHash::parse(replacement.trim()).map_err(|_| "bad_replacement")?;
    let original = ContentHash::parse(original.trim()).map_err(|_| "bad_original")?;
    Ok(HashPair {
        replacement,
        original,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(replacement: &[u8], original: &[u8]) -> HashPair {
        HashPair {
            replacement: ContentHash::of_bytes(replacement),
            original: ContentHash::of_bytes(original),
        }
    }

    #[tokio::test]
    async fn records_survive_reopen() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("state").join("checksums.csv");
        let store = HashStore::open(&path)?;
        assert!(store.is_empty());

        let pairs: Vec<HashPair> = (0..5_u8)
            .map(|n| pair(&[n, 1], &[n, 2]))
            .collect();
        for item in &pairs {
            assert!(store.record(item.clone()).await?);
        }
        drop(store);

        let reopened = HashStore::open(&path)?;
        assert_eq!(reopened.len(), 5);
        for item in &pairs {
            assert_eq!(
                reopened.original_for(item.replacement.as_str()),
                Some(item.original.clone())
            );
            assert_eq!(
                reopened.replacement_for(item.original.as_str()),
                Some(item.replacement.clone())
            );
        }
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_pairs_are_not_rewritten() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("checksums.csv");
        let store = HashStore::open(&path)?;
        let item = pair(b"small", b"large");
        assert!(store.record(item.clone()).await?);
        assert!(!store.record(item).await?);
        assert_eq!(fs::read_to_string(&path)?.lines().count(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn corrupt_and_torn_lines_are_skipped() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("checksums.csv");
        let good = pair(b"a", b"b");
        let contents = format!(
            "{},{}\nnot a record\n{},tooshort=\n{},{}",
            good.replacement,
            good.original,
            good.replacement,
            good.original,
            &good.original.as_str()[..10],
        );
        fs::write(&path, contents)?;

        let store = HashStore::open(&path)?;
        assert_eq!(store.len(), 1);
        assert_eq!(
            store.original_for(good.replacement.as_str()),
            Some(good.original.clone())
        );

        let next = pair(b"c", b"d");
        store.record(next.clone()).await?;
        drop(store);

        let reopened = HashStore::open(&path)?;
        assert_eq!(reopened.len(), 2);
        assert_eq!(
            reopened.original_for(next.replacement.as_str()),
            Some(next.original)
        );
        Ok(())
    }

    #[test]
    fn parse_record_reports_reasons() {
        assert_eq!(parse_record(b"no-comma"), Err("missing_separator"));
        assert_eq!(parse_record(&[0xff, b',']), Err("not_utf8"));
        let good = pair(b"x", b"y");
        let line = format!("{},{}\r", good.replacement, good.original);
        assert_eq!(parse_record(line.as_bytes()), Ok(good));
    }
}
