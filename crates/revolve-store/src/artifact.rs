// crates/revolve-store/src/artifact.rs
// ============================================================================
// Module: Filesystem Artifact Store
// Description: Atomic write-temp-rename artifact store over a local
// directory tree.
// Purpose: Implement C1 (Artifact Store) for every component above it.
// Dependencies: revolve-core, tracing
// ============================================================================

//! ## Overview
//! [`FsArtifactStore`] writes every key under a configured root directory.
//! A `put` writes to a temporary sibling file, fsyncs it, then renames it
//! over the destination — so a reader never observes a partial write, even
//! if the process is killed mid-write. `append` opens the destination in
//! append mode, which is atomic for writes below the platform's pipe-buffer
//! size and is how the Trace Store's event logs accumulate entries.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::fs::OpenOptions;
use std::io::Read as _;
use std::io::Seek as _;
use std::io::SeekFrom;
use std::io::Write as _;
use std::path::Path;
use std::path::PathBuf;

use revolve_core::ArtifactStore;
use revolve_core::StoreError;

// ============================================================================
// SECTION: FsArtifactStore
// ============================================================================

/// A filesystem-backed [`ArtifactStore`] rooted at a configured directory.
///
/// # Invariants
/// - Every key is validated to contain no `..` segments before touching the
///   filesystem.
/// - `put` is atomic: write-temp, fsync, rename-over-destination.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    /// Opens (creating if absent) an artifact store rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if `root` cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| StoreError::Io {
            key: root.display().to_string(),
            source,
        })?;
        Ok(Self { root })
    }

    /// Returns the root directory this store is rooted at.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, StoreError> {
        if key.split('/').any(|segment| segment == "..") || key.is_empty() {
            return Err(StoreError::InvalidKey {
                key: key.to_string(),
                reason: "keys must be non-empty and contain no '..' segments",
            });
        }
        Ok(self.root.join(key))
    }
}

impl ArtifactStore for FsArtifactStore {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<String, StoreError> {
        let destination = self.resolve(key)?;
        let parent = destination.parent().unwrap_or(&self.root);
        fs::create_dir_all(parent).map_err(|source| StoreError::Io {
            key: key.to_string(),
            source,
        })?;

        let temp_path = parent.join(format!(
            ".{}.tmp",
            destination.file_name().map(|name| name.to_string_lossy()).unwrap_or_default()
        ));
        let mut temp_file = fs::File::create(&temp_path).map_err(|source| StoreError::Io {
            key: key.to_string(),
            source,
        })?;
        temp_file.write_all(bytes).map_err(|source| StoreError::Io {
            key: key.to_string(),
            source,
        })?;
        temp_file.sync_all().map_err(|source| StoreError::Io {
            key: key.to_string(),
            source,
        })?;
        drop(temp_file);

        fs::rename(&temp_path, &destination).map_err(|source| StoreError::Io {
            key: key.to_string(),
            source,
        })?;
        tracing::debug!(key, bytes = bytes.len(), "artifact store put");
        Ok(destination.display().to_string())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.resolve(key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }

    fn append(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let destination = self.resolve(key)?;
        let parent = destination.parent().unwrap_or(&self.root);
        fs::create_dir_all(parent).map_err(|source| StoreError::Io {
            key: key.to_string(),
            source,
        })?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&destination)
            .map_err(|source| StoreError::Io {
                key: key.to_string(),
                source,
            })?;
        file.write_all(bytes).map_err(|source| StoreError::Io {
            key: key.to_string(),
            source,
        })?;
        file.sync_all().map_err(|source| StoreError::Io {
            key: key.to_string(),
            source,
        })?;
        tracing::debug!(key, bytes = bytes.len(), "artifact store append");
        Ok(())
    }

    fn len(&self, key: &str) -> Result<Option<u64>, StoreError> {
        let path = self.resolve(key)?;
        match fs::metadata(&path) {
            Ok(metadata) => Ok(Some(metadata.len())),
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }

    fn get_from(&self, key: &str, offset: u64) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.resolve(key)?;
        let mut file = match fs::File::open(&path) {
            Ok(file) => file,
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StoreError::Io {
                    key: key.to_string(),
                    source,
                });
            }
        };
        file.seek(SeekFrom::Start(offset)).map_err(|source| StoreError::Io {
            key: key.to_string(),
            source,
        })?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes).map_err(|source| StoreError::Io {
            key: key.to_string(),
            source,
        })?;
        Ok(Some(bytes))
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "test-only helpers may panic on unexpected input"
)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsArtifactStore::open(dir.path()).expect("open");
        store.put("run_records/run-1.json", b"{\"x\":1}").expect("put");
        let bytes = store.get("run_records/run-1.json").expect("get").expect("present");
        assert_eq!(bytes, b"{\"x\":1}");
    }

    #[test]
    fn get_on_absent_key_is_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsArtifactStore::open(dir.path()).expect("open");
        assert!(store.get("nope").expect("get").is_none());
    }

    #[test]
    fn append_accumulates_lines() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsArtifactStore::open(dir.path()).expect("open");
        store.append("events/run-1.jsonl", b"{\"a\":1}\n").expect("append");
        store.append("events/run-1.jsonl", b"{\"a\":2}\n").expect("append");
        let bytes = store.get("events/run-1.jsonl").expect("get").expect("present");
        assert_eq!(bytes, b"{\"a\":1}\n{\"a\":2}\n");
    }

    #[test]
    fn rejects_parent_directory_traversal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsArtifactStore::open(dir.path()).expect("open");
        let result = store.put("../escape.json", b"{}");
        assert!(matches!(result, Err(StoreError::InvalidKey { .. })));
    }

    #[test]
    fn put_overwrites_previous_value_atomically() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsArtifactStore::open(dir.path()).expect("open");
        store.put("k.json", b"first").expect("put");
        store.put("k.json", b"second").expect("put");
        let bytes = store.get("k.json").expect("get").expect("present");
        assert_eq!(bytes, b"second");
    }

    #[test]
    fn len_reports_byte_size_without_requiring_a_read() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsArtifactStore::open(dir.path()).expect("open");
        assert_eq!(store.len("nope").expect("len"), None);
        store.append("events/run-1.jsonl", b"{\"a\":1}\n").expect("append");
        assert_eq!(store.len("events/run-1.jsonl").expect("len"), Some(8));
    }

    #[test]
    fn get_from_skips_already_consumed_bytes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsArtifactStore::open(dir.path()).expect("open");
        store.append("events/run-1.jsonl", b"{\"a\":1}\n").expect("append");
        let offset = store.len("events/run-1.jsonl").expect("len").expect("present");
        store.append("events/run-1.jsonl", b"{\"a\":2}\n").expect("append");
        let tail = store.get_from("events/run-1.jsonl", offset).expect("get_from").expect("present");
        assert_eq!(tail, b"{\"a\":2}\n");
    }
}
