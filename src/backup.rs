//! Content-addressed backup store: `<root>/backups/<op_id>[_<basename>][.gz]`.
//!
//! `put` is atomic (temp file + rename); files above the compression threshold are
//! stored gzipped. Retention `sweep` deletes backups older than the retention window.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use flate2::Compression;
use flate2::write::GzEncoder;

use crate::error::{Result, SubstrateError};

/// A reference to a stored backup blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupRef {
    pub op_id: String,
    pub path: PathBuf,
    pub compressed: bool,
}

pub struct BackupStore {
    root: PathBuf,
}

/// Result of a retention sweep.
#[derive(Debug, Default, Clone, Copy)]
pub struct SweepStats {
    pub removed: usize,
    pub bytes_freed: u64,
}

impl BackupStore {
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root: root.join("backups") }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.root
    }

    /// Store `source_path`'s current bytes under `op_id`, gzip-compressing when the
    /// file exceeds `compress_if_larger_than` bytes.
    pub fn put(&self, op_id: &str, source_path: &Path, compress_if_larger_than: u64) -> Result<BackupRef> {
        fs::create_dir_all(&self.root)
            .map_err(|source| SubstrateError::PermissionDenied { path: self.root.clone(), source })?;

        let basename = source_path.file_name().and_then(|n| n.to_str()).unwrap_or("file");
        let size = fs::metadata(source_path).map(|m| m.len()).unwrap_or(0);
        let compress = size > compress_if_larger_than;

        let final_name = if compress { format!("{op_id}_{basename}.gz") } else { format!("{op_id}_{basename}") };
        let final_path = self.root.join(&final_name);
        let tmp_path = self.root.join(format!(".tmp-{op_id}-{}", uuid::Uuid::new_v4()));

        let mut input = File::open(source_path)
            .map_err(|source| SubstrateError::PermissionDenied { path: source_path.to_path_buf(), source })?;

        {
            let tmp_file = File::create(&tmp_path)
                .map_err(|source| SubstrateError::PermissionDenied { path: tmp_path.clone(), source })?;
            if compress {
                let mut encoder = GzEncoder::new(tmp_file, Compression::default());
                std::io::copy(&mut input, &mut encoder).map_err(|source| SubstrateError::BackupFailed {
                    op_id: op_id.to_string(),
                    source: source.to_string(),
                })?;
                encoder.finish().map_err(|source| SubstrateError::BackupFailed {
                    op_id: op_id.to_string(),
                    source: source.to_string(),
                })?;
            } else {
                let mut writer = tmp_file;
                std::io::copy(&mut input, &mut writer).map_err(|source| SubstrateError::BackupFailed {
                    op_id: op_id.to_string(),
                    source: source.to_string(),
                })?;
                writer.sync_all().map_err(|source| SubstrateError::BackupFailed {
                    op_id: op_id.to_string(),
                    source: source.to_string(),
                })?;
            }
        }

        fs::rename(&tmp_path, &final_path).map_err(|source| SubstrateError::BackupFailed {
            op_id: op_id.to_string(),
            source: source.to_string(),
        })?;

        Ok(BackupRef { op_id: op_id.to_string(), path: final_path, compressed: compress })
    }

    /// Read back the raw bytes of a stored backup, decompressing if needed.
    pub fn get(&self, backup_ref: &BackupRef) -> Result<Vec<u8>> {
        let mut file = File::open(&backup_ref.path)
            .map_err(|source| SubstrateError::PermissionDenied { path: backup_ref.path.clone(), source })?;
        let mut raw = Vec::new();
        file.read_to_end(&mut raw)
            .map_err(|source| SubstrateError::PermissionDenied { path: backup_ref.path.clone(), source })?;

        if backup_ref.compressed {
            let mut decoder = flate2::read::GzDecoder::new(&raw[..]);
            let mut out = Vec::new();
            decoder.read_to_end(&mut out).map_err(|source| SubstrateError::PermissionDenied {
                path: backup_ref.path.clone(),
                source,
            })?;
            Ok(out)
        } else {
            Ok(raw)
        }
    }

    /// Remove every backup for which `predicate(op_id)` is true.
    pub fn purge(&self, predicate: impl Fn(&str) -> bool) -> Result<SweepStats> {
        let mut stats = SweepStats::default();
        let Ok(entries) = fs::read_dir(&self.root) else {
            return Ok(stats);
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let Some(op_id) = op_id_from_filename(&path) else { continue };
            if predicate(&op_id) {
                let len = entry.metadata().map(|m| m.len()).unwrap_or(0);
                if fs::remove_file(&path).is_ok() {
                    stats.removed += 1;
                    stats.bytes_freed += len;
                }
            }
        }
        Ok(stats)
    }

    /// Delete backups older than the retention window (default 30 days).
    pub fn sweep(&self, now: SystemTime, retention: Duration) -> Result<SweepStats> {
        let mut stats = SweepStats::default();
        let Ok(entries) = fs::read_dir(&self.root) else {
            return Ok(stats);
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.file_name().and_then(|n| n.to_str()).is_some_and(|n| n.starts_with(".tmp-")) {
                continue;
            }
            let Ok(metadata) = entry.metadata() else { continue };
            let Ok(modified) = metadata.modified() else { continue };
            let Ok(age) = now.duration_since(modified) else { continue };
            if age > retention {
                let len = metadata.len();
                if fs::remove_file(&path).is_ok() {
                    stats.removed += 1;
                    stats.bytes_freed += len;
                }
            }
        }
        Ok(stats)
    }

    /// List every `op_id` with a backup currently on disk (used by the startup
    /// orphan sweep).
    #[must_use]
    pub fn known_op_ids(&self) -> Vec<String> {
        let Ok(entries) = fs::read_dir(&self.root) else { return Vec::new() };
        entries.flatten().filter_map(|e| op_id_from_filename(&e.path())).collect()
    }
}

fn op_id_from_filename(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    if name.starts_with(".tmp-") {
        return None;
    }
    // Filenames are `<ms>_<pid>_<seq>_<basename>[.gz]`; the op_id is the first
    // three fields, not just the first.
    let fields: Vec<&str> = name.splitn(4, '_').collect();
    if fields.len() < 3 {
        return None;
    }
    Some(format!("{}_{}_{}", fields[0], fields[1], fields[2]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn put_and_get_roundtrip_uncompressed() {
        let dir = TempDir::new().unwrap();
        let store = BackupStore::new(dir.path().to_path_buf());
        let src = dir.path().join("f.txt");
        fs::write(&src, b"small").unwrap();

        let backup_ref = store.put("op1", &src, 1024).unwrap();
        assert!(!backup_ref.compressed);
        assert_eq!(store.get(&backup_ref).unwrap(), b"small");
    }

    #[test]
    fn put_compresses_above_threshold() {
        let dir = TempDir::new().unwrap();
        let store = BackupStore::new(dir.path().to_path_buf());
        let src = dir.path().join("f.txt");
        let payload = vec![b'x'; 2048];
        fs::write(&src, &payload).unwrap();

        let backup_ref = store.put("op2", &src, 1024).unwrap();
        assert!(backup_ref.compressed);
        assert_eq!(store.get(&backup_ref).unwrap(), payload);
    }

    #[test]
    fn sweep_removes_old_entries_only() {
        let dir = TempDir::new().unwrap();
        let store = BackupStore::new(dir.path().to_path_buf());
        let src = dir.path().join("f.txt");
        fs::write(&src, b"data").unwrap();
        store.put("op3", &src, 1024).unwrap();

        let stats = store.sweep(SystemTime::now() + Duration::from_secs(3600), Duration::from_secs(1800)).unwrap();
        assert_eq!(stats.removed, 1);
    }
}
