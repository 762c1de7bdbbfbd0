//! Streamed hashing, chunked copy, fsync.
//!
//! Hashing is fixed to SHA-256 (the schema-versioned choice for this substrate; the
//! original toolkit this was modeled on used MD5).

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;
use std::thread;
use std::time::Duration;

use sha2::{Digest as Sha2Digest, Sha256};

use crate::error::{Result, SubstrateError};
use crate::path_lock;

const CHUNK_SIZE: usize = 4096;

/// A hex-encoded SHA-256 digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Digest(pub String);

impl Digest {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hash `path` in fixed 4 KiB chunks, retrying with exponential backoff
/// (initial 0.2s, factor 2, up to 5 attempts) while the file is lock-contended.
pub fn hash_file(path: &Path) -> Result<Digest> {
    let mut delay = Duration::from_millis(200);
    let mut last_err = None;
    for _attempt in 0..5 {
        match hash_file_once(path) {
            Ok(digest) => return Ok(digest),
            Err(e) if path_lock::is_locked(path).0 => {
                last_err = Some(e);
                thread::sleep(delay);
                delay *= 2;
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err.unwrap_or(SubstrateError::LockedDuringHash { path: path.to_path_buf() }))
}

fn hash_file_once(path: &Path) -> Result<Digest> {
    let mut file = File::open(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            SubstrateError::NotFound { path: path.to_path_buf() }
        } else {
            SubstrateError::PermissionDenied { path: path.to_path_buf(), source }
        }
    })?;

    let mut hasher = Sha256::new();
    let mut buf = [0_u8; CHUNK_SIZE];
    loop {
        let n = file
            .read(&mut buf)
            .map_err(|source| SubstrateError::PermissionDenied { path: path.to_path_buf(), source })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(Digest(hex_encode(&hasher.finalize())))
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Stream `src` into `dst`, overwriting it, returning the bytes copied and source digest.
///
/// Writes go through a temp sibling of `dst` so the caller can rename atomically; this
/// function itself does the streamed copy + fsync, not the rename.
pub fn copy_stream(src: &Path, dst: &Path) -> Result<(u64, Digest)> {
    let mut source = File::open(src).map_err(|source_err| {
        if source_err.kind() == std::io::ErrorKind::NotFound {
            SubstrateError::NotFound { path: src.to_path_buf() }
        } else {
            SubstrateError::PermissionDenied { path: src.to_path_buf(), source: source_err }
        }
    })?;

    let mut dest = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(dst)
        .map_err(|source| SubstrateError::PermissionDenied { path: dst.to_path_buf(), source })?;

    let mut hasher = Sha256::new();
    let mut buf = [0_u8; CHUNK_SIZE];
    let mut total: u64 = 0;
    loop {
        let n = source
            .read(&mut buf)
            .map_err(|source| SubstrateError::PermissionDenied { path: src.to_path_buf(), source })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        let written = dest
            .write(&buf[..n])
            .map_err(|source| SubstrateError::PermissionDenied { path: dst.to_path_buf(), source })?;
        if written != n {
            return Err(SubstrateError::ShortWrite {
                path: dst.to_path_buf(),
                expected: n as u64,
                actual: written as u64,
            });
        }
        total += n as u64;
    }

    dest.flush().map_err(|source| SubstrateError::PermissionDenied { path: dst.to_path_buf(), source })?;
    dest.sync_all().map_err(|source| SubstrateError::PermissionDenied { path: dst.to_path_buf(), source })?;

    Ok((total, Digest(hex_encode(&hasher.finalize()))))
}

/// Fsync a single file's contents to disk.
pub fn fsync_file(path: &Path) -> Result<()> {
    let file = OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(|source| SubstrateError::PermissionDenied { path: path.to_path_buf(), source })?;
    file.sync_all().map_err(|source| SubstrateError::PermissionDenied { path: path.to_path_buf(), source })
}

/// Fsync a directory entry so a preceding rename is durable.
///
/// No-op on platforms where directories cannot be opened for reading (best-effort, as
/// with the rest of this fsync discipline: it strengthens durability, it does not gate
/// correctness of the atomic-rename invariant itself).
pub fn fsync_dir(path: &Path) -> Result<()> {
    match File::open(path) {
        Ok(dir) => {
            let _ = dir.sync_all();
            Ok(())
        }
        Err(source) => {
            if source.kind() == std::io::ErrorKind::NotFound {
                Err(SubstrateError::NotFound { path: path.to_path_buf() })
            } else {
                Ok(())
            }
        }
    }
}

#[must_use]
pub fn file_size(path: &Path) -> u64 {
    fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn hash_file_matches_known_sha256() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        fs::write(&path, b"hello\n").unwrap();
        let digest = hash_file(&path).unwrap();
        assert_eq!(
            digest.as_str(),
            "5891b5b522d5df086d0ff0b110fbd9d21bb4fc7163af34d08286a2e846f6be03"
        );
    }

    #[test]
    fn copy_stream_preserves_bytes_and_digest() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src.txt");
        let dst = dir.path().join("dst.txt");
        fs::write(&src, b"payload").unwrap();

        let (bytes, digest) = copy_stream(&src, &dst).unwrap();
        assert_eq!(bytes, 7);
        assert_eq!(fs::read(&dst).unwrap(), b"payload");
        assert_eq!(digest, hash_file(&dst).unwrap());
    }

    #[test]
    fn hash_file_missing_returns_not_found() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope.txt");
        assert!(matches!(hash_file(&missing), Err(SubstrateError::NotFound { .. })));
    }
}
