//! Deterministic recovery-script emission.
//!
//! For every undoable operation, a self-contained shell script is written next to the
//! journal that, given only the backup and the original path, restores the file and
//! keeps a safety copy of the pre-restore state. Idempotent: re-running it on an
//! already-restored file detects the hash match and exits with a distinct status.

use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::backup::BackupRef;
use crate::error::{Result, SubstrateError};
use crate::history::types::Operation;

const ALREADY_RESTORED_EXIT: u8 = 2;

/// Write `<root>/recovery_scripts/recover_<op_id>`, atomically and executable.
pub fn emit(root: &Path, op: &Operation, backup_ref: &BackupRef) -> Result<PathBuf> {
    let dir = root.join("recovery_scripts");
    fs::create_dir_all(&dir).map_err(|source| SubstrateError::PermissionDenied { path: dir.clone(), source })?;

    let target = dir.join(format!("recover_{}", op.op_id));
    let tmp = dir.join(format!(".tmp-recover_{}", op.op_id));

    let expected_hash = match &op.old_hash {
        crate::history::types::ContentHash::Digest(d) => d.clone(),
        _ => String::new(),
    };

    let script = recovery_script(
        &op.file.path,
        &backup_ref.path,
        backup_ref.compressed,
        &expected_hash,
    );

    {
        let mut file =
            fs::File::create(&tmp).map_err(|source| SubstrateError::PermissionDenied { path: tmp.clone(), source })?;
        file.write_all(script.as_bytes())
            .map_err(|source| SubstrateError::PermissionDenied { path: tmp.clone(), source })?;
        file.sync_all().map_err(|source| SubstrateError::PermissionDenied { path: tmp.clone(), source })?;
    }
    fs::set_permissions(&tmp, fs::Permissions::from_mode(0o755))
        .map_err(|source| SubstrateError::PermissionDenied { path: tmp.clone(), source })?;
    fs::rename(&tmp, &target).map_err(|source| SubstrateError::PermissionDenied { path: target.clone(), source })?;

    Ok(target)
}

fn recovery_script(target: &Path, backup_path: &Path, compressed: bool, expected_hash: &str) -> String {
    let cat = if compressed { "zcat" } else { "cat" };
    format!(
        "#!/bin/sh\n\
         set -eu\n\
         TARGET={target:?}\n\
         BACKUP={backup_path:?}\n\
         EXPECTED_HASH=\"{expected_hash}\"\n\
         if [ -f \"$TARGET\" ] && [ -n \"$EXPECTED_HASH\" ]; then\n\
         \x20\x20CURRENT_HASH=$(sha256sum \"$TARGET\" 2>/dev/null | cut -d' ' -f1)\n\
         \x20\x20if [ \"$CURRENT_HASH\" = \"$EXPECTED_HASH\" ]; then\n\
         \x20\x20\x20\x20echo \"already restored: $TARGET\"\n\
         \x20\x20\x20\x20exit {ALREADY_RESTORED_EXIT}\n\
         \x20\x20fi\n\
         fi\n\
         if [ -f \"$TARGET\" ]; then\n\
         \x20\x20cp \"$TARGET\" \"$TARGET.pre-restore\"\n\
         fi\n\
         {cat} \"$BACKUP\" > \"$TARGET\"\n\
         echo \"restored: $TARGET\"\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::types::{ContentHash, FileRef, Kind, OpStatus, OperationId};
    use tempfile::TempDir;

    #[test]
    fn script_is_executable_and_contains_paths() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("f.txt");
        let backup_path = dir.path().join("backups/op1_f.txt");
        fs::create_dir_all(backup_path.parent().unwrap()).unwrap();
        fs::write(&backup_path, b"content").unwrap();

        let op = Operation {
            op_id: OperationId::new(),
            ts: "2026-01-01T00:00:00Z".into(),
            kind: Kind::WriteFile,
            tool: "test".into(),
            args: vec![],
            file: FileRef::for_path(&target),
            old_hash: ContentHash::Digest("deadbeef".into()),
            new_hash: ContentHash::Digest("cafef00d".into()),
            lines_affected: 0,
            changes_count: 1,
            backup_ref: Some(backup_path.display().to_string()),
            compressed: false,
            user: "tester".into(),
            cwd: dir.path().to_path_buf(),
            description: String::new(),
            can_undo: true,
            deps: vec![],
            status: Some(OpStatus::Completed),
        };
        let backup_ref = BackupRef { op_id: op.op_id.to_string(), path: backup_path, compressed: false };

        let script_path = emit(dir.path(), &op, &backup_ref).unwrap();
        let metadata = fs::metadata(&script_path).unwrap();
        assert_eq!(metadata.permissions().mode() & 0o111, 0o111);

        let contents = fs::read_to_string(&script_path).unwrap();
        assert!(contents.contains("deadbeef"));
    }
}
