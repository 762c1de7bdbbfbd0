//! Cross-module properties from spec §8: redo via double-undo, idempotent
//! recovery scripts, and relocation round-trips through the organizer.

use std::fs;
use std::process::Command;

use msubstrate::afs::{Afs, MoveOptions};
use msubstrate::history::{FileRef, HistoryLog, Kind, OperationDraft};
use tempfile::TempDir;

#[test]
fn undo_of_an_undo_is_a_redo() {
    let dir = TempDir::new().unwrap();
    let history = HistoryLog::open(&dir.path().join("hist")).unwrap();
    let target = dir.path().join("t.txt");
    fs::write(&target, b"Version 1.0\n").unwrap();

    let mut draft = OperationDraft::new(Kind::WriteFile, "test", FileRef::for_path(&target));
    draft.new_hash = msubstrate::history::ContentHash::from(msubstrate::checksum::hash_file(&target).unwrap());
    let op = history.record_with_backup(draft, &target).unwrap();

    fs::write(&target, b"Version 2.0\n").unwrap();

    let undo_result = history.undo(&op.op_id).unwrap();
    assert_eq!(fs::read(&target).unwrap(), b"Version 1.0\n");

    let redo_result = history.undo(&undo_result.undo_op_id).unwrap();
    assert_eq!(fs::read(&target).unwrap(), b"Version 2.0\n");
    assert_ne!(redo_result.undo_op_id, undo_result.undo_op_id);
}

#[test]
fn recovery_script_is_idempotent_on_rerun() {
    let dir = TempDir::new().unwrap();
    let history = HistoryLog::open(&dir.path().join("hist")).unwrap();
    let target = dir.path().join("t.txt");
    fs::write(&target, b"Version 1.0\n").unwrap();

    let mut draft = OperationDraft::new(Kind::WriteFile, "test", FileRef::for_path(&target));
    draft.new_hash = msubstrate::history::ContentHash::from(msubstrate::checksum::hash_file(&target).unwrap());
    let op = history.record_with_backup(draft, &target).unwrap();

    fs::write(&target, b"Version 2.0\n").unwrap();

    let script = dir.path().join("hist/recovery_scripts").join(format!("recover_{}", op.op_id));
    assert!(script.exists());

    let first = Command::new("sh").arg(&script).output().unwrap();
    assert!(first.status.success());
    assert_eq!(fs::read(&target).unwrap(), b"Version 1.0\n");

    let second = Command::new("sh").arg(&script).output().unwrap();
    assert_eq!(second.status.code(), Some(2));
    assert_eq!(fs::read(&target).unwrap(), b"Version 1.0\n");
}

#[test]
fn an_organizer_move_can_be_undone_then_redone_to_its_destination() {
    let dir = TempDir::new().unwrap();
    let history = HistoryLog::open(&dir.path().join("hist")).unwrap();
    let afs = Afs::new(&history, dir.path().join("trash"));
    let src = dir.path().join("a.jpg");
    fs::write(&src, b"photo").unwrap();
    let dest_dir = dir.path().join("Images");
    fs::create_dir_all(&dest_dir).unwrap();
    let dest = dest_dir.join("a.jpg");

    let mut opts = MoveOptions::default();
    opts.record_kind = Some(Kind::OrganizerMove);
    let result = afs.atomic_move(&src, &dest, &opts).unwrap();
    assert!(result.can_undo);

    let undo_result = history.undo(&result.op_id).unwrap();
    assert!(src.exists());
    assert!(!dest.exists());

    history.undo(&undo_result.undo_op_id).unwrap();
    assert!(!src.exists());
    assert!(dest.exists());
}
