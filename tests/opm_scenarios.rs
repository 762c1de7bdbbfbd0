//! Organizer-Policy-Manager scenarios (spec §8 item 6).

use std::fs;

use msubstrate::afs::MoveOptions;
use msubstrate::history::HistoryLog;
use msubstrate::opm::{self, manifest, OrganizeOptions, Rule};
use tempfile::TempDir;

fn populate(dir: &std::path::Path) {
    let names = [
        "a.jpg", "b.png", "c.txt", "d.md", "e.pdf", "f.mp3", "g.mp4", "h.zip", "i.py", "j.xyz",
    ];
    for name in names {
        fs::write(dir.join(name), b"x").unwrap();
    }
}

#[test]
fn dry_run_then_real_run_produce_the_same_ten_operations() {
    let dir = TempDir::new().unwrap();
    populate(dir.path());
    let history = HistoryLog::open(&dir.path().join("hist")).unwrap();
    let rule = Rule::ByExtension(msubstrate::opm::rules::default_extension_map());

    let dry_opts = OrganizeOptions {
        dry_run: true,
        move_opts: MoveOptions::default(),
        manifest_path: dir.path().join("manifest.json"),
    };
    let (dry_report, _) =
        opm::organize(dir.path(), &rule, &history, dir.path().join("trash"), &dry_opts).unwrap();
    assert_eq!(dry_report.planned.len(), 10);
    assert!(!dir.path().join("manifest.json").exists());

    let real_opts = OrganizeOptions {
        dry_run: false,
        move_opts: MoveOptions::default(),
        manifest_path: dir.path().join("manifest.json"),
    };
    let (real_report, written) =
        opm::organize(dir.path(), &rule, &history, dir.path().join("trash"), &real_opts).unwrap();
    assert_eq!(real_report.moved, 10);
    assert_eq!(written.total_operations, 10);
    assert!(written.operations.iter().all(|op| format!("{:?}", op.kind) == "OrganizerMove"));
    assert!(written.operations.iter().all(|op| op.can_undo));

    let loaded = manifest::load(&dir.path().join("manifest.json")).unwrap();
    assert_eq!(loaded.total_operations, 10);
    assert_eq!(
        loaded.operations.iter().map(|op| op.op_id.clone()).collect::<Vec<_>>(),
        written.operations.iter().map(|op| op.op_id.clone()).collect::<Vec<_>>()
    );
}

#[test]
fn every_planned_operation_is_individually_undoable() {
    let dir = TempDir::new().unwrap();
    populate(dir.path());
    let history = HistoryLog::open(&dir.path().join("hist")).unwrap();
    let rule = Rule::ByExtension(msubstrate::opm::rules::default_extension_map());
    let opts = OrganizeOptions {
        dry_run: false,
        move_opts: MoveOptions::default(),
        manifest_path: dir.path().join("manifest.json"),
    };

    let (_, written) = opm::organize(dir.path(), &rule, &history, dir.path().join("trash"), &opts).unwrap();

    let undone = manifest::undo_manifest(&dir.path().join("manifest.json"), &history).unwrap();
    assert_eq!(undone.len(), written.total_operations as usize);
    assert!(dir.path().join("a.jpg").exists());
    assert!(dir.path().join("j.xyz").exists());
}
