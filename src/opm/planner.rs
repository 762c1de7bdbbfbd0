//! OPM Planner: walks a source directory, resolves each file's destination per the
//! active rule, and drives every motion through AFS so each one is journaled and
//! undoable the same way a direct `atomic_move` call would be.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::afs::{Afs, MoveOptions};
use crate::error::{Result, SubstrateError};
use crate::history::{HistoryLog, Kind};

use super::manifest::{self, Manifest};
use super::rules::{self, ArchiveFormat, Rule};

/// Options controlling one `organize` run, independent of the chosen `Rule`.
#[derive(Debug, Clone)]
pub struct OrganizeOptions {
    pub dry_run: bool,
    pub move_opts: MoveOptions,
    pub manifest_path: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct OrganizeReport {
    pub moved: u64,
    pub skipped: u64,
    pub planned: Vec<(PathBuf, PathBuf)>,
}

/// Run `rule` against every regular file directly inside `root` (non-recursive,
/// matching the original organizer's semantics, except `Flatten` which recurses by
/// design) and drive every move through `Afs::atomic_move`.
pub fn organize(root: &Path, rule: &Rule, history: &HistoryLog, trash_dir: PathBuf, opts: &OrganizeOptions) -> Result<(OrganizeReport, Manifest)> {
    let afs = Afs::new(history, trash_dir);
    let mut manifest = Manifest::new(
        [("rule".to_string(), format!("{rule:?}"))].into_iter().collect(),
    );
    let mut report = OrganizeReport::default();

    // Every move driven by the organizer is journaled under its own kind, not the
    // generic AFS `WriteFile`, so `history`/`stats` can tell organizer-driven
    // relocations apart from direct `msubstrate move` calls.
    let mut opts = opts.clone();
    opts.move_opts.record_kind = Some(Kind::OrganizerMove);
    let opts = &opts;

    match rule {
        Rule::Flatten => flatten(root, &afs, opts, &mut report, &mut manifest)?,
        Rule::ArchiveOlderThan { days, format } => {
            archive_older_than(root, *days, *format, &afs, opts, &mut report, &mut manifest)?;
        }
        _ => organize_flat(root, rule, &afs, opts, &mut report, &mut manifest)?,
    }

    manifest.finish();
    if !opts.dry_run {
        manifest::save(&opts.manifest_path, &manifest)?;
    }
    Ok((report, manifest))
}

fn organize_flat(
    root: &Path,
    rule: &Rule,
    afs: &Afs<'_>,
    opts: &OrganizeOptions,
    report: &mut OrganizeReport,
    manifest: &mut Manifest,
) -> Result<()> {
    let entries = fs::read_dir(root).map_err(|source| SubstrateError::PermissionDenied { path: root.to_path_buf(), source })?;

    for entry in entries {
        let entry = entry.map_err(|source| SubstrateError::PermissionDenied { path: root.to_path_buf(), source })?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let Some(folder) = rules::destination_for(rule, &path)? else {
            report.skipped += 1;
            continue;
        };
        let dest_dir = root.join(&folder);
        let dest = unique_destination(&dest_dir, &path);

        if opts.dry_run {
            report.planned.push((path.clone(), dest));
            continue;
        }

        fs::create_dir_all(&dest_dir)
            .map_err(|source| SubstrateError::PermissionDenied { path: dest_dir.clone(), source })?;
        let result = afs.atomic_move(&path, &dest, &opts.move_opts)?;
        report.moved += 1;
        if let Some(op) = find_operation(afs, &result.op_id)? {
            manifest.push(op);
        }
        manifest::save(&opts.manifest_path, manifest)?;
    }
    Ok(())
}

/// AFS hands back only the `op_id`, not the full journal record — refetch it from
/// the history so the manifest carries the real record, not a reconstruction.
fn find_operation(
    afs: &Afs<'_>,
    op_id: &crate::history::OperationId,
) -> Result<Option<crate::history::Operation>> {
    Ok(afs.history().query(&crate::history::QueryFilter::default())?.into_iter().find(|op| &op.op_id == op_id))
}

fn unique_destination(dest_dir: &Path, src: &Path) -> PathBuf {
    let name = src.file_name().unwrap_or_default();
    let mut dest = dest_dir.join(name);
    if !dest.exists() {
        return dest;
    }
    let stem = src.file_stem().and_then(|s| s.to_str()).unwrap_or("file");
    let suffix = src.extension().and_then(|s| s.to_str()).map(|s| format!(".{s}")).unwrap_or_default();
    let mut counter = 1;
    loop {
        dest = dest_dir.join(format!("{stem}_{counter}{suffix}"));
        if !dest.exists() {
            return dest;
        }
        counter += 1;
    }
}

fn flatten(
    root: &Path,
    afs: &Afs<'_>,
    opts: &OrganizeOptions,
    report: &mut OrganizeReport,
    manifest: &mut Manifest,
) -> Result<()> {
    let mut files = Vec::new();
    collect_files_recursive(root, root, &mut files)?;

    for path in files {
        let dest = unique_destination(root, &path);
        if opts.dry_run {
            report.planned.push((path, dest));
            continue;
        }
        let result = afs.atomic_move(&path, &dest, &opts.move_opts)?;
        report.moved += 1;
        if let Some(op) = find_operation(afs, &result.op_id)? {
            manifest.push(op);
        }
        manifest::save(&opts.manifest_path, manifest)?;
    }

    if !opts.dry_run {
        remove_empty_dirs(root, root);
    }
    Ok(())
}

fn collect_files_recursive(dir: &Path, target: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    if dir != target {
        let entries =
            fs::read_dir(dir).map_err(|source| SubstrateError::PermissionDenied { path: dir.to_path_buf(), source })?;
        for entry in entries {
            let entry = entry.map_err(|source| SubstrateError::PermissionDenied { path: dir.to_path_buf(), source })?;
            let path = entry.path();
            if path.is_file() {
                out.push(path);
            } else if path.is_dir() {
                collect_files_recursive(&path, target, out)?;
            }
        }
        return Ok(());
    }
    let entries =
        fs::read_dir(dir).map_err(|source| SubstrateError::PermissionDenied { path: dir.to_path_buf(), source })?;
    for entry in entries {
        let entry = entry.map_err(|source| SubstrateError::PermissionDenied { path: dir.to_path_buf(), source })?;
        let path = entry.path();
        if path.is_dir() {
            collect_files_recursive(&path, target, out)?;
        }
    }
    Ok(())
}

fn remove_empty_dirs(dir: &Path, target: &Path) {
    let Ok(entries) = fs::read_dir(dir) else { return };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            remove_empty_dirs(&path, target);
            if path != target {
                let _ = fs::remove_dir(&path);
            }
        }
    }
}

fn archive_older_than(
    root: &Path,
    days: u64,
    format: ArchiveFormat,
    afs: &Afs<'_>,
    opts: &OrganizeOptions,
    report: &mut OrganizeReport,
    manifest: &mut Manifest,
) -> Result<()> {
    let now = SystemTime::now();
    let entries = fs::read_dir(root).map_err(|source| SubstrateError::PermissionDenied { path: root.to_path_buf(), source })?;
    let mut old_files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| SubstrateError::PermissionDenied { path: root.to_path_buf(), source })?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let meta = entry.metadata().map_err(|source| SubstrateError::PermissionDenied { path: path.clone(), source })?;
        if rules::is_older_than(meta.modified().unwrap_or(now), now, days) {
            old_files.push(path);
        }
    }

    if opts.dry_run {
        report.planned = old_files.into_iter().map(|p| (p, root.join("archived_files"))).collect();
        return Ok(());
    }

    let ext = match format {
        ArchiveFormat::Zip => "zip",
        ArchiveFormat::Tar => "tar",
        ArchiveFormat::TarGz => "tar.gz",
    };
    let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
    let archive_path = root.join(format!("archived_files_{timestamp}.{ext}"));
    write_archive(&archive_path, format, &old_files)?;

    for path in &old_files {
        let result = afs.safe_delete(path, &opts.move_opts)?;
        report.moved += 1;
        if let Some(op) = find_operation(afs, &result.op_id)? {
            manifest.push(op);
        }
        manifest::save(&opts.manifest_path, manifest)?;
    }
    Ok(())
}

fn write_archive(archive_path: &Path, format: ArchiveFormat, files: &[PathBuf]) -> Result<()> {
    match format {
        ArchiveFormat::Zip => {
            let file = fs::File::create(archive_path)
                .map_err(|source| SubstrateError::PermissionDenied { path: archive_path.to_path_buf(), source })?;
            let mut zip = zip::ZipWriter::new(file);
            let options: zip::write::FileOptions<'_, ()> =
                zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Deflated);
            for path in files {
                let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("file");
                zip.start_file(name, options.clone())
                    .map_err(|e| SubstrateError::Internal { detail: e.to_string() })?;
                let bytes = fs::read(path).map_err(|source| SubstrateError::PermissionDenied { path: path.clone(), source })?;
                std::io::Write::write_all(&mut zip, &bytes)
                    .map_err(|source| SubstrateError::PermissionDenied { path: archive_path.to_path_buf(), source })?;
            }
            zip.finish().map_err(|e| SubstrateError::Internal { detail: e.to_string() })?;
        }
        ArchiveFormat::Tar | ArchiveFormat::TarGz => {
            let file = fs::File::create(archive_path)
                .map_err(|source| SubstrateError::PermissionDenied { path: archive_path.to_path_buf(), source })?;
            let writer: Box<dyn std::io::Write> = if format == ArchiveFormat::TarGz {
                Box::new(flate2::write::GzEncoder::new(file, flate2::Compression::default()))
            } else {
                Box::new(file)
            };
            let mut builder = tar::Builder::new(writer);
            for path in files {
                let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("file");
                builder
                    .append_path_with_name(path, name)
                    .map_err(|source| SubstrateError::PermissionDenied { path: path.clone(), source })?;
            }
            builder.finish().map_err(|e| SubstrateError::Internal { detail: e.to_string() })?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::HistoryLog;
    use tempfile::TempDir;

    fn setup() -> (TempDir, HistoryLog) {
        let dir = TempDir::new().unwrap();
        let history = HistoryLog::open(&dir.path().join("hist")).unwrap();
        (dir, history)
    }

    #[test]
    fn by_extension_moves_files_into_category_folders() {
        let (dir, history) = setup();
        fs::write(dir.path().join("a.jpg"), b"x").unwrap();
        fs::write(dir.path().join("b.txt"), b"y").unwrap();

        let rule = Rule::ByExtension(rules::default_extension_map());
        let opts = OrganizeOptions {
            dry_run: false,
            move_opts: MoveOptions::default(),
            manifest_path: dir.path().join("manifest.json"),
        };
        let (report, manifest) =
            organize(dir.path(), &rule, &history, dir.path().join("trash"), &opts).unwrap();

        assert_eq!(report.moved, 2);
        assert!(dir.path().join("Images/a.jpg").exists());
        assert!(dir.path().join("Documents/b.txt").exists());
        assert!(!manifest.in_progress);
    }

    #[test]
    fn collision_gets_numeric_suffix() {
        let (dir, history) = setup();
        fs::create_dir_all(dir.path().join("Images")).unwrap();
        fs::write(dir.path().join("Images/a.jpg"), b"existing").unwrap();
        fs::write(dir.path().join("a.jpg"), b"new").unwrap();

        let rule = Rule::ByExtension(rules::default_extension_map());
        let opts = OrganizeOptions {
            dry_run: false,
            move_opts: MoveOptions::default(),
            manifest_path: dir.path().join("manifest.json"),
        };
        organize(dir.path(), &rule, &history, dir.path().join("trash"), &opts).unwrap();

        assert!(dir.path().join("Images/a_1.jpg").exists());
        assert_eq!(fs::read(dir.path().join("Images/a.jpg")).unwrap(), b"existing");
    }

    #[test]
    fn archive_older_than_records_a_journal_entry_and_manifest_op_per_file() {
        let (dir, history) = setup();
        let old = dir.path().join("ancient.log");
        fs::write(&old, b"stale").unwrap();
        let ancient = std::time::SystemTime::now() - std::time::Duration::from_secs(400 * 24 * 3600);
        fs::File::open(&old).unwrap().set_modified(ancient).unwrap();

        let rule = Rule::ArchiveOlderThan { days: 30, format: ArchiveFormat::Zip };
        let opts = OrganizeOptions {
            dry_run: false,
            move_opts: MoveOptions::default(),
            manifest_path: dir.path().join("manifest.json"),
        };
        let (report, manifest) =
            organize(dir.path(), &rule, &history, dir.path().join("trash"), &opts).unwrap();

        assert_eq!(report.moved, 1);
        assert!(!old.exists());
        assert_eq!(manifest.operations.len(), 1);
        assert_eq!(format!("{:?}", manifest.operations[0].kind), "DeleteFile");

        let ops = history.query(&crate::history::QueryFilter::default()).unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].op_id, manifest.operations[0].op_id);
    }

    #[test]
    fn dry_run_leaves_filesystem_untouched() {
        let (dir, history) = setup();
        fs::write(dir.path().join("a.jpg"), b"x").unwrap();

        let rule = Rule::ByExtension(rules::default_extension_map());
        let opts = OrganizeOptions {
            dry_run: true,
            move_opts: MoveOptions::default(),
            manifest_path: dir.path().join("manifest.json"),
        };
        let (report, _) = organize(dir.path(), &rule, &history, dir.path().join("trash"), &opts).unwrap();

        assert_eq!(report.moved, 0);
        assert_eq!(report.planned.len(), 1);
        assert!(dir.path().join("a.jpg").exists());
        assert!(!dir.path().join("Images").exists());
    }
}
