//! Closed rule set accepted by `organize()`: each maps a source file to the relative
//! destination directory it belongs in.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::error::{Result, SubstrateError};

/// Built-in extension → category table; overridable per-rule via `by_extension`.
#[must_use]
pub fn default_extension_map() -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    let groups: &[(&str, &[&str])] = &[
        ("Images", &["jpg", "jpeg", "png", "gif", "bmp", "svg", "webp", "tiff"]),
        ("Documents", &["pdf", "doc", "docx", "txt", "rtf", "odt", "xls", "xlsx", "ppt", "pptx"]),
        ("Code", &["py", "java", "js", "html", "css", "cpp", "c", "h", "php", "rb", "go", "rs", "ts", "jsx", "tsx"]),
        ("Scripts", &["sh", "bat", "ps1", "cmd"]),
        ("Archives", &["zip", "rar", "7z", "tar", "gz", "bz2", "xz"]),
        ("Audio", &["mp3", "wav", "flac", "aac", "ogg", "m4a"]),
        ("Video", &["mp4", "avi", "mkv", "mov", "wmv", "flv", "webm"]),
        ("Data", &["json", "xml", "csv", "sql", "yaml", "yml", "toml"]),
    ];
    for (category, exts) in groups {
        for ext in *exts {
            map.insert((*ext).to_string(), (*category).to_string());
        }
    }
    map
}

/// The closed set of organization rules (spec §4.8).
#[derive(Debug, Clone)]
pub enum Rule {
    ByExtension(BTreeMap<String, String>),
    ByDate(String),
    BySize { small_mb: f64, large_mb: f64 },
    ByType,
    Flatten,
    ArchiveOlderThan { days: u64, format: ArchiveFormat },
    CustomRulesFile(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    Tar,
    TarGz,
}

impl ArchiveFormat {
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "tar" => Self::Tar,
            "tar.gz" | "tgz" => Self::TarGz,
            _ => Self::Zip,
        }
    }
}

/// The destination this rule assigns to `path`, relative to the organized root.
/// `Flatten` and `ArchiveOlderThan` are handled by the planner directly since they
/// don't fit the one-file-one-folder shape; this returns `None` for them.
pub fn destination_for(rule: &Rule, path: &Path) -> Result<Option<String>> {
    match rule {
        Rule::ByExtension(map) => {
            let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("").to_ascii_lowercase();
            Ok(Some(map.get(&ext).cloned().unwrap_or_else(|| "Other".to_string())))
        }
        Rule::ByDate(fmt) => {
            let meta = std::fs::metadata(path)
                .map_err(|source| SubstrateError::PermissionDenied { path: path.to_path_buf(), source })?;
            let modified = meta.modified().unwrap_or(SystemTime::now());
            let datetime: chrono::DateTime<chrono::Local> = modified.into();
            Ok(Some(datetime.format(fmt).to_string()))
        }
        Rule::BySize { small_mb, large_mb } => {
            let meta = std::fs::metadata(path)
                .map_err(|source| SubstrateError::PermissionDenied { path: path.to_path_buf(), source })?;
            let size_mb = meta.len() as f64 / (1024.0 * 1024.0);
            Ok(Some(
                if size_mb < *small_mb {
                    "Small"
                } else if size_mb < *large_mb {
                    "Medium"
                } else {
                    "Large"
                }
                .to_string(),
            ))
        }
        Rule::ByType => {
            let map = default_extension_map();
            let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("").to_ascii_lowercase();
            let category = match ext.as_str() {
                "txt" | "md" | "rst" => "Text".to_string(),
                "exe" | "bin" | "app" | "deb" | "rpm" => "Applications".to_string(),
                _ => map.get(&ext).cloned().unwrap_or_else(|| "Unknown".to_string()),
            };
            Ok(Some(category))
        }
        Rule::CustomRulesFile(path) => load_custom_rules(path).map(Some),
        Rule::Flatten | Rule::ArchiveOlderThan { .. } => Ok(None),
    }
}

fn load_custom_rules(_rules_file: &Path) -> Result<String> {
    // Placeholder destination for pattern-matched custom rules; the planner resolves
    // the actual pattern table itself since it needs the full file list in scope.
    Ok("Custom".to_string())
}

/// Whether `modified` is at least `days` old relative to `now`.
#[must_use]
pub fn is_older_than(modified: SystemTime, now: SystemTime, days: u64) -> bool {
    now.duration_since(modified).unwrap_or(Duration::ZERO) >= Duration::from_secs(days * 86_400)
}
