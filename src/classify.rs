use crate::model::{FileTypeTag, RiskLevel, StorageDomain, StorageNode};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Paths under these roots are never reclaimable.
const PROTECTED_PREFIXES: &[&str] = &[
    "/System",
    "/usr",
    "/bin",
    "/sbin",
    "/etc",
    "/var/db",
    "/private/var/db",
];

const PROTECTED_PATTERNS: &[&str] = &[
    ".Spotlight-",
    ".fseventsd",
    ".Trashes",
    "Library/Keychains",
    "Library/Security",
    "Library/CoreServices",
];

const SYSTEM_PREFIXES: &[&str] = &["/System", "/usr", "/bin", "/sbin", "/etc", "/private", "/Library"];

const DEVELOPER_MARKERS: &[&str] = &[
    "Library/Developer",
    "DerivedData",
    ".cargo",
    ".rustup",
    "node_modules",
    ".gradle",
    ".npm",
];

const CLOUD_MARKERS: &[&str] = &[
    "Library/CloudStorage",
    "Library/Mobile Documents",
    "Dropbox",
    "iCloud",
];

const MEDIUM_RISK_MARKERS: &[&str] = &["Library/Application Support", "Library/Preferences"];

#[derive(Debug, Clone)]
pub struct Classification {
    pub domain: StorageDomain,
    pub risk: RiskLevel,
    pub file_type: FileTypeTag,
    pub owner_app: Option<String>,
}

/// Pure function of (path, name, extension) plus the installed-application
/// inventory. Owns no filesystem access of its own.
pub struct Classifier {
    home: PathBuf,
    /// Exact bundle path → display name, from the app inventory collaborator.
    app_index: HashMap<PathBuf, String>,
}

impl Classifier {
    pub fn new(app_index: HashMap<PathBuf, String>) -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/"));
        Self { home, app_index }
    }

    pub fn with_home(mut self, home: impl Into<PathBuf>) -> Self {
        self.home = home.into();
        self
    }

    pub fn classify(&self, path: &Path) -> Classification {
        let domain = self.domain_of(path);
        let risk = self.risk_of(path, domain);
        let file_type = file_type_of(path);
        let owner_app = self.owner_of(path);
        Classification {
            domain,
            risk,
            file_type,
            owner_app,
        }
    }

    /// Classifies in place and seeds the reclaimable estimate from risk.
    pub fn apply(&self, node: &mut StorageNode) {
        let c = self.classify(&node.path);
        node.domain = c.domain;
        node.file_type = c.file_type;
        node.owner_app = c.owner_app;
        node.set_risk(c.risk);
        let reclaimable = match c.risk {
            RiskLevel::Low | RiskLevel::Medium => node.logical_bytes,
            RiskLevel::High | RiskLevel::Protected => 0,
        };
        node.set_reclaimable(reclaimable);
    }

    // Evaluated in order: system → application bundles → developer → cloud →
    // user home → other.
    fn domain_of(&self, path: &Path) -> StorageDomain {
        let s = path.to_string_lossy();
        if SYSTEM_PREFIXES.iter().any(|p| s.starts_with(p)) {
            return StorageDomain::System;
        }
        if s.contains(".app") {
            return StorageDomain::Application;
        }
        if DEVELOPER_MARKERS.iter().any(|m| s.contains(m)) {
            return StorageDomain::Developer;
        }
        if CLOUD_MARKERS.iter().any(|m| s.contains(m)) {
            return StorageDomain::Cloud;
        }
        if path.starts_with(&self.home) {
            return StorageDomain::User;
        }
        StorageDomain::Other
    }

    fn risk_of(&self, path: &Path, domain: StorageDomain) -> RiskLevel {
        let s = path.to_string_lossy();
        if PROTECTED_PREFIXES.iter().any(|p| s.starts_with(p))
            || PROTECTED_PATTERNS.iter().any(|p| s.contains(p))
            || is_installed_app_bundle(&s)
        {
            return RiskLevel::Protected;
        }
        if domain == StorageDomain::System {
            return RiskLevel::High;
        }
        if MEDIUM_RISK_MARKERS.iter().any(|m| s.contains(m)) {
            return RiskLevel::Medium;
        }
        RiskLevel::Low
    }

    /// Owner-application attribution: exact-path index, then bundle-root
    /// prefix, then a `.app/` path-segment parse as last resort.
    fn owner_of(&self, path: &Path) -> Option<String> {
        if let Some(name) = self.app_index.get(path) {
            return Some(name.clone());
        }
        for (bundle, name) in &self.app_index {
            if path.starts_with(bundle) {
                return Some(name.clone());
            }
        }
        let s = path.to_string_lossy();
        let idx = s.find(".app/")?;
        let head = &s[..idx];
        head.rsplit('/').next().map(|n| n.to_string())
    }
}

fn is_installed_app_bundle(path: &str) -> bool {
    path.starts_with("/Applications/") && path.contains(".app")
}

fn file_type_of(path: &Path) -> FileTypeTag {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return FileTypeTag::Other;
    };
    match ext.to_ascii_lowercase().as_str() {
        "pdf" | "doc" | "docx" | "pages" | "key" | "ppt" | "pptx" | "xls" | "xlsx" | "numbers"
        | "txt" | "md" | "rtf" => FileTypeTag::Document,
        "jpg" | "jpeg" | "png" | "gif" | "heic" | "tiff" | "webp" | "raw" | "psd" => {
            FileTypeTag::Image
        }
        "mp4" | "mov" | "mkv" | "avi" | "webm" | "m4v" => FileTypeTag::Video,
        "mp3" | "m4a" | "aac" | "flac" | "wav" | "aiff" => FileTypeTag::Audio,
        "zip" | "tar" | "gz" | "bz2" | "xz" | "7z" | "rar" => FileTypeTag::Archive,
        "dmg" | "iso" | "sparseimage" | "sparsebundle" => FileTypeTag::DiskImage,
        "swift" | "rs" | "c" | "h" | "cpp" | "m" | "mm" | "java" | "kt" | "py" | "rb" | "go"
        | "js" | "ts" => FileTypeTag::Code,
        "log" => FileTypeTag::Log,
        "cache" | "tmp" => FileTypeTag::Cache,
        "db" | "sqlite" | "sqlite3" | "realm" => FileTypeTag::Database,
        _ => FileTypeTag::Other,
    }
}
