use chrono::{Duration as ChronoDuration, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JunkCategory {
    OldDownloads,
    BrowserCaches,
    Logs,
    Trash,
    TempFiles,
}

impl std::fmt::Display for JunkCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JunkCategory::OldDownloads => write!(f, "Old Downloads"),
            JunkCategory::BrowserCaches => write!(f, "Browser caches"),
            JunkCategory::Logs => write!(f, "Logs"),
            JunkCategory::Trash => write!(f, "Trash"),
            JunkCategory::TempFiles => write!(f, "Temporary files"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JunkCategoryResult {
    pub category: JunkCategory,
    pub bytes: u64,
    pub paths: Vec<PathBuf>,
}

/// Junk-category collaborator consumed by the reclaim planner.
pub trait JunkScanner: Send + Sync {
    fn scan_categories(&self) -> Vec<JunkCategoryResult>;
}

const OLD_DOWNLOAD_AGE_DAYS: i64 = 30;

/// Walks the well-known junk locations under the user's home. Categories are
/// scanned in parallel; empty categories are dropped.
pub struct DefaultJunkScanner {
    home: PathBuf,
    min_size: u64,
}

impl DefaultJunkScanner {
    pub fn new() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/"));
        Self {
            home,
            min_size: 1024,
        }
    }

    pub fn with_home(mut self, home: impl Into<PathBuf>) -> Self {
        self.home = home.into();
        self
    }

    fn old_downloads(&self) -> JunkCategoryResult {
        let cutoff = Utc::now() - ChronoDuration::days(OLD_DOWNLOAD_AGE_DAYS);
        let mut paths = Vec::new();
        let mut bytes = 0u64;
        let downloads = self.home.join("Downloads");
        if let Ok(read) = std::fs::read_dir(&downloads) {
            for entry in read.filter_map(|e| e.ok()) {
                let path = entry.path();
                let Ok(meta) = entry.metadata() else { continue };
                if !meta.is_file() || meta.len() < self.min_size {
                    continue;
                }
                let old = meta
                    .modified()
                    .ok()
                    .map(|t| chrono::DateTime::<Utc>::from(t) < cutoff)
                    .unwrap_or(false);
                if old {
                    bytes += meta.len();
                    paths.push(path);
                }
            }
        }
        JunkCategoryResult {
            category: JunkCategory::OldDownloads,
            bytes,
            paths,
        }
    }

    fn browser_caches(&self) -> JunkCategoryResult {
        let roots = [
            self.home.join("Library/Caches/com.apple.Safari"),
            self.home.join("Library/Caches/Google/Chrome"),
            self.home.join("Library/Caches/Firefox"),
            self.home.join("Library/Caches/com.microsoft.edgemac"),
            self.home.join("Library/Caches/BraveSoftware"),
        ];
        self.collect_dirs(JunkCategory::BrowserCaches, &roots)
    }

    fn logs(&self) -> JunkCategoryResult {
        let roots = [self.home.join("Library/Logs")];
        self.collect_dirs(JunkCategory::Logs, &roots)
    }

    fn trash(&self) -> JunkCategoryResult {
        let trash = self.home.join(".Trash");
        let mut paths = Vec::new();
        let mut bytes = 0u64;
        if let Ok(read) = std::fs::read_dir(&trash) {
            for entry in read.filter_map(|e| e.ok()) {
                let path = entry.path();
                let size = entry_size(&path);
                if size > 0 {
                    bytes += size;
                    paths.push(path);
                }
            }
        }
        JunkCategoryResult {
            category: JunkCategory::Trash,
            bytes,
            paths,
        }
    }

    fn temp_files(&self) -> JunkCategoryResult {
        let roots = [
            std::env::temp_dir(),
            self.home.join("Library/Caches/TemporaryItems"),
        ];
        self.collect_dirs(JunkCategory::TempFiles, &roots)
    }

    fn collect_dirs(&self, category: JunkCategory, roots: &[PathBuf]) -> JunkCategoryResult {
        let mut paths = Vec::new();
        let mut bytes = 0u64;
        for root in roots {
            if !root.exists() {
                continue;
            }
            if let Ok(read) = std::fs::read_dir(root) {
                for entry in read.filter_map(|e| e.ok()) {
                    let path = entry.path();
                    if path.is_symlink() {
                        continue;
                    }
                    let size = entry_size(&path);
                    if size >= self.min_size {
                        bytes += size;
                        paths.push(path);
                    }
                }
            }
        }
        JunkCategoryResult {
            category,
            bytes,
            paths,
        }
    }
}

fn entry_size(path: &Path) -> u64 {
    let Ok(meta) = std::fs::symlink_metadata(path) else {
        return 0;
    };
    if meta.is_file() {
        meta.len()
    } else if meta.is_dir() {
        WalkDir::new(path)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| !e.path_is_symlink())
            .filter_map(|e| e.ok())
            .filter_map(|e| e.metadata().ok())
            .filter(|m| m.is_file())
            .map(|m| m.len())
            .sum()
    } else {
        0
    }
}

impl Default for DefaultJunkScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl JunkScanner for DefaultJunkScanner {
    fn scan_categories(&self) -> Vec<JunkCategoryResult> {
        let jobs: Vec<Box<dyn Fn() -> JunkCategoryResult + Send + Sync + '_>> = vec![
            Box::new(|| self.old_downloads()),
            Box::new(|| self.browser_caches()),
            Box::new(|| self.logs()),
            Box::new(|| self.trash()),
            Box::new(|| self.temp_files()),
        ];
        let mut results: Vec<JunkCategoryResult> = jobs
            .par_iter()
            .map(|job| job())
            .filter(|r| r.bytes > 0)
            .collect();
        results.sort_by(|a, b| b.bytes.cmp(&a.bytes));
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn trash_and_logs_are_picked_up() {
        let tmp = tempfile::tempdir().unwrap();
        let home = tmp.path();
        fs::create_dir_all(home.join(".Trash")).unwrap();
        fs::write(home.join(".Trash/old.zip"), vec![0u8; 4096]).unwrap();
        fs::create_dir_all(home.join("Library/Logs/MyApp")).unwrap();
        fs::write(home.join("Library/Logs/MyApp/run.log"), vec![0u8; 2048]).unwrap();

        let scanner = DefaultJunkScanner::new().with_home(home);
        let results = scanner.scan_categories();

        let trash = results
            .iter()
            .find(|r| r.category == JunkCategory::Trash)
            .expect("trash category");
        assert_eq!(trash.bytes, 4096);
        assert_eq!(trash.paths.len(), 1);

        let logs = results
            .iter()
            .find(|r| r.category == JunkCategory::Logs)
            .expect("logs category");
        assert_eq!(logs.bytes, 2048);
    }

    #[test]
    fn fresh_downloads_are_not_junk() {
        let tmp = tempfile::tempdir().unwrap();
        let home = tmp.path();
        fs::create_dir_all(home.join("Downloads")).unwrap();
        fs::write(home.join("Downloads/new.dmg"), vec![0u8; 8192]).unwrap();

        let scanner = DefaultJunkScanner::new().with_home(home);
        let results = scanner.scan_categories();
        assert!(!results
            .iter()
            .any(|r| r.category == JunkCategory::OldDownloads));
    }
}
