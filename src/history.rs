use crate::collab::ActivityLog;
use crate::model::{ScanMode, StorageDomain};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Most recent entries kept, newest first.
pub const HISTORY_CAP: usize = 20;

/// Persisted summary of one completed scan; the raw material for forecasting
/// and anomaly deltas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageScanHistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub root: PathBuf,
    pub mode: ScanMode,
    pub reclaimable_bytes: u64,
    pub scanned_bytes: u64,
    pub confidence: f64,
    pub volume_used: u64,
    pub volume_total: u64,
    pub domains: HashMap<StorageDomain, u64>,
    pub duration_secs: f64,
}

/// Append-only scan history, stored as one JSON blob. A corrupt or unreadable
/// file degrades to an empty history rather than failing the engine.
pub struct HistoryStore {
    path: PathBuf,
}

impl HistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn load(&self) -> Vec<StorageScanHistoryEntry> {
        let Ok(raw) = fs::read_to_string(&self.path) else {
            return Vec::new();
        };
        match serde_json::from_str(&raw) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "corrupt scan history, starting empty");
                Vec::new()
            }
        }
    }

    pub fn push(&self, entry: StorageScanHistoryEntry) -> Result<()> {
        let mut entries = self.load();
        entries.insert(0, entry);
        entries.truncate(HISTORY_CAP);
        self.save(&entries)
    }

    pub fn clear(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }

    /// Most recent entry for the same scan root, if any.
    pub fn last_for_root(&self, root: &Path) -> Option<StorageScanHistoryEntry> {
        self.load().into_iter().find(|e| e.root == root)
    }

    fn save(&self, entries: &[StorageScanHistoryEntry]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(entries)?)?;
        Ok(())
    }
}

/// Persisted excluded-paths set. Paths in here are never cleaned.
pub struct ExclusionStore {
    path: PathBuf,
    paths: HashSet<PathBuf>,
}

impl ExclusionStore {
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let paths = fs::read_to_string(&path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default();
        Self { path, paths }
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.paths.contains(path)
    }

    pub fn add(&mut self, path: impl Into<PathBuf>) -> Result<()> {
        self.paths.insert(path.into());
        self.save()
    }

    pub fn remove(&mut self, path: &Path) -> Result<()> {
        self.paths.remove(path);
        self.save()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PathBuf> {
        self.paths.iter()
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(&self.paths)?)?;
        Ok(())
    }
}

/// Line-oriented activity log: timestamp, action, path, optional size.
pub struct ActivityLogger {
    log_path: PathBuf,
}

impl ActivityLogger {
    pub fn new(log_path: impl Into<PathBuf>) -> Self {
        Self {
            log_path: log_path.into(),
        }
    }

    fn append(&self, line: &str) -> Result<()> {
        if let Some(parent) = self.log_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.log_path
    }
}

impl ActivityLog for ActivityLogger {
    fn record(&self, action: &str, path: &Path, bytes: Option<u64>) {
        let size = bytes.map(|b| format!(" size={b}")).unwrap_or_default();
        let line = format!(
            "{} {} {}{}",
            Utc::now().to_rfc3339(),
            action,
            path.display(),
            size
        );
        if let Err(e) = self.append(&line) {
            tracing::warn!(error = %e, "activity log write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(root: &str, used: u64) -> StorageScanHistoryEntry {
        StorageScanHistoryEntry {
            timestamp: Utc::now(),
            root: PathBuf::from(root),
            mode: ScanMode::Quick,
            reclaimable_bytes: 100,
            scanned_bytes: 1000,
            confidence: 0.85,
            volume_used: used,
            volume_total: 10_000,
            domains: HashMap::new(),
            duration_secs: 1.5,
        }
    }

    #[test]
    fn history_caps_at_twenty_newest_first() {
        let tmp = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(tmp.path().join("history.json"));
        for i in 0..25 {
            store.push(entry("/", i)).unwrap();
        }
        let entries = store.load();
        assert_eq!(entries.len(), HISTORY_CAP);
        assert_eq!(entries[0].volume_used, 24);
    }

    #[test]
    fn corrupt_history_degrades_to_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("history.json");
        fs::write(&path, "{not json").unwrap();
        let store = HistoryStore::new(&path);
        assert!(store.load().is_empty());
        // and it stays usable
        store.push(entry("/", 1)).unwrap();
        assert_eq!(store.load().len(), 1);
    }

    #[test]
    fn last_for_root_matches_by_root() {
        let tmp = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(tmp.path().join("history.json"));
        store.push(entry("/Users/amy", 1)).unwrap();
        store.push(entry("/", 2)).unwrap();
        assert_eq!(
            store
                .last_for_root(Path::new("/Users/amy"))
                .unwrap()
                .volume_used,
            1
        );
        assert!(store.last_for_root(Path::new("/elsewhere")).is_none());
    }

    #[test]
    fn exclusions_persist_across_loads() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("exclusions.json");
        let mut store = ExclusionStore::load(&path);
        store.add("/Users/amy/keep-me").unwrap();

        let reloaded = ExclusionStore::load(&path);
        assert!(reloaded.contains(Path::new("/Users/amy/keep-me")));
        assert!(!reloaded.contains(Path::new("/other")));
    }

    #[test]
    fn activity_log_appends_lines() {
        let tmp = tempfile::tempdir().unwrap();
        let logger = ActivityLogger::new(tmp.path().join("activity.log"));
        logger.record("TRASH", Path::new("/tmp/x"), Some(42));
        logger.record("EXCLUDE", Path::new("/tmp/y"), None);
        let content = fs::read_to_string(logger.path()).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.contains("TRASH /tmp/x size=42"));
    }
}
