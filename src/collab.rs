use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

/// OS-reported capacity for the volume holding a path.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VolumeUsage {
    pub total: u64,
    pub used: u64,
    pub free: u64,
}

/// Installed-application inventory: bundle path → display name.
pub trait AppInventory: Send + Sync {
    fn installed_apps(&self) -> HashMap<PathBuf, String>;
}

/// Reads `.app` bundles from the standard application folders and resolves
/// display names from `Contents/Info.plist`.
pub struct PlistAppInventory {
    roots: Vec<PathBuf>,
}

impl PlistAppInventory {
    pub fn new() -> Self {
        let mut roots = vec![PathBuf::from("/Applications")];
        if let Some(home) = dirs::home_dir() {
            roots.push(home.join("Applications"));
        }
        Self { roots }
    }

    fn bundle_name(bundle: &Path) -> Option<String> {
        let info = bundle.join("Contents/Info.plist");
        let value = plist::Value::from_file(&info).ok()?;
        let dict = value.as_dictionary()?;
        for key in ["CFBundleDisplayName", "CFBundleName"] {
            if let Some(name) = dict.get(key).and_then(|v| v.as_string()) {
                return Some(name.to_string());
            }
        }
        None
    }
}

impl Default for PlistAppInventory {
    fn default() -> Self {
        Self::new()
    }
}

impl AppInventory for PlistAppInventory {
    fn installed_apps(&self) -> HashMap<PathBuf, String> {
        let mut apps = HashMap::new();
        for root in &self.roots {
            let Ok(read) = fs::read_dir(root) else { continue };
            for entry in read.filter_map(|e| e.ok()) {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("app") {
                    continue;
                }
                let name = Self::bundle_name(&path).unwrap_or_else(|| {
                    path.file_stem()
                        .and_then(|n| n.to_str())
                        .unwrap_or("?")
                        .to_string()
                });
                apps.insert(path, name);
            }
        }
        apps
    }
}

/// Cleanup-execution collaborator: trash moves, secure deletes, undo.
pub trait FileOps: Send + Sync {
    /// Opens an undo group; trash moves land inside it. Returns the token.
    fn begin_undo_group(&self) -> Result<String>;
    /// Moves `path` into the undo group's staging area; returns bytes freed.
    fn move_to_trash(&self, path: &Path, token: &str) -> Result<u64>;
    /// Irreversible removal; returns bytes freed.
    fn secure_delete(&self, path: &Path) -> Result<u64>;
    /// Restores everything recorded under `token`.
    fn undo(&self, token: &str) -> Result<()>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct UndoManifest {
    /// staged file name → original absolute path
    entries: HashMap<String, PathBuf>,
}

/// Trash-style file operations staged under the engine's data directory so
/// moves stay on the same volume and `rename` works.
pub struct StagingFileOps {
    staging_root: PathBuf,
}

impl StagingFileOps {
    pub fn new(staging_root: impl Into<PathBuf>) -> Self {
        Self {
            staging_root: staging_root.into(),
        }
    }

    fn manifest_path(&self, token: &str) -> PathBuf {
        self.staging_root.join(token).join("manifest.json")
    }

    fn load_manifest(&self, token: &str) -> Result<UndoManifest> {
        let raw = fs::read_to_string(self.manifest_path(token))?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn store_manifest(&self, token: &str, manifest: &UndoManifest) -> Result<()> {
        fs::write(
            self.manifest_path(token),
            serde_json::to_string_pretty(manifest)?,
        )?;
        Ok(())
    }
}

impl FileOps for StagingFileOps {
    fn begin_undo_group(&self) -> Result<String> {
        let token = format!("undo-{}", Utc::now().timestamp_millis());
        let dir = self.staging_root.join(&token);
        fs::create_dir_all(&dir)?;
        self.store_manifest(&token, &UndoManifest::default())?;
        Ok(token)
    }

    fn move_to_trash(&self, path: &Path, token: &str) -> Result<u64> {
        let meta = fs::symlink_metadata(path)
            .with_context(|| format!("stat {}", path.display()))?;
        let bytes = if meta.is_dir() {
            crate::scan::sizer::walk_size(path, usize::MAX)
        } else {
            meta.len()
        };

        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.to_string())
            .unwrap_or_else(|| "item".to_string());
        let mut manifest = self.load_manifest(token)?;
        // avoid collisions inside one undo group
        let staged_name = format!("{}-{}", manifest.entries.len(), name);
        let staged = self.staging_root.join(token).join(&staged_name);
        fs::rename(path, &staged).with_context(|| format!("trash {}", path.display()))?;

        manifest.entries.insert(staged_name, path.to_path_buf());
        self.store_manifest(token, &manifest)?;
        Ok(bytes)
    }

    fn secure_delete(&self, path: &Path) -> Result<u64> {
        let meta = fs::symlink_metadata(path)
            .with_context(|| format!("stat {}", path.display()))?;
        let bytes = if meta.is_dir() {
            let b = crate::scan::sizer::walk_size(path, usize::MAX);
            fs::remove_dir_all(path)?;
            b
        } else {
            let b = meta.len();
            fs::remove_file(path)?;
            b
        };
        Ok(bytes)
    }

    fn undo(&self, token: &str) -> Result<()> {
        let manifest = self.load_manifest(token)?;
        for (staged_name, original) in &manifest.entries {
            let staged = self.staging_root.join(token).join(staged_name);
            if !staged.exists() {
                continue;
            }
            if let Some(parent) = original.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::rename(&staged, original)
                .with_context(|| format!("restore {}", original.display()))?;
        }
        Ok(())
    }
}

pub trait VolumeStatsProvider: Send + Sync {
    fn usage(&self, path: &Path) -> Option<VolumeUsage>;
}

/// Volume capacity via `df -k`, parsed the same way the metadata subprocess
/// calls are.
pub struct DfVolumeStats;

impl VolumeStatsProvider for DfVolumeStats {
    fn usage(&self, path: &Path) -> Option<VolumeUsage> {
        let output = Command::new("df").arg("-k").arg(path).output().ok()?;
        if !output.status.success() {
            return None;
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_df_output(&stdout)
    }
}

fn parse_df_output(stdout: &str) -> Option<VolumeUsage> {
    let line = stdout.lines().nth(1)?;
    let fields: Vec<&str> = line.split_whitespace().collect();
    let total_kb: u64 = fields.get(1)?.parse().ok()?;
    let used_kb: u64 = fields.get(2)?.parse().ok()?;
    let free_kb: u64 = fields.get(3)?.parse().ok()?;
    Some(VolumeUsage {
        total: total_kb * 1024,
        used: used_kb * 1024,
        free: free_kb * 1024,
    })
}

#[derive(Debug, Clone)]
pub struct ProcessIoSample {
    pub pid: u32,
    pub name: String,
    pub read_bytes: u64,
    pub written_bytes: u64,
}

/// Best-effort process I/O statistics. The default implementation reports
/// nothing; the live monitor then falls back to path size deltas.
pub trait ProcessStats: Send + Sync {
    fn io_samples(&self) -> Vec<ProcessIoSample>;
}

pub struct NoopProcessStats;

impl ProcessStats for NoopProcessStats {
    fn io_samples(&self) -> Vec<ProcessIoSample> {
        Vec::new()
    }
}

/// Sink for cleanup outcomes and notable engine actions.
pub trait ActivityLog: Send + Sync {
    fn record(&self, action: &str, path: &Path, bytes: Option<u64>);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_df_kilobyte_columns() {
        let out = "Filesystem 1024-blocks Used Available Capacity Mounted on\n\
                   /dev/disk3s1 971350180 850000000 121350180 88% /\n";
        let usage = parse_df_output(out).unwrap();
        assert_eq!(usage.total, 971350180 * 1024);
        assert_eq!(usage.used, 850000000 * 1024);
        assert_eq!(usage.free, 121350180 * 1024);
        assert!(parse_df_output("junk").is_none());
    }

    #[test]
    fn trash_move_and_undo_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let staging = tmp.path().join("staging");
        let victim = tmp.path().join("victim.txt");
        fs::write(&victim, b"hello").unwrap();

        let ops = StagingFileOps::new(&staging);
        let token = ops.begin_undo_group().unwrap();
        let freed = ops.move_to_trash(&victim, &token).unwrap();
        assert_eq!(freed, 5);
        assert!(!victim.exists());

        ops.undo(&token).unwrap();
        assert!(victim.exists());
        assert_eq!(fs::read(&victim).unwrap(), b"hello");
    }

    #[test]
    fn secure_delete_reports_directory_bytes() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("junk");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("a"), vec![0u8; 100]).unwrap();
        fs::write(dir.join("b"), vec![0u8; 50]).unwrap();

        let ops = StagingFileOps::new(tmp.path().join("staging"));
        let freed = ops.secure_delete(&dir).unwrap();
        assert_eq!(freed, 150);
        assert!(!dir.exists());
    }
}
