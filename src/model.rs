use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanMode {
    Quick,
    Full,
    Targeted,
}

impl ScanMode {
    /// Full and targeted scans defer directory sizing to the recursive
    /// indexing pass; quick scans size directories eagerly.
    pub fn defers_directory_sizes(&self) -> bool {
        matches!(self, ScanMode::Full | ScanMode::Targeted)
    }
}

impl std::fmt::Display for ScanMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanMode::Quick => write!(f, "quick"),
            ScanMode::Full => write!(f, "full"),
            ScanMode::Targeted => write!(f, "targeted"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    Preparing,
    Scanning,
    Indexing,
    Completed,
    Cancelled,
    Failed,
}

impl ScanStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ScanStatus::Completed | ScanStatus::Cancelled | ScanStatus::Failed
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanScope {
    pub root: PathBuf,
    /// Explicit targets for targeted scans; empty otherwise.
    pub targets: Vec<PathBuf>,
}

impl ScanScope {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            targets: Vec::new(),
        }
    }

    pub fn with_targets(mut self, targets: Vec<PathBuf>) -> Self {
        self.targets = targets;
        self
    }
}

/// Wall-clock spent in each scan stage.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StageTimings {
    pub preparing: Duration,
    pub scanning: Duration,
    pub indexing: Duration,
}

/// One scan lifecycle. Created at scan start, mutated while the scan runs,
/// frozen at the terminal status. Only one session is active per engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanSession {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub mode: ScanMode,
    pub scope: ScanScope,
    pub status: ScanStatus,
    pub scanned_bytes: u64,
    pub scanned_items: u64,
    pub indexed_dirs: u64,
    pub indexed_nodes: u64,
    pub stage_timings: StageTimings,
    pub bytes_per_sec: f64,
    /// 0..=1, how much of the volume's reported usage the scan accounted for.
    pub confidence: f64,
    pub warnings: Vec<String>,
}

impl ScanSession {
    pub fn new(mode: ScanMode, scope: ScanScope) -> Self {
        let started_at = Utc::now();
        Self {
            id: format!("scan-{}", started_at.timestamp_millis()),
            started_at,
            mode,
            scope,
            status: ScanStatus::Preparing,
            scanned_bytes: 0,
            scanned_items: 0,
            indexed_dirs: 0,
            indexed_nodes: 0,
            stage_timings: StageTimings::default(),
            bytes_per_sec: 0.0,
            confidence: 0.0,
            warnings: Vec::new(),
        }
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    /// Base confidence by mode, docked per warning, floored at 0.5.
    pub fn finalize_confidence(&mut self) {
        let base = match self.mode {
            ScanMode::Quick => 0.85,
            ScanMode::Full | ScanMode::Targeted => 0.95,
        };
        let docked = base - 0.05 * self.warnings.len() as f64;
        self.confidence = docked.max(0.5);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    File,
    Directory,
    Package,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Protected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageDomain {
    System,
    Application,
    Developer,
    Cloud,
    User,
    Other,
}

impl std::fmt::Display for StorageDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageDomain::System => write!(f, "System"),
            StorageDomain::Application => write!(f, "Applications"),
            StorageDomain::Developer => write!(f, "Developer"),
            StorageDomain::Cloud => write!(f, "Cloud"),
            StorageDomain::User => write!(f, "User"),
            StorageDomain::Other => write!(f, "Other"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileTypeTag {
    Document,
    Image,
    Video,
    Audio,
    Archive,
    DiskImage,
    Code,
    Log,
    Cache,
    Database,
    Other,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ChildrenSummary {
    pub total: usize,
    pub loaded: usize,
    pub has_more: bool,
}

/// One indexed filesystem entry. Owned by the tree index once inserted;
/// consumers get clones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageNode {
    pub path: PathBuf,
    pub name: String,
    pub kind: NodeKind,
    pub logical_bytes: u64,
    pub physical_bytes: u64,
    pub children: ChildrenSummary,
    pub risk: RiskLevel,
    pub domain: StorageDomain,
    pub file_type: FileTypeTag,
    pub owner_app: Option<String>,
    pub volume_id: Option<u64>,
    pub depth: usize,
    pub hidden: bool,
    pub last_accessed: Option<DateTime<Utc>>,
    /// True when last-access was resolved cheaply rather than from Spotlight.
    pub access_estimated: bool,
    reclaimable_bytes: u64,
    /// True until a rollup or re-scan finalizes the size.
    pub size_estimated: bool,
}

impl StorageNode {
    pub fn new(path: impl Into<PathBuf>, kind: NodeKind) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("?")
            .to_string();
        let hidden = name.starts_with('.');
        Self {
            path,
            name,
            kind,
            logical_bytes: 0,
            physical_bytes: 0,
            children: ChildrenSummary::default(),
            risk: RiskLevel::Low,
            domain: StorageDomain::Other,
            file_type: FileTypeTag::Other,
            owner_app: None,
            volume_id: None,
            depth: 0,
            hidden,
            last_accessed: None,
            access_estimated: true,
            reclaimable_bytes: 0,
            size_estimated: false,
        }
    }

    pub fn with_size(mut self, logical: u64, estimated: bool) -> Self {
        self.logical_bytes = logical;
        self.physical_bytes = logical;
        self.size_estimated = estimated;
        self.clamp_reclaimable();
        self
    }

    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    pub fn reclaimable_bytes(&self) -> u64 {
        self.reclaimable_bytes
    }

    /// Invariant: reclaimable ≤ logical, and 0 whenever the node is protected.
    pub fn set_reclaimable(&mut self, bytes: u64) {
        self.reclaimable_bytes = bytes;
        self.clamp_reclaimable();
    }

    pub fn set_risk(&mut self, risk: RiskLevel) {
        self.risk = risk;
        self.clamp_reclaimable();
    }

    pub fn set_size(&mut self, logical: u64, estimated: bool) {
        self.logical_bytes = logical;
        self.physical_bytes = logical;
        self.size_estimated = estimated;
        self.clamp_reclaimable();
    }

    fn clamp_reclaimable(&mut self) {
        if self.risk == RiskLevel::Protected {
            self.reclaimable_bytes = 0;
        } else {
            self.reclaimable_bytes = self.reclaimable_bytes.min(self.logical_bytes);
        }
    }
}

/// Transient scan-time entry. Produced by the chunk scanner, consumed once by
/// the orchestrator; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirEntry {
    pub path: PathBuf,
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    pub size_estimated: bool,
    /// (device, inode) when available; the dedupe key for hard links.
    pub identity: Option<(u64, u64)>,
    pub hidden: bool,
}

impl DirEntry {
    pub fn new(path: impl Into<PathBuf>, is_dir: bool, size: u64) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("?")
            .to_string();
        let hidden = name.starts_with('.');
        Self {
            path,
            name,
            is_dir,
            size,
            size_estimated: false,
            identity: None,
            hidden,
        }
    }

    pub fn with_identity(mut self, device: u64, inode: u64) -> Self {
        self.identity = Some((device, inode));
        self
    }

    pub fn estimated(mut self) -> Self {
        self.size_estimated = true;
        self
    }
}

/// One unit of scan work: zero or one entries plus aggregate counters.
#[derive(Debug, Clone, Default)]
pub struct ChunkResult {
    pub entry: Option<DirEntry>,
    pub large_files: Vec<DirEntry>,
    pub files: u64,
    pub dirs: u64,
    pub bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protected_node_has_zero_reclaimable() {
        let mut node = StorageNode::new("/System/Library", NodeKind::Directory).with_size(1024, false);
        node.set_reclaimable(512);
        assert_eq!(node.reclaimable_bytes(), 512);

        node.set_risk(RiskLevel::Protected);
        assert_eq!(node.reclaimable_bytes(), 0);

        // stays pinned at zero even if someone tries to set it afterwards
        node.set_reclaimable(100);
        assert_eq!(node.reclaimable_bytes(), 0);
    }

    #[test]
    fn reclaimable_clamped_to_logical() {
        let mut node = StorageNode::new("/tmp/a", NodeKind::File).with_size(100, false);
        node.set_reclaimable(5000);
        assert_eq!(node.reclaimable_bytes(), 100);
    }

    #[test]
    fn confidence_docks_per_warning_with_floor() {
        let mut s = ScanSession::new(ScanMode::Quick, ScanScope::new("/tmp"));
        s.finalize_confidence();
        assert!((s.confidence - 0.85).abs() < f64::EPSILON);

        for _ in 0..20 {
            s.warn("du fallback");
        }
        s.finalize_confidence();
        assert!((s.confidence - 0.5).abs() < f64::EPSILON);
    }
}
