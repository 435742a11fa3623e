use crate::collab::{ActivityLog, FileOps, VolumeStatsProvider, VolumeUsage};
use crate::error::BlockedReason;
use crate::history::ExclusionStore;
use crate::model::{RiskLevel, StorageNode};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupAction {
    MoveToTrash,
    SecureDelete,
    ExcludeForever,
}

/// One node proposed for action. Lives in the cart until a plan executes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupCandidate {
    pub path: PathBuf,
    pub name: String,
    pub action: CleanupAction,
    pub estimated_bytes: u64,
    pub risk: RiskLevel,
    pub rationale: String,
    pub identity: Option<(u64, u64)>,
    pub blocked: Option<BlockedReason>,
}

impl CleanupCandidate {
    pub fn is_executable(&self) -> bool {
        self.blocked.is_none()
    }
}

fn safety_rationale(risk: RiskLevel) -> &'static str {
    match risk {
        RiskLevel::Low => "Regenerates automatically; safe to remove",
        RiskLevel::Medium => "App data; the owning app may need to rebuild it",
        RiskLevel::High => "System-adjacent; remove only if you know what it is",
        RiskLevel::Protected => "Operating system component; cannot be removed",
    }
}

/// The user-selected set of nodes pending cleanup.
#[derive(Default)]
pub struct Cart {
    items: Vec<CleanupCandidate>,
}

impl Cart {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node, computing its blocking state against the exclusion set
    /// and the candidates already present. Nothing touches the filesystem.
    pub fn add(
        &mut self,
        node: &StorageNode,
        action: CleanupAction,
        exclusions: &ExclusionStore,
    ) -> &CleanupCandidate {
        let identity = node_identity(node);

        let blocked = if node.risk == RiskLevel::Protected {
            Some(BlockedReason::Protected)
        } else if exclusions.contains(&node.path) {
            Some(BlockedReason::Excluded)
        } else if identity.is_some()
            && self
                .items
                .iter()
                .any(|c| c.identity == identity && c.is_executable())
        {
            Some(BlockedReason::DuplicateIdentity)
        } else if node.reclaimable_bytes() == 0 && action != CleanupAction::ExcludeForever {
            Some(BlockedReason::NoReclaimableSize)
        } else {
            None
        };

        let idx = self.items.len();
        self.items.push(CleanupCandidate {
            path: node.path.clone(),
            name: node.name.clone(),
            action,
            estimated_bytes: node.reclaimable_bytes(),
            risk: node.risk,
            rationale: safety_rationale(node.risk).to_string(),
            identity,
            blocked,
        });
        &self.items[idx]
    }

    /// Candidates eligible for execution (blocked ones filtered out).
    pub fn executable(&self) -> Vec<&CleanupCandidate> {
        self.items.iter().filter(|c| c.is_executable()).collect()
    }

    pub fn items(&self) -> &[CleanupCandidate] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn remove(&mut self, path: &Path) {
        self.items.retain(|c| c.path != path);
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    fn retain_paths(&mut self, keep: &[PathBuf]) {
        self.items.retain(|c| keep.contains(&c.path));
    }
}

fn node_identity(node: &StorageNode) -> Option<(u64, u64)> {
    // Nodes carry the device id; the inode is resolved lazily from the
    // filesystem so cart identity survives index refreshes.
    use std::os::unix::fs::MetadataExt;
    let meta = std::fs::symlink_metadata(&node.path).ok()?;
    Some((meta.dev(), meta.ino()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanPhase {
    DryRun,
    Executing,
    Completed,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DryRunSummary {
    pub would_clean_bytes: u64,
    pub would_exclude_bytes: u64,
    pub blocked: Vec<(PathBuf, BlockedReason)>,
}

/// Ordered candidate list plus its dry-run simulation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupPlan {
    pub candidates: Vec<CleanupCandidate>,
    pub dry_run: DryRunSummary,
    pub phase: PlanPhase,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CleanupExecutionResult {
    pub cleaned_count: usize,
    pub excluded_count: usize,
    pub failed: Vec<(PathBuf, String)>,
    pub bytes_freed: u64,
    pub before: Option<VolumeUsage>,
    pub after: Option<VolumeUsage>,
    /// Present only when at least one trash move succeeded.
    pub undo_token: Option<String>,
}

/// Turns a cart into a dry-run plan and, on confirmation, an executed plan.
/// Per-path failures never abort the rest of the batch.
pub struct CleanupExecutor {
    file_ops: Box<dyn FileOps>,
    activity: Box<dyn ActivityLog>,
    volumes: Box<dyn VolumeStatsProvider>,
}

impl CleanupExecutor {
    pub fn new(
        file_ops: Box<dyn FileOps>,
        activity: Box<dyn ActivityLog>,
        volumes: Box<dyn VolumeStatsProvider>,
    ) -> Self {
        Self {
            file_ops,
            activity,
            volumes,
        }
    }

    /// Dry run: pure computation over the cart. Running it twice over an
    /// unchanged cart produces identical totals.
    pub fn prepare_plan(&self, cart: &Cart) -> CleanupPlan {
        let mut summary = DryRunSummary::default();
        for candidate in cart.items() {
            match candidate.blocked {
                Some(reason) => summary.blocked.push((candidate.path.clone(), reason)),
                None => match candidate.action {
                    CleanupAction::ExcludeForever => {
                        summary.would_exclude_bytes += candidate.estimated_bytes;
                    }
                    CleanupAction::MoveToTrash | CleanupAction::SecureDelete => {
                        summary.would_clean_bytes += candidate.estimated_bytes;
                    }
                },
            }
        }
        CleanupPlan {
            candidates: cart.items().to_vec(),
            dry_run: summary,
            phase: PlanPhase::DryRun,
        }
    }

    /// Executes a confirmed plan. Succeeded paths leave the cart; failed
    /// paths stay selectable for retry.
    pub fn execute(
        &self,
        mut plan: CleanupPlan,
        cart: &mut Cart,
        exclusions: &mut ExclusionStore,
        volume_root: &Path,
    ) -> CleanupExecutionResult {
        plan.phase = PlanPhase::Executing;
        let before = self.volumes.usage(volume_root);

        let mut result = CleanupExecutionResult {
            cleaned_count: 0,
            excluded_count: 0,
            failed: Vec::new(),
            bytes_freed: 0,
            before,
            after: None,
            undo_token: None,
        };
        let mut survivors: Vec<PathBuf> = Vec::new();
        let mut undo_token: Option<String> = None;
        let mut trashed = 0usize;

        for candidate in plan.candidates.iter().filter(|c| c.is_executable()) {
            match candidate.action {
                CleanupAction::ExcludeForever => {
                    // Policy-only: no filesystem mutation.
                    match exclusions.add(&candidate.path) {
                        Ok(()) => {
                            result.excluded_count += 1;
                            self.activity.record("EXCLUDE", &candidate.path, None);
                        }
                        Err(e) => {
                            survivors.push(candidate.path.clone());
                            result.failed.push((candidate.path.clone(), e.to_string()));
                        }
                    }
                }
                CleanupAction::MoveToTrash => {
                    let token = match &undo_token {
                        Some(t) => t.clone(),
                        None => match self.file_ops.begin_undo_group() {
                            Ok(t) => {
                                undo_token = Some(t.clone());
                                t
                            }
                            Err(e) => {
                                survivors.push(candidate.path.clone());
                                result.failed.push((candidate.path.clone(), e.to_string()));
                                continue;
                            }
                        },
                    };
                    match self.file_ops.move_to_trash(&candidate.path, &token) {
                        Ok(bytes) => {
                            result.cleaned_count += 1;
                            result.bytes_freed += bytes;
                            trashed += 1;
                            self.activity.record("TRASH", &candidate.path, Some(bytes));
                        }
                        Err(e) => {
                            survivors.push(candidate.path.clone());
                            result.failed.push((candidate.path.clone(), e.to_string()));
                        }
                    }
                }
                CleanupAction::SecureDelete => {
                    match self.file_ops.secure_delete(&candidate.path) {
                        Ok(bytes) => {
                            result.cleaned_count += 1;
                            result.bytes_freed += bytes;
                            self.activity.record("DELETE", &candidate.path, Some(bytes));
                        }
                        Err(e) => {
                            survivors.push(candidate.path.clone());
                            result.failed.push((candidate.path.clone(), e.to_string()));
                        }
                    }
                }
            }
        }

        // Blocked candidates also stay in the cart for the user to revisit.
        for candidate in plan.candidates.iter().filter(|c| !c.is_executable()) {
            survivors.push(candidate.path.clone());
        }

        cart.retain_paths(&survivors);
        result.after = self.volumes.usage(volume_root);
        // Undo only makes sense for trash moves that actually happened;
        // secure deletes are not restorable.
        result.undo_token = if trashed > 0 { undo_token } else { None };
        result
    }

    pub fn undo(&self, token: &str) -> anyhow::Result<()> {
        self.file_ops.undo(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::StagingFileOps;
    use crate::model::NodeKind;
    use std::sync::Mutex;

    struct NullLog(Mutex<Vec<String>>);
    impl ActivityLog for NullLog {
        fn record(&self, action: &str, path: &Path, _bytes: Option<u64>) {
            self.0
                .lock()
                .unwrap()
                .push(format!("{action} {}", path.display()));
        }
    }

    struct NoVolumes;
    impl VolumeStatsProvider for NoVolumes {
        fn usage(&self, _path: &Path) -> Option<VolumeUsage> {
            None
        }
    }

    fn node(path: &Path, size: u64, risk: RiskLevel) -> StorageNode {
        let mut n = StorageNode::new(path, NodeKind::File).with_size(size, false);
        n.set_risk(risk);
        n.set_reclaimable(size);
        n
    }

    fn executor(staging: &Path) -> CleanupExecutor {
        CleanupExecutor::new(
            Box::new(StagingFileOps::new(staging)),
            Box::new(NullLog(Mutex::new(Vec::new()))),
            Box::new(NoVolumes),
        )
    }

    #[test]
    fn protected_node_is_blocked_and_not_executable() {
        let tmp = tempfile::tempdir().unwrap();
        let exclusions = ExclusionStore::load(tmp.path().join("ex.json"));
        let mut cart = Cart::new();

        let protected = node(&tmp.path().join("sys"), 100, RiskLevel::Protected);
        let added = cart.add(&protected, CleanupAction::MoveToTrash, &exclusions);
        assert_eq!(added.blocked, Some(BlockedReason::Protected));
        assert!(cart.executable().is_empty());
    }

    #[test]
    fn zero_reclaimable_is_blocked_except_for_exclusion() {
        let tmp = tempfile::tempdir().unwrap();
        let exclusions = ExclusionStore::load(tmp.path().join("ex.json"));
        let mut cart = Cart::new();

        let empty = node(&tmp.path().join("empty"), 0, RiskLevel::Low);
        let added = cart.add(&empty, CleanupAction::MoveToTrash, &exclusions);
        assert_eq!(added.blocked, Some(BlockedReason::NoReclaimableSize));

        let added = cart.add(&empty, CleanupAction::ExcludeForever, &exclusions);
        assert!(added.blocked.is_none());
    }

    #[test]
    fn hard_link_twin_is_blocked_as_duplicate() {
        let tmp = tempfile::tempdir().unwrap();
        let exclusions = ExclusionStore::load(tmp.path().join("ex.json"));
        let original = tmp.path().join("orig.bin");
        std::fs::write(&original, vec![0u8; 512]).unwrap();
        let twin = tmp.path().join("twin.bin");
        std::fs::hard_link(&original, &twin).unwrap();

        let mut cart = Cart::new();
        cart.add(
            &node(&original, 512, RiskLevel::Low),
            CleanupAction::MoveToTrash,
            &exclusions,
        );
        let second = cart.add(
            &node(&twin, 512, RiskLevel::Low),
            CleanupAction::MoveToTrash,
            &exclusions,
        );
        assert_eq!(second.blocked, Some(BlockedReason::DuplicateIdentity));
        assert_eq!(cart.executable().len(), 1);
    }

    #[test]
    fn dry_run_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let exclusions = ExclusionStore::load(tmp.path().join("ex.json"));
        let file = tmp.path().join("junk.log");
        std::fs::write(&file, vec![0u8; 256]).unwrap();

        let mut cart = Cart::new();
        cart.add(
            &node(&file, 256, RiskLevel::Low),
            CleanupAction::MoveToTrash,
            &exclusions,
        );

        let exec = executor(&tmp.path().join("staging"));
        let first = exec.prepare_plan(&cart);
        let second = exec.prepare_plan(&cart);
        assert_eq!(
            first.dry_run.would_clean_bytes,
            second.dry_run.would_clean_bytes
        );
        assert_eq!(first.dry_run.blocked.len(), second.dry_run.blocked.len());
        assert_eq!(first.phase, PlanPhase::DryRun);
        assert!(file.exists(), "dry run must not touch the filesystem");
    }

    #[test]
    fn execution_clears_successes_and_keeps_failures() {
        let tmp = tempfile::tempdir().unwrap();
        let mut exclusions = ExclusionStore::load(tmp.path().join("ex.json"));
        let present = tmp.path().join("present.tmp");
        std::fs::write(&present, vec![0u8; 128]).unwrap();
        let ghost = tmp.path().join("ghost.tmp");

        let mut cart = Cart::new();
        cart.add(
            &node(&present, 128, RiskLevel::Low),
            CleanupAction::MoveToTrash,
            &exclusions,
        );
        // the ghost has no filesystem identity; trash will fail on it
        let mut ghost_node = StorageNode::new(&ghost, NodeKind::File).with_size(64, false);
        ghost_node.set_reclaimable(64);
        cart.add(&ghost_node, CleanupAction::MoveToTrash, &exclusions);

        let exec = executor(&tmp.path().join("staging"));
        let plan = exec.prepare_plan(&cart);
        let result = exec.execute(plan, &mut cart, &mut exclusions, tmp.path());

        assert_eq!(result.cleaned_count, 1);
        assert_eq!(result.failed.len(), 1);
        assert_eq!(result.bytes_freed, 128);
        assert!(result.undo_token.is_some());
        // failed path remains selectable for retry
        assert_eq!(cart.len(), 1);
        assert_eq!(cart.items()[0].path, ghost);
    }

    #[test]
    fn no_undo_token_when_only_secure_deletes_succeed() {
        let tmp = tempfile::tempdir().unwrap();
        let mut exclusions = ExclusionStore::load(tmp.path().join("ex.json"));
        let shred = tmp.path().join("shred.dat");
        std::fs::write(&shred, vec![0u8; 32]).unwrap();
        let ghost = tmp.path().join("ghost.tmp");

        let mut cart = Cart::new();
        cart.add(
            &node(&shred, 32, RiskLevel::Low),
            CleanupAction::SecureDelete,
            &exclusions,
        );
        // trash of a missing path opens an undo group and then fails;
        // the group covers nothing and must not be reported
        let mut ghost_node = StorageNode::new(&ghost, NodeKind::File).with_size(16, false);
        ghost_node.set_reclaimable(16);
        cart.add(&ghost_node, CleanupAction::MoveToTrash, &exclusions);

        let exec = executor(&tmp.path().join("staging"));
        let plan = exec.prepare_plan(&cart);
        let result = exec.execute(plan, &mut cart, &mut exclusions, tmp.path());

        assert_eq!(result.cleaned_count, 1);
        assert_eq!(result.failed.len(), 1);
        assert!(result.undo_token.is_none());
        assert!(!shred.exists());
    }

    #[test]
    fn exclude_forever_updates_policy_without_touching_files() {
        let tmp = tempfile::tempdir().unwrap();
        let mut exclusions = ExclusionStore::load(tmp.path().join("ex.json"));
        let keep = tmp.path().join("keep.dat");
        std::fs::write(&keep, vec![0u8; 64]).unwrap();

        let mut cart = Cart::new();
        cart.add(
            &node(&keep, 64, RiskLevel::Low),
            CleanupAction::ExcludeForever,
            &exclusions,
        );
        let exec = executor(&tmp.path().join("staging"));
        let plan = exec.prepare_plan(&cart);
        assert_eq!(plan.dry_run.would_exclude_bytes, 64);

        let result = exec.execute(plan, &mut cart, &mut exclusions, tmp.path());
        assert_eq!(result.excluded_count, 1);
        assert!(result.undo_token.is_none());
        assert!(keep.exists());
        assert!(exclusions.contains(&keep));
        assert!(cart.is_empty());
    }
}
