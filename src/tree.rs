use crate::classify::Classifier;
use crate::error::ScanError;
use crate::events::{CancelToken, EventSink, ProgressGate, ScanEvent};
use crate::model::{DirEntry, NodeKind, StorageNode};
use crate::pool::WorkerPool;
use crate::scan::chunk;
use std::collections::{HashMap, HashSet, VecDeque};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

/// Path-keyed store of indexed nodes forming the logical directory tree.
/// Mutated only by the scan orchestrator and the recursive indexer; readers
/// get point-in-time clones.
#[derive(Default)]
pub struct TreeIndex {
    nodes: HashMap<PathBuf, StorageNode>,
    children: HashMap<PathBuf, Vec<PathBuf>>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IndexStats {
    pub nodes: u64,
    pub dirs: u64,
}

impl TreeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn insert(&mut self, node: StorageNode) {
        if let Some(parent) = node.path.parent() {
            let siblings = self.children.entry(parent.to_path_buf()).or_default();
            if !siblings.contains(&node.path) {
                siblings.push(node.path.clone());
            }
        }
        self.nodes.insert(node.path.clone(), node);
    }

    pub fn get(&self, path: &Path) -> Option<&StorageNode> {
        self.nodes.get(path)
    }

    /// Read-only snapshot for consumers outside the engine.
    pub fn snapshot(&self, path: &Path) -> Option<StorageNode> {
        self.nodes.get(path).cloned()
    }

    pub fn children_of(&self, parent: &Path) -> Vec<StorageNode> {
        let Some(paths) = self.children.get(parent) else {
            return Vec::new();
        };
        let mut nodes: Vec<StorageNode> = paths
            .iter()
            .filter_map(|p| self.nodes.get(p).cloned())
            .collect();
        nodes.sort_by(|a, b| b.logical_bytes.cmp(&a.logical_bytes));
        nodes
    }

    pub fn iter_nodes(&self) -> impl Iterator<Item = &StorageNode> {
        self.nodes.values()
    }

    /// Lazy expansion. Cached children are returned as-is unless any child
    /// size is still an estimate, in which case the directory is re-scanned
    /// quick-style and the fresh result merged in. The parent's `has_more`
    /// flag is recomputed from the true immediate-child count.
    pub async fn load_children_if_needed(
        &mut self,
        parent: &Path,
        pool: &Arc<WorkerPool>,
        cancel: &CancelToken,
        classifier: &Classifier,
    ) -> Result<Vec<StorageNode>, ScanError> {
        let cached = self.children_of(parent);
        if !cached.is_empty() && cached.iter().all(|n| !n.size_estimated) {
            return Ok(cached);
        }

        let (entries, total_children) = scan_dir_quick(parent, pool, cancel).await?;
        let depth = self.nodes.get(parent).map(|n| n.depth + 1).unwrap_or(1);
        for entry in &entries {
            let mut node = node_from_entry(entry, depth);
            classifier.apply(&mut node);
            self.insert(node);
        }

        if let Some(parent_node) = self.nodes.get_mut(parent) {
            let loaded = entries.len();
            parent_node.children.total = total_children;
            parent_node.children.loaded = loaded;
            parent_node.children.has_more = loaded < total_children;
        }
        Ok(self.children_of(parent))
    }

    /// Bottom-up size recomputation. Memoized so deep trees are visited once;
    /// every directory with loaded children ends up with a finalized
    /// (non-estimated) rollup total.
    pub fn rollup(&mut self, root: &Path) -> u64 {
        let mut memo: HashMap<PathBuf, u64> = HashMap::new();
        self.rollup_inner(root, &mut memo)
    }

    fn rollup_inner(&mut self, path: &Path, memo: &mut HashMap<PathBuf, u64>) -> u64 {
        if let Some(total) = memo.get(path) {
            return *total;
        }
        let child_paths = self.children.get(path).cloned().unwrap_or_default();
        let total = if child_paths.is_empty() {
            // childless directories finalize too, or they would stay
            // size-estimated with nothing left to load
            match self.nodes.get_mut(path) {
                Some(node) => {
                    if node.kind != NodeKind::File && node.size_estimated {
                        let bytes = node.logical_bytes;
                        node.set_size(bytes, false);
                    }
                    node.logical_bytes
                }
                None => 0,
            }
        } else {
            let sum = child_paths
                .iter()
                .map(|c| self.rollup_inner(c, memo))
                .sum();
            if let Some(node) = self.nodes.get_mut(path) {
                if node.kind != NodeKind::File {
                    node.set_size(sum, false);
                }
            }
            sum
        };
        memo.insert(path.to_path_buf(), total);
        total
    }
}

pub fn node_from_entry(entry: &DirEntry, depth: usize) -> StorageNode {
    let kind = if entry.is_dir {
        NodeKind::Directory
    } else if entry.path.extension().and_then(|e| e.to_str()) == Some("app") {
        NodeKind::Package
    } else {
        NodeKind::File
    };
    let mut node = StorageNode::new(entry.path.clone(), kind)
        .with_size(entry.size, entry.size_estimated)
        .with_depth(depth);
    node.volume_id = entry.identity.map(|(dev, _)| dev);
    node
}

/// Lists one directory's immediate children as scan entries: symlinks
/// skipped, skip-set names excluded, files sized from metadata, directories
/// left size-estimated for the rollup. Returns the raw child count too.
fn list_immediate(parent: &Path) -> std::io::Result<(Vec<DirEntry>, usize)> {
    let mut entries = Vec::new();
    let mut total = 0usize;
    for dirent in std::fs::read_dir(parent)? {
        let Ok(dirent) = dirent else { continue };
        total += 1;
        let path = dirent.path();
        let Ok(meta) = std::fs::symlink_metadata(&path) else {
            continue;
        };
        if meta.file_type().is_symlink() {
            continue;
        }
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        if meta.is_dir() {
            if chunk::is_skipped_dir_name(name) {
                continue;
            }
            entries.push(
                DirEntry::new(&path, true, 0)
                    .with_identity(meta.dev(), meta.ino())
                    .estimated(),
            );
        } else {
            entries.push(
                DirEntry::new(&path, false, meta.len()).with_identity(meta.dev(), meta.ino()),
            );
        }
    }
    Ok((entries, total))
}

/// One-directory quick scan used by lazy expansion: sizes every child
/// eagerly through the worker pool.
async fn scan_dir_quick(
    parent: &Path,
    pool: &Arc<WorkerPool>,
    cancel: &CancelToken,
) -> Result<(Vec<DirEntry>, usize), ScanError> {
    let (listed, total) = list_immediate(parent).map_err(|e| ScanError::from_io(parent, &e))?;

    let mut tasks: JoinSet<Option<DirEntry>> = JoinSet::new();
    for entry in listed {
        if cancel.is_cancelled() {
            return Err(ScanError::Cancelled);
        }
        let pool = Arc::clone(pool);
        let cancel = cancel.clone();
        tasks.spawn(async move {
            let _permit = pool.acquire().await;
            if cancel.is_cancelled() {
                return None;
            }
            let result = chunk::scan_chunk(&entry.path, crate::model::ScanMode::Quick).await;
            result.entry
        });
    }

    let mut entries = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        if cancel.is_cancelled() {
            return Err(ScanError::Cancelled);
        }
        if let Ok(Some(entry)) = joined {
            entries.push(entry);
        }
    }
    entries.sort_by(|a, b| b.size.cmp(&a.size));
    Ok((entries, total))
}

/// Breadth-first coordinator for full/targeted scans. Maintains a work queue
/// seeded with the top-level directories (largest first), lists batches of
/// directories concurrently through the worker pool, classifies and inserts
/// their children, and re-enqueues newly discovered subdirectories. A
/// visited set prevents reprocessing a directory reached via two paths.
pub struct RecursiveIndexer<'a> {
    index: &'a mut TreeIndex,
    classifier: &'a Classifier,
    pool: Arc<WorkerPool>,
    events: EventSink,
    cancel: CancelToken,
    gate: ProgressGate,
}

impl<'a> RecursiveIndexer<'a> {
    pub fn new(
        index: &'a mut TreeIndex,
        classifier: &'a Classifier,
        pool: Arc<WorkerPool>,
        events: EventSink,
        cancel: CancelToken,
        item_threshold: u64,
        interval: Duration,
    ) -> Self {
        Self {
            index,
            classifier,
            pool,
            events,
            cancel,
            gate: ProgressGate::new(item_threshold, interval),
        }
    }

    pub async fn index_tree(
        &mut self,
        root: &Path,
        seeds: &[DirEntry],
    ) -> Result<IndexStats, ScanError> {
        let mut stats = IndexStats::default();
        let mut visited: HashSet<PathBuf> = HashSet::new();
        let mut queue: VecDeque<(PathBuf, usize)> = VecDeque::new();

        // Seed largest-first so the biggest subtrees index earliest.
        let mut ordered: Vec<&DirEntry> = seeds.iter().filter(|e| e.is_dir).collect();
        ordered.sort_by(|a, b| b.size.cmp(&a.size));
        for seed in ordered {
            if visited.insert(seed.path.clone()) {
                queue.push_back((seed.path.clone(), 1));
            }
        }
        visited.insert(root.to_path_buf());

        let mut pending_batch: Vec<StorageNode> = Vec::new();
        let mut first_emitted = false;
        let mut total_bytes = 0u64;

        while !queue.is_empty() {
            if self.cancel.is_cancelled() {
                return Err(ScanError::Cancelled);
            }

            // Batch bounded by the current effective worker count so thermal
            // retunes take effect between batches.
            let batch_size = self.pool.effective_workers().max(1);
            let mut tasks: JoinSet<(PathBuf, usize, std::io::Result<(Vec<DirEntry>, usize)>)> =
                JoinSet::new();
            for _ in 0..batch_size {
                let Some((dir, depth)) = queue.pop_front() else {
                    break;
                };
                let pool = Arc::clone(&self.pool);
                let cancel = self.cancel.clone();
                tasks.spawn(async move {
                    let _permit = pool.acquire().await;
                    if cancel.is_cancelled() {
                        return (dir, depth, Ok((Vec::new(), 0)));
                    }
                    let list_dir = dir.clone();
                    let listed = tokio::task::spawn_blocking(move || list_immediate(&list_dir))
                        .await
                        .unwrap_or_else(|e| Err(std::io::Error::other(e)));
                    (dir, depth, listed)
                });
            }

            while let Some(joined) = tasks.join_next().await {
                if self.cancel.is_cancelled() {
                    return Err(ScanError::Cancelled);
                }
                let Ok((dir, depth, listed)) = joined else {
                    continue;
                };
                let (entries, total_children) = match listed {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::warn!(dir = %dir.display(), error = %e, "listing failed during indexing");
                        continue;
                    }
                };

                for entry in &entries {
                    let mut node = node_from_entry(entry, depth);
                    self.classifier.apply(&mut node);
                    total_bytes += node.logical_bytes;
                    stats.nodes += 1;
                    if entry.is_dir {
                        stats.dirs += 1;
                        if visited.insert(entry.path.clone()) {
                            queue.push_back((entry.path.clone(), depth + 1));
                        }
                    }
                    if !first_emitted {
                        first_emitted = true;
                        self.events.emit(ScanEvent::NodeIndexed(node.clone()));
                    }
                    pending_batch.push(node.clone());
                    self.index.insert(node);
                }

                if let Some(parent_node) = self.index.nodes.get_mut(&dir) {
                    parent_node.children.total = total_children;
                    parent_node.children.loaded = entries.len();
                    parent_node.children.has_more = entries.len() < total_children;
                }

                if self.gate.should_emit(stats.nodes) && !pending_batch.is_empty() {
                    self.events
                        .emit(ScanEvent::NodeIndexedBatch(std::mem::take(&mut pending_batch)));
                    self.events.emit(ScanEvent::Progress {
                        items: stats.nodes,
                        bytes: total_bytes,
                        current_path: Some(dir.display().to_string()),
                    });
                }
            }
        }

        if !pending_batch.is_empty() {
            self.events
                .emit(ScanEvent::NodeIndexedBatch(pending_batch));
        }
        Ok(stats)
    }
}
