use crate::error::ScanError;
use crate::events::{CancelToken, EventSink, ProgressGate, ScanEvent};
use crate::model::{ChunkResult, DirEntry, ScanMode, ScanScope, ScanSession, ScanStatus};
use crate::pool::WorkerPool;
use crate::scan::{chunk, sizer};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub timeout: Duration,
    pub progress_item_threshold: u64,
    pub progress_interval: Duration,
    pub excluded_paths: Vec<PathBuf>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            progress_item_threshold: 250,
            progress_interval: Duration::from_millis(500),
            excluded_paths: Vec::new(),
        }
    }
}

/// Final, deterministic result of one scan: entries and large files sorted by
/// descending size, deduplicated by filesystem identity.
#[derive(Debug)]
pub struct ScanOutcome {
    pub session: ScanSession,
    pub entries: Vec<DirEntry>,
    pub large_files: Vec<DirEntry>,
}

/// Dedupe key: (device, inode) when the platform provides it, canonical-ish
/// path otherwise. Protects against double-counting hard links and symlink
/// targets reachable via two parents.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntryKey {
    Identity(u64, u64),
    Path(PathBuf),
}

impl EntryKey {
    pub fn of(entry: &DirEntry) -> Self {
        match entry.identity {
            Some((dev, ino)) => EntryKey::Identity(dev, ino),
            None => EntryKey::Path(entry.path.clone()),
        }
    }
}

/// Largest-observed-size-wins merge. Idempotent: merging the same entry twice
/// yields the same map as merging it once.
pub fn merge_keep_largest(acc: &mut HashMap<EntryKey, DirEntry>, entry: DirEntry) {
    let key = EntryKey::of(&entry);
    match acc.get_mut(&key) {
        Some(existing) => {
            if entry.size > existing.size {
                *existing = entry;
            }
        }
        None => {
            acc.insert(key, entry);
        }
    }
}

fn sorted_desc(map: HashMap<EntryKey, DirEntry>) -> Vec<DirEntry> {
    let mut entries: Vec<DirEntry> = map.into_values().collect();
    entries.sort_by(|a, b| b.size.cmp(&a.size).then_with(|| a.path.cmp(&b.path)));
    entries
}

pub struct ScanOrchestrator {
    pool: Arc<WorkerPool>,
    events: EventSink,
    cancel: CancelToken,
    options: ScanOptions,
}

impl ScanOrchestrator {
    pub fn new(
        pool: Arc<WorkerPool>,
        events: EventSink,
        cancel: CancelToken,
        options: ScanOptions,
    ) -> Self {
        Self {
            pool,
            events,
            cancel,
            options,
        }
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Runs the whole scan under the global timeout. The scan body and the
    /// timer race; whichever finishes first wins and the loser is dropped,
    /// which aborts its in-flight chunk tasks and releases their permits.
    pub async fn scan(&self, root: &Path, mode: ScanMode) -> Result<ScanOutcome, ScanError> {
        let result = tokio::select! {
            r = self.run(root, mode) => r,
            _ = tokio::time::sleep(self.options.timeout) => {
                self.cancel.cancel();
                Err(ScanError::Timeout(self.options.timeout))
            }
            _ = self.cancel.cancelled() => Err(ScanError::Cancelled),
        };

        match &result {
            Ok(outcome) => {
                self.events
                    .emit(ScanEvent::Completed(Box::new(outcome.session.clone())));
            }
            Err(ScanError::Cancelled) => self.events.emit(ScanEvent::Cancelled),
            Err(e) => self.events.emit(ScanEvent::Failed(e.to_string())),
        }
        result
    }

    /// The scan stage alone: no timeout race, no terminal event. The engine
    /// composes this with recursive indexing under a single deadline and
    /// emits the terminal event once the whole pipeline settles.
    pub async fn scan_stage(&self, root: &Path, mode: ScanMode) -> Result<ScanOutcome, ScanError> {
        self.run(root, mode).await
    }

    async fn run(&self, root: &Path, mode: ScanMode) -> Result<ScanOutcome, ScanError> {
        let mut session = ScanSession::new(mode, ScanScope::new(root));
        let prepare_start = Instant::now();
        self.events
            .emit(ScanEvent::PhaseStarted("preparing".into()));

        let meta =
            std::fs::symlink_metadata(root).map_err(|e| ScanError::from_io(root, &e))?;
        if !meta.is_dir() {
            return Err(ScanError::NotFound(root.to_path_buf()));
        }

        let children = self.list_children(root)?;
        session.stage_timings.preparing = prepare_start.elapsed();
        session.status = ScanStatus::Scanning;
        self.events.emit(ScanEvent::PhaseStarted("scanning".into()));

        let scan_start = Instant::now();
        let mut tasks: JoinSet<ChunkResult> = JoinSet::new();
        for child in children {
            if self.cancel.is_cancelled() {
                return Err(ScanError::Cancelled);
            }
            let pool = Arc::clone(&self.pool);
            let cancel = self.cancel.clone();
            tasks.spawn(async move {
                let _permit = pool.acquire().await;
                if cancel.is_cancelled() {
                    return ChunkResult::default();
                }
                chunk::scan_chunk(&child, mode).await
            });
        }

        // Merge in completion order; determinism comes from the final
        // dedupe-and-sort, not from arrival order.
        let mut merged: HashMap<EntryKey, DirEntry> = HashMap::new();
        let mut large: HashMap<EntryKey, DirEntry> = HashMap::new();
        let mut files = 0u64;
        let mut dirs = 0u64;
        let mut running_bytes = 0u64;
        let mut gate = ProgressGate::new(
            self.options.progress_item_threshold,
            self.options.progress_interval,
        );

        while let Some(joined) = tasks.join_next().await {
            if self.cancel.is_cancelled() {
                return Err(ScanError::Cancelled);
            }
            let chunk = match joined {
                Ok(c) => c,
                Err(e) => {
                    if e.is_cancelled() {
                        continue;
                    }
                    session.warn(format!("chunk task failed: {e}"));
                    continue;
                }
            };

            files += chunk.files;
            dirs += chunk.dirs;
            running_bytes += chunk.bytes;
            let current = chunk
                .entry
                .as_ref()
                .map(|e| e.path.display().to_string());
            for lf in chunk.large_files {
                merge_keep_largest(&mut large, lf);
            }
            if let Some(entry) = chunk.entry {
                merge_keep_largest(&mut merged, entry);
            }

            if gate.should_emit(files + dirs) {
                self.events.emit(ScanEvent::Progress {
                    items: files + dirs,
                    bytes: running_bytes,
                    current_path: current,
                });
            }
        }

        session.stage_timings.scanning = scan_start.elapsed();

        let entries = sorted_desc(merged);
        let mut large_files = sorted_desc(large);
        if large_files.is_empty() && mode == ScanMode::Quick {
            large_files =
                sizer::spotlight_large_files(root, chunk::LARGE_FILE_MIN_BYTES).await;
            if !large_files.is_empty() {
                session.warn("large files resolved via content index fallback".to_string());
            }
        }

        // Counters settle on the deduplicated view so hard links count once.
        session.scanned_items = files + dirs;
        session.scanned_bytes = entries.iter().map(|e| e.size).sum();
        let secs = session.stage_timings.scanning.as_secs_f64();
        if secs > 0.0 {
            session.bytes_per_sec = session.scanned_bytes as f64 / secs;
        }
        session.status = ScanStatus::Completed;
        session.finalize_confidence();

        // Final snapshot is emitted unconditionally, even for trivial scans.
        self.events.emit(ScanEvent::Progress {
            items: session.scanned_items,
            bytes: session.scanned_bytes,
            current_path: None,
        });

        Ok(ScanOutcome {
            session,
            entries,
            large_files,
        })
    }

    fn list_children(&self, root: &Path) -> Result<Vec<PathBuf>, ScanError> {
        let read = std::fs::read_dir(root).map_err(|e| ScanError::from_io(root, &e))?;
        let children = read
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                !self
                    .options
                    .excluded_paths
                    .iter()
                    .any(|ex| p.starts_with(ex))
            })
            .collect();
        Ok(children)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str, size: u64, identity: Option<(u64, u64)>) -> DirEntry {
        let mut e = DirEntry::new(path, false, size);
        e.identity = identity;
        e
    }

    #[test]
    fn merge_is_idempotent_and_keeps_largest() {
        let mut map = HashMap::new();
        merge_keep_largest(&mut map, entry("/a", 100, Some((1, 7))));
        merge_keep_largest(&mut map, entry("/b", 250, Some((1, 7))));
        merge_keep_largest(&mut map, entry("/b", 250, Some((1, 7))));
        assert_eq!(map.len(), 1);
        assert_eq!(map.values().next().unwrap().size, 250);

        let snapshot: Vec<_> = map.values().cloned().collect();
        merge_keep_largest(&mut map, entry("/b", 250, Some((1, 7))));
        let again: Vec<_> = map.values().cloned().collect();
        assert_eq!(snapshot.len(), again.len());
        assert_eq!(snapshot[0].size, again[0].size);
    }

    #[test]
    fn hard_links_collapse_to_one_entry() {
        let mut map = HashMap::new();
        merge_keep_largest(&mut map, entry("/dir/one", 500, Some((3, 42))));
        merge_keep_largest(&mut map, entry("/dir/two", 500, Some((3, 42))));
        let entries = sorted_desc(map);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries.iter().map(|e| e.size).sum::<u64>(), 500);
    }

    #[test]
    fn entries_without_identity_fall_back_to_path_key() {
        let mut map = HashMap::new();
        merge_keep_largest(&mut map, entry("/a", 10, None));
        merge_keep_largest(&mut map, entry("/b", 20, None));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn sort_is_descending_and_stable_by_path() {
        let mut map = HashMap::new();
        merge_keep_largest(&mut map, entry("/small", 10, Some((1, 1))));
        merge_keep_largest(&mut map, entry("/big", 999, Some((1, 2))));
        merge_keep_largest(&mut map, entry("/mid", 50, Some((1, 3))));
        let sorted = sorted_desc(map);
        let sizes: Vec<u64> = sorted.iter().map(|e| e.size).collect();
        assert_eq!(sizes, vec![999, 50, 10]);
    }
}
