use crate::classify::Classifier;
use crate::collab::{AppInventory, PlistAppInventory, VolumeStatsProvider, VolumeUsage};
use crate::config::EngineConfig;
use crate::error::ScanError;
use crate::events::{CancelToken, EventSink, ScanEvent};
use crate::history::{HistoryStore, StorageScanHistoryEntry};
use crate::insights::{
    self, StorageAnomaly, StorageForecast, StorageInsight, TimeShiftSummary,
};
use crate::junk::{JunkCategoryResult, JunkScanner};
use crate::model::{DirEntry, ScanMode, ScanSession, ScanStatus, StorageDomain, StorageNode};
use crate::planner::{self, GuidedStep, PersonaBundle, ReclaimPack};
use crate::pool::{ThermalState, WorkerPool};
use crate::scan::{ScanOrchestrator, ScanOutcome};
use crate::tree::{node_from_entry, RecursiveIndexer, TreeIndex};
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::UnboundedReceiver;

/// Everything one scan produces, ready for presentation.
#[derive(Debug)]
pub struct ScanReport {
    pub session: ScanSession,
    pub entries: Vec<DirEntry>,
    pub large_files: Vec<DirEntry>,
    pub packs: Vec<ReclaimPack>,
    pub persona_bundles: Vec<PersonaBundle>,
    pub guided: Vec<GuidedStep>,
    pub insights: Vec<StorageInsight>,
    pub forecast: StorageForecast,
    pub anomalies: Vec<StorageAnomaly>,
    pub time_shift: Option<TimeShiftSummary>,
    pub domains: HashMap<StorageDomain, u64>,
    pub volume: Option<VolumeUsage>,
}

/// Facade owning the worker pool, the tree index and the persistent stores.
/// One session at a time: beginning a new session supersedes the previous
/// token, so a still-running scan sees cancellation at its next check.
pub struct StorageEngine {
    config: EngineConfig,
    pool: Arc<WorkerPool>,
    index: TreeIndex,
    classifier: Classifier,
    junk: Arc<dyn JunkScanner>,
    volumes: Box<dyn VolumeStatsProvider>,
    history: HistoryStore,
    events: EventSink,
    cancel: CancelToken,
}

impl StorageEngine {
    pub fn new(
        config: EngineConfig,
        junk: Arc<dyn JunkScanner>,
        volumes: Box<dyn VolumeStatsProvider>,
        history: HistoryStore,
    ) -> Self {
        let pool = Arc::new(WorkerPool::new(config.workers));
        let apps = PlistAppInventory::new().installed_apps();
        let cancel = CancelToken::new();
        let (events, _) = EventSink::channel(cancel.clone());
        Self {
            config,
            pool,
            index: TreeIndex::new(),
            classifier: Classifier::new(apps),
            junk,
            volumes,
            history,
            events,
            cancel,
        }
    }

    /// Opens a fresh event stream for the next scan and supersedes any
    /// session still running on the previous token.
    pub fn subscribe(&mut self) -> UnboundedReceiver<ScanEvent> {
        self.cancel.cancel();
        let cancel = CancelToken::new();
        let (events, receiver) = EventSink::channel(cancel.clone());
        self.cancel = cancel;
        self.events = events;
        receiver
    }

    /// Token for the current session; cancelling it stops the active scan.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn index(&self) -> &TreeIndex {
        &self.index
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn set_thermal_state(&self, thermal: ThermalState) {
        self.pool.set_thermal_state(thermal);
    }

    /// Runs the full pipeline for one root: chunked scan, recursive indexing
    /// for deep modes, junk categorization, reclaim planning, insights and
    /// history. The whole pipeline shares one deadline and one cancel token.
    pub async fn scan(&mut self, root: &Path, mode: ScanMode) -> Result<ScanReport, ScanError> {
        if self.cancel.is_cancelled() {
            // previous session consumed this token; start a clean one
            let _ = self.subscribe();
        }
        let cancel = self.cancel.clone();
        let events = self.events.clone();
        let timeout = self.config.scan_options().timeout;

        let result = tokio::select! {
            r = self.pipeline(root, mode) => r,
            _ = tokio::time::sleep(timeout) => {
                cancel.cancel();
                Err(ScanError::Timeout(timeout))
            }
            _ = cancel.cancelled() => Err(ScanError::Cancelled),
        };

        match &result {
            Ok(report) => {
                events.emit(ScanEvent::Completed(Box::new(report.session.clone())));
            }
            Err(ScanError::Cancelled) => events.emit(ScanEvent::Cancelled),
            Err(e) => events.emit(ScanEvent::Failed(e.to_string())),
        }
        result
    }

    async fn pipeline(&mut self, root: &Path, mode: ScanMode) -> Result<ScanReport, ScanError> {
        let options = self.config.scan_options();
        let orchestrator = ScanOrchestrator::new(
            Arc::clone(&self.pool),
            self.events.clone(),
            self.cancel.clone(),
            options.clone(),
        );
        let ScanOutcome {
            mut session,
            entries,
            large_files,
        } = orchestrator.scan_stage(root, mode).await?;

        // seed the index with the root and its immediate children
        let mut root_node = StorageNode::new(root, crate::model::NodeKind::Directory)
            .with_size(session.scanned_bytes, mode.defers_directory_sizes());
        self.classifier.apply(&mut root_node);
        self.index.insert(root_node);
        for entry in &entries {
            let mut node = node_from_entry(entry, 1);
            self.classifier.apply(&mut node);
            self.index.insert(node);
        }

        if mode.defers_directory_sizes() {
            session.status = ScanStatus::Indexing;
            self.events.emit(ScanEvent::PhaseStarted("indexing".into()));
            let index_start = Instant::now();
            let mut indexer = RecursiveIndexer::new(
                &mut self.index,
                &self.classifier,
                Arc::clone(&self.pool),
                self.events.clone(),
                self.cancel.clone(),
                options.progress_item_threshold,
                options.progress_interval,
            );
            let stats = indexer.index_tree(root, &entries).await?;
            session.stage_timings.indexing = index_start.elapsed();
            session.indexed_nodes = stats.nodes;
            session.indexed_dirs = stats.dirs;
            session.scanned_bytes = self.index.rollup(root);
            session.status = ScanStatus::Completed;
        }

        let junk = Arc::clone(&self.junk);
        let junk_results: Vec<JunkCategoryResult> =
            tokio::task::spawn_blocking(move || junk.scan_categories())
                .await
                .unwrap_or_default();

        let packs = planner::build_packs(&junk_results, &large_files, &self.index);
        let persona_bundles = planner::build_persona_bundles(&self.index);
        // no selection exists yet at scan time; callers holding a cart
        // re-derive the steps with its real size
        let guided = planner::guided_steps(&packs, 0);

        let domains = self.domain_breakdown(root);
        let volume = self.volumes.usage(root);

        let report_insights =
            insights::volume_insights(volume, session.scanned_bytes, &domains);
        for insight in &report_insights {
            self.events.emit(ScanEvent::InsightReady(insight.clone()));
        }

        let same_root: Vec<StorageScanHistoryEntry> = self
            .history
            .load()
            .into_iter()
            .filter(|e| e.root == root)
            .collect();
        let previous = same_root.first().cloned();
        let current_used = volume.map(|v| v.used).unwrap_or(session.scanned_bytes);
        let forecast = insights::forecast(&same_root);
        let anomalies =
            insights::detect_anomalies(previous.as_ref(), current_used, &packs, &domains);
        let time_shift = insights::time_shift(previous.as_ref(), &domains);

        session.finalize_confidence();

        if self.config.clean.log_history {
            let entry = StorageScanHistoryEntry {
                timestamp: Utc::now(),
                root: root.to_path_buf(),
                mode,
                reclaimable_bytes: packs.iter().map(|p| p.reclaimable_bytes).sum(),
                scanned_bytes: session.scanned_bytes,
                confidence: session.confidence,
                volume_used: volume.map(|v| v.used).unwrap_or(0),
                volume_total: volume.map(|v| v.total).unwrap_or(0),
                domains: domains.clone(),
                duration_secs: (Utc::now() - session.started_at).num_milliseconds() as f64
                    / 1000.0,
            };
            if let Err(e) = self.history.push(entry) {
                tracing::warn!(error = %e, "failed to persist scan history");
                session.warn("scan history not persisted".to_string());
            }
        }

        Ok(ScanReport {
            session,
            entries,
            large_files,
            packs,
            persona_bundles,
            guided,
            insights: report_insights,
            forecast,
            anomalies,
            time_shift,
            domains,
            volume,
        })
    }

    /// Lazy expansion for browsing: loads (or refreshes) one directory's
    /// children through the worker pool.
    pub async fn expand(&mut self, parent: &Path) -> Result<Vec<StorageNode>, ScanError> {
        self.index
            .load_children_if_needed(parent, &self.pool, &self.cancel, &self.classifier)
            .await
    }

    fn domain_breakdown(&self, root: &Path) -> HashMap<StorageDomain, u64> {
        let mut domains: HashMap<StorageDomain, u64> = HashMap::new();
        for node in self.index.children_of(root) {
            *domains.entry(node.domain).or_insert(0) += node.logical_bytes;
        }
        domains
    }

    /// Paths the live monitor should watch by default: the scan roots the
    /// engine has indexed plus the busiest known junk locations.
    pub fn default_watch_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self
            .index
            .iter_nodes()
            .filter(|n| n.depth == 0)
            .map(|n| n.path.clone())
            .collect();
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join("Library/Caches"));
            paths.push(home.join("Downloads"));
        }
        paths.sort();
        paths.dedup();
        paths
    }
}
