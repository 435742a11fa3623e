use crate::collab::ProcessStats;
use crate::events::CancelToken;
use crate::scan::sizer::walk_size;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const SAMPLE_INTERVAL: Duration = Duration::from_secs(5);
const HISTORY_POINTS: usize = 120;
const WATCH_WALK_DEPTH: usize = 3;
/// Exponential smoothing factor for the utilization line.
const SMOOTHING: f64 = 0.3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathActivity {
    pub path: PathBuf,
    pub bytes: u64,
    /// Net growth since the previous sample, negative when shrinking.
    pub delta_bytes: i64,
    pub write_mb_per_sec: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessActivity {
    pub pid: u32,
    pub name: String,
    pub read_mb_per_sec: f64,
    pub write_mb_per_sec: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorSnapshot {
    pub timestamp: DateTime<Utc>,
    pub paths: Vec<PathActivity>,
    pub processes: Vec<ProcessActivity>,
    /// Smoothed 0..=1 activity level across the watched paths.
    pub utilization: f64,
}

/// Samples disk activity on a fixed cadence until cancelled. Process I/O
/// counters are preferred; when the provider reports nothing, path size
/// deltas stand in.
pub struct LiveMonitor {
    watched: Vec<PathBuf>,
    process_stats: Arc<dyn ProcessStats>,
    cancel: CancelToken,
    history: Arc<Mutex<VecDeque<MonitorSnapshot>>>,
}

impl LiveMonitor {
    pub fn new(
        watched: Vec<PathBuf>,
        process_stats: Arc<dyn ProcessStats>,
        cancel: CancelToken,
    ) -> Self {
        Self {
            watched,
            process_stats,
            cancel,
            history: Arc::new(Mutex::new(VecDeque::with_capacity(HISTORY_POINTS))),
        }
    }

    /// Bounded snapshot history, oldest first.
    pub fn history(&self) -> Vec<MonitorSnapshot> {
        self.history
            .lock()
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn latest(&self) -> Option<MonitorSnapshot> {
        self.history
            .lock()
            .ok()
            .and_then(|h| h.back().cloned())
    }

    /// Runs until the cancel token fires. A failed sample logs a warning and
    /// the loop keeps going.
    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(SAMPLE_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let mut last_sizes: HashMap<PathBuf, u64> = HashMap::new();
        let mut last_io: HashMap<u32, (u64, u64)> = HashMap::new();
        let mut utilization = 0.0f64;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::debug!("live monitor stopped");
                    return;
                }
                _ = ticker.tick() => {}
            }

            let snapshot = self
                .sample(&mut last_sizes, &mut last_io, &mut utilization)
                .await;
            match snapshot {
                Ok(snapshot) => {
                    if let Ok(mut history) = self.history.lock() {
                        if history.len() == HISTORY_POINTS {
                            history.pop_front();
                        }
                        history.push_back(snapshot);
                    }
                }
                Err(e) => tracing::warn!(error = %e, "monitor sample failed"),
            }
        }
    }

    async fn sample(
        &self,
        last_sizes: &mut HashMap<PathBuf, u64>,
        last_io: &mut HashMap<u32, (u64, u64)>,
        utilization: &mut f64,
    ) -> anyhow::Result<MonitorSnapshot> {
        let interval_secs = SAMPLE_INTERVAL.as_secs_f64();

        let watched = self.watched.clone();
        let sizes: Vec<(PathBuf, u64)> = tokio::task::spawn_blocking(move || {
            watched
                .into_iter()
                .map(|p| {
                    let bytes = walk_size(&p, WATCH_WALK_DEPTH);
                    (p, bytes)
                })
                .collect()
        })
        .await?;

        let mut paths = Vec::with_capacity(sizes.len());
        let mut total_write_rate = 0.0f64;
        for (path, bytes) in sizes {
            let previous = last_sizes.insert(path.clone(), bytes);
            let delta = previous.map(|p| bytes as i64 - p as i64).unwrap_or(0);
            let write_rate = (delta.max(0) as f64) / (1024.0 * 1024.0) / interval_secs;
            total_write_rate += write_rate;
            paths.push(PathActivity {
                path,
                bytes,
                delta_bytes: delta,
                write_mb_per_sec: write_rate,
            });
        }
        paths.sort_by(|a, b| b.delta_bytes.abs().cmp(&a.delta_bytes.abs()));

        let samples = self.process_stats.io_samples();
        let mut processes = Vec::with_capacity(samples.len());
        for sample in samples {
            let (prev_read, prev_written) = last_io
                .insert(sample.pid, (sample.read_bytes, sample.written_bytes))
                .unwrap_or((sample.read_bytes, sample.written_bytes));
            let read_rate = sample.read_bytes.saturating_sub(prev_read) as f64
                / (1024.0 * 1024.0)
                / interval_secs;
            let write_rate = sample.written_bytes.saturating_sub(prev_written) as f64
                / (1024.0 * 1024.0)
                / interval_secs;
            if read_rate > 0.0 || write_rate > 0.0 {
                processes.push(ProcessActivity {
                    pid: sample.pid,
                    name: sample.name,
                    read_mb_per_sec: read_rate,
                    write_mb_per_sec: write_rate,
                });
            }
        }
        processes.sort_by(|a, b| {
            (b.read_mb_per_sec + b.write_mb_per_sec)
                .total_cmp(&(a.read_mb_per_sec + a.write_mb_per_sec))
        });

        // utilization from process counters when available, else path deltas
        let instantaneous = if processes.is_empty() {
            (total_write_rate / 100.0).min(1.0)
        } else {
            let total: f64 = processes
                .iter()
                .map(|p| p.read_mb_per_sec + p.write_mb_per_sec)
                .sum();
            (total / 500.0).min(1.0)
        };
        *utilization = SMOOTHING * instantaneous + (1.0 - SMOOTHING) * *utilization;

        Ok(MonitorSnapshot {
            timestamp: Utc::now(),
            paths,
            processes,
            utilization: *utilization,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::{NoopProcessStats, ProcessIoSample};

    struct FixedStats(Vec<ProcessIoSample>);
    impl ProcessStats for FixedStats {
        fn io_samples(&self) -> Vec<ProcessIoSample> {
            self.0.clone()
        }
    }

    #[tokio::test]
    async fn path_deltas_drive_fallback_sampling() {
        let tmp = tempfile::tempdir().unwrap();
        let watched = tmp.path().to_path_buf();
        std::fs::write(watched.join("a.bin"), vec![0u8; 1024]).unwrap();

        let monitor = LiveMonitor::new(
            vec![watched.clone()],
            Arc::new(NoopProcessStats),
            CancelToken::new(),
        );
        let mut sizes = HashMap::new();
        let mut io = HashMap::new();
        let mut util = 0.0;

        let first = monitor.sample(&mut sizes, &mut io, &mut util).await.unwrap();
        assert_eq!(first.paths.len(), 1);
        assert_eq!(first.paths[0].delta_bytes, 0);

        std::fs::write(watched.join("b.bin"), vec![0u8; 2048]).unwrap();
        let second = monitor.sample(&mut sizes, &mut io, &mut util).await.unwrap();
        assert_eq!(second.paths[0].delta_bytes, 2048);
        assert!(second.paths[0].write_mb_per_sec > 0.0);
    }

    #[tokio::test]
    async fn process_counters_preferred_over_path_deltas() {
        let monitor = LiveMonitor::new(
            Vec::new(),
            Arc::new(FixedStats(vec![ProcessIoSample {
                pid: 42,
                name: "backupd".to_string(),
                read_bytes: 0,
                written_bytes: 50 * 1024 * 1024,
            }])),
            CancelToken::new(),
        );
        let mut sizes = HashMap::new();
        let mut io = HashMap::new();
        io.insert(42, (0, 0));
        let mut util = 0.0;

        let snapshot = monitor.sample(&mut sizes, &mut io, &mut util).await.unwrap();
        assert_eq!(snapshot.processes.len(), 1);
        assert!((snapshot.processes[0].write_mb_per_sec - 10.0).abs() < 1e-6);
        assert!(snapshot.utilization > 0.0);
    }

    #[tokio::test]
    async fn cancelled_monitor_exits_run_loop() {
        let cancel = CancelToken::new();
        let monitor = LiveMonitor::new(Vec::new(), Arc::new(NoopProcessStats), cancel.clone());
        cancel.cancel();
        // returns immediately rather than waiting for the first tick
        tokio::time::timeout(Duration::from_secs(1), monitor.run())
            .await
            .expect("run should exit once cancelled");
    }
}
