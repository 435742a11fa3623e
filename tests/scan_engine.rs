use macsweep::collab::{VolumeStatsProvider, VolumeUsage};
use macsweep::history::HistoryStore;
use macsweep::junk::{JunkCategoryResult, JunkScanner};
use macsweep::model::ScanMode;
use macsweep::{EngineConfig, ScanError, ScanEvent, StorageEngine};
use std::fs::{self, File};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const MB: u64 = 1024 * 1024;

struct NoJunk;
impl JunkScanner for NoJunk {
    fn scan_categories(&self) -> Vec<JunkCategoryResult> {
        Vec::new()
    }
}

struct NoVolume;
impl VolumeStatsProvider for NoVolume {
    fn usage(&self, _path: &Path) -> Option<VolumeUsage> {
        None
    }
}

fn engine_with(config: EngineConfig, data_dir: &Path) -> StorageEngine {
    StorageEngine::new(
        config,
        Arc::new(NoJunk),
        Box::new(NoVolume),
        HistoryStore::new(data_dir.join("history.json")),
    )
}

fn engine(data_dir: &Path) -> StorageEngine {
    engine_with(EngineConfig::default(), data_dir)
}

fn sparse_file(path: &Path, len: u64) {
    let file = File::create(path).unwrap();
    file.set_len(len).unwrap();
}

#[tokio::test]
async fn full_scan_counts_logical_bytes_and_skips_noise() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("root");
    fs::create_dir_all(root.join("DirA")).unwrap();
    sparse_file(&root.join("DirA/file1.bin"), 50 * MB);
    sparse_file(&root.join("DirA/file2.bin"), 60 * MB);

    // repository internals and symlinks never contribute to the totals
    fs::create_dir_all(root.join(".git/objects")).unwrap();
    sparse_file(&root.join(".git/objects/pack.bin"), 500 * MB);
    std::os::unix::fs::symlink(root.join("DirA"), root.join("link-to-a")).unwrap();

    let mut engine = engine(tmp.path());
    let report = engine.scan(&root, ScanMode::Full).await.unwrap();

    assert_eq!(report.session.scanned_bytes, 110 * MB);
    assert!(report
        .entries
        .iter()
        .all(|e| !e.path.ends_with("link-to-a")));
    assert!(report.entries.iter().all(|e| !e.path.ends_with(".git")));

    // rollup finalized DirA from its children
    let dir_a = engine.index().get(&root.join("DirA")).expect("indexed");
    assert_eq!(dir_a.logical_bytes, 110 * MB);
    assert!(!dir_a.size_estimated);
}

#[tokio::test]
async fn hard_linked_twins_count_once() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("root");
    fs::create_dir(&root).unwrap();
    fs::write(root.join("a.bin"), vec![0u8; 1024]).unwrap();
    fs::hard_link(root.join("a.bin"), root.join("b.bin")).unwrap();

    let mut engine = engine(tmp.path());
    let report = engine.scan(&root, ScanMode::Quick).await.unwrap();

    assert_eq!(report.entries.len(), 1);
    assert_eq!(report.session.scanned_bytes, 1024);
}

#[tokio::test]
async fn excluded_paths_never_enter_the_scan() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("root");
    fs::create_dir_all(root.join("keep")).unwrap();
    fs::create_dir_all(root.join("skipme")).unwrap();
    fs::write(root.join("keep/data.bin"), vec![0u8; 4096]).unwrap();
    fs::write(root.join("skipme/secret.bin"), vec![0u8; 8192]).unwrap();

    let mut config = EngineConfig::default();
    config.scan.excluded_paths.push(root.join("skipme"));
    let mut engine = engine_with(config, tmp.path());
    let report = engine.scan(&root, ScanMode::Full).await.unwrap();

    assert!(report.entries.iter().all(|e| !e.path.ends_with("skipme")));
    assert_eq!(report.session.scanned_bytes, 4096);
}

#[tokio::test]
async fn cancellation_terminates_the_stream_and_frees_the_pool() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("root");
    fs::create_dir_all(root.join("sub")).unwrap();
    fs::write(root.join("sub/data.bin"), vec![0u8; 1024]).unwrap();

    let mut engine = engine(tmp.path());
    let mut events = engine.subscribe();

    // hold every permit so the scan blocks on acquire and cannot finish
    let pool = Arc::clone(engine.pool());
    let mut held = Vec::new();
    for _ in 0..pool.effective_workers() {
        held.push(pool.acquire().await);
    }

    let token = engine.cancel_token();
    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
    });

    let result = engine.scan(&root, ScanMode::Quick).await;
    canceller.await.unwrap();
    assert!(matches!(result, Err(ScanError::Cancelled)));

    // terminal event is Cancelled; nothing follows it
    let mut saw_cancelled = false;
    while let Ok(event) =
        tokio::time::timeout(Duration::from_millis(200), events.recv()).await
    {
        match event {
            Some(ScanEvent::Cancelled) => {
                saw_cancelled = true;
            }
            Some(ScanEvent::Completed(_)) => panic!("completed after cancellation"),
            Some(ScanEvent::Progress { .. }) if saw_cancelled => {
                panic!("progress after the terminal event")
            }
            Some(_) => {}
            None => break,
        }
    }
    assert!(saw_cancelled);

    // pool is immediately reusable once the held permits drop
    drop(held);
    let permit = tokio::time::timeout(Duration::from_secs(1), pool.acquire())
        .await
        .expect("pool usable after cancellation");
    drop(permit);
}

#[tokio::test]
async fn zero_timeout_fails_fast_instead_of_hanging() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("root");
    fs::create_dir_all(root.join("sub")).unwrap();
    fs::write(root.join("sub/data.bin"), vec![0u8; 1024]).unwrap();

    let mut config = EngineConfig::default();
    config.scan.timeout_secs = 0;
    let mut engine = engine_with(config, tmp.path());
    let mut events = engine.subscribe();

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        engine.scan(&root, ScanMode::Quick),
    )
    .await
    .expect("scan must not hang");
    assert!(matches!(result, Err(ScanError::Timeout(_))));

    // the timeout cancels the token first, but the terminal failure still
    // reaches subscribers
    let terminal = tokio::time::timeout(Duration::from_secs(1), async {
        while let Some(event) = events.recv().await {
            if event.is_terminal() {
                return Some(event);
            }
        }
        None
    })
    .await
    .expect("stream must deliver a terminal event")
    .expect("stream closed without a terminal event");
    assert!(matches!(terminal, ScanEvent::Failed(_)));
}

#[tokio::test]
async fn failed_scan_emits_terminal_event() {
    let tmp = tempfile::tempdir().unwrap();
    let mut engine = engine(tmp.path());
    let mut events = engine.subscribe();

    let result = engine
        .scan(&tmp.path().join("does-not-exist"), ScanMode::Quick)
        .await;
    assert!(matches!(result, Err(ScanError::NotFound(_))));

    let terminal = tokio::time::timeout(Duration::from_secs(1), async {
        while let Some(event) = events.recv().await {
            if event.is_terminal() {
                return Some(event);
            }
        }
        None
    })
    .await
    .expect("stream must deliver a terminal event")
    .expect("stream closed without a terminal event");
    assert!(matches!(terminal, ScanEvent::Failed(_)));
}

#[tokio::test]
async fn consecutive_scans_share_one_engine() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("root");
    fs::create_dir(&root).unwrap();
    fs::write(root.join("a.bin"), vec![0u8; 2048]).unwrap();

    let mut engine = engine(tmp.path());
    let first = engine.scan(&root, ScanMode::Quick).await.unwrap();
    let second = engine.scan(&root, ScanMode::Quick).await.unwrap();

    assert_eq!(
        first.session.scanned_bytes,
        second.session.scanned_bytes
    );
    assert_eq!(engine.history().load().len(), 2);
}
