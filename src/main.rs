mod cli;

use anyhow::Result;
use cli::{Cli, Commands, ConfigActions, ExcludeActions, OutputFormat};
use macsweep::cleanup::{Cart, CleanupAction, CleanupExecutor};
use macsweep::collab::{ActivityLog, DfVolumeStats, NoopProcessStats, StagingFileOps};
use macsweep::engine::ScanReport;
use macsweep::history::{ActivityLogger, ExclusionStore, HistoryStore};
use macsweep::human_bytes;
use macsweep::junk::DefaultJunkScanner;
use macsweep::model::{NodeKind, RiskLevel, StorageNode};
use macsweep::monitor::LiveMonitor;
use macsweep::planner::{self, GuidedBucket, ReclaimPack};
use macsweep::scan::sizer::walk_size;
use macsweep::{CancelToken, EngineConfig, ScanEvent, ScanMode, StorageEngine};
use serde::Serialize;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse_args();
    let result = match EngineConfig::load() {
        Ok(config) => run(cli, config).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli, config: EngineConfig) -> Result<ExitCode> {
    match cli.command {
        Commands::Scan { path, mode, format } => {
            let root = cli::expand_path(&path);
            let report = run_scan(&config, &root, mode.into(), format).await?;
            print_scan(&report, format)?;
        }
        Commands::Plan { path, mode, format } => {
            let root = cli::expand_path(&path);
            let report = run_scan(&config, &root, mode.into(), format).await?;
            print_plan(&report, format)?;
        }
        Commands::Apply {
            path,
            yes,
            dry_run,
            format,
        } => {
            let root = cli::expand_path(&path);
            return run_apply(&config, &root, yes, dry_run, format).await;
        }
        Commands::Undo { token } => run_undo(&token)?,
        Commands::History { limit } => run_history(limit)?,
        Commands::Forecast => run_forecast()?,
        Commands::Monitor { paths } => run_monitor(paths).await?,
        Commands::Exclude { action } => run_exclude(action)?,
        Commands::Config { action } => run_config(action, config)?,
    }
    Ok(ExitCode::SUCCESS)
}

fn build_engine(config: &EngineConfig) -> Result<StorageEngine> {
    let data_dir = EngineConfig::data_dir()?;
    Ok(StorageEngine::new(
        config.clone(),
        Arc::new(DefaultJunkScanner::new()),
        Box::new(DfVolumeStats),
        HistoryStore::new(data_dir.join("history.json")),
    ))
}

async fn run_scan(
    config: &EngineConfig,
    root: &Path,
    mode: ScanMode,
    format: OutputFormat,
) -> Result<ScanReport> {
    let mut engine = build_engine(config)?;
    let mut events = engine.subscribe();

    // progress to stderr so json output stays clean on stdout
    let chatty = matches!(format, OutputFormat::Human);
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                ScanEvent::PhaseStarted(phase) if chatty => eprintln!("-- {phase}"),
                ScanEvent::Progress { items, bytes, .. } if chatty => {
                    eprint!("\r   {items} items, {}        ", human_bytes(bytes));
                    let _ = std::io::stderr().flush();
                }
                ScanEvent::Warning(w) => eprintln!("\nwarning: {w}"),
                ScanEvent::Failed(e) => {
                    eprintln!("\nscan failed: {e}");
                    break;
                }
                ScanEvent::Completed(_) | ScanEvent::Cancelled => break,
                _ => {}
            }
        }
        if chatty {
            eprintln!();
        }
    });

    let report = engine.scan(root, mode).await;
    let _ = printer.await;
    Ok(report?)
}

#[derive(Serialize)]
struct JsonScanResult<'a> {
    session: &'a macsweep::ScanSession,
    entries: &'a [macsweep::model::DirEntry],
    large_files: &'a [macsweep::model::DirEntry],
    insights: &'a [macsweep::insights::StorageInsight],
    anomalies: &'a [macsweep::insights::StorageAnomaly],
    forecast: &'a macsweep::insights::StorageForecast,
}

fn print_scan(report: &ScanReport, format: OutputFormat) -> Result<()> {
    if let OutputFormat::Json = format {
        let json = JsonScanResult {
            session: &report.session,
            entries: &report.entries,
            large_files: &report.large_files,
            insights: &report.insights,
            anomalies: &report.anomalies,
            forecast: &report.forecast,
        };
        println!("{}", serde_json::to_string_pretty(&json)?);
        return Ok(());
    }

    let session = &report.session;
    println!(
        "Scanned {} ({} items) in {:.1}s, confidence {:.0}%",
        human_bytes(session.scanned_bytes),
        session.scanned_items,
        (session.stage_timings.preparing
            + session.stage_timings.scanning
            + session.stage_timings.indexing)
            .as_secs_f64(),
        session.confidence * 100.0
    );

    println!("\nLargest entries:");
    for entry in report.entries.iter().take(15) {
        let marker = if entry.size_estimated { "~" } else { " " };
        println!(
            "  {marker}{:>10}  {}",
            human_bytes(entry.size),
            entry.path.display()
        );
    }

    if !report.large_files.is_empty() {
        println!("\nLarge files:");
        for file in report.large_files.iter().take(10) {
            println!("  {:>10}  {}", human_bytes(file.size), file.path.display());
        }
    }

    for insight in &report.insights {
        println!("\n{}: {}", insight.title, insight.detail);
    }
    for anomaly in &report.anomalies {
        println!(
            "\n[{:?}] {} — {}",
            anomaly.severity, anomaly.title, anomaly.recommendation
        );
    }
    if let Some(shift) = &report.time_shift {
        println!("\n{}", shift.narrative);
    }
    Ok(())
}

fn print_plan(report: &ScanReport, format: OutputFormat) -> Result<()> {
    if let OutputFormat::Json = format {
        let json = serde_json::json!({
            "packs": report.packs,
            "persona_bundles": report.persona_bundles,
            "guided_steps": report.guided,
        });
        println!("{}", serde_json::to_string_pretty(&json)?);
        return Ok(());
    }

    if report.packs.is_empty() {
        println!("Nothing to reclaim right now.");
        return Ok(());
    }

    println!("Reclaim packs:");
    for pack in &report.packs {
        println!(
            "  {:>10}  [{:?}] {} — {}",
            human_bytes(pack.reclaimable_bytes),
            pack.risk,
            pack.name,
            pack.rationale
        );
    }

    if !report.persona_bundles.is_empty() {
        println!("\nFor your setup:");
        for bundle in &report.persona_bundles {
            println!(
                "  {:>10}  {:?}: {}",
                human_bytes(bundle.total_bytes),
                bundle.persona,
                bundle.rationale
            );
        }
    }

    println!("\nGuided cleanup:");
    for step in &report.guided {
        println!("  {} — {}", step.title, step.description);
    }
    Ok(())
}

fn node_for_cart(path: &Path, risk: RiskLevel) -> Option<StorageNode> {
    let meta = std::fs::symlink_metadata(path).ok()?;
    let (kind, size) = if meta.is_dir() {
        (NodeKind::Directory, walk_size(path, usize::MAX))
    } else {
        (NodeKind::File, meta.len())
    };
    let mut node = StorageNode::new(path, kind).with_size(size, false);
    node.set_risk(risk);
    node.set_reclaimable(size);
    Some(node)
}

async fn run_apply(
    config: &EngineConfig,
    root: &Path,
    yes: bool,
    dry_run_flag: bool,
    format: OutputFormat,
) -> Result<ExitCode> {
    let dry_run = dry_run_flag || (config.clean.dry_run_by_default && !yes);
    let report = run_scan(config, root, ScanMode::Quick, format).await?;

    let data_dir = EngineConfig::data_dir()?;
    let mut exclusions = ExclusionStore::load(data_dir.join("exclusions.json"));
    let mut cart = Cart::new();

    // only the low-risk packs are auto-applied; everything else stays manual
    let low_risk: Vec<&ReclaimPack> = report
        .packs
        .iter()
        .filter(|p| p.risk == RiskLevel::Low)
        .collect();
    for pack in &low_risk {
        for path in &pack.paths {
            if let Some(node) = node_for_cart(path, pack.risk) {
                cart.add(&node, CleanupAction::MoveToTrash, &exclusions);
            }
        }
    }

    if cart.is_empty() {
        println!("Nothing to clean.");
        return Ok(ExitCode::SUCCESS);
    }

    let activity: Box<dyn ActivityLog> = Box::new(ActivityLogger::new(data_dir.join("activity.log")));
    let executor = CleanupExecutor::new(
        Box::new(StagingFileOps::new(data_dir.join("staging"))),
        activity,
        Box::new(DfVolumeStats),
    );
    let plan = executor.prepare_plan(&cart);

    println!(
        "Would reclaim {} across {} items ({} blocked).",
        human_bytes(plan.dry_run.would_clean_bytes),
        cart.executable().len(),
        plan.dry_run.blocked.len()
    );
    // guided steps from the scan assume an empty cart; re-derive now that
    // one exists so the final review reflects the real selection
    let guided = planner::guided_steps(&report.packs, cart.len());
    if let Some(review) = guided
        .iter()
        .find(|s| s.bucket == GuidedBucket::FinalReview)
    {
        println!("{}: {}", review.title, review.description);
    }
    if dry_run {
        println!("Dry run; nothing was changed. Re-run with --yes to clean.");
        return Ok(ExitCode::SUCCESS);
    }

    if !yes {
        print!("Proceed? [y/N] ");
        std::io::stdout().flush()?;
        let mut answer = String::new();
        std::io::stdin().read_line(&mut answer)?;
        if !answer.trim().eq_ignore_ascii_case("y") {
            println!("Aborted.");
            return Ok(ExitCode::from(1));
        }
    }

    let result = executor.execute(plan, &mut cart, &mut exclusions, root);
    println!(
        "Cleaned {} items, freed {}.",
        result.cleaned_count,
        human_bytes(result.bytes_freed)
    );
    for (path, error) in &result.failed {
        eprintln!("failed: {} ({error})", path.display());
    }
    if let Some(token) = &result.undo_token {
        println!("Undo with: macsweep undo {token}");
    }
    Ok(ExitCode::SUCCESS)
}

fn run_undo(token: &str) -> Result<()> {
    let data_dir = EngineConfig::data_dir()?;
    let executor = CleanupExecutor::new(
        Box::new(StagingFileOps::new(data_dir.join("staging"))),
        Box::new(ActivityLogger::new(data_dir.join("activity.log"))),
        Box::new(DfVolumeStats),
    );
    executor.undo(token)?;
    println!("Restored cleanup {token}.");
    Ok(())
}

fn run_history(limit: usize) -> Result<()> {
    let data_dir = EngineConfig::data_dir()?;
    let store = HistoryStore::new(data_dir.join("history.json"));
    let entries = store.load();
    if entries.is_empty() {
        println!("No scans recorded yet.");
        return Ok(());
    }
    for entry in entries.iter().take(limit) {
        println!(
            "{}  {}  {}  scanned {}, reclaimable {}",
            entry.timestamp.format("%Y-%m-%d %H:%M"),
            entry.mode,
            entry.root.display(),
            human_bytes(entry.scanned_bytes),
            human_bytes(entry.reclaimable_bytes)
        );
    }
    Ok(())
}

fn run_forecast() -> Result<()> {
    let data_dir = EngineConfig::data_dir()?;
    let store = HistoryStore::new(data_dir.join("history.json"));
    let forecast = macsweep::insights::forecast(&store.load());
    match forecast.estimated_days_to_full {
        Some(days) => println!(
            "Growing {} per day; the volume fills in roughly {days} days \
             (confidence {:.0}%, {} scans).",
            human_bytes(forecast.daily_growth_bytes.unsigned_abs()),
            forecast.confidence * 100.0,
            forecast.based_on_scans
        ),
        None => println!(
            "Not enough history for a trend yet ({} scans recorded). Scan again in a few days.",
            forecast.based_on_scans
        ),
    }
    Ok(())
}

async fn run_monitor(paths: Vec<PathBuf>) -> Result<()> {
    let watched = if paths.is_empty() {
        let mut defaults = Vec::new();
        if let Some(home) = dirs::home_dir() {
            defaults.push(home.join("Library/Caches"));
            defaults.push(home.join("Downloads"));
        }
        defaults
    } else {
        paths
    };

    let cancel = CancelToken::new();
    let monitor = Arc::new(LiveMonitor::new(
        watched,
        Arc::new(NoopProcessStats),
        cancel.clone(),
    ));
    let runner = {
        let monitor = Arc::clone(&monitor);
        tokio::spawn(async move { monitor.run().await })
    };

    println!("Watching disk activity; press Ctrl-C to stop.");
    let mut ticker = tokio::time::interval(Duration::from_secs(5));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                cancel.cancel();
                break;
            }
            _ = ticker.tick() => {
                if let Some(snapshot) = monitor.latest() {
                    println!(
                        "{}  activity {:.0}%",
                        snapshot.timestamp.format("%H:%M:%S"),
                        snapshot.utilization * 100.0
                    );
                    for activity in snapshot.paths.iter().take(5) {
                        if activity.delta_bytes != 0 {
                            println!(
                                "  {:+}  {}",
                                activity.delta_bytes,
                                activity.path.display()
                            );
                        }
                    }
                }
            }
        }
    }
    runner.await.ok();
    Ok(())
}

fn run_exclude(action: ExcludeActions) -> Result<()> {
    let data_dir = EngineConfig::data_dir()?;
    let mut store = ExclusionStore::load(data_dir.join("exclusions.json"));
    match action {
        ExcludeActions::Add { path } => {
            store.add(&path)?;
            println!("Excluded {}.", path.display());
        }
        ExcludeActions::Remove { path } => {
            store.remove(&path)?;
            println!("Removed {}.", path.display());
        }
        ExcludeActions::List => {
            let mut paths: Vec<&PathBuf> = store.iter().collect();
            if paths.is_empty() {
                println!("No exclusions.");
            } else {
                paths.sort();
                for path in paths {
                    println!("{}", path.display());
                }
            }
        }
    }
    Ok(())
}

fn run_config(action: ConfigActions, config: EngineConfig) -> Result<()> {
    match action {
        ConfigActions::Show => {
            println!("{}", toml::to_string_pretty(&config)?);
            println!("# {}", EngineConfig::config_path()?.display());
        }
        ConfigActions::Reset => {
            EngineConfig::default().save()?;
            println!("Configuration reset to defaults.");
        }
    }
    Ok(())
}
