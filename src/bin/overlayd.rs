//! overlayd - live detection overlay daemon
//!
//! This daemon:
//! 1. Resolves camera access and opens the configured frame source
//! 2. Runs detection on a worker thread, one frame at a time
//! 3. Presents every frame with the latest detection batch drawn on top
//! 4. Logs source/detector health periodically
//! 5. Optionally writes the last presented frame as a JPEG on exit
//!
//! A model that fails to load or warm up is logged and the daemon keeps running as
//! a preview with no boxes.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, ValueEnum};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::{mpsc, TryLockError};
use std::time::{Duration, Instant};

use detection_overlay::config::{parse_dimensions, OverlaydConfig};
use detection_overlay::{
    build_adapter, open_source, resolve_access, AccessDecision, AccessStatus, CanvasRenderer,
    FrameSource, LogRenderer, Pipeline, Presenter, PumpStatus, Renderer,
};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum AccessArg {
    Authorized,
    /// Ask on the terminal before opening the camera.
    Prompt,
    Denied,
    Restricted,
}

impl From<AccessArg> for AccessStatus {
    fn from(value: AccessArg) -> Self {
        match value {
            AccessArg::Authorized => AccessStatus::Authorized,
            AccessArg::Prompt => AccessStatus::NotDetermined,
            AccessArg::Denied => AccessStatus::Denied,
            AccessArg::Restricted => AccessStatus::Restricted,
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Frame source: `stub://<name>` or a V4L2 device path.
    #[arg(long)]
    source: Option<String>,
    /// YOLOv8 ONNX model (requires the backend-tract feature).
    #[arg(long)]
    model: Option<PathBuf>,
    /// Labels at or below this confidence are dropped.
    #[arg(long)]
    min_confidence: Option<f32>,
    /// `hold-last` or `clear`.
    #[arg(long)]
    failure_policy: Option<String>,
    /// Surface size, e.g. 1280x720.
    #[arg(long)]
    viewport: Option<String>,
    /// Device orientation, e.g. portrait or landscape-left.
    #[arg(long)]
    orientation: Option<String>,
    /// Camera authorization status reported by the host.
    #[arg(long, value_enum, default_value_t = AccessArg::Authorized)]
    access: AccessArg,
    /// Stop after this many seconds (default: run until Ctrl-C).
    #[arg(long)]
    seconds: Option<u64>,
    /// Write the last presented frame as JPEG on exit.
    #[arg(long)]
    snapshot: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let cfg = apply_args(OverlaydConfig::load()?, &args)?;

    let access = resolve_access(args.access.into(), prompt_for_camera);
    let source = open_source(&cfg.source)?;
    let adapter = build_adapter(&cfg.detector);
    log::info!(
        "overlayd: source={} detector={} min_confidence={} policy={:?}",
        cfg.source.location,
        adapter.backend_name(),
        adapter.min_confidence(),
        cfg.detector.failure_policy
    );

    let (shutdown_tx, shutdown_rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.send(());
    })
    .context("error setting Ctrl-C handler")?;

    let mut pipeline = Pipeline::new(source, adapter);
    let run = RunOptions {
        access,
        deadline: args
            .seconds
            .map(|secs| Instant::now() + Duration::from_secs(secs)),
        health_interval: cfg.health_interval,
        shutdown: shutdown_rx,
    };

    match &args.snapshot {
        Some(path) => {
            let (width, height) = cfg.viewport;
            let renderer = CanvasRenderer::new(width, height)?;
            let mut presenter = Presenter::new(renderer, cfg.detector.failure_policy);
            run_until_shutdown(&mut pipeline, &mut presenter, run)?;
            save_snapshot(&presenter, path)?;
        }
        None => {
            let renderer = LogRenderer::new(cfg.viewport());
            let mut presenter = Presenter::new(renderer, cfg.detector.failure_policy);
            run_until_shutdown(&mut pipeline, &mut presenter, run)?;
        }
    }
    Ok(())
}

struct RunOptions {
    access: AccessDecision,
    deadline: Option<Instant>,
    health_interval: Duration,
    shutdown: mpsc::Receiver<()>,
}

fn run_until_shutdown<S: FrameSource + 'static, R: Renderer>(
    pipeline: &mut Pipeline<S>,
    presenter: &mut Presenter<R>,
    run: RunOptions,
) -> Result<()> {
    let events = match pipeline.start(run.access) {
        Ok(events) => events,
        Err(err) => {
            presenter.source_stopped();
            log::error!("overlayd: capture not started: {:#}", err);
            return Ok(());
        }
    };
    log::info!("overlayd running (Ctrl-C to stop)");

    let mut last_health_log = Instant::now();
    loop {
        if run.shutdown.try_recv().is_ok() {
            log::info!("shutdown signal received, stopping pipeline...");
            break;
        }
        if run.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            log::info!("run duration elapsed, stopping pipeline...");
            break;
        }

        match presenter.pump(&events, Duration::from_millis(100))? {
            PumpStatus::Idle | PumpStatus::Presented => {}
            PumpStatus::SourceFailed | PumpStatus::Disconnected => {
                log::warn!("frame source ended, stopping pipeline...");
                break;
            }
        }

        if last_health_log.elapsed() >= run.health_interval {
            log_health(pipeline, presenter);
            last_health_log = Instant::now();
        }
    }

    pipeline.stop()?;
    log_health(pipeline, presenter);
    Ok(())
}

fn log_health<S: FrameSource + 'static, R: Renderer>(
    pipeline: &Pipeline<S>,
    presenter: &Presenter<R>,
) {
    let stats = presenter.stats();
    let (calls, failures) = match pipeline.adapter().try_lock() {
        Ok(adapter) => adapter.counters(),
        Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().counters(),
        // Detection in flight; skip this sample.
        Err(TryLockError::WouldBlock) => return,
    };
    let overlay = presenter.overlay();
    log::info!(
        "health frames={} redraws={} detections={} failures={} batches={} boxes={}",
        stats.frames_received,
        stats.redraws,
        calls,
        failures,
        stats.batches_received,
        overlay.len()
    );
    if let Some(source) = pipeline.source() {
        let source_stats = source.stats();
        log::info!(
            "source health={} frames={} location={}",
            source_stats.healthy,
            source_stats.frames_captured,
            source_stats.location
        );
    }
}

fn apply_args(mut cfg: OverlaydConfig, args: &Args) -> Result<OverlaydConfig> {
    if let Some(source) = &args.source {
        cfg.source.location = source.clone();
    }
    if let Some(model) = &args.model {
        cfg.detector.model_path = Some(model.clone());
    }
    if let Some(threshold) = args.min_confidence {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(anyhow!("--min-confidence must be within [0, 1]"));
        }
        cfg.detector.min_confidence = threshold;
    }
    if let Some(policy) = &args.failure_policy {
        cfg.detector.failure_policy = policy.parse()?;
    }
    if let Some(viewport) = &args.viewport {
        cfg.viewport = parse_dimensions(viewport)
            .filter(|(w, h)| *w > 0 && *h > 0)
            .ok_or_else(|| anyhow!("--viewport must look like 1280x720"))?;
    }
    if let Some(orientation) = &args.orientation {
        cfg.source.orientation = orientation.parse()?;
    }
    Ok(cfg)
}

fn save_snapshot(presenter: &Presenter<CanvasRenderer>, path: &Path) -> Result<()> {
    let Some(still) = presenter.snapshot()? else {
        log::warn!("no frame presented, snapshot skipped");
        return Ok(());
    };
    detection_overlay::render::save_jpeg(&still, path)?;
    log::info!("snapshot written to {}", path.display());
    Ok(())
}

fn prompt_for_camera() -> bool {
    print!("Allow camera access? [y/N] ");
    if std::io::stdout().flush().is_err() {
        return false;
    }
    let mut answer = String::new();
    if std::io::stdin().lock().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
