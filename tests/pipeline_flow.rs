use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};

use detection_overlay::ingest::SyntheticConfig;
use detection_overlay::{
    AccessDecision, DetectionBatch, DetectionResult, DetectorAdapter, DetectorBackend,
    DeviceOrientation, FailurePolicy, Frame, FrameSource, LabelCandidate, LogRenderer,
    NormalizedRect, Pipeline, PipelineEvent, Presenter, RawDetection, SyntheticBackend,
    SyntheticBackendConfig, SyntheticSource, Viewport,
};

fn source(target_fps: u32) -> SyntheticSource {
    SyntheticSource::new(SyntheticConfig {
        url: "stub://flow".to_string(),
        target_fps,
        width: 64,
        height: 48,
        orientation: DeviceOrientation::LandscapeLeft,
        seed: 7,
        marker_size: 12,
    })
}

fn presenter(policy: FailurePolicy) -> Presenter<LogRenderer> {
    Presenter::new(LogRenderer::new(Viewport::new(1000.0, 500.0)), policy)
}

fn seeded_batch() -> Arc<DetectionBatch> {
    Arc::new(DetectionBatch {
        frame_sequence: 0,
        results: vec![DetectionResult {
            label: "seed".to_string(),
            confidence: 0.99,
            rect: NormalizedRect::new(0.1, 0.1, 0.2, 0.2),
        }],
    })
}

/// Pump until `done` holds or `timeout` passes. Returns whether `done` held.
fn pump_until(
    presenter: &mut Presenter<LogRenderer>,
    events: &Receiver<PipelineEvent>,
    timeout: Duration,
    mut done: impl FnMut(&Presenter<LogRenderer>) -> bool,
) -> Result<bool> {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        presenter.pump(events, Duration::from_millis(10))?;
        if done(presenter) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Tracks how many `detect` calls overlap.
struct ConcurrencyTracker {
    latency: Duration,
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl DetectorBackend for ConcurrencyTracker {
    fn name(&self) -> &'static str {
        "tracked"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<RawDetection>> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(self.latency);
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(vec![RawDetection {
            labels: vec![LabelCandidate::new("tracked", 0.97)],
            rect: NormalizedRect::new(0.25, 0.25, 0.5, 0.5),
        }])
    }
}

fn tracker(latency: Duration) -> (ConcurrencyTracker, Arc<AtomicUsize>, Arc<AtomicUsize>) {
    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    (
        ConcurrencyTracker {
            latency,
            current: current.clone(),
            peak: peak.clone(),
        },
        current,
        peak,
    )
}

/// Blocks inside `detect` until released, then reports one box.
struct GatedBackend {
    entered: Sender<()>,
    release: Receiver<()>,
}

impl DetectorBackend for GatedBackend {
    fn name(&self) -> &'static str {
        "gated"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<RawDetection>> {
        let _ = self.entered.send(());
        self.release
            .recv()
            .map_err(|_| anyhow!("gate closed before release"))?;
        Ok(vec![RawDetection {
            labels: vec![LabelCandidate::new("gated", 0.97)],
            rect: NormalizedRect::new(0.25, 0.25, 0.5, 0.5),
        }])
    }
}

#[test]
fn marker_is_drawn_over_live_frames() -> Result<()> {
    let adapter = DetectorAdapter::new(SyntheticBackend::default());
    let mut pipeline = Pipeline::new(source(100), adapter);
    let mut presenter = presenter(FailurePolicy::HoldLast);
    let events = pipeline.start(AccessDecision::Granted)?;

    let found = pump_until(&mut presenter, &events, Duration::from_secs(3), |p| {
        !p.overlay().is_empty()
    })?;
    pipeline.stop()?;

    assert!(found, "no overlay produced");
    let overlay = presenter.overlay();
    assert_eq!(overlay.len(), 1);
    assert_eq!(overlay[0].label, "marker");
    let rect = overlay[0].rect;
    assert!(rect.min_x() >= 0.0 && rect.max_x() <= 1000.0 + 1e-3);
    assert!(rect.min_y() >= 0.0 && rect.max_y() <= 500.0 + 1e-3);
    assert!(presenter.renderer().frames_drawn() > 0);
    Ok(())
}

#[test]
fn at_most_one_detection_in_flight() -> Result<()> {
    let (backend, _current, peak) = tracker(Duration::from_millis(25));
    let mut pipeline = Pipeline::new(source(200), DetectorAdapter::new(backend));
    let mut presenter = presenter(FailurePolicy::HoldLast);
    let events = pipeline.start(AccessDecision::Granted)?;

    pump_until(&mut presenter, &events, Duration::from_millis(400), |_| false)?;
    pipeline.stop()?;

    assert_eq!(peak.load(Ordering::SeqCst), 1);
    let stats = presenter.stats();
    let (calls, _) = pipeline.adapter().lock().expect("adapter lock").counters();
    assert!(calls >= 1);
    // Busy-detector frames are shown, not queued.
    assert!(stats.frames_received > calls);
    Ok(())
}

#[test]
fn stop_does_not_wait_for_in_flight_detection_and_drops_its_result() -> Result<()> {
    let (backend, current, _peak) = tracker(Duration::from_millis(600));
    let mut pipeline = Pipeline::new(source(100), DetectorAdapter::new(backend));
    let events = pipeline.start(AccessDecision::Granted)?;

    let deadline = Instant::now() + Duration::from_secs(2);
    while current.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(2));
    }
    assert_eq!(current.load(Ordering::SeqCst), 1, "detection never started");

    let started = Instant::now();
    pipeline.stop()?;
    assert!(started.elapsed() < Duration::from_millis(400));
    pipeline.stop()?;
    assert!(!pipeline.is_running());

    // Every producer hangs up once the in-flight call finishes; no batch arrives.
    loop {
        match events.recv_timeout(Duration::from_secs(2)) {
            Ok(PipelineEvent::Batch(batch)) => {
                panic!("batch for frame {} delivered after stop", batch.frame_sequence)
            }
            Ok(_) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => panic!("detection worker did not finish"),
        }
    }
    assert_eq!(current.load(Ordering::SeqCst), 0);
    Ok(())
}

#[test]
fn detection_finishing_during_stop_is_never_delivered_after_stop() -> Result<()> {
    for round in 0..25 {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let backend = GatedBackend {
            entered: entered_tx,
            release: release_rx,
        };
        let mut pipeline = Pipeline::new(source(200), DetectorAdapter::new(backend));
        let events = pipeline.start(AccessDecision::Granted)?;

        entered_rx
            .recv_timeout(Duration::from_secs(2))
            .map_err(|_| anyhow!("round {}: detection never started", round))?;
        // Let the call return while stop is racing it.
        release_tx.send(())?;
        pipeline.stop()?;
        drop(release_tx);

        // Anything already queued was sent before stop returned.
        while events.try_recv().is_ok() {}

        loop {
            match events.recv_timeout(Duration::from_secs(2)) {
                Ok(PipelineEvent::Batch(batch)) => panic!(
                    "round {}: batch for frame {} delivered after stop",
                    round, batch.frame_sequence
                ),
                Ok(PipelineEvent::DetectionFailed { frame_sequence, .. }) => panic!(
                    "round {}: failure for frame {} delivered after stop",
                    round, frame_sequence
                ),
                Ok(_) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    panic!("round {}: detection worker did not finish", round)
                }
            }
        }
    }
    Ok(())
}

#[test]
fn poisoned_adapter_lock_does_not_stop_detection() -> Result<()> {
    let adapter = DetectorAdapter::new(SyntheticBackend::default());
    let mut pipeline = Pipeline::new(source(100), adapter);
    let shared = pipeline.adapter();
    let _ = std::thread::spawn(move || {
        let _guard = shared.lock().expect("adapter lock");
        panic!("holder panicked");
    })
    .join();
    assert!(pipeline.adapter().is_poisoned());

    let mut presenter = presenter(FailurePolicy::HoldLast);
    let events = pipeline.start(AccessDecision::Granted)?;
    let found = pump_until(&mut presenter, &events, Duration::from_secs(3), |p| {
        !p.overlay().is_empty()
    })?;
    pipeline.stop()?;

    assert!(found, "detection stopped after the adapter lock was poisoned");
    assert_eq!(presenter.overlay()[0].label, "marker");
    Ok(())
}

#[test]
fn restart_resumes_capture_after_stop() -> Result<()> {
    let adapter = DetectorAdapter::new(SyntheticBackend::default());
    let mut pipeline = Pipeline::new(source(100), adapter);
    let mut presenter = presenter(FailurePolicy::HoldLast);

    let events = pipeline.start(AccessDecision::Granted)?;
    assert!(pump_until(&mut presenter, &events, Duration::from_secs(2), |p| {
        p.latest_frame().is_some()
    })?);
    pipeline.stop()?;
    presenter.source_stopped();
    let first_run_frames = pipeline
        .source()
        .map(|s| s.stats().frames_captured)
        .unwrap_or(0);
    assert!(first_run_frames > 0);
    assert!(pipeline.start(AccessDecision::Granted).is_ok());
    assert!(pipeline.start(AccessDecision::Granted).is_err(), "double start");
    pipeline.stop()?;

    let events = pipeline.start(AccessDecision::Granted)?;
    assert!(pump_until(&mut presenter, &events, Duration::from_secs(2), |p| {
        p.latest_frame()
            .is_some_and(|frame| frame.sequence > first_run_frames)
    })?);
    pipeline.stop()?;
    Ok(())
}

#[test]
fn refused_access_clears_overlay_and_never_detects() -> Result<()> {
    let adapter = DetectorAdapter::new(SyntheticBackend::default());
    let mut pipeline = Pipeline::new(source(100), adapter);
    let mut presenter = presenter(FailurePolicy::HoldLast);
    presenter.apply(PipelineEvent::Batch(seeded_batch()));
    assert_eq!(presenter.overlay().len(), 1);

    let err = pipeline
        .start(AccessDecision::Refused)
        .expect_err("refused access must not start");
    presenter.source_stopped();

    assert!(format!("{:#}", err).contains("refused"));
    assert!(presenter.overlay().is_empty());
    assert!(!pipeline.is_running());
    assert_eq!(pipeline.adapter().lock().expect("adapter lock").counters(), (0, 0));

    // The source is still owned by the pipeline and can start once granted.
    let _events = pipeline.start(AccessDecision::Granted)?;
    assert!(pipeline.is_running());
    pipeline.stop()?;
    Ok(())
}

#[test]
fn failed_detections_follow_the_failure_policy() -> Result<()> {
    for (policy, expect_overlay) in [(FailurePolicy::HoldLast, 1), (FailurePolicy::Clear, 0)] {
        let backend = SyntheticBackend::new(SyntheticBackendConfig {
            fail_every: Some(1),
            ..SyntheticBackendConfig::default()
        });
        let mut pipeline = Pipeline::new(source(100), DetectorAdapter::new(backend));
        let mut presenter = presenter(policy);
        presenter.apply(PipelineEvent::Batch(seeded_batch()));

        let events = pipeline.start(AccessDecision::Granted)?;
        let failed = pump_until(&mut presenter, &events, Duration::from_secs(2), |p| {
            p.stats().detection_failures > 0
        })?;
        pipeline.stop()?;

        assert!(failed, "{:?}: no failure observed", policy);
        assert_eq!(presenter.overlay().len(), expect_overlay, "{:?}", policy);
        assert_eq!(presenter.stats().batches_received, 1);
    }
    Ok(())
}

#[test]
fn confidence_at_threshold_is_not_drawn() -> Result<()> {
    let backend = SyntheticBackend::new(SyntheticBackendConfig {
        confidence: 0.9,
        ..SyntheticBackendConfig::default()
    });
    let mut pipeline = Pipeline::new(source(100), DetectorAdapter::new(backend));
    let mut presenter = presenter(FailurePolicy::HoldLast);
    presenter.apply(PipelineEvent::Batch(seeded_batch()));

    let events = pipeline.start(AccessDecision::Granted)?;
    let replaced = pump_until(&mut presenter, &events, Duration::from_secs(2), |p| {
        p.stats().batches_received > 1
    })?;
    pipeline.stop()?;

    assert!(replaced);
    // The empty batch replaced the seeded one.
    assert!(presenter.held_batch().is_some_and(|batch| batch.is_empty()));
    assert!(presenter.overlay().is_empty());
    Ok(())
}
