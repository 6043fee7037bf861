//! Capture → detection → presentation hand-offs.
//!
//! Three contexts cooperate:
//!
//! 1. The capture thread owns the `FrameSource`. Every frame goes to the presenter as
//!    `PipelineEvent::Frame`. A frame is also offered to the detection worker, but only
//!    if the worker is idle; otherwise it is used for preview only.
//! 2. The detection worker runs at most one detection at a time and sends each
//!    outcome back as an immutable batch.
//! 3. The presenter runs on whichever thread owns the rendering surface. It is the
//!    only place that touches `OverlayState` and the renderer.
//!
//! The detection hand-off is a zero-capacity channel driven with `try_send`: the send
//! only succeeds when the worker is blocked in `recv`, i.e. idle. Nothing is queued
//! and nothing in flight is cancelled.
//!
//! `Pipeline::stop` never waits on the detection worker. An in-flight detection runs
//! to completion and its result is dropped. The worker checks the stop signal and
//! sends its event under one lock, so once `stop` returns no further batch or
//! failure event is delivered.

use anyhow::{anyhow, bail, Result};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::access::AccessDecision;
use crate::detect::{DetectionBatch, DetectionOutcome, DetectorAdapter};
use crate::frame::Frame;
use crate::ingest::FrameSource;
use crate::overlay::{FailurePolicy, OverlayItem, OverlayState};
use crate::render::{CanvasRenderer, Renderer};

/// Messages delivered to the presentation context.
#[derive(Debug)]
pub enum PipelineEvent {
    /// A new preview frame.
    Frame(Arc<Frame>),
    /// A completed detection batch.
    Batch(Arc<DetectionBatch>),
    /// Detection failed for one frame; processing continues.
    DetectionFailed { frame_sequence: u64, error: String },
    /// Capture failed; the run is over.
    SourceFailed(String),
}

/// Stop flag shared by the capture thread and the detection worker.
///
/// Setting it takes the same lock the worker holds while it delivers a result, so
/// a delivery is either finished before `set` returns or never happens.
#[derive(Default)]
struct StopSignal {
    stopped: Mutex<bool>,
}

impl StopSignal {
    fn is_set(&self) -> bool {
        *self.stopped.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set(&self) {
        *self.stopped.lock().unwrap_or_else(PoisonError::into_inner) = true;
    }

    /// Run `deliver` unless the signal is set. Returns false if stopped.
    fn unless_set(&self, deliver: impl FnOnce()) -> bool {
        let stopped = self.stopped.lock().unwrap_or_else(PoisonError::into_inner);
        if *stopped {
            return false;
        }
        deliver();
        true
    }
}

struct Running<S> {
    stop: Arc<StopSignal>,
    capture: JoinHandle<S>,
}

/// Owns a frame source and a detector adapter and runs them on worker threads.
pub struct Pipeline<S: FrameSource + 'static> {
    source: Option<S>,
    adapter: Arc<Mutex<DetectorAdapter>>,
    running: Option<Running<S>>,
}

impl<S: FrameSource + 'static> Pipeline<S> {
    pub fn new(source: S, adapter: DetectorAdapter) -> Self {
        Self {
            source: Some(source),
            adapter: Arc::new(Mutex::new(adapter)),
            running: None,
        }
    }

    /// Start capture and detection. Returns the event stream for the presenter.
    ///
    /// Fails, without spawning anything, when the source refuses to start (for
    /// example because camera access was refused).
    pub fn start(&mut self, access: AccessDecision) -> Result<Receiver<PipelineEvent>> {
        if self.running.is_some() {
            bail!("pipeline already running");
        }
        let mut source = self
            .source
            .take()
            .ok_or_else(|| anyhow!("frame source unavailable (capture thread panicked)"))?;
        if let Err(err) = source.start(access) {
            self.source = Some(source);
            return Err(err.context("frame source failed to start"));
        }

        let stop = Arc::new(StopSignal::default());
        let (event_tx, event_rx) = mpsc::channel();
        let (frame_tx, frame_rx) = mpsc::sync_channel::<Arc<Frame>>(0);

        // Dropped on return; the worker ends once capture drops `frame_tx`.
        let _detection = spawn_detection_worker(
            frame_rx,
            self.adapter.clone(),
            event_tx.clone(),
            stop.clone(),
        )?;

        let capture_stop = stop.clone();
        let capture = std::thread::Builder::new()
            .name("overlay-capture".to_string())
            .spawn(move || capture_loop(source, frame_tx, event_tx, capture_stop))?;

        self.running = Some(Running { stop, capture });
        log::info!("pipeline started");
        Ok(event_rx)
    }

    /// Stop capture. Idempotent; safe while a detection call is in flight.
    pub fn stop(&mut self) -> Result<()> {
        let Some(running) = self.running.take() else {
            return Ok(());
        };
        running.stop.set();
        let source = running
            .capture
            .join()
            .map_err(|_| anyhow!("capture thread panicked"))?;
        self.source = Some(source);
        log::info!("pipeline stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Shared detector adapter (for counters and threshold inspection).
    pub fn adapter(&self) -> Arc<Mutex<DetectorAdapter>> {
        self.adapter.clone()
    }

    /// The frame source, while it is not owned by a running capture thread.
    pub fn source(&self) -> Option<&S> {
        self.source.as_ref()
    }
}

impl<S: FrameSource + 'static> Drop for Pipeline<S> {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            log::error!("pipeline shutdown failed: {}", err);
        }
    }
}

fn spawn_detection_worker(
    frames: Receiver<Arc<Frame>>,
    adapter: Arc<Mutex<DetectorAdapter>>,
    events: Sender<PipelineEvent>,
    stop: Arc<StopSignal>,
) -> Result<JoinHandle<()>> {
    let handle = std::thread::Builder::new()
        .name("overlay-detect".to_string())
        .spawn(move || detection_loop(frames, adapter, events, stop))?;
    Ok(handle)
}

fn capture_loop<S: FrameSource>(
    mut source: S,
    detect_tx: SyncSender<Arc<Frame>>,
    events: Sender<PipelineEvent>,
    stop: Arc<StopSignal>,
) -> S {
    while !stop.is_set() {
        let frame = match source.next_frame() {
            Ok(frame) => Arc::new(frame),
            Err(err) => {
                log::error!("capture failed: {:#}", err);
                let _ = events.send(PipelineEvent::SourceFailed(format!("{:#}", err)));
                break;
            }
        };

        match detect_tx.try_send(frame.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                log::trace!("detector busy, frame {} is preview-only", frame.sequence);
            }
            Err(TrySendError::Disconnected(_)) => {
                log::trace!("detector gone, frame {} is preview-only", frame.sequence);
            }
        }

        if events.send(PipelineEvent::Frame(frame)).is_err() {
            log::debug!("presenter disconnected, stopping capture");
            break;
        }
    }
    source.stop();
    source
}

fn detection_loop(
    frames: Receiver<Arc<Frame>>,
    adapter: Arc<Mutex<DetectorAdapter>>,
    events: Sender<PipelineEvent>,
    stop: Arc<StopSignal>,
) {
    while let Ok(frame) = frames.recv() {
        let outcome = {
            let mut adapter = adapter.lock().unwrap_or_else(|poisoned| {
                log::warn!("detector adapter lock poisoned, recovering");
                poisoned.into_inner()
            });
            adapter.process(&frame)
        };

        let event = match outcome {
            DetectionOutcome::Batch(batch) => PipelineEvent::Batch(Arc::new(batch)),
            DetectionOutcome::Failed(error) => PipelineEvent::DetectionFailed {
                frame_sequence: frame.sequence,
                error,
            },
        };
        let mut presenter_gone = false;
        let delivered = stop.unless_set(|| presenter_gone = events.send(event).is_err());
        if !delivered {
            log::debug!(
                "discarding detection for frame {} after stop",
                frame.sequence
            );
            continue;
        }
        if presenter_gone {
            return;
        }
    }
}

// ----------------------------------------------------------------------------
// Presenter: the render-context consumer
// ----------------------------------------------------------------------------

/// Result of one `Presenter::pump` call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PumpStatus {
    /// No event arrived within the timeout.
    Idle,
    /// At least one event was applied and the surface redrawn.
    Presented,
    /// Capture failed; the overlay was cleared.
    SourceFailed,
    /// Every producer is gone.
    Disconnected,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PresenterStats {
    pub frames_received: u64,
    pub batches_received: u64,
    pub detection_failures: u64,
    pub redraws: u64,
}

/// Applies pipeline events to the overlay state and drives the renderer.
pub struct Presenter<R: Renderer> {
    renderer: R,
    state: OverlayState,
    latest_frame: Option<Arc<Frame>>,
    stats: PresenterStats,
}

impl<R: Renderer> Presenter<R> {
    pub fn new(renderer: R, failure_policy: FailurePolicy) -> Self {
        let viewport = renderer.viewport();
        Self {
            renderer,
            state: OverlayState::new(viewport, failure_policy),
            latest_frame: None,
            stats: PresenterStats::default(),
        }
    }

    /// Apply one event. Returns true when the surface needs a redraw.
    pub fn apply(&mut self, event: PipelineEvent) -> bool {
        match event {
            PipelineEvent::Frame(frame) => {
                self.stats.frames_received += 1;
                self.latest_frame = Some(frame);
                true
            }
            PipelineEvent::Batch(batch) => {
                self.stats.batches_received += 1;
                self.state.on_batch(batch);
                true
            }
            PipelineEvent::DetectionFailed {
                frame_sequence,
                error,
            } => {
                self.stats.detection_failures += 1;
                log::debug!("no overlay update for frame {}: {}", frame_sequence, error);
                self.state.on_detection_failed();
                true
            }
            PipelineEvent::SourceFailed(error) => {
                log::warn!("frame source failed: {}", error);
                self.source_stopped();
                true
            }
        }
    }

    /// Wait up to `timeout` for events, apply everything pending, redraw once.
    pub fn pump(
        &mut self,
        events: &Receiver<PipelineEvent>,
        timeout: Duration,
    ) -> Result<PumpStatus> {
        let first = match events.recv_timeout(timeout) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) => return Ok(PumpStatus::Idle),
            Err(RecvTimeoutError::Disconnected) => return Ok(PumpStatus::Disconnected),
        };

        let mut source_failed = matches!(first, PipelineEvent::SourceFailed(_));
        self.apply(first);
        while let Ok(event) = events.try_recv() {
            source_failed |= matches!(event, PipelineEvent::SourceFailed(_));
            self.apply(event);
        }

        self.redraw()?;
        if source_failed {
            Ok(PumpStatus::SourceFailed)
        } else {
            Ok(PumpStatus::Presented)
        }
    }

    /// Draw the latest frame with the held batch projected for the current viewport.
    pub fn redraw(&mut self) -> Result<()> {
        self.state.on_viewport(self.renderer.viewport());
        let Some(frame) = self.latest_frame.clone() else {
            return Ok(());
        };
        let overlay = self.state.overlay();
        self.renderer.draw(&frame, &overlay)?;
        self.stats.redraws += 1;
        Ok(())
    }

    /// Call after resizing the renderer; redraws at once if the size changed.
    pub fn viewport_changed(&mut self) -> Result<bool> {
        if self.state.on_viewport(self.renderer.viewport()) {
            self.redraw()?;
            return Ok(true);
        }
        Ok(false)
    }

    /// The source stopped or never started: drop the overlay and the stale frame.
    pub fn source_stopped(&mut self) {
        self.state.clear();
        self.latest_frame = None;
    }

    /// Overlay as it would be drawn right now.
    pub fn overlay(&self) -> Vec<OverlayItem> {
        self.state.overlay()
    }

    pub fn held_batch(&self) -> Option<&DetectionBatch> {
        self.state.held_batch()
    }

    pub fn latest_frame(&self) -> Option<&Frame> {
        self.latest_frame.as_deref()
    }

    pub fn stats(&self) -> PresenterStats {
        self.stats
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut R {
        &mut self.renderer
    }
}

impl Presenter<CanvasRenderer> {
    /// Last composed picture (frame plus overlay) for still capture.
    pub fn snapshot(&self) -> Result<Option<Frame>> {
        self.renderer.composed_frame()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::DetectionResult;
    use crate::geometry::{NormalizedRect, Viewport};
    use crate::render::LogRenderer;

    fn frame(sequence: u64) -> Arc<Frame> {
        Arc::new(Frame::from_rgb(vec![0u8; 12], 2, 2, sequence).expect("valid frame"))
    }

    fn batch(sequence: u64, label: &str) -> Arc<DetectionBatch> {
        Arc::new(DetectionBatch {
            frame_sequence: sequence,
            results: vec![DetectionResult {
                label: label.to_string(),
                confidence: 0.95,
                rect: NormalizedRect::new(0.2, 0.3, 0.1, 0.2),
            }],
        })
    }

    #[test]
    fn held_batch_is_drawn_on_every_new_frame() -> Result<()> {
        let mut presenter = Presenter::new(
            LogRenderer::new(Viewport::new(1000.0, 500.0)),
            FailurePolicy::HoldLast,
        );
        let (tx, rx) = mpsc::channel();
        tx.send(PipelineEvent::Frame(frame(1)))?;
        tx.send(PipelineEvent::Batch(batch(1, "cat")))?;
        assert_eq!(presenter.pump(&rx, Duration::from_millis(10))?, PumpStatus::Presented);

        for seq in 2..5 {
            tx.send(PipelineEvent::Frame(frame(seq)))?;
            presenter.pump(&rx, Duration::from_millis(10))?;
            assert_eq!(presenter.renderer().last_overlay().len(), 1);
            assert_eq!(presenter.renderer().last_overlay()[0].label, "cat");
        }
        Ok(())
    }

    #[test]
    fn second_batch_removes_first_batch_entities() -> Result<()> {
        let mut presenter = Presenter::new(
            LogRenderer::new(Viewport::new(100.0, 100.0)),
            FailurePolicy::HoldLast,
        );
        presenter.apply(PipelineEvent::Frame(frame(1)));
        presenter.apply(PipelineEvent::Batch(batch(1, "cat")));
        presenter.apply(PipelineEvent::Batch(batch(2, "dog")));
        presenter.redraw()?;

        let labels: Vec<&str> = presenter
            .renderer()
            .last_overlay()
            .iter()
            .map(|item| item.label.as_str())
            .collect();
        assert_eq!(labels, vec!["dog"]);
        Ok(())
    }

    #[test]
    fn viewport_change_reprojects_immediately() -> Result<()> {
        let mut presenter = Presenter::new(
            LogRenderer::new(Viewport::new(1000.0, 500.0)),
            FailurePolicy::HoldLast,
        );
        presenter.apply(PipelineEvent::Frame(frame(1)));
        presenter.apply(PipelineEvent::Batch(batch(1, "cat")));
        presenter.redraw()?;
        let before = presenter.renderer().last_overlay()[0].rect;

        presenter
            .renderer_mut()
            .set_viewport(Viewport::new(500.0, 1000.0));
        assert!(presenter.viewport_changed()?);
        let after = presenter.renderer().last_overlay()[0].rect;
        assert!((after.x - before.x / 2.0).abs() < 1e-3);
        assert!((after.y - before.y * 2.0).abs() < 1e-3);
        assert!(!presenter.viewport_changed()?);
        Ok(())
    }

    #[test]
    fn source_failure_clears_overlay() -> Result<()> {
        let mut presenter = Presenter::new(
            LogRenderer::new(Viewport::new(100.0, 100.0)),
            FailurePolicy::HoldLast,
        );
        let (tx, rx) = mpsc::channel();
        tx.send(PipelineEvent::Frame(frame(1)))?;
        tx.send(PipelineEvent::Batch(batch(1, "cat")))?;
        tx.send(PipelineEvent::SourceFailed("device unplugged".to_string()))?;

        assert_eq!(
            presenter.pump(&rx, Duration::from_millis(10))?,
            PumpStatus::SourceFailed
        );
        assert!(presenter.overlay().is_empty());
        assert!(presenter.latest_frame().is_none());
        Ok(())
    }

    #[test]
    fn snapshot_includes_overlay_boxes() -> Result<()> {
        let renderer = CanvasRenderer::new(100, 100)?;
        let mut presenter = Presenter::new(renderer, FailurePolicy::HoldLast);
        assert!(presenter.snapshot()?.is_none());

        presenter.apply(PipelineEvent::Frame(frame(1)));
        presenter.apply(PipelineEvent::Batch(batch(1, "cat")));
        presenter.redraw()?;

        let still = presenter.snapshot()?.expect("composed frame");
        // Box {0.2, 0.3, 0.1, 0.2} on 100x100 has its top-left corner at (20, 50).
        assert_eq!(still.pixel(20, 52), Some([255, 0, 0]));
        assert_eq!(still.pixel(90, 10), Some([0, 0, 0]));
        Ok(())
    }

    #[test]
    fn stop_signal_blocks_delivery_once_set() {
        let signal = StopSignal::default();
        let mut delivered = 0;
        assert!(signal.unless_set(|| delivered += 1));
        signal.set();
        assert!(signal.is_set());
        assert!(!signal.unless_set(|| delivered += 1));
        assert_eq!(delivered, 1);
    }

    #[test]
    fn pump_reports_idle_and_disconnect() -> Result<()> {
        let mut presenter = Presenter::new(
            LogRenderer::new(Viewport::new(100.0, 100.0)),
            FailurePolicy::HoldLast,
        );
        let (tx, rx) = mpsc::channel::<PipelineEvent>();
        assert_eq!(presenter.pump(&rx, Duration::from_millis(5))?, PumpStatus::Idle);
        drop(tx);
        assert_eq!(
            presenter.pump(&rx, Duration::from_millis(5))?,
            PumpStatus::Disconnected
        );
        Ok(())
    }
}
