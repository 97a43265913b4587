//! Frame-processing orchestrator.
//!
//! One thread owns every piece of per-frame state: the matcher, debouncer,
//! cooldown table and recording session. Everything that happens
//! asynchronously (captured frames, stop-confirmation timers, shutdown
//! requests) arrives as a `PipelineInput` on a single bounded queue and is
//! handled in order, so transitions never race.

use anyhow::{anyhow, Result};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::announce::build_announcer;
use crate::config::WatchConfig;
use crate::cooldown::CooldownTracker;
use crate::events::{announcement_for, WatchEvent};
use crate::frame::Frame;
use crate::ingest::{FrameSource, SourceStats};
use crate::matcher::{build_matcher, unknown_present, Detection, FaceMatcher};
use crate::notify::Notifier;
use crate::overlay;
use crate::presence::PresenceDebouncer;
use crate::publish::LiveFramePublisher;
use crate::recording::{
    ClipNamer, MjpegWriterFactory, RecordingSession, RecordingState, SessionEvent,
};
use crate::storage::SqliteEventSink;

/// Frames buffered between capture and processing.
pub const INPUT_QUEUE_DEPTH: usize = 8;
const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(200);

pub enum PipelineInput {
    Frame(Frame),
    /// A stop-confirmation timer fired.
    ConfirmElapsed { token: u64, at: Instant },
    Shutdown,
}

/// Bounded input queue shared by the capture thread and timers.
pub fn input_channel() -> (SyncSender<PipelineInput>, Receiver<PipelineInput>) {
    mpsc::sync_channel(INPUT_QUEUE_DEPTH)
}

// ----------------------------------------------------------------------------
// Confirmation timers
// ----------------------------------------------------------------------------

/// Arranges for `ConfirmElapsed { token, .. }` to reach the pipeline at
/// `deadline`.
pub trait ConfirmScheduler: Send {
    fn schedule(&mut self, token: u64, deadline: Instant);
}

/// One short-lived sleeper thread per pending stop.
pub struct ThreadScheduler {
    inputs: SyncSender<PipelineInput>,
}

impl ThreadScheduler {
    pub fn new(inputs: SyncSender<PipelineInput>) -> Self {
        Self { inputs }
    }
}

impl ConfirmScheduler for ThreadScheduler {
    fn schedule(&mut self, token: u64, deadline: Instant) {
        let inputs = self.inputs.clone();
        let spawned = thread::Builder::new()
            .name(format!("confirm-{}", token))
            .spawn(move || {
                let now = Instant::now();
                if deadline > now {
                    thread::sleep(deadline - now);
                }
                // The pipeline may already be gone at shutdown.
                let _ = inputs.send(PipelineInput::ConfirmElapsed {
                    token,
                    at: Instant::now(),
                });
            });
        if let Err(e) = spawned {
            // Overdue frames still close the clip once the deadline passes.
            log::warn!("confirm timer {} not started: {}", token, e);
        }
    }
}

/// Records requests and leaves firing to the caller. For tests and
/// simulated runs that drive time themselves.
#[derive(Clone, Default)]
pub struct ManualScheduler {
    pending: Arc<Mutex<Vec<(u64, Instant)>>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain the requested timers.
    pub fn take(&self) -> Vec<(u64, Instant)> {
        self.pending
            .lock()
            .map(|mut pending| std::mem::take(&mut *pending))
            .unwrap_or_default()
    }
}

impl ConfirmScheduler for ManualScheduler {
    fn schedule(&mut self, token: u64, deadline: Instant) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.push((token, deadline));
        }
    }
}

// ----------------------------------------------------------------------------
// Pipeline
// ----------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct PipelineSettings {
    /// Recognition runs on every `stride`-th frame.
    pub stride: u64,
    pub window: usize,
    pub majority: usize,
    pub cooldown: Duration,
    pub camera_id: String,
    /// Draw face boxes on clip and preview copies, and a REC marker on the
    /// preview while recording.
    pub overlay: bool,
}

impl PipelineSettings {
    pub fn from_config(cfg: &WatchConfig) -> Self {
        Self {
            stride: cfg.recognition.stride,
            window: cfg.recognition.window,
            majority: cfg.recognition.majority,
            cooldown: cfg.cooldown,
            camera_id: cfg.events.camera_id.clone(),
            overlay: cfg.overlay.enabled,
        }
    }
}

/// Collaborators handed to `Pipeline::new`.
pub struct PipelineParts {
    pub matcher: Box<dyn FaceMatcher>,
    pub session: RecordingSession,
    pub publisher: LiveFramePublisher,
    pub notifier: Notifier,
    pub scheduler: Box<dyn ConfirmScheduler>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub frames_seen: u64,
    pub recognition_cycles: u64,
    pub matcher_errors: u64,
    pub sightings: u64,
    pub sightings_suppressed: u64,
    pub clips_started: u64,
    pub clips_finished: u64,
    pub clips_failed: u64,
    pub publish_errors: u64,
}

pub struct Pipeline {
    settings: PipelineSettings,
    matcher: Box<dyn FaceMatcher>,
    debouncer: PresenceDebouncer,
    cooldown: CooldownTracker,
    session: RecordingSession,
    publisher: LiveFramePublisher,
    notifier: Notifier,
    scheduler: Box<dyn ConfirmScheduler>,
    stable: bool,
    stats: PipelineStats,
    health: HealthWindow,
}

struct HealthWindow {
    since: Instant,
    frames_at_start: u64,
}

impl Pipeline {
    pub fn new(settings: PipelineSettings, parts: PipelineParts) -> Result<Self> {
        if settings.stride == 0 {
            return Err(anyhow!("recognition stride must be >= 1"));
        }
        let debouncer = PresenceDebouncer::new(settings.window, settings.majority)?;
        let cooldown = CooldownTracker::new(settings.cooldown);
        Ok(Self {
            settings,
            matcher: parts.matcher,
            debouncer,
            cooldown,
            session: parts.session,
            publisher: parts.publisher,
            notifier: parts.notifier,
            scheduler: parts.scheduler,
            stable: false,
            stats: PipelineStats::default(),
            health: HealthWindow {
                since: Instant::now(),
                frames_at_start: 0,
            },
        })
    }

    /// Wire up the configured matcher, SQLite sink, announcer, clip writer
    /// and live publisher. Confirmation timers post into `inputs`.
    pub fn from_config(cfg: &WatchConfig, inputs: SyncSender<PipelineInput>) -> Result<Self> {
        let matcher = build_matcher(&cfg.recognition.matcher)?;
        let sink = SqliteEventSink::open(&cfg.events.db_path)?;
        let announcer = if cfg.announce.enabled {
            Some(build_announcer(cfg.announce.command.as_deref())?)
        } else {
            None
        };
        let notifier = Notifier::spawn(Box::new(sink), announcer)?;
        let writers = MjpegWriterFactory {
            jpeg_quality: cfg.recording.jpeg_quality,
        };
        let session = RecordingSession::new(
            cfg.recording.session_settings(),
            Box::new(writers),
            ClipNamer::new(&cfg.recording.dir),
        );
        let publisher = LiveFramePublisher::new(cfg.live.preview_settings());
        Self::new(
            PipelineSettings::from_config(cfg),
            PipelineParts {
                matcher,
                session,
                publisher,
                notifier,
                scheduler: Box::new(ThreadScheduler::new(inputs)),
            },
        )
    }

    /// Handle one input. Returns `false` when the pipeline should stop.
    pub fn handle(&mut self, input: PipelineInput) -> bool {
        match input {
            PipelineInput::Frame(frame) => {
                self.process_frame(frame);
                true
            }
            PipelineInput::ConfirmElapsed { token, at } => {
                self.on_confirm_elapsed(token, at);
                true
            }
            PipelineInput::Shutdown => false,
        }
    }

    pub fn process_frame(&mut self, frame: Frame) {
        self.stats.frames_seen += 1;

        let mut detections = Vec::new();
        if self.stats.frames_seen % self.settings.stride == 0 {
            self.stats.recognition_cycles += 1;
            match self.matcher.match_faces(&frame) {
                Ok(found) => {
                    self.stable = self.debouncer.observe(unknown_present(&found));
                    let events = self.session.on_presence(self.stable, &frame);
                    self.apply(events);
                    self.report_sightings(&found, frame.captured_at);
                    detections = found;
                }
                Err(e) => {
                    self.stats.matcher_errors += 1;
                    log::warn!("{} matcher failed on frame {}: {:#}", self.matcher.name(), frame.sequence, e);
                }
            }
        }

        // Boxes go on this frame's clip and preview copies; the REC marker
        // only on the preview.
        let boxed = self.overlay_copy(&frame, &detections, None);
        let events = self.session.write(boxed.as_ref().unwrap_or(&frame));
        self.apply(events);

        let clock = self
            .session
            .is_recording()
            .then(|| chrono::Local::now().format("%H:%M:%S").to_string());
        let preview = self.overlay_copy(&frame, &detections, clock.as_deref());
        if let Err(e) = self.publisher.publish(preview.as_ref().unwrap_or(&frame)) {
            self.stats.publish_errors += 1;
            log::debug!("live frame publish failed: {:#}", e);
        }

        self.maybe_log_health(frame.captured_at);
    }

    pub fn on_confirm_elapsed(&mut self, token: u64, at: Instant) {
        let events = self.session.confirm_stop(token, at);
        self.apply(events);
    }

    /// Consume inputs until `stop` is set, a `Shutdown` arrives or every
    /// sender is gone. Dropping `inputs` on return releases a capture thread
    /// blocked on a full queue.
    pub fn run(&mut self, inputs: Receiver<PipelineInput>, stop: &AtomicBool) {
        log::info!(
            "pipeline running (stride={}, window={}, majority={}, camera={})",
            self.settings.stride,
            self.settings.window,
            self.settings.majority,
            self.settings.camera_id
        );
        while !stop.load(Ordering::Relaxed) {
            match inputs.recv_timeout(STOP_POLL_INTERVAL) {
                Ok(input) => {
                    if !self.handle(input) {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    /// Close any open clip, then drain and stop the notifier.
    pub fn shutdown(mut self, at: Instant) -> Result<PipelineStats> {
        let events = self.session.force_close(at);
        self.apply(events);
        self.notifier.shutdown()?;
        log::info!("pipeline stopped: {:?}", self.stats);
        Ok(self.stats)
    }

    pub fn stable_presence(&self) -> bool {
        self.stable
    }

    pub fn recording_state(&self) -> RecordingState {
        self.session.state()
    }

    pub fn current_clip(&self) -> Option<PathBuf> {
        self.session.current_path().map(|path| path.to_path_buf())
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    pub fn publisher(&self) -> LiveFramePublisher {
        self.publisher.clone()
    }

    /// Wait until queued events and announcements have been handled.
    pub fn flush_notifications(&self) {
        self.notifier.flush();
    }

    /// Annotated copy of `frame`, or `None` when there is nothing to draw.
    fn overlay_copy(
        &self,
        frame: &Frame,
        detections: &[Detection],
        recording_marker: Option<&str>,
    ) -> Option<Frame> {
        if !self.settings.overlay || !overlay::has_marks(detections, recording_marker.is_some()) {
            return None;
        }
        match overlay::annotate(frame, detections, recording_marker) {
            Ok(annotated) => Some(annotated),
            Err(e) => {
                log::debug!("overlay skipped on frame {}: {:#}", frame.sequence, e);
                None
            }
        }
    }

    fn report_sightings(&mut self, detections: &[Detection], now: Instant) {
        for detection in detections {
            match self.cooldown.try_act(detection.identity.as_key(), now) {
                Ok(true) => {
                    self.stats.sightings += 1;
                    log::info!(
                        "sighting: {} (confidence {:?})",
                        detection.identity,
                        detection.confidence
                    );
                    self.notifier.event(WatchEvent::sighting(
                        &self.settings.camera_id,
                        detection.identity.clone(),
                        detection.confidence,
                    ));
                    self.notifier.announce(announcement_for(&detection.identity));
                }
                Ok(false) => self.stats.sightings_suppressed += 1,
                Err(e) => log::warn!("cooldown check failed for {}: {:#}", detection.identity, e),
            }
        }
    }

    fn apply(&mut self, events: Vec<SessionEvent>) {
        for event in events {
            match event {
                SessionEvent::Started { .. } => self.stats.clips_started += 1,
                SessionEvent::StopPending { token, deadline } => {
                    self.scheduler.schedule(token, deadline);
                }
                SessionEvent::Resumed { path } => {
                    log::info!("recording: resumed {}", path.display());
                }
                SessionEvent::Finished(summary) => {
                    self.stats.clips_finished += 1;
                    self.notifier.event(WatchEvent::recording_finished(
                        &self.settings.camera_id,
                        summary.path,
                        summary.duration,
                        summary.file_size_bytes,
                    ));
                }
                SessionEvent::Failed { path, reason } => {
                    self.stats.clips_failed += 1;
                    self.notifier.event(WatchEvent::recording_failed(
                        &self.settings.camera_id,
                        path,
                        reason,
                    ));
                }
            }
        }
    }

    fn maybe_log_health(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.health.since);
        if elapsed < HEALTH_LOG_INTERVAL {
            return;
        }
        let frames = self.stats.frames_seen - self.health.frames_at_start;
        log::info!(
            "health frames={} recognitions={} fps={:.1} recording={} stable={}",
            self.stats.frames_seen,
            self.stats.recognition_cycles,
            frames as f64 / elapsed.as_secs_f64(),
            self.session.state(),
            self.stable
        );
        self.health = HealthWindow {
            since: now,
            frames_at_start: self.stats.frames_seen,
        };
    }
}

// ----------------------------------------------------------------------------
// Capture thread
// ----------------------------------------------------------------------------

/// Pull frames from `source` into the pipeline until `stop` is set or the
/// pipeline hangs up. Exhaustion and errors pause for `retry_delay`; errors
/// also reconnect.
pub fn spawn_capture(
    mut source: Box<dyn FrameSource>,
    retry_delay: Duration,
    inputs: SyncSender<PipelineInput>,
    stop: Arc<AtomicBool>,
) -> Result<JoinHandle<SourceStats>> {
    let handle = thread::Builder::new()
        .name("capture".to_string())
        .spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                match source.next_frame() {
                    Ok(Some(frame)) => {
                        if inputs.send(PipelineInput::Frame(frame)).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        log::debug!("source idle; retrying in {:?}", retry_delay);
                        thread::sleep(retry_delay);
                    }
                    Err(e) => {
                        log::warn!("frame capture failed: {:#}", e);
                        thread::sleep(retry_delay);
                        if let Err(e) = source.connect() {
                            log::warn!("source reconnect failed: {:#}", e);
                        }
                    }
                }
            }
            source.stats()
        })?;
    Ok(handle)
}
