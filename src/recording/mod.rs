//! Recording session state machine.
//!
//! Driven by stabilized presence edges and the frame stream:
//!
//! ```text
//!            rising edge / open ok
//!   Idle ──► Starting ─────────────► Active ◄──────────────┐
//!    ▲          │ open failed          │ falling edge      │ rising edge
//!    │◄─────────┘                      ▼                   │ (resume, same clip)
//!    │                           StoppingConfirm ──────────┘
//!    │    confirm elapsed / max duration │
//!    └───────────────────────────────────┘
//! ```
//!
//! At most one writer is open at any time. Open failures are not retried
//! until the next rising edge. Presence must drop and return first.

mod naming;
mod writer;

pub use naming::{ClipNamer, CLIP_PREFIX};
pub use writer::{
    ClipSpec, MjpegFileWriter, MjpegWriterFactory, VideoWriter, WriterFactory,
    DEFAULT_CLIP_JPEG_QUALITY, MJPEG_EXTENSION,
};

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::frame::Frame;

pub const DEFAULT_CONFIRM_DELAY: Duration = Duration::from_secs(2);
pub const DEFAULT_MAX_DURATION: Duration = Duration::from_secs(30);
pub const DEFAULT_RECORDING_FPS: u32 = 15;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordingState {
    Idle,
    Starting,
    Active,
    StoppingConfirm,
}

impl RecordingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordingState::Idle => "idle",
            RecordingState::Starting => "starting",
            RecordingState::Active => "active",
            RecordingState::StoppingConfirm => "stopping_confirm",
        }
    }
}

impl fmt::Display for RecordingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug)]
pub struct SessionSettings {
    pub fps: u32,
    pub confirm_delay: Duration,
    pub max_duration: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            fps: DEFAULT_RECORDING_FPS,
            confirm_delay: DEFAULT_CONFIRM_DELAY,
            max_duration: DEFAULT_MAX_DURATION,
        }
    }
}

/// A closed clip.
#[derive(Clone, Debug, PartialEq)]
pub struct ClipSummary {
    pub path: PathBuf,
    pub duration: Duration,
    pub file_size_bytes: u64,
    pub frames_submitted: u64,
}

/// What a session call did. The caller turns these into events and timers.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    Started {
        path: PathBuf,
    },
    /// Presence dropped. The clip closes unless presence returns before
    /// `deadline`; the caller must call `confirm_stop(token, ..)` then.
    StopPending {
        token: u64,
        deadline: Instant,
    },
    Resumed {
        path: PathBuf,
    },
    Finished(ClipSummary),
    Failed {
        path: Option<PathBuf>,
        reason: String,
    },
}

struct OpenClip {
    path: PathBuf,
    writer: Box<dyn VideoWriter>,
    started_at: Instant,
    frames_submitted: u64,
}

#[derive(Clone, Copy, Debug)]
struct PendingStop {
    token: u64,
    deadline: Instant,
}

pub struct RecordingSession {
    settings: SessionSettings,
    writers: Box<dyn WriterFactory>,
    namer: ClipNamer,
    state: RecordingState,
    clip: Option<OpenClip>,
    pending_stop: Option<PendingStop>,
    next_token: u64,
    present: bool,
}

impl RecordingSession {
    pub fn new(settings: SessionSettings, writers: Box<dyn WriterFactory>, namer: ClipNamer) -> Self {
        Self {
            settings,
            writers,
            namer,
            state: RecordingState::Idle,
            clip: None,
            pending_stop: None,
            next_token: 1,
            present: false,
        }
    }

    pub fn state(&self) -> RecordingState {
        self.state
    }

    pub fn is_recording(&self) -> bool {
        self.clip.is_some()
    }

    pub fn current_path(&self) -> Option<&Path> {
        self.clip.as_ref().map(|clip| clip.path.as_path())
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Feed the stabilized presence for `frame`. Only edges act.
    pub fn on_presence(&mut self, stable: bool, frame: &Frame) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        self.settle_overdue(frame.captured_at, &mut out);
        let was_present = self.present;
        self.present = stable;
        match (was_present, stable) {
            (false, true) => self.on_rising(frame, &mut out),
            (true, false) => self.on_falling(frame.captured_at, &mut out),
            _ => {}
        }
        out
    }

    /// Append `frame` to the open clip, if any, and apply the time limits.
    pub fn write(&mut self, frame: &Frame) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        let now = frame.captured_at;
        if self.settle_overdue(now, &mut out) {
            return out;
        }

        let Some(clip) = self.clip.as_mut() else {
            return out;
        };
        if let Err(e) = clip.writer.write_frame(frame) {
            let reason = format!("write {} failed: {:#}", clip.path.display(), e);
            self.abort(reason, &mut out);
            return out;
        }
        clip.frames_submitted += 1;

        if now.saturating_duration_since(clip.started_at) >= self.settings.max_duration {
            let resume = self.state == RecordingState::Active && self.present;
            self.finalize(now, "max duration reached", &mut out);
            if resume {
                self.start(frame, &mut out);
            }
        }
        out
    }

    /// Confirmation timer fired. Stale tokens are ignored.
    pub fn confirm_stop(&mut self, token: u64, at: Instant) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        match self.pending_stop {
            Some(pending) if pending.token == token => {
                self.finalize(at, "absence confirmed", &mut out);
            }
            _ => log::debug!("recording: ignoring stale stop token {}", token),
        }
        out
    }

    /// Close whatever is open, e.g. at shutdown.
    pub fn force_close(&mut self, at: Instant) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        if self.clip.is_some() {
            self.finalize(at, "shutdown", &mut out);
        }
        self.present = false;
        out
    }

    /// A frame at or past the confirmation deadline means the timer is
    /// late. The clip ends at the deadline, before `now` is looked at.
    fn settle_overdue(&mut self, now: Instant, out: &mut Vec<SessionEvent>) -> bool {
        match self.pending_stop {
            Some(pending) if now >= pending.deadline => {
                log::debug!("recording: stop confirmed by frame time");
                self.finalize(pending.deadline, "absence confirmed", out);
                true
            }
            _ => false,
        }
    }

    fn on_rising(&mut self, frame: &Frame, out: &mut Vec<SessionEvent>) {
        match self.state {
            RecordingState::Idle => self.start(frame, out),
            RecordingState::StoppingConfirm => {
                self.pending_stop = None;
                self.transition(RecordingState::Active, "presence returned");
                if let Some(clip) = &self.clip {
                    out.push(SessionEvent::Resumed {
                        path: clip.path.clone(),
                    });
                }
            }
            RecordingState::Active | RecordingState::Starting => {}
        }
    }

    fn on_falling(&mut self, now: Instant, out: &mut Vec<SessionEvent>) {
        if self.state != RecordingState::Active {
            return;
        }
        let token = self.next_token;
        self.next_token += 1;
        let deadline = now + self.settings.confirm_delay;
        self.pending_stop = Some(PendingStop { token, deadline });
        self.transition(RecordingState::StoppingConfirm, "presence lost");
        out.push(SessionEvent::StopPending { token, deadline });
    }

    fn start(&mut self, frame: &Frame, out: &mut Vec<SessionEvent>) {
        debug_assert!(self.clip.is_none(), "second writer requested");
        self.transition(RecordingState::Starting, "presence confirmed");
        let path = self.namer.next_path(self.writers.extension());
        let spec = ClipSpec {
            width: frame.width,
            height: frame.height,
            fps: self.settings.fps,
        };
        match self.writers.open(&path, spec) {
            Ok(writer) => {
                self.clip = Some(OpenClip {
                    path: path.clone(),
                    writer,
                    started_at: frame.captured_at,
                    frames_submitted: 0,
                });
                self.transition(RecordingState::Active, "writer open");
                log::info!("recording: started {}", path.display());
                out.push(SessionEvent::Started { path });
            }
            Err(e) => {
                self.transition(RecordingState::Idle, "writer open failed");
                let reason = format!("open {} failed: {:#}", path.display(), e);
                log::warn!("recording: {}", reason);
                out.push(SessionEvent::Failed { path: None, reason });
            }
        }
    }

    fn finalize(&mut self, at: Instant, why: &str, out: &mut Vec<SessionEvent>) {
        self.pending_stop = None;
        let Some(clip) = self.clip.take() else {
            self.transition(RecordingState::Idle, why);
            return;
        };
        self.transition(RecordingState::Idle, why);
        let duration = at.saturating_duration_since(clip.started_at);
        match clip.writer.finish() {
            Ok(file_size_bytes) => {
                log::info!(
                    "recording: finished {} ({:.1}s, {} bytes)",
                    clip.path.display(),
                    duration.as_secs_f64(),
                    file_size_bytes
                );
                out.push(SessionEvent::Finished(ClipSummary {
                    path: clip.path,
                    duration,
                    file_size_bytes,
                    frames_submitted: clip.frames_submitted,
                }));
            }
            Err(e) => {
                let reason = format!("close {} failed: {:#}", clip.path.display(), e);
                log::warn!("recording: {}", reason);
                out.push(SessionEvent::Failed {
                    path: Some(clip.path),
                    reason,
                });
            }
        }
    }

    fn abort(&mut self, reason: String, out: &mut Vec<SessionEvent>) {
        self.pending_stop = None;
        self.transition(RecordingState::Idle, "writer error");
        if let Some(clip) = self.clip.take() {
            if let Err(e) = clip.writer.finish() {
                log::debug!("recording: close after failure also failed: {:#}", e);
            }
            log::warn!("recording: {}", reason);
            out.push(SessionEvent::Failed {
                path: Some(clip.path),
                reason,
            });
        }
    }

    fn transition(&mut self, to: RecordingState, why: &str) {
        if self.state != to {
            log::debug!("recording: {} -> {} ({})", self.state, to, why);
            self.state = to;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Result};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct Counters {
        opened: AtomicUsize,
        open_now: AtomicUsize,
        frames: AtomicUsize,
    }

    struct FakeWriter {
        counters: Arc<Counters>,
        fail_writes: bool,
    }

    impl VideoWriter for FakeWriter {
        fn write_frame(&mut self, _frame: &Frame) -> Result<()> {
            if self.fail_writes {
                return Err(anyhow!("disk gone"));
            }
            self.counters.frames.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn finish(self: Box<Self>) -> Result<u64> {
            self.counters.open_now.fetch_sub(1, Ordering::SeqCst);
            Ok(1234)
        }
    }

    struct FakeFactory {
        counters: Arc<Counters>,
        fail_open: bool,
        fail_writes: bool,
    }

    impl WriterFactory for FakeFactory {
        fn open(&mut self, _path: &Path, _spec: ClipSpec) -> Result<Box<dyn VideoWriter>> {
            if self.fail_open {
                return Err(anyhow!("codec unavailable"));
            }
            self.counters.opened.fetch_add(1, Ordering::SeqCst);
            let open = self.counters.open_now.fetch_add(1, Ordering::SeqCst) + 1;
            assert_eq!(open, 1, "two writers open at once");
            Ok(Box::new(FakeWriter {
                counters: self.counters.clone(),
                fail_writes: self.fail_writes,
            }))
        }
    }

    fn session(fail_open: bool, fail_writes: bool) -> (RecordingSession, Arc<Counters>) {
        let counters = Arc::new(Counters::default());
        let factory = FakeFactory {
            counters: counters.clone(),
            fail_open,
            fail_writes,
        };
        let settings = SessionSettings {
            fps: 15,
            confirm_delay: Duration::from_secs(2),
            max_duration: Duration::from_secs(30),
        };
        let session = RecordingSession::new(settings, Box::new(factory), ClipNamer::new("clips"));
        (session, counters)
    }

    fn frame_at(t0: Instant, secs: u64) -> Frame {
        Frame::solid(4, 4, [0, 0, 0], t0 + Duration::from_secs(secs), secs)
    }

    fn step(s: &mut RecordingSession, stable: bool, frame: &Frame) -> Vec<SessionEvent> {
        let mut events = s.on_presence(stable, frame);
        events.extend(s.write(frame));
        events
    }

    #[test]
    fn rising_edge_starts_and_confirmed_absence_finishes() {
        let (mut s, counters) = session(false, false);
        let t0 = Instant::now();

        let events = step(&mut s, true, &frame_at(t0, 0));
        assert!(matches!(events[0], SessionEvent::Started { .. }));
        assert_eq!(s.state(), RecordingState::Active);

        let events = step(&mut s, false, &frame_at(t0, 4));
        let SessionEvent::StopPending { token, deadline } = events[0] else {
            panic!("expected StopPending, got {:?}", events);
        };
        assert_eq!(deadline, t0 + Duration::from_secs(6));
        assert_eq!(s.state(), RecordingState::StoppingConfirm);

        let events = s.confirm_stop(token, deadline);
        let SessionEvent::Finished(summary) = &events[0] else {
            panic!("expected Finished, got {:?}", events);
        };
        assert_eq!(summary.duration, Duration::from_secs(6));
        assert_eq!(summary.file_size_bytes, 1234);
        assert_eq!(s.state(), RecordingState::Idle);
        assert_eq!(counters.open_now.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn presence_returning_resumes_the_same_clip() {
        let (mut s, counters) = session(false, false);
        let t0 = Instant::now();
        step(&mut s, true, &frame_at(t0, 0));
        let path = s.current_path().unwrap().to_path_buf();

        let events = step(&mut s, false, &frame_at(t0, 1));
        let SessionEvent::StopPending { token, .. } = events[0] else {
            panic!("expected StopPending");
        };
        let events = step(&mut s, true, &frame_at(t0, 2));
        assert_eq!(events, vec![SessionEvent::Resumed { path: path.clone() }]);

        // The superseded timer must not close the resumed clip.
        assert!(s.confirm_stop(token, t0 + Duration::from_secs(3)).is_empty());
        assert_eq!(s.current_path(), Some(path.as_path()));
        assert_eq!(counters.opened.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn late_timer_is_covered_by_frame_time() {
        let (mut s, _) = session(false, false);
        let t0 = Instant::now();
        step(&mut s, true, &frame_at(t0, 0));
        step(&mut s, false, &frame_at(t0, 1));
        let events = step(&mut s, false, &frame_at(t0, 3));
        let SessionEvent::Finished(summary) = &events[0] else {
            panic!("expected Finished, got {:?}", events);
        };
        assert_eq!(summary.duration, Duration::from_secs(3));
    }

    #[test]
    fn presence_after_missed_deadline_starts_a_new_clip() {
        let (mut s, counters) = session(false, false);
        let t0 = Instant::now();
        step(&mut s, true, &frame_at(t0, 0));
        let first = s.current_path().unwrap().to_path_buf();
        step(&mut s, false, &frame_at(t0, 5));

        // Deadline was t=7; the timer has not been delivered yet.
        let events = step(&mut s, true, &frame_at(t0, 8));
        assert_eq!(events.len(), 2, "{:?}", events);
        let SessionEvent::Finished(summary) = &events[0] else {
            panic!("expected Finished, got {:?}", events);
        };
        assert_eq!(summary.path, first);
        assert_eq!(summary.duration, Duration::from_secs(7));
        let SessionEvent::Started { path } = &events[1] else {
            panic!("expected Started, got {:?}", events);
        };
        assert_ne!(path, &first);
        assert_eq!(s.state(), RecordingState::Active);
        assert_eq!(counters.opened.load(Ordering::SeqCst), 2);
        assert_eq!(counters.frames.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn max_duration_rolls_over_into_a_new_clip() {
        let (mut s, counters) = session(false, false);
        let t0 = Instant::now();
        step(&mut s, true, &frame_at(t0, 0));
        let first = s.current_path().unwrap().to_path_buf();
        for secs in 1..30 {
            assert!(step(&mut s, true, &frame_at(t0, secs)).is_empty());
        }
        let events = step(&mut s, true, &frame_at(t0, 30));
        assert_eq!(events.len(), 2);
        let SessionEvent::Finished(summary) = &events[0] else {
            panic!("expected Finished");
        };
        assert_eq!(summary.path, first);
        assert_eq!(summary.duration, Duration::from_secs(30));
        let SessionEvent::Started { path } = &events[1] else {
            panic!("expected Started");
        };
        assert_ne!(path, &first);
        assert_eq!(counters.opened.load(Ordering::SeqCst), 2);
        assert_eq!(s.state(), RecordingState::Active);
    }

    #[test]
    fn max_duration_while_confirming_closes_without_restart() {
        let (mut s, counters) = session(false, false);
        let t0 = Instant::now();
        step(&mut s, true, &frame_at(t0, 0));
        for secs in 1..29 {
            step(&mut s, true, &frame_at(t0, secs));
        }
        step(&mut s, false, &frame_at(t0, 29));
        let events = step(&mut s, false, &frame_at(t0, 30));
        assert!(matches!(events[..], [SessionEvent::Finished(_)]));
        assert_eq!(s.state(), RecordingState::Idle);
        assert_eq!(counters.opened.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn open_failure_is_reported_and_not_retried() {
        let (mut s, counters) = session(true, false);
        let t0 = Instant::now();
        let events = step(&mut s, true, &frame_at(t0, 0));
        assert!(matches!(events[..], [SessionEvent::Failed { path: None, .. }]));
        assert_eq!(s.state(), RecordingState::Idle);
        for secs in 1..5 {
            assert!(step(&mut s, true, &frame_at(t0, secs)).is_empty());
        }
        assert_eq!(counters.opened.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn write_failure_fails_the_clip() {
        let (mut s, counters) = session(false, true);
        let t0 = Instant::now();
        let events = step(&mut s, true, &frame_at(t0, 0));
        assert!(matches!(events[0], SessionEvent::Started { .. }));
        assert!(matches!(events[1], SessionEvent::Failed { path: Some(_), .. }));
        assert_eq!(s.state(), RecordingState::Idle);
        assert!(!s.is_recording());
        assert_eq!(counters.open_now.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn force_close_finishes_open_clip() {
        let (mut s, _) = session(false, false);
        let t0 = Instant::now();
        step(&mut s, true, &frame_at(t0, 0));
        let events = s.force_close(t0 + Duration::from_secs(5));
        assert!(matches!(events[..], [SessionEvent::Finished(_)]));
        assert!(s.force_close(t0 + Duration::from_secs(6)).is_empty());
    }

    #[test]
    fn frames_without_presence_are_not_written() {
        let (mut s, counters) = session(false, false);
        let t0 = Instant::now();
        for secs in 0..5 {
            assert!(step(&mut s, false, &frame_at(t0, secs)).is_empty());
        }
        assert_eq!(counters.frames.load(Ordering::SeqCst), 0);
    }
}
