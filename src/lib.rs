//! Occupant Watch
//!
//! Watches a camera feed for people and keeps a record of who came by.
//!
//! # Architecture
//!
//! Frames flow from a source into a single orchestrator thread:
//!
//! 1. **Recognition** on every Nth frame: a face matcher labels each face as
//!    a known person or unknown.
//! 2. **Debounce**: a sliding majority window with hysteresis turns the noisy
//!    per-frame "unknown person present" signal into stable presence.
//! 3. **Recording**: stable presence drives a clip session (start, grace
//!    period before stopping, resume, maximum clip length). At most one
//!    writer is ever open.
//! 4. **Sightings**: every labelled face passes a per-identity cooldown before
//!    it produces an event and a spoken announcement.
//! 5. **Live view**: every frame is published as the latest preview JPEG.
//!
//! Event persistence and announcements run on their own worker threads and
//! never stall the frame loop.
//!
//! # Module Structure
//!
//! - `frame`: captured RGB frames and JPEG encoding
//! - `ingest`: frame sources (synthetic, HTTP MJPEG)
//! - `matcher`: face matcher capability and adapters
//! - `presence`, `cooldown`: signal conditioning
//! - `recording`: clip session state machine and writers
//! - `overlay`: face boxes and REC marker drawn on frame copies
//! - `publish`: latest-frame slot for live viewers
//! - `events`, `storage`, `announce`, `notify`: outputs
//! - `pipeline`: the orchestrator and capture thread
//! - `config`: file + environment configuration

pub mod announce;
pub mod config;
pub mod cooldown;
pub mod events;
pub mod frame;
pub mod ingest;
pub mod matcher;
pub mod notify;
pub mod overlay;
pub mod pipeline;
pub mod presence;
pub mod publish;
pub mod recording;
pub mod storage;

pub use announce::{build_announcer, Announcer, CommandAnnouncer, LogAnnouncer};
pub use config::WatchConfig;
pub use cooldown::CooldownTracker;
pub use events::{announcement_for, EventKind, EventSink, WatchEvent};
pub use frame::Frame;
pub use ingest::{open_source, FrameSource, SourceStats, SyntheticConfig, SyntheticSource};
pub use matcher::{build_matcher, Detection, FaceMatcher, Identity, ScriptStep, ScriptedMatcher};
pub use notify::{Notifier, NotifierStats};
pub use overlay::annotate;
pub use pipeline::{
    input_channel, spawn_capture, ConfirmScheduler, ManualScheduler, Pipeline, PipelineInput,
    PipelineParts, PipelineSettings, PipelineStats, ThreadScheduler,
};
pub use presence::PresenceDebouncer;
pub use publish::{LiveFrame, LiveFramePublisher, PreviewSettings};
pub use recording::{
    ClipNamer, ClipSpec, ClipSummary, MjpegWriterFactory, RecordingSession, RecordingState,
    SessionEvent, SessionSettings, VideoWriter, WriterFactory,
};
pub use storage::{InMemoryEventSink, SqliteEventSink};
