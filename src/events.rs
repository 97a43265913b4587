//! Events handed to the event sink.
//!
//! Only these derived events leave the pipeline. Per-frame detections are
//! never persisted.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::matcher::Identity;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Sighting,
    RecordingFinished,
    RecordingFailed,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Sighting => "sighting",
            EventKind::RecordingFinished => "recording_finished",
            EventKind::RecordingFailed => "recording_failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "sighting" => Some(EventKind::Sighting),
            "recording_finished" => Some(EventKind::RecordingFinished),
            "recording_failed" => Some(EventKind::RecordingFailed),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WatchEvent {
    pub kind: EventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<Identity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size_bytes: Option<u64>,
    /// Failure reason for `recording_failed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub camera_id: String,
    pub timestamp: DateTime<Utc>,
}

impl WatchEvent {
    pub fn sighting(camera_id: &str, identity: Identity, confidence: Option<f32>) -> Self {
        Self {
            identity: Some(identity),
            confidence,
            ..Self::empty(EventKind::Sighting, camera_id)
        }
    }

    pub fn recording_finished(
        camera_id: &str,
        video_path: PathBuf,
        duration: Duration,
        file_size_bytes: u64,
    ) -> Self {
        Self {
            identity: Some(Identity::Unknown),
            video_path: Some(video_path),
            duration_seconds: Some(duration.as_secs_f64()),
            file_size_bytes: Some(file_size_bytes),
            ..Self::empty(EventKind::RecordingFinished, camera_id)
        }
    }

    pub fn recording_failed(camera_id: &str, video_path: Option<PathBuf>, detail: String) -> Self {
        Self {
            identity: Some(Identity::Unknown),
            video_path,
            detail: Some(detail),
            ..Self::empty(EventKind::RecordingFailed, camera_id)
        }
    }

    fn empty(kind: EventKind, camera_id: &str) -> Self {
        Self {
            kind,
            identity: None,
            confidence: None,
            video_path: None,
            duration_seconds: None,
            file_size_bytes: None,
            detail: None,
            camera_id: camera_id.to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// Receives finalized events for persistence and notification.
///
/// Runs on the notifier's worker thread, so a slow implementation delays
/// other events but never frame ingestion.
pub trait EventSink: Send {
    fn record(&mut self, event: &WatchEvent) -> Result<()>;
}

/// Spoken text for a sighting.
pub fn announcement_for(identity: &Identity) -> String {
    match identity {
        Identity::Known(name) => format!("Welcome home, {}!", name),
        Identity::Unknown => "Unknown person detected. Recording in progress.".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sighting_serializes_snake_case_kind_and_skips_empty_fields() {
        let event = WatchEvent::sighting("porch", Identity::known("alice"), Some(93.0));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "sighting");
        assert_eq!(json["identity"], "alice");
        assert!(json.get("video_path").is_none());
    }

    #[test]
    fn finished_event_carries_clip_metrics() {
        let event = WatchEvent::recording_finished(
            "porch",
            PathBuf::from("clips/unknown_1.mjpeg"),
            Duration::from_millis(6500),
            4096,
        );
        assert_eq!(event.kind, EventKind::RecordingFinished);
        assert_eq!(event.duration_seconds, Some(6.5));
        assert_eq!(event.file_size_bytes, Some(4096));
    }

    #[test]
    fn kind_round_trips_through_its_label() {
        for kind in [
            EventKind::Sighting,
            EventKind::RecordingFinished,
            EventKind::RecordingFailed,
        ] {
            assert_eq!(EventKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(EventKind::parse("manual"), None);
    }

    #[test]
    fn announcements_greet_known_and_warn_unknown() {
        assert_eq!(announcement_for(&Identity::known("sam")), "Welcome home, sam!");
        assert!(announcement_for(&Identity::Unknown).starts_with("Unknown person detected"));
    }
}
