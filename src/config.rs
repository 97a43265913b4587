use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::publish::PreviewSettings;
use crate::recording::{SessionSettings, DEFAULT_CLIP_JPEG_QUALITY};

const DEFAULT_SOURCE_URL: &str = "stub://front_door";
const DEFAULT_SOURCE_FPS: u32 = 30;
const DEFAULT_SOURCE_WIDTH: u32 = 1280;
const DEFAULT_SOURCE_HEIGHT: u32 = 720;
const DEFAULT_RETRY_DELAY_MS: u64 = 1000;
const DEFAULT_STRIDE: u64 = 2;
const DEFAULT_MATCHER: &str = "scripted";
const DEFAULT_MATCHER_TIMEOUT_MS: u64 = 5000;
const DEFAULT_COOLDOWN_SECS: u64 = 10;
const DEFAULT_VIDEOS_DIR: &str = "unknown/videos";
const DEFAULT_CONFIRM_DELAY_SECS: f64 = 2.0;
const DEFAULT_MAX_DURATION_SECS: f64 = 30.0;
const DEFAULT_RECORDING_FPS: u32 = 15;
const DEFAULT_LIVE_FRAME_PATH: &str = "live_stream/latest_frame.jpg";
const DEFAULT_LIVE_WIDTH: u32 = 640;
const DEFAULT_LIVE_HEIGHT: u32 = 480;
const DEFAULT_LIVE_QUALITY: u8 = 75;
const DEFAULT_DB_PATH: &str = "security_system.db";
const DEFAULT_CAMERA_ID: &str = "phone_camera";
/// Upper bound for the confirmation delay and clip length.
pub const MAX_RECORDING_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct WatchConfigFile {
    source: Option<SourceConfigFile>,
    recognition: Option<RecognitionConfigFile>,
    cooldown: Option<CooldownConfigFile>,
    recording: Option<RecordingConfigFile>,
    live: Option<LiveConfigFile>,
    events: Option<EventsConfigFile>,
    announce: Option<AnnounceConfigFile>,
    overlay: Option<OverlayConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    urls: Option<Vec<String>>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
    retry_delay_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct RecognitionConfigFile {
    stride: Option<u64>,
    window: Option<usize>,
    majority: Option<usize>,
    matcher: Option<String>,
    matcher_url: Option<String>,
    matcher_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct CooldownConfigFile {
    seconds: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct RecordingConfigFile {
    dir: Option<PathBuf>,
    fps: Option<u32>,
    confirm_delay_secs: Option<f64>,
    max_duration_secs: Option<f64>,
    jpeg_quality: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
struct LiveConfigFile {
    frame_path: Option<PathBuf>,
    width: Option<u32>,
    height: Option<u32>,
    jpeg_quality: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
struct EventsConfigFile {
    db_path: Option<String>,
    camera_id: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct AnnounceConfigFile {
    enabled: Option<bool>,
    command: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
struct OverlayConfigFile {
    enabled: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct WatchConfig {
    pub source: SourceSettings,
    pub recognition: RecognitionSettings,
    pub cooldown: Duration,
    pub recording: RecordingSettings,
    pub live: LiveSettings,
    pub events: EventSettings,
    pub announce: AnnounceSettings,
    pub overlay: OverlaySettings,
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    /// Tried in order until one connects.
    pub urls: Vec<String>,
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
    pub retry_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct RecognitionSettings {
    pub stride: u64,
    pub window: usize,
    pub majority: usize,
    pub matcher: MatcherSettings,
}

#[derive(Debug, Clone)]
pub struct MatcherSettings {
    pub backend: String,
    pub url: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct RecordingSettings {
    pub dir: PathBuf,
    pub fps: u32,
    pub confirm_delay: Duration,
    pub max_duration: Duration,
    pub jpeg_quality: u8,
}

impl RecordingSettings {
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            fps: self.fps,
            confirm_delay: self.confirm_delay,
            max_duration: self.max_duration,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LiveSettings {
    pub frame_path: Option<PathBuf>,
    pub width: u32,
    pub height: u32,
    pub jpeg_quality: u8,
}

impl LiveSettings {
    pub fn preview_settings(&self) -> PreviewSettings {
        PreviewSettings {
            max_width: self.width,
            max_height: self.height,
            quality: self.jpeg_quality,
            mirror_path: self.frame_path.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventSettings {
    pub db_path: String,
    pub camera_id: String,
}

#[derive(Debug, Clone)]
pub struct AnnounceSettings {
    pub enabled: bool,
    /// Program and leading arguments; the text is appended. `None` logs instead.
    pub command: Option<Vec<String>>,
}

/// Face boxes on clips and preview, REC marker on the preview.
#[derive(Debug, Clone)]
pub struct OverlaySettings {
    pub enabled: bool,
}

impl WatchConfig {
    /// Defaults, then the file named by `WATCH_CONFIG`, then `WATCH_*`
    /// environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("WATCH_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Built-in defaults, no file and no environment.
    pub fn defaults() -> Result<Self> {
        let mut cfg = Self::from_file(WatchConfigFile::default())?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: WatchConfigFile) -> Result<Self> {
        let source_file = file.source.unwrap_or_default();
        let source = SourceSettings {
            urls: source_file
                .urls
                .unwrap_or_else(|| vec![DEFAULT_SOURCE_URL.to_string()]),
            target_fps: source_file.target_fps.unwrap_or(DEFAULT_SOURCE_FPS),
            width: source_file.width.unwrap_or(DEFAULT_SOURCE_WIDTH),
            height: source_file.height.unwrap_or(DEFAULT_SOURCE_HEIGHT),
            retry_delay: Duration::from_millis(
                source_file.retry_delay_ms.unwrap_or(DEFAULT_RETRY_DELAY_MS),
            ),
        };

        let recognition_file = file.recognition.unwrap_or_default();
        let recognition = RecognitionSettings {
            stride: recognition_file.stride.unwrap_or(DEFAULT_STRIDE),
            window: recognition_file
                .window
                .unwrap_or(crate::presence::DEFAULT_WINDOW),
            majority: recognition_file
                .majority
                .unwrap_or(crate::presence::DEFAULT_MAJORITY),
            matcher: MatcherSettings {
                backend: recognition_file
                    .matcher
                    .unwrap_or_else(|| DEFAULT_MATCHER.to_string()),
                url: recognition_file.matcher_url,
                timeout: Duration::from_millis(
                    recognition_file
                        .matcher_timeout_ms
                        .unwrap_or(DEFAULT_MATCHER_TIMEOUT_MS),
                ),
            },
        };

        let cooldown = Duration::from_secs(
            file.cooldown
                .and_then(|cooldown| cooldown.seconds)
                .unwrap_or(DEFAULT_COOLDOWN_SECS),
        );

        let recording_file = file.recording.unwrap_or_default();
        let recording = RecordingSettings {
            dir: recording_file
                .dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_VIDEOS_DIR)),
            fps: recording_file.fps.unwrap_or(DEFAULT_RECORDING_FPS),
            confirm_delay: secs_f64(
                "recording.confirm_delay_secs",
                recording_file
                    .confirm_delay_secs
                    .unwrap_or(DEFAULT_CONFIRM_DELAY_SECS),
            )?,
            max_duration: secs_f64(
                "recording.max_duration_secs",
                recording_file
                    .max_duration_secs
                    .unwrap_or(DEFAULT_MAX_DURATION_SECS),
            )?,
            jpeg_quality: recording_file
                .jpeg_quality
                .unwrap_or(DEFAULT_CLIP_JPEG_QUALITY),
        };

        let live_file = file.live.unwrap_or_default();
        let live = LiveSettings {
            frame_path: Some(
                live_file
                    .frame_path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_LIVE_FRAME_PATH)),
            ),
            width: live_file.width.unwrap_or(DEFAULT_LIVE_WIDTH),
            height: live_file.height.unwrap_or(DEFAULT_LIVE_HEIGHT),
            jpeg_quality: live_file.jpeg_quality.unwrap_or(DEFAULT_LIVE_QUALITY),
        };

        let events_file = file.events.unwrap_or_default();
        let events = EventSettings {
            db_path: events_file
                .db_path
                .unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            camera_id: events_file
                .camera_id
                .unwrap_or_else(|| DEFAULT_CAMERA_ID.to_string()),
        };

        let announce_file = file.announce.unwrap_or_default();
        let announce = AnnounceSettings {
            enabled: announce_file.enabled.unwrap_or(true),
            command: announce_file.command.filter(|command| !command.is_empty()),
        };

        let overlay = OverlaySettings {
            enabled: file
                .overlay
                .and_then(|overlay| overlay.enabled)
                .unwrap_or(true),
        };

        Ok(Self {
            source,
            recognition,
            cooldown,
            recording,
            live,
            events,
            announce,
            overlay,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(urls) = std::env::var("WATCH_SOURCE_URLS") {
            let parsed = split_csv(&urls);
            if !parsed.is_empty() {
                self.source.urls = parsed;
            }
        }
        if let Ok(stride) = std::env::var("WATCH_STRIDE") {
            self.recognition.stride = stride
                .trim()
                .parse()
                .map_err(|_| anyhow!("WATCH_STRIDE must be a positive integer"))?;
        }
        if let Ok(matcher) = std::env::var("WATCH_MATCHER") {
            if !matcher.trim().is_empty() {
                self.recognition.matcher.backend = matcher.trim().to_string();
            }
        }
        if let Ok(url) = std::env::var("WATCH_MATCHER_URL") {
            if !url.trim().is_empty() {
                self.recognition.matcher.url = Some(url.trim().to_string());
            }
        }
        if let Ok(cooldown) = std::env::var("WATCH_COOLDOWN_SECS") {
            let seconds: u64 = cooldown.trim().parse().map_err(|_| {
                anyhow!("WATCH_COOLDOWN_SECS must be an integer number of seconds")
            })?;
            self.cooldown = Duration::from_secs(seconds);
        }
        if let Ok(dir) = std::env::var("WATCH_VIDEOS_DIR") {
            if !dir.trim().is_empty() {
                self.recording.dir = PathBuf::from(dir);
            }
        }
        if let Ok(path) = std::env::var("WATCH_LIVE_FRAME_PATH") {
            // "off" disables the mirror file; the in-memory slot stays.
            match path.trim() {
                "" => {}
                "off" => self.live.frame_path = None,
                path => self.live.frame_path = Some(PathBuf::from(path)),
            }
        }
        if let Ok(db_path) = std::env::var("WATCH_DB_PATH") {
            if !db_path.trim().is_empty() {
                self.events.db_path = db_path;
            }
        }
        if let Ok(camera_id) = std::env::var("WATCH_CAMERA_ID") {
            if !camera_id.trim().is_empty() {
                self.events.camera_id = camera_id.trim().to_string();
            }
        }
        if let Ok(command) = std::env::var("WATCH_ANNOUNCE_COMMAND") {
            let parts: Vec<String> = command.split_whitespace().map(str::to_string).collect();
            if !parts.is_empty() {
                self.announce.command = Some(parts);
            }
        }
        if let Ok(overlay) = std::env::var("WATCH_OVERLAY") {
            self.overlay.enabled = match overlay.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "on" | "yes" => true,
                "0" | "false" | "off" | "no" => false,
                other => return Err(anyhow!("WATCH_OVERLAY must be on or off, got '{}'", other)),
            };
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        self.source.urls.retain(|url| !url.trim().is_empty());
        if self.source.urls.is_empty() {
            return Err(anyhow!("source.urls must name at least one source"));
        }
        if self.source.target_fps == 0 {
            return Err(anyhow!("source.target_fps must be >= 1"));
        }
        if self.source.width == 0 || self.source.height == 0 {
            return Err(anyhow!("source width and height must be non-zero"));
        }
        if self.recognition.stride == 0 {
            return Err(anyhow!("recognition.stride must be >= 1"));
        }
        if self.recognition.window == 0 {
            return Err(anyhow!("recognition.window must be >= 1"));
        }
        if self.recognition.majority == 0 || self.recognition.majority > self.recognition.window {
            return Err(anyhow!(
                "recognition.majority must be between 1 and window ({}), got {}",
                self.recognition.window,
                self.recognition.majority
            ));
        }
        if self.recording.fps == 0 {
            return Err(anyhow!("recording.fps must be >= 1"));
        }
        if self.recording.max_duration.is_zero() {
            return Err(anyhow!("recording.max_duration_secs must be greater than zero"));
        }
        for (key, value) in [
            ("recording.confirm_delay_secs", self.recording.confirm_delay),
            ("recording.max_duration_secs", self.recording.max_duration),
        ] {
            if value > MAX_RECORDING_WINDOW {
                return Err(anyhow!(
                    "{} must be at most {} seconds",
                    key,
                    MAX_RECORDING_WINDOW.as_secs()
                ));
            }
        }
        check_quality("recording.jpeg_quality", self.recording.jpeg_quality)?;
        check_quality("live.jpeg_quality", self.live.jpeg_quality)?;
        if self.live.width == 0 || self.live.height == 0 {
            return Err(anyhow!("live width and height must be non-zero"));
        }
        if self.events.camera_id.trim().is_empty() {
            return Err(anyhow!("events.camera_id must not be empty"));
        }
        self.recognition.matcher.backend = self.recognition.matcher.backend.to_lowercase();
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<WatchConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn secs_f64(key: &str, seconds: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(seconds)
        .map_err(|_| anyhow!("{} must be a non-negative number of seconds, got {}", key, seconds))
}

fn check_quality(key: &str, quality: u8) -> Result<()> {
    if !(1..=100).contains(&quality) {
        return Err(anyhow!("{} must be between 1 and 100", key));
    }
    Ok(())
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
