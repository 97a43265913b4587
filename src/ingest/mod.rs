//! Frame sources.
//!
//! - Synthetic `stub://` source (dry runs, demo, tests)
//! - HTTP MJPEG / JPEG-snapshot cameras (feature: ingest-http)
//!
//! A configuration lists sources in priority order; `open_source` connects
//! to the first one that answers.

#[cfg(feature = "ingest-http")]
pub mod http;
pub mod synthetic;

use anyhow::{anyhow, Result};
use std::time::Duration;

use crate::config::SourceSettings;
use crate::frame::Frame;

#[cfg(feature = "ingest-http")]
pub use http::{HttpSource, HttpSourceConfig};
pub use synthetic::{SyntheticConfig, SyntheticSource};

/// A camera-like producer of frames.
pub trait FrameSource: Send {
    fn connect(&mut self) -> Result<()>;

    /// Next frame, or `Ok(None)` when the source is (for now) exhausted.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    fn is_healthy(&self) -> bool;

    fn stats(&self) -> SourceStats;
}

#[derive(Clone, Debug)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub source: String,
}

/// Build the source for one URL without connecting it.
pub fn build_source(url: &str, settings: &SourceSettings) -> Result<Box<dyn FrameSource>> {
    if url.starts_with("stub://") {
        return Ok(Box::new(SyntheticSource::new(SyntheticConfig {
            url: url.to_string(),
            target_fps: settings.target_fps,
            width: settings.width,
            height: settings.height,
            ..SyntheticConfig::default()
        })));
    }
    if url.starts_with("http://") || url.starts_with("https://") {
        #[cfg(feature = "ingest-http")]
        {
            return Ok(Box::new(HttpSource::new(HttpSourceConfig::new(
                url,
                settings.target_fps,
            ))?));
        }
        #[cfg(not(feature = "ingest-http"))]
        {
            return Err(anyhow!("http camera {} requires the ingest-http feature", url));
        }
    }
    Err(anyhow!("unsupported source url '{}'", url))
}

/// Connect to the first configured source that works.
pub fn open_source(settings: &SourceSettings) -> Result<Box<dyn FrameSource>> {
    let mut failures = Vec::new();
    for url in &settings.urls {
        let attempt = build_source(url, settings).and_then(|mut source| {
            source.connect()?;
            Ok(source)
        });
        match attempt {
            Ok(source) => return Ok(source),
            Err(e) => {
                log::warn!("source {} unavailable: {:#}", url, e);
                failures.push(format!("{}: {:#}", url, e));
            }
        }
    }
    Err(anyhow!("no frame source available ({})", failures.join("; ")))
}

pub(crate) fn frame_interval(target_fps: u32) -> Duration {
    if target_fps == 0 {
        Duration::from_millis(0)
    } else {
        Duration::from_millis(u64::from((1000 / target_fps).max(1)))
    }
}
