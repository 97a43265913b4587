//! Latest-frame publication for live viewers.
//!
//! The frame loop encodes a preview once per frame and swaps it in; readers
//! on other threads get an `Arc` to a complete JPEG and never observe a
//! partially written frame. Optionally the preview is also mirrored to a
//! file via write-to-temp then rename.

use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::frame::Frame;

pub const DEFAULT_PREVIEW_WIDTH: u32 = 640;
pub const DEFAULT_PREVIEW_HEIGHT: u32 = 480;
pub const DEFAULT_PREVIEW_QUALITY: u8 = 75;

#[derive(Clone, Debug)]
pub struct LiveFrame {
    pub jpeg: Arc<[u8]>,
    pub sequence: u64,
    pub captured_at: Instant,
}

#[derive(Clone, Debug)]
pub struct PreviewSettings {
    pub max_width: u32,
    pub max_height: u32,
    pub quality: u8,
    /// Mirror each preview to this file.
    pub mirror_path: Option<PathBuf>,
}

impl Default for PreviewSettings {
    fn default() -> Self {
        Self {
            max_width: DEFAULT_PREVIEW_WIDTH,
            max_height: DEFAULT_PREVIEW_HEIGHT,
            quality: DEFAULT_PREVIEW_QUALITY,
            mirror_path: None,
        }
    }
}

/// Cloneable handle; all clones see the same latest frame.
#[derive(Clone)]
pub struct LiveFramePublisher {
    settings: Arc<PreviewSettings>,
    latest: Arc<Mutex<Option<LiveFrame>>>,
}

impl LiveFramePublisher {
    pub fn new(settings: PreviewSettings) -> Self {
        Self {
            settings: Arc::new(settings),
            latest: Arc::new(Mutex::new(None)),
        }
    }

    /// Encode and publish `frame`, replacing the previous one.
    ///
    /// The in-memory slot is updated before the mirror file is written, so a
    /// mirror error leaves in-process viewers current.
    pub fn publish(&self, frame: &Frame) -> Result<()> {
        let jpeg: Arc<[u8]> = Arc::from(frame.encode_preview_jpeg(
            self.settings.max_width,
            self.settings.max_height,
            self.settings.quality,
        )?);
        let live = LiveFrame {
            jpeg: jpeg.clone(),
            sequence: frame.sequence,
            captured_at: frame.captured_at,
        };
        *self
            .latest
            .lock()
            .map_err(|_| anyhow!("live frame slot poisoned"))? = Some(live);
        if let Some(path) = &self.settings.mirror_path {
            write_atomically(path, &jpeg)?;
        }
        Ok(())
    }

    /// The most recently published frame, if any.
    pub fn latest(&self) -> Option<LiveFrame> {
        self.latest.lock().ok().and_then(|slot| slot.clone())
    }
}

fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create live frame directory {}", parent.display()))?;
        }
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, bytes).with_context(|| format!("write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latest_is_none_until_first_publish() {
        let publisher = LiveFramePublisher::new(PreviewSettings::default());
        assert!(publisher.latest().is_none());
        publisher
            .publish(&Frame::solid(32, 24, [1, 2, 3], Instant::now(), 7))
            .unwrap();
        let live = publisher.latest().unwrap();
        assert_eq!(live.sequence, 7);
        assert_eq!(&live.jpeg[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn newer_frame_replaces_older() {
        let publisher = LiveFramePublisher::new(PreviewSettings::default());
        let reader = publisher.clone();
        let now = Instant::now();
        publisher.publish(&Frame::solid(8, 8, [0, 0, 0], now, 1)).unwrap();
        publisher.publish(&Frame::solid(8, 8, [9, 9, 9], now, 2)).unwrap();
        assert_eq!(reader.latest().unwrap().sequence, 2);
    }

    #[test]
    fn mirror_file_holds_a_complete_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("live").join("latest_frame.jpg");
        let publisher = LiveFramePublisher::new(PreviewSettings {
            mirror_path: Some(path.clone()),
            ..PreviewSettings::default()
        });
        publisher
            .publish(&Frame::solid(64, 48, [200, 10, 10], Instant::now(), 1))
            .unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        assert_eq!(&bytes[bytes.len() - 2..], &[0xFF, 0xD9]);
        assert!(!dir.path().join("live").join("latest_frame.jpg.tmp").exists());
    }
}
