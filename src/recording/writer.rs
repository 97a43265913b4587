//! Clip writers.
//!
//! The session only knows the `VideoWriter` / `WriterFactory` pair. The
//! bundled implementation writes Motion-JPEG: one baseline JPEG per frame,
//! concatenated. Any MJPEG-aware player (or `ffmpeg -f mjpeg`) reads it, and
//! a file cut short by a crash stays readable up to the last full frame.

use anyhow::{anyhow, Context, Result};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::frame::Frame;

pub const MJPEG_EXTENSION: &str = "mjpeg";
pub const DEFAULT_CLIP_JPEG_QUALITY: u8 = 80;

/// Geometry and rate a clip is opened with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClipSpec {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

/// One open output clip.
pub trait VideoWriter: Send {
    /// Append a frame. Errors end the clip.
    fn write_frame(&mut self, frame: &Frame) -> Result<()>;

    /// Flush and close, returning the final size in bytes.
    fn finish(self: Box<Self>) -> Result<u64>;
}

/// Opens clip writers. Acquisition failures are reported, never retried here.
pub trait WriterFactory: Send {
    fn open(&mut self, path: &Path, spec: ClipSpec) -> Result<Box<dyn VideoWriter>>;

    /// File extension (without dot) for clips produced by this factory.
    fn extension(&self) -> &'static str {
        MJPEG_EXTENSION
    }
}

#[derive(Clone, Debug)]
pub struct MjpegWriterFactory {
    pub jpeg_quality: u8,
}

impl Default for MjpegWriterFactory {
    fn default() -> Self {
        Self {
            jpeg_quality: DEFAULT_CLIP_JPEG_QUALITY,
        }
    }
}

impl WriterFactory for MjpegWriterFactory {
    fn open(&mut self, path: &Path, spec: ClipSpec) -> Result<Box<dyn VideoWriter>> {
        Ok(Box::new(MjpegFileWriter::create(
            path,
            spec,
            self.jpeg_quality,
        )?))
    }
}

/// Motion-JPEG file writer, paced to the clip's target frame rate.
///
/// Time is cut into `1/fps` slots starting at the first written frame and
/// at most one frame is kept per slot, so a faster source is thinned to
/// `fps` on average and the file plays back at real time.
pub struct MjpegFileWriter {
    path: PathBuf,
    out: BufWriter<File>,
    spec: ClipSpec,
    quality: u8,
    min_interval: Duration,
    first_written_at: Option<Instant>,
    /// Offset from `first_written_at` where the next free slot starts.
    next_slot: Duration,
    bytes_written: u64,
    frames_written: u64,
}

impl MjpegFileWriter {
    /// Create the file. Refuses to overwrite an existing one.
    pub fn create(path: &Path, spec: ClipSpec, quality: u8) -> Result<Self> {
        if spec.width == 0 || spec.height == 0 {
            return Err(anyhow!("clip dimensions must be non-zero"));
        }
        if spec.fps == 0 {
            return Err(anyhow!("clip frame rate must be >= 1"));
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create clip directory {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .with_context(|| format!("create clip {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            out: BufWriter::new(file),
            spec,
            quality,
            min_interval: (Duration::from_secs(1) / spec.fps).max(Duration::from_nanos(1)),
            first_written_at: None,
            next_slot: Duration::ZERO,
            bytes_written: 0,
            frames_written: 0,
        })
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }
}

impl VideoWriter for MjpegFileWriter {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        if frame.dimensions() != (self.spec.width, self.spec.height) {
            return Err(anyhow!(
                "frame is {}x{} but clip {} was opened at {}x{}",
                frame.width,
                frame.height,
                self.path.display(),
                self.spec.width,
                self.spec.height
            ));
        }
        let first = *self.first_written_at.get_or_insert(frame.captured_at);
        let offset = frame.captured_at.saturating_duration_since(first);
        if self.frames_written > 0 && offset < self.next_slot {
            return Ok(());
        }
        let jpeg = frame.encode_jpeg(self.quality)?;
        self.out
            .write_all(&jpeg)
            .with_context(|| format!("write clip {}", self.path.display()))?;
        self.bytes_written += jpeg.len() as u64;
        self.frames_written += 1;
        let slot = u32::try_from(offset.as_nanos() / self.min_interval.as_nanos())
            .unwrap_or(u32::MAX - 1);
        self.next_slot = self.min_interval.saturating_mul(slot + 1);
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<u64> {
        let path = self.path;
        let file = self
            .out
            .into_inner()
            .map_err(|e| anyhow!("flush clip {}: {}", path.display(), e.error()))?;
        file.sync_all()
            .with_context(|| format!("sync clip {}", path.display()))?;
        Ok(file.metadata()?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> ClipSpec {
        ClipSpec {
            width: 8,
            height: 8,
            fps: 10,
        }
    }

    #[test]
    fn writes_concatenated_jpegs_and_reports_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mjpeg");
        let mut writer = Box::new(MjpegFileWriter::create(&path, spec(), 80).unwrap());
        let t0 = Instant::now();
        for i in 0..3u64 {
            let frame = Frame::solid(8, 8, [10, 20, 30], t0 + Duration::from_millis(100 * i), i + 1);
            writer.write_frame(&frame).unwrap();
        }
        assert_eq!(writer.frames_written(), 3);
        let size = writer.finish().unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(size, bytes.len() as u64);
        let frame_starts = bytes.windows(2).filter(|w| w == &[0xFF, 0xD8]).count();
        assert!(frame_starts >= 3);
    }

    #[test]
    fn drops_frames_faster_than_target_rate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("paced.mjpeg");
        let mut writer = MjpegFileWriter::create(&path, spec(), 80).unwrap();
        let t0 = Instant::now();
        for i in 0..10u64 {
            let frame = Frame::solid(8, 8, [0, 0, 0], t0 + Duration::from_millis(20 * i), i + 1);
            writer.write_frame(&frame).unwrap();
        }
        // 10 fps over 180ms of frames: t=0 and t=100ms.
        assert_eq!(writer.frames_written(), 2);
    }

    #[test]
    fn paced_output_keeps_the_target_rate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("steady.mjpeg");
        let spec = ClipSpec {
            width: 8,
            height: 8,
            fps: 15,
        };
        let mut writer = MjpegFileWriter::create(&path, spec, 80).unwrap();
        let t0 = Instant::now();
        // One second of a 20 fps source.
        for i in 0..20u64 {
            let frame = Frame::solid(8, 8, [0, 0, 0], t0 + Duration::from_millis(50 * i), i + 1);
            writer.write_frame(&frame).unwrap();
        }
        assert_eq!(writer.frames_written(), 15);
    }

    #[test]
    fn slow_source_is_written_without_catch_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slow.mjpeg");
        let mut writer = MjpegFileWriter::create(&path, spec(), 80).unwrap();
        let t0 = Instant::now();
        // A 2 s stall, then frames 20 ms apart: only one per 100 ms slot.
        for (i, ms) in [0u64, 2000, 2020, 2040, 2060, 2080, 2100].iter().enumerate() {
            let frame = Frame::solid(8, 8, [0, 0, 0], t0 + Duration::from_millis(*ms), i as u64 + 1);
            writer.write_frame(&frame).unwrap();
        }
        assert_eq!(writer.frames_written(), 3);
    }

    #[test]
    fn dimension_change_is_a_write_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resized.mjpeg");
        let mut writer = MjpegFileWriter::create(&path, spec(), 80).unwrap();
        let frame = Frame::solid(16, 8, [0, 0, 0], Instant::now(), 1);
        assert!(writer.write_frame(&frame).is_err());
    }

    #[test]
    fn refuses_to_overwrite_existing_clip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("taken.mjpeg");
        std::fs::write(&path, b"existing").unwrap();
        assert!(MjpegFileWriter::create(&path, spec(), 80).is_err());
    }
}
