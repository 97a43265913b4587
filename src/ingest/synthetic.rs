//! Synthetic frame source (`stub://` URLs).
//!
//! Produces a flat background with sensor noise and, every few seconds, a
//! bright block drifting across the scene. Used for dry runs, the demo, and
//! tests that need a real `FrameSource` without a camera.

use anyhow::Result;
use rand::Rng;
use std::time::Instant;

use super::{frame_interval, SourceStats};
use crate::frame::{Frame, BYTES_PER_PIXEL};

#[derive(Clone, Debug)]
pub struct SyntheticConfig {
    pub url: String,
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
    /// Report exhaustion after this many frames.
    pub max_frames: Option<u64>,
    /// Sleep to hold `target_fps`. Disabled in tests that want frames fast.
    pub paced: bool,
    /// Amplitude of per-pixel noise, 0 for identical frames.
    pub noise: u8,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            url: "stub://front_door".to_string(),
            target_fps: 30,
            width: 1280,
            height: 720,
            max_frames: None,
            paced: true,
            noise: 6,
        }
    }
}

pub struct SyntheticSource {
    config: SyntheticConfig,
    frame_count: u64,
    connected_at: Option<Instant>,
    last_frame_at: Option<Instant>,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            frame_count: 0,
            connected_at: None,
            last_frame_at: None,
        }
    }

    fn render(&self) -> Vec<u8> {
        let width = self.config.width as usize;
        let height = self.config.height as usize;
        let mut pixels = vec![0u8; width * height * BYTES_PER_PIXEL];

        // Visitor block: enters every 5 s of stream time, crosses in 2 s.
        let fps = u64::from(self.config.target_fps.max(1));
        let phase = self.frame_count % (fps * 5);
        let block = if phase < fps * 2 {
            let block_w = (width / 6).max(1);
            let x0 = (phase as usize * width) / (fps as usize * 2);
            Some((x0, (x0 + block_w).min(width)))
        } else {
            None
        };
        let (y0, y1) = (height / 3, (2 * height / 3).max(height / 3 + 1).min(height));

        let mut rng = rand::thread_rng();
        for y in 0..height {
            for x in 0..width {
                let base: u8 = match block {
                    Some((x0, x1)) if x >= x0 && x < x1 && y >= y0 && y < y1 => 210,
                    _ => 48,
                };
                let jitter = if self.config.noise == 0 {
                    0
                } else {
                    rng.gen_range(0..=self.config.noise)
                };
                let value = base.saturating_add(jitter);
                let offset = (y * width + x) * BYTES_PER_PIXEL;
                pixels[offset] = value;
                pixels[offset + 1] = value;
                pixels[offset + 2] = value.saturating_sub(8);
            }
        }
        pixels
    }
}

impl super::FrameSource for SyntheticSource {
    fn connect(&mut self) -> Result<()> {
        log::info!("synthetic source: connected to {}", self.config.url);
        self.connected_at = Some(Instant::now());
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if let Some(max) = self.config.max_frames {
            if self.frame_count >= max {
                return Ok(None);
            }
        }
        if self.config.paced {
            if let Some(last) = self.last_frame_at {
                let due = last + frame_interval(self.config.target_fps);
                let now = Instant::now();
                if due > now {
                    std::thread::sleep(due - now);
                }
            }
        }
        let pixels = self.render();
        self.frame_count += 1;
        let captured_at = Instant::now();
        self.last_frame_at = Some(captured_at);
        Ok(Some(Frame::new(
            pixels,
            self.config.width,
            self.config.height,
            captured_at,
            self.frame_count,
        )?))
    }

    fn is_healthy(&self) -> bool {
        self.connected_at.is_some()
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.config.url.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::FrameSource;
    use std::time::Duration;

    fn small(max_frames: Option<u64>) -> SyntheticSource {
        SyntheticSource::new(SyntheticConfig {
            width: 24,
            height: 12,
            target_fps: 10,
            max_frames,
            paced: false,
            ..SyntheticConfig::default()
        })
    }

    #[test]
    fn frames_are_numbered_from_one() {
        let mut source = small(None);
        source.connect().unwrap();
        let first = source.next_frame().unwrap().unwrap();
        let second = source.next_frame().unwrap().unwrap();
        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);
        assert_eq!(first.dimensions(), (24, 12));
        assert!(second.captured_at >= first.captured_at);
        assert_eq!(source.stats().frames_captured, 2);
    }

    #[test]
    fn reports_exhaustion_after_max_frames() {
        let mut source = small(Some(3));
        source.connect().unwrap();
        for _ in 0..3 {
            assert!(source.next_frame().unwrap().is_some());
        }
        assert!(source.next_frame().unwrap().is_none());
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn paced_source_holds_target_rate() {
        let mut source = SyntheticSource::new(SyntheticConfig {
            width: 8,
            height: 8,
            target_fps: 50,
            paced: true,
            ..SyntheticConfig::default()
        });
        source.connect().unwrap();
        let first = source.next_frame().unwrap().unwrap();
        let mut last = first.captured_at;
        for _ in 0..4 {
            last = source.next_frame().unwrap().unwrap().captured_at;
        }
        assert!(last.duration_since(first.captured_at) >= Duration::from_millis(75));
    }
}
