use chrono::Local;
use std::path::{Path, PathBuf};

pub const CLIP_PREFIX: &str = "unknown";

/// Allocates timestamped, collision-free clip paths such as
/// `unknown_20261018_214501_372.mjpeg`.
///
/// Two clips allocated within the same millisecond (a max-duration cutoff
/// followed by an immediate restart) get `_1`, `_2`, ... suffixes. Names
/// that already exist on disk are skipped as well.
#[derive(Clone, Debug)]
pub struct ClipNamer {
    dir: PathBuf,
    prefix: String,
    last_stamp: Option<String>,
    last_suffix: u32,
}

impl ClipNamer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_prefix(dir, CLIP_PREFIX)
    }

    pub fn with_prefix(dir: impl Into<PathBuf>, prefix: &str) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.to_string(),
            last_stamp: None,
            last_suffix: 0,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn next_path(&mut self, extension: &str) -> PathBuf {
        let stamp = Local::now().format("%Y%m%d_%H%M%S_%3f").to_string();
        let mut suffix = if self.last_stamp.as_deref() == Some(stamp.as_str()) {
            self.last_suffix + 1
        } else {
            0
        };
        loop {
            let candidate = self.dir.join(self.file_name(&stamp, suffix, extension));
            if !candidate.exists() {
                self.last_stamp = Some(stamp);
                self.last_suffix = suffix;
                return candidate;
            }
            suffix += 1;
        }
    }

    fn file_name(&self, stamp: &str, suffix: u32, extension: &str) -> String {
        if suffix == 0 {
            format!("{}_{}.{}", self.prefix, stamp, extension)
        } else {
            format!("{}_{}_{}.{}", self.prefix, stamp, suffix, extension)
        }
    }
}
