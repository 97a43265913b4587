use serde::{Deserialize, Serialize};
use std::fmt;

/// Label prefix the face service uses for enrolled occupants.
pub const KNOWN_PREFIX: &str = "known:";
/// Label (and cooldown key) of the synthetic unknown identity.
pub const UNKNOWN_LABEL: &str = "unknown";

/// Who a detected face belongs to.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum Identity {
    Known(String),
    Unknown,
}

impl Identity {
    /// Parse a matcher label: `known:<name>`, `unknown`, or a bare name.
    /// Empty names and any casing of "unknown" map to `Unknown`.
    pub fn parse(label: &str) -> Self {
        let label = label.trim();
        let name = label.strip_prefix(KNOWN_PREFIX).unwrap_or(label).trim();
        if name.is_empty() || name.eq_ignore_ascii_case(UNKNOWN_LABEL) {
            Identity::Unknown
        } else {
            Identity::Known(name.to_string())
        }
    }

    pub fn known(name: impl Into<String>) -> Self {
        Identity::parse(&name.into())
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Identity::Unknown)
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Identity::Known(name) => Some(name),
            Identity::Unknown => None,
        }
    }

    /// Key used by the cooldown table and persisted with events.
    pub fn as_key(&self) -> &str {
        match self {
            Identity::Known(name) => name,
            Identity::Unknown => UNKNOWN_LABEL,
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_key())
    }
}

impl From<String> for Identity {
    fn from(label: String) -> Self {
        Identity::parse(&label)
    }
}

impl From<Identity> for String {
    fn from(identity: Identity) -> Self {
        identity.as_key().to_string()
    }
}

/// Face location in frame pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
    pub left: u32,
}

impl BoundingBox {
    pub fn width(&self) -> u32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> u32 {
        self.bottom.saturating_sub(self.top)
    }
}

/// One face found by the matcher on one frame. Never persisted directly.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub identity: Identity,
    /// Match confidence as a percentage (0..=100). Unknown faces usually
    /// carry none.
    pub confidence: Option<f32>,
    pub bounding_box: BoundingBox,
}

impl Detection {
    pub fn new(identity: Identity, confidence: Option<f32>, bounding_box: BoundingBox) -> Self {
        Self {
            identity,
            confidence: confidence.map(clamp_confidence),
            bounding_box,
        }
    }

    pub fn unknown() -> Self {
        Self::new(Identity::Unknown, None, BoundingBox::default())
    }

    pub fn known(name: &str, confidence: f32) -> Self {
        Self::new(Identity::known(name), Some(confidence), BoundingBox::default())
    }
}

/// True when any detection is an unknown face.
pub fn unknown_present(detections: &[Detection]) -> bool {
    detections.iter().any(|d| d.identity.is_unknown())
}

fn clamp_confidence(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}
