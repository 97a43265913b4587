//! HTTP face-service client.
//!
//! Posts each recognition frame as a JPEG to an external face service and
//! reads back a JSON list of labelled faces:
//!
//! ```json
//! {"faces": [{"identity": "known:alice", "confidence": 91.5,
//!             "box": {"top": 40, "right": 180, "bottom": 160, "left": 60}}]}
//! ```
//!
//! The service owns enrolment, embeddings and tolerance. This client only
//! moves bytes and maps labels.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::time::Duration;

use crate::frame::Frame;
use crate::matcher::backend::FaceMatcher;
use crate::matcher::result::{BoundingBox, Detection, Identity};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
const UPLOAD_JPEG_QUALITY: u8 = 85;

#[derive(Clone, Debug)]
pub struct HttpMatcherConfig {
    /// Endpoint accepting `POST image/jpeg`.
    pub url: String,
    pub timeout: Duration,
}

impl HttpMatcherConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

#[derive(Debug, Deserialize)]
struct MatchResponse {
    #[serde(default)]
    faces: Vec<FaceDto>,
}

#[derive(Debug, Deserialize)]
struct FaceDto {
    identity: String,
    #[serde(default)]
    confidence: Option<f32>,
    #[serde(default, rename = "box")]
    bounding_box: Option<BoundingBox>,
}

pub struct HttpMatcher {
    config: HttpMatcherConfig,
    agent: ureq::Agent,
}

impl HttpMatcher {
    pub fn new(config: HttpMatcherConfig) -> Result<Self> {
        if !(config.url.starts_with("http://") || config.url.starts_with("https://")) {
            return Err(anyhow!(
                "face service url must be http(s), got '{}'",
                config.url
            ));
        }
        let agent = ureq::AgentBuilder::new().timeout(config.timeout).build();
        Ok(Self { config, agent })
    }
}

impl FaceMatcher for HttpMatcher {
    fn name(&self) -> &'static str {
        "http"
    }

    fn match_faces(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let jpeg = frame.encode_jpeg(UPLOAD_JPEG_QUALITY)?;
        let response = self
            .agent
            .post(&self.config.url)
            .set("Content-Type", "image/jpeg")
            .send_bytes(&jpeg)
            .with_context(|| format!("post frame to face service {}", self.config.url))?;
        let body = response.into_string().context("read face service response")?;
        parse_response(&body)
    }
}

fn parse_response(body: &str) -> Result<Vec<Detection>> {
    let parsed: MatchResponse =
        serde_json::from_str(body).map_err(|e| anyhow!("invalid face service response: {}", e))?;
    Ok(parsed
        .faces
        .into_iter()
        .map(|face| {
            Detection::new(
                Identity::parse(&face.identity),
                face.confidence,
                face.bounding_box.unwrap_or_default(),
            )
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_and_unknown_faces() {
        let body = r#"{"faces": [
            {"identity": "known:alice", "confidence": 91.5,
             "box": {"top": 1, "right": 9, "bottom": 8, "left": 2}},
            {"identity": "unknown"}
        ]}"#;
        let faces = parse_response(body).unwrap();
        assert_eq!(faces.len(), 2);
        assert_eq!(faces[0].identity, Identity::Known("alice".into()));
        assert_eq!(faces[0].bounding_box.width(), 7);
        assert!(faces[1].identity.is_unknown());
        assert_eq!(faces[1].confidence, None);
    }

    #[test]
    fn empty_object_means_no_faces() {
        assert!(parse_response("{}").unwrap().is_empty());
    }

    #[test]
    fn rejects_non_http_urls() {
        assert!(HttpMatcher::new(HttpMatcherConfig::new("ftp://faces")).is_err());
    }
}
