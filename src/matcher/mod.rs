//! Face-matching capability and its adapters.

mod backend;
mod backends;
mod result;

use anyhow::{anyhow, Result};

pub use backend::FaceMatcher;
#[cfg(feature = "matcher-http")]
pub use backends::{HttpMatcher, HttpMatcherConfig};
pub use backends::{ScriptStep, ScriptedMatcher};
pub use result::{unknown_present, BoundingBox, Detection, Identity, KNOWN_PREFIX, UNKNOWN_LABEL};

use crate::config::MatcherSettings;

/// Build the matcher named in the configuration.
///
/// `scripted` (alias `stub`) never detects anyone, for dry runs against
/// synthetic sources; `http` requires the `matcher-http` feature.
pub fn build_matcher(settings: &MatcherSettings) -> Result<Box<dyn FaceMatcher>> {
    let mut matcher: Box<dyn FaceMatcher> = match settings.backend.as_str() {
        "scripted" | "stub" => Box::new(ScriptedMatcher::empty()),
        "http" => {
            #[cfg(feature = "matcher-http")]
            {
                let url = settings
                    .url
                    .clone()
                    .ok_or_else(|| anyhow!("http matcher requires recognition.matcher_url"))?;
                let mut config = HttpMatcherConfig::new(url);
                config.timeout = settings.timeout;
                Box::new(HttpMatcher::new(config)?)
            }
            #[cfg(not(feature = "matcher-http"))]
            {
                return Err(anyhow!("http matcher requires the matcher-http feature"));
            }
        }
        other => return Err(anyhow!("unknown matcher backend '{}'", other)),
    };
    matcher.warm_up()?;
    log::info!("face matcher: {}", matcher.name());
    Ok(matcher)
}
