pub mod scripted;

#[cfg(feature = "matcher-http")]
pub mod http;

pub use scripted::{ScriptStep, ScriptedMatcher};

#[cfg(feature = "matcher-http")]
pub use http::{HttpMatcher, HttpMatcherConfig};
