use anyhow::{anyhow, Result};
use std::collections::VecDeque;

use crate::frame::Frame;
use crate::matcher::backend::FaceMatcher;
use crate::matcher::result::Detection;

/// One scripted recognition cycle.
#[derive(Clone, Debug)]
pub enum ScriptStep {
    Faces(Vec<Detection>),
    Fail(String),
}

/// Matcher that replays a fixed script, one step per call.
///
/// Used by tests, the demo binary and dry runs against synthetic sources.
/// Once the script runs out it either starts over (`repeating`) or reports
/// no faces.
pub struct ScriptedMatcher {
    script: Vec<ScriptStep>,
    pending: VecDeque<ScriptStep>,
    repeat: bool,
    calls: u64,
}

impl ScriptedMatcher {
    pub fn new(script: Vec<ScriptStep>) -> Self {
        Self {
            pending: script.iter().cloned().collect(),
            script,
            repeat: false,
            calls: 0,
        }
    }

    /// Never sees anyone.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// One unknown face on every `true` step, nobody on `false` steps.
    pub fn from_presence(pattern: &[bool]) -> Self {
        Self::new(
            pattern
                .iter()
                .map(|present| {
                    if *present {
                        ScriptStep::Faces(vec![Detection::unknown()])
                    } else {
                        ScriptStep::Faces(Vec::new())
                    }
                })
                .collect(),
        )
    }

    pub fn repeating(mut self) -> Self {
        self.repeat = true;
        self
    }

    /// Number of `match_faces` calls so far.
    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl Default for ScriptedMatcher {
    fn default() -> Self {
        Self::empty()
    }
}

impl FaceMatcher for ScriptedMatcher {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn match_faces(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
        self.calls += 1;
        if self.pending.is_empty() && self.repeat {
            self.pending = self.script.iter().cloned().collect();
        }
        match self.pending.pop_front() {
            Some(ScriptStep::Faces(faces)) => Ok(faces),
            Some(ScriptStep::Fail(reason)) => Err(anyhow!("scripted matcher failure: {}", reason)),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn frame() -> Frame {
        Frame::solid(4, 4, [0, 0, 0], Instant::now(), 1)
    }

    #[test]
    fn replays_steps_in_order_then_goes_quiet() {
        let mut matcher = ScriptedMatcher::new(vec![
            ScriptStep::Faces(vec![Detection::known("alice", 88.0)]),
            ScriptStep::Fail("camera glare".into()),
        ]);
        assert_eq!(matcher.match_faces(&frame()).unwrap().len(), 1);
        assert!(matcher.match_faces(&frame()).is_err());
        assert!(matcher.match_faces(&frame()).unwrap().is_empty());
        assert_eq!(matcher.calls(), 3);
    }

    #[test]
    fn repeating_script_starts_over() {
        let mut matcher = ScriptedMatcher::from_presence(&[true, false]).repeating();
        let seen: Vec<bool> = (0..5)
            .map(|_| !matcher.match_faces(&frame()).unwrap().is_empty())
            .collect();
        assert_eq!(seen, vec![true, false, true, false, true]);
    }
}
