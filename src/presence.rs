//! Presence debouncing.
//!
//! The matcher's per-frame "unknown person visible" answer flickers: a face
//! turns away, a shadow gets misclassified. `PresenceDebouncer` turns that
//! signal into a stable one with a sliding window and a majority vote, so a
//! single missed or spurious sample can never start or stop a recording.

use anyhow::{anyhow, Result};
use std::collections::VecDeque;

pub const DEFAULT_WINDOW: usize = 3;
pub const DEFAULT_MAJORITY: usize = 2;

/// The last K raw samples, oldest first.
#[derive(Clone, Debug)]
pub struct PresenceWindow {
    samples: VecDeque<bool>,
    capacity: usize,
}

impl PresenceWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a sample, evicting the oldest one once full.
    pub fn push(&mut self, sample: bool) {
        while self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.samples.len() == self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn count_true(&self) -> usize {
        self.samples.iter().filter(|s| **s).count()
    }

    /// Missing samples (startup) count as false.
    pub fn count_false(&self) -> usize {
        self.capacity - self.count_true()
    }

    pub fn newest(&self) -> Option<bool> {
        self.samples.back().copied()
    }
}

/// Sliding-window majority vote with hysteresis.
///
/// The stable value rises only when the window is full, at least `majority`
/// samples are true and the newest sample is true. It falls only when at
/// least `majority` samples are false and the newest sample is false.
/// Anything else keeps the previous value.
#[derive(Clone, Debug)]
pub struct PresenceDebouncer {
    window: PresenceWindow,
    majority: usize,
    stable: bool,
}

impl PresenceDebouncer {
    pub fn new(window: usize, majority: usize) -> Result<Self> {
        if window == 0 {
            return Err(anyhow!("presence window must hold at least one sample"));
        }
        if majority == 0 || majority > window {
            return Err(anyhow!(
                "presence majority must be within 1..={} (got {})",
                window,
                majority
            ));
        }
        Ok(Self {
            window: PresenceWindow::new(window),
            majority,
            stable: false,
        })
    }

    /// Feed one raw sample and return the stable value after it.
    pub fn observe(&mut self, detected: bool) -> bool {
        self.window.push(detected);
        if self.stable {
            if !detected && self.window.count_false() >= self.majority {
                self.stable = false;
            }
        } else if detected
            && self.window.is_full()
            && self.window.count_true() >= self.majority
        {
            self.stable = true;
        }
        self.stable
    }

    pub fn is_stable(&self) -> bool {
        self.stable
    }

    pub fn window(&self) -> &PresenceWindow {
        &self.window
    }
}

impl Default for PresenceDebouncer {
    fn default() -> Self {
        Self {
            window: PresenceWindow::new(DEFAULT_WINDOW),
            majority: DEFAULT_MAJORITY,
            stable: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(debouncer: &mut PresenceDebouncer, samples: &[bool]) -> Vec<bool> {
        samples.iter().map(|s| debouncer.observe(*s)).collect()
    }

    #[test]
    fn window_evicts_oldest_sample() {
        let mut window = PresenceWindow::new(3);
        for sample in [true, false, false, false] {
            window.push(sample);
        }
        assert_eq!(window.len(), 3);
        assert_eq!(window.count_true(), 0);
    }

    #[test]
    fn missing_samples_count_as_false() {
        let mut window = PresenceWindow::new(5);
        window.push(true);
        assert_eq!(window.count_false(), 4);
        assert!(!window.is_full());
    }

    #[test]
    fn rejects_majority_larger_than_window() {
        assert!(PresenceDebouncer::new(3, 4).is_err());
        assert!(PresenceDebouncer::new(3, 0).is_err());
        assert!(PresenceDebouncer::new(0, 0).is_err());
    }

    #[test]
    fn reference_sequence_matches_expected_stable_output() {
        let mut debouncer = PresenceDebouncer::new(3, 2).unwrap();
        let stable = run(
            &mut debouncer,
            &[true, true, false, true, true, true, false, false, false],
        );
        assert_eq!(
            stable,
            vec![false, false, false, true, true, true, true, false, false]
        );
    }

    #[test]
    fn single_dropout_does_not_end_presence() {
        let mut debouncer = PresenceDebouncer::new(3, 2).unwrap();
        run(&mut debouncer, &[true, true, true]);
        assert!(debouncer.observe(false));
        assert!(debouncer.observe(true));
    }

    #[test]
    fn single_false_positive_does_not_start_presence() {
        let mut debouncer = PresenceDebouncer::new(3, 2).unwrap();
        let stable = run(&mut debouncer, &[false, false, true, false, false, true, false]);
        assert!(stable.iter().all(|s| !s));
    }

    #[test]
    fn output_only_changes_with_majority_support() {
        // Exhaustive over every 8-sample sequence.
        for bits in 0u32..256 {
            let mut debouncer = PresenceDebouncer::new(3, 2).unwrap();
            let mut previous = false;
            for i in 0..8 {
                let sample = bits & (1 << i) != 0;
                let stable = debouncer.observe(sample);
                if stable != previous {
                    let window = debouncer.window();
                    if stable {
                        assert!(window.count_true() >= 2, "rise without majority: {:08b}", bits);
                    } else {
                        assert!(window.count_false() >= 2, "fall without majority: {:08b}", bits);
                    }
                }
                previous = stable;
            }
        }
    }
}
