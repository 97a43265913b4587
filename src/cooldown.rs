//! Per-identity action cooldown.

use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(10);

/// Rate limiter keyed by identity ("unknown" is tracked like any name).
///
/// The table is behind an `RwLock` that is only taken for writing the first
/// time an identity shows up; after that each identity has its own `Mutex`,
/// so concurrent calls for different identities never wait on each other.
#[derive(Debug)]
pub struct CooldownTracker {
    window: Duration,
    table: RwLock<HashMap<String, Arc<Mutex<Option<Instant>>>>>,
}

impl CooldownTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            table: RwLock::new(HashMap::new()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Returns true (and records `now`) when an action for `identity` is
    /// permitted. First sightings are always permitted.
    pub fn try_act(&self, identity: &str, now: Instant) -> Result<bool> {
        let slot = self.slot(identity)?;
        let mut last = slot
            .lock()
            .map_err(|_| anyhow!("cooldown slot for '{}' poisoned", identity))?;
        let allowed = match *last {
            Some(previous) => now.saturating_duration_since(previous) >= self.window,
            None => true,
        };
        if allowed {
            *last = Some(now);
        }
        Ok(allowed)
    }

    /// Last permitted action for `identity`, if any.
    pub fn last_action(&self, identity: &str) -> Option<Instant> {
        let table = self.table.read().ok()?;
        let slot = table.get(identity)?;
        let last = slot.lock().ok()?;
        *last
    }

    fn slot(&self, identity: &str) -> Result<Arc<Mutex<Option<Instant>>>> {
        {
            let table = self
                .table
                .read()
                .map_err(|_| anyhow!("cooldown table poisoned"))?;
            if let Some(slot) = table.get(identity) {
                return Ok(slot.clone());
            }
        }
        let mut table = self
            .table
            .write()
            .map_err(|_| anyhow!("cooldown table poisoned"))?;
        Ok(table
            .entry(identity.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone())
    }
}

impl Default for CooldownTracker {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN)
    }
}
