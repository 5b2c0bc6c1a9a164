// ── Link flap detection ──
//
// Per (device, ifindex) sliding window of state transitions with
// hysteresis: a port becomes flapping at `threshold_high` transitions
// inside the window, and only returns to stable after the window drains
// below `threshold_low` AND the port has been quiet for `stabilize`.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlapState {
    Stable,
    Flapping,
}

impl fmt::Display for FlapState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stable => write!(f, "stable"),
            Self::Flapping => write!(f, "flapping"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FlapConfig {
    pub window: Duration,
    pub threshold_high: u32,
    pub threshold_low: u32,
    pub stabilize: Duration,
}

impl Default for FlapConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(5 * 60),
            threshold_high: 3,
            threshold_low: 1,
            stabilize: Duration::from_secs(2 * 60),
        }
    }
}

/// Rolling flap history for one port.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlapEntry {
    /// Transition timestamps inside the window, oldest first.
    #[serde(default)]
    times: VecDeque<DateTime<Utc>>,
    #[serde(default)]
    pub first_flap: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_flap: Option<DateTime<Utc>>,
    /// Transitions counted since the entry was created or cleared.
    #[serde(default)]
    pub flaps_total: u32,
    #[serde(default = "stable")]
    pub state: FlapState,
    /// Milliseconds spent in down state.
    #[serde(default)]
    pub ac_down_ms: u64,
    #[serde(default)]
    down_since: Option<DateTime<Utc>>,
}

fn stable() -> FlapState {
    FlapState::Stable
}

impl Default for FlapState {
    fn default() -> Self {
        Self::Stable
    }
}

impl FlapEntry {
    fn prune(&mut self, now: DateTime<Utc>, window: Duration) {
        let Ok(window) = chrono::Duration::from_std(window) else {
            return;
        };
        while let Some(oldest) = self.times.front() {
            if now - *oldest > window {
                self.times.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn in_window(&self) -> u32 {
        u32::try_from(self.times.len()).unwrap_or(u32::MAX)
    }

    /// Accumulated down time as a `Duration`.
    pub fn ac_down(&self) -> Duration {
        Duration::from_millis(self.ac_down_ms)
    }
}

/// Accumulates transitions for every watched port on every device.
#[derive(Debug, Default)]
pub struct FlapTracker {
    config: FlapConfig,
    entries: HashMap<(String, u32), FlapEntry>,
}

impl FlapTracker {
    pub fn new(config: FlapConfig) -> Self {
        Self {
            config,
            entries: HashMap::new(),
        }
    }

    /// Record one oper-state transition. Returns the entry's state after
    /// applying the high threshold.
    pub fn record_transition(
        &mut self,
        device: &str,
        ifindex: u32,
        now: DateTime<Utc>,
    ) -> FlapState {
        let entry = self
            .entries
            .entry((device.to_owned(), ifindex))
            .or_default();
        entry.prune(now, self.config.window);
        entry.times.push_back(now);
        entry.first_flap.get_or_insert(now);
        entry.last_flap = Some(now);
        entry.flaps_total = entry.flaps_total.saturating_add(1);
        if entry.in_window() >= self.config.threshold_high {
            entry.state = FlapState::Flapping;
        }
        entry.state
    }

    /// Note the port going down / coming up, for down-time accounting.
    pub fn note_down(&mut self, device: &str, ifindex: u32, now: DateTime<Utc>) {
        let entry = self
            .entries
            .entry((device.to_owned(), ifindex))
            .or_default();
        entry.down_since.get_or_insert(now);
    }

    pub fn note_up(&mut self, device: &str, ifindex: u32, now: DateTime<Utc>) {
        if let Some(entry) = self.entries.get_mut(&(device.to_owned(), ifindex)) {
            if let Some(since) = entry.down_since.take() {
                let spent = (now - since).num_milliseconds().max(0);
                entry.ac_down_ms = entry.ac_down_ms.saturating_add(spent.unsigned_abs());
            }
        }
    }

    /// Apply the low-threshold hysteresis. Returns `true` when this call
    /// moved the port from flapping back to stable.
    pub fn check_stabilized(&mut self, device: &str, ifindex: u32, now: DateTime<Utc>) -> bool {
        let Some(entry) = self.entries.get_mut(&(device.to_owned(), ifindex)) else {
            return false;
        };
        if entry.state != FlapState::Flapping {
            return false;
        }
        entry.prune(now, self.config.window);

        let quiet = entry.last_flap.is_none_or(|last| {
            (now - last).to_std().unwrap_or(Duration::ZERO) >= self.config.stabilize
        });
        if entry.in_window() < self.config.threshold_low && quiet {
            entry.state = FlapState::Stable;
            true
        } else {
            false
        }
    }

    pub fn get(&self, device: &str, ifindex: u32) -> Option<&FlapEntry> {
        self.entries.get(&(device.to_owned(), ifindex))
    }

    pub fn is_flapping(&self, device: &str, ifindex: u32) -> bool {
        self.get(device, ifindex)
            .is_some_and(|entry| entry.state == FlapState::Flapping)
    }

    /// Forget one port's history (CLEARFLAP).
    pub fn clear(&mut self, device: &str, ifindex: u32) {
        self.entries.remove(&(device.to_owned(), ifindex));
    }

    /// Forget every port of a device removed from the pollfile.
    pub fn clear_device(&mut self, device: &str) {
        self.entries.retain(|(name, _), _| name != device);
    }

    /// Ports of `device` currently marked flapping.
    pub fn flapping_ports(&self, device: &str) -> Vec<u32> {
        let mut ports: Vec<u32> = self
            .entries
            .iter()
            .filter(|((name, _), entry)| name == device && entry.state == FlapState::Flapping)
            .map(|((_, ifindex), _)| *ifindex)
            .collect();
        ports.sort_unstable();
        ports
    }

    // ── Snapshot plumbing ────────────────────────────────────────────

    /// Key format in the snapshot is `"<device>:<ifindex>"`.
    pub fn to_snapshot(&self) -> HashMap<String, FlapEntry> {
        self.entries
            .iter()
            .map(|((device, ifindex), entry)| (format!("{device}:{ifindex}"), entry.clone()))
            .collect()
    }

    pub fn restore(&mut self, snapshot: HashMap<String, FlapEntry>) {
        for (key, entry) in snapshot {
            let Some((device, ifindex)) = key.rsplit_once(':') else {
                continue;
            };
            let Ok(ifindex) = ifindex.parse::<u32>() else {
                continue;
            };
            self.entries.insert((device.to_owned(), ifindex), entry);
        }
    }
}
