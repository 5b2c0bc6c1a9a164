// ── Planned maintenance ──
//
// Time-bounded rules that annotate or suppress events matching a device
// or port pattern. Evaluated in id-ascending order on event creation.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::event::{Event, EventDetails, EventType, LogEntry};

pub type PmId = u32;

/// PMs linger this long past their end time before self-removal.
pub const PM_EXPIRY_GRACE: TimeDelta = TimeDelta::hours(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PmMatchType {
    Exact,
    Str,
    Regexp,
    #[serde(rename = "intf-regexp")]
    IntfRegexp,
}

impl fmt::Display for PmMatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Exact => "exact",
            Self::Str => "str",
            Self::Regexp => "regexp",
            Self::IntfRegexp => "intf-regexp",
        };
        write!(f, "{name}")
    }
}

impl FromStr for PmMatchType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "exact" => Ok(Self::Exact),
            "str" => Ok(Self::Str),
            "regexp" => Ok(Self::Regexp),
            "intf-regexp" => Ok(Self::IntfRegexp),
            other => Err(format!("unknown match type '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PmTarget {
    Portstate,
    Device,
}

impl fmt::Display for PmTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Portstate => write!(f, "portstate"),
            Self::Device => write!(f, "device"),
        }
    }
}

impl FromStr for PmTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "portstate" => Ok(Self::Portstate),
            "device" => Ok(Self::Device),
            other => Err(format!("unknown PM type '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedMaintenance {
    pub id: PmId,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub target: PmTarget,
    pub match_type: PmMatchType,
    pub match_expression: String,
    /// Device restriction for `intf-regexp` matches.
    #[serde(default)]
    pub match_device: Option<String>,
    #[serde(default)]
    pub log: Vec<LogEntry>,
}

impl PlannedMaintenance {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.start_time <= now && now < self.end_time
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.end_time + PM_EXPIRY_GRACE
    }

    /// Whether this PM applies to `event`. Time bounds are the caller's
    /// concern; this only evaluates the match rule.
    pub fn matches_event(&self, event: &Event) -> bool {
        let port_fields = match &event.details {
            EventDetails::Portstate { port, descr, .. } => Some((port.as_str(), descr.as_str())),
            _ => None,
        };

        // A portstate PM only ever applies to portstate events.
        if self.target == PmTarget::Portstate && event.event_type() != EventType::Portstate {
            return false;
        }

        match self.match_type {
            PmMatchType::Exact => {
                self.target == PmTarget::Device && event.router == self.match_expression
            }
            PmMatchType::Str => {
                event.router.contains(&self.match_expression)
                    || port_fields
                        .is_some_and(|(_, alias)| alias.contains(&self.match_expression))
            }
            PmMatchType::Regexp => match regex::Regex::new(&self.match_expression) {
                Ok(pattern) => {
                    pattern.is_match(&event.router)
                        || port_fields.is_some_and(|(_, alias)| pattern.is_match(alias))
                }
                Err(err) => {
                    warn!(pm = self.id, %err, "unusable PM regexp");
                    false
                }
            },
            PmMatchType::IntfRegexp => {
                let Some((ifdescr, _)) = port_fields else {
                    return false;
                };
                if self
                    .match_device
                    .as_deref()
                    .is_some_and(|device| device != event.router)
                {
                    return false;
                }
                match regex::Regex::new(&self.match_expression) {
                    Ok(pattern) => pattern.is_match(ifdescr),
                    Err(err) => {
                        warn!(pm = self.id, %err, "unusable PM intf-regexp");
                        false
                    }
                }
            }
        }
    }

    pub fn add_log(&mut self, now: DateTime<Utc>, text: impl Into<String>) {
        self.log.push(LogEntry::new(now, text));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::flaps::FlapState;
    use crate::model::event::PortState;
    use std::time::Duration;

    fn pm(target: PmTarget, match_type: PmMatchType, expr: &str, device: Option<&str>) -> PlannedMaintenance {
        let now = Utc::now();
        PlannedMaintenance {
            id: 1,
            start_time: now - TimeDelta::minutes(5),
            end_time: now + TimeDelta::hours(1),
            target,
            match_type,
            match_expression: expr.into(),
            match_device: device.map(Into::into),
            log: Vec::new(),
        }
    }

    fn portstate_event(router: &str, ifdescr: &str, alias: &str) -> Event {
        Event::new(
            1,
            router,
            EventDetails::Portstate {
                ifindex: 150,
                port: ifdescr.into(),
                descr: alias.into(),
                portstate: PortState::Down,
                flaps: 0,
                flapstate: FlapState::Stable,
                ac_down: Duration::ZERO,
            },
            Utc::now(),
        )
    }

    fn reachability_event(router: &str) -> Event {
        Event::new(
            2,
            router,
            EventDetails::Reachability {
                reachability: crate::model::event::ReachabilityState::NoResponse,
            },
            Utc::now(),
        )
    }

    #[test]
    fn exact_matches_device_name_only() {
        let pm = pm(PmTarget::Device, PmMatchType::Exact, "blaafjell-gw2", None);
        assert!(pm.matches_event(&reachability_event("blaafjell-gw2")));
        assert!(!pm.matches_event(&reachability_event("blaafjell-gw22")));
    }

    #[test]
    fn str_matches_router_or_alias() {
        let pm = pm(PmTarget::Portstate, PmMatchType::Str, "uplink", None);
        assert!(pm.matches_event(&portstate_event("sw1", "ge-0/0/0", "customer uplink")));
        let pm2 = pm_by_router();
        assert!(pm2.matches_event(&portstate_event("blaafjell-gw2", "ge-0/0/0", "x")));
    }

    fn pm_by_router() -> PlannedMaintenance {
        pm(PmTarget::Portstate, PmMatchType::Str, "blaafjell", None)
    }

    #[test]
    fn portstate_pm_skips_other_event_types() {
        let pm = pm(PmTarget::Portstate, PmMatchType::Str, "blaafjell", None);
        assert!(!pm.matches_event(&reachability_event("blaafjell-gw2")));
    }

    #[test]
    fn intf_regexp_checks_device_and_ifdescr() {
        let pm = pm(
            PmTarget::Portstate,
            PmMatchType::IntfRegexp,
            "ge-1/0/10",
            Some("blaafjell-gw2"),
        );
        assert!(pm.matches_event(&portstate_event("blaafjell-gw2", "ge-1/0/10", "x")));
        assert!(!pm.matches_event(&portstate_event("other-gw", "ge-1/0/10", "x")));
        assert!(!pm.matches_event(&portstate_event("blaafjell-gw2", "xe-0/0/5", "x")));
    }

    #[test]
    fn active_window_is_half_open() {
        let mut pm = pm(PmTarget::Device, PmMatchType::Exact, "gw", None);
        let now = Utc::now();
        pm.start_time = now;
        pm.end_time = now + TimeDelta::hours(1);
        assert!(pm.is_active(now));
        assert!(!pm.is_active(now + TimeDelta::hours(1)));
        assert!(!pm.is_active(now - TimeDelta::seconds(1)));
    }

    #[test]
    fn expiry_includes_grace() {
        let mut pm = pm(PmTarget::Device, PmMatchType::Exact, "gw", None);
        let now = Utc::now();
        pm.end_time = now;
        assert!(!pm.is_expired(now + TimeDelta::minutes(59)));
        assert!(pm.is_expired(now + TimeDelta::hours(1)));
    }
}
