// ── Planned-maintenance store ──

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tracing::info;

use crate::model::event::Event;
use crate::model::pm::{PlannedMaintenance, PmId, PmMatchType, PmTarget};

#[derive(Default)]
struct Inner {
    pms: BTreeMap<PmId, PlannedMaintenance>,
    last_pm_id: PmId,
}

#[derive(Default)]
pub struct PmStore {
    inner: Mutex<Inner>,
}

impl PmStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn locked(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add(
        &self,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        target: PmTarget,
        match_type: PmMatchType,
        match_expression: String,
        match_device: Option<String>,
        now: DateTime<Utc>,
    ) -> PlannedMaintenance {
        let mut inner = self.locked();
        inner.last_pm_id += 1;
        let id = inner.last_pm_id;
        let mut pm = PlannedMaintenance {
            id,
            start_time,
            end_time,
            target,
            match_type,
            match_expression,
            match_device,
            log: Vec::new(),
        };
        pm.add_log(now, "created");
        inner.pms.insert(id, pm.clone());
        info!(pm = id, %target, %match_type, "planned maintenance added");
        pm
    }

    pub fn cancel(&self, id: PmId) -> bool {
        let removed = self.locked().pms.remove(&id).is_some();
        if removed {
            info!(pm = id, "planned maintenance cancelled");
        }
        removed
    }

    pub fn get(&self, id: PmId) -> Option<PlannedMaintenance> {
        self.locked().pms.get(&id).cloned()
    }

    /// All PMs in id-ascending order.
    pub fn list(&self) -> Vec<PlannedMaintenance> {
        self.locked().pms.values().cloned().collect()
    }

    pub fn add_log(&self, id: PmId, now: DateTime<Utc>, text: &str) -> bool {
        let mut inner = self.locked();
        match inner.pms.get_mut(&id) {
            Some(pm) => {
                pm.add_log(now, text);
                true
            }
            None => false,
        }
    }

    /// The lowest-id active PM matching `event`, if any.
    pub fn first_active_match(&self, event: &Event, now: DateTime<Utc>) -> Option<PmId> {
        self.locked()
            .pms
            .values()
            .find(|pm| pm.is_active(now) && pm.matches_event(event))
            .map(|pm| pm.id)
    }

    /// Drop PMs whose end time plus grace has passed; returns their ids.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> Vec<PmId> {
        let mut inner = self.locked();
        let expired: Vec<PmId> = inner
            .pms
            .values()
            .filter(|pm| pm.is_expired(now))
            .map(|pm| pm.id)
            .collect();
        for id in &expired {
            inner.pms.remove(id);
        }
        expired
    }

    // ── Snapshot plumbing ────────────────────────────────────────────

    pub fn dump(&self) -> Vec<PlannedMaintenance> {
        self.list()
    }

    pub fn restore(&self, pms: Vec<PlannedMaintenance>) {
        let mut inner = self.locked();
        inner.pms.clear();
        inner.last_pm_id = pms.iter().map(|pm| pm.id).max().unwrap_or(0);
        for pm in pms {
            inner.pms.insert(pm.id, pm);
        }
    }
}
