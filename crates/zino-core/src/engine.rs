// ── Engine ──
//
// The long-lived context threaded through tasks, trap handlers and the
// protocol servers. Cheaply cloneable; all state lives behind one inner
// Arc. Entities refer to each other by name/id only, which keeps the
// state snapshot acyclic.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info};

use zino_config::{Configuration, DeviceRegistry, PollDevice};
use zino_snmp::{ClientFactory, SnmpClient};

use crate::flaps::{FlapConfig, FlapState, FlapTracker};
use crate::model::device::DeviceState;
use crate::model::event::{Event, EventDetails, EventState, EventType, SubIndex};
use crate::store::{EventStore, PmStore};

/// Engine behavior knobs not exposed in the config file schema.
#[derive(Debug, Clone)]
pub struct Tuning {
    pub flap: FlapConfig,
    /// Consecutive failed probes before a reachability event is raised.
    pub unreachable_threshold: u32,
    /// Suppress creation of PM-matched events into the ignored state.
    pub pm_suppression: bool,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            flap: FlapConfig::default(),
            unreachable_threshold: 2,
            pm_suppression: true,
        }
    }
}

/// One-shot poll request, from the protocol layer or a trap handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollRequest {
    /// Run the full task battery for a device (POLLRTR).
    Device(String),
    /// Check a single interface; ifindex 0 means the whole table.
    Interface(String, u32),
}

/// Pollfile reload outcome, consumed by the scheduler.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReloadDelta {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<String>,
}

#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: Configuration,
    tuning: Tuning,
    registry: ArcSwap<DeviceRegistry>,
    events: EventStore,
    pms: PmStore,
    flaps: Mutex<FlapTracker>,
    device_states: DashMap<String, DeviceState>,
    clients: DashMap<String, Arc<dyn SnmpClient>>,
    client_factory: ClientFactory,
    poll_tx: OnceLock<mpsc::UnboundedSender<PollRequest>>,
    boot_time: DateTime<Utc>,
}

impl Engine {
    pub fn new(config: Configuration, client_factory: ClientFactory) -> Self {
        Self::with_tuning(config, client_factory, Tuning::default())
    }

    pub fn with_tuning(
        config: Configuration,
        client_factory: ClientFactory,
        tuning: Tuning,
    ) -> Self {
        let flaps = Mutex::new(FlapTracker::new(tuning.flap));
        Self {
            inner: Arc::new(EngineInner {
                config,
                tuning,
                registry: ArcSwap::from_pointee(DeviceRegistry::default()),
                events: EventStore::new(),
                pms: PmStore::new(),
                flaps,
                device_states: DashMap::new(),
                clients: DashMap::new(),
                client_factory,
                poll_tx: OnceLock::new(),
                boot_time: Utc::now(),
            }),
        }
    }

    pub fn config(&self) -> &Configuration {
        &self.inner.config
    }

    pub fn tuning(&self) -> &Tuning {
        &self.inner.tuning
    }

    pub fn boot_time(&self) -> DateTime<Utc> {
        self.inner.boot_time
    }

    pub fn events(&self) -> &EventStore {
        &self.inner.events
    }

    pub fn pms(&self) -> &PmStore {
        &self.inner.pms
    }

    pub fn registry(&self) -> Arc<DeviceRegistry> {
        self.inner.registry.load_full()
    }

    // ── Flap tracker access ──────────────────────────────────────────

    /// Run `f` under the flap tracker lock. Keep the closure await-free.
    pub fn with_flaps<R>(&self, f: impl FnOnce(&mut FlapTracker) -> R) -> R {
        let mut guard = self
            .inner
            .flaps
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    // ── Device state cache ───────────────────────────────────────────

    pub fn device_state(&self, name: &str) -> Option<DeviceState> {
        self.inner
            .device_states
            .get(name)
            .map(|entry| entry.value().clone())
    }

    /// Mutate (or lazily create) the observation cache for `name`.
    pub fn with_device_state<R>(
        &self,
        name: &str,
        f: impl FnOnce(&mut DeviceState) -> R,
    ) -> R {
        let mut entry = self
            .inner
            .device_states
            .entry(name.to_owned())
            .or_insert_with(|| DeviceState::new(name));
        f(entry.value_mut())
    }

    pub fn device_states_snapshot(&self) -> std::collections::HashMap<String, DeviceState> {
        self.inner
            .device_states
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn restore_device_states(
        &self,
        states: std::collections::HashMap<String, DeviceState>,
    ) {
        for (name, state) in states {
            self.inner.device_states.insert(name, state);
        }
    }

    // ── SNMP sessions ────────────────────────────────────────────────

    /// The (cached) SNMP session for a device. Sessions are owned by the
    /// device's serialized task queue and reused across task kinds.
    pub fn client_for(&self, device: &PollDevice) -> Arc<dyn SnmpClient> {
        self.inner
            .clients
            .entry(device.name.clone())
            .or_insert_with(|| (self.inner.client_factory)(device.session_params()))
            .clone()
    }

    /// Replace a device's session, e.g. in tests scripting a mock agent.
    pub fn install_client(&self, name: &str, client: Arc<dyn SnmpClient>) {
        self.inner.clients.insert(name.to_owned(), client);
    }

    // ── One-shot polls ───────────────────────────────────────────────

    pub(crate) fn set_poll_sender(&self, tx: mpsc::UnboundedSender<PollRequest>) {
        let _ = self.inner.poll_tx.set(tx);
    }

    /// Enqueue a one-shot poll; dropped with a debug log when no
    /// scheduler is attached (tests, shutdown).
    pub fn request_poll(&self, request: PollRequest) {
        match self.inner.poll_tx.get() {
            Some(tx) => {
                if tx.send(request.clone()).is_err() {
                    debug!(?request, "scheduler gone; poll request dropped");
                }
            }
            None => debug!(?request, "no scheduler attached; poll request dropped"),
        }
    }

    // ── Registry reload ──────────────────────────────────────────────

    /// Swap in a freshly parsed registry, clean up state for removed
    /// devices, and report the delta for job reconciliation.
    pub fn apply_registry(&self, new: DeviceRegistry) -> ReloadDelta {
        let old = self.inner.registry.load_full();
        let now = Utc::now();
        let mut delta = ReloadDelta::default();

        let new_names: HashSet<&str> = new.names().collect();
        for name in old.names() {
            if !new_names.contains(name) {
                delta.removed.push(name.to_owned());
            }
        }
        for device in new.iter() {
            match old.get(&device.name) {
                None => delta.added.push(device.name.clone()),
                Some(previous) if previous != device => delta.changed.push(device.name.clone()),
                Some(_) => {}
            }
        }

        self.inner.registry.store(Arc::new(new));

        for name in &delta.removed {
            info!(device = %name, "device removed from pollfile; closing its events");
            self.inner
                .events
                .close_events_for_router(name, "device removed from pollfile", now);
            self.inner.device_states.remove(name);
            self.inner.clients.remove(name);
            self.with_flaps(|flaps| flaps.clear_device(name));
        }
        for name in &delta.changed {
            // Session parameters may have changed; rebuild lazily.
            self.inner.clients.remove(name);
        }

        if !(delta.added.is_empty() && delta.removed.is_empty() && delta.changed.is_empty()) {
            info!(
                added = delta.added.len(),
                removed = delta.removed.len(),
                changed = delta.changed.len(),
                "device registry reloaded"
            );
        }
        delta
    }

    // ── Event helpers ────────────────────────────────────────────────

    /// Commit a freshly created event, applying planned maintenance:
    /// when an active PM matches, the event opens in the ignored state
    /// with a log line citing the PM.
    pub fn open_event(&self, mut event: Event, now: DateTime<Utc>) -> Event {
        if event.state == EventState::Embryonic {
            if let Some(pm_id) = self.inner.pms.first_active_match(&event, now) {
                event.add_log(now, format!("planned maintenance {pm_id} active"));
                if self.inner.tuning.pm_suppression {
                    event.set_state(EventState::Ignored, now);
                }
                self.inner.pms.add_log(
                    pm_id,
                    now,
                    &format!("matched event {} on {}", event.id, event.router),
                );
            }
        }
        self.inner.events.commit(event, now)
    }

    /// Clear flap bookkeeping for one port and mark its open event
    /// stable. Counters only; the event stays open.
    pub fn clear_flap(&self, router: &str, ifindex: u32, now: DateTime<Utc>) {
        self.with_flaps(|flaps| flaps.clear(router, ifindex));
        let Some(open) = self
            .inner
            .events
            .find_open(router, EventType::Portstate, &SubIndex::Interface(ifindex))
        else {
            return;
        };
        let mut event = open;
        if let EventDetails::Portstate {
            flaps, flapstate, ..
        } = &mut event.details
        {
            *flaps = 0;
            *flapstate = FlapState::Stable;
        }
        event.add_log(now, "flap counters cleared by operator");
        self.inner.events.commit(event, now);
    }

    /// Priority and poll address stamped onto events for `device`.
    pub fn decorate_event(&self, event: &mut Event, device: &PollDevice) {
        event.priority = device.priority;
        event.polladdr = Some(device.address);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::flaps::FlapState;
    use crate::model::event::PortState;
    use crate::model::pm::{PmMatchType, PmTarget};
    use chrono::TimeDelta;
    use std::time::Duration;
    use zino_snmp::MockSnmp;

    fn test_engine() -> Engine {
        let factory: ClientFactory = Arc::new(|_params| Arc::new(MockSnmp::new()));
        Engine::new(Configuration::default(), factory)
    }

    fn registry_of(content: &str) -> DeviceRegistry {
        zino_config::pollfile::parse_pollfile_str(content, "polldevs.cf").unwrap()
    }

    fn port_details(ifindex: u32) -> EventDetails {
        EventDetails::Portstate {
            ifindex,
            port: format!("ge-1/0/{ifindex}"),
            descr: "uplink".into(),
            portstate: PortState::Down,
            flaps: 0,
            flapstate: FlapState::Stable,
            ac_down: Duration::ZERO,
        }
    }

    #[test]
    fn apply_registry_reports_delta_and_closes_events() {
        let engine = test_engine();
        let now = Utc::now();
        engine.apply_registry(registry_of(
            "name: sw1\naddress: 10.0.0.1\n\nname: gw2\naddress: 10.0.0.2\n",
        ));

        let (event, _) = engine.events().get_or_create("sw1", port_details(1), now);
        engine.events().commit(event, now);

        let delta = engine.apply_registry(registry_of(
            "name: gw2\naddress: 10.0.0.2\ncommunity: changed\n\nname: gw3\naddress: 10.0.0.3\n",
        ));
        assert_eq!(delta.removed, vec!["sw1".to_owned()]);
        assert_eq!(delta.added, vec!["gw3".to_owned()]);
        assert_eq!(delta.changed, vec!["gw2".to_owned()]);

        // sw1's event was force-closed by the reload
        assert!(engine.events().open_ids().is_empty());
    }

    #[test]
    fn open_event_under_pm_lands_in_ignored() {
        let engine = test_engine();
        let now = Utc::now();
        engine.pms().add(
            now - TimeDelta::minutes(5),
            now + TimeDelta::hours(1),
            PmTarget::Portstate,
            PmMatchType::IntfRegexp,
            "ge-1/0/10".into(),
            Some("blaafjell-gw2".into()),
            now,
        );

        let (event, created) = engine.events().get_or_create(
            "blaafjell-gw2",
            EventDetails::Portstate {
                ifindex: 150,
                port: "ge-1/0/10".into(),
                descr: String::new(),
                portstate: PortState::Down,
                flaps: 0,
                flapstate: FlapState::Stable,
                ac_down: Duration::ZERO,
            },
            now,
        );
        assert!(created);
        let committed = engine.open_event(event, now);
        assert_eq!(committed.state, EventState::Ignored);
        assert!(
            committed
                .log
                .iter()
                .any(|entry| entry.text.contains("planned maintenance 1"))
        );
    }

    #[test]
    fn clear_flap_resets_event_counters_without_closing() {
        let engine = test_engine();
        let now = Utc::now();
        for offset in 0..4 {
            engine.with_flaps(|flaps| {
                flaps.record_transition("sw1", 150, now + TimeDelta::seconds(offset));
            });
        }
        let (mut event, _) = engine.events().get_or_create("sw1", port_details(150), now);
        if let EventDetails::Portstate {
            flaps, flapstate, ..
        } = &mut event.details
        {
            *flaps = 4;
            *flapstate = FlapState::Flapping;
        }
        let committed = engine.open_event(event, now);
        assert_eq!(committed.state, EventState::Open);

        engine.clear_flap("sw1", 150, now);
        let cleared = engine.events().get(committed.id).unwrap();
        assert_eq!(cleared.state, EventState::Open);
        match cleared.details {
            EventDetails::Portstate {
                flaps, flapstate, ..
            } => {
                assert_eq!(flaps, 0);
                assert_eq!(flapstate, FlapState::Stable);
            }
            _ => panic!("wrong details"),
        }
        assert!(!engine.with_flaps(|flaps| flaps.is_flapping("sw1", 150)));
    }
}
