// ── Task scheduler ──
//
// One job per device runs the whole task battery at the device's
// interval. First fire times are staggered by hashing the device name
// modulo the interval so a fleet with one shared interval does not poll
// in lockstep. Reloading the pollfile reconciles the job set; one-shot
// poll requests (traps, POLLRTR, POLLINTF) run on the same per-device
// lock so SNMP sessions are never used concurrently.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use zino_config::{PollDevice, PollfileWatcher, pollfile};

use crate::engine::{Engine, PollRequest, ReloadDelta};
use crate::tasks;

struct Job {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct Scheduler {
    engine: Engine,
    poll_rx: Option<mpsc::UnboundedReceiver<PollRequest>>,
    jobs: HashMap<String, Job>,
    run_locks: HashMap<String, Arc<AsyncMutex<()>>>,
    misfire_grace: Duration,
    cancel: CancellationToken,
}

impl Scheduler {
    /// Attach a scheduler to the engine; this wires the engine's
    /// one-shot poll channel.
    pub fn new(engine: Engine, cancel: CancellationToken) -> Self {
        let (poll_tx, poll_rx) = mpsc::unbounded_channel();
        engine.set_poll_sender(poll_tx);
        let misfire_grace = Duration::from_secs(engine.config().scheduler.misfire_grace_time);
        Self {
            engine,
            poll_rx: Some(poll_rx),
            jobs: HashMap::new(),
            run_locks: HashMap::new(),
            misfire_grace,
            cancel,
        }
    }

    /// Main loop: runs until cancellation, reloading the pollfile on
    /// mtime change and servicing one-shot poll requests.
    pub async fn run(mut self, mut watcher: PollfileWatcher) {
        // Jobs for everything the registry already knows.
        let initial = ReloadDelta {
            added: self.engine.registry().names().map(str::to_owned).collect(),
            removed: Vec::new(),
            changed: Vec::new(),
        };
        self.reconcile(&initial);

        let reload_period =
            Duration::from_secs(60 * self.engine.config().polling.period.max(1));
        let mut reload_tick = tokio::time::interval(reload_period);
        reload_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        reload_tick.tick().await;

        let Some(mut poll_rx) = self.poll_rx.take() else {
            return;
        };
        let cancel = self.cancel.clone();

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = reload_tick.tick() => self.maybe_reload(&mut watcher),
                request = poll_rx.recv() => match request {
                    Some(request) => self.handle_one_shot(request),
                    None => break,
                },
            }
        }

        for (name, job) in self.jobs.drain() {
            debug!(device = %name, "cancelling polling job");
            job.cancel.cancel();
            job.handle.abort();
        }
    }

    /// Re-parse the pollfile if it changed; parse errors keep the
    /// previous registry and job set.
    fn maybe_reload(&mut self, watcher: &mut PollfileWatcher) {
        if !watcher.changed() {
            return;
        }
        info!(path = %watcher.path().display(), "pollfile changed; reloading");
        match pollfile::parse_pollfile(watcher.path()) {
            Ok(registry) => {
                let delta = self.engine.apply_registry(registry);
                self.reconcile(&delta);
            }
            Err(err) => warn!(%err, "pollfile reload failed; keeping previous registry"),
        }
    }

    /// Bring the job set in line with a registry delta.
    pub(crate) fn reconcile(&mut self, delta: &ReloadDelta) {
        for name in delta.removed.iter().chain(&delta.changed) {
            if let Some(job) = self.jobs.remove(name) {
                job.cancel.cancel();
                job.handle.abort();
            }
        }
        for name in &delta.removed {
            self.run_locks.remove(name);
        }

        let registry = self.engine.registry();
        for name in delta.added.iter().chain(&delta.changed) {
            let Some(device) = registry.get(name) else {
                continue;
            };
            self.spawn_job(device.clone());
        }
    }

    fn run_lock(&mut self, name: &str) -> Arc<AsyncMutex<()>> {
        self.run_locks.entry(name.to_owned()).or_default().clone()
    }

    fn spawn_job(&mut self, device: PollDevice) {
        let name = device.name.clone();
        let cancel = self.cancel.child_token();
        let lock = self.run_lock(&name);
        let engine = self.engine.clone();
        let grace = self.misfire_grace;
        debug!(device = %name, interval = ?device.interval, "polling job scheduled");
        let handle = tokio::spawn(device_job(engine, device, lock, grace, cancel.clone()));
        if let Some(previous) = self.jobs.insert(name, Job { cancel, handle }) {
            previous.cancel.cancel();
            previous.handle.abort();
        }
    }

    /// Run a requested one-shot poll on the device's run lock.
    fn handle_one_shot(&mut self, request: PollRequest) {
        let registry = self.engine.registry();
        let (name, ifindex) = match &request {
            PollRequest::Device(name) => (name.clone(), None),
            PollRequest::Interface(name, ifindex) => (name.clone(), Some(*ifindex)),
        };
        let Some(device) = registry.get(&name).cloned() else {
            debug!(device = %name, "one-shot poll for unknown device dropped");
            return;
        };
        let lock = self.run_lock(&name);
        let engine = self.engine.clone();
        tokio::spawn(async move {
            let _guard = lock.lock().await;
            match ifindex {
                None => tasks::run_battery(&engine, &device).await,
                Some(ifindex) => {
                    let client = engine.client_for(&device);
                    if let Err(err) =
                        tasks::linkstate::poll_interface(&engine, &device, client.as_ref(), ifindex)
                            .await
                    {
                        warn!(device = %device.name, ifindex, %err, "interface poll failed");
                    }
                }
            }
        });
    }

    #[cfg(test)]
    pub(crate) fn job_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.jobs.keys().cloned().collect();
        names.sort();
        names
    }
}

/// The periodic loop for one device.
async fn device_job(
    engine: Engine,
    device: PollDevice,
    lock: Arc<AsyncMutex<()>>,
    grace: Duration,
    cancel: CancellationToken,
) {
    let interval = device.interval;
    let mut next = Instant::now() + stagger(&device.name, interval);

    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            () = sleep_until(next) => {}
        }

        let lateness = Instant::now().saturating_duration_since(next);
        if lateness > grace {
            warn!(
                device = %device.name,
                ?lateness,
                "run misfired past the grace window; skipping"
            );
        } else {
            let _guard = lock.lock().await;
            // A battery that overruns its own interval is cut off so the
            // next tick starts from a clean slate.
            if timeout(interval, tasks::run_battery(&engine, &device))
                .await
                .is_err()
            {
                warn!(
                    device = %device.name,
                    "task battery exceeded the polling interval; aborted"
                );
            }
        }

        next += interval;
        // Collapse any backlog of missed fire times into one.
        let now = Instant::now();
        while next <= now {
            next += interval;
        }
    }
}

/// Deterministic initial offset within the polling interval.
fn stagger(name: &str, interval: Duration) -> Duration {
    let mut hasher = DefaultHasher::new();
    name.hash(&mut hasher);
    "battery".hash(&mut hasher);
    let secs = interval.as_secs().max(1);
    Duration::from_secs(hasher.finish() % secs)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Arc as StdArc;
    use zino_config::Configuration;
    use zino_snmp::{ClientFactory, MockSnmp};

    fn test_engine() -> Engine {
        let factory: ClientFactory = StdArc::new(|_params| StdArc::new(MockSnmp::new()));
        Engine::new(Configuration::default(), factory)
    }

    fn registry(content: &str) -> zino_config::DeviceRegistry {
        pollfile::parse_pollfile_str(content, "polldevs.cf").unwrap()
    }

    #[test]
    fn stagger_is_deterministic_and_bounded() {
        let interval = Duration::from_secs(300);
        let first = stagger("arkham-sw1", interval);
        let again = stagger("arkham-sw1", interval);
        assert_eq!(first, again);
        assert!(first < interval);
        // Different devices usually land on different offsets.
        let other = stagger("auroralane-gw1", interval);
        assert!(first != other || stagger("blaafjell-gw2", interval) != first);
    }

    #[tokio::test]
    async fn reconcile_tracks_registry_changes() {
        let engine = test_engine();
        let cancel = CancellationToken::new();
        let mut scheduler = Scheduler::new(engine.clone(), cancel.clone());

        let delta = engine.apply_registry(registry(
            "name: sw1\naddress: 10.0.0.1\ninterval: 60\n\nname: gw2\naddress: 10.0.0.2\ninterval: 60\n",
        ));
        scheduler.reconcile(&delta);
        assert_eq!(scheduler.job_names(), vec!["gw2".to_owned(), "sw1".to_owned()]);

        let delta = engine.apply_registry(registry(
            "name: gw2\naddress: 10.0.0.2\ninterval: 60\n",
        ));
        scheduler.reconcile(&delta);
        assert_eq!(scheduler.job_names(), vec!["gw2".to_owned()]);

        cancel.cancel();
    }

    #[tokio::test]
    async fn changed_device_is_rescheduled_not_duplicated() {
        let engine = test_engine();
        let cancel = CancellationToken::new();
        let mut scheduler = Scheduler::new(engine.clone(), cancel.clone());

        let delta =
            engine.apply_registry(registry("name: sw1\naddress: 10.0.0.1\ninterval: 60\n"));
        scheduler.reconcile(&delta);
        let delta = engine.apply_registry(registry(
            "name: sw1\naddress: 10.0.0.1\ninterval: 1\n",
        ));
        assert_eq!(delta.changed, vec!["sw1".to_owned()]);
        scheduler.reconcile(&delta);
        assert_eq!(scheduler.job_names(), vec!["sw1".to_owned()]);

        cancel.cancel();
    }
}
