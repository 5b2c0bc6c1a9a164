// ── State persistence and archival ──
//
// The whole core state serializes into one JSON document, written with
// the tmp + fsync + atomic-rename dance so a crash never leaves a torn
// snapshot. Serialization happens on an owned copy and the write on the
// blocking pool, so the event loop never stalls on disk. Closed events
// that fall out of the retention window move to date-sharded archive
// files instead.

use std::collections::HashMap;
use std::io::Write;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{Datelike, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::engine::Engine;
use crate::error::CoreError;
use crate::flaps::FlapEntry;
use crate::model::device::DeviceState;
use crate::model::event::{Event, EventId};
use crate::model::pm::PlannedMaintenance;

/// The on-disk snapshot document. Unknown fields in old snapshots are
/// ignored; missing fields fall back to defaults.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub events: Vec<Event>,
    #[serde(default)]
    pub devices: HashMap<String, DeviceState>,
    #[serde(default)]
    pub planned_maintenances: Vec<PlannedMaintenance>,
    #[serde(default)]
    pub flapping: HashMap<String, FlapEntry>,
    #[serde(default)]
    pub addresses: HashMap<IpAddr, String>,
    #[serde(default)]
    pub last_event_id: EventId,
}

impl Snapshot {
    /// Copy the engine's live state into an owned snapshot value.
    pub fn gather(engine: &Engine) -> Self {
        Self {
            events: engine.events().dump(),
            devices: engine.device_states_snapshot(),
            planned_maintenances: engine.pms().dump(),
            flapping: engine.with_flaps(|flaps| flaps.to_snapshot()),
            addresses: engine.registry().address_map(),
            last_event_id: engine.events().last_event_id(),
        }
    }

    /// Load the snapshot into a freshly built engine.
    pub fn apply(self, engine: &Engine) {
        let now = Utc::now();
        engine
            .events()
            .restore(self.events, self.last_event_id, now);
        engine.pms().restore(self.planned_maintenances);
        engine.with_flaps(|flaps| flaps.restore(self.flapping));
        engine.restore_device_states(self.devices);
    }
}

// ── Snapshot file IO ────────────────────────────────────────────────

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<(), CoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let tmp = tmp_path(path);
    let mut file = std::fs::File::create(&tmp)?;
    file.write_all(data)?;
    file.sync_all()?;
    drop(file);
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Write the snapshot without blocking the caller's executor thread.
pub async fn save_snapshot(snapshot: Snapshot, path: &Path) -> Result<(), CoreError> {
    let data = serde_json::to_vec_pretty(&snapshot)?;
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || write_atomic(&path, &data))
        .await
        .map_err(|err| CoreError::Io(std::io::Error::other(err)))?
}

/// Synchronous variant for the shutdown path.
pub fn save_snapshot_sync(snapshot: &Snapshot, path: &Path) -> Result<(), CoreError> {
    let data = serde_json::to_vec_pretty(snapshot)?;
    write_atomic(path, &data)
}

/// Read a snapshot; `Ok(None)` when no file exists yet.
pub fn load_snapshot(path: &Path) -> Result<Option<Snapshot>, CoreError> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    Ok(Some(serde_json::from_slice(&data)?))
}

// ── Archival ────────────────────────────────────────────────────────

/// Write events into `<dir>/YYYY/MM/DD/<id>.json`, sharded by close date.
pub fn archive_events(dir: &Path, events: &[Event]) -> Result<usize, CoreError> {
    let mut written = 0;
    for event in events {
        let stamp = event.closed.unwrap_or(event.opened);
        let shard = dir
            .join(format!("{:04}", stamp.year()))
            .join(format!("{:02}", stamp.month()))
            .join(format!("{:02}", stamp.day()));
        std::fs::create_dir_all(&shard)?;
        let data = serde_json::to_vec_pretty(event)?;
        std::fs::write(shard.join(format!("{}.json", event.id)), data)?;
        written += 1;
    }
    Ok(written)
}

// ── Background loops ────────────────────────────────────────────────

/// Periodic snapshot writer; the period comes from `[persistence]`.
pub async fn persist_loop(engine: Engine, cancel: CancellationToken) {
    let period = Duration::from_secs(60 * engine.config().persistence.period.max(1));
    let path = engine.config().persistence.file.clone();
    let mut tick = tokio::time::interval(period);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick fires immediately; skip it so startup is quiet.
    tick.tick().await;

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = tick.tick() => {
                let snapshot = Snapshot::gather(&engine);
                match save_snapshot(snapshot, &path).await {
                    Ok(()) => debug!(path = %path.display(), "state snapshot written"),
                    // Keep the previous snapshot; try again next cycle.
                    Err(err) => error!(%err, "state snapshot failed"),
                }
            }
        }
    }
}

/// Minute sweep: archive long-closed events, expire old PMs.
pub async fn maintenance_loop(engine: Engine, cancel: CancellationToken) {
    let archive_dir = engine.config().archiving.old_events_dir.clone();
    let mut tick = tokio::time::interval(Duration::from_secs(60));
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = tick.tick() => {
                let now = Utc::now();
                let archivable = engine.events().take_archivable(now);
                if !archivable.is_empty() {
                    let dir = archive_dir.clone();
                    let result = tokio::task::spawn_blocking(move || {
                        archive_events(&dir, &archivable)
                    })
                    .await;
                    match result {
                        Ok(Ok(count)) => info!(count, "archived expired events"),
                        Ok(Err(err)) => error!(%err, "event archival failed"),
                        Err(err) => error!(%err, "archival task panicked"),
                    }
                }
                let expired = engine.pms().sweep_expired(now);
                if !expired.is_empty() {
                    debug!(count = expired.len(), "expired planned maintenances removed");
                }
            }
        }
    }
}
