// ── Link state task ──
//
// Bulk-walks the interface table, applies the device's watch/ignore
// patterns to ifAlias, and turns oper/admin transitions into portstate
// events. Flapping ports keep updating one event instead of spawning a
// new one per transition. Transitions are processed in ifindex order so
// event history is deterministic.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::debug;

use zino_config::PollDevice;
use zino_snmp::{Oid, SnmpClient, SnmpError, oids, walk};

use crate::engine::Engine;
use crate::flaps::FlapState;
use crate::model::device::{IfStatus, Port};
use crate::model::event::{EventDetails, EventType, PortState, SubIndex};

pub async fn run(
    engine: &Engine,
    device: &PollDevice,
    client: &dyn SnmpClient,
) -> Result<(), SnmpError> {
    let max_rep = device.session_params().max_repetitions;
    let table = collect_interface_table(client, max_rep).await?;
    let now = Utc::now();

    let watched: BTreeMap<u32, Port> = table
        .into_iter()
        .filter(|(_, port)| is_watched(device, &port.ifalias))
        .collect();

    let previous = engine
        .device_state(&device.name)
        .map(|state| state.interfaces)
        .unwrap_or_default();

    if previous.is_empty() {
        // First sight of this device: establish the baseline quietly.
        debug!(device = %device.name, ports = watched.len(), "interface baseline recorded");
        engine.with_device_state(&device.name, |state| {
            state.interfaces = watched;
        });
        return Ok(());
    }

    for (ifindex, port) in &watched {
        match previous.get(ifindex) {
            // New interfaces are cached without an event (suppression on
            // by default; there is nothing to compare against).
            None => {}
            Some(old)
                if old.oper_status != port.oper_status
                    || old.admin_status != port.admin_status =>
            {
                record_port_change(engine, device, port, Some(old), now);
            }
            Some(_) => {}
        }
    }

    engine.with_device_state(&device.name, |state| {
        state.interfaces = watched;
    });

    stabilize_flapping(engine, device, now);
    Ok(())
}

/// Confirming poll of a single interface, from POLLINTF or a link trap.
/// `ifindex` 0 refreshes the whole table.
pub async fn poll_interface(
    engine: &Engine,
    device: &PollDevice,
    client: &dyn SnmpClient,
    ifindex: u32,
) -> Result<(), SnmpError> {
    if ifindex == 0 {
        return run(engine, device, client).await;
    }

    let Some(port) = fetch_port(client, ifindex).await? else {
        debug!(device = %device.name, ifindex, "polled interface does not exist");
        return Ok(());
    };
    if !is_watched(device, &port.ifalias) {
        return Ok(());
    }

    let now = Utc::now();
    let old = engine
        .device_state(&device.name)
        .and_then(|state| state.interfaces.get(&ifindex).cloned());
    let changed = old.as_ref().is_some_and(|old| {
        old.oper_status != port.oper_status || old.admin_status != port.admin_status
    });
    if changed {
        record_port_change(engine, device, &port, old.as_ref(), now);
    }
    engine.with_device_state(&device.name, |state| {
        state.interfaces.insert(ifindex, port);
    });
    stabilize_flapping(engine, device, now);
    Ok(())
}

/// Fold one observed transition into flap tracking and the portstate
/// event for the port. Shared by the walking task and the link trap
/// handler; must stay await-free so callers can hold no locks across it.
pub(crate) fn record_port_change(
    engine: &Engine,
    device: &PollDevice,
    port: &Port,
    old: Option<&Port>,
    now: DateTime<Utc>,
) {
    let new_state = port_event_state(port);
    let old_state = old.map(port_event_state);

    let (flapstate, flaps_total, ac_down) = engine.with_flaps(|flaps| {
        let state = flaps.record_transition(&device.name, port.ifindex, now);
        if new_state == PortState::Down {
            flaps.note_down(&device.name, port.ifindex, now);
        } else {
            flaps.note_up(&device.name, port.ifindex, now);
        }
        let entry = flaps.get(&device.name, port.ifindex);
        (
            state,
            entry.map(|entry| entry.flaps_total).unwrap_or_default(),
            entry.map(|entry| entry.ac_down()).unwrap_or_default(),
        )
    });

    let existing = engine.events().find_open(
        &device.name,
        EventType::Portstate,
        &SubIndex::Interface(port.ifindex),
    );

    let transition_text = match old_state {
        Some(was) => format!(
            "{}: changed state from {} to {}",
            port.ifdescr, was, new_state
        ),
        None => format!("{}: state {}", port.ifdescr, new_state),
    };

    if flapstate == FlapState::Flapping {
        if let Some(mut event) = existing {
            // Flapping: bump counters on the one open event, no new events.
            if let EventDetails::Portstate {
                flaps,
                flapstate: event_flapstate,
                portstate,
                ac_down: event_ac_down,
                ..
            } = &mut event.details
            {
                *flaps = flaps_total;
                *event_flapstate = FlapState::Flapping;
                *portstate = new_state;
                *event_ac_down = ac_down;
            }
            event.add_log(now, transition_text);
            engine.events().commit(event, now);
            return;
        }
    }

    let (mut event, created) = engine.events().get_or_create(
        &device.name,
        EventDetails::Portstate {
            ifindex: port.ifindex,
            port: port.ifdescr.clone(),
            descr: port.ifalias.clone(),
            portstate: new_state,
            flaps: flaps_total,
            flapstate,
            ac_down,
        },
        now,
    );
    if created {
        engine.decorate_event(&mut event, device);
    }
    if let EventDetails::Portstate {
        port: event_port,
        descr,
        portstate,
        flaps,
        flapstate: event_flapstate,
        ac_down: event_ac_down,
        ..
    } = &mut event.details
    {
        event_port.clone_from(&port.ifdescr);
        descr.clone_from(&port.ifalias);
        *portstate = new_state;
        *flaps = flaps_total;
        *event_flapstate = flapstate;
        *event_ac_down = ac_down;
    }
    event.add_log(now, transition_text);
    if created {
        engine.open_event(event, now);
    } else {
        engine.events().commit(event, now);
    }
}

/// Move ports that went quiet back to stable, annotating their events.
fn stabilize_flapping(engine: &Engine, device: &PollDevice, now: DateTime<Utc>) {
    let flapping = engine.with_flaps(|flaps| flaps.flapping_ports(&device.name));
    for ifindex in flapping {
        let stabilized =
            engine.with_flaps(|flaps| flaps.check_stabilized(&device.name, ifindex, now));
        if !stabilized {
            continue;
        }
        let Some(mut event) = engine.events().find_open(
            &device.name,
            EventType::Portstate,
            &SubIndex::Interface(ifindex),
        ) else {
            continue;
        };
        let final_state = match &mut event.details {
            EventDetails::Portstate {
                flapstate,
                portstate,
                ..
            } => {
                *flapstate = FlapState::Stable;
                *portstate
            }
            _ => continue,
        };
        event.add_log(
            now,
            format!("flapping stopped; final state {final_state}"),
        );
        engine.events().commit(event, now);
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// The alias filter: ignored aliases are excluded, and a watch pattern,
/// when present, must match (substring-anywhere semantics).
fn is_watched(device: &PollDevice, ifalias: &str) -> bool {
    if let Some(ignore) = &device.ignore_pattern {
        if ignore.is_match(ifalias) {
            return false;
        }
    }
    if let Some(watch) = &device.watch_pattern {
        return watch.is_match(ifalias);
    }
    true
}

/// The event-facing state of a port: administratively down wins over
/// whatever the operational status says.
fn port_event_state(port: &Port) -> PortState {
    if port.admin_status == IfStatus::Down {
        return PortState::AdminDown;
    }
    match port.oper_status {
        IfStatus::Up => PortState::Up,
        IfStatus::Down | IfStatus::LowerLayerDown => PortState::Down,
        _ => PortState::Unknown,
    }
}

fn column_index(oid: &Oid, column: &[u32]) -> Option<u32> {
    match oid.strip_prefix(column) {
        Some([ifindex]) => Some(*ifindex),
        _ => None,
    }
}

async fn collect_interface_table(
    client: &dyn SnmpClient,
    max_rep: u32,
) -> Result<BTreeMap<u32, Port>, SnmpError> {
    let mut ports: BTreeMap<u32, Port> = BTreeMap::new();

    fn port_entry(ports: &mut BTreeMap<u32, Port>, ifindex: u32) -> &mut Port {
        ports.entry(ifindex).or_insert_with(|| Port {
            ifindex,
            ifdescr: String::new(),
            ifalias: String::new(),
            oper_status: IfStatus::Unknown,
            admin_status: IfStatus::Unknown,
            last_change: 0,
        })
    }

    for vb in walk(client, &Oid::from(oids::IF_DESCR), max_rep).await? {
        if let Some(ifindex) = column_index(&vb.oid, oids::IF_DESCR) {
            port_entry(&mut ports, ifindex).ifdescr = vb.value.as_text().unwrap_or_default();
        }
    }
    for vb in walk(client, &Oid::from(oids::IF_ALIAS), max_rep).await? {
        if let Some(ifindex) = column_index(&vb.oid, oids::IF_ALIAS) {
            port_entry(&mut ports, ifindex).ifalias = vb.value.as_text().unwrap_or_default();
        }
    }
    for vb in walk(client, &Oid::from(oids::IF_OPER_STATUS), max_rep).await? {
        if let Some(ifindex) = column_index(&vb.oid, oids::IF_OPER_STATUS) {
            port_entry(&mut ports, ifindex).oper_status =
                IfStatus::from_mib(vb.value.as_i64().unwrap_or(0));
        }
    }
    for vb in walk(client, &Oid::from(oids::IF_ADMIN_STATUS), max_rep).await? {
        if let Some(ifindex) = column_index(&vb.oid, oids::IF_ADMIN_STATUS) {
            port_entry(&mut ports, ifindex).admin_status =
                IfStatus::from_mib(vb.value.as_i64().unwrap_or(0));
        }
    }
    for vb in walk(client, &Oid::from(oids::IF_LAST_CHANGE), max_rep).await? {
        if let Some(ifindex) = column_index(&vb.oid, oids::IF_LAST_CHANGE) {
            port_entry(&mut ports, ifindex).last_change = vb.value.as_u32().unwrap_or(0);
        }
    }

    Ok(ports)
}

/// GET the interesting columns for one row of the interface table.
async fn fetch_port(client: &dyn SnmpClient, ifindex: u32) -> Result<Option<Port>, SnmpError> {
    let oper = match client
        .get(&Oid::from(oids::IF_OPER_STATUS).child(ifindex))
        .await
    {
        Ok(value) => IfStatus::from_mib(value.as_i64().unwrap_or(0)),
        Err(SnmpError::NoSuchObject(_)) => return Ok(None),
        Err(err) => return Err(err),
    };
    let admin = client
        .get(&Oid::from(oids::IF_ADMIN_STATUS).child(ifindex))
        .await
        .map(|value| IfStatus::from_mib(value.as_i64().unwrap_or(0)))
        .unwrap_or(IfStatus::Unknown);
    let ifdescr = client
        .get(&Oid::from(oids::IF_DESCR).child(ifindex))
        .await
        .ok()
        .and_then(|value| value.as_text())
        .unwrap_or_default();
    let ifalias = client
        .get(&Oid::from(oids::IF_ALIAS).child(ifindex))
        .await
        .ok()
        .and_then(|value| value.as_text())
        .unwrap_or_default();
    let last_change = client
        .get(&Oid::from(oids::IF_LAST_CHANGE).child(ifindex))
        .await
        .ok()
        .and_then(|value| value.as_u32())
        .unwrap_or_default();

    Ok(Some(Port {
        ifindex,
        ifdescr,
        ifalias,
        oper_status: oper,
        admin_status: admin,
        last_change,
    }))
}
