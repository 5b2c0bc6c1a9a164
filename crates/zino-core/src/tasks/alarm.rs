// ── Juniper chassis alarms ──
//
// Polls the red and yellow alarm counters. A 0 -> N transition opens an
// alarm event for that color; N -> 0 only annotates the open event.
// The first successful poll establishes the baseline.

use chrono::{DateTime, Utc};

use zino_config::PollDevice;
use zino_snmp::{Oid, SnmpClient, SnmpError, oids};

use crate::engine::Engine;
use crate::model::device::AlarmCount;
use crate::model::event::{AlarmColor, EventDetails, EventType, SubIndex};

pub async fn run(
    engine: &Engine,
    device: &PollDevice,
    client: &dyn SnmpClient,
) -> Result<(), SnmpError> {
    let yellow = get_count(client, oids::JNX_YELLOW_ALARM_COUNT).await?;
    let red = get_count(client, oids::JNX_RED_ALARM_COUNT).await?;
    let counts = AlarmCount { red, yellow };

    let now = Utc::now();
    let previous = engine
        .device_state(&device.name)
        .and_then(|state| state.alarms);
    engine.with_device_state(&device.name, |state| {
        state.alarms = Some(counts);
    });

    let Some(previous) = previous else {
        return Ok(());
    };

    apply_color(engine, device, AlarmColor::Yellow, previous.yellow, yellow, now);
    apply_color(engine, device, AlarmColor::Red, previous.red, red, now);
    Ok(())
}

async fn get_count(client: &dyn SnmpClient, oid: &[u32]) -> Result<u32, SnmpError> {
    match client.get(&Oid::from(oid)).await {
        Ok(value) => Ok(value.as_u32().unwrap_or(0)),
        // Some chassis lack one of the scalars.
        Err(SnmpError::NoSuchObject(_)) => Ok(0),
        Err(err) => Err(err),
    }
}

fn apply_color(
    engine: &Engine,
    device: &PollDevice,
    color: AlarmColor,
    old: u32,
    new: u32,
    now: DateTime<Utc>,
) {
    if old == new {
        return;
    }

    if old == 0 && new > 0 {
        let (mut event, created) = engine.events().get_or_create(
            &device.name,
            EventDetails::Alarm {
                alarm_type: color,
                alarm_count: new,
            },
            now,
        );
        if created {
            engine.decorate_event(&mut event, device);
        } else if let EventDetails::Alarm { alarm_count, .. } = &mut event.details {
            *alarm_count = new;
        }
        event.add_log(now, format!("{color} alarms went from {old} to {new}"));
        if created {
            engine.open_event(event, now);
        } else {
            engine.events().commit(event, now);
        }
        return;
    }

    // Count moved on an existing condition (including back to zero).
    let Some(mut event) =
        engine
            .events()
            .find_open(&device.name, EventType::Alarm, &SubIndex::Alarm(color))
    else {
        return;
    };
    if let EventDetails::Alarm { alarm_count, .. } = &mut event.details {
        *alarm_count = new;
    }
    event.add_log(now, format!("alarms went from {old} to {new}"));
    engine.events().commit(event, now);
}
