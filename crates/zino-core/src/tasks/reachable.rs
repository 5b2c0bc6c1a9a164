// ── Reachability task ──
//
// One small GET per cycle. Failures only become an event after the
// configured number of consecutive misses; success marks the condition
// cleared on the open event but never closes it (closure is the
// operator's call).

use chrono::Utc;
use tracing::{debug, info};

use zino_config::PollDevice;
use zino_snmp::{Oid, SnmpClient, oids};

use crate::engine::Engine;
use crate::model::event::{EventDetails, EventType, ReachabilityState, SubIndex};

/// Probe the device. Returns whether it answered, which gates the rest
/// of the battery for this cycle.
pub async fn run(engine: &Engine, device: &PollDevice, client: &dyn SnmpClient) -> bool {
    let now = Utc::now();
    match client.get(&Oid::from(oids::SYS_UPTIME)).await {
        Ok(value) => {
            let ticks = value.as_u32().unwrap_or(0);
            let rebooted = engine.with_device_state(&device.name, |state| {
                let rebooted = state.last_sysuptime.is_some_and(|previous| ticks < previous);
                state.last_sysuptime = Some(ticks);
                state.reachable_in_last_run = true;
                state.unreachable_count = 0;
                rebooted
            });
            if rebooted {
                info!(device = %device.name, "sysUpTime went backwards; device probably rebooted");
            }

            if let Some(mut event) = engine.events().find_open(
                &device.name,
                EventType::Reachability,
                &SubIndex::None,
            ) {
                if let EventDetails::Reachability { reachability } = &mut event.details {
                    if *reachability != ReachabilityState::Reachable {
                        *reachability = ReachabilityState::Reachable;
                        event.add_log(now, format!("{} is reachable again", device.name));
                        if rebooted {
                            event.add_log(now, format!("{} probably rebooted", device.name));
                        }
                        engine.events().commit(event, now);
                    }
                }
            }
            true
        }
        Err(err) => {
            let count = engine.with_device_state(&device.name, |state| {
                state.reachable_in_last_run = false;
                state.unreachable_count = state.unreachable_count.saturating_add(1);
                state.unreachable_count
            });
            debug!(device = %device.name, %err, count, "reachability probe failed");

            if count >= engine.tuning().unreachable_threshold {
                let (mut event, created) = engine.events().get_or_create(
                    &device.name,
                    EventDetails::Reachability {
                        reachability: ReachabilityState::NoResponse,
                    },
                    now,
                );
                if created {
                    engine.decorate_event(&mut event, device);
                    event.add_log(now, format!("{} no-response", device.name));
                    engine.open_event(event, now);
                } else if let EventDetails::Reachability { reachability } = &mut event.details {
                    if *reachability != ReachabilityState::NoResponse {
                        *reachability = ReachabilityState::NoResponse;
                        event.add_log(now, format!("{} no-response", device.name));
                        engine.events().commit(event, now);
                    }
                }
            }
            false
        }
    }
}
