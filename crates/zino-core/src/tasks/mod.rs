// ── Polling tasks ──
//
// One battery run per device per polling cycle: the reachability probe
// runs first and gates everything else, then link state, BGP (when
// enabled), BFD, and chassis alarms (Juniper only). Runs for one device
// never overlap; the scheduler holds the device's run lock.

pub mod alarm;
pub mod bfd;
pub mod bgp;
pub mod linkstate;
pub mod reachable;

use tracing::{debug, warn};

use zino_config::PollDevice;
use zino_snmp::{Oid, SnmpClient, SnmpError, oids};

use crate::engine::Engine;

/// Run every scheduled task for `device`, in gating order.
pub async fn run_battery(engine: &Engine, device: &PollDevice) {
    let client = engine.client_for(device);
    probe_vendor(engine, device, client.as_ref()).await;

    if !reachable::run(engine, device, client.as_ref()).await {
        debug!(device = %device.name, "unreachable; skipping remaining tasks this cycle");
        return;
    }

    if let Err(err) = linkstate::run(engine, device, client.as_ref()).await {
        warn!(device = %device.name, %err, "link state poll failed");
    }
    if device.do_bgp {
        if let Err(err) = bgp::run(engine, device, client.as_ref()).await {
            warn!(device = %device.name, %err, "BGP poll failed");
        }
    }
    if let Err(err) = bfd::run(engine, device, client.as_ref()).await {
        warn!(device = %device.name, %err, "BFD poll failed");
    }

    let is_juniper = engine
        .device_state(&device.name)
        .is_some_and(|state| state.is_juniper);
    if is_juniper {
        if let Err(err) = alarm::run(engine, device, client.as_ref()).await {
            warn!(device = %device.name, %err, "alarm poll failed");
        }
    }
}

/// Classify the chassis vendor from sysObjectID, once per device.
pub async fn probe_vendor(engine: &Engine, device: &PollDevice, client: &dyn SnmpClient) {
    let probed = engine
        .device_state(&device.name)
        .is_some_and(|state| state.vendor_probed);
    if probed {
        return;
    }

    match client.get(&Oid::from(oids::SYS_OBJECT_ID)).await {
        Ok(value) => {
            let (is_juniper, is_cisco) = value.as_oid().map_or((false, false), |oid| {
                (
                    oid.starts_with(oids::ENTERPRISE_JUNIPER),
                    oid.starts_with(oids::ENTERPRISE_CISCO),
                )
            });
            engine.with_device_state(&device.name, |state| {
                state.is_juniper = is_juniper;
                state.is_cisco = is_cisco;
                state.vendor_probed = true;
            });
            debug!(device = %device.name, is_juniper, is_cisco, "vendor probe complete");
        }
        Err(SnmpError::Timeout) => {
            // No answer at all; try again next cycle.
        }
        Err(err) => {
            debug!(device = %device.name, %err, "vendor probe unanswered");
            engine.with_device_state(&device.name, |state| {
                state.vendor_probed = true;
            });
        }
    }
}
