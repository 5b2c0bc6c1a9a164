// ── linkDown / linkUp traps ──

use chrono::Utc;
use tracing::debug;

use zino_config::PollDevice;
use zino_snmp::{TrapMessage, oids};

use crate::engine::{Engine, PollRequest};
use crate::model::device::IfStatus;
use crate::tasks::linkstate::record_port_change;

/// Fold a link trap into the port cache and its portstate event, then
/// schedule a confirming poll of the interface.
pub fn handle(engine: &Engine, device: &PollDevice, message: &TrapMessage, up: bool) {
    let Some(ifindex) = message
        .varbind(oids::IF_INDEX)
        .and_then(|vb| vb.value.as_u32())
    else {
        debug!(device = %device.name, "link trap without ifIndex varbind");
        return;
    };

    let now = Utc::now();
    let oper = if up { IfStatus::Up } else { IfStatus::Down };
    let admin = message
        .varbind(oids::IF_ADMIN_STATUS)
        .and_then(|vb| vb.value.as_i64())
        .map(IfStatus::from_mib);

    let cached = engine
        .device_state(&device.name)
        .and_then(|state| state.interfaces.get(&ifindex).cloned());

    if let Some(old) = cached {
        let mut port = old.clone();
        port.oper_status = oper;
        if let Some(admin) = admin {
            port.admin_status = admin;
        }
        if port.oper_status != old.oper_status || port.admin_status != old.admin_status {
            record_port_change(engine, device, &port, Some(&old), now);
            engine.with_device_state(&device.name, |state| {
                state.interfaces.insert(ifindex, port);
            });
        }
    } else {
        // Unknown (or unwatched) port; the confirming poll decides.
        debug!(device = %device.name, ifindex, "link trap for port not in cache");
    }

    engine.request_poll(PollRequest::Interface(device.name.clone(), ifindex));
}
