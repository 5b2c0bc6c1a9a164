// ── Logged-only traps ──
//
// Notifications with no state machine of their own: restarts, config
// changes, OSPF interface errors. The text lands on the device's open
// reachability event when one exists, otherwise in the daemon log.

use chrono::Utc;
use tracing::info;

use zino_config::PollDevice;
use zino_snmp::{TrapMessage, oids};

use crate::engine::Engine;
use crate::model::event::{EventType, SubIndex};

pub fn handle(engine: &Engine, device: &PollDevice, message: &TrapMessage) {
    let trap_oid = message.trap_oid.as_slice();
    let text = if trap_oid == oids::TRAP_COLD_START {
        "coldStart trap received; device restarted"
    } else if trap_oid == oids::TRAP_WARM_START {
        "warmStart trap received; device reloaded"
    } else if trap_oid == oids::TRAP_CISCO_CONFIG_MAN_EVENT {
        "configuration change logged on device"
    } else if trap_oid == oids::TRAP_OSPF_IF_CONFIG_ERROR {
        "OSPF interface configuration error reported"
    } else {
        return;
    };

    let now = Utc::now();
    if let Some(mut event) =
        engine
            .events()
            .find_open(&device.name, EventType::Reachability, &SubIndex::None)
    {
        event.add_log(now, text);
        engine.events().commit(event, now);
    } else {
        info!(device = %device.name, text, "trap logged");
    }
}
