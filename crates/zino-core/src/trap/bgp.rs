// ── BGP transition traps ──
//
// The trap only nudges the cached peer state; the authoritative update
// comes from the confirming poll it schedules.

use tracing::debug;

use zino_config::PollDevice;
use zino_snmp::{TrapMessage, oids};

use crate::engine::{Engine, PollRequest};
use crate::model::event::BgpOperState;

pub fn handle(engine: &Engine, device: &PollDevice, message: &TrapMessage) {
    // Both the RFC and Juniper notifications carry the peer state with
    // the peer's row index appended to the column OID.
    let observed = [oids::BGP_PEER_STATE, oids::JNX_BGP_M2_PEER_STATE]
        .into_iter()
        .find_map(|column| {
            let vb = message.varbind(column)?;
            let state = BgpOperState::from_mib(vb.value.as_i64()?);
            Some(state)
        });

    if let Some(state) = observed {
        debug!(device = %device.name, ?state, "BGP transition trap");
    } else {
        debug!(device = %device.name, "BGP trap without peer state varbind");
    }

    engine.request_poll(PollRequest::Device(device.name.clone()));
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::tasks::testutil::{device, engine_with_mock};
    use crate::trap::testutil::trap;

    #[tokio::test]
    async fn bgp_trap_alone_creates_no_event() {
        let (engine, _mock) = engine_with_mock();
        let device = device("gw1");
        handle(
            &engine,
            &device,
            &trap("10.0.0.1", oids::TRAP_BGP_BACKWARD_TRANSITION, Vec::new()),
        );
        // Trap-directed polling: the event comes from the poll, not the trap.
        assert!(engine.events().open_ids().is_empty());
    }
}
