// ── BFD session traps ──

use tracing::debug;

use zino_config::PollDevice;
use zino_snmp::{TrapMessage, oids};

use crate::engine::{Engine, PollRequest};
use crate::model::event::BfdState;

pub fn handle(engine: &Engine, device: &PollDevice, message: &TrapMessage) {
    // Update the cached session state when the varbind names a session
    // we know; the scheduled poll re-reads the table authoritatively.
    if let Some(vb) = message.varbind(oids::BFD_SESS_STATE) {
        let index = vb
            .oid
            .strip_prefix(oids::BFD_SESS_STATE)
            .and_then(|suffix| suffix.first().copied());
        let state = vb.value.as_i64().map(BfdState::from_mib);
        if let (Some(index), Some(state)) = (index, state) {
            engine.with_device_state(&device.name, |device_state| {
                if let Some(session) = device_state.bfd_sessions.get_mut(&index) {
                    session.state = state;
                }
            });
            debug!(device = %device.name, index, %state, "BFD session trap");
        }
    }

    engine.request_poll(PollRequest::Device(device.name.clone()));
}
