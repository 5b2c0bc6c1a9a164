// ── Trap dispatch ──
//
// Decoded notifications arrive on the trap channel; each is attributed
// to a device by source address and routed to a type-specific handler.
// Handlers update caches and enqueue a confirming poll rather than
// trusting trap contents outright (trap-directed polling); link traps
// additionally fold the reported transition into the portstate event so
// operators see it before the confirming poll lands.

pub mod bgp;
pub mod bfd;
pub mod link;
pub mod logged;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use zino_snmp::{TrapMessage, TrapReceiver, oids};

use crate::engine::Engine;

/// Consume the trap channel until cancellation or channel close.
pub async fn dispatch_loop(engine: Engine, mut traps: TrapReceiver, cancel: CancellationToken) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            message = traps.recv() => match message {
                Some(message) => dispatch(&engine, message).await,
                None => break,
            },
        }
    }
}

pub async fn dispatch(engine: &Engine, message: TrapMessage) {
    let required = &engine.config().snmp.trap.require_community;
    if !required.is_empty() && !required.contains(&message.community) {
        debug!(source = %message.source, "trap community not accepted; dropped");
        return;
    }

    let registry = engine.registry();
    let Some(device) = registry.device_for_address(message.source) else {
        debug!(source = %message.source, trap = %message.trap_oid, "trap from unknown source");
        return;
    };

    let trap_oid = message.trap_oid.as_slice();
    if trap_oid == oids::TRAP_LINK_DOWN {
        link::handle(engine, device, &message, false);
    } else if trap_oid == oids::TRAP_LINK_UP {
        link::handle(engine, device, &message, true);
    } else if trap_oid == oids::TRAP_BGP_ESTABLISHED
        || trap_oid == oids::TRAP_BGP_BACKWARD_TRANSITION
        || trap_oid == oids::TRAP_JNX_BGP_M2_ESTABLISHED
        || trap_oid == oids::TRAP_JNX_BGP_M2_BACKWARD_TRANSITION
    {
        bgp::handle(engine, device, &message);
    } else if trap_oid == oids::TRAP_BFD_SESS_UP || trap_oid == oids::TRAP_BFD_SESS_DOWN {
        bfd::handle(engine, device, &message);
    } else if trap_oid == oids::TRAP_COLD_START
        || trap_oid == oids::TRAP_WARM_START
        || trap_oid == oids::TRAP_CISCO_CONFIG_MAN_EVENT
        || trap_oid == oids::TRAP_OSPF_IF_CONFIG_ERROR
    {
        logged::handle(engine, device, &message);
    } else {
        debug!(
            device = %device.name,
            trap = %message.trap_oid,
            "no handler for trap; ignored"
        );
    }
}


#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::testutil::trap;
    use super::*;
    use crate::tasks::testutil::{device, engine_with_mock, registry_for};

    #[tokio::test]
    async fn traps_from_unknown_sources_are_dropped() {
        let (engine, _mock) = engine_with_mock();
        let device = device("sw1");
        engine.apply_registry(registry_for(&device));

        dispatch(&engine, trap("192.0.2.99", oids::TRAP_LINK_DOWN, Vec::new())).await;
        assert!(engine.events().open_ids().is_empty());
    }

    #[tokio::test]
    async fn community_filter_rejects_unlisted_communities() {
        let mut config = zino_config::Configuration::default();
        config.snmp.trap.require_community = vec!["secret".into()];
        let factory: zino_snmp::ClientFactory =
            std::sync::Arc::new(|_params| std::sync::Arc::new(zino_snmp::MockSnmp::new()));
        let engine = Engine::new(config, factory);

        let device = device("sw1");
        engine.apply_registry(registry_for(&device));

        // community "public" is not in the accept list
        dispatch(&engine, trap("10.0.0.1", oids::TRAP_LINK_DOWN, Vec::new())).await;
        assert!(engine.events().open_ids().is_empty());
    }
}
