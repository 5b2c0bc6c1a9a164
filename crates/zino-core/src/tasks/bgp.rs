// ── BGP peering monitor ──
//
// Devices answer one of three MIB families; a one-time probe picks the
// style (Juniper BGP4-V2, then Cisco, then plain RFC BGP4) and the walk
// joins the peer table columns by row index. A peer leaving established,
// or being administratively halted, gets a bgp event; returning to
// established only annotates the open event.

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use chrono::Utc;
use tracing::debug;

use zino_config::PollDevice;
use zino_snmp::{Oid, SnmpClient, SnmpError, oids, walk};

use crate::engine::Engine;
use crate::model::device::{BgpPeer, BgpStyle};
use crate::model::event::{
    BgpAdminStatus, BgpOperState, EventDetails, EventType, SubIndex,
};

pub async fn run(
    engine: &Engine,
    device: &PollDevice,
    client: &dyn SnmpClient,
) -> Result<(), SnmpError> {
    let style = match engine
        .device_state(&device.name)
        .and_then(|state| state.bgp_style)
    {
        Some(style) => style,
        None => match probe_style(client).await? {
            Some(style) => {
                debug!(device = %device.name, ?style, "BGP MIB style selected");
                engine.with_device_state(&device.name, |state| {
                    state.bgp_style = Some(style);
                });
                style
            }
            None => {
                debug!(device = %device.name, "no BGP MIB answered");
                return Ok(());
            }
        },
    };

    let max_rep = device.session_params().max_repetitions;
    let peers = walk_peers(client, style, max_rep).await?;
    if peers.is_empty() {
        // The cached style stopped answering; re-probe next cycle.
        engine.with_device_state(&device.name, |state| {
            state.bgp_style = None;
        });
        return Ok(());
    }

    let now = Utc::now();
    let previous = engine
        .device_state(&device.name)
        .map(|state| state.bgp_peers)
        .unwrap_or_default();

    for (peer_id, peer) in &peers {
        let old = previous.get(peer_id);
        let down = peer.oper_state != BgpOperState::Established
            || peer.admin_status != BgpAdminStatus::Running;

        if down {
            let (mut event, created) = engine.events().get_or_create(
                &device.name,
                EventDetails::Bgp {
                    peer: peer_id.clone(),
                    remote_addr: peer.remote_addr,
                    remote_as: peer.remote_as,
                    peer_uptime: peer.uptime,
                    operational_state: peer.oper_state,
                    admin_status: peer.admin_status,
                },
                now,
            );
            if created {
                engine.decorate_event(&mut event, device);
                event.add_log(
                    now,
                    format!(
                        "peer {peer_id} (AS{}) is {} (admin {})",
                        peer.remote_as, peer.oper_state, peer.admin_status
                    ),
                );
                engine.open_event(event, now);
            } else {
                let previously = match &event.details {
                    EventDetails::Bgp {
                        operational_state, ..
                    } => *operational_state,
                    _ => peer.oper_state,
                };
                update_details(&mut event, peer);
                if previously != peer.oper_state {
                    event.add_log(now, format!("peer {peer_id} is {}", peer.oper_state));
                }
                engine.events().commit(event, now);
            }
        } else if let Some(mut event) = engine.events().find_open(
            &device.name,
            EventType::Bgp,
            &SubIndex::Peer(peer_id.clone()),
        ) {
            let was_down = match &event.details {
                EventDetails::Bgp {
                    operational_state, ..
                } => *operational_state != BgpOperState::Established,
                _ => false,
            };
            update_details(&mut event, peer);
            if was_down {
                event.add_log(
                    now,
                    format!(
                        "peer {peer_id} is established again (uptime {}s)",
                        peer.uptime
                    ),
                );
            }
            engine.events().commit(event, now);
        } else if old.is_some_and(|old| peer.uptime < old.uptime && old.uptime > 0) {
            // Established on both polls but the uptime reset: the session
            // bounced between polls.
            debug!(device = %device.name, peer = %peer_id, "peer uptime reset between polls");
        }
    }

    engine.with_device_state(&device.name, |state| {
        state.bgp_peers = peers;
    });
    Ok(())
}

fn update_details(event: &mut crate::model::event::Event, peer: &BgpPeer) {
    if let EventDetails::Bgp {
        remote_addr,
        remote_as,
        peer_uptime,
        operational_state,
        admin_status,
        ..
    } = &mut event.details
    {
        *remote_addr = peer.remote_addr.or(*remote_addr);
        if peer.remote_as != 0 {
            *remote_as = peer.remote_as;
        }
        *peer_uptime = peer.uptime;
        *operational_state = peer.oper_state;
        *admin_status = peer.admin_status;
    }
}

// ── MIB style handling ──────────────────────────────────────────────

struct StyleColumns {
    state: &'static [u32],
    admin: &'static [u32],
    remote_as: &'static [u32],
    uptime: &'static [u32],
    remote_addr: Option<&'static [u32]>,
}

fn columns(style: BgpStyle) -> StyleColumns {
    match style {
        BgpStyle::Juniper => StyleColumns {
            state: oids::JNX_BGP_M2_PEER_STATE,
            admin: oids::JNX_BGP_M2_PEER_STATUS,
            remote_as: oids::JNX_BGP_M2_PEER_REMOTE_AS,
            uptime: oids::JNX_BGP_M2_PEER_FSM_ESTABLISHED_TIME,
            remote_addr: Some(oids::JNX_BGP_M2_PEER_REMOTE_ADDR),
        },
        BgpStyle::Cisco => StyleColumns {
            state: oids::CBGP_PEER2_STATE,
            admin: oids::CBGP_PEER2_ADMIN_STATUS,
            remote_as: oids::CBGP_PEER2_REMOTE_AS,
            uptime: oids::CBGP_PEER2_FSM_ESTABLISHED_TIME,
            remote_addr: None,
        },
        BgpStyle::Rfc => StyleColumns {
            state: oids::BGP_PEER_STATE,
            admin: oids::BGP_PEER_ADMIN_STATUS,
            remote_as: oids::BGP_PEER_REMOTE_AS,
            uptime: oids::BGP_PEER_FSM_ESTABLISHED_TIME,
            remote_addr: Some(oids::BGP_PEER_REMOTE_ADDR),
        },
    }
}

async fn probe_style(client: &dyn SnmpClient) -> Result<Option<BgpStyle>, SnmpError> {
    for style in [BgpStyle::Juniper, BgpStyle::Cisco, BgpStyle::Rfc] {
        let column = columns(style).state;
        match client.get_next(&Oid::from(column)).await {
            Ok(vb)
                if vb.oid.starts_with(column)
                    && vb.value != zino_snmp::SnmpValue::EndOfMibView =>
            {
                return Ok(Some(style));
            }
            Ok(_) => {}
            Err(SnmpError::NoSuchObject(_)) => {}
            Err(err) => return Err(err),
        }
    }
    Ok(None)
}

async fn walk_peers(
    client: &dyn SnmpClient,
    style: BgpStyle,
    max_rep: u32,
) -> Result<BTreeMap<String, BgpPeer>, SnmpError> {
    let cols = columns(style);
    let mut rows: BTreeMap<Vec<u32>, BgpPeer> = BTreeMap::new();

    fn row<'a>(
        rows: &'a mut BTreeMap<Vec<u32>, BgpPeer>,
        style: BgpStyle,
        suffix: &[u32],
    ) -> &'a mut BgpPeer {
        rows.entry(suffix.to_vec()).or_insert_with(|| {
            let (peer_id, remote_addr) = peer_identity(style, suffix);
            BgpPeer {
                peer_id,
                remote_addr,
                remote_as: 0,
                oper_state: BgpOperState::Idle,
                admin_status: BgpAdminStatus::Running,
                uptime: 0,
            }
        })
    }

    for vb in walk(client, &Oid::from(cols.state), max_rep).await? {
        if let Some(suffix) = vb.oid.strip_prefix(cols.state) {
            row(&mut rows, style, suffix).oper_state =
                BgpOperState::from_mib(vb.value.as_i64().unwrap_or(1));
        }
    }
    for vb in walk(client, &Oid::from(cols.admin), max_rep).await? {
        if let Some(suffix) = vb.oid.strip_prefix(cols.admin) {
            row(&mut rows, style, suffix).admin_status =
                BgpAdminStatus::from_mib(vb.value.as_i64().unwrap_or(2));
        }
    }
    for vb in walk(client, &Oid::from(cols.remote_as), max_rep).await? {
        if let Some(suffix) = vb.oid.strip_prefix(cols.remote_as) {
            row(&mut rows, style, suffix).remote_as = vb.value.as_u32().unwrap_or(0);
        }
    }
    for vb in walk(client, &Oid::from(cols.uptime), max_rep).await? {
        if let Some(suffix) = vb.oid.strip_prefix(cols.uptime) {
            row(&mut rows, style, suffix).uptime = vb.value.as_u32().unwrap_or(0);
        }
    }
    if let Some(addr_col) = cols.remote_addr {
        for vb in walk(client, &Oid::from(addr_col), max_rep).await? {
            if let Some(suffix) = vb.oid.strip_prefix(addr_col) {
                if let Some(addr) = value_as_addr(&vb.value) {
                    row(&mut rows, style, suffix).remote_addr = Some(addr);
                }
            }
        }
    }

    Ok(rows
        .into_values()
        .map(|peer| (peer.peer_id.clone(), peer))
        .collect())
}

/// Render a table-row index as the peer's subindex string, recovering
/// the remote address where the index encodes one.
fn peer_identity(style: BgpStyle, suffix: &[u32]) -> (String, Option<IpAddr>) {
    match style {
        BgpStyle::Rfc => {
            if let Some(addr) = subids_as_ipv4(suffix) {
                return (addr.to_string(), Some(IpAddr::V4(addr)));
            }
            (hex_key(suffix), None)
        }
        BgpStyle::Cisco => {
            // cbgpPeer2Entry index: afi, address length, address bytes.
            match suffix {
                [1, 4, rest @ ..] => {
                    if let Some(addr) = subids_as_ipv4(rest) {
                        return (addr.to_string(), Some(IpAddr::V4(addr)));
                    }
                    (hex_key(suffix), None)
                }
                [2, 16, rest @ ..] if rest.len() == 16 => {
                    let mut bytes = [0u8; 16];
                    for (slot, subid) in bytes.iter_mut().zip(rest) {
                        *slot = u8::try_from(*subid).unwrap_or(0);
                    }
                    let addr = Ipv6Addr::from(bytes);
                    (addr.to_string(), Some(IpAddr::V6(addr)))
                }
                _ => (hex_key(suffix), None),
            }
        }
        // The Juniper index interleaves routing instance and both
        // endpoint addresses; keep it opaque and rely on the
        // remote-address column for the IP.
        BgpStyle::Juniper => (hex_key(suffix), None),
    }
}

fn subids_as_ipv4(subids: &[u32]) -> Option<Ipv4Addr> {
    match subids {
        [a, b, c, d] => Some(Ipv4Addr::new(
            u8::try_from(*a).ok()?,
            u8::try_from(*b).ok()?,
            u8::try_from(*c).ok()?,
            u8::try_from(*d).ok()?,
        )),
        _ => None,
    }
}

fn hex_key(subids: &[u32]) -> String {
    subids
        .iter()
        .map(|subid| format!("{subid:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}

fn value_as_addr(value: &zino_snmp::SnmpValue) -> Option<IpAddr> {
    if let Some(addr) = value.as_ip() {
        return Some(addr);
    }
    match value {
        zino_snmp::SnmpValue::OctetString(bytes) if bytes.len() == 4 => {
            let octets: [u8; 4] = bytes.as_slice().try_into().ok()?;
            Some(IpAddr::V4(Ipv4Addr::from(octets)))
        }
        zino_snmp::SnmpValue::OctetString(bytes) if bytes.len() == 16 => {
            let octets: [u8; 16] = bytes.as_slice().try_into().ok()?;
            Some(IpAddr::V6(Ipv6Addr::from(octets)))
        }
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::event::EventState;
    use crate::tasks::testutil::{device, engine_with_mock};
    use zino_snmp::{MockSnmp, SnmpValue};

    /// Seed one RFC-style peer keyed by its IPv4 address.
    fn seed_rfc_peer(mock: &MockSnmp, ip: [u32; 4], state: i64, admin: i64, asn: u32, uptime: u32) {
        let suffix = |column: &[u32]| {
            let mut subids = column.to_vec();
            subids.extend_from_slice(&ip);
            Oid::new(subids)
        };
        mock.set(suffix(oids::BGP_PEER_STATE), SnmpValue::Integer(state));
        mock.set(suffix(oids::BGP_PEER_ADMIN_STATUS), SnmpValue::Integer(admin));
        mock.set(suffix(oids::BGP_PEER_REMOTE_AS), SnmpValue::Integer(i64::from(asn)));
        mock.set(
            suffix(oids::BGP_PEER_FSM_ESTABLISHED_TIME),
            SnmpValue::Gauge32(uptime),
        );
    }

    #[tokio::test]
    async fn down_peer_creates_bgp_event() {
        let (engine, mock) = engine_with_mock();
        let device = device("auroralane-gw1");
        // oper-state active(3)
        seed_rfc_peer(&mock, [10, 0, 9, 1], 3, 2, 100, 0);

        let client = engine.client_for(&device);
        run(&engine, &device, client.as_ref()).await.unwrap();

        let ids = engine.events().open_ids();
        assert_eq!(ids.len(), 1);
        let event = engine.events().get(ids[0]).unwrap();
        assert_eq!(event.state, EventState::Open);
        let attrs = event.attr_map();
        assert_eq!(attrs["remote-AS"], "100");
        assert_eq!(attrs["bgpOS"], "active");
        assert_eq!(attrs["bgpAS"], "running");
        assert_eq!(attrs["remote-addr"], "10.0.9.1");
    }

    #[tokio::test]
    async fn reestablished_peer_updates_but_does_not_close() {
        let (engine, mock) = engine_with_mock();
        let device = device("auroralane-gw1");
        seed_rfc_peer(&mock, [10, 0, 9, 1], 3, 2, 100, 0);
        let client = engine.client_for(&device);
        run(&engine, &device, client.as_ref()).await.unwrap();

        seed_rfc_peer(&mock, [10, 0, 9, 1], 6, 2, 100, 42);
        run(&engine, &device, client.as_ref()).await.unwrap();

        let ids = engine.events().open_ids();
        assert_eq!(ids.len(), 1);
        let event = engine.events().get(ids[0]).unwrap();
        assert_eq!(event.state, EventState::Open);
        assert_eq!(event.attr_map()["bgpOS"], "established");
        assert!(
            event
                .log
                .iter()
                .any(|entry| entry.text.contains("established again"))
        );
    }

    #[tokio::test]
    async fn established_running_peers_are_quiet() {
        let (engine, mock) = engine_with_mock();
        let device = device("auroralane-gw1");
        seed_rfc_peer(&mock, [10, 0, 9, 1], 6, 2, 100, 900);
        let client = engine.client_for(&device);
        run(&engine, &device, client.as_ref()).await.unwrap();
        assert!(engine.events().open_ids().is_empty());

        let state = engine.device_state("auroralane-gw1").unwrap();
        assert_eq!(state.bgp_style, Some(BgpStyle::Rfc));
        assert_eq!(state.bgp_peers.len(), 1);
    }

    #[tokio::test]
    async fn halted_peer_raises_event_even_when_established_once() {
        let (engine, mock) = engine_with_mock();
        let device = device("auroralane-gw1");
        // admin stop(1)
        seed_rfc_peer(&mock, [10, 0, 9, 1], 6, 1, 64512, 0);
        let client = engine.client_for(&device);
        run(&engine, &device, client.as_ref()).await.unwrap();

        let ids = engine.events().open_ids();
        assert_eq!(ids.len(), 1);
        assert_eq!(
            engine.events().get(ids[0]).unwrap().attr_map()["bgpAS"],
            "halted"
        );
    }

    #[test]
    fn cisco_index_decodes_ipv4() {
        let (key, addr) = peer_identity(BgpStyle::Cisco, &[1, 4, 192, 0, 2, 1]);
        assert_eq!(key, "192.0.2.1");
        assert_eq!(addr, Some("192.0.2.1".parse().unwrap()));
    }

    #[test]
    fn juniper_index_is_opaque_hex() {
        let (key, addr) = peer_identity(BgpStyle::Juniper, &[0x30, 0x00, 0x04, 0xAB, 0xAA]);
        assert_eq!(key, "30:00:04:AB:AA");
        assert_eq!(addr, None);
    }
}
