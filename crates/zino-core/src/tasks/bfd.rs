// ── BFD session monitor ──
//
// Walks the BFD session table and raises a bfd event for every session
// not in up state. Reverse DNS for the neighbor happens before
// `get_or_create`, so a trap handler racing us never sees a half-built
// event.

use std::collections::BTreeMap;

use chrono::Utc;
use tracing::debug;

use zino_config::PollDevice;
use zino_snmp::{Oid, SnmpClient, SnmpError, SnmpValue, oids, walk};

use crate::dns;
use crate::engine::Engine;
use crate::model::device::BfdSession;
use crate::model::event::{BfdState, EventDetails, EventType, SubIndex};

pub async fn run(
    engine: &Engine,
    device: &PollDevice,
    client: &dyn SnmpClient,
) -> Result<(), SnmpError> {
    let max_rep = device.session_params().max_repetitions;
    let sessions = walk_sessions(client, max_rep).await?;
    let now = Utc::now();

    for (index, session) in &sessions {
        let subindex = SubIndex::BfdSession(session.discriminator);

        if session.state != BfdState::Up {
            // Resolve the neighbor name before touching the event store.
            let neigh_rdns = match session.addr {
                Some(addr) => dns::reverse_lookup(addr).await.unwrap_or_default(),
                None => String::new(),
            };

            let (mut event, created) = engine.events().get_or_create(
                &device.name,
                EventDetails::Bfd {
                    session_discr: session.discriminator,
                    bfd_state: session.state,
                    bfd_addr: session.addr,
                    bfd_discr: Some(session.discriminator),
                    neigh_rdns,
                },
                now,
            );
            if created {
                engine.decorate_event(&mut event, device);
                event.add_log(
                    now,
                    format!("BFD session {index} is {}", session.state),
                );
                engine.open_event(event, now);
            } else {
                let changed = match &event.details {
                    EventDetails::Bfd { bfd_state, .. } => *bfd_state != session.state,
                    _ => false,
                };
                update_details(&mut event, session);
                if changed {
                    event.add_log(now, format!("BFD session {index} is {}", session.state));
                }
                engine.events().commit(event, now);
            }
        } else if let Some(mut event) =
            engine
                .events()
                .find_open(&device.name, EventType::Bfd, &subindex)
        {
            let was_down = match &event.details {
                EventDetails::Bfd { bfd_state, .. } => *bfd_state != BfdState::Up,
                _ => false,
            };
            update_details(&mut event, session);
            if was_down {
                event.add_log(now, format!("BFD session {index} is up again"));
            }
            engine.events().commit(event, now);
        }
    }

    if !sessions.is_empty() {
        debug!(device = %device.name, sessions = sessions.len(), "BFD table walked");
    }
    engine.with_device_state(&device.name, |state| {
        state.bfd_sessions = sessions;
    });
    Ok(())
}

fn update_details(event: &mut crate::model::event::Event, session: &BfdSession) {
    if let EventDetails::Bfd {
        bfd_state,
        bfd_addr,
        bfd_discr,
        ..
    } = &mut event.details
    {
        *bfd_state = session.state;
        *bfd_addr = session.addr.or(*bfd_addr);
        *bfd_discr = Some(session.discriminator);
    }
}

async fn walk_sessions(
    client: &dyn SnmpClient,
    max_rep: u32,
) -> Result<BTreeMap<u32, BfdSession>, SnmpError> {
    let mut sessions: BTreeMap<u32, BfdSession> = BTreeMap::new();

    fn session_entry(
        sessions: &mut BTreeMap<u32, BfdSession>,
        index: u32,
    ) -> &mut BfdSession {
        sessions.entry(index).or_insert_with(|| BfdSession {
            // Until the discriminator column answers, key events by the
            // table index.
            discriminator: index,
            state: BfdState::Down,
            addr: None,
            addr_type: None,
        })
    }

    fn row_index(oid: &Oid, column: &[u32]) -> Option<u32> {
        match oid.strip_prefix(column) {
            Some([index]) => Some(*index),
            _ => None,
        }
    }

    for vb in walk(client, &Oid::from(oids::BFD_SESS_STATE), max_rep).await? {
        if let Some(index) = row_index(&vb.oid, oids::BFD_SESS_STATE) {
            session_entry(&mut sessions, index).state =
                BfdState::from_mib(vb.value.as_i64().unwrap_or(2));
        }
    }
    for vb in walk(client, &Oid::from(oids::BFD_SESS_DISCRIMINATOR), max_rep).await? {
        if let Some(index) = row_index(&vb.oid, oids::BFD_SESS_DISCRIMINATOR) {
            if let Some(discr) = vb.value.as_u32() {
                session_entry(&mut sessions, index).discriminator = discr;
            }
        }
    }
    for vb in walk(client, &Oid::from(oids::BFD_SESS_ADDR_TYPE), max_rep).await? {
        if let Some(index) = row_index(&vb.oid, oids::BFD_SESS_ADDR_TYPE) {
            session_entry(&mut sessions, index).addr_type = vb.value.as_u32();
        }
    }
    for vb in walk(client, &Oid::from(oids::BFD_SESS_ADDR), max_rep).await? {
        if let Some(index) = row_index(&vb.oid, oids::BFD_SESS_ADDR) {
            session_entry(&mut sessions, index).addr = addr_from_value(&vb.value);
        }
    }

    Ok(sessions)
}

fn addr_from_value(value: &SnmpValue) -> Option<std::net::IpAddr> {
    if let Some(addr) = value.as_ip() {
        return Some(addr);
    }
    match value {
        SnmpValue::OctetString(bytes) if bytes.len() == 4 => {
            let octets: [u8; 4] = bytes.as_slice().try_into().ok()?;
            Some(std::net::IpAddr::V4(octets.into()))
        }
        SnmpValue::OctetString(bytes) if bytes.len() == 16 => {
            let octets: [u8; 16] = bytes.as_slice().try_into().ok()?;
            Some(std::net::IpAddr::V6(octets.into()))
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
    use zino_snmp::MockSnmp;

    fn seed_session(mock: &MockSnmp, index: u32, state: i64, discr: u32, addr: [u8; 4]) {
        mock.set(
            Oid::from(oids::BFD_SESS_STATE).child(index),
            SnmpValue::Integer(state),
        );
        mock.set(
            Oid::from(oids::BFD_SESS_DISCRIMINATOR).child(index),
            SnmpValue::Counter32(discr),
        );
        mock.set(
            Oid::from(oids::BFD_SESS_ADDR_TYPE).child(index),
            SnmpValue::Integer(1),
        );
        mock.set(
            Oid::from(oids::BFD_SESS_ADDR).child(index),
            SnmpValue::OctetString(addr.to_vec()),
        );
    }

    #[tokio::test]
    async fn down_session_creates_bfd_event() {
        let (engine, mock) = engine_with_mock();
        let device = device("gw1");
        seed_session(&mock, 1, 2, 4242, [10, 0, 3, 2]);

        let client = engine.client_for(&device);
        run(&engine, &device, client.as_ref()).await.unwrap();

        let ids = engine.events().open_ids();
        assert_eq!(ids.len(), 1);
        let event = engine.events().get(ids[0]).unwrap();
        assert_eq!(event.state, EventState::Open);
        let attrs = event.attr_map();
        assert_eq!(attrs["bfdState"], "down");
        assert_eq!(attrs["bfdDiscr"], "4242");
        assert_eq!(attrs["bfdAddr"], "10.0.3.2");
    }

    #[tokio::test]
    async fn recovered_session_annotates_open_event() {
        let (engine, mock) = engine_with_mock();
        let device = device("gw1");
        seed_session(&mock, 1, 2, 4242, [10, 0, 3, 2]);
        let client = engine.client_for(&device);
        run(&engine, &device, client.as_ref()).await.unwrap();

        seed_session(&mock, 1, 4, 4242, [10, 0, 3, 2]);
        run(&engine, &device, client.as_ref()).await.unwrap();

        let ids = engine.events().open_ids();
        assert_eq!(ids.len(), 1);
        let event = engine.events().get(ids[0]).unwrap();
        assert_eq!(event.state, EventState::Open);
        assert_eq!(event.attr_map()["bfdState"], "up");
        assert!(
            event
                .log
                .iter()
                .any(|entry| entry.text.contains("up again"))
        );
    }

    #[tokio::test]
    async fn all_up_table_raises_nothing() {
        let (engine, mock) = engine_with_mock();
        let device = device("gw1");
        seed_session(&mock, 1, 4, 4242, [10, 0, 3, 2]);
        seed_session(&mock, 2, 4, 4243, [10, 0, 3, 6]);

        let client = engine.client_for(&device);
        run(&engine, &device, client.as_ref()).await.unwrap();

        assert!(engine.events().open_ids().is_empty());
        assert_eq!(engine.device_state("gw1").unwrap().bfd_sessions.len(), 2);
    }
}
