// ── Uptime agent ──
//
// Minimal GET-only responder so legacy clients can probe sysUpTime and
// sysDescr to detect master failover. The wire side is the transport
// backend's; this is the variable table it serves from.

use std::time::Instant;

use crate::oid::Oid;
use crate::oids;
use crate::value::SnmpValue;

pub struct UptimeAgent {
    descr: String,
    started: Instant,
}

impl UptimeAgent {
    pub fn new(descr: impl Into<String>) -> Self {
        Self {
            descr: descr.into(),
            started: Instant::now(),
        }
    }

    /// Answer a GET, or `None` for objects the agent does not serve.
    pub fn get(&self, oid: &Oid) -> Option<SnmpValue> {
        if oid.as_slice() == oids::SYS_UPTIME {
            let centis = self.started.elapsed().as_millis() / 10;
            Some(SnmpValue::TimeTicks(u32::try_from(centis).unwrap_or(u32::MAX)))
        } else if oid.as_slice() == oids::SYS_DESCR {
            Some(SnmpValue::OctetString(self.descr.clone().into_bytes()))
        } else {
            None
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn serves_uptime_and_descr() {
        let agent = UptimeAgent::new("zino.0.1.0");
        assert!(matches!(
            agent.get(&Oid::from(oids::SYS_UPTIME)),
            Some(SnmpValue::TimeTicks(_))
        ));
        assert_eq!(
            agent.get(&Oid::from(oids::SYS_DESCR)).unwrap().as_text(),
            Some("zino.0.1.0".into())
        );
        assert!(agent.get(&Oid::from(oids::SYS_OBJECT_ID)).is_none());
    }
}
