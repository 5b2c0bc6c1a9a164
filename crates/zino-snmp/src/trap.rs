// ── Trap delivery channel ──
//
// Transport backends decode v1/v2c notification PDUs off the wire and
// push one `TrapMessage` per PDU into this channel. The core dispatcher
// owns the receiving end; tests inject messages directly.

use std::net::IpAddr;

use tokio::sync::mpsc;

use crate::client::SnmpVersion;
use crate::oid::Oid;
use crate::value::VarBind;

/// A decoded SNMP notification.
#[derive(Debug, Clone)]
pub struct TrapMessage {
    /// Source address of the datagram, used to resolve the device.
    pub source: IpAddr,
    pub community: String,
    pub version: SnmpVersion,
    /// sysUpTime from the PDU, in hundredths of a second.
    pub uptime: u32,
    /// The notification type (snmpTrapOID.0 payload).
    pub trap_oid: Oid,
    /// Remaining varbinds, in PDU order.
    pub varbinds: Vec<VarBind>,
}

impl TrapMessage {
    /// First varbind whose OID starts with `prefix`.
    pub fn varbind(&self, prefix: &[u32]) -> Option<&VarBind> {
        self.varbinds.iter().find(|vb| vb.oid.starts_with(prefix))
    }
}

pub type TrapSender = mpsc::Sender<TrapMessage>;
pub type TrapReceiver = mpsc::Receiver<TrapMessage>;

/// Channel between the transport's trap listener and the dispatcher.
pub fn trap_channel(capacity: usize) -> (TrapSender, TrapReceiver) {
    mpsc::channel(capacity)
}
