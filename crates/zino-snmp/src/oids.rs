// ── Well-known numeric OIDs ──
//
// MIB compilation is out of scope; every object Zino touches is listed
// here as a named numeric constant instead. Column constants are table
// column prefixes -- the row index follows in responses.

/// SNMPv2-MIB scalars (instance suffix `.0` included).
pub const SYS_DESCR: &[u32] = &[1, 3, 6, 1, 2, 1, 1, 1, 0];
pub const SYS_OBJECT_ID: &[u32] = &[1, 3, 6, 1, 2, 1, 1, 2, 0];
pub const SYS_UPTIME: &[u32] = &[1, 3, 6, 1, 2, 1, 1, 3, 0];

/// Enterprise arcs used for vendor detection from sysObjectID.
pub const ENTERPRISE_CISCO: &[u32] = &[1, 3, 6, 1, 4, 1, 9];
pub const ENTERPRISE_JUNIPER: &[u32] = &[1, 3, 6, 1, 4, 1, 2636];

// ── IF-MIB ───────────────────────────────────────────────────────────

pub const IF_INDEX: &[u32] = &[1, 3, 6, 1, 2, 1, 2, 2, 1, 1];
pub const IF_DESCR: &[u32] = &[1, 3, 6, 1, 2, 1, 2, 2, 1, 2];
pub const IF_ADMIN_STATUS: &[u32] = &[1, 3, 6, 1, 2, 1, 2, 2, 1, 7];
pub const IF_OPER_STATUS: &[u32] = &[1, 3, 6, 1, 2, 1, 2, 2, 1, 8];
pub const IF_LAST_CHANGE: &[u32] = &[1, 3, 6, 1, 2, 1, 2, 2, 1, 9];
pub const IF_ALIAS: &[u32] = &[1, 3, 6, 1, 2, 1, 31, 1, 1, 1, 18];

// ── BGP4-MIB (RFC 4273 style) ────────────────────────────────────────

pub const BGP_PEER_TABLE: &[u32] = &[1, 3, 6, 1, 2, 1, 15, 3];
pub const BGP_PEER_STATE: &[u32] = &[1, 3, 6, 1, 2, 1, 15, 3, 1, 2];
pub const BGP_PEER_ADMIN_STATUS: &[u32] = &[1, 3, 6, 1, 2, 1, 15, 3, 1, 3];
pub const BGP_PEER_REMOTE_ADDR: &[u32] = &[1, 3, 6, 1, 2, 1, 15, 3, 1, 7];
pub const BGP_PEER_REMOTE_AS: &[u32] = &[1, 3, 6, 1, 2, 1, 15, 3, 1, 9];
pub const BGP_PEER_FSM_ESTABLISHED_TIME: &[u32] = &[1, 3, 6, 1, 2, 1, 15, 3, 1, 16];

// ── CISCO-BGP4-MIB (cbgpPeer2Table) ──────────────────────────────────

pub const CBGP_PEER2_TABLE: &[u32] = &[1, 3, 6, 1, 4, 1, 9, 9, 187, 1, 2, 5];
pub const CBGP_PEER2_STATE: &[u32] = &[1, 3, 6, 1, 4, 1, 9, 9, 187, 1, 2, 5, 1, 3];
pub const CBGP_PEER2_ADMIN_STATUS: &[u32] = &[1, 3, 6, 1, 4, 1, 9, 9, 187, 1, 2, 5, 1, 4];
pub const CBGP_PEER2_REMOTE_AS: &[u32] = &[1, 3, 6, 1, 4, 1, 9, 9, 187, 1, 2, 5, 1, 11];
pub const CBGP_PEER2_FSM_ESTABLISHED_TIME: &[u32] =
    &[1, 3, 6, 1, 4, 1, 9, 9, 187, 1, 2, 5, 1, 19];

// ── BGP4-V2-MIB-JUNIPER (jnxBgpM2) ───────────────────────────────────

pub const JNX_BGP_M2_PEER_TABLE: &[u32] = &[1, 3, 6, 1, 4, 1, 2636, 5, 1, 1, 2, 1, 1];
pub const JNX_BGP_M2_PEER_STATE: &[u32] = &[1, 3, 6, 1, 4, 1, 2636, 5, 1, 1, 2, 1, 1, 1, 2];
pub const JNX_BGP_M2_PEER_STATUS: &[u32] = &[1, 3, 6, 1, 4, 1, 2636, 5, 1, 1, 2, 1, 1, 1, 3];
pub const JNX_BGP_M2_PEER_REMOTE_ADDR: &[u32] =
    &[1, 3, 6, 1, 4, 1, 2636, 5, 1, 1, 2, 1, 1, 1, 11];
pub const JNX_BGP_M2_PEER_REMOTE_AS: &[u32] = &[1, 3, 6, 1, 4, 1, 2636, 5, 1, 1, 2, 1, 1, 1, 13];
pub const JNX_BGP_M2_PEER_FSM_ESTABLISHED_TIME: &[u32] =
    &[1, 3, 6, 1, 4, 1, 2636, 5, 1, 1, 2, 4, 1, 1];

// ── BFD-STD-MIB ──────────────────────────────────────────────────────

pub const BFD_SESS_TABLE: &[u32] = &[1, 3, 6, 1, 2, 1, 222, 1, 2];
pub const BFD_SESS_DISCRIMINATOR: &[u32] = &[1, 3, 6, 1, 2, 1, 222, 1, 2, 1, 4];
pub const BFD_SESS_STATE: &[u32] = &[1, 3, 6, 1, 2, 1, 222, 1, 2, 1, 8];
pub const BFD_SESS_ADDR_TYPE: &[u32] = &[1, 3, 6, 1, 2, 1, 222, 1, 2, 1, 11];
pub const BFD_SESS_ADDR: &[u32] = &[1, 3, 6, 1, 2, 1, 222, 1, 2, 1, 12];

// ── JUNIPER-ALARM-MIB scalars ────────────────────────────────────────

pub const JNX_YELLOW_ALARM_COUNT: &[u32] = &[1, 3, 6, 1, 4, 1, 2636, 3, 4, 2, 2, 2, 0];
pub const JNX_RED_ALARM_COUNT: &[u32] = &[1, 3, 6, 1, 4, 1, 2636, 3, 4, 2, 3, 2, 0];

// ── Notification OIDs ────────────────────────────────────────────────

pub const TRAP_COLD_START: &[u32] = &[1, 3, 6, 1, 6, 3, 1, 1, 5, 1];
pub const TRAP_WARM_START: &[u32] = &[1, 3, 6, 1, 6, 3, 1, 1, 5, 2];
pub const TRAP_LINK_DOWN: &[u32] = &[1, 3, 6, 1, 6, 3, 1, 1, 5, 3];
pub const TRAP_LINK_UP: &[u32] = &[1, 3, 6, 1, 6, 3, 1, 1, 5, 4];
pub const TRAP_BGP_ESTABLISHED: &[u32] = &[1, 3, 6, 1, 2, 1, 15, 7, 1];
pub const TRAP_BGP_BACKWARD_TRANSITION: &[u32] = &[1, 3, 6, 1, 2, 1, 15, 7, 2];
pub const TRAP_JNX_BGP_M2_ESTABLISHED: &[u32] = &[1, 3, 6, 1, 4, 1, 2636, 5, 1, 1, 0, 1];
pub const TRAP_JNX_BGP_M2_BACKWARD_TRANSITION: &[u32] =
    &[1, 3, 6, 1, 4, 1, 2636, 5, 1, 1, 0, 2];
pub const TRAP_BFD_SESS_UP: &[u32] = &[1, 3, 6, 1, 2, 1, 222, 0, 1];
pub const TRAP_BFD_SESS_DOWN: &[u32] = &[1, 3, 6, 1, 2, 1, 222, 0, 2];
pub const TRAP_CISCO_CONFIG_MAN_EVENT: &[u32] = &[1, 3, 6, 1, 4, 1, 9, 9, 43, 2, 0, 1];
pub const TRAP_OSPF_IF_CONFIG_ERROR: &[u32] = &[1, 3, 6, 1, 2, 1, 14, 16, 2, 4];

/// Varbind carrying the notification type in v2c trap PDUs.
pub const SNMP_TRAP_OID: &[u32] = &[1, 3, 6, 1, 6, 3, 1, 1, 4, 1, 0];

// ── Enumerated values ────────────────────────────────────────────────

/// ifOperStatus / ifAdminStatus `up`.
pub const IF_STATUS_UP: i64 = 1;
/// ifOperStatus / ifAdminStatus `down`.
pub const IF_STATUS_DOWN: i64 = 2;

/// bgpPeerState `established` (RFC and Cisco MIBs; Juniper matches).
pub const BGP_STATE_ESTABLISHED: i64 = 6;
/// bgpPeerAdminStatus `start` / jnxBgpM2PeerStatus `running`.
pub const BGP_ADMIN_RUNNING: i64 = 2;

/// bfdSessState `up`.
pub const BFD_STATE_UP: i64 = 4;
