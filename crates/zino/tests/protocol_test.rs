//! End-to-end tests of the command and notify protocols over real TCP
//! sockets, with the engine backed by the in-memory SNMP mock.
#![allow(clippy::unwrap_used)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio_util::sync::CancellationToken;

use zino::auth::challenge_response;
use zino::server::{self, NotifyRegistry, ServerContext};
use zino_config::{Configuration, Secrets};
use zino_core::model::{EventDetails, Port, IfStatus, PortState};
use zino_core::Engine;
use zino_snmp::client::ClientFactory;
use zino_snmp::{MockSnmp, Oid, SnmpClient, SnmpValue, SnmpVersion, TrapMessage, VarBind, oids};

const POLLDEVS: &str = "name: arkham-sw1\naddress: 10.0.0.1\ncommunity: s3cret\n";

struct Harness {
    engine: Engine,
    command_addr: SocketAddr,
    notify_addr: SocketAddr,
    _cancel: CancellationToken,
}

async fn start_servers() -> Harness {
    let factory: ClientFactory = Arc::new(|_params| {
        let client: Arc<dyn SnmpClient> = Arc::new(MockSnmp::new());
        client
    });
    let engine = Engine::new(Configuration::default(), factory);
    let registry = zino_config::pollfile::parse_pollfile_str(POLLDEVS, "polldevs.cf").unwrap();
    engine.apply_registry(registry);

    let secrets = Secrets::parse("user1 password123\n", "secrets").unwrap();
    let notify_registry = Arc::new(NotifyRegistry::new());
    let ctx = Arc::new(ServerContext {
        engine: engine.clone(),
        secrets,
        notify: Arc::clone(&notify_registry),
    });

    let cancel = CancellationToken::new();
    let command_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let command_addr = command_listener.local_addr().unwrap();
    let notify_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let notify_addr = notify_listener.local_addr().unwrap();

    tokio::spawn(server::serve_command(
        command_listener,
        ctx,
        cancel.child_token(),
    ));
    tokio::spawn(server::serve_notify(
        notify_listener,
        engine.clone(),
        notify_registry,
        cancel.child_token(),
    ));

    Harness {
        engine,
        command_addr,
        notify_addr,
        _cancel: cancel,
    }
}

struct Client {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, writer) = stream.into_split();
        Self {
            reader: BufReader::new(read_half),
            writer,
        }
    }

    async fn line(&mut self) -> String {
        let mut line = String::new();
        tokio::time::timeout(Duration::from_secs(5), self.reader.read_line(&mut line))
            .await
            .expect("timed out waiting for a protocol line")
            .unwrap();
        line.trim_end_matches(['\r', '\n']).to_owned()
    }

    async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{line}\r\n").as_bytes())
            .await
            .unwrap();
    }

    /// Read data lines of a multi-line response, after its 3xx header.
    async fn body(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        loop {
            let line = self.line().await;
            if line == "." {
                return lines;
            }
            lines.push(line);
        }
    }

    /// Consume the greeting and authenticate as user1.
    async fn login(&mut self) -> String {
        let greeting = self.line().await;
        let challenge = greeting.split_whitespace().nth(1).unwrap().to_owned();
        let response = challenge_response(&challenge, "password123");
        self.send(&format!("USER user1 {response}")).await;
        assert_eq!(self.line().await, "200 ok");
        challenge
    }
}

fn link_down_trap(ifindex: u32) -> TrapMessage {
    TrapMessage {
        source: "10.0.0.1".parse().unwrap(),
        community: "s3cret".into(),
        version: SnmpVersion::V2c,
        uptime: 1_000,
        trap_oid: Oid::from(oids::TRAP_LINK_DOWN),
        varbinds: vec![VarBind::new(
            Oid::from(oids::IF_INDEX).child(ifindex),
            SnmpValue::Integer(i64::from(ifindex)),
        )],
    }
}

fn link_up_trap(ifindex: u32) -> TrapMessage {
    TrapMessage {
        trap_oid: Oid::from(oids::TRAP_LINK_UP),
        ..link_down_trap(ifindex)
    }
}

fn seed_port(engine: &Engine, ifindex: u32) {
    engine.with_device_state("arkham-sw1", |state| {
        state.interfaces.insert(
            ifindex,
            Port {
                ifindex,
                ifdescr: "ge-1/0/10".into(),
                ifalias: "customer uplink".into(),
                oper_status: IfStatus::Up,
                admin_status: IfStatus::Up,
                last_change: 0,
            },
        );
    });
}

// ── Authentication ──────────────────────────────────────────────────

#[tokio::test]
async fn greeting_carries_a_fresh_challenge() {
    let harness = start_servers().await;
    let mut a = Client::connect(harness.command_addr).await;
    let mut b = Client::connect(harness.command_addr).await;

    let line_a = a.line().await;
    let line_b = b.line().await;
    assert!(line_a.starts_with("200 "));
    assert!(line_a.ends_with("Hello, there"));

    let challenge_a = line_a.split_whitespace().nth(1).unwrap();
    let challenge_b = line_b.split_whitespace().nth(1).unwrap();
    assert_eq!(challenge_a.len(), 40);
    assert!(challenge_a.chars().all(|c| c.is_ascii_hexdigit()));
    assert_ne!(challenge_a, challenge_b);
}

#[tokio::test]
async fn wrong_digest_is_rejected_and_challenge_is_one_shot() {
    let harness = start_servers().await;
    let mut client = Client::connect(harness.command_addr).await;
    let greeting = client.line().await;
    let challenge = greeting.split_whitespace().nth(1).unwrap().to_owned();

    client.send("USER user1 deadbeef").await;
    assert!(client.line().await.starts_with("500"));

    // Even the correct digest fails now: the challenge was consumed.
    let response = challenge_response(&challenge, "password123");
    client.send(&format!("USER user1 {response}")).await;
    assert!(client.line().await.starts_with("500"));
}

#[tokio::test]
async fn commands_require_authentication() {
    let harness = start_servers().await;
    let mut client = Client::connect(harness.command_addr).await;
    let _greeting = client.line().await;

    client.send("CASEIDS").await;
    assert_eq!(client.line().await, "500 not authenticated");

    client.send("VERSION").await;
    assert!(client.line().await.starts_with("200 zino version"));

    client.send("QUIT").await;
    assert_eq!(client.line().await, "205 Bye");
}

// ── S1: portstate round trip ────────────────────────────────────────

#[tokio::test]
async fn portstate_event_round_trip() {
    let harness = start_servers().await;
    seed_port(&harness.engine, 150);
    zino_core::trap::dispatch(&harness.engine, link_down_trap(150)).await;

    let mut client = Client::connect(harness.command_addr).await;
    client.login().await;

    client.send("CASEIDS").await;
    assert!(client.line().await.starts_with("300"));
    let ids = client.body().await;
    assert_eq!(ids.len(), 1);
    let id = &ids[0];

    client.send(&format!("GETATTRS {id}")).await;
    assert!(client.line().await.starts_with("300"));
    let attrs = client.body().await;
    assert!(attrs.contains(&"router: arkham-sw1".to_owned()));
    assert!(attrs.contains(&"ifindex: 150".to_owned()));
    assert!(attrs.contains(&"port: ge-1/0/10".to_owned()));
    assert!(attrs.contains(&"portstate: down".to_owned()));
    assert!(attrs.contains(&"state: open".to_owned()));

    client.send(&format!("SETSTATE {id} working")).await;
    assert_eq!(client.line().await, "200 ok");

    client.send(&format!("GETHIST {id}")).await;
    assert!(client.line().await.starts_with("300"));
    let history = client.body().await;
    assert!(
        history
            .iter()
            .any(|line| line.contains("state change open -> working"))
    );

    client.send(&format!("SETSTATE {id} closed")).await;
    assert_eq!(client.line().await, "200 ok");

    client.send("CASEIDS").await;
    let _header = client.line().await;
    assert!(client.body().await.is_empty());

    // Closure is final.
    client.send(&format!("SETSTATE {id} open")).await;
    assert!(client.line().await.starts_with("500"));
}

// ── Notify channel ──────────────────────────────────────────────────

#[tokio::test]
async fn tied_notify_session_sees_event_lifecycle() {
    let harness = start_servers().await;

    let mut notify = Client::connect(harness.notify_addr).await;
    let nonce = notify.line().await;
    assert_eq!(nonce.len(), 40);

    let mut command = Client::connect(harness.command_addr).await;
    command.login().await;
    command.send(&format!("NTIE {nonce}")).await;
    assert_eq!(command.line().await, "200 ok");
    // Give the notify task a beat to finish subscribing.
    tokio::time::sleep(Duration::from_millis(100)).await;

    seed_port(&harness.engine, 150);
    zino_core::trap::dispatch(&harness.engine, link_down_trap(150)).await;

    let first = notify.line().await;
    let mut parts = first.split_whitespace();
    let id = parts.next().unwrap().to_owned();
    assert_eq!(parts.next(), Some("state"));
    assert_eq!(parts.next(), Some("embryonic"));

    // Subsequent lines include the open transition for the same event.
    let mut saw_open = false;
    for _ in 0..12 {
        let line = notify.line().await;
        if line == format!("{id} state open") {
            saw_open = true;
            break;
        }
    }
    assert!(saw_open, "no 'state open' notification received");

    client_reuses_nonce(&harness, &nonce).await;
}

async fn client_reuses_nonce(harness: &Harness, nonce: &str) {
    let mut command = Client::connect(harness.command_addr).await;
    command.login().await;
    command.send(&format!("NTIE {nonce}")).await;
    assert!(command.line().await.starts_with("500"));
}

// ── S3: flap counters and CLEARFLAP ─────────────────────────────────

#[tokio::test]
async fn flapping_port_keeps_one_event_until_clearflap() {
    let harness = start_servers().await;
    seed_port(&harness.engine, 150);

    for round in 0..2 {
        zino_core::trap::dispatch(&harness.engine, link_down_trap(150)).await;
        zino_core::trap::dispatch(&harness.engine, link_up_trap(150)).await;
        let _ = round;
    }

    let mut client = Client::connect(harness.command_addr).await;
    client.login().await;

    client.send("CASEIDS").await;
    let _header = client.line().await;
    let ids = client.body().await;
    assert_eq!(ids.len(), 1, "flapping must not create more events");
    let id = ids[0].clone();

    client.send(&format!("GETATTRS {id}")).await;
    let _header = client.line().await;
    let attrs = client.body().await;
    assert!(attrs.contains(&"flaps: 4".to_owned()));
    assert!(attrs.contains(&"flapstate: flapping".to_owned()));

    client.send("CLEARFLAP arkham-sw1 150").await;
    assert_eq!(client.line().await, "200 ok");

    client.send(&format!("GETATTRS {id}")).await;
    let _header = client.line().await;
    let attrs = client.body().await;
    assert!(attrs.contains(&"flaps: 0".to_owned()));
    assert!(attrs.contains(&"flapstate: stable".to_owned()));
    assert!(attrs.contains(&"state: open".to_owned()));
}

// ── S5: planned maintenance suppression ─────────────────────────────

#[tokio::test]
async fn pm_matched_event_opens_ignored_with_log_line() {
    let harness = start_servers().await;
    seed_port(&harness.engine, 150);

    let mut client = Client::connect(harness.command_addr).await;
    client.login().await;

    let now = chrono::Utc::now().timestamp();
    client
        .send(&format!(
            "PM ADD {} {} portstate intf-regexp arkham-sw1 ge-1/0/10",
            now - 60,
            now + 3600
        ))
        .await;
    let added = client.line().await;
    assert!(added.starts_with("200"), "unexpected response: {added}");

    zino_core::trap::dispatch(&harness.engine, link_down_trap(150)).await;

    client.send("CASEIDS").await;
    let _header = client.line().await;
    let ids = client.body().await;
    assert_eq!(ids.len(), 1, "ignored events are still listed");
    let id = ids[0].clone();

    client.send(&format!("GETATTRS {id}")).await;
    let _header = client.line().await;
    let attrs = client.body().await;
    assert!(attrs.contains(&"state: ignored".to_owned()));

    client.send(&format!("GETLOG {id}")).await;
    let _header = client.line().await;
    let log = client.body().await;
    assert!(
        log.iter()
            .any(|line| line.contains("planned maintenance 1")),
        "log must cite the PM id: {log:?}"
    );

    client.send("PM MATCHING 1").await;
    let _header = client.line().await;
    let matching = client.body().await;
    assert!(matching.iter().any(|line| line.starts_with(&id)));

    client.send("PM CANCEL 1").await;
    assert_eq!(client.line().await, "200 ok");
    client.send("PM LIST").await;
    let _header = client.line().await;
    assert!(client.body().await.is_empty());
}

// ── Misc commands ───────────────────────────────────────────────────

#[tokio::test]
async fn addhist_round_trips_dot_stuffed_text() {
    let harness = start_servers().await;
    seed_port(&harness.engine, 150);
    zino_core::trap::dispatch(&harness.engine, link_down_trap(150)).await;

    let mut client = Client::connect(harness.command_addr).await;
    client.login().await;

    client.send("CASEIDS").await;
    let _header = client.line().await;
    let id = client.body().await[0].clone();

    client.send(&format!("ADDHIST {id}")).await;
    assert!(client.line().await.starts_with("302"));
    client.send("talked to the site contact").await;
    client.send(".escalating tomorrow").await;
    // dot-stuffed on the wire
    client.send("..escalating tomorrow").await;
    client.send(".").await;
    assert_eq!(client.line().await, "200 ok");

    client.send(&format!("GETHIST {id}")).await;
    let _header = client.line().await;
    let history = client.body().await;
    assert!(
        history
            .iter()
            .any(|line| line.contains("talked to the site contact"))
    );
}

#[tokio::test]
async fn community_pollrtr_and_errors() {
    let harness = start_servers().await;
    let mut client = Client::connect(harness.command_addr).await;
    client.login().await;

    client.send("COMMUNITY arkham-sw1").await;
    assert_eq!(client.line().await, "200 s3cret");
    client.send("COMMUNITY nonexistent").await;
    assert!(client.line().await.starts_with("500"));

    client.send("POLLRTR arkham-sw1").await;
    assert!(client.line().await.starts_with("200"));
    client.send("POLLRTR nonexistent").await;
    assert!(client.line().await.starts_with("500"));

    client.send("POLLINTF arkham-sw1 0").await;
    assert!(client.line().await.starts_with("200"));

    client.send("GETATTRS 9999").await;
    assert!(client.line().await.starts_with("500"));

    client.send("bogus command").await;
    assert_eq!(client.line().await, "500 Syntax error");

    // The session survived every error above.
    client.send("VERSION").await;
    assert!(client.line().await.starts_with("200"));

    let _ = harness;
}

#[tokio::test]
async fn commands_are_case_insensitive() {
    let harness = start_servers().await;
    let mut client = Client::connect(harness.command_addr).await;
    client.login().await;

    client.send("caseids").await;
    assert!(client.line().await.starts_with("300"));
    let _ = client.body().await;

    let _ = harness;
}

#[tokio::test]
async fn portstate_attrs_match_event_model() {
    // Property 5 witness: GETATTRS shows the value the store diffed on.
    let harness = start_servers().await;
    let now = chrono::Utc::now();
    let (event, created) = harness.engine.events().get_or_create(
        "arkham-sw1",
        EventDetails::Portstate {
            ifindex: 9,
            port: "xe-0/0/9".into(),
            descr: String::new(),
            portstate: PortState::Down,
            flaps: 0,
            flapstate: zino_core::flaps::FlapState::Stable,
            ac_down: Duration::ZERO,
        },
        now,
    );
    assert!(created);
    let committed = harness.engine.open_event(event, now);

    let mut client = Client::connect(harness.command_addr).await;
    client.login().await;
    client.send(&format!("GETATTRS {}", committed.id)).await;
    let _header = client.line().await;
    let attrs = client.body().await;
    for (name, value) in committed.attr_map() {
        assert!(
            attrs.contains(&format!("{name}: {value}")),
            "missing attribute {name}"
        );
    }
}
