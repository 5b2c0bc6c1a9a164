// ── Command server (port 8001) ──
//
// The operator-facing line protocol. Sessions start with a challenge
// greeting; before a successful USER only USER, HELP, QUIT and VERSION
// are served. Errors never drop an authenticated session.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use tokio::io::{AsyncWrite, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use zino_config::Secrets;
use zino_core::model::{EventState, PmMatchType, PmTarget};
use zino_core::{Engine, PollRequest};

use super::notify::NotifyRegistry;
use super::proto::{read_line, read_multiline, respond, respond_multiline};
use crate::auth;

pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Everything a command session needs, shared across connections.
pub struct ServerContext {
    pub engine: Engine,
    pub secrets: Secrets,
    pub notify: Arc<NotifyRegistry>,
}

struct Session {
    challenge: String,
    challenge_used: bool,
    user: Option<String>,
}

type Reader = BufReader<OwnedReadHalf>;

pub async fn handle_connection(
    stream: TcpStream,
    ctx: Arc<ServerContext>,
    cancel: CancellationToken,
) {
    let peer = stream.peer_addr().ok();
    let (read_half, mut writer) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let mut session = Session {
        challenge: auth::random_hex(20),
        challenge_used: false,
        user: None,
    };
    if respond(
        &mut writer,
        200,
        &format!("{} Hello, there", session.challenge),
    )
    .await
    .is_err()
    {
        return;
    }
    debug!(?peer, "command session opened");

    loop {
        let line = tokio::select! {
            () = cancel.clone().cancelled_owned() => break,
            line = read_line(&mut reader) => match line {
                Ok(Some(line)) => line,
                _ => break,
            },
        };

        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some(first) = tokens.first() else {
            if respond(&mut writer, 500, "Syntax error").await.is_err() {
                break;
            }
            continue;
        };
        let command = first.to_ascii_uppercase();

        if command == "QUIT" {
            let _ = respond(&mut writer, 205, "Bye").await;
            break;
        }

        let allowed_pre_auth = matches!(command.as_str(), "USER" | "HELP" | "VERSION");
        if session.user.is_none() && !allowed_pre_auth {
            if respond(&mut writer, 500, "not authenticated").await.is_err() {
                break;
            }
            continue;
        }

        let result = dispatch(
            &command,
            &tokens[1..],
            &mut reader,
            &mut writer,
            &mut session,
            &ctx,
        )
        .await;
        if result.is_err() {
            break;
        }
    }
    debug!(?peer, user = ?session.user, "command session closed");
}

async fn dispatch<W: AsyncWrite + Unpin>(
    command: &str,
    args: &[&str],
    reader: &mut Reader,
    writer: &mut W,
    session: &mut Session,
    ctx: &ServerContext,
) -> std::io::Result<()> {
    match command {
        "USER" => cmd_user(args, writer, session, &ctx.secrets).await,
        "HELP" => cmd_help(writer, session).await,
        "VERSION" => respond(writer, 200, &format!("zino version {SERVER_VERSION}")).await,
        "CASEIDS" => cmd_caseids(writer, &ctx.engine).await,
        "GETATTRS" => cmd_getattrs(args, writer, &ctx.engine).await,
        "GETHIST" => cmd_gethist(args, writer, &ctx.engine).await,
        "GETLOG" => cmd_getlog(args, writer, &ctx.engine).await,
        "SETSTATE" => cmd_setstate(args, writer, session, &ctx.engine).await,
        "ADDHIST" => cmd_addhist(args, reader, writer, session, &ctx.engine).await,
        "COMMUNITY" => cmd_community(args, writer, &ctx.engine).await,
        "PM" => cmd_pm(args, reader, writer, &ctx.engine).await,
        "POLLRTR" => cmd_pollrtr(args, writer, &ctx.engine).await,
        "POLLINTF" => cmd_pollintf(args, writer, &ctx.engine).await,
        "NTIE" => cmd_ntie(args, writer, ctx).await,
        "CLEARFLAP" => cmd_clearflap(args, writer, &ctx.engine).await,
        _ => respond(writer, 500, "Syntax error").await,
    }
}

// ── Authentication ──────────────────────────────────────────────────

async fn cmd_user<W: AsyncWrite + Unpin>(
    args: &[&str],
    writer: &mut W,
    session: &mut Session,
    secrets: &Secrets,
) -> std::io::Result<()> {
    if session.user.is_some() {
        return respond(writer, 500, "already authenticated").await;
    }
    if session.challenge_used {
        return respond(writer, 500, "challenge already used; reconnect").await;
    }
    session.challenge_used = true;

    let [user, response] = args else {
        return respond(writer, 500, "Syntax error").await;
    };
    if auth::verify(secrets, &session.challenge, user, response) {
        session.user = Some((*user).to_owned());
        info!(user, "operator authenticated");
        respond(writer, 200, "ok").await
    } else {
        respond(writer, 500, "Authentication failure").await
    }
}

async fn cmd_help<W: AsyncWrite + Unpin>(
    writer: &mut W,
    session: &Session,
) -> std::io::Result<()> {
    let commands: &'static [&'static str] = if session.user.is_some() {
        &[
            "ADDHIST", "CASEIDS", "CLEARFLAP", "COMMUNITY", "GETATTRS", "GETHIST", "GETLOG",
            "HELP", "NTIE", "PM", "POLLINTF", "POLLRTR", "QUIT", "SETSTATE", "USER", "VERSION",
        ]
    } else {
        &["HELP", "QUIT", "USER", "VERSION"]
    };
    respond_multiline(writer, "commands follow", commands.iter().copied()).await
}

// ── Event commands ──────────────────────────────────────────────────

fn parse_event_id(token: &str) -> Option<zino_core::model::EventId> {
    token.parse().ok()
}

/// Render timestamped entries: `<epoch> <first line>`, with any further
/// lines of the entry indented as continuation lines. Keeps multi-line
/// ADDHIST text inside the dot-terminated framing.
fn entry_lines(entries: &[zino_core::model::LogEntry]) -> Vec<String> {
    let mut lines = Vec::new();
    for entry in entries {
        let mut parts = entry.text.lines();
        lines.push(format!("{} {}", entry.ts.timestamp(), parts.next().unwrap_or("")));
        for continuation in parts {
            lines.push(format!(" {continuation}"));
        }
    }
    lines
}

async fn cmd_caseids<W: AsyncWrite + Unpin>(
    writer: &mut W,
    engine: &Engine,
) -> std::io::Result<()> {
    let ids: Vec<String> = engine
        .events()
        .open_ids()
        .into_iter()
        .map(|id| id.to_string())
        .collect();
    respond_multiline(writer, "list of active cases follows", ids).await
}

async fn cmd_getattrs<W: AsyncWrite + Unpin>(
    args: &[&str],
    writer: &mut W,
    engine: &Engine,
) -> std::io::Result<()> {
    let Some(event) = args
        .first()
        .and_then(|token| parse_event_id(token))
        .and_then(|id| engine.events().get(id))
    else {
        return respond(writer, 500, "no such case").await;
    };
    let lines: Vec<String> = event
        .attr_map()
        .into_iter()
        .map(|(name, value)| format!("{name}: {value}"))
        .collect();
    respond_multiline(writer, "attributes follow", lines).await
}

async fn cmd_gethist<W: AsyncWrite + Unpin>(
    args: &[&str],
    writer: &mut W,
    engine: &Engine,
) -> std::io::Result<()> {
    let Some(event) = args
        .first()
        .and_then(|token| parse_event_id(token))
        .and_then(|id| engine.events().get(id))
    else {
        return respond(writer, 500, "no such case").await;
    };
    respond_multiline(writer, "history follows", entry_lines(&event.history)).await
}

async fn cmd_getlog<W: AsyncWrite + Unpin>(
    args: &[&str],
    writer: &mut W,
    engine: &Engine,
) -> std::io::Result<()> {
    let Some(event) = args
        .first()
        .and_then(|token| parse_event_id(token))
        .and_then(|id| engine.events().get(id))
    else {
        return respond(writer, 500, "no such case").await;
    };
    respond_multiline(writer, "log follows", entry_lines(&event.log)).await
}

async fn cmd_setstate<W: AsyncWrite + Unpin>(
    args: &[&str],
    writer: &mut W,
    session: &Session,
    engine: &Engine,
) -> std::io::Result<()> {
    let [id_token, state_token] = args else {
        return respond(writer, 500, "Syntax error").await;
    };
    let Some(id) = parse_event_id(id_token) else {
        return respond(writer, 500, "Syntax error").await;
    };
    let Ok(target) = state_token.parse::<EventState>() else {
        return respond(writer, 500, "invalid state").await;
    };
    let Some(mut event) = engine.events().get(id) else {
        return respond(writer, 500, "no such case").await;
    };
    if !event.state.can_transition_to(target) {
        return respond(
            writer,
            500,
            &format!("cannot change state from {} to {target}", event.state),
        )
        .await;
    }
    let now = Utc::now();
    if let Some(user) = &session.user {
        if target == EventState::Closed {
            event.add_history(now, format!("closed by {user}"));
        }
    }
    event.set_state(target, now);
    engine.events().commit(event, now);
    respond(writer, 200, "ok").await
}

async fn cmd_addhist<W: AsyncWrite + Unpin>(
    args: &[&str],
    reader: &mut Reader,
    writer: &mut W,
    session: &Session,
    engine: &Engine,
) -> std::io::Result<()> {
    let Some(id) = args.first().and_then(|token| parse_event_id(token)) else {
        return respond(writer, 500, "no such case").await;
    };
    if engine.events().get(id).is_none() {
        return respond(writer, 500, "no such case").await;
    }
    respond(writer, 302, "please provide new history entry, terminate with '.'").await?;
    let Some(lines) = read_multiline(reader).await? else {
        return Ok(());
    };
    let Some(mut event) = engine.events().get(id) else {
        return respond(writer, 500, "no such case").await;
    };
    let now = Utc::now();
    let user = session.user.as_deref().unwrap_or("-");
    event.add_history(now, format!("{user}\n{}", lines.join("\n")));
    engine.events().commit(event, now);
    respond(writer, 200, "ok").await
}

async fn cmd_community<W: AsyncWrite + Unpin>(
    args: &[&str],
    writer: &mut W,
    engine: &Engine,
) -> std::io::Result<()> {
    let registry = engine.registry();
    match args.first().and_then(|name| registry.get(name)) {
        Some(device) => respond(writer, 200, &device.community).await,
        None => respond(writer, 500, "unknown router").await,
    }
}

// ── Polling commands ────────────────────────────────────────────────

async fn cmd_pollrtr<W: AsyncWrite + Unpin>(
    args: &[&str],
    writer: &mut W,
    engine: &Engine,
) -> std::io::Result<()> {
    let registry = engine.registry();
    match args.first() {
        Some(name) if registry.get(name).is_some() => {
            engine.request_poll(PollRequest::Device((*name).to_owned()));
            respond(writer, 200, &format!("polling {name}")).await
        }
        Some(name) => respond(writer, 500, &format!("unknown router {name}")).await,
        None => respond(writer, 500, "Syntax error").await,
    }
}

async fn cmd_pollintf<W: AsyncWrite + Unpin>(
    args: &[&str],
    writer: &mut W,
    engine: &Engine,
) -> std::io::Result<()> {
    let [name, ifindex_token] = args else {
        return respond(writer, 500, "Syntax error").await;
    };
    let Ok(ifindex) = ifindex_token.parse::<u32>() else {
        return respond(writer, 500, "invalid ifindex").await;
    };
    let registry = engine.registry();
    if registry.get(name).is_none() {
        return respond(writer, 500, &format!("unknown router {name}")).await;
    }
    engine.request_poll(PollRequest::Interface((*name).to_owned(), ifindex));
    respond(writer, 200, &format!("polling {name} ifindex {ifindex}")).await
}

async fn cmd_ntie<W: AsyncWrite + Unpin>(
    args: &[&str],
    writer: &mut W,
    ctx: &ServerContext,
) -> std::io::Result<()> {
    let Some(nonce) = args.first() else {
        return respond(writer, 500, "Syntax error").await;
    };
    if ctx.notify.tie(nonce) {
        respond(writer, 200, "ok").await
    } else {
        respond(writer, 500, "unknown or already bound nonce").await
    }
}

async fn cmd_clearflap<W: AsyncWrite + Unpin>(
    args: &[&str],
    writer: &mut W,
    engine: &Engine,
) -> std::io::Result<()> {
    let [name, ifindex_token] = args else {
        return respond(writer, 500, "Syntax error").await;
    };
    let Ok(ifindex) = ifindex_token.parse::<u32>() else {
        return respond(writer, 500, "invalid ifindex").await;
    };
    engine.clear_flap(name, ifindex, Utc::now());
    respond(writer, 200, "ok").await
}

// ── Planned-maintenance sub-protocol ────────────────────────────────

async fn cmd_pm<W: AsyncWrite + Unpin>(
    args: &[&str],
    reader: &mut Reader,
    writer: &mut W,
    engine: &Engine,
) -> std::io::Result<()> {
    let Some(sub) = args.first().map(|s| s.to_ascii_uppercase()) else {
        return respond(writer, 500, "Syntax error").await;
    };
    let rest = &args[1..];
    match sub.as_str() {
        "HELP" => {
            respond_multiline(
                writer,
                "PM subcommands follow",
                ["ADD", "ADDLOG", "CANCEL", "DETAILS", "HELP", "LIST", "LOG", "MATCHING"],
            )
            .await
        }
        "ADD" => pm_add(rest, writer, engine).await,
        "LIST" => {
            let lines: Vec<String> = engine
                .pms()
                .list()
                .iter()
                .map(|pm| {
                    format!(
                        "{} {} {} {} {} {}",
                        pm.id,
                        pm.start_time.timestamp(),
                        pm.end_time.timestamp(),
                        pm.target,
                        pm.match_type,
                        pm.match_expression
                    )
                })
                .collect();
            respond_multiline(writer, "PM event ids follow", lines).await
        }
        "CANCEL" => {
            let Some(id) = rest.first().and_then(|token| token.parse().ok()) else {
                return respond(writer, 500, "Syntax error").await;
            };
            if engine.pms().cancel(id) {
                respond(writer, 200, "ok").await
            } else {
                respond(writer, 500, "no such PM").await
            }
        }
        "DETAILS" => {
            let Some(pm) = rest
                .first()
                .and_then(|token| token.parse().ok())
                .and_then(|id| engine.pms().get(id))
            else {
                return respond(writer, 500, "no such PM").await;
            };
            let mut lines = vec![
                format!("id: {}", pm.id),
                format!("start: {}", pm.start_time.timestamp()),
                format!("end: {}", pm.end_time.timestamp()),
                format!("type: {}", pm.target),
                format!("match_type: {}", pm.match_type),
                format!("match_expression: {}", pm.match_expression),
            ];
            if let Some(device) = &pm.match_device {
                lines.push(format!("match_device: {device}"));
            }
            respond_multiline(writer, "PM details follow", lines).await
        }
        "MATCHING" => {
            let Some(pm) = rest
                .first()
                .and_then(|token| token.parse().ok())
                .and_then(|id| engine.pms().get(id))
            else {
                return respond(writer, 500, "no such PM").await;
            };
            let lines: Vec<String> = engine
                .events()
                .iter_open()
                .iter()
                .filter(|event| pm.matches_event(event))
                .map(|event| {
                    format!("{} {} {}", event.id, event.router, event.event_type())
                })
                .collect();
            respond_multiline(writer, "matching cases follow", lines).await
        }
        "ADDLOG" => {
            let Some(id) = rest.first().and_then(|token| token.parse().ok()) else {
                return respond(writer, 500, "Syntax error").await;
            };
            if engine.pms().get(id).is_none() {
                return respond(writer, 500, "no such PM").await;
            }
            respond(writer, 302, "please provide new PM log entry, terminate with '.'")
                .await?;
            let Some(lines) = read_multiline(reader).await? else {
                return Ok(());
            };
            engine.pms().add_log(id, Utc::now(), &lines.join("\n"));
            respond(writer, 200, "ok").await
        }
        "LOG" => {
            let Some(pm) = rest
                .first()
                .and_then(|token| token.parse().ok())
                .and_then(|id| engine.pms().get(id))
            else {
                return respond(writer, 500, "no such PM").await;
            };
            respond_multiline(writer, "PM log follows", entry_lines(&pm.log)).await
        }
        _ => respond(writer, 500, "Syntax error").await,
    }
}

async fn pm_add<W: AsyncWrite + Unpin>(
    args: &[&str],
    writer: &mut W,
    engine: &Engine,
) -> std::io::Result<()> {
    // PM ADD <start> <end> <type> <matchtype> [<matchdev>] <matchexpr>
    if args.len() < 5 {
        return respond(writer, 500, "Syntax error").await;
    }
    let (Ok(start), Ok(end)) = (args[0].parse::<i64>(), args[1].parse::<i64>()) else {
        return respond(writer, 500, "invalid timestamp").await;
    };
    let (Some(start), Some(end)) = (
        Utc.timestamp_opt(start, 0).single(),
        Utc.timestamp_opt(end, 0).single(),
    ) else {
        return respond(writer, 500, "invalid timestamp").await;
    };
    if end <= start {
        return respond(writer, 500, "end time precedes start time").await;
    }
    let Ok(target) = args[2].parse::<PmTarget>() else {
        return respond(writer, 500, "invalid PM type").await;
    };
    let Ok(match_type) = args[3].parse::<PmMatchType>() else {
        return respond(writer, 500, "invalid match type").await;
    };

    let (match_device, expression_args) = if match_type == PmMatchType::IntfRegexp {
        if args.len() < 6 {
            return respond(writer, 500, "Syntax error").await;
        }
        (Some(args[4].to_owned()), &args[5..])
    } else {
        (None, &args[4..])
    };
    let match_expression = expression_args.join(" ");

    let pm = engine.pms().add(
        start,
        end,
        target,
        match_type,
        match_expression,
        match_device,
        Utc::now(),
    );
    respond(writer, 200, &format!("PM id {} successfully added", pm.id)).await
}




#[allow(dead_code)]
fn _assert_send_check() {
    use tokio::net::tcp::OwnedWriteHalf;
    fn assert_send<T: Send>(_: T) {}
    fn h2(writer: &mut OwnedWriteHalf, session: &Session) {
        assert_send(cmd_help(writer, session));
    }
    let _ = h2 as fn(_, _);
}
