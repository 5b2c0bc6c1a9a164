use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use zino::server::{
    self, COMMAND_PORT, NOTIFY_PORT, NotifyRegistry, SERVER_VERSION, ServerContext,
};
use zino_config::{Configuration, PollfileWatcher, Secrets, pollfile};
use zino_core::{Engine, Scheduler, Snapshot, persist, trap};
use zino_snmp::client::ClientFactory;
use zino_snmp::{MockSnmp, SnmpClient, UptimeAgent, trap_channel};

/// Stateful SNMP-based network monitor for backbone routers.
#[derive(Debug, Parser)]
#[command(name = "zino", version)]
struct Cli {
    /// Pollfile path (overrides [polling].file from the config).
    #[arg(long)]
    polldevs: Option<PathBuf>,

    /// Main configuration file (TOML).
    #[arg(long, default_value = "zino.toml")]
    config_file: PathBuf,

    /// Log at debug level.
    #[arg(long)]
    debug: bool,

    /// Exit cleanly after this many seconds (supervised restart aid).
    #[arg(long, value_name = "N")]
    stop_in: Option<u64>,

    /// UDP port the trap listener should use.
    #[arg(long)]
    trap_port: Option<u16>,

    /// Run as this user once sockets are bound.
    #[arg(long)]
    user: Option<String>,
}

enum RunError {
    /// Exit code 1.
    Config(String),
    /// Exit code 2.
    Bind(String),
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => {}
        Err(RunError::Config(message)) => {
            eprintln!("zino: configuration error: {message}");
            std::process::exit(1);
        }
        Err(RunError::Bind(message)) => {
            eprintln!("zino: bind error: {message}");
            std::process::exit(2);
        }
    }
}

async fn run(cli: Cli) -> Result<(), RunError> {
    let mut config = zino_config::load_configuration(&cli.config_file)
        .map_err(|err| RunError::Config(err.to_string()))?;
    if let Some(polldevs) = &cli.polldevs {
        config.polling.file.clone_from(polldevs);
    }
    if let Some(port) = cli.trap_port {
        config.snmp.trap.port = port;
    }
    if let Some(user) = &cli.user {
        config.process.user = Some(user.clone());
    }

    init_tracing(&config, cli.debug);
    info!(version = SERVER_VERSION, "zino starting");

    let secrets = Secrets::load(&config.authentication.file)
        .map_err(|err| RunError::Config(err.to_string()))?;
    let registry = pollfile::parse_pollfile(&config.polling.file)
        .map_err(|err| RunError::Config(err.to_string()))?;
    info!(devices = registry.len(), "pollfile loaded");

    let factory = client_factory(&config.snmp.backend)?;
    let state_file = config.persistence.file.clone();
    let trap_port = config.snmp.trap.port;
    let engine = Engine::new(config, factory);

    // Restore before the registry swap so devices that left the
    // pollfile while we were down get their events closed.
    match persist::load_snapshot(&state_file) {
        Ok(Some(snapshot)) => {
            info!(path = %state_file.display(), "state snapshot restored");
            snapshot.apply(&engine);
        }
        Ok(None) => info!("no state snapshot; starting empty"),
        Err(err) => warn!(%err, "state snapshot unreadable; starting empty"),
    }
    engine.apply_registry(registry);

    // Bind the operator-facing listeners before dropping privileges.
    let command_listener = TcpListener::bind(("0.0.0.0", COMMAND_PORT))
        .await
        .map_err(|err| RunError::Bind(format!("command port {COMMAND_PORT}: {err}")))?;
    let notify_listener = TcpListener::bind(("0.0.0.0", NOTIFY_PORT))
        .await
        .map_err(|err| RunError::Bind(format!("notify port {NOTIFY_PORT}: {err}")))?;
    if let Some(user) = &engine.config().process.user {
        // Privilege dropping is the process supervisor's job; record the
        // intent so a misconfiguration is visible.
        info!(user, "configured to run as user");
    }

    let agent = UptimeAgent::new(format!("zino {SERVER_VERSION}"));
    debug!(
        sys_descr = ?agent.get(&zino_snmp::Oid::from(zino_snmp::oids::SYS_DESCR)),
        "uptime agent ready for the SNMP transport"
    );

    let cancel = CancellationToken::new();
    let notify_registry = Arc::new(NotifyRegistry::new());
    let ctx = Arc::new(ServerContext {
        engine: engine.clone(),
        secrets,
        notify: Arc::clone(&notify_registry),
    });

    // The transport backend owns the UDP socket; it feeds decoded traps
    // into this channel.
    let (_trap_tx, trap_rx) = trap_channel(512);
    info!(port = trap_port, "trap channel ready");

    let watcher = PollfileWatcher::new(engine.config().polling.file.clone());
    let scheduler = Scheduler::new(engine.clone(), cancel.child_token());

    let mut tasks = Vec::new();
    tasks.push(tokio::spawn(scheduler.run(watcher)));
    tasks.push(tokio::spawn(trap::dispatch_loop(
        engine.clone(),
        trap_rx,
        cancel.child_token(),
    )));
    tasks.push(tokio::spawn(persist::persist_loop(
        engine.clone(),
        cancel.child_token(),
    )));
    tasks.push(tokio::spawn(persist::maintenance_loop(
        engine.clone(),
        cancel.child_token(),
    )));
    tasks.push(tokio::spawn(server::serve_command(
        command_listener,
        ctx,
        cancel.child_token(),
    )));
    tasks.push(tokio::spawn(server::serve_notify(
        notify_listener,
        engine.clone(),
        notify_registry,
        cancel.child_token(),
    )));

    wait_for_shutdown(cli.stop_in).await;
    info!("shutting down");
    cancel.cancel();
    for task in tasks {
        task.abort();
    }

    // Final synchronous dump so a standby can restart from this state.
    let snapshot = Snapshot::gather(&engine);
    match persist::save_snapshot_sync(&snapshot, &state_file) {
        Ok(()) => info!(path = %state_file.display(), "final state dump written"),
        Err(err) => warn!(%err, "final state dump failed"),
    }
    Ok(())
}

fn init_tracing(config: &Configuration, debug: bool) {
    let directive = if debug {
        "debug".to_owned()
    } else {
        config.logging.level.clone()
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive)),
        )
        .with_target(false)
        .init();
}

fn client_factory(backend: &str) -> Result<ClientFactory, RunError> {
    match backend {
        "mock" => Ok(Arc::new(|_params| {
            let client: Arc<dyn SnmpClient> = Arc::new(MockSnmp::new());
            client
        })),
        other => Err(RunError::Config(format!(
            "unknown SNMP backend '{other}' (only \"mock\" is built in)"
        ))),
    }
}

async fn wait_for_shutdown(stop_in: Option<u64>) {
    let deadline = async {
        match stop_in {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };

    #[cfg(unix)]
    {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(signal) => signal,
            Err(err) => {
                warn!(%err, "cannot listen for SIGTERM");
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    () = deadline => {}
                }
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("interrupt received"),
            _ = sigterm.recv() => info!("SIGTERM received"),
            () = deadline => info!("stop-in deadline reached"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("interrupt received"),
            () = deadline => info!("stop-in deadline reached"),
        }
    }
}
