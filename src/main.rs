//! moosicd: a background daemon that owns a queue of songs and plays them
//! one after another through external player commands.
//!
//! The daemon has three moving parts: the request listeners (which accept
//! client calls and dispatch them against the method registry), the queue
//! consumer (which pops songs and supervises the player child), and the
//! periodic save timer. They all share one data store behind one mutex.

use std::sync::Arc;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use color_eyre::eyre::{Context as _, eyre};
use color_eyre::Result;
use tracing::{error, info, warn};

use crate::cli::Cli;
use crate::methods::{Context, Registry};
use crate::player_config::PlayerConfig;
use crate::store::{DataStore, Shared};

mod cli;
mod consumer;
mod logging;
mod methods;
mod persist;
mod player;
mod player_config;
mod range;
mod server;
mod store;
mod util;
mod wire;

const CONFIG_FILE: &str = "config";
const SERVER_LOG_FILE: &str = "server_log";
const SAVED_STATE_FILE: &str = "saved_state";

/// How long shutdown waits for in-flight requests to finish their replies.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

fn main() -> Result<()> {
    color_eyre::install()?;
    let options = Cli::parse();
    if !options.rest.is_empty() {
        eprintln!("Warning: non-option command line arguments are ignored.");
    }

    let confdir = match &options.config {
        Some(dir) => dir.clone(),
        None => default_confdir()?,
    };
    prepare_confdir(&confdir)?;

    let conffile = confdir.join(CONFIG_FILE);
    PlayerConfig::ensure_default(&conffile)?;
    let config = PlayerConfig::load(&conffile)
        .wrap_err_with(|| format!("Error reading configuration file \"{conffile}\""))?;

    let sink = if options.stdout {
        logging::LogSink::Stdout
    } else {
        logging::LogSink::File(confdir.join(SERVER_LOG_FILE))
    };
    logging::init(&sink, options.verbosity())?;
    info!("Starting up.");

    let mut store = DataStore::new(config);
    let state_path = confdir.join(SAVED_STATE_FILE);
    persist::load(&mut store, &state_path);
    // An explicit --history-size wins over whatever the saved state carried.
    if let Some(limit) = options.history_size {
        store.max_history = limit;
        store.trim_history();
    }

    // Sockets are bound (and stale ones recovered) before daemonizing, so
    // startup failures still reach the terminal.
    let listeners = server::bind(
        &confdir,
        options.unix_enabled(),
        options.tcp_port(),
        options.local_only,
    )?;
    let socket_path = listeners.socket_path.clone();

    if options.daemonize() {
        nix::unistd::daemon(true, false).wrap_err("could not daemonize")?;
        info!("Transformed into a daemon with PID: {}", std::process::id());
    }

    let store = Shared::new(store);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .wrap_err("could not start the async runtime")?;
    runtime.block_on(run(
        store.clone(),
        listeners,
        confdir,
        conffile,
        state_path.clone(),
    ));
    // Dropping the runtime joins the blocking pool, letting request workers
    // that are mid-reply finish before cleanup.
    drop(runtime);

    info!("Shutting down (PID: {}).", std::process::id());
    cleanup(&store, socket_path.as_deref(), &state_path);
    Ok(())
}

/// Everything that runs inside the runtime: listeners, save timer, signal
/// handlers, and the consumer loop on this task. Returns once `quit` is set
/// and the consumer has wound down.
async fn run(
    store: Shared,
    listeners: server::Listeners,
    confdir: Utf8PathBuf,
    conffile: Utf8PathBuf,
    state_path: Utf8PathBuf,
) {
    let registry = Arc::new(Registry::new());
    let ctx = Context { store: store.clone(), conffile: conffile.clone() };

    let handle = match server::spawn(listeners, registry, ctx) {
        Ok(handle) => handle,
        Err(e) => {
            error!("could not start the request listeners: {e:#}");
            return;
        }
    };
    tokio::spawn(persist::save_task(store.clone(), state_path));
    if let Err(e) = install_signal_handlers(store.clone(), conffile) {
        warn!("could not install signal handlers: {e}");
    }

    consumer::run(store.clone(), confdir).await;
    handle.shutdown(DRAIN_TIMEOUT).await;
}

/// HUP reloads the player config; INT, TERM, USR1 and USR2 shut the daemon
/// down the same way `die` does.
fn install_signal_handlers(store: Shared, conffile: Utf8PathBuf) -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = signal(SignalKind::hangup())?;
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut usr1 = signal(SignalKind::user_defined1())?;
    let mut usr2 = signal(SignalKind::user_defined2())?;

    tokio::spawn(async move {
        loop {
            let received = tokio::select! {
                _ = hangup.recv() => None,
                _ = interrupt.recv() => Some("SIGINT"),
                _ = terminate.recv() => Some("SIGTERM"),
                _ = usr1.recv() => Some("SIGUSR1"),
                _ = usr2.recv() => Some("SIGUSR2"),
            };
            match received {
                None => reload_config(&store, &conffile),
                Some(name) => {
                    info!("Killed by {name} (PID: {}).", std::process::id());
                    if let Err(e) = player::die(&store) {
                        warn!("error stopping the player: {e}");
                    }
                    break;
                }
            }
        }
    });
    Ok(())
}

fn reload_config(store: &Shared, conffile: &Utf8Path) {
    match PlayerConfig::load(conffile) {
        Ok(config) => {
            store.lock().config = config;
            info!("configuration reloaded");
        }
        Err(e) => {
            error!("The configuration file could not be reloaded! {conffile}: {e:#}");
        }
    }
}

/// Best-effort exit cleanup: remove the socket file we own, persist state,
/// terminate the player child.
fn cleanup(store: &Shared, socket_path: Option<&Utf8Path>, state_path: &Utf8Path) {
    if let Some(path) = socket_path
        && let Err(e) = std::fs::remove_file(path)
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!("could not remove socket file {path}: {e}");
    }
    persist::save_now(store, state_path);
    player::terminate(store);
}

fn default_confdir() -> Result<Utf8PathBuf> {
    let home = etcetera::home_dir().wrap_err("could not determine the home directory")?;
    let home = Utf8PathBuf::from_path_buf(home)
        .map_err(|path| eyre!("home directory {} is not valid UTF-8", path.display()))?;
    Ok(home.join(".moosic"))
}

fn prepare_confdir(dir: &Utf8Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    if dir.exists() {
        return Ok(());
    }
    std::fs::create_dir_all(dir)
        .wrap_err_with(|| format!("Error creating directory \"{dir}\""))?;
    std::fs::set_permissions(dir.as_std_path(), std::fs::Permissions::from_mode(0o700))
        .wrap_err_with(|| format!("Error restricting permissions on \"{dir}\""))
}
