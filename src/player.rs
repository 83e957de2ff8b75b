//! The song player: one external child process per song.
//!
//! The consumer owns the child's lifetime; every other part of the daemon
//! influences it only by delivering signals to the pid recorded in the data
//! store. A signal race against a child that already exited is normal and
//! handled by dropping the stale pid.

use std::ffi::OsString;
use std::io::Write as _;
use std::os::unix::ffi::OsStringExt;
use std::process::Stdio;
use std::time::Duration;

use camino::Utf8Path;
use itertools::Itertools;
use jiff::Zoned;
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use crate::store::Shared;
use crate::util::{clock_stamp, display_item, now_secs};
use crate::wire::Fault;

const PLAYER_LOG: &str = "player_log";

/// Delay between TSTP and STOP when pausing, so players with terminal
/// handling get a chance to react before the hard stop.
const PAUSE_GRACE: Duration = Duration::from_millis(100);

/// Plays one song and returns when it is over. Never fails: a song with no
/// matching player or a spawn error turns into a logged no-op with
/// `ignore_finish` set, so the history is not polluted.
pub async fn run(store: &Shared, confdir: &Utf8Path, song: &[u8]) {
    let argv = store.lock().config.resolve(song);
    let Some(argv) = argv else {
        info!("No player could be found for \"{}\".", display_item(song));
        store.lock().ignore_finish = true;
        return;
    };
    let rendered = argv.iter().map(|arg| display_item(arg)).join(" ");

    let mut command = match player_command(confdir, &argv, &rendered) {
        Ok(command) => command,
        Err(e) => {
            error!("Cannot open player log file: {e}");
            store.lock().ignore_finish = true;
            return;
        }
    };
    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            error!("Could not execute \"{rendered}\": {e}");
            store.lock().ignore_finish = true;
            return;
        }
    };
    if let Some(pid) = child.id() {
        let mut s = store.lock();
        s.player_pid = Some(pid);
        debug!("player pid {pid}, state {}", s.player_state());
    }
    match child.wait().await {
        Ok(status) => debug!("player exited: {status}"),
        Err(e) => warn!("Error waiting for player: {e}"),
    }
    store.lock().player_pid = None;
}

/// The child, wired up with stdin from the null device and both output
/// streams appended to the player log behind a timestamped header.
fn player_command(
    confdir: &Utf8Path,
    argv: &[Vec<u8>],
    rendered: &str,
) -> std::io::Result<Command> {
    let mut logfile = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(confdir.join(PLAYER_LOG))?;
    writeln!(logfile, "{} Executing \"{rendered}\"", clock_stamp(&Zoned::now()))?;
    let stdout = logfile.try_clone()?;

    let mut command = Command::new(OsString::from_vec(argv[0].clone()));
    command
        .args(argv[1..].iter().map(|arg| OsString::from_vec(arg.clone())))
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(logfile));
    Ok(command)
}

/// Sends one signal to the player. A child that already exited (ESRCH) is
/// not an error: the stale pid is dropped and `false` comes back.
fn deliver(store: &Shared, pid: u32, signal: Signal, method: &str) -> Result<bool, Fault> {
    match signal::kill(Pid::from_raw(pid as i32), signal) {
        Ok(()) => Ok(true),
        Err(Errno::ESRCH) => {
            store.lock().player_pid = None;
            Ok(false)
        }
        Err(e) => Err(Fault::internal(format!("{e} (in method \"{method}\")"))),
    }
}

fn signal_target(store: &Shared) -> Option<u32> {
    let s = store.lock();
    if s.current.is_empty() { None } else { s.player_pid }
}

/// Suspends the player: TSTP first, then STOP after a short grace period.
pub fn pause(store: &Shared) -> Result<(), Fault> {
    let Some(pid) = signal_target(store) else {
        return Ok(());
    };
    if !deliver(store, pid, Signal::SIGTSTP, "pause")? {
        return Ok(());
    }
    std::thread::sleep(PAUSE_GRACE);
    if !deliver(store, pid, Signal::SIGSTOP, "pause")? {
        return Ok(());
    }
    let mut s = store.lock();
    if !s.paused {
        s.last_pause = now_secs();
    }
    s.paused = true;
    Ok(())
}

pub fn unpause(store: &Shared) -> Result<(), Fault> {
    let Some(pid) = signal_target(store) else {
        return Ok(());
    };
    deliver(store, pid, Signal::SIGCONT, "unpause")?;
    let mut s = store.lock();
    if s.paused {
        s.accumulated_paused += now_secs() - s.last_pause;
    }
    s.paused = false;
    Ok(())
}

/// Terminates the current player so the consumer moves on. ogg123 reacts
/// badly to TERM and gets INT instead; the trailing unpause makes sure a
/// stopped child actually observes the termination.
pub fn skip(store: &Shared) -> Result<(), Fault> {
    let plan = {
        let s = store.lock();
        if s.current.is_empty() {
            None
        } else {
            s.player_pid.map(|pid| {
                let use_int = s.config.program_for(&s.current) == Some("ogg123");
                (pid, use_int)
            })
        }
    };
    let Some((pid, use_int)) = plan else {
        return Ok(());
    };
    let sig = if use_int { Signal::SIGINT } else { Signal::SIGTERM };
    deliver(store, pid, sig, "skip")?;
    unpause(store)
}

/// Flags the consumer down and forces the in-flight song to end. The
/// consumer exits once its current `run` returns.
pub fn die(store: &Shared) -> Result<(), Fault> {
    {
        let mut s = store.lock();
        s.quit = true;
        if !s.current.is_empty() {
            s.ignore_finish = true;
        }
    }
    skip(store)
}

/// Best-effort child termination for shutdown cleanup.
pub fn terminate(store: &Shared) {
    if let Some(pid) = store.lock().player_pid {
        let _ = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
        let _ = signal::kill(Pid::from_raw(pid as i32), Signal::SIGCONT);
    }
}
