//! The request listeners.
//!
//! Two listeners can be active at once: a Unix socket under the config
//! directory and an optional TCP socket. Both feed the same registry and
//! data store. Sockets are bound synchronously (before daemonization) and
//! adopted into the runtime later; each accepted connection gets its own
//! task, and each request executes on the blocking pool so a reply still
//! goes out while the daemon is shutting down.

use std::io::{BufRead, BufReader as StdBufReader};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use color_eyre::Result;
use color_eyre::eyre::{Context as _, eyre};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::watch;
use tokio::task;
use tracing::{debug, info, warn};

use crate::methods::{Context, Registry};
use crate::wire::{Fault, Request, Response};

#[cfg(test)]
mod tests;

pub const SOCKET_FILE: &str = "socket";

const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// The bound sockets, still in blocking std form.
pub struct Listeners {
    pub unix: Option<std::os::unix::net::UnixListener>,
    pub tcp: Option<std::net::TcpListener>,
    /// Set when we own the socket file and must remove it on exit.
    pub socket_path: Option<Utf8PathBuf>,
}

/// Binds the local and/or TCP endpoints, recovering from a stale socket
/// file and refusing to start when another server already answers.
pub fn bind(
    confdir: &Utf8Path,
    unix_enabled: bool,
    tcp_port: Option<u16>,
    local_only: bool,
) -> Result<Listeners> {
    let mut listeners = Listeners { unix: None, tcp: None, socket_path: None };

    if unix_enabled {
        let path = confdir.join(SOCKET_FILE);
        listeners.unix = Some(bind_unix(&path)?);
        listeners.socket_path = Some(path);
    }

    if let Some(port) = tcp_port {
        let host = if local_only { Ipv4Addr::LOCALHOST } else { Ipv4Addr::UNSPECIFIED };
        let addr = SocketAddr::from((host, port));
        listeners.tcp = Some(bind_tcp(addr, port)?);
    }

    Ok(listeners)
}

fn bind_unix(path: &Utf8Path) -> Result<std::os::unix::net::UnixListener> {
    match std::os::unix::net::UnixListener::bind(path) {
        Ok(listener) => Ok(listener),
        Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
            if probe_unix(path) {
                return Err(eyre!(
                    "Tried to start a new moosicd, but an instance of moosicd \
                     is already running."
                ));
            }
            // The socket file exists but nothing answers behind it.
            warn!("Cleaning up stale socket file: \"{path}\".");
            std::fs::remove_file(path)
                .wrap_err_with(|| format!("could not remove stale socket {path}"))?;
            std::os::unix::net::UnixListener::bind(path)
                .wrap_err_with(|| format!("Socket error: {path}"))
        }
        Err(e) => Err(e).wrap_err_with(|| format!("Socket error: {path}")),
    }
}

fn bind_tcp(addr: SocketAddr, port: u16) -> Result<std::net::TcpListener> {
    match std::net::TcpListener::bind(addr) {
        Ok(listener) => Ok(listener),
        Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
            if probe_tcp(SocketAddr::from((Ipv4Addr::LOCALHOST, port))) {
                Err(eyre!("A server is already running on port {port}"))
            } else {
                Err(eyre!(
                    "localhost:{port} is somehow in use already, but I cannot \
                     contact a server at that address."
                ))
            }
        }
        Err(e) => Err(e).wrap_err_with(|| format!("Socket error: {addr}")),
    }
}

/// Whether a live server answers a `no_op` at the given endpoint.
fn probe_unix(path: &Utf8Path) -> bool {
    let Ok(stream) = std::os::unix::net::UnixStream::connect(path) else {
        return false;
    };
    let _ = stream.set_read_timeout(Some(PROBE_TIMEOUT));
    let _ = stream.set_write_timeout(Some(PROBE_TIMEOUT));
    probe_stream(stream)
}

fn probe_tcp(addr: SocketAddr) -> bool {
    let Ok(stream) = std::net::TcpStream::connect_timeout(&addr, PROBE_TIMEOUT) else {
        return false;
    };
    let _ = stream.set_read_timeout(Some(PROBE_TIMEOUT));
    let _ = stream.set_write_timeout(Some(PROBE_TIMEOUT));
    probe_stream(stream)
}

fn probe_stream<S: std::io::Read + std::io::Write>(mut stream: S) -> bool {
    let request = Request { method: "no_op".to_owned(), params: Vec::new() };
    let Ok(line) = serde_json::to_string(&request) else {
        return false;
    };
    if stream.write_all(line.as_bytes()).is_err() || stream.write_all(b"\n").is_err() {
        return false;
    }
    let mut reply = String::new();
    if StdBufReader::new(stream).read_line(&mut reply).is_err() {
        return false;
    }
    serde_json::from_str::<serde_json::Value>(&reply)
        .map(|v| v.get("result").is_some())
        .unwrap_or(false)
}

/// Handle on the running listener tasks, used by the shutdown path.
pub struct ServerHandle {
    shutdown: watch::Sender<bool>,
    inflight: Arc<AtomicUsize>,
}

/// Adopts the bound sockets into the runtime and starts the accept loops.
pub fn spawn(listeners: Listeners, registry: Arc<Registry>, ctx: Context) -> Result<ServerHandle> {
    let (shutdown, _) = watch::channel(false);
    let inflight = Arc::new(AtomicUsize::new(0));

    if let Some(unix) = listeners.unix {
        unix.set_nonblocking(true)
            .wrap_err("could not make local socket non-blocking")?;
        let listener = tokio::net::UnixListener::from_std(unix)
            .wrap_err("could not adopt local socket")?;
        task::spawn(accept_unix(
            listener,
            Arc::clone(&registry),
            ctx.clone(),
            shutdown.subscribe(),
            Arc::clone(&inflight),
        ));
        info!("listening on the local socket");
    }
    if let Some(tcp) = listeners.tcp {
        tcp.set_nonblocking(true)
            .wrap_err("could not make TCP socket non-blocking")?;
        let local_addr = tcp.local_addr().ok();
        let listener =
            tokio::net::TcpListener::from_std(tcp).wrap_err("could not adopt TCP socket")?;
        task::spawn(accept_tcp(
            listener,
            registry,
            ctx,
            shutdown.subscribe(),
            Arc::clone(&inflight),
        ));
        if let Some(addr) = local_addr {
            info!("listening on {addr}");
        }
    }

    Ok(ServerHandle { shutdown, inflight })
}

impl ServerHandle {
    /// Stops accepting new connections and waits (bounded) for requests
    /// that are already executing to finish their replies.
    pub async fn shutdown(self, drain: Duration) {
        let _ = self.shutdown.send(true);
        let deadline = tokio::time::Instant::now() + drain;
        while self.inflight.load(Ordering::SeqCst) > 0
            && tokio::time::Instant::now() < deadline
        {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

async fn accept_unix(
    listener: tokio::net::UnixListener,
    registry: Arc<Registry>,
    ctx: Context,
    mut shutdown: watch::Receiver<bool>,
    inflight: Arc<AtomicUsize>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _addr)) => spawn_client(stream, &registry, &ctx, &inflight),
                Err(e) => {
                    warn!("Could not accept connection: {e}");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }
}

async fn accept_tcp(
    listener: tokio::net::TcpListener,
    registry: Arc<Registry>,
    ctx: Context,
    mut shutdown: watch::Receiver<bool>,
    inflight: Arc<AtomicUsize>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    debug!("client connected from {addr}");
                    spawn_client(stream, &registry, &ctx, &inflight);
                }
                Err(e) => {
                    warn!("Could not accept connection: {e}");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }
}

fn spawn_client<S>(stream: S, registry: &Arc<Registry>, ctx: &Context, inflight: &Arc<AtomicUsize>)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let registry = Arc::clone(registry);
    let ctx = ctx.clone();
    let inflight = Arc::clone(inflight);
    task::spawn(async move {
        if let Err(e) = handle_connection(stream, registry, ctx, inflight).await {
            debug!("client connection ended: {e:#}");
        }
    });
}

/// Serves one connection: a request per line, a reply per line, until the
/// client hangs up.
async fn handle_connection<S>(
    stream: S,
    registry: Arc<Registry>,
    ctx: Context,
    inflight: Arc<AtomicUsize>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines
        .next_line()
        .await
        .wrap_err("Could not read request from client")?
    {
        if line.trim().is_empty() {
            continue;
        }
        let guard = InflightGuard::new(&inflight);
        let worker_registry = Arc::clone(&registry);
        let worker_ctx = ctx.clone();
        let reply = task::spawn_blocking(move || respond(&worker_registry, &worker_ctx, &line))
            .await
            .unwrap_or_else(|_| Response::Fault(Fault::internal("request worker failed")));
        let mut line = reply.into_line();
        line.push('\n');
        writer
            .write_all(line.as_bytes())
            .await
            .wrap_err("Failed to write response to client")?;
        drop(guard);
    }
    Ok(())
}

/// Parses and dispatches a single request line.
pub fn respond(registry: &Registry, ctx: &Context, line: &str) -> Response {
    let request: Request = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => return Response::Fault(Fault::parse_error(format!("bad request: {e}"))),
    };
    debug!("dispatching {}", request.method);
    match registry.dispatch(ctx, &request.method, request.params, false) {
        Ok(value) => Response::Result(value),
        Err(fault) => Response::Fault(fault),
    }
}

/// Counts a request from dispatch until its reply has been written, so
/// shutdown can drain workers instead of cutting replies off.
struct InflightGuard<'a>(&'a AtomicUsize);

impl<'a> InflightGuard<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        InflightGuard(counter)
    }
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
