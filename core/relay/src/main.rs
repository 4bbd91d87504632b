//! Hydrascope relay entrypoint.
//!
//! A long-lived, single-router service: page probes report per-tab status,
//! panels subscribe to a tab, and the relay forwards each status change to
//! whichever panel is watching. Clients speak newline-delimited JSON over a
//! Unix socket; the first frame of every connection is a handshake naming the
//! client's role.

use fs_err as fs;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::Shutdown;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, TrySendError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use hydrascope_core::{debug_log_enabled, StorageConfig};
use hydrascope_relay_protocol::{
    encode_frame, parse_hello, parse_panel_message, parse_probe_message, ErrorInfo, PortRole,
    RelayMessage, TabId, MAX_FRAME_BYTES,
};

mod router;

use router::{Channel, ChannelId, Router};

const HANDSHAKE_TIMEOUT_SECS: u64 = 2;
const WRITE_TIMEOUT_SECS: u64 = 2;
const OUTBOX_FRAMES: usize = 32;

type SharedRouter = Arc<Mutex<Router<StreamChannel>>>;

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

fn main() {
    init_logging();

    let socket_path = match relay_socket_path() {
        Ok(path) => path,
        Err(err) => {
            error!(error = %err, "Failed to resolve relay socket path");
            std::process::exit(1);
        }
    };

    if let Err(err) = prepare_socket_dir(&socket_path) {
        error!(error = %err, "Failed to prepare relay socket directory");
        std::process::exit(1);
    }

    if let Err(err) = remove_existing_socket(&socket_path) {
        error!(error = %err, path = %socket_path.display(), "Failed to remove existing socket");
        std::process::exit(1);
    }

    let listener = match UnixListener::bind(&socket_path) {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, path = %socket_path.display(), "Failed to bind relay socket");
            std::process::exit(1);
        }
    };

    info!(path = %socket_path.display(), "Hydrascope relay started");

    let router: SharedRouter = Arc::new(Mutex::new(Router::new()));

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let router = Arc::clone(&router);
                thread::spawn(move || handle_connection(stream, router));
            }
            Err(err) => {
                warn!(error = %err, "Failed to accept relay connection");
            }
        }
    }
}

fn init_logging() {
    let filter = if debug_log_enabled() {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn relay_socket_path() -> Result<PathBuf, String> {
    let storage = StorageConfig::from_home().map_err(String::from)?;
    Ok(storage.relay_socket())
}

fn prepare_socket_dir(socket_path: &Path) -> Result<(), String> {
    let parent = socket_path
        .parent()
        .ok_or_else(|| "Socket path has no parent".to_string())?;
    fs::create_dir_all(parent).map_err(|err| format!("Failed to create socket directory: {}", err))
}

fn remove_existing_socket(socket_path: &Path) -> Result<(), String> {
    if socket_path.exists() {
        fs::remove_file(socket_path)
            .map_err(|err| format!("Failed to remove existing socket: {}", err))?;
    }
    Ok(())
}

fn lock_router(router: &SharedRouter) -> MutexGuard<'_, Router<StreamChannel>> {
    router.lock().unwrap_or_else(PoisonError::into_inner)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Connections
// ═══════════════════════════════════════════════════════════════════════════════

/// Write half of a panel socket.
///
/// Frames are queued for a dedicated writer thread, so posting never blocks
/// while the router lock is held. A panel that falls `OUTBOX_FRAMES` behind is
/// hung up on; its reader then sees EOF and unregisters it.
#[derive(Clone)]
struct StreamChannel {
    id: ChannelId,
    outbox: mpsc::SyncSender<Vec<u8>>,
    socket: Arc<UnixStream>,
}

impl StreamChannel {
    fn spawn(id: ChannelId, stream: UnixStream) -> io::Result<Self> {
        let socket = Arc::new(stream.try_clone()?);
        let (outbox, frames) = mpsc::sync_channel(OUTBOX_FRAMES);
        thread::Builder::new()
            .name(format!("hydrascope-panel-{}", id))
            .spawn(move || write_frames(id, stream, frames))?;
        Ok(Self { id, outbox, socket })
    }

    fn hang_up(&self) {
        let _ = self.socket.shutdown(Shutdown::Both);
    }
}

impl Channel for StreamChannel {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn post(&self, message: &RelayMessage) -> Result<(), String> {
        let frame = encode_frame(message).map_err(|err| err.to_string())?;
        match self.outbox.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.hang_up();
                Err("panel is not keeping up; closing".to_string())
            }
            Err(TrySendError::Disconnected(_)) => {
                self.hang_up();
                Err("panel writer has stopped".to_string())
            }
        }
    }
}

/// Drains queued frames until every sender is gone or a write fails.
fn write_frames(channel: ChannelId, mut stream: UnixStream, frames: mpsc::Receiver<Vec<u8>>) {
    for frame in frames {
        if let Err(err) = stream.write_all(&frame).and_then(|_| stream.flush()) {
            warn!(channel, error = %err, "Failed to write panel frame; closing");
            let _ = stream.shutdown(Shutdown::Both);
            return;
        }
    }
}

fn handle_connection(stream: UnixStream, router: SharedRouter) {
    let channel_id = NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed);
    let _ = stream.set_write_timeout(Some(Duration::from_secs(WRITE_TIMEOUT_SECS)));

    let writer = match stream.try_clone() {
        Ok(writer) => writer,
        Err(err) => {
            warn!(channel = channel_id, error = %err, "Failed to clone relay stream");
            return;
        }
    };
    let _ = stream.set_read_timeout(Some(Duration::from_secs(HANDSHAKE_TIMEOUT_SECS)));
    let mut reader = BufReader::new(stream);

    let role = match read_frame(&mut reader).and_then(|line| match line {
        Some(line) => parse_hello(&line).map(|(_, role)| role),
        None => Err(ErrorInfo::new("empty_request", "connection closed before handshake")),
    }) {
        Ok(role) => role,
        Err(err) => {
            warn!(channel = channel_id, code = %err.code, message = %err.message, "Rejected relay handshake");
            return;
        }
    };
    let _ = reader.get_ref().set_read_timeout(None);

    match role {
        PortRole::Probe { tab_id } => serve_probe(reader, channel_id, tab_id, &router),
        PortRole::Panel => match StreamChannel::spawn(channel_id, writer) {
            Ok(channel) => serve_panel(reader, channel, &router),
            Err(err) => {
                warn!(channel = channel_id, error = %err, "Failed to start panel writer");
            }
        },
    }
}

fn serve_probe(mut reader: BufReader<UnixStream>, channel_id: ChannelId, tab_id: TabId, router: &SharedRouter) {
    lock_router(router).probe_connected(tab_id, channel_id);

    loop {
        match read_frame(&mut reader) {
            Ok(Some(line)) => match parse_probe_message(&line) {
                Ok(message) => lock_router(router).probe_message(tab_id, message),
                Err(err) => {
                    warn!(tab_id, code = %err.code, message = %err.message, "Skipping invalid probe frame");
                }
            },
            Ok(None) => break,
            Err(err) => {
                warn!(tab_id, code = %err.code, message = %err.message, "Closing probe connection");
                break;
            }
        }
    }

    lock_router(router).probe_disconnected(tab_id, channel_id);
}

fn serve_panel(mut reader: BufReader<UnixStream>, channel: StreamChannel, router: &SharedRouter) {
    info!(channel = channel.id, "Panel connected");

    loop {
        match read_frame(&mut reader) {
            Ok(Some(line)) => match parse_panel_message(&line) {
                Ok(message) => lock_router(router).panel_message(channel.clone(), message),
                Err(err) => {
                    warn!(channel = channel.id, code = %err.code, message = %err.message, "Skipping invalid panel frame");
                }
            },
            Ok(None) => break,
            Err(err) => {
                warn!(channel = channel.id, code = %err.code, message = %err.message, "Closing panel connection");
                break;
            }
        }
    }

    lock_router(router).panel_disconnected(channel.id);
}

/// Reads one `\n`-terminated frame. `Ok(None)` means the peer closed.
fn read_frame<R: BufRead>(reader: &mut R) -> Result<Option<Vec<u8>>, ErrorInfo> {
    let mut line = Vec::new();
    let limit = MAX_FRAME_BYTES as u64 + 1;

    match reader.by_ref().take(limit).read_until(b'\n', &mut line) {
        Ok(0) => Ok(None),
        Ok(_) if line.len() > MAX_FRAME_BYTES => Err(ErrorInfo::new(
            "frame_too_large",
            "frame exceeded maximum size",
        )),
        Ok(_) => Ok(Some(line)),
        Err(err)
            if err.kind() == std::io::ErrorKind::WouldBlock
                || err.kind() == std::io::ErrorKind::TimedOut =>
        {
            Err(ErrorInfo::new("read_timeout", "frame timed out"))
        }
        Err(err) => Err(ErrorInfo::new(
            "read_error",
            format!("failed to read frame: {}", err),
        )),
    }
}
