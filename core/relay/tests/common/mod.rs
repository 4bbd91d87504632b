//! Spawning and tearing down a relay for integration tests.

#![allow(dead_code)]

use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};
use tempfile::TempDir;

pub struct RelayGuard {
    child: Child,
}

impl Drop for RelayGuard {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

pub fn spawn_relay(home: &Path) -> RelayGuard {
    let child = Command::new(env!("CARGO_BIN_EXE_hydrascope-relay"))
        .env("HOME", home)
        .env_remove("HYDRASCOPE_RELAY_SOCKET")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to spawn hydrascope-relay");
    RelayGuard { child }
}

pub fn socket_path(home: &Path) -> PathBuf {
    home.join(".hydrascope").join("relay.sock")
}

pub fn wait_for_socket(path: &Path, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if path.exists() && UnixStream::connect(path).is_ok() {
            return;
        }
        sleep(Duration::from_millis(25));
    }
    panic!("timed out waiting for relay socket at {}", path.display());
}

// Short prefix under /tmp keeps the socket path inside SUN_LEN.
pub fn temp_home() -> TempDir {
    tempfile::Builder::new()
        .prefix("hs-relay")
        .tempdir_in("/tmp")
        .expect("failed to create temp HOME")
}

/// Spawns a relay under a fresh HOME and waits for its socket.
pub fn start() -> (TempDir, RelayGuard, PathBuf) {
    let home = temp_home();
    let socket = socket_path(home.path());
    let guard = spawn_relay(home.path());
    wait_for_socket(&socket, Duration::from_secs(5));
    (home, guard, socket)
}
