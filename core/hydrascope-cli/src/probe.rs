//! `hydrascope probe`: page probe fed by host signals on stdin.
//!
//! Each stdin line is one JSON [`HostSignal`]. When stdin closes the probe
//! keeps running until the page reaches a terminal status, so a pending
//! detection watchdog still gets to report.

use hydrascope_core::{
    ConnectionOptions, HostSignal, IndentFormatter, PageProbe, PersistentConnection, ProbeOptions,
    Scheduler, StorageConfig, ThreadScheduler, UnixSocketConnector,
};
use hydrascope_relay_protocol::{Hello, ProbeMessage, TabId};
use std::io::{self, BufRead};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL_MS: u64 = 25;

pub fn run(tab_id: TabId, linger: Duration) -> Result<(), String> {
    let storage = StorageConfig::from_home()?;
    let config = storage.load_config()?;

    let connector: UnixSocketConnector<ProbeMessage, serde_json::Value> =
        UnixSocketConnector::new(storage.relay_socket(), Hello::probe(tab_id));
    let scheduler: Arc<dyn Scheduler> = Arc::new(ThreadScheduler);
    let connection =
        PersistentConnection::new(connector, Arc::clone(&scheduler), ConnectionOptions::from(&config));
    connection.connect();

    let probe = PageProbe::new(
        Arc::new(connection.clone()),
        scheduler,
        Arc::new(IndentFormatter::default()),
        ProbeOptions::from(&config),
    );
    tracing::info!(tab_id, "Probe started");

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line.map_err(|e| format!("Failed to read stdin: {}", e))?;
        if line.trim().is_empty() {
            continue;
        }
        match HostSignal::parse(&line) {
            Ok(signal) => probe.handle_host(signal),
            Err(e) => tracing::warn!(error = %e, "Skipping invalid host signal"),
        }
    }

    let deadline = Instant::now() + linger;
    while !probe.status().is_terminal() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(POLL_INTERVAL_MS));
    }
    // One retry window so a resend queued while reconnecting can go out.
    thread::sleep(config.send_retry_delay());

    tracing::info!(tab_id, status = %probe.status(), "Probe finished");
    connection.disconnect();
    Ok(())
}
