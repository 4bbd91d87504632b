//! `hydrascope panel`: watch one tab through the relay.

use hydrascope_core::{
    ConnectionOptions, HydrationErrorStore, HydrationErrorSummary, IndentFormatter, PanelSession,
    PanelView, PersistentConnection, StorageConfig, ThreadScheduler, UnixSocketConnector,
};
use hydrascope_relay_protocol::{Hello, PageStatus, PanelMessage, RelayMessage, TabId};
use serde::Serialize;
use std::io::{self, Write};
use std::sync::mpsc;
use std::sync::Arc;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusLine {
    tab_id: TabId,
    status: PageStatus,
    current_error: Option<HydrationErrorSummary>,
}

impl StatusLine {
    fn from_view(tab_id: TabId, view: &PanelView) -> Self {
        Self {
            tab_id,
            status: view.status,
            current_error: view.current_error.as_ref().map(|record| record.summary()),
        }
    }
}

pub fn run(tab_id: TabId, exit_on_complete: bool) -> Result<(), String> {
    let storage = StorageConfig::from_home()?;
    let config = storage.load_config()?;

    let connector: UnixSocketConnector<PanelMessage, RelayMessage> =
        UnixSocketConnector::new(storage.relay_socket(), Hello::panel());
    let connection = PersistentConnection::new(
        connector,
        Arc::new(ThreadScheduler),
        ConnectionOptions::from(&config),
    );
    let session = PanelSession::new(
        tab_id,
        connection,
        HydrationErrorStore::open(&storage),
        Arc::new(IndentFormatter::default()),
    );

    let (tx, rx) = mpsc::channel::<PanelView>();
    session.on_update(move |view| {
        let _ = tx.send(view.clone());
    });
    session.start();
    tracing::info!(tab_id, "Panel started");

    let stdout = io::stdout();
    for view in rx {
        let line = serde_json::to_string(&StatusLine::from_view(tab_id, &view))
            .map_err(|e| format!("Failed to encode status: {}", e))?;
        let mut out = stdout.lock();
        writeln!(out, "{}", line)
            .and_then(|_| out.flush())
            .map_err(|e| format!("Failed to write status: {}", e))?;

        if exit_on_complete && view.status.is_terminal() {
            break;
        }
    }

    session.stop();
    Ok(())
}
