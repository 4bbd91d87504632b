//! Page probe and panel talking through a real relay with the production
//! socket transport, including a relay restart underneath them.

use hydrascope_core::{
    ConnectionOptions, HookSignal, HydrationErrorStore, IndentFormatter, PageProbe, PageSignal,
    PanelSession, PanelView, PersistentConnection, ProbeOptions, StorageConfig, ThreadScheduler,
    UnixSocketConnector,
};
use hydrascope_relay_protocol::{Hello, PageStatus, PanelMessage, ProbeMessage, RelayMessage};
use std::path::Path;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::sleep;
use std::time::{Duration, Instant};

mod common;

use common::{socket_path, spawn_relay, start, wait_for_socket};

const TAB: u32 = 12;
const TIMEOUT: Duration = Duration::from_secs(5);

type ProbeConnection = PersistentConnection<UnixSocketConnector<ProbeMessage, serde_json::Value>>;
type PanelConnector = UnixSocketConnector<PanelMessage, RelayMessage>;

fn options() -> ConnectionOptions {
    ConnectionOptions {
        reconnect_base: Duration::from_millis(50),
        reconnect_max: Duration::from_millis(200),
        send_retry: Duration::from_millis(100),
    }
}

fn page_probe(socket: &Path) -> (PageProbe, ProbeConnection) {
    let connection = PersistentConnection::new(
        UnixSocketConnector::new(socket.to_path_buf(), Hello::probe(TAB)),
        Arc::new(ThreadScheduler),
        options(),
    );
    connection.connect();
    let probe = PageProbe::new(
        Arc::new(connection.clone()),
        Arc::new(ThreadScheduler),
        Arc::new(IndentFormatter::default()),
        ProbeOptions::default(),
    );
    (probe, connection)
}

fn panel(
    socket: &Path,
    store_root: &Path,
) -> (PanelSession<PanelConnector>, mpsc::Receiver<PanelView>) {
    let connection = PersistentConnection::new(
        UnixSocketConnector::new(socket.to_path_buf(), Hello::panel()),
        Arc::new(ThreadScheduler),
        options(),
    );
    let session = PanelSession::new(
        TAB,
        connection,
        HydrationErrorStore::open(&StorageConfig::with_root(store_root.to_path_buf())),
        Arc::new(IndentFormatter::default()),
    );
    let (tx, rx) = mpsc::channel();
    session.on_update(move |view| {
        let _ = tx.send(view.clone());
    });
    session.start();
    (session, rx)
}

fn page(mount: &str) -> String {
    format!(
        "<!doctype html><html><body><div id=\"__next\">{}</div></body></html>",
        mount
    )
}

fn drive_mismatch(probe: &PageProbe) {
    probe.handle_page(PageSignal::NavigationStart {
        url: "https://shop.example/cart".to_string(),
    });
    probe.handle_page(PageSignal::DomContentLoaded {
        html: page(r#"<div id="a"><span>X</span></div>"#),
    });
    probe.handle_hook(HookSignal::Detected);
    probe.handle_hook(HookSignal::Committed {
        root: 1,
        html: page(r#"<div id="a"><span>Y</span></div>"#),
    });
}

fn wait_for(
    rx: &mpsc::Receiver<PanelView>,
    what: &str,
    done: impl Fn(&PanelView) -> bool,
) -> PanelView {
    let deadline = Instant::now() + TIMEOUT;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok(view) if done(&view) => return view,
            Ok(_) => continue,
            Err(_) => panic!("timed out waiting for {}", what),
        }
    }
}

fn wait_until(what: &str, done: impl Fn() -> bool) {
    let deadline = Instant::now() + TIMEOUT;
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        sleep(Duration::from_millis(20));
    }
}

#[test]
fn mismatch_is_stored_and_panel_survives_relay_restart() {
    let (home, guard, socket) = start();
    let store_root = tempfile::tempdir().unwrap();

    let (session, updates) = panel(&socket, store_root.path());
    wait_until("panel connection", || session.connection().is_connected());
    // devtools-ready is sent right after connect; let the relay register it.
    sleep(Duration::from_millis(150));

    let (probe, probe_connection) = page_probe(&socket);
    drive_mismatch(&probe);

    let view = wait_for(&updates, "mismatch report", |view| {
        view.status == PageStatus::HydrationComplete && view.current_error.is_some()
    });
    let record = view.current_error.clone().unwrap();
    assert_eq!(record.url, "https://shop.example/cart");
    assert_eq!(record.origin, "https://shop.example");
    assert_eq!(record.diff_result.initial_root_html, "<span>X</span>");
    assert_eq!(view.active_error_id.as_deref(), Some(record.id.as_str()));

    let storage = StorageConfig::with_root(store_root.path().to_path_buf());
    let mut store = HydrationErrorStore::open(&storage);
    store.init("https://shop.example").unwrap();
    let listed: Vec<String> = store
        .errors_list()
        .unwrap()
        .into_iter()
        .map(|summary| summary.id)
        .collect();
    assert_eq!(listed, vec![record.id.clone()]);
    assert_eq!(store.error_detail(&record.id).unwrap(), Some(record));

    drop(guard);
    wait_until("both clients to notice the relay is gone", || {
        !session.connection().is_connected() && !probe_connection.is_connected()
    });

    let _restarted = spawn_relay(home.path());
    wait_for_socket(&socket_path(home.path()), TIMEOUT);
    wait_until("both clients to reconnect", || {
        session.connection().is_connected() && probe_connection.is_connected()
    });
    sleep(Duration::from_millis(200));

    probe.handle_page(PageSignal::NavigationStart {
        url: "https://shop.example/checkout".to_string(),
    });
    let view = wait_for(&updates, "loading after restart", |view| {
        view.status == PageStatus::Loading
    });
    assert!(view.current_error.is_none());

    session.stop();
    probe_connection.disconnect();
}
