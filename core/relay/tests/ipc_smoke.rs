use hydrascope_relay_protocol::{
    encode_frame, parse_relay_message, Hello, HydrationReport, PageStatus, PanelMessage,
    ProbeMessage, RelayMessage, StatusUpdate,
};
use std::io::{BufRead, BufReader, Read, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::thread::sleep;
use std::time::Duration;

mod common;

use common::start;

fn send<T: serde::Serialize>(stream: &mut UnixStream, frame: &T) {
    let bytes = encode_frame(frame).expect("encode frame");
    stream.write_all(&bytes).expect("write frame");
    stream.flush().expect("flush frame");
}

fn connect(socket: &Path, hello: &Hello) -> UnixStream {
    let mut stream = UnixStream::connect(socket).expect("failed to connect to relay");
    send(&mut stream, hello);
    stream
}

fn read_update(reader: &mut BufReader<UnixStream>) -> StatusUpdate {
    let mut line = Vec::new();
    reader.read_until(b'\n', &mut line).expect("read update");
    assert!(!line.is_empty(), "relay closed the panel connection");
    match parse_relay_message(&line).expect("parse update") {
        RelayMessage::DevtoolsStatusUpdate { data } => data,
    }
}

#[test]
fn late_panel_receives_snapshot_then_completion() {
    let (_home, _guard, socket) = start();

    let mut probe = connect(&socket, &Hello::probe(5));
    send(&mut probe, &ProbeMessage::PageLoading);
    send(&mut probe, &ProbeMessage::ReactDetected);
    sleep(Duration::from_millis(200));

    let panel = connect(&socket, &Hello::panel());
    panel
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("set read timeout");
    let mut panel_writer = panel.try_clone().expect("clone panel stream");
    let mut reader = BufReader::new(panel);
    send(&mut panel_writer, &PanelMessage::DevtoolsReady { tab_id: 5 });

    let snapshot = read_update(&mut reader);
    assert_eq!(snapshot.status, PageStatus::ReactDetected);
    assert_eq!(snapshot.current_error, None);

    send(
        &mut probe,
        &ProbeMessage::ReactHydrationFinished {
            data: HydrationReport::equal(),
        },
    );
    let finished = read_update(&mut reader);
    assert_eq!(finished.status, PageStatus::HydrationComplete);
    assert_eq!(finished.current_error, None);
}

#[test]
fn panel_for_other_tab_hears_nothing() {
    let (_home, _guard, socket) = start();

    let mut panel = connect(&socket, &Hello::panel());
    send(&mut panel, &PanelMessage::DevtoolsReady { tab_id: 6 });
    sleep(Duration::from_millis(100));

    let mut probe = connect(&socket, &Hello::probe(5));
    send(&mut probe, &ProbeMessage::PageLoading);

    panel
        .set_read_timeout(Some(Duration::from_millis(300)))
        .expect("set read timeout");
    let mut buffer = [0u8; 64];
    match panel.read(&mut buffer) {
        Err(err)
            if err.kind() == std::io::ErrorKind::WouldBlock
                || err.kind() == std::io::ErrorKind::TimedOut => {}
        other => panic!("expected silence, got {:?}", other),
    }
}

#[test]
fn invalid_handshake_closes_connection() {
    let (_home, _guard, socket) = start();

    let mut stream = UnixStream::connect(&socket).expect("failed to connect to relay");
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("set read timeout");
    stream.write_all(b"not json\n").expect("write garbage");

    let mut buffer = [0u8; 16];
    let read = stream.read(&mut buffer).expect("read after rejection");
    assert_eq!(read, 0, "relay should close after a bad handshake");
}

#[test]
fn relay_survives_invalid_frames_after_handshake() {
    let (_home, _guard, socket) = start();

    let mut probe = connect(&socket, &Hello::probe(8));
    probe.write_all(b"{\"type\":\"bogus\"}\n").expect("write bogus frame");
    send(&mut probe, &ProbeMessage::ReactDetected);
    sleep(Duration::from_millis(200));

    let panel = connect(&socket, &Hello::panel());
    panel
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("set read timeout");
    let mut writer = panel.try_clone().expect("clone panel stream");
    let mut reader = BufReader::new(panel);
    send(&mut writer, &PanelMessage::DevtoolsReady { tab_id: 8 });

    assert_eq!(read_update(&mut reader).status, PageStatus::ReactDetected);
}
