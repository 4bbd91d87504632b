//! Unix-socket transport for [`PersistentConnection`](crate::PersistentConnection).
//!
//! Each `open` is one socket: the handshake frame is written before the port
//! is handed back, and a reader thread turns inbound frames into
//! [`PortEvents`] until the relay hangs up.

use crate::connection::{Connector, Port, PortEvents};
use crate::error::{HydraError, Result};
use hydrascope_relay_protocol::{decode_frame, encode_frame, Hello, MAX_FRAME_BYTES};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{BufRead, BufReader, Read, Write};
use std::marker::PhantomData;
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

const WRITE_TIMEOUT_MS: u64 = 600;

pub struct UnixSocketConnector<Out, In> {
    socket: PathBuf,
    hello: Hello,
    _marker: PhantomData<fn(Out) -> In>,
}

impl<Out, In> UnixSocketConnector<Out, In> {
    pub fn new(socket: PathBuf, hello: Hello) -> Self {
        Self {
            socket,
            hello,
            _marker: PhantomData,
        }
    }
}

pub struct SocketPort<Out> {
    stream: UnixStream,
    _marker: PhantomData<fn(Out)>,
}

impl<Out: Serialize> SocketPort<Out> {
    fn write<T: Serialize>(&mut self, frame: &T) -> Result<()> {
        let bytes = encode_frame(frame).map_err(|err| HydraError::Encode(err.to_string()))?;
        self.stream
            .write_all(&bytes)
            .and_then(|_| self.stream.flush())
            .map_err(|err| HydraError::Transport(format!("Failed to write frame: {}", err)))
    }
}

impl<Out: Serialize + Send> Port<Out> for SocketPort<Out> {
    fn post(&mut self, message: &Out) -> Result<()> {
        self.write(message)
    }

    fn close(&mut self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

impl<Out, In> Connector for UnixSocketConnector<Out, In>
where
    Out: Serialize + Send + 'static,
    In: DeserializeOwned + Send + 'static,
{
    type Outgoing = Out;
    type Incoming = In;
    type Port = SocketPort<Out>;

    fn open(&self, events: PortEvents<In>) -> Result<SocketPort<Out>> {
        let stream = UnixStream::connect(&self.socket).map_err(|err| {
            HydraError::Transport(format!(
                "Failed to connect to {}: {}",
                self.socket.display(),
                err
            ))
        })?;
        let _ = stream.set_write_timeout(Some(Duration::from_millis(WRITE_TIMEOUT_MS)));
        let reader = stream
            .try_clone()
            .map_err(|err| HydraError::Transport(format!("Failed to clone stream: {}", err)))?;

        let mut port = SocketPort {
            stream,
            _marker: PhantomData,
        };
        port.write(&self.hello)?;

        thread::Builder::new()
            .name("hydrascope-reader".to_string())
            .spawn(move || read_loop(reader, events))
            .map_err(|err| HydraError::Transport(format!("Failed to spawn reader: {}", err)))?;

        tracing::debug!(socket = %self.socket.display(), "Relay connection opened");
        Ok(port)
    }
}

fn read_loop<In: DeserializeOwned>(stream: UnixStream, events: PortEvents<In>) {
    let mut reader = BufReader::new(stream);
    let limit = MAX_FRAME_BYTES as u64 + 1;

    loop {
        let mut line = Vec::new();
        match reader.by_ref().take(limit).read_until(b'\n', &mut line) {
            Ok(0) => break,
            Ok(_) if line.len() > MAX_FRAME_BYTES => {
                tracing::warn!(bytes = line.len(), "Relay frame too large; closing");
                break;
            }
            Ok(_) => match decode_frame::<In>(&line) {
                Ok(message) => events.message(message),
                Err(err) => {
                    tracing::warn!(code = %err.code, message = %err.message, "Skipping invalid relay frame");
                }
            },
            Err(err) => {
                tracing::debug!(error = %err, "Relay read failed");
                break;
            }
        }
    }

    events.closed();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionOptions, PersistentConnection};
    use crate::scheduler::ManualScheduler;
    use hydrascope_relay_protocol::{
        parse_hello, parse_probe_message, HydrationReport, PageStatus, PanelMessage, PortRole,
        ProbeMessage, RelayMessage, REPORT_BUDGET_BYTES,
    };
    use std::os::unix::net::UnixListener;
    use std::sync::{mpsc, Arc};

    fn socket_in(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("relay.sock")
    }

    #[test]
    fn open_writes_handshake_and_delivers_frames() {
        let dir = tempfile::tempdir().unwrap();
        let socket = socket_in(&dir);
        let listener = UnixListener::bind(&socket).unwrap();

        let connector: UnixSocketConnector<PanelMessage, RelayMessage> =
            UnixSocketConnector::new(socket, Hello::panel());
        let (message_tx, message_rx) = mpsc::channel();
        let (closed_tx, closed_rx) = mpsc::channel();
        let events = PortEvents::new(
            move |message: RelayMessage| {
                let _ = message_tx.send(message);
            },
            move || {
                let _ = closed_tx.send(());
            },
        );
        let mut port = connector.open(events).unwrap();
        port.post(&PanelMessage::DevtoolsReady { tab_id: 3 }).unwrap();

        let (server, _) = listener.accept().unwrap();
        let mut server_reader = BufReader::new(server.try_clone().unwrap());

        let mut hello = Vec::new();
        server_reader.read_until(b'\n', &mut hello).unwrap();
        let (_, role) = parse_hello(&hello).unwrap();
        assert_eq!(role, PortRole::Panel);

        let mut ready = Vec::new();
        server_reader.read_until(b'\n', &mut ready).unwrap();
        assert_eq!(
            decode_frame::<PanelMessage>(&ready).unwrap(),
            PanelMessage::DevtoolsReady { tab_id: 3 }
        );

        let mut server_writer = server;
        let update = RelayMessage::status_update(PageStatus::Loading, None);
        server_writer.write_all(&encode_frame(&update).unwrap()).unwrap();
        server_writer.write_all(b"garbage\n").unwrap();
        server_writer.shutdown(Shutdown::Both).unwrap();

        let received = message_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(received, update);
        closed_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(message_rx.try_recv().is_err());
    }

    #[test]
    fn oversized_message_keeps_connection_and_fitted_report_arrives() {
        let dir = tempfile::tempdir().unwrap();
        let socket = socket_in(&dir);
        let listener = UnixListener::bind(&socket).unwrap();

        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream);
            let mut hello = Vec::new();
            reader.read_until(b'\n', &mut hello).unwrap();
            let mut frame = Vec::new();
            reader.read_until(b'\n', &mut frame).unwrap();
            parse_probe_message(&frame).unwrap()
        });

        let connector: UnixSocketConnector<ProbeMessage, serde_json::Value> =
            UnixSocketConnector::new(socket, Hello::probe(5));
        let connection = PersistentConnection::new(
            connector,
            Arc::new(ManualScheduler::new()),
            ConnectionOptions::default(),
        );
        connection.connect();
        assert!(connection.is_connected());

        let mut report = HydrationReport {
            id: Some("e1".to_string()),
            url: Some("https://shop.example/".to_string()),
            timestamp: Some(1_760_000_000_000),
            initial_html: Some("a".repeat(4_300_000)),
            post_hydration_html: Some("b".repeat(4_300_000)),
            initial_root: Some("<span>X</span>".to_string()),
            hydrated_root: Some("<span>Y</span>".to_string()),
            diff: None,
            is_equal: false,
        };
        connection.send(ProbeMessage::ReactHydrationFinished {
            data: report.clone(),
        });
        assert!(connection.is_connected());
        assert_eq!(connection.reconnect_attempts(), 0);

        assert!(report.fit_within(REPORT_BUDGET_BYTES));
        connection.send(ProbeMessage::ReactHydrationFinished { data: report });
        assert!(connection.is_connected());

        let ProbeMessage::ReactHydrationFinished { data } = server.join().unwrap() else {
            panic!("expected hydration report");
        };
        assert_eq!(data.initial_root.as_deref(), Some("<span>X</span>"));
        assert_eq!(data.initial_html.as_deref(), Some(""));
        connection.disconnect();
    }

    #[test]
    fn open_fails_without_listener() {
        let dir = tempfile::tempdir().unwrap();
        let connector: UnixSocketConnector<PanelMessage, RelayMessage> =
            UnixSocketConnector::new(socket_in(&dir), Hello::panel());
        let result = connector.open(PortEvents::new(|_: RelayMessage| {}, || {}));
        assert!(matches!(result, Err(HydraError::Transport(_))));
    }
}
