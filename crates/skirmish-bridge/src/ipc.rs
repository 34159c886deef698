// The IPC thread: owns the socket to the GameManager, and nothing else
// touches it. Reads decode into the bounded command queue; writes drain the
// event queue. The sim thread is never blocked by socket I/O — the loop
// ticks on a short read timeout and flushes events between reads.

use crate::commands;
use crate::error::{BridgeError, BridgeResult};
use crate::events::OutEvent;
use crate::queues::{offer, EventQueue, Offer};
use log::{debug, info, warn};
use serde_json::json;
use std::io::{ErrorKind, Read, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::mpsc::SyncSender;
use std::sync::Arc;
use std::time::Duration;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
/// Read timeout doubling as the event-flush tick.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

pub struct IpcLink {
    handle: Option<std::thread::JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl IpcLink {
    /// Connect, handshake, and start the IPC thread.
    ///
    /// `frame` mirrors the sim frame so command errors raised on this thread
    /// carry a plausible timestamp.
    pub fn connect(
        socket_path: &Path,
        token: &str,
        events: Arc<EventQueue>,
        commands_tx: SyncSender<commands::InCommand>,
        frame: Arc<AtomicI32>,
    ) -> BridgeResult<Self> {
        let mut stream = UnixStream::connect(socket_path)?;
        stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT))?;

        let hello = json!({
            "type": "hello",
            "token": token,
            "version": env!("CARGO_PKG_VERSION"),
        });
        stream.write_all(format!("{hello}\n").as_bytes())?;

        let welcome = read_line(&mut stream)?;
        let parsed: serde_json::Value = serde_json::from_str(&welcome)
            .map_err(|e| BridgeError::Handshake(format!("bad welcome: {e}")))?;
        if parsed.get("type").and_then(|t| t.as_str()) != Some("welcome") {
            return Err(BridgeError::Handshake(format!("expected welcome, got {welcome}")));
        }
        info!("[bridge] handshake complete over {}", socket_path.display());

        stream.set_read_timeout(Some(POLL_INTERVAL))?;
        let shutdown = Arc::new(AtomicBool::new(false));
        let thread_shutdown = shutdown.clone();
        let handle = std::thread::Builder::new()
            .name("skirmish-bridge-ipc".into())
            .spawn(move || run_loop(stream, events, commands_tx, frame, thread_shutdown))
            .map_err(BridgeError::Io)?;

        Ok(IpcLink { handle: Some(handle), shutdown })
    }

    /// Flush whatever is queued (the `release` event included), then stop
    /// the thread and close the socket. Idempotent.
    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for IpcLink {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Blocking single-line read used only for the handshake.
fn read_line(stream: &mut UnixStream) -> BridgeResult<String> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        match stream.read(&mut byte) {
            Ok(0) => return Err(BridgeError::Handshake("closed before welcome".into())),
            Ok(_) => {
                if byte[0] == b'\n' {
                    return Ok(String::from_utf8_lossy(&line).into_owned());
                }
                line.push(byte[0]);
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                return Err(BridgeError::Handshake("welcome timed out".into()));
            }
            Err(e) => return Err(e.into()),
        }
    }
}

fn run_loop(
    mut stream: UnixStream,
    events: Arc<EventQueue>,
    commands_tx: SyncSender<commands::InCommand>,
    frame: Arc<AtomicI32>,
    shutdown: Arc<AtomicBool>,
) {
    let mut pending = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        for event in events.drain() {
            match serde_json::to_string(&event) {
                Ok(line) => {
                    if stream.write_all(format!("{line}\n").as_bytes()).is_err() {
                        warn!("[bridge] socket write failed, stopping IPC thread");
                        return;
                    }
                }
                Err(e) => warn!("[bridge] unserializable event: {e}"),
            }
        }
        if shutdown.load(Ordering::Relaxed) && events.is_empty() {
            debug!("[bridge] IPC thread exiting");
            return;
        }

        match stream.read(&mut buf) {
            Ok(0) => {
                info!("[bridge] GameManager closed the socket");
                return;
            }
            Ok(n) => {
                pending.extend_from_slice(&buf[..n]);
                decode_lines(&mut pending, &commands_tx, &events, &frame);
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(e) => {
                warn!("[bridge] socket read failed: {e}");
                return;
            }
        }
    }
}

fn decode_lines(
    pending: &mut Vec<u8>,
    commands_tx: &SyncSender<commands::InCommand>,
    events: &EventQueue,
    frame: &AtomicI32,
) {
    while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
        let raw: Vec<u8> = pending.drain(..=pos).collect();
        let line = String::from_utf8_lossy(&raw[..raw.len() - 1]).trim().to_string();
        if line.is_empty() {
            continue;
        }
        match commands::decode(&line) {
            Ok(command) => match offer(commands_tx, command.clone()) {
                Offer::Accepted => {}
                Offer::Backpressure => {
                    events.push(OutEvent::CommandError {
                        frame: frame.load(Ordering::Relaxed),
                        error: "backpressure".into(),
                        command: serde_json::to_value(&command).unwrap_or_default(),
                    });
                }
                Offer::Closed => {
                    debug!("[bridge] command after sim shutdown, dropping");
                }
            },
            Err(error) => {
                events.push(OutEvent::CommandError {
                    frame: frame.load(Ordering::Relaxed),
                    error,
                    command: json!({ "raw": line }),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::InCommand;
    use crate::queues::{command_queue, COMMAND_QUEUE_CAPACITY};
    use std::io::{BufRead, BufReader};
    use std::os::unix::net::UnixListener;

    struct Harness {
        link: IpcLink,
        peer: UnixStream,
        events: Arc<EventQueue>,
        commands_rx: std::sync::mpsc::Receiver<InCommand>,
        _tmp: tempfile::TempDir,
    }

    /// Stand up a listener that plays the GameManager side of the handshake.
    fn connect_pair() -> Harness {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("bridge.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let events = Arc::new(EventQueue::new());
        let (commands_tx, commands_rx) = command_queue();
        let frame = Arc::new(AtomicI32::new(0));

        let accept = std::thread::spawn(move || {
            let (mut peer, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(peer.try_clone().unwrap());
            let mut hello = String::new();
            reader.read_line(&mut hello).unwrap();
            assert!(hello.contains("\"type\":\"hello\""));
            assert!(hello.contains("\"token\":\"tok\""));
            peer.write_all(b"{\"type\":\"welcome\"}\n").unwrap();
            peer
        });

        let link = IpcLink::connect(&path, "tok", events.clone(), commands_tx, frame).unwrap();
        let peer = accept.join().unwrap();
        Harness { link, peer, events, commands_rx, _tmp: tmp }
    }

    #[test]
    fn events_flow_out_as_frames() {
        let mut harness = connect_pair();
        harness.events.push(OutEvent::Init { frame: 0, team: 0 });

        let mut reader = BufReader::new(harness.peer.try_clone().unwrap());
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        assert!(line.contains("\"type\":\"init\""));
        harness.link.shutdown();
    }

    #[test]
    fn commands_flow_in_and_malformed_frames_answer_with_command_error() {
        let mut harness = connect_pair();
        harness
            .peer
            .write_all(b"{\"type\":\"pause\"}\n{\"type\":\"warp\"}\n")
            .unwrap();

        let command = harness
            .commands_rx
            .recv_timeout(Duration::from_secs(2))
            .unwrap();
        assert_eq!(command, InCommand::Pause);

        // The unknown command comes back over the socket as command_error.
        let mut reader = BufReader::new(harness.peer.try_clone().unwrap());
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        assert!(line.contains("\"type\":\"command_error\""));
        assert!(line.contains("invalid command"));
        harness.link.shutdown();
    }

    #[test]
    fn full_queue_yields_backpressure_error() {
        let mut harness = connect_pair();
        let mut burst = String::new();
        for _ in 0..(COMMAND_QUEUE_CAPACITY + 1) {
            burst.push_str("{\"type\":\"pause\"}\n");
        }
        harness.peer.write_all(burst.as_bytes()).unwrap();

        let mut reader = BufReader::new(harness.peer.try_clone().unwrap());
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        assert!(line.contains("\"error\":\"backpressure\""));

        // After quiescence the queue accepts again.
        while harness.commands_rx.try_recv().is_ok() {}
        harness.peer.write_all(b"{\"type\":\"unpause\"}\n").unwrap();
        let command = harness
            .commands_rx
            .recv_timeout(Duration::from_secs(2))
            .unwrap();
        assert_eq!(command, InCommand::Unpause);
        harness.link.shutdown();
    }

    #[test]
    fn shutdown_flushes_queued_events_first() {
        let mut harness = connect_pair();
        harness.events.push(OutEvent::Release { frame: 900, reason: 0 });
        harness.link.shutdown();

        let mut reader = BufReader::new(harness.peer.try_clone().unwrap());
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        assert!(line.contains("\"type\":\"release\""));
        // Socket is closed afterwards.
        line.clear();
        let n = reader.read_line(&mut line).unwrap();
        assert_eq!(n, 0);
    }
}
