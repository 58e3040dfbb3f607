//! The protocol client: HTTP upgrade, request/response correlation, event
//! fan-out, reset.
//!
//! This core is single-threaded and lock-free: the pending
//! call table and the outbound write half live behind `Rc<RefCell<_>>`,
//! never `Arc<Mutex<_>>`, and the receive loop is a `tokio::task::spawn_local`
//! task on the same current-thread runtime as everything else, not a
//! separate OS thread. That is the one concession to "a single event
//! loop": two tasks cooperatively scheduled on one thread, communicating
//! through `Rc<RefCell<_>>` and channels instead of a literal single
//! top-level `select!`, because `callMethod`'s future must keep resolving
//! while the receive side keeps decoding frames.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::engine::Engine as _;
use rand::RngCore;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::Error;
use crate::frame::{self, Decoded};
use crate::logging;
use crate::proto::{Inbound, Request};

const GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// The bootstrap calls sent, in order, immediately after upgrade. This list
/// is authoritative; tolerated-failure `Page.*`/`Log.enable` calls some
/// targets also expect are deliberately not sent.
const BOOTSTRAP: &[(&str, fn() -> Option<Value>)] = &[
    ("Runtime.enable", || None),
    ("Debugger.enable", || None),
    ("Debugger.setPauseOnExceptions", || Some(json!({"state": "none"}))),
    ("Debugger.setAsyncCallStackDepth", || Some(json!({"maxDepth": 0}))),
    ("Profiler.enable", || None),
    ("Profiler.setSamplingInterval", || Some(json!({"interval": 100}))),
    ("Debugger.setBlackboxPatterns", || Some(json!({"patterns": []}))),
    ("Runtime.runIfWaitingForDebugger", || None),
];

/// Fan-out events: a generic `debugEvent(method, params)` and the
/// method-scoped form are the same payload on the wire; consumers (the
/// session, the agent proxy) decide which interpretation
/// they want from `method`.
#[derive(Debug, Clone)]
pub struct ProtocolEvent {
    pub method: String,
    pub params: Value,
}

pub enum ClientEvent {
    Ready,
    Error(String),
    Close,
    Protocol(ProtocolEvent),
}

struct Shared {
    write: OwnedWriteHalf,
    pending: HashMap<u64, oneshot::Sender<Result<Value, Error>>>,
    last_id: u64,
}

pub struct Client {
    host: String,
    port: u16,
    shared: Rc<RefCell<Option<Shared>>>,
    events_tx: mpsc::UnboundedSender<ClientEvent>,
    recv_task: Option<JoinHandle<()>>,
}

impl Client {
    pub fn new(host: String, port: u16) -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        (
            Self {
                host,
                port,
                shared: Rc::new(RefCell::new(None)),
                events_tx,
                recv_task: None,
            },
            events_rx,
        )
    }

    /// Discovers the target's websocket URL, performs the upgrade
    /// handshake, then runs the bootstrap sequence. Emits `Ready` on
    /// success, `Error` (without `Ready`) if any bootstrap call fails.
    pub async fn connect(&mut self) -> Result<(), Error> {
        let ws_path = self.discover_ws_path().await?;
        let (stream, leftover) = self.upgrade(&ws_path).await?;
        let (read_half, write_half) = stream.into_split();

        *self.shared.borrow_mut() = Some(Shared {
            write: write_half,
            pending: HashMap::new(),
            last_id: 0,
        });

        let shared = self.shared.clone();
        let events_tx = self.events_tx.clone();
        self.recv_task = Some(tokio::task::spawn_local(async move {
            receive_loop(read_half, leftover, shared, events_tx).await;
        }));

        match self.bootstrap().await {
            Ok(()) => {
                let _ = self.events_tx.send(ClientEvent::Ready);
                Ok(())
            }
            Err(e) => {
                let _ = self.events_tx.send(ClientEvent::Error(e.to_string()));
                Err(e)
            }
        }
    }

    async fn bootstrap(&mut self) -> Result<(), Error> {
        let mut pending = Vec::with_capacity(BOOTSTRAP.len());
        for (method, params) in BOOTSTRAP {
            pending.push(self.call_method(method, params()));
        }
        for call in pending {
            call.await?;
        }
        Ok(())
    }

    /// `GET /json`, returns the first target's `webSocketDebuggerUrl` path.
    async fn discover_ws_path(&self) -> Result<String, Error> {
        let mut stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
        let request = format!(
            "GET /json HTTP/1.1\r\nHost: {}:{}\r\nConnection: close\r\n\r\n",
            self.host, self.port
        );
        stream.write_all(request.as_bytes()).await?;

        let (status, _headers, body, _leftover, _stream) = read_http_response(stream).await?;
        if status != 200 {
            return Err(Error::Protocol(format!("/json returned status {status}")));
        }

        let targets: Vec<Value> = serde_json::from_slice(&body)?;
        let first = targets
            .first()
            .ok_or_else(|| Error::Protocol("target exposes no inspectable targets".into()))?;
        let ws_url = first["webSocketDebuggerUrl"]
            .as_str()
            .ok_or_else(|| Error::Protocol("target is missing webSocketDebuggerUrl".into()))?;

        // We only need the path; host/port are already known to us.
        let path = ws_url
            .split_once("://")
            .and_then(|(_, rest)| rest.split_once('/'))
            .map(|(_, path)| format!("/{path}"))
            .unwrap_or_else(|| "/".to_string());
        Ok(path)
    }

    async fn upgrade(&self, path: &str) -> Result<(TcpStream, Vec<u8>), Error> {
        let mut stream = TcpStream::connect((self.host.as_str(), self.port)).await?;

        let mut key_bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut key_bytes);
        let key = BASE64.encode(key_bytes);

        let request = format!(
            "GET {path} HTTP/1.1\r\n\
             Host: {host}:{port}\r\n\
             Connection: Upgrade\r\n\
             Upgrade: websocket\r\n\
             Sec-WebSocket-Key: {key}\r\n\
             Sec-WebSocket-Version: 13\r\n\r\n",
            path = path,
            host = self.host,
            port = self.port,
            key = key,
        );
        stream.write_all(request.as_bytes()).await?;

        let (status, headers, _body, leftover, stream) = read_http_response(stream).await?;
        if status != 101 {
            return Err(Error::Protocol(format!("upgrade rejected with status {status}")));
        }

        let accept = headers
            .get("sec-websocket-accept")
            .ok_or_else(|| Error::Protocol("upgrade response missing Sec-WebSocket-Accept".into()))?;
        let expected = accept_value(&key);
        if accept != &expected {
            return Err(Error::Protocol("Sec-WebSocket-Accept mismatch".into()));
        }

        Ok((stream, leftover))
    }

    /// Sends a request, returns a future resolved on the matching response
    /// (or rejected on RPC error / connection reset). Fails synchronously
    /// with `NotConnected` if the socket isn't open.
    pub fn call_method(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> impl std::future::Future<Output = Result<Value, Error>> {
        let shared = self.shared.clone();
        let method = method.to_string();

        let outcome = (|| -> Result<oneshot::Receiver<Result<Value, Error>>, Error> {
            let mut guard = shared.borrow_mut();
            let state = guard.as_mut().ok_or(Error::NotConnected)?;
            state.last_id += 1;
            let id = state.last_id;

            let request = Request { id, method: method.clone(), params };
            let payload = serde_json::to_vec(&request)?;
            logging::trace_sent(&String::from_utf8_lossy(&payload));
            let framed = frame::encode(&payload);

            state
                .write
                .try_write(&framed)
                .map_err(Error::Io)?;

            let (tx, rx) = oneshot::channel();
            state.pending.insert(id, tx);
            Ok(rx)
        })();

        async move {
            let rx = outcome?;
            rx.await.map_err(|_| Error::ConnectionReset)?
        }
    }

    /// Tears down the connection: aborts the receive task, drops the
    /// socket, and rejects every pending call with `ConnectionReset`
    /// rather than leaving them to hang. Safe to call repeatedly.
    pub fn reset(&mut self) {
        if let Some(task) = self.recv_task.take() {
            task.abort();
        }
        if let Some(state) = self.shared.borrow_mut().take() {
            for (_, tx) in state.pending {
                let _ = tx.send(Err(Error::ConnectionReset));
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.shared.borrow().is_some()
    }
}

/// Outcome of draining as many complete frames as `unprocessed` currently
/// holds. `Continue` means keep reading more bytes off the socket.
enum Drain {
    Continue,
    Stop,
}

fn drain_frames(
    unprocessed: &mut Vec<u8>,
    shared: &Rc<RefCell<Option<Shared>>>,
    events_tx: &mpsc::UnboundedSender<ClientEvent>,
) -> Drain {
    loop {
        if unprocessed.len() <= 2 {
            return Drain::Continue;
        }
        match frame::decode(unprocessed) {
            Ok(Decoded::Incomplete) => return Drain::Continue,
            Ok(Decoded::Frame { payload, rest, closed }) => {
                *unprocessed = rest;
                if closed {
                    let _ = events_tx.send(ClientEvent::Close);
                    return Drain::Stop;
                }
                if let Err(e) = dispatch(&payload, shared, events_tx) {
                    let _ = events_tx.send(ClientEvent::Error(e.to_string()));
                    return Drain::Stop;
                }
            }
            Err(e) => {
                let _ = events_tx.send(ClientEvent::Error(e.to_string()));
                return Drain::Stop;
            }
        }
    }
}

async fn receive_loop(
    read_half: OwnedReadHalf,
    leftover: Vec<u8>,
    shared: Rc<RefCell<Option<Shared>>>,
    events_tx: mpsc::UnboundedSender<ClientEvent>,
) {
    let mut reader = read_half;
    let mut unprocessed: Vec<u8> = leftover;
    let mut chunk = [0u8; 4096];

    // Anything buffered ahead during the handshake must be drained before
    // we block on the socket for more bytes.
    if let Drain::Stop = drain_frames(&mut unprocessed, &shared, &events_tx) {
        return;
    }

    loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(_) => break,
        };
        unprocessed.extend_from_slice(&chunk[..n]);
        if let Drain::Stop = drain_frames(&mut unprocessed, &shared, &events_tx) {
            return;
        }
    }
    let _ = events_tx.send(ClientEvent::Close);
}

fn dispatch(
    payload: &[u8],
    shared: &Rc<RefCell<Option<Shared>>>,
    events_tx: &mpsc::UnboundedSender<ClientEvent>,
) -> Result<(), Error> {
    let trimmed = trim_ascii(payload);
    if trimmed.first() != Some(&b'{') || trimmed.last() != Some(&b'}') {
        return Err(Error::Protocol("frame payload is not a JSON object".into()));
    }
    logging::trace_received(&String::from_utf8_lossy(payload));

    let msg: Inbound = serde_json::from_slice(payload)?;

    if let Some(id) = msg.id {
        let sender = {
            let mut guard = shared.borrow_mut();
            guard.as_mut().and_then(|s| s.pending.remove(&id))
        };
        if let Some(tx) = sender {
            let result = if let Some(err) = msg.error {
                Err(Error::Rpc {
                    code: err.code,
                    message: err.message,
                    data: err.data.to_string(),
                })
            } else {
                Ok(msg.result.unwrap_or(Value::Null))
            };
            let _ = tx.send(result);
        }
        // Unknown ids are dropped silently.
        Ok(())
    } else if let Some(method) = msg.method {
        let params = msg.params.unwrap_or(Value::Null);
        let _ = events_tx.send(ClientEvent::Protocol(ProtocolEvent { method, params }));
        Ok(())
    } else {
        Err(Error::Protocol("message carries neither id nor method".into()))
    }
}

fn trim_ascii(buf: &[u8]) -> &[u8] {
    let start = buf.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(buf.len());
    let end = buf.iter().rposition(|b| !b.is_ascii_whitespace()).map(|i| i + 1).unwrap_or(0);
    if start >= end {
        &[]
    } else {
        &buf[start..end]
    }
}

fn accept_value(key: &str) -> String {
    let concatenated = format!("{key}{GUID}");
    let digest = sha1_smol::Sha1::from(concatenated).digest().bytes();
    BASE64.encode(digest)
}

/// Reads a full HTTP/1.1 response (status line + headers + body) off
/// `stream`, using `httparse` to parse the header block once it's fully
/// buffered. Takes `stream` by value and hands it back (along with
/// any bytes `BufReader` read ahead of the header boundary) so a caller
/// that upgrades the same connection to a different framing — as
/// `upgrade()` does — doesn't silently drop already-buffered frame bytes.
async fn read_http_response(
    stream: TcpStream,
) -> Result<(u16, HashMap<String, String>, Vec<u8>, Vec<u8>, TcpStream), Error> {
    let mut reader = BufReader::new(stream);
    let mut raw = Vec::new();

    loop {
        let mut line = Vec::new();
        let n = reader.read_until(b'\n', &mut line).await?;
        if n == 0 {
            return Err(Error::Protocol("connection closed before headers completed".into()));
        }
        let end_of_headers = line == b"\r\n" || line == b"\n";
        raw.extend_from_slice(&line);
        if end_of_headers {
            break;
        }
    }

    let mut header_storage = [httparse::EMPTY_HEADER; 64];
    let mut response = httparse::Response::new(&mut header_storage);
    let parsed = response
        .parse(&raw)
        .map_err(|e| Error::Protocol(format!("malformed HTTP response: {e}")))?;
    if parsed.is_partial() {
        return Err(Error::Protocol("incomplete HTTP response headers".into()));
    }

    let status = response.code.unwrap_or(0);
    let mut headers = HashMap::new();
    let mut content_length = 0usize;
    for h in response.headers.iter() {
        let name = h.name.to_ascii_lowercase();
        let value = String::from_utf8_lossy(h.value).to_string();
        if name == "content-length" {
            content_length = value.trim().parse().unwrap_or(0);
        }
        headers.insert(name, value);
    }

    let mut body = vec![0u8; content_length];
    if content_length > 0 {
        reader.read_exact(&mut body).await?;
    }

    let leftover = reader.buffer().to_vec();
    let stream = reader.into_inner();
    Ok((status, headers, body, leftover, stream))
}
