//! End-to-end coverage against a minimal in-process CDTP target: serves
//! `/json`, performs the websocket upgrade, answers the bootstrap
//! sequence, and can push a `Debugger.paused` event on command.

use std::collections::HashMap;

use cdbg::client::{Client, ClientEvent};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

const GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

async fn spawn_fake_target() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::task::spawn_local(async move {
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => return,
            };
            tokio::task::spawn_local(serve_connection(stream, port));
        }
    });

    port
}

async fn serve_connection(stream: TcpStream, port: u16) {
    let mut reader = BufReader::new(stream);
    let mut request_line = String::new();
    if reader.read_line(&mut request_line).await.unwrap_or(0) == 0 {
        return;
    }

    let mut headers = HashMap::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
            return;
        }
        let trimmed = line.trim_end();
        if trimmed.is_empty() {
            break;
        }
        if let Some((name, value)) = trimmed.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    if request_line.starts_with("GET /json") {
        let body = json!([{ "webSocketDebuggerUrl": format!("ws://127.0.0.1:{port}/session") }]).to_string();
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        );
        let mut stream = reader.into_inner();
        let _ = stream.write_all(response.as_bytes()).await;
        return;
    }

    let key = headers.get("sec-websocket-key").cloned().unwrap_or_default();
    let accept = {
        let digest = sha1_smol::Sha1::from(format!("{key}{GUID}")).digest().bytes();
        base64::engine::Engine::encode(&base64::engine::general_purpose::STANDARD, digest)
    };
    let response = format!(
        "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {accept}\r\n\r\n"
    );
    let mut stream = reader.into_inner();
    if stream.write_all(response.as_bytes()).await.is_err() {
        return;
    }

    let mut unprocessed = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        unprocessed.extend_from_slice(&chunk[..n]);

        loop {
            match cdbg::frame::decode(&unprocessed) {
                Ok(cdbg::frame::Decoded::Incomplete) => break,
                Ok(cdbg::frame::Decoded::Frame { payload, rest, closed }) => {
                    unprocessed = rest;
                    if closed {
                        return;
                    }
                    let Ok(request) = serde_json::from_slice::<Value>(&payload) else { return };
                    let response = handle_request(&request);
                    let bytes = serde_json::to_vec(&response).unwrap();
                    let framed = cdbg::frame::encode(&bytes);
                    if stream.write_all(&framed).await.is_err() {
                        return;
                    }
                }
                Err(_) => return,
            }
        }
    }
}

fn handle_request(request: &Value) -> Value {
    let id = request.get("id").cloned().unwrap_or(Value::Null);
    let method = request.get("method").and_then(Value::as_str).unwrap_or_default();

    match method {
        "Runtime.evaluate" => json!({ "id": id, "result": { "result": { "type": "number", "value": 42 } } }),
        _ => json!({ "id": id, "result": {} }),
    }
}

#[tokio::test]
async fn connect_runs_bootstrap_and_emits_ready() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let port = spawn_fake_target().await;
            let (mut client, mut events) = Client::new("127.0.0.1".to_string(), port);
            client.connect().await.expect("bootstrap should succeed against the fake target");

            let event = events.recv().await.expect("channel should still be open");
            assert!(matches!(event, ClientEvent::Ready));
        })
        .await;
}

#[tokio::test]
async fn call_method_round_trips_through_the_fake_target() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let port = spawn_fake_target().await;
            let (mut client, mut events) = Client::new("127.0.0.1".to_string(), port);
            client.connect().await.unwrap();
            assert!(matches!(events.recv().await.unwrap(), ClientEvent::Ready));

            let result = client.call_method("Runtime.evaluate", Some(json!({ "expression": "6*7" }))).await.unwrap();
            assert_eq!(result["result"]["value"], 42);
        })
        .await;
}

#[tokio::test]
async fn reset_rejects_any_call_in_flight() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let port = spawn_fake_target().await;
            let (mut client, mut events) = Client::new("127.0.0.1".to_string(), port);
            client.connect().await.unwrap();
            assert!(matches!(events.recv().await.unwrap(), ClientEvent::Ready));

            let pending = client.call_method("Runtime.evaluate", None);
            client.reset();
            let result = pending.await;
            assert!(result.is_err());
            assert!(!client.is_connected());
        })
        .await;
}
