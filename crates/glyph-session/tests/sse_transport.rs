use glyph_history::Storage;
use glyph_session::{
    ErrorClass, HttpModificationService, ModificationSession, RequestConfig, SubmitOutcome,
};
use glyph_test_utils::*;
use pretty_assertions::assert_eq;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const NAVY: &str = "Make the header navy blue";

/// Bytes to write after a pause
type Chunk = (Duration, Vec<u8>);

fn frame(json: &str) -> Vec<u8> {
    format!("data: {json}\n\n").into_bytes()
}

fn after(ms: u64, bytes: impl Into<Vec<u8>>) -> Chunk {
    (Duration::from_millis(ms), bytes.into())
}

fn complete_json(content: &str) -> String {
    serde_json::json!({ "type": "complete", "content": content }).to_string()
}

async fn read_request(socket: &mut TcpStream) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = socket.read(&mut chunk).await.unwrap_or(0);
        if n == 0 {
            return;
        }
        buf.extend_from_slice(&chunk[..n]);
        let Some(head_end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
            continue;
        };
        let head = String::from_utf8_lossy(&buf[..head_end]).to_lowercase();
        let body_len = head
            .lines()
            .find_map(|l| l.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(0);
        if buf.len() >= head_end + 4 + body_len {
            return;
        }
    }
}

/// Serve one event-stream response, writing `chunks` with their pauses
async fn serve(chunks: Vec<Chunk>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let Ok((mut socket, _)) = listener.accept().await else {
            return;
        };
        read_request(&mut socket).await;
        let head = "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\nconnection: close\r\n\r\n";
        if socket.write_all(head.as_bytes()).await.is_err() {
            return;
        }
        for (pause, bytes) in chunks {
            tokio::time::sleep(pause).await;
            if socket.write_all(&bytes).await.is_err() || socket.flush().await.is_err() {
                return;
            }
        }
        let _ = socket.shutdown().await;
    });
    addr
}

fn http_session(addr: SocketAddr) -> ModificationSession {
    let service = HttpModificationService::new(&format!("http://{addr}"), None);
    let config = test_config().with_request(RequestConfig {
        activity_timeout_secs: 1,
        max_auto_retries: 0,
        ..RequestConfig::default()
    });
    ModificationSession::builder(invoice_snapshot(), Arc::new(service))
        .config(config)
        .storage(Arc::new(Storage::in_memory()))
        .build()
}

#[tokio::test]
async fn keep_alive_comments_hold_the_stream_open() {
    let navy = navy_invoice();
    let mut chunks = vec![after(0, frame(r#"{"type":"start","model":"m1"}"#))];
    for _ in 0..5 {
        chunks.push(after(400, ": keep-alive\n\n"));
    }
    chunks.push(after(400, frame(&complete_json(&navy))));
    let session = http_session(serve(chunks).await);

    let outcome = session.submit(NAVY).await.unwrap();

    assert!(matches!(outcome, SubmitOutcome::Modified { attempts: 1, .. }));
    assert_eq!(session.document().content, navy);
}

#[tokio::test]
async fn slowly_delivered_complete_frame_is_not_a_timeout() {
    let navy = navy_invoice();
    let payload = frame(&complete_json(&navy));
    let mut chunks = vec![after(0, frame(r#"{"type":"start"}"#))];
    for piece in payload.chunks(payload.len() / 4 + 1) {
        chunks.push(after(600, piece.to_vec()));
    }
    let session = http_session(serve(chunks).await);

    let outcome = session.submit(NAVY).await.unwrap();

    assert!(matches!(outcome, SubmitOutcome::Modified { .. }));
    assert_eq!(session.document().content, navy);
}

#[tokio::test]
async fn silent_connection_still_times_out() {
    let chunks = vec![
        after(0, frame(r#"{"type":"start"}"#)),
        after(3_000, frame(&complete_json(&navy_invoice()))),
    ];
    let session = http_session(serve(chunks).await);

    let err = session.submit(NAVY).await.unwrap_err();

    assert_eq!(err.class, ErrorClass::Timeout);
    assert_eq!(session.document().content, INVOICE);
}
