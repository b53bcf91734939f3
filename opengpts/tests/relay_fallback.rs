//! Relay fallback against a local HTTP server.
//!
//! Run with: `cargo test -p opengpts --test relay_fallback`

use futures::StreamExt;
use opengpts::{Client, ClientConfig, Error, StreamRequest, Transport};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// One request as the server saw it.
#[derive(Debug, Clone)]
struct Seen {
    path: String,
    requested_with: bool,
}

/// Serve `routes` (path prefix, status, body) on a local port. Every request
/// is logged before it is answered.
async fn serve(routes: Vec<(&'static str, u16, &'static str)>) -> (String, Arc<Mutex<Vec<Seen>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("Failed to bind");
    let base = format!("http://{}", listener.local_addr().unwrap());
    let log = Arc::new(Mutex::new(Vec::new()));

    let seen = log.clone();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let routes = routes.clone();
            let seen = seen.clone();
            tokio::spawn(async move { answer(socket, &routes, &seen).await });
        }
    });
    (base, log)
}

async fn answer(
    mut socket: TcpStream,
    routes: &[(&'static str, u16, &'static str)],
    seen: &Mutex<Vec<Seen>>,
) {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];
    let head_end = loop {
        let n = socket.read(&mut chunk).await.unwrap_or(0);
        if n == 0 {
            return;
        }
        buffer.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buffer.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buffer[..head_end]).to_string();
    let mut lines = head.lines();
    let path = lines
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or_default()
        .to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_ascii_lowercase(), value.trim().to_string()))
        .collect();
    let content_length: usize = headers
        .iter()
        .find(|(name, _)| name == "content-length")
        .and_then(|(_, value)| value.parse().ok())
        .unwrap_or(0);
    while buffer.len() < head_end + content_length {
        let n = socket.read(&mut chunk).await.unwrap_or(0);
        if n == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..n]);
    }

    let requested_with = headers.iter().any(|(name, _)| name == "x-requested-with");
    let (status, body) = routes
        .iter()
        .find(|(prefix, _, _)| path.starts_with(prefix))
        .map(|(_, status, body)| (*status, *body))
        .unwrap_or((404, "no route"));
    seen.lock().unwrap().push(Seen {
        path,
        requested_with,
    });

    let response = format!(
        "HTTP/1.1 {status} Status\r\ncontent-type: text/plain\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
        body.len()
    );
    let _ = socket.write_all(response.as_bytes()).await;
    let _ = socket.shutdown().await;
}

async fn read_body(client: &Client, request: &StreamRequest) -> Result<String, Error> {
    let mut stream = client.open(request).await?;
    let mut body = Vec::new();
    while let Some(chunk) = stream.next().await {
        body.extend(chunk?);
    }
    Ok(String::from_utf8_lossy(&body).to_string())
}

fn client_with_relays(base: &str, relays: &[&str]) -> Client {
    let relays = relays.iter().map(|r| format!("{base}{r}?url=")).collect();
    Client::new(ClientConfig::default().with_relays(relays)).expect("Failed to build client")
}

#[tokio::test]
async fn test_relays_tried_in_order_until_first_success() {
    let (base, log) = serve(vec![
        ("/direct", 503, "direct down"),
        ("/relay1", 502, "relay one down"),
        ("/relay2", 200, "via relay two"),
        ("/relay3", 200, "via relay three"),
    ])
    .await;
    let client = client_with_relays(&base, &["/relay1", "/relay2", "/relay3"]);
    let request = StreamRequest::message(format!("{base}/direct"), "hi");

    let body = read_body(&client, &request).await.expect("relay two should answer");
    assert_eq!(body, "via relay two");

    let seen = log.lock().unwrap().clone();
    let paths: Vec<&str> = seen
        .iter()
        .map(|s| s.path.split('?').next().unwrap_or_default())
        .collect();
    assert_eq!(paths, vec!["/direct", "/relay1", "/relay2"]);

    assert!(!seen[0].requested_with, "direct request should not carry X-Requested-With");
    assert!(seen[1].requested_with);
    assert!(seen[2].requested_with);
    assert!(seen[1].path.ends_with("%2Fdirect"), "unexpected relay target: {}", seen[1].path);
}

#[tokio::test]
async fn test_direct_error_returned_when_every_relay_fails() {
    let (base, log) = serve(vec![
        ("/direct", 503, "direct down"),
        ("/relay1", 502, "relay one down"),
        ("/relay2", 500, "relay two down"),
    ])
    .await;
    let client = client_with_relays(&base, &["/relay1", "/relay2"]);
    let request = StreamRequest::query(format!("{base}/direct"), "hi");

    match read_body(&client, &request).await {
        Err(Error::Api { status, message }) => {
            assert_eq!(status, 503);
            assert_eq!(message, "direct down");
        }
        other => panic!("expected the direct error, got {other:?}"),
    }
    assert_eq!(log.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn test_direct_success_skips_relays() {
    let (base, log) = serve(vec![("/direct", 200, "direct body")]).await;
    let client = client_with_relays(&base, &["/relay1"]);
    let request = StreamRequest::message(format!("{base}/direct"), "hi");

    assert_eq!(read_body(&client, &request).await.unwrap(), "direct body");
    let seen = log.lock().unwrap().clone();
    assert_eq!(seen.len(), 1);
    assert!(!seen[0].requested_with);
}
