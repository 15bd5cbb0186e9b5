//! Canned-response HTTP server for adapter tests

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// Request as seen by the fake server
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub request_line: String,
    pub body: String,
}

async fn read_request(socket: &mut TcpStream) -> CapturedRequest {
    let mut buf = Vec::new();
    let mut chunk = [0_u8; 4096];
    loop {
        let n = socket.read(&mut chunk).await.expect("failed to read request");
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        let text = String::from_utf8_lossy(&buf).to_string();
        if let Some(split) = text.find("\r\n\r\n") {
            let content_length = text[..split]
                .lines()
                .find_map(|line| {
                    line.to_lowercase()
                        .strip_prefix("content-length:")
                        .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                })
                .unwrap_or(0);
            if buf.len() >= split + 4 + content_length {
                return CapturedRequest {
                    request_line: text.lines().next().unwrap_or_default().to_string(),
                    body: text[split + 4..].to_string(),
                };
            }
        }
    }
    let text = String::from_utf8_lossy(&buf).to_string();
    CapturedRequest {
        request_line: text.lines().next().unwrap_or_default().to_string(),
        body: String::new(),
    }
}

/// Serve `responses` in order, one connection each
pub async fn spawn_server(
    responses: Vec<(u16, &'static str)>,
) -> (String, mpsc::UnboundedReceiver<CapturedRequest>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind test listener");
    let addr = listener.local_addr().expect("failed to read listener addr");
    let (request_tx, request_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        for (status_code, body) in responses {
            let (mut socket, _) = listener.accept().await.expect("accept failed");
            let request = read_request(&mut socket).await;
            let _ = request_tx.send(request);

            let reason = match status_code {
                200 => "OK",
                404 => "Not Found",
                422 => "Unprocessable Entity",
                503 => "Service Unavailable",
                _ => "Internal Server Error",
            };
            let response = format!(
                "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status_code,
                reason,
                body.len(),
                body
            );
            socket
                .write_all(response.as_bytes())
                .await
                .expect("failed to write response");
        }
    });

    (format!("http://{}", addr), request_rx)
}

/// JSON-RPC flavour: every response is `200 OK`
pub async fn spawn_rpc_server(
    bodies: Vec<&'static str>,
) -> (String, mpsc::UnboundedReceiver<CapturedRequest>) {
    spawn_server(bodies.into_iter().map(|body| (200, body)).collect()).await
}
