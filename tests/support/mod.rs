//! Minimal HTTP/1.1 server for exercising the reqwest adapters.

#![allow(dead_code)]

use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use url::Url;

/// A request as seen by [`serve_once`].
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub head: String,
    pub body: String,
}

impl CapturedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.head.lines().skip(1).find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim()
                .eq_ignore_ascii_case(name)
                .then(|| value.trim())
        })
    }
}

/// Accept one connection, answer with `status` and the body `chunks`
/// written with a short pause between them, then close.
pub async fn serve_once(
    status: u16,
    content_type: &'static str,
    chunks: Vec<Vec<u8>>,
) -> (Url, mpsc::UnboundedReceiver<CapturedRequest>) {
    serve_once_with_headers(status, content_type, &[], chunks).await
}

/// Like [`serve_once`], with extra response headers. Declaring a
/// `Content-Length` longer than the chunks yields a truncated body.
pub async fn serve_once_with_headers(
    status: u16,
    content_type: &'static str,
    extra_headers: &[(&str, &str)],
    chunks: Vec<Vec<u8>>,
) -> (Url, mpsc::UnboundedReceiver<CapturedRequest>) {
    let extra: String = extra_headers
        .iter()
        .map(|(name, value)| format!("{name}: {value}\r\n"))
        .collect();
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.expect("accept");
        let request = read_request(&mut socket).await;
        let _ = tx.send(request);

        let head = format!(
            "HTTP/1.1 {status} {}\r\nContent-Type: {content_type}\r\n{extra}Connection: close\r\n\r\n",
            reason(status)
        );
        socket.write_all(head.as_bytes()).await.expect("write head");
        for chunk in chunks {
            socket.write_all(&chunk).await.expect("write chunk");
            socket.flush().await.expect("flush");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let _ = socket.shutdown().await;
    });

    let url = Url::parse(&format!("http://{addr}/")).expect("server url");
    (url, rx)
}

async fn read_request(socket: &mut tokio::net::TcpStream) -> CapturedRequest {
    let mut buffer = Vec::new();
    let mut chunk = [0_u8; 1024];

    let head_end = loop {
        let read = socket.read(&mut chunk).await.expect("read request");
        if read == 0 {
            break buffer.len();
        }
        buffer.extend_from_slice(&chunk[..read]);
        if let Some(idx) = find(&buffer, b"\r\n\r\n") {
            break idx + 4;
        }
    };

    let head = String::from_utf8_lossy(&buffer[..head_end]).into_owned();
    let content_length = head
        .lines()
        .find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim()
                .eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
        })
        .unwrap_or(0);

    while buffer.len() < head_end + content_length {
        let read = socket.read(&mut chunk).await.expect("read body");
        if read == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..read]);
    }

    let body_end = buffer.len().min(head_end + content_length);
    CapturedRequest {
        head,
        body: String::from_utf8_lossy(&buffer[head_end..body_end]).into_owned(),
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        401 => "Unauthorized",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}
