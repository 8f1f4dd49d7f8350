//! Shared utilities for integration testing.
//!
//! Mock services are raw TCP listeners speaking just enough HTTP/1.1 for the
//! client under test. Each accepted request is parsed, recorded, and answered
//! by a test-supplied responder.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// A parsed inbound request, recorded for assertions.
#[derive(Debug, Clone)]
pub struct MockRequest {
    pub method: String,
    pub path: String,
    /// Header names lowercased.
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl MockRequest {
    #[allow(dead_code)]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }
}

/// What the mock sends back.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
    pub delay: Option<std::time::Duration>,
}

impl MockResponse {
    pub fn json(status: u16, body: serde_json::Value) -> Self {
        Self {
            status,
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body: body.to_string(),
            delay: None,
        }
    }

    #[allow(dead_code)]
    pub fn empty(status: u16) -> Self {
        Self { status, headers: Vec::new(), body: String::new(), delay: None }
    }

    /// Hold the response for `delay` before writing it.
    #[allow(dead_code)]
    pub fn delayed(mut self, delay: std::time::Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    #[allow(dead_code)]
    pub fn with_etag(mut self, etag: &str) -> Self {
        self.headers.push(("ETag".to_string(), etag.to_string()));
        self
    }
}

/// Handle to a running mock service.
pub struct MockService {
    pub addr: SocketAddr,
    hits: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<MockRequest>>>,
}

impl MockService {
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Number of requests the backend actually served.
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    /// All requests seen so far, in arrival order.
    #[allow(dead_code)]
    pub fn requests(&self) -> Vec<MockRequest> {
        self.requests.lock().unwrap().clone()
    }
}

/// Start a mock service on an ephemeral port. The responder sees the parsed
/// request and a zero-based hit index.
pub async fn start_mock_service<F>(respond: F) -> MockService
where
    F: Fn(&MockRequest, usize) -> MockResponse + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let requests: Arc<Mutex<Vec<MockRequest>>> = Arc::new(Mutex::new(Vec::new()));

    let respond = Arc::new(respond);
    let task_hits = Arc::clone(&hits);
    let task_requests = Arc::clone(&requests);

    tokio::spawn(async move {
        loop {
            let (mut socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let respond = Arc::clone(&respond);
            let hits = Arc::clone(&task_hits);
            let requests = Arc::clone(&task_requests);
            tokio::spawn(async move {
                let request = match read_request(&mut socket).await {
                    Some(request) => request,
                    None => return,
                };
                let index = hits.fetch_add(1, Ordering::SeqCst);
                requests.lock().unwrap().push(request.clone());

                let response = respond(&request, index);
                if let Some(delay) = response.delay {
                    tokio::time::sleep(delay).await;
                }
                let mut head = format!(
                    "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n",
                    response.status,
                    status_text(response.status),
                    response.body.len(),
                );
                for (name, value) in &response.headers {
                    head.push_str(&format!("{name}: {value}\r\n"));
                }
                head.push_str("\r\n");
                let _ = socket.write_all(head.as_bytes()).await;
                let _ = socket.write_all(response.body.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    MockService { addr, hits, requests }
}

/// Read one HTTP/1.1 request (head plus Content-Length body) off the socket.
async fn read_request(socket: &mut tokio::net::TcpStream) -> Option<MockRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];

    let head_end = loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = find_head_end(&buf) {
            break pos;
        }
        if buf.len() > 64 * 1024 {
            return None;
        }
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let mut lines = head.split("\r\n");
    let request_line = lines.next()?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next()?.to_string();
    let path = parts.next()?.to_string();

    let mut headers = HashMap::new();
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_lowercase(), value.trim().to_string());
        }
    }

    let content_length: usize =
        headers.get("content-length").and_then(|v| v.parse().ok()).unwrap_or(0);
    let mut body = buf[head_end + 4..].to_vec();
    while body.len() < content_length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(content_length);

    Some(MockRequest {
        method,
        path,
        headers,
        body: String::from_utf8_lossy(&body).to_string(),
    })
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        404 => "Not Found",
        408 => "Request Timeout",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

/// Config pointed at the given mock services, with retry delays shrunk so
/// tests run fast.
pub fn test_config(services: &[(&str, &MockService)]) -> skillswap_comms::CommsConfig {
    use skillswap_comms::config::ServiceEntry;

    let mut config = skillswap_comms::CommsConfig::default();
    config.services = services
        .iter()
        .map(|(name, svc)| ServiceEntry { name: name.to_string(), base_url: svc.base_url() })
        .collect();
    config.retry.base_delay_ms = 1;
    config.retry.max_delay_ms = 5;
    config
}
