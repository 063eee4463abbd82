//! Shared utilities for integration tests: mock origins and a proxy launcher.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use forward_proxy::lifecycle::Shutdown;
use forward_proxy::policy::UserProfile;
use forward_proxy::{ProxyConfig, ProxyServer};

/// A running proxy bound to an ephemeral port.
pub struct TestProxy {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub profile: Arc<UserProfile>,
}

impl Drop for TestProxy {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

/// Start a proxy with default settings adjusted by `configure`.
pub async fn start_proxy(configure: impl FnOnce(&mut ProxyConfig)) -> TestProxy {
    let mut config = ProxyConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    configure(&mut config);

    let server = ProxyServer::bind(config).await.unwrap();
    let addr = server.local_addr().unwrap();
    let profile = Arc::clone(server.profile());
    let shutdown = Shutdown::new();
    tokio::spawn(server.run(shutdown.clone()));

    TestProxy {
        addr,
        shutdown,
        profile,
    }
}

/// Origin answering every request with the same canned bytes.
pub struct MockOrigin {
    pub addr: SocketAddr,
    /// Request heads and bodies as received, one entry per request.
    pub requests: Arc<Mutex<Vec<String>>>,
    pub connections: Arc<AtomicUsize>,
}

impl MockOrigin {
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }
}

/// Start an origin. With `close_after` it closes each connection after one response.
pub async fn start_origin(response: &'static [u8], close_after: bool) -> MockOrigin {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let connections = Arc::new(AtomicUsize::new(0));

    let seen = Arc::clone(&requests);
    let count = Arc::clone(&connections);
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            count.fetch_add(1, Ordering::SeqCst);
            let seen = Arc::clone(&seen);
            tokio::spawn(async move {
                let (read, mut write) = socket.into_split();
                let mut reader = BufReader::new(read);
                while let Some(request) = read_request(&mut reader).await {
                    seen.lock().unwrap().push(request);
                    if write.write_all(response).await.is_err() {
                        break;
                    }
                    if close_after {
                        let _ = write.shutdown().await;
                        break;
                    }
                }
            });
        }
    });

    MockOrigin {
        addr,
        requests,
        connections,
    }
}

/// Raw TCP server echoing every byte back.
pub async fn start_echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut read, mut write) = socket.split();
                let _ = tokio::io::copy(&mut read, &mut write).await;
            });
        }
    });
    addr
}

/// A port nothing listens on.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Value of header `name` in a raw head, case-insensitive.
pub fn header(head: &str, name: &str) -> Option<String> {
    head.lines().skip(1).find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim()
            .eq_ignore_ascii_case(name)
            .then(|| value.trim().to_string())
    })
}

async fn read_head<R>(reader: &mut R) -> Option<String>
where
    R: AsyncBufReadExt + Unpin,
{
    let mut head = String::new();
    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).await.ok()?;
        if n == 0 {
            return None;
        }
        if line == "\r\n" || line == "\n" {
            return Some(head);
        }
        head.push_str(&line);
    }
}

/// Read one request (head plus length-delimited or chunked body) as text.
async fn read_request<R>(reader: &mut R) -> Option<String>
where
    R: AsyncBufReadExt + Unpin,
{
    let mut request = read_head(reader).await?;
    request.push_str("\r\n");
    if let Some(length) = header(&request, "Content-Length").and_then(|v| v.parse().ok()) {
        let mut body = vec![0u8; length];
        reader.read_exact(&mut body).await.ok()?;
        request.push_str(&String::from_utf8_lossy(&body));
    } else if header(&request, "Transfer-Encoding").is_some_and(|v| v.contains("chunked")) {
        request.push_str(&read_raw_chunked(reader).await?);
    }
    Some(request)
}

async fn read_raw_chunked<R>(reader: &mut R) -> Option<String>
where
    R: AsyncBufReadExt + Unpin,
{
    let mut raw = String::new();
    loop {
        let mut size_line = String::new();
        reader.read_line(&mut size_line).await.ok()?;
        raw.push_str(&size_line);
        let size_hex = size_line.trim().split(';').next().unwrap_or("");
        let size = usize::from_str_radix(size_hex, 16).ok()?;
        if size == 0 {
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).await.ok()?;
                raw.push_str(&line);
                if line == "\r\n" || line.is_empty() {
                    return Some(raw);
                }
            }
        }
        let mut data = vec![0u8; size + 2];
        reader.read_exact(&mut data).await.ok()?;
        raw.push_str(&String::from_utf8_lossy(&data));
    }
}

/// A client connection to the proxy with response-reading helpers.
pub struct Client {
    reader: BufReader<TcpStream>,
}

impl Client {
    pub async fn connect(proxy: SocketAddr) -> Self {
        let stream = TcpStream::connect(proxy).await.unwrap();
        Self {
            reader: BufReader::new(stream),
        }
    }

    pub async fn send(&mut self, bytes: &[u8]) {
        self.reader.get_mut().write_all(bytes).await.unwrap();
    }

    /// Next response head, status line included, without the blank line.
    pub async fn head(&mut self) -> String {
        tokio::time::timeout(Duration::from_secs(30), read_head(&mut self.reader))
            .await
            .expect("response head timed out")
            .expect("connection closed before response head")
    }

    /// Next response: head and body, the body framed by its headers.
    /// Chunked bodies are returned with their framing.
    pub async fn response(&mut self) -> (String, Vec<u8>) {
        let head = self.head().await;
        let status: u16 = head
            .split(' ')
            .nth(1)
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        let bodyless = (100..200).contains(&status) || status == 204 || status == 304;

        let body = if bodyless {
            Vec::new()
        } else if let Some(length) = header(&head, "Content-Length").and_then(|v| v.parse().ok()) {
            let mut body = vec![0u8; length];
            self.reader.read_exact(&mut body).await.unwrap();
            body
        } else if header(&head, "Transfer-Encoding").is_some_and(|v| v.contains("chunked")) {
            read_raw_chunked(&mut self.reader)
                .await
                .unwrap()
                .into_bytes()
        } else {
            self.read_to_end().await
        };
        (head, body)
    }

    pub async fn read_exact(&mut self, n: usize) -> Vec<u8> {
        let mut buf = vec![0u8; n];
        tokio::time::timeout(Duration::from_secs(10), self.reader.read_exact(&mut buf))
            .await
            .expect("read timed out")
            .unwrap();
        buf
    }

    pub async fn read_to_end(&mut self) -> Vec<u8> {
        let mut rest = Vec::new();
        tokio::time::timeout(Duration::from_secs(30), self.reader.read_to_end(&mut rest))
            .await
            .expect("read to end timed out")
            .unwrap();
        rest
    }

    /// Whether the proxy closed the connection.
    pub async fn is_closed(&mut self) -> bool {
        let mut byte = [0u8; 1];
        matches!(
            tokio::time::timeout(Duration::from_secs(10), self.reader.read(&mut byte)).await,
            Ok(Ok(0)) | Ok(Err(_))
        )
    }
}

/// Status code of a raw response head.
pub fn status(head: &str) -> u16 {
    head.split(' ')
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}
