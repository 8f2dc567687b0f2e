//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::StatusCode;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use eventstore_proxy::auth::Authenticator;
use eventstore_proxy::backup::BackupService;
use eventstore_proxy::config::{NodeConfig, ProxyConfig};
use eventstore_proxy::forward::NodeTable;
use eventstore_proxy::lifecycle::{assemble, Shutdown};

/// A request as the mock backend received it.
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl CapturedRequest {
    /// First value of `name`, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// What the mock backend answers.
#[derive(Debug, Clone)]
pub struct MockReply {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl MockReply {
    pub fn new(status: u16, body: &str) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.to_string(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

/// Start a mock backend that always gives the same reply.
pub async fn start_mock_backend(reply: MockReply) -> (SocketAddr, mpsc::UnboundedReceiver<CapturedRequest>) {
    start_programmable_backend(move |_| {
        let reply = reply.clone();
        async move { reply }
    })
    .await
}

/// Start a programmable mock backend; every request is also sent to the
/// returned channel.
pub async fn start_programmable_backend<F, Fut>(
    f: F,
) -> (SocketAddr, mpsc::UnboundedReceiver<CapturedRequest>)
where
    F: Fn(CapturedRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = MockReply> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();
    let f = Arc::new(f);

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let f = f.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let (read, mut write) = socket.into_split();
                let mut reader = BufReader::new(read);
                let Some(request) = read_request(&mut reader).await else {
                    return;
                };
                let _ = tx.send(request.clone());

                let reply = f(request).await;
                let reason = StatusCode::from_u16(reply.status)
                    .ok()
                    .and_then(|s| s.canonical_reason())
                    .unwrap_or("Unknown");
                let mut head = format!(
                    "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n",
                    reply.status,
                    reason,
                    reply.body.len()
                );
                for (name, value) in &reply.headers {
                    head.push_str(&format!("{name}: {value}\r\n"));
                }
                head.push_str("\r\n");

                let _ = write.write_all(head.as_bytes()).await;
                let _ = write.write_all(reply.body.as_bytes()).await;
                let _ = write.shutdown().await;
            });
        }
    });

    (addr, rx)
}

async fn read_request<R>(reader: &mut BufReader<R>) -> Option<CapturedRequest>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    reader.read_line(&mut line).await.ok()?;
    let mut parts = line.split_whitespace();
    let method = parts.next()?.to_string();
    let path = parts.next()?.to_string();

    let mut headers = Vec::new();
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).await.ok()?;
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
    }

    let find = |name: &str| {
        headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.clone())
    };

    let mut body = Vec::new();
    if let Some(length) = find("content-length").and_then(|v| v.parse::<usize>().ok()) {
        body.resize(length, 0);
        reader.read_exact(&mut body).await.ok()?;
    } else if find("transfer-encoding").is_some_and(|v| v.eq_ignore_ascii_case("chunked")) {
        loop {
            let mut size = String::new();
            reader.read_line(&mut size).await.ok()?;
            let size = usize::from_str_radix(size.trim(), 16).ok()?;
            let mut chunk = vec![0; size + 2];
            reader.read_exact(&mut chunk).await.ok()?;
            if size == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..size]);
        }
    }

    Some(CapturedRequest {
        method,
        path,
        headers,
        body,
    })
}

/// An address nothing listens on.
pub async fn closed_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

pub fn node(public: &str, internal: SocketAddr) -> NodeConfig {
    NodeConfig {
        public_host: public.to_string(),
        internal_host: internal.to_string(),
    }
}

/// Plain-HTTP configuration over the given nodes.
pub fn config(nodes: Vec<NodeConfig>) -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.cluster.scheme = "http".to_string();
    config.cluster.nodes = nodes;
    config
}

/// Run a proxy on an ephemeral port until the returned handle triggers.
pub async fn start_proxy(
    config: ProxyConfig,
    authenticator: Option<Arc<dyn Authenticator>>,
    backup: Option<Arc<BackupService>>,
) -> (SocketAddr, Shutdown) {
    let nodes = Arc::new(NodeTable::from_config(&config.cluster.nodes));
    let server = assemble(config, client(), nodes, authenticator, backup).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let stop = shutdown.wait();
    tokio::spawn(async move {
        let _ = server.run(listener, stop).await;
    });

    (addr, shutdown)
}

/// Client without pooling or redirects, ignoring proxy variables.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .redirect(reqwest::redirect::Policy::none())
        .no_proxy()
        .build()
        .unwrap()
}

/// Wait until `addr` accepts connections.
pub async fn wait_for(addr: SocketAddr) {
    for _ in 0..50 {
        if TcpStream::connect(addr).await.is_ok() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    panic!("{addr} never accepted connections");
}
