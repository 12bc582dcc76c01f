//! Shared utilities for integration tests.

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use greenlight_core::http::{AppState, HttpServer, ServerError, ShutdownReport};
use greenlight_core::lifecycle::{ServerState, Shutdown};
use greenlight_core::net::Listener;
use greenlight_core::ServerConfig;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing_subscriber::fmt::MakeWriter;

/// A server running on an ephemeral local port.
#[allow(dead_code)]
pub struct RunningServer {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub state: AppState,
    pub lifecycle: watch::Receiver<ServerState>,
    pub handle: JoinHandle<Result<ShutdownReport, ServerError>>,
}

#[allow(dead_code)]
impl RunningServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Trigger shutdown and wait for `serve` to return.
    pub async fn stop(self) -> Result<ShutdownReport, ServerError> {
        self.shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(30), self.handle)
            .await
            .expect("server did not stop in time")
            .expect("server task panicked")
    }
}

/// Defaults suitable for tests: loopback, short drain.
pub fn test_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.shutdown.drain_timeout_ms = 5_000;
    config
}

pub async fn start_server(config: ServerConfig, routes: Router<AppState>) -> RunningServer {
    start_server_with_updates(config, routes, None).await
}

pub async fn start_server_with_updates(
    config: ServerConfig,
    routes: Router<AppState>,
    updates: Option<mpsc::UnboundedReceiver<ServerConfig>>,
) -> RunningServer {
    let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = tcp.local_addr().unwrap();
    let listener = Listener::from_tcp(tcp, config.listener.max_connections);

    let mut server = HttpServer::new(config)
        .unwrap()
        .routes(routes)
        .without_signal_handlers();
    if let Some(updates) = updates {
        server = server.config_updates(updates);
    }

    let shutdown = server.shutdown_handle();
    let state = server.state().clone();
    let lifecycle = server.lifecycle();
    let handle = tokio::spawn(server.serve(listener));

    RunningServer {
        addr,
        shutdown,
        state,
        lifecycle,
        handle,
    }
}

/// HTTP client that never goes through a system proxy.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .build()
        .unwrap()
}

/// Collects formatted log lines emitted on the current thread.
#[allow(dead_code)]
#[derive(Clone, Default)]
pub struct LogCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
}

#[allow(dead_code)]
impl LogCapture {
    /// Route this thread's events into the capture until the guard drops.
    /// Pair with the single-threaded `#[tokio::test]` runtime so server tasks
    /// log through it too.
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let subscriber = tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::INFO)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buffer.lock().unwrap()).into_owned()
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = LogCapture;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
