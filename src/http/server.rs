//! HTTP server setup and shutdown coordination.
//!
//! # Responsibilities
//! - Create the Axum Router: built-in routes, caller routes, middleware
//! - Own the accept loop and one task per connection
//! - Close connections that stall while sending headers or sit idle
//! - Start the limiter janitor and the signal watcher
//! - On shutdown: stop accepting, drain connections within the deadline,
//!   wait for background tasks, report the outcome

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, FromRef},
    http::Request,
    middleware::from_fn_with_state,
    routing::get,
    Router,
};
use hyper::body::Incoming;
use hyper_util::{
    rt::{TokioExecutor, TokioIo, TokioTimer},
    server::conn::auto,
};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use tower_http::{
    catch_panic::CatchPanicLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::{ServerConfig, TimeoutConfig};
use crate::http::healthcheck::healthcheck_handler;
use crate::http::middleware::rate_limit_middleware;
use crate::http::response::{method_not_allowed_handler, not_found_handler, panic_response};
use crate::lifecycle::{signals, ServerState, Shutdown, StateTracker};
use crate::limiter::{LimiterError, LimiterRegistry};
use crate::net::{
    ConnectionActivity, ConnectionGuard, ConnectionPermit, ConnectionTracker, Listener,
    ListenerError,
};
use crate::observability::metrics;
use crate::tasks::BackgroundTasks;

/// Error type for a server run.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The listener failed for a reason other than shutdown.
    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("invalid rate limiter settings: {0}")]
    Limiter(#[from] LimiterError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// How a completed shutdown went.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// The drain deadline elapsed before every connection finished.
    pub drain_timed_out: bool,
    /// Connections force-closed when the deadline elapsed.
    pub aborted_connections: u64,
    /// Background tasks still running when a bounded task wait gave up.
    pub abandoned_tasks: usize,
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub limiter: Arc<LimiterRegistry>,
    pub tasks: BackgroundTasks,
    pub env: Arc<str>,
}

impl FromRef<AppState> for Arc<LimiterRegistry> {
    fn from_ref(state: &AppState) -> Self {
        Arc::clone(&state.limiter)
    }
}

impl FromRef<AppState> for BackgroundTasks {
    fn from_ref(state: &AppState) -> Self {
        state.tasks.clone()
    }
}

/// HTTP server for the API.
pub struct HttpServer {
    config: ServerConfig,
    state: AppState,
    routes: Router<AppState>,
    shutdown: Shutdown,
    lifecycle: StateTracker,
    config_updates: Option<mpsc::UnboundedReceiver<ServerConfig>>,
    handle_signals: bool,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: ServerConfig) -> Result<Self, ServerError> {
        let limiter = Arc::new(LimiterRegistry::from_config(&config.limiter)?);

        let state = AppState {
            limiter,
            tasks: BackgroundTasks::new(),
            env: Arc::from(config.env.as_str()),
        };

        Ok(Self {
            config,
            state,
            routes: Router::new(),
            shutdown: Shutdown::new(),
            lifecycle: StateTracker::new(),
            config_updates: None,
            handle_signals: true,
        })
    }

    /// Add application routes. They run behind the rate limiter.
    pub fn routes(mut self, routes: Router<AppState>) -> Self {
        self.routes = self.routes.merge(routes);
        self
    }

    /// Apply live-toggleable settings from reloaded configurations.
    pub fn config_updates(mut self, updates: mpsc::UnboundedReceiver<ServerConfig>) -> Self {
        self.config_updates = Some(updates);
        self
    }

    /// Do not listen for OS signals; shutdown must be triggered through
    /// [`shutdown_handle`](Self::shutdown_handle).
    pub fn without_signal_handlers(mut self) -> Self {
        self.handle_signals = false;
        self
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Handle that starts a graceful shutdown when triggered.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Observe `Running → Draining → Stopped` transitions.
    pub fn lifecycle(&self) -> watch::Receiver<ServerState> {
        self.lifecycle.subscribe()
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &ServerConfig, state: AppState, routes: Router<AppState>) -> Router {
        Router::new()
            .route("/v1/healthcheck", get(healthcheck_handler))
            .merge(routes)
            .method_not_allowed_fallback(method_not_allowed_handler)
            .fallback(not_found_handler)
            .layer(from_fn_with_state(state.clone(), rate_limit_middleware))
            .with_state(state)
            .layer(CatchPanicLayer::custom(panic_response))
            .layer(TimeoutLayer::new(config.timeouts.request_timeout()))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("unknown");
                tracing::info_span!(
                    "request",
                    method = %request.method(),
                    uri = %request.uri(),
                    request_id = %request_id,
                )
            }))
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// Run the server until shutdown completes.
    ///
    /// Returns an error only if the listener failed; a drain that hit its
    /// deadline is reported in [`ShutdownReport`].
    pub async fn serve(self, listener: Listener) -> Result<ShutdownReport, ServerError> {
        let HttpServer {
            config,
            state,
            routes,
            shutdown,
            lifecycle,
            config_updates,
            handle_signals,
        } = self;

        let token = shutdown.token();
        let local_addr = listener.local_addr()?;

        let janitor = state.limiter.spawn_janitor(
            config.limiter.sweep_interval(),
            config.limiter.idle_eviction(),
            token.clone(),
        )?;
        if handle_signals {
            if let Err(e) = signals::spawn_signal_watcher(shutdown.clone()) {
                // The server can still be stopped through the shutdown handle.
                tracing::error!(error = %e, "Failed to install signal handlers");
            }
        }
        if let Some(updates) = config_updates {
            spawn_config_listener(updates, Arc::clone(&state.limiter), token.clone());
        }

        let context = ConnectionContext {
            app: Self::build_router(&config, state.clone(), routes),
            builder: connection_builder(&config.timeouts),
            idle_timeout: config.timeouts.idle_timeout(),
            shutdown: token.clone(),
        };
        let tracker = ConnectionTracker::new();
        let mut connections = JoinSet::new();
        let mut listener_error = None;

        tracing::info!(
            address = %local_addr,
            env = %config.env,
            limiter_enabled = state.limiter.is_enabled(),
            "Starting server"
        );

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer, permit)) => {
                        let guard = tracker.track();
                        connections.spawn(serve_connection(
                            stream,
                            peer,
                            permit,
                            guard,
                            context.clone(),
                        ));
                    }
                    Err(e) if e.is_transient() => {
                        tracing::debug!(error = %e, "Transient accept error");
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Listener failed, shutting down");
                        listener_error = Some(e);
                        break;
                    }
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        // Whatever ended the loop, every observer of the token now winds down.
        shutdown.trigger();
        lifecycle.advance(ServerState::Draining);
        drop(listener);

        let drain_timeout = config.shutdown.drain_timeout();
        tracing::info!(
            in_flight = tracker.active_count(),
            ?drain_timeout,
            "Draining connections"
        );

        let mut report = ShutdownReport::default();
        let drained = tokio::time::timeout(drain_timeout, async {
            while connections.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            report.drain_timed_out = true;
            report.aborted_connections = tracker.active_count();
            metrics::record_drain_timeout();
            tracing::warn!(
                aborted = report.aborted_connections,
                ?drain_timeout,
                "Drain timeout elapsed, closing remaining connections"
            );
            connections.shutdown().await;
        }

        tracing::info!(
            outstanding = state.tasks.outstanding(),
            "Waiting for background tasks"
        );
        match config.shutdown.task_wait_timeout() {
            None => state.tasks.wait().await,
            Some(limit) => {
                if !state.tasks.wait_timeout(limit).await {
                    report.abandoned_tasks = state.tasks.outstanding();
                    tracing::warn!(
                        abandoned = report.abandoned_tasks,
                        ?limit,
                        "Background tasks still running after wait limit"
                    );
                }
            }
        }

        if let Err(e) = janitor.await {
            tracing::warn!(error = %e, "Limiter janitor ended abnormally");
        }
        lifecycle.advance(ServerState::Stopped);

        match listener_error {
            Some(e) => Err(ServerError::Listener(e)),
            None => {
                tracing::info!(address = %local_addr, "Server stopped");
                Ok(report)
            }
        }
    }
}

/// Everything a connection task needs besides its socket.
#[derive(Clone)]
struct ConnectionContext {
    app: Router,
    builder: auto::Builder<TokioExecutor>,
    idle_timeout: Duration,
    shutdown: CancellationToken,
}

fn connection_builder(timeouts: &TimeoutConfig) -> auto::Builder<TokioExecutor> {
    let mut builder = auto::Builder::new(TokioExecutor::new());
    builder
        .http1()
        .timer(TokioTimer::new())
        .header_read_timeout(timeouts.read_timeout());
    builder
}

/// Serve one connection until it closes. The connection is shut down
/// gracefully once `shutdown` fires or it has been idle for `idle_timeout`.
/// Aborting the task force-closes the socket.
async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    _permit: ConnectionPermit,
    guard: ConnectionGuard,
    context: ConnectionContext,
) {
    let ConnectionContext {
        app,
        builder,
        idle_timeout,
        shutdown,
    } = context;

    let activity = ConnectionActivity::new();
    let service = {
        let activity = Arc::clone(&activity);
        hyper::service::service_fn(move |mut request: Request<Incoming>| {
            request.extensions_mut().insert(ConnectInfo(peer));
            let in_flight = activity.request_started();
            let response = app.clone().oneshot(request);
            async move {
                let response = response.await;
                drop(in_flight);
                response
            }
        })
    };

    let connection = builder.serve_connection_with_upgrades(TokioIo::new(stream), service);
    tokio::pin!(connection);

    let idle_check = tokio::time::sleep(idle_timeout);
    tokio::pin!(idle_check);

    let mut closing = false;
    loop {
        tokio::select! {
            result = connection.as_mut() => {
                if let Err(e) = result {
                    tracing::debug!(connection_id = %guard.id(), peer = %peer, error = %e, "Connection error");
                }
                break;
            }
            _ = shutdown.cancelled(), if !closing => {
                closing = true;
                connection.as_mut().graceful_shutdown();
            }
            _ = idle_check.as_mut(), if !closing => match activity.idle_deadline(idle_timeout) {
                Some(deadline) if deadline <= Instant::now() => {
                    tracing::debug!(connection_id = %guard.id(), peer = %peer, "Closing idle connection");
                    closing = true;
                    connection.as_mut().graceful_shutdown();
                }
                Some(deadline) => idle_check.as_mut().reset(deadline),
                None => idle_check.as_mut().reset(Instant::now() + idle_timeout),
            },
        }
    }
}

/// Apply the rate limiter kill switch from reloaded configurations.
fn spawn_config_listener(
    mut updates: mpsc::UnboundedReceiver<ServerConfig>,
    limiter: Arc<LimiterRegistry>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                update = updates.recv() => match update {
                    Some(config) => {
                        limiter.set_enabled(config.limiter.enabled);
                        tracing::info!(limiter_enabled = config.limiter.enabled, "Configuration reloaded");
                    }
                    None => break,
                },
                _ = shutdown.cancelled() => break,
            }
        }
    })
}
