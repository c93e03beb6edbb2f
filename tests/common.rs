#![allow(dead_code, unreachable_pub, clippy::unwrap_used, clippy::missing_panics_doc, missing_debug_implementations)]

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::serve::Listener;
use dice_proxy::AppBuilder;
use dice_proxy::api::{HookChain, RequestHook};
use dice_proxy::config::Config;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::Once;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

static INIT: Once = Once::new();

pub fn setup_tracing() {
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "warn".into())
            .add_directive("dice_proxy=debug".parse().unwrap())
            .add_directive("tower=warn".parse().unwrap())
            .add_directive("hyper=warn".parse().unwrap())
            .add_directive("reqwest=warn".parse().unwrap());

        tracing_subscriber::fmt().with_env_filter(filter).with_test_writer().init();
    });
}

pub fn get_test_config() -> Config {
    let mut config = Config::default();
    config.server.host = "127.0.0.1".to_string();
    config.server.port = 0;
    config.upstream.timeout_ms = 2_000;
    config.upstream.connect_timeout_ms = 500;
    config
}

/// How the fake dice service answers.
#[derive(Clone, Debug)]
pub enum StubBehavior {
    Respond { status: StatusCode, body: Bytes, content_type: Option<&'static str> },
    /// Answers with the 1-based index of the call, so every caller gets a distinct body.
    Sequence,
    /// Accepts the request and never answers.
    Hang,
    /// Redirects to `/other`, which answers "6".
    Redirect(StatusCode),
}

impl StubBehavior {
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self::Respond { status: StatusCode::OK, body: body.into(), content_type: None }
    }
}

#[derive(Clone)]
struct StubState {
    behavior: StubBehavior,
    hits: Arc<AtomicUsize>,
}

/// Tracks how many connections the stub accepted and how many are still open.
#[derive(Clone, Debug, Default)]
pub struct ConnectionStats {
    accepted: Arc<AtomicUsize>,
    open: Arc<AtomicUsize>,
}

impl ConnectionStats {
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    pub fn open(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }
}

struct CountingListener {
    inner: TcpListener,
    stats: ConnectionStats,
}

impl Listener for CountingListener {
    type Io = TrackedStream;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        let (inner, addr) = Listener::accept(&mut self.inner).await;
        self.stats.accepted.fetch_add(1, Ordering::SeqCst);
        self.stats.open.fetch_add(1, Ordering::SeqCst);
        (TrackedStream { inner, open: Arc::clone(&self.stats.open) }, addr)
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        Listener::local_addr(&self.inner)
    }
}

/// Server side of one stub connection; decrements the open count when hyper drops it.
struct TrackedStream {
    inner: TcpStream,
    open: Arc<AtomicUsize>,
}

impl Drop for TrackedStream {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

impl AsyncRead for TrackedStream {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for TrackedStream {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

pub struct StubUpstream {
    pub url: String,
    pub hits: Arc<AtomicUsize>,
    pub connections: ConnectionStats,
}

impl StubUpstream {
    pub async fn spawn(behavior: StubBehavior) -> Self {
        let hits = Arc::new(AtomicUsize::new(0));
        let state = StubState { behavior, hits: Arc::clone(&hits) };

        let router = Router::new().route("/rolldice", get(rolldice)).route("/other", get(other)).with_state(state);
        let connections = ConnectionStats::default();
        let listener =
            CountingListener { inner: TcpListener::bind("127.0.0.1:0").await.unwrap(), stats: connections.clone() };
        let addr = Listener::local_addr(&listener).unwrap();

        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self { url: format!("http://{addr}/rolldice"), hits, connections }
    }

    pub fn hit_count(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    /// Polls until every accepted connection has been closed, or gives up after `within`.
    pub async fn wait_for_connections_closed(&self, within: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + within;
        while tokio::time::Instant::now() < deadline {
            if self.connections.open() == 0 {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        self.connections.open() == 0
    }
}

async fn other(State(stub): State<StubState>) -> &'static str {
    stub.hits.fetch_add(1, Ordering::SeqCst);
    "6"
}

async fn rolldice(State(stub): State<StubState>) -> Response {
    let call = stub.hits.fetch_add(1, Ordering::SeqCst) + 1;

    match stub.behavior {
        StubBehavior::Respond { status, body, content_type } => {
            let mut response = (status, body).into_response();
            match content_type {
                Some(ct) => {
                    response.headers_mut().insert(header::CONTENT_TYPE, header::HeaderValue::from_static(ct));
                }
                None => {
                    response.headers_mut().remove(header::CONTENT_TYPE);
                }
            }
            response
        }
        StubBehavior::Sequence => call.to_string().into_response(),
        StubBehavior::Redirect(status) => (status, [(header::LOCATION, "/other")]).into_response(),
        StubBehavior::Hang => {
            std::future::pending::<()>().await;
            StatusCode::OK.into_response()
        }
    }
}

pub struct TestApp {
    pub server_url: String,
    pub client: reqwest::Client,
    pub shutdown_tx: watch::Sender<bool>,
}

impl TestApp {
    pub async fn spawn_with_upstream(upstream_url: &str) -> Self {
        let mut config = get_test_config();
        config.upstream.url = upstream_url.to_string();
        Self::spawn_with_config(config).await
    }

    pub async fn spawn_with_config(config: Config) -> Self {
        Self::spawn_with_hooks(config, HookChain::standard()).await
    }

    pub async fn spawn_with_hooks(config: Config, hooks: HookChain) -> Self {
        Self::serve(AppBuilder::new(config).with_hooks(hooks).build()).await
    }

    /// Standard instrumentation plus one extra hook.
    pub async fn spawn_with_extra_hook(config: Config, hook: impl RequestHook + 'static) -> Self {
        Self::serve(AppBuilder::new(config).with_hook(hook).build()).await
    }

    pub async fn serve(router: Router) -> Self {
        setup_tracing();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.wait_for(|&s| s).await;
                })
                .await
                .unwrap();
        });

        Self { server_url: format!("http://{addr}"), client: reqwest::Client::new(), shutdown_tx }
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.client.get(format!("{}{}", self.server_url, path)).send().await.unwrap()
    }
}
