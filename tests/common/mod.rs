//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`] which creates an in-memory DB, scratch media and
//! upload directories, a fake ffmpeg, and a full [`AppContext`]. The
//! [`TestHarness::with_server`] constructor serves all three ports on random
//! local addresses for HTTP-level testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use lc_av::test_fixtures::{fake_transcoder, FakeBehavior};
use lc_av::ToolRegistry;
use lc_core::config::Config;
use lc_core::{StreamKey, StreamSession, StreamState};
use lc_db::pool::init_memory_pool;
use lc_db::{MetadataStore, SqliteMetadataStore, VideoFilter, VideoRecord, NO_VIDEO_FILE};
use lc_server::context::AppContext;
use lc_server::router::build_router;
use lc_server::Listeners;
use lc_storage::LocalObjectStorage;

/// Key accepted by the harness when auth is enabled; resolves to `admin`.
pub const API_KEY: &str = "test-key";
/// Token accepted by the harness when auth is enabled; resolves to `chan1`.
pub const CHANNEL_TOKEN: &str = "tok-chan1";

/// Addresses of a running server.
pub struct ServerAddrs {
    pub main: SocketAddr,
    pub ingest: SocketAddr,
    pub ingest_control: SocketAddr,
}

/// Test harness wrapping a fully-constructed [`AppContext`] backed by an
/// in-memory database and a fake transcoder.
pub struct TestHarness {
    pub ctx: AppContext,
    pub store: Arc<SqliteMetadataStore>,
    pub root: tempfile::TempDir,
}

impl TestHarness {
    /// Harness with auth disabled and a well-behaved transcoder.
    pub async fn new() -> Self {
        Self::with_options(FakeBehavior::Segmenting, false).await
    }

    /// Harness with `behavior` for the fake transcoder; `auth` enables
    /// [`API_KEY`] and [`CHANNEL_TOKEN`].
    pub async fn with_options(behavior: FakeBehavior, auth: bool) -> Self {
        let root = tempfile::tempdir().expect("failed to create temp dir");

        let mut config = Config::default();
        config.media.media_root = root.path().join("media");
        config.media.output_root = root.path().join("video");
        config.media.poll_interval_ms = 20;
        config.media.stop_grace_secs = 2;
        config.storage.root = root.path().join("uploads");
        config.server.host = "127.0.0.1".into();
        config.ingest.host = "127.0.0.1".into();
        config.server.port = 0;
        config.ingest.port = 0;
        config.ingest.control_port = 0;
        if auth {
            config.auth.enabled = true;
            config.auth.api_key = Some(API_KEY.into());
            config
                .auth
                .tokens
                .insert(CHANNEL_TOKEN.into(), "chan1".into());
        }

        let pool = init_memory_pool().expect("failed to create in-memory pool");
        let store = Arc::new(SqliteMetadataStore::new(pool));
        let storage = Arc::new(LocalObjectStorage::new(
            &config.storage.root,
            &config.storage.public_base_url,
        ));
        let tools = ToolRegistry::default().with_tool(fake_transcoder(root.path(), behavior));

        let ctx = AppContext::build(config, store.clone(), storage, tools)
            .expect("failed to build context");
        ctx.directories
            .ensure_roots()
            .await
            .expect("failed to create media roots");

        Self { ctx, store, root }
    }

    /// Serve all ports on `127.0.0.1:0`. Cancel the token to shut down.
    pub async fn with_server(
        behavior: FakeBehavior,
        auth: bool,
    ) -> (Self, ServerAddrs, CancellationToken, tokio::task::JoinHandle<()>) {
        let harness = Self::with_options(behavior, auth).await;
        let listeners = Listeners::bind(&harness.ctx.config)
            .await
            .expect("failed to bind listeners");
        let addrs = ServerAddrs {
            main: listeners.main.local_addr().unwrap(),
            ingest: listeners.ingest.local_addr().unwrap(),
            ingest_control: listeners.ingest_control.local_addr().unwrap(),
        };

        let cancel = CancellationToken::new();
        let ctx = harness.ctx.clone();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            lc_server::serve(ctx, listeners, token)
                .await
                .expect("server failed");
        });

        (harness, addrs, cancel, handle)
    }

    /// The main-port router.
    pub fn app(&self) -> axum::Router {
        build_router(self.ctx.clone())
    }

    /// Insert a Scheduled live record for `key` owned by `chan1`.
    pub async fn schedule(&self, key: &str) -> VideoRecord {
        let now = chrono::Utc::now().to_rfc3339();
        let record = VideoRecord {
            id: key.parse().unwrap(),
            video_file: NO_VIDEO_FILE.into(),
            thumbnail: "/uploads/thumb.png".into(),
            title: format!("Stream {key}"),
            description: "integration".into(),
            duration: "60".into(),
            views: 0,
            is_published: true,
            live_stream: true,
            scheduled_at: Some(now.clone()),
            channel_id: "chan1".parse().unwrap(),
            created_at: now.clone(),
            updated_at: now,
        };
        self.store.create(record).await.expect("failed to insert record")
    }

    /// Current record for `key`.
    pub async fn record(&self, key: &str) -> Option<VideoRecord> {
        let key: StreamKey = key.parse().unwrap();
        self.store
            .find_one(&VideoFilter::by_id(&key))
            .await
            .expect("failed to query record")
    }

    /// Stream directory for `key`.
    pub fn stream_dir(&self, key: &str) -> PathBuf {
        self.ctx.directories.resolve(&key.parse().unwrap()).dir
    }

    /// Poll the lifecycle until `key` reaches `state`.
    pub async fn wait_for_state(&self, key: &str, state: StreamState) -> StreamSession {
        let key: StreamKey = key.parse().unwrap();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let session = self.ctx.lifecycle.status(&key).await.unwrap();
            if session.state == state {
                return session;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "stream {key} stuck in {:?}, wanted {:?}",
                session.state,
                state
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Send a request through the main router.
    pub async fn request(&self, request: Request<Body>) -> (StatusCode, Vec<u8>, axum::http::HeaderMap) {
        let response = self.app().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.into_body().collect().await.unwrap().to_bytes().to_vec();
        (status, body, headers)
    }

    /// `GET path` through the main router.
    pub async fn get(&self, path: &str) -> (StatusCode, Vec<u8>, axum::http::HeaderMap) {
        self.request(Request::get(path).body(Body::empty()).unwrap())
            .await
    }

    /// `POST path` with the admin API key.
    pub async fn post_authed(&self, path: &str) -> (StatusCode, serde_json::Value) {
        let (status, body, _) = self
            .request(
                Request::post(path)
                    .header("authorization", format!("Bearer {API_KEY}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        (status, json(&body))
    }

    /// `GET path` with the admin API key.
    pub async fn get_authed(&self, path: &str) -> (StatusCode, serde_json::Value) {
        let (status, body, _) = self
            .request(
                Request::get(path)
                    .header("authorization", format!("Bearer {API_KEY}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        (status, json(&body))
    }
}

/// Parse a JSON body, `Null` when empty.
pub fn json(body: &[u8]) -> serde_json::Value {
    if body.is_empty() {
        return serde_json::Value::Null;
    }
    serde_json::from_slice(body).expect("response body is not JSON")
}
