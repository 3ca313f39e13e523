//! lc-server: HTTP control and playback surface plus the ingest listener.
//!
//! This crate ties together all other lc-* crates into a running server
//! application. It provides:
//!
//! - Axum-based control API with authentication and SSE
//! - Public HLS playback of live streams
//! - The RTMP ingest port and its companion control port (health,
//!   publishers, HTTP push)
//! - Graceful shutdown that stops every active stream first

pub mod context;
pub mod error;
pub mod ingest;
pub mod middleware;
pub mod router;
pub mod routes;

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;

use lc_core::config::Config;
use lc_db::SqliteMetadataStore;
use lc_storage::LocalObjectStorage;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::context::AppContext;

/// The three bound sockets the server runs on.
pub struct Listeners {
    pub main: TcpListener,
    pub ingest: TcpListener,
    pub ingest_control: TcpListener,
}

impl Listeners {
    /// Bind all listeners from `config`. Any failure aborts start-up.
    pub async fn bind(config: &Config) -> lc_core::Result<Self> {
        Ok(Self {
            main: bind(&config.server.host, config.server.port).await?,
            ingest: bind(&config.ingest.host, config.ingest.port).await?,
            ingest_control: bind(&config.ingest.host, config.ingest.control_port).await?,
        })
    }
}

async fn bind(host: &str, port: u16) -> lc_core::Result<TcpListener> {
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .map_err(|e| lc_core::Error::Internal(format!("Invalid listen address {host}:{port}: {e}")))?;
    TcpListener::bind(addr)
        .await
        .map_err(|e| lc_core::Error::Internal(format!("Failed to bind to {addr}: {e}")))
}

/// Start the livecast server.
///
/// Initializes the database and object storage, discovers ffmpeg, builds the
/// [`AppContext`], binds every listener and serves until a shutdown signal.
pub async fn start(config: Config) -> lc_core::Result<()> {
    for warning in config.validate() {
        tracing::warn!("Config warning: {warning}");
    }

    // Initialize database.
    let db_path = &config.server.db_path;
    let existed = db_path.exists();
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
            tracing::info!("Created database directory {}", parent.display());
        }
    }
    let db_str = db_path.to_string_lossy();
    let pool = lc_db::pool::init_pool(&db_str)?;
    if existed {
        tracing::info!("Database opened (existing) at {db_str}");
    } else {
        tracing::info!("Database created (new) at {db_str}");
    }
    let store = Arc::new(SqliteMetadataStore::new(pool));

    let storage = LocalObjectStorage::new(&config.storage.root, &config.storage.public_base_url);
    lc_core::paths::ensure_directory(storage.root()).await?;
    let storage = Arc::new(storage);

    // Discover external tools.
    let tools = lc_av::ToolRegistry::discover(&config.tools);
    for info in tools.check_all() {
        if info.available {
            tracing::info!(
                "Tool found: {} ({})",
                info.name,
                info.version.as_deref().unwrap_or("unknown version")
            );
        } else {
            tracing::warn!("Tool not found: {}", info.name);
        }
    }

    let ctx = AppContext::build(config, store, storage, tools)?;
    ctx.directories.ensure_roots().await?;

    let listeners = Listeners::bind(&ctx.config).await?;
    serve(ctx, listeners, CancellationToken::new()).await
}

/// Serve all routers on `listeners` until a signal arrives or `cancel` fires.
///
/// The ingest listener speaks RTMP; the other two serve HTTP. On shutdown
/// every active stream is stopped (and its recording finalized) before the
/// listeners close, since publisher connections would otherwise keep
/// graceful shutdown waiting.
pub async fn serve(
    ctx: AppContext,
    listeners: Listeners,
    cancel: CancellationToken,
) -> lc_core::Result<()> {
    if let Ok(addr) = listeners.main.local_addr() {
        tracing::info!("Listening on {addr} (control and playback)");
    }
    if let Ok(addr) = listeners.ingest.local_addr() {
        tracing::info!(
            "Listening on {} (RTMP ingest)",
            ingest::rtmp::rtmp_url(addr, &ctx.config.ingest.app_name)
        );
    }
    if let Ok(addr) = listeners.ingest_control.local_addr() {
        tracing::info!("Listening on {addr} (ingest control)");
    }

    let servers_stop = CancellationToken::new();

    let main = axum::serve(listeners.main, router::build_router(ctx.clone()))
        .with_graceful_shutdown(servers_stop.clone().cancelled_owned());
    let rtmp = ingest::rtmp::serve_rtmp(ctx.clone(), listeners.ingest, servers_stop.clone());
    let control = axum::serve(
        listeners.ingest_control,
        ingest::build_ingest_control_router(ctx.clone())
            .into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(servers_stop.clone().cancelled_owned());

    let lifecycle = ctx.lifecycle.clone();
    let coordinator = tokio::spawn(async move {
        shutdown_signal(cancel).await;
        lifecycle.shutdown().await;
        servers_stop.cancel();
    });

    let server_error = |e: std::io::Error| lc_core::Error::Internal(format!("Server error: {e}"));
    let result = tokio::try_join!(
        async { main.into_future().await.map_err(server_error) },
        rtmp,
        async { control.into_future().await.map_err(server_error) },
    );
    coordinator.abort();
    result?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Wait for a shutdown signal (SIGINT or SIGTERM) or cancellation.
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
        _ = cancel.cancelled() => {}
    }

    tracing::info!("Shutdown signal received");
}
