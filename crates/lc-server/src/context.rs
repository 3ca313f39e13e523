//! Application context.
//!
//! [`AppContext`] is the central struct shared across all route handlers via
//! Axum state. It wraps the lifecycle and immutable infrastructure (config,
//! tools, storage) in `Arc`s.

use std::sync::Arc;

use lc_av::{HlsSettings, ToolRegistry, TranscodeSupervisor};
use lc_core::config::Config;
use lc_core::events::EventBus;
use lc_core::StreamDirectories;
use lc_db::MetadataStore;
use lc_pipeline::StreamLifecycle;
use lc_storage::ObjectStorage;

use crate::ingest::PublisherTable;
use crate::middleware::auth::{ConfigPrincipals, PrincipalLookup};

/// Application context shared by all request handlers (via Axum state).
///
/// This is cheaply cloneable because it only holds `Arc`s.
#[derive(Clone)]
pub struct AppContext {
    /// Immutable application configuration snapshot.
    pub config: Arc<Config>,
    /// Stream lifecycle state machine.
    pub lifecycle: StreamLifecycle,
    /// Path authority for stream directories.
    pub directories: StreamDirectories,
    /// Broadcast event bus for SSE.
    pub event_bus: Arc<EventBus>,
    /// Authenticated-principal lookup for the control surface.
    pub principals: Arc<dyn PrincipalLookup>,
    /// External tool registry.
    pub tools: Arc<ToolRegistry>,
    /// Connected publishers on the ingest port.
    pub publishers: Arc<PublisherTable>,
}

impl AppContext {
    /// Wire the supervisor and lifecycle from `config` and the collaborators.
    ///
    /// Fails if ffmpeg is not in `tools`.
    pub fn build(
        config: Config,
        store: Arc<dyn MetadataStore>,
        storage: Arc<dyn ObjectStorage>,
        tools: ToolRegistry,
    ) -> lc_core::Result<Self> {
        let ffmpeg = tools.require("ffmpeg")?.clone();
        let directories =
            StreamDirectories::new(&config.media.media_root, &config.media.output_root);
        let event_bus = Arc::new(EventBus::default());

        let supervisor = Arc::new(TranscodeSupervisor::new(
            ffmpeg,
            HlsSettings::from(&config.media),
            directories.clone(),
            config.media.poll_interval(),
        ));
        let lifecycle = StreamLifecycle::new(
            store,
            storage,
            directories.clone(),
            supervisor,
            event_bus.clone(),
            config.media.stop_grace(),
        );

        Ok(Self {
            principals: Arc::new(ConfigPrincipals::new(&config.auth)),
            config: Arc::new(config),
            lifecycle,
            directories,
            event_bus,
            tools: Arc::new(tools),
            publishers: Arc::new(PublisherTable::default()),
        })
    }
}
