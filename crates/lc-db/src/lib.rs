//! lc-db: metadata persistence.
//!
//! SQLite-backed storage for video records with connection pooling,
//! embedded migrations, and the async [`store::MetadataStore`] seam used by
//! the stream lifecycle.

pub mod migrations;
pub mod models;
pub mod pool;
pub mod queries;
pub mod store;

pub use models::{VideoFilter, VideoPatch, VideoRecord, NO_VIDEO_FILE};
pub use store::{MetadataStore, SqliteMetadataStore};
