//! Record engine SDK
//!
//! This crate provides the public contract of the record engine:
//!
//! - [`RecordEngineClient`] - API trait for consumers
//! - [`SearchQuery`], [`WriteOptions`], [`TransitionRequest`] - request models
//! - [`PresignedUrl`] - object-store access grant
//! - [`RecordEngineError`] / [`ErrorKind`] - typed failures
//!
//! ## Usage
//!
//! ```ignore
//! use record_engine_sdk::{RecordEngineClient, SearchQuery};
//!
//! let rows = client
//!     .search(&ctx, "articles", SearchQuery::default().order_by("title", "asc"))
//!     .await?;
//! ```

pub mod api;
pub mod errors;
pub mod models;

pub use api::RecordEngineClient;
pub use errors::{ErrorKind, RecordEngineError};
pub use models::{
    PresignedUrl, Record, SearchQuery, SortSpec, TransitionRequest, WriteOptions,
};

pub use recordkit_db::Condition;
pub use recordkit_security::SecurityContext;
