//! Record Engine Module
//!
//! Serves configured record collections under per-caller permissions:
//! row filters and field permissions resolved from the caller's identities,
//! a validation and transformation pipeline on every write, optional
//! workflow state machines and presigned object-store access.
//!
//! ```ignore
//! let cfg = EngineConfig::from_yaml_file("recordkit.yaml")?;
//! let engine = RecordEngine::builder(cfg).build().await?;
//! let client = RecordEngineLocalClient::new(engine);
//! ```
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod config;
pub mod domain;
pub mod infra;
pub mod module;

pub use config::EngineConfig;
pub use domain::{Collection, ConfigError, DomainError, Enforcement, RecordEngineLocalClient};
pub use module::{RecordEngine, RecordEngineBuilder};
