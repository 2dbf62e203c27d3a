//! Domain layer for the record engine.

pub mod collection;
pub mod error;
pub mod local_client;
pub mod model;
pub mod permissions;
pub mod pipeline;
pub mod plugins;
pub mod ports;
pub mod registry;
pub mod state_machine;


pub use collection::{Collection, Enforcement};
pub use error::{ConfigError, DomainError};
pub use local_client::RecordEngineLocalClient;
pub use model::ModelDescriptor;
pub use registry::ModelRegistry;
