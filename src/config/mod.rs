//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ServerConfig (validated, immutable)
//!     → ServerBuilder::from_config registers queues and methods
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; the server is built from it once
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use schema::{MethodConfig, ObservabilityConfig, PendingConfig, ServerConfig, SimulationConfig};
