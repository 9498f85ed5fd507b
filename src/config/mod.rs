//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → LinkConfig (validated, immutable)
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → watcher.rs diffs against the config in force
//!     → LifecycleController::update_config swaps the ConnectionConfig
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - A reload only affects decisions made after it; armed timers keep
//!   the delay they were scheduled with

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use schema::{
    ConnectionConfig, FallbackPolicy, LinkConfig, ObservabilityConfig, ParametersConfig,
    ServiceConfig,
};
