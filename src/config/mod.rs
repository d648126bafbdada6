//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → RouterConfig (validated, immutable)
//!     → routes: RouteTree::from_config + ModuleRegistry
//!     → bindings: Environment
//!     → dispatch: Dispatcher
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    BindingConfig, DispatchConfig, ListenerConfig, ObservabilityConfig, RouteConfig, RouterConfig,
    TimeoutConfig,
};
pub use validation::{validate_config, ValidationError};
