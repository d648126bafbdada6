//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Config → Environment (bindings) → BindingsMeta check
//!            → RouteTree (registry) → Dispatcher → HttpServer
//!
//! Shutdown (shutdown.rs):
//!     Trigger → Stop accepting → Finish in-flight requests
//!             → Drain wait_until tasks → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: bindings first, then routes, then listeners
//! - Fail fast: any startup error is fatal

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{build_environment, Startup, StartupError};
