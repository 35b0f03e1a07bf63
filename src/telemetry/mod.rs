//! Logging infrastructure
//!
//! Structured logging with tracing, console or JSON output and optional
//! file output.

pub mod logging;

pub use logging::{init_logging, LogConfig, LogGuard};
