//! panelkit Telemetry - Logging setup for panelkit binaries and tests.
//!
//! This crate provides:
//! - [`LogConfig`], a serializable description of the subscriber to install
//! - [`setup_logging`], which installs it as the global `tracing` subscriber
//!
//! # Example
//!
//! ```rust,no_run
//! use panelkit_telemetry::{LogConfig, LogFormat, setup_logging};
//!
//! # fn main() -> Result<(), panelkit_telemetry::TelemetryError> {
//! let config = LogConfig::new("debug")
//!     .with_format(LogFormat::Compact)
//!     .with_directive("panelkit_runtime=trace");
//!
//! setup_logging(&config)?;
//! tracing::info!("logging ready");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod error;
mod logging;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::{
    FileLogConfig, FileRotation, LogConfig, LogFormat, LogTarget, setup_default_logging,
    setup_logging,
};
