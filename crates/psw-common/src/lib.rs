//! PSW Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared plumbing for the PSW market-data workspace.
//!
//! - **Logging**: one process-wide `tracing` subscriber configured from `LOG_*` variables
//! - **Error Handling**: the error type shared by workspace members
//!
//! # Example
//!
//! ```no_run
//! use psw_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> psw_common::Result<()> {
//!     let _guard = init_logging(&LogConfig::from_env()?)?;
//!     tracing::info!("ready");
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;

pub use error::{CommonError, Result};
