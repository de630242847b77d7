//! # Fynx Platform
//!
//! Core platform types and traits shared by Fynx protocol crates.
//!
//! This crate provides:
//! - Unified error types (`FynxError`, `FynxResult`)
//! - The `SecurityModule` lifecycle trait implemented by long-running protocol sessions
//!
//! # Examples
//!
//! ```
//! use fynx_platform::{FynxError, FynxResult};
//!
//! fn open_session(name: &str) -> FynxResult<String> {
//!     if name.is_empty() {
//!         return Err(FynxError::Config("session name cannot be empty".into()));
//!     }
//!     Ok(format!("session:{}", name))
//! }
//!
//! # fn main() -> FynxResult<()> {
//! let session = open_session("child-1")?;
//! assert_eq!(session, "session:child-1");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod error;
pub mod traits;

pub use error::{FynxError, FynxResult};
pub use traits::SecurityModule;

/// Platform version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
