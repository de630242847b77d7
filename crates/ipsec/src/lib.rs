//! IKEv2 Child SA session controller for the Fynx security ecosystem.
//!
//! This crate implements the state machine that negotiates, rekeys, deletes
//! and migrates one IPsec Child SA pair on behalf of a parent IKE session
//! (RFC 7296 Sections 1.3 and 1.4, RFC 4555 for MOBIKE).
//!
//! The controller never touches the network or the kernel directly. It talks
//! to the parent session through [`child_session::SessionCallback`], to the
//! application through [`child_session::ChildSessionUserCallback`], and to
//! SPI/key/kernel resources through small traits that can be replaced in tests.
//!
//! # Example
//!
//! ```rust,ignore
//! use fynx_ipsec::child_session::{ChildSessionController, ChildSessionDeps, IkeSaContext};
//! use fynx_ipsec::config::ChildSessionParams;
//! use fynx_ipsec::crypto::prf::PrfAlgorithm;
//!
//! let params = ChildSessionParams::builder().build()?;
//! let mut child = ChildSessionController::new(params, deps);
//! let ctx = IkeSaContext::new(local, remote, None, PrfAlgorithm::HmacSha256, 14, sk_d);
//! child.create_child_session(ctx);
//! child.dispatch_all();
//! ```
//!
//! # References
//!
//! - [RFC 7296](https://datatracker.ietf.org/doc/html/rfc7296) - IKEv2
//! - [RFC 4555](https://datatracker.ietf.org/doc/html/rfc4555) - MOBIKE

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod child_session;
pub mod config;
pub mod crypto;
pub mod error;
pub mod ikev2;
pub mod logging;

pub use error::{Error, Result};
