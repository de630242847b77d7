//! Cryptographic operations for Child SA keying
//!
//! Only the IKEv2 PRF family is implemented here. Ciphers, MACs and
//! Diffie-Hellman live behind the kernel and the `KeyExchange` seam.

pub mod prf;

pub use prf::*;
