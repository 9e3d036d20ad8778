//! LT Statistics common library
//!
//! Shared plumbing for the `ltstat` workspace members:
//!
//! - **Logging**: tracing subscriber setup driven by `LOG_*` environment variables
//! - **Checksums**: content digests recorded for staged objects

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod checksum;
pub mod logging;

pub use checksum::sha256_hex;
