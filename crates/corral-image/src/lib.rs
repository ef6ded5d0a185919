//! # corral-image
//!
//! Root filesystem provisioning for the corral runtime.
//!
//! Handles:
//! - **Rootfs**: streaming extraction of one flattened archive per container.
//! - **Hashing**: SHA-256 digests that identify the archive as an image.
//! - **Source**: the fixed local archive standing in for an image store.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod hash;
pub mod rootfs;
pub mod source;
