//! Container lifecycle management for the corral runtime.
//!
//! - [`state`]: the container state store, sole owner of per-ID state
//!   directories and the only path to a running process.
//! - [`launcher`] and [`init`]: the two halves of the re-exec protocol that
//!   turns the runtime binary into a container's init process.
//! - [`backend`]: the backend contract and its native and shell-out variants.

#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod backend;
pub mod cri;
pub mod init;
pub mod launcher;
pub mod logs;
pub mod process;
pub mod state;
