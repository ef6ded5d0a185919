//! # corral-network
//!
//! Network attachment for pod sandboxes through CNI plugins.
//!
//! This crate provides:
//! - **Config**: discovery of the primary network configuration list.
//! - **Exec**: plugin lookup and invocation under the CNI environment
//!   convention, bounded by the request deadline.
//! - **Result**: the allocation result returned by `ADD`.
//! - **Manager**: [`manager::CniManager`], chaining `ADD` over the plugin
//!   list and walking it backwards on `DEL`, with the result cached between
//!   the two.
//!
//! Attachment must only run once the target network namespace exists, and
//! teardown must run before it disappears.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod config;
pub mod exec;
pub mod manager;
pub mod result;
