//! # corral-core
//!
//! Low-level Linux isolation primitives for the corral runtime.
//!
//! This crate provides:
//! - **Spec**: the immutable [`spec::IsolationSpec`] every container is built from.
//! - **Namespaces**: clone flags for new namespaces and `setns(2)` joins.
//! - **Cgroups v2**: per-container groups under a fixed parent, memory ceiling.
//! - **Filesystem**: mount table, device nodes, masking, and `pivot_root`.
//! - **Capabilities**: bounding-set drop and `capset(2)` for the allow-list.
//!
//! Functions that must run inside the new namespaces are only called by the
//! init role of the runtime binary. All unsafe system calls are encapsulated
//! in safe wrappers with `// SAFETY:` documentation.

#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod capability;
pub mod cgroup;
pub mod filesystem;
pub mod namespace;
pub mod spec;
