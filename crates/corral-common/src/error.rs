//! Unified error types for the corral workspace.
//!
//! Every crate returns [`CorralError`]. Variants follow the runtime's failure
//! taxonomy: configuration, missing objects, kernel operations, external
//! tools (CNI plugins, the container engine CLI), filesystem work, and
//! violations of the re-exec init handshake.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum CorralError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid or missing.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// A resource with the same identifier already has live state.
    #[error("{kind} already exists: {id}")]
    AlreadyExists {
        /// Type of the conflicting resource.
        kind: &'static str,
        /// Identifier of the conflicting resource.
        id: String,
    },

    /// A namespace, cgroup, mount, or process syscall failed.
    #[error("kernel operation '{operation}' failed: {message}")]
    Kernel {
        /// Name of the failed operation.
        operation: &'static str,
        /// Description of the failure.
        message: String,
    },

    /// An external binary exited unsuccessfully or produced malformed output.
    #[error("{tool} failed: {message}")]
    ExternalTool {
        /// Tool name (plugin type or binary name).
        tool: String,
        /// Output or decoding error reported by the tool.
        message: String,
    },

    /// The re-exec init handshake was broken.
    #[error("init protocol violation: {message}")]
    ProtocolViolation {
        /// Description of the violation.
        message: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },

    /// The selected backend cannot perform this operation.
    #[error("{operation} is not supported by the {backend} backend")]
    Unsupported {
        /// Requested operation.
        operation: &'static str,
        /// Backend that rejected it.
        backend: &'static str,
    },

    /// The caller cancelled the operation or its deadline passed.
    #[error("{operation} cancelled")]
    Cancelled {
        /// Operation that observed the cancellation.
        operation: &'static str,
    },

    /// The sandbox is running but its network could not be attached.
    ///
    /// Carries the sandbox ID so the caller can decide whether to remove it.
    #[error("sandbox {sandbox_id} started but network setup failed: {source}")]
    NetworkSetup {
        /// ID of the sandbox that now exists without networking.
        sandbox_id: String,
        /// Failure reported by the network coordinator.
        source: Box<CorralError>,
    },
}

impl CorralError {
    /// Builds an [`CorralError::Io`] for the given path.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Builds a [`CorralError::Kernel`] from any displayable cause.
    pub fn kernel(operation: &'static str, cause: impl std::fmt::Display) -> Self {
        Self::Kernel {
            operation,
            message: cause.to_string(),
        }
    }

    /// Returns `true` if this error reports a missing resource.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, CorralError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_message_names_kind_and_id() {
        let err = CorralError::NotFound {
            kind: "container",
            id: "abc".into(),
        };
        assert_eq!(err.to_string(), "container not found: abc");
        assert!(err.is_not_found());
    }

    #[test]
    fn network_setup_error_keeps_sandbox_id() {
        let err = CorralError::NetworkSetup {
            sandbox_id: "k8s_POD_web_default_abc123".into(),
            source: Box::new(CorralError::ExternalTool {
                tool: "bridge".into(),
                message: "no such netns".into(),
            }),
        };
        let text = err.to_string();
        assert!(text.contains("k8s_POD_web_default_abc123"));
        assert!(text.contains("bridge failed: no such netns"));
    }

    #[test]
    fn serde_errors_convert() {
        let parse: std::result::Result<u32, _> = serde_json::from_str("nope");
        let err: CorralError = parse.unwrap_err().into();
        assert!(matches!(err, CorralError::Serialization { .. }));
    }
}
