//! UTS namespace isolation.
//!
//! Gives the container its own hostname.

use corral_common::error::{CorralError, Result};

/// Sets the hostname inside the current UTS namespace.
///
/// # Errors
///
/// Returns an error if `sethostname(2)` fails.
pub fn set_hostname(hostname: &str) -> Result<()> {
    nix::unistd::sethostname(hostname).map_err(|e| CorralError::kernel("sethostname", e))?;
    tracing::debug!(hostname, "container hostname set");
    Ok(())
}
