//! Defines the unified error surface for service launch and supervision.

use thiserror::Error;

use crate::bootstrap::BootstrapError;
use crate::transport::ListenerError;

use super::shutdown::ShutdownError;

/// `sysexits.h` code for configuration errors.
const EX_CONFIG: u8 = 78;
/// `sysexits.h` code for an unavailable service, used when the socket
/// cannot be bound.
const EX_UNAVAILABLE: u8 = 69;
/// `sysexits.h` code for operating-system errors.
const EX_OSERR: u8 = 71;

/// Errors surfaced while launching or supervising the service process.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// Bootstrapping the service failed.
    #[error("service bootstrap failed: {source}")]
    Bootstrap {
        /// Underlying bootstrap error.
        #[source]
        source: BootstrapError,
    },
    /// Socket listener startup failed.
    #[error("service socket listener failed: {source}")]
    Listener {
        /// Underlying listener error.
        #[source]
        source: ListenerError,
    },
    /// Waiting for shutdown failed.
    #[error("failed to await shutdown signal: {source}")]
    Shutdown {
        /// Underlying shutdown error.
        #[source]
        source: ShutdownError,
    },
}

impl LaunchError {
    /// Process exit status for this failure.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Bootstrap {
                source: BootstrapError::Configuration { .. } | BootstrapError::Telemetry { .. },
            } => EX_CONFIG,
            Self::Listener { .. } => EX_UNAVAILABLE,
            Self::Bootstrap { .. } | Self::Shutdown { .. } => EX_OSERR,
        }
    }
}

impl From<BootstrapError> for LaunchError {
    fn from(source: BootstrapError) -> Self {
        Self::Bootstrap { source }
    }
}

impl From<ListenerError> for LaunchError {
    fn from(source: ListenerError) -> Self {
        Self::Listener { source }
    }
}

impl From<ShutdownError> for LaunchError {
    fn from(source: ShutdownError) -> Self {
        Self::Shutdown { source }
    }
}
