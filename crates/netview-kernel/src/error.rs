//! Kernel-specific error types.

use netview_types::error::NetViewError;
use netview_wire::WireError;
use thiserror::Error;

/// Kernel error type wrapping relay and transport errors.
#[derive(Error, Debug)]
pub enum KernelError {
    /// A wrapped NetViewError.
    #[error(transparent)]
    NetView(#[from] NetViewError),

    /// The transport failed.
    #[error(transparent)]
    Wire(#[from] WireError),

    /// The runtime failed to boot.
    #[error("Boot failed: {0}")]
    BootFailed(String),
}

/// Alias for kernel results.
pub type KernelResult<T> = Result<T, KernelError>;
