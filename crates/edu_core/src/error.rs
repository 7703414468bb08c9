//! Error type shared by every driver operation.

use thiserror::Error;

/// Failure modes reported by the driver.
///
/// The region mapper and the control dispatcher return these synchronously to
/// their caller. The interrupt handler never propagates them; it logs and
/// returns so the delivery path is never held up.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EduError {
    /// An offset, length, alignment or access mode was rejected before any
    /// hardware or mapping state was touched.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// A resource could not be obtained: the region is already reserved, the
    /// mapping failed or the interrupt line is busy.
    #[error("resource unavailable: {0}")]
    ResourceUnavailable(String),

    /// The control request number is not one the device understands.
    #[error("unrecognized control request {0:#x}")]
    InvalidOperation(u32),

    /// A register access fell outside the mapped window or was misaligned.
    /// Not retried.
    #[error("hardware fault at offset {offset:#x}: {reason}")]
    HardwareFault {
        offset: usize,
        reason: &'static str,
    },

    /// A blocked wait was released because the device went away.
    #[error("wait cancelled: device detached")]
    Cancelled,

    /// The handle or mapping outlived the device it was derived from.
    #[error("device is no longer attached")]
    Detached,
}

/// Result alias used throughout the driver.
pub type Result<T> = core::result::Result<T, EduError>;
