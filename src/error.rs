//! Error types for the HAL core.
//!
//! Steady-state capture errors never reach the caller as errors (they are
//! turned into silence by the input stream); everything else surfaces here.

/// OS-style error numbers used when reporting to the hosting framework.
pub mod errno {
    pub const EIO: i32 = 5;
    pub const ENOMEM: i32 = 12;
    pub const ENODEV: i32 = 19;
    pub const EINVAL: i32 = 22;
    pub const ENOSYS: i32 = 38;
    pub const ENOTSUP: i32 = 95;
}

/// Errors returned by the device coordinator and the stream state machines.
#[derive(Debug, Clone, thiserror::Error)]
pub enum HalError {
    /// Capability resolution did not find a hardware route.
    #[error("no matching route for devices={devices:#x} flags={flags:#x}")]
    NoMatchingRoute {
        /// Requested device mask.
        devices: u32,
        /// Requested stream flags.
        flags: u32,
    },

    /// The operation is not valid in the stream's current state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The underlying PCM or compressed transport failed.
    #[error("transport error {code}: {message}")]
    Transport {
        /// Positive OS error number reported by the driver.
        code: i32,
        /// Driver or back-end description.
        message: String,
    },

    /// The routing configuration could not be loaded.
    #[error("routing configuration error: {0}")]
    Config(String),

    /// A buffer or transport allocation failed.
    #[error("out of memory")]
    OutOfMemory,

    /// The entry point is not implemented by this hardware.
    #[error("not supported: {0}")]
    NotSupported(&'static str),
}

impl HalError {
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn transport(code: i32, message: impl Into<String>) -> Self {
        Self::Transport {
            code,
            message: message.into(),
        }
    }

    /// Negative error code as returned through the framework's C-style entry points.
    pub fn errno(&self) -> i32 {
        match self {
            Self::NoMatchingRoute { .. } | Self::InvalidState(_) | Self::Config(_) => {
                -errno::EINVAL
            }
            Self::Transport { code, .. } => -code.abs(),
            Self::OutOfMemory => -errno::ENOMEM,
            Self::NotSupported(_) => -errno::ENOSYS,
        }
    }
}

/// Result type alias for HAL operations.
pub type Result<T> = std::result::Result<T, HalError>;
