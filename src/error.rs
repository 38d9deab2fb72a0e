//! Error types for uirt.
//!
//! All errors implement `std::error::Error` and provide human-readable messages.
//! Error variants are specific enough to allow programmatic handling.
//!
//! # Propagation
//!
//! - Parameter validation errors are returned synchronously by the call that
//!   received the bad input. They never surface through a [`Pending`] handle.
//! - Native failures that happen on a background worker are delivered through
//!   the same completion channel a successful result would use.
//!
//! # Falsification Claims
//! - F081: All errors implement std::error::Error
//! - F082: Error messages are human-readable
//! - F083: Native failures carry the driver's error code
//! - F084: Open failure codes map to a specific variant
//!
//! [`Pending`]: crate::operation::Pending

use crate::native::{
    ERR_DRIVER_MISSING, ERR_NO_DEVICE, ERR_NO_RESPONSE, ERR_WRONG_VERSION,
};
use thiserror::Error;

/// Primary error type for uirt operations.
///
/// Each variant provides sufficient context for debugging while remaining
/// actionable for programmatic error handling.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The vendor driver library could not be found or loaded.
    #[error("USB-UIRT driver not available: make sure the driver is installed")]
    HardwareUnavailable,

    /// The driver is installed but no device is connected.
    #[error("USB-UIRT device not found: make sure the device is connected")]
    DeviceNotFound,

    /// The device is connected but does not answer.
    #[error("USB-UIRT device is not responding: check connections and replug the device")]
    DeviceUnresponsive,

    /// The device firmware does not match the driver's API version.
    #[error("USB-UIRT firmware is not compatible with the installed driver")]
    IncompatibleFirmware,

    /// Opening the channel failed for a reason the driver did not classify.
    #[error("unable to initialize USB-UIRT (native code {code:#010x})")]
    HardwareInitFailure {
        /// The native error code reported by the driver.
        code: u32,
    },

    /// A native call reported failure while an operation was running.
    ///
    /// Recoverable: the caller may retry with a fresh operation.
    #[error("{operation} failed (native code {code:#010x})")]
    OperationFailed {
        /// The operation that failed (`learn`, `transmit`, ...).
        operation: &'static str,
        /// The native error code reported by the driver.
        code: u32,
    },

    /// The caller combined parameters that cannot be used together.
    #[error("invalid parameter combination: {reason}")]
    InvalidParameterCombination {
        /// Description of the conflicting parameters.
        reason: String,
    },

    /// A single argument was out of range or empty.
    #[error("invalid argument: {reason}")]
    InvalidArgument {
        /// Description of what was invalid.
        reason: String,
    },

    /// Installing or removing the native receive callback failed.
    #[error("receive callback registration failed (native code {code:#010x})")]
    CallbackRegistrationFailed {
        /// The native error code reported by the driver.
        code: u32,
    },

    /// The component (or its channel) has already been torn down.
    #[error("{resource} has already been closed")]
    ResourceDisposed {
        /// The component that was used after teardown.
        resource: &'static str,
    },

    /// Internal error (should not occur in normal operation).
    #[error("internal error: {details}")]
    Internal {
        /// Details about the internal error.
        details: String,
    },
}

/// Result type alias for uirt operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Classify a failure code returned by the native open call.
    #[must_use]
    pub const fn from_open_code(code: u32) -> Self {
        match code {
            ERR_DRIVER_MISSING => Self::HardwareUnavailable,
            ERR_NO_DEVICE => Self::DeviceNotFound,
            ERR_NO_RESPONSE => Self::DeviceUnresponsive,
            ERR_WRONG_VERSION => Self::IncompatibleFirmware,
            code => Self::HardwareInitFailure { code },
        }
    }

    /// Create a new `OperationFailed` error.
    #[must_use]
    pub const fn operation_failed(operation: &'static str, code: u32) -> Self {
        Self::OperationFailed { operation, code }
    }

    /// Create a new `InvalidParameterCombination` error.
    #[must_use]
    pub fn invalid_combination(reason: impl Into<String>) -> Self {
        Self::InvalidParameterCombination {
            reason: reason.into(),
        }
    }

    /// Create a new `InvalidArgument` error.
    #[must_use]
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// Create a new `CallbackRegistrationFailed` error.
    #[must_use]
    pub const fn callback_registration_failed(code: u32) -> Self {
        Self::CallbackRegistrationFailed { code }
    }

    /// Create a new `ResourceDisposed` error.
    #[must_use]
    pub const fn disposed(resource: &'static str) -> Self {
        Self::ResourceDisposed { resource }
    }

    /// Create a new `Internal` error.
    #[must_use]
    pub fn internal(details: impl Into<String>) -> Self {
        Self::Internal {
            details: details.into(),
        }
    }

    /// Check if this error was raised while opening the channel.
    #[must_use]
    pub const fn is_hardware_init_failure(&self) -> bool {
        matches!(
            self,
            Self::HardwareUnavailable
                | Self::DeviceNotFound
                | Self::DeviceUnresponsive
                | Self::IncompatibleFirmware
                | Self::HardwareInitFailure { .. }
        )
    }

    /// Check if this error reports use after teardown.
    #[must_use]
    pub const fn is_disposed(&self) -> bool {
        matches!(self, Self::ResourceDisposed { .. })
    }

    /// Check if this error was caused by caller input rather than hardware.
    #[must_use]
    pub const fn is_usage_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidArgument { .. } | Self::InvalidParameterCombination { .. }
        )
    }

    /// Get the native error code, if the driver reported one.
    #[must_use]
    pub const fn native_code(&self) -> Option<u32> {
        match self {
            Self::HardwareInitFailure { code }
            | Self::OperationFailed { code, .. }
            | Self::CallbackRegistrationFailed { code } => Some(*code),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // F081: All errors implement std::error::Error
    #[test]
    fn test_error_implements_std_error() {
        fn assert_std_error<T: std::error::Error + Send + Sync + 'static>() {}
        assert_std_error::<Error>();
    }

    // F082: Error messages are human-readable
    #[test]
    fn test_display_impl_not_generic() {
        let errors = vec![
            Error::HardwareUnavailable,
            Error::DeviceNotFound,
            Error::DeviceUnresponsive,
            Error::IncompatibleFirmware,
            Error::HardwareInitFailure { code: 7 },
            Error::operation_failed("learn", 31),
            Error::invalid_combination("test"),
            Error::invalid_argument("test"),
            Error::callback_registration_failed(5),
            Error::disposed("learner"),
            Error::internal("test"),
        ];

        for err in errors {
            let msg = err.to_string();
            assert!(msg.len() > 10, "Message too short: {msg}");
            assert!(!msg.eq_ignore_ascii_case("error"), "Generic message: {msg}");
        }
    }

    // F083: Native failures carry the driver's error code
    #[test]
    fn test_operation_failed_includes_code() {
        let err = Error::operation_failed("learn", 0x1F);
        let msg = err.to_string();
        assert!(msg.contains("learn"));
        assert!(msg.contains("0x0000001f"));
        assert_eq!(err.native_code(), Some(0x1F));
    }

    // F084: Open failure codes map to a specific variant
    #[test]
    fn test_from_open_code() {
        assert_eq!(Error::from_open_code(ERR_NO_DEVICE), Error::DeviceNotFound);
        assert_eq!(
            Error::from_open_code(ERR_NO_RESPONSE),
            Error::DeviceUnresponsive
        );
        assert_eq!(
            Error::from_open_code(ERR_DRIVER_MISSING),
            Error::HardwareUnavailable
        );
        assert_eq!(
            Error::from_open_code(ERR_WRONG_VERSION),
            Error::IncompatibleFirmware
        );
        assert_eq!(
            Error::from_open_code(42),
            Error::HardwareInitFailure { code: 42 }
        );
    }

    #[test]
    fn test_hardware_init_predicate() {
        for code in [ERR_NO_DEVICE, ERR_NO_RESPONSE, ERR_DRIVER_MISSING, 99] {
            assert!(Error::from_open_code(code).is_hardware_init_failure());
        }
        assert!(!Error::operation_failed("transmit", 1).is_hardware_init_failure());
        assert!(!Error::disposed("receiver").is_hardware_init_failure());
    }

    #[test]
    fn test_error_predicates() {
        assert!(Error::disposed("learner").is_disposed());
        assert!(!Error::internal("x").is_disposed());

        assert!(Error::invalid_argument("x").is_usage_error());
        assert!(Error::invalid_combination("x").is_usage_error());
        assert!(!Error::operation_failed("learn", 1).is_usage_error());
    }

    #[test]
    fn test_native_code_extraction() {
        assert_eq!(Error::callback_registration_failed(3).native_code(), Some(3));
        assert_eq!(Error::HardwareInitFailure { code: 9 }.native_code(), Some(9));
        assert_eq!(Error::DeviceNotFound.native_code(), None);
        assert_eq!(Error::invalid_argument("x").native_code(), None);
    }

    #[test]
    fn test_error_equality_and_clone() {
        let e1 = Error::operation_failed("learn", 4);
        let e2 = e1.clone();
        assert_eq!(e1, e2);
        assert_ne!(e1, Error::operation_failed("transmit", 4));
    }

    #[test]
    fn test_error_debug() {
        let err = Error::disposed("receiver");
        let debug = format!("{err:?}");
        assert!(debug.contains("ResourceDisposed"));
        assert!(debug.contains("receiver"));
    }
}
