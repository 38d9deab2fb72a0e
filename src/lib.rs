//! uirt: Safe, Cancellable Access to the USB-UIRT Infrared Transceiver
//!
//! The USB-UIRT driver exposes one exclusive channel through a handful of
//! blocking, callback-based calls. This crate puts an operation coordinator
//! in front of it so several independent callers can learn, transmit and
//! listen for IR codes concurrently, cancel what they started, and choose
//! between blocking and asynchronous call styles.
//!
//! # Components
//!
//! | Component | Module | Role |
//! |-----------|--------|------|
//! | Channel | [`channel`] | Owns the native handle; owned or borrowed leases |
//! | Learner | [`learner`] | Learns codes, relays progress, cancellable |
//! | Transmitter | [`transmitter`] | Sends codes to an emitter zone |
//! | Receiver | [`receiver`] | Delivers received codes to subscribers |
//! | GuidedLearner | [`guided`] | Waits for a signal, then learns it |
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use uirt::{Identity, LearnRequest, Learner, LearnerConfig, Outcome};
//!
//! let learner = Learner::open_system(LearnerConfig::default())?;
//!
//! // Asynchronous: start, then cancel by identity or wait
//! let pending = learner.start_learn(LearnRequest::new(), "power")?;
//! learner.cancel("power")?;
//! assert!(matches!(pending.wait(), Outcome::Aborted | Outcome::Completed(_)));
//!
//! // Synchronous with a timeout: `None` if nothing was learned in time
//! let code = learner.learn(LearnRequest::new(), Duration::from_secs(10))?;
//! # let _ = (code, Identity::Default);
//! # Ok::<(), uirt::Error>(())
//! ```
//!
//! # Operation Lifecycle
//!
//! Every learn or transmit is tracked under an [`Identity`] (the component's
//! default identity when none is given). Starting an operation registers it
//! before any work is dispatched, so an immediate cancel always finds it.
//! When it finishes, the mapping is removed first and the [`Outcome`] is
//! then delivered to the returned [`Pending`] handle and to completion
//! subscribers, exactly once.
//!
//! Starting a second operation under an identity that is still in flight
//! replaces the mapping. The first keeps running and still completes, but
//! only its `Pending` handle can cancel it. Use distinct identities for
//! concurrent operations that must both stay cancellable.
//!
//! # Feature Flags
//!
//! - `native` (default) - Load the vendor driver library at runtime
//!
//! Without `native`, supply your own [`NativeDriver`] implementation.
//!
//! # Safety Guarantees
//!
//! This crate uses `#![deny(unsafe_code)]` at the library level. All FFI
//! code is quarantined in the internal `ffi` module, which is not exported.
//!
//! # Error Handling
//!
//! All operations that can fail return [`Result<T, Error>`]. Invalid
//! arguments are rejected synchronously by the call that received them;
//! driver failures on a worker arrive through the operation's outcome.
//!
//! # Thread Safety
//!
//! All components are `Send + Sync`. Handlers may be called from worker
//! threads (progress, completion) or from a thread owned by the driver
//! (receive). A panicking handler is isolated and logged.

// SAFETY: This crate denies unsafe code at the library level.
// All unsafe FFI code is quarantined in src/ffi/, which is not exported.
// We use deny (not forbid) so it can be overridden in the ffi module.
#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)] // Allow UUIRT, IRMAN, etc. without backticks

pub mod channel;
pub mod error;
pub mod events;
pub mod format;
pub mod guided;
pub mod learner;
pub mod native;
pub mod operation;
pub mod receiver;
pub mod transmitter;

mod bridge;
mod engine;
mod pool;
mod registry;

// FFI module is internal only - not exported
mod ffi;

// Re-export main types for convenience
pub use channel::{Channel, ChannelLease, DeviceVersion, FirmwareDate};
pub use engine::{CompletionEvent, ProgressEvent};
pub use error::{Error, Result};
pub use events::SubscriptionId;
pub use format::{CodeFormat, ConfigFlags, Emitter, LearnModifier};
pub use guided::{GuidedCapture, GuidedCompletedEvent, GuidedLearner};
pub use learner::{LearnCompletedEvent, LearnProgressEvent, LearnRequest, Learner, LearnerConfig};
pub use native::{LearnProgress, NativeDriver, ReceiveEvent};
pub use operation::{Identity, OperationId, Outcome, Pending, Timeout};
pub use receiver::Receiver;
pub use transmitter::{TransmitCompletedEvent, TransmitRequest, Transmitter, TransmitterConfig};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Check whether the vendor driver library can be loaded on this system.
///
/// This does not open the device.
#[must_use]
pub fn is_driver_available() -> bool {
    ffi::system_driver().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_not_empty() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_is_driver_available_no_panic() {
        // Should not panic on any platform
        let _ = is_driver_available();
    }

    #[test]
    fn test_error_reexport() {
        let err = Error::disposed("learner");
        assert!(err.is_disposed());
    }

    #[test]
    fn test_format_reexport() {
        assert_eq!(CodeFormat::Pronto.bits() | LearnModifier::ForceRaw.bits(), 0x0110);
        assert_eq!(Emitter::External1.zone_prefix(), "Z1");
    }

    #[test]
    fn test_identity_reexport() {
        assert_eq!(Identity::from("A").to_string(), "A");
    }
}
