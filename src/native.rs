//! The native driver contract.
//!
//! Everything the coordinator needs from the hardware goes through the
//! [`NativeDriver`] trait: open/close, version and config queries, the
//! blocking learn and transmit primitives, and receive-callback
//! registration. The `native` feature provides an implementation that loads
//! the vendor library at runtime; tests and embedders can supply their own.
//!
//! # Threading
//!
//! Implementations must be `Send + Sync`. The coordinator never issues two
//! blocking calls against the same handle on purpose, but callers that start
//! learn and transmit operations concurrently on one channel will do so, and
//! the driver's behaviour in that case is its own.

use crate::events::Subscribers;
use crate::format::ConfigFlags;
use std::fmt;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

/// Native failure code: no device found.
pub const ERR_NO_DEVICE: u32 = 0x2000_0001;
/// Native failure code: device did not respond.
pub const ERR_NO_RESPONSE: u32 = 0x2000_0002;
/// Native failure code: driver library missing.
pub const ERR_DRIVER_MISSING: u32 = 0x2000_0003;
/// Native failure code: firmware and driver versions do not match.
pub const ERR_WRONG_VERSION: u32 = 0x2000_0004;

/// Opaque handle to an open hardware channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawHandle(usize);

impl RawHandle {
    /// Wrap a raw handle value returned by the driver.
    #[must_use]
    pub const fn from_raw(value: usize) -> Self {
        Self(value)
    }

    /// The raw handle value.
    #[must_use]
    pub const fn as_raw(self) -> usize {
        self.0
    }
}

/// Failure reported by a native call: the driver's last error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeError {
    /// The native error code.
    pub code: u32,
}

impl NativeError {
    /// Create a native error from a code.
    #[must_use]
    pub const fn new(code: u32) -> Self {
        Self { code }
    }
}

impl fmt::Display for NativeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "native error {:#010x}", self.code)
    }
}

impl std::error::Error for NativeError {}

/// Raw device information as reported by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceInfo {
    /// Firmware version (major in the high byte, minor in the low byte).
    pub firmware_version: u32,
    /// Protocol version.
    pub protocol_version: u32,
    /// Firmware build day (1-31).
    pub firmware_day: u8,
    /// Firmware build month (1-12).
    pub firmware_month: u8,
    /// Firmware build year, offset from 2000.
    pub firmware_year: u8,
}

/// One progress tick reported while learning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct LearnProgress {
    /// Learn progress in percent.
    pub percent: u32,
    /// Signal quality reported by the receiver.
    pub signal_quality: u32,
    /// Detected carrier frequency in Hz.
    pub carrier_frequency: u32,
}

/// Arguments of a native learn call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeLearn {
    /// Format bits: code format OR-ed with the learn modifier.
    pub format_bits: u32,
    /// Forced carrier frequency, zero unless forcing.
    pub forced_frequency: u32,
}

/// Arguments of a native transmit call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeTransmit<'a> {
    /// Zone-prefixed code string.
    pub code: &'a str,
    /// Code format bits.
    pub format_bits: u32,
    /// Number of times to repeat the code.
    pub repeat_count: i32,
    /// Inactivity the device waits for before sending, in milliseconds.
    pub inactivity_wait_ms: i32,
}

/// Cooperative abort flag polled by the blocking learn primitive.
///
/// The flag is a 32-bit boolean laid out the way the driver expects, so its
/// address can be handed to native code. It moves from clear to set exactly
/// once and only through cancellation.
#[derive(Debug, Clone, Default)]
pub struct AbortFlag(Arc<AtomicI32>);

impl AbortFlag {
    /// Create a cleared flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the flag has been raised.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire) != 0
    }

    /// Raise the flag. Returns `true` only for the call that raised it.
    pub(crate) fn raise(&self) -> bool {
        self.0
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Pointer to the flag's storage, valid while any clone is alive.
    #[must_use]
    pub fn as_native_ptr(&self) -> *mut i32 {
        self.0.as_ptr()
    }
}

/// Event delivered when the device receives a code from the air.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReceiveEvent {
    /// The short receive code reported by the driver.
    pub code: String,
}

/// Entry point the driver calls when it receives a code.
///
/// The driver keeps only a raw pointer to the trampoline, so whoever
/// registers one must keep it alive until it has been unregistered.
pub struct ReceiveTrampoline {
    handlers: Subscribers<ReceiveEvent>,
}

impl ReceiveTrampoline {
    pub(crate) const fn new(handlers: Subscribers<ReceiveEvent>) -> Self {
        Self { handlers }
    }

    /// Copy out `code` and deliver it to every subscribed handler.
    ///
    /// Called on a driver-owned thread. Handler panics are caught here and
    /// never reach the caller.
    pub fn deliver(&self, code: &str) {
        let event = ReceiveEvent {
            code: code.to_owned(),
        };
        self.handlers.dispatch(&event);
    }
}

impl fmt::Debug for ReceiveTrampoline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReceiveTrampoline")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

/// The blocking, callback-based native API of the transceiver.
pub trait NativeDriver: Send + Sync {
    /// Open the hardware channel.
    ///
    /// # Errors
    ///
    /// Returns the driver's failure code (see the `ERR_*` constants).
    fn open(&self) -> Result<RawHandle, NativeError>;

    /// Close a handle returned by [`open`](Self::open).
    fn close(&self, handle: RawHandle);

    /// Version of the driver library.
    ///
    /// # Errors
    ///
    /// Returns the driver's failure code.
    fn driver_version(&self) -> Result<u32, NativeError>;

    /// Firmware and protocol information of the device.
    ///
    /// # Errors
    ///
    /// Returns the driver's failure code.
    fn device_info(&self, handle: RawHandle) -> Result<DeviceInfo, NativeError>;

    /// Read the device configuration bits.
    ///
    /// # Errors
    ///
    /// Returns the driver's failure code.
    fn config(&self, handle: RawHandle) -> Result<ConfigFlags, NativeError>;

    /// Write the device configuration bits.
    ///
    /// # Errors
    ///
    /// Returns the driver's failure code.
    fn set_config(&self, handle: RawHandle, flags: ConfigFlags) -> Result<(), NativeError>;

    /// Learn a code. Blocks until a code is captured or `abort` is raised.
    ///
    /// `progress` may be called any number of times before returning.
    ///
    /// # Errors
    ///
    /// Returns the driver's failure code.
    fn learn(
        &self,
        handle: RawHandle,
        request: &NativeLearn,
        progress: &mut dyn FnMut(LearnProgress),
        abort: &AbortFlag,
    ) -> Result<String, NativeError>;

    /// Transmit a code. Blocks until the code has been sent.
    ///
    /// # Errors
    ///
    /// Returns the driver's failure code.
    fn transmit(&self, handle: RawHandle, request: &NativeTransmit<'_>) -> Result<(), NativeError>;

    /// Install (`Some`) or remove (`None`) the receive trampoline.
    ///
    /// # Errors
    ///
    /// Returns the driver's failure code.
    fn set_receive_callback(
        &self,
        handle: RawHandle,
        trampoline: Option<&Arc<ReceiveTrampoline>>,
    ) -> Result<(), NativeError>;
}
