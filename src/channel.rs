//! The hardware channel and its ownership wrapper.
//!
//! A [`Channel`] owns the single native handle to the transceiver and closes
//! it at most once. Components never hold a `Channel` directly; they hold a
//! [`ChannelLease`], which is either *owned* (the component opened the
//! channel and closes it on teardown) or *borrowed* (the caller supplied an
//! open channel and stays responsible for it).
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use uirt::channel::Channel;
//!
//! let channel = Arc::new(Channel::open_system()?);
//! println!("{}", channel.version()?);
//! # Ok::<(), uirt::Error>(())
//! ```
//!
//! # Falsification Claims
//!
//! - F001: Open failure codes surface as specific errors
//! - F002: Close is idempotent
//! - F003: A borrowed lease never closes the channel
//! - F004: Calls after close fail with `ResourceDisposed`

use crate::error::{Error, Result};
use crate::format::ConfigFlags;
use crate::native::{
    AbortFlag, LearnProgress, NativeDriver, NativeLearn, NativeTransmit, RawHandle,
    ReceiveTrampoline,
};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Firmware build date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FirmwareDate {
    /// Full year.
    pub year: u16,
    /// Month (1-12).
    pub month: u8,
    /// Day of month (1-31).
    pub day: u8,
}

impl fmt::Display for FirmwareDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

/// Driver and firmware version information.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceVersion {
    /// Version of the driver library.
    pub driver_version: u32,
    /// Firmware version (major in the high byte, minor in the low byte).
    pub firmware_version: u32,
    /// Protocol version spoken by the firmware.
    pub protocol_version: u32,
    /// Firmware build date.
    pub firmware_date: FirmwareDate,
}

impl DeviceVersion {
    /// Firmware major version.
    #[must_use]
    pub const fn firmware_major(&self) -> u32 {
        (self.firmware_version >> 8) & 0xFF
    }

    /// Firmware minor version.
    #[must_use]
    pub const fn firmware_minor(&self) -> u32 {
        self.firmware_version & 0xFF
    }
}

impl fmt::Display for DeviceVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Driver Version: {}", self.driver_version)?;
        writeln!(f, "Firmware Date: {}", self.firmware_date)?;
        writeln!(
            f,
            "Firmware Version: {}.{}",
            self.firmware_major(),
            self.firmware_minor()
        )?;
        write!(f, "Protocol Version: {}", self.protocol_version)
    }
}

/// An open channel to the transceiver.
///
/// Closing happens exactly once: on the first call to [`close`](Self::close)
/// or on drop, whichever comes first. A closed channel is never reopened.
pub struct Channel {
    native: Arc<dyn NativeDriver>,
    handle: RawHandle,
    closed: AtomicBool,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("handle", &self.handle)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Channel {
    /// Open the channel through `native`.
    ///
    /// # Errors
    ///
    /// Returns `HardwareUnavailable`, `DeviceNotFound`, `DeviceUnresponsive`
    /// or `IncompatibleFirmware` for the failures the driver classifies,
    /// and `HardwareInitFailure` otherwise.
    #[instrument(level = "debug", skip(native))]
    pub fn open(native: Arc<dyn NativeDriver>) -> Result<Self> {
        let handle = native.open().map_err(|e| {
            warn!(code = e.code, "failed to open channel");
            Error::from_open_code(e.code)
        })?;
        debug!(handle = handle.as_raw(), "channel opened");
        Ok(Self {
            native,
            handle,
            closed: AtomicBool::new(false),
        })
    }

    /// Load the vendor driver library and open the channel.
    ///
    /// # Errors
    ///
    /// Returns `HardwareUnavailable` if the library cannot be loaded, and
    /// the errors of [`open`](Self::open) otherwise.
    pub fn open_system() -> Result<Self> {
        Self::open(crate::ffi::system_driver()?)
    }

    /// Close the channel. Returns `true` only for the call that closed it.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.native.close(self.handle);
        debug!(handle = self.handle.as_raw(), "channel closed");
        true
    }

    /// Whether the channel has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// The native handle value.
    #[must_use]
    pub const fn raw_handle(&self) -> RawHandle {
        self.handle
    }

    /// Query driver and firmware versions.
    ///
    /// # Errors
    ///
    /// Returns `ResourceDisposed` after close, or `OperationFailed` if the
    /// driver reports a failure.
    pub fn version(&self) -> Result<DeviceVersion> {
        self.ensure_open()?;
        let driver_version = self
            .native
            .driver_version()
            .map_err(|e| Error::operation_failed("driver info", e.code))?;
        let info = self
            .native
            .device_info(self.handle)
            .map_err(|e| Error::operation_failed("device info", e.code))?;
        Ok(DeviceVersion {
            driver_version,
            firmware_version: info.firmware_version,
            protocol_version: info.protocol_version,
            firmware_date: FirmwareDate {
                year: 2000 + u16::from(info.firmware_year),
                month: info.firmware_month,
                day: info.firmware_day,
            },
        })
    }

    /// Read the device configuration.
    ///
    /// # Errors
    ///
    /// Returns `ResourceDisposed` after close, or `OperationFailed`.
    pub fn config(&self) -> Result<ConfigFlags> {
        self.ensure_open()?;
        self.native
            .config(self.handle)
            .map_err(|e| Error::operation_failed("get config", e.code))
    }

    /// Write the device configuration.
    ///
    /// # Errors
    ///
    /// Returns `ResourceDisposed` after close, or `OperationFailed`.
    pub fn set_config(&self, flags: ConfigFlags) -> Result<()> {
        self.ensure_open()?;
        self.native
            .set_config(self.handle, flags)
            .map_err(|e| Error::operation_failed("set config", e.code))
    }

    /// Read one configuration flag.
    ///
    /// # Errors
    ///
    /// See [`config`](Self::config).
    pub fn flag(&self, flag: ConfigFlags) -> Result<bool> {
        Ok(self.config()?.contains(flag))
    }

    /// Set or clear one configuration flag, keeping the others.
    ///
    /// # Errors
    ///
    /// See [`config`](Self::config) and [`set_config`](Self::set_config).
    pub fn set_flag(&self, flag: ConfigFlags, enabled: bool) -> Result<()> {
        let mut flags = self.config()?;
        flags.set(flag, enabled);
        self.set_config(flags)
    }

    pub(crate) fn learn(
        &self,
        request: &NativeLearn,
        progress: &mut dyn FnMut(LearnProgress),
        abort: &AbortFlag,
    ) -> Result<String> {
        self.ensure_open()?;
        self.native
            .learn(self.handle, request, progress, abort)
            .map_err(|e| Error::operation_failed("learn", e.code))
    }

    pub(crate) fn transmit(&self, request: &NativeTransmit<'_>) -> Result<()> {
        self.ensure_open()?;
        self.native
            .transmit(self.handle, request)
            .map_err(|e| Error::operation_failed("transmit", e.code))
    }

    pub(crate) fn set_receive_callback(
        &self,
        trampoline: Option<&Arc<ReceiveTrampoline>>,
    ) -> Result<()> {
        self.ensure_open()?;
        self.native
            .set_receive_callback(self.handle, trampoline)
            .map_err(|e| Error::callback_registration_failed(e.code))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::disposed("channel"));
        }
        Ok(())
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.close();
    }
}

/// A component's hold on a [`Channel`].
///
/// Owned leases close the channel on [`release`](Self::release); borrowed
/// leases never do. Releasing twice is a no-op either way.
#[derive(Debug)]
pub struct ChannelLease {
    channel: Arc<Channel>,
    owned: bool,
    released: AtomicBool,
}

impl ChannelLease {
    /// Open a channel through `native` and own it exclusively.
    ///
    /// # Errors
    ///
    /// See [`Channel::open`].
    pub fn acquire(native: Arc<dyn NativeDriver>) -> Result<Self> {
        let channel = Channel::open(native)?;
        Ok(Self {
            channel: Arc::new(channel),
            owned: true,
            released: AtomicBool::new(false),
        })
    }

    /// Share an already open channel without taking ownership.
    #[must_use]
    pub fn borrow(channel: &Arc<Channel>) -> Self {
        Self {
            channel: Arc::clone(channel),
            owned: false,
            released: AtomicBool::new(false),
        }
    }

    /// The leased channel.
    #[must_use]
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// A shareable reference to the leased channel.
    #[must_use]
    pub fn shared(&self) -> Arc<Channel> {
        Arc::clone(&self.channel)
    }

    /// Whether this lease owns the channel.
    #[must_use]
    pub const fn is_owned(&self) -> bool {
        self.owned
    }

    /// Give up the lease, closing the channel if it is owned.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.owned {
            self.channel.close();
        }
    }
}

impl Drop for ChannelLease {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::native::stand_in::{Calls, StandIn};
    use crate::native::{NativeError, ERR_NO_DEVICE, ERR_WRONG_VERSION};

    struct FailingOpen(u32);

    impl NativeDriver for FailingOpen {
        fn open(&self) -> std::result::Result<RawHandle, NativeError> {
            Err(NativeError::new(self.0))
        }
        fn close(&self, _handle: RawHandle) {}
        fn driver_version(&self) -> std::result::Result<u32, NativeError> {
            Ok(0)
        }
        fn device_info(
            &self,
            _handle: RawHandle,
        ) -> std::result::Result<crate::native::DeviceInfo, NativeError> {
            Ok(crate::native::DeviceInfo::default())
        }
        fn config(&self, _handle: RawHandle) -> std::result::Result<ConfigFlags, NativeError> {
            Ok(ConfigFlags::empty())
        }
        fn set_config(
            &self,
            _handle: RawHandle,
            _flags: ConfigFlags,
        ) -> std::result::Result<(), NativeError> {
            Ok(())
        }
        fn learn(
            &self,
            _handle: RawHandle,
            _request: &NativeLearn,
            _progress: &mut dyn FnMut(LearnProgress),
            _abort: &AbortFlag,
        ) -> std::result::Result<String, NativeError> {
            Ok(String::new())
        }
        fn transmit(
            &self,
            _handle: RawHandle,
            _request: &NativeTransmit<'_>,
        ) -> std::result::Result<(), NativeError> {
            Ok(())
        }
        fn set_receive_callback(
            &self,
            _handle: RawHandle,
            _trampoline: Option<&Arc<ReceiveTrampoline>>,
        ) -> std::result::Result<(), NativeError> {
            Ok(())
        }
    }

    // F001: Open failure codes surface as specific errors
    #[test]
    fn test_open_failure_is_classified() {
        let err = Channel::open(Arc::new(FailingOpen(ERR_NO_DEVICE))).unwrap_err();
        assert_eq!(err, Error::DeviceNotFound);

        let err = Channel::open(Arc::new(FailingOpen(ERR_WRONG_VERSION))).unwrap_err();
        assert_eq!(err, Error::IncompatibleFirmware);

        let err = Channel::open(Arc::new(FailingOpen(0xDEAD))).unwrap_err();
        assert_eq!(err, Error::HardwareInitFailure { code: 0xDEAD });
    }

    // F002: Close is idempotent
    #[test]
    fn test_close_once() {
        let native = StandIn::shared();
        let channel = Channel::open(native.clone()).unwrap();
        assert!(channel.close());
        assert!(!channel.close());
        drop(channel);
        assert_eq!(Calls::get(&native.calls.close), 1);
    }

    #[test]
    fn test_drop_closes() {
        let native = StandIn::shared();
        drop(Channel::open(native.clone()).unwrap());
        assert_eq!(Calls::get(&native.calls.close), 1);
    }

    // F003: A borrowed lease never closes the channel
    #[test]
    fn test_borrowed_lease_does_not_close() {
        let native = StandIn::shared();
        let channel = Arc::new(Channel::open(native.clone()).unwrap());
        let lease = ChannelLease::borrow(&channel);
        assert!(!lease.is_owned());
        lease.release();
        drop(lease);
        assert!(!channel.is_closed());
        assert_eq!(Calls::get(&native.calls.close), 0);
    }

    #[test]
    fn test_owned_lease_closes_once() {
        let native = StandIn::shared();
        let lease = ChannelLease::acquire(native.clone()).unwrap();
        assert!(lease.is_owned());
        lease.release();
        lease.release();
        assert!(lease.channel().is_closed());
        drop(lease);
        assert_eq!(Calls::get(&native.calls.close), 1);
    }

    // F004: Calls after close fail with ResourceDisposed
    #[test]
    fn test_use_after_close() {
        let channel = Channel::open(StandIn::shared()).unwrap();
        channel.close();
        assert!(channel.config().unwrap_err().is_disposed());
        assert!(channel.version().unwrap_err().is_disposed());
    }

    #[test]
    fn test_version_query() {
        let channel = Channel::open(StandIn::shared()).unwrap();
        let version = channel.version().unwrap();
        assert_eq!(version.driver_version, 0x0203);
        assert_eq!(version.firmware_major(), 1);
        assert_eq!(version.firmware_minor(), 5);
        assert_eq!(version.firmware_date.year, 2009);
        let text = version.to_string();
        assert!(text.contains("Firmware Date: 2009-03-14"));
        assert!(text.contains("Firmware Version: 1.5"));
    }

    #[test]
    fn test_set_flag_keeps_other_flags() {
        let channel = Channel::open(StandIn::shared()).unwrap();
        channel
            .set_config(ConfigFlags::BLINK_ON_RECEIVE | ConfigFlags::LEGACY_RECEIVE_CODES)
            .unwrap();
        channel.set_flag(ConfigFlags::BLINK_ON_TRANSMIT, true).unwrap();
        channel.set_flag(ConfigFlags::BLINK_ON_RECEIVE, false).unwrap();

        let flags = channel.config().unwrap();
        assert_eq!(
            flags,
            ConfigFlags::BLINK_ON_TRANSMIT | ConfigFlags::LEGACY_RECEIVE_CODES
        );
        assert!(channel.flag(ConfigFlags::LEGACY_RECEIVE_CODES).unwrap());
    }
}
