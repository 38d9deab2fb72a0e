//! Listening for IR codes received by the device.
//!
//! # Example
//!
//! ```no_run
//! use uirt::Receiver;
//!
//! let receiver = Receiver::open_system()?;
//! let id = receiver.subscribe(|event| println!("received {}", event.code))?;
//! // ...
//! receiver.unsubscribe(id)?;
//! # Ok::<(), uirt::Error>(())
//! ```
//!
//! Handlers run on a thread owned by the driver. They must not block for
//! long, and a panic inside one is caught and logged, never propagated.

use crate::bridge::ReceiveBridge;
use crate::channel::{Channel, ChannelLease};
use crate::error::Result;
use crate::events::SubscriptionId;
use crate::format::ConfigFlags;
use crate::native::{NativeDriver, ReceiveEvent};
use std::sync::Arc;
use tracing::instrument;

/// Delivers received IR codes to subscribers.
///
/// Constructing a receiver switches legacy receive codes off on the
/// device, whether the channel is owned or borrowed.
#[derive(Debug)]
pub struct Receiver {
    bridge: ReceiveBridge,
}

impl Receiver {
    /// Open a channel through `native` and own it.
    ///
    /// # Errors
    ///
    /// See [`Channel::open`].
    pub fn open(native: Arc<dyn NativeDriver>) -> Result<Self> {
        Self::with_lease(ChannelLease::acquire(native)?)
    }

    /// Load the vendor driver and open a channel.
    ///
    /// # Errors
    ///
    /// See [`Channel::open_system`].
    pub fn open_system() -> Result<Self> {
        Self::open(crate::ffi::system_driver()?)
    }

    /// Listen on an already open channel without taking ownership of it.
    ///
    /// # Errors
    ///
    /// Returns `ResourceDisposed` if the channel is closed, or
    /// `OperationFailed` if the device settings cannot be written.
    pub fn with_channel(channel: &Arc<Channel>) -> Result<Self> {
        Self::with_lease(ChannelLease::borrow(channel))
    }

    fn with_lease(lease: ChannelLease) -> Result<Self> {
        let receiver = Self {
            bridge: ReceiveBridge::new(lease),
        };
        receiver.set_legacy_codes(false)?;
        Ok(receiver)
    }

    /// The channel this receiver listens on.
    #[must_use]
    pub fn channel(&self) -> Arc<Channel> {
        self.bridge.lease().shared()
    }

    /// Subscribe to received codes.
    ///
    /// The first subscription registers the receive callback with the
    /// driver.
    ///
    /// # Errors
    ///
    /// Returns `CallbackRegistrationFailed` if the driver rejects the
    /// callback, and `ResourceDisposed` after [`close`](Self::close).
    #[instrument(level = "debug", skip_all)]
    pub fn subscribe<F>(&self, handler: F) -> Result<SubscriptionId>
    where
        F: Fn(&ReceiveEvent) + Send + Sync + 'static,
    {
        self.bridge.subscribe(handler)
    }

    /// Unsubscribe a handler. Returns `false` if it was not subscribed.
    ///
    /// The last unsubscription removes the receive callback from the driver.
    ///
    /// # Errors
    ///
    /// Returns `CallbackRegistrationFailed` if the driver refuses to remove
    /// the callback, and `ResourceDisposed` after [`close`](Self::close).
    #[instrument(level = "debug", skip(self))]
    pub fn unsubscribe(&self, id: SubscriptionId) -> Result<bool> {
        self.bridge.unsubscribe(id)
    }

    /// Whether the receive callback is registered with the driver.
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.bridge.is_installed()
    }

    /// Number of subscribed handlers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.bridge.subscriber_count()
    }

    /// Whether received codes are reported in the legacy format.
    ///
    /// # Errors
    ///
    /// Returns `ResourceDisposed` after close, or `OperationFailed`.
    pub fn legacy_codes(&self) -> Result<bool> {
        self.ensure_open()?;
        self.bridge
            .lease()
            .channel()
            .flag(ConfigFlags::LEGACY_RECEIVE_CODES)
    }

    /// Switch legacy receive codes on or off.
    ///
    /// # Errors
    ///
    /// Returns `ResourceDisposed` after close, or `OperationFailed`.
    pub fn set_legacy_codes(&self, enabled: bool) -> Result<()> {
        self.ensure_open()?;
        self.bridge
            .lease()
            .channel()
            .set_flag(ConfigFlags::LEGACY_RECEIVE_CODES, enabled)
    }

    /// Drop every handler, unregister the callback and release the channel
    /// if owned. Idempotent.
    pub fn close(&self) {
        self.bridge.close();
    }

    /// Whether [`close`](Self::close) has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.bridge.is_closed()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(crate::error::Error::disposed("receiver"));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::native::stand_in::{Calls, StandIn};
    use parking_lot::Mutex;

    #[test]
    fn test_subscribe_receive_unsubscribe() {
        let native = StandIn::shared();
        let receiver = Receiver::open(native.clone()).unwrap();
        assert!(!receiver.is_listening());

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let id = receiver
            .subscribe(move |event: &ReceiveEvent| sink.lock().push(event.code.clone()))
            .unwrap();
        assert!(receiver.is_listening());
        native.fire("ABCDEF012345");
        assert_eq!(*seen.lock(), vec!["ABCDEF012345"]);

        assert!(receiver.unsubscribe(id).unwrap());
        assert!(!receiver.is_listening());
        native.fire("ignored");
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn test_legacy_codes_flag() {
        let native = StandIn::shared();
        let receiver = Receiver::open(native.clone()).unwrap();
        receiver.set_legacy_codes(true).unwrap();
        assert!(receiver.legacy_codes().unwrap());
        assert_eq!(*native.config.lock(), ConfigFlags::LEGACY_RECEIVE_CODES);
    }

    #[test]
    fn test_construction_clears_legacy_codes() {
        let native = StandIn::shared();
        *native.config.lock() = ConfigFlags::LEGACY_RECEIVE_CODES | ConfigFlags::BLINK_ON_RECEIVE;
        let receiver = Receiver::open(native.clone()).unwrap();
        assert!(!receiver.legacy_codes().unwrap());
        assert_eq!(*native.config.lock(), ConfigFlags::BLINK_ON_RECEIVE);

        let channel = receiver.channel();
        channel.set_flag(ConfigFlags::LEGACY_RECEIVE_CODES, true).unwrap();
        let borrowed = Receiver::with_channel(&channel).unwrap();
        assert!(!borrowed.legacy_codes().unwrap());
    }

    #[test]
    fn test_borrowed_receiver_leaves_channel_open() {
        let native = StandIn::shared();
        let channel = Arc::new(Channel::open(native.clone()).unwrap());
        let receiver = Receiver::with_channel(&channel).unwrap();
        receiver.subscribe(|_| {}).unwrap();
        drop(receiver);
        assert_eq!(Calls::get(&native.calls.uninstall), 1);
        assert!(!channel.is_closed());
        assert!(native.installed.lock().is_none());
    }

    #[test]
    fn test_use_after_close() {
        let receiver = Receiver::open(StandIn::shared()).unwrap();
        receiver.close();
        assert!(receiver.is_closed());
        assert!(receiver.legacy_codes().unwrap_err().is_disposed());
        assert!(receiver.subscribe(|_| {}).unwrap_err().is_disposed());
    }
}
