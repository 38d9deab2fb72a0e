//! Keeps the native receive trampoline installed while anyone listens.
//!
//! The driver holds nothing but a raw pointer to the trampoline, so the
//! bridge retains the `Arc` for exactly as long as it is registered.
//! Install and uninstall happen under one mutex together with the first
//! subscribe and last unsubscribe, so the trampoline is installed if and
//! only if at least one handler is subscribed.
//!
//! Dispatch itself never takes that mutex: the driver thread reads the
//! handler snapshot lock-free.
//!
//! # Falsification Claims
//!
//! - F070: The trampoline is installed once for any number of subscribers
//! - F071: The last unsubscribe uninstalls it exactly once
//! - F072: A failed install leaves no handler subscribed
//! - F073: A failed uninstall keeps the trampoline retained

use crate::channel::ChannelLease;
use crate::error::{Error, Result};
use crate::events::{SubscriptionId, Subscribers};
use crate::native::{ReceiveEvent, ReceiveTrampoline};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Default)]
struct State {
    installed: Option<Arc<ReceiveTrampoline>>,
    closed: bool,
}

pub(crate) struct ReceiveBridge {
    lease: ChannelLease,
    handlers: Subscribers<ReceiveEvent>,
    state: Mutex<State>,
}

impl ReceiveBridge {
    pub(crate) fn new(lease: ChannelLease) -> Self {
        Self {
            lease,
            handlers: Subscribers::new(),
            state: Mutex::new(State::default()),
        }
    }

    pub(crate) const fn lease(&self) -> &ChannelLease {
        &self.lease
    }

    /// Add a handler, installing the trampoline first if none is installed.
    pub(crate) fn subscribe<F>(&self, handler: F) -> Result<SubscriptionId>
    where
        F: Fn(&ReceiveEvent) + Send + Sync + 'static,
    {
        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::disposed("receiver"));
        }
        if state.installed.is_none() {
            let trampoline = Arc::new(ReceiveTrampoline::new(self.handlers.clone()));
            self.lease
                .channel()
                .set_receive_callback(Some(&trampoline))
                .map_err(|e| {
                    warn!(error = %e, "failed to install receive trampoline");
                    e
                })?;
            debug!("receive trampoline installed");
            state.installed = Some(trampoline);
        }
        Ok(self.handlers.subscribe(handler))
    }

    /// Remove a handler, uninstalling the trampoline after the last one.
    ///
    /// If the uninstall fails the handler stays removed, the trampoline
    /// stays installed and retained, and the error is returned; the next
    /// last-unsubscribe retries.
    pub(crate) fn unsubscribe(&self, id: SubscriptionId) -> Result<bool> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::disposed("receiver"));
        }
        if !self.handlers.unsubscribe(id) {
            return Ok(false);
        }
        if self.handlers.is_empty() && state.installed.is_some() {
            self.lease.channel().set_receive_callback(None).map_err(|e| {
                warn!(error = %e, "failed to uninstall receive trampoline");
                e
            })?;
            state.installed = None;
            debug!("receive trampoline uninstalled");
        }
        Ok(true)
    }

    pub(crate) fn is_installed(&self) -> bool {
        self.state.lock().installed.is_some()
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.handlers.len()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Drop every handler, uninstall the trampoline and release the lease.
    pub(crate) fn close(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        self.handlers.clear();
        if let Some(trampoline) = state.installed.take() {
            match self.lease.channel().set_receive_callback(None) {
                Ok(()) => debug!("receive trampoline uninstalled"),
                // A closed channel delivers nothing more
                Err(Error::ResourceDisposed { .. }) => drop(trampoline),
                Err(e) => {
                    warn!(error = %e, "receive trampoline still registered; leaking it");
                    std::mem::forget(trampoline);
                }
            }
        }
        drop(state);
        self.lease.release();
    }
}

impl fmt::Debug for ReceiveBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReceiveBridge")
            .field("installed", &self.is_installed())
            .field("handlers", &self.handlers.len())
            .finish_non_exhaustive()
    }
}

impl Drop for ReceiveBridge {
    fn drop(&mut self) {
        self.close();
    }
}
