//! Guided learning: wait for a remote to be seen, then learn its code.
//!
//! The device reports a short receive code as soon as it sees a signal.
//! [`GuidedLearner::capture`] uses that as the cue to start a full learn,
//! so a caller can prompt the user to press a button and capture it in one
//! call. [`GuidedLearner::start_capture`] is the background form: it waits
//! for the cue, then hands back the learn's [`Pending`] handle.
//!
//! Every learn started through a `GuidedLearner` also raises a
//! [`GuidedCompletedEvent`] carrying the cue it was started on.

use crate::channel::{Channel, ChannelLease};
use crate::error::Result;
use crate::events::{SubscriptionId, Subscribers};
use crate::learner::{LearnCompletedEvent, LearnRequest, Learner, LearnerConfig};
use crate::native::{NativeDriver, ReceiveEvent};
use crate::operation::{Identity, Pending, Timeout};
use crate::receiver::Receiver;
use crossbeam_channel::{bounded, RecvTimeoutError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument};

/// A received cue and the code learned after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuidedCapture {
    /// Receive code reported when the signal was first seen.
    pub received: String,
    /// The learned code.
    pub learned: String,
}

/// Completion of a learn started by a [`GuidedLearner`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuidedCompletedEvent {
    /// Receive code that cued the learn.
    pub received: String,
    /// The learn's own completion.
    pub learn: LearnCompletedEvent,
}

/// Cues of guided learns still in flight, by identity.
type Cues = Arc<Mutex<HashMap<Identity, String>>>;

/// A [`Receiver`] and a [`Learner`] sharing one channel.
#[derive(Debug)]
pub struct GuidedLearner {
    lease: ChannelLease,
    receiver: Receiver,
    learner: Learner,
    cues: Cues,
    completed: Subscribers<GuidedCompletedEvent>,
}

impl GuidedLearner {
    /// Open a channel through `native` and own it.
    ///
    /// # Errors
    ///
    /// See [`Channel::open`].
    pub fn open(native: Arc<dyn NativeDriver>, config: LearnerConfig) -> Result<Self> {
        Self::with_lease(ChannelLease::acquire(native)?, config)
    }

    /// Load the vendor driver and open a channel.
    ///
    /// # Errors
    ///
    /// See [`Channel::open_system`].
    pub fn open_system(config: LearnerConfig) -> Result<Self> {
        Self::open(crate::ffi::system_driver()?, config)
    }

    /// Work on an already open channel without taking ownership of it.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if the worker threads cannot be spawned.
    pub fn with_channel(channel: &Arc<Channel>, config: LearnerConfig) -> Result<Self> {
        Self::with_lease(ChannelLease::borrow(channel), config)
    }

    fn with_lease(lease: ChannelLease, config: LearnerConfig) -> Result<Self> {
        let channel = lease.shared();
        let learner = Learner::with_channel(&channel, config)?;
        let cues = Cues::default();
        let completed = Subscribers::new();

        let pending_cues = Arc::clone(&cues);
        let relay = completed.clone();
        learner.on_completed(move |event: &LearnCompletedEvent| {
            let cue = pending_cues.lock().remove(&event.identity);
            if let Some(received) = cue {
                relay.dispatch(&GuidedCompletedEvent {
                    received,
                    learn: event.clone(),
                });
            }
        });

        Ok(Self {
            receiver: Receiver::with_channel(&channel)?,
            learner,
            lease,
            cues,
            completed,
        })
    }

    /// The learner, for progress subscriptions and cancellation.
    #[must_use]
    pub const fn learner(&self) -> &Learner {
        &self.learner
    }

    /// The receiver.
    #[must_use]
    pub const fn receiver(&self) -> &Receiver {
        &self.receiver
    }

    /// Wait for a receive event, then learn under the default identity.
    ///
    /// `timeout` bounds the whole call. Returns `Ok(None)` if it elapses or
    /// the learn is cancelled.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameterCombination` for a bad request (before
    /// anything is waited on), `CallbackRegistrationFailed`,
    /// `OperationFailed` from the learn, and `ResourceDisposed` after
    /// [`close`](Self::close).
    pub fn capture(
        &self,
        request: LearnRequest,
        timeout: impl Into<Timeout>,
    ) -> Result<Option<GuidedCapture>> {
        self.capture_as(request, Identity::Default, timeout)
    }

    /// Wait for a receive event, then learn under `identity`, so another
    /// thread can [`cancel`](Self::cancel) the learn.
    ///
    /// # Errors
    ///
    /// See [`capture`](Self::capture).
    #[instrument(level = "debug", skip(self, identity, timeout))]
    pub fn capture_as(
        &self,
        request: LearnRequest,
        identity: impl Into<Identity>,
        timeout: impl Into<Timeout>,
    ) -> Result<Option<GuidedCapture>> {
        let identity = identity.into();
        let timeout = timeout.into();
        request.resolve(self.learner.config())?;
        let started = Instant::now();

        let Some(received) = self.wait_for_signal(timeout)? else {
            return Ok(None);
        };

        let remaining = match timeout.duration() {
            None => Timeout::Infinite,
            Some(limit) => Timeout::After(
                limit
                    .saturating_sub(started.elapsed())
                    .max(Duration::from_millis(1)),
            ),
        };
        self.cues.lock().insert(identity.clone(), received.clone());
        let learned = self.learner.learn_as(request, identity.clone(), remaining);
        if learned.is_err() {
            // A learn rejected before it ran leaves no completion to claim the cue
            self.cues.lock().remove(&identity);
        }
        Ok(learned?.map(|learned| GuidedCapture { received, learned }))
    }

    /// Wait for a receive event, then start learning under `identity` in
    /// the background.
    ///
    /// `timeout` bounds only the wait for the signal. Returns `Ok(None)` if
    /// no signal was seen in time; otherwise the learn's handle, whose
    /// completion is also raised as a [`GuidedCompletedEvent`].
    ///
    /// # Errors
    ///
    /// See [`capture`](Self::capture).
    #[instrument(level = "debug", skip(self, identity, timeout))]
    pub fn start_capture(
        &self,
        request: LearnRequest,
        identity: impl Into<Identity>,
        timeout: impl Into<Timeout>,
    ) -> Result<Option<Pending<String>>> {
        let identity = identity.into();
        request.resolve(self.learner.config())?;

        let Some(received) = self.wait_for_signal(timeout.into())? else {
            return Ok(None);
        };
        self.cues.lock().insert(identity.clone(), received);
        match self.learner.start_learn(request, identity.clone()) {
            Ok(pending) => Ok(Some(pending)),
            Err(err) => {
                self.cues.lock().remove(&identity);
                Err(err)
            }
        }
    }

    /// Cancel the guided learn in flight under `identity`.
    ///
    /// A capture still waiting for its signal is not affected.
    ///
    /// # Errors
    ///
    /// Returns `ResourceDisposed` after [`close`](Self::close).
    pub fn cancel(&self, identity: impl Into<Identity>) -> Result<bool> {
        self.learner.cancel(identity)
    }

    /// Subscribe to completion of learns started by this helper.
    pub fn on_captured<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&GuidedCompletedEvent) + Send + Sync + 'static,
    {
        self.completed.subscribe(handler)
    }

    /// Unsubscribe a completion handler.
    pub fn remove_captured_handler(&self, id: SubscriptionId) -> bool {
        self.completed.unsubscribe(id)
    }

    /// Block until the device reports a signal, or `timeout` elapses.
    fn wait_for_signal(&self, timeout: Timeout) -> Result<Option<String>> {
        let (cue, cued) = bounded(1);
        let subscription = self.receiver.subscribe(move |event: &ReceiveEvent| {
            // Never block the driver thread; one cue is enough
            let _ = cue.try_send(event.code.clone());
        })?;
        let waited = match timeout.duration() {
            None => cued.recv().map_err(|_| RecvTimeoutError::Disconnected),
            Some(limit) => cued.recv_timeout(limit),
        };
        self.receiver.unsubscribe(subscription)?;

        match waited {
            Ok(received) => {
                debug!(code = %received, "signal seen; learning");
                Ok(Some(received))
            }
            Err(_) => {
                debug!("no signal seen before the deadline");
                Ok(None)
            }
        }
    }

    /// Close the learner and the receiver, then release the channel if
    /// owned. Idempotent.
    pub fn close(&self) {
        self.learner.close();
        self.receiver.close();
        self.completed.clear();
        self.cues.lock().clear();
        self.lease.release();
    }

    /// Whether [`close`](Self::close) has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.learner.is_closed()
    }
}

impl Drop for GuidedLearner {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::format::LearnModifier;
    use crate::native::stand_in::{Calls, StandIn};
    use crate::operation::Outcome;
    use crossbeam_channel::unbounded;
    use std::thread;

    /// Fire `code` once the receive callback is installed.
    fn cue_when_listening(native: &Arc<StandIn>, code: &'static str) -> thread::JoinHandle<()> {
        let driver = Arc::clone(native);
        thread::spawn(move || {
            let deadline = Instant::now() + Duration::from_secs(5);
            while driver.installed.lock().is_none() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(1));
            }
            driver.fire(code);
        })
    }

    #[test]
    fn test_capture_after_cue() {
        let native = StandIn::shared();
        *native.learn_result.lock() = Some(Ok("0000 0073 0000 000C".into()));
        let guided = GuidedLearner::open(native.clone(), LearnerConfig::default()).unwrap();

        let firing = cue_when_listening(&native, "0F1E2D3C4B5A");

        let capture = guided
            .capture(LearnRequest::new(), Duration::from_secs(10))
            .unwrap()
            .unwrap();
        firing.join().unwrap();
        assert_eq!(capture.received, "0F1E2D3C4B5A");
        assert_eq!(capture.learned, "0000 0073 0000 000C");
        assert!(!guided.receiver().is_listening());
    }

    #[test]
    fn test_start_capture_hands_back_pending_and_raises_captured() {
        let native = StandIn::shared();
        *native.learn_result.lock() = Some(Ok("0000 0073 0000 000C".into()));
        let guided = GuidedLearner::open(native.clone(), LearnerConfig::default()).unwrap();
        let (tx, rx) = unbounded();
        guided.on_captured(move |event: &GuidedCompletedEvent| {
            tx.send(event.clone()).unwrap();
        });

        let firing = cue_when_listening(&native, "AA55AA55AA55");
        let pending = guided
            .start_capture(LearnRequest::new(), "remote-1", Duration::from_secs(10))
            .unwrap()
            .unwrap();
        firing.join().unwrap();
        assert_eq!(pending.identity(), &Identity::custom("remote-1"));
        assert_eq!(
            pending.wait(),
            Outcome::Completed("0000 0073 0000 000C".to_owned())
        );

        let event = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(event.received, "AA55AA55AA55");
        assert_eq!(event.learn.identity, Identity::custom("remote-1"));
        assert!(event.learn.outcome.is_completed());
        assert!(guided.cues.lock().is_empty());
    }

    #[test]
    fn test_start_capture_without_cue_starts_nothing() {
        let native = StandIn::shared();
        let guided = GuidedLearner::open(native.clone(), LearnerConfig::default()).unwrap();
        let pending = guided
            .start_capture(LearnRequest::new(), "idle", Duration::from_millis(20))
            .unwrap();
        assert!(pending.is_none());
        assert_eq!(Calls::get(&native.calls.learn), 0);
    }

    #[test]
    fn test_capture_as_cancelled_by_identity() {
        let native = StandIn::shared();
        *native.hold_until_abort.lock() = Some(Duration::from_secs(10));
        let guided = GuidedLearner::open(native.clone(), LearnerConfig::default()).unwrap();
        let (tx, rx) = unbounded();
        guided.on_captured(move |event: &GuidedCompletedEvent| {
            tx.send(event.learn.outcome.clone()).unwrap();
        });

        let firing = cue_when_listening(&native, "0F1E2D3C4B5A");
        let started = Instant::now();
        let capture = thread::scope(|scope| {
            scope.spawn(|| {
                let deadline = Instant::now() + Duration::from_secs(5);
                while !guided.learner().is_in_flight(&Identity::custom("tv"))
                    && Instant::now() < deadline
                {
                    thread::sleep(Duration::from_millis(1));
                }
                assert!(guided.cancel("tv").unwrap());
            });
            guided
                .capture_as(LearnRequest::new(), "tv", Duration::from_secs(10))
                .unwrap()
        });
        firing.join().unwrap();

        assert!(capture.is_none());
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            Outcome::Aborted
        );
    }

    #[test]
    fn test_capture_times_out_without_cue() {
        let native = StandIn::shared();
        let guided = GuidedLearner::open(native.clone(), LearnerConfig::default()).unwrap();
        let capture = guided
            .capture(LearnRequest::new(), Duration::from_millis(20))
            .unwrap();
        assert!(capture.is_none());
        assert_eq!(Calls::get(&native.calls.learn), 0);
        assert_eq!(Calls::get(&native.calls.uninstall), 1);
    }

    #[test]
    fn test_bad_request_rejected_before_listening() {
        let native = StandIn::shared();
        let guided = GuidedLearner::open(native.clone(), LearnerConfig::default()).unwrap();
        let err = guided
            .capture(
                LearnRequest::new().with_modifier(LearnModifier::ForceFrequency),
                Timeout::Infinite,
            )
            .unwrap_err();
        assert!(err.is_usage_error());
        assert_eq!(Calls::get(&native.calls.install), 0);
    }

    #[test]
    fn test_close_releases_owned_channel_once() {
        let native = StandIn::shared();
        let guided = GuidedLearner::open(native.clone(), LearnerConfig::default()).unwrap();
        guided.close();
        drop(guided);
        assert_eq!(Calls::get(&native.calls.close), 1);
    }
}
