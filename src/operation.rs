//! Per-operation state: identity, abort flag, cancel signal and result slot.
//!
//! Every learn or transmit call allocates one [`OperationState`]. It carries
//! two independent cancellation channels:
//!
//! - the [`AbortFlag`] that the blocking native call polls, and
//! - a cancel signal that wakes a bounded wait on the [`Pending`] handle,
//!   even while the native call is still running.
//!
//! The result slot is a single-use channel sender. Taking it out of the
//! state is what makes completion happen at most once.
//!
//! # Falsification Claims
//!
//! - F020: The result slot can be taken exactly once
//! - F021: Cancel raises the abort flag and wakes waiters
//! - F022: A waiter stops waiting before the operation completes
//! - F023: Negative timeouts are rejected
//! - F024: An infinite wait is not interrupted by cancel

use crate::error::{Error, Result};
use crate::native::AbortFlag;
use crate::registry::Tracked;
use crossbeam_channel::{bounded, select, Receiver, Sender, TryRecvError};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Key under which an in-flight operation is tracked.
///
/// Operations started without an explicit identity share the `Default`
/// key of the component that started them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Identity {
    /// The owning component itself.
    #[default]
    Default,
    /// A caller-chosen token.
    Custom(String),
}

impl Identity {
    /// Create a caller-chosen identity.
    #[must_use]
    pub fn custom(token: impl Into<String>) -> Self {
        Self::Custom(token.into())
    }

    /// Whether this is the component's default identity.
    #[must_use]
    pub const fn is_default(&self) -> bool {
        matches!(self, Self::Default)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => write!(f, "<default>"),
            Self::Custom(token) => write!(f, "{token}"),
        }
    }
}

impl From<&str> for Identity {
    fn from(token: &str) -> Self {
        Self::custom(token)
    }
}

impl From<String> for Identity {
    fn from(token: String) -> Self {
        Self::Custom(token)
    }
}

impl<T: Into<Identity>> From<Option<T>> for Identity {
    fn from(token: Option<T>) -> Self {
        token.map_or(Self::Default, Into::into)
    }
}

/// Process-unique operation number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationId(u64);

impl OperationId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op-{}", self.0)
    }
}

/// Terminal state of an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    /// The native call succeeded.
    Completed(T),
    /// The native call failed, or the worker could not run it.
    Failed(Error),
    /// The operation was cancelled and stopped without a value.
    Aborted,
}

impl<T> Outcome<T> {
    /// Whether the operation produced a value.
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    /// Whether the operation failed.
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// Whether the operation was aborted.
    #[must_use]
    pub const fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }

    /// The produced value, if any.
    #[must_use]
    pub const fn value(&self) -> Option<&T> {
        match self {
            Self::Completed(value) => Some(value),
            _ => None,
        }
    }

    /// Convert into the synchronous call convention: `Failed` becomes an
    /// error and `Aborted` becomes `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns the failure carried by `Failed`.
    pub fn into_result(self) -> Result<Option<T>> {
        match self {
            Self::Completed(value) => Ok(Some(value)),
            Self::Failed(err) => Err(err),
            Self::Aborted => Ok(None),
        }
    }
}

/// How long a synchronous call waits for its operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Timeout {
    /// Wait until the operation resolves.
    #[default]
    Infinite,
    /// Wait at most this long, then cancel and return no result.
    After(Duration),
}

impl Timeout {
    /// Build a timeout from signed milliseconds. Zero means infinite.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a negative value.
    pub fn from_millis(millis: i64) -> Result<Self> {
        let millis = u64::try_from(millis)
            .map_err(|_| Error::invalid_argument(format!("timeout {millis}ms is negative")))?;
        Ok(Self::from(Duration::from_millis(millis)))
    }

    /// The bounded wait, or `None` for infinite.
    #[must_use]
    pub const fn duration(self) -> Option<Duration> {
        match self {
            Self::Infinite => None,
            Self::After(duration) => Some(duration),
        }
    }
}

impl From<Duration> for Timeout {
    fn from(duration: Duration) -> Self {
        if duration.is_zero() {
            Self::Infinite
        } else {
            Self::After(duration)
        }
    }
}

impl From<Option<Duration>> for Timeout {
    fn from(duration: Option<Duration>) -> Self {
        duration.map_or(Self::Infinite, Self::from)
    }
}

/// Wakes waiters by dropping the only sender of a channel nobody sends on.
#[derive(Debug)]
pub(crate) struct CancelSignal {
    trigger: Mutex<Option<Sender<()>>>,
    fired: Receiver<()>,
}

impl CancelSignal {
    pub(crate) fn new() -> Self {
        let (trigger, fired) = bounded(0);
        Self {
            trigger: Mutex::new(Some(trigger)),
            fired,
        }
    }

    /// Fire the signal. Returns `true` only for the call that fired it.
    pub(crate) fn trigger(&self) -> bool {
        self.trigger.lock().take().is_some()
    }

    pub(crate) fn is_triggered(&self) -> bool {
        self.trigger.lock().is_none()
    }

    pub(crate) fn receiver(&self) -> Receiver<()> {
        self.fired.clone()
    }
}

/// State of one in-flight operation.
pub(crate) struct OperationState<R, T> {
    id: OperationId,
    identity: Identity,
    request: R,
    abort: AbortFlag,
    cancel: CancelSignal,
    result: Mutex<Option<Sender<Outcome<T>>>>,
}

impl<R, T> OperationState<R, T>
where
    R: Send + Sync + 'static,
    T: Send + 'static,
{
    /// Allocate a state and the pending handle that observes it.
    pub(crate) fn new(identity: Identity, request: R) -> (Arc<Self>, Pending<T>) {
        let (sender, receiver) = bounded(1);
        let state = Arc::new(Self {
            id: OperationId::next(),
            identity,
            request,
            abort: AbortFlag::new(),
            cancel: CancelSignal::new(),
            result: Mutex::new(Some(sender)),
        });
        let pending = Pending {
            outcome: receiver,
            cancelled: state.cancel.receiver(),
            control: Arc::clone(&state) as Arc<dyn Tracked>,
        };
        (state, pending)
    }

    pub(crate) const fn request(&self) -> &R {
        &self.request
    }

    pub(crate) const fn abort_flag(&self) -> &AbortFlag {
        &self.abort
    }

    /// Take the write-once result slot. `None` means completion already ran.
    pub(crate) fn take_result_slot(&self) -> Option<Sender<Outcome<T>>> {
        self.result.lock().take()
    }
}

impl<R, T> Tracked for OperationState<R, T>
where
    R: Send + Sync,
    T: Send,
{
    fn id(&self) -> OperationId {
        self.id
    }

    fn identity(&self) -> &Identity {
        &self.identity
    }

    fn cancel(&self) -> bool {
        let raised = self.abort.raise();
        let fired = self.cancel.trigger();
        if raised || fired {
            debug!(operation = %self.id, identity = %self.identity, "operation cancelled");
        }
        raised || fired
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.is_triggered()
    }
}

impl<R, T> fmt::Debug for OperationState<R, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationState")
            .field("id", &self.id)
            .field("identity", &self.identity)
            .field("aborted", &self.abort.is_set())
            .finish_non_exhaustive()
    }
}

/// Result of waiting on a [`Pending`] with cancellation in view.
#[derive(Debug)]
pub(crate) enum Waited<T> {
    Resolved(Outcome<T>),
    Cancelled,
    TimedOut,
}

/// Handle to an operation that has been started.
///
/// The outcome is delivered here and to the component's completion
/// subscribers. Dropping the handle does not cancel the operation.
pub struct Pending<T> {
    outcome: Receiver<Outcome<T>>,
    cancelled: Receiver<()>,
    control: Arc<dyn Tracked>,
}

impl<T> fmt::Debug for Pending<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pending")
            .field("id", &self.id())
            .field("identity", self.identity())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl<T> Pending<T> {
    /// The operation's unique number.
    #[must_use]
    pub fn id(&self) -> OperationId {
        self.control.id()
    }

    /// The identity the operation was started under.
    #[must_use]
    pub fn identity(&self) -> &Identity {
        self.control.identity()
    }

    /// Cancel this exact operation, whether or not it is still reachable by
    /// identity. Returns `true` if this call changed anything.
    pub fn cancel(&self) -> bool {
        self.control.cancel()
    }

    /// Whether the operation has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.control.is_cancelled()
    }

    /// Block until the operation reaches a terminal state.
    pub fn wait(self) -> Outcome<T> {
        self.outcome.recv().unwrap_or_else(|_| lost())
    }

    /// Block for at most `timeout`. Returns `None` if it elapsed first.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Outcome<T>> {
        match self.outcome.recv_timeout(timeout) {
            Ok(outcome) => Some(outcome),
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => None,
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => Some(lost()),
        }
    }

    /// The outcome, if it has already arrived.
    #[must_use]
    pub fn try_outcome(&self) -> Option<Outcome<T>> {
        match self.outcome.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(lost()),
        }
    }

    /// Wait for the outcome, the cancel signal or the deadline.
    ///
    /// An infinite wait ignores the cancel signal and returns only once the
    /// operation resolves. A bounded wait also wakes on cancel; an outcome
    /// that is already available wins over a fired cancel signal.
    pub(crate) fn wait_cancellable(&self, timeout: Timeout) -> Waited<T> {
        let resolved = |received: std::result::Result<Outcome<T>, _>| {
            Waited::Resolved(received.unwrap_or_else(|_| lost()))
        };
        let on_cancel = || match self.outcome.try_recv() {
            Ok(outcome) => Waited::Resolved(outcome),
            Err(_) => Waited::Cancelled,
        };
        match timeout.duration() {
            None => resolved(self.outcome.recv()),
            Some(limit) => select! {
                recv(self.outcome) -> received => resolved(received),
                recv(self.cancelled) -> _ => on_cancel(),
                default(limit) => Waited::TimedOut,
            },
        }
    }
}

fn lost<T>() -> Outcome<T> {
    Outcome::Failed(Error::internal("operation ended without delivering an outcome"))
}
