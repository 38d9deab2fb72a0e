//! The asynchronous operation engine shared by learn and transmit.
//!
//! An [`Engine`] runs one kind of blocking native call on its worker pool.
//! Each start allocates an operation state, registers it under its identity
//! *before* handing it to a worker (so an immediate cancel finds it), and
//! returns a [`Pending`] handle. When the native call returns the engine
//! completes the operation exactly once:
//!
//! 1. take the write-once result slot (a second completion finds it empty),
//! 2. remove the identity mapping if it still points at this operation,
//! 3. resolve the `Pending` handle,
//! 4. dispatch a [`CompletionEvent`] to completion subscribers.
//!
//! Because the mapping is gone before any handler runs, a handler may start
//! a new operation under the same identity without seeing its predecessor.
//!
//! The synchronous adapter [`Engine::run_synchronously`] is a thin consumer
//! of the same machinery.
//!
//! # Falsification Claims
//!
//! - F040: An operation is registered before `start` returns
//! - F041: Completion is delivered once, to both sinks, after deregistration
//! - F042: A native failure wins over a concurrent abort
//! - F043: A timed-out synchronous call cancels its own operation and returns
//! - F044: A panicking worker call resolves as `Failed`
//! - F045: An operation started while `close` runs is cancelled, never orphaned

use crate::channel::{Channel, ChannelLease};
use crate::error::{Error, Result};
use crate::events::{SubscriptionId, Subscribers};
use crate::native::AbortFlag;
use crate::operation::{
    Identity, OperationId, OperationState, Outcome, Pending, Timeout, Waited,
};
use crate::pool::WorkerPool;
use crate::registry::{Registry, Tracked};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Progress reported by a running operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent<P> {
    /// Identity the operation was started under.
    pub identity: Identity,
    /// The operation reporting progress.
    pub operation: OperationId,
    /// The progress payload, relayed verbatim from the driver.
    pub progress: P,
}

/// Terminal outcome of an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionEvent<T> {
    /// Identity the operation was started under.
    pub identity: Identity,
    /// The completed operation.
    pub operation: OperationId,
    /// How it ended.
    pub outcome: Outcome<T>,
}

/// One kind of blocking native operation.
pub(crate) trait OperationKind: Send + Sync + 'static {
    type Request: Send + Sync + 'static;
    type Output: Clone + Send + 'static;
    type Progress: Send + 'static;

    /// Used for worker names and log fields.
    const NAME: &'static str;
    /// Whether a raised abort flag turns a successful return into `Aborted`.
    const ABORTABLE: bool;

    fn execute(
        channel: &Channel,
        request: &Self::Request,
        abort: &AbortFlag,
        progress: &mut dyn FnMut(Self::Progress),
    ) -> Result<Self::Output>;
}

type State<K> = OperationState<<K as OperationKind>::Request, <K as OperationKind>::Output>;

struct Shared<K: OperationKind> {
    lease: ChannelLease,
    registry: Registry<State<K>>,
    progress: Subscribers<ProgressEvent<K::Progress>>,
    completed: Subscribers<CompletionEvent<K::Output>>,
    disposed: AtomicBool,
}

impl<K: OperationKind> Shared<K> {
    fn run(&self, state: &State<K>) {
        let identity = state.identity().clone();
        let operation = state.id();
        let mut relay = |progress: K::Progress| {
            self.progress.dispatch(&ProgressEvent {
                identity: identity.clone(),
                operation,
                progress,
            });
        };

        trace!(kind = K::NAME, %operation, "native call starting");
        let returned = panic::catch_unwind(AssertUnwindSafe(|| {
            K::execute(
                self.lease.channel(),
                state.request(),
                state.abort_flag(),
                &mut relay,
            )
        }));

        let outcome = match returned {
            Ok(Err(err)) => Outcome::Failed(err),
            Ok(Ok(_)) if K::ABORTABLE && state.abort_flag().is_set() => Outcome::Aborted,
            Ok(Ok(value)) => Outcome::Completed(value),
            Err(_) => {
                warn!(kind = K::NAME, %operation, "native call panicked");
                Outcome::Failed(Error::internal(format!("{} worker panicked", K::NAME)))
            }
        };
        self.complete(state, outcome);
    }

    fn complete(&self, state: &State<K>, outcome: Outcome<K::Output>) {
        let Some(slot) = state.take_result_slot() else {
            warn!(kind = K::NAME, operation = %state.id(), "duplicate completion ignored");
            return;
        };
        let identity = state.identity().clone();
        let operation = state.id();
        self.registry.remove(&identity, operation);

        match &outcome {
            Outcome::Completed(_) => {
                debug!(kind = K::NAME, %identity, %operation, "operation completed");
            }
            Outcome::Aborted => debug!(kind = K::NAME, %identity, %operation, "operation aborted"),
            Outcome::Failed(err) => {
                debug!(kind = K::NAME, %identity, %operation, error = %err, "operation failed");
            }
        }

        if slot.send(outcome.clone()).is_err() {
            trace!(%operation, "pending handle already dropped");
        }
        self.completed.dispatch(&CompletionEvent {
            identity,
            operation,
            outcome,
        });
    }
}

/// Runs operations of kind `K` against one leased channel.
pub(crate) struct Engine<K: OperationKind> {
    shared: Arc<Shared<K>>,
    pool: WorkerPool,
}

impl<K: OperationKind> Engine<K> {
    pub(crate) fn new(lease: ChannelLease, workers: usize) -> Result<Self> {
        let pool = WorkerPool::new(K::NAME, workers)?;
        Ok(Self {
            shared: Arc::new(Shared {
                lease,
                registry: Registry::new(),
                progress: Subscribers::new(),
                completed: Subscribers::new(),
                disposed: AtomicBool::new(false),
            }),
            pool,
        })
    }

    pub(crate) fn channel(&self) -> &Channel {
        self.shared.lease.channel()
    }

    pub(crate) fn shared_channel(&self) -> Arc<Channel> {
        self.shared.lease.shared()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.shared.disposed.load(Ordering::Acquire)
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::disposed(K::NAME));
        }
        Ok(())
    }

    /// Register and dispatch a new operation.
    pub(crate) fn start(
        &self,
        request: K::Request,
        identity: Identity,
    ) -> Result<Pending<K::Output>> {
        self.ensure_open()?;
        self.dispatch(request, identity)
    }

    fn dispatch(&self, request: K::Request, identity: Identity) -> Result<Pending<K::Output>> {
        let (state, pending) = OperationState::new(identity, request);
        self.shared.registry.register(Arc::clone(&state));

        let shared = Arc::clone(&self.shared);
        let job = Arc::clone(&state);
        if let Err(err) = self.pool.execute(move || shared.run(&job)) {
            self.shared.registry.remove(state.identity(), state.id());
            return Err(err);
        }
        // A close that began after the open check may have drained the
        // registry before this state was registered
        if self.is_closed() {
            state.cancel();
            self.shared.registry.remove(state.identity(), state.id());
            debug!(kind = K::NAME, operation = %state.id(), "started during close; cancelled");
            return Err(Error::disposed(K::NAME));
        }
        debug!(
            kind = K::NAME,
            identity = %state.identity(),
            operation = %state.id(),
            "operation started"
        );
        Ok(pending)
    }

    pub(crate) fn cancel(&self, identity: &Identity) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.shared.registry.cancel(identity))
    }

    /// Start an operation and block for its result.
    ///
    /// `Failed` becomes an error and `Aborted` becomes `Ok(None)`. An
    /// infinite timeout blocks until the operation resolves, even if it is
    /// cancelled by identity meanwhile. If a bounded timeout elapses first,
    /// the started operation is cancelled and `Ok(None)` is returned without
    /// waiting for the cancel to take effect.
    pub(crate) fn run_synchronously(
        &self,
        request: K::Request,
        identity: Identity,
        timeout: Timeout,
    ) -> Result<Option<K::Output>> {
        let pending = self.start(request, identity)?;
        match pending.wait_cancellable(timeout) {
            Waited::Resolved(outcome) => outcome.into_result(),
            Waited::Cancelled => Ok(None),
            Waited::TimedOut => {
                debug!(
                    kind = K::NAME,
                    operation = %pending.id(),
                    ?timeout,
                    "timed out; cancelling"
                );
                pending.cancel();
                Ok(None)
            }
        }
    }

    pub(crate) fn on_progress<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&ProgressEvent<K::Progress>) + Send + Sync + 'static,
    {
        self.shared.progress.subscribe(handler)
    }

    pub(crate) fn remove_progress(&self, id: SubscriptionId) -> bool {
        self.shared.progress.unsubscribe(id)
    }

    pub(crate) fn on_completed<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&CompletionEvent<K::Output>) + Send + Sync + 'static,
    {
        self.shared.completed.subscribe(handler)
    }

    pub(crate) fn remove_completed(&self, id: SubscriptionId) -> bool {
        self.shared.completed.unsubscribe(id)
    }

    pub(crate) fn is_in_flight(&self, identity: &Identity) -> bool {
        self.shared.registry.contains(identity)
    }

    pub(crate) fn in_flight(&self) -> Vec<Identity> {
        self.shared.registry.identities()
    }

    /// Cancel everything in flight, join the workers and release the lease.
    pub(crate) fn close(&self) {
        if self.shared.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let in_flight = self.shared.registry.drain();
        for state in &in_flight {
            state.cancel();
        }
        debug!(kind = K::NAME, cancelled = in_flight.len(), "engine closing");
        self.pool.shutdown();
        self.shared.lease.release();
    }
}

impl<K: OperationKind> fmt::Debug for Engine<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("kind", &K::NAME)
            .field("registry", &self.shared.registry)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl<K: OperationKind> Drop for Engine<K> {
    fn drop(&mut self) {
        self.close();
    }
}
