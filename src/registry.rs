//! Identity-keyed table of in-flight operations.
//!
//! At most one operation is reachable per [`Identity`]. Registering under a
//! key that is already present replaces the mapping: the earlier operation
//! keeps running and still delivers its outcome, but it can no longer be
//! cancelled by identity. Callers that need several concurrent operations to
//! stay cancellable must give them distinct identities.
//!
//! # Falsification Claims
//!
//! - F030: A second registration under one key displaces the first
//! - F031: Removal only succeeds for the operation currently mapped
//! - F032: Cancelling an unknown identity returns false

use crate::operation::{Identity, OperationId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// What the registry needs to know about an operation.
pub(crate) trait Tracked: Send + Sync {
    fn id(&self) -> OperationId;
    fn identity(&self) -> &Identity;
    /// Raise the abort flag and fire the cancel signal.
    fn cancel(&self) -> bool;
    fn is_cancelled(&self) -> bool;
}

pub(crate) struct Registry<S: ?Sized> {
    entries: Mutex<HashMap<Identity, Arc<S>>>,
}

impl<S: Tracked + ?Sized> Registry<S> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Map `state` under its identity. Returns the displaced operation.
    pub(crate) fn register(&self, state: Arc<S>) -> Option<Arc<S>> {
        let identity = state.identity().clone();
        let id = state.id();
        let displaced = self.entries.lock().insert(identity.clone(), state);
        if let Some(previous) = &displaced {
            warn!(
                %identity,
                previous = %previous.id(),
                operation = %id,
                "identity already in flight; earlier operation no longer cancellable by identity"
            );
        }
        displaced
    }

    pub(crate) fn get(&self, identity: &Identity) -> Option<Arc<S>> {
        self.entries.lock().get(identity).cloned()
    }

    /// Cancel whatever is mapped under `identity`.
    pub(crate) fn cancel(&self, identity: &Identity) -> bool {
        // Cancel outside the lock
        let Some(state) = self.get(identity) else {
            debug!(%identity, "nothing in flight to cancel");
            return false;
        };
        state.cancel();
        true
    }

    /// Remove the mapping for `identity` if it still points at `id`.
    pub(crate) fn remove(&self, identity: &Identity, id: OperationId) -> bool {
        let mut entries = self.entries.lock();
        match entries.get(identity) {
            Some(current) if current.id() == id => {
                entries.remove(identity);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn contains(&self, identity: &Identity) -> bool {
        self.entries.lock().contains_key(identity)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub(crate) fn identities(&self) -> Vec<Identity> {
        self.entries.lock().keys().cloned().collect()
    }

    /// Empty the table, returning what was in it.
    pub(crate) fn drain(&self) -> Vec<Arc<S>> {
        self.entries.lock().drain().map(|(_, state)| state).collect()
    }
}

impl<S: ?Sized> fmt::Debug for Registry<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("in_flight", &self.entries.lock().len())
            .finish()
    }
}
