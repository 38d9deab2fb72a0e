//! Learning IR codes from a remote.
//!
//! A [`Learner`] captures codes asynchronously ([`start_learn`]) or
//! synchronously with an optional timeout ([`learn`]). Progress ticks from
//! the driver are relayed to progress subscribers; every outcome is
//! delivered to the returned [`Pending`] handle and to completion
//! subscribers.
//!
//! [`start_learn`]: Learner::start_learn
//! [`learn`]: Learner::learn
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use uirt::{LearnRequest, Learner, LearnerConfig};
//!
//! let learner = Learner::open_system(LearnerConfig::default())?;
//! learner.on_progress(|event| println!("{}%", event.progress.percent));
//! match learner.learn(LearnRequest::new(), Duration::from_secs(15))? {
//!     Some(code) => println!("learned {code}"),
//!     None => println!("nothing received"),
//! }
//! # Ok::<(), uirt::Error>(())
//! ```
//!
//! # Falsification Claims
//!
//! - F050: Forced frequency without `ForceFrequency` is rejected
//! - F051: `ForceFrequency` without a frequency is rejected before any native call
//! - F052: Cancel of an in-flight learn reports `Aborted`

use crate::channel::{Channel, ChannelLease};
use crate::engine::{CompletionEvent, Engine, OperationKind, ProgressEvent};
use crate::error::{Error, Result};
use crate::events::SubscriptionId;
use crate::format::{CodeFormat, ConfigFlags, LearnModifier};
use crate::native::{AbortFlag, LearnProgress, NativeDriver, NativeLearn};
use crate::operation::{Identity, Pending, Timeout};
use std::sync::Arc;
use tracing::instrument;

/// Progress event raised while learning.
pub type LearnProgressEvent = ProgressEvent<LearnProgress>;

/// Completion event of a learn operation.
pub type LearnCompletedEvent = CompletionEvent<String>;

/// Learner defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LearnerConfig {
    /// Code format used when a request does not name one.
    pub format: CodeFormat,
    /// Learn modifier used when a request does not name one.
    pub modifier: LearnModifier,
    /// Number of background workers.
    pub workers: usize,
}

impl Default for LearnerConfig {
    fn default() -> Self {
        Self {
            format: CodeFormat::Pronto,
            modifier: LearnModifier::Default,
            workers: 2,
        }
    }
}

impl LearnerConfig {
    /// Set the default code format.
    #[must_use]
    pub const fn with_format(mut self, format: CodeFormat) -> Self {
        self.format = format;
        self
    }

    /// Set the default learn modifier.
    #[must_use]
    pub const fn with_modifier(mut self, modifier: LearnModifier) -> Self {
        self.modifier = modifier;
        self
    }

    /// Set the number of background workers (at least one is used).
    #[must_use]
    pub const fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }
}

/// Parameters of one learn call. Unset fields fall back to [`LearnerConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LearnRequest {
    /// Code format to produce.
    pub format: Option<CodeFormat>,
    /// Learn modifier.
    pub modifier: Option<LearnModifier>,
    /// Forced carrier frequency in Hz; only valid with `ForceFrequency`.
    pub forced_frequency: Option<u32>,
}

impl LearnRequest {
    /// A request that uses every default.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            format: None,
            modifier: None,
            forced_frequency: None,
        }
    }

    /// Produce codes in `format`.
    #[must_use]
    pub const fn with_format(mut self, format: CodeFormat) -> Self {
        self.format = Some(format);
        self
    }

    /// Apply `modifier`.
    #[must_use]
    pub const fn with_modifier(mut self, modifier: LearnModifier) -> Self {
        self.modifier = Some(modifier);
        self
    }

    /// Force the carrier frequency. Requires `LearnModifier::ForceFrequency`.
    #[must_use]
    pub const fn with_forced_frequency(mut self, hz: u32) -> Self {
        self.forced_frequency = Some(hz);
        self
    }

    /// Apply defaults and check the modifier/frequency pairing.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameterCombination` if a forced frequency is given
    /// without `ForceFrequency`, or `ForceFrequency` is requested without a
    /// non-zero frequency.
    pub fn resolve(&self, config: &LearnerConfig) -> Result<NativeLearn> {
        let format = self.format.unwrap_or(config.format);
        let modifier = self.modifier.unwrap_or(config.modifier);
        let frequency = self.forced_frequency.unwrap_or(0);

        if modifier.requires_frequency() && frequency == 0 {
            return Err(Error::invalid_combination(
                "ForceFrequency requires a non-zero forced frequency",
            ));
        }
        if !modifier.requires_frequency() && frequency != 0 {
            return Err(Error::invalid_combination(format!(
                "forced frequency {frequency} Hz is only valid with ForceFrequency, not {modifier}"
            )));
        }
        Ok(NativeLearn {
            format_bits: format.bits() | modifier.bits(),
            forced_frequency: frequency,
        })
    }
}

pub(crate) struct LearnKind;

impl OperationKind for LearnKind {
    type Request = NativeLearn;
    type Output = String;
    type Progress = LearnProgress;

    const NAME: &'static str = "learn";
    const ABORTABLE: bool = true;

    fn execute(
        channel: &Channel,
        request: &NativeLearn,
        abort: &AbortFlag,
        progress: &mut dyn FnMut(LearnProgress),
    ) -> Result<String> {
        channel.learn(request, progress, abort)
    }
}

/// Learns IR codes on one channel.
#[derive(Debug)]
pub struct Learner {
    engine: Engine<LearnKind>,
    config: LearnerConfig,
}

impl Learner {
    /// Open a channel through `native` and own it.
    ///
    /// # Errors
    ///
    /// See [`Channel::open`].
    pub fn open(native: Arc<dyn NativeDriver>, config: LearnerConfig) -> Result<Self> {
        let lease = ChannelLease::acquire(native)?;
        Self::with_lease(lease, config)
    }

    /// Load the vendor driver and open a channel.
    ///
    /// # Errors
    ///
    /// See [`Channel::open_system`].
    pub fn open_system(config: LearnerConfig) -> Result<Self> {
        Self::open(crate::ffi::system_driver()?, config)
    }

    /// Learn on an already open channel without taking ownership of it.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if the worker threads cannot be spawned.
    pub fn with_channel(channel: &Arc<Channel>, config: LearnerConfig) -> Result<Self> {
        Self::with_lease(ChannelLease::borrow(channel), config)
    }

    fn with_lease(lease: ChannelLease, config: LearnerConfig) -> Result<Self> {
        Ok(Self {
            engine: Engine::new(lease, config.workers)?,
            config,
        })
    }

    /// The learner's defaults.
    #[must_use]
    pub const fn config(&self) -> &LearnerConfig {
        &self.config
    }

    /// The channel this learner works on.
    #[must_use]
    pub fn channel(&self) -> Arc<Channel> {
        self.engine.shared_channel()
    }

    /// Start learning in the background.
    ///
    /// A second start under an identity that is still in flight replaces
    /// the mapping; the earlier operation keeps running but can then only
    /// be cancelled through its [`Pending`] handle.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameterCombination` for a bad modifier/frequency
    /// pairing and `ResourceDisposed` after [`close`](Self::close).
    #[instrument(level = "debug", skip(self, identity))]
    pub fn start_learn(
        &self,
        request: LearnRequest,
        identity: impl Into<Identity>,
    ) -> Result<Pending<String>> {
        self.engine.ensure_open()?;
        let native = request.resolve(&self.config)?;
        self.engine.start(native, identity.into())
    }

    /// Cancel the learn in flight under `identity`.
    ///
    /// Returns `false` if nothing is in flight under it.
    ///
    /// # Errors
    ///
    /// Returns `ResourceDisposed` after [`close`](Self::close).
    pub fn cancel(&self, identity: impl Into<Identity>) -> Result<bool> {
        self.engine.cancel(&identity.into())
    }

    /// Learn synchronously under the default identity.
    ///
    /// Returns `Ok(None)` if the learn was aborted or `timeout` elapsed; in
    /// the latter case the learn is cancelled but may still be winding down
    /// when this returns.
    ///
    /// # Errors
    ///
    /// Returns the validation errors of [`start_learn`](Self::start_learn)
    /// and `OperationFailed` if the driver reports a failure.
    pub fn learn(
        &self,
        request: LearnRequest,
        timeout: impl Into<Timeout>,
    ) -> Result<Option<String>> {
        self.learn_as(request, Identity::Default, timeout)
    }

    /// Learn synchronously under `identity`.
    ///
    /// # Errors
    ///
    /// See [`learn`](Self::learn).
    #[instrument(level = "debug", skip(self, identity, timeout))]
    pub fn learn_as(
        &self,
        request: LearnRequest,
        identity: impl Into<Identity>,
        timeout: impl Into<Timeout>,
    ) -> Result<Option<String>> {
        self.engine.ensure_open()?;
        let native = request.resolve(&self.config)?;
        self.engine
            .run_synchronously(native, identity.into(), timeout.into())
    }

    /// Subscribe to learn progress.
    pub fn on_progress<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&LearnProgressEvent) + Send + Sync + 'static,
    {
        self.engine.on_progress(handler)
    }

    /// Unsubscribe a progress handler.
    pub fn remove_progress_handler(&self, id: SubscriptionId) -> bool {
        self.engine.remove_progress(id)
    }

    /// Subscribe to learn completion.
    pub fn on_completed<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&LearnCompletedEvent) + Send + Sync + 'static,
    {
        self.engine.on_completed(handler)
    }

    /// Unsubscribe a completion handler.
    pub fn remove_completed_handler(&self, id: SubscriptionId) -> bool {
        self.engine.remove_completed(id)
    }

    /// Whether a learn is in flight under `identity`.
    #[must_use]
    pub fn is_in_flight(&self, identity: &Identity) -> bool {
        self.engine.is_in_flight(identity)
    }

    /// Identities with a learn in flight.
    #[must_use]
    pub fn in_flight(&self) -> Vec<Identity> {
        self.engine.in_flight()
    }

    /// Whether the device blinks when it receives a code.
    ///
    /// # Errors
    ///
    /// Returns `ResourceDisposed` after close, or `OperationFailed`.
    pub fn blink_on_receive(&self) -> Result<bool> {
        self.engine.ensure_open()?;
        self.engine.channel().flag(ConfigFlags::BLINK_ON_RECEIVE)
    }

    /// Enable or disable blinking on receive.
    ///
    /// # Errors
    ///
    /// Returns `ResourceDisposed` after close, or `OperationFailed`.
    pub fn set_blink_on_receive(&self, enabled: bool) -> Result<()> {
        self.engine.ensure_open()?;
        self.engine
            .channel()
            .set_flag(ConfigFlags::BLINK_ON_RECEIVE, enabled)
    }

    /// Cancel every in-flight learn, stop the workers and release the
    /// channel if this learner owns it. Idempotent.
    pub fn close(&self) {
        self.engine.close();
    }

    /// Whether [`close`](Self::close) has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.engine.is_closed()
    }
}
