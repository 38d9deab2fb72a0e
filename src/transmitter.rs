//! Transmitting IR codes.
//!
//! The driver's transmit primitive blocks until the code has been sent and
//! has no abort flag, so a transmit ends either `Completed` or `Failed`.
//! Cancelling one only releases whoever is waiting on it.
//!
//! # Falsification Claims
//!
//! - F060: Empty codes, negative repeat counts and negative waits never reach the driver
//! - F061: The emitter zone prefix is prepended to the code
//! - F062: A transmit never ends `Aborted`

use crate::channel::{Channel, ChannelLease};
use crate::engine::{CompletionEvent, Engine, OperationKind};
use crate::error::{Error, Result};
use crate::events::SubscriptionId;
use crate::format::{CodeFormat, ConfigFlags, Emitter};
use crate::native::{AbortFlag, NativeDriver, NativeTransmit};
use crate::operation::{Identity, Pending, Timeout};
use std::convert::Infallible;
use std::sync::Arc;
use tracing::instrument;

/// Completion event of a transmit operation.
pub type TransmitCompletedEvent = CompletionEvent<()>;

/// Transmitter defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransmitterConfig {
    /// Emitter used when a request does not name one.
    pub emitter: Emitter,
    /// Format of the code strings.
    pub format: CodeFormat,
    /// Number of times a code is sent.
    pub repeat_count: i32,
    /// Milliseconds of IR silence the device waits for before sending.
    pub inactivity_wait_ms: i32,
    /// Number of background workers.
    pub workers: usize,
}

impl Default for TransmitterConfig {
    fn default() -> Self {
        Self {
            emitter: Emitter::All,
            format: CodeFormat::Pronto,
            repeat_count: 1,
            inactivity_wait_ms: 0,
            workers: 1,
        }
    }
}

impl TransmitterConfig {
    /// Set the default emitter.
    #[must_use]
    pub const fn with_emitter(mut self, emitter: Emitter) -> Self {
        self.emitter = emitter;
        self
    }

    /// Set the default code format.
    #[must_use]
    pub const fn with_format(mut self, format: CodeFormat) -> Self {
        self.format = format;
        self
    }

    /// Set the default repeat count.
    #[must_use]
    pub const fn with_repeat_count(mut self, repeat_count: i32) -> Self {
        self.repeat_count = repeat_count;
        self
    }

    /// Set the default inactivity wait.
    #[must_use]
    pub const fn with_inactivity_wait_ms(mut self, millis: i32) -> Self {
        self.inactivity_wait_ms = millis;
        self
    }

    /// Set the number of background workers (at least one is used).
    #[must_use]
    pub const fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }
}

/// One code to send. Unset fields fall back to [`TransmitterConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransmitRequest {
    /// The IR code, passed through uninterpreted.
    pub code: String,
    /// Target emitter.
    pub emitter: Option<Emitter>,
    /// Format of `code`.
    pub format: Option<CodeFormat>,
    /// Number of times to send.
    pub repeat_count: Option<i32>,
    /// Inactivity wait in milliseconds.
    pub inactivity_wait_ms: Option<i32>,
}

impl TransmitRequest {
    /// Send `code` with the transmitter's defaults.
    #[must_use]
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            emitter: None,
            format: None,
            repeat_count: None,
            inactivity_wait_ms: None,
        }
    }

    /// Route to `emitter`.
    #[must_use]
    pub const fn with_emitter(mut self, emitter: Emitter) -> Self {
        self.emitter = Some(emitter);
        self
    }

    /// The code is in `format`.
    #[must_use]
    pub const fn with_format(mut self, format: CodeFormat) -> Self {
        self.format = Some(format);
        self
    }

    /// Send the code `repeat_count` times.
    #[must_use]
    pub const fn with_repeat_count(mut self, repeat_count: i32) -> Self {
        self.repeat_count = Some(repeat_count);
        self
    }

    /// Wait for `millis` of IR silence before sending.
    #[must_use]
    pub const fn with_inactivity_wait_ms(mut self, millis: i32) -> Self {
        self.inactivity_wait_ms = Some(millis);
        self
    }

    pub(crate) fn resolve(&self, config: &TransmitterConfig) -> Result<TransmitJob> {
        if self.code.is_empty() {
            return Err(Error::invalid_argument("code is empty"));
        }
        if self.code.contains('\0') {
            return Err(Error::invalid_argument("code contains a NUL character"));
        }
        let repeat_count = self.repeat_count.unwrap_or(config.repeat_count);
        if repeat_count < 0 {
            return Err(Error::invalid_argument(format!(
                "repeat count {repeat_count} is negative"
            )));
        }
        let inactivity_wait_ms = self.inactivity_wait_ms.unwrap_or(config.inactivity_wait_ms);
        if inactivity_wait_ms < 0 {
            return Err(Error::invalid_argument(format!(
                "inactivity wait {inactivity_wait_ms}ms is negative"
            )));
        }
        let emitter = self.emitter.unwrap_or(config.emitter);
        Ok(TransmitJob {
            code: format!("{}{}", emitter.zone_prefix(), self.code),
            format_bits: self.format.unwrap_or(config.format).bits(),
            repeat_count,
            inactivity_wait_ms,
        })
    }
}

/// A validated transmit, with the zone prefix applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TransmitJob {
    code: String,
    format_bits: u32,
    repeat_count: i32,
    inactivity_wait_ms: i32,
}

pub(crate) struct TransmitKind;

impl OperationKind for TransmitKind {
    type Request = TransmitJob;
    type Output = ();
    type Progress = Infallible;

    const NAME: &'static str = "transmit";
    const ABORTABLE: bool = false;

    fn execute(
        channel: &Channel,
        job: &TransmitJob,
        _abort: &AbortFlag,
        _progress: &mut dyn FnMut(Infallible),
    ) -> Result<()> {
        channel.transmit(&NativeTransmit {
            code: &job.code,
            format_bits: job.format_bits,
            repeat_count: job.repeat_count,
            inactivity_wait_ms: job.inactivity_wait_ms,
        })
    }
}

/// Sends IR codes on one channel.
#[derive(Debug)]
pub struct Transmitter {
    engine: Engine<TransmitKind>,
    config: TransmitterConfig,
}

impl Transmitter {
    /// Open a channel through `native` and own it.
    ///
    /// # Errors
    ///
    /// See [`Channel::open`].
    pub fn open(native: Arc<dyn NativeDriver>, config: TransmitterConfig) -> Result<Self> {
        let lease = ChannelLease::acquire(native)?;
        Self::with_lease(lease, config)
    }

    /// Load the vendor driver and open a channel.
    ///
    /// # Errors
    ///
    /// See [`Channel::open_system`].
    pub fn open_system(config: TransmitterConfig) -> Result<Self> {
        Self::open(crate::ffi::system_driver()?, config)
    }

    /// Transmit on an already open channel without taking ownership of it.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if the worker threads cannot be spawned.
    pub fn with_channel(channel: &Arc<Channel>, config: TransmitterConfig) -> Result<Self> {
        Self::with_lease(ChannelLease::borrow(channel), config)
    }

    fn with_lease(lease: ChannelLease, config: TransmitterConfig) -> Result<Self> {
        Ok(Self {
            engine: Engine::new(lease, config.workers)?,
            config,
        })
    }

    /// The transmitter's defaults.
    #[must_use]
    pub const fn config(&self) -> &TransmitterConfig {
        &self.config
    }

    /// The channel this transmitter works on.
    #[must_use]
    pub fn channel(&self) -> Arc<Channel> {
        self.engine.shared_channel()
    }

    /// Start transmitting in the background.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an empty code or a negative repeat
    /// count or wait, and `ResourceDisposed` after [`close`](Self::close).
    #[instrument(level = "debug", skip(self, identity))]
    pub fn start_transmit(
        &self,
        request: &TransmitRequest,
        identity: impl Into<Identity>,
    ) -> Result<Pending<()>> {
        self.engine.ensure_open()?;
        let job = request.resolve(&self.config)?;
        self.engine.start(job, identity.into())
    }

    /// Stop waiting on the transmit in flight under `identity`.
    ///
    /// The code may still be sent: the driver cannot interrupt a transmit.
    ///
    /// # Errors
    ///
    /// Returns `ResourceDisposed` after [`close`](Self::close).
    pub fn cancel(&self, identity: impl Into<Identity>) -> Result<bool> {
        self.engine.cancel(&identity.into())
    }

    /// Transmit synchronously under the default identity.
    ///
    /// Returns `true` once the code has been sent, `false` if a bounded
    /// `timeout` elapsed or was cut short by a cancel. An infinite timeout
    /// waits for the driver however the operation is cancelled.
    ///
    /// # Errors
    ///
    /// Returns the validation errors of [`start_transmit`](Self::start_transmit)
    /// and `OperationFailed` if the driver reports a failure.
    pub fn transmit(&self, request: &TransmitRequest, timeout: impl Into<Timeout>) -> Result<bool> {
        self.transmit_as(request, Identity::Default, timeout)
    }

    /// Transmit synchronously under `identity`.
    ///
    /// # Errors
    ///
    /// See [`transmit`](Self::transmit).
    #[instrument(level = "debug", skip(self, identity, timeout))]
    pub fn transmit_as(
        &self,
        request: &TransmitRequest,
        identity: impl Into<Identity>,
        timeout: impl Into<Timeout>,
    ) -> Result<bool> {
        self.engine.ensure_open()?;
        let job = request.resolve(&self.config)?;
        let sent = self
            .engine
            .run_synchronously(job, identity.into(), timeout.into())?;
        Ok(sent.is_some())
    }

    /// Subscribe to transmit completion.
    pub fn on_completed<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&TransmitCompletedEvent) + Send + Sync + 'static,
    {
        self.engine.on_completed(handler)
    }

    /// Unsubscribe a completion handler.
    pub fn remove_completed_handler(&self, id: SubscriptionId) -> bool {
        self.engine.remove_completed(id)
    }

    /// Whether a transmit is in flight under `identity`.
    #[must_use]
    pub fn is_in_flight(&self, identity: &Identity) -> bool {
        self.engine.is_in_flight(identity)
    }

    /// Identities with a transmit in flight.
    #[must_use]
    pub fn in_flight(&self) -> Vec<Identity> {
        self.engine.in_flight()
    }

    /// Whether the device blinks when it transmits.
    ///
    /// # Errors
    ///
    /// Returns `ResourceDisposed` after close, or `OperationFailed`.
    pub fn blink_on_transmit(&self) -> Result<bool> {
        self.engine.ensure_open()?;
        self.engine.channel().flag(ConfigFlags::BLINK_ON_TRANSMIT)
    }

    /// Enable or disable blinking on transmit.
    ///
    /// # Errors
    ///
    /// Returns `ResourceDisposed` after close, or `OperationFailed`.
    pub fn set_blink_on_transmit(&self, enabled: bool) -> Result<()> {
        self.engine.ensure_open()?;
        self.engine
            .channel()
            .set_flag(ConfigFlags::BLINK_ON_TRANSMIT, enabled)
    }

    /// Stop the workers and release the channel if owned. Idempotent.
    pub fn close(&self) {
        self.engine.close();
    }

    /// Whether [`close`](Self::close) has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.engine.is_closed()
    }
}
