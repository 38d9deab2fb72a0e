//! Scripted stand-in for the vendor driver, shared by integration tests.
//!
//! Counts every native call so tests can assert that rejected requests
//! never reach the driver.

#![allow(dead_code)]

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uirt::native::{
    AbortFlag, DeviceInfo, NativeError, NativeLearn, NativeTransmit, RawHandle,
    ReceiveTrampoline,
};
use uirt::{ConfigFlags, LearnProgress, NativeDriver};

/// Native call counters.
#[derive(Debug, Default)]
pub struct CallCounts {
    pub open: AtomicUsize,
    pub close: AtomicUsize,
    pub learn: AtomicUsize,
    pub transmit: AtomicUsize,
    pub install: AtomicUsize,
    pub uninstall: AtomicUsize,
}

pub fn count(counter: &AtomicUsize) -> usize {
    counter.load(Ordering::SeqCst)
}

/// What the next learn calls do.
#[derive(Debug, Clone)]
pub enum LearnScript {
    /// Report these ticks, then return the code.
    Code { ticks: Vec<u32>, code: String },
    /// Poll the abort flag until it is raised or the bound elapses, then
    /// return the code.
    HoldUntilAbort { bound: Duration, code: String },
    /// Fail with this native code.
    Fail(u32),
    /// Poll the abort flag like `HoldUntilAbort`, then fail with `code`.
    FailAfterAbort { bound: Duration, code: u32 },
}

impl Default for LearnScript {
    fn default() -> Self {
        Self::Code {
            ticks: Vec::new(),
            code: "0000 006D 0000 0022 0157 00AC".to_owned(),
        }
    }
}

#[derive(Debug, Default)]
pub struct ScriptedDriver {
    pub calls: CallCounts,
    pub open_error: Mutex<Option<u32>>,
    pub learn_script: Mutex<LearnScript>,
    pub learn_requests: Mutex<Vec<NativeLearn>>,
    pub transmit_delay: Mutex<Option<Duration>>,
    pub transmitted: Mutex<Vec<(String, i32, i32)>>,
    pub fail_install: Mutex<Option<u32>>,
    pub trampoline: Mutex<Option<Arc<ReceiveTrampoline>>>,
    pub config: Mutex<ConfigFlags>,
}

impl ScriptedDriver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_learn(script: LearnScript) -> Arc<Self> {
        let driver = Self::default();
        *driver.learn_script.lock() = script;
        Arc::new(driver)
    }

    /// Deliver `code` through the installed trampoline, as the driver's
    /// receive thread would. Returns `false` if nothing is installed.
    pub fn receive(&self, code: &str) -> bool {
        let trampoline = self.trampoline.lock().clone();
        trampoline.map_or(false, |t| {
            t.deliver(code);
            true
        })
    }

    pub fn is_installed(&self) -> bool {
        self.trampoline.lock().is_some()
    }
}

impl NativeDriver for ScriptedDriver {
    fn open(&self) -> Result<RawHandle, NativeError> {
        if let Some(code) = *self.open_error.lock() {
            return Err(NativeError::new(code));
        }
        self.calls.open.fetch_add(1, Ordering::SeqCst);
        Ok(RawHandle::from_raw(0x5151))
    }

    fn close(&self, _handle: RawHandle) {
        self.calls.close.fetch_add(1, Ordering::SeqCst);
    }

    fn driver_version(&self) -> Result<u32, NativeError> {
        Ok(0x0301)
    }

    fn device_info(&self, _handle: RawHandle) -> Result<DeviceInfo, NativeError> {
        Ok(DeviceInfo {
            firmware_version: 0x0206,
            protocol_version: 3,
            firmware_day: 1,
            firmware_month: 12,
            firmware_year: 12,
        })
    }

    fn config(&self, _handle: RawHandle) -> Result<ConfigFlags, NativeError> {
        Ok(*self.config.lock())
    }

    fn set_config(&self, _handle: RawHandle, flags: ConfigFlags) -> Result<(), NativeError> {
        *self.config.lock() = flags;
        Ok(())
    }

    fn learn(
        &self,
        _handle: RawHandle,
        request: &NativeLearn,
        progress: &mut dyn FnMut(LearnProgress),
        abort: &AbortFlag,
    ) -> Result<String, NativeError> {
        self.calls.learn.fetch_add(1, Ordering::SeqCst);
        self.learn_requests.lock().push(*request);
        let script = self.learn_script.lock().clone();
        match script {
            LearnScript::Code { ticks, code } => {
                for percent in ticks {
                    progress(LearnProgress {
                        percent,
                        signal_quality: 90,
                        carrier_frequency: 38_000,
                    });
                }
                Ok(code)
            }
            LearnScript::HoldUntilAbort { bound, code } => {
                let started = Instant::now();
                while !abort.is_set() && started.elapsed() < bound {
                    std::thread::sleep(Duration::from_millis(1));
                }
                if abort.is_set() {
                    Ok(String::new())
                } else {
                    Ok(code)
                }
            }
            LearnScript::Fail(code) => Err(NativeError::new(code)),
            LearnScript::FailAfterAbort { bound, code } => {
                let started = Instant::now();
                while !abort.is_set() && started.elapsed() < bound {
                    std::thread::sleep(Duration::from_millis(1));
                }
                Err(NativeError::new(code))
            }
        }
    }

    fn transmit(
        &self,
        _handle: RawHandle,
        request: &NativeTransmit<'_>,
    ) -> Result<(), NativeError> {
        self.calls.transmit.fetch_add(1, Ordering::SeqCst);
        let delay = *self.transmit_delay.lock();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        self.transmitted.lock().push((
            request.code.to_owned(),
            request.repeat_count,
            request.inactivity_wait_ms,
        ));
        Ok(())
    }

    fn set_receive_callback(
        &self,
        _handle: RawHandle,
        trampoline: Option<&Arc<ReceiveTrampoline>>,
    ) -> Result<(), NativeError> {
        match trampoline {
            Some(trampoline) => {
                if let Some(code) = *self.fail_install.lock() {
                    return Err(NativeError::new(code));
                }
                self.calls.install.fetch_add(1, Ordering::SeqCst);
                *self.trampoline.lock() = Some(Arc::clone(trampoline));
            }
            None => {
                self.calls.uninstall.fetch_add(1, Ordering::SeqCst);
                *self.trampoline.lock() = None;
            }
        }
        Ok(())
    }
}

/// Poll `condition` for up to five seconds.
pub fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    condition()
}
