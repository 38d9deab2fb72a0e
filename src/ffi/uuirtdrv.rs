//! Runtime-loaded bindings to the USB-UIRT vendor driver (`uuirtdrv`).
//!
//! # Safety
//!
//! This module contains unsafe FFI code. All unsafe blocks are documented
//! with SAFETY comments explaining why they are sound.
//!
//! # Callbacks
//!
//! The driver takes plain function pointers plus a `void *` of user data.
//! The learn trampoline receives a pointer to a stack slot that lives for
//! the whole blocking call. The receive trampoline receives the address of
//! a [`ReceiveTrampoline`] that the caller keeps alive for as long as it is
//! registered.

use crate::error::{Error, Result};
use crate::format::ConfigFlags;
use crate::native::{
    AbortFlag, DeviceInfo, LearnProgress, NativeDriver, NativeError, NativeLearn,
    NativeTransmit, RawHandle, ReceiveTrampoline,
};
use libloading::Library;
use std::ffi::{c_char, c_int, c_uint, c_ulong, c_void, CStr, CString};
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::sync::Arc;
use tracing::{debug, warn};

/// Suggested minimum size of the learn output buffer is 2048 bytes.
const LEARN_BUFFER_LEN: usize = 4096;

/// Value the driver returns from `UUIRTOpen` on failure.
const INVALID_HANDLE_VALUE: usize = usize::MAX;

/// Win32 `ERROR_INVALID_PARAMETER`, used for arguments the driver cannot take.
const ERROR_INVALID_PARAMETER: u32 = 87;

type LearnCallback = unsafe extern "system" fn(c_uint, c_uint, c_ulong, *mut c_void);
type ReceiveCallback = unsafe extern "system" fn(*const c_char, *mut c_void);

type UuirtOpen = unsafe extern "system" fn() -> *mut c_void;
type UuirtClose = unsafe extern "system" fn(*mut c_void) -> c_int;
type UuirtGetDrvInfo = unsafe extern "system" fn(*mut c_uint) -> c_int;
type UuirtGetUuirtInfo = unsafe extern "system" fn(*mut c_void, *mut UuInfo) -> c_int;
type UuirtGetUuirtConfig = unsafe extern "system" fn(*mut c_void, *mut u32) -> c_int;
type UuirtSetUuirtConfig = unsafe extern "system" fn(*mut c_void, u32) -> c_int;
type UuirtTransmitIr = unsafe extern "system" fn(
    *mut c_void,
    *const c_char,
    c_int,
    c_int,
    c_int,
    *mut c_void,
    *mut c_void,
    *mut c_void,
) -> c_int;
type UuirtLearnIr = unsafe extern "system" fn(
    *mut c_void,
    c_int,
    *mut c_char,
    Option<LearnCallback>,
    *mut c_void,
    *mut i32,
    c_uint,
    *mut c_void,
    *mut c_void,
) -> c_int;
type UuirtSetReceiveCallback =
    unsafe extern "system" fn(*mut c_void, Option<ReceiveCallback>, *mut c_void) -> c_int;

#[repr(C)]
#[derive(Default)]
struct UuInfo {
    fw_version: c_uint,
    prot_version: c_uint,
    fw_date_day: u8,
    fw_date_month: u8,
    fw_date_year: u8,
}

#[derive(Clone, Copy)]
struct Api {
    open: UuirtOpen,
    close: UuirtClose,
    get_drv_info: UuirtGetDrvInfo,
    get_uuirt_info: UuirtGetUuirtInfo,
    get_config: UuirtGetUuirtConfig,
    set_config: UuirtSetUuirtConfig,
    transmit_ir: UuirtTransmitIr,
    learn_ir: UuirtLearnIr,
    set_receive_callback: UuirtSetReceiveCallback,
}

/// The vendor driver, loaded at runtime.
pub struct UuirtDriver {
    api: Api,
    // Keeps every pointer in `api` valid; dropped last.
    _library: Library,
}

impl UuirtDriver {
    /// Load `uuirtdrv` from the platform's library search path.
    pub fn load() -> Result<Self> {
        let name = libloading::library_filename("uuirtdrv");
        // SAFETY: loading the vendor driver runs its initialisers. The driver
        // has no initialisers with preconditions we could violate.
        let library = unsafe { Library::new(&name) }.map_err(|e| {
            warn!(library = ?name, error = %e, "driver library not found");
            Error::HardwareUnavailable
        })?;
        let api = resolve(&library).map_err(|e| {
            warn!(error = %e, "driver library is missing entry points");
            Error::HardwareUnavailable
        })?;
        debug!(library = ?name, "driver library loaded");
        Ok(Self {
            api,
            _library: library,
        })
    }
}

fn resolve(library: &Library) -> std::result::Result<Api, libloading::Error> {
    // SAFETY: each symbol is declared with the signature documented in the
    // vendor SDK header. The pointers are copied out but `UuirtDriver` keeps
    // the library loaded for as long as they are used.
    unsafe {
        Ok(Api {
            open: *library.get::<UuirtOpen>(b"UUIRTOpen\0")?,
            close: *library.get::<UuirtClose>(b"UUIRTClose\0")?,
            get_drv_info: *library.get::<UuirtGetDrvInfo>(b"UUIRTGetDrvInfo\0")?,
            get_uuirt_info: *library.get::<UuirtGetUuirtInfo>(b"UUIRTGetUUIRTInfo\0")?,
            get_config: *library.get::<UuirtGetUuirtConfig>(b"UUIRTGetUUIRTConfig\0")?,
            set_config: *library.get::<UuirtSetUuirtConfig>(b"UUIRTSetUUIRTConfig\0")?,
            transmit_ir: *library.get::<UuirtTransmitIr>(b"UUIRTTransmitIR\0")?,
            learn_ir: *library.get::<UuirtLearnIr>(b"UUIRTLearnIR\0")?,
            set_receive_callback: *library
                .get::<UuirtSetReceiveCallback>(b"UUIRTSetReceiveCallback\0")?,
        })
    }
}

/// The driver's last error code.
#[allow(clippy::cast_sign_loss)]
fn last_error() -> NativeError {
    let code = std::io::Error::last_os_error()
        .raw_os_error()
        .map_or(0, |code| code as u32);
    NativeError::new(code)
}

fn as_ptr(handle: RawHandle) -> *mut c_void {
    handle.as_raw() as *mut c_void
}

fn check(ok: c_int) -> std::result::Result<(), NativeError> {
    if ok == 0 {
        Err(last_error())
    } else {
        Ok(())
    }
}

impl NativeDriver for UuirtDriver {
    fn open(&self) -> std::result::Result<RawHandle, NativeError> {
        // SAFETY: UUIRTOpen takes no arguments and returns a handle or
        // INVALID_HANDLE_VALUE.
        let handle = unsafe { (self.api.open)() } as usize;
        if handle == INVALID_HANDLE_VALUE {
            return Err(last_error());
        }
        Ok(RawHandle::from_raw(handle))
    }

    fn close(&self, handle: RawHandle) {
        // SAFETY: handle was returned by UUIRTOpen and Channel closes it once.
        let ok = unsafe { (self.api.close)(as_ptr(handle)) };
        if ok == 0 {
            warn!(code = last_error().code, "UUIRTClose reported failure");
        }
    }

    fn driver_version(&self) -> std::result::Result<u32, NativeError> {
        let mut version: c_uint = 0;
        // SAFETY: version is a valid out-pointer for the duration of the call.
        check(unsafe { (self.api.get_drv_info)(&mut version) })?;
        Ok(version)
    }

    fn device_info(&self, handle: RawHandle) -> std::result::Result<DeviceInfo, NativeError> {
        let mut info = UuInfo::default();
        // SAFETY: info is a repr(C) UUINFO owned by this frame.
        check(unsafe { (self.api.get_uuirt_info)(as_ptr(handle), &mut info) })?;
        Ok(DeviceInfo {
            firmware_version: info.fw_version,
            protocol_version: info.prot_version,
            firmware_day: info.fw_date_day,
            firmware_month: info.fw_date_month,
            firmware_year: info.fw_date_year,
        })
    }

    fn config(&self, handle: RawHandle) -> std::result::Result<ConfigFlags, NativeError> {
        let mut bits: u32 = 0;
        // SAFETY: bits is a valid out-pointer for the duration of the call.
        check(unsafe { (self.api.get_config)(as_ptr(handle), &mut bits) })?;
        Ok(ConfigFlags::from_bits_retain(bits))
    }

    fn set_config(
        &self,
        handle: RawHandle,
        flags: ConfigFlags,
    ) -> std::result::Result<(), NativeError> {
        // SAFETY: plain value arguments.
        check(unsafe { (self.api.set_config)(as_ptr(handle), flags.bits()) })
    }

    fn learn(
        &self,
        handle: RawHandle,
        request: &NativeLearn,
        progress: &mut dyn FnMut(LearnProgress),
        abort: &AbortFlag,
    ) -> std::result::Result<String, NativeError> {
        let format = c_int::try_from(request.format_bits)
            .map_err(|_| NativeError::new(ERROR_INVALID_PARAMETER))?;
        let mut buffer = vec![0u8; LEARN_BUFFER_LEN];
        let mut relay: &mut dyn FnMut(LearnProgress) = progress;
        let user_data = ptr::addr_of_mut!(relay).cast::<c_void>();

        // SAFETY: buffer holds LEARN_BUFFER_LEN bytes, above the SDK minimum.
        // user_data points at `relay`, which outlives this blocking call, and
        // is only dereferenced by learn_progress_trampoline. The abort pointer
        // stays valid because `abort` is borrowed for the whole call.
        let ok = unsafe {
            (self.api.learn_ir)(
                as_ptr(handle),
                format,
                buffer.as_mut_ptr().cast::<c_char>(),
                Some(learn_progress_trampoline),
                user_data,
                abort.as_native_ptr(),
                request.forced_frequency,
                ptr::null_mut(),
                ptr::null_mut(),
            )
        };
        check(ok)?;

        let code = CStr::from_bytes_until_nul(&buffer)
            .map_err(|_| NativeError::new(ERROR_INVALID_PARAMETER))?;
        Ok(code.to_string_lossy().into_owned())
    }

    fn transmit(
        &self,
        handle: RawHandle,
        request: &NativeTransmit<'_>,
    ) -> std::result::Result<(), NativeError> {
        let code = CString::new(request.code)
            .map_err(|_| NativeError::new(ERROR_INVALID_PARAMETER))?;
        let format = c_int::try_from(request.format_bits)
            .map_err(|_| NativeError::new(ERROR_INVALID_PARAMETER))?;

        // SAFETY: code is NUL-terminated and outlives the call. A null event
        // handle makes the driver block until the code has been sent.
        check(unsafe {
            (self.api.transmit_ir)(
                as_ptr(handle),
                code.as_ptr(),
                format,
                request.repeat_count,
                request.inactivity_wait_ms,
                ptr::null_mut(),
                ptr::null_mut(),
                ptr::null_mut(),
            )
        })
    }

    fn set_receive_callback(
        &self,
        handle: RawHandle,
        trampoline: Option<&Arc<ReceiveTrampoline>>,
    ) -> std::result::Result<(), NativeError> {
        let (callback, user_data): (Option<ReceiveCallback>, *mut c_void) = match trampoline {
            Some(trampoline) => (
                Some(receive_trampoline),
                Arc::as_ptr(trampoline).cast_mut().cast::<c_void>(),
            ),
            None => (None, ptr::null_mut()),
        };
        // SAFETY: the caller keeps the trampoline alive until it has been
        // unregistered with a `None` call, so user_data stays valid for every
        // callback the driver makes.
        check(unsafe { (self.api.set_receive_callback)(as_ptr(handle), callback, user_data) })
    }
}

unsafe extern "system" fn learn_progress_trampoline(
    progress: c_uint,
    signal_quality: c_uint,
    carrier_frequency: c_ulong,
    user_data: *mut c_void,
) {
    if user_data.is_null() {
        return;
    }
    // SAFETY: user_data is the address of the `relay` slot in
    // UuirtDriver::learn, which is alive while the driver can call us.
    let relay = unsafe { &mut *user_data.cast::<&mut dyn FnMut(LearnProgress)>() };
    let tick = LearnProgress {
        percent: progress,
        signal_quality,
        carrier_frequency: u32::try_from(carrier_frequency).unwrap_or(u32::MAX),
    };
    if panic::catch_unwind(AssertUnwindSafe(|| relay(tick))).is_err() {
        warn!("learn progress relay panicked; panic dropped");
    }
}

unsafe extern "system" fn receive_trampoline(code: *const c_char, user_data: *mut c_void) {
    if code.is_null() || user_data.is_null() {
        return;
    }
    // SAFETY: user_data is Arc::as_ptr of a ReceiveTrampoline the bridge
    // retains while registered. code is a NUL-terminated string owned by the
    // driver for the duration of this call; it is copied before returning.
    let (trampoline, code) = unsafe {
        (
            &*user_data.cast::<ReceiveTrampoline>(),
            CStr::from_ptr(code).to_string_lossy(),
        )
    };
    if panic::catch_unwind(AssertUnwindSafe(|| trampoline.deliver(&code))).is_err() {
        warn!("receive trampoline panicked; panic dropped");
    }
}
