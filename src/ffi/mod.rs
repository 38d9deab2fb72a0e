//! FFI Quarantine Zone - All unsafe code isolated here.
//!
//! # Safety Architecture
//!
//! This module contains ALL unsafe code in the uirt crate. The library root
//! uses `#![deny(unsafe_code)]`, so no unsafe code can leak into the
//! coordinator or the user-facing interface.
//!
//! ## Safety Rules
//!
//! - S1: Every `unsafe` block has a `// SAFETY:` comment
//! - S2: No raw pointers escape the FFI module (the abort flag pointer is
//!   produced by safe code and only dereferenced by the driver)
//! - S3: All C strings are copied out before the callback returns
//! - S4: Trampolines catch panics; nothing unwinds into the driver
//! - S5: The library handle outlives every function pointer taken from it
//!
//! # Module Structure
//!
//! ```text
//! ffi/
//! ├── mod.rs          # This file - module router
//! └── uuirtdrv.rs     # Runtime-loaded bindings to the vendor driver
//! ```

// Allow unsafe in this module only - quarantine zone
#![allow(unsafe_code)]

#[cfg(feature = "native")]
mod uuirtdrv;

use crate::error::Result;
use crate::native::NativeDriver;
use std::sync::Arc;

/// Load the vendor driver library.
#[cfg(feature = "native")]
pub fn system_driver() -> Result<Arc<dyn NativeDriver>> {
    let driver = uuirtdrv::UuirtDriver::load()?;
    Ok(Arc::new(driver))
}

/// Stub: the crate was built without the `native` feature.
#[cfg(not(feature = "native"))]
pub fn system_driver() -> Result<Arc<dyn NativeDriver>> {
    Err(crate::error::Error::HardwareUnavailable)
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_system_driver_graceful_on_missing_library() {
        // Depends on the host; must not panic either way
        drop(super::system_driver());
    }
}
