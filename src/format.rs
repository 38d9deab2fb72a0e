//! IR code formats, learn modifiers, emitter zones and device settings.
//!
//! These are the small value types passed through to the driver. The
//! crate never interprets an IR code string; it only selects the format
//! the driver should produce or expect and, for transmit, the zone prefix
//! that routes the code to an emitter.

use bitflags::bitflags;
use std::fmt;

/// Format of an IR code string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CodeFormat {
    /// Compressed USB-UIRT structured format (smallest codes).
    Uuirt,
    /// Pronto hex format (best compatibility).
    #[default]
    Pronto,
}

impl CodeFormat {
    /// Native format bits for this format.
    #[must_use]
    pub const fn bits(self) -> u32 {
        match self {
            Self::Uuirt => 0x0000,
            Self::Pronto => 0x0010,
        }
    }
}

impl fmt::Display for CodeFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uuirt => write!(f, "UUIRT"),
            Self::Pronto => write!(f, "Pronto"),
        }
    }
}

/// Modifier applied to the code format while learning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LearnModifier {
    /// Let the driver choose.
    #[default]
    Default,
    /// Force a raw capture.
    ForceRaw,
    /// Force a structured capture.
    ForceStruct,
    /// Force the carrier frequency to a caller-supplied value.
    ///
    /// This is the only modifier that accepts a forced frequency.
    ForceFrequency,
    /// Detect the carrier frequency while learning.
    FrequencyDetect,
}

impl LearnModifier {
    /// Native modifier bits, OR-ed with [`CodeFormat::bits`].
    #[must_use]
    pub const fn bits(self) -> u32 {
        match self {
            Self::Default => 0x0000,
            Self::ForceRaw => 0x0100,
            Self::ForceStruct => 0x0200,
            Self::ForceFrequency => 0x0400,
            Self::FrequencyDetect => 0x0800,
        }
    }

    /// Whether this modifier requires a forced frequency value.
    #[must_use]
    pub const fn requires_frequency(self) -> bool {
        matches!(self, Self::ForceFrequency)
    }
}

impl fmt::Display for LearnModifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => write!(f, "Default"),
            Self::ForceRaw => write!(f, "Force Raw"),
            Self::ForceStruct => write!(f, "Force Struct"),
            Self::ForceFrequency => write!(f, "Force Frequency"),
            Self::FrequencyDetect => write!(f, "Frequency Detect"),
        }
    }
}

/// Emitter that a transmitted code is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Emitter {
    /// All emitters.
    #[default]
    All,
    /// The internal emitter.
    Internal,
    /// External emitter jack 1.
    External1,
    /// External emitter jack 2.
    External2,
}

impl Emitter {
    /// Zone prefix prepended to the code string at transmit time.
    #[must_use]
    pub const fn zone_prefix(self) -> &'static str {
        match self {
            Self::All => "",
            Self::Internal => "Z3",
            Self::External1 => "Z1",
            Self::External2 => "Z2",
        }
    }
}

impl fmt::Display for Emitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "All"),
            Self::Internal => write!(f, "Internal"),
            Self::External1 => write!(f, "External 1"),
            Self::External2 => write!(f, "External 2"),
        }
    }
}

bitflags! {
    /// Device configuration bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ConfigFlags: u32 {
        /// Blink the indicator LED when a code is received.
        const BLINK_ON_RECEIVE = 0x01;
        /// Blink the indicator LED when a code is transmitted.
        const BLINK_ON_TRANSMIT = 0x02;
        /// Report received codes in the legacy (IRMAN-style) format.
        const LEGACY_RECEIVE_CODES = 0x04;
        /// Reserved by the firmware.
        const RESERVED0 = 0x08;
        /// Reserved by the firmware.
        const RESERVED1 = 0x10;
    }
}
