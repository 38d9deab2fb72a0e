//! Property-based tests for uirt.
//!
//! Uses proptest to generate random inputs and verify invariants hold.
//! Each property tries to falsify one claim about validation, identity
//! tracking or callback lifecycle.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

mod common;

use common::{count, ScriptedDriver};
use proptest::prelude::*;
use std::time::Duration;
use uirt::native::{ERR_DRIVER_MISSING, ERR_NO_DEVICE, ERR_NO_RESPONSE, ERR_WRONG_VERSION};
use uirt::{
    CodeFormat, Emitter, Error, Identity, LearnModifier, LearnRequest, Learner, LearnerConfig,
    Receiver, Timeout, TransmitRequest, Transmitter, TransmitterConfig,
};

// Strategy for generating LearnModifier values
fn modifier_strategy() -> impl Strategy<Value = LearnModifier> {
    prop_oneof![
        Just(LearnModifier::Default),
        Just(LearnModifier::ForceRaw),
        Just(LearnModifier::ForceStruct),
        Just(LearnModifier::ForceFrequency),
        Just(LearnModifier::FrequencyDetect),
    ]
}

// Strategy for generating CodeFormat values
fn format_strategy() -> impl Strategy<Value = CodeFormat> {
    prop_oneof![Just(CodeFormat::Uuirt), Just(CodeFormat::Pronto)]
}

// Strategy for generating Emitter values
fn emitter_strategy() -> impl Strategy<Value = Emitter> {
    prop_oneof![
        Just(Emitter::All),
        Just(Emitter::Internal),
        Just(Emitter::External1),
        Just(Emitter::External2),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    // A forced frequency is accepted iff the modifier is ForceFrequency and
    // the frequency is non-zero
    #[test]
    fn prop_forced_frequency_pairing(
        modifier in modifier_strategy(),
        format in format_strategy(),
        frequency in proptest::option::of(0u32..100_000),
    ) {
        let mut request = LearnRequest::new().with_format(format).with_modifier(modifier);
        request.forced_frequency = frequency;
        let hz = frequency.unwrap_or(0);
        let valid = if modifier == LearnModifier::ForceFrequency { hz != 0 } else { hz == 0 };

        match request.resolve(&LearnerConfig::default()) {
            Ok(native) => {
                prop_assert!(valid);
                prop_assert_eq!(native.format_bits, format.bits() | modifier.bits());
                prop_assert_eq!(native.forced_frequency, hz);
            }
            Err(err) => {
                prop_assert!(!valid);
                let is_combination = matches!(err, Error::InvalidParameterCombination { .. });
                prop_assert!(is_combination);
            }
        }
    }

    // Rejected learn requests never reach the driver
    #[test]
    fn prop_rejected_learn_never_calls_native(frequency in 1u32..100_000) {
        let driver = ScriptedDriver::new();
        let learner = Learner::open(driver.clone(), LearnerConfig::default()).unwrap();
        let result = learner.start_learn(
            LearnRequest::new().with_forced_frequency(frequency),
            Identity::Default,
        );
        prop_assert!(result.is_err());
        prop_assert_eq!(count(&driver.calls.learn), 0);
    }

    // Negative repeat counts and waits are rejected, non-negative ones pass
    #[test]
    fn prop_transmit_numeric_validation(repeat in -50i32..50, wait in -50i32..50) {
        let driver = ScriptedDriver::new();
        let transmitter = Transmitter::open(driver.clone(), TransmitterConfig::default()).unwrap();
        let request = TransmitRequest::new("0000 006D")
            .with_repeat_count(repeat)
            .with_inactivity_wait_ms(wait);
        let result = transmitter.transmit(&request, Duration::from_secs(5));
        if repeat < 0 || wait < 0 {
            let is_invalid = matches!(result, Err(Error::InvalidArgument { .. }));
            prop_assert!(is_invalid);
            prop_assert_eq!(count(&driver.calls.transmit), 0);
        } else {
            prop_assert!(result.unwrap());
            prop_assert_eq!(count(&driver.calls.transmit), 1);
        }
    }

    // The zone prefix is prepended and the code is otherwise untouched
    #[test]
    fn prop_zone_prefix_passthrough(emitter in emitter_strategy(), code in "[0-9A-F ]{1,40}") {
        let driver = ScriptedDriver::new();
        let transmitter = Transmitter::open(driver.clone(), TransmitterConfig::default()).unwrap();
        transmitter
            .transmit(&TransmitRequest::new(code.clone()).with_emitter(emitter), Timeout::Infinite)
            .unwrap();
        let sent = driver.transmitted.lock()[0].0.clone();
        prop_assert_eq!(sent, format!("{}{}", emitter.zone_prefix(), code));
    }

    // Timeouts: negative rejected, zero infinite, positive bounded
    #[test]
    fn prop_timeout_from_millis(millis in -10_000i64..10_000) {
        match Timeout::from_millis(millis) {
            Ok(Timeout::Infinite) => prop_assert_eq!(millis, 0),
            Ok(Timeout::After(d)) => {
                prop_assert!(millis > 0);
                prop_assert_eq!(d, Duration::from_millis(millis.unsigned_abs()));
            }
            Err(err) => {
                prop_assert!(millis < 0);
                prop_assert!(err.is_usage_error());
            }
        }
    }

    // Any interleaving of subscribe/unsubscribe keeps the trampoline
    // installed iff at least one subscriber remains
    #[test]
    fn prop_trampoline_installed_iff_subscribed(
        ops in proptest::collection::vec(any::<bool>(), 1..40),
    ) {
        let driver = ScriptedDriver::new();
        let receiver = Receiver::open(driver.clone()).unwrap();
        let mut live = Vec::new();
        for subscribe in ops {
            if subscribe || live.is_empty() {
                live.push(receiver.subscribe(|_| {}).unwrap());
            } else if let Some(id) = live.pop() {
                prop_assert!(receiver.unsubscribe(id).unwrap());
            }
            prop_assert_eq!(driver.is_installed(), !live.is_empty());
            prop_assert_eq!(receiver.subscriber_count(), live.len());
        }
        prop_assert!(count(&driver.calls.install) >= count(&driver.calls.uninstall));
        prop_assert!(count(&driver.calls.install) - count(&driver.calls.uninstall) <= 1);
    }

    // Open failures always classify as hardware init failures
    #[test]
    fn prop_open_codes_classified(code in any::<u32>()) {
        let err = Error::from_open_code(code);
        prop_assert!(err.is_hardware_init_failure());
        let specific = [ERR_NO_DEVICE, ERR_NO_RESPONSE, ERR_DRIVER_MISSING, ERR_WRONG_VERSION];
        if specific.contains(&code) {
            prop_assert_eq!(err.native_code(), None);
        } else {
            prop_assert_eq!(err, Error::HardwareInitFailure { code });
        }
    }

    // Display of identities round-trips custom tokens
    #[test]
    fn prop_identity_display(token in "[a-zA-Z0-9_-]{1,24}") {
        prop_assert_eq!(Identity::from(token.as_str()).to_string(), token);
    }
}

// =============================================================================
// Determinism tests
// =============================================================================

mod determinism_tests {
    use super::*;

    #[test]
    fn test_resolve_deterministic() {
        let request = LearnRequest::new()
            .with_modifier(LearnModifier::ForceFrequency)
            .with_forced_frequency(38_000);
        let config = LearnerConfig::default();
        assert_eq!(
            request.resolve(&config).unwrap(),
            request.resolve(&config).unwrap()
        );
    }

    #[test]
    fn test_error_methods_deterministic() {
        let err = Error::operation_failed("transmit", 5);
        assert_eq!(err.native_code(), err.native_code());
        assert_eq!(err.to_string(), err.clone().to_string());
    }
}
