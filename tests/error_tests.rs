//! Unit tests for the `LgwError` enum and its `Display` implementation.

use loragw_rs::error::{BringUpError, LgwError};
use loragw_rs::{MuxTarget, SequencerState};
use std::error::Error;

/// Tests that the `BusBusy` variant is correctly formatted.
#[test]
fn test_bus_busy_error() {
    let err = LgwError::BusBusy { timeout_ms: 250 };
    assert_eq!(err.to_string(), "Bus busy: could not acquire within 250 ms");
}

/// Tests that the `TransferFailed` variant is correctly formatted.
#[test]
fn test_transfer_failed_error() {
    let err = LgwError::TransferFailed("EIO".to_string());
    assert_eq!(err.to_string(), "SPI transfer failed: EIO");
}

/// Tests that the `PayloadTooLarge` variant is correctly formatted.
#[test]
fn test_payload_too_large_error() {
    let err = LgwError::PayloadTooLarge { len: 1030, max: 1022 };
    assert_eq!(
        err.to_string(),
        "Payload too large: 1030 bytes exceeds the 1022 byte chunk ceiling"
    );
}

/// Tests that the `NullArgument` variant is correctly formatted.
#[test]
fn test_null_argument_error() {
    let err = LgwError::NullArgument { opcode: 0x98 };
    assert_eq!(err.to_string(), "Null argument: command 0x98 requires data");
}

/// Tests that the `UnsupportedFrequency` variant is correctly formatted.
#[test]
fn test_unsupported_frequency_error() {
    let err = LgwError::UnsupportedFrequency(500_000_000);
    assert_eq!(err.to_string(), "Unsupported frequency: 500000000 Hz");
}

/// Tests that the `CalibrationFailed` variant is correctly formatted.
#[test]
fn test_calibration_failed_error() {
    let err = LgwError::CalibrationFailed(0x0010);
    assert_eq!(err.to_string(), "Image calibration failed: device errors 0x0010");
}

/// Tests that the `RegisterVerificationFailed` variant is correctly formatted.
#[test]
fn test_register_verification_error() {
    let err = LgwError::RegisterVerificationFailed {
        address: 0x0B,
        written: 5,
        read: 0,
    };
    assert_eq!(
        err.to_string(),
        "Register verification failed at 0x0B: wrote 0x05, read 0x00"
    );
}

/// Tests that `BringUpError` exposes the underlying error as its source.
#[test]
fn test_bring_up_error_source() {
    let err = BringUpError::new(
        MuxTarget::RadioA,
        SequencerState::Calibrating,
        LgwError::PllLockFailed { attempts: 5 },
    );
    assert_eq!(
        err.source().map(|s| s.to_string()),
        Some("PLL lock failed after 5 attempts".to_string())
    );
    let flattened: LgwError = err.into();
    assert_eq!(flattened, LgwError::PllLockFailed { attempts: 5 });
}
