//! # Concentrator Error Handling
//!
//! This module defines the `LgwError` enum, which represents every failure the
//! bus engine, the radio command protocols and the bring-up sequencer can
//! report, and `BringUpError`, which tags a failure with the radio chain and
//! sequencer state it happened in.

use crate::radio::sequencer::SequencerState;
use crate::spi::addressing::MuxTarget;
use thiserror::Error;

/// Represents the different error types that can occur in the loragw crate.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LgwError {
    /// The SPI peripheral could not be claimed or configured.
    #[error("Bus initialization failed: {0}")]
    BusInitError(String),

    /// The bus could not be acquired within the configured window.
    #[error("Bus busy: could not acquire within {timeout_ms} ms")]
    BusBusy { timeout_ms: u64 },

    /// The handle has already been closed.
    #[error("Bus already closed")]
    AlreadyClosed,

    /// A transaction was requested on a closed handle.
    #[error("Bus is closed")]
    BusClosed,

    /// The underlying transfer reported an I/O error.
    #[error("SPI transfer failed: {0}")]
    TransferFailed(String),

    /// A single-transaction payload exceeds the chunk ceiling.
    #[error("Payload too large: {len} bytes exceeds the {max} byte chunk ceiling")]
    PayloadTooLarge { len: usize, max: usize },

    /// A command that needs a data buffer was given an empty one.
    #[error("Null argument: command 0x{opcode:02X} requires data")]
    NullArgument { opcode: u8 },

    /// The frequency is outside every supported calibration band.
    #[error("Unsupported frequency: {0} Hz")]
    UnsupportedFrequency(u32),

    /// The chip reported a different mode than the one just requested.
    #[error("Mode verification failed: expected 0x{expected:X}, got 0x{actual:X}")]
    ModeVerificationFailed { expected: u8, actual: u8 },

    /// The image calibration error bit was set after calibration.
    #[error("Image calibration failed: device errors 0x{0:04X}")]
    CalibrationFailed(u16),

    /// Invalid modulation or configuration parameter.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// A register read back a different value than was written.
    #[error("Register verification failed at 0x{address:02X}: wrote 0x{written:02X}, read 0x{read:02X}")]
    RegisterVerificationFailed { address: u8, written: u8, read: u8 },

    /// The radio PLL did not report lock.
    #[error("PLL lock failed after {attempts} attempts")]
    PllLockFailed { attempts: u8 },
}

/// A radio chain bring-up failure, tagged with where it happened.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Radio chain {chain:?} failed in state {state:?}: {source}")]
pub struct BringUpError {
    /// The chain whose bring-up stopped
    pub chain: MuxTarget,
    /// The sequencer state that could not be completed
    pub state: SequencerState,
    /// The underlying failure
    #[source]
    pub source: LgwError,
}

impl BringUpError {
    pub fn new(chain: MuxTarget, state: SequencerState, source: LgwError) -> Self {
        Self {
            chain,
            state,
            source,
        }
    }
}

impl From<BringUpError> for LgwError {
    fn from(err: BringUpError) -> Self {
        err.source
    }
}

pub type Result<T> = std::result::Result<T, LgwError>;
