//! # loragw-rs - Host-side SPI layer for the SX1302 LoRa concentrator
//!
//! The loragw-rs crate drives an SX1302 concentrator and its two radio front-ends
//! over one shared SPI bus. It covers everything below the packet engine: bus
//! ownership, framing, radio commands and radio bring-up.
//!
//! ## Features
//!
//! - Exclusive bus handle with lock-protected, chunked burst transfers
//! - Register and opcode framing for the concentrator core and both radio chains
//! - SX1250 opcode protocol and SX1255/SX1257 flat register protocol
//! - Radio bring-up sequencing from reset to continuous receive, with image calibration
//! - LoRa time-on-air and millisecond timeout utilities
//! - A simulated bus for tests and an optional Raspberry Pi backend (`raspberry-pi` feature)
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! loragw-rs = "0.1.0"
//! ```
//!
//! ```rust
//! use loragw_rs::{open, time_on_air, BusConfig, MuxTarget};
//! use loragw_rs::spi::mock::MockSpiBus;
//!
//! let bus = open(MockSpiBus::new(), &BusConfig::default())?;
//! bus.write_register(MuxTarget::Concentrator, 0x5602, 0xA5)?;
//! assert_eq!(bus.read_register(MuxTarget::Concentrator, 0x5602)?, 0xA5);
//!
//! let toa_us = time_on_air(0x04, 7, 1, 8, true, true, 13)?;
//! assert_eq!(toa_us, 46_336);
//! # Ok::<(), loragw_rs::LgwError>(())
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod radio;
pub mod spi;
pub mod timing;

pub use crate::config::{BusConfig, ConcentratorConfig, RadioChainConfig};
pub use crate::error::{BringUpError, LgwError, Result};
pub use crate::logging::{init_logger, log_transfer_hex};

// Bus and addressing
pub use spi::addressing::{Access, MuxTarget, RegisterAddress};
pub use spi::{open, BusHandle, BusLock, SpiTransport};

// Radio layer
pub use radio::sequencer::{
    bring_up_all, reset_concentrator, ChainOutcome, RadioChainState, RadioSequencer, ResetPins,
    SequencerState,
};
pub use radio::{ChipFamily, RadioDialect};

// Timing
pub use timing::{
    time_on_air, timeout_check, timeout_start, Delay, ThreadDelay, TimeOnAir, TimeoutWindow,
};
