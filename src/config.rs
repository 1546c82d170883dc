//! # Board Configuration
//!
//! Serde-backed configuration for the SPI bus and the two radio chains.
//! Values usually come from a JSON file written by the external settings
//! store; the sequencer only ever sees them as plain parameters.
//!
//! ```json
//! {
//!   "bus": { "clock_hz": 2000000, "chunk_size": 1024, "acquire_timeout_ms": 1000 },
//!   "clock_source": 0,
//!   "radio_a": { "enable": true, "chip": "Sx1250", "frequency_hz": 867500000,
//!                "single_input_mode": true, "tx_enable": true },
//!   "radio_b": { "enable": true, "chip": "Sx1250", "frequency_hz": 868500000 }
//! }
//! ```

use crate::error::{LgwError, Result};
use crate::radio::ChipFamily;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Default SPI clock for the SX1302
pub const DEFAULT_SPI_CLOCK_HZ: u32 = 2_000_000;
/// Largest payload moved in one physical transaction
pub const DEFAULT_CHUNK_SIZE: usize = 1024;
/// How long a caller waits for the bus before giving up
pub const DEFAULT_ACQUIRE_TIMEOUT_MS: u64 = 1000;

/// SPI bus parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Clock rate in Hz
    pub clock_hz: u32,
    /// Burst chunk ceiling in bytes
    pub chunk_size: usize,
    /// Bus acquisition window in milliseconds
    pub acquire_timeout_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            clock_hz: DEFAULT_SPI_CLOCK_HZ,
            chunk_size: DEFAULT_CHUNK_SIZE,
            acquire_timeout_ms: DEFAULT_ACQUIRE_TIMEOUT_MS,
        }
    }
}

impl BusConfig {
    pub fn validate(&self) -> Result<()> {
        if self.clock_hz == 0 {
            return Err(LgwError::InvalidParameter(
                "SPI clock must be non-zero".to_string(),
            ));
        }
        if self.chunk_size == 0 || self.chunk_size > u16::MAX as usize {
            return Err(LgwError::InvalidParameter(format!(
                "chunk size {} must be within 1..=65535",
                self.chunk_size
            )));
        }
        Ok(())
    }
}

/// Per-chain radio parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioChainConfig {
    /// Bring this chain up
    pub enable: bool,
    /// Chip fitted on this chain
    pub chip: ChipFamily,
    /// Center frequency in Hz
    pub frequency_hz: u32,
    /// Route the single RF input to the concentrator (SX1250 only)
    pub single_input_mode: bool,
    /// Chain is allowed to transmit
    pub tx_enable: bool,
}

impl Default for RadioChainConfig {
    fn default() -> Self {
        Self {
            enable: false,
            chip: ChipFamily::Sx1250,
            frequency_hz: 0,
            single_input_mode: false,
            tx_enable: false,
        }
    }
}

/// Complete concentrator board description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcentratorConfig {
    pub bus: BusConfig,
    /// Index of the radio chain providing the 32 MHz clock (0 or 1)
    pub clock_source: u8,
    pub radio_a: RadioChainConfig,
    pub radio_b: RadioChainConfig,
}

impl Default for ConcentratorConfig {
    fn default() -> Self {
        Self {
            bus: BusConfig::default(),
            clock_source: 0,
            radio_a: RadioChainConfig::default(),
            radio_b: RadioChainConfig::default(),
        }
    }
}

impl ConcentratorConfig {
    /// Parses and validates a JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: ConcentratorConfig = serde_json::from_str(json)
            .map_err(|e| LgwError::InvalidParameter(format!("invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON configuration file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|e| {
            LgwError::InvalidParameter(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&json)
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| LgwError::InvalidParameter(format!("cannot serialize configuration: {e}")))
    }

    /// Chain configurations indexed by chain number.
    pub fn chains(&self) -> [&RadioChainConfig; 2] {
        [&self.radio_a, &self.radio_b]
    }

    pub fn validate(&self) -> Result<()> {
        self.bus.validate()?;
        if self.clock_source > 1 {
            return Err(LgwError::InvalidParameter(format!(
                "clock source {} is not a radio chain",
                self.clock_source
            )));
        }
        for (index, chain) in self.chains().iter().enumerate() {
            if chain.enable && chain.frequency_hz == 0 {
                return Err(LgwError::InvalidParameter(format!(
                    "radio chain {index} is enabled without a frequency"
                )));
            }
            if chain.single_input_mode && chain.chip != ChipFamily::Sx1250 {
                return Err(LgwError::InvalidParameter(format!(
                    "radio chain {index}: single input mode requires an SX1250"
                )));
            }
        }
        Ok(())
    }
}
