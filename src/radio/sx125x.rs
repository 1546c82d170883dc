//! # SX1255 / SX1257 Register Protocol
//!
//! The older radio front-ends expose a flat 7-bit register map. Every access
//! is a single-byte register frame on the chain's mux target; fields narrower
//! than a byte are written with read-modify-write and every write is read back
//! to confirm the chip accepted it.

use super::ChipFamily;
use crate::error::{LgwError, Result};
use crate::spi::addressing::MuxTarget;
use crate::spi::{BusHandle, SpiTransport};
use crate::timing::Delay;
use log::{debug, error, info, trace};

/// Frequency step unit with the 32 MHz reference
pub const FRAC_32MHZ: u32 = 15625;

/// PLL start attempts before giving up
pub const PLL_LOCK_MAX_ATTEMPTS: u8 = 5;

/// MODE_STATUS bit set once the RX PLL is locked
pub const RX_PLL_LOCKED: u8 = 0x02;

/// A bit field inside one SX125x register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegField {
    pub address: u8,
    pub offset: u8,
    pub width: u8,
}

impl RegField {
    pub const fn new(address: u8, offset: u8, width: u8) -> Self {
        Self {
            address,
            offset,
            width,
        }
    }

    /// Whether the field covers the whole register.
    pub fn is_full_byte(self) -> bool {
        self.offset == 0 && self.width == 8
    }

    /// Mask of the field bits in place.
    pub fn mask(self) -> u8 {
        let bits = if self.width >= 8 {
            0xFF
        } else {
            (1u8 << self.width) - 1
        };
        bits << self.offset
    }

    /// Largest value the field can hold.
    pub fn max_value(self) -> u8 {
        self.mask() >> self.offset
    }
}

/// Register fields used at bring-up
pub mod regs {
    use super::RegField;

    pub const MODE: RegField = RegField::new(0, 0, 8);
    pub const FRF_RX_MSB: RegField = RegField::new(1, 0, 8);
    pub const FRF_RX_MID: RegField = RegField::new(2, 0, 8);
    pub const FRF_RX_LSB: RegField = RegField::new(3, 0, 8);
    pub const VERSION: RegField = RegField::new(7, 0, 8);
    pub const TX_GAIN_DAC_GAIN: RegField = RegField::new(8, 4, 3);
    pub const TX_GAIN_MIX_GAIN: RegField = RegField::new(8, 0, 4);
    pub const TX_BW_PLL_BW: RegField = RegField::new(10, 5, 2);
    pub const TX_BW_ANA_BW: RegField = RegField::new(10, 0, 5);
    pub const TX_DAC_BW: RegField = RegField::new(11, 0, 8);
    pub const RX_ANA_GAIN_LNA_GAIN: RegField = RegField::new(12, 5, 3);
    pub const RX_ANA_GAIN_BB_GAIN: RegField = RegField::new(12, 1, 4);
    pub const RX_ANA_GAIN_LNA_ZIN: RegField = RegField::new(12, 0, 1);
    pub const RX_BW_ADC_BW: RegField = RegField::new(13, 5, 3);
    pub const RX_BW_ADC_TRIM: RegField = RegField::new(13, 2, 3);
    pub const RX_BW_BB_BW: RegField = RegField::new(13, 0, 2);
    pub const RX_PLL_BW_PLL_BW: RegField = RegField::new(14, 1, 2);
    pub const RX_PLL_BW_ADC_TEMP_EN: RegField = RegField::new(14, 0, 1);
    pub const CLK_SELECT: RegField = RegField::new(16, 0, 8);
    pub const MODE_STATUS: RegField = RegField::new(17, 0, 8);
    pub const SX1257_XOSC_DISABLE: RegField = RegField::new(38, 4, 3);
    pub const SX1257_XOSC_GM_STARTUP: RegField = RegField::new(38, 0, 4);
    pub const SX1255_XOSC_DISABLE: RegField = RegField::new(40, 4, 3);
    pub const SX1255_XOSC_GM_STARTUP: RegField = RegField::new(40, 0, 4);
}

/// Default analog trims applied at bring-up
pub mod defaults {
    pub const TX_DAC_CLK_SEL: u8 = 0;
    pub const TX_DAC_GAIN: u8 = 2;
    pub const TX_MIX_GAIN: u8 = 14;
    pub const TX_PLL_BW: u8 = 1;
    pub const TX_ANA_BW: u8 = 0;
    pub const TX_DAC_BW: u8 = 5;
    pub const RX_LNA_GAIN: u8 = 1;
    pub const RX_BB_GAIN: u8 = 15;
    pub const LNA_ZIN: u8 = 0;
    pub const RX_ADC_BW: u8 = 7;
    pub const RX_ADC_TRIM: u8 = 6;
    pub const RX_BB_BW: u8 = 0;
    pub const RX_PLL_BW: u8 = 0;
    pub const ADC_TEMP: u8 = 0;
    pub const XOSC_GM_STARTUP: u8 = 13;
    pub const XOSC_DISABLE: u8 = 2;
}

/// RX PLL frequency split into the three FRF_RX bytes.
///
/// # Arguments
///
/// * `chip` - SX1255 or SX1257
/// * `freq_hz` - Target frequency in Hz
///
/// # Returns
///
/// * `Ok([msb, mid, lsb])` - Register values
/// * `Err(LgwError::InvalidParameter)` - `chip` is not an SX125x
pub fn pll_frequency(chip: ChipFamily, freq_hz: u32) -> Result<[u8; 3]> {
    let (int_shift, frac_shift) = match chip {
        ChipFamily::Sx1255 => (7, 9),
        ChipFamily::Sx1257 => (8, 8),
        ChipFamily::Sx1250 => {
            return Err(LgwError::InvalidParameter(
                "SX1250 has no SX125x PLL registers".to_string(),
            ))
        }
    };
    let step = u64::from(FRAC_32MHZ) << int_shift;
    let freq = u64::from(freq_hz);
    let part_int = freq / step;
    let part_frac = ((freq % step) << frac_shift) / u64::from(FRAC_32MHZ);
    Ok([part_int as u8, (part_frac >> 8) as u8, part_frac as u8])
}

/// Flat register protocol for one SX1255/SX1257 radio chain
pub struct Sx125x<'a, T: SpiTransport, D: Delay> {
    bus: &'a BusHandle<T>,
    target: MuxTarget,
    chip: ChipFamily,
    delay: D,
}

impl<'a, T: SpiTransport, D: Delay> Sx125x<'a, T, D> {
    /// Binds the protocol to a radio target.
    ///
    /// Fails with `InvalidParameter` when `chip` is an SX1250.
    pub fn new(bus: &'a BusHandle<T>, target: MuxTarget, chip: ChipFamily, delay: D) -> Result<Self> {
        if chip.uses_opcodes() {
            return Err(LgwError::InvalidParameter(format!(
                "{chip:?} is not driven through flat registers"
            )));
        }
        Ok(Self {
            bus,
            target,
            chip,
            delay,
        })
    }

    pub fn target(&self) -> MuxTarget {
        self.target
    }

    pub fn chip(&self) -> ChipFamily {
        self.chip
    }

    /// Reads one whole register.
    pub fn read(&mut self, address: u8) -> Result<u8> {
        self.bus.read_register(self.target, u16::from(address))
    }

    /// Writes one whole register without verification.
    pub fn write(&mut self, address: u8, value: u8) -> Result<()> {
        self.bus.write_register(self.target, u16::from(address), value)
    }

    pub fn read_field(&mut self, field: RegField) -> Result<u8> {
        let raw = self.read(field.address)?;
        Ok((raw & field.mask()) >> field.offset)
    }

    /// Writes a field and reads it back.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - The chip holds `value`
    /// * `Err(LgwError::InvalidParameter)` - `value` does not fit the field, nothing sent
    /// * `Err(LgwError::RegisterVerificationFailed)` - Read-back differs
    pub fn write_field(&mut self, field: RegField, value: u8) -> Result<()> {
        if value > field.max_value() {
            return Err(LgwError::InvalidParameter(format!(
                "value {value} does not fit {}-bit field at register {}",
                field.width, field.address
            )));
        }

        if field.is_full_byte() {
            self.write(field.address, value)?;
        } else {
            let current = self.read(field.address)?;
            let merged = (current & !field.mask()) | ((value << field.offset) & field.mask());
            self.write(field.address, merged)?;
        }

        let check = self.read_field(field)?;
        if check != value {
            error!(
                "SX125x {:?} register {} write failed (w:{} r:{})",
                self.target, field.address, value, check
            );
            return Err(LgwError::RegisterVerificationFailed {
                address: field.address,
                written: value,
                read: check,
            });
        }
        Ok(())
    }

    /// Reads the silicon version register.
    pub fn version(&mut self) -> Result<u8> {
        let version = self.read_field(regs::VERSION)?;
        debug!("SX125x {:?} version 0x{:02X}", self.target, version);
        Ok(version)
    }

    /// Applies clock routing and XOSC trims. Leaves the chip in standby.
    pub fn configure_clock(&mut self, clock_output: bool) -> Result<()> {
        let clk_select = if clock_output {
            defaults::TX_DAC_CLK_SEL + 2
        } else {
            defaults::TX_DAC_CLK_SEL
        };
        self.write_field(regs::CLK_SELECT, clk_select)?;
        debug!(
            "SX125x {:?} clock output {}",
            self.target,
            if clock_output { "enabled" } else { "disabled" }
        );

        let (gm_startup, disable) = match self.chip {
            ChipFamily::Sx1255 => (regs::SX1255_XOSC_GM_STARTUP, regs::SX1255_XOSC_DISABLE),
            _ => (regs::SX1257_XOSC_GM_STARTUP, regs::SX1257_XOSC_DISABLE),
        };
        self.write_field(gm_startup, defaults::XOSC_GM_STARTUP)?;
        self.write_field(disable, defaults::XOSC_DISABLE)
    }

    /// Writes the TX and RX analog trims.
    pub fn configure_trims(&mut self) -> Result<()> {
        let trims = [
            (regs::TX_GAIN_MIX_GAIN, defaults::TX_MIX_GAIN),
            (regs::TX_GAIN_DAC_GAIN, defaults::TX_DAC_GAIN),
            (regs::TX_BW_ANA_BW, defaults::TX_ANA_BW),
            (regs::TX_BW_PLL_BW, defaults::TX_PLL_BW),
            (regs::TX_DAC_BW, defaults::TX_DAC_BW),
            (regs::RX_ANA_GAIN_LNA_ZIN, defaults::LNA_ZIN),
            (regs::RX_ANA_GAIN_BB_GAIN, defaults::RX_BB_GAIN),
            (regs::RX_ANA_GAIN_LNA_GAIN, defaults::RX_LNA_GAIN),
            (regs::RX_BW_BB_BW, defaults::RX_BB_BW),
            (regs::RX_BW_ADC_TRIM, defaults::RX_ADC_TRIM),
            (regs::RX_BW_ADC_BW, defaults::RX_ADC_BW),
            (regs::RX_PLL_BW_ADC_TEMP_EN, defaults::ADC_TEMP),
            (regs::RX_PLL_BW_PLL_BW, defaults::RX_PLL_BW),
        ];
        for (field, value) in trims {
            self.write_field(field, value)?;
        }
        Ok(())
    }

    pub fn set_rx_frequency(&mut self, freq_hz: u32) -> Result<()> {
        let [msb, mid, lsb] = pll_frequency(self.chip, freq_hz)?;
        self.write_field(regs::FRF_RX_MSB, msb)?;
        self.write_field(regs::FRF_RX_MID, mid)?;
        self.write_field(regs::FRF_RX_LSB, lsb)
    }

    /// Starts the chip and waits for the RX PLL to lock.
    ///
    /// Returns the number of attempts used.
    pub fn start_pll(&mut self) -> Result<u8> {
        for attempt in 1..=PLL_LOCK_MAX_ATTEMPTS {
            self.write_field(regs::MODE, 1)?;
            self.write_field(regs::MODE, 3)?;
            trace!("SX125x {:?} PLL start (attempt {})", self.target, attempt);
            self.delay.delay_ms(1);
            let status = self.read_field(regs::MODE_STATUS)?;
            if status & RX_PLL_LOCKED != 0 {
                return Ok(attempt);
            }
        }
        error!("SX125x {:?} failed to lock PLL", self.target);
        Err(LgwError::PllLockFailed {
            attempts: PLL_LOCK_MAX_ATTEMPTS,
        })
    }

    /// Full setup of one chain.
    ///
    /// A disabled chain only gets clock routing and XOSC trims and stays in
    /// standby.
    pub fn setup(&mut self, clock_output: bool, enable: bool, freq_hz: u32) -> Result<()> {
        self.version()?;
        self.configure_clock(clock_output)?;
        if !enable {
            debug!("SX125x {:?} kept in standby mode", self.target);
            return Ok(());
        }
        self.configure_trims()?;
        self.set_rx_frequency(freq_hz)?;
        let attempts = self.start_pll()?;
        info!(
            "SX125x {:?} PLL locked at {} Hz after {} attempt(s)",
            self.target, freq_hz, attempts
        );
        Ok(())
    }
}
