//! # Radio Front-End Control
//!
//! Registers in the SX1302 core that power, reset and route the two radio
//! chains. They are driven before a radio is spoken to:
//!
//! 1. per enabled chain, the radio is enabled and pulsed out of reset
//!    ([`reset_radio`]) and the core is told which dialect the chain speaks
//!    ([`set_radio_mode`]);
//! 2. once for the board, the core switches from the SPI clock to the
//!    32 MHz clock of the chosen chain ([`select_clock`]).
//!
//! All fields are single bits inside shared core registers, so every write
//! is a read-modify-write under one bus lock.

use super::ChipFamily;
use crate::error::{LgwError, Result};
use crate::spi::addressing::MuxTarget;
use crate::spi::{BusHandle, SpiTransport};
use crate::timing::Delay;
use log::debug;

/// Time the radio reset line is held asserted
pub const RADIO_RESET_PULSE_MS: u32 = 500;

/// Settle time after releasing reset, and after the SX1250 re-assert
pub const RADIO_RESET_SETTLE_MS: u32 = 10;

/// A bit field inside one SX1302 core register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreField {
    pub address: u16,
    pub offset: u8,
    pub width: u8,
}

impl CoreField {
    pub const fn new(address: u16, offset: u8, width: u8) -> Self {
        Self {
            address,
            offset,
            width,
        }
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

    pub fn max_value(self) -> u8 {
        self.mask() >> self.offset
    }
}

/// Core register fields used for radio control
pub mod regs {
    use super::CoreField;

    pub const COMMON_CTRL0_CLK32_RIF_CTRL: CoreField = CoreField::new(0x5601, 4, 1);
    pub const COMMON_CTRL0_SX1261_MODE_RADIO_B: CoreField = CoreField::new(0x5601, 1, 1);
    pub const COMMON_CTRL0_SX1261_MODE_RADIO_A: CoreField = CoreField::new(0x5601, 0, 1);

    pub const CLK_CTRL_CLK_SEL_CLKDIV_EN: CoreField = CoreField::new(0x5F00, 2, 1);
    pub const CLK_CTRL_CLK_SEL_CLK_RADIO_B_SEL: CoreField = CoreField::new(0x5F00, 1, 1);
    pub const CLK_CTRL_CLK_SEL_CLK_RADIO_A_SEL: CoreField = CoreField::new(0x5F00, 0, 1);

    pub const AGC_MCU_RF_EN_A_RADIO_EN: CoreField = CoreField::new(0x5783, 1, 1);
    pub const AGC_MCU_RF_EN_A_RADIO_RST: CoreField = CoreField::new(0x5783, 0, 1);
    pub const AGC_MCU_RF_EN_B_RADIO_EN: CoreField = CoreField::new(0x5784, 1, 1);
    pub const AGC_MCU_RF_EN_B_RADIO_RST: CoreField = CoreField::new(0x5784, 0, 1);
}

/// Per-chain fields: `(radio enable, radio reset, SX1250 mode)`
fn chain_fields(chain: MuxTarget) -> Result<(CoreField, CoreField, CoreField)> {
    match chain {
        MuxTarget::RadioA => Ok((
            regs::AGC_MCU_RF_EN_A_RADIO_EN,
            regs::AGC_MCU_RF_EN_A_RADIO_RST,
            regs::COMMON_CTRL0_SX1261_MODE_RADIO_A,
        )),
        MuxTarget::RadioB => Ok((
            regs::AGC_MCU_RF_EN_B_RADIO_EN,
            regs::AGC_MCU_RF_EN_B_RADIO_RST,
            regs::COMMON_CTRL0_SX1261_MODE_RADIO_B,
        )),
        MuxTarget::Concentrator => Err(LgwError::InvalidParameter(
            "the concentrator is not a radio chain".to_string(),
        )),
    }
}

/// Writes one core field, leaving the other bits of its register intact.
pub fn write_core_field<T: SpiTransport>(
    bus: &BusHandle<T>,
    field: CoreField,
    value: u8,
) -> Result<()> {
    if value > field.max_value() {
        return Err(LgwError::InvalidParameter(format!(
            "value {value} does not fit {}-bit field at core register 0x{:04X}",
            field.width, field.address
        )));
    }
    let mut bus = bus.lock()?;
    let current = bus.read_register(MuxTarget::Concentrator, field.address)?;
    let merged = (current & !field.mask()) | ((value << field.offset) & field.mask());
    bus.write_register(MuxTarget::Concentrator, field.address, merged)
}

pub fn read_core_field<T: SpiTransport>(bus: &BusHandle<T>, field: CoreField) -> Result<u8> {
    let raw = bus.read_register(MuxTarget::Concentrator, field.address)?;
    Ok((raw & field.mask()) >> field.offset)
}

/// Enables a radio chain and pulses its reset line.
///
/// The core is switched back to the SPI clock first. An SX1250 is held with
/// reset asserted again afterwards, which lets it finish its automatic
/// calibration.
///
/// # Arguments
///
/// * `bus` - Shared concentrator bus
/// * `chain` - `RadioA` or `RadioB`
/// * `chip` - Chip fitted on the chain
/// * `delay` - Delay capability for the reset pulse
pub fn reset_radio<T: SpiTransport, D: Delay>(
    bus: &BusHandle<T>,
    chain: MuxTarget,
    chip: ChipFamily,
    mut delay: D,
) -> Result<()> {
    let (enable, reset, _) = chain_fields(chain)?;

    write_core_field(bus, regs::COMMON_CTRL0_CLK32_RIF_CTRL, 0)?;
    write_core_field(bus, enable, 1)?;

    write_core_field(bus, reset, 1)?;
    delay.delay_ms(RADIO_RESET_PULSE_MS);
    write_core_field(bus, reset, 0)?;
    delay.delay_ms(RADIO_RESET_SETTLE_MS);

    if chip.uses_opcodes() {
        write_core_field(bus, reset, 1)?;
        delay.delay_ms(RADIO_RESET_SETTLE_MS);
    }
    debug!("Radio {:?} ({:?}) reset done", chain, chip);
    Ok(())
}

/// Tells the core which dialect a chain speaks.
pub fn set_radio_mode<T: SpiTransport>(
    bus: &BusHandle<T>,
    chain: MuxTarget,
    chip: ChipFamily,
) -> Result<()> {
    let (_, _, mode) = chain_fields(chain)?;
    let value = u8::from(chip.uses_opcodes());
    debug!("Radio {:?} set to {:?} mode", chain, chip);
    write_core_field(bus, mode, value)
}

/// Switches the core from the SPI clock to the 32 MHz clock of `source`.
pub fn select_clock<T: SpiTransport>(bus: &BusHandle<T>, source: MuxTarget) -> Result<()> {
    let (a_sel, b_sel) = match source {
        MuxTarget::RadioA => (1, 0),
        MuxTarget::RadioB => (0, 1),
        MuxTarget::Concentrator => {
            return Err(LgwError::InvalidParameter(
                "the clock must come from a radio chain".to_string(),
            ))
        }
    };
    debug!("Concentrator clock taken from {:?}", source);
    write_core_field(bus, regs::CLK_CTRL_CLK_SEL_CLK_RADIO_A_SEL, a_sel)?;
    write_core_field(bus, regs::CLK_CTRL_CLK_SEL_CLK_RADIO_B_SEL, b_sel)?;
    write_core_field(bus, regs::CLK_CTRL_CLK_SEL_CLKDIV_EN, 1)?;
    write_core_field(bus, regs::COMMON_CTRL0_CLK32_RIF_CTRL, 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BusConfig;
    use crate::spi::{self, mock::MockSpiBus};

    #[derive(Default)]
    struct RecordingDelay(Vec<u32>);

    impl Delay for RecordingDelay {
        fn delay_ms(&mut self, ms: u32) {
            self.0.push(ms);
        }
    }

    fn open_mock() -> (MockSpiBus, BusHandle<MockSpiBus>) {
        let mock = MockSpiBus::new();
        let bus = spi::open(mock.clone(), &BusConfig::default()).unwrap();
        (mock, bus)
    }

    #[test]
    fn test_field_write_keeps_neighbour_bits() {
        let (mock, bus) = open_mock();
        mock.set_register(0x5601, 0b1111_1110);
        write_core_field(&bus, regs::COMMON_CTRL0_SX1261_MODE_RADIO_A, 1).unwrap();
        assert_eq!(mock.register(0x5601), 0xFF);
        write_core_field(&bus, regs::COMMON_CTRL0_CLK32_RIF_CTRL, 0).unwrap();
        assert_eq!(mock.register(0x5601), 0xEF);
        let mode_b = read_core_field(&bus, regs::COMMON_CTRL0_SX1261_MODE_RADIO_B).unwrap();
        assert_eq!(mode_b, 1);
    }

    #[test]
    fn test_oversized_field_value_sends_nothing() {
        let (mock, bus) = open_mock();
        assert!(matches!(
            write_core_field(&bus, regs::AGC_MCU_RF_EN_A_RADIO_EN, 2),
            Err(LgwError::InvalidParameter(_))
        ));
        assert_eq!(mock.transaction_count(), 0);
    }

    #[test]
    fn test_sx1250_reset_sequence() {
        let (mock, bus) = open_mock();
        mock.set_register(0x5601, 0x10);
        let mut delay = RecordingDelay::default();
        reset_radio(&bus, MuxTarget::RadioB, ChipFamily::Sx1250, &mut delay).unwrap();

        assert_eq!(
            mock.register_writes(MuxTarget::Concentrator),
            vec![
                (0x5601, 0x00),
                (0x5784, 0x02),
                (0x5784, 0x03),
                (0x5784, 0x02),
                (0x5784, 0x03),
            ]
        );
        assert_eq!(delay.0, vec![500, 10, 10]);
        // Radio A untouched
        assert_eq!(mock.register(0x5783), 0x00);
    }

    #[test]
    fn test_sx125x_reset_is_released() {
        let (mock, bus) = open_mock();
        let mut delay = RecordingDelay::default();
        reset_radio(&bus, MuxTarget::RadioA, ChipFamily::Sx1257, &mut delay).unwrap();
        assert_eq!(read_core_field(&bus, regs::AGC_MCU_RF_EN_A_RADIO_EN).unwrap(), 1);
        assert_eq!(read_core_field(&bus, regs::AGC_MCU_RF_EN_A_RADIO_RST).unwrap(), 0);
        assert_eq!(delay.0, vec![500, 10]);
    }

    #[test]
    fn test_radio_mode_bits() {
        let (mock, bus) = open_mock();
        set_radio_mode(&bus, MuxTarget::RadioA, ChipFamily::Sx1250).unwrap();
        set_radio_mode(&bus, MuxTarget::RadioB, ChipFamily::Sx1255).unwrap();
        assert_eq!(mock.register(0x5601) & 0x03, 0x01);
    }

    #[test]
    fn test_clock_select_order() {
        let (mock, bus) = open_mock();
        select_clock(&bus, MuxTarget::RadioB).unwrap();
        assert_eq!(
            mock.register_writes(MuxTarget::Concentrator),
            vec![(0x5F00, 0x00), (0x5F00, 0x02), (0x5F00, 0x06), (0x5601, 0x10)]
        );
    }

    #[test]
    fn test_concentrator_is_not_a_chain() {
        let (mock, bus) = open_mock();
        let delay = RecordingDelay::default();
        assert!(reset_radio(&bus, MuxTarget::Concentrator, ChipFamily::Sx1250, delay).is_err());
        assert!(select_clock(&bus, MuxTarget::Concentrator).is_err());
        assert_eq!(mock.transaction_count(), 0);
    }
}
