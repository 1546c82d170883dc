//! # Raspberry Pi Backend
//!
//! `rppal`-based transport and reset lines for a concentrator HAT wired to
//! the 40-pin header.
//!
//! ```text
//! Pi Pin │ BCM GPIO │ Concentrator │ Function
//! ───────┼──────────┼──────────────┼─────────────
//! 19     │ GPIO 10  │ MOSI         │ SPI data out
//! 21     │ GPIO 9   │ MISO         │ SPI data in
//! 23     │ GPIO 11  │ SCK          │ SPI clock
//! 24     │ GPIO 8   │ NSS          │ Chip select
//! 16     │ GPIO 23  │ RESET        │ Reset (output)
//! 12     │ GPIO 18  │ POWER_EN     │ Power enable (output, optional)
//! ```
//!
//! SPI must be enabled in `/boot/config.txt` (`dtparam=spi=on`).
//!
//! ```rust,no_run
//! use loragw_rs::config::BusConfig;
//! use loragw_rs::spi::raspberry_pi::{open_raspberry_pi, RaspberryPiPins};
//!
//! let (bus, mut reset) = open_raspberry_pi(&BusConfig::default(), &RaspberryPiPins::default())?;
//! # Ok::<(), loragw_rs::LgwError>(())
//! ```

use super::{open, BusHandle, SpiTransport};
use crate::config::BusConfig;
use crate::error::{LgwError, Result};
use crate::radio::sequencer::ResetPins;
use rppal::gpio::{Gpio, OutputPin};
use rppal::spi::{BitOrder, Bus, Mode, SlaveSelect, Spi};

/// Pin and bus assignment, BCM numbering
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaspberryPiPins {
    /// SPI controller, 0 or 1
    pub spi_bus: u8,
    pub reset: u8,
    pub power_enable: Option<u8>,
}

impl Default for RaspberryPiPins {
    fn default() -> Self {
        Self {
            spi_bus: 0,
            reset: 23,
            power_enable: Some(18),
        }
    }
}

/// SPI transport over `/dev/spidevN.0`
pub struct RaspberryPiSpi {
    spi: Spi,
}

impl RaspberryPiSpi {
    /// Opens an SPI controller in mode 0, MSB first.
    pub fn new(spi_bus: u8, clock_hz: u32) -> Result<Self> {
        let bus = match spi_bus {
            0 => Bus::Spi0,
            1 => Bus::Spi1,
            _ => {
                return Err(LgwError::BusInitError(format!(
                    "Invalid SPI bus {spi_bus}, only 0 and 1 are supported"
                )))
            }
        };
        let spi = Spi::new(bus, SlaveSelect::Ss0, clock_hz, Mode::Mode0)
            .map_err(|e| LgwError::BusInitError(e.to_string()))?;
        spi.set_bit_order(BitOrder::MsbFirst)
            .map_err(|e| LgwError::BusInitError(e.to_string()))?;
        log::info!("Raspberry Pi SPI{} opened at {} Hz", spi_bus, clock_hz);
        Ok(Self { spi })
    }
}

impl SpiTransport for RaspberryPiSpi {
    fn configure(&mut self, clock_hz: u32) -> Result<()> {
        self.spi
            .set_clock_speed(clock_hz)
            .map_err(|e| LgwError::BusInitError(e.to_string()))
    }

    fn transfer(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<()> {
        let count = self
            .spi
            .transfer(rx, tx)
            .map_err(|e| LgwError::TransferFailed(e.to_string()))?;
        if count != tx.len() {
            return Err(LgwError::TransferFailed(format!(
                "short transfer: {} of {} bytes",
                count,
                tx.len()
            )));
        }
        Ok(())
    }
}

/// Reset and power-enable GPIO lines
pub struct RaspberryPiResetPins {
    reset: OutputPin,
    power_enable: Option<OutputPin>,
}

impl RaspberryPiResetPins {
    pub fn new(pins: &RaspberryPiPins) -> Result<Self> {
        let gpio = Gpio::new().map_err(|e| LgwError::BusInitError(e.to_string()))?;
        let mut reset = gpio
            .get(pins.reset)
            .map_err(|e| LgwError::BusInitError(e.to_string()))?
            .into_output();
        reset.set_low();

        let power_enable = match pins.power_enable {
            Some(pin) => Some(
                gpio.get(pin)
                    .map_err(|e| LgwError::BusInitError(e.to_string()))?
                    .into_output(),
            ),
            None => None,
        };

        log::info!("  RESET: GPIO {}", pins.reset);
        if let Some(pin) = pins.power_enable {
            log::info!("  POWER_EN: GPIO {}", pin);
        }
        Ok(Self {
            reset,
            power_enable,
        })
    }
}

impl ResetPins for RaspberryPiResetPins {
    fn has_power_enable(&self) -> bool {
        self.power_enable.is_some()
    }

    fn set_power_enable(&mut self, high: bool) -> Result<()> {
        if let Some(pin) = self.power_enable.as_mut() {
            if high {
                pin.set_high();
            } else {
                pin.set_low();
            }
        }
        Ok(())
    }

    fn set_reset(&mut self, high: bool) -> Result<()> {
        if high {
            self.reset.set_high();
        } else {
            self.reset.set_low();
        }
        Ok(())
    }
}

/// Opens the concentrator bus and reset lines on a Raspberry Pi.
pub fn open_raspberry_pi(
    config: &BusConfig,
    pins: &RaspberryPiPins,
) -> Result<(BusHandle<RaspberryPiSpi>, RaspberryPiResetPins)> {
    let transport = RaspberryPiSpi::new(pins.spi_bus, config.clock_hz)?;
    let reset = RaspberryPiResetPins::new(pins)?;
    let bus = open(transport, config)?;
    Ok((bus, reset))
}
