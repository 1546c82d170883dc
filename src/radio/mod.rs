//! # Radio Front-Ends
//!
//! The SX1302 concentrator drives two radio chains through the SPI mux. Two
//! chip families can be fitted, each with its own command dialect:
//!
//! - **SX1250**: opcode-driven commands ([`sx1250`])
//! - **SX1255 / SX1257**: flat single-register access ([`sx125x`])
//!
//! The dialect is chosen from the chip family when a chain is configured and
//! dispatched through [`RadioDialect`]; the bring-up state machine lives in
//! [`sequencer`]. Enabling, resetting and clocking the chains from the
//! concentrator side is in [`frontend`].

pub mod frontend;
pub mod sequencer;
pub mod sx1250;
pub mod sx125x;

use crate::error::{LgwError, Result};
use crate::spi::addressing::MuxTarget;
use crate::spi::{BusHandle, SpiTransport};
use crate::timing::Delay;
use serde::{Deserialize, Serialize};
use sx1250::Sx1250;
use sx125x::Sx125x;

/// Radio chip fitted on a chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChipFamily {
    Sx1250,
    Sx1255,
    Sx1257,
}

impl ChipFamily {
    /// Whether this chip is driven through opcode commands.
    pub fn uses_opcodes(self) -> bool {
        matches!(self, ChipFamily::Sx1250)
    }
}

/// Command dialect bound to one radio chain
pub enum RadioDialect<'a, T: SpiTransport, D: Delay> {
    /// SX1250 opcode protocol
    Opcode(Sx1250<'a, T, D>),
    /// SX1255 / SX1257 register protocol
    FlatRegister(Sx125x<'a, T, D>),
}

impl<'a, T: SpiTransport, D: Delay> RadioDialect<'a, T, D> {
    /// Binds the dialect matching `chip` to a radio target.
    pub fn for_chain(
        bus: &'a BusHandle<T>,
        target: MuxTarget,
        chip: ChipFamily,
        delay: D,
    ) -> Result<Self> {
        if target.chain_index().is_none() {
            return Err(LgwError::InvalidParameter(
                "the concentrator core is not a radio chain".to_string(),
            ));
        }
        Ok(match chip {
            ChipFamily::Sx1250 => RadioDialect::Opcode(Sx1250::new(bus, target, delay)),
            ChipFamily::Sx1255 | ChipFamily::Sx1257 => {
                RadioDialect::FlatRegister(Sx125x::new(bus, target, chip, delay)?)
            }
        })
    }

    pub fn target(&self) -> MuxTarget {
        match self {
            RadioDialect::Opcode(radio) => radio.target(),
            RadioDialect::FlatRegister(radio) => radio.target(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BusConfig;
    use crate::spi::{self, mock::MockSpiBus};
    use crate::timing::ThreadDelay;

    #[test]
    fn test_dialect_follows_chip() {
        let bus = spi::open(MockSpiBus::new(), &BusConfig::default()).unwrap();
        let dialect =
            RadioDialect::for_chain(&bus, MuxTarget::RadioA, ChipFamily::Sx1250, ThreadDelay)
                .unwrap();
        assert!(matches!(dialect, RadioDialect::Opcode(_)));

        let dialect =
            RadioDialect::for_chain(&bus, MuxTarget::RadioB, ChipFamily::Sx1257, ThreadDelay)
                .unwrap();
        assert!(matches!(dialect, RadioDialect::FlatRegister(_)));
        assert_eq!(dialect.target(), MuxTarget::RadioB);
    }

    #[test]
    fn test_concentrator_is_not_a_chain() {
        let bus = spi::open(MockSpiBus::new(), &BusConfig::default()).unwrap();
        assert!(RadioDialect::for_chain(
            &bus,
            MuxTarget::Concentrator,
            ChipFamily::Sx1250,
            ThreadDelay
        )
        .is_err());
    }
}
