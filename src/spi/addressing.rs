//! # Device Addressing
//!
//! Stateless mapping from a logical target and a register address or chip
//! opcode onto the framing bytes that lead every SPI transaction.
//!
//! ```text
//! register frame:  [target][dir<<7 | addr[14:8]][addr[7:0]]
//! opcode frame:    [target][dir byte 0x80 / 0x00][opcode]
//! ```
//!
//! Within one addressing mode the encoding is injective. Across modes it is
//! not: an opcode write frame is byte-identical to a register write frame at
//! address `0x00nn` on the same target. The mode used on a target is fixed by
//! the chip family wired to it, so the two modes never share a target on a
//! given board.

use crate::error::{LgwError, Result};
use serde::{Deserialize, Serialize};

/// Direction bit in the 16-bit register address field
pub const WRITE_ACCESS: u16 = 0x8000;
/// Read is signalled by a clear direction bit
pub const READ_ACCESS: u16 = 0x0000;
/// Register index bits
pub const ADDR_MASK: u16 = 0x7FFF;

/// Length of every frame header in bytes
pub const HEADER_LEN: usize = 3;

/// Which device on the shared bus a transaction addresses
///
/// The target alone does not say how the rest of a frame is laid out. A
/// radio target carries opcode frames or register frames depending on the
/// chip dialect configured for that chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MuxTarget {
    /// The SX1302 concentrator core
    Concentrator = 0,
    /// Radio chain A
    RadioA = 1,
    /// Radio chain B
    RadioB = 2,
}

impl MuxTarget {
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Radio chain index (0 for A, 1 for B), `None` for the concentrator.
    pub fn chain_index(self) -> Option<usize> {
        match self {
            MuxTarget::Concentrator => None,
            MuxTarget::RadioA => Some(0),
            MuxTarget::RadioB => Some(1),
        }
    }

    /// The radio target for a chain index.
    pub fn radio(index: usize) -> Result<Self> {
        match index {
            0 => Ok(MuxTarget::RadioA),
            1 => Ok(MuxTarget::RadioB),
            _ => Err(LgwError::InvalidParameter(format!(
                "radio chain {index} does not exist"
            ))),
        }
    }
}

impl TryFrom<u8> for MuxTarget {
    type Error = LgwError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(MuxTarget::Concentrator),
            1 => Ok(MuxTarget::RadioA),
            2 => Ok(MuxTarget::RadioB),
            _ => Err(LgwError::InvalidParameter(format!(
                "unknown mux target 0x{value:02X}"
            ))),
        }
    }
}

/// Transfer direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    Read,
    Write,
}

impl Access {
    fn direction_bit(self) -> u16 {
        match self {
            Access::Read => READ_ACCESS,
            Access::Write => WRITE_ACCESS,
        }
    }
}

/// A 15-bit register index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegisterAddress(u16);

impl RegisterAddress {
    /// Creates an address, rejecting values that use the direction bit.
    pub fn new(addr: u16) -> Result<Self> {
        if addr & !ADDR_MASK != 0 {
            return Err(LgwError::InvalidParameter(format!(
                "register address 0x{addr:04X} exceeds 15 bits"
            )));
        }
        Ok(RegisterAddress(addr))
    }

    pub fn value(self) -> u16 {
        self.0
    }
}

impl TryFrom<u16> for RegisterAddress {
    type Error = LgwError;

    fn try_from(addr: u16) -> Result<Self> {
        RegisterAddress::new(addr)
    }
}

/// Encodes a register frame header.
pub fn encode_register_header(
    target: MuxTarget,
    address: RegisterAddress,
    access: Access,
) -> [u8; HEADER_LEN] {
    let field = access.direction_bit() | (address.value() & ADDR_MASK);
    [target.as_byte(), (field >> 8) as u8, field as u8]
}

/// Encodes an opcode frame header.
pub fn encode_opcode_header(target: MuxTarget, opcode: u8, access: Access) -> [u8; HEADER_LEN] {
    let dir = (access.direction_bit() >> 8) as u8;
    [target.as_byte(), dir, opcode]
}

/// Recovers `(target, address, access)` from the start of a register frame.
///
/// Returns `None` for short input or an unknown target byte.
pub fn decode_register_header(frame: &[u8]) -> Option<(MuxTarget, RegisterAddress, Access)> {
    let header = frame.get(..HEADER_LEN)?;
    let target = MuxTarget::try_from(header[0]).ok()?;
    let field = u16::from_be_bytes([header[1], header[2]]);
    let access = if field & WRITE_ACCESS != 0 {
        Access::Write
    } else {
        Access::Read
    };
    Some((target, RegisterAddress(field & ADDR_MASK), access))
}

/// Recovers `(target, opcode, access)` from the start of an opcode frame.
///
/// Returns `None` for short input, an unknown target, or a direction byte
/// other than 0x00 / 0x80.
pub fn decode_opcode_header(frame: &[u8]) -> Option<(MuxTarget, u8, Access)> {
    let header = frame.get(..HEADER_LEN)?;
    let target = MuxTarget::try_from(header[0]).ok()?;
    let access = match header[1] {
        0x80 => Access::Write,
        0x00 => Access::Read,
        _ => return None,
    };
    Some((target, header[2], access))
}
