//! # SX1250 Opcode Command Protocol
//!
//! The SX1250 is driven with vendor opcodes instead of flat registers. Every
//! command is preceded by a 1 ms settle delay standing in for the BUSY line,
//! which the concentrator does not route to the host.
//!
//! Read commands clock back one byte per byte sent after the header. The
//! bytes received while the header is shifted out are dropped, so the chip
//! status byte is always the first byte returned.
//!
//! ```rust,no_run
//! use loragw_rs::radio::sx1250::{OpCode, Sx1250};
//! use loragw_rs::spi::{self, addressing::MuxTarget, mock::MockSpiBus};
//! use loragw_rs::timing::ThreadDelay;
//!
//! let bus = spi::open(MockSpiBus::new(), &Default::default())?;
//! let mut radio = Sx1250::new(&bus, MuxTarget::RadioA, ThreadDelay);
//! radio.write_command(OpCode::SetStandby, &[0x00])?;
//! let status = radio.get_status()?;
//! # Ok::<(), loragw_rs::LgwError>(())
//! ```

use crate::error::{LgwError, Result};
use crate::spi::addressing::MuxTarget;
use crate::spi::{BusHandle, SpiTransport};
use crate::timing::Delay;
use bitflags::bitflags;
use log::{trace, warn};

/// Wait before every command, in place of polling BUSY
pub const SETTLE_DELAY_MS: u32 = 1;

/// Crystal frequency of the SX1250
pub const XTAL_FREQ_HZ: u64 = 32_000_000;

/// SX1250 command opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    ClrIrqStatus = 0x02,
    SetDioIrqParams = 0x08,
    WriteRegister = 0x0D,
    WriteBuffer = 0x0E,
    GetIrqStatus = 0x12,
    GetRxBufferStatus = 0x13,
    GetPacketStatus = 0x14,
    GetDeviceErrors = 0x17,
    ReadRegister = 0x1D,
    ReadBuffer = 0x1E,
    SetStandby = 0x80,
    SetRx = 0x82,
    SetTx = 0x83,
    SetSleep = 0x84,
    SetRfFrequency = 0x86,
    Calibrate = 0x89,
    SetPacketType = 0x8A,
    SetModulationParams = 0x8B,
    SetPacketParams = 0x8C,
    SetTxParams = 0x8E,
    SetBufferBaseAddress = 0x8F,
    SetPaConfig = 0x95,
    SetRegulatorMode = 0x96,
    CalibrateImage = 0x98,
    SetRfSwitchMode = 0x9D,
    StopTimerOnPreamble = 0x9F,
    GetStatus = 0xC0,
    SetFs = 0xC1,
    SetTxContinuousWave = 0xD1,
    SetTxContinuousPreamble = 0xD2,
}

impl OpCode {
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Whether the command carries at least one parameter byte.
    pub fn requires_payload(self) -> bool {
        !matches!(
            self,
            OpCode::SetFs | OpCode::SetTxContinuousWave | OpCode::SetTxContinuousPreamble
        )
    }
}

impl TryFrom<u8> for OpCode {
    type Error = LgwError;

    fn try_from(value: u8) -> Result<Self> {
        use OpCode::*;
        let op = match value {
            0x02 => ClrIrqStatus,
            0x08 => SetDioIrqParams,
            0x0D => WriteRegister,
            0x0E => WriteBuffer,
            0x12 => GetIrqStatus,
            0x13 => GetRxBufferStatus,
            0x14 => GetPacketStatus,
            0x17 => GetDeviceErrors,
            0x1D => ReadRegister,
            0x1E => ReadBuffer,
            0x80 => SetStandby,
            0x82 => SetRx,
            0x83 => SetTx,
            0x84 => SetSleep,
            0x86 => SetRfFrequency,
            0x89 => Calibrate,
            0x8A => SetPacketType,
            0x8B => SetModulationParams,
            0x8C => SetPacketParams,
            0x8E => SetTxParams,
            0x8F => SetBufferBaseAddress,
            0x95 => SetPaConfig,
            0x96 => SetRegulatorMode,
            0x98 => CalibrateImage,
            0x9D => SetRfSwitchMode,
            0x9F => StopTimerOnPreamble,
            0xC0 => GetStatus,
            0xC1 => SetFs,
            0xD1 => SetTxContinuousWave,
            0xD2 => SetTxContinuousPreamble,
            _ => {
                return Err(LgwError::InvalidParameter(format!(
                    "unknown SX1250 opcode 0x{value:02X}"
                )))
            }
        };
        Ok(op)
    }
}

/// Standby clock selection for `SetStandby`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StandbyMode {
    /// 13 MHz RC oscillator
    Rc = 0x00,
    /// 32 MHz crystal oscillator
    Xosc = 0x01,
}

/// Chip mode reported in status bits [6:4]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChipMode {
    StandbyRc = 0x2,
    StandbyXosc = 0x3,
    FreqSynth = 0x4,
    Rx = 0x5,
    Tx = 0x6,
}

impl ChipMode {
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Decoded SX1250 status byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status(pub u8);

impl Status {
    /// Raw chip mode field, bits [6:4].
    pub fn mode_bits(self) -> u8 {
        (self.0 >> 4) & 0x07
    }

    /// Raw command status field, bits [3:1].
    pub fn command_status(self) -> u8 {
        (self.0 >> 1) & 0x07
    }

    pub fn mode(self) -> Option<ChipMode> {
        match self.mode_bits() {
            0x2 => Some(ChipMode::StandbyRc),
            0x3 => Some(ChipMode::StandbyXosc),
            0x4 => Some(ChipMode::FreqSynth),
            0x5 => Some(ChipMode::Rx),
            0x6 => Some(ChipMode::Tx),
            _ => None,
        }
    }
}

bitflags! {
    /// Device error word returned by `GetDeviceErrors`
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct DeviceErrors: u16 {
        const RC64K_CALIB = 0x0001;
        const RC13M_CALIB = 0x0002;
        const PLL_CALIB   = 0x0004;
        const ADC_CALIB   = 0x0008;
        const IMG_CALIB   = 0x0010;
        const XOSC_START  = 0x0020;
        const PLL_LOCK    = 0x0040;
        const PA_RAMP     = 0x0100;
    }
}

bitflags! {
    /// Block selection for the `Calibrate` command
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct CalibParams: u8 {
        const RC64K      = 0b0000_0001;
        const RC13M      = 0b0000_0010;
        const PLL        = 0b0000_0100;
        const ADC_PULSE  = 0b0000_1000;
        const ADC_BULK_N = 0b0001_0000;
        const ADC_BULK_P = 0b0010_0000;
        const IMAGE      = 0b0100_0000;
        /// All blocks, as used at bring-up
        const ALL        = 0b0111_1111;
    }
}

/// Converts a frequency to the `SetRfFrequency` register value.
///
/// `round(freq_hz * 2^25 / 32 MHz)`
pub fn freq_to_reg(freq_hz: u32) -> u32 {
    let scaled = (u64::from(freq_hz) << 25) + XTAL_FREQ_HZ / 2;
    (scaled / XTAL_FREQ_HZ) as u32
}

/// Opcode protocol for one SX1250 radio chain
pub struct Sx1250<'a, T: SpiTransport, D: Delay> {
    bus: &'a BusHandle<T>,
    target: MuxTarget,
    delay: D,
}

impl<'a, T: SpiTransport, D: Delay> Sx1250<'a, T, D> {
    pub fn new(bus: &'a BusHandle<T>, target: MuxTarget, delay: D) -> Self {
        Self { bus, target, delay }
    }

    pub fn target(&self) -> MuxTarget {
        self.target
    }

    /// Blocks through the injected delay.
    pub fn wait_ms(&mut self, ms: u32) {
        self.delay.delay_ms(ms);
    }

    /// Waits the settle delay, then issues a write command.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - Command sent
    /// * `Err(LgwError::NullArgument)` - The opcode needs parameters and `data` is empty
    /// * `Err(LgwError::PayloadTooLarge)` - `data` does not fit one transaction
    pub fn write_command(&mut self, opcode: OpCode, data: &[u8]) -> Result<()> {
        self.delay.delay_ms(SETTLE_DELAY_MS);
        if data.is_empty() && opcode.requires_payload() {
            return Err(LgwError::NullArgument {
                opcode: opcode.as_byte(),
            });
        }
        trace!("SX1250 {:?} write {:?}: {} bytes", self.target, opcode, data.len());
        self.bus.command_write(self.target, opcode.as_byte(), data)
    }

    /// Waits the settle delay, then issues a read command.
    ///
    /// `data` holds the parameters to send and is overwritten with the
    /// response; `data[0]` becomes the status byte.
    pub fn read_command(&mut self, opcode: OpCode, data: &mut [u8]) -> Result<()> {
        self.delay.delay_ms(SETTLE_DELAY_MS);
        if data.is_empty() {
            return Err(LgwError::NullArgument {
                opcode: opcode.as_byte(),
            });
        }
        trace!("SX1250 {:?} read {:?}: {} bytes", self.target, opcode, data.len());
        self.bus.command_read(self.target, opcode.as_byte(), data)
    }

    pub fn get_status(&mut self) -> Result<Status> {
        let mut buf = [0u8; 1];
        self.read_command(OpCode::GetStatus, &mut buf)?;
        Ok(Status(buf[0]))
    }

    pub fn get_device_errors(&mut self) -> Result<DeviceErrors> {
        let mut buf = [0u8; 3];
        self.read_command(OpCode::GetDeviceErrors, &mut buf)?;
        let word = u16::from_be_bytes([buf[1], buf[2]]);
        let errors = DeviceErrors::from_bits_retain(word);
        if !errors.is_empty() {
            warn!("SX1250 {:?} device errors: {:?}", self.target, errors);
        }
        Ok(errors)
    }

    pub fn set_standby(&mut self, mode: StandbyMode) -> Result<()> {
        self.write_command(OpCode::SetStandby, &[mode as u8])
    }

    pub fn calibrate(&mut self, blocks: CalibParams) -> Result<()> {
        self.write_command(OpCode::Calibrate, &[blocks.bits()])
    }

    /// Writes bytes starting at a 16-bit radio register.
    pub fn write_register(&mut self, address: u16, values: &[u8]) -> Result<()> {
        let mut buf = Vec::with_capacity(2 + values.len());
        buf.extend_from_slice(&address.to_be_bytes());
        buf.extend_from_slice(values);
        self.write_command(OpCode::WriteRegister, &buf)
    }

    /// Reads `len` bytes starting at a 16-bit radio register.
    pub fn read_register(&mut self, address: u16, len: usize) -> Result<Vec<u8>> {
        // status, status, status (NOP slot), then data
        let mut buf = vec![0u8; 3 + len];
        buf[..2].copy_from_slice(&address.to_be_bytes());
        self.read_command(OpCode::ReadRegister, &mut buf)?;
        Ok(buf.split_off(3))
    }

    pub fn set_rf_frequency(&mut self, freq_hz: u32) -> Result<()> {
        self.write_command(OpCode::SetRfFrequency, &freq_to_reg(freq_hz).to_be_bytes())
    }

    /// Enters receive mode; `0xFFFFFF` means continuous.
    pub fn set_rx(&mut self, timeout: u32) -> Result<()> {
        let t = timeout.to_be_bytes();
        self.write_command(OpCode::SetRx, &t[1..])
    }

    pub fn set_fs(&mut self) -> Result<()> {
        self.write_command(OpCode::SetFs, &[])
    }

    pub fn set_sleep(&mut self, warm_start: bool) -> Result<()> {
        self.write_command(OpCode::SetSleep, &[if warm_start { 0x04 } else { 0x00 }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BusConfig;
    use crate::spi::{self, mock::MockSpiBus};
    use crate::timing::Delay;

    #[derive(Default)]
    struct CountingDelay(Vec<u32>);

    impl Delay for CountingDelay {
        fn delay_ms(&mut self, ms: u32) {
            self.0.push(ms);
        }
    }

    #[test]
    fn test_freq_to_reg_rounds() {
        assert_eq!(freq_to_reg(868_000_000), 0x3640_0000);
        // 868.1 MHz: exact value 910_268_825.6
        assert_eq!(freq_to_reg(868_100_000), 910_268_826);
        assert_eq!(freq_to_reg(0), 0);
    }

    #[test]
    fn test_status_decoding() {
        let status = Status(0x22);
        assert_eq!(status.mode(), Some(ChipMode::StandbyRc));
        assert_eq!(status.command_status(), 0x1);
        assert_eq!(Status(0x30).mode(), Some(ChipMode::StandbyXosc));
        assert_eq!(Status(0x70).mode(), None);
    }

    #[test]
    fn test_opcode_round_trip() {
        for op in [OpCode::GetStatus, OpCode::CalibrateImage, OpCode::SetTxContinuousPreamble] {
            assert_eq!(OpCode::try_from(op.as_byte()).unwrap(), op);
        }
        assert!(OpCode::try_from(0x00).is_err());
    }

    #[test]
    fn test_settle_delay_precedes_every_command() {
        let mock = MockSpiBus::new();
        let bus = spi::open(mock.clone(), &BusConfig::default()).unwrap();
        let mut delay = CountingDelay::default();
        {
            let mut radio = Sx1250::new(&bus, MuxTarget::RadioA, &mut delay);
            radio.set_standby(StandbyMode::Rc).unwrap();
            radio.get_status().unwrap();
        }
        assert_eq!(delay.0, vec![1, 1]);
        assert_eq!(
            mock.transactions(),
            vec![vec![0x01, 0x80, 0x80, 0x00], vec![0x01, 0x00, 0xC0, 0x00]]
        );
    }

    #[test]
    fn test_empty_payload_is_null_argument() {
        let mock = MockSpiBus::new();
        let bus = spi::open(mock.clone(), &BusConfig::default()).unwrap();
        let mut radio = Sx1250::new(&bus, MuxTarget::RadioB, CountingDelay::default());
        assert_eq!(
            radio.write_command(OpCode::SetStandby, &[]),
            Err(LgwError::NullArgument { opcode: 0x80 })
        );
        assert_eq!(
            radio.read_command(OpCode::GetStatus, &mut []),
            Err(LgwError::NullArgument { opcode: 0xC0 })
        );
        assert!(radio.set_fs().is_ok());
        assert_eq!(mock.transaction_count(), 1);
    }

    #[test]
    fn test_register_access_through_commands() {
        let mock = MockSpiBus::new();
        let bus = spi::open(mock.clone(), &BusConfig::default()).unwrap();
        let mut radio = Sx1250::new(&bus, MuxTarget::RadioA, CountingDelay::default());
        radio.write_register(0x08B6, &[0x2A]).unwrap();
        assert_eq!(mock.radio_register(MuxTarget::RadioA, 0x08B6), 0x2A);
        assert_eq!(radio.read_register(0x08B6, 1).unwrap(), vec![0x2A]);
    }
}
