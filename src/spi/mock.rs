//! Simulated SPI bus for testing
//!
//! `MockSpiBus` implements [`SpiTransport`] without hardware. It decodes every
//! frame it receives and emulates the devices behind the mux:
//!
//! - the SX1302 core as 32 KiB of auto-incrementing register memory, plus
//!   optional FIFO data ports where writes append and reads consume;
//! - SX1250 radios as a small opcode interpreter (standby modes, status,
//!   device errors, register writes, RF frequency);
//! - SX1255/SX1257 radios as a 128-byte register file with a PLL that locks
//!   when the chip is put in mode 3.
//!
//! Every transaction is logged so tests can assert exact wire traffic and
//! call order. Faults (wrong status mode, device errors, I/O errors, PLL that
//! never locks, registers that ignore writes) can be injected.

use super::addressing::{decode_opcode_header, decode_register_header, Access, MuxTarget, HEADER_LEN};
use super::SpiTransport;
use crate::error::{LgwError, Result};
use crate::radio::sx1250::OpCode;
use crate::radio::ChipFamily;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

const CORE_MEMORY_SIZE: usize = 0x8000;
const SX125X_REGISTERS: usize = 128;

const SX125X_REG_VERSION: usize = 7;
const SX125X_REG_MODE: usize = 0;
const SX125X_REG_MODE_STATUS: usize = 17;

/// Emulated SX1250 state
#[derive(Debug, Clone)]
struct MockSx1250 {
    mode: u8,
    forced_mode: Option<u8>,
    device_errors: u16,
    registers: HashMap<u16, u8>,
    rf_frequency: Option<u32>,
}

impl Default for MockSx1250 {
    fn default() -> Self {
        Self {
            mode: 0x2,
            forced_mode: None,
            device_errors: 0,
            registers: HashMap::new(),
            rf_frequency: None,
        }
    }
}

impl MockSx1250 {
    fn status(&self) -> u8 {
        (self.forced_mode.unwrap_or(self.mode) & 0x07) << 4
    }
}

/// Emulated SX1255/SX1257 state
#[derive(Debug, Clone)]
struct MockSx125x {
    registers: [u8; SX125X_REGISTERS],
    pll_locks: bool,
    frozen: HashSet<u8>,
}

impl MockSx125x {
    fn new(chip: ChipFamily) -> Self {
        let mut registers = [0u8; SX125X_REGISTERS];
        registers[SX125X_REG_VERSION] = match chip {
            ChipFamily::Sx1255 => 0x11,
            _ => 0x21,
        };
        Self {
            registers,
            pll_locks: true,
            frozen: HashSet::new(),
        }
    }
}

#[derive(Debug, Clone)]
enum MockRadio {
    Sx1250(MockSx1250),
    Sx125x(MockSx125x),
}

impl MockRadio {
    fn new(chip: ChipFamily) -> Self {
        match chip {
            ChipFamily::Sx1250 => MockRadio::Sx1250(MockSx1250::default()),
            ChipFamily::Sx1255 | ChipFamily::Sx1257 => MockRadio::Sx125x(MockSx125x::new(chip)),
        }
    }
}

#[derive(Debug)]
struct MockState {
    core: Vec<u8>,
    fifos: HashMap<u16, VecDeque<u8>>,
    radios: [MockRadio; 2],
    log: Vec<Vec<u8>>,
    next_error: Option<String>,
    clock_hz: Option<u32>,
    released: bool,
}

/// Simulated concentrator bus
///
/// Clones share the same state, so a test can keep one clone for
/// inspection after moving another into [`super::open`].
#[derive(Clone)]
pub struct MockSpiBus {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockSpiBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSpiBus {
    /// A bus with an SX1250 on both radio chains.
    pub fn new() -> Self {
        Self::with_radios(ChipFamily::Sx1250, ChipFamily::Sx1250)
    }

    pub fn with_radios(radio_a: ChipFamily, radio_b: ChipFamily) -> Self {
        MockSpiBus {
            state: Arc::new(Mutex::new(MockState {
                core: vec![0; CORE_MEMORY_SIZE],
                fifos: HashMap::new(),
                radios: [MockRadio::new(radio_a), MockRadio::new(radio_b)],
                log: Vec::new(),
                next_error: None,
                clock_hz: None,
                released: false,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Turns a core register into a FIFO port.
    pub fn add_fifo_port(&self, address: u16) {
        self.lock().fifos.entry(address).or_default();
    }

    pub fn fifo_len(&self, address: u16) -> usize {
        self.lock().fifos.get(&address).map_or(0, VecDeque::len)
    }

    pub fn set_register(&self, address: u16, value: u8) {
        self.lock().core[usize::from(address) % CORE_MEMORY_SIZE] = value;
    }

    pub fn register(&self, address: u16) -> u8 {
        self.lock().core[usize::from(address) % CORE_MEMORY_SIZE]
    }

    /// All frames sent so far, in order.
    pub fn transactions(&self) -> Vec<Vec<u8>> {
        self.lock().log.clone()
    }

    pub fn transaction_count(&self) -> usize {
        self.lock().log.len()
    }

    pub fn clear_transactions(&self) {
        self.lock().log.clear();
    }

    /// Opcode frames sent to `target`, as `(access, opcode, parameters)`.
    pub fn commands(&self, target: MuxTarget) -> Vec<(Access, u8, Vec<u8>)> {
        self.lock()
            .log
            .iter()
            .filter_map(|frame| {
                let (t, opcode, access) = decode_opcode_header(frame)?;
                (t == target).then(|| (access, opcode, frame[HEADER_LEN..].to_vec()))
            })
            .collect()
    }

    /// Register writes sent to `target`, as `(address, value)`.
    pub fn register_writes(&self, target: MuxTarget) -> Vec<(u16, u8)> {
        self.lock()
            .log
            .iter()
            .filter_map(|frame| {
                let (t, address, access) = decode_register_header(frame)?;
                let value = *frame.get(HEADER_LEN)?;
                (t == target && access == Access::Write).then_some((address.value(), value))
            })
            .collect()
    }

    /// Makes the next transfer fail with `TransferFailed`.
    pub fn fail_next_transfer(&self, message: &str) {
        self.lock().next_error = Some(message.to_string());
    }

    /// Forces the mode field an SX1250 reports, regardless of commands.
    pub fn force_status_mode(&self, target: MuxTarget, mode: Option<u8>) {
        if let Some(MockRadio::Sx1250(radio)) = self.lock().radio_mut(target) {
            radio.forced_mode = mode;
        }
    }

    pub fn set_device_errors(&self, target: MuxTarget, errors: u16) {
        if let Some(MockRadio::Sx1250(radio)) = self.lock().radio_mut(target) {
            radio.device_errors = errors;
        }
    }

    /// Current SX1250 mode field (without forcing).
    pub fn radio_mode(&self, target: MuxTarget) -> Option<u8> {
        match self.lock().radio_mut(target) {
            Some(MockRadio::Sx1250(radio)) => Some(radio.mode),
            _ => None,
        }
    }

    /// Last `SetRfFrequency` value an SX1250 received.
    pub fn rf_frequency(&self, target: MuxTarget) -> Option<u32> {
        match self.lock().radio_mut(target) {
            Some(MockRadio::Sx1250(radio)) => radio.rf_frequency,
            _ => None,
        }
    }

    /// A radio register: SX1250 16-bit space or SX125x 7-bit space.
    pub fn radio_register(&self, target: MuxTarget, address: u16) -> u8 {
        match self.lock().radio_mut(target) {
            Some(MockRadio::Sx1250(radio)) => radio.registers.get(&address).copied().unwrap_or(0),
            Some(MockRadio::Sx125x(radio)) => radio.registers[usize::from(address) % SX125X_REGISTERS],
            None => 0,
        }
    }

    /// Controls whether an SX125x PLL ever reports lock.
    pub fn set_pll_locks(&self, target: MuxTarget, locks: bool) {
        if let Some(MockRadio::Sx125x(radio)) = self.lock().radio_mut(target) {
            radio.pll_locks = locks;
        }
    }

    /// Makes an SX125x register ignore writes.
    pub fn freeze_radio_register(&self, target: MuxTarget, address: u8) {
        if let Some(MockRadio::Sx125x(radio)) = self.lock().radio_mut(target) {
            radio.frozen.insert(address);
        }
    }

    pub fn configured_clock(&self) -> Option<u32> {
        self.lock().clock_hz
    }

    pub fn is_released(&self) -> bool {
        self.lock().released
    }

}

impl MockState {
    fn radio_mut(&mut self, target: MuxTarget) -> Option<&mut MockRadio> {
        let index = target.chain_index()?;
        self.radios.get_mut(index)
    }

    fn core_transfer(&mut self, tx: &[u8], rx: &mut [u8]) {
        let Some((_, address, access)) = decode_register_header(tx) else {
            return;
        };
        let addr = address.value();
        match access {
            Access::Write => {
                let data = &tx[HEADER_LEN..];
                if let Some(fifo) = self.fifos.get_mut(&addr) {
                    fifo.extend(data);
                } else {
                    for (i, byte) in data.iter().enumerate() {
                        self.core[(usize::from(addr) + i) % CORE_MEMORY_SIZE] = *byte;
                    }
                }
            }
            Access::Read => {
                // One dummy byte of latency before data
                let start = HEADER_LEN + 1;
                if rx.len() <= start {
                    return;
                }
                if let Some(fifo) = self.fifos.get_mut(&addr) {
                    for slot in rx[start..].iter_mut() {
                        *slot = fifo.pop_front().unwrap_or(0);
                    }
                } else {
                    for (i, slot) in rx[start..].iter_mut().enumerate() {
                        *slot = self.core[(usize::from(addr) + i) % CORE_MEMORY_SIZE];
                    }
                }
            }
        }
    }
}

fn sx1250_transfer(radio: &mut MockSx1250, tx: &[u8], rx: &mut [u8]) {
    let Some((_, opcode, access)) = decode_opcode_header(tx) else {
        return;
    };
    let params = &tx[HEADER_LEN..];
    let Ok(opcode) = OpCode::try_from(opcode) else {
        return;
    };
    match access {
        Access::Write => match opcode {
            OpCode::SetStandby => {
                radio.mode = if params.first() == Some(&0x01) { 0x3 } else { 0x2 };
            }
            OpCode::SetFs => radio.mode = 0x4,
            OpCode::SetRx => radio.mode = 0x5,
            OpCode::SetTx | OpCode::SetTxContinuousWave | OpCode::SetTxContinuousPreamble => {
                radio.mode = 0x6
            }
            OpCode::SetSleep => radio.mode = 0x0,
            OpCode::SetRfFrequency if params.len() == 4 => {
                radio.rf_frequency =
                    Some(u32::from_be_bytes([params[0], params[1], params[2], params[3]]));
            }
            OpCode::WriteRegister if params.len() >= 2 => {
                let base = u16::from_be_bytes([params[0], params[1]]);
                for (i, value) in params[2..].iter().enumerate() {
                    radio.registers.insert(base.wrapping_add(i as u16), *value);
                }
            }
            _ => {}
        },
        Access::Read => {
            let status = radio.status();
            let body = &mut rx[HEADER_LEN..];
            body.fill(status);
            match opcode {
                OpCode::GetDeviceErrors if body.len() >= 3 => {
                    body[1..3].copy_from_slice(&radio.device_errors.to_be_bytes());
                }
                OpCode::ReadRegister if params.len() >= 3 => {
                    let base = u16::from_be_bytes([params[0], params[1]]);
                    for (i, slot) in body[3..].iter_mut().enumerate() {
                        *slot = radio
                            .registers
                            .get(&base.wrapping_add(i as u16))
                            .copied()
                            .unwrap_or(0);
                    }
                }
                _ => {}
            }
        }
    }
}

fn sx125x_transfer(radio: &mut MockSx125x, tx: &[u8], rx: &mut [u8]) {
    let Some((_, address, access)) = decode_register_header(tx) else {
        return;
    };
    let reg = usize::from(address.value()) % SX125X_REGISTERS;
    match access {
        Access::Write => {
            let Some(&value) = tx.get(HEADER_LEN) else {
                return;
            };
            if reg == SX125X_REG_MODE_STATUS || radio.frozen.contains(&(reg as u8)) {
                return;
            }
            radio.registers[reg] = value;
            if reg == SX125X_REG_MODE {
                let locked = value == 0x03 && radio.pll_locks;
                radio.registers[SX125X_REG_MODE_STATUS] = if locked { 0x03 } else { 0x00 };
            }
        }
        Access::Read => {
            if let Some(last) = rx.last_mut() {
                *last = radio.registers[reg];
            }
        }
    }
}

impl SpiTransport for MockSpiBus {
    fn configure(&mut self, clock_hz: u32) -> Result<()> {
        self.lock().clock_hz = Some(clock_hz);
        Ok(())
    }

    fn transfer(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<()> {
        let mut state = self.lock();
        if let Some(message) = state.next_error.take() {
            return Err(LgwError::TransferFailed(message));
        }
        if tx.len() != rx.len() {
            return Err(LgwError::TransferFailed(format!(
                "tx/rx length mismatch: {} vs {}",
                tx.len(),
                rx.len()
            )));
        }
        state.log.push(tx.to_vec());
        rx.fill(0);

        let target = tx.first().and_then(|b| MuxTarget::try_from(*b).ok());
        match target {
            Some(MuxTarget::Concentrator) => state.core_transfer(tx, rx),
            Some(radio_target) => {
                if let Some(index) = radio_target.chain_index() {
                    match &mut state.radios[index] {
                        MockRadio::Sx1250(radio) => sx1250_transfer(radio, tx, rx),
                        MockRadio::Sx125x(radio) => sx125x_transfer(radio, tx, rx),
                    }
                }
            }
            None => {}
        }
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        self.lock().released = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_memory_auto_increments() {
        let mut mock = MockSpiBus::new();
        let mut rx = [0u8; 6];
        mock.transfer(&[0x00, 0x80, 0x10, 0xAA, 0xBB, 0xCC], &mut rx)
            .unwrap();
        assert_eq!(mock.register(0x0011), 0xBB);

        let mut rx = [0u8; 6];
        mock.transfer(&[0x00, 0x00, 0x10, 0x00, 0x00, 0x00], &mut rx)
            .unwrap();
        assert_eq!(&rx[4..], &[0xAA, 0xBB]);
    }

    #[test]
    fn test_fifo_port_consumes() {
        let mut mock = MockSpiBus::new();
        mock.add_fifo_port(0x4000);
        let mut rx = [0u8; 5];
        mock.transfer(&[0x00, 0xC0, 0x00, 1, 2], &mut rx).unwrap();
        assert_eq!(mock.fifo_len(0x4000), 2);
        let mut rx = [0u8; 6];
        mock.transfer(&[0x00, 0x40, 0x00, 0, 0, 0], &mut rx).unwrap();
        assert_eq!(&rx[4..], &[1, 2]);
        assert_eq!(mock.fifo_len(0x4000), 0);
    }

    #[test]
    fn test_sx1250_standby_changes_status() {
        let mut mock = MockSpiBus::new();
        let mut rx = [0u8; 4];
        mock.transfer(&[0x01, 0x80, 0x80, 0x01], &mut rx).unwrap();
        mock.transfer(&[0x01, 0x00, 0xC0, 0x00], &mut rx).unwrap();
        assert_eq!(rx[3], 0x30);

        mock.force_status_mode(MuxTarget::RadioA, Some(0x6));
        mock.transfer(&[0x01, 0x00, 0xC0, 0x00], &mut rx).unwrap();
        assert_eq!(rx[3], 0x60);
    }

    #[test]
    fn test_sx125x_pll_locks_in_mode_3() {
        let mut mock = MockSpiBus::with_radios(ChipFamily::Sx1257, ChipFamily::Sx1255);
        let mut rx = [0u8; 5];
        mock.transfer(&[0x02, 0x00, 0x07, 0x00, 0x00], &mut rx).unwrap();
        assert_eq!(rx[4], 0x11);

        let mut rx = [0u8; 4];
        mock.transfer(&[0x01, 0x80, 0x00, 0x03], &mut rx).unwrap();
        assert_eq!(mock.radio_register(MuxTarget::RadioA, 17) & 0x02, 0x02);
    }

    #[test]
    fn test_injected_error_is_one_shot() {
        let mut mock = MockSpiBus::new();
        mock.fail_next_transfer("boom");
        let mut rx = [0u8; 4];
        assert_eq!(
            mock.transfer(&[0, 0x80, 0, 0], &mut rx),
            Err(LgwError::TransferFailed("boom".to_string()))
        );
        assert!(mock.transfer(&[0, 0x80, 0, 0], &mut rx).is_ok());
        assert_eq!(mock.transaction_count(), 1);
    }
}
