//! # SPI Bus Transaction Engine
//!
//! Owns the physical SPI transport shared by the SX1302 core and both radio
//! chains, and performs every transaction on it.
//!
//! ## Transactions
//!
//! ```text
//! write_register   [target][0x80|addr_hi][addr_lo][data]
//! read_register    [target][addr_hi][addr_lo][dummy][clock]     -> last byte
//! write_burst      per chunk: [target][0x80|addr_hi][addr_lo] + chunk
//! read_burst       per chunk: [target][addr_hi][addr_lo][dummy] + clocks
//! command_write    [target][0x80][opcode] + data
//! command_read     [target][0x00][opcode] + data                -> bytes after header
//! ```
//!
//! Bursts are re-addressed at the same starting register for every chunk;
//! the concentrator auto-increments internally. A logical burst holds the bus
//! for all of its chunks, so concurrent callers can never interleave.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use loragw_rs::config::BusConfig;
//! use loragw_rs::spi::{self, mock::MockSpiBus, addressing::MuxTarget};
//!
//! let bus = spi::open(MockSpiBus::new(), &BusConfig::default())?;
//! bus.write_register(MuxTarget::Concentrator, 0x5602, 0x01)?;
//! let value = bus.read_register(MuxTarget::Concentrator, 0x5602)?;
//! bus.close()?;
//! # Ok::<(), loragw_rs::LgwError>(())
//! ```

pub mod addressing;
pub mod mock;

#[cfg(feature = "raspberry-pi")]
pub mod raspberry_pi;

use crate::config::BusConfig;
use crate::error::{LgwError, Result};
use crate::logging::log_transfer_hex;
use crate::timing::{timeout_check, timeout_start};
use addressing::{
    encode_opcode_header, encode_register_header, Access, MuxTarget, RegisterAddress, HEADER_LEN,
};
use log::{debug, warn};
use std::sync::{Mutex, MutexGuard, TryLockError};
use std::thread;
use std::time::Duration;

/// Bytes an opcode command spends on the command and opcode phases
pub const OPCODE_OVERHEAD: usize = 2;

/// First pause between bus acquisition attempts
const LOCK_POLL_MIN: Duration = Duration::from_micros(10);
/// Longest pause between bus acquisition attempts
const LOCK_POLL_MAX: Duration = Duration::from_millis(1);

/// Next pause while waiting for the bus: doubles up to [`LOCK_POLL_MAX`].
fn next_lock_poll(current: Duration) -> Duration {
    (current * 2).min(LOCK_POLL_MAX)
}

/// A full-duplex SPI device
///
/// One call is one chip-select assertion: `tx` is shifted out while the same
/// number of bytes are shifted into `rx`.
pub trait SpiTransport: Send {
    /// Applies the bus clock. Called once by [`open`].
    fn configure(&mut self, _clock_hz: u32) -> Result<()> {
        Ok(())
    }

    /// Performs one transaction. `tx` and `rx` have the same length.
    fn transfer(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<()>;

    /// Detaches the device. Called once by [`BusHandle::close`].
    fn release(&mut self) -> Result<()> {
        Ok(())
    }
}

struct BusState<T> {
    transport: Option<T>,
    tx: Vec<u8>,
    rx: Vec<u8>,
}

/// Exclusive owner of one physical SPI bus
///
/// The transport is moved in at [`open`] and never cloned. Every component
/// borrows the handle for the duration of a call.
pub struct BusHandle<T: SpiTransport> {
    state: Mutex<BusState<T>>,
    chunk_size: usize,
    clock_hz: u32,
    acquire_timeout_ms: u64,
}

/// Opens the bus on `transport` with the given parameters.
///
/// # Returns
///
/// * `Ok(BusHandle)` - The bus is configured and ready
/// * `Err(LgwError::BusInitError)` - The configuration is unusable or the
///   transport refused the clock setting
pub fn open<T: SpiTransport>(mut transport: T, config: &BusConfig) -> Result<BusHandle<T>> {
    config
        .validate()
        .map_err(|e| LgwError::BusInitError(e.to_string()))?;
    transport.configure(config.clock_hz).map_err(|e| match e {
        LgwError::BusInitError(msg) => LgwError::BusInitError(msg),
        other => LgwError::BusInitError(other.to_string()),
    })?;

    // Header, read dummy byte and one full chunk
    let scratch = HEADER_LEN + 1 + config.chunk_size;
    log::info!(
        "SPI bus opened: {} Hz, chunk ceiling {} bytes",
        config.clock_hz,
        config.chunk_size
    );

    Ok(BusHandle {
        state: Mutex::new(BusState {
            transport: Some(transport),
            tx: vec![0; scratch],
            rx: vec![0; scratch],
        }),
        chunk_size: config.chunk_size,
        clock_hz: config.clock_hz,
        acquire_timeout_ms: config.acquire_timeout_ms,
    })
}

impl<T: SpiTransport> BusHandle<T> {
    /// Largest payload moved in one physical transaction.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn clock_hz(&self) -> u32 {
        self.clock_hz
    }

    /// Acquires the bus for a sequence of transactions.
    ///
    /// Waits at most the configured acquisition window. A bus whose previous
    /// holder panicked mid-transfer is never handed out again.
    pub fn lock(&self) -> Result<BusLock<'_, T>> {
        let window = timeout_start();
        let mut poll = LOCK_POLL_MIN;
        loop {
            match self.state.try_lock() {
                Ok(guard) => {
                    return Ok(BusLock {
                        guard,
                        chunk_size: self.chunk_size,
                    })
                }
                Err(TryLockError::Poisoned(_)) => {
                    warn!("SPI bus poisoned by a panic during a transfer");
                    return Err(LgwError::BusBusy {
                        timeout_ms: self.acquire_timeout_ms,
                    });
                }
                Err(TryLockError::WouldBlock) => {
                    if timeout_check(&window, self.acquire_timeout_ms) {
                        return Err(LgwError::BusBusy {
                            timeout_ms: self.acquire_timeout_ms,
                        });
                    }
                    thread::sleep(poll);
                    poll = next_lock_poll(poll);
                }
            }
        }
    }

    /// Detaches the device and releases the peripheral.
    ///
    /// A second call returns `AlreadyClosed`; transactions after close
    /// return `BusClosed`.
    pub fn close(&self) -> Result<()> {
        let mut bus = self.lock()?;
        let mut transport = bus.guard.transport.take().ok_or(LgwError::AlreadyClosed)?;
        transport.release()?;
        log::info!("SPI bus closed");
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        match self.state.lock() {
            Ok(state) => state.transport.is_none(),
            Err(_) => true,
        }
    }

    pub fn write_register(&self, target: MuxTarget, address: u16, data: u8) -> Result<()> {
        self.lock()?.write_register(target, address, data)
    }

    pub fn read_register(&self, target: MuxTarget, address: u16) -> Result<u8> {
        self.lock()?.read_register(target, address)
    }

    pub fn write_burst(&self, target: MuxTarget, address: u16, data: &[u8]) -> Result<()> {
        self.lock()?.write_burst(target, address, data)
    }

    pub fn read_burst(&self, target: MuxTarget, address: u16, length: usize) -> Result<Vec<u8>> {
        let mut data = vec![0; length];
        self.lock()?.read_burst_into(target, address, &mut data)?;
        Ok(data)
    }

    pub fn read_burst_into(&self, target: MuxTarget, address: u16, data: &mut [u8]) -> Result<()> {
        self.lock()?.read_burst_into(target, address, data)
    }

    pub fn write_chunk(&self, target: MuxTarget, address: u16, data: &[u8]) -> Result<()> {
        self.lock()?.write_chunk(target, address, data)
    }

    pub fn read_chunk(&self, target: MuxTarget, address: u16, data: &mut [u8]) -> Result<()> {
        self.lock()?.read_chunk(target, address, data)
    }

    pub fn command_write(&self, target: MuxTarget, opcode: u8, data: &[u8]) -> Result<()> {
        self.lock()?.command_write(target, opcode, data)
    }

    pub fn command_read(&self, target: MuxTarget, opcode: u8, data: &mut [u8]) -> Result<()> {
        self.lock()?.command_read(target, opcode, data)
    }
}

/// Exclusive use of the bus, released on drop
pub struct BusLock<'a, T: SpiTransport> {
    guard: MutexGuard<'a, BusState<T>>,
    chunk_size: usize,
}

impl<'a, T: SpiTransport> BusLock<'a, T> {
    /// Runs one physical transaction over the first `len` scratch bytes.
    fn transact(&mut self, len: usize) -> Result<()> {
        let state = &mut *self.guard;
        let transport = state.transport.as_mut().ok_or(LgwError::BusClosed)?;
        log_transfer_hex("spi tx", &state.tx[..len]);
        transport.transfer(&state.tx[..len], &mut state.rx[..len])?;
        log_transfer_hex("spi rx", &state.rx[..len]);
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.guard.transport.is_none() {
            return Err(LgwError::BusClosed);
        }
        Ok(())
    }

    fn check_chunk(&self, len: usize) -> Result<()> {
        if len > self.chunk_size {
            return Err(LgwError::PayloadTooLarge {
                len,
                max: self.chunk_size,
            });
        }
        Ok(())
    }

    /// Single-byte register write.
    pub fn write_register(&mut self, target: MuxTarget, address: u16, data: u8) -> Result<()> {
        let address = RegisterAddress::new(address)?;
        self.ensure_open()?;
        let header = encode_register_header(target, address, Access::Write);
        self.guard.tx[..HEADER_LEN].copy_from_slice(&header);
        self.guard.tx[HEADER_LEN] = data;
        self.transact(HEADER_LEN + 1)
    }

    /// Single-byte register read; the value is the last byte clocked back.
    pub fn read_register(&mut self, target: MuxTarget, address: u16) -> Result<u8> {
        let address = RegisterAddress::new(address)?;
        self.ensure_open()?;
        let header = encode_register_header(target, address, Access::Read);
        let len = HEADER_LEN + 2;
        self.guard.tx[..HEADER_LEN].copy_from_slice(&header);
        self.guard.tx[HEADER_LEN..len].fill(0x00);
        self.transact(len)?;
        Ok(self.guard.rx[len - 1])
    }

    /// Writes `data` in one physical transaction.
    ///
    /// Fails with `PayloadTooLarge` when `data` exceeds the chunk ceiling.
    pub fn write_chunk(&mut self, target: MuxTarget, address: u16, data: &[u8]) -> Result<()> {
        self.check_chunk(data.len())?;
        let address = RegisterAddress::new(address)?;
        self.ensure_open()?;
        self.write_chunk_unchecked(target, address, data)
    }

    /// Reads `data.len()` bytes in one physical transaction.
    pub fn read_chunk(&mut self, target: MuxTarget, address: u16, data: &mut [u8]) -> Result<()> {
        self.check_chunk(data.len())?;
        let address = RegisterAddress::new(address)?;
        self.ensure_open()?;
        self.read_chunk_unchecked(target, address, data)
    }

    fn write_chunk_unchecked(
        &mut self,
        target: MuxTarget,
        address: RegisterAddress,
        data: &[u8],
    ) -> Result<()> {
        let header = encode_register_header(target, address, Access::Write);
        let len = HEADER_LEN + data.len();
        self.guard.tx[..HEADER_LEN].copy_from_slice(&header);
        self.guard.tx[HEADER_LEN..len].copy_from_slice(data);
        self.transact(len)
    }

    fn read_chunk_unchecked(
        &mut self,
        target: MuxTarget,
        address: RegisterAddress,
        data: &mut [u8],
    ) -> Result<()> {
        let header = encode_register_header(target, address, Access::Read);
        let start = HEADER_LEN + 1;
        let len = start + data.len();
        self.guard.tx[..HEADER_LEN].copy_from_slice(&header);
        self.guard.tx[HEADER_LEN..len].fill(0x00);
        self.transact(len)?;
        data.copy_from_slice(&self.guard.rx[start..len]);
        Ok(())
    }

    /// Writes `data` of any length, chunked at the ceiling.
    ///
    /// Every chunk is re-addressed at `address`. An empty burst issues no
    /// transaction.
    pub fn write_burst(&mut self, target: MuxTarget, address: u16, data: &[u8]) -> Result<()> {
        let address = RegisterAddress::new(address)?;
        self.ensure_open()?;
        let mut transferred = 0;
        for chunk in data.chunks(self.chunk_size) {
            self.write_chunk_unchecked(target, address, chunk)?;
            transferred += chunk.len();
            debug!(
                "BURST WRITE {:?} 0x{:04X}: chunk {} bytes, {}/{} transferred",
                target,
                address.value(),
                chunk.len(),
                transferred,
                data.len()
            );
        }
        Ok(())
    }

    /// Fills `data` of any length, chunked at the ceiling.
    pub fn read_burst_into(
        &mut self,
        target: MuxTarget,
        address: u16,
        data: &mut [u8],
    ) -> Result<()> {
        let address = RegisterAddress::new(address)?;
        self.ensure_open()?;
        let total = data.len();
        let mut transferred = 0;
        for chunk in data.chunks_mut(self.chunk_size) {
            self.read_chunk_unchecked(target, address, chunk)?;
            transferred += chunk.len();
            debug!(
                "BURST READ {:?} 0x{:04X}: chunk {} bytes, {}/{} transferred",
                target,
                address.value(),
                chunk.len(),
                transferred,
                total
            );
        }
        Ok(())
    }

    pub fn read_burst(&mut self, target: MuxTarget, address: u16, length: usize) -> Result<Vec<u8>> {
        let mut data = vec![0; length];
        self.read_burst_into(target, address, &mut data)?;
        Ok(data)
    }

    fn check_command(&self, len: usize) -> Result<()> {
        let max = self.chunk_size.saturating_sub(OPCODE_OVERHEAD);
        if len > max {
            return Err(LgwError::PayloadTooLarge { len, max });
        }
        Ok(())
    }

    /// Sends an opcode command with its parameters in one transaction.
    pub fn command_write(&mut self, target: MuxTarget, opcode: u8, data: &[u8]) -> Result<()> {
        self.check_command(data.len())?;
        self.ensure_open()?;
        let header = encode_opcode_header(target, opcode, Access::Write);
        let len = HEADER_LEN + data.len();
        self.guard.tx[..HEADER_LEN].copy_from_slice(&header);
        self.guard.tx[HEADER_LEN..len].copy_from_slice(data);
        self.transact(len)
    }

    /// Sends an opcode read command.
    ///
    /// `data` is shifted out after the header and overwritten with the bytes
    /// clocked back in the same slots; bytes received during the header are
    /// dropped.
    pub fn command_read(&mut self, target: MuxTarget, opcode: u8, data: &mut [u8]) -> Result<()> {
        self.check_command(data.len())?;
        self.ensure_open()?;
        let header = encode_opcode_header(target, opcode, Access::Read);
        let len = HEADER_LEN + data.len();
        self.guard.tx[..HEADER_LEN].copy_from_slice(&header);
        self.guard.tx[HEADER_LEN..len].copy_from_slice(data);
        self.transact(len)?;
        data.copy_from_slice(&self.guard.rx[HEADER_LEN..len]);
        Ok(())
    }
}
