//! # LoRa Timing Utilities
//!
//! Packet time-on-air, monotonic timeout windows used to bound polling loops,
//! and the `Delay` capability through which every protocol settle delay goes.
//!
//! ## Time on air
//!
//! ```text
//! t_sym     = 2^SF * 8 / bw_div                     (us, bw_div 1/2/4)
//! n_payload = ceil(max(8*PL + CRC - 4*SF + 8*(SF>=7) + 20*H, 0)
//!                  / (4*(SF - 2*DE))) * (CR + 4)
//! n_sym     = preamble + (SF>=7 ? 4.25 : 6.25) + 8 + n_payload
//! toa       = round(n_sym * t_sym)
//! ```
//!
//! Low data rate optimization (DE) is on for SF11 and SF12.

use crate::error::{LgwError, Result};
use std::thread;
use std::time::{Duration, Instant};

/// LoRa bandwidth, by its concentrator register code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bandwidth {
    /// 125 kHz
    Bw125 = 0x04,
    /// 250 kHz
    Bw250 = 0x05,
    /// 500 kHz
    Bw500 = 0x06,
}

impl Bandwidth {
    /// Divisor applied to the 125 kHz symbol duration.
    pub fn divisor(self) -> u32 {
        match self {
            Bandwidth::Bw125 => 1,
            Bandwidth::Bw250 => 2,
            Bandwidth::Bw500 => 4,
        }
    }

    pub fn hz(self) -> u32 {
        125_000 * self.divisor()
    }
}

impl TryFrom<u8> for Bandwidth {
    type Error = LgwError;

    fn try_from(code: u8) -> Result<Self> {
        match code {
            0x04 => Ok(Bandwidth::Bw125),
            0x05 => Ok(Bandwidth::Bw250),
            0x06 => Ok(Bandwidth::Bw500),
            _ => Err(LgwError::InvalidParameter(format!(
                "unsupported bandwidth code 0x{code:02X}"
            ))),
        }
    }
}

/// LoRa spreading factor (SF5 to SF12)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpreadingFactor(u8);

impl SpreadingFactor {
    pub fn value(self) -> u8 {
        self.0
    }

    /// Whether low data rate optimization is mandatory at this SF.
    pub fn low_data_rate_optimize(self) -> bool {
        self.0 >= 11
    }
}

impl TryFrom<u8> for SpreadingFactor {
    type Error = LgwError;

    fn try_from(sf: u8) -> Result<Self> {
        if (5..=12).contains(&sf) {
            Ok(SpreadingFactor(sf))
        } else {
            Err(LgwError::InvalidParameter(format!(
                "unsupported spreading factor {sf}"
            )))
        }
    }
}

/// LoRa coding rate, 4/5 to 4/8
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodingRate {
    Cr4_5 = 1,
    Cr4_6 = 2,
    Cr4_7 = 3,
    Cr4_8 = 4,
}

impl CodingRate {
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for CodingRate {
    type Error = LgwError;

    fn try_from(cr: u8) -> Result<Self> {
        match cr {
            1 => Ok(CodingRate::Cr4_5),
            2 => Ok(CodingRate::Cr4_6),
            3 => Ok(CodingRate::Cr4_7),
            4 => Ok(CodingRate::Cr4_8),
            _ => Err(LgwError::InvalidParameter(format!(
                "unsupported coding rate {cr}"
            ))),
        }
    }
}

/// Time on air together with the intermediate symbol counts
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeOnAir {
    /// Packet duration in microseconds
    pub toa_us: u32,
    /// Total number of symbols, including preamble and sync
    pub symbols: f64,
    /// Number of payload symbols
    pub payload_symbols: u32,
    /// Duration of one symbol in microseconds
    pub symbol_us: u32,
}

/// Computes the packet time on air from raw register codes.
///
/// # Arguments
///
/// * `bandwidth` - Bandwidth code (0x04 = 125 kHz, 0x05 = 250 kHz, 0x06 = 500 kHz)
/// * `spreading_factor` - Spreading factor, 5 to 12
/// * `coding_rate` - Coding rate code, 1 (4/5) to 4 (4/8)
/// * `preamble_symbols` - Programmed preamble length
/// * `has_header` - Explicit header mode
/// * `has_crc` - Payload CRC enabled
/// * `payload_size` - Payload length in bytes
///
/// # Returns
///
/// * `Ok(u32)` - Time on air in microseconds
/// * `Err(LgwError::InvalidParameter)` - A modulation code is not legal
pub fn time_on_air(
    bandwidth: u8,
    spreading_factor: u8,
    coding_rate: u8,
    preamble_symbols: u16,
    has_header: bool,
    has_crc: bool,
    payload_size: u8,
) -> Result<u32> {
    time_on_air_detailed(
        bandwidth,
        spreading_factor,
        coding_rate,
        preamble_symbols,
        has_header,
        has_crc,
        payload_size,
    )
    .map(|toa| toa.toa_us)
}

/// Same as [`time_on_air`], also yielding the symbol counts for diagnostics.
pub fn time_on_air_detailed(
    bandwidth: u8,
    spreading_factor: u8,
    coding_rate: u8,
    preamble_symbols: u16,
    has_header: bool,
    has_crc: bool,
    payload_size: u8,
) -> Result<TimeOnAir> {
    let bw = Bandwidth::try_from(bandwidth)?;
    let sf = SpreadingFactor::try_from(spreading_factor)?;
    let cr = CodingRate::try_from(coding_rate)?;

    Ok(compute_time_on_air(
        bw,
        sf,
        cr,
        preamble_symbols,
        has_header,
        has_crc,
        payload_size,
    ))
}

/// Typed time-on-air computation; all inputs are already validated.
pub fn compute_time_on_air(
    bw: Bandwidth,
    sf: SpreadingFactor,
    cr: CodingRate,
    preamble_symbols: u16,
    has_header: bool,
    has_crc: bool,
    payload_size: u8,
) -> TimeOnAir {
    let sf_v = i64::from(sf.value());
    let symbol_us = (1u32 << sf.value()) * 8 / bw.divisor();

    let header = if has_header { 1 } else { 0 };
    let de = if sf.low_data_rate_optimize() { 1 } else { 0 };
    let crc_bits = if has_crc { 16 } else { 0 };
    let sync_bits = if sf_v >= 7 { 8 } else { 0 };

    let numerator =
        (8 * i64::from(payload_size) + crc_bits - 4 * sf_v + sync_bits + 20 * header).max(0);
    let denominator = 4 * (sf_v - 2 * de);
    let payload_symbols =
        ((numerator + denominator - 1) / denominator) as u32 * (u32::from(cr.code()) + 4);

    let sync_symbols = if sf_v >= 7 { 4.25 } else { 6.25 };
    let symbols = f64::from(preamble_symbols) + sync_symbols + 8.0 + f64::from(payload_symbols);
    let toa_us = (symbols * f64::from(symbol_us)).round() as u32;

    TimeOnAir {
        toa_us,
        symbols,
        payload_symbols,
        symbol_us,
    }
}

/// A monotonic start instant used to bound a polling loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutWindow {
    start: Instant,
}

impl TimeoutWindow {
    /// Starts a window at `start`, for callers running a simulated clock.
    pub fn starting_at(start: Instant) -> Self {
        Self { start }
    }

    pub fn start(&self) -> Instant {
        self.start
    }

    /// Whether `limit_ms` milliseconds have elapsed at `now`.
    ///
    /// A `now` earlier than the start counts as zero elapsed time.
    pub fn is_expired_at(&self, now: Instant, limit_ms: u64) -> bool {
        let elapsed = now.saturating_duration_since(self.start);
        elapsed.as_millis() >= u128::from(limit_ms)
    }

    /// Milliseconds left before `limit_ms` is reached, measured now.
    pub fn remaining_ms(&self, limit_ms: u64) -> u64 {
        let elapsed = self.start.elapsed().as_millis();
        u64::try_from(u128::from(limit_ms).saturating_sub(elapsed)).unwrap_or(0)
    }
}

/// Captures the current monotonic time.
pub fn timeout_start() -> TimeoutWindow {
    TimeoutWindow {
        start: Instant::now(),
    }
}

/// Returns `true` once at least `limit_ms` milliseconds have passed since
/// `window` was started.
pub fn timeout_check(window: &TimeoutWindow, limit_ms: u64) -> bool {
    window.is_expired_at(Instant::now(), limit_ms)
}

/// Suspension point for protocol settle delays.
///
/// Implementations must wait at least the requested duration. The default
/// blocks the calling thread; tests substitute a recorder.
pub trait Delay {
    fn delay_ms(&mut self, ms: u32);
}

/// Blocking delay backed by `thread::sleep`
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadDelay;

impl Delay for ThreadDelay {
    fn delay_ms(&mut self, ms: u32) {
        thread::sleep(Duration::from_millis(u64::from(ms)));
    }
}

impl<D: Delay + ?Sized> Delay for &mut D {
    fn delay_ms(&mut self, ms: u32) {
        (**self).delay_ms(ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bandwidth_codes() {
        assert_eq!(Bandwidth::try_from(0x04).unwrap(), Bandwidth::Bw125);
        assert_eq!(Bandwidth::try_from(0x06).unwrap().hz(), 500_000);
        assert!(Bandwidth::try_from(0x03).is_err());
    }

    #[test]
    fn test_spreading_factor_range() {
        assert!(SpreadingFactor::try_from(4).is_err());
        assert!(SpreadingFactor::try_from(13).is_err());
        assert!(SpreadingFactor::try_from(11).unwrap().low_data_rate_optimize());
        assert!(!SpreadingFactor::try_from(10).unwrap().low_data_rate_optimize());
    }

    #[test]
    fn test_golden_sf7_bw125() {
        let toa = time_on_air_detailed(0x04, 7, 1, 8, true, true, 13).unwrap();
        assert_eq!(toa.symbol_us, 1024);
        assert_eq!(toa.payload_symbols, 25);
        assert_eq!(toa.symbols, 45.25);
        assert_eq!(toa.toa_us, 46_336);
    }

    #[test]
    fn test_sf12_uses_low_data_rate() {
        // 8*10 + 16 - 48 + 8 + 20 = 76; 76 / (4 * 10) -> 2; 2 * 5 = 10
        let toa = time_on_air_detailed(0x04, 12, 1, 8, true, true, 10).unwrap();
        assert_eq!(toa.payload_symbols, 10);
        assert_eq!(toa.symbol_us, 32_768);
    }

    #[test]
    fn test_sf5_uses_long_sync() {
        let toa = time_on_air_detailed(0x06, 5, 4, 8, false, false, 1).unwrap();
        // 8 - 20 + 0 + 0 <= 0 -> no payload symbols
        assert_eq!(toa.payload_symbols, 0);
        assert_eq!(toa.symbol_us, 64);
        assert_eq!(toa.toa_us, ((8.0 + 6.25 + 8.0) * 64.0) as u32);
    }

    #[test]
    fn test_invalid_codes_are_rejected() {
        assert!(matches!(
            time_on_air(0x07, 7, 1, 8, true, true, 13),
            Err(LgwError::InvalidParameter(_))
        ));
        assert!(matches!(
            time_on_air(0x04, 7, 0, 8, true, true, 13),
            Err(LgwError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_timeout_window_simulated_clock() {
        let window = timeout_start();
        let start = window.start();
        assert!(!window.is_expired_at(start, 10));
        assert!(!window.is_expired_at(start + Duration::from_millis(9), 10));
        assert!(window.is_expired_at(start + Duration::from_millis(10), 10));
    }

    #[test]
    fn test_zero_limit_is_immediately_expired() {
        let window = timeout_start();
        assert!(timeout_check(&window, 0));
    }
}
