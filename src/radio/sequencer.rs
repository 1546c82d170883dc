//! # Radio Configuration Sequencer
//!
//! Brings a radio chain from reset to continuous receive. The SX1250 path
//! walks every state:
//!
//! ```text
//! Reset -> StandbyRc -> Calibrating -> StandbyXosc -> Configured -> ReceiveReady
//! ```
//!
//! SX1255/SX1257 chains have no standby handshake and go straight from
//! `Reset` to `Configured` (trims and PLL frequency) and then to
//! `ReceiveReady` once the PLL locks.
//!
//! A failed step stops that chain only. The returned [`BringUpError`] names
//! the chain and the state that could not be entered; nothing is retried.

use super::sx1250::{CalibParams, ChipMode, DeviceErrors, OpCode, StandbyMode, Sx1250};
use super::frontend;
use super::sx125x::Sx125x;
use super::{ChipFamily, RadioDialect};
use crate::config::{ConcentratorConfig, RadioChainConfig};
use crate::error::{BringUpError, LgwError, Result};
use crate::spi::addressing::MuxTarget;
use crate::spi::{BusHandle, SpiTransport};
use crate::timing::Delay;
use log::{debug, error, info, warn};

/// Pause after standby, calibration and image calibration commands
pub const STEP_DELAY_MS: u32 = 10;

/// Hold time for each reset line level
pub const RESET_HOLD_MS: u32 = 100;

/// `SetRx` timeout meaning continuous receive
pub const RX_CONTINUOUS: u32 = 0x00FF_FFFF;

/// Register writes applied before the RF frequency is programmed
const SX1250_INIT_REGISTERS: [(u16, u8); 9] = [
    // FSK bitrate
    (0x06A1, 0x01),
    (0x06A2, 0x00),
    (0x06A3, 0x00),
    // DIO drive, input enable, pull-up, pull-down, output enable
    (0x0582, 0x00),
    (0x0583, 0x00),
    (0x0584, 0x00),
    (0x0585, 0x00),
    (0x0580, 0x00),
    // Fixed gain
    (0x08B6, 0x2A),
];

const SX1250_FREQ_OFFSET_REG: u16 = 0x088F;
const SX1250_SINGLE_INPUT_REG: u16 = 0x08E2;
const SX1250_SINGLE_INPUT_VALUE: u8 = 0x0D;
const SX1250_FPGA_MODE_REG: u16 = 0x0587;
const SX1250_FPGA_MODE_VALUE: u8 = 0x0B;

/// Image calibration bands as open intervals `(low, high, code)`
const IMAGE_CALIBRATION_BANDS: [(u32, u32, [u8; 2]); 5] = [
    (430_000_000, 440_000_000, [0x6B, 0x6F]),
    (470_000_000, 510_000_000, [0x75, 0x81]),
    (779_000_000, 787_000_000, [0xC1, 0xC5]),
    (863_000_000, 870_000_000, [0xD7, 0xDB]),
    (902_000_000, 928_000_000, [0xE1, 0xE9]),
];

/// Bring-up progress of one radio chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SequencerState {
    Reset,
    StandbyRc,
    Calibrating,
    StandbyXosc,
    Configured,
    ReceiveReady,
}

/// Current configuration of one radio chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadioChainState {
    pub chain: MuxTarget,
    pub family: ChipFamily,
    pub enabled: bool,
    pub tx_enabled: bool,
    pub single_input_mode: bool,
    /// Frequency programmed into the chip, once it has been
    pub current_frequency_hz: Option<u32>,
}

/// Reset and power lines of the concentrator board
pub trait ResetPins {
    /// Whether the board has a power-enable line.
    fn has_power_enable(&self) -> bool {
        false
    }

    fn set_power_enable(&mut self, _high: bool) -> Result<()> {
        Ok(())
    }

    fn set_reset(&mut self, high: bool) -> Result<()>;
}

/// Resets the concentrator and both radio chains.
///
/// Power-enable is raised first when present, then reset is pulsed high and
/// released, holding each level for [`RESET_HOLD_MS`].
pub fn reset_concentrator<P: ResetPins + ?Sized, D: Delay>(pins: &mut P, mut delay: D) -> Result<()> {
    if pins.has_power_enable() {
        pins.set_power_enable(true)?;
        delay.delay_ms(RESET_HOLD_MS);
    }
    pins.set_reset(true)?;
    delay.delay_ms(RESET_HOLD_MS);
    pins.set_reset(false)?;
    delay.delay_ms(RESET_HOLD_MS);
    info!("Concentrator reset complete");
    Ok(())
}

/// `CalibrateImage` parameters for the band containing `freq_hz`.
pub fn image_calibration_code(freq_hz: u32) -> Result<[u8; 2]> {
    IMAGE_CALIBRATION_BANDS
        .iter()
        .find(|(low, high, _)| freq_hz > *low && freq_hz < *high)
        .map(|(_, _, code)| *code)
        .ok_or(LgwError::UnsupportedFrequency(freq_hz))
}

fn advance(
    chain: MuxTarget,
    state: &mut SequencerState,
    next: SequencerState,
    outcome: Result<()>,
) -> std::result::Result<(), BringUpError> {
    match outcome {
        Ok(()) => {
            debug!("Radio {:?}: {:?} -> {:?}", chain, state, next);
            *state = next;
            Ok(())
        }
        Err(source) => {
            error!("Radio {:?}: failed to enter {:?}: {}", chain, next, source);
            Err(BringUpError::new(chain, next, source))
        }
    }
}

fn enter_standby<T: SpiTransport, D: Delay>(
    radio: &mut Sx1250<'_, T, D>,
    mode: StandbyMode,
    expected: ChipMode,
) -> Result<()> {
    radio.set_standby(mode)?;
    radio.wait_ms(STEP_DELAY_MS);
    let status = radio.get_status()?;
    if status.mode_bits() != expected.code() {
        warn!(
            "SX1250 {:?} status 0x{:02X}, expected mode {:?}",
            radio.target(),
            status.0,
            expected
        );
        return Err(LgwError::ModeVerificationFailed {
            expected: expected.code(),
            actual: status.mode_bits(),
        });
    }
    Ok(())
}

fn calibrate_blocks<T: SpiTransport, D: Delay>(radio: &mut Sx1250<'_, T, D>) -> Result<()> {
    radio.calibrate(CalibParams::ALL)?;
    radio.wait_ms(STEP_DELAY_MS);
    Ok(())
}

fn configure_receiver<T: SpiTransport, D: Delay>(
    radio: &mut Sx1250<'_, T, D>,
    freq_hz: u32,
) -> Result<()> {
    for (address, value) in SX1250_INIT_REGISTERS {
        radio.write_register(address, &[value])?;
    }
    radio.set_rf_frequency(freq_hz)?;
    radio.write_register(SX1250_FREQ_OFFSET_REG, &[0x00, 0x00, 0x00])
}

fn start_receive<T: SpiTransport, D: Delay>(
    radio: &mut Sx1250<'_, T, D>,
    single_input_mode: bool,
) -> Result<()> {
    radio.set_rx(RX_CONTINUOUS)?;
    if single_input_mode {
        radio.write_register(SX1250_SINGLE_INPUT_REG, &[SX1250_SINGLE_INPUT_VALUE])?;
    }
    radio.write_register(SX1250_FPGA_MODE_REG, &[SX1250_FPGA_MODE_VALUE])
}

fn configure_sx125x<T: SpiTransport, D: Delay>(
    radio: &mut Sx125x<'_, T, D>,
    clock_output: bool,
    freq_hz: u32,
) -> Result<()> {
    radio.version()?;
    radio.configure_clock(clock_output)?;
    radio.configure_trims()?;
    radio.set_rx_frequency(freq_hz)
}

/// Bring-up driver for one radio chain
pub struct RadioSequencer<'a, T: SpiTransport, D: Delay> {
    dialect: RadioDialect<'a, T, D>,
    chain: RadioChainState,
    frequency_hz: u32,
    state: SequencerState,
}

impl<'a, T: SpiTransport, D: Delay> RadioSequencer<'a, T, D> {
    /// Creates a sequencer for `target` from its chain configuration.
    ///
    /// # Arguments
    ///
    /// * `bus` - Shared concentrator bus
    /// * `target` - `RadioA` or `RadioB`
    /// * `config` - Chain parameters
    /// * `delay` - Delay capability used for every wait
    pub fn new(
        bus: &'a BusHandle<T>,
        target: MuxTarget,
        config: &RadioChainConfig,
        delay: D,
    ) -> Result<Self> {
        if config.single_input_mode && !config.chip.uses_opcodes() {
            return Err(LgwError::InvalidParameter(format!(
                "single input mode is not available on {:?}",
                config.chip
            )));
        }
        let dialect = RadioDialect::for_chain(bus, target, config.chip, delay)?;
        Ok(Self {
            dialect,
            chain: RadioChainState {
                chain: target,
                family: config.chip,
                enabled: config.enable,
                tx_enabled: config.tx_enable,
                single_input_mode: config.single_input_mode,
                current_frequency_hz: None,
            },
            frequency_hz: config.frequency_hz,
            state: SequencerState::Reset,
        })
    }

    pub fn state(&self) -> SequencerState {
        self.state
    }

    pub fn chain(&self) -> &RadioChainState {
        &self.chain
    }

    /// Runs the full bring-up of an enabled chain.
    ///
    /// `clock_output` selects whether this chain drives the 32 MHz clock to
    /// the concentrator; only SX125x chips route it through a register.
    pub fn bring_up(&mut self, clock_output: bool) -> std::result::Result<(), BringUpError> {
        let chain = self.chain.chain;
        if !self.chain.enabled {
            return Err(BringUpError::new(
                chain,
                self.state,
                LgwError::InvalidParameter(format!("radio chain {chain:?} is disabled")),
            ));
        }
        if self.state != SequencerState::Reset {
            return Err(BringUpError::new(
                chain,
                self.state,
                LgwError::InvalidParameter(format!(
                    "bring-up must start from Reset, chain is {:?}",
                    self.state
                )),
            ));
        }

        let freq_hz = self.frequency_hz;
        let single_input_mode = self.chain.single_input_mode;
        let state = &mut self.state;
        match &mut self.dialect {
            RadioDialect::Opcode(radio) => {
                let outcome = enter_standby(radio, StandbyMode::Rc, ChipMode::StandbyRc);
                advance(chain, state, SequencerState::StandbyRc, outcome)?;

                let outcome = calibrate_blocks(radio);
                advance(chain, state, SequencerState::Calibrating, outcome)?;

                let outcome = enter_standby(radio, StandbyMode::Xosc, ChipMode::StandbyXosc);
                advance(chain, state, SequencerState::StandbyXosc, outcome)?;

                let outcome = configure_receiver(radio, freq_hz);
                advance(chain, state, SequencerState::Configured, outcome)?;
                self.chain.current_frequency_hz = Some(freq_hz);

                let outcome = start_receive(radio, single_input_mode);
                advance(chain, state, SequencerState::ReceiveReady, outcome)?;
            }
            RadioDialect::FlatRegister(radio) => {
                let outcome = configure_sx125x(radio, clock_output, freq_hz);
                advance(chain, state, SequencerState::Configured, outcome)?;
                self.chain.current_frequency_hz = Some(freq_hz);

                let outcome = radio.start_pll().map(|_| ());
                advance(chain, state, SequencerState::ReceiveReady, outcome)?;
            }
        }

        info!(
            "Radio {:?} ({:?}) receiving at {} Hz",
            chain, self.chain.family, freq_hz
        );
        Ok(())
    }

    /// Runs SX1250 image calibration for the band containing `freq_hz`.
    ///
    /// The band is checked before anything is sent, so an unsupported
    /// frequency produces no bus traffic.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - Calibration reported no image error
    /// * `Err(LgwError::UnsupportedFrequency)` - No band contains `freq_hz`
    /// * `Err(LgwError::CalibrationFailed)` - The device error word flags the image block
    pub fn calibrate_image(&mut self, freq_hz: u32) -> Result<()> {
        let RadioDialect::Opcode(radio) = &mut self.dialect else {
            return Err(LgwError::InvalidParameter(format!(
                "image calibration is not available on {:?}",
                self.chain.family
            )));
        };
        let code = image_calibration_code(freq_hz)?;

        radio.get_status()?;
        radio.write_command(OpCode::CalibrateImage, &code)?;
        radio.wait_ms(STEP_DELAY_MS);

        let errors = radio.get_device_errors()?;
        if errors.contains(DeviceErrors::IMG_CALIB) {
            error!(
                "SX1250 {:?} image calibration failed at {} Hz",
                self.chain.chain, freq_hz
            );
            return Err(LgwError::CalibrationFailed(errors.bits()));
        }
        debug!(
            "SX1250 {:?} image calibrated with {:02X?}",
            self.chain.chain, code
        );
        Ok(())
    }
}

/// Result of bringing up one chain with [`bring_up_all`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainOutcome {
    /// Chain disabled in the configuration, untouched
    Disabled,
    /// Chain receiving
    Ready(RadioChainState),
    /// Chain bring-up stopped
    Failed(BringUpError),
}

impl ChainOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, ChainOutcome::Ready(_))
    }
}

/// Resets the board and brings up every enabled chain.
///
/// Steps run in concentrator start order:
///
/// 1. parameter checks: an SX1250 chain whose frequency lies in no image
///    calibration band fails here, before any bus traffic;
/// 2. board reset through `pins`;
/// 3. per chain, radio enable, reset pulse and dialect selection in the core;
/// 4. concentrator clock taken from `clock_source`;
/// 5. image calibration of each SX1250 chain;
/// 6. per chain bring-up to `ReceiveReady`.
///
/// A failure on one chain is recorded in its slot and the other chain is
/// still attempted. Radio reset failures are reported under
/// [`SequencerState::Reset`], image calibration failures under
/// [`SequencerState::Calibrating`].
///
/// # Returns
///
/// * `Ok([radio_a, radio_b])` - Per-chain outcome
/// * `Err(LgwError)` - Invalid configuration, reset line or clock selection failure
pub fn bring_up_all<T: SpiTransport, P: ResetPins + ?Sized, D: Delay>(
    bus: &BusHandle<T>,
    config: &ConcentratorConfig,
    pins: &mut P,
    mut delay: D,
) -> Result<[ChainOutcome; 2]> {
    config.validate()?;

    let mut outcomes = [ChainOutcome::Disabled, ChainOutcome::Disabled];
    let mut active = [false; 2];
    for (index, chain_config) in config.chains().into_iter().enumerate() {
        if !chain_config.enable {
            debug!("Radio chain {} disabled, skipped", index);
            continue;
        }
        let target = MuxTarget::radio(index)?;
        if chain_config.chip.uses_opcodes() {
            if let Err(source) = image_calibration_code(chain_config.frequency_hz) {
                error!("Radio {:?}: {}", target, source);
                outcomes[index] = ChainOutcome::Failed(BringUpError::new(
                    target,
                    SequencerState::Calibrating,
                    source,
                ));
                continue;
            }
        }
        active[index] = true;
    }

    reset_concentrator(pins, &mut delay)?;

    for (index, chain_config) in config.chains().into_iter().enumerate() {
        if !active[index] {
            continue;
        }
        let target = MuxTarget::radio(index)?;
        let chip = chain_config.chip;
        let outcome = frontend::reset_radio(bus, target, chip, &mut delay)
            .and_then(|()| frontend::set_radio_mode(bus, target, chip));
        if let Err(source) = outcome {
            error!("Radio {:?}: reset failed: {}", target, source);
            outcomes[index] =
                ChainOutcome::Failed(BringUpError::new(target, SequencerState::Reset, source));
            active[index] = false;
        }
    }

    frontend::select_clock(bus, MuxTarget::radio(usize::from(config.clock_source))?)?;

    for (index, chain_config) in config.chains().into_iter().enumerate() {
        if !active[index] || !chain_config.chip.uses_opcodes() {
            continue;
        }
        let target = MuxTarget::radio(index)?;
        let outcome = RadioSequencer::new(bus, target, chain_config, &mut delay)
            .and_then(|mut sequencer| sequencer.calibrate_image(chain_config.frequency_hz));
        if let Err(source) = outcome {
            outcomes[index] = ChainOutcome::Failed(BringUpError::new(
                target,
                SequencerState::Calibrating,
                source,
            ));
            active[index] = false;
        }
    }

    for (index, chain_config) in config.chains().into_iter().enumerate() {
        if !active[index] {
            continue;
        }
        let target = MuxTarget::radio(index)?;
        let clock_output = usize::from(config.clock_source) == index;
        outcomes[index] = match RadioSequencer::new(bus, target, chain_config, &mut delay) {
            Ok(mut sequencer) => match sequencer.bring_up(clock_output) {
                Ok(()) => ChainOutcome::Ready(sequencer.chain().clone()),
                Err(err) => ChainOutcome::Failed(err),
            },
            Err(source) => {
                ChainOutcome::Failed(BringUpError::new(target, SequencerState::Reset, source))
            }
        };
    }

    Ok(outcomes)
}
