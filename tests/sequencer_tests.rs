//! Integration tests for radio bring-up through the public API.

use loragw_rs::radio::sx1250::OpCode;
use loragw_rs::spi::mock::MockSpiBus;
use loragw_rs::{
    bring_up_all, open, Access, BusConfig, ChainOutcome, ChipFamily, ConcentratorConfig, Delay,
    LgwError, MuxTarget, RadioChainConfig, RadioSequencer, ResetPins, Result, SequencerState,
};

#[derive(Default)]
struct RecordingDelay(Vec<u32>);

impl Delay for RecordingDelay {
    fn delay_ms(&mut self, ms: u32) {
        self.0.push(ms);
    }
}

#[derive(Default)]
struct Pins {
    resets: Vec<bool>,
}

impl ResetPins for Pins {
    fn set_reset(&mut self, high: bool) -> Result<()> {
        self.resets.push(high);
        Ok(())
    }
}

fn enabled(chip: ChipFamily, frequency_hz: u32) -> RadioChainConfig {
    RadioChainConfig {
        enable: true,
        chip,
        frequency_hz,
        ..RadioChainConfig::default()
    }
}

/// Opcodes written to a chain, in order.
fn written_opcodes(mock: &MockSpiBus, target: MuxTarget) -> Vec<u8> {
    mock.commands(target)
        .into_iter()
        .filter(|(access, _, _)| *access == Access::Write)
        .map(|(_, op, _)| op)
        .collect()
}

/// Tests the SX1250 command order from reset to receive.
#[test]
fn test_sx1250_command_order() {
    let mock = MockSpiBus::new();
    let bus = open(mock.clone(), &BusConfig::default()).unwrap();
    let mut config = enabled(ChipFamily::Sx1250, 868_100_000);
    config.single_input_mode = true;
    let mut delay = RecordingDelay::default();
    let mut seq = RadioSequencer::new(&bus, MuxTarget::RadioA, &config, &mut delay).unwrap();
    seq.bring_up(false).unwrap();
    assert_eq!(seq.state(), SequencerState::ReceiveReady);

    let mut expected = vec![
        OpCode::SetStandby.as_byte(),
        OpCode::Calibrate.as_byte(),
        OpCode::SetStandby.as_byte(),
    ];
    expected.extend([OpCode::WriteRegister.as_byte(); 9]);
    expected.push(OpCode::SetRfFrequency.as_byte());
    expected.push(OpCode::WriteRegister.as_byte());
    expected.push(OpCode::SetRx.as_byte());
    expected.extend([OpCode::WriteRegister.as_byte(); 2]);
    assert_eq!(written_opcodes(&mock, MuxTarget::RadioA), expected);

    assert_eq!(mock.radio_register(MuxTarget::RadioA, 0x08E2), 0x0D);
    assert_eq!(mock.radio_register(MuxTarget::RadioA, 0x06A1), 0x01);
    assert_eq!(mock.rf_frequency(MuxTarget::RadioA), Some(910_268_826));

    // Every command is preceded by the 1 ms settle delay; the standby and
    // calibration steps add 10 ms each.
    assert_eq!(delay.0.iter().filter(|ms| **ms == 10).count(), 3);
    assert!(delay.0.iter().all(|ms| *ms == 1 || *ms == 10));
}

/// Tests that a wrong mode after STANDBY_RC stops the chain before calibration.
#[test]
fn test_mode_mismatch_aborts_before_calibration() {
    let mock = MockSpiBus::new();
    mock.force_status_mode(MuxTarget::RadioB, Some(0x3));
    let bus = open(mock.clone(), &BusConfig::default()).unwrap();
    let config = enabled(ChipFamily::Sx1250, 868_000_000);
    let mut seq =
        RadioSequencer::new(&bus, MuxTarget::RadioB, &config, RecordingDelay::default()).unwrap();

    let err = seq.bring_up(false).unwrap_err();
    assert_eq!(err.chain, MuxTarget::RadioB);
    assert_eq!(err.state, SequencerState::StandbyRc);
    assert_eq!(
        err.to_string(),
        "Radio chain RadioB failed in state StandbyRc: Mode verification failed: expected 0x2, got 0x3"
    );
    assert_eq!(
        written_opcodes(&mock, MuxTarget::RadioB),
        vec![OpCode::SetStandby.as_byte()]
    );
}

/// Tests that a wrong mode after STANDBY_XOSC is reported at that state.
#[test]
fn test_xosc_mode_mismatch() {
    let mock = MockSpiBus::new();
    let bus = open(mock.clone(), &BusConfig::default()).unwrap();
    let config = enabled(ChipFamily::Sx1250, 868_000_000);
    let mut seq =
        RadioSequencer::new(&bus, MuxTarget::RadioA, &config, RecordingDelay::default()).unwrap();
    // Chip stays in STDBY_RC whatever it is told
    mock.force_status_mode(MuxTarget::RadioA, Some(0x2));
    let err = seq.bring_up(false).unwrap_err();
    assert_eq!(err.state, SequencerState::StandbyXosc);
    assert_eq!(seq.state(), SequencerState::Calibrating);
}

/// Tests that an I/O error during bring-up is carried unchanged.
#[test]
fn test_io_error_during_bring_up() {
    let mock = MockSpiBus::new();
    let bus = open(mock.clone(), &BusConfig::default()).unwrap();
    let config = enabled(ChipFamily::Sx1250, 915_000_000);
    let mut seq =
        RadioSequencer::new(&bus, MuxTarget::RadioA, &config, RecordingDelay::default()).unwrap();
    mock.fail_next_transfer("spi timeout");
    let err = seq.bring_up(false).unwrap_err();
    assert_eq!(err.state, SequencerState::StandbyRc);
    assert_eq!(err.source, LgwError::TransferFailed("spi timeout".to_string()));
}

/// Tests that 868 MHz selects the 863-870 MHz image calibration code.
#[test]
fn test_image_calibration_868() {
    let mock = MockSpiBus::new();
    let bus = open(mock.clone(), &BusConfig::default()).unwrap();
    let config = enabled(ChipFamily::Sx1250, 868_000_000);
    let mut delay = RecordingDelay::default();
    let mut seq = RadioSequencer::new(&bus, MuxTarget::RadioA, &config, &mut delay).unwrap();
    seq.calibrate_image(868_000_000).unwrap();

    let commands = mock.commands(MuxTarget::RadioA);
    let ops: Vec<u8> = commands.iter().map(|(_, op, _)| *op).collect();
    assert_eq!(
        ops,
        vec![
            OpCode::GetStatus.as_byte(),
            OpCode::CalibrateImage.as_byte(),
            OpCode::GetDeviceErrors.as_byte()
        ]
    );
    assert_eq!(commands[1].2, vec![0xD7, 0xDB]);
    assert_eq!(delay.0, vec![1, 1, 10, 1]);
}

/// Tests that frequencies outside every band, band edges included, are
/// rejected without bus traffic.
#[test]
fn test_image_calibration_unsupported() {
    let mock = MockSpiBus::new();
    let bus = open(mock.clone(), &BusConfig::default()).unwrap();
    let config = enabled(ChipFamily::Sx1250, 868_000_000);
    let mut seq =
        RadioSequencer::new(&bus, MuxTarget::RadioA, &config, RecordingDelay::default()).unwrap();
    assert_eq!(
        seq.calibrate_image(600_000_000),
        Err(LgwError::UnsupportedFrequency(600_000_000))
    );
    assert_eq!(
        seq.calibrate_image(870_000_000),
        Err(LgwError::UnsupportedFrequency(870_000_000))
    );
    assert_eq!(mock.transaction_count(), 0);
}

/// Tests that image calibration is refused on an SX125x chain.
#[test]
fn test_image_calibration_needs_sx1250() {
    let mock = MockSpiBus::with_radios(ChipFamily::Sx1257, ChipFamily::Sx1257);
    let bus = open(mock.clone(), &BusConfig::default()).unwrap();
    let config = enabled(ChipFamily::Sx1257, 868_000_000);
    let mut seq =
        RadioSequencer::new(&bus, MuxTarget::RadioA, &config, RecordingDelay::default()).unwrap();
    assert!(matches!(
        seq.calibrate_image(868_000_000),
        Err(LgwError::InvalidParameter(_))
    ));
    assert_eq!(mock.transaction_count(), 0);
}

/// Tests an SX1257 chain whose PLL never locks.
#[test]
fn test_sx125x_pll_failure_state() {
    let mock = MockSpiBus::with_radios(ChipFamily::Sx1257, ChipFamily::Sx1257);
    mock.set_pll_locks(MuxTarget::RadioA, false);
    let bus = open(mock.clone(), &BusConfig::default()).unwrap();
    let config = enabled(ChipFamily::Sx1257, 868_000_000);
    let mut seq =
        RadioSequencer::new(&bus, MuxTarget::RadioA, &config, RecordingDelay::default()).unwrap();
    let err = seq.bring_up(true).unwrap_err();
    assert_eq!(err.state, SequencerState::ReceiveReady);
    assert_eq!(err.source, LgwError::PllLockFailed { attempts: 5 });
    assert_eq!(seq.state(), SequencerState::Configured);
    assert_eq!(seq.chain().current_frequency_hz, Some(868_000_000));
}

/// Tests that one failing chain does not stop the other.
#[test]
fn test_bring_up_all_isolates_chains() {
    let mock = MockSpiBus::new();
    mock.force_status_mode(MuxTarget::RadioA, Some(0x6));
    let bus = open(mock.clone(), &BusConfig::default()).unwrap();
    let config = ConcentratorConfig {
        radio_a: enabled(ChipFamily::Sx1250, 867_500_000),
        radio_b: enabled(ChipFamily::Sx1250, 868_500_000),
        ..ConcentratorConfig::default()
    };
    let mut pins = Pins::default();
    let outcomes = bring_up_all(&bus, &config, &mut pins, RecordingDelay::default()).unwrap();

    assert_eq!(pins.resets, vec![true, false]);
    match &outcomes[0] {
        ChainOutcome::Failed(err) => assert_eq!(err.state, SequencerState::StandbyRc),
        other => panic!("radio A should fail, got {other:?}"),
    }
    match &outcomes[1] {
        ChainOutcome::Ready(state) => {
            assert_eq!(state.chain, MuxTarget::RadioB);
            assert_eq!(state.current_frequency_hz, Some(868_500_000));
        }
        other => panic!("radio B should be ready, got {other:?}"),
    }

    // Image calibration runs before setup, so both chains were calibrated
    // and radio A stopped at its first standby command
    let ops_a = written_opcodes(&mock, MuxTarget::RadioA);
    assert_eq!(
        ops_a,
        vec![OpCode::CalibrateImage.as_byte(), OpCode::SetStandby.as_byte()]
    );
    let ops_b = written_opcodes(&mock, MuxTarget::RadioB);
    assert_eq!(ops_b[0], OpCode::CalibrateImage.as_byte());
    assert_eq!(ops_b[1], OpCode::SetStandby.as_byte());
}

/// Tests that disabled chains are skipped without bus traffic.
#[test]
fn test_bring_up_all_skips_disabled() {
    let mock = MockSpiBus::with_radios(ChipFamily::Sx1257, ChipFamily::Sx1257);
    let bus = open(mock.clone(), &BusConfig::default()).unwrap();
    let config = ConcentratorConfig {
        clock_source: 1,
        radio_a: RadioChainConfig {
            chip: ChipFamily::Sx1257,
            ..RadioChainConfig::default()
        },
        radio_b: enabled(ChipFamily::Sx1257, 868_000_000),
        ..ConcentratorConfig::default()
    };
    let outcomes =
        bring_up_all(&bus, &config, &mut Pins::default(), RecordingDelay::default()).unwrap();
    assert_eq!(outcomes[0], ChainOutcome::Disabled);
    assert!(outcomes[1].is_ready());
    assert!(mock.register_writes(MuxTarget::RadioA).is_empty());
    // Radio B provides the clock
    assert_eq!(mock.radio_register(MuxTarget::RadioB, 16), 2);
}

/// Tests that an image calibration failure is reported in the chain's slot.
#[test]
fn test_bring_up_all_reports_calibration_failure() {
    let mock = MockSpiBus::new();
    mock.set_device_errors(MuxTarget::RadioB, 0x0010);
    let bus = open(mock.clone(), &BusConfig::default()).unwrap();
    let config = ConcentratorConfig {
        radio_a: enabled(ChipFamily::Sx1250, 868_000_000),
        radio_b: enabled(ChipFamily::Sx1250, 868_000_000),
        ..ConcentratorConfig::default()
    };
    let outcomes =
        bring_up_all(&bus, &config, &mut Pins::default(), RecordingDelay::default()).unwrap();
    assert!(outcomes[0].is_ready());
    match &outcomes[1] {
        ChainOutcome::Failed(err) => {
            assert_eq!(err.state, SequencerState::Calibrating);
            assert_eq!(err.source, LgwError::CalibrationFailed(0x0010));
        }
        other => panic!("radio B should fail calibration, got {other:?}"),
    }
    // Radio B is left uncalibrated and never configured
    assert_eq!(
        written_opcodes(&mock, MuxTarget::RadioB),
        vec![OpCode::CalibrateImage.as_byte()]
    );
}

/// Tests that a chain outside every image calibration band is rejected
/// before anything is sent to it.
#[test]
fn test_bring_up_all_rejects_out_of_band_chain_without_traffic() {
    let mock = MockSpiBus::new();
    let bus = open(mock.clone(), &BusConfig::default()).unwrap();
    let config = ConcentratorConfig {
        clock_source: 1,
        radio_a: enabled(ChipFamily::Sx1250, 600_000_000),
        radio_b: enabled(ChipFamily::Sx1250, 868_000_000),
        ..ConcentratorConfig::default()
    };
    let outcomes =
        bring_up_all(&bus, &config, &mut Pins::default(), RecordingDelay::default()).unwrap();

    match &outcomes[0] {
        ChainOutcome::Failed(err) => {
            assert_eq!(err.chain, MuxTarget::RadioA);
            assert_eq!(err.state, SequencerState::Calibrating);
            assert_eq!(err.source, LgwError::UnsupportedFrequency(600_000_000));
        }
        other => panic!("radio A should be rejected, got {other:?}"),
    }
    assert!(outcomes[1].is_ready());
    assert!(mock.commands(MuxTarget::RadioA).is_empty());
    assert!(mock.register_writes(MuxTarget::RadioA).is_empty());
    // Radio A was never enabled or reset in the core
    assert_eq!(mock.register(0x5783), 0x00);
}

/// Tests the concentrator-side radio control order ahead of radio traffic.
#[test]
fn test_bring_up_all_core_sequence() {
    let mock = MockSpiBus::new();
    let bus = open(mock.clone(), &BusConfig::default()).unwrap();
    let config = ConcentratorConfig {
        radio_a: enabled(ChipFamily::Sx1250, 867_500_000),
        radio_b: enabled(ChipFamily::Sx1250, 868_500_000),
        ..ConcentratorConfig::default()
    };
    let mut delay = RecordingDelay::default();
    let outcomes = bring_up_all(&bus, &config, &mut Pins::default(), &mut delay).unwrap();
    assert!(outcomes.iter().all(ChainOutcome::is_ready));

    assert_eq!(
        mock.register_writes(MuxTarget::Concentrator),
        vec![
            // Radio A: SPI clock, enable, reset pulse, SX1250 re-assert, mode
            (0x5601, 0x00),
            (0x5783, 0x02),
            (0x5783, 0x03),
            (0x5783, 0x02),
            (0x5783, 0x03),
            (0x5601, 0x01),
            // Radio B
            (0x5601, 0x01),
            (0x5784, 0x02),
            (0x5784, 0x03),
            (0x5784, 0x02),
            (0x5784, 0x03),
            (0x5601, 0x03),
            // Clock from radio A, dividers on, RIF on radio clock
            (0x5F00, 0x01),
            (0x5F00, 0x01),
            (0x5F00, 0x05),
            (0x5601, 0x13),
        ]
    );
    assert_eq!(&delay.0[..8], &[100, 100, 500, 10, 10, 500, 10, 10]);

    let frames = mock.transactions();
    let last_core = frames
        .iter()
        .rposition(|frame| frame[0] == MuxTarget::Concentrator.as_byte())
        .unwrap();
    let first_radio = frames
        .iter()
        .position(|frame| frame[0] != MuxTarget::Concentrator.as_byte())
        .unwrap();
    assert!(last_core < first_radio);
}

/// Tests that an invalid configuration is rejected before the reset pulse.
#[test]
fn test_bring_up_all_validates_first() {
    let mock = MockSpiBus::new();
    let bus = open(mock.clone(), &BusConfig::default()).unwrap();
    let config = ConcentratorConfig {
        clock_source: 2,
        ..ConcentratorConfig::default()
    };
    let mut pins = Pins::default();
    assert!(bring_up_all(&bus, &config, &mut pins, RecordingDelay::default()).is_err());
    assert!(pins.resets.is_empty());
    assert_eq!(mock.transaction_count(), 0);
}
