#![no_main]

use libfuzzer_sys::fuzz_target;
use loragw_rs::spi::mock::MockSpiBus;
use loragw_rs::spi::SpiTransport;

fuzz_target!(|data: &[u8]| {
    // The simulated devices must survive arbitrary frames
    let mut mock = MockSpiBus::new();
    mock.add_fifo_port(0x4000);
    let mut rx = vec![0u8; data.len()];
    let _ = mock.transfer(data, &mut rx);
});
