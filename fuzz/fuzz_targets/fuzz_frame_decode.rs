#![no_main]

use libfuzzer_sys::fuzz_target;
use loragw_rs::spi::addressing::{
    decode_opcode_header, decode_register_header, encode_opcode_header, encode_register_header,
};

fuzz_target!(|data: &[u8]| {
    // Any decoded header must encode back to the same bytes
    if let Some((target, address, access)) = decode_register_header(data) {
        assert_eq!(&encode_register_header(target, address, access)[..], &data[..3]);
    }
    if let Some((target, opcode, access)) = decode_opcode_header(data) {
        assert_eq!(&encode_opcode_header(target, opcode, access)[..], &data[..3]);
    }
});
