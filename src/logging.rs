use log::{log_enabled, trace, Level, LevelFilter};

/// Maximum number of bytes shown in a transfer dump before truncation.
const MAX_DUMP_BYTES: usize = 64;

/// Initializes the logger with the `env_logger` crate.
///
/// Verbosity comes from `RUST_LOG`. Calling this more than once is harmless.
pub fn init_logger() {
    let _ = env_logger::try_init();
}

/// Initializes the logger with a fixed maximum level, ignoring `RUST_LOG`.
pub fn init_logger_with_level(level: LevelFilter) {
    let _ = env_logger::Builder::new()
        .filter_level(level)
        .format_timestamp_millis()
        .try_init();
}

/// Logs the bytes of an SPI transfer as hex at trace level.
///
/// Dumps longer than 64 bytes are truncated with the total length appended,
/// so a 4 KiB burst does not flood the log.
pub fn log_transfer_hex(prefix: &str, data: &[u8]) {
    if log_enabled!(Level::Trace) {
        trace!("{prefix}: {}", format_transfer_hex(data));
    }
}

/// Formats a transfer for logging, truncated to the dump limit.
pub fn format_transfer_hex(data: &[u8]) -> String {
    if data.len() > MAX_DUMP_BYTES {
        format!(
            "{}... ({} bytes)",
            hex::encode_upper(&data[..MAX_DUMP_BYTES]),
            data.len()
        )
    } else {
        hex::encode_upper(data)
    }
}
