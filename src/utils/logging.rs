use env_logger::{Builder, Env};
use log::LevelFilter;

/// Initializes `env_logger` for binaries embedding the master stack.
///
/// `RUST_LOG` still wins over `default_level` when it is set. Calling this
/// more than once is harmless; later calls are ignored.
pub fn init_logging(default_level: LevelFilter) {
    let env = Env::default().default_filter_or(default_level.as_str());

    let _ = Builder::from_env(env)
        .format_timestamp_millis()
        .format_module_path(false)
        .try_init();
}

/// Renders frame bytes for `debug!` dumps, e.g. `01 03 00 10 00 04`.
pub fn frame_hex(bytes: &[u8]) -> String {
    let encoded = hex::encode_upper(bytes);
    let mut out = String::with_capacity(encoded.len() + bytes.len());
    for (i, pair) in encoded.as_bytes().chunks(2).enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(std::str::from_utf8(pair).unwrap_or("??"));
    }
    out
}
