pub mod formatters;

pub use formatters::{ConsoleFormatter, ExchangeFormatter, HexFormatter, JsonFormatter};
