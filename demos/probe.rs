//! Reads a block of holding registers once and prints the reply.
//!
//! Usage: `cargo run --example probe -- --config modbus.toml --address 0 --count 10`

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, LevelFilter};

use evoc_modbus::utils::init_logging;
use evoc_modbus::{Config, ConsoleFormatter, Exchange, ExchangeFormatter, ModbusMaster};

#[derive(Parser)]
#[command(name = "probe")]
#[command(about = "Read holding registers from a ModBus slave")]
#[command(version)]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = "modbus.toml")]
    config: PathBuf,

    /// First register address
    #[arg(short, long, default_value = "0")]
    address: u16,

    /// Number of registers to read
    #[arg(short = 'n', long, default_value = "10")]
    count: u16,

    /// Enable debug logging (frame dumps)
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(if args.verbose { LevelFilter::Debug } else { LevelFilter::Info });

    let config = Config::from_file(&args.config)
        .with_context(|| format!("failed to load configuration from {}", args.config.display()))?;
    let mut master = ModbusMaster::init(&config).context("failed to start Modbus master")?;
    info!("📊 Reading {} registers starting at {}", args.count, args.address);

    let mut exchange = Exchange::read_holding_registers(args.address, args.count);
    master
        .execute(&mut exchange)
        .context("read holding registers failed")?;
    print!("{}", ConsoleFormatter.format(&exchange));

    master.close()?;
    Ok(())
}
