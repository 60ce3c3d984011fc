use std::time::Duration;

use clap::Parser;
use log::info;

use berrymed_monitor::{init_logging, run};
use berrymed_monitor::device::constants::DEVICE_NAME_FILTER;
use berrymed_monitor::device::types::SessionOptions;
use berrymed_monitor::error::AppRunError;

#[derive(Parser, Debug)]
#[command(author, version)]
#[command(about = "Connects to a BerryMed pulse oximeter over Bluetooth LE and prints its vital-sign notifications.", long_about = None)]
struct Args {
    /// Connect to the first discovered device whose name contains this text
    #[arg(long, default_value = DEVICE_NAME_FILTER)]
    name: String,

    /// How long to scan for the device before giving up
    #[arg(long, default_value = "10s", value_parser = humantime::parse_duration)]
    scan_timeout: Duration,
}

#[tokio::main]
async fn main() -> Result<(), AppRunError> {
    init_logging();
    info!(concat!("BerryMed Monitor ", env!("CARGO_PKG_VERSION")));

    let args = Args::parse();
    let options = SessionOptions {
        name_filter: args.name,
        scan_timeout: args.scan_timeout,
    };

    match run(options).await {
        Err(err) => {
            eprintln!("{}", err);
            Err(err)
        },
        Ok(()) => Ok(()),
    }
}
