use std::env;

use log::{info, warn};
use tokio::signal;
use tokio::spawn;
use tokio_util::sync::CancellationToken;

use crate::device::connection::run_session;
use crate::device::types::SessionOptions;
use crate::error::AppRunError;

pub mod device;
pub mod error;

pub fn init_logging() {
    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                humantime::format_rfc3339(std::time::SystemTime::now()),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(log::LevelFilter::Info)
        .chain(std::io::stderr());

    if let Ok(log_file) = env::var("LOG_FILE") {
        dispatch = dispatch.chain(
            fern::log_file(log_file).expect("Failed to open LOG_FILE")
        );
    }

    dispatch.apply().expect("Failed to initialize logger");
}

pub async fn run(options: SessionOptions) -> Result<(), AppRunError> {
    let cancel = CancellationToken::new();

    let signal_cancel = cancel.clone();
    spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received; shutting down");
                signal_cancel.cancel();
            },
            Err(err) => {
                warn!("Failed to listen for the interrupt signal: {:?}", err);
            },
        }
    });

    run_session(cancel, &options).await?;
    Ok(())
}
