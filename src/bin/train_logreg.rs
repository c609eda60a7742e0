use std::error::Error;
use std::process::ExitCode;

use mnist_export::{logger::install_logger, logreg};

fn main() -> ExitCode {
    install_logger(true, None);
    log::info!("Script started.");

    let config = logreg::LogRegConfig::new();

    match logreg::run(&config) {
        Ok(_) => {
            log::info!("Done.");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("ERROR OCCURRED: {err}");
            let mut source = err.source();
            while let Some(cause) = source {
                eprintln!("  caused by: {cause}");
                source = cause.source();
            }
            ExitCode::FAILURE
        }
    }
}
