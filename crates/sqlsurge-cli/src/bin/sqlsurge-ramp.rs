//! sqlsurge-ramp: open connections one by one until the server refuses.

use std::process::ExitCode;

use sqlsurge_cli::args::RampArgs;
use sqlsurge_cli::{commands, logging, parse_or_usage};

#[tokio::main]
async fn main() -> ExitCode {
    let args = match parse_or_usage::<RampArgs>() {
        Ok(args) => args,
        Err(code) => return code,
    };
    logging::init(&args.output);

    match commands::ramp::run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(1)
        }
    }
}
