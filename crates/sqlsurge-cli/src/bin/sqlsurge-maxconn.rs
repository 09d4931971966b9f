//! sqlsurge-maxconn: find peak concurrent connections.

use std::process::ExitCode;

use sqlsurge_cli::args::MaxconnArgs;
use sqlsurge_cli::{commands, logging, parse_or_usage};

#[tokio::main]
async fn main() -> ExitCode {
    let args = match parse_or_usage::<MaxconnArgs>() {
        Ok(args) => args,
        Err(code) => return code,
    };
    logging::init(&args.output);

    match commands::maxconn::run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(1)
        }
    }
}
