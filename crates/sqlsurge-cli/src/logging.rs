//! Tracing setup for the binaries. Logs go to stderr; stdout carries the report.

use tracing_subscriber::EnvFilter;

use crate::args::OutputArgs;

/// Filter used when `RUST_LOG` is unset.
pub fn default_directive(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "warn,sqlsurge=info",
        _ => "info,sqlsurge=debug",
    }
}

pub fn init(output: &OutputArgs) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(output.verbose)));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if output.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}
