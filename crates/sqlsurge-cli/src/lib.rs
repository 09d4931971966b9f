//! sqlsurge command-line tools.
//!
//! | Binary             | Mode                                          |
//! |--------------------|-----------------------------------------------|
//! | `sqlsurge`         | pooled concurrent workload                    |
//! | `sqlsurge-health`  | one session, one probe per interval           |
//! | `sqlsurge-ramp`    | one connection at a time until refused        |
//! | `sqlsurge-maxconn` | batches of held connections, peak concurrency |
//!
//! Each binary parses its arguments, installs logging and hands off to
//! the matching module in [`commands`].

pub mod args;
pub mod commands;
pub mod console;
pub mod interrupt;
pub mod logging;

pub use args::{Format, parse_or_usage};
