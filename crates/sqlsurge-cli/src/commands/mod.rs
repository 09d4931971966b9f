//! One module per binary: argument handling, console reporter, run.

pub mod health;
pub mod maxconn;
pub mod ramp;
pub mod workload;
