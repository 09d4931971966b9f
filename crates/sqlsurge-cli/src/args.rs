//! Command-line arguments shared by the four binaries.
//!
//! Every tool takes the same four leading positionals
//! (`server database username password`) followed by an optional port and
//! its own optional positionals, so old invocations keep working.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::error::ErrorKind;
use clap::{ArgAction, Args, CommandFactory, Parser, ValueEnum};

use sqlsurge_core::{Credentials, DEFAULT_PORT, Target, TuningProfile, WorkloadConfig};
use sqlsurge_driver::{CapacityConfig, HealthCheckConfig, RampConfig};
use sqlsurge_mssql::{Encryption, MssqlConnector, MssqlOptions};

/// How the final report is printed on stdout.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum Format {
    #[default]
    Text,
    Json,
}

#[derive(Args, Clone, Debug)]
pub struct TargetArgs {
    /// Database server IP or hostname
    pub server: String,
    /// Database name
    pub database: String,
    /// Database username
    pub username: String,
    /// Database password
    #[arg(allow_hyphen_values = true)]
    pub password: String,
}

impl TargetArgs {
    pub fn target(&self, port: u16) -> Target {
        Target::new(&self.server, port, &self.database)
    }

    pub fn credentials(&self) -> Credentials {
        Credentials::new(&self.username, &self.password)
    }
}

#[derive(Args, Clone, Debug, Default)]
pub struct ConnectionArgs {
    /// Encrypt the whole session with TLS
    #[arg(long)]
    pub encrypt: bool,
    /// Accept the server certificate without validating it
    #[arg(long)]
    pub trust_server_certificate: bool,
}

impl ConnectionArgs {
    pub fn options(&self) -> MssqlOptions {
        MssqlOptions {
            encryption: if self.encrypt {
                Encryption::Required
            } else {
                Encryption::Off
            },
            trust_cert: self.trust_server_certificate,
            ..Default::default()
        }
    }
}

#[derive(Args, Clone, Debug, Default)]
pub struct OutputArgs {
    /// Final report format
    #[arg(long, value_enum, default_value_t = Format::Text)]
    pub format: Format,
    /// More log output on stderr (-v, -vv)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
    /// Log as JSON lines
    #[arg(long)]
    pub log_json: bool,
}

fn connector(target: &TargetArgs, port: u16, connection: &ConnectionArgs) -> MssqlConnector {
    MssqlConnector::new(target.target(port), target.credentials())
        .with_options(connection.options())
}

fn seconds(value: f64, name: &str) -> Result<Duration> {
    Duration::try_from_secs_f64(value)
        .with_context(|| format!("{name} must be a non-negative number of seconds, got {value}"))
}

fn minutes(value: u64) -> Duration {
    Duration::from_secs(value.saturating_mul(60))
}

// ── sqlsurge ────────────────────────────────────────────────────────

const WORKLOAD_AFTER_HELP: &str = "\
Examples:
  sqlsurge 172.16.4.207 master sa MyPass123
  sqlsurge 172.16.4.207 master sa MyPass123 1433
  sqlsurge 172.16.4.207 master sa MyPass123 1433 15 0.5 3.0 20

This simulates real application behavior:
  - Connection pooling (reuses connections)
  - Random query intervals (realistic load pattern)
  - Multiple concurrent workers
  - Continuous monitoring and statistics";

/// Realistic pooled workload against SQL Server.
#[derive(Parser, Clone, Debug)]
#[command(name = "sqlsurge", version, after_help = WORKLOAD_AFTER_HELP)]
pub struct WorkloadArgs {
    #[command(flatten)]
    pub target: TargetArgs,
    /// Database port
    #[arg(default_value_t = DEFAULT_PORT)]
    pub port: u16,
    /// Test duration in minutes
    #[arg(default_value_t = 10)]
    pub duration_minutes: u64,
    /// Minimum seconds between queries
    #[arg(default_value_t = 1.0)]
    pub min_interval: f64,
    /// Maximum seconds between queries
    #[arg(default_value_t = 5.0)]
    pub max_interval: f64,
    /// Number of connections in the pool
    #[arg(default_value_t = 10)]
    pub pool_size: usize,
    /// Number of workers (default: pool size)
    #[arg(long)]
    pub workers: Option<usize>,
    /// TOML tuning profile
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
    /// Stop early when failures exceed RATIO times the successes
    /// (checked with each statistics block)
    #[arg(long, value_name = "RATIO")]
    pub abort_ratio: Option<f64>,
    #[command(flatten)]
    pub connection: ConnectionArgs,
    #[command(flatten)]
    pub output: OutputArgs,
}

impl WorkloadArgs {
    /// Positionals first, then the tuning profile, then `--workers`.
    pub fn workload_config(&self) -> Result<WorkloadConfig> {
        let mut config = WorkloadConfig {
            pool_size: self.pool_size,
            duration: minutes(self.duration_minutes),
            min_interval: seconds(self.min_interval, "min_interval")?,
            max_interval: seconds(self.max_interval, "max_interval")?,
            ..Default::default()
        };

        if let Some(path) = &self.config {
            TuningProfile::from_file(path)?.apply(&mut config)?;
        }
        if let Some(workers) = self.workers {
            config.workers = Some(workers);
        }
        if let Some(ratio) = self.abort_ratio {
            if !ratio.is_finite() || ratio < 0.0 {
                bail!("abort ratio must be a non-negative number, got {ratio}");
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn connector(&self) -> MssqlConnector {
        connector(&self.target, self.port, &self.connection)
    }
}

// ── sqlsurge-health ─────────────────────────────────────────────────

const HEALTH_AFTER_HELP: &str = "\
Examples:
  sqlsurge-health 172.16.4.207 master sa MyPassword123
  sqlsurge-health 172.16.4.207 master sa MyPassword123 1433 15
  sqlsurge-health 172.16.4.207 master sa MyPassword123 1433 15 2000";

/// Single-connection health check with continuous queries.
#[derive(Parser, Clone, Debug)]
#[command(name = "sqlsurge-health", version, after_help = HEALTH_AFTER_HELP)]
pub struct HealthArgs {
    #[command(flatten)]
    pub target: TargetArgs,
    /// Database port
    #[arg(default_value_t = DEFAULT_PORT)]
    pub port: u16,
    /// Test duration in minutes
    #[arg(default_value_t = 10)]
    pub duration_minutes: u64,
    /// Milliseconds between queries
    #[arg(default_value_t = 5000)]
    pub query_interval_ms: u64,
    #[command(flatten)]
    pub connection: ConnectionArgs,
    #[command(flatten)]
    pub output: OutputArgs,
}

impl HealthArgs {
    pub fn health_config(&self) -> HealthCheckConfig {
        HealthCheckConfig {
            duration: minutes(self.duration_minutes),
            interval: Duration::from_millis(self.query_interval_ms),
            ..Default::default()
        }
    }

    pub fn connector(&self) -> MssqlConnector {
        connector(&self.target, self.port, &self.connection)
    }
}

// ── sqlsurge-ramp ───────────────────────────────────────────────────

const RAMP_AFTER_HELP: &str = "\
Examples:
  sqlsurge-ramp 172.16.20.88 master sa MyPass123
  sqlsurge-ramp 172.16.20.88 master sa MyPass123 1433 150 1

This test:
  - Creates connections one by one (not in parallel)
  - Shows exactly when the limit is hit
  - Holds all connections to verify stability
  - Waits 10 seconds before cleanup (time to check logs)";

/// Open connections one at a time until the server refuses.
#[derive(Parser, Clone, Debug)]
#[command(name = "sqlsurge-ramp", version, after_help = RAMP_AFTER_HELP)]
pub struct RampArgs {
    #[command(flatten)]
    pub target: TargetArgs,
    /// Database port
    #[arg(default_value_t = DEFAULT_PORT)]
    pub port: u16,
    /// Maximum connections to attempt
    #[arg(default_value_t = 100)]
    pub max_connections: usize,
    /// Seconds between connections
    #[arg(default_value_t = 2.0)]
    pub delay: f64,
    #[command(flatten)]
    pub connection: ConnectionArgs,
    #[command(flatten)]
    pub output: OutputArgs,
}

impl RampArgs {
    pub fn ramp_config(&self) -> Result<RampConfig> {
        Ok(RampConfig {
            max_connections: self.max_connections,
            delay: seconds(self.delay, "delay")?,
            ..Default::default()
        })
    }

    pub fn connector(&self) -> MssqlConnector {
        connector(&self.target, self.port, &self.connection)
    }
}

// ── sqlsurge-maxconn ────────────────────────────────────────────────

const MAXCONN_AFTER_HELP: &str = "\
Examples:
  sqlsurge-maxconn 172.16.4.207 master sa MyPassword123
  sqlsurge-maxconn 172.16.4.207 master sa MyPassword123 1433 500

This tool will:
  - Create up to N concurrent connections (default: 200)
  - Create connections in batches of 10
  - Hold each connection for 30 seconds
  - Report the maximum concurrent connections achieved";

/// Find the maximum number of concurrent connections.
#[derive(Parser, Clone, Debug)]
#[command(name = "sqlsurge-maxconn", version, after_help = MAXCONN_AFTER_HELP)]
pub struct MaxconnArgs {
    #[command(flatten)]
    pub target: TargetArgs,
    /// Database port
    #[arg(default_value_t = DEFAULT_PORT)]
    pub port: u16,
    /// Maximum connections to test
    #[arg(default_value_t = 200)]
    pub max_connections: usize,
    #[command(flatten)]
    pub connection: ConnectionArgs,
    #[command(flatten)]
    pub output: OutputArgs,
}

impl MaxconnArgs {
    pub fn capacity_config(&self) -> CapacityConfig {
        CapacityConfig {
            max_connections: self.max_connections,
            ..Default::default()
        }
    }

    pub fn connector(&self) -> MssqlConnector {
        connector(&self.target, self.port, &self.connection)
    }
}

// ── parsing ─────────────────────────────────────────────────────────

/// Parse the process arguments. On bad input the usage text goes to
/// stdout and the caller exits with status 1.
pub fn parse_or_usage<T: Parser>() -> Result<T, ExitCode> {
    parse_from_or_usage(std::env::args_os())
}

pub fn parse_from_or_usage<T, I, S>(args: I) -> Result<T, ExitCode>
where
    T: Parser,
    I: IntoIterator<Item = S>,
    S: Into<OsString> + Clone,
{
    match T::try_parse_from(args) {
        Ok(parsed) => Ok(parsed),
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = e.print();
            Err(ExitCode::SUCCESS)
        }
        Err(e) => {
            println!("{}", e.render());
            println!("{}", T::command().render_long_help());
            Err(ExitCode::from(1))
        }
    }
}
