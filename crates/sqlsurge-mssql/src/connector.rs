//! TDS connector and session.

use std::time::Duration;

use async_trait::async_trait;
use tiberius::error::Error as TdsError;
use tiberius::{AuthMethod, Client, Config, EncryptionLevel};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::debug;

use sqlsurge_core::{ConnectError, Connector, Credentials, QueryError, Row, Session, Target};

use crate::render::row_from_tds;

/// Login redirects (Azure gateways) followed before giving up.
const MAX_REDIRECTS: usize = 2;

/// Transport encryption for the TDS session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Encryption {
    /// Plaintext session; only the login packet is protected if the server insists.
    #[default]
    Off,
    /// TLS for the whole session.
    Required,
}

#[derive(Clone, Debug)]
pub struct MssqlOptions {
    pub encryption: Encryption,
    /// Accept any server certificate.
    pub trust_cert: bool,
    pub application_name: String,
}

impl Default for MssqlOptions {
    fn default() -> Self {
        Self {
            encryption: Encryption::Off,
            trust_cert: false,
            application_name: "sqlsurge".to_string(),
        }
    }
}

/// Opens one SQL Server login per `connect`.
pub struct MssqlConnector {
    target: Target,
    credentials: Credentials,
    options: MssqlOptions,
}

impl MssqlConnector {
    pub fn new(target: Target, credentials: Credentials) -> Self {
        Self {
            target,
            credentials,
            options: MssqlOptions::default(),
        }
    }

    pub fn with_options(mut self, options: MssqlOptions) -> Self {
        self.options = options;
        self
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    fn config(&self) -> Config {
        let mut config = Config::new();
        config.host(&self.target.host);
        config.port(self.target.port);
        config.database(&self.target.database);
        config.application_name(&self.options.application_name);
        config.authentication(AuthMethod::sql_server(
            &self.credentials.user,
            &self.credentials.password,
        ));
        config.encryption(match self.options.encryption {
            Encryption::Off => EncryptionLevel::NotSupported,
            Encryption::Required => EncryptionLevel::Required,
        });
        if self.options.trust_cert {
            config.trust_cert();
        }
        config
    }

    async fn dial(&self) -> Result<Client<Compat<TcpStream>>, ConnectError> {
        let mut config = self.config();

        for _ in 0..=MAX_REDIRECTS {
            let addr = config.get_addr();
            let tcp = TcpStream::connect(&addr)
                .await
                .map_err(|e| ConnectError::Transport(format!("tcp connect to {addr}: {e}")))?;
            // Disable Nagle's algorithm; probes are tiny request/response pairs.
            let _ = tcp.set_nodelay(true);

            match Client::connect(config.clone(), tcp.compat_write()).await {
                Ok(client) => {
                    debug!(%addr, database = %self.target.database, "tds login complete");
                    return Ok(client);
                }
                Err(TdsError::Routing { host, port }) => {
                    debug!(from = %addr, to = %format!("{host}:{port}"), "login redirected");
                    config.host(&host);
                    config.port(port);
                }
                Err(e) => return Err(connect_error(e)),
            }
        }

        Err(ConnectError::Transport(format!(
            "more than {MAX_REDIRECTS} login redirects"
        )))
    }
}

impl std::fmt::Debug for MssqlConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MssqlConnector")
            .field("target", &self.target)
            .field("credentials", &self.credentials)
            .field("options", &self.options)
            .finish()
    }
}

#[async_trait]
impl Connector for MssqlConnector {
    async fn connect(&self, timeout: Duration) -> Result<Box<dyn Session>, ConnectError> {
        let client = tokio::time::timeout(timeout, self.dial())
            .await
            .map_err(|_| ConnectError::Timeout(timeout))??;
        Ok(Box::new(MssqlSession {
            client: Some(client),
        }))
    }
}

/// One logged-in TDS session.
pub struct MssqlSession {
    client: Option<Client<Compat<TcpStream>>>,
}

impl std::fmt::Debug for MssqlSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MssqlSession")
            .field("open", &self.client.is_some())
            .finish()
    }
}

#[async_trait]
impl Session for MssqlSession {
    async fn execute(&mut self, query: &str) -> Result<Row, QueryError> {
        let client = self.client.as_mut().ok_or(QueryError::Closed)?;
        let stream = client
            .simple_query(query.to_owned())
            .await
            .map_err(query_error)?;
        let row = stream.into_row().await.map_err(query_error)?;
        row.map(row_from_tds).ok_or(QueryError::NoRow)
    }

    async fn close(&mut self) {
        if let Some(client) = self.client.take() {
            if let Err(e) = client.close().await {
                debug!(error = %e, "error closing tds session");
            }
        }
    }
}

/// Server-side errors reject the login; anything else is transport.
fn connect_error(err: TdsError) -> ConnectError {
    match err {
        TdsError::Server(token) => {
            ConnectError::Rejected(format!("{} (error {})", token.message(), token.code()))
        }
        other => ConnectError::Transport(other.to_string()),
    }
}

/// Server-side errors reject the query; anything else means the session is gone.
fn query_error(err: TdsError) -> QueryError {
    match err {
        TdsError::Server(token) => {
            QueryError::Rejected(format!("{} (error {})", token.message(), token.code()))
        }
        other => QueryError::Broken(other.to_string()),
    }
}
