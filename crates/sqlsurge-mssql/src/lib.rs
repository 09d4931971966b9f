//! SQL Server sessions for sqlsurge.
//!
//! [`MssqlConnector`] implements [`sqlsurge_core::Connector`] over a tokio
//! TCP stream speaking TDS through `tiberius`. Every `connect` opens one
//! fresh login; pooling and retries live above this crate.
//!
//! ```text
//! MssqlConnector::connect(timeout)
//!   → TcpStream::connect(host:port)
//!     → [TLS if --encrypt] → TDS login
//!       → MssqlSession
//!
//! MssqlSession::execute(query)
//!   → simple_query → first row → sqlsurge_core::Row (rendered text)
//! ```

pub mod connector;
pub mod render;

pub use connector::{Encryption, MssqlConnector, MssqlOptions, MssqlSession};
