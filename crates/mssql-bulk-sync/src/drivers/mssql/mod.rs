//! SQL Server driver.
//!
//! Connections are Tiberius clients over Tokio TCP streams, pooled with bb8.
//! A [`MssqlSession`] wraps one checked-out connection for the duration of a
//! bulk call, so temporary staging tables and the wrapping transaction stay
//! on the same server session.

mod session;

pub use session::MssqlSession;

use std::time::Duration;

use async_trait::async_trait;
use bb8::Pool;
use tiberius::{AuthMethod, Client, Config, EncryptionLevel};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{info, warn};

use crate::config::TargetConfig;
use crate::error::{BulkSyncError, Result};

/// Connection pool timeouts.
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(300);
const POOL_MAX_LIFETIME: Duration = Duration::from_secs(1800);
const TCP_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// A pooled client and whether it still holds uncommitted bulk work.
///
/// A connection released while `pending` is discarded by the pool instead
/// of being handed to the next caller.
pub(crate) struct MssqlConnection {
    client: Client<Compat<TcpStream>>,
    pending: bool,
}

/// Connection manager for bb8 pool with Tiberius.
#[derive(Clone)]
pub(crate) struct TiberiusConnectionManager {
    config: TargetConfig,
}

impl TiberiusConnectionManager {
    fn new(config: TargetConfig) -> Self {
        Self { config }
    }

    fn build_config(&self) -> Config {
        let mut config = Config::new();
        config.host(&self.config.host);
        config.port(self.config.port);
        config.database(&self.config.database);
        config.authentication(AuthMethod::sql_server(
            &self.config.user,
            &self.config.password,
        ));

        if self.config.encrypt {
            config.encryption(EncryptionLevel::Required);
        } else {
            config.encryption(EncryptionLevel::NotSupported);
        }
        if self.config.trust_server_cert {
            config.trust_cert();
        }

        config
    }
}

fn io_error(e: std::io::Error, context: &str) -> tiberius::error::Error {
    tiberius::error::Error::Io {
        kind: e.kind(),
        message: format!("{}: {}", context, e),
    }
}

#[async_trait]
impl bb8::ManageConnection for TiberiusConnectionManager {
    type Connection = MssqlConnection;
    type Error = tiberius::error::Error;

    async fn connect(&self) -> std::result::Result<Self::Connection, Self::Error> {
        let config = self.build_config();
        let tcp = TcpStream::connect(config.get_addr())
            .await
            .map_err(|e| io_error(e, "Failed to connect"))?;
        tcp.set_nodelay(true).ok();

        let std_tcp = tcp
            .into_std()
            .map_err(|e| io_error(e, "Failed to configure socket"))?;
        let socket = socket2::Socket::from(std_tcp);
        let keepalive = socket2::TcpKeepalive::new()
            .with_time(TCP_KEEPALIVE_INTERVAL)
            .with_interval(TCP_KEEPALIVE_INTERVAL);
        if let Err(e) = socket.set_tcp_keepalive(&keepalive) {
            warn!("Failed to set TCP keepalive on MSSQL connection: {}", e);
        }

        let std_tcp: std::net::TcpStream = socket.into();
        std_tcp.set_nonblocking(true).ok();
        let tcp = TcpStream::from_std(std_tcp).map_err(|e| io_error(e, "Failed to convert socket"))?;

        let client = Client::connect(config, tcp.compat_write()).await?;
        Ok(MssqlConnection {
            client,
            pending: false,
        })
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> std::result::Result<(), Self::Error> {
        let row = conn
            .client
            .simple_query("SELECT CAST(@@TRANCOUNT AS INT)")
            .await?
            .into_row()
            .await?;
        let open = row.and_then(|r| r.get::<i32, _>(0)).unwrap_or(0);
        if open > 0 {
            return Err(tiberius::error::Error::Protocol(
                format!("connection holds {} open transaction(s)", open).into(),
            ));
        }
        Ok(())
    }

    fn has_broken(&self, conn: &mut Self::Connection) -> bool {
        conn.pending
    }
}

/// Pool of SQL Server connections.
#[derive(Clone)]
pub struct MssqlPool {
    pool: Pool<TiberiusConnectionManager>,
}

impl MssqlPool {
    /// Create the pool and verify that a connection can be opened.
    pub async fn connect(config: &TargetConfig) -> Result<Self> {
        let manager = TiberiusConnectionManager::new(config.clone());
        let pool = Pool::builder()
            .max_size(config.pool_size)
            .min_idle(Some(1))
            .connection_timeout(POOL_CONNECTION_TIMEOUT)
            .idle_timeout(Some(POOL_IDLE_TIMEOUT))
            .max_lifetime(Some(POOL_MAX_LIFETIME))
            .test_on_check_out(true)
            .build(manager)
            .await
            .map_err(|e| BulkSyncError::pool(e, "creating MSSQL pool"))?;

        // Test connection
        {
            let mut conn = pool
                .get()
                .await
                .map_err(|e| BulkSyncError::pool(e, "testing MSSQL connection"))?;
            conn.client.simple_query("SELECT 1").await?.into_results().await?;
        }

        info!(
            "Connected to MSSQL: {}:{}/{} (pool_size={})",
            config.host, config.port, config.database, config.pool_size
        );

        Ok(Self { pool })
    }

    /// Check out one connection as a session.
    pub async fn session(&self) -> Result<MssqlSession<'_>> {
        let conn = self
            .pool
            .get()
            .await
            .map_err(|e| BulkSyncError::pool(e, "getting MSSQL connection"))?;
        Ok(MssqlSession::new(conn))
    }

    /// Connections currently open, idle or in use.
    pub fn connections(&self) -> u32 {
        self.pool.state().connections
    }
}
