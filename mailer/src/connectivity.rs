use std::{future::Future, pin::Pin};

use anyhow::Context;
use async_trait::async_trait;
use sea_orm::{ConnectOptions, Database};
use tokio::signal;

use crate::{
    error::{MailerError, MailerResult},
    mailer_config::{ConnectionMode, DatabaseSettings, MailerConfig, SshSettings},
    store::DbStateStore,
    tunnel::{Tunnel, TunnelOpener},
};

/// Future returned by the block run on a borrowed connection.
pub type ConnectionFuture<'c, T> = Pin<Box<dyn Future<Output = MailerResult<T>> + Send + 'c>>;

/// Opens and closes the connection to the monitoring database.
///
/// `release` must undo everything `acquire` set up, in reverse order.
#[async_trait]
pub trait ConnectionProvider: Send {
    type Connection: Send + Sync;

    async fn acquire(&mut self) -> MailerResult<Self::Connection>;

    async fn release(&mut self, conn: Self::Connection);
}

/// Acquires a connection, runs `f` on it and releases it again, whether `f`
/// succeeded, failed or the process was asked to stop.
pub async fn with_connection<P, F, T>(provider: &mut P, f: F) -> MailerResult<T>
where
    P: ConnectionProvider + ?Sized,
    F: for<'c> FnOnce(&'c P::Connection) -> ConnectionFuture<'c, T>,
{
    with_connection_until(provider, shutdown_signal(), f).await
}

/// [`with_connection`] with an explicit cancellation source. When `cancel`
/// resolves first the block is dropped, the connection is still released and
/// the run fails with [`MailerError::Cancelled`].
pub async fn with_connection_until<P, C, F, T>(
    provider: &mut P,
    cancel: C,
    f: F,
) -> MailerResult<T>
where
    P: ConnectionProvider + ?Sized,
    C: Future<Output = &'static str>,
    F: for<'c> FnOnce(&'c P::Connection) -> ConnectionFuture<'c, T>,
{
    tokio::pin!(cancel);

    let acquired = tokio::select! {
        acquired = provider.acquire() => acquired,
        signal = &mut cancel => {
            tracing::warn!("Received {} while connecting", signal);
            return Err(MailerError::Cancelled(signal));
        }
    };
    let conn = match acquired {
        Ok(conn) => conn,
        Err(e) => {
            tracing::error!("Could not connect to the database: {}", e);
            return Err(e);
        }
    };

    let result = tokio::select! {
        result = f(&conn) => result,
        signal = &mut cancel => {
            tracing::warn!("Received {}, releasing the connection", signal);
            Err(MailerError::Cancelled(signal))
        }
    };

    provider.release(conn).await;
    result
}

/// Resolves with the name of the first termination signal received.
async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!("Could not listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
            }
            Err(e) => {
                tracing::warn!("Could not listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => "SIGINT",
        _ = terminate => "SIGTERM",
    }
}

/// Opens and closes database connections at a given address.
#[async_trait]
pub trait Connector: Send + Sync {
    type Connection: Send + Sync;

    /// The configured database address.
    fn target(&self) -> (&str, u16);

    async fn connect(&self, host: &str, port: u16) -> MailerResult<Self::Connection>;

    async fn disconnect(&self, conn: Self::Connection);
}

#[async_trait]
impl Connector for DatabaseSettings {
    type Connection = DbStateStore;

    fn target(&self) -> (&str, u16) {
        (&self.host, self.port)
    }

    async fn connect(&self, host: &str, port: u16) -> MailerResult<DbStateStore> {
        let url = self.url_for(host, port)?;
        let mut db_options = ConnectOptions::new(url);
        db_options
            .sqlx_logging(false)
            .min_connections(1)
            .max_connections(1);

        let conn = Database::connect(db_options)
            .await
            .with_context(|| {
                format!(
                    "Could not connect to database {} at {}:{}",
                    self.name, host, port
                )
            })
            .map_err(MailerError::Connectivity)?;

        tracing::info!("Connected to database {} at {}:{}", self.name, host, port);
        Ok(DbStateStore::new(conn))
    }

    async fn disconnect(&self, store: DbStateStore) {
        match store.into_inner().close().await {
            Ok(_) => tracing::info!("Closed the database connection"),
            Err(e) => tracing::warn!("Database connection did not close cleanly: {}", e),
        }
    }
}

/// Connects straight to the configured host and port.
pub struct DirectProvider<C = DatabaseSettings> {
    connector: C,
}

impl<C: Connector> DirectProvider<C> {
    pub fn new(connector: C) -> Self {
        Self { connector }
    }
}

#[async_trait]
impl<C: Connector> ConnectionProvider for DirectProvider<C> {
    type Connection = C::Connection;

    async fn acquire(&mut self) -> MailerResult<C::Connection> {
        let (host, port) = self.connector.target();
        self.connector.connect(host, port).await
    }

    async fn release(&mut self, conn: C::Connection) {
        self.connector.disconnect(conn).await;
    }
}

/// Connects through a forwarded local port. The tunnel outlives the database
/// connection: it is only closed after the connection is.
pub struct TunneledProvider<C = DatabaseSettings, O: TunnelOpener = SshSettings> {
    connector: C,
    opener: O,
    tunnel: Option<O::Tunnel>,
}

impl<C: Connector, O: TunnelOpener> TunneledProvider<C, O> {
    pub fn new(connector: C, opener: O) -> Self {
        Self {
            connector,
            opener,
            tunnel: None,
        }
    }
}

#[async_trait]
impl<C: Connector, O: TunnelOpener> ConnectionProvider for TunneledProvider<C, O> {
    type Connection = C::Connection;

    async fn acquire(&mut self) -> MailerResult<C::Connection> {
        let (remote_host, remote_port) = self.connector.target();
        let tunnel = self
            .opener
            .open(remote_host, remote_port)
            .await
            .map_err(MailerError::Connectivity)?;

        let local = tunnel.local_addr();
        match self
            .connector
            .connect(&local.ip().to_string(), local.port())
            .await
        {
            Ok(conn) => {
                self.tunnel = Some(tunnel);
                Ok(conn)
            }
            Err(e) => {
                tunnel.close().await;
                Err(e)
            }
        }
    }

    async fn release(&mut self, conn: C::Connection) {
        self.connector.disconnect(conn).await;
        if let Some(tunnel) = self.tunnel.take() {
            tunnel.close().await;
        }
    }
}

/// The connection strategy selected by `is_local_db`.
pub enum Connectivity {
    Direct(DirectProvider),
    Tunneled(TunneledProvider),
}

impl Connectivity {
    pub fn from_config(config: &MailerConfig) -> Self {
        match &config.connection {
            ConnectionMode::Local => Connectivity::Direct(DirectProvider::new(config.database.clone())),
            ConnectionMode::Tunneled(ssh) => Connectivity::Tunneled(TunneledProvider::new(
                config.database.clone(),
                ssh.clone(),
            )),
        }
    }
}

#[async_trait]
impl ConnectionProvider for Connectivity {
    type Connection = DbStateStore;

    async fn acquire(&mut self) -> MailerResult<DbStateStore> {
        match self {
            Connectivity::Direct(provider) => provider.acquire().await,
            Connectivity::Tunneled(provider) => provider.acquire().await,
        }
    }

    async fn release(&mut self, conn: DbStateStore) {
        match self {
            Connectivity::Direct(provider) => provider.release(conn).await,
            Connectivity::Tunneled(provider) => provider.release(conn).await,
        }
    }
}
