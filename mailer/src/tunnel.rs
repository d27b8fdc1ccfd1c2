use std::{net::SocketAddr, sync::Arc};

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use russh::{
    client::{self, Handle},
    Disconnect,
};
use russh_keys::key;
use tokio::{
    net::{TcpListener, TcpStream},
    task::{JoinHandle, JoinSet},
};

use crate::mailer_config::SshSettings;

const LOCALHOST: &str = "127.0.0.1";

/// A local port forwarded to a remote address, open until [`Tunnel::close`].
#[async_trait]
pub trait Tunnel: Send + Sync {
    fn local_addr(&self) -> SocketAddr;

    async fn close(self);
}

/// Opens tunnels towards an address only reachable from the far side.
#[async_trait]
pub trait TunnelOpener: Send + Sync {
    type Tunnel: Tunnel;

    async fn open(&self, remote_host: &str, remote_port: u16) -> anyhow::Result<Self::Tunnel>;
}

#[async_trait]
impl TunnelOpener for SshSettings {
    type Tunnel = SshTunnel;

    async fn open(&self, remote_host: &str, remote_port: u16) -> anyhow::Result<SshTunnel> {
        SshTunnel::open(self, remote_host, remote_port).await
    }
}

struct TunnelClient;

#[async_trait]
impl client::Handler for TunnelClient {
    type Error = russh::Error;

    // Bastion host keys are not pinned.
    async fn check_server_key(
        &mut self,
        server_public_key: &key::PublicKey,
    ) -> Result<bool, Self::Error> {
        tracing::debug!(
            "Bastion host key fingerprint: {}",
            server_public_key.fingerprint()
        );
        Ok(true)
    }
}

/// Local port forwarding through an SSH bastion, the equivalent of
/// `ssh -N -L 0:remote_host:remote_port user@bastion`.
///
/// Every connection accepted on [`SshTunnel::local_addr`] is carried over its
/// own `direct-tcpip` channel. Dropping the tunnel stops accepting and aborts
/// the forwarded connections; [`Tunnel::close`] also ends the SSH session.
pub struct SshTunnel {
    local_addr: SocketAddr,
    session: Arc<Handle<TunnelClient>>,
    forwarding: JoinHandle<()>,
}

impl SshTunnel {
    pub async fn open(
        ssh: &SshSettings,
        remote_host: &str,
        remote_port: u16,
    ) -> anyhow::Result<Self> {
        tracing::info!(
            "Opening SSH tunnel via {}@{}:{} to {}:{}",
            ssh.username,
            ssh.host,
            ssh.port,
            remote_host,
            remote_port
        );

        let config = Arc::new(client::Config::default());
        let mut session = client::connect(config, (ssh.host.as_str(), ssh.port), TunnelClient)
            .await
            .with_context(|| format!("Could not open SSH session to {}:{}", ssh.host, ssh.port))?;

        let authenticated = session
            .authenticate_password(ssh.username.clone(), ssh.password.clone())
            .await
            .context("SSH password authentication failed")?;
        if !authenticated {
            let _ = session
                .disconnect(Disconnect::ByApplication, "", "en")
                .await;
            return Err(anyhow!(
                "SSH server {} rejected the credentials of {}",
                ssh.host,
                ssh.username
            ));
        }

        let listener = TcpListener::bind((LOCALHOST, 0))
            .await
            .context("Could not bind a local port for the SSH tunnel")?;
        let local_addr = listener.local_addr()?;

        let session = Arc::new(session);
        let forwarding = tokio::spawn(accept_loop(
            listener,
            session.clone(),
            remote_host.to_string(),
            remote_port,
        ));

        tracing::info!("SSH tunnel listening on {}", local_addr);

        Ok(Self {
            local_addr,
            session,
            forwarding,
        })
    }
}

#[async_trait]
impl Tunnel for SshTunnel {
    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    async fn close(self) {
        self.forwarding.abort();
        if let Err(e) = self
            .session
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
        {
            tracing::warn!("SSH session did not disconnect cleanly: {}", e);
        }
        tracing::info!("Closed SSH tunnel on {}", self.local_addr);
    }
}

impl Drop for SshTunnel {
    fn drop(&mut self) {
        self.forwarding.abort();
    }
}

async fn accept_loop(
    listener: TcpListener,
    session: Arc<Handle<TunnelClient>>,
    remote_host: String,
    remote_port: u16,
) {
    // Owned here so that aborting the loop also aborts open connections.
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((socket, peer)) => {
                    connections.spawn(forward(
                        socket,
                        peer,
                        session.clone(),
                        remote_host.clone(),
                        remote_port,
                    ));
                }
                Err(e) => {
                    tracing::error!("SSH tunnel stopped accepting connections: {}", e);
                    break;
                }
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }
}

async fn forward(
    mut socket: TcpStream,
    peer: SocketAddr,
    session: Arc<Handle<TunnelClient>>,
    remote_host: String,
    remote_port: u16,
) {
    let channel = match session
        .channel_open_direct_tcpip(
            remote_host.clone(),
            remote_port as u32,
            peer.ip().to_string(),
            peer.port() as u32,
        )
        .await
    {
        Ok(channel) => channel,
        Err(e) => {
            tracing::error!(
                "Could not open channel to {}:{} through the bastion: {}",
                remote_host,
                remote_port,
                e
            );
            return;
        }
    };

    let mut stream = Box::pin(channel.into_stream());
    match tokio::io::copy_bidirectional(&mut socket, &mut stream).await {
        Ok((sent, received)) => {
            tracing::debug!(
                "Tunnel connection from {} closed ({} bytes sent, {} received)",
                peer,
                sent,
                received
            );
        }
        Err(e) => tracing::debug!("Tunnel connection from {} ended: {}", peer, e),
    }
}
