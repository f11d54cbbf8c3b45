//! Receive loop
//!
//! One task owns the socket's receive side. Each datagram is handed to its
//! own Tokio task, so peers (and repeated datagrams from one peer) are served
//! concurrently. The idle reaper runs beside it on a timer.

use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::auth::CredentialVerifier;
use crate::config::ServerConfig;
use crate::dispatcher::Dispatcher;
use crate::error::Result;
use crate::reaper::spawn_idle_reaper;
use crate::sandbox::Sandbox;
use crate::session::SessionTable;
use crate::transport::UdpTransport;

pub struct Server {
    config: ServerConfig,
    transport: UdpTransport,
    dispatcher: Dispatcher,
    shutdown: CancellationToken,
}

impl Server {
    /// Bind the listening socket
    ///
    /// Must be called from within a Tokio runtime.
    pub fn bind(config: ServerConfig) -> Result<Self> {
        let transport = UdpTransport::bind(
            config.bind_addr,
            config.recv_buffer_size,
            config.max_datagram_size,
        )?;
        let dispatcher = Dispatcher::from_config(&config);

        Ok(Self {
            config,
            transport,
            dispatcher,
            shutdown: CancellationToken::new(),
        })
    }

    /// Replace the shared-secret credential check
    pub fn with_verifier(mut self, verifier: Arc<dyn CredentialVerifier>) -> Self {
        self.dispatcher = Dispatcher::new(
            self.dispatcher.sessions().clone(),
            Sandbox::new(&self.config.root_dir, self.config.max_file_size_bytes),
            verifier,
            self.dispatcher.audit(),
            self.config.max_datagram_size,
        );
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.transport.local_addr()
    }

    /// Cancelling this token stops the receive loop and the reaper
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn sessions(&self) -> SessionTable {
        self.dispatcher.sessions().clone()
    }

    /// Serve until the shutdown token is cancelled
    ///
    /// In-flight handlers are not awaited; their replies may still go out
    /// after this returns.
    pub async fn run(self) -> Result<()> {
        let local_addr = self.transport.local_addr()?;
        let audit = self.dispatcher.audit();
        info!(
            event = "server_started",
            bind_addr = %local_addr,
            root_dir = %self.config.root_dir.display(),
            max_connections = self.config.max_connections,
            "UDP file server listening"
        );
        audit.server_started(
            local_addr,
            &self.config.root_dir.display().to_string(),
            self.config.max_connections,
        );

        let reaper = spawn_idle_reaper(
            self.dispatcher.sessions().clone(),
            self.config.reap_interval(),
            self.config.idle_timeout(),
            audit,
            self.shutdown.clone(),
        );

        let limiter = match self.config.performance.max_concurrent_handlers {
            0 => None,
            limit => Some(Arc::new(Semaphore::new(limit))),
        };

        let mut buf = self.transport.receive_buffer();

        loop {
            // Waiting for a permit before reading pushes back-pressure onto the kernel buffer
            let permit = match &limiter {
                Some(limiter) => tokio::select! {
                    _ = self.shutdown.cancelled() => break,
                    permit = limiter.clone().acquire_owned() => match permit {
                        Ok(permit) => Some(permit),
                        Err(_) => break,
                    },
                },
                None => None,
            };

            let received = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                received = self.transport.recv(&mut buf) => received,
            };

            match received {
                Ok(Some((payload, peer))) => {
                    let dispatcher = self.dispatcher.clone();
                    let transport = self.transport.clone();
                    tokio::spawn(async move {
                        respond(&dispatcher, &transport, payload, peer).await;
                        drop(permit);
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    error!("Error receiving datagram: {}", e);
                }
            }
        }

        if let Err(e) = reaper.await {
            warn!("Idle reaper task ended abnormally: {}", e);
        }

        info!(event = "server_stopped", "UDP file server stopped");
        audit.server_stopped("shutdown requested");
        Ok(())
    }
}

async fn respond(dispatcher: &Dispatcher, transport: &UdpTransport, payload: Bytes, peer: SocketAddr) {
    let Some(reply) = dispatcher.handle(&payload, peer).await else {
        return;
    };

    match transport.send(peer, &reply).await {
        Ok(sent) => dispatcher.sessions().record_sent(sent).await,
        Err(e) => debug!(client = %peer, error = %e, "Reply not sent"),
    }
}
