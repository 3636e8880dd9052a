//! The relay.
//!
//! The server is a mixed-sync system: asynchronous tasks own the sockets
//! (signalling dispatch, voice ingress, voice egress, and the janitor),
//! while audio mixing runs on its own thread so packet generation is never
//! slowed past its 20 ms deadline by I/O. All mutable state lives in one [`Shared`]
//! context handed to every task; each registry carries its own lock, no two
//! registry-level locks are ever held at once, and sockets are only written
//! after the relevant lock has been released.

mod config;

pub(crate) mod auth;
pub(crate) mod mixer;
pub(crate) mod registry;
pub(crate) mod tasks;

pub use config::Config;

use crate::error::Result;
use crate::protocol;
use auth::{CredentialStore, SessionRegistry};
use flume::{Receiver, Sender};
use mixer::{TalkerTable, VoicePacket};
use registry::{ClientRecord, ClientRegistry};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::{info, warn};

/// State shared by every server task.
pub(crate) struct Shared {
    pub config: Config,
    pub credentials: CredentialStore,
    pub sessions: SessionRegistry,
    pub registry: ClientRegistry,
    pub talkers: TalkerTable,
    /// The signalling socket; any task may reply or fan out through it.
    pub control: UdpSocket,
}

impl Shared {
    /// Sends one signalling datagram, logging rather than propagating
    /// failures; losing a datagram is within the transport's contract.
    pub async fn send(&self, message: &str, addr: SocketAddr) {
        if let Err(e) = self.control.send_to(message.as_bytes(), addr).await {
            warn!("Failed to send to {}: {}", addr, e);
        }
    }

    /// Fans a message out to every authenticated client except `exclude`.
    /// The recipient list is snapshotted first so no lock is held while
    /// writing to the socket.
    pub async fn broadcast(&self, message: &str, exclude: Option<SocketAddr>) {
        for addr in self.registry.recipients(exclude) {
            self.send(message, addr).await;
        }
    }

    /// Removes a client record along with its talker table entry.
    pub fn drop_client(&self, addr: &SocketAddr) -> Option<ClientRecord> {
        let record = self.registry.remove(addr)?;
        self.talkers.remove(&record.username);
        Some(record)
    }
}

/// Cancels a running [`Server`] from outside, e.g. from tests.
#[derive(Clone)]
pub struct ShutdownHandle(Sender<()>);

impl ShutdownHandle {
    pub fn shutdown(&self) {
        let _ = self.0.try_send(());
    }
}

/// The relay: both sockets plus every task that serves them.
pub struct Server {
    shared: Arc<Shared>,
    voice: Arc<UdpSocket>,
    packet_tx: Sender<VoicePacket>,
    packet_rx: Receiver<VoicePacket>,
    shutdown_tx: Sender<()>,
    shutdown_rx: Receiver<()>,
}

impl Server {
    /// Binds both sockets. The resolved addresses (relevant when binding
    /// port 0) are available from [`control_addr`](Self::control_addr) and
    /// [`voice_addr`](Self::voice_addr).
    pub async fn bind(mut config: Config) -> Result<Self> {
        let control = UdpSocket::bind(config.control_addr).await?;
        let voice = UdpSocket::bind(config.voice_addr).await?;
        config.control_addr = control.local_addr()?;
        config.voice_addr = voice.local_addr()?;

        let (packet_tx, packet_rx) = flume::unbounded();
        let (shutdown_tx, shutdown_rx) = flume::bounded(1);

        let shared = Arc::new(Shared {
            config,
            credentials: CredentialStore::default(),
            sessions: SessionRegistry::default(),
            registry: ClientRegistry::default(),
            talkers: TalkerTable::default(),
            control,
        });

        Ok(Self {
            shared,
            voice: Arc::new(voice),
            packet_tx,
            packet_rx,
            shutdown_tx,
            shutdown_rx,
        })
    }

    pub fn control_addr(&self) -> SocketAddr {
        self.shared.config.control_addr
    }

    pub fn voice_addr(&self) -> SocketAddr {
        self.shared.config.voice_addr
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(self.shutdown_tx.clone())
    }

    /// Runs the relay until interrupted (Ctrl-C or a [`ShutdownHandle`]),
    /// then announces the shutdown to every authenticated client and stops
    /// all tasks.
    pub async fn run(self) -> Result<()> {
        // Dropping this sender is what stops every task: each loop treats a
        // disconnected stop channel as its cue to exit.
        let (stop_tx, stop_rx) = flume::bounded::<()>(0);

        tokio::spawn(tasks::control::runner(self.shared.clone(), stop_rx.clone()));
        tokio::spawn(tasks::voice_rx::runner(
            self.shared.clone(),
            self.voice.clone(),
            stop_rx.clone(),
        ));
        tokio::spawn(tasks::voice_tx::runner(
            self.shared.clone(),
            self.voice.clone(),
            self.packet_rx.clone(),
        ));
        tokio::spawn(tasks::janitor::runner(self.shared.clone(), stop_rx.clone()));
        let mixer = mixer::spawn(self.shared.clone(), self.packet_tx.clone(), stop_rx);

        info!(
            "Server listening on {} (signalling) and {} (voice).",
            self.shared.config.control_addr, self.shared.config.voice_addr
        );

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = self.shutdown_rx.recv_async() => {},
        }

        info!("Shutting down.");
        self.shared
            .broadcast(&protocol::server_shutdown("server shutting down"), None)
            .await;

        drop(stop_tx);
        drop(self.packet_tx);
        let _ = tokio::task::spawn_blocking(move || {
            let _ = mixer.join();
        })
        .await;

        info!("Server stopped.");
        Ok(())
    }
}
