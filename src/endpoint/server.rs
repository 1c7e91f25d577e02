//! Server endpoint: fixed socket conversing with many clients

use crate::config::RudpConfig;
use crate::endpoint::client::{spawn_recv_loop, spawn_send_loop, spawn_socket_task};
use crate::endpoint::engine::RudpEngine;
use crate::endpoint::events::{self, EventReceiver};
use crate::endpoint::ConnectionState;
use crate::error::{ConnectionError, Result, RudpError};
use crate::protocol::PacketKind;
use crate::sequence::Role;
use crate::stats::StatsSnapshot;
use crate::transport::{Transport, UdpTransport};

use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

/// RUDP server: binds a fixed address, accepts SYN handshakes from any
/// number of clients and drives the protocol loops in the background.
pub struct RudpServer {
    engine: Arc<RudpEngine>,
    local_addr: SocketAddr,
    events: Option<EventReceiver>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl RudpServer {
    /// Bind `addr` and start listening.
    pub async fn listen(addr: SocketAddr, config: RudpConfig) -> Result<Self> {
        config.validate()?;
        let transport = Arc::new(UdpTransport::bind(addr).await?);
        Self::listen_with_transport(config, transport).await
    }

    /// Listen over a caller-supplied transport.
    pub async fn listen_with_transport(
        config: RudpConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        config.validate()?;

        let (event_tx, event_rx) = events::channel();
        let engine = Arc::new(RudpEngine::new(
            Role::Server,
            config.clone(),
            transport,
            None,
            event_tx,
        ));
        engine.set_state(ConnectionState::Listen).await;
        let local_addr = engine.local_addr()?;

        let (shutdown, shutdown_rx) = watch::channel(false);
        let mut tasks = vec![
            spawn_send_loop(engine.clone(), config.send_interval, shutdown_rx.clone()),
            spawn_recv_loop(engine.clone(), config.recv_interval, shutdown_rx.clone()),
            spawn_socket_task(engine.clone(), shutdown_rx.clone()),
        ];
        if let Some(period) = config.keep_alive {
            tasks.push(spawn_keep_alive_task(engine.clone(), period, shutdown_rx));
        }

        info!(addr = %local_addr, "server listening");

        Ok(Self {
            engine,
            local_addr,
            events: Some(event_rx),
            shutdown,
            tasks,
        })
    }

    /// Enqueue a data payload for `peer`. Payloads at or above the
    /// fragmentation threshold are split automatically.
    pub async fn send_to(&self, peer: SocketAddr, data: impl Into<Bytes>) -> Result<()> {
        self.send_packet(peer, PacketKind::Dat, Some(data.into()))
            .await
    }

    /// Enqueue a packet of an explicit kind for `peer`.
    pub async fn send_packet(
        &self,
        peer: SocketAddr,
        kind: PacketKind,
        data: Option<Bytes>,
    ) -> Result<()> {
        if self.engine.state().await == ConnectionState::Closed {
            return Err(RudpError::connection(ConnectionError::Closed));
        }
        self.engine.queue(peer, kind, data).await
    }

    /// Enqueue a NUL keep-alive to every known client.
    pub async fn send_keep_alive(&self) -> Result<()> {
        self.engine.send_keep_alive().await
    }

    /// Drop `peer`: send RST and forget its state.
    pub async fn request_connection_reset(&self, peer: SocketAddr) -> Result<()> {
        self.engine.request_connection_reset(peer).await
    }

    /// Take the event receiver. Yields `None` after the first call.
    pub fn take_events(&mut self) -> Option<EventReceiver> {
        self.events.take()
    }

    /// Currently known clients
    pub async fn clients(&self) -> Vec<SocketAddr> {
        self.engine.clients().await
    }

    /// Current connection state
    pub async fn state(&self) -> ConnectionState {
        self.engine.state().await
    }

    /// Bound local address
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Snapshot of traffic counters
    pub fn stats(&self) -> StatsSnapshot {
        self.engine.stats()
    }

    /// Access the protocol engine directly
    pub fn engine(&self) -> &Arc<RudpEngine> {
        &self.engine
    }

    /// Shut down the worker loops and release the socket.
    pub async fn disconnect(&mut self) -> Result<()> {
        self.engine.set_state(ConnectionState::Closed).await;
        let _ = self.shutdown.send(true);
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        info!(addr = %self.local_addr, "server closed");
        Ok(())
    }
}

impl Drop for RudpServer {
    fn drop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

/// Keep-alive task: periodically NUL every known client.
fn spawn_keep_alive_task(
    engine: Arc<RudpEngine>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = engine.send_keep_alive().await {
                        warn!(error = %e, "keep-alive tick failed");
                    }
                }
                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}
