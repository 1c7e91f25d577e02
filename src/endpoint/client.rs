//! Client endpoint: ephemeral socket pinned to one remote

use crate::config::RudpConfig;
use crate::endpoint::engine::RudpEngine;
use crate::endpoint::events::{self, EventReceiver};
use crate::endpoint::ConnectionState;
use crate::error::{ConnectionError, Result, RudpError};
use crate::protocol::{constants, PacketKind};
use crate::sequence::Role;
use crate::stats::StatsSnapshot;
use crate::transport::{Transport, UdpTransport};

use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{error, info, warn};

/// RUDP client: binds an ephemeral UDP socket, opens a connection to
/// one server and drives the protocol loops in the background.
pub struct RudpClient {
    engine: Arc<RudpEngine>,
    remote: SocketAddr,
    events: Option<EventReceiver>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl RudpClient {
    /// Bind an ephemeral socket and open a connection to `remote`.
    ///
    /// Returns once the SYN is queued; the connection is OPEN when the
    /// [`RudpEvent::Connected`](crate::RudpEvent::Connected) event fires.
    pub async fn connect(remote: SocketAddr, config: RudpConfig) -> Result<Self> {
        config.validate()?;
        let transport = Arc::new(UdpTransport::bind_ephemeral().await?);
        Self::connect_with_transport(remote, config, transport).await
    }

    /// Open a connection over a caller-supplied transport.
    pub async fn connect_with_transport(
        remote: SocketAddr,
        config: RudpConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        config.validate()?;

        let (event_tx, event_rx) = events::channel();
        let engine = Arc::new(RudpEngine::new(
            Role::Client,
            config.clone(),
            transport,
            Some(remote),
            event_tx,
        ));
        engine.open(remote).await?;

        let (shutdown, shutdown_rx) = watch::channel(false);
        let tasks = vec![
            spawn_send_loop(engine.clone(), config.send_interval, shutdown_rx.clone()),
            spawn_recv_loop(engine.clone(), config.recv_interval, shutdown_rx.clone()),
            spawn_socket_task(engine.clone(), shutdown_rx.clone()),
            spawn_reset_task(engine.clone(), shutdown_rx),
        ];

        info!(peer = %remote, local = ?engine.local_addr().ok(), "client opening");

        Ok(Self {
            engine,
            remote,
            events: Some(event_rx),
            shutdown,
            tasks,
        })
    }

    /// Enqueue a data payload for the server. Payloads at or above the
    /// fragmentation threshold are split automatically.
    pub async fn send(&self, data: impl Into<Bytes>) -> Result<()> {
        self.send_packet(PacketKind::Dat, Some(data.into())).await
    }

    /// Enqueue a packet of an explicit kind.
    pub async fn send_packet(&self, kind: PacketKind, data: Option<Bytes>) -> Result<()> {
        if self.engine.state().await == ConnectionState::Closed {
            return Err(RudpError::connection(ConnectionError::Closed));
        }
        self.engine.queue(self.remote, kind, data).await
    }

    /// Take the event receiver. Yields `None` after the first call.
    pub fn take_events(&mut self) -> Option<EventReceiver> {
        self.events.take()
    }

    /// Current connection state
    pub async fn state(&self) -> ConnectionState {
        self.engine.state().await
    }

    /// Remote address this client is pinned to
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    /// Local address of the underlying socket
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.engine.local_addr()
    }

    /// Snapshot of traffic counters
    pub fn stats(&self) -> StatsSnapshot {
        self.engine.stats()
    }

    /// Access the protocol engine directly
    pub fn engine(&self) -> &Arc<RudpEngine> {
        &self.engine
    }

    /// Shut down the worker loops and close the connection.
    pub async fn disconnect(&mut self) -> Result<()> {
        self.engine.set_state(ConnectionState::Closed).await;
        let _ = self.shutdown.send(true);
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        info!(peer = %self.remote, "client closed");
        Ok(())
    }
}

impl Drop for RudpClient {
    fn drop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

/// Send loop: flush the send queue every tick.
pub(crate) fn spawn_send_loop(
    engine: Arc<RudpEngine>,
    tick: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = interval(tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = engine.flush().await {
                        warn!(error = %e, "send tick failed");
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

/// Recv loop: drain and process a batch of queued packets every tick.
pub(crate) fn spawn_recv_loop(
    engine: Arc<RudpEngine>,
    tick: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = interval(tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = engine.process().await {
                        warn!(error = %e, "recv tick failed");
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

/// Socket task: pull datagrams off the transport and feed the engine.
pub(crate) fn spawn_socket_task(
    engine: Arc<RudpEngine>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buf = vec![0u8; 65536];
        loop {
            tokio::select! {
                result = engine.recv_datagram(&mut buf) => {
                    match result {
                        Ok((size, src)) => {
                            let data = Bytes::copy_from_slice(&buf[..size]);
                            engine.handle_datagram(src, data).await;
                        }
                        Err(e) => {
                            error!(error = %e, "socket receive failed");
                            break;
                        }
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

/// Reset task: on a peer RST, wait out the back-off and rebuild state.
fn spawn_reset_task(engine: Arc<RudpEngine>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = engine.reset_requested() => {
                    tokio::select! {
                        _ = sleep(Duration::from_millis(constants::RESET_DELAY_MS)) => {
                            engine.recover_from_reset().await;
                        }
                        _ = shutdown.changed() => break,
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
