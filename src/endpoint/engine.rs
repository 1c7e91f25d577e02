//! RUDP protocol engine core
//!
//! The engine owns the send and receive pipelines and every piece of
//! per-peer protocol state. It is driven from outside: the send loop
//! calls [`RudpEngine::flush`] every tick, the recv loop calls
//! [`RudpEngine::process`], and the socket task feeds datagrams through
//! [`RudpEngine::handle_datagram`]. Each logical resource sits behind
//! its own lock so no pipeline ever blocks the others for longer than
//! one bookkeeping step.

use crate::config::RudpConfig;
use crate::endpoint::events::{EventSender, RudpEvent};
use crate::endpoint::ConnectionState;
use crate::error::Result;
use crate::protocol::{current_timestamp, Packet, PacketFlags, PacketKind, SeqNum};
use crate::sequence::{Role, SequenceRecord};
use crate::stats::{EndpointStats, StatsSnapshot};
use crate::transport::Transport;

use bytes::{Bytes, BytesMut};
use std::collections::{HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify, RwLock};
use tracing::{debug, info, trace, warn};

/// Acknowledgement accounting: what we owe the peers and what they owe us.
#[derive(Debug, Default)]
struct AckState {
    /// Sequence numbers confirmed locally, drained into the next
    /// outbound packet's ack array
    confirmed: Vec<SeqNum>,
    /// Transmitted packets whose seq has not yet appeared in a peer's
    /// ack array; replayed after a connection reset
    unconfirmed: Vec<Packet>,
}

/// RUDP protocol engine implementing the core pipelines.
pub struct RudpEngine {
    role: Role,
    config: RudpConfig,
    transport: Arc<dyn Transport>,
    /// The single remote a client is pinned to; `None` on the server
    remote: Option<SocketAddr>,

    state: Mutex<ConnectionState>,
    send_queue: Mutex<VecDeque<Packet>>,
    recv_queue: Mutex<VecDeque<Packet>>,
    acks: Mutex<AckState>,
    sequences: Mutex<HashMap<SocketAddr, SequenceRecord>>,
    clients: RwLock<HashSet<SocketAddr>>,
    pending_reset: Mutex<HashSet<SocketAddr>>,

    /// Client-side reset handling: latched on the first RST datagram,
    /// released once recovery has run
    reset_pending: AtomicBool,
    reset_signal: Notify,

    events: EventSender,
    stats: Arc<EndpointStats>,
}

impl RudpEngine {
    /// Create a new engine. `remote` pins a client to its one peer and
    /// must be `None` for the server role.
    pub fn new(
        role: Role,
        config: RudpConfig,
        transport: Arc<dyn Transport>,
        remote: Option<SocketAddr>,
        events: EventSender,
    ) -> Self {
        Self {
            role,
            config,
            transport,
            remote,
            state: Mutex::new(ConnectionState::Closed),
            send_queue: Mutex::new(VecDeque::new()),
            recv_queue: Mutex::new(VecDeque::new()),
            acks: Mutex::new(AckState::default()),
            sequences: Mutex::new(HashMap::new()),
            clients: RwLock::new(HashSet::new()),
            pending_reset: Mutex::new(HashSet::new()),
            reset_pending: AtomicBool::new(false),
            reset_signal: Notify::new(),
            events,
            stats: Arc::new(EndpointStats::default()),
        }
    }

    /// Endpoint role
    pub fn role(&self) -> Role {
        self.role
    }

    /// Endpoint configuration
    pub fn config(&self) -> &RudpConfig {
        &self.config
    }

    /// Current connection state
    pub async fn state(&self) -> ConnectionState {
        *self.state.lock().await
    }

    pub(crate) async fn set_state(&self, state: ConnectionState) {
        *self.state.lock().await = state;
    }

    /// Snapshot of the endpoint's traffic counters
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Local address of the underlying transport
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.transport.local_addr()?)
    }

    /// Known clients (server role)
    pub async fn clients(&self) -> Vec<SocketAddr> {
        self.clients.read().await.iter().copied().collect()
    }

    /// Begin the client handshake: enter OPENING and enqueue a SYN.
    pub async fn open(&self, remote: SocketAddr) -> Result<()> {
        self.set_state(ConnectionState::Opening).await;
        debug!(peer = %remote, "opening connection");
        self.queue(remote, PacketKind::Syn, None).await
    }

    /// Ensure a sequence record exists for `peer`. Returns true iff a
    /// new record was created.
    pub async fn init_sequence(&self, peer: SocketAddr) -> bool {
        let mut sequences = self.sequences.lock().await;
        if sequences.contains_key(&peer) {
            false
        } else {
            sequences.insert(peer, self.new_record(peer));
            trace!(peer = %peer, "sequence record created");
            true
        }
    }

    fn new_record(&self, peer: SocketAddr) -> SequenceRecord {
        match self.role {
            Role::Server => SequenceRecord::new(
                peer,
                self.config.server_start_sequence,
                self.config.client_start_sequence,
            ),
            Role::Client => SequenceRecord::new(
                peer,
                self.config.client_start_sequence,
                self.config.server_start_sequence,
            ),
        }
    }

    // ------------------------------------------------------------------
    // Send pipeline
    // ------------------------------------------------------------------

    /// Enqueue a packet (or the fragments of one logical message) for
    /// `peer`. Payloads at or above the fragmentation threshold are
    /// split into chunks sharing one message id.
    pub async fn queue(
        &self,
        peer: SocketAddr,
        kind: PacketKind,
        data: Option<Bytes>,
    ) -> Result<()> {
        self.queue_with_flags(peer, kind, PacketFlags::NONE, data)
            .await
    }

    pub(crate) async fn queue_with_flags(
        &self,
        peer: SocketAddr,
        kind: PacketKind,
        flags: PacketFlags,
        data: Option<Bytes>,
    ) -> Result<()> {
        let max_payload = self.config.effective_max_payload();
        let mut packets = Vec::new();

        {
            let mut sequences = self.sequences.lock().await;
            let sq = sequences
                .entry(peer)
                .or_insert_with(|| self.new_record(peer));
            let id = sq.next_packet_id(self.config.packet_id_limit);

            let template = {
                let mut packet = Packet::control(kind);
                packet.dst = Some(peer);
                packet.id = id;
                packet.flags = flags;
                packet
            };

            match data {
                Some(payload) if payload.len() >= max_payload => {
                    let qty = payload.len().div_ceil(max_payload) as u32;
                    let mut offset = 0;
                    while offset < payload.len() {
                        let end = (offset + max_payload).min(payload.len());
                        let chunk = payload.slice(offset..end);
                        debug_assert!(chunk.len() <= max_payload);

                        let mut packet = template.clone();
                        packet.qty = qty;
                        packet.data = chunk;
                        packets.push(packet);
                        offset = end;
                    }
                    trace!(
                        peer = %peer,
                        id = id,
                        fragments = qty,
                        bytes = payload.len(),
                        "message fragmented"
                    );
                }
                Some(payload) => {
                    let mut packet = template;
                    packet.data = payload;
                    packets.push(packet);
                }
                None => packets.push(template),
            }
        }

        self.send_queue.lock().await.extend(packets);
        Ok(())
    }

    /// One send-loop tick: drain the send queue, assign sequence
    /// numbers, piggy-back acknowledgements, retain unconfirmed clones
    /// and transmit.
    pub async fn flush(&self) -> Result<()> {
        let drained: Vec<Packet> = {
            let mut queue = self.send_queue.lock().await;
            queue.drain(..).collect()
        };

        for mut packet in drained {
            let Some(dst) = packet.dst else {
                warn!("dropping queued packet without destination");
                continue;
            };

            {
                let mut sequences = self.sequences.lock().await;
                let sq = sequences
                    .entry(dst)
                    .or_insert_with(|| self.new_record(dst));
                packet.seq = sq.next_seq();

                let mut acks = self.acks.lock().await;
                packet.ack = std::mem::take(&mut acks.confirmed);

                if self.role == Role::Server {
                    let mut pending = self.pending_reset.lock().await;
                    if pending.remove(&dst) {
                        packet.flags.insert(PacketFlags::RST);
                        sequences.remove(&dst);
                        debug!(peer = %dst, seq = packet.seq, "stamping sequence reset");
                    }
                }

                acks.unconfirmed.push(packet.clone());

                if packet.kind == PacketKind::Rst {
                    sequences.remove(&dst);
                    trace!(peer = %dst, "sequence record dropped with outbound RST");
                }
            }

            let wire = match packet.encode() {
                Ok(wire) => wire,
                Err(e) => {
                    warn!(peer = %dst, error = %e, "failed to encode packet");
                    continue;
                }
            };

            match self.transport.send_to(&wire, dst).await {
                Ok(_) => {
                    self.stats.record_sent(packet.data.len());
                    trace!(
                        peer = %dst,
                        seq = packet.seq,
                        kind = packet.kind.as_str(),
                        acks = packet.ack.len(),
                        "packet transmitted"
                    );
                }
                Err(e) => {
                    // The clone stays on the unconfirmed list; a later
                    // reset replays it.
                    warn!(peer = %dst, seq = packet.seq, error = %e, "send failed");
                }
            }
        }

        Ok(())
    }

    // ------------------------------------------------------------------
    // Receive pipeline
    // ------------------------------------------------------------------

    /// Receive one datagram from the transport. Used by the socket task;
    /// pairs with [`RudpEngine::handle_datagram`].
    pub async fn recv_datagram(&self, buf: &mut [u8]) -> std::io::Result<(usize, SocketAddr)> {
        self.transport.recv_from(buf).await
    }

    /// Feed one raw datagram from the socket task into the recv queue.
    pub async fn handle_datagram(&self, src: SocketAddr, datagram: Bytes) {
        let mut packet = match Packet::decode(datagram) {
            Ok(packet) => packet,
            Err(e) => {
                self.stats.record_decode_failure();
                warn!(peer = %src, error = %e, "dropping undecodable datagram");
                return;
            }
        };

        // A client normalizes every source to its one remote.
        packet.src = Some(match self.role {
            Role::Client => self.remote.unwrap_or(src),
            Role::Server => src,
        });
        packet.received_at = current_timestamp();

        if packet.kind == PacketKind::Rst && self.role == Role::Client {
            self.stats.record_reset();
            if !self.reset_pending.swap(true, Ordering::SeqCst) {
                info!(peer = %src, "reset requested by peer");
                self.reset_signal.notify_one();
            }
            return;
        }

        self.recv_queue.lock().await.push_back(packet);
    }

    /// One recv-loop tick: drain a batch, group by source, process each
    /// group in ascending sequence order.
    pub async fn process(&self) -> Result<()> {
        let batch: Vec<Packet> = {
            let mut queue = self.recv_queue.lock().await;
            let n = queue.len().min(self.config.recv_batch);
            queue.drain(..n).collect()
        };
        if batch.is_empty() {
            return Ok(());
        }

        let mut groups: HashMap<SocketAddr, Vec<Packet>> = HashMap::new();
        for packet in batch {
            let Some(src) = packet.src else { continue };
            groups.entry(src).or_default().push(packet);
        }

        for (peer, mut group) in groups {
            group.sort_by_key(|packet| packet.seq);
            self.process_group(peer, group).await;
        }

        Ok(())
    }

    async fn process_group(&self, peer: SocketAddr, group: Vec<Packet>) {
        let mut is_new_sequence = self.init_sequence(peer).await;

        if !is_new_sequence && self.pending_reset.lock().await.contains(&peer) {
            trace!(peer = %peer, "group skipped while reset is pending");
            return;
        }

        // Actions deferred until the sequence lock is released
        let mut requeue: Vec<Packet> = Vec::new();
        let mut reset_requested = false;
        let mut reply_syn_ack = false;
        let mut suppress_ack = false;

        let group_has_ackable = group
            .iter()
            .any(|p| !matches!(p.kind, PacketKind::Ack | PacketKind::Nul));
        let last_seq = group.last().map(|p| p.seq).unwrap_or(0);

        {
            let mut sequences = self.sequences.lock().await;

            for index in 0..group.len() {
                let packet = &group[index];
                let Some(sq) = sequences.get_mut(&peer) else {
                    break;
                };

                if sq.skipped.remove(&packet.seq) {
                    trace!(peer = %peer, seq = packet.seq, "already consumed by reassembly");
                    continue;
                }

                if packet.seq != sq.remote {
                    if is_new_sequence {
                        // The peer thinks it is already talking to us
                        // but we hold no record of it.
                        debug!(
                            peer = %peer,
                            seq = packet.seq,
                            expected = sq.remote,
                            "out-of-order packet on a fresh sequence, requesting reset"
                        );
                        reset_requested = true;
                        suppress_ack = true;
                    } else {
                        trace!(
                            peer = %peer,
                            seq = packet.seq,
                            expected = sq.remote,
                            "missing predecessor, requeueing remainder of group"
                        );
                        requeue.extend(group[index..].iter().cloned());
                    }
                    break;
                }

                if is_new_sequence && self.role == Role::Server && packet.kind != PacketKind::Syn {
                    // First contact from an unknown peer must be SYN.
                    debug!(
                        peer = %peer,
                        kind = packet.kind.as_str(),
                        "non-SYN first packet from unknown peer, ignoring"
                    );
                    sequences.remove(&peer);
                    suppress_ack = true;
                    break;
                }

                // Accept
                sq.remote += 1;
                self.stats.record_received(packet.data.len());

                if self.role == Role::Server && packet.kind == PacketKind::Syn {
                    let mut clients = self.clients.write().await;
                    if clients.insert(peer) {
                        drop(clients);
                        // Anything this peer had queued before the
                        // handshake is stale.
                        self.recv_queue
                            .lock()
                            .await
                            .retain(|p| p.src != Some(peer));
                        info!(peer = %peer, "client connected");
                        self.emit(RudpEvent::ClientConnected(peer));
                        reply_syn_ack = true;
                    }
                }

                if packet.qty > 0 && packet.kind == PacketKind::Dat {
                    self.handle_fragment(sq, &group, index).await;
                } else {
                    self.confirm_packet(packet).await;
                    self.dispatch(packet.clone());
                }

                if self.role == Role::Client
                    && packet.kind == PacketKind::Syn
                    && packet.flags.contains(PacketFlags::ACK)
                {
                    let mut state = self.state.lock().await;
                    if *state != ConnectionState::Open {
                        *state = ConnectionState::Open;
                        info!(peer = %peer, "connection established");
                        self.emit(RudpEvent::Connected(peer));
                    }
                }

                if self.role == Role::Client && packet.flags.contains(PacketFlags::RST) {
                    debug!(peer = %peer, "peer restarted its sequence, dropping remainder of group");
                    break;
                }

                if self.role == Role::Server && packet.kind == PacketKind::Rst {
                    // The peer walked away; its record dies with the RST.
                    sequences.remove(&peer);
                    let was_client = self.clients.write().await.remove(&peer);
                    if was_client {
                        info!(peer = %peer, "client disconnected");
                        self.emit(RudpEvent::ClientDisconnected(peer));
                    }
                    suppress_ack = true;
                    break;
                }

                is_new_sequence = false;
            }

            if self.role == Role::Server && last_seq > self.config.sequence_limit {
                let mut pending = self.pending_reset.lock().await;
                if pending.insert(peer) {
                    debug!(peer = %peer, seq = last_seq, "sequence limit exceeded, scheduling reset");
                }
            }
        }

        if !requeue.is_empty() {
            let mut queue = self.recv_queue.lock().await;
            for packet in requeue {
                queue.push_back(packet);
            }
        }

        if reset_requested {
            if let Err(e) = self.request_connection_reset(peer).await {
                warn!(peer = %peer, error = %e, "failed to request connection reset");
            }
        }

        if group_has_ackable && !suppress_ack {
            if let Err(e) = self.queue(peer, PacketKind::Ack, None).await {
                warn!(peer = %peer, error = %e, "failed to queue acknowledgement");
            }
        }

        if reply_syn_ack {
            if let Err(e) = self
                .queue_with_flags(peer, PacketKind::Syn, PacketFlags::ACK, None)
                .await
            {
                warn!(peer = %peer, error = %e, "failed to queue handshake reply");
            }
        }
    }

    /// Handle an accepted fragment at `group[index]`. If the whole set
    /// is inside the current group it is reassembled in place; otherwise
    /// the fragment is buffered until the set completes. Either way the
    /// user sees exactly one dispatched message per logical payload.
    async fn handle_fragment(&self, sq: &mut SequenceRecord, group: &[Packet], index: usize) {
        let packet = &group[index];
        let mates: Vec<&Packet> = group[index..]
            .iter()
            .filter(|p| p.id == packet.id)
            .collect();

        // Fragments of one message occupy consecutive sequences; anything
        // else (duplicates, gaps) goes through the buffered path.
        let complete_in_group = mates.len() == packet.qty as usize
            && mates
                .iter()
                .enumerate()
                .all(|(i, p)| p.seq == packet.seq + i as u32);

        if !sq.fragments.contains_key(&packet.id) && complete_in_group {
            // Whole message in this group: consume the lookahead
            // fragments now and shield them from re-processing.
            let total: usize = mates.iter().map(|p| p.data.len()).sum();
            let mut payload = BytesMut::with_capacity(total);
            for mate in &mates {
                payload.extend_from_slice(&mate.data);
            }
            for mate in mates.iter().skip(1) {
                sq.skipped.insert(mate.seq);
                sq.remote += 1;
                self.stats.record_received(mate.data.len());
            }
            for mate in &mates {
                self.confirm_packet(mate).await;
            }

            let mut message = packet.clone();
            message.data = payload.freeze();
            trace!(
                peer = ?message.src,
                id = message.id,
                fragments = message.qty,
                bytes = message.data.len(),
                "message reassembled"
            );
            self.dispatch(message);
        } else {
            self.confirm_packet(packet).await;
            let stash = sq.fragments.entry(packet.id).or_default();
            if !stash.iter().any(|p| p.seq == packet.seq) {
                stash.push(packet.clone());
            }

            if stash.len() == packet.qty as usize {
                stash.sort_by_key(|p| p.seq);
                let total: usize = stash.iter().map(|p| p.data.len()).sum();
                let mut payload = BytesMut::with_capacity(total);
                for fragment in stash.iter() {
                    payload.extend_from_slice(&fragment.data);
                }

                let mut message = stash[0].clone();
                message.data = payload.freeze();
                sq.fragments.remove(&packet.id);
                trace!(
                    peer = ?message.src,
                    id = message.id,
                    fragments = message.qty,
                    bytes = message.data.len(),
                    "message reassembled from buffered fragments"
                );
                self.dispatch(message);
            }
        }
    }

    // ------------------------------------------------------------------
    // Confirmation
    // ------------------------------------------------------------------

    /// Confirm a received packet: its seq rides on our next outbound's
    /// ack array, and its own ack array (stamped by the remote) releases
    /// entries from our unconfirmed list.
    pub async fn confirm_packet(&self, packet: &Packet) {
        let mut acks = self.acks.lock().await;
        acks.confirmed.push(packet.seq);
        if !packet.ack.is_empty() {
            acks.unconfirmed.retain(|sent| !packet.ack.contains(&sent.seq));
        }
    }

    /// Number of transmitted packets not yet acknowledged by any peer
    pub async fn unconfirmed_len(&self) -> usize {
        self.acks.lock().await.unconfirmed.len()
    }

    /// Sequence numbers currently sitting on the unconfirmed list
    pub async fn unconfirmed_seqs(&self) -> Vec<SeqNum> {
        self.acks
            .lock()
            .await
            .unconfirmed
            .iter()
            .map(|packet| packet.seq)
            .collect()
    }

    /// Whether a sequence record currently exists for `peer`
    pub async fn sequence_known(&self, peer: SocketAddr) -> bool {
        self.sequences.lock().await.contains_key(&peer)
    }

    // ------------------------------------------------------------------
    // Connection / reset
    // ------------------------------------------------------------------

    /// Drop a peer: remove it from the clients map, send RST (which
    /// also discards the sequence record on transmit) and announce the
    /// disconnect if the peer was a known client.
    pub async fn request_connection_reset(&self, peer: SocketAddr) -> Result<()> {
        let was_client = self.clients.write().await.remove(&peer);
        self.queue(peer, PacketKind::Rst, None).await?;
        self.stats.record_reset();
        if was_client {
            info!(peer = %peer, "client disconnected");
            self.emit(RudpEvent::ClientDisconnected(peer));
        }
        Ok(())
    }

    /// Wait until the peer demands a reset (client role). Used by the
    /// recovery task.
    pub(crate) async fn reset_requested(&self) {
        self.reset_signal.notified().await;
    }

    /// Client-side self-heal after a peer RST: rebuild the sequence
    /// state, go back to OPENING, resend a SYN and replay every
    /// unconfirmed packet. Sequence numbers are re-assigned on flush.
    pub async fn recover_from_reset(&self) {
        let Some(remote) = self.remote else {
            return;
        };
        info!(peer = %remote, "rebuilding state after peer reset");

        self.sequences.lock().await.clear();
        self.recv_queue.lock().await.clear();

        let retained = {
            let mut acks = self.acks.lock().await;
            acks.confirmed.clear();
            std::mem::take(&mut acks.unconfirmed)
        };

        self.set_state(ConnectionState::Opening).await;
        if let Err(e) = self.queue(remote, PacketKind::Syn, None).await {
            warn!(peer = %remote, error = %e, "failed to queue SYN after reset");
        }

        {
            let mut queue = self.send_queue.lock().await;
            for mut packet in retained {
                packet.ack.clear();
                packet.confirmed = false;
                self.stats.record_retransmission();
                queue.push_back(packet);
            }
        }

        self.reset_pending.store(false, Ordering::SeqCst);
    }

    /// Enqueue a NUL keep-alive to every known client (server role).
    pub async fn send_keep_alive(&self) -> Result<()> {
        let peers: Vec<SocketAddr> = self.clients.read().await.iter().copied().collect();
        for peer in peers {
            self.queue(peer, PacketKind::Nul, None).await?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    fn emit(&self, event: RudpEvent) {
        if self.events.send(event).is_err() {
            trace!("event receiver dropped");
        }
    }

    fn dispatch(&self, packet: Packet) {
        self.stats.record_dispatch();
        self.emit(RudpEvent::PacketReceived(packet));
    }
}
