//! One RealPort Connection, independent of any I/O.
//!
//! The transport layer owns the byte stream and drives the Connection with
//! three calls:
//! - [`Connection::encode`] returns the next bytes to write
//! - [`Connection::decode`] consumes bytes read from the PortServer
//! - [`Connection::tick`] advances the rate pacer once per tick
//!
//! The tty side works through per-channel calls (`request_open`,
//! `write_tx`, `read_rx_raw`, ...) and learns about completions from
//! [`Connection::drain_events`].
//!
//! # Example
//!
//! ```
//! use std::time::Instant;
//! use realport::engine::{Connection, ConnectionState};
//! use realport::EngineConfig;
//!
//! let mut conn = Connection::new(EngineConfig::default()).unwrap();
//! let now = Instant::now();
//!
//! // First encode asks the PortServer how many ports it has.
//! assert_eq!(&conn.encode(1024, now)[..], &[0xE0]);
//!
//! // The PortServer answers with 16 channels.
//! conn.decode(&[0xE1, 0x00, 0x10], now).unwrap();
//! assert_eq!(conn.state(), ConnectionState::Ready);
//! assert_eq!(conn.channel_count(), 16);
//! ```

use std::collections::VecDeque;
use std::time::Instant;

use bytes::{Bytes, BytesMut};
use serde::Serialize;
use tracing::{debug, error, warn};

use super::channel::{
    self, query, Channel, ChannelCommand, ChannelSnapshot, ChannelState, Effect,
};
use super::event::{EngineEvent, OpenStatus, OpenToken};
use super::pacer::RatePacer;
use super::params::ChannelParams;
use super::schedule;
use super::window::{SyncPurpose, SyncRing};
use crate::config::EngineConfig;
use crate::error::{RealportError, Result};
use crate::monitor::{Monitor, RecordKind, NO_CHANNEL};
use crate::protocol::{
    channel_index, module_of, port_of, Command, Frame, FrameBuffer, OpenType, PortCommand,
    PortReply, Reply, Scanned, MAX_HEADER_LEN,
};

/// Steps a channel may take in one encode pass.
const MAX_STEPS: usize = 4;

/// Space kept back for the sync request after data (select + 3-byte frame).
const SYNC_RESERVE: usize = 4;

/// Connection-level protocol state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    /// Nothing sent yet.
    Idle,
    /// Capability query sent, waiting for the channel count.
    WaitCapability,
    Ready,
    /// Terminal. The transport should tear down and reconnect.
    Error,
}

/// Bytes being assembled by one encode call.
struct Batch {
    out: BytesMut,
    limit: usize,
    tx_module: Option<u8>,
    /// `(channel, start, end)` of every frame, for the monitor.
    frames: Vec<(u16, usize, usize)>,
}

impl Batch {
    fn new(limit: usize, tx_module: Option<u8>) -> Self {
        Self {
            out: BytesMut::with_capacity(limit.min(64 * 1024)),
            limit,
            tx_module,
            frames: Vec::new(),
        }
    }

    fn remaining(&self) -> usize {
        self.limit.saturating_sub(self.out.len())
    }

    /// Append a frame, preceded by a module select when the channel's
    /// block differs from the last one. Returns false if it does not fit.
    fn put(&mut self, channel: Option<u16>, cmd: &Command) -> bool {
        let select = channel
            .map(module_of)
            .filter(|&m| Some(m) != self.tx_module);
        let need = cmd.encoded_len() + usize::from(select.is_some());
        if need > self.remaining() {
            return false;
        }
        let start = self.out.len();
        if let Some(module) = select {
            Command::ModuleSelect(module).encode(&mut self.out);
            self.tx_module = Some(module);
        }
        if let Command::ModuleSelect(module) = cmd {
            self.tx_module = Some(*module);
        }
        cmd.encode(&mut self.out);
        self.frames
            .push((channel.unwrap_or(NO_CHANNEL), start, self.out.len()));
        true
    }
}

/// Engine state for one PortServer.
pub struct Connection {
    config: EngineConfig,
    state: ConnectionState,
    channels: Vec<Channel>,
    /// Module the PortServer will apply our next channel frame to.
    tx_module: Option<u8>,
    /// Module the PortServer's frames currently address.
    rx_module: u8,
    rx_frames: FrameBuffer<Reply>,
    /// Control frames waiting for transport space.
    outbound: VecDeque<(Option<u16>, Command)>,
    ring: SyncRing,
    pacer: RatePacer,
    events: Vec<EngineEvent>,
    pending_diagnostic: Option<String>,
    last_tx: Option<Instant>,
    last_tx_channel: Option<u16>,
    /// First channel considered when not every channel fits in one batch.
    data_rotor: usize,
    next_ticket: u64,
    next_token: u64,
    monitor: Option<Monitor>,
}

impl Connection {
    /// Create an idle Connection.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the configuration does not validate.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            state: ConnectionState::Idle,
            channels: Vec::new(),
            tx_module: None,
            rx_module: 0,
            rx_frames: FrameBuffer::new(config.max_frame_size),
            outbound: VecDeque::new(),
            ring: SyncRing::new(config.sync_ring_capacity),
            pacer: RatePacer::new(&config),
            events: Vec::new(),
            pending_diagnostic: None,
            last_tx: None,
            last_tx_channel: None,
            data_rotor: 0,
            next_ticket: 1,
            next_token: 1,
            monitor: None,
            config,
        })
    }

    /// Tee traffic and events into `monitor`.
    pub fn attach_monitor(&mut self, monitor: Monitor) {
        self.monitor = Some(monitor);
    }

    pub fn monitor_mut(&mut self) -> Option<&mut Monitor> {
        self.monitor.as_mut()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn channel_count(&self) -> u16 {
        self.channels.len() as u16
    }

    /// Outstanding sync points.
    pub fn syncs_in_flight(&self) -> usize {
        self.ring.len()
    }

    /// Current pacer rate in bytes per second.
    pub fn pacer_rate(&self) -> u32 {
        self.pacer.rate()
    }

    /// Take every event raised since the last call.
    pub fn drain_events(&mut self) -> Vec<EngineEvent> {
        std::mem::take(&mut self.events)
    }

    // ---- transport side ----

    /// Produce up to `max_bytes` for the transport.
    pub fn encode(&mut self, max_bytes: usize, now: Instant) -> Bytes {
        let mark = self.events.len();
        let mut batch = Batch::new(max_bytes, self.tx_module);
        let mut seqs = Vec::new();

        match self.state {
            ConnectionState::Error => {
                if let Some(text) = self.pending_diagnostic.take() {
                    batch.put(None, &Command::Diagnostic(text));
                }
            }
            ConnectionState::Idle => {
                self.outbound.push_back((None, Command::CapabilityQuery));
                self.state = ConnectionState::WaitCapability;
                debug!("capability query queued");
            }
            ConnectionState::WaitCapability => {}
            ConnectionState::Ready => self.run_channels(now, &mut seqs),
        }

        self.flush_outbound(&mut batch);
        if self.state == ConnectionState::Ready {
            self.send_data(&mut batch, now, &mut seqs);
        }

        let alive = matches!(
            self.state,
            ConnectionState::WaitCapability | ConnectionState::Ready
        );
        let quiet = self
            .last_tx
            .is_some_and(|t| now.saturating_duration_since(t) >= self.config.keepalive());
        if alive && quiet && batch.out.is_empty() {
            let module = self.tx_module.unwrap_or(0);
            batch.put(None, &Command::ModuleSelect(module));
        }

        let out = self.finish(batch, now, &seqs);
        self.tee_events(mark, now);
        out
    }

    /// Consume bytes read from the PortServer.
    ///
    /// # Errors
    ///
    /// Protocol errors put the Connection in `Error` and are returned.
    /// Later calls return `ConnectionClosed`.
    pub fn decode(&mut self, data: &[u8], now: Instant) -> Result<()> {
        let mark = self.events.len();
        let result = self.decode_inner(data, now);
        self.tee_events(mark, now);
        result
    }

    /// Advance the pacer by one tick.
    ///
    /// # Errors
    ///
    /// `RoundTripTimeout` when the oldest sync went stale. The Connection
    /// is failed.
    pub fn tick(&mut self, now: Instant) -> Result<()> {
        if self.state == ConnectionState::Error {
            return Err(RealportError::ConnectionClosed);
        }
        let mark = self.events.len();
        let result = match self.pacer.tick(&self.ring, now) {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fail(e)),
        };
        self.tee_events(mark, now);
        result
    }

    /// The byte stream is gone. Every waiter fails.
    pub fn abort(&mut self, reason: &str) {
        if self.state == ConnectionState::Error {
            return;
        }
        warn!(reason, "connection aborted");
        self.state = ConnectionState::Error;
        self.teardown();
        self.events.push(EngineEvent::Failed(reason.to_string()));
    }

    fn finish(&mut self, batch: Batch, now: Instant, seqs: &[u8]) -> Bytes {
        let Batch {
            out,
            tx_module,
            frames,
            ..
        } = batch;
        self.tx_module = tx_module;
        if !out.is_empty() {
            self.last_tx = Some(now);
            self.pacer.spend(out.len());
            for &seq in seqs {
                self.ring.set_size(seq, out.len());
            }
        }
        if let Some(monitor) = self.monitor.as_mut() {
            for (channel, start, end) in frames {
                monitor.record(RecordKind::Tx, now, channel, &out[start..end]);
            }
        }
        out.freeze()
    }

    fn tee_events(&mut self, mark: usize, now: Instant) {
        let Some(monitor) = self.monitor.as_mut() else {
            return;
        };
        for event in &self.events[mark..] {
            let channel = match event {
                EngineEvent::Opened { channel }
                | EngineEvent::OpenFailed { channel, .. }
                | EngineEvent::Hangup { channel }
                | EngineEvent::Closed { channel }
                | EngineEvent::ParamsSynced { channel }
                | EngineEvent::RoundTrip { channel, .. }
                | EngineEvent::RxReady { channel }
                | EngineEvent::TxSpace { channel }
                | EngineEvent::Drained { channel }
                | EngineEvent::Modem { channel, .. }
                | EngineEvent::ChannelRemoved { channel } => *channel,
                EngineEvent::ChannelCount(_) | EngineEvent::Failed(_) => NO_CHANNEL,
            };
            monitor.event(now, channel, &format!("{event:?}"));
        }
    }

    /// Run each channel's state machine and collect its control frames.
    fn run_channels(&mut self, now: Instant, seqs: &mut Vec<u8>) {
        for i in 0..self.channels.len() {
            let index = i as u16;
            for _ in 0..MAX_STEPS {
                let inputs = self.channels[i].inputs(self.ring.peek_next());
                let Some(t) = channel::step(&inputs) else {
                    break;
                };
                if t.effects.iter().any(|e| matches!(e, Effect::BeginQuery { .. })) {
                    if let Some(seq) = self.ring.push(now, 0, SyncPurpose::Query(index)) {
                        seqs.push(seq);
                    }
                }
                let emit = self.channels[i].apply(t, &mut self.events);
                self.outbound
                    .extend(emit.into_iter().map(|cmd| (Some(index), cmd)));
            }

            let emit = self.channels[i].ready_commands(&mut self.events);
            self.outbound
                .extend(emit.into_iter().map(|cmd| (Some(index), cmd)));

            let Some(ticket) = self.channels[i].round_trip_wanted else {
                continue;
            };
            if !self.channels[i].state().is_server_open() {
                self.channels[i].round_trip_wanted = None;
                self.channels[i].on_round_trip(ticket);
                self.events.push(EngineEvent::RoundTrip {
                    channel: index,
                    ticket,
                });
                continue;
            }
            let purpose = SyncPurpose::RoundTrip {
                channel: index,
                ticket,
            };
            if let Some(seq) = self.ring.push(now, 0, purpose) {
                self.channels[i].round_trip_wanted = None;
                let target = self
                    .last_tx_channel
                    .filter(|&c| {
                        self.channels
                            .get(c as usize)
                            .is_some_and(|ch| ch.state().is_server_open())
                    })
                    .unwrap_or(index);
                self.outbound.push_back((
                    Some(target),
                    Command::Port {
                        port: port_of(target),
                        cmd: PortCommand::SeqRequest(seq),
                    },
                ));
                seqs.push(seq);
            }
        }
    }

    fn flush_outbound(&mut self, batch: &mut Batch) {
        while let Some((channel, cmd)) = self.outbound.front() {
            if !batch.put(*channel, cmd) {
                break;
            }
            self.outbound.pop_front();
        }
    }

    /// Share pacing credit and transport space among channels with data.
    ///
    /// Each served channel costs a frame header on top of its data. When the
    /// space cannot carry a header for every hungry channel, a rotating subset
    /// is served, starting after the last channel left out.
    fn send_data(&mut self, batch: &mut Batch, now: Instant, seqs: &mut Vec<u8>) {
        if !self.pacer.may_send() || !self.outbound.is_empty() {
            return;
        }
        let mut demands: Vec<usize> = self.channels.iter().map(Channel::data_demand).collect();
        let count = demands.len();
        if demands.iter().all(|&d| d == 0) {
            return;
        }
        let space = self
            .pacer
            .budget()
            .min(batch.remaining())
            .saturating_sub(SYNC_RESERVE);

        let per_channel = MAX_HEADER_LEN + 1;
        let mut overhead = 0;
        let mut admitted = vec![false; count];
        for offset in 0..count {
            let i = (self.data_rotor + offset) % count;
            if demands[i] == 0 {
                continue;
            }
            // Room for the header and at least one byte of data.
            if overhead + per_channel + 1 > space {
                self.data_rotor = i;
                break;
            }
            overhead += per_channel;
            admitted[i] = true;
        }
        for (demand, &ok) in demands.iter_mut().zip(&admitted) {
            if !ok {
                *demand = 0;
            }
        }
        let alloc = schedule::allocate(space - overhead, &demands);

        let mut sent_any = false;
        for (i, &grant) in alloc.iter().enumerate() {
            let index = i as u16;
            let chunk = self.channels[i].tx_chunk();
            let mut left = grant;
            while left > 0 {
                let data = self.channels[i].peek_tx(left.min(chunk));
                let len = data.len();
                if len == 0 {
                    break;
                }
                let frame = Command::Data {
                    port: port_of(index),
                    data,
                };
                if !batch.put(Some(index), &frame) {
                    break;
                }
                self.channels[i].commit_tx(len);
                left -= len;
            }
            if left < grant {
                sent_any = true;
                self.last_tx_channel = Some(index);
                self.events.push(EngineEvent::TxSpace { channel: index });
            }
        }

        if !sent_any {
            return;
        }
        let (Some(target), Some(seq)) = (self.last_tx_channel, self.ring.peek_next()) else {
            return;
        };
        let request = Command::Port {
            port: port_of(target),
            cmd: PortCommand::SeqRequest(seq),
        };
        if batch.put(Some(target), &request) {
            self.ring.push(now, 0, SyncPurpose::Pacing);
            seqs.push(seq);
        }
    }

    fn decode_inner(&mut self, data: &[u8], now: Instant) -> Result<()> {
        if self.state == ConnectionState::Error {
            return Err(RealportError::ConnectionClosed);
        }
        let replies = match self.rx_frames.push(data) {
            Ok(replies) => replies,
            Err(e) => return Err(self.fail(e)),
        };
        for reply in replies {
            self.record_rx(&reply, now);
            if let Err(e) = self.handle_reply(reply) {
                if e.is_fatal() {
                    return Err(self.fail(e));
                }
                return Err(e);
            }
        }
        Ok(())
    }

    fn record_rx(&mut self, reply: &Reply, now: Instant) {
        let rx_module = self.rx_module;
        let Some(monitor) = self.monitor.as_mut() else {
            return;
        };
        let channel = match reply {
            Reply::Data { port, .. }
            | Reply::TxWindow { port, .. }
            | Reply::Open { port, .. }
            | Reply::Port { port, .. } => channel_index(rx_module, *port),
            _ => NO_CHANNEL,
        };
        let mut bytes = BytesMut::with_capacity(reply.encoded_len());
        reply.encode(&mut bytes);
        monitor.record(RecordKind::Rx, now, channel, &bytes);
    }

    fn handle_reply(&mut self, reply: Reply) -> Result<()> {
        match reply {
            Reply::ModuleSelect(module) => {
                self.rx_module = module;
                Ok(())
            }
            Reply::ChannelCount(count) => self.set_channel_count(count),
            Reply::Diagnostic(text) => {
                warn!(%text, "PortServer diagnostic");
                Ok(())
            }
            Reply::Data { port, data } => {
                let i = self.rx_channel(port)?;
                self.channels[i].on_data(&data, &mut self.events)
            }
            Reply::TxWindow { port, rpos, window } => {
                let i = self.rx_channel(port)?;
                self.channels[i].on_tx_window(rpos, window, &mut self.events)
            }
            Reply::Open { port, reply } => {
                let i = self.rx_channel(port)?;
                let inputs = self.channels[i].inputs(None);
                let t = channel::on_open_reply(&inputs, reply)?;
                let emit = self.channels[i].apply(t, &mut self.events);
                self.queue(i, emit);
                Ok(())
            }
            Reply::Port {
                port,
                reply: PortReply::Sequence(seq),
            } => {
                let i = self.rx_channel(port)?;
                self.on_sequence(i, seq)
            }
            Reply::Port { port, reply } => {
                let i = self.rx_channel(port)?;
                let emit = self.channels[i].on_port_reply(reply, &mut self.events)?;
                self.queue(i, emit);
                Ok(())
            }
        }
    }

    fn queue(&mut self, i: usize, emit: Vec<Command>) {
        let index = i as u16;
        self.outbound
            .extend(emit.into_iter().map(|cmd| (Some(index), cmd)));
    }

    /// Resolve a port nibble against the receive module.
    fn rx_channel(&self, port: u8) -> Result<usize> {
        let channel = channel_index(self.rx_module, port);
        if channel as usize >= self.channels.len() {
            return Err(RealportError::ChannelOutOfRange {
                channel,
                count: self.channel_count(),
            });
        }
        Ok(channel as usize)
    }

    fn on_sequence(&mut self, i: usize, seq: u8) -> Result<()> {
        let acked = self
            .ring
            .acknowledge(seq)
            .ok_or_else(|| RealportError::UnexpectedReply {
                channel: i as u16,
                reply: "sequence reply",
                state: self.channels[i].state().name(),
            })?;
        for point in acked {
            match point.purpose {
                SyncPurpose::Pacing => {}
                SyncPurpose::Query(channel) => {
                    if let Some(ch) = self.channels.get_mut(channel as usize) {
                        let emit = ch.clear_query_bit(query::SEQ, &mut self.events);
                        self.queue(channel as usize, emit);
                    }
                }
                SyncPurpose::RoundTrip { channel, ticket } => {
                    if let Some(ch) = self.channels.get_mut(channel as usize) {
                        ch.on_round_trip(ticket);
                    }
                    self.events.push(EngineEvent::RoundTrip { channel, ticket });
                }
            }
        }
        Ok(())
    }

    fn set_channel_count(&mut self, count: u16) -> Result<()> {
        let count = if count > self.config.max_channels {
            warn!(count, max = self.config.max_channels, "channel count clamped");
            self.config.max_channels
        } else {
            count
        };
        let current = self.channel_count();
        if count < current {
            for ch in self.channels.drain(count as usize..) {
                self.events.push(EngineEvent::ChannelRemoved {
                    channel: ch.index(),
                });
            }
        } else {
            let extra = (count - current) as usize;
            self.channels
                .try_reserve(extra)
                .map_err(|_| RealportError::Alloc(extra * std::mem::size_of::<Channel>()))?;
            for index in current..count {
                self.channels.push(Channel::new(index, &self.config)?);
            }
        }
        if self.state != ConnectionState::Ready {
            self.state = ConnectionState::Ready;
        }
        debug!(channels = count, "channel count set");
        self.events.push(EngineEvent::ChannelCount(count));
        Ok(())
    }

    /// Enter `Error`, queue a diagnostic naming `e`, and hand `e` back.
    fn fail(&mut self, e: RealportError) -> RealportError {
        error!(error = %e, "connection failed");
        self.state = ConnectionState::Error;
        self.pending_diagnostic = Some(e.to_string());
        self.teardown();
        self.events.push(EngineEvent::Failed(e.to_string()));
        e
    }

    fn teardown(&mut self) {
        self.outbound.clear();
        self.ring.clear();
        self.rx_frames.clear();
        for ch in &mut self.channels {
            ch.force_idle();
        }
    }

    // ---- tty side ----

    fn channel(&self, channel: u16) -> Result<&Channel> {
        let count = self.channel_count();
        self.channels
            .get(channel as usize)
            .ok_or(RealportError::ChannelOutOfRange { channel, count })
    }

    fn channel_mut(&mut self, channel: u16) -> Result<&mut Channel> {
        if self.state == ConnectionState::Error {
            return Err(RealportError::ConnectionClosed);
        }
        let count = self.channel_count();
        self.channels
            .get_mut(channel as usize)
            .ok_or(RealportError::ChannelOutOfRange { channel, count })
    }

    /// Ask for `channel` to be opened as `otype`.
    ///
    /// # Errors
    ///
    /// `Hangup` while an earlier hangup is still held by local opens.
    pub fn request_open(&mut self, channel: u16, otype: OpenType) -> Result<OpenStatus> {
        let id = self.next_token;
        let ch = self.channel_mut(channel)?;
        if ch.is_hung_up() {
            return Err(RealportError::Hangup(channel));
        }
        if ch.state() == ChannelState::Ready {
            ch.add_open();
            return Ok(OpenStatus::Opened);
        }
        ch.add_waiter(otype);
        self.next_token += 1;
        Ok(OpenStatus::Pending(OpenToken { channel, otype, id }))
    }

    /// Withdraw a pending open. The last waiter for an in-flight request
    /// makes the next encode send a cancel.
    pub fn cancel_open(&mut self, token: OpenToken) -> Result<()> {
        self.channel_mut(token.channel)?.remove_waiter(token.otype);
        Ok(())
    }

    /// Drop one local open. The port closes once the last one is gone and
    /// the transmit buffer has drained.
    pub fn close(&mut self, channel: u16) -> Result<()> {
        self.channel_mut(channel)?.close()
    }

    pub fn set_params(&mut self, channel: u16, params: ChannelParams) -> Result<()> {
        self.channel_mut(channel)?.set_params(params)
    }

    pub fn set_modem_out(&mut self, channel: u16, bits: u8) -> Result<()> {
        self.channel_mut(channel)?.set_modem_out(bits)
    }

    /// Queue bytes for `channel`. Returns bytes accepted, possibly 0.
    pub fn write_tx(&mut self, channel: u16, data: &[u8]) -> Result<usize> {
        self.channel_mut(channel)?.write_tx(data)
    }

    /// Read received bytes as they arrived.
    pub fn read_rx_raw(&mut self, channel: u16, out: &mut [u8]) -> Result<usize> {
        Ok(self.channel_mut(channel)?.read_rx_raw(out))
    }

    /// Read received bytes with escapes decoded into flags.
    pub fn read_rx_cooked(&mut self, channel: u16, max: usize) -> Result<Scanned> {
        Ok(self.channel_mut(channel)?.read_rx_cooked(max))
    }

    /// Issue a line command. `FlushInput` returns the round-trip ticket
    /// after which stale input stops arriving.
    pub fn command(&mut self, channel: u16, cmd: ChannelCommand) -> Result<Option<u64>> {
        let ticket = (cmd == ChannelCommand::FlushInput).then(|| self.alloc_ticket());
        self.channel(channel)?;
        let ch = &mut self.channels[channel as usize];
        ch.command(cmd, ticket, &mut self.events)?;
        if ticket.is_some() {
            ch.round_trip_wanted = ticket;
        }
        Ok(ticket)
    }

    /// Request a sync through `channel`. Completion is reported as
    /// [`EngineEvent::RoundTrip`] with a ticket at least the returned one.
    pub fn request_round_trip(&mut self, channel: u16) -> Result<u64> {
        let ticket = self.alloc_ticket();
        self.channel_mut(channel)?.round_trip_wanted = Some(ticket);
        Ok(ticket)
    }

    fn alloc_ticket(&mut self) -> u64 {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        ticket
    }

    pub fn snapshot(&self, channel: u16) -> Result<ChannelSnapshot> {
        Ok(self.channel(channel)?.snapshot())
    }

    pub fn tx_space(&self, channel: u16) -> Result<usize> {
        Ok(self.channel(channel)?.tx_space())
    }

    pub fn rx_pending(&self, channel: u16) -> Result<usize> {
        Ok(self.channel(channel)?.rx_pending())
    }

    pub fn is_drained(&self, channel: u16) -> Result<bool> {
        Ok(self.channel(channel)?.is_drained())
    }

    pub fn params_synced(&self, channel: u16) -> Result<bool> {
        Ok(self.channel(channel)?.params_synced())
    }
}
