//! One PortServer port: buffers, negotiated state, and the open/close
//! state machine.
//!
//! The state machine is split in two halves:
//! - [`step`] runs when the encoder visits the channel and decides what the
//!   host should send next
//! - [`on_open_reply`] handles open, close and cancel responses
//!
//! Both are pure. They read a [`ChannelInputs`] copy and return a
//! [`Transition`]; [`Channel::apply`] carries it out.
//!
//! ```text
//!  Idle ──open──► WaitOpen ──accept──► SendQuery ──► WaitQuery ──4 replies──► Ready
//!   ▲  ◄──busy/fail──┘ │                                                      │
//!   │                cancel                                              last close
//!   │                  ▼                                                      ▼
//!   ├──── ack ──── WaitCancel ──late accept──► WaitFail ──► WaitClose ◄── SendClose
//!   └──────────────────────────── close ack ──────────────────┘
//! ```

use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use tracing::debug;

use super::event::EngineEvent;
use super::params::ChannelParams;
use super::ring::RingBuffer;
use super::window::{RxWindow, TxWindow};
use crate::config::EngineConfig;
use crate::error::{RealportError, Result};
use crate::protocol::{
    capability, event, modem, port_of, Command, EscapeScanner, EscapeStyle, OpenReply,
    OpenRequest, OpenType, ParamId, PortCommand, PortReply, Scanned, MEDIUM_DATA_MAX,
    SHORT_DATA_MAX,
};

/// Channel protocol state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ChannelState {
    #[default]
    Idle,
    WaitOpen,
    WaitCancel,
    WaitFail,
    SendQuery,
    WaitQuery,
    Ready,
    SendClose,
    WaitClose,
}

impl ChannelState {
    pub fn name(self) -> &'static str {
        match self {
            ChannelState::Idle => "Idle",
            ChannelState::WaitOpen => "WaitOpen",
            ChannelState::WaitCancel => "WaitCancel",
            ChannelState::WaitFail => "WaitFail",
            ChannelState::SendQuery => "SendQuery",
            ChannelState::WaitQuery => "WaitQuery",
            ChannelState::Ready => "Ready",
            ChannelState::SendClose => "SendClose",
            ChannelState::WaitClose => "WaitClose",
        }
    }

    /// Whether the PortServer holds the port open for us.
    pub fn is_server_open(self) -> bool {
        matches!(
            self,
            ChannelState::WaitQuery
                | ChannelState::Ready
                | ChannelState::SendClose
                | ChannelState::WaitClose
        )
    }
}

/// Outstanding open-time replies.
pub(crate) mod query {
    pub const SEQ: u8 = 0x1;
    pub const STATUS: u8 = 0x2;
    pub const BUFFERS: u8 = 0x4;
    pub const CAPABILITY: u8 = 0x8;
    pub const ALL: u8 = SEQ | STATUS | BUFFERS | CAPABILITY;
}

/// Line commands the tty glue can issue on an open port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelCommand {
    FlushInput,
    FlushOutput,
    PauseInput,
    PauseOutput,
    ResumeInput,
    ResumeOutput,
    SendBreak(Duration),
    SendImmediate(u8),
}

impl ChannelCommand {
    fn wire(self) -> PortCommand {
        match self {
            ChannelCommand::FlushInput => PortCommand::FlushInput,
            ChannelCommand::FlushOutput => PortCommand::FlushOutput,
            ChannelCommand::PauseInput => PortCommand::PauseInput,
            ChannelCommand::PauseOutput => PortCommand::PauseOutput,
            ChannelCommand::ResumeInput => PortCommand::ResumeInput,
            ChannelCommand::ResumeOutput => PortCommand::ResumeOutput,
            ChannelCommand::SendBreak(d) => {
                PortCommand::SendBreak(d.as_millis().min(u16::MAX as u128) as u16)
            }
            ChannelCommand::SendImmediate(b) => PortCommand::SendImmediate(b),
        }
    }
}

/// Values derived from the buffer reply when a port becomes Ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct DerivedParams {
    /// Largest data frame sent on this port.
    pub tx_chunk: usize,
    /// Preferred read size for the tty glue.
    pub rx_chunk: usize,
    /// Receive fill at which readers are worth waking.
    pub rx_low: usize,
    /// Receive fill at which the buffer is considered under pressure.
    pub rx_high: usize,
}

impl DerivedParams {
    fn compute(server_rx: u16, server_tx: u16, rx_capacity: usize, max_frame: usize) -> Self {
        Self {
            tx_chunk: (server_rx as usize / 4).max(MEDIUM_DATA_MAX).min(max_frame),
            rx_chunk: (server_tx as usize).clamp(SHORT_DATA_MAX, rx_capacity / 2),
            rx_low: rx_capacity / 4,
            rx_high: rx_capacity * 3 / 4,
        }
    }
}

/// Side effects requested by a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    InFlight(Option<OpenType>),
    ServerPending(Option<OpenType>),
    OpenedAs(OpenType),
    /// Open-time queries went out carrying this sequence number.
    BeginQuery { seq: u8 },
    /// All open waiters succeed.
    Opened,
    /// Waiters of this type fail.
    OpenFailed(OpenType),
    /// Force a hangup of the local port.
    Hangup,
    Closed,
}

/// Next state plus what to send and do on the way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub next: ChannelState,
    pub emit: Vec<Command>,
    pub effects: Vec<Effect>,
}

impl Transition {
    fn to(next: ChannelState) -> Self {
        Self {
            next,
            emit: Vec::new(),
            effects: Vec::new(),
        }
    }

    fn emit(mut self, cmd: Command) -> Self {
        self.emit.push(cmd);
        self
    }

    fn effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }
}

/// Everything the transition functions read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelInputs {
    pub index: u16,
    pub state: ChannelState,
    pub waiters: [u32; 3],
    pub in_flight: Option<OpenType>,
    pub server_pending: Option<OpenType>,
    pub opened_as: Option<OpenType>,
    pub open_count: u32,
    pub hangup: bool,
    pub tx_empty: bool,
    pub modem_out: u8,
    /// Sequence number available for a new sync point.
    pub next_seq: Option<u8>,
}

impl ChannelInputs {
    fn port(&self) -> u8 {
        port_of(self.index)
    }

    fn waiting(&self, t: OpenType) -> bool {
        self.waiters[t.index()] > 0
    }

    fn any_waiter(&self) -> bool {
        self.waiters.iter().any(|&w| w > 0)
    }

    fn reconnect(&self) -> bool {
        self.open_count > 0 && !self.hangup
    }

    fn request(&self, request: OpenRequest) -> Command {
        Command::Open {
            port: self.port(),
            request,
        }
    }

    fn close_request(&self) -> Command {
        match self.opened_as {
            Some(OpenType::Immediate) | None => self.request(OpenRequest::CloseImmediate),
            Some(_) => self.request(OpenRequest::CloseGraceful),
        }
    }
}

/// What the host sends next for a channel, if anything.
pub fn step(input: &ChannelInputs) -> Option<Transition> {
    use ChannelState::*;

    match input.state {
        Idle => {
            if let Some(t) = input.server_pending {
                if !input.waiting(t) || input.waiting(OpenType::Immediate) {
                    return Some(
                        Transition::to(WaitCancel)
                            .emit(input.request(OpenRequest::Cancel(t)))
                            .effect(Effect::InFlight(Some(t)))
                            .effect(Effect::ServerPending(None)),
                    );
                }
                return None;
            }
            let t = if input.waiting(OpenType::Immediate) || input.reconnect() {
                OpenType::Immediate
            } else {
                [OpenType::Persistent, OpenType::Incoming]
                    .into_iter()
                    .find(|&t| input.waiting(t))?
            };
            Some(
                Transition::to(WaitOpen)
                    .emit(input.request(OpenRequest::Open(t)))
                    .effect(Effect::InFlight(Some(t))),
            )
        }
        WaitOpen => {
            let t = input.in_flight?;
            if input.any_waiter() || input.reconnect() {
                return None;
            }
            Some(Transition::to(WaitCancel).emit(input.request(OpenRequest::Cancel(t))))
        }
        SendQuery => {
            let seq = input.next_seq?;
            let port = input.port();
            let cmd = |cmd| Command::Port { port, cmd };
            Some(
                Transition::to(WaitQuery)
                    .emit(cmd(PortCommand::SeqRequest(seq)))
                    .emit(cmd(PortCommand::EventMask(event::ALL)))
                    .emit(cmd(PortCommand::QueryStatus))
                    .emit(cmd(PortCommand::QueryBuffers))
                    .emit(cmd(PortCommand::QueryCapability))
                    .emit(Command::Param {
                        port,
                        param: ParamId::ModemOut,
                        value: u16::from(input.modem_out | modem::DTR | modem::RTS),
                    })
                    .effect(Effect::BeginQuery { seq }),
            )
        }
        Ready => {
            if input.open_count == 0 && !input.any_waiter() && input.tx_empty {
                Some(Transition::to(SendClose))
            } else {
                None
            }
        }
        SendClose => Some(Transition::to(WaitClose).emit(input.close_request())),
        WaitCancel | WaitFail | WaitQuery | WaitClose => None,
    }
}

/// Handle an open, close or cancel response.
///
/// # Errors
///
/// `UnexpectedReply` if the response does not answer an outstanding request.
pub fn on_open_reply(input: &ChannelInputs, reply: OpenReply) -> Result<Transition> {
    use ChannelState::*;
    use OpenReply::*;

    let in_flight = |t| input.in_flight == Some(t);
    let transition = match (input.state, reply) {
        (WaitOpen, Accept(t)) if in_flight(t) => Transition::to(SendQuery)
            .effect(Effect::InFlight(None))
            .effect(Effect::OpenedAs(t)),
        (WaitOpen, Busy(t)) if in_flight(t) && t != OpenType::Immediate => Transition::to(Idle)
            .effect(Effect::InFlight(None))
            .effect(Effect::ServerPending(Some(t))),
        (WaitOpen, Busy(t) | Fail(t)) if in_flight(t) => {
            let outcome = if input.open_count > 0 {
                Effect::Hangup
            } else {
                Effect::OpenFailed(t)
            };
            Transition::to(Idle)
                .effect(Effect::InFlight(None))
                .effect(outcome)
        }
        (Idle, Accept(t)) if input.server_pending == Some(t) => Transition::to(SendQuery)
            .effect(Effect::ServerPending(None))
            .effect(Effect::OpenedAs(t)),
        (Idle, Fail(t)) if input.server_pending == Some(t) => Transition::to(Idle)
            .effect(Effect::ServerPending(None))
            .effect(Effect::OpenFailed(t)),
        (WaitCancel, CancelAck(t) | Fail(t) | Busy(t)) if in_flight(t) => {
            Transition::to(Idle).effect(Effect::InFlight(None))
        }
        (WaitCancel, Accept(t)) if in_flight(t) => {
            Transition::to(WaitFail).effect(Effect::OpenedAs(t))
        }
        (WaitFail, CancelAck(t) | Fail(t)) if in_flight(t) => {
            if input.waiting(OpenType::Immediate) {
                Transition::to(SendQuery).effect(Effect::InFlight(None))
            } else {
                Transition::to(WaitClose)
                    .emit(input.close_request())
                    .effect(Effect::InFlight(None))
            }
        }
        (WaitClose, CloseAck) => Transition::to(Idle).effect(Effect::Closed),
        (WaitQuery | Ready | SendClose, Fail(t)) if input.opened_as == Some(t) => {
            Transition::to(Idle).effect(Effect::Hangup)
        }
        _ => {
            return Err(RealportError::UnexpectedReply {
                channel: input.index,
                reply: reply.name(),
                state: input.state.name(),
            })
        }
    };
    Ok(transition)
}

/// Per-port state owned by the Connection.
#[derive(Debug)]
pub struct Channel {
    index: u16,
    state: ChannelState,
    tx: RingBuffer,
    rx: RingBuffer,
    max_frame: usize,

    requested: ChannelParams,
    sent: ChannelParams,

    waiters: [u32; 3],
    in_flight: Option<OpenType>,
    server_pending: Option<OpenType>,
    opened_as: Option<OpenType>,
    open_count: u32,
    hangup: bool,
    open_error: Option<OpenType>,

    query_mask: u8,
    server_buffers: (u16, u16),
    derived: DerivedParams,
    tx_window: TxWindow,
    rx_window: RxWindow,
    commands: Vec<PortCommand>,

    modem_in: u8,
    events: u8,
    tx_total: u64,
    rx_total: u64,

    scanner: EscapeScanner,
    /// Newest round-trip ticket not yet on the wire.
    pub(crate) round_trip_wanted: Option<u64>,
    /// Receive data is discarded until this ticket completes.
    flush_ticket: Option<u64>,
}

impl Channel {
    /// Allocate buffers for channel `index`.
    ///
    /// # Errors
    ///
    /// `Alloc` or `InvalidConfig` from the ring buffers.
    pub fn new(index: u16, config: &EngineConfig) -> Result<Self> {
        Ok(Self {
            index,
            state: ChannelState::Idle,
            tx: RingBuffer::new(config.tx_buffer_size)?,
            rx: RingBuffer::new(config.rx_buffer_size)?,
            max_frame: config.max_frame_size,
            requested: ChannelParams::raised(),
            sent: ChannelParams::default(),
            waiters: [0; 3],
            in_flight: None,
            server_pending: None,
            opened_as: None,
            open_count: 0,
            hangup: false,
            open_error: None,
            query_mask: 0,
            server_buffers: (0, 0),
            derived: DerivedParams::default(),
            tx_window: TxWindow::default(),
            rx_window: RxWindow::new(config.rx_buffer_size),
            commands: Vec::new(),
            modem_in: 0,
            events: 0,
            tx_total: 0,
            rx_total: 0,
            scanner: EscapeScanner::new(EscapeStyle::Posix),
            round_trip_wanted: None,
            flush_ticket: None,
        })
    }

    pub fn index(&self) -> u16 {
        self.index
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn open_count(&self) -> u32 {
        self.open_count
    }

    pub fn is_hung_up(&self) -> bool {
        self.hangup
    }

    pub fn open_error(&self) -> Option<OpenType> {
        self.open_error
    }

    pub fn derived(&self) -> DerivedParams {
        self.derived
    }

    pub fn inputs(&self, next_seq: Option<u8>) -> ChannelInputs {
        ChannelInputs {
            index: self.index,
            state: self.state,
            waiters: self.waiters,
            in_flight: self.in_flight,
            server_pending: self.server_pending,
            opened_as: self.opened_as,
            open_count: self.open_count,
            hangup: self.hangup,
            tx_empty: self.tx.is_empty(),
            modem_out: self.requested.modem_out,
            next_seq,
        }
    }

    /// Carry out a transition. Returns frames to send.
    pub fn apply(&mut self, t: Transition, events: &mut Vec<EngineEvent>) -> Vec<Command> {
        let channel = self.index;
        let mut emit = t.emit;
        for effect in t.effects {
            match effect {
                Effect::InFlight(v) => self.in_flight = v,
                Effect::ServerPending(v) => self.server_pending = v,
                Effect::OpenedAs(v) => self.opened_as = Some(v),
                Effect::BeginQuery { .. } => self.begin_session(),
                Effect::Opened => {
                    let (rx, tx) = self.server_buffers;
                    self.derived = DerivedParams::compute(rx, tx, self.rx.capacity(), self.max_frame);
                    self.open_count += self.waiters.iter().sum::<u32>();
                    self.waiters = [0; 3];
                    self.open_error = None;
                    let rwin = self.rx_window.initial();
                    self.rx_window.mark_advertised(rwin);
                    emit.push(Command::RxWindow {
                        port: port_of(channel),
                        rwin,
                    });
                    events.push(EngineEvent::Opened { channel });
                }
                Effect::OpenFailed(otype) => {
                    self.waiters[otype.index()] = 0;
                    self.open_error = Some(otype);
                    events.push(EngineEvent::OpenFailed { channel, otype });
                }
                Effect::Hangup => {
                    self.hangup = self.open_count > 0;
                    self.drop_session();
                    self.waiters = [0; 3];
                    events.push(EngineEvent::Hangup { channel });
                }
                Effect::Closed => {
                    self.drop_session();
                    events.push(EngineEvent::Closed { channel });
                }
            }
        }
        if t.next != self.state {
            debug!(channel, from = self.state.name(), to = t.next.name(), "channel transition");
            self.state = t.next;
        }
        emit
    }

    /// Fresh per-open state, set when the open-time queries go out.
    fn begin_session(&mut self) {
        self.query_mask = query::ALL;
        self.server_buffers = (0, 0);
        self.tx_window = TxWindow::default();
        self.rx_window = RxWindow::new(self.rx.capacity());
        self.rx.clear();
        self.scanner.reset();
        self.commands.clear();
        self.events = 0;
        self.flush_ticket = None;
        self.requested.modem_out |= modem::DTR | modem::RTS;
        self.sent = ChannelParams {
            modem_out: self.requested.modem_out,
            ..ChannelParams::default()
        };
    }

    fn drop_session(&mut self) {
        self.opened_as = None;
        self.in_flight = None;
        self.query_mask = 0;
        self.tx.clear();
        self.commands.clear();
        self.round_trip_wanted = None;
        self.flush_ticket = None;
    }

    /// Clear one query bit. Reaching zero makes the channel Ready.
    pub fn clear_query_bit(&mut self, bit: u8, events: &mut Vec<EngineEvent>) -> Vec<Command> {
        if self.state != ChannelState::WaitQuery || self.query_mask & bit == 0 {
            return Vec::new();
        }
        self.query_mask &= !bit;
        if self.query_mask != 0 {
            return Vec::new();
        }
        self.apply(Transition::to(ChannelState::Ready).effect(Effect::Opened), events)
    }

    /// Handle a port reply other than a sequence reply.
    ///
    /// # Errors
    ///
    /// `UnexpectedReply` for query replies nobody asked for or events on a
    /// closed port.
    pub fn on_port_reply(
        &mut self,
        reply: PortReply,
        events: &mut Vec<EngineEvent>,
    ) -> Result<Vec<Command>> {
        let channel = self.index;
        let unexpected = |state: ChannelState| RealportError::UnexpectedReply {
            channel,
            reply: reply.name(),
            state: state.name(),
        };
        let bit = match reply {
            PortReply::Status { .. } => query::STATUS,
            PortReply::Buffers { .. } => query::BUFFERS,
            PortReply::Capability(_) => query::CAPABILITY,
            PortReply::Sequence(_) => query::SEQ,
            PortReply::Event { modem_in, events: bits } => {
                if !self.state.is_server_open() {
                    return Err(unexpected(self.state));
                }
                self.modem_in = modem_in;
                self.events |= bits;
                events.push(EngineEvent::Modem {
                    channel,
                    modem_in,
                    events: self.events,
                });
                return Ok(Vec::new());
            }
        };
        if self.state != ChannelState::WaitQuery || self.query_mask & bit == 0 {
            return Err(unexpected(self.state));
        }
        match reply {
            PortReply::Status { modem_in, .. } => self.modem_in = modem_in,
            PortReply::Buffers { rx, tx } => {
                self.server_buffers = (rx, tx);
                self.tx_window = TxWindow::new(rx.min(u16::MAX / 2));
            }
            PortReply::Capability(flags) => {
                let style = if flags & capability::DOS_ESCAPES != 0 {
                    EscapeStyle::Dos
                } else {
                    EscapeStyle::Posix
                };
                self.scanner = EscapeScanner::new(style);
            }
            _ => {}
        }
        Ok(self.clear_query_bit(bit, events))
    }

    /// Apply a transmit window report.
    ///
    /// # Errors
    ///
    /// Window reports are only valid while the server holds the port open.
    pub fn on_tx_window(
        &mut self,
        rpos: u16,
        window: u16,
        events: &mut Vec<EngineEvent>,
    ) -> Result<()> {
        if !self.state.is_server_open() {
            return Err(RealportError::UnexpectedReply {
                channel: self.index,
                reply: "window",
                state: self.state.name(),
            });
        }
        let was_drained = self.is_drained();
        self.tx_window.update(self.index, rpos, window)?;
        if !was_drained && self.is_drained() {
            events.push(EngineEvent::Drained { channel: self.index });
        }
        Ok(())
    }

    /// Accept an inbound data frame into the receive ring.
    ///
    /// # Errors
    ///
    /// `WindowOverrun` past the advertised window, `UnexpectedReply` if the
    /// port is not open.
    pub fn on_data(&mut self, data: &[u8], events: &mut Vec<EngineEvent>) -> Result<()> {
        if !matches!(
            self.state,
            ChannelState::Ready | ChannelState::SendClose | ChannelState::WaitClose
        ) {
            return Err(RealportError::UnexpectedReply {
                channel: self.index,
                reply: "data",
                state: self.state.name(),
            });
        }
        self.rx_window.accept(self.index, data.len())?;
        self.rx_total += data.len() as u64;
        if self.flush_ticket.is_some() {
            self.rx_window.consume(data.len());
            return Ok(());
        }
        let n = self.rx.push(data);
        debug_assert_eq!(n, data.len());
        events.push(EngineEvent::RxReady { channel: self.index });
        Ok(())
    }

    /// Round trip `ticket` completed.
    pub fn on_round_trip(&mut self, ticket: u64) {
        if self.flush_ticket.is_some_and(|t| t <= ticket) {
            self.flush_ticket = None;
        }
    }

    /// Control frames a Ready channel owes the PortServer.
    pub fn ready_commands(&mut self, events: &mut Vec<EngineEvent>) -> Vec<Command> {
        if self.state != ChannelState::Ready {
            return Vec::new();
        }
        let port = port_of(self.index);
        let mut out = Vec::new();

        let diff = self.requested.diff(&self.sent);
        if !diff.is_empty() {
            out.extend(
                diff.into_iter()
                    .map(|(param, value)| Command::Param { port, param, value }),
            );
            self.sent = self.requested;
            events.push(EngineEvent::ParamsSynced { channel: self.index });
        }

        out.extend(self.commands.drain(..).map(|cmd| Command::Port { port, cmd }));

        if let Some(rwin) = self.rx_window.pending_update() {
            self.rx_window.mark_advertised(rwin);
            out.push(Command::RxWindow { port, rwin });
        }
        out
    }

    /// Bytes this channel could send now.
    pub fn data_demand(&self) -> usize {
        if self.state != ChannelState::Ready {
            return 0;
        }
        self.tx.available_for_read().min(self.tx_window.credit())
    }

    pub fn tx_chunk(&self) -> usize {
        self.derived.tx_chunk.max(1)
    }

    /// Copy up to `n` transmit bytes without consuming them.
    pub fn peek_tx(&self, n: usize) -> Bytes {
        let mut buf = vec![0u8; n.min(self.tx.available_for_read())];
        let got = self.tx.peek(&mut buf);
        buf.truncate(got);
        Bytes::from(buf)
    }

    /// Consume `n` bytes that went on the wire.
    pub fn commit_tx(&mut self, n: usize) {
        let n = self.tx.consume(n);
        self.tx_window.record_sent(n);
        self.tx_total += n as u64;
    }

    /// Transmit buffer empty and nothing unacknowledged.
    pub fn is_drained(&self) -> bool {
        self.tx.is_empty() && self.tx_window.in_flight() == 0
    }

    pub fn params_synced(&self) -> bool {
        self.requested == self.sent
    }

    // tty-facing operations

    pub fn add_waiter(&mut self, otype: OpenType) {
        self.waiters[otype.index()] += 1;
    }

    pub fn remove_waiter(&mut self, otype: OpenType) {
        let slot = &mut self.waiters[otype.index()];
        *slot = slot.saturating_sub(1);
    }

    /// Count another local open on a port that is already Ready.
    pub fn add_open(&mut self) {
        self.open_count += 1;
    }

    /// Drop one local open.
    ///
    /// # Errors
    ///
    /// `NotOpen` if no local open is outstanding.
    pub fn close(&mut self) -> Result<()> {
        if self.open_count == 0 {
            return Err(RealportError::NotOpen(self.index));
        }
        self.open_count -= 1;
        if self.open_count == 0 {
            self.hangup = false;
        }
        Ok(())
    }

    fn check_open(&self) -> Result<()> {
        if self.hangup {
            return Err(RealportError::Hangup(self.index));
        }
        if self.open_count == 0 {
            return Err(RealportError::NotOpen(self.index));
        }
        Ok(())
    }

    fn check_claimed(&self) -> Result<()> {
        if self.hangup {
            return Err(RealportError::Hangup(self.index));
        }
        if self.open_count == 0 && self.waiters.iter().all(|&w| w == 0) {
            return Err(RealportError::NotOpen(self.index));
        }
        Ok(())
    }

    /// Queue bytes for transmission. Returns bytes accepted.
    pub fn write_tx(&mut self, data: &[u8]) -> Result<usize> {
        self.check_open()?;
        Ok(self.tx.push(data))
    }

    pub fn tx_space(&self) -> usize {
        self.tx.available_for_write()
    }

    pub fn rx_pending(&self) -> usize {
        self.rx.available_for_read()
    }

    /// Copy out received bytes as they arrived, escapes included.
    pub fn read_rx_raw(&mut self, out: &mut [u8]) -> usize {
        let n = self.rx.pop(out);
        self.rx_window.consume(n);
        n
    }

    /// Read up to `max` raw bytes and decode escapes.
    pub fn read_rx_cooked(&mut self, max: usize) -> Scanned {
        let mut raw = vec![0u8; max.min(self.rx.available_for_read())];
        let n = self.read_rx_raw(&mut raw);
        self.scanner.scan(&raw[..n])
    }

    /// # Errors
    ///
    /// `NotOpen` unless an open is held or waiting, so a sync can follow.
    pub fn set_params(&mut self, params: ChannelParams) -> Result<()> {
        self.check_claimed()?;
        self.requested = params;
        Ok(())
    }

    pub fn set_modem_out(&mut self, bits: u8) -> Result<()> {
        self.check_claimed()?;
        self.requested.modem_out = bits;
        Ok(())
    }

    pub fn requested_params(&self) -> ChannelParams {
        self.requested
    }

    /// Queue a line command. `flush_ticket` is the round trip that ends
    /// input discard for `FlushInput`.
    ///
    /// # Errors
    ///
    /// `NotOpen` unless the port is Ready.
    pub fn command(
        &mut self,
        cmd: ChannelCommand,
        flush_ticket: Option<u64>,
        events: &mut Vec<EngineEvent>,
    ) -> Result<()> {
        self.check_open()?;
        if self.state != ChannelState::Ready {
            return Err(RealportError::NotOpen(self.index));
        }
        match cmd {
            ChannelCommand::FlushInput => {
                let n = self.rx.clear();
                self.rx_window.consume(n);
                self.scanner.reset();
                self.flush_ticket = flush_ticket;
            }
            ChannelCommand::FlushOutput => {
                let was_drained = self.is_drained();
                self.tx.clear();
                if !was_drained && self.is_drained() {
                    events.push(EngineEvent::Drained { channel: self.index });
                }
            }
            _ => {}
        }
        self.commands.push(cmd.wire());
        Ok(())
    }

    /// Tear down for a shrinking channel table or a failed Connection.
    pub fn force_idle(&mut self) {
        self.drop_session();
        self.state = ChannelState::Idle;
        self.waiters = [0; 3];
        self.server_pending = None;
        self.open_count = 0;
        self.hangup = false;
    }

    pub fn snapshot(&self) -> ChannelSnapshot {
        ChannelSnapshot {
            channel: self.index,
            state: self.state,
            open_count: self.open_count,
            waiters: self.waiters,
            hangup: self.hangup,
            modem_in: self.modem_in,
            modem_out: self.sent.modem_out,
            events: self.events,
            tx_pending: self.tx.available_for_read(),
            rx_pending: self.rx.available_for_read(),
            tx_credit: self.tx_window.credit(),
            tx_in_flight: self.tx_window.in_flight(),
            rx_window: self.rx_window.available(),
            tx_total: self.tx_total,
            rx_total: self.rx_total,
            requested: self.requested,
            sent: self.sent,
            derived: self.derived,
            escape_style: self.scanner.style(),
        }
    }
}

/// Point-in-time view of a channel for monitoring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelSnapshot {
    pub channel: u16,
    pub state: ChannelState,
    pub open_count: u32,
    pub waiters: [u32; 3],
    pub hangup: bool,
    pub modem_in: u8,
    pub modem_out: u8,
    pub events: u8,
    pub tx_pending: usize,
    pub rx_pending: usize,
    pub tx_credit: usize,
    pub tx_in_flight: u16,
    pub rx_window: u16,
    pub tx_total: u64,
    pub rx_total: u64,
    pub requested: ChannelParams,
    pub sent: ChannelParams,
    pub derived: DerivedParams,
    pub escape_style: EscapeStyle,
}
