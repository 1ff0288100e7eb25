//! Async driver and tty-facing port handles.
//!
//! A [`Session`] owns one [`Connection`] behind a `parking_lot::Mutex`. The
//! transport hands it an already-connected byte stream through
//! [`Session::run`], which runs two loops until the stream ends:
//! 1. Read loop: bytes from the PortServer go through `decode`
//! 2. Write loop: every pacer tick, or whenever a handle queued work,
//!    `encode` output is written to the stream
//!
//! [`PortHandle`]s give async access to one channel. Operations that wait
//! on the PortServer register a oneshot completed by the matching engine
//! event; buffer readiness uses `Notify`.
//!
//! ```text
//! PortHandle ─┐                              ┌─► write loop ─► stream
//! PortHandle ─┼─► Mutex<Connection+waiters> ◄┤
//! PortHandle ─┘                              └── read loop ◄── stream
//! ```
//!
//! # Example
//!
//! ```ignore
//! use realport::session::Session;
//! use realport::OpenType;
//!
//! #[tokio::main]
//! async fn main() -> realport::Result<()> {
//!     let stream = tokio::net::TcpStream::connect("portserver:771").await?;
//!     let (reader, writer) = stream.into_split();
//!
//!     let session = Session::builder().tick_ms(20).build()?;
//!     let driver = session.clone();
//!     tokio::spawn(async move { driver.run(reader, writer).await });
//!
//!     session.wait_ready().await?;
//!     let port = session.port(0);
//!     port.open(OpenType::Immediate).await?;
//!     port.write_all(b"ATZ\r").await?;
//!     port.close().await
//! }
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::pin::pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{oneshot, Notify};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, warn};

use crate::config::EngineConfig;
use crate::engine::{
    ChannelCommand, ChannelParams, ChannelSnapshot, Connection, ConnectionState, EngineEvent,
    OpenStatus, OpenToken,
};
use crate::error::{RealportError, Result};
use crate::monitor::Monitor;
use crate::protocol::{modem, OpenType, Scanned};

/// Read buffer size for the transport.
const READ_BUFFER_SIZE: usize = 64 * 1024;

type Waiter<T = ()> = oneshot::Sender<Result<T>>;

/// Clock shared with tokio so paused test time drives the engine too.
fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

/// Builder for configuring and creating a [`Session`].
#[derive(Debug, Clone, Default)]
pub struct SessionBuilder {
    config: EngineConfig,
    monitor_limit: Option<usize>,
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole engine configuration.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Load the engine configuration from a JSON file.
    pub fn config_file(mut self, path: impl AsRef<Path>) -> Result<Self> {
        self.config = EngineConfig::from_json_file(path)?;
        Ok(self)
    }

    /// Pacer tick. Default: 20 ms
    pub fn tick_ms(mut self, millis: u64) -> Self {
        self.config.tick_ms = millis;
        self
    }

    /// Uncongested and fully congested rates in bytes per second.
    pub fn rates(mut self, fast: u32, slow: u32) -> Self {
        self.config.fast_rate = fast;
        self.config.slow_rate = slow;
        self
    }

    /// Per-channel buffer sizes, powers of two.
    pub fn buffer_sizes(mut self, tx: usize, rx: usize) -> Self {
        self.config.tx_buffer_size = tx;
        self.config.rx_buffer_size = rx;
        self
    }

    /// Keep a diagnostics monitor of up to `limit` bytes.
    pub fn monitor(mut self, limit: usize) -> Self {
        self.monitor_limit = Some(limit);
        self
    }

    /// Validate the configuration and create the session.
    pub fn build(self) -> Result<Session> {
        let mut conn = Connection::new(self.config.clone())?;
        if let Some(limit) = self.monitor_limit {
            conn.attach_monitor(Monitor::new(now(), limit));
        }
        Ok(Session {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    conn,
                    waiters: Waiters::default(),
                    failed: false,
                }),
                wake_writer: Notify::new(),
                config: self.config,
            }),
        })
    }
}

/// Readiness signals for one channel.
#[derive(Debug, Default)]
struct PortSignals {
    readable: Notify,
    writable: Notify,
    carrier_lost: AtomicBool,
}

#[derive(Default)]
struct Waiters {
    ready: Vec<Waiter<u16>>,
    opens: HashMap<u16, Vec<(OpenToken, Waiter)>>,
    params: HashMap<u16, Vec<Waiter>>,
    drains: HashMap<u16, Vec<Waiter>>,
    round_trips: HashMap<u16, Vec<(u64, Waiter)>>,
    signals: HashMap<u16, Arc<PortSignals>>,
    modem_in: HashMap<u16, u8>,
}

impl Waiters {
    fn signals(&mut self, channel: u16) -> Arc<PortSignals> {
        self.signals.entry(channel).or_default().clone()
    }

    fn wake_port(&self, channel: u16) {
        if let Some(signals) = self.signals.get(&channel) {
            signals.readable.notify_waiters();
            signals.writable.notify_waiters();
        }
    }

    /// Params can no longer reach the PortServer: nothing holds the port.
    fn fail_params(&mut self, channel: u16) {
        for tx in self.params.remove(&channel).unwrap_or_default() {
            let _ = tx.send(Err(RealportError::NotOpen(channel)));
        }
    }

    /// Fail every waiter on `channel`.
    fn fail_channel(&mut self, channel: u16, err: impl Fn() -> RealportError) {
        for (_, tx) in self.opens.remove(&channel).unwrap_or_default() {
            let _ = tx.send(Err(err()));
        }
        for tx in self.params.remove(&channel).unwrap_or_default() {
            let _ = tx.send(Err(err()));
        }
        for tx in self.drains.remove(&channel).unwrap_or_default() {
            let _ = tx.send(Err(err()));
        }
        for (_, tx) in self.round_trips.remove(&channel).unwrap_or_default() {
            let _ = tx.send(Err(err()));
        }
        self.wake_port(channel);
    }
}

struct Inner {
    conn: Connection,
    waiters: Waiters,
    failed: bool,
}

impl Inner {
    /// Complete waiters for every event the engine raised.
    fn dispatch(&mut self) {
        let w = &mut self.waiters;
        for event in self.conn.drain_events() {
            match event {
                EngineEvent::Opened { channel } => {
                    for (_, tx) in w.opens.remove(&channel).unwrap_or_default() {
                        let _ = tx.send(Ok(()));
                    }
                }
                EngineEvent::OpenFailed { channel, otype } => {
                    let opens = w.opens.remove(&channel).unwrap_or_default();
                    let (failed, kept): (Vec<_>, Vec<_>) =
                        opens.into_iter().partition(|(token, _)| token.otype == otype);
                    for (_, tx) in failed {
                        let _ = tx.send(Err(RealportError::OpenFailed(otype, channel)));
                    }
                    if kept.is_empty() {
                        w.fail_params(channel);
                    } else {
                        w.opens.insert(channel, kept);
                    }
                }
                EngineEvent::Hangup { channel } => {
                    w.fail_channel(channel, || RealportError::Hangup(channel));
                }
                EngineEvent::Closed { channel } => {
                    w.fail_params(channel);
                    w.wake_port(channel);
                }
                EngineEvent::ParamsSynced { channel } => {
                    for tx in w.params.remove(&channel).unwrap_or_default() {
                        let _ = tx.send(Ok(()));
                    }
                }
                EngineEvent::RoundTrip { channel, ticket } => {
                    if let Some(list) = w.round_trips.get_mut(&channel) {
                        let (done, kept): (Vec<_>, Vec<_>) =
                            list.drain(..).partition(|(t, _)| *t <= ticket);
                        *list = kept;
                        for (_, tx) in done {
                            let _ = tx.send(Ok(()));
                        }
                    }
                }
                EngineEvent::RxReady { channel } => {
                    if let Some(signals) = w.signals.get(&channel) {
                        signals.readable.notify_waiters();
                    }
                }
                EngineEvent::TxSpace { channel } => {
                    if let Some(signals) = w.signals.get(&channel) {
                        signals.writable.notify_waiters();
                    }
                }
                EngineEvent::Drained { channel } => {
                    for tx in w.drains.remove(&channel).unwrap_or_default() {
                        let _ = tx.send(Ok(()));
                    }
                }
                EngineEvent::Modem {
                    channel, modem_in, ..
                } => {
                    let before = w.modem_in.insert(channel, modem_in).unwrap_or(0);
                    if before & modem::DCD != 0 && modem_in & modem::DCD == 0 {
                        debug!(channel, "carrier lost");
                        let signals = w.signals(channel);
                        signals.carrier_lost.store(true, Ordering::Release);
                        signals.readable.notify_waiters();
                    }
                }
                EngineEvent::ChannelCount(count) => {
                    for tx in w.ready.drain(..) {
                        let _ = tx.send(Ok(count));
                    }
                }
                EngineEvent::ChannelRemoved { channel } => {
                    w.fail_channel(channel, || RealportError::ConnectionClosed);
                }
                EngineEvent::Failed(reason) => {
                    warn!(%reason, "session failed");
                    self.failed = true;
                    for tx in w.ready.drain(..) {
                        let _ = tx.send(Err(RealportError::ConnectionClosed));
                    }
                    let channels: Vec<u16> = w
                        .opens
                        .keys()
                        .chain(w.params.keys())
                        .chain(w.drains.keys())
                        .chain(w.round_trips.keys())
                        .chain(w.signals.keys())
                        .copied()
                        .collect();
                    for channel in channels {
                        w.fail_channel(channel, || RealportError::ConnectionClosed);
                    }
                }
            }
        }
    }
}

struct Shared {
    inner: Mutex<Inner>,
    /// Wakes the write loop when handles queued work.
    wake_writer: Notify,
    config: EngineConfig,
}

/// A RealPort session over one PortServer stream.
///
/// Cheap to clone; clones share the same Connection.
#[derive(Clone)]
pub struct Session {
    shared: Arc<Shared>,
}

impl Session {
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    /// Session with the given configuration and no monitor.
    pub fn new(config: EngineConfig) -> Result<Self> {
        SessionBuilder::new().config(config).build()
    }

    /// Handle for one channel. The channel need not exist yet.
    pub fn port(&self, channel: u16) -> PortHandle {
        PortHandle {
            shared: self.shared.clone(),
            channel,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.inner.lock().conn.state()
    }

    pub fn channel_count(&self) -> u16 {
        self.shared.inner.lock().conn.channel_count()
    }

    /// Take everything the monitor recorded so far.
    pub fn take_monitor(&self) -> Option<Bytes> {
        self.shared
            .inner
            .lock()
            .conn
            .monitor_mut()
            .map(Monitor::take)
    }

    /// Wait for the capability reply. Returns the channel count.
    pub async fn wait_ready(&self) -> Result<u16> {
        let rx = {
            let mut inner = self.shared.inner.lock();
            match inner.conn.state() {
                ConnectionState::Ready => return Ok(inner.conn.channel_count()),
                ConnectionState::Error => return Err(RealportError::ConnectionClosed),
                _ => {}
            }
            let (tx, rx) = oneshot::channel();
            inner.waiters.ready.push(tx);
            rx
        };
        rx.await.unwrap_or(Err(RealportError::ConnectionClosed))
    }

    /// Drive the Connection over an already-connected stream.
    ///
    /// Returns when the stream closes or the Connection fails. Every
    /// pending waiter is then failed with `ConnectionClosed`.
    pub async fn run<R, W>(&self, mut reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let result = tokio::select! {
            r = self.read_loop(&mut reader) => r,
            r = self.write_loop(&mut writer) => r,
        };

        // A failure queues a diagnostic for the PortServer.
        let tail = {
            let mut inner = self.shared.inner.lock();
            inner
                .conn
                .encode(self.shared.config.transport_buffer_size, now())
        };
        if !tail.is_empty() {
            let _ = writer.write_all(&tail).await;
            let _ = writer.flush().await;
        }

        {
            let mut inner = self.shared.inner.lock();
            inner.conn.abort("session ended");
            inner.dispatch();
        }
        result
    }

    async fn read_loop<R: AsyncRead + Unpin>(&self, reader: &mut R) -> Result<()> {
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) => return Ok(()), // PortServer closed the stream
                Ok(n) => n,
                Err(e) => return Err(RealportError::Io(e)),
            };

            let result = {
                let mut inner = self.shared.inner.lock();
                let result = inner.conn.decode(&buf[..n], now());
                inner.dispatch();
                result
            };
            self.shared.wake_writer.notify_one();

            match result {
                Ok(()) => {}
                Err(e) if e.is_fatal() || matches!(e, RealportError::ConnectionClosed) => {
                    error!("Read loop error: {}", e);
                    return Err(e);
                }
                Err(e) => warn!(error = %e, "decode error"),
            }
        }
    }

    async fn write_loop<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> Result<()> {
        let limit = self.shared.config.transport_buffer_size;
        let mut ticker = tokio::time::interval(self.shared.config.tick());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let mut inner = self.shared.inner.lock();
                    let result = inner.conn.tick(now());
                    inner.dispatch();
                    result?;
                }
                _ = self.shared.wake_writer.notified() => {}
            }

            let (bytes, failed) = {
                let mut inner = self.shared.inner.lock();
                let bytes = inner.conn.encode(limit, now());
                inner.dispatch();
                (bytes, inner.failed)
            };
            if !bytes.is_empty() {
                writer.write_all(&bytes).await?;
                writer.flush().await?;
                if bytes.len() >= limit {
                    self.shared.wake_writer.notify_one();
                }
            }
            if failed {
                return Err(RealportError::ConnectionClosed);
            }
        }
    }
}

/// Async access to one channel.
#[derive(Clone)]
pub struct PortHandle {
    shared: Arc<Shared>,
    channel: u16,
}

/// Withdraws a pending open if the open future is dropped.
struct OpenGuard<'a> {
    shared: &'a Shared,
    token: OpenToken,
}

impl Drop for OpenGuard<'_> {
    fn drop(&mut self) {
        let mut inner = self.shared.inner.lock();
        let Some(list) = inner.waiters.opens.get_mut(&self.token.channel) else {
            return;
        };
        let before = list.len();
        list.retain(|(token, _)| *token != self.token);
        if list.len() == before {
            return; // already completed
        }
        debug!(channel = self.token.channel, "open cancelled");
        if let Err(e) = inner.conn.cancel_open(self.token) {
            debug!(error = %e, "cancel after connection loss");
        }
        drop(inner);
        self.shared.wake_writer.notify_one();
    }
}

impl PortHandle {
    pub fn channel(&self) -> u16 {
        self.channel
    }

    fn with_conn<T>(&self, f: impl FnOnce(&mut Connection, u16) -> Result<T>) -> Result<T> {
        let result = {
            let mut inner = self.shared.inner.lock();
            let result = f(&mut inner.conn, self.channel);
            inner.dispatch();
            result
        };
        self.shared.wake_writer.notify_one();
        result
    }

    fn signals(&self) -> Arc<PortSignals> {
        self.shared.inner.lock().waiters.signals(self.channel)
    }

    /// Open the port. Completes when the PortServer accepted and the
    /// open-time queries were answered. Dropping the future cancels.
    pub async fn open(&self, otype: OpenType) -> Result<()> {
        let (token, rx) = {
            let mut inner = self.shared.inner.lock();
            match inner.conn.request_open(self.channel, otype)? {
                OpenStatus::Opened => return Ok(()),
                OpenStatus::Pending(token) => {
                    let (tx, rx) = oneshot::channel();
                    inner
                        .waiters
                        .opens
                        .entry(self.channel)
                        .or_default()
                        .push((token, tx));
                    (token, rx)
                }
            }
        };
        self.shared.wake_writer.notify_one();

        let _guard = OpenGuard {
            shared: &self.shared,
            token,
        };
        rx.await.unwrap_or(Err(RealportError::OpenCancelled(self.channel)))
    }

    /// Wait for transmit data to drain, then drop this local open.
    pub async fn close(&self) -> Result<()> {
        if let Err(e) = self.drain().await {
            debug!(channel = self.channel, error = %e, "close without drain");
        }
        self.with_conn(|conn, ch| conn.close(ch))
    }

    /// Queue as much of `data` as fits, waiting for space if none does.
    pub async fn write(&self, data: &[u8]) -> Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        let signals = self.signals();
        loop {
            let mut notified = pin!(signals.writable.notified());
            notified.as_mut().enable();

            let n = self.with_conn(|conn, ch| conn.write_tx(ch, data))?;
            if n > 0 {
                return Ok(n);
            }
            notified.await;
        }
    }

    pub async fn write_all(&self, mut data: &[u8]) -> Result<()> {
        while !data.is_empty() {
            let n = self.write(data).await?;
            data = &data[n..];
        }
        Ok(())
    }

    /// Wait for receive data and copy it out unchanged.
    ///
    /// Returns `Ok(0)` once after carrier loss.
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let signals = self.signals();
        loop {
            let mut notified = pin!(signals.readable.notified());
            notified.as_mut().enable();

            {
                let mut inner = self.shared.inner.lock();
                let n = inner.conn.read_rx_raw(self.channel, buf)?;
                inner.dispatch();
                if n > 0 {
                    drop(inner);
                    self.shared.wake_writer.notify_one();
                    return Ok(n);
                }
                if inner.conn.snapshot(self.channel)?.hangup {
                    return Err(RealportError::Hangup(self.channel));
                }
            }
            if signals.carrier_lost.swap(false, Ordering::AcqRel) {
                return Ok(0);
            }
            notified.await;
        }
    }

    /// Wait for receive data and decode line-status escapes.
    pub async fn read_cooked(&self, max: usize) -> Result<Scanned> {
        let signals = self.signals();
        loop {
            let mut notified = pin!(signals.readable.notified());
            notified.as_mut().enable();

            {
                let mut inner = self.shared.inner.lock();
                if inner.conn.rx_pending(self.channel)? > 0 {
                    let scanned = inner.conn.read_rx_cooked(self.channel, max)?;
                    inner.dispatch();
                    drop(inner);
                    self.shared.wake_writer.notify_one();
                    // A lone escape prefix decodes to nothing yet.
                    if !scanned.is_empty() {
                        return Ok(scanned);
                    }
                    continue;
                }
                if inner.conn.snapshot(self.channel)?.hangup {
                    return Err(RealportError::Hangup(self.channel));
                }
            }
            if signals.carrier_lost.swap(false, Ordering::AcqRel) {
                return Ok(Scanned::default());
            }
            notified.await;
        }
    }

    /// Change line parameters and wait until the PortServer has them.
    pub async fn set_params(&self, params: ChannelParams) -> Result<()> {
        self.sync_params(|conn, ch| conn.set_params(ch, params))
            .await
    }

    /// Change DTR/RTS and wait until the PortServer has them.
    pub async fn set_modem_out(&self, bits: u8) -> Result<()> {
        self.sync_params(|conn, ch| conn.set_modem_out(ch, bits))
            .await
    }

    async fn sync_params(
        &self,
        update: impl FnOnce(&mut Connection, u16) -> Result<()>,
    ) -> Result<()> {
        let rx = {
            let mut inner = self.shared.inner.lock();
            update(&mut inner.conn, self.channel)?;
            if inner.conn.params_synced(self.channel)? {
                return Ok(());
            }
            let (tx, rx) = oneshot::channel();
            inner.waiters.params.entry(self.channel).or_default().push(tx);
            rx
        };
        self.shared.wake_writer.notify_one();
        rx.await.unwrap_or(Err(RealportError::ConnectionClosed))
    }

    /// Wait until everything written has been taken by the PortServer.
    pub async fn drain(&self) -> Result<()> {
        let rx = {
            let mut inner = self.shared.inner.lock();
            if inner.conn.is_drained(self.channel)? {
                return Ok(());
            }
            let (tx, rx) = oneshot::channel();
            inner.waiters.drains.entry(self.channel).or_default().push(tx);
            rx
        };
        self.shared.wake_writer.notify_one();
        rx.await.unwrap_or(Err(RealportError::ConnectionClosed))
    }

    /// Issue a line command. `FlushInput` waits until input sent before the
    /// flush can no longer arrive.
    pub async fn command(&self, cmd: ChannelCommand) -> Result<()> {
        let ticket = self.with_conn(|conn, ch| conn.command(ch, cmd))?;
        match ticket {
            Some(ticket) => self.wait_round_trip(ticket).await,
            None => Ok(()),
        }
    }

    /// Wait until everything queued so far has reached the PortServer.
    pub async fn round_trip(&self) -> Result<()> {
        let ticket = self.with_conn(|conn, ch| conn.request_round_trip(ch))?;
        self.wait_round_trip(ticket).await
    }

    async fn wait_round_trip(&self, ticket: u64) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.shared
            .inner
            .lock()
            .waiters
            .round_trips
            .entry(self.channel)
            .or_default()
            .push((ticket, tx));
        self.shared.wake_writer.notify_one();
        rx.await.unwrap_or(Err(RealportError::ConnectionClosed))
    }

    pub fn snapshot(&self) -> Result<ChannelSnapshot> {
        self.shared.inner.lock().conn.snapshot(self.channel)
    }
}
