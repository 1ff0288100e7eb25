//! Integration tests for the RealPort engine.
//!
//! A small in-test PortServer parses what the Connection encodes and answers
//! with reply frames, so whole open/transfer/close exchanges run without I/O.

use std::time::{Duration, Instant};

use proptest::prelude::*;
use realport::engine::{
    ChannelCommand, ChannelState, Connection, ConnectionState, EngineEvent, OpenStatus, OpenType,
};
use realport::protocol::{
    channel_index, encode_frames, modem, module_of, port_of, Command, FrameBuffer, OpenReply,
    OpenRequest, ParamId, PortCommand, PortReply, Reply,
};
use realport::{EngineConfig, RealportError};

const SERVER_WINDOW: u16 = 4096;

/// Host frames as the PortServer sees them, tagged with their channel.
struct MockServer {
    frames: FrameBuffer<Command>,
    module: u8,
}

impl MockServer {
    fn new() -> Self {
        Self {
            frames: FrameBuffer::new(4096),
            module: 0,
        }
    }

    fn receive(&mut self, bytes: &[u8]) -> Vec<(u16, Command)> {
        let mut out = Vec::new();
        for cmd in self.frames.push(bytes).unwrap() {
            match cmd {
                Command::ModuleSelect(m) => self.module = m,
                cmd => {
                    let channel = cmd
                        .port()
                        .map_or(u16::MAX, |p| channel_index(self.module, p));
                    out.push((channel, cmd));
                }
            }
        }
        out
    }
}

fn data_bytes(sent: &[(u16, Command)], channel: u16) -> usize {
    sent.iter()
        .filter(|(c, _)| *c == channel)
        .map(|(_, cmd)| match cmd {
            Command::Data { data, .. } => data.len(),
            _ => 0,
        })
        .sum()
}

fn seq_requests(sent: &[(u16, Command)]) -> Vec<(u16, u8)> {
    sent.iter()
        .filter_map(|(c, cmd)| match cmd {
            Command::Port {
                cmd: PortCommand::SeqRequest(seq),
                ..
            } => Some((*c, *seq)),
            _ => None,
        })
        .collect()
}

/// Acknowledge every sequence request in `sent`.
fn answer_syncs(conn: &mut Connection, sent: &[(u16, Command)], now: Instant) {
    for (channel, seq) in seq_requests(sent) {
        let reply = port_reply(channel, PortReply::Sequence(seq));
        conn.decode(&reply_to(channel, &[reply]), now).unwrap();
    }
}

/// Reply frames for `channel`, preceded by its module select.
fn reply_to(channel: u16, replies: &[Reply]) -> Vec<u8> {
    let mut frames = vec![Reply::ModuleSelect(module_of(channel))];
    frames.extend_from_slice(replies);
    encode_frames(&frames).to_vec()
}

fn port_reply(channel: u16, reply: PortReply) -> Reply {
    Reply::Port {
        port: port_of(channel),
        reply,
    }
}

fn open_reply(channel: u16, reply: OpenReply) -> Reply {
    Reply::Open {
        port: port_of(channel),
        reply,
    }
}

fn ready_connection(config: EngineConfig, count: u16) -> (Connection, MockServer, Instant) {
    let mut conn = Connection::new(config).unwrap();
    let mut server = MockServer::new();
    let now = Instant::now();
    let sent = server.receive(&conn.encode(4096, now));
    assert_eq!(sent, vec![(u16::MAX, Command::CapabilityQuery)]);
    conn.decode(&encode_frames(&[Reply::ChannelCount(count)]), now)
        .unwrap();
    conn.drain_events();
    (conn, server, now)
}

/// Answer the open-time queries after an accept.
fn answer_queries(conn: &mut Connection, server: &mut MockServer, channel: u16, now: Instant) {
    answer_queries_with_window(conn, server, channel, SERVER_WINDOW, now);
}

fn answer_queries_with_window(
    conn: &mut Connection,
    server: &mut MockServer,
    channel: u16,
    window: u16,
    now: Instant,
) {
    let sent = server.receive(&conn.encode(4096, now));
    let (_, seq) = seq_requests(&sent)
        .into_iter()
        .find(|(c, _)| *c == channel)
        .expect("sequence request");
    let replies = [
        port_reply(channel, PortReply::Sequence(seq)),
        port_reply(
            channel,
            PortReply::Status {
                modem_in: modem::DCD | modem::CTS,
                modem_out: modem::DTR | modem::RTS,
            },
        ),
        port_reply(
            channel,
            PortReply::Buffers {
                rx: window,
                tx: 1024,
            },
        ),
        port_reply(channel, PortReply::Capability(0)),
    ];
    conn.decode(&reply_to(channel, &replies), now).unwrap();
}

fn open_immediate(conn: &mut Connection, server: &mut MockServer, channel: u16, now: Instant) {
    open_with_window(conn, server, channel, SERVER_WINDOW, now);
}

fn open_with_window(
    conn: &mut Connection,
    server: &mut MockServer,
    channel: u16,
    window: u16,
    now: Instant,
) {
    let status = conn.request_open(channel, OpenType::Immediate).unwrap();
    assert!(matches!(status, OpenStatus::Pending(_)));

    let sent = server.receive(&conn.encode(4096, now));
    assert!(sent.contains(&(
        channel,
        Command::Open {
            port: port_of(channel),
            request: OpenRequest::Open(OpenType::Immediate),
        }
    )));
    conn.decode(
        &reply_to(channel, &[open_reply(channel, OpenReply::Accept(OpenType::Immediate))]),
        now,
    )
    .unwrap();
    answer_queries_with_window(conn, server, channel, window, now);

    // Initial window and parameters.
    server.receive(&conn.encode(4096, now));
}

/// Test an immediate open reaching Ready after one accept and four replies.
#[test]
fn test_immediate_open_reaches_ready() {
    let (mut conn, mut server, now) = ready_connection(EngineConfig::default(), 4);
    open_immediate(&mut conn, &mut server, 2, now);

    let events = conn.drain_events();
    assert!(events.contains(&EngineEvent::Opened { channel: 2 }));

    let snap = conn.snapshot(2).unwrap();
    assert_eq!(snap.state, ChannelState::Ready);
    assert_eq!(snap.open_count, 1);
    assert_eq!(snap.waiters, [0, 0, 0]);
    assert_eq!(snap.tx_credit, SERVER_WINDOW as usize);
    assert_eq!(snap.modem_in & modem::DCD, modem::DCD);
    assert_eq!(conn.syncs_in_flight(), 0);
}

/// Test that the first frames after Ready advertise the window and send params.
#[test]
fn test_ready_sends_window_and_params() {
    let (mut conn, mut server, now) = ready_connection(EngineConfig::default(), 1);
    conn.request_open(0, OpenType::Immediate).unwrap();
    server.receive(&conn.encode(4096, now));
    conn.decode(
        &reply_to(0, &[open_reply(0, OpenReply::Accept(OpenType::Immediate))]),
        now,
    )
    .unwrap();
    answer_queries(&mut conn, &mut server, 0, now);

    let sent: Vec<Command> = server
        .receive(&conn.encode(4096, now))
        .into_iter()
        .map(|(_, cmd)| cmd)
        .collect();
    assert_eq!(
        sent,
        vec![
            Command::RxWindow { port: 0, rwin: 8192 },
            Command::Param { port: 0, param: ParamId::StartChar, value: 0x11 },
            Command::Param { port: 0, param: ParamId::StopChar, value: 0x13 },
        ]
    );
    assert!(conn.params_synced(0).unwrap());
}

/// Test frames for channel 17 carry a module select the server follows.
#[test]
fn test_open_on_second_module() {
    let (mut conn, mut server, now) = ready_connection(EngineConfig::default(), 32);
    open_immediate(&mut conn, &mut server, 17, now);
    assert_eq!(server.module, 1);
    assert_eq!(conn.snapshot(17).unwrap().state, ChannelState::Ready);
}

/// Test a busy persistent open waits for the server's later accept.
#[test]
fn test_busy_persistent_then_accept() {
    let (mut conn, mut server, now) = ready_connection(EngineConfig::default(), 1);
    conn.request_open(0, OpenType::Persistent).unwrap();
    server.receive(&conn.encode(4096, now));
    conn.decode(
        &reply_to(0, &[open_reply(0, OpenReply::Busy(OpenType::Persistent))]),
        now,
    )
    .unwrap();

    assert_eq!(conn.snapshot(0).unwrap().waiters, [0, 1, 0]);
    assert!(conn.encode(4096, now).is_empty());
    assert!(conn.drain_events().is_empty());

    // Carrier came up on the server side.
    conn.decode(
        &reply_to(0, &[open_reply(0, OpenReply::Accept(OpenType::Persistent))]),
        now,
    )
    .unwrap();
    answer_queries(&mut conn, &mut server, 0, now);

    assert!(conn.drain_events().contains(&EngineEvent::Opened { channel: 0 }));
    let snap = conn.snapshot(0).unwrap();
    assert_eq!(snap.state, ChannelState::Ready);
    assert_eq!(snap.open_count, 1);
}

/// Test withdrawing the last waiter of a server-pending open sends a cancel.
#[test]
fn test_cancel_server_pending_open() {
    let (mut conn, mut server, now) = ready_connection(EngineConfig::default(), 1);
    let OpenStatus::Pending(token) = conn.request_open(0, OpenType::Incoming).unwrap() else {
        panic!("expected pending open");
    };
    server.receive(&conn.encode(4096, now));
    conn.decode(
        &reply_to(0, &[open_reply(0, OpenReply::Busy(OpenType::Incoming))]),
        now,
    )
    .unwrap();

    conn.cancel_open(token).unwrap();
    let sent = server.receive(&conn.encode(4096, now));
    assert_eq!(
        sent,
        vec![(
            0,
            Command::Open {
                port: 0,
                request: OpenRequest::Cancel(OpenType::Incoming),
            }
        )]
    );
    assert_eq!(conn.snapshot(0).unwrap().state, ChannelState::WaitCancel);

    conn.decode(
        &reply_to(0, &[open_reply(0, OpenReply::CancelAck(OpenType::Incoming))]),
        now,
    )
    .unwrap();
    assert_eq!(conn.snapshot(0).unwrap().state, ChannelState::Idle);
    assert!(conn.encode(4096, now).is_empty());
}

/// Test a failed immediate open reaches only its own waiter.
#[test]
fn test_open_fail_reports_type() {
    let (mut conn, mut server, now) = ready_connection(EngineConfig::default(), 1);
    conn.request_open(0, OpenType::Immediate).unwrap();
    server.receive(&conn.encode(4096, now));
    conn.decode(
        &reply_to(0, &[open_reply(0, OpenReply::Fail(OpenType::Immediate))]),
        now,
    )
    .unwrap();

    assert_eq!(
        conn.drain_events(),
        vec![EngineEvent::OpenFailed {
            channel: 0,
            otype: OpenType::Immediate
        }]
    );
    assert_eq!(conn.snapshot(0).unwrap().state, ChannelState::Idle);
}

/// Test only changed parameters go on the wire.
#[test]
fn test_param_diff_sends_changed_fields() {
    let (mut conn, mut server, now) = ready_connection(EngineConfig::default(), 1);
    open_immediate(&mut conn, &mut server, 0, now);
    conn.drain_events();

    let mut params = conn.snapshot(0).unwrap().requested;
    params.baud = 0x0060;
    params.cflag = 0x00B0;
    conn.set_params(0, params).unwrap();
    assert!(!conn.params_synced(0).unwrap());

    let sent = server.receive(&conn.encode(4096, now));
    assert_eq!(
        sent,
        vec![
            (0, Command::Param { port: 0, param: ParamId::Baud, value: 0x0060 }),
            (0, Command::Param { port: 0, param: ParamId::Cflag, value: 0x00B0 }),
        ]
    );
    assert!(conn.drain_events().contains(&EngineEvent::ParamsSynced { channel: 0 }));

    // Nothing left to send.
    assert!(conn.encode(4096, now).is_empty());
}

/// Test data is shared by water-filling: the heavy channel gets more, the
/// light one still gets all it asked for.
#[test]
fn test_two_channel_fairness() {
    let config = EngineConfig {
        fast_rate: 10_000,
        slow_rate: 2_000,
        ..EngineConfig::default()
    };
    let (mut conn, mut server, mut now) = ready_connection(config, 2);
    open_immediate(&mut conn, &mut server, 0, now);
    open_immediate(&mut conn, &mut server, 1, now);

    conn.write_tx(0, &[b'a'; 4000]).unwrap();
    conn.write_tx(1, &[b'b'; 50]).unwrap();
    for _ in 0..5 {
        now += Duration::from_millis(20);
        conn.tick(now).unwrap();
    }

    let sent = server.receive(&conn.encode(4096, now));
    let ch0 = data_bytes(&sent, 0);
    let ch1 = data_bytes(&sent, 1);
    assert!(ch0 > ch1, "ch0 {ch0} ch1 {ch1}");
    assert_eq!(ch1, 50);
    assert!(ch0 <= SERVER_WINDOW as usize);

    // Pacing sync rides on the last channel that sent.
    assert_eq!(seq_requests(&sent).len(), 1);
    assert_eq!(conn.syncs_in_flight(), 1);
}

/// Test a 40-byte pacing budget shared by a busy and a light channel
/// under small server windows.
#[test]
fn test_paced_fill_respects_budget_and_windows() {
    let config = EngineConfig {
        fast_rate: 2_000,
        slow_rate: 2_000,
        ..EngineConfig::default()
    };
    let windows = [50u16, 10];
    let (mut conn, mut server, mut now) = ready_connection(config, 2);
    open_with_window(&mut conn, &mut server, 0, windows[0], now);
    open_with_window(&mut conn, &mut server, 1, windows[1], now);

    conn.write_tx(0, &[b'a'; 100]).unwrap();
    conn.write_tx(1, &[b'b'; 10]).unwrap();

    let mut sent_total = [0usize; 2];
    let mut acked = [0usize; 2];
    let mut wire_total = 0;
    let mut ticks = 0;
    let mut data_ticks = 0;
    let mut ch1_done_at = None;
    while sent_total != [100, 10] {
        assert!(ticks < 200, "transfer stalled at {sent_total:?}");
        ticks += 1;
        now += Duration::from_millis(20);
        conn.tick(now).unwrap();

        let bytes = conn.encode(4096, now);
        wire_total += bytes.len();
        let sent = server.receive(&bytes);
        let per_tick = [data_bytes(&sent, 0), data_bytes(&sent, 1)];
        assert!(per_tick[0] + per_tick[1] <= 40, "tick {ticks}: {per_tick:?}");
        if per_tick[0] + per_tick[1] > 0 {
            data_ticks += 1;
        }

        for ch in 0..2 {
            sent_total[ch] += per_tick[ch];
            assert!(
                sent_total[ch] - acked[ch] <= windows[ch] as usize,
                "channel {ch} past its window"
            );
        }
        if ch1_done_at.is_none() && sent_total[1] == 10 {
            ch1_done_at = Some((data_ticks, sent_total[0]));
        }

        answer_syncs(&mut conn, &sent, now);
        for ch in 0..2u16 {
            acked[ch as usize] = sent_total[ch as usize];
            let reply = Reply::TxWindow {
                port: port_of(ch),
                rpos: acked[ch as usize] as u16,
                window: windows[ch as usize],
            };
            conn.decode(&reply_to(ch, &[reply]), now).unwrap();
        }
    }

    // The light channel finished early, while the busy one still had data.
    let (at_tick, busy_sent) = ch1_done_at.unwrap();
    assert!(at_tick <= 2, "light channel done after {at_tick} data ticks");
    assert!(busy_sent < 100);
    // Wire use stays within the rate plus the three-tick credit cap.
    assert!(wire_total <= 40 * ticks + 120, "{wire_total} bytes in {ticks} ticks");
}

/// Test a transport buffer too small to carry a header for every busy
/// channel still moves data, serving the channels in turn.
#[test]
fn test_small_transport_buffer_serves_channels_in_turn() {
    let config = EngineConfig {
        transport_buffer_size: 16,
        ..EngineConfig::default()
    };
    let (mut conn, mut server, mut now) = ready_connection(config, 4);
    for ch in 0..4 {
        open_immediate(&mut conn, &mut server, ch, now);
    }
    for ch in 0..4 {
        conn.write_tx(ch, &[b'x'; 11]).unwrap();
    }

    let mut sent_total = [0usize; 4];
    for _ in 0..50 {
        now += Duration::from_millis(20);
        conn.tick(now).unwrap();
        let bytes = conn.encode(16, now);
        assert!(bytes.len() <= 16);
        let sent = server.receive(&bytes);
        for ch in 0..4u16 {
            sent_total[ch as usize] += data_bytes(&sent, ch);
        }
        answer_syncs(&mut conn, &sent, now);
    }
    assert_eq!(sent_total, [11; 4]);
}

/// Test more busy channels than one tick of credit can carry headers for.
#[test]
fn test_many_channels_share_small_credit() {
    const CHANNELS: u16 = 160;
    let config = EngineConfig {
        fast_rate: 10_000,
        slow_rate: 2_000,
        ..EngineConfig::default()
    };
    let (mut conn, mut server, mut now) = ready_connection(config, CHANNELS);
    for ch in 0..CHANNELS {
        open_immediate(&mut conn, &mut server, ch, now);
    }
    for ch in 0..CHANNELS {
        conn.write_tx(ch, b"z").unwrap();
    }

    let mut served = vec![0usize; CHANNELS as usize];
    for _ in 0..100 {
        now += Duration::from_millis(20);
        conn.tick(now).unwrap();
        let sent = server.receive(&conn.encode(4096, now));
        for (ch, count) in served.iter_mut().enumerate() {
            *count += data_bytes(&sent, ch as u16);
        }
        answer_syncs(&mut conn, &sent, now);
    }
    let unserved: Vec<usize> = (0..served.len()).filter(|&c| served[c] != 1).collect();
    assert!(unserved.is_empty(), "unserved channels {unserved:?}");
}

/// Test flushing queued output completes a drain that nothing was in
/// flight for.
#[test]
fn test_flush_output_completes_drain() {
    let (mut conn, mut server, now) = ready_connection(EngineConfig::default(), 1);
    open_immediate(&mut conn, &mut server, 0, now);
    conn.drain_events();

    conn.write_tx(0, b"pending").unwrap();
    assert!(!conn.is_drained(0).unwrap());
    conn.command(0, ChannelCommand::FlushOutput).unwrap();

    assert!(conn.is_drained(0).unwrap());
    assert!(conn.drain_events().contains(&EngineEvent::Drained { channel: 0 }));
    let sent = server.receive(&conn.encode(4096, now));
    assert_eq!(data_bytes(&sent, 0), 0);
}

/// Test line parameters are refused on a port nobody holds or is opening.
#[test]
fn test_params_refused_without_open() {
    let (mut conn, _server, _now) = ready_connection(EngineConfig::default(), 1);
    let params = conn.snapshot(0).unwrap().requested;
    assert!(matches!(conn.set_params(0, params), Err(RealportError::NotOpen(0))));
    assert!(matches!(
        conn.set_modem_out(0, modem::DTR),
        Err(RealportError::NotOpen(0))
    ));
}

/// Test an unacknowledged sync fails the Connection and sends a diagnostic.
#[test]
fn test_stale_round_trip_fails_connection() {
    let (mut conn, mut server, mut now) = ready_connection(EngineConfig::default(), 1);
    open_immediate(&mut conn, &mut server, 0, now);
    conn.write_tx(0, b"hello").unwrap();
    now += Duration::from_millis(20);
    conn.tick(now).unwrap();
    let sent = server.receive(&conn.encode(4096, now));
    assert_eq!(data_bytes(&sent, 0), 5);
    assert_eq!(conn.syncs_in_flight(), 1);

    let err = conn.tick(now + Duration::from_secs(31)).unwrap_err();
    assert!(matches!(err, RealportError::RoundTripTimeout(_)));
    assert_eq!(conn.state(), ConnectionState::Error);
    assert_eq!(conn.syncs_in_flight(), 0);

    let sent = server.receive(&conn.encode(4096, now));
    match &sent[..] {
        [(_, Command::Diagnostic(text))] => assert!(text.contains("round trip")),
        other => panic!("expected diagnostic, got {other:?}"),
    }
    assert!(matches!(
        conn.write_tx(0, b"x"),
        Err(RealportError::ConnectionClosed)
    ));
}

/// Test flush-input discards data the server sent before seeing the flush.
#[test]
fn test_flush_input_discards_until_round_trip() {
    let (mut conn, mut server, now) = ready_connection(EngineConfig::default(), 1);
    open_immediate(&mut conn, &mut server, 0, now);
    let data = |bytes: &'static [u8]| {
        reply_to(
            0,
            &[Reply::Data {
                port: 0,
                data: bytes::Bytes::from_static(bytes),
            }],
        )
    };

    conn.decode(&data(b"0123456789"), now).unwrap();
    assert_eq!(conn.rx_pending(0).unwrap(), 10);

    let ticket = conn.command(0, ChannelCommand::FlushInput).unwrap().unwrap();
    assert_eq!(conn.rx_pending(0).unwrap(), 0);

    let sent = server.receive(&conn.encode(4096, now));
    assert!(sent.contains(&(0, Command::Port { port: 0, cmd: PortCommand::FlushInput })));
    let [(0, seq)] = seq_requests(&sent)[..] else {
        panic!("expected one sequence request");
    };

    // Already in flight when the server flushed.
    conn.decode(&data(b"late!"), now).unwrap();
    assert_eq!(conn.rx_pending(0).unwrap(), 0);

    conn.drain_events();
    conn.decode(&reply_to(0, &[port_reply(0, PortReply::Sequence(seq))]), now)
        .unwrap();
    assert!(conn
        .drain_events()
        .contains(&EngineEvent::RoundTrip { channel: 0, ticket }));

    conn.decode(&data(b"new"), now).unwrap();
    let mut buf = [0u8; 16];
    let n = conn.read_rx_raw(0, &mut buf).unwrap();
    assert_eq!(&buf[..n], b"new");
}

/// Test the server failing an open port hangs up the local opens.
#[test]
fn test_remote_hangup() {
    let (mut conn, mut server, now) = ready_connection(EngineConfig::default(), 1);
    open_immediate(&mut conn, &mut server, 0, now);
    conn.drain_events();

    conn.decode(
        &reply_to(0, &[open_reply(0, OpenReply::Fail(OpenType::Immediate))]),
        now,
    )
    .unwrap();
    assert_eq!(conn.drain_events(), vec![EngineEvent::Hangup { channel: 0 }]);

    let snap = conn.snapshot(0).unwrap();
    assert_eq!(snap.state, ChannelState::Idle);
    assert!(snap.hangup);
    assert!(matches!(conn.write_tx(0, b"x"), Err(RealportError::Hangup(0))));
    assert!(matches!(
        conn.request_open(0, OpenType::Immediate),
        Err(RealportError::Hangup(0))
    ));
    // No reconnect while the hangup is held.
    assert!(conn.encode(4096, now).is_empty());

    conn.close(0).unwrap();
    assert!(!conn.snapshot(0).unwrap().hangup);
}

/// Test the last close sends a close request and the ack returns to Idle.
#[test]
fn test_close_round_trip() {
    let (mut conn, mut server, now) = ready_connection(EngineConfig::default(), 1);
    open_immediate(&mut conn, &mut server, 0, now);
    conn.close(0).unwrap();

    let sent = server.receive(&conn.encode(4096, now));
    assert_eq!(
        sent,
        vec![(
            0,
            Command::Open {
                port: 0,
                request: OpenRequest::CloseImmediate,
            }
        )]
    );
    assert_eq!(conn.snapshot(0).unwrap().state, ChannelState::WaitClose);

    conn.drain_events();
    conn.decode(&reply_to(0, &[open_reply(0, OpenReply::CloseAck)]), now)
        .unwrap();
    assert_eq!(conn.drain_events(), vec![EngineEvent::Closed { channel: 0 }]);
    assert_eq!(conn.snapshot(0).unwrap().state, ChannelState::Idle);
}

/// Test data beyond the advertised receive window is fatal.
#[test]
fn test_receive_window_overrun() {
    let config = EngineConfig {
        rx_buffer_size: 1024,
        ..EngineConfig::default()
    };
    let (mut conn, mut server, now) = ready_connection(config, 1);
    open_immediate(&mut conn, &mut server, 0, now);

    let frame = Reply::Data {
        port: 0,
        data: bytes::Bytes::from(vec![0u8; 1025]),
    };
    let err = conn.decode(&reply_to(0, &[frame]), now).unwrap_err();
    assert!(matches!(err, RealportError::WindowOverrun { channel: 0, .. }));
    assert_eq!(conn.state(), ConnectionState::Error);
}

proptest! {
    /// Splitting the inbound stream anywhere changes nothing.
    #[test]
    fn prop_split_reads_are_equivalent(
        chunks in prop::collection::vec(prop::collection::vec(any::<u8>(), 1..300), 1..10),
        cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..8),
    ) {
        let frames: Vec<Reply> = chunks
            .iter()
            .map(|c| Reply::Data { port: 0, data: bytes::Bytes::from(c.clone()) })
            .collect();
        let stream = reply_to(0, &frames);

        let (mut whole, mut server_a, now) = ready_connection(EngineConfig::default(), 1);
        open_immediate(&mut whole, &mut server_a, 0, now);
        let (mut split, mut server_b, _) = ready_connection(EngineConfig::default(), 1);
        open_immediate(&mut split, &mut server_b, 0, now);
        whole.drain_events();
        split.drain_events();

        whole.decode(&stream, now).unwrap();

        let mut points: Vec<usize> = cuts.iter().map(|i| i.index(stream.len() + 1)).collect();
        points.push(0);
        points.push(stream.len());
        points.sort_unstable();
        for pair in points.windows(2) {
            split.decode(&stream[pair[0]..pair[1]], now).unwrap();
        }

        prop_assert_eq!(whole.drain_events(), split.drain_events());
        let mut a = vec![0u8; 4096];
        let mut b = vec![0u8; 4096];
        let na = whole.read_rx_raw(0, &mut a).unwrap();
        let nb = split.read_rx_raw(0, &mut b).unwrap();
        prop_assert_eq!(&a[..na], &b[..nb]);
        prop_assert_eq!(na, chunks.iter().map(Vec::len).sum::<usize>());
    }

    /// Unacknowledged data never exceeds the server's window.
    #[test]
    fn prop_transmit_window_respected(
        window in 16u16..2048,
        total in 1usize..6000,
        acks in prop::collection::vec(1u32..=100, 1..64),
    ) {
        let (mut conn, mut server, mut now) = ready_connection(EngineConfig::default(), 1);
        conn.request_open(0, OpenType::Immediate).unwrap();
        server.receive(&conn.encode(4096, now));
        conn.decode(&reply_to(0, &[open_reply(0, OpenReply::Accept(OpenType::Immediate))]), now).unwrap();
        let sent = server.receive(&conn.encode(4096, now));
        let (_, seq) = seq_requests(&sent)[0];
        conn.decode(&reply_to(0, &[
            port_reply(0, PortReply::Sequence(seq)),
            port_reply(0, PortReply::Status { modem_in: 0, modem_out: 0 }),
            port_reply(0, PortReply::Buffers { rx: window, tx: 1024 }),
            port_reply(0, PortReply::Capability(0)),
        ]), now).unwrap();

        let data = vec![0x55u8; total];
        let queued = conn.write_tx(0, &data).unwrap();
        prop_assert_eq!(queued, total);

        let mut transmitted = 0usize;
        let mut acked = 0usize;
        for pct in acks.iter().cycle().take(300) {
            now += Duration::from_millis(20);
            conn.tick(now).unwrap();
            let sent = server.receive(&conn.encode(4096, now));
            transmitted += data_bytes(&sent, 0);
            prop_assert!(transmitted - acked <= window as usize);

            let in_flight = transmitted - acked;
            let ack = (in_flight * *pct as usize / 100).max(1).min(in_flight);
            acked += ack;
            let mut replies: Vec<Reply> = seq_requests(&sent)
                .into_iter()
                .map(|(_, s)| port_reply(0, PortReply::Sequence(s)))
                .collect();
            replies.push(Reply::TxWindow { port: 0, rpos: acked as u16, window });
            conn.decode(&reply_to(0, &replies), now).unwrap();
        }
        prop_assert!(transmitted > 0);
        prop_assert!(transmitted <= total);
    }
}
