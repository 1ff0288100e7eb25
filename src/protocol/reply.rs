//! PortServer to host frames.
//!
//! Data frames share the command layout. The rest:
//! ```text
//! 0xAp rpos16 win16   transmit window       0xCp 0x01 seq      sequence reply
//! 0xBp code           open/close response   0xCp 0x03 min mout status
//! 0xE1 count16        channel count         0xCp 0x04 rx16 tx16 buffer sizes
//! 0xEF len text       diagnostic            0xCp 0x05 flags    capability
//! 0xF0+m              module select         0xCp 0x10 min ev   event
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use super::frame::{clamp_text, Frame};
use super::wire_format::{
    conn_op, data_header_len, get_u16, header_byte, is_data_opcode, op, open_code,
    peek_data_frame, port_op, put_data_header, split_header, OpenType,
};
use crate::error::{RealportError, Result};

/// Response to an open, close or cancel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenReply {
    Accept(OpenType),
    Busy(OpenType),
    Fail(OpenType),
    CloseAck,
    CancelAck(OpenType),
}

impl OpenReply {
    fn code(self) -> u8 {
        match self {
            OpenReply::Accept(t) => open_code::ACCEPT | t.code(),
            OpenReply::Busy(t) => open_code::BUSY | t.code(),
            OpenReply::Fail(t) => open_code::FAIL | t.code(),
            OpenReply::CloseAck => open_code::CLOSE_ACK,
            OpenReply::CancelAck(t) => open_code::CANCEL_ACK | t.code(),
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        let otype = OpenType::from_code(code);
        match code & open_code::KIND_MASK {
            open_code::ACCEPT => otype.map(OpenReply::Accept),
            open_code::BUSY => otype.map(OpenReply::Busy),
            open_code::FAIL => otype.map(OpenReply::Fail),
            open_code::CLOSE_ACK if code == open_code::CLOSE_ACK => Some(OpenReply::CloseAck),
            open_code::CANCEL_ACK => otype.map(OpenReply::CancelAck),
            _ => None,
        }
    }

    /// Short name for diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            OpenReply::Accept(_) => "open accept",
            OpenReply::Busy(_) => "open busy",
            OpenReply::Fail(_) => "open fail",
            OpenReply::CloseAck => "close ack",
            OpenReply::CancelAck(_) => "cancel ack",
        }
    }
}

/// Sub-replies carried by a `0xCp` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortReply {
    Sequence(u8),
    Status { modem_in: u8, modem_out: u8 },
    /// PortServer buffer sizes for this port.
    Buffers { rx: u16, tx: u16 },
    Capability(u8),
    Event { modem_in: u8, events: u8 },
}

impl PortReply {
    fn sub(self) -> u8 {
        match self {
            PortReply::Sequence(_) => port_op::SEQUENCE,
            PortReply::Status { .. } => port_op::STATUS,
            PortReply::Buffers { .. } => port_op::BUFFERS,
            PortReply::Capability(_) => port_op::CAPABILITY,
            PortReply::Event { .. } => port_op::EVENT,
        }
    }

    fn arg_len(sub: u8) -> Option<usize> {
        match sub {
            port_op::SEQUENCE | port_op::CAPABILITY => Some(1),
            port_op::STATUS | port_op::EVENT => Some(2),
            port_op::BUFFERS => Some(4),
            _ => None,
        }
    }

    /// Short name for diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            PortReply::Sequence(_) => "sequence reply",
            PortReply::Status { .. } => "status reply",
            PortReply::Buffers { .. } => "buffers reply",
            PortReply::Capability(_) => "capability reply",
            PortReply::Event { .. } => "event",
        }
    }
}

/// A frame sent by the PortServer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    ModuleSelect(u8),
    Data { port: u8, data: Bytes },
    TxWindow { port: u8, rpos: u16, window: u16 },
    Open { port: u8, reply: OpenReply },
    Port { port: u8, reply: PortReply },
    ChannelCount(u16),
    Diagnostic(String),
}

impl Frame for Reply {
    fn decode(buf: &[u8], max_frame: usize) -> Result<Option<(Self, usize)>> {
        let Some(&first) = buf.first() else {
            return Ok(None);
        };
        let (opcode, low) = split_header(first);

        if is_data_opcode(opcode) {
            return Ok(peek_data_frame(buf, max_frame)?.map(|(port, offset, len)| {
                let data = Bytes::copy_from_slice(&buf[offset..offset + len]);
                (Reply::Data { port, data }, offset + len)
            }));
        }

        match opcode {
            op::WINDOW => {
                if buf.len() < 5 {
                    return Ok(None);
                }
                let reply = Reply::TxWindow {
                    port: low,
                    rpos: get_u16(buf, 1),
                    window: get_u16(buf, 3),
                };
                Ok(Some((reply, 5)))
            }
            op::OPEN => {
                if buf.len() < 2 {
                    return Ok(None);
                }
                let reply = OpenReply::from_code(buf[1]).ok_or_else(|| {
                    RealportError::Protocol(format!("unknown open response {:#04x}", buf[1]))
                })?;
                Ok(Some((Reply::Open { port: low, reply }, 2)))
            }
            op::PORT => {
                if buf.len() < 2 {
                    return Ok(None);
                }
                let sub = buf[1];
                let args = PortReply::arg_len(sub).ok_or_else(|| {
                    RealportError::Protocol(format!("unknown port reply {sub:#04x}"))
                })?;
                if buf.len() < 2 + args {
                    return Ok(None);
                }
                let a = &buf[2..2 + args];
                let reply = match sub {
                    port_op::SEQUENCE => PortReply::Sequence(a[0]),
                    port_op::STATUS => PortReply::Status { modem_in: a[0], modem_out: a[1] },
                    port_op::BUFFERS => PortReply::Buffers {
                        rx: get_u16(a, 0),
                        tx: get_u16(a, 2),
                    },
                    port_op::CAPABILITY => PortReply::Capability(a[0]),
                    _ => PortReply::Event { modem_in: a[0], events: a[1] },
                };
                Ok(Some((Reply::Port { port: low, reply }, 2 + args)))
            }
            op::CONNECTION => match low {
                conn_op::CHANNEL_COUNT => {
                    if buf.len() < 3 {
                        return Ok(None);
                    }
                    Ok(Some((Reply::ChannelCount(get_u16(buf, 1)), 3)))
                }
                conn_op::DIAGNOSTIC => {
                    if buf.len() < 2 {
                        return Ok(None);
                    }
                    let len = buf[1] as usize;
                    if buf.len() < 2 + len {
                        return Ok(None);
                    }
                    let text = String::from_utf8_lossy(&buf[2..2 + len]).into_owned();
                    Ok(Some((Reply::Diagnostic(text), 2 + len)))
                }
                other => Err(RealportError::Protocol(format!(
                    "unknown connection reply {other:#x}"
                ))),
            },
            op::PARAM => Err(RealportError::Protocol(
                "parameter frame from PortServer".to_string(),
            )),
            _ => Ok(Some((Reply::ModuleSelect(low), 1))),
        }
    }

    fn encode(&self, out: &mut BytesMut) {
        match self {
            Reply::ModuleSelect(module) => out.put_u8(header_byte(op::MODULE, *module)),
            Reply::Data { port, data } => {
                put_data_header(out, *port, data.len());
                out.put_slice(data);
            }
            Reply::TxWindow { port, rpos, window } => {
                out.put_u8(header_byte(op::WINDOW, *port));
                out.put_u16(*rpos);
                out.put_u16(*window);
            }
            Reply::Open { port, reply } => {
                out.put_u8(header_byte(op::OPEN, *port));
                out.put_u8(reply.code());
            }
            Reply::Port { port, reply } => {
                out.put_u8(header_byte(op::PORT, *port));
                out.put_u8(reply.sub());
                match *reply {
                    PortReply::Sequence(v) | PortReply::Capability(v) => out.put_u8(v),
                    PortReply::Status { modem_in, modem_out } => {
                        out.put_u8(modem_in);
                        out.put_u8(modem_out);
                    }
                    PortReply::Buffers { rx, tx } => {
                        out.put_u16(rx);
                        out.put_u16(tx);
                    }
                    PortReply::Event { modem_in, events } => {
                        out.put_u8(modem_in);
                        out.put_u8(events);
                    }
                }
            }
            Reply::ChannelCount(count) => {
                out.put_u8(header_byte(op::CONNECTION, conn_op::CHANNEL_COUNT));
                out.put_u16(*count);
            }
            Reply::Diagnostic(text) => {
                let text = clamp_text(text);
                out.put_u8(header_byte(op::CONNECTION, conn_op::DIAGNOSTIC));
                out.put_u8(text.len() as u8);
                out.put_slice(text.as_bytes());
            }
        }
    }

    fn encoded_len(&self) -> usize {
        match self {
            Reply::ModuleSelect(_) => 1,
            Reply::Data { data, .. } => data_header_len(data.len()) + data.len(),
            Reply::TxWindow { .. } => 5,
            Reply::Open { .. } => 2,
            Reply::Port { reply, .. } => 2 + PortReply::arg_len(reply.sub()).unwrap_or(0),
            Reply::ChannelCount(_) => 3,
            Reply::Diagnostic(text) => 2 + clamp_text(text).len(),
        }
    }
}
