//! Host to PortServer frames.
//!
//! ```text
//! 0x00-0x7p  short data (1-8 bytes)      0xBp code     open/close/cancel
//! 0x8p len   data (<=255 bytes)          0xCp sub ...  port command
//! 0x9p len16 data                        0xDp id val16 parameter set
//! 0xAp rwin16 receive window             0xE0          capability query
//! 0xF0+m     module select               0xEF len text diagnostic
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use super::frame::{clamp_text, Frame};
use super::wire_format::{
    conn_op, data_header_len, get_u16, header_byte, is_data_opcode, op, open_code,
    peek_data_frame, port_op, put_data_header, split_header, OpenType,
};
use crate::error::{RealportError, Result};

/// Negotiated parameter identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamId {
    Baud,
    Cflag,
    Iflag,
    Oflag,
    Xflag,
    ModemOut,
    StartChar,
    StopChar,
}

impl ParamId {
    pub const ALL: [ParamId; 8] = [
        ParamId::Baud,
        ParamId::Cflag,
        ParamId::Iflag,
        ParamId::Oflag,
        ParamId::Xflag,
        ParamId::ModemOut,
        ParamId::StartChar,
        ParamId::StopChar,
    ];

    pub fn code(self) -> u8 {
        match self {
            ParamId::Baud => 1,
            ParamId::Cflag => 2,
            ParamId::Iflag => 3,
            ParamId::Oflag => 4,
            ParamId::Xflag => 5,
            ParamId::ModemOut => 6,
            ParamId::StartChar => 7,
            ParamId::StopChar => 8,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        ParamId::ALL.into_iter().find(|p| p.code() == code)
    }
}

/// Open-family request codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenRequest {
    Open(OpenType),
    Cancel(OpenType),
    CloseImmediate,
    CloseGraceful,
}

impl OpenRequest {
    fn code(self) -> u8 {
        match self {
            OpenRequest::Open(t) => open_code::OPEN | t.code(),
            OpenRequest::Cancel(t) => open_code::CANCEL | t.code(),
            OpenRequest::CloseImmediate => open_code::CLOSE_IMMEDIATE,
            OpenRequest::CloseGraceful => open_code::CLOSE_GRACEFUL,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            open_code::CLOSE_IMMEDIATE => Some(OpenRequest::CloseImmediate),
            open_code::CLOSE_GRACEFUL => Some(OpenRequest::CloseGraceful),
            c if c & open_code::KIND_MASK == open_code::OPEN => {
                OpenType::from_code(c).map(OpenRequest::Open)
            }
            c if c & open_code::KIND_MASK == open_code::CANCEL => {
                OpenType::from_code(c).map(OpenRequest::Cancel)
            }
            _ => None,
        }
    }
}

/// Sub-commands carried by a `0xCp` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortCommand {
    SeqRequest(u8),
    EventMask(u8),
    QueryStatus,
    QueryBuffers,
    QueryCapability,
    FlushInput,
    FlushOutput,
    PauseInput,
    PauseOutput,
    ResumeInput,
    ResumeOutput,
    /// Break duration in milliseconds.
    SendBreak(u16),
    SendImmediate(u8),
}

impl PortCommand {
    fn sub(self) -> u8 {
        match self {
            PortCommand::SeqRequest(_) => port_op::SEQUENCE,
            PortCommand::EventMask(_) => port_op::EVENT_MASK,
            PortCommand::QueryStatus => port_op::STATUS,
            PortCommand::QueryBuffers => port_op::BUFFERS,
            PortCommand::QueryCapability => port_op::CAPABILITY,
            PortCommand::FlushInput => port_op::FLUSH_INPUT,
            PortCommand::FlushOutput => port_op::FLUSH_OUTPUT,
            PortCommand::PauseInput => port_op::PAUSE_INPUT,
            PortCommand::PauseOutput => port_op::PAUSE_OUTPUT,
            PortCommand::ResumeInput => port_op::RESUME_INPUT,
            PortCommand::ResumeOutput => port_op::RESUME_OUTPUT,
            PortCommand::SendBreak(_) => port_op::SEND_BREAK,
            PortCommand::SendImmediate(_) => port_op::SEND_IMMEDIATE,
        }
    }

    /// Argument bytes after the sub-op.
    fn arg_len(sub: u8) -> Option<usize> {
        match sub {
            port_op::SEQUENCE | port_op::EVENT_MASK | port_op::SEND_IMMEDIATE => Some(1),
            port_op::SEND_BREAK => Some(2),
            port_op::STATUS..=port_op::RESUME_OUTPUT => Some(0),
            _ => None,
        }
    }

    fn parse(sub: u8, args: &[u8]) -> Self {
        match sub {
            port_op::SEQUENCE => PortCommand::SeqRequest(args[0]),
            port_op::EVENT_MASK => PortCommand::EventMask(args[0]),
            port_op::STATUS => PortCommand::QueryStatus,
            port_op::BUFFERS => PortCommand::QueryBuffers,
            port_op::CAPABILITY => PortCommand::QueryCapability,
            port_op::FLUSH_INPUT => PortCommand::FlushInput,
            port_op::FLUSH_OUTPUT => PortCommand::FlushOutput,
            port_op::PAUSE_INPUT => PortCommand::PauseInput,
            port_op::PAUSE_OUTPUT => PortCommand::PauseOutput,
            port_op::RESUME_INPUT => PortCommand::ResumeInput,
            port_op::RESUME_OUTPUT => PortCommand::ResumeOutput,
            port_op::SEND_BREAK => PortCommand::SendBreak(get_u16(args, 0)),
            _ => PortCommand::SendImmediate(args[0]),
        }
    }
}

/// A frame sent by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    ModuleSelect(u8),
    Data { port: u8, data: Bytes },
    RxWindow { port: u8, rwin: u16 },
    Open { port: u8, request: OpenRequest },
    Port { port: u8, cmd: PortCommand },
    Param { port: u8, param: ParamId, value: u16 },
    CapabilityQuery,
    Diagnostic(String),
}

impl Command {
    /// Port nibble for channel-addressed frames.
    pub fn port(&self) -> Option<u8> {
        match self {
            Command::Data { port, .. }
            | Command::RxWindow { port, .. }
            | Command::Open { port, .. }
            | Command::Port { port, .. }
            | Command::Param { port, .. } => Some(*port),
            _ => None,
        }
    }
}

impl Frame for Command {
    fn decode(buf: &[u8], max_frame: usize) -> Result<Option<(Self, usize)>> {
        let Some(&first) = buf.first() else {
            return Ok(None);
        };
        let (opcode, low) = split_header(first);

        if is_data_opcode(opcode) {
            return Ok(peek_data_frame(buf, max_frame)?.map(|(port, offset, len)| {
                let data = Bytes::copy_from_slice(&buf[offset..offset + len]);
                (Command::Data { port, data }, offset + len)
            }));
        }

        match opcode {
            op::WINDOW => {
                if buf.len() < 3 {
                    return Ok(None);
                }
                let rwin = get_u16(buf, 1);
                Ok(Some((Command::RxWindow { port: low, rwin }, 3)))
            }
            op::OPEN => {
                if buf.len() < 2 {
                    return Ok(None);
                }
                let request = OpenRequest::from_code(buf[1]).ok_or_else(|| {
                    RealportError::Protocol(format!("unknown open request {:#04x}", buf[1]))
                })?;
                Ok(Some((Command::Open { port: low, request }, 2)))
            }
            op::PORT => {
                if buf.len() < 2 {
                    return Ok(None);
                }
                let sub = buf[1];
                let args = PortCommand::arg_len(sub).ok_or_else(|| {
                    RealportError::Protocol(format!("unknown port command {sub:#04x}"))
                })?;
                if buf.len() < 2 + args {
                    return Ok(None);
                }
                let cmd = PortCommand::parse(sub, &buf[2..2 + args]);
                Ok(Some((Command::Port { port: low, cmd }, 2 + args)))
            }
            op::PARAM => {
                if buf.len() < 4 {
                    return Ok(None);
                }
                let param = ParamId::from_code(buf[1]).ok_or_else(|| {
                    RealportError::Protocol(format!("unknown parameter {:#04x}", buf[1]))
                })?;
                let value = get_u16(buf, 2);
                Ok(Some((Command::Param { port: low, param, value }, 4)))
            }
            op::CONNECTION => match low {
                conn_op::CAPABILITY_QUERY => Ok(Some((Command::CapabilityQuery, 1))),
                conn_op::DIAGNOSTIC => {
                    if buf.len() < 2 {
                        return Ok(None);
                    }
                    let len = buf[1] as usize;
                    if buf.len() < 2 + len {
                        return Ok(None);
                    }
                    let text = String::from_utf8_lossy(&buf[2..2 + len]).into_owned();
                    Ok(Some((Command::Diagnostic(text), 2 + len)))
                }
                other => Err(RealportError::Protocol(format!(
                    "unknown connection command {other:#x}"
                ))),
            },
            _ => Ok(Some((Command::ModuleSelect(low), 1))),
        }
    }

    fn encode(&self, out: &mut BytesMut) {
        match self {
            Command::ModuleSelect(module) => out.put_u8(header_byte(op::MODULE, *module)),
            Command::Data { port, data } => {
                put_data_header(out, *port, data.len());
                out.put_slice(data);
            }
            Command::RxWindow { port, rwin } => {
                out.put_u8(header_byte(op::WINDOW, *port));
                out.put_u16(*rwin);
            }
            Command::Open { port, request } => {
                out.put_u8(header_byte(op::OPEN, *port));
                out.put_u8(request.code());
            }
            Command::Port { port, cmd } => {
                out.put_u8(header_byte(op::PORT, *port));
                out.put_u8(cmd.sub());
                match cmd {
                    PortCommand::SeqRequest(v)
                    | PortCommand::EventMask(v)
                    | PortCommand::SendImmediate(v) => out.put_u8(*v),
                    PortCommand::SendBreak(millis) => out.put_u16(*millis),
                    _ => {}
                }
            }
            Command::Param { port, param, value } => {
                out.put_u8(header_byte(op::PARAM, *port));
                out.put_u8(param.code());
                out.put_u16(*value);
            }
            Command::CapabilityQuery => {
                out.put_u8(header_byte(op::CONNECTION, conn_op::CAPABILITY_QUERY));
            }
            Command::Diagnostic(text) => {
                let text = clamp_text(text);
                out.put_u8(header_byte(op::CONNECTION, conn_op::DIAGNOSTIC));
                out.put_u8(text.len() as u8);
                out.put_slice(text.as_bytes());
            }
        }
    }

    fn encoded_len(&self) -> usize {
        match self {
            Command::ModuleSelect(_) | Command::CapabilityQuery => 1,
            Command::Data { data, .. } => data_header_len(data.len()) + data.len(),
            Command::RxWindow { .. } => 3,
            Command::Open { .. } => 2,
            Command::Port { cmd, .. } => 2 + PortCommand::arg_len(cmd.sub()).unwrap_or(0),
            Command::Param { .. } => 4,
            Command::Diagnostic(text) => 2 + clamp_text(text).len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::encode_frames;

    fn decode_all(bytes: &[u8]) -> Vec<Command> {
        let mut out = Vec::new();
        let mut offset = 0;
        while offset < bytes.len() {
            let (cmd, used) = Command::decode(&bytes[offset..], 4096).unwrap().unwrap();
            out.push(cmd);
            offset += used;
        }
        out
    }

    #[test]
    fn test_open_sequence_bytes() {
        let bytes = encode_frames(&[
            Command::ModuleSelect(1),
            Command::Open {
                port: 4,
                request: OpenRequest::Open(OpenType::Persistent),
            },
        ]);
        assert_eq!(&bytes[..], &[0xF1, 0xB4, 0x01]);
    }

    #[test]
    fn test_every_port_command_decodes() {
        let cmds = [
            PortCommand::SeqRequest(9),
            PortCommand::EventMask(0x0F),
            PortCommand::QueryStatus,
            PortCommand::QueryBuffers,
            PortCommand::QueryCapability,
            PortCommand::FlushInput,
            PortCommand::FlushOutput,
            PortCommand::PauseInput,
            PortCommand::PauseOutput,
            PortCommand::ResumeInput,
            PortCommand::ResumeOutput,
            PortCommand::SendBreak(250),
            PortCommand::SendImmediate(0x13),
        ];
        let frames: Vec<Command> = cmds.iter().map(|&cmd| Command::Port { port: 7, cmd }).collect();
        let bytes = encode_frames(&frames);
        assert_eq!(bytes.len(), frames.iter().map(Frame::encoded_len).sum::<usize>());
        assert_eq!(decode_all(&bytes), frames);
    }

    #[test]
    fn test_close_codes() {
        let bytes = encode_frames(&[
            Command::Open { port: 0, request: OpenRequest::CloseImmediate },
            Command::Open { port: 0, request: OpenRequest::CloseGraceful },
            Command::Open { port: 0, request: OpenRequest::Cancel(OpenType::Incoming) },
        ]);
        assert_eq!(&bytes[..], &[0xB0, 0x0A, 0xB0, 0x0B, 0xB0, 0x12]);
    }

    #[test]
    fn test_partial_param_frame() {
        let bytes = encode_frames(&[Command::Param {
            port: 2,
            param: ParamId::Baud,
            value: 0x0180,
        }]);
        for cut in 0..bytes.len() {
            assert!(Command::decode(&bytes[..cut], 4096).unwrap().is_none());
        }
        let (cmd, used) = Command::decode(&bytes, 4096).unwrap().unwrap();
        assert_eq!(used, 4);
        assert_eq!(
            cmd,
            Command::Param { port: 2, param: ParamId::Baud, value: 0x0180 }
        );
    }

    #[test]
    fn test_unknown_port_command_rejected() {
        let result = Command::decode(&[0xC0, 0x7F], 4096);
        assert!(result.unwrap_err().to_string().contains("unknown port command"));
    }

    #[test]
    fn test_diagnostic_text() {
        let bytes = encode_frames(&[Command::Diagnostic("window overrun".to_string())]);
        assert_eq!(bytes[0], 0xEF);
        assert_eq!(bytes[1] as usize, "window overrun".len());
        assert_eq!(
            decode_all(&bytes),
            vec![Command::Diagnostic("window overrun".to_string())]
        );
    }
}
