//! Protocol module - wire format, framing, and frame types.
//!
//! This module implements the RealPort byte-level protocol:
//! - 1/2/3-byte frame headers with a port nibble and module select
//! - [`Command`] frames sent by the host, [`Reply`] frames sent by the PortServer
//! - Frame buffer for accumulating partial reads
//! - 0xFF escape decoding for cooked receive data

mod command;
mod escape;
mod frame;
mod frame_buffer;
mod reply;
mod wire_format;

pub use command::{Command, OpenRequest, ParamId, PortCommand};
pub use escape::{lsr, EscapeScanner, EscapeStyle, RxFlag, Scanned, ESCAPE};
pub use frame::{encode_frames, Frame};
pub use frame_buffer::FrameBuffer;
pub use reply::{OpenReply, PortReply, Reply};
pub use wire_format::{
    capability, channel_index, data_header_len, event, get_u16, get_u32, modem, module_of,
    port_of, put_data_header, put_u16, put_u32, split_header, OpenType, CHANNELS_PER_MODULE,
    DEFAULT_MAX_FRAME_SIZE, MAX_CHANNELS, MAX_HEADER_LEN, MEDIUM_DATA_MAX, SHORT_DATA_MAX,
};
