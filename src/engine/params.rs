//! Negotiated line parameters.
//!
//! Each channel keeps two copies: the one the tty glue asked for and the one
//! last put on the wire. Only fields that differ are re-sent.

use serde::{Deserialize, Serialize};

use crate::protocol::{modem, ParamId};

/// termios-derived settings for one port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelParams {
    /// Baud rate divisor as understood by the PortServer.
    pub baud: u16,
    pub cflag: u16,
    pub iflag: u16,
    pub oflag: u16,
    pub xflag: u16,
    /// DTR/RTS bits, see [`crate::protocol::modem`].
    pub modem_out: u8,
    pub start_char: u8,
    pub stop_char: u8,
}

impl ChannelParams {
    /// Raised DTR and RTS with XON/XOFF flow characters.
    pub fn raised() -> Self {
        Self {
            modem_out: modem::DTR | modem::RTS,
            start_char: 0x11,
            stop_char: 0x13,
            ..Self::default()
        }
    }

    pub fn get(&self, id: ParamId) -> u16 {
        match id {
            ParamId::Baud => self.baud,
            ParamId::Cflag => self.cflag,
            ParamId::Iflag => self.iflag,
            ParamId::Oflag => self.oflag,
            ParamId::Xflag => self.xflag,
            ParamId::ModemOut => u16::from(self.modem_out),
            ParamId::StartChar => u16::from(self.start_char),
            ParamId::StopChar => u16::from(self.stop_char),
        }
    }

    /// Set one field. 8-bit fields keep the low byte.
    pub fn set(&mut self, id: ParamId, value: u16) {
        match id {
            ParamId::Baud => self.baud = value,
            ParamId::Cflag => self.cflag = value,
            ParamId::Iflag => self.iflag = value,
            ParamId::Oflag => self.oflag = value,
            ParamId::Xflag => self.xflag = value,
            ParamId::ModemOut => self.modem_out = value as u8,
            ParamId::StartChar => self.start_char = value as u8,
            ParamId::StopChar => self.stop_char = value as u8,
        }
    }

    /// Fields of `self` that differ from `sent`, in wire order.
    pub fn diff(&self, sent: &ChannelParams) -> Vec<(ParamId, u16)> {
        ParamId::ALL
            .into_iter()
            .filter(|&id| self.get(id) != sent.get(id))
            .map(|id| (id, self.get(id)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diff_only_changed_fields() {
        let sent = ChannelParams::raised();
        let mut requested = sent;
        requested.baud = 0x0C;
        requested.stop_char = 0x14;

        assert_eq!(
            requested.diff(&sent),
            vec![(ParamId::Baud, 0x0C), (ParamId::StopChar, 0x14)]
        );
        assert!(sent.diff(&sent).is_empty());
    }

    #[test]
    fn test_set_get_every_field() {
        let mut params = ChannelParams::default();
        for (i, id) in ParamId::ALL.into_iter().enumerate() {
            params.set(id, i as u16 + 1);
        }
        for (i, id) in ParamId::ALL.into_iter().enumerate() {
            assert_eq!(params.get(id), i as u16 + 1);
        }
    }
}
