// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

use byteorder::{ByteOrder, LittleEndian};

use crate::data_list::DataList;
use crate::error::{CmcpError, Result};

const HEADER_LEN: usize = 6;

/// The low bit of the wire command-id field; the high 15 bits are the
/// application-visible command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Control = 0,
    Data = 1,
}

impl MessageType {
    fn from_bit(bit: u16) -> MessageType {
        if bit & 1 == 0 {
            MessageType::Control
        } else {
            MessageType::Data
        }
    }

    fn bit(self) -> u16 {
        self as u16
    }
}

enum Params<'a> {
    None,
    Borrowed(&'a DataList<'a>),
    Owned(DataList<'a>),
}

impl<'a> Params<'a> {
    fn encoded_length(&self) -> usize {
        match self {
            Params::None => 0,
            Params::Borrowed(dl) => dl.encoded_length(),
            Params::Owned(dl) => dl.encoded_length(),
        }
    }

    fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Params::None => {}
            Params::Borrowed(dl) => dl.encode(out),
            Params::Owned(dl) => dl.encode(out),
        }
    }

    fn as_data_list(&self) -> Option<&DataList<'a>> {
        match self {
            Params::None => None,
            Params::Borrowed(dl) => Some(dl),
            Params::Owned(dl) => Some(dl),
        }
    }
}

/// The (type, topic_id, sender_id, command_id, parameters?) 5-tuple,
/// with bit-exact encode/parse.
///
/// A send-built `Message` borrows the `DataList` the caller supplied —
/// it never copies or frees it. A parsed `Message` owns the `DataList`
/// it built from the datagram (which in turn borrows the datagram
/// buffer). Rust's ownership already enforces the "destroy releases
/// the container but never the caller's buffers" rule that matters
/// explicitly in a language without a borrow checker; the `Params`
/// enum above only exists to keep that distinction visible in the
/// type, not to manage memory by hand.
pub struct Message<'a> {
    msg_type: MessageType,
    topic: u16,
    sender: u16,
    command: u16,
    params: Params<'a>,
}

impl<'a> Message<'a> {
    /// Builds a send-message. `command` must be `< 2^15`; the
    /// combined wire command-id is `(command << 1) | type`.
    pub fn build(
        msg_type: MessageType,
        topic: u16,
        sender: u16,
        command: u16,
        params: Option<&'a DataList<'a>>,
    ) -> Result<Message<'a>> {
        if command >= (1 << 15) {
            return Err(CmcpError::InvalidArgument("command id must be < 2^15"));
        }

        Ok(Message {
            msg_type,
            topic,
            sender,
            command,
            params: match params {
                Some(dl) => Params::Borrowed(dl),
                None => Params::None,
            },
        })
    }

    /// Parses a received datagram. Requires at least 6 bytes; the
    /// remainder is handed to `DataList::parse`.
    pub fn parse(buf: &'a [u8]) -> Result<Message<'a>> {
        if buf.len() < HEADER_LEN {
            return Err(CmcpError::InvalidArgument("message buffer shorter than header"));
        }

        let topic = LittleEndian::read_u16(&buf[0..2]);
        let sender = LittleEndian::read_u16(&buf[2..4]);
        let encoded_command = LittleEndian::read_u16(&buf[4..6]);
        let msg_type = MessageType::from_bit(encoded_command);
        let command = encoded_command >> 1;
        let params = DataList::parse(&buf[HEADER_LEN..]);

        Ok(Message {
            msg_type,
            topic,
            sender,
            command,
            params: Params::Owned(params),
        })
    }

    /// `6 + params.encoded_length()`; `6` with no parameters.
    pub fn encoded_length(&self) -> usize {
        HEADER_LEN + self.params.encoded_length()
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        let mut header = [0u8; HEADER_LEN];
        LittleEndian::write_u16(&mut header[0..2], self.topic);
        LittleEndian::write_u16(&mut header[2..4], self.sender);
        LittleEndian::write_u16(&mut header[4..6], (self.command << 1) | self.msg_type.bit());
        out.extend_from_slice(&header);

        self.params.encode(out);
    }

    pub fn msg_type(&self) -> MessageType {
        self.msg_type
    }

    pub fn topic(&self) -> u16 {
        self.topic
    }

    pub fn sender(&self) -> u16 {
        self.sender
    }

    pub fn command(&self) -> u16 {
        self.command
    }

    /// The parameter list, valid on any message that has one — every
    /// parsed message has one (possibly empty); a built message has
    /// one only if `build` was given `Some(..)`.
    pub fn parameters(&self) -> Option<&DataList<'a>> {
        self.params.as_data_list()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_data_message_with_params() {
        let mut params = DataList::new();
        params.add(32349, b"Hello\0").unwrap();
        params.add(9273, b"World!\0").unwrap();

        let msg = Message::build(MessageType::Data, 28437, 6391, 27743, Some(&params)).unwrap();
        assert_eq!(27, msg.encoded_length());

        let mut buf = Vec::new();
        msg.encode(&mut buf);
        assert_eq!(27, buf.len());

        let parsed = Message::parse(&buf).unwrap();
        assert_eq!(MessageType::Data, parsed.msg_type());
        assert_eq!(28437, parsed.topic());
        assert_eq!(6391, parsed.sender());
        assert_eq!(27743, parsed.command());

        let dl = parsed.parameters().unwrap();
        assert_eq!(b"Hello\0", dl.find(32349, 6).unwrap());
        assert_eq!(b"World!\0", dl.find(9273, 7).unwrap());
    }

    #[test]
    fn build_rejects_command_with_tag_bit_set() {
        let err = Message::build(MessageType::Control, 1, 2, 1 << 15, None).unwrap_err();
        assert!(matches!(err, CmcpError::InvalidArgument(_)));
    }

    #[test]
    fn parse_rejects_buffer_shorter_than_header() {
        let buf = [0u8; 5];
        assert!(Message::parse(&buf).is_err());
    }

    #[test]
    fn parse_accepts_exactly_six_bytes_as_empty_params() {
        let buf = [0u8; 6];
        let msg = Message::parse(&buf).unwrap();
        assert!(msg.parameters().unwrap().is_empty());
    }

    #[test]
    fn type_tag_bit_survives_round_trip() {
        let msg = Message::build(MessageType::Control, 1, 2, 5, None).unwrap();
        let mut buf = Vec::new();
        msg.encode(&mut buf);

        let parsed = Message::parse(&buf).unwrap();
        assert_eq!(MessageType::Control, parsed.msg_type());
        assert_eq!(5, parsed.command());
    }
}
