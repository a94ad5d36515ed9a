// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

use byteorder::{ByteOrder, LittleEndian};

use crate::config::Config;
use crate::error::{CmcpError, Result};

struct Param<'a> {
    id: u16,
    bytes: &'a [u8],
}

/// An ordered sequence of (id, length, bytes) parameter items with
/// unique ids, borrowing its payload the whole time it is alive.
///
/// A `DataList` built by the application (via `add`) borrows the
/// caller's own buffers; a `DataList` produced by `parse` borrows the
/// datagram buffer it was parsed from. Either way the list never owns
/// a copy of the payload — every parameter value is a borrow carried
/// straight through from the wire.
pub struct DataList<'a> {
    items: Vec<Param<'a>>,
    max_params: usize,
    max_bytes: usize,
}

impl<'a> DataList<'a> {
    pub fn with_limits(max_params: usize, max_bytes: usize) -> DataList<'a> {
        DataList {
            items: Vec::new(),
            max_params,
            max_bytes,
        }
    }

    pub fn new() -> DataList<'a> {
        let cfg = Config::default();
        DataList::with_limits(cfg.max_params, cfg.max_params_bytes)
    }

    /// Appends `(id, bytes)` in insertion order. Fails with
    /// `Lookup`... no — with `InvalidArgument` if `id` is already
    /// present, or `Capacity` if the list is full (by item count or
    /// total payload bytes).
    pub fn add(&mut self, id: u16, bytes: &'a [u8]) -> Result<()> {
        if self.items.iter().any(|p| p.id == id) {
            return Err(CmcpError::InvalidArgument("duplicate parameter id"));
        }
        if self.items.len() >= self.max_params {
            return Err(CmcpError::Capacity("data list item count exceeded"));
        }
        if self.total_bytes() + bytes.len() > self.max_bytes {
            return Err(CmcpError::Capacity("data list payload size exceeded"));
        }

        self.items.push(Param { id, bytes });
        Ok(())
    }

    fn total_bytes(&self) -> usize {
        self.items.iter().map(|p| p.bytes.len()).sum()
    }

    /// Looks up `id`, asserting the stored length equals
    /// `expected_len`. No length coercion: a mismatch fails the same
    /// as an absent id.
    pub fn find(&self, id: u16, expected_len: usize) -> Result<&'a [u8]> {
        match self.items.iter().find(|p| p.id == id) {
            Some(p) if p.bytes.len() == expected_len => Ok(p.bytes),
            _ => Err(CmcpError::Lookup("parameter missing or length mismatch")),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u16, &'a [u8])> + '_ {
        self.items.iter().map(|p| (p.id, p.bytes))
    }

    /// `sum over items of (4 + len_i)`; 0 for an empty list.
    pub fn encoded_length(&self) -> usize {
        self.items.iter().map(|p| 4 + p.bytes.len()).sum()
    }

    /// Lays items out sequentially: 2-byte id, 2-byte length, then the
    /// payload, all in insertion order, little-endian.
    pub fn encode(&self, out: &mut Vec<u8>) {
        for item in &self.items {
            let mut header = [0u8; 4];
            LittleEndian::write_u16(&mut header[0..2], item.id);
            LittleEndian::write_u16(&mut header[2..4], item.bytes.len() as u16);
            out.extend_from_slice(&header);
            out.extend_from_slice(item.bytes);
        }
    }

    /// Reads `(id, length, bytes)` records from `buf` until fewer than
    /// 4 bytes remain. A declared length exceeding the remaining bytes
    /// is an underflow: parsing stops there and the prefix of
    /// well-formed items already read is returned — this is not an
    /// error (§4.2/§8).
    pub fn parse(buf: &'a [u8]) -> DataList<'a> {
        let mut items = Vec::new();
        let mut offset = 0usize;

        while buf.len() - offset >= 4 {
            let id = LittleEndian::read_u16(&buf[offset..offset + 2]);
            let len = LittleEndian::read_u16(&buf[offset + 2..offset + 4]) as usize;
            let payload_start = offset + 4;

            if payload_start + len > buf.len() {
                break;
            }

            items.push(Param {
                id,
                bytes: &buf[payload_start..payload_start + len],
            });
            offset = payload_start + len;
        }

        DataList {
            items,
            max_params: usize::MAX,
            max_bytes: usize::MAX,
        }
    }
}

impl<'a> Default for DataList<'a> {
    fn default() -> DataList<'a> {
        DataList::new()
    }
}
