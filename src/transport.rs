// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! The transport collaborator (§1, §6): bind/connect on an address
//! string, non-blocking publish of a byte buffer with ownership
//! transfer, topic-filtered subscribe/unsubscribe on a 2-byte prefix,
//! and a blocking receive with a timeout. Out of scope for the
//! protocol itself, but a usable reference implementation is still
//! required; the split is into a publish side and a subscribe side,
//! matching CMCP's one-endpoint-each-way design.

use std::io;
use std::time::Duration;

pub mod channel;
pub mod udp;

/// Whether an endpoint is opened as the listening/binding side or the
/// connecting side of the address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Bind,
    Connect,
}

/// The publish side of a node's transport: non-blocking, best-effort,
/// ownership-transferring send.
pub trait PubEndpoint: Send {
    /// Transfers ownership of `buf` to the transport and attempts
    /// delivery. Best-effort: failures here are swallowed by callers
    /// in the reception loop (§4.4) and surfaced to callers of the
    /// public API outside it (§7).
    fn send(&mut self, buf: Vec<u8>) -> io::Result<()>;

    fn close(&mut self) -> io::Result<()>;
}

/// The subscribe side of a node's transport: topic-filtered, blocking
/// receive bounded by a timeout.
pub trait SubEndpoint: Send {
    fn set_recv_timeout(&mut self, timeout: Duration) -> io::Result<()>;

    /// Filters on the first two bytes of each datagram (host order),
    /// which doubles as the wire `topic_id` field (§4.2 byte-order
    /// note, §9 "subscription filter aliasing").
    fn subscribe(&mut self, topic: u16) -> io::Result<()>;

    fn unsubscribe(&mut self, topic: u16) -> io::Result<()>;

    /// Blocks for at most the configured receive timeout. Returns
    /// `Err(io::ErrorKind::WouldBlock | TimedOut)` on a deadline
    /// reach — the reception loop treats that as transient and
    /// continues (§4.4 step 3).
    fn recv(&mut self) -> io::Result<Vec<u8>>;

    fn close(&mut self) -> io::Result<()>;
}

/// Opens the two endpoints a `Node` owns. Implementations are free to
/// share state between the pub and sub sides (e.g. one socket multiplexed
/// both ways) as long as the two traits above are satisfiable.
pub trait Transport: Send + Sync {
    fn open_pub(&self, addr: &str, role: Role) -> io::Result<Box<dyn PubEndpoint>>;

    fn open_sub(&self, addr: &str, role: Role) -> io::Result<Box<dyn SubEndpoint>>;
}
