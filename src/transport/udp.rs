// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! A real, process-to-process reference transport over UDP multicast.
//!
//! Every address is `ip:port`. When the ip is a multicast group,
//! `open_sub` joins it (IGMP) so that any node's publish endpoint —
//! server or client — reaches every subscriber on the group; this is
//! the conventional way to get broadcast pub/sub semantics out of a
//! connectionless transport, and is the closest UDP analogue of the
//! teacher's bound/connected TCP pipes in `transport/stream/`. A
//! non-multicast address works too, as a plain unicast send/bind pair,
//! which is what the crate's own doctests use for a loopback address.

use std::collections::HashSet;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::time::{Duration, Instant};

use byteorder::{ByteOrder, LittleEndian};

use super::{PubEndpoint, Role, SubEndpoint, Transport};

const MAX_DATAGRAM: usize = 65_507;

fn parse_addr(addr: &str) -> io::Result<SocketAddr> {
    addr.parse()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "address must be ip:port"))
}

pub struct UdpTransport;

impl Transport for UdpTransport {
    fn open_pub(&self, addr: &str, _role: Role) -> io::Result<Box<dyn PubEndpoint>> {
        let target = parse_addr(addr)?;
        let socket = UdpSocket::bind("0.0.0.0:0")?;

        if let SocketAddr::V4(v4) = target {
            if v4.ip().is_multicast() {
                socket.set_multicast_ttl_v4(4)?;
            }
        }

        Ok(Box::new(UdpPub { socket, target }))
    }

    fn open_sub(&self, addr: &str, _role: Role) -> io::Result<Box<dyn SubEndpoint>> {
        let bind_addr = parse_addr(addr)?;

        let socket = match bind_addr {
            SocketAddr::V4(v4) if v4.ip().is_multicast() => {
                let local = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, v4.port());
                let socket = UdpSocket::bind(local)?;
                socket.join_multicast_v4(v4.ip(), &Ipv4Addr::UNSPECIFIED)?;
                socket
            }
            other => UdpSocket::bind(other)?,
        };

        Ok(Box::new(UdpSub {
            socket,
            recv_timeout: Duration::from_secs(1),
            subscriptions: HashSet::new(),
        }))
    }
}

struct UdpPub {
    socket: UdpSocket,
    target: SocketAddr,
}

impl PubEndpoint for UdpPub {
    fn send(&mut self, buf: Vec<u8>) -> io::Result<()> {
        self.socket.send_to(&buf, self.target).map(|_| ())
    }

    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct UdpSub {
    socket: UdpSocket,
    recv_timeout: Duration,
    subscriptions: HashSet<u16>,
}

impl SubEndpoint for UdpSub {
    fn set_recv_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.recv_timeout = timeout;
        self.socket.set_read_timeout(Some(timeout))
    }

    fn subscribe(&mut self, topic: u16) -> io::Result<()> {
        self.subscriptions.insert(topic);
        Ok(())
    }

    fn unsubscribe(&mut self, topic: u16) -> io::Result<()> {
        self.subscriptions.remove(&topic);
        Ok(())
    }

    fn recv(&mut self) -> io::Result<Vec<u8>> {
        let deadline = Instant::now() + self.recv_timeout;
        let mut buf = vec![0u8; MAX_DATAGRAM];

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "recv timeout"));
            }
            self.socket.set_read_timeout(Some(remaining))?;

            let (len, _from) = self.socket.recv_from(&mut buf)?;
            if len >= 2 {
                let topic = LittleEndian::read_u16(&buf[0..2]);
                if self.subscriptions.contains(&topic) {
                    return Ok(buf[..len].to_vec());
                }
            }
        }
    }

    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}
