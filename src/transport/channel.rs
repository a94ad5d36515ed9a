// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! An in-process, `mpsc`-backed broadcast bus used as a deterministic
//! transport for this crate's own tests.
//!
//! Every address names one bus; every `open_pub`/`open_sub` on that
//! address joins it. `Role` is irrelevant here (there is no real
//! listen/connect distinction for an in-process channel) and is
//! accepted only to satisfy the `Transport` trait.

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Mutex, OnceLock};
use std::sync::Arc;
use std::time::{Duration, Instant};

use byteorder::{ByteOrder, LittleEndian};

use super::{PubEndpoint, Role, SubEndpoint, Transport};

#[derive(Default)]
struct Bus {
    senders: Mutex<Vec<mpsc::Sender<Vec<u8>>>>,
}

impl Bus {
    fn broadcast(&self, buf: &[u8]) {
        let mut senders = self.senders.lock().expect("channel bus mutex poisoned");
        senders.retain(|tx| tx.send(buf.to_vec()).is_ok());
    }

    fn join(&self) -> mpsc::Receiver<Vec<u8>> {
        let (tx, rx) = mpsc::channel();
        self.senders.lock().expect("channel bus mutex poisoned").push(tx);
        rx
    }
}

fn registry() -> &'static Mutex<HashMap<String, Arc<Bus>>> {
    static REGISTRY: OnceLock<Mutex<HashMap<String, Arc<Bus>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

fn bus_for(addr: &str) -> Arc<Bus> {
    registry()
        .lock()
        .expect("channel registry mutex poisoned")
        .entry(addr.to_owned())
        .or_insert_with(|| Arc::new(Bus::default()))
        .clone()
}

/// Drops every bus ever created. Only meant for test isolation between
/// cases that happen to reuse an address.
pub fn reset_all() {
    registry().lock().expect("channel registry mutex poisoned").clear();
}

pub struct ChannelTransport;

impl Transport for ChannelTransport {
    fn open_pub(&self, addr: &str, _role: Role) -> io::Result<Box<dyn PubEndpoint>> {
        Ok(Box::new(ChannelPub { bus: bus_for(addr) }))
    }

    fn open_sub(&self, addr: &str, _role: Role) -> io::Result<Box<dyn SubEndpoint>> {
        let bus = bus_for(addr);
        let receiver = bus.join();

        Ok(Box::new(ChannelSub {
            receiver,
            recv_timeout: Duration::from_secs(1),
            subscriptions: HashSet::new(),
        }))
    }
}

struct ChannelPub {
    bus: Arc<Bus>,
}

impl PubEndpoint for ChannelPub {
    fn send(&mut self, buf: Vec<u8>) -> io::Result<()> {
        self.bus.broadcast(&buf);
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct ChannelSub {
    receiver: mpsc::Receiver<Vec<u8>>,
    recv_timeout: Duration,
    subscriptions: HashSet<u16>,
}

impl SubEndpoint for ChannelSub {
    fn set_recv_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.recv_timeout = timeout;
        Ok(())
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

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "recv timeout"));
            }

            match self.receiver.recv_timeout(remaining) {
                Ok(buf) => {
                    if buf.len() >= 2 {
                        let topic = LittleEndian::read_u16(&buf[0..2]);
                        if self.subscriptions.contains(&topic) {
                            return Ok(buf);
                        }
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    return Err(io::Error::new(io::ErrorKind::TimedOut, "recv timeout"))
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(io::Error::new(io::ErrorKind::Other, "channel bus closed"))
                }
            }
        }
    }

    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}
