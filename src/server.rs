// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, warn};

use crate::config::{self, Config};
use crate::data_list::DataList;
use crate::error::Result;
use crate::id::NodeClass;
use crate::message::{Message, MessageType};
use crate::node::{Node, NodeContext};
use crate::transport::Transport;

struct ClientRecord {
    id: u16,
    next_connection_timeout: Instant,
}

type OnAnnouncement = Box<dyn FnMut(u16) -> bool + Send>;
type OnDisconnect = Box<dyn FnMut(u16) + Send>;
type OnMessage = Box<dyn FnMut(u16, u16, &DataList) + Send>;

struct ServerState {
    config: Config,
    registry: Vec<ClientRecord>,
    on_announcement: Option<OnAnnouncement>,
    on_disconnect: Option<OnDisconnect>,
    on_message: Option<OnMessage>,
}

/// A `Node` with a client registry, announcement handshake responder,
/// per-client timeout tracking, and a callback surface for the
/// application (§4.5).
pub struct Server {
    node: Node,
    state: Arc<Mutex<ServerState>>,
}

impl Server {
    pub fn create(config: Config, transport: Arc<dyn Transport>) -> Server {
        let state = Arc::new(Mutex::new(ServerState {
            config,
            registry: Vec::new(),
            on_announcement: None,
            on_disconnect: None,
            on_message: None,
        }));

        let message_state = state.clone();
        let regular_state = state.clone();

        let node = Node::create(
            NodeClass::Server,
            config,
            transport,
            Box::new(move |ctx, msg| on_message_cb(&message_state, ctx, msg)),
            Some(Box::new(move |ctx| on_regular_cb(&regular_state, ctx))),
        );

        Server { node, state }
    }

    /// Installs the application's handshake and message callbacks.
    /// `on_announcement` decides accept/reject for a new client;
    /// `on_disconnect` fires on any deregistration; `on_message`
    /// delivers application DATA messages.
    pub fn set_callbacks(
        &mut self,
        on_announcement: Option<OnAnnouncement>,
        on_disconnect: Option<OnDisconnect>,
        on_message: Option<OnMessage>,
    ) {
        let mut guard = self.state.lock().expect("server state mutex poisoned");
        guard.on_announcement = on_announcement;
        guard.on_disconnect = on_disconnect;
        guard.on_message = on_message;
    }

    /// `Node::connect` then `Node::start`.
    pub fn bind(&self, pub_addr: &str, sub_addr: &str) -> Result<()> {
        self.node.connect(pub_addr, sub_addr)?;
        self.node.start()
    }

    /// Publishes a DATA message with topic = `client_id`, sender =
    /// this server's id.
    pub fn send(&self, client_id: u16, command: u16, params: Option<&DataList>) -> Result<()> {
        self.node
            .build_and_send(MessageType::Data, client_id, self.node.get_id(), command, params)
    }

    pub fn id(&self) -> u16 {
        self.node.get_id()
    }
}

fn on_regular_cb(state: &Arc<Mutex<ServerState>>, ctx: &NodeContext) {
    let now = Instant::now();

    let expired: Vec<u16> = {
        let guard = state.lock().expect("server state mutex poisoned");
        guard
            .registry
            .iter()
            .filter(|r| now >= r.next_connection_timeout)
            .map(|r| r.id)
            .collect()
    };

    for client_id in expired {
        deregister(state, ctx, client_id);
    }
}

fn on_message_cb(state: &Arc<Mutex<ServerState>>, ctx: &NodeContext, msg: &Message) {
    let sender = msg.sender();

    if sender & 1 == 0 {
        return; // server-to-server is out of scope
    }

    {
        let mut guard = state.lock().expect("server state mutex poisoned");
        let timeout = guard.config.connection_timeout;
        if let Some(rec) = guard.registry.iter_mut().find(|r| r.id == sender) {
            rec.next_connection_timeout = Instant::now() + timeout;
        }
    }

    match msg.msg_type() {
        MessageType::Control => {
            let own_broadcast = ctx.class().own_broadcast();
            if msg.topic() != own_broadcast && msg.topic() != ctx.id() {
                return;
            }

            if msg.command() == config::CLIENT_ANNOUNCE {
                if let Some(nonce) = read_nonce(msg) {
                    register(state, ctx, sender, nonce);
                }
            } else if msg.command() == config::CLIENT_DISCONNECT {
                deregister(state, ctx, sender);
            }
        }
        MessageType::Data => {
            let own_broadcast = ctx.class().own_broadcast();
            let is_client_topic = msg.topic() & 1 == 1;
            if msg.topic() != own_broadcast && !is_client_topic {
                return;
            }

            let registered = {
                let guard = state.lock().expect("server state mutex poisoned");
                guard.registry.iter().any(|r| r.id == sender)
            };
            if !registered {
                return;
            }

            if let Some(params) = msg.parameters() {
                let mut guard = state.lock().expect("server state mutex poisoned");
                if let Some(cb) = guard.on_message.as_mut() {
                    cb(sender, msg.command(), params);
                }
            }
        }
    }
}

fn read_nonce(msg: &Message) -> Option<u64> {
    let params = msg.parameters()?;
    let bytes = params.find(config::PARAM_NONCE, config::PARAM_NONCE_LEN as usize).ok()?;
    Some(LittleEndian::read_u64(bytes))
}

fn register(state: &Arc<Mutex<ServerState>>, ctx: &NodeContext, client_id: u16, nonce: u64) {
    let accepted = {
        let mut guard = state.lock().expect("server state mutex poisoned");

        if guard.registry.iter().any(|r| r.id == client_id) {
            false
        } else if guard.registry.len() >= guard.config.max_peers {
            false
        } else {
            match guard.on_announcement.as_mut() {
                Some(cb) => cb(client_id),
                None => true,
            }
        }
    };

    if accepted {
        {
            let mut guard = state.lock().expect("server state mutex poisoned");
            let deadline = Instant::now() + guard.config.connection_timeout;
            guard.registry.push(ClientRecord {
                id: client_id,
                next_connection_timeout: deadline,
            });
        }

        let _ = ctx.subscribe(client_id);
        debug!("[server {:?}] registered client {:?}", ctx.id(), client_id);
        send_ack_or_nack(ctx, client_id, nonce, config::SERVER_ACK_CLIENT);
    } else {
        send_ack_or_nack(ctx, client_id, nonce, config::SERVER_NACK_CLIENT);
    }
}

fn deregister(state: &Arc<Mutex<ServerState>>, ctx: &NodeContext, client_id: u16) {
    let found = {
        let mut guard = state.lock().expect("server state mutex poisoned");
        if let Some(pos) = guard.registry.iter().position(|r| r.id == client_id) {
            guard.registry.swap_remove(pos);
            true
        } else {
            false
        }
    };

    if !found {
        return;
    }

    let _ = ctx.unsubscribe(client_id);
    debug!("[server {:?}] deregistered client {:?}", ctx.id(), client_id);

    let mut guard = state.lock().expect("server state mutex poisoned");
    if let Some(cb) = guard.on_disconnect.as_mut() {
        cb(client_id);
    }
}

fn send_ack_or_nack(ctx: &NodeContext, client_id: u16, nonce: u64, command: u16) {
    let mut nonce_bytes = [0u8; 8];
    LittleEndian::write_u64(&mut nonce_bytes, nonce);

    let mut params = DataList::new();
    if params.add(config::PARAM_NONCE, &nonce_bytes).is_err() {
        warn!("[server] failed to build nonce param for client {:?}", client_id);
        return;
    }

    if let Err(e) = ctx.send(MessageType::Control, client_id, ctx.id(), command, Some(&params)) {
        warn!("[server] failed to send handshake reply to {:?}: {:?}", client_id, e);
    }
}
