// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, warn};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use crate::config::{self, Config};
use crate::data_list::DataList;
use crate::error::{CmcpError, Result};
use crate::id::NodeClass;
use crate::message::{Message, MessageType};
use crate::node::{Node, NodeContext};
use crate::state_cell::{StateCell, WaitOutcome};
use crate::transport::Transport;

/// Handshake/connection state (§4.6): `DISCONNECTED -> TRYING_TO_CONNECT
/// -> HEARTBEAT_RECEIVED -> CONNECTED`, with a NACK or a stale server
/// sending it back to `DISCONNECTED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    TryingToConnect,
    HeartbeatReceived,
    Connected,
}

struct ClientData {
    server_id: Option<u16>,
    current_nonce: u64,
    next_connection_timeout: Instant,
}

type OnMessage = Box<dyn FnMut(u16, &DataList) + Send>;
type LostConnection = Box<dyn FnMut() + Send>;

struct ClientShared {
    config: Config,
    connection: StateCell<ConnectionState>,
    data: Mutex<ClientData>,
    nonce_rng: Mutex<StdRng>,
    on_message: Mutex<Option<OnMessage>>,
    lost_connection: Mutex<Option<LostConnection>>,
}

/// A `Node` that discovers a server via its heartbeat broadcast,
/// announces itself, and tracks the resulting connection (§4.6).
pub struct Client {
    node: Node,
    shared: Arc<ClientShared>,
}

impl Client {
    pub fn create(config: Config, transport: Arc<dyn Transport>) -> Client {
        let shared = Arc::new(ClientShared {
            config,
            connection: StateCell::new(ConnectionState::Disconnected),
            data: Mutex::new(ClientData {
                server_id: None,
                current_nonce: 0,
                next_connection_timeout: Instant::now() + config.connection_timeout,
            }),
            nonce_rng: Mutex::new(StdRng::from_entropy()),
            on_message: Mutex::new(None),
            lost_connection: Mutex::new(None),
        });

        let message_shared = shared.clone();
        let regular_shared = shared.clone();

        let node = Node::create(
            NodeClass::Client,
            config,
            transport,
            Box::new(move |ctx, msg| on_message_cb(&message_shared, ctx, msg)),
            Some(Box::new(move |ctx| on_regular_cb(&regular_shared, ctx))),
        );

        Client { node, shared }
    }

    /// Installs the application's DATA callback and an optional
    /// callback fired when a connected client times out (not required
    /// by the wire protocol, but useful — §12).
    pub fn set_callbacks(&mut self, on_message: Option<OnMessage>, lost_connection: Option<LostConnection>) {
        *self.shared.on_message.lock().expect("client on_message mutex poisoned") = on_message;
        *self.shared.lost_connection.lock().expect("client lost_connection mutex poisoned") = lost_connection;
    }

    /// `Node::connect`, `Node::start`, then drives the handshake to
    /// completion: sets `TRYING_TO_CONNECT` and blocks until the
    /// connection state reaches `CONNECTED` or `CONNECTION_TIMEOUT`
    /// elapses, per §4.6's `establish_connection`. Fails with
    /// `NotConnected` on timeout.
    pub fn connect(&self, pub_addr: &str, sub_addr: &str) -> Result<()> {
        self.node.connect(pub_addr, sub_addr)?;
        self.node.start()?;

        let deadline = Instant::now() + self.shared.config.connection_timeout;
        self.shared.connection.set(ConnectionState::TryingToConnect);

        match self.shared.connection.await_state(ConnectionState::Connected, Some(deadline)) {
            WaitOutcome::Signalled => Ok(()),
            WaitOutcome::DeadlineReached => Err(CmcpError::NotConnected),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.connection.get()
    }

    pub fn id(&self) -> u16 {
        self.node.get_id()
    }

    /// Publishes a DATA message to the server this client is connected
    /// to. Requires `CONNECTED`.
    pub fn send(&self, command: u16, params: Option<&DataList>) -> Result<()> {
        let server_id = {
            let guard = self.shared.data.lock().expect("client data mutex poisoned");
            guard.server_id.ok_or(CmcpError::NotConnected)?
        };

        if self.shared.connection.get() != ConnectionState::Connected {
            return Err(CmcpError::NotConnected);
        }

        self.node
            .build_and_send(MessageType::Data, server_id, self.node.get_id(), command, params)
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        let server_id = self.shared.data.lock().expect("client data mutex poisoned").server_id;

        if let Some(server_id) = server_id {
            if self.shared.connection.get() != ConnectionState::Disconnected {
                let _ = self.node.build_and_send(
                    MessageType::Control,
                    server_id,
                    self.node.get_id(),
                    config::CLIENT_DISCONNECT,
                    None,
                );
            }
        }
    }
}

fn on_regular_cb(shared: &Arc<ClientShared>, ctx: &NodeContext) {
    let now = Instant::now();

    let timed_out = {
        let guard = shared.data.lock().expect("client data mutex poisoned");
        guard.server_id.is_some() && now >= guard.next_connection_timeout
    };

    if timed_out && shared.connection.get() != ConnectionState::Disconnected {
        debug!("[client {:?}] connection timed out", ctx.id());
        shared.data.lock().expect("client data mutex poisoned").server_id = None;
        shared.connection.set(ConnectionState::Disconnected);

        if let Some(cb) = shared.lost_connection.lock().expect("client lost_connection mutex poisoned").as_mut() {
            cb();
        }
    }
}

fn on_message_cb(shared: &Arc<ClientShared>, ctx: &NodeContext, msg: &Message) {
    let sender = msg.sender();

    if sender & 1 == 1 {
        return; // client-to-client is out of scope
    }

    let is_known_server = {
        let guard = shared.data.lock().expect("client data mutex poisoned");
        guard.server_id == Some(sender)
    };

    if is_known_server && shared.connection.get() == ConnectionState::Connected {
        let mut guard = shared.data.lock().expect("client data mutex poisoned");
        guard.next_connection_timeout = Instant::now() + shared.config.connection_timeout;
    }

    match msg.msg_type() {
        MessageType::Control => handle_control(shared, ctx, msg, sender, is_known_server),
        MessageType::Data => {
            if msg.topic() != ctx.id() {
                return;
            }

            if let Some(params) = msg.parameters() {
                if let Some(cb) = shared.on_message.lock().expect("client on_message mutex poisoned").as_mut() {
                    cb(msg.command(), params);
                }
            }
        }
    }
}

fn handle_control(shared: &Arc<ClientShared>, ctx: &NodeContext, msg: &Message, sender: u16, is_known_server: bool) {
    let own_broadcast = ctx.class().own_broadcast();

    if msg.command() == config::SERVER_HEARTBEAT {
        if msg.topic() != own_broadcast && msg.topic() != ctx.id() {
            return;
        }

        if shared.connection.get() == ConnectionState::TryingToConnect {
            {
                let mut guard = shared.data.lock().expect("client data mutex poisoned");
                guard.server_id = Some(sender);
                guard.next_connection_timeout = Instant::now() + shared.config.connection_timeout;
            }
            shared.connection.set(ConnectionState::HeartbeatReceived);
            send_announcement(shared, ctx, sender);
        }
        return;
    }

    if msg.topic() != ctx.id() || !is_known_server {
        return;
    }
    if shared.connection.get() != ConnectionState::HeartbeatReceived {
        return; // ack/nack only means anything mid-handshake (§4.6)
    }

    if msg.command() == config::SERVER_ACK_CLIENT {
        if nonce_matches(shared, msg) {
            shared.connection.set(ConnectionState::Connected);
            debug!("[client {:?}] connected to server {:?}", ctx.id(), sender);
        }
    } else if msg.command() == config::SERVER_NACK_CLIENT {
        if nonce_matches(shared, msg) {
            warn!("[client {:?}] rejected by server {:?}", ctx.id(), sender);
            shared.data.lock().expect("client data mutex poisoned").server_id = None;
            shared.connection.set(ConnectionState::Disconnected);
            ctx.generate_id();
        }
    }
}

fn nonce_matches(shared: &Arc<ClientShared>, msg: &Message) -> bool {
    let expected = shared.data.lock().expect("client data mutex poisoned").current_nonce;

    match msg.parameters().and_then(|dl| dl.find(config::PARAM_NONCE, config::PARAM_NONCE_LEN as usize).ok()) {
        Some(bytes) => LittleEndian::read_u64(bytes) == expected,
        None => false,
    }
}

fn send_announcement(shared: &Arc<ClientShared>, ctx: &NodeContext, server_id: u16) {
    let nonce = {
        let mut rng = shared.nonce_rng.lock().expect("client nonce rng mutex poisoned");
        rng.next_u64()
    };
    shared.data.lock().expect("client data mutex poisoned").current_nonce = nonce;

    let mut nonce_bytes = [0u8; 8];
    LittleEndian::write_u64(&mut nonce_bytes, nonce);

    let mut params = DataList::new();
    if params.add(config::PARAM_NONCE, &nonce_bytes).is_err() {
        warn!("[client {:?}] failed to build nonce param", ctx.id());
        return;
    }

    if let Err(e) = ctx.send(MessageType::Control, server_id, ctx.id(), config::CLIENT_ANNOUNCE, Some(&params)) {
        warn!("[client {:?}] failed to send announcement: {:?}", ctx.id(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state_is_disconnected() {
        let shared = ClientShared {
            config: Config::default(),
            connection: StateCell::new(ConnectionState::Disconnected),
            data: Mutex::new(ClientData {
                server_id: None,
                current_nonce: 0,
                next_connection_timeout: Instant::now() + Duration::from_secs(1),
            }),
            nonce_rng: Mutex::new(StdRng::from_entropy()),
            on_message: Mutex::new(None),
            lost_connection: Mutex::new(None),
        };

        assert_eq!(ConnectionState::Disconnected, shared.connection.get());
    }

    /// A delayed/duplicated `SERVER_NACK_CLIENT` carrying the very nonce
    /// that completed the handshake must not knock an already-CONNECTED
    /// client back to DISCONNECTED — §4.6 only accepts ack/nack while
    /// `HEARTBEAT_RECEIVED`.
    #[test]
    fn late_nack_after_connected_is_ignored() {
        use crate::server::Server;
        use crate::transport::channel::ChannelTransport;
        use crate::transport::{Role, Transport};

        let config = Config {
            heartbeat_interval: Duration::from_millis(20),
            connection_timeout: Duration::from_millis(300),
            ..Config::default()
        };

        let server = Server::create(config, Arc::new(ChannelTransport));
        let client = Client::create(config, Arc::new(ChannelTransport));

        server
            .bind(
                "channel://late_nack_after_connected_is_ignored/server_out",
                "channel://late_nack_after_connected_is_ignored/client_out",
            )
            .unwrap();
        client
            .connect(
                "channel://late_nack_after_connected_is_ignored/client_out",
                "channel://late_nack_after_connected_is_ignored/server_out",
            )
            .expect("handshake should complete");
        assert_eq!(ConnectionState::Connected, client.state());

        let nonce = client.shared.data.lock().expect("client data mutex poisoned").current_nonce;

        let mut nonce_bytes = [0u8; 8];
        LittleEndian::write_u64(&mut nonce_bytes, nonce);
        let mut params = DataList::new();
        params.add(config::PARAM_NONCE, &nonce_bytes).unwrap();

        let forged = Message::build(
            MessageType::Control,
            client.id(),
            server.id(),
            config::SERVER_NACK_CLIENT,
            Some(&params),
        )
        .unwrap();
        let mut buf = Vec::new();
        forged.encode(&mut buf);

        let mut pub_ep = ChannelTransport
            .open_pub("channel://late_nack_after_connected_is_ignored/server_out", Role::Connect)
            .unwrap();
        pub_ep.send(buf).unwrap();

        std::thread::sleep(Duration::from_millis(100));

        assert_eq!(ConnectionState::Connected, client.state());
    }
}
