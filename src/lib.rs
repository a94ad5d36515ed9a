// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! A topic-filtered publish/subscribe messaging layer: a `Server`
//! heartbeats its presence, `Client`s discover it and complete a
//! nonce-based handshake, and both sides then exchange topic-addressed
//! application data over a pluggable transport.
//!
//! The wire format, the handshake, and the node lifecycle are covered
//! module-by-module below; `transport` holds the pluggable
//! publish/subscribe endpoint abstraction plus two reference
//! implementations (`transport::channel` for tests, `transport::udp`
//! for real networks).

pub mod client;
pub mod config;
pub mod data_list;
pub mod error;
pub mod id;
pub mod message;
pub mod node;
pub mod server;
pub mod state_cell;
pub mod transport;

pub use client::{Client, ConnectionState};
pub use config::{
    Config, CLIENT_ANNOUNCE, CLIENT_DISCONNECT, CLIENT_HEARTBEAT, PARAM_NONCE, PARAM_NONCE_LEN, SERVER_ACK_CLIENT,
    SERVER_HEARTBEAT, SERVER_NACK_CLIENT,
};
pub use data_list::DataList;
pub use error::{CmcpError, Result};
pub use id::{NodeClass, CLIENT_BROADCAST, SERVER_BROADCAST};
pub use message::{Message, MessageType};
pub use node::{Node, NodeContext, NodeState};
pub use server::Server;
pub use transport::{PubEndpoint, Role, SubEndpoint, Transport};
