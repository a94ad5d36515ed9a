// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use cmcp::transport::channel::ChannelTransport;
use cmcp::{Client, Config, Server};

fn quick_config() -> Config {
    Config {
        heartbeat_interval: Duration::from_millis(30),
        connection_timeout: Duration::from_millis(400),
        ..Config::default()
    }
}

/// Wires a server and a client onto two channel buses, one per
/// direction: `server_out` carries everything the server publishes
/// (heartbeats, acks, data), `client_out` carries everything the
/// client publishes (announce, data). `client.connect` blocks until
/// the handshake completes or `CONNECTION_TIMEOUT` elapses, so the
/// caller gets that outcome back directly.
fn bind_pair(server: &Server, client: &Client, server_out: &str, client_out: &str) -> cmcp::Result<()> {
    server.bind(server_out, client_out).unwrap();
    client.connect(client_out, server_out)
}

#[test]
fn client_discovers_server_and_completes_handshake() {
    let _ = env_logger::try_init();
    let config = quick_config();

    let server = Server::create(config, Arc::new(ChannelTransport));
    let client = Client::create(config, Arc::new(ChannelTransport));
    bind_pair(
        &server,
        &client,
        "channel://handshake_happy_path/server_out",
        "channel://handshake_happy_path/client_out",
    )
    .expect("client should complete the handshake before the deadline");

    assert_eq!(cmcp::ConnectionState::Connected, client.state());
}

#[test]
fn server_rejects_announcement_when_application_says_no() {
    let _ = env_logger::try_init();
    let config = quick_config();

    let mut server = Server::create(config, Arc::new(ChannelTransport));
    server.set_callbacks(Some(Box::new(|_client_id| false)), None, None);
    let client = Client::create(config, Arc::new(ChannelTransport));
    let outcome = bind_pair(
        &server,
        &client,
        "channel://handshake_rejection/server_out",
        "channel://handshake_rejection/client_out",
    );

    assert!(outcome.is_err());
    assert_ne!(cmcp::ConnectionState::Connected, client.state());
}

#[test]
fn data_messages_flow_both_ways_after_connecting() {
    let _ = env_logger::try_init();
    let config = quick_config();

    let received_on_server: Arc<Mutex<Vec<(u16, u16)>>> = Arc::new(Mutex::new(Vec::new()));
    let received_on_server_cb = received_on_server.clone();

    let mut server = Server::create(config, Arc::new(ChannelTransport));
    server.set_callbacks(
        None,
        None,
        Some(Box::new(move |client_id, command, _params| {
            received_on_server_cb.lock().unwrap().push((client_id, command));
        })),
    );

    let received_on_client: Arc<Mutex<Vec<u16>>> = Arc::new(Mutex::new(Vec::new()));
    let received_on_client_cb = received_on_client.clone();

    let mut client = Client::create(config, Arc::new(ChannelTransport));
    client.set_callbacks(
        Some(Box::new(move |command, _params| {
            received_on_client_cb.lock().unwrap().push(command);
        })),
        None,
    );

    bind_pair(
        &server,
        &client,
        "channel://handshake_data_exchange/server_out",
        "channel://handshake_data_exchange/client_out",
    )
    .unwrap();

    client.send(100, None).unwrap();
    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(vec![(client.id(), 100)], *received_on_server.lock().unwrap());

    server.send(client.id(), 200, None).unwrap();
    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(vec![200], *received_on_client.lock().unwrap());
}

#[test]
fn client_moves_to_disconnected_when_server_stops_heartbeating() {
    let _ = env_logger::try_init();
    let config = quick_config();

    let server = Server::create(config, Arc::new(ChannelTransport));
    let client = Client::create(config, Arc::new(ChannelTransport));
    bind_pair(
        &server,
        &client,
        "channel://handshake_timeout/server_out",
        "channel://handshake_timeout/client_out",
    )
    .unwrap();

    drop(server);

    std::thread::sleep(config.connection_timeout * 4);

    assert_eq!(cmcp::ConnectionState::Disconnected, client.state());
}

#[test]
fn rejected_client_regenerates_its_id() {
    let _ = env_logger::try_init();
    let config = quick_config();

    let mut server = Server::create(config, Arc::new(ChannelTransport));
    server.set_callbacks(Some(Box::new(|_client_id| false)), None, None);
    let client = Client::create(config, Arc::new(ChannelTransport));
    let original_id = client.id();

    let _ = bind_pair(
        &server,
        &client,
        "channel://handshake_id_regeneration/server_out",
        "channel://handshake_id_regeneration/client_out",
    );

    assert_ne!(original_id, client.id());
    assert_eq!(1, client.id() & 1, "regenerated id must still be a client (odd) id");
}

#[test]
fn server_registry_rejects_announcements_past_max_peers() {
    let _ = env_logger::try_init();
    let config = Config {
        max_peers: 1,
        ..quick_config()
    };

    let server = Server::create(config, Arc::new(ChannelTransport));
    let first = Client::create(config, Arc::new(ChannelTransport));

    server
        .bind(
            "channel://handshake_registry_capacity/server_out",
            "channel://handshake_registry_capacity/client_out",
        )
        .unwrap();
    first
        .connect(
            "channel://handshake_registry_capacity/client_out",
            "channel://handshake_registry_capacity/server_out",
        )
        .expect("first client should fit within the registry");

    // Only connect the second client once the first has fully occupied
    // the one-slot registry, so the capacity rejection is deterministic.
    let second = Client::create(config, Arc::new(ChannelTransport));
    let outcome = second.connect(
        "channel://handshake_registry_capacity/client_out",
        "channel://handshake_registry_capacity/server_out",
    );
    assert!(outcome.is_err(), "second client should be NACKed once the registry is full");
}
