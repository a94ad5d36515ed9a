// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

use std::time::Duration;

/// Reserved 16-bit id used for the `PARAM_NONCE` parameter carried by
/// `CLIENT_ANNOUNCE`, `SERVER_ACK_CLIENT` and `SERVER_NACK_CLIENT`.
///
/// Implementation-defined (§6); arbitrary but fixed so peers built
/// from this crate agree on it without negotiation.
pub const PARAM_NONCE: u16 = 0xCE55;

/// Length in bytes of the `PARAM_NONCE` payload (a host-endian u64).
pub const PARAM_NONCE_LEN: u16 = 8;

/// Control command ids (§6). Application data command ids are a
/// separate, caller-defined namespace — these only ever appear on
/// control-type messages.
pub const SERVER_HEARTBEAT: u16 = 1;
pub const SERVER_ACK_CLIENT: u16 = 2;
pub const SERVER_NACK_CLIENT: u16 = 3;
pub const CLIENT_HEARTBEAT: u16 = 4;
pub const CLIENT_ANNOUNCE: u16 = 5;
pub const CLIENT_DISCONNECT: u16 = 6;

/// Tunable knobs left implementation-defined upstream.
///
/// Collected up front as a plain value passed at construction time
/// rather than applied one option at a time after the fact —
/// Server/Client have no `set_option`-style call because every knob
/// here only matters before `connect`/`bind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Period of heartbeat emission, and the receive-timeout applied
    /// to the subscribe endpoint. Reference value: 500 ms.
    pub heartbeat_interval: Duration,

    /// Time since last traffic from a peer after which that peer is
    /// considered lost. Reference value: 10 s.
    pub connection_timeout: Duration,

    /// Maximum number of clients a `Server` will track at once.
    pub max_peers: usize,

    /// Maximum number of parameter items a single `DataList` may hold.
    pub max_params: usize,

    /// Maximum total payload bytes (sum of item lengths) a single
    /// `DataList` may hold.
    pub max_params_bytes: usize,
}

impl Config {
    pub const fn new() -> Config {
        Config {
            heartbeat_interval: Duration::from_millis(500),
            connection_timeout: Duration::from_secs(10),
            max_peers: 16,
            max_params: 16,
            max_params_bytes: 64 * 1024,
        }
    }
}

impl Default for Config {
    fn default() -> Config {
        Config::new()
    }
}

#[cfg(test)]
mod tests {
    use super::Config;

    #[test]
    fn defaults_match_reference_values() {
        let cfg = Config::default();

        assert_eq!(500, cfg.heartbeat_interval.as_millis());
        assert_eq!(10, cfg.connection_timeout.as_secs());
        assert!(cfg.max_peers >= 16);
        assert!(cfg.max_params >= 16);
    }
}
