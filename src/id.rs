// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

use rand::RngCore;

/// Reserved topic id to which every server subscribes; even, nonzero.
/// Never assigned to a node as its own id.
pub const SERVER_BROADCAST: u16 = 0xFFFE;

/// Reserved topic id to which every client subscribes; odd.
/// Never assigned to a node as its own id.
pub const CLIENT_BROADCAST: u16 = 0xFFFF;

/// The class of a node, carried as the low bit (parity) of its id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeClass {
    Server,
    Client,
}

impl NodeClass {
    /// The class-broadcast topic a node of this class subscribes to.
    pub fn own_broadcast(&self) -> u16 {
        match *self {
            NodeClass::Server => SERVER_BROADCAST,
            NodeClass::Client => CLIENT_BROADCAST,
        }
    }

    /// The class-broadcast topic this node's peers subscribe to.
    pub fn peer_broadcast(&self) -> u16 {
        match *self {
            NodeClass::Server => CLIENT_BROADCAST,
            NodeClass::Client => SERVER_BROADCAST,
        }
    }

    fn parity_bit(&self) -> u16 {
        match *self {
            NodeClass::Server => 0,
            NodeClass::Client => 1,
        }
    }

    /// Whether `id` is a legal id for a node of this class: matching
    /// parity and not equal to either reserved broadcast topic.
    pub fn matches(&self, id: u16) -> bool {
        id != SERVER_BROADCAST && id != CLIENT_BROADCAST && (id & 1) == self.parity_bit()
    }
}

/// Draws ids from `rng` until one satisfies `class`'s parity and isn't
/// one of the two reserved broadcast topics.
pub fn generate_id(class: NodeClass, rng: &mut dyn RngCore) -> u16 {
    loop {
        let candidate = rng.next_u32() as u16;

        if class.matches(candidate) {
            return candidate;
        }
    }
}

/// Whether `sender` claims to be one of the two class-broadcast
/// topics — a broadcast id is never a legitimate message sender.
pub fn is_broadcast(sender: u16) -> bool {
    sender == SERVER_BROADCAST || sender == CLIENT_BROADCAST
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn generated_server_ids_are_even_and_not_reserved() {
        let mut rng = StdRng::seed_from_u64(42);

        for _ in 0..256 {
            let id = generate_id(NodeClass::Server, &mut rng);
            assert_eq!(0, id & 1);
            assert_ne!(SERVER_BROADCAST, id);
            assert_ne!(CLIENT_BROADCAST, id);
        }
    }

    #[test]
    fn generated_client_ids_are_odd_and_not_reserved() {
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..256 {
            let id = generate_id(NodeClass::Client, &mut rng);
            assert_eq!(1, id & 1);
            assert_ne!(SERVER_BROADCAST, id);
            assert_ne!(CLIENT_BROADCAST, id);
        }
    }

    #[test]
    fn broadcast_detection() {
        assert!(is_broadcast(SERVER_BROADCAST));
        assert!(is_broadcast(CLIENT_BROADCAST));
        assert!(!is_broadcast(4));
        assert!(!is_broadcast(5));
    }

    #[test]
    fn peer_broadcast_is_the_other_class() {
        assert_eq!(CLIENT_BROADCAST, NodeClass::Server.peer_broadcast());
        assert_eq!(SERVER_BROADCAST, NodeClass::Client.peer_broadcast());
    }
}
