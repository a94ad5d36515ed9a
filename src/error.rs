// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

use std::io;

use thiserror::Error;

/// The error taxonomy of the library's public API.
///
/// `fatal` conditions (allocation failure, a poisoned synchronization
/// primitive, a reception thread that fails to spawn) are not part of
/// this enum: they abort the process, the way a systems library treats
/// resource exhaustion.
#[derive(Debug, Error)]
pub enum CmcpError {
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("node already initialized")]
    AlreadyInitialized,

    #[error("capacity exceeded: {0}")]
    Capacity(&'static str),

    #[error("lookup failed: {0}")]
    Lookup(&'static str),

    #[error("not connected")]
    NotConnected,

    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, CmcpError>;
