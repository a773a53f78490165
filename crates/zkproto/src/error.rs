// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use thiserror::Error;

/// Errors produced by the wire codec and device session layers.
///
/// Nothing here is retried at this layer; the session pool and the control
/// loops decide whether a failure tears the connection down.
#[derive(Debug, Error)]
pub enum ZkError {
    /// TCP connect did not complete within the configured timeout.
    #[error("connect to {endpoint} timed out or was refused")]
    ConnectTimeout { endpoint: String },

    /// The device refused the comm-key handshake.
    #[error("device rejected authentication")]
    AuthRejected,

    /// The socket failed mid-operation; the session is unusable.
    #[error("connection lost: {0}")]
    ConnLost(String),

    /// No event frame arrived within the event-poll timeout.
    #[error("timed out waiting for device event")]
    EventTimeout,

    /// A frame could not be parsed as a ZKTeco packet.
    #[error("malformed frame: {0}")]
    ProtocolDecode(String),

    /// The device answered with a status other than ACK_OK.
    #[error("device rejected command (status {code})")]
    DeviceRejected { code: u16 },
}

pub type Result<T> = std::result::Result<T, ZkError>;
