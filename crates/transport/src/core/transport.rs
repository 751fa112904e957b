//! This module contains the [ConnectionInterface] and [TransportInterface] traits.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;

use crate::core::callback::SharedTransportCallback;
use crate::error::Result;

/// The message that is sent through a connection.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[non_exhaustive]
pub enum TransportMessage {
    /// Opaque bytes produced by the upper layer.
    Custom(Vec<u8>),
}

/// The first frame exchanged on every new connection.
/// Each side announces the id it wants to be known by and the endpoint it listens on.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Handshake {
    /// Connection id of the sender, remote side will use it to name the connection.
    pub cid: String,
    /// Endpoint of the sender that others can dial.
    pub endpoint: String,
}

/// The state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum ConnectionState {
    /// Connection is created but the handshake is not finished.
    New,
    /// Handshake is in progress.
    Connecting,
    /// Connection is ready for sending messages.
    Connected,
    /// Remote side went away, the connection will be closed soon.
    Disconnected,
    /// Connection failed with an io error.
    Failed,
    /// Connection is closed and released.
    Closed,
}

impl ConnectionState {
    /// A connection in these states can be replaced or cleaned.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            ConnectionState::Disconnected | ConnectionState::Failed | ConnectionState::Closed
        )
    }
}

/// Operations on a single established connection.
#[async_trait]
pub trait ConnectionInterface {
    /// Error type of this connection.
    type Error: std::error::Error;

    /// Send a message to the remote peer, messages are delivered in order.
    async fn send_message(&self, msg: TransportMessage) -> std::result::Result<(), Self::Error>;

    /// Current state of the connection.
    fn connection_state(&self) -> ConnectionState;

    /// Close the connection and notify the remote side.
    async fn close(&self) -> std::result::Result<(), Self::Error>;
}

/// A transport creates, keeps and closes connections.
/// Connections are addressed by their cid, which is the cid announced by the remote peer.
#[async_trait]
pub trait TransportInterface {
    /// The endpoint this transport listens on.
    fn endpoint(&self) -> String;

    /// Register the local cid and the callback, then start accepting connections.
    /// Must be called once before [TransportInterface::connect].
    fn start(&self, cid: &str, callback: SharedTransportCallback) -> Result<()>;

    /// Dial an endpoint, perform the handshake and return the cid of the remote peer.
    async fn connect(&self, endpoint: &str) -> Result<String>;

    /// Close and release the connection of `cid`.
    async fn close_connection(&self, cid: &str) -> Result<()>;

    /// Send message to the connection of `cid`.
    async fn send_message(&self, cid: &str, msg: TransportMessage) -> Result<()>;

    /// State of the connection of `cid`, None if there is no such connection.
    fn connection_state(&self, cid: &str) -> Option<ConnectionState>;

    /// Ids of all the connections in pool.
    fn connection_ids(&self) -> Vec<String>;

    /// The endpoint announced by the remote peer of `cid`.
    fn remote_endpoint(&self, cid: &str) -> Option<String>;
}

/// Shared transport trait object used by the upper layer.
pub type SharedTransport = Arc<dyn TransportInterface + Send + Sync>;
