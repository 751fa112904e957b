//! This module contains the [TransportCallback] trait.

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::transport::ConnectionState;

type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// Any object that implements this trait can be used as a callback for a transport.
/// The `cid` argument is the connection id announced by the remote peer.
#[async_trait]
pub trait TransportCallback {
    /// This method is invoked on a message arrival from the connection.
    async fn on_message(&self, _cid: &str, _msg: &[u8]) -> Result<(), CallbackError> {
        Ok(())
    }

    /// This method is invoked when the state of a connection has changed.
    async fn on_peer_connection_state_change(
        &self,
        _cid: &str,
        _state: ConnectionState,
    ) -> Result<(), CallbackError> {
        Ok(())
    }
}

/// The callback shared by every connection of a transport.
pub type SharedTransportCallback = Arc<dyn TransportCallback + Send + Sync>;
