use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chordnet_transport::core::callback::TransportCallback;
use chordnet_transport::core::transport::ConnectionState;

use crate::dht::lifecycle::Transition;
use crate::dht::Did;
use crate::message::Envelope;
use crate::swarm::SwarmTransport;
use crate::swarm::TransportEvent;

type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// The [InnerSwarmCallback] will accept shared [SwarmCallback] trait object.
pub type SharedSwarmCallback = Arc<dyn SwarmCallback + Send + Sync>;

/// Used to notify the application of events that occur in the swarm.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum SwarmEvent {
    /// Indicates that the connection state of a peer has changed.
    ConnectionStateChange {
        /// The did of remote peer.
        peer: Did,
        /// The final state of the connection.
        state: ConnectionState,
    },
    /// The lifecycle entered a state.
    LifecycleChange(Transition),
}

/// Any object that implements this trait can be used as a callback for the swarm.
#[async_trait]
pub trait SwarmCallback {
    /// This method is invoked when an envelope reached a module of this node.
    async fn on_inbound(&self, _envelope: &Envelope) -> Result<(), CallbackError> {
        Ok(())
    }

    /// This method is invoked after the Swarm handling.
    async fn on_event(&self, _event: &SwarmEvent) -> Result<(), CallbackError> {
        Ok(())
    }
}

/// [InnerSwarmCallback] receives the events of the transport.
/// Messages are queued for the swarm loop, connection changes update the ring state at once.
pub struct InnerSwarmCallback {
    transport: Arc<SwarmTransport>,
}

impl InnerSwarmCallback {
    /// Create a new [InnerSwarmCallback] with the provided transport.
    pub fn new(transport: Arc<SwarmTransport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl TransportCallback for InnerSwarmCallback {
    async fn on_message(&self, cid: &str, msg: &[u8]) -> Result<(), CallbackError> {
        let envelope = Envelope::from_bincode(msg)?;
        tracing::trace!("received envelope from {}: {:?}", cid, envelope);
        self.transport.emit(TransportEvent::Inbound(envelope))?;
        Ok(())
    }

    async fn on_peer_connection_state_change(
        &self,
        cid: &str,
        s: ConnectionState,
    ) -> Result<(), CallbackError> {
        let Ok(did) = Did::from_str(cid) else {
            tracing::warn!("on_peer_connection_state_change parse did failed: {}", cid);
            return Ok(());
        };

        match s {
            ConnectionState::Connected => {
                self.transport.on_connected(did)?;
            }
            ConnectionState::Failed
            | ConnectionState::Disconnected
            | ConnectionState::Closed => {
                self.transport.on_disconnected(did)?;
            }
            _ => {}
        };

        self.transport
            .emit(TransportEvent::ConnectionStateChange(did, s))?;
        Ok(())
    }
}
