use std::str::FromStr;
use std::sync::Arc;
use std::sync::Mutex;

use chordnet_transport::core::callback::SharedTransportCallback;
use chordnet_transport::core::transport::ConnectionState;
use chordnet_transport::core::transport::SharedTransport;
use chordnet_transport::core::transport::TransportMessage;
use chordnet_transport::error::Error as TransportError;
use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::dht::Did;
use crate::dht::Lifecycle;
use crate::dht::LifecycleEvent;
use crate::dht::LifecycleState;
use crate::dht::PeerRing;
use crate::error::Error;
use crate::error::Result;
use crate::message::Envelope;
use crate::swarm::TransportEvent;

/// SwarmTransport puts the overlay on top of a point to point transport.
/// It knows which peers are connected, where they listen, and how to move an
/// [Envelope] one step closer to its destination.
pub struct SwarmTransport {
    transport: SharedTransport,
    pub(crate) dht: Arc<PeerRing>,
    pub(crate) lifecycle: Arc<Lifecycle>,
    endpoints: DashMap<Did, String>,
    server: Mutex<Option<Did>>,
    event_sender: mpsc::UnboundedSender<TransportEvent>,
    max_hops: u8,
}

impl SwarmTransport {
    /// Create a SwarmTransport over a started or not yet started transport.
    pub fn new(
        transport: SharedTransport,
        dht: Arc<PeerRing>,
        lifecycle: Arc<Lifecycle>,
        event_sender: mpsc::UnboundedSender<TransportEvent>,
        max_hops: u8,
    ) -> Self {
        Self {
            transport,
            dht,
            lifecycle,
            endpoints: DashMap::new(),
            server: Mutex::new(None),
            event_sender,
            max_hops,
        }
    }

    /// Did of the local node.
    pub fn did(&self) -> Did {
        self.dht.did
    }

    /// Endpoint the local transport listens on.
    pub fn endpoint(&self) -> String {
        self.transport.endpoint()
    }

    /// Initial hops of a new envelope.
    pub fn max_hops(&self) -> u8 {
        self.max_hops
    }

    /// Start the underlying transport, announcing the local did as connection id.
    pub(crate) fn start(&self, callback: SharedTransportCallback) -> Result<()> {
        self.transport
            .start(&self.did().to_string(), callback)
            .map_err(Error::Transport)
    }

    /// Dids of all connections in transport.
    pub fn get_connection_ids(&self) -> Vec<Did> {
        self.transport
            .connection_ids()
            .into_iter()
            .filter_map(|k| Did::from_str(&k).ok())
            .collect()
    }

    /// State of the connection to `peer`.
    pub fn connection_state(&self, peer: Did) -> Option<ConnectionState> {
        self.transport.connection_state(&peer.to_string())
    }

    /// Whether an open connection to `peer` exists.
    pub fn is_connected(&self, peer: Did) -> bool {
        self.connection_state(peer) == Some(ConnectionState::Connected)
    }

    /// Record where `peer` listens.
    pub fn remember_endpoint(&self, peer: Did, endpoint: &str) {
        if peer != self.did() {
            self.endpoints.insert(peer, endpoint.to_string());
        }
    }

    /// Endpoint of `peer`, from handshakes or from discovery.
    pub fn endpoint_of(&self, peer: Did) -> Option<String> {
        if peer == self.did() {
            return Some(self.endpoint());
        }
        self.endpoints
            .get(&peer)
            .map(|e| e.value().clone())
            .or_else(|| self.transport.remote_endpoint(&peer.to_string()))
    }

    /// The node used as relay while this node has no ring position.
    pub fn server(&self) -> Result<Option<Did>> {
        self.server
            .lock()
            .map(|s| *s)
            .map_err(|_| Error::SwarmSyncLockError)
    }

    /// Set the relay node.
    pub fn set_server(&self, server: Option<Did>) -> Result<()> {
        *self.server.lock().map_err(|_| Error::SwarmSyncLockError)? = server;
        Ok(())
    }

    /// Dial an endpoint and return the did of the node behind it.
    pub async fn connect_endpoint(&self, endpoint: &str) -> Result<Did> {
        let cid = match self.transport.connect(endpoint).await {
            Ok(cid) => cid,
            Err(TransportError::ConnectionAlreadyExists(cid)) => cid,
            Err(e) => return Err(e.into()),
        };
        let peer = Did::from_str(&cid)?;
        self.remember_endpoint(peer, endpoint);
        self.on_connected(peer)?;
        Ok(peer)
    }

    /// Connect a given Did. If the did is already connected, return directly.
    /// Fails with [Error::TransportUnavailable] when no endpoint of `peer` is known.
    pub async fn connect(&self, peer: Did) -> Result<()> {
        if peer == self.did() || self.is_connected(peer) {
            return Ok(());
        }
        let endpoint = self
            .endpoint_of(peer)
            .ok_or(Error::TransportUnavailable(peer))?;
        let connected = self.connect_endpoint(&endpoint).await?;
        if connected != peer {
            tracing::warn!("endpoint {} of {} belongs to {}", endpoint, peer, connected);
            self.endpoints.remove(&peer);
            return Err(Error::TransportUnavailable(peer));
        }
        Ok(())
    }

    /// Close the connection to `peer`.
    /// Ring cleanup follows from the closed event of the transport.
    pub async fn disconnect(&self, peer: Did) -> Result<()> {
        tracing::info!("disconnect {peer}");
        self.transport
            .close_connection(&peer.to_string())
            .await
            .map_err(|e| e.into())
    }

    /// A connection came up: raise `NodeConnection`.
    pub(crate) fn on_connected(&self, peer: Did) -> Result<()> {
        if let Some(endpoint) = self.transport.remote_endpoint(&peer.to_string()) {
            self.endpoints.entry(peer).or_insert(endpoint);
        }
        self.lifecycle.fire(LifecycleEvent::NodeConnection)?;
        Ok(())
    }

    /// A connection went away: remove the peer from the ring state and raise the
    /// matching lifecycle event.
    pub(crate) fn on_disconnected(&self, peer: Did) -> Result<()> {
        let was_predecessor = self.dht.predecessor()? == Some(peer);
        let was_successor = self.dht.successor()? == peer;
        self.dht.remove(peer)?;

        let no_connection_left = !self
            .transport
            .connection_ids()
            .iter()
            .any(|cid| self.transport.connection_state(cid) == Some(ConnectionState::Connected));

        let event = if no_connection_left {
            Some(LifecycleEvent::DisconnectAll)
        } else if was_predecessor {
            Some(LifecycleEvent::DisconnectPredecessor)
        } else if was_successor {
            Some(LifecycleEvent::DisconnectSuccessor)
        } else {
            None
        };
        tracing::debug!("lost {}, raise {:?}", peer, event);
        if let Some(event) = event {
            self.lifecycle.fire(event)?;
        }
        Ok(())
    }

    pub(crate) fn emit(&self, event: TransportEvent) -> Result<()> {
        self.event_sender
            .send(event)
            .map_err(|_| Error::ChannelSendMessageFailed)
    }

    /// Send the encoded envelope over the connection to `peer`.
    pub async fn transmit(&self, peer: Did, envelope: &Envelope) -> Result<()> {
        let data = envelope.to_bincode()?;
        self.transport
            .send_message(&peer.to_string(), TransportMessage::Custom(data.to_vec()))
            .await
            .map_err(|e| {
                tracing::debug!("transmit to {} failed: {}", peer, e);
                Error::TransportUnavailable(peer)
            })
    }

    /// Route an envelope and hand it over.
    /// Envelopes for the local node come back through the event loop.
    pub async fn send(&self, envelope: Envelope) -> Result<()> {
        if let Some(local) = self.route(envelope).await? {
            self.emit(TransportEvent::Loopback(local))?;
        }
        Ok(())
    }

    /// Send `reply` to a request. A request that came through a relay is
    /// answered through the same relay.
    pub async fn reply(&self, request: &Envelope, reply: Envelope) -> Result<()> {
        match request.proxy {
            Some(proxy) if proxy != self.did() => {
                let wrapped = reply.wrap_relayed(proxy, self.max_hops)?;
                self.send(wrapped).await
            }
            _ => self.send(reply).await,
        }
    }

    fn relay(&self) -> Result<Option<Did>> {
        if let Some(server) = self.server()? {
            if self.is_connected(server) {
                return Ok(Some(server));
            }
        }
        Ok(self
            .get_connection_ids()
            .into_iter()
            .find(|peer| self.is_connected(*peer)))
    }

    /// The successor when it is connected, otherwise the connected peer closest
    /// before `dest`.
    fn reachable_successor(&self, dest: Did) -> Result<Did> {
        let succ = self.dht.successor()?;
        if succ == self.did() || self.is_connected(succ) {
            return Ok(succ);
        }
        Ok(self
            .get_connection_ids()
            .into_iter()
            .filter(|peer| self.is_connected(*peer))
            .min_by_key(|peer| dest - *peer)
            .unwrap_or(succ))
    }

    /// Move `envelope` one step. Returns it back when the local node is its destination.
    pub async fn route(&self, mut envelope: Envelope) -> Result<Option<Envelope>> {
        let me = self.did();
        let dest = envelope.dest;
        if dest == me {
            return Ok(Some(envelope));
        }
        if !envelope.hop() {
            tracing::warn!("drop envelope for {}, no hop left", dest);
            return Err(Error::EnvelopeHopsExhausted(dest));
        }
        if self.is_connected(dest) {
            self.transmit(dest, &envelope).await?;
            return Ok(None);
        }

        let next = match self.lifecycle.state()? {
            LifecycleState::Disconnected => return Err(Error::TransportUnavailable(dest)),
            LifecycleState::External | LifecycleState::ExternalKnown => {
                if envelope.is_relayed() {
                    return Err(Error::TransportUnavailable(dest));
                }
                let relay = self.relay()?.ok_or(Error::TransportUnavailable(dest))?;
                tracing::debug!("relay envelope for {} through {}", dest, relay);
                let wrapped = envelope.wrap_relayed(relay, self.max_hops)?;
                self.transmit(relay, &wrapped).await?;
                return Ok(None);
            }
            LifecycleState::Partial => self.reachable_successor(dest)?,
            LifecycleState::Origin | LifecycleState::Fragile | LifecycleState::Stable => {
                if self.dht.is_responsible(dest)? {
                    return Ok(Some(envelope));
                }
                let closest = self.dht.closest_preceding_finger(dest)?;
                if closest == me || !self.is_connected(closest) {
                    self.reachable_successor(dest)?
                } else {
                    closest
                }
            }
        };

        if next == me {
            return Ok(Some(envelope));
        }
        tracing::debug!("forward envelope for {} to {}", dest, next);
        self.transmit(next, &envelope).await?;
        Ok(None)
    }
}
