#![warn(missing_docs)]
//! Node assembly: transport, overlay, modules and the event loop.

mod builder;
/// Callback interface for swarm
pub mod callback;
mod transport;

use std::sync::Arc;

use bytes::Bytes;
pub use builder::RingConfig;
pub use builder::SwarmBuilder;
use chordnet_transport::core::transport::ConnectionState;
use futures_timer::Delay;
use tokio::sync::mpsc;
pub use transport::SwarmTransport;

use crate::dht::Did;
use crate::dht::Lifecycle;
use crate::dht::LifecycleEvent;
use crate::dht::LifecycleState;
use crate::dht::OverlayNode;
use crate::dht::PeerRing;
use crate::dht::StabilizeIntervals;
use crate::dht::Stabilizer;
use crate::dht::Transition;
use crate::error::Error;
use crate::error::Result;
use crate::inspect::SwarmInspect;
use crate::message::Envelope;
use crate::message::ModuleRegistry;
use crate::message::SharedModuleHandler;
use crate::rpc::CallLayer;
use crate::storage::FileStore;
use crate::storage::StoreStatus;
use crate::swarm::callback::SharedSwarmCallback;
use crate::swarm::callback::SwarmEvent;

/// Events queued for the swarm loop.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// An envelope arrived from a connection.
    Inbound(Envelope),
    /// An envelope the local node sent to itself.
    Loopback(Envelope),
    /// A connection changed its state. The ring state is already updated.
    ConnectionStateChange(Did, ConnectionState),
    /// The lifecycle entered a state.
    Entered(Transition),
}

/// A running node.
pub struct Swarm {
    pub(crate) transport: Arc<SwarmTransport>,
    pub(crate) dht: Arc<PeerRing>,
    lifecycle: Arc<Lifecycle>,
    overlay: Arc<OverlayNode>,
    store: Arc<FileStore>,
    registry: Arc<ModuleRegistry>,
    receiver: tokio::sync::Mutex<mpsc::UnboundedReceiver<TransportEvent>>,
    callback: SharedSwarmCallback,
    config: RingConfig,
}

impl Swarm {
    /// Get did of self.
    pub fn did(&self) -> Did {
        self.dht.did
    }

    /// Get DHT(Distributed Hash Table) of self.
    pub fn dht(&self) -> Arc<PeerRing> {
        self.dht.clone()
    }

    /// The transport of the overlay.
    pub fn transport(&self) -> Arc<SwarmTransport> {
        self.transport.clone()
    }

    /// The Chord protocol of this node.
    pub fn overlay(&self) -> Arc<OverlayNode> {
        self.overlay.clone()
    }

    /// The replicated store of this node.
    pub fn file_store(&self) -> Arc<FileStore> {
        self.store.clone()
    }

    /// Configuration the swarm was built with.
    pub fn config(&self) -> &RingConfig {
        &self.config
    }

    /// Current lifecycle state.
    pub fn state(&self) -> Result<LifecycleState> {
        self.lifecycle.state()
    }

    /// Register an application module. Envelopes for its id are dispatched to it.
    pub fn register_module(&self, module: SharedModuleHandler) -> Result<()> {
        self.registry.register(module)
    }

    /// A call layer for an application module, with the timing of this swarm.
    pub fn call_layer(&self, module: &str) -> Arc<CallLayer> {
        CallLayer::new(module, self.transport.clone(), self.config.call)
    }

    /// Join the ring through the node listening on `endpoint`, letting stabilization
    /// complete the neighbourhood.
    pub async fn join(&self, endpoint: &str) -> Result<Did> {
        let known = self.transport.connect_endpoint(endpoint).await?;
        self.overlay.stable_join(known).await?;
        Ok(known)
    }

    /// Join the ring through the node listening on `endpoint`, building the finger
    /// table at once.
    pub async fn join_aggressive(&self, endpoint: &str) -> Result<Did> {
        let known = self.transport.connect_endpoint(endpoint).await?;
        self.overlay.join(known).await?;
        Ok(known)
    }

    /// Close the connection to `peer`.
    pub async fn disconnect(&self, peer: Did) -> Result<()> {
        self.transport.disconnect(peer).await
    }

    /// Store a new item.
    pub async fn store(&self, key: &str, value: Bytes) -> Result<StoreStatus> {
        self.store.store(key, value).await
    }

    /// Replace the value of an owned item.
    pub async fn update(&self, key: &str, value: Bytes) -> Result<StoreStatus> {
        self.store.update(key, value).await
    }

    /// Read an item.
    pub async fn retrieve(&self, key: &str) -> Result<Option<Bytes>> {
        self.store.retrieve(key).await
    }

    /// Stop keeping an item alive.
    pub fn drop_ownership(&self, key: &str) -> Result<bool> {
        self.store.drop_ownership(key)
    }

    /// A stabilizer running the maintenance of this node.
    pub fn stabilizer(&self) -> Arc<Stabilizer> {
        Arc::new(Stabilizer::new(self.overlay.clone(), self.store.clone()))
    }

    /// Maintenance periods from the configuration.
    pub fn stabilize_intervals(&self) -> StabilizeIntervals {
        self.config.stabilize
    }

    /// Snapshot of the node.
    pub async fn inspect(&self) -> SwarmInspect {
        SwarmInspect::inspect(self).await
    }

    /// Process transport and lifecycle events until the transport goes away.
    /// Each event is handled on its own task.
    pub async fn listen(self: Arc<Self>) {
        let Ok(mut receiver) = self.receiver.try_lock() else {
            tracing::error!("swarm of {} is listening already", self.did());
            return;
        };
        while let Some(event) = receiver.recv().await {
            let this = self.clone();
            tokio::spawn(async move {
                this.handle_event(event)
                    .await
                    .unwrap_or_else(|e| tracing::debug!("swarm failed on handling event: {}", e));
            });
        }
        tracing::info!("swarm of {} stopped listening", self.did());
    }

    async fn handle_event(self: &Arc<Self>, event: TransportEvent) -> Result<()> {
        match event {
            TransportEvent::Inbound(envelope) => {
                if let Some(local) = self.transport.route(envelope).await? {
                    self.deliver(local).await?;
                }
            }
            TransportEvent::Loopback(envelope) => self.deliver(envelope).await?,
            TransportEvent::ConnectionStateChange(peer, state) => {
                if state.is_unavailable() {
                    self.overlay.forget(peer);
                }
                self.emit(SwarmEvent::ConnectionStateChange { peer, state })
                    .await;
            }
            TransportEvent::Entered(transition) => self.on_entered(transition).await,
        }
        Ok(())
    }

    async fn emit(&self, event: SwarmEvent) {
        if let Err(e) = self.callback.on_event(&event).await {
            tracing::error!("swarm callback failed on {:?}: {}", event, e);
        }
    }

    /// Hand an envelope addressed to the local node to its module.
    /// Relayed envelopes are unwrapped and routed on.
    async fn deliver(&self, envelope: Envelope) -> Result<()> {
        if let Some(inner) = envelope.unwrap_relayed()? {
            tracing::debug!("relay envelope of {} for {}", inner.src, inner.dest);
            return self
                .transport
                .send(inner.clamp_hops(self.transport.max_hops()))
                .await;
        }
        if let Err(e) = self.callback.on_inbound(&envelope).await {
            tracing::error!("swarm callback failed on inbound envelope: {}", e);
        }
        self.registry.dispatch(envelope).await
    }

    async fn on_entered(self: &Arc<Self>, transition: Transition) {
        self.emit(SwarmEvent::LifecycleChange(transition)).await;

        match transition.to {
            LifecycleState::External if transition.from.is_linked() => {
                let this = self.clone();
                tokio::spawn(async move {
                    if let Err(e) = this.rejoin().await {
                        tracing::warn!("rejoin of {} failed: {}", this.did(), e);
                    }
                });
            }
            LifecycleState::ExternalKnown => {
                let this = self.clone();
                tokio::spawn(async move {
                    Delay::new(this.config.known_timeout).await;
                    if !matches!(this.state(), Ok(LifecycleState::ExternalKnown)) {
                        return;
                    }
                    tracing::info!("{} did not join in time", this.did());
                    if let Err(e) = this.lifecycle.fire(LifecycleEvent::KnownTimeout) {
                        tracing::error!("failed to raise known timeout: {}", e);
                        return;
                    }
                    if let Err(e) = this.rejoin().await {
                        tracing::warn!("rejoin of {} failed: {}", this.did(), e);
                    }
                });
            }
            LifecycleState::Fragile => {
                let store = self.store.clone();
                tokio::spawn(async move {
                    match store.relocate_keys().await {
                        Ok(0) => {}
                        Ok(n) => tracing::info!("relocated {} items", n),
                        Err(e) => tracing::warn!("relocate keys failed: {}", e),
                    }
                });
            }
            _ => {}
        }
    }

    /// Join again through the known node, or any connected peer.
    async fn rejoin(&self) -> Result<()> {
        let mut candidates = vec![];
        if let Some(server) = self.transport.server()? {
            candidates.push(server);
        }
        candidates.extend(self.transport.get_connection_ids());
        candidates.dedup();

        for peer in candidates {
            if peer == self.did() || !self.transport.is_connected(peer) {
                continue;
            }
            match self.overlay.stable_join(peer).await {
                Ok(()) => return Ok(()),
                Err(e) => tracing::debug!("rejoin through {} failed: {}", peer, e),
            }
        }
        Err(Error::NotConnected)
    }
}
