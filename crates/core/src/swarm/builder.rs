#![warn(missing_docs)]
//! This module provider [SwarmBuilder] and it's interface for
//! [Swarm]

use std::sync::Arc;
use std::time::Duration;

use chordnet_transport::core::transport::SharedTransport;
use tokio::sync::mpsc;

use crate::consts::CHORD_RPC_MODULE;
use crate::consts::DEFAULT_FIX_FINGERS_INTERVAL_MS;
use crate::consts::DEFAULT_ID_WIDTH;
use crate::consts::DEFAULT_KNOWN_TIMEOUT_MS;
use crate::consts::DEFAULT_MAX_HOPS;
use crate::consts::DEFAULT_RELOCATE_INTERVAL_MS;
use crate::consts::DEFAULT_STABILIZE_INTERVAL_MS;
use crate::consts::FILE_STORE_MODULE;
use crate::dht::Did;
use crate::dht::Lifecycle;
use crate::dht::OverlayNode;
use crate::dht::PeerRing;
use crate::dht::StabilizeIntervals;
use crate::error::Error;
use crate::error::Result;
use crate::message::ModuleRegistry;
use crate::rpc::CallConfig;
use crate::rpc::CallLayer;
use crate::rpc::ChordRpc;
use crate::storage::crypto::NodeKey;
use crate::storage::FileStore;
use crate::storage::StoreConfig;
use crate::swarm::callback::InnerSwarmCallback;
use crate::swarm::callback::SharedSwarmCallback;
use crate::swarm::callback::SwarmCallback;
use crate::swarm::Swarm;
use crate::swarm::SwarmTransport;
use crate::swarm::TransportEvent;

struct DefaultCallback;
impl SwarmCallback for DefaultCallback {}

/// Tunables of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingConfig {
    /// Identifier width in bits.
    pub id_width: usize,
    /// Initial hops of every envelope.
    pub max_hops: u8,
    /// Timing of remote calls.
    pub call: CallConfig,
    /// Timing of stored items.
    pub store: StoreConfig,
    /// Time a node may stay in `ExternalKnown` before joining again.
    pub known_timeout: Duration,
    /// Whether the node starts a ring of its own.
    pub origin: bool,
    /// Maintenance periods.
    pub stabilize: StabilizeIntervals,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            id_width: DEFAULT_ID_WIDTH,
            max_hops: DEFAULT_MAX_HOPS,
            call: CallConfig::default(),
            store: StoreConfig::default(),
            known_timeout: Duration::from_millis(DEFAULT_KNOWN_TIMEOUT_MS),
            origin: false,
            stabilize: StabilizeIntervals {
                stabilize: Duration::from_millis(DEFAULT_STABILIZE_INTERVAL_MS),
                fix_fingers: Duration::from_millis(DEFAULT_FIX_FINGERS_INTERVAL_MS),
                relocate: Duration::from_millis(DEFAULT_RELOCATE_INTERVAL_MS),
            },
        }
    }
}

/// Creates a SwarmBuilder to configure a Swarm.
pub struct SwarmBuilder {
    transport: SharedTransport,
    config: RingConfig,
    did: Option<Did>,
    node_key: Option<NodeKey>,
    callback: Option<SharedSwarmCallback>,
}

impl SwarmBuilder {
    /// Creates new instance of [SwarmBuilder] over a transport that is not started yet.
    pub fn new(transport: SharedTransport) -> Self {
        SwarmBuilder {
            transport,
            config: RingConfig::default(),
            did: None,
            node_key: None,
            callback: None,
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: RingConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets up the identifier width. Ignored when a did is given.
    pub fn id_width(mut self, width: usize) -> Self {
        self.config.id_width = width;
        self
    }

    /// Use a fixed did instead of the hash of the node key.
    pub fn did(mut self, did: Did) -> Self {
        self.did = Some(did);
        self
    }

    /// Start a ring of our own.
    pub fn origin(mut self, origin: bool) -> Self {
        self.config.origin = origin;
        self
    }

    /// Setup timing of remote calls.
    pub fn call_config(mut self, call: CallConfig) -> Self {
        self.config.call = call;
        self
    }

    /// Setup initial hops of envelopes.
    pub fn max_hops(mut self, max_hops: u8) -> Self {
        self.config.max_hops = max_hops;
        self
    }

    /// Setup lifetime of stored items.
    pub fn item_duration(mut self, duration: Duration) -> Self {
        self.config.store.item_duration = duration;
        self
    }

    /// Setup keep-alive period of owned items.
    pub fn item_refresh(mut self, period: Duration) -> Self {
        self.config.store.item_refresh = period;
        self
    }

    /// Setup how long a node waits in `ExternalKnown`.
    pub fn known_timeout(mut self, timeout: Duration) -> Self {
        self.config.known_timeout = timeout;
        self
    }

    /// Setup maintenance periods.
    pub fn stabilize_intervals(mut self, intervals: StabilizeIntervals) -> Self {
        self.config.stabilize = intervals;
        self
    }

    /// Use a given node key.
    pub fn node_key(mut self, key: NodeKey) -> Self {
        self.node_key = Some(key);
        self
    }

    /// Bind callback for Swarm.
    pub fn callback(mut self, callback: SharedSwarmCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Try build for `Swarm`. Starts the transport and, for an origin node,
    /// enters the `Origin` state.
    pub fn build(self) -> Result<Swarm> {
        let mut config = self.config;
        let node_key = self.node_key.unwrap_or_else(NodeKey::random);
        let did = match self.did {
            Some(did) => did,
            None => Did::hash_key(&node_key.public_key(), config.id_width)?,
        };
        config.id_width = did.width();
        if config.max_hops == 0 {
            return Err(Error::InvalidConfig("max_hops must be positive".to_string()));
        }

        let (event_sender, receiver) = mpsc::unbounded_channel();
        let dht = Arc::new(PeerRing::new(did));

        let hook_sender = event_sender.clone();
        let lifecycle = Arc::new(Lifecycle::new(
            dht.clone(),
            config.origin,
            Box::new(move |transition| {
                if hook_sender
                    .send(TransportEvent::Entered(transition))
                    .is_err()
                {
                    tracing::debug!("swarm is gone, drop {:?}", transition);
                }
            }),
        ));

        let transport = Arc::new(SwarmTransport::new(
            self.transport,
            dht.clone(),
            lifecycle.clone(),
            event_sender,
            config.max_hops,
        ));
        transport.start(Arc::new(InnerSwarmCallback::new(transport.clone())))?;

        let chord_rpc = CallLayer::new(CHORD_RPC_MODULE, transport.clone(), config.call);
        let overlay = Arc::new(OverlayNode::new(transport.clone(), chord_rpc));
        let store_rpc = CallLayer::new(FILE_STORE_MODULE, transport.clone(), config.call);
        let store = FileStore::new(transport.clone(), store_rpc, node_key, config.store);

        let registry = Arc::new(ModuleRegistry::new());
        registry.register(Arc::new(ChordRpc::new(overlay.clone())))?;
        registry.register(store.clone())?;

        lifecycle.start()?;
        tracing::info!("swarm {} built, listening on {}", did, transport.endpoint());

        let callback = self
            .callback
            .unwrap_or_else(|| Arc::new(DefaultCallback {}));

        Ok(Swarm {
            transport,
            dht,
            lifecycle,
            overlay,
            store,
            registry,
            receiver: tokio::sync::Mutex::new(receiver),
            callback,
            config,
        })
    }
}
