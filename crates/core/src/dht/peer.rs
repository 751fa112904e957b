//! Handles to ring participants.
#![warn(missing_docs)]
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::dht::Did;
use crate::dht::OverlayNode;
use crate::error::Result;
use crate::rpc::CallLayer;
use crate::rpc::ChordMethod;

/// The Chord operations every ring participant answers.
/// Ids are returned instead of handles, resolve them with [OverlayNode::handle].
#[async_trait]
pub trait RingNode {
    /// Did of the node.
    fn did(&self) -> Did;

    /// First entry of the finger table.
    async fn successor(&self) -> Result<Did>;

    /// Predecessor, `None` when unknown.
    async fn predecessor(&self) -> Result<Option<Did>>;

    /// Install a successor.
    async fn set_successor(&self, node: Did) -> Result<()>;

    /// Install a predecessor.
    async fn set_predecessor(&self, node: Option<Did>) -> Result<()>;

    /// Node responsible for `id`.
    async fn find_successor(&self, id: Did) -> Result<Did>;

    /// Node whose successor is responsible for `id`.
    async fn find_predecessor(&self, id: Did) -> Result<Did>;

    /// Closest known node strictly preceding `id`.
    async fn closest_preceding_finger(&self, id: Did) -> Result<Did>;

    /// Offer `node` for finger `index`.
    async fn update_finger_table(&self, node: Did, index: usize) -> Result<()>;

    /// `candidate` thinks it might be our predecessor.
    async fn notify(&self, candidate: Did) -> Result<()>;

    /// Endpoint the node listens on.
    async fn endpoint(&self) -> Result<String>;
}

/// The local node seen through [RingNode].
#[derive(Clone)]
pub struct LocalNode {
    overlay: Arc<OverlayNode>,
}

impl LocalNode {
    /// Wrap the local overlay.
    pub fn new(overlay: Arc<OverlayNode>) -> Self {
        Self { overlay }
    }
}

/// A remote node, every operation is a call of the `ChordRPC` module.
pub struct RemoteNode {
    did: Did,
    rpc: Arc<CallLayer>,
}

impl RemoteNode {
    /// Create a handle for `did` calling through `rpc`.
    pub fn new(did: Did, rpc: Arc<CallLayer>) -> Self {
        Self { did, rpc }
    }

    async fn call<P, R>(&self, method: ChordMethod, params: &P) -> Result<R>
    where
        P: Serialize + Sync,
        R: DeserializeOwned,
    {
        self.rpc
            .call_typed(self.did, method.as_ref(), params)
            .await
    }
}

/// Either the local node or a remote one.
#[derive(Clone)]
pub enum PeerHandle {
    /// The local node.
    Local(LocalNode),
    /// A node reached over RPC.
    Remote(Arc<RemoteNode>),
}

#[async_trait]
impl RingNode for LocalNode {
    fn did(&self) -> Did {
        self.overlay.did()
    }

    async fn successor(&self) -> Result<Did> {
        self.overlay.successor()
    }

    async fn predecessor(&self) -> Result<Option<Did>> {
        self.overlay.predecessor()
    }

    async fn set_successor(&self, node: Did) -> Result<()> {
        self.overlay.set_successor(node).await
    }

    async fn set_predecessor(&self, node: Option<Did>) -> Result<()> {
        self.overlay.set_predecessor(node)
    }

    async fn find_successor(&self, id: Did) -> Result<Did> {
        self.overlay.find_successor(id).await
    }

    async fn find_predecessor(&self, id: Did) -> Result<Did> {
        self.overlay.find_predecessor(id).await
    }

    async fn closest_preceding_finger(&self, id: Did) -> Result<Did> {
        self.overlay.closest_preceding_finger(id)
    }

    async fn update_finger_table(&self, node: Did, index: usize) -> Result<()> {
        self.overlay.update_finger_table(node, index).await
    }

    async fn notify(&self, candidate: Did) -> Result<()> {
        self.overlay.notify(candidate)
    }

    async fn endpoint(&self) -> Result<String> {
        Ok(self.overlay.endpoint())
    }
}

#[async_trait]
impl RingNode for RemoteNode {
    fn did(&self) -> Did {
        self.did
    }

    async fn successor(&self) -> Result<Did> {
        self.call(ChordMethod::Successor, &()).await
    }

    async fn predecessor(&self) -> Result<Option<Did>> {
        self.call(ChordMethod::Predecessor, &()).await
    }

    async fn set_successor(&self, node: Did) -> Result<()> {
        self.call(ChordMethod::SetSuccessor, &node).await
    }

    async fn set_predecessor(&self, node: Option<Did>) -> Result<()> {
        self.call(ChordMethod::SetPredecessor, &node).await
    }

    async fn find_successor(&self, id: Did) -> Result<Did> {
        self.call(ChordMethod::FindSuccessor, &id).await
    }

    async fn find_predecessor(&self, id: Did) -> Result<Did> {
        self.call(ChordMethod::FindPredecessor, &id).await
    }

    async fn closest_preceding_finger(&self, id: Did) -> Result<Did> {
        self.call(ChordMethod::ClosestPrecedingFinger, &id).await
    }

    async fn update_finger_table(&self, node: Did, index: usize) -> Result<()> {
        self.call(ChordMethod::UpdateFingerTable, &(node, index as u32))
            .await
    }

    async fn notify(&self, candidate: Did) -> Result<()> {
        self.call(ChordMethod::Notify, &candidate).await
    }

    async fn endpoint(&self) -> Result<String> {
        self.call(ChordMethod::GetEndpoint, &()).await
    }
}

#[async_trait]
impl RingNode for PeerHandle {
    fn did(&self) -> Did {
        match self {
            PeerHandle::Local(n) => n.did(),
            PeerHandle::Remote(n) => n.did(),
        }
    }

    async fn successor(&self) -> Result<Did> {
        match self {
            PeerHandle::Local(n) => n.successor().await,
            PeerHandle::Remote(n) => n.successor().await,
        }
    }

    async fn predecessor(&self) -> Result<Option<Did>> {
        match self {
            PeerHandle::Local(n) => n.predecessor().await,
            PeerHandle::Remote(n) => n.predecessor().await,
        }
    }

    async fn set_successor(&self, node: Did) -> Result<()> {
        match self {
            PeerHandle::Local(n) => n.set_successor(node).await,
            PeerHandle::Remote(n) => n.set_successor(node).await,
        }
    }

    async fn set_predecessor(&self, node: Option<Did>) -> Result<()> {
        match self {
            PeerHandle::Local(n) => n.set_predecessor(node).await,
            PeerHandle::Remote(n) => n.set_predecessor(node).await,
        }
    }

    async fn find_successor(&self, id: Did) -> Result<Did> {
        match self {
            PeerHandle::Local(n) => n.find_successor(id).await,
            PeerHandle::Remote(n) => n.find_successor(id).await,
        }
    }

    async fn find_predecessor(&self, id: Did) -> Result<Did> {
        match self {
            PeerHandle::Local(n) => n.find_predecessor(id).await,
            PeerHandle::Remote(n) => n.find_predecessor(id).await,
        }
    }

    async fn closest_preceding_finger(&self, id: Did) -> Result<Did> {
        match self {
            PeerHandle::Local(n) => n.closest_preceding_finger(id).await,
            PeerHandle::Remote(n) => n.closest_preceding_finger(id).await,
        }
    }

    async fn update_finger_table(&self, node: Did, index: usize) -> Result<()> {
        match self {
            PeerHandle::Local(n) => n.update_finger_table(node, index).await,
            PeerHandle::Remote(n) => n.update_finger_table(node, index).await,
        }
    }

    async fn notify(&self, candidate: Did) -> Result<()> {
        match self {
            PeerHandle::Local(n) => n.notify(candidate).await,
            PeerHandle::Remote(n) => n.notify(candidate).await,
        }
    }

    async fn endpoint(&self) -> Result<String> {
        match self {
            PeerHandle::Local(n) => n.endpoint().await,
            PeerHandle::Remote(n) => n.endpoint().await,
        }
    }
}
