//! The Chord protocol of the local node.
#![warn(missing_docs)]
use std::sync::Arc;

use dashmap::DashMap;

use crate::dht::peer::LocalNode;
use crate::dht::peer::RemoteNode;
use crate::dht::Did;
use crate::dht::Lifecycle;
use crate::dht::LifecycleEvent;
use crate::dht::PeerHandle;
use crate::dht::PeerRing;
use crate::dht::RingNode;
use crate::error::Error;
use crate::error::Result;
use crate::rpc::CallLayer;
use crate::swarm::SwarmTransport;

/// OverlayNode runs join, stabilization and lookups against local and remote handles.
/// The ring state itself lives in [PeerRing]; remote handles are kept in a directory,
/// at most one per did.
pub struct OverlayNode {
    pub(crate) dht: Arc<PeerRing>,
    pub(crate) lifecycle: Arc<Lifecycle>,
    pub(crate) transport: Arc<SwarmTransport>,
    rpc: Arc<CallLayer>,
    directory: DashMap<Did, Arc<RemoteNode>>,
}

impl OverlayNode {
    /// Create the overlay of a node.
    pub fn new(transport: Arc<SwarmTransport>, rpc: Arc<CallLayer>) -> Self {
        Self {
            dht: transport.dht.clone(),
            lifecycle: transport.lifecycle.clone(),
            transport,
            rpc,
            directory: DashMap::new(),
        }
    }

    /// Did of the local node.
    pub fn did(&self) -> Did {
        self.dht.did
    }

    /// Endpoint the local node listens on.
    pub fn endpoint(&self) -> String {
        self.transport.endpoint()
    }

    /// Call layer of the `ChordRPC` module.
    pub fn rpc(&self) -> Arc<CallLayer> {
        self.rpc.clone()
    }

    /// Resolve a did into a handle.
    pub fn handle(self: &Arc<Self>, did: Did) -> PeerHandle {
        if did == self.did() {
            PeerHandle::Local(LocalNode::new(self.clone()))
        } else {
            PeerHandle::Remote(self.remote(did))
        }
    }

    /// The remote handle of `did`, created on first use.
    pub fn remote(&self, did: Did) -> Arc<RemoteNode> {
        self.directory
            .entry(did)
            .or_insert_with(|| Arc::new(RemoteNode::new(did, self.rpc.clone())))
            .clone()
    }

    /// Drop the remote handle of a lost peer.
    pub fn forget(&self, did: Did) {
        self.directory.remove(&did);
    }

    /// Make sure an open connection to `node` exists.
    /// An unknown endpoint is asked from the node itself, through the overlay.
    pub async fn ensure_connected(&self, node: Did) -> Result<()> {
        if node == self.did() || self.transport.is_connected(node) {
            return Ok(());
        }
        if self.transport.endpoint_of(node).is_none() {
            let endpoint = self.remote(node).endpoint().await.map_err(|e| {
                tracing::debug!("failed to learn endpoint of {}: {}", node, e);
                Error::TransportUnavailable(node)
            })?;
            self.transport.remember_endpoint(node, &endpoint);
        }
        self.transport.connect(node).await
    }

    /// First entry of finger table.
    pub fn successor(&self) -> Result<Did> {
        self.dht.successor()
    }

    /// Predecessor of the local node.
    pub fn predecessor(&self) -> Result<Option<Did>> {
        self.dht.predecessor()
    }

    /// Connect to `node` when needed, install it as successor and raise `SetSuccessor`.
    pub async fn set_successor(&self, node: Did) -> Result<()> {
        if node != self.did() {
            self.ensure_connected(node).await?;
        }
        self.dht.set_successor(node)?;
        tracing::debug!("{} set successor {}", self.did(), node);
        if node != self.did() {
            self.lifecycle.fire(LifecycleEvent::SetSuccessor)?;
        }
        Ok(())
    }

    /// Install the predecessor and raise `SetPredecessor` when it is another node.
    pub fn set_predecessor(&self, node: Option<Did>) -> Result<()> {
        self.dht.set_predecessor(node)?;
        tracing::debug!("{} set predecessor {:?}", self.did(), node);
        if matches!(node, Some(p) if p != self.did()) {
            self.lifecycle.fire(LifecycleEvent::SetPredecessor)?;
        }
        Ok(())
    }

    /// Closest known node strictly preceding `id`.
    pub fn closest_preceding_finger(&self, id: Did) -> Result<Did> {
        self.dht.closest_preceding_finger(id)
    }

    /// Walk the ring towards `id` and return the node whose successor is responsible for it.
    /// The walk takes at most `2 * width` steps, then fails with [Error::LookupNotConverged].
    pub async fn find_predecessor(self: &Arc<Self>, id: Did) -> Result<Did> {
        let mut current = self.did();
        for _ in 0..self.dht.width() * 2 {
            let node = self.handle(current);
            let succ = node.successor().await?;
            if id.in_left_open(current, succ) {
                return Ok(current);
            }
            let next = node.closest_preceding_finger(id).await?;
            if next != current {
                current = next;
                continue;
            }
            if succ == current {
                return Ok(current);
            }
            current = succ;
        }
        tracing::warn!("find_predecessor of {} did not converge, stop at {}", id, current);
        Err(Error::LookupNotConverged(id))
    }

    /// Node responsible for `id`.
    pub async fn find_successor(self: &Arc<Self>, id: Did) -> Result<Did> {
        let pred = self.find_predecessor(id).await?;
        self.handle(pred).successor().await
    }

    /// Accept `node` for finger `index` when it is closer than the current entry,
    /// then pass it on to the predecessor.
    pub async fn update_finger_table(self: &Arc<Self>, node: Did, index: usize) -> Result<()> {
        if node == self.did() {
            return Ok(());
        }
        if !self.dht.update_finger(index, node)? {
            return Ok(());
        }
        tracing::debug!("{} finger {} updated to {}", self.did(), index, node);
        if index == 0 {
            if let Err(e) = self.ensure_connected(node).await {
                tracing::warn!("cannot connect new successor {}: {}", node, e);
            }
            self.lifecycle.fire(LifecycleEvent::SetSuccessor)?;
        }
        match self.dht.predecessor()? {
            Some(pred) if pred != self.did() && pred != node => {
                self.handle(pred).update_finger_table(node, index).await
            }
            _ => Ok(()),
        }
    }

    /// `candidate` thinks it might be our predecessor.
    pub fn notify(&self, candidate: Did) -> Result<()> {
        if self.dht.notify(candidate)? {
            tracing::debug!("{} adopt predecessor {}", self.did(), candidate);
            if candidate != self.did() {
                self.lifecycle.fire(LifecycleEvent::SetPredecessor)?;
            }
        }
        Ok(())
    }

    /// Verify the successor, adopt its predecessor when it sits between us,
    /// and tell the successor about us.
    pub async fn stabilize(self: &Arc<Self>) -> Result<()> {
        if !self.lifecycle.state()?.allows_maintenance() {
            return Ok(());
        }
        let me = self.did();
        let mut succ = self.dht.successor()?;

        if let Some(x) = self.handle(succ).predecessor().await? {
            if x.in_open(me, succ) {
                match self.set_successor(x).await {
                    Ok(()) => succ = x,
                    Err(e) => tracing::warn!("[stabilize] cannot adopt successor {}: {}", x, e),
                }
            }
        }
        if succ == me {
            return Ok(());
        }

        let succ = self.handle(succ);
        succ.notify(me).await?;

        let confirmed = succ.predecessor().await? == Some(me);
        let has_predecessor = matches!(self.dht.predecessor()?, Some(p) if p != me);
        if confirmed && has_predecessor {
            self.lifecycle.fire(LifecycleEvent::Confirmed)?;
        }
        Ok(())
    }

    /// Refresh one random finger.
    pub async fn fix_fingers(self: &Arc<Self>) -> Result<()> {
        if !self.lifecycle.state()?.allows_maintenance() {
            return Ok(());
        }
        let Some((index, start)) = self.dht.random_finger_start()? else {
            return Ok(());
        };
        let node = self.find_successor(start).await?;
        tracing::debug!("fix finger {} ({}) to {}", index, start, node);
        self.dht.set_finger(index, node)
    }

    /// Join the ring through `known` and leave the rest to stabilization.
    pub async fn stable_join(self: &Arc<Self>, known: Did) -> Result<()> {
        tracing::info!("{} join through {}", self.did(), known);
        self.dht.set_predecessor(None)?;
        self.transport.set_server(Some(known))?;
        self.lifecycle.fire(LifecycleEvent::Known)?;

        let succ = self.handle(known).find_successor(self.did()).await?;
        tracing::info!("{} found successor {}", self.did(), succ);
        self.set_successor(succ).await
    }

    /// Join the ring through `known`, building the whole finger table at once and
    /// updating the fingers of the nodes that should point at us.
    pub async fn join(self: &Arc<Self>, known: Did) -> Result<()> {
        tracing::info!("{} aggressive join through {}", self.did(), known);
        self.transport.set_server(Some(known))?;
        self.lifecycle.fire(LifecycleEvent::Known)?;
        self.init_finger_table(known).await?;
        self.update_others().await
    }

    async fn init_finger_table(self: &Arc<Self>, known: Did) -> Result<()> {
        let me = self.did();
        let known = self.handle(known);
        let starts: Vec<Did> = {
            let finger = self.dht.lock_finger()?;
            finger.entries().iter().map(|f| f.start).collect()
        };
        let Some(first) = starts.first() else {
            return Ok(());
        };

        let succ = known.find_successor(*first).await?;
        self.set_successor(succ).await?;
        let succ_handle = self.handle(succ);
        let pred = succ_handle.predecessor().await?;
        self.set_predecessor(pred)?;
        succ_handle.set_predecessor(Some(me)).await?;

        let mut node = succ;
        for (index, start) in starts.iter().enumerate().skip(1) {
            if !start.in_right_open(me, node) {
                node = known.find_successor(*start).await?;
            }
            self.dht.set_finger(index, node)?;
        }
        Ok(())
    }

    async fn update_others(self: &Arc<Self>) -> Result<()> {
        let me = self.did();
        for index in 0..self.dht.width() {
            let target = me - Did::power_of_two(index, self.dht.width())?;
            let pred = match self.find_predecessor(target).await {
                Ok(pred) => pred,
                Err(e) => {
                    tracing::warn!("update_others cannot find predecessor of {}: {}", target, e);
                    continue;
                }
            };
            if pred == me {
                continue;
            }
            if let Err(e) = self.handle(pred).update_finger_table(me, index).await {
                tracing::warn!("update_others failed on {}: {}", pred, e);
            }
        }
        Ok(())
    }
}
