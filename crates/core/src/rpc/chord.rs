//! The `ChordRPC` module: ring maintenance calls between nodes.
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;

use crate::consts::CHORD_RPC_MODULE;
use crate::dht::Did;
use crate::dht::OverlayNode;
use crate::error::Error;
use crate::error::Result;
use crate::message::Envelope;
use crate::message::ModuleHandler;
use crate::rpc::IncomingRequest;

/// Methods of the `ChordRPC` module, named on the wire in camelCase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString, strum::AsRefStr)]
#[strum(serialize_all = "camelCase")]
pub enum ChordMethod {
    /// `() -> Did`
    Successor,
    /// `() -> Option<Did>`
    Predecessor,
    /// `Did -> ()`
    SetSuccessor,
    /// `Option<Did> -> ()`
    SetPredecessor,
    /// `Did -> Did`
    FindSuccessor,
    /// `Did -> Did`
    FindPredecessor,
    /// `Did -> Did`
    ClosestPrecedingFinger,
    /// `(Did, u32) -> ()`
    UpdateFingerTable,
    /// `Did -> ()`
    Notify,
    /// `() -> String`
    GetEndpoint,
}

fn encode<T: Serialize>(value: &T) -> Result<Bytes> {
    bincode::serialize(value)
        .map(Bytes::from)
        .map_err(Error::BincodeSerialize)
}

/// Serves [ChordMethod]s from the local overlay.
pub struct ChordRpc {
    overlay: Arc<OverlayNode>,
}

impl ChordRpc {
    /// Serve the calls of `overlay`.
    pub fn new(overlay: Arc<OverlayNode>) -> Self {
        Self { overlay }
    }

    async fn execute(&self, request: &IncomingRequest) -> Result<Bytes> {
        let method = ChordMethod::from_str(&request.method).map_err(|_| {
            Error::UnknownMethod(CHORD_RPC_MODULE.to_string(), request.method.clone())
        })?;
        let overlay = &self.overlay;

        match method {
            ChordMethod::Successor => encode(&overlay.successor()?),
            ChordMethod::Predecessor => encode(&overlay.predecessor()?),
            ChordMethod::SetSuccessor => {
                let node: Did = request.params()?;
                encode(&overlay.set_successor(node).await?)
            }
            ChordMethod::SetPredecessor => {
                let node: Option<Did> = request.params()?;
                encode(&overlay.set_predecessor(node)?)
            }
            ChordMethod::FindSuccessor => {
                let id: Did = request.params()?;
                encode(&overlay.find_successor(id).await?)
            }
            ChordMethod::FindPredecessor => {
                let id: Did = request.params()?;
                encode(&overlay.find_predecessor(id).await?)
            }
            ChordMethod::ClosestPrecedingFinger => {
                let id: Did = request.params()?;
                encode(&overlay.closest_preceding_finger(id)?)
            }
            ChordMethod::UpdateFingerTable => {
                let (node, index): (Did, u32) = request.params()?;
                encode(&overlay.update_finger_table(node, index as usize).await?)
            }
            ChordMethod::Notify => {
                let candidate: Did = request.params()?;
                encode(&overlay.notify(candidate)?)
            }
            ChordMethod::GetEndpoint => encode(&overlay.endpoint()),
        }
    }
}

#[async_trait]
impl ModuleHandler for ChordRpc {
    fn module_id(&self) -> &str {
        CHORD_RPC_MODULE
    }

    async fn handle(&self, envelope: Envelope) -> Result<()> {
        let rpc = self.overlay.rpc();
        let Some(request) = rpc.delegate(envelope).await? else {
            return Ok(());
        };

        // ring calls address a node, not an id range
        if request.envelope.dest != self.overlay.did() {
            tracing::debug!(
                "reject {} addressed to {}, not a node",
                request.method,
                request.envelope.dest
            );
            return rpc
                .reject(&request, &format!("{} is not a node", request.envelope.dest))
                .await;
        }

        match self.execute(&request).await {
            Ok(result) => rpc.answer(&request, result).await,
            Err(e) => {
                tracing::debug!("{} {} failed: {}", CHORD_RPC_MODULE, request.method, e);
                rpc.reject(&request, &e.to_string()).await
            }
        }
    }
}
