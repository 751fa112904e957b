//! Chordnet: a Chord overlay network over pluggable point to point transports.
//! --------------
//! - [Did](crate::dht::Did) is the fixed width cyclic identifier every routing decision is made on.
//! - [PeerRing](crate::dht::PeerRing) keeps the finger table and predecessor of the local node.
//! - [OverlayNode](crate::dht::OverlayNode) runs the Chord protocol against [PeerHandle](crate::dht::PeerHandle)s,
//!   which are either the local node or a remote one reached over RPC.
//! - [CallLayer](crate::rpc::CallLayer) correlates requests and answers, retries on timeout and caches answers.
//! - [FileStore](crate::storage::FileStore) is a replicated key value store with ownership leases.
//! - [Lifecycle](crate::dht::Lifecycle) tracks how many ring neighbours are connected and gates maintenance.
//! - [Swarm](crate::swarm::Swarm) wires everything over a [chordnet_transport] transport.
//!
//! # Join
//!
//! There are three phases when node B joins the ring through node A.
//!
//! 1. Connect
//! - Node B dials the endpoint of node A. The transport handshake exchanges ids and listening endpoints.
//! 2. Find successor
//! - Node B asks node A to resolve the successor of B's id and connects to the answer.
//!   While B has no successor, everything it sends is relayed by A.
//! 3. Stabilize
//! - Periodic stabilization and finger fixing turn the partial view into a consistent ring,
//!   after which the lifecycle reaches `Stable` and keys are handed over to their new owners.
//!
//! # Envelope
//!
//! Every message is an [Envelope](crate::message::Envelope) addressed to an id, not to a connection.
//! Nodes forward envelopes along the ring until they reach the node responsible for the destination.
//! An envelope can be wrapped into a relayed one, which is how nodes without a ring position
//! still receive answers.

pub mod consts;
pub mod dht;
pub mod error;
pub mod inspect;
pub mod message;
pub mod rpc;
pub mod storage;
pub mod swarm;
#[cfg(test)]
mod tests;

pub use chordnet_transport;
