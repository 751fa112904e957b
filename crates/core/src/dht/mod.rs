#![warn(missing_docs)]
//! Implementation of the overlay's DHT,
//! which is based on CHORD, ref: <https://pdos.csail.mit.edu/papers/ton:chord/paper-ton.pdf>
//! With high probability, the number of nodes that must be contacted to find a successor in an N-node network is O(log N).

mod chord;
pub mod did;
/// Finger table of the local node
pub mod finger;
/// Connectivity state machine gating maintenance
pub mod lifecycle;
pub mod node;
pub mod peer;
mod stabilization;

pub use chord::PeerRing;
pub use did::Did;
pub use finger::Finger;
pub use finger::FingerTable;
pub use lifecycle::Lifecycle;
pub use lifecycle::LifecycleEvent;
pub use lifecycle::LifecycleState;
pub use lifecycle::Transition;
pub use node::OverlayNode;
pub use peer::LocalNode;
pub use peer::PeerHandle;
pub use peer::RemoteNode;
pub use peer::RingNode;
pub use stabilization::StabilizeIntervals;
pub use stabilization::Stabilizer;

