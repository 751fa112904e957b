//! Connection lifecycle of a node.
//!
//! The state tells how much of its ring neighbourhood a node is connected to, and gates
//! which maintenance jobs may run. [transition] is a pure function of `(state, event)`;
//! entering a state has side effects, the synchronous ones run inside [Lifecycle::fire],
//! the asynchronous ones are handed to the swarm through the `on_enter` hook.
#![warn(missing_docs)]
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;

use serde::Deserialize;
use serde::Serialize;

use crate::dht::PeerRing;
use crate::error::Error;
use crate::error::Result;

/// States of the lifecycle.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
pub enum LifecycleState {
    /// No connection at all.
    Disconnected,
    /// First node of a ring, alone.
    Origin,
    /// Connected to some peer but not part of the ring.
    External,
    /// Like [LifecycleState::External], with a known node to join through.
    ExternalKnown,
    /// Successor is known.
    Partial,
    /// Successor and predecessor are known.
    Fragile,
    /// Successor confirmed us as its predecessor.
    Stable,
}

/// Events driving the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum LifecycleEvent {
    /// A transport connection came up.
    NodeConnection,
    /// The node is configured as the first node of a ring.
    StartOrigin,
    /// A successor other than self was installed.
    SetSuccessor,
    /// A predecessor other than self was installed.
    SetPredecessor,
    /// A node to join through is known.
    Known,
    /// Joining through the known node took too long.
    KnownTimeout,
    /// Successor reported us as its predecessor.
    Confirmed,
    /// Connection to the successor was lost.
    DisconnectSuccessor,
    /// Connection to the predecessor was lost.
    DisconnectPredecessor,
    /// The last connection was lost.
    DisconnectAll,
}

/// A state change, including re-entry of the same state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// State before the event.
    pub from: LifecycleState,
    /// State entered.
    pub to: LifecycleState,
    /// The event.
    pub event: LifecycleEvent,
}

impl LifecycleState {
    /// States in which the node holds a position on the ring.
    pub fn is_linked(&self) -> bool {
        matches!(self, Self::Partial | Self::Fragile | Self::Stable)
    }

    /// Stabilize and finger fixing only run when the node is on the ring, or is the origin.
    pub fn allows_maintenance(&self) -> bool {
        !matches!(self, Self::Disconnected | Self::External | Self::ExternalKnown)
    }

    /// Keys are only handed over once both neighbours are known.
    pub fn allows_relocation(&self) -> bool {
        matches!(self, Self::Fragile | Self::Stable)
    }
}

/// The transition table. `None` means the event is ignored in this state.
pub fn transition(state: LifecycleState, event: LifecycleEvent) -> Option<LifecycleState> {
    use LifecycleEvent as E;
    use LifecycleState as S;

    match (state, event) {
        (S::Disconnected, E::NodeConnection) => Some(S::External),
        (S::Disconnected, E::StartOrigin) => Some(S::Origin),

        (S::Origin, E::SetSuccessor) => Some(S::Partial),

        (S::External | S::ExternalKnown, E::SetSuccessor) => Some(S::Partial),
        (S::External | S::ExternalKnown, E::Known) => Some(S::ExternalKnown),
        (S::External | S::ExternalKnown, E::DisconnectAll) => Some(S::Disconnected),
        (S::ExternalKnown, E::KnownTimeout) => Some(S::External),

        (S::Partial, E::SetPredecessor) => Some(S::Fragile),
        (S::Partial, E::DisconnectSuccessor) => Some(S::External),
        (S::Partial, E::DisconnectAll) => Some(S::Disconnected),

        (S::Fragile | S::Stable, E::DisconnectSuccessor) => Some(S::External),
        (S::Fragile | S::Stable, E::DisconnectPredecessor) => Some(S::Partial),
        (S::Fragile | S::Stable, E::DisconnectAll) => Some(S::Disconnected),
        (S::Fragile | S::Stable, E::SetPredecessor) => Some(S::Fragile),
        (S::Fragile, E::Confirmed) => Some(S::Stable),

        _ => None,
    }
}

type EnterHook = Box<dyn Fn(Transition) + Send + Sync>;

/// The lifecycle state machine of a node.
pub struct Lifecycle {
    state: Mutex<LifecycleState>,
    origin: bool,
    dht: Arc<PeerRing>,
    on_enter: EnterHook,
}

impl Lifecycle {
    /// Create a lifecycle in [LifecycleState::Disconnected].
    /// `on_enter` is invoked for every entered state, after the synchronous effects ran.
    pub fn new(dht: Arc<PeerRing>, origin: bool, on_enter: EnterHook) -> Self {
        Self {
            state: Mutex::new(LifecycleState::Disconnected),
            origin,
            dht,
            on_enter,
        }
    }

    /// Current state.
    pub fn state(&self) -> Result<LifecycleState> {
        self.state
            .lock()
            .map(|s| *s)
            .map_err(|_| Error::DHTSyncLockError)
    }

    /// Apply the Disconnected entry effect once, raising `StartOrigin` for an origin node.
    pub fn start(&self) -> Result<Vec<Transition>> {
        self.dht.reset()?;
        if self.origin {
            return self.fire(LifecycleEvent::StartOrigin);
        }
        Ok(vec![])
    }

    /// Feed an event, run the synchronous entry effects, including events they raise,
    /// and return every transition taken.
    pub fn fire(&self, event: LifecycleEvent) -> Result<Vec<Transition>> {
        let mut taken = vec![];
        let mut queue = VecDeque::from([event]);
        let mut state = self.state.lock().map_err(|_| Error::DHTSyncLockError)?;

        while let Some(event) = queue.pop_front() {
            let Some(next) = transition(*state, event) else {
                tracing::debug!("lifecycle ignores {} in {}", event, *state);
                continue;
            };
            if next == *state && next != LifecycleState::Fragile {
                continue;
            }
            let t = Transition {
                from: *state,
                to: next,
                event,
            };
            *state = next;
            tracing::info!("lifecycle {} -> {} on {}", t.from, t.to, t.event);

            match next {
                LifecycleState::Disconnected => {
                    self.dht.reset()?;
                    if self.origin {
                        queue.push_back(LifecycleEvent::StartOrigin);
                    }
                }
                LifecycleState::Origin => self.dht.become_alone()?,
                LifecycleState::External if t.from.is_linked() => self.dht.reset_fingers()?,
                LifecycleState::Partial => {
                    if let Some(pred) = self.dht.predecessor()? {
                        if pred != self.dht.did {
                            queue.push_back(LifecycleEvent::SetPredecessor);
                        }
                    }
                }
                _ => {}
            }
            taken.push(t);
        }
        drop(state);

        for t in taken.iter() {
            (self.on_enter)(*t);
        }
        Ok(taken)
    }
}
