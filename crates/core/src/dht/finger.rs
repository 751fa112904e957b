#![warn(missing_docs)]
use std::ops::Index;

use serde::Deserialize;
use serde::Serialize;

use crate::dht::Did;

/// One routing entry: the ring position `owner + 2^i` and the node believed to own it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finger {
    /// `owner + 2^i mod 2^width`
    pub start: Did,
    /// Node believed responsible for `start`.
    pub node: Did,
}

/// Finger table of Chord DHT.
/// A fresh table describes a lone node: every entry points at the owner itself.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FingerTable {
    did: Did,
    finger: Vec<Finger>,
}

impl FingerTable {
    /// builder
    pub fn new(did: Did) -> Self {
        let finger = (0..did.width())
            .map(|i| Finger {
                start: did.offset_pow2(i),
                node: did,
            })
            .collect();
        Self { did, finger }
    }

    /// Number of entries, equals the identifier width.
    pub fn len(&self) -> usize {
        self.finger.len()
    }

    /// is empty
    pub fn is_empty(&self) -> bool {
        self.finger.is_empty()
    }

    /// The successor is always the node of the first entry.
    pub fn successor(&self) -> Did {
        self.finger.first().map(|f| f.node).unwrap_or(self.did)
    }

    /// getter
    pub fn get(&self, index: usize) -> Option<&Finger> {
        self.finger.get(index)
    }

    /// setter
    pub fn set(&mut self, index: usize, node: Did) {
        tracing::debug!("set finger table index: {} did: {}", index, node);
        let Some(entry) = self.finger.get_mut(index) else {
            tracing::error!("set finger index out of range, index: {}", index);
            return;
        };
        entry.node = node;
    }

    /// Point every entry back at the owner.
    pub fn reset(&mut self) {
        for entry in self.finger.iter_mut() {
            entry.node = self.did;
        }
    }

    /// No finger may point further around the ring than the predecessor.
    /// Entries beyond it are replaced by the predecessor.
    /// A missing predecessor, or the owner itself, leaves the table untouched.
    pub fn clamp(&mut self, predecessor: Option<Did>) {
        let Some(pred) = predecessor else {
            return;
        };
        if pred == self.did {
            return;
        }
        let limit = pred - self.did;
        for entry in self.finger.iter_mut() {
            if entry.node - self.did > limit {
                tracing::debug!("clamp finger {} to predecessor {}", entry.node, pred);
                entry.node = pred;
            }
        }
    }

    /// remove a node from dht finger table.
    /// Each entry pointing at `did` takes the next later entry that points at another peer,
    /// or the owner when there is none.
    pub fn remove(&mut self, did: Did) {
        if did == self.did {
            return;
        }
        for idx in (0..self.finger.len()).rev() {
            if self.finger[idx].node != did {
                continue;
            }
            let fix_id = self.finger[idx + 1..]
                .iter()
                .map(|f| f.node)
                .find(|n| *n != did && *n != self.did)
                .unwrap_or(self.did);
            self.finger[idx].node = fix_id;
        }
    }

    /// Check finger is contains some node
    pub fn contains(&self, did: Did) -> bool {
        self.finger.iter().any(|f| f.node == did)
    }

    /// Scan from the farthest entry to the nearest one and return the first node
    /// strictly between the owner and `did`, or the owner if none matches.
    pub fn closest_preceding(&self, did: Did) -> Did {
        self.finger
            .iter()
            .rev()
            .map(|f| f.node)
            .find(|node| node.in_open(self.did, did))
            .unwrap_or(self.did)
    }

    /// get finger list
    pub fn list(&self) -> Vec<Did> {
        self.finger.iter().map(|f| f.node).collect()
    }

    /// All entries, nearest first.
    pub fn entries(&self) -> &[Finger] {
        &self.finger
    }
}

impl Index<usize> for FingerTable {
    type Output = Finger;
    fn index(&self, index: usize) -> &Self::Output {
        &self.finger[index]
    }
}
