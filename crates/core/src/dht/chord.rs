//! Ring state of the local node.
#![warn(missing_docs)]
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use rand::Rng;

use super::FingerTable;
use crate::dht::Did;
use crate::error::Error;
use crate::error::Result;

/// PeerRing holds what the local node knows about its place on the ring.
/// All nodes form a clockwise ring in the order of Did. The protocol that keeps
/// this state correct lives in [OverlayNode](crate::dht::OverlayNode); every method here
/// is synchronous and never holds a lock across an await point.
pub struct PeerRing {
    /// The did of current node.
    pub did: Did,
    /// [FingerTable] help node to find successor quickly.
    /// The first entry is the successor.
    pub finger: Arc<Mutex<FingerTable>>,
    /// The did of previous node on the ring.
    /// `None` means unknown, `Some(self)` means the node is alone.
    pub predecessor: Arc<Mutex<Option<Did>>>,
}

impl PeerRing {
    /// Create a new ring state for a node that knows nobody.
    pub fn new(did: Did) -> Self {
        Self {
            did,
            finger: Arc::new(Mutex::new(FingerTable::new(did))),
            predecessor: Arc::new(Mutex::new(None)),
        }
    }

    /// Width of the identifier space.
    pub fn width(&self) -> usize {
        self.did.width()
    }

    /// Return finger table guard, map poisoned lock into [Error::DHTSyncLockError].
    pub fn lock_finger(&self) -> Result<MutexGuard<FingerTable>> {
        self.finger.lock().map_err(|_| Error::DHTSyncLockError)
    }

    /// Return predecessor guard, map poisoned lock into [Error::DHTSyncLockError].
    pub fn lock_predecessor(&self) -> Result<MutexGuard<Option<Did>>> {
        self.predecessor.lock().map_err(|_| Error::DHTSyncLockError)
    }

    /// The first entry of finger table.
    pub fn successor(&self) -> Result<Did> {
        Ok(self.lock_finger()?.successor())
    }

    /// Copy of the predecessor slot.
    pub fn predecessor(&self) -> Result<Option<Did>> {
        Ok(*self.lock_predecessor()?)
    }

    /// Lock the predecessor, then the finger table, and run `f` on both.
    /// Methods touching both locks go through here, so the order is always
    /// predecessor then finger table.
    fn with_ring<T, F>(&self, f: F) -> Result<T>
    where F: FnOnce(&mut Option<Did>, &mut FingerTable) -> T {
        let mut pred = self.lock_predecessor()?;
        let mut finger = self.lock_finger()?;
        Ok(f(&mut *pred, &mut *finger))
    }

    /// Install `did` as successor, then clamp the table to the predecessor.
    pub fn set_successor(&self, did: Did) -> Result<()> {
        self.set_finger(0, did)
    }

    /// Install the predecessor, then clamp the table to it.
    pub fn set_predecessor(&self, pred: Option<Did>) -> Result<()> {
        self.with_ring(|slot, finger| {
            *slot = pred;
            finger.clamp(pred);
        })
    }

    /// Install `did` into entry `index`, then clamp the table to the predecessor.
    pub fn set_finger(&self, index: usize, did: Did) -> Result<()> {
        self.with_ring(|pred, finger| {
            finger.set(index, did);
            finger.clamp(*pred);
        })
    }

    /// Local part of `update_finger_table`: accept `node` for entry `index`
    /// when it lies in `[self, finger[index].node)`.
    /// Returns whether the entry changed.
    pub fn update_finger(&self, index: usize, node: Did) -> Result<bool> {
        if node == self.did {
            return Ok(false);
        }
        let me = self.did;
        self.with_ring(|pred, finger| {
            let Some(current) = finger.get(index).map(|f| f.node) else {
                return false;
            };
            if !node.in_right_open(me, current) {
                return false;
            }
            finger.set(index, node);
            finger.clamp(*pred);
            true
        })
    }

    /// Closest node preceding `id` known by the finger table, self if none.
    pub fn closest_preceding_finger(&self, id: Did) -> Result<Did> {
        Ok(self.lock_finger()?.closest_preceding(id))
    }

    /// Local decision of `notify`: adopt `candidate` when predecessor is unknown,
    /// when the node is alone, or when `candidate` lies in `(predecessor, self)`.
    /// Returns whether the candidate was adopted.
    pub fn notify(&self, candidate: Did) -> Result<bool> {
        let me = self.did;
        self.with_ring(|pred, finger| {
            let adopt = match *pred {
                None => true,
                Some(p) if p == me => candidate != me,
                Some(p) => candidate.in_open(p, me),
            };
            if adopt {
                *pred = Some(candidate);
                finger.clamp(Some(candidate));
            }
            adopt
        })
    }

    /// Whether the local node is responsible for `id`:
    /// predecessor unknown, the node is alone, or `id` lies in `(predecessor, self]`.
    /// A lone node is matched before the interval test, because `(self, self]`
    /// excludes its coincident bound and so would miss `self`.
    pub fn is_responsible(&self, id: Did) -> Result<bool> {
        Ok(match self.predecessor()? {
            None => true,
            Some(pred) if pred == self.did => true,
            Some(pred) => id.in_left_open(pred, self.did),
        })
    }

    /// Pick a random finger index in `1..width` and its start, for finger fixing.
    pub fn random_finger_start(&self) -> Result<Option<(usize, Did)>> {
        let finger = self.lock_finger()?;
        if finger.len() < 2 {
            return Ok(None);
        }
        let index = rand::thread_rng().gen_range(1..finger.len());
        Ok(finger.get(index).map(|f| (index, f.start)))
    }

    /// Forget everything: fingers point at self and predecessor is unknown.
    pub fn reset(&self) -> Result<()> {
        self.with_ring(|pred, finger| {
            *pred = None;
            finger.reset();
        })
    }

    /// Point every finger back at self, keep the predecessor.
    pub fn reset_fingers(&self) -> Result<()> {
        self.lock_finger()?.reset();
        Ok(())
    }

    /// Become the only node of a ring: fingers and predecessor are self.
    pub fn become_alone(&self) -> Result<()> {
        let me = self.did;
        self.with_ring(|pred, finger| {
            *pred = Some(me);
            finger.reset();
        })
    }

    /// Remove a lost peer from the finger table and the predecessor slot.
    pub fn remove(&self, did: Did) -> Result<()> {
        self.with_ring(|pred, finger| {
            if *pred == Some(did) {
                *pred = None;
            }
            finger.remove(did);
        })
    }
}
