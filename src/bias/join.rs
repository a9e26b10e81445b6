//! Fan-in bookkeeping for composite biases waiting on children.
//!
//! A composite registers every child it is about to query *before* calling
//! it. A child result may then arrive in three ways: returned directly,
//! delivered by notification while the call is still running, or delivered
//! later. The join fires only once it has been armed (all children were
//! called) and nothing is pending any more, so a synchronous notification can
//! never complete it early.

use crate::track_set::{TrackCollectionPtr, TrackSet};

enum Slot {
    Expected,
    Waiting,
    Done(TrackSet),
    Skipped,
}

/// Counted join over all children of an And/Or/Not bias.
pub(crate) struct Join {
    universe: TrackCollectionPtr,
    slots: Vec<Slot>,
    armed: bool,
}

impl Join {
    pub(crate) fn new(universe: &TrackCollectionPtr, children: usize) -> Self {
        Self {
            universe: universe.clone(),
            slots: (0..children).map(|_| Slot::Expected).collect(),
            armed: false,
        }
    }

    pub(crate) fn universe(&self) -> &TrackCollectionPtr {
        &self.universe
    }

    /// Records the value a child returned from `matching_tracks`.
    pub(crate) fn returned(&mut self, index: usize, set: TrackSet) {
        let Some(slot) = self.slots.get_mut(index) else {
            return;
        };
        match slot {
            // the notification beat the return value
            Slot::Done(_) | Slot::Skipped => {}
            Slot::Expected | Slot::Waiting if set.is_outstanding() => *slot = Slot::Waiting,
            Slot::Expected | Slot::Waiting => *slot = Self::checked(&self.universe, set),
        }
    }

    /// Records a result that arrived by notification. Returns `false` if the
    /// child was not awaited or the set belongs to another universe.
    pub(crate) fn delivered(&mut self, index: usize, set: TrackSet) -> bool {
        if !set.belongs_to(&self.universe) {
            log::debug!("Ignoring result for another universe.");
            return false;
        }
        match self.slots.get_mut(index) {
            Some(slot @ (Slot::Expected | Slot::Waiting)) => {
                *slot = Slot::Done(set);
                true
            }
            _ => false,
        }
    }

    /// Gives up on everything not yet answered. Used when the outcome can no
    /// longer change.
    pub(crate) fn settle(&mut self) {
        for slot in &mut self.slots {
            if matches!(slot, Slot::Expected | Slot::Waiting) {
                *slot = Slot::Skipped;
            }
        }
    }

    pub(crate) fn arm(&mut self) {
        self.armed = true;
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.armed
    }

    pub(crate) fn pending(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| matches!(slot, Slot::Expected | Slot::Waiting))
            .count()
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.armed && self.pending() == 0
    }

    pub(crate) fn results(&self) -> impl Iterator<Item = &TrackSet> {
        self.slots.iter().filter_map(|slot| match slot {
            Slot::Done(set) => Some(set),
            _ => None,
        })
    }

    fn checked(universe: &TrackCollectionPtr, set: TrackSet) -> Slot {
        assert!(
            set.belongs_to(universe),
            "child returned a TrackSet from a different universe"
        );
        Slot::Done(set)
    }
}

/// Wait state for biases that query one child at a time (IfElse, Part).
pub(crate) struct PendingChild {
    pub(crate) index: usize,
    armed: bool,
    delivered: Option<TrackSet>,
}

/// What to do with a result that arrived by notification.
pub(crate) enum Arrival {
    /// Not the child we wait for.
    Ignored,
    /// Arrived while the direct call is still running; it will be picked up
    /// when the call returns.
    Parked,
    /// The caller already got an outstanding set; this result must be
    /// forwarded.
    Forward(TrackSet),
}

impl PendingChild {
    pub(crate) fn new(index: usize) -> Self {
        Self {
            index,
            armed: false,
            delivered: None,
        }
    }

    /// Handles the direct return of the awaited child. Returns the concrete
    /// result, or `None` when the caller must wait.
    pub(crate) fn returned(&mut self, set: TrackSet) -> Option<TrackSet> {
        if !set.is_outstanding() {
            return Some(set);
        }
        match self.delivered.take() {
            Some(parked) => Some(parked),
            None => {
                self.armed = true;
                None
            }
        }
    }

    pub(crate) fn arrived(&mut self, index: usize, set: TrackSet) -> Arrival {
        if index != self.index {
            return Arrival::Ignored;
        }
        if self.armed {
            Arrival::Forward(set)
        } else {
            self.delivered = Some(set);
            Arrival::Parked
        }
    }
}
