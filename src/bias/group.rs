//! The set algebra composites: And, Or and Not.

use super::composite::{announce_replacement, ChildList, CompositeBias};
use super::join::Join;
use super::{lock, Bias, BiasEvent, BiasId, BiasListener, BiasPtr, Fragment, Notifier};
use crate::track::TrackPtr;
use crate::track_set::{TrackCollectionPtr, TrackSet};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, Weak};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupMode {
    /// Intersection of the children.
    And,
    /// Union of the children.
    Or,
    /// Everything no child accepts.
    Not,
}

impl GroupMode {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            GroupMode::And => "andBias",
            GroupMode::Or => "orBias",
            GroupMode::Not => "notBias",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "andBias" => Some(GroupMode::And),
            "orBias" => Some(GroupMode::Or),
            "notBias" => Some(GroupMode::Not),
            _ => None,
        }
    }

    /// Whether the results gathered so far already fix the outcome.
    fn decided(self, join: &Join) -> bool {
        match self {
            GroupMode::And => join.results().any(TrackSet::is_empty),
            GroupMode::Or | GroupMode::Not => union(join).is_full(),
        }
    }

    fn aggregate(self, join: &Join) -> TrackSet {
        match self {
            GroupMode::And => {
                let mut result = TrackSet::new(join.universe(), true);
                for set in join.results() {
                    result.intersect(set);
                }
                result
            }
            GroupMode::Or => union(join),
            GroupMode::Not => {
                let mut result = TrackSet::new(join.universe(), true);
                result.subtract(&union(join));
                result
            }
        }
    }
}

fn union(join: &Join) -> TrackSet {
    let mut result = TrackSet::new(join.universe(), false);
    for set in join.results() {
        result.unite(set);
    }
    result
}

/// Composite combining its children with set algebra.
pub struct GroupBias {
    id: BiasId,
    me: Weak<GroupBias>,
    mode: GroupMode,
    notifier: Notifier,
    children: ChildList,
    join: Mutex<Option<Join>>,
}

impl GroupBias {
    #[must_use]
    pub fn new(mode: GroupMode) -> Arc<Self> {
        Self::with_children(mode, Vec::new())
    }

    #[must_use]
    pub fn with_children(mode: GroupMode, children: Vec<BiasPtr>) -> Arc<Self> {
        Arc::new_cyclic(|me: &Weak<GroupBias>| {
            let listener: Weak<dyn BiasListener> = me.clone();
            let list = ChildList::default();
            for child in children {
                list.push(child, &listener);
            }
            Self {
                id: BiasId::next(),
                me: me.clone(),
                mode,
                notifier: Notifier::default(),
                children: list,
                join: Mutex::new(None),
            }
        })
    }

    #[must_use]
    pub fn and(children: Vec<BiasPtr>) -> Arc<Self> {
        Self::with_children(GroupMode::And, children)
    }

    #[must_use]
    pub fn or(children: Vec<BiasPtr>) -> Arc<Self> {
        Self::with_children(GroupMode::Or, children)
    }

    #[must_use]
    pub fn not(children: Vec<BiasPtr>) -> Arc<Self> {
        Self::with_children(GroupMode::Not, children)
    }

    #[must_use]
    pub fn mode(&self) -> GroupMode {
        self.mode
    }

    fn listener(&self) -> Weak<dyn BiasListener> {
        self.me.clone()
    }

    fn drop_join(&self) {
        if lock(&self.join).take().is_some() {
            log::debug!("Bias {} drops its pending result.", self.id);
        }
    }

    fn structure_changed(&self) {
        self.drop_join();
        self.notifier.notify(self.id, &BiasEvent::Changed);
    }

    fn child_result(&self, source: BiasId, set: &TrackSet) {
        let Some(index) = self.children.position(source) else {
            return;
        };
        let result = {
            let mut guard = lock(&self.join);
            let Some(join) = guard.as_mut() else {
                return;
            };
            if !join.delivered(index, set.clone()) {
                return;
            }
            if self.mode.decided(join) {
                join.settle();
            }
            if !join.is_complete() {
                return;
            }
            let result = self.mode.aggregate(join);
            *guard = None;
            result
        };
        self.notifier.notify(self.id, &BiasEvent::ResultReady(result));
    }

    fn child_replaced(&self, source: BiasId, new_bias: Option<&BiasPtr>) {
        let Some(index) = self.children.replace(source, new_bias.cloned(), &self.listener()) else {
            return;
        };
        log::debug!("Bias {} replaced its child {index}.", self.id);
        announce_replacement(&self.notifier, self.id, index, new_bias, self.children.len());
        self.structure_changed();
    }
}

impl Bias for GroupBias {
    fn id(&self) -> BiasId {
        self.id
    }

    fn name(&self) -> &str {
        self.mode.name()
    }

    fn describe(&self) -> String {
        match self.mode {
            GroupMode::And => "Match all of".to_string(),
            GroupMode::Or => "Match any of".to_string(),
            GroupMode::Not => "Match none of".to_string(),
        }
    }

    fn to_fragment(&self) -> Fragment {
        self.children
            .snapshot()
            .iter()
            .fold(Fragment::new(self.mode.name()), |fragment, child| {
                fragment.with_child(child.to_fragment())
            })
    }

    fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    fn matching_tracks(
        &self,
        playlist: &[TrackPtr],
        context_count: usize,
        final_count: usize,
        universe: &TrackCollectionPtr,
    ) -> TrackSet {
        let children = self.children.snapshot();
        {
            let mut join = lock(&self.join);
            debug_assert!(
                join.is_none(),
                "matching_tracks called on bias {} while its result is outstanding",
                self.id
            );
            *join = Some(Join::new(universe, children.len()));
        }

        for (index, child) in children.iter().enumerate() {
            let set = child.matching_tracks(playlist, context_count, final_count, universe);
            let mut guard = lock(&self.join);
            let Some(join) = guard.as_mut() else {
                break;
            };
            join.returned(index, set);
            if self.mode.decided(join) {
                log::trace!("Bias {} is decided after child {index}.", self.id);
                join.settle();
                break;
            }
        }

        let mut guard = lock(&self.join);
        let Some(join) = guard.as_mut() else {
            // a child changed while being asked; the Changed event travels up
            return TrackSet::outstanding();
        };
        join.arm();
        if !join.is_complete() {
            log::debug!("Bias {} waits for {} children.", self.id, join.pending());
            return TrackSet::outstanding();
        }
        let result = self.mode.aggregate(join);
        *guard = None;
        result
    }

    fn track_matches(&self, position: usize, playlist: &[TrackPtr], context_count: usize) -> bool {
        let mut children = self.children.snapshot().into_iter();
        match self.mode {
            GroupMode::And => children.all(|child| child.track_matches(position, playlist, context_count)),
            GroupMode::Or => children.any(|child| child.track_matches(position, playlist, context_count)),
            GroupMode::Not => !children.all(|child| child.track_matches(position, playlist, context_count)),
        }
    }

    fn energy(&self, playlist: &[TrackPtr], context_count: usize) -> f64 {
        let energies = self
            .children
            .snapshot()
            .iter()
            .map(|child| child.energy(playlist, context_count))
            .collect::<Vec<f64>>();
        let max = energies.iter().copied().fold(0.0, f64::max);
        match self.mode {
            GroupMode::And => max,
            GroupMode::Or => energies.iter().copied().fold(1.0, f64::min),
            GroupMode::Not => 1.0 - max,
        }
    }

    fn invalidate(&self) {
        self.drop_join();
        for child in self.children.snapshot() {
            child.invalidate();
        }
    }

    fn as_composite(&self) -> Option<&dyn CompositeBias> {
        Some(self)
    }
}

impl CompositeBias for GroupBias {
    fn biases(&self) -> Vec<BiasPtr> {
        self.children.snapshot()
    }

    fn append_bias(&self, bias: BiasPtr) {
        self.children.push(bias.clone(), &self.listener());
        self.notifier.notify(self.id, &BiasEvent::BiasAppended(bias));
        self.structure_changed();
    }

    fn move_bias(&self, from: usize, to: usize) {
        if self.children.move_bias(from, to) {
            self.notifier.notify(self.id, &BiasEvent::BiasMoved { from, to });
            self.structure_changed();
        }
    }
}

impl BiasListener for GroupBias {
    fn bias_event(&self, source: BiasId, event: &BiasEvent) {
        match event {
            BiasEvent::ResultReady(set) => self.child_result(source, set),
            BiasEvent::Changed => self.structure_changed(),
            BiasEvent::Replaced(new_bias) => self.child_replaced(source, new_bias.as_ref()),
            // edits inside a child do not concern us until it reports Changed
            BiasEvent::BiasAppended(_)
            | BiasEvent::BiasRemoved(_)
            | BiasEvent::BiasMoved { .. }
            | BiasEvent::WeightsChanged => {}
        }
    }
}
