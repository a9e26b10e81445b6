//! First child with a non-empty answer wins.

use super::composite::{announce_replacement, ChildList, CompositeBias};
use super::join::{Arrival, PendingChild};
use super::{lock, Bias, BiasEvent, BiasId, BiasListener, BiasPtr, Fragment, Notifier};
use crate::track::TrackPtr;
use crate::track_set::{TrackCollectionPtr, TrackSet};
use std::sync::{Arc, Mutex, Weak};

/// Arguments of the `matching_tracks` call being answered.
struct Request {
    playlist: Vec<TrackPtr>,
    context_count: usize,
    final_count: usize,
    universe: TrackCollectionPtr,
}

#[derive(Default)]
struct IfElseState {
    request: Option<Arc<Request>>,
    pending: Option<PendingChild>,
}

/// Composite asking its children in order until one accepts some tracks.
pub struct IfElseBias {
    id: BiasId,
    me: Weak<IfElseBias>,
    notifier: Notifier,
    children: ChildList,
    state: Mutex<IfElseState>,
}

impl IfElseBias {
    pub const NAME: &'static str = "ifElseBias";

    #[must_use]
    pub fn new(children: Vec<BiasPtr>) -> Arc<Self> {
        Arc::new_cyclic(|me: &Weak<IfElseBias>| {
            let listener: Weak<dyn BiasListener> = me.clone();
            let list = ChildList::default();
            for child in children {
                list.push(child, &listener);
            }
            Self {
                id: BiasId::next(),
                me: me.clone(),
                notifier: Notifier::default(),
                children: list,
                state: Mutex::new(IfElseState::default()),
            }
        })
    }

    fn listener(&self) -> Weak<dyn BiasListener> {
        self.me.clone()
    }

    fn reset(&self) {
        let mut state = lock(&self.state);
        state.request = None;
        state.pending = None;
    }

    fn structure_changed(&self) {
        self.reset();
        self.notifier.notify(self.id, &BiasEvent::Changed);
    }

    /// Asks the children from `start` on. Outstanding while a child is
    /// awaited.
    fn evaluate_from(&self, start: usize) -> TrackSet {
        let Some(request) = lock(&self.state).request.clone() else {
            return TrackSet::outstanding();
        };
        let children = self.children.snapshot();
        for (index, child) in children.iter().enumerate().skip(start) {
            lock(&self.state).pending = Some(PendingChild::new(index));
            let set = child.matching_tracks(
                &request.playlist,
                request.context_count,
                request.final_count,
                &request.universe,
            );
            let resolved = {
                let mut state = lock(&self.state);
                match state.pending.as_mut() {
                    Some(pending) if pending.index == index => pending.returned(set),
                    // reset while the child was asked
                    _ => return TrackSet::outstanding(),
                }
            };
            match resolved {
                None => {
                    log::debug!("Bias {} waits for child {index}.", self.id);
                    return TrackSet::outstanding();
                }
                Some(set) if !set.is_empty() => {
                    self.reset();
                    return set;
                }
                Some(_) => log::trace!("Child {index} of bias {} has no tracks.", self.id),
            }
        }
        self.reset();
        TrackSet::new(&request.universe, false)
    }

    fn child_result(&self, source: BiasId, set: &TrackSet) {
        let Some(index) = self.children.position(source) else {
            return;
        };
        let arrival = {
            let mut state = lock(&self.state);
            let current = state.request.as_ref().map(|request| request.universe.clone());
            match (state.pending.as_mut(), current) {
                (Some(pending), Some(universe)) if set.belongs_to(&universe) => {
                    pending.arrived(index, set.clone())
                }
                _ => Arrival::Ignored,
            }
        };
        let Arrival::Forward(set) = arrival else {
            return;
        };
        let result = if set.is_empty() {
            self.evaluate_from(index + 1)
        } else {
            self.reset();
            set
        };
        if !result.is_outstanding() {
            self.notifier.notify(self.id, &BiasEvent::ResultReady(result));
        }
    }

    fn child_replaced(&self, source: BiasId, new_bias: Option<&BiasPtr>) {
        let Some(index) = self.children.replace(source, new_bias.cloned(), &self.listener()) else {
            return;
        };
        announce_replacement(&self.notifier, self.id, index, new_bias, self.children.len());
        self.structure_changed();
    }
}

impl Bias for IfElseBias {
    fn id(&self) -> BiasId {
        self.id
    }

    fn name(&self) -> &str {
        Self::NAME
    }

    fn describe(&self) -> String {
        "The first matching of".to_string()
    }

    fn to_fragment(&self) -> Fragment {
        self.children
            .snapshot()
            .iter()
            .fold(Fragment::new(Self::NAME), |fragment, child| {
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
        {
            let mut state = lock(&self.state);
            debug_assert!(
                state.pending.is_none(),
                "matching_tracks called on bias {} while its result is outstanding",
                self.id
            );
            state.request = Some(Arc::new(Request {
                playlist: playlist.to_vec(),
                context_count,
                final_count,
                universe: Arc::clone(universe),
            }));
        }
        self.evaluate_from(0)
    }

    fn track_matches(&self, position: usize, playlist: &[TrackPtr], context_count: usize) -> bool {
        self.children
            .snapshot()
            .iter()
            .any(|child| child.track_matches(position, playlist, context_count))
    }

    fn energy(&self, playlist: &[TrackPtr], context_count: usize) -> f64 {
        self.children
            .snapshot()
            .iter()
            .map(|child| child.energy(playlist, context_count))
            .fold(1.0, f64::min)
    }

    fn invalidate(&self) {
        self.reset();
        for child in self.children.snapshot() {
            child.invalidate();
        }
    }

    fn as_composite(&self) -> Option<&dyn CompositeBias> {
        Some(self)
    }
}

impl CompositeBias for IfElseBias {
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

impl BiasListener for IfElseBias {
    fn bias_event(&self, source: BiasId, event: &BiasEvent) {
        match event {
            BiasEvent::ResultReady(set) => self.child_result(source, set),
            BiasEvent::Changed => self.structure_changed(),
            BiasEvent::Replaced(new_bias) => self.child_replaced(source, new_bias.as_ref()),
            BiasEvent::BiasAppended(_)
            | BiasEvent::BiasRemoved(_)
            | BiasEvent::BiasMoved { .. }
            | BiasEvent::WeightsChanged => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{tracks, uids, universe, Recorder};
    use super::super::{Condition, GroupBias, MetaFilter, RandomBias, TagMatchBias};
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::track::Field;

    fn genre(backend: &Arc<MemoryBackend>, name: &str) -> BiasPtr {
        TagMatchBias::new(
            backend.clone(),
            MetaFilter::text(Field::Genre, Condition::Equals, name),
        )
    }

    #[test]
    fn test_first_non_empty_child_wins() {
        let backend = MemoryBackend::new(tracks());
        let bias = IfElseBias::new(vec![
            genre(&backend, "Blues"),
            genre(&backend, "Jazz"),
            RandomBias::new(),
        ]);
        let set = bias.matching_tracks(&[], 0, 1, &universe());
        assert_eq!(uids(&set), vec!["T2"]);
    }

    #[test]
    fn test_all_empty_gives_empty() {
        let backend = MemoryBackend::new(tracks());
        let bias = IfElseBias::new(vec![genre(&backend, "Blues"), GroupBias::or(Vec::new())]);
        assert!(bias.matching_tracks(&[], 0, 1, &universe()).is_empty());
        assert!(IfElseBias::new(Vec::new())
            .matching_tracks(&[], 0, 1, &universe())
            .is_empty());
    }

    #[test]
    fn test_waits_before_trying_later_children() {
        let backend = MemoryBackend::deferred(tracks());
        let bias = IfElseBias::new(vec![genre(&backend, "Blues"), genre(&backend, "Pop")]);
        let recorder = Recorder::attach(bias.as_ref());

        assert!(bias.matching_tracks(&[], 0, 1, &universe()).is_outstanding());
        assert_eq!(backend.query_count(), 1);

        // Blues comes back empty, so Pop is asked next
        backend.flush();
        assert_eq!(backend.query_count(), 2);
        assert!(recorder.results().is_empty());

        backend.flush();
        let results = recorder.results();
        assert_eq!(results.len(), 1);
        assert_eq!(uids(&results[0]), vec!["T4"]);
    }

    #[test]
    fn test_track_matches_like_or() {
        let backend = MemoryBackend::new(tracks());
        let playlist = tracks();
        let bias = IfElseBias::new(vec![genre(&backend, "Rock"), genre(&backend, "Pop")]);
        assert!(bias.track_matches(0, &playlist, 0));
        assert!(!bias.track_matches(1, &playlist, 0));
        assert!(bias.track_matches(3, &playlist, 0));
        assert_eq!(bias.energy(&playlist, 0), 0.5);
    }
}
