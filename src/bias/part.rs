//! # Partition bias
//!
//! A [`PartBias`] splits the open playlist positions between its children
//! by weight. Child 0 is an implicit [`RandomBias`] taking whatever share the
//! explicit children leave over; the weights always sum up to 1.0.
//!
//! ## Matching
//!
//! Every call rebuilds a bipartite graph with the children as *sources* and
//! the open positions as *drains*. A source may fill
//! `round(weight × drains)` drains (the last source takes the remainder), a
//! drain takes one source, and an edge exists where the child accepts the
//! track placed there. Edges are only evaluated when the matcher looks at
//! them.
//!
//! Sources are served from last to first. A source first takes free drains
//! it has an edge to; when it meets a drain held by another source it tries a
//! single swap, moving the holder to a free drain the holder also accepts.
//! Longer augmenting chains are not searched, so the matching is not always
//! maximal.
//!
//! The sources left under quota compete for the next position: one of them
//! is drawn at random, weighted by how many drains it still misses, and its
//! own `matching_tracks` is the answer.

use super::composite::{announce_replacement, ChildList, CompositeBias};
use super::join::{Arrival, PendingChild};
use super::{lock, Bias, BiasEvent, BiasId, BiasListener, BiasPtr, Fragment, Notifier, RandomBias};
use crate::track::TrackPtr;
use crate::track_set::{TrackCollectionPtr, TrackSet};
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use std::sync::{Arc, Mutex, Weak};

const EPSILON: f64 = 1e-9;

/// Drains each source may fill. The last source takes the remainder.
fn capacities(weights: &[f64], drains: usize) -> Vec<usize> {
    let Some((_, leading)) = weights.split_last() else {
        return Vec::new();
    };
    let mut result: Vec<usize> = leading
        .iter()
        .map(|weight| (weight * drains as f64).round().max(0.0) as usize)
        .collect();
    let assigned: usize = result.iter().sum();
    result.push(drains.saturating_sub(assigned));
    result
}

/// Outcome of one matching pass.
#[derive(Debug)]
struct Matching {
    capacity: Vec<usize>,
    flow: Vec<usize>,
    /// Source holding each drain.
    drain_source: Vec<Option<usize>>,
}

impl Matching {
    fn compute(capacity: Vec<usize>, drains: usize, mut edge: impl FnMut(usize, usize) -> bool) -> Self {
        let mut flow = vec![0; capacity.len()];
        let mut drain_source: Vec<Option<usize>> = vec![None; drains];

        for source in (0..capacity.len()).rev() {
            if flow[source] >= capacity[source] {
                continue;
            }
            for drain in 0..drains {
                if !edge(source, drain) {
                    continue;
                }
                match drain_source[drain] {
                    None => {
                        drain_source[drain] = Some(source);
                        flow[source] += 1;
                    }
                    Some(holder) => {
                        for other in (0..drains).rev() {
                            if drain_source[other].is_some() || !edge(holder, other) {
                                continue;
                            }
                            drain_source[other] = Some(holder);
                            drain_source[drain] = Some(source);
                            flow[source] += 1;
                            break;
                        }
                    }
                }
                if flow[source] >= capacity[source] {
                    break;
                }
            }
        }

        Self {
            capacity,
            flow,
            drain_source,
        }
    }

    /// Drains each source still misses.
    fn missing(&self) -> Vec<usize> {
        self.capacity
            .iter()
            .zip(&self.flow)
            .map(|(capacity, flow)| capacity.saturating_sub(*flow))
            .collect()
    }

    fn matched(&self) -> usize {
        self.drain_source.iter().filter(|source| source.is_some()).count()
    }
}

/// Matches `sources` against the positions `context_count..context_count +
/// drains` of `playlist`. Positions without a track have no edges.
fn match_playlist(
    sources: &[BiasPtr],
    weights: &[f64],
    playlist: &[TrackPtr],
    context_count: usize,
    drains: usize,
) -> Matching {
    let mut memo: Vec<Option<bool>> = vec![None; sources.len() * drains];
    let edge = |source: usize, drain: usize| {
        *memo[source * drains + drain].get_or_insert_with(|| {
            let position = context_count + drain;
            position < playlist.len()
                && sources[source].track_matches(position, playlist, context_count)
        })
    };
    Matching::compute(capacities(weights, drains), drains, edge)
}

/// Picks an under-quota source, weighted by the drains it misses.
fn choose_source<R: Rng + ?Sized>(missing: &[usize], rng: &mut R) -> Option<usize> {
    let distribution = WeightedIndex::new(missing).ok()?;
    Some(distribution.sample(rng))
}

/// The weights after setting `weights[index]` to `value`.
///
/// The first weight absorbs the difference where it can. If the changed
/// weight then holds everything the others split the rest evenly, otherwise
/// they are scaled to fill it.
fn rebalanced(weights: &[f64], index: usize, value: f64) -> Vec<f64> {
    let mut result = weights.to_vec();
    if result.len() == 1 {
        result[0] = 1.0;
        return result;
    }
    result[index] = value.clamp(0.0, 1.0);
    let mut sum: f64 = result.iter().sum();

    if index != 0 {
        let old = result[0];
        let new = (1.0 - (sum - old)).clamp(0.0, 1.0);
        result[0] = new;
        sum = sum - old + new;
    }

    if (sum - 1.0).abs() > EPSILON {
        let rest = sum - result[index];
        let remainder = 1.0 - result[index];
        if rest.abs() <= EPSILON {
            let share = remainder / (result.len() - 1) as f64;
            for (i, weight) in result.iter_mut().enumerate() {
                if i != index {
                    *weight = share;
                }
            }
        } else {
            let factor = remainder / rest;
            for (i, weight) in result.iter_mut().enumerate() {
                if i != index {
                    *weight *= factor;
                }
            }
        }
    }
    result
}

struct PartPending {
    child: PendingChild,
    universe: TrackCollectionPtr,
}

/// Composite sharing the playlist between its children by weight.
pub struct PartBias {
    id: BiasId,
    me: Weak<PartBias>,
    notifier: Notifier,
    children: ChildList,
    weights: Mutex<Vec<f64>>,
    pending: Mutex<Option<PartPending>>,
}

impl PartBias {
    pub const NAME: &'static str = "partBias";

    /// A partition with only the implicit random child.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Self::from_parts(1.0, Vec::new())
    }

    /// Builds a partition from the implicit weight and the explicit
    /// children with their weights. Weights not summing up to 1.0 are
    /// rebalanced through the implicit one.
    #[must_use]
    pub fn from_parts(implicit_weight: f64, parts: Vec<(BiasPtr, f64)>) -> Arc<Self> {
        Arc::new_cyclic(|me: &Weak<PartBias>| {
            let listener: Weak<dyn BiasListener> = me.clone();
            let children = ChildList::default();
            let mut weights = vec![implicit_weight];
            children.push(RandomBias::new(), &listener);
            for (bias, weight) in parts {
                children.push(bias, &listener);
                weights.push(weight);
            }
            let sum: f64 = weights.iter().sum();
            if (sum - 1.0).abs() > EPSILON {
                log::debug!("Partition weights sum up to {sum}, rebalancing.");
                weights = rebalanced(&weights, 0, weights[0]);
            }
            Self {
                id: BiasId::next(),
                me: me.clone(),
                notifier: Notifier::default(),
                children,
                weights: Mutex::new(weights),
                pending: Mutex::new(None),
            }
        })
    }

    /// One weight per child, the implicit random child first.
    #[must_use]
    pub fn weights(&self) -> Vec<f64> {
        lock(&self.weights).clone()
    }

    /// Sets the weight of child `index` and rebalances the others.
    pub fn change_bias_weight(&self, index: usize, value: f64) {
        {
            let mut weights = lock(&self.weights);
            if index >= weights.len() {
                log::warn!("Partition has no child {index} to weight.");
                return;
            }
            *weights = rebalanced(&weights, index, value);
            log::debug!("Partition weights are now {weights:?}.");
        }
        self.notifier.notify(self.id, &BiasEvent::WeightsChanged);
        self.structure_changed();
    }

    /// Drains per child for `drains` open positions.
    #[must_use]
    pub fn capacities(&self, drains: usize) -> Vec<usize> {
        capacities(&self.weights(), drains)
    }

    fn listener(&self) -> Weak<dyn BiasListener> {
        self.me.clone()
    }

    fn reset(&self) {
        lock(&self.pending).take();
    }

    fn structure_changed(&self) {
        self.reset();
        self.notifier.notify(self.id, &BiasEvent::Changed);
    }

    fn matching(&self, playlist: &[TrackPtr], context_count: usize, drains: usize) -> Matching {
        let sources = self.children.snapshot();
        let weights = self.weights();
        if weights.len() != sources.len() {
            log::warn!(
                "Partition has {} weights for {} children.",
                weights.len(),
                sources.len()
            );
        }
        match_playlist(&sources, &weights, playlist, context_count, drains)
    }

    fn child_result(&self, source: BiasId, set: &TrackSet) {
        let Some(index) = self.children.position(source) else {
            return;
        };
        let arrival = {
            let mut guard = lock(&self.pending);
            match guard.as_mut() {
                Some(pending) if set.belongs_to(&pending.universe) => {
                    pending.child.arrived(index, set.clone())
                }
                _ => Arrival::Ignored,
            }
        };
        if let Arrival::Forward(set) = arrival {
            self.reset();
            self.notifier.notify(self.id, &BiasEvent::ResultReady(set));
        }
    }

    fn child_replaced(&self, source: BiasId, new_bias: Option<&BiasPtr>) {
        let Some(index) = self.children.replace(source, new_bias.cloned(), &self.listener()) else {
            return;
        };
        announce_replacement(&self.notifier, self.id, index, new_bias, self.children.len());
        if new_bias.is_some() {
            // the substitute inherits the weight
            self.structure_changed();
            return;
        }
        let first = {
            let mut weights = lock(&self.weights);
            if index < weights.len() {
                weights.remove(index);
            }
            weights.first().copied()
        };
        match first {
            Some(first) => self.change_bias_weight(0, first),
            None => self.structure_changed(),
        }
    }
}

impl Bias for PartBias {
    fn id(&self) -> BiasId {
        self.id
    }

    fn name(&self) -> &str {
        Self::NAME
    }

    fn describe(&self) -> String {
        "Partition".to_string()
    }

    fn to_fragment(&self) -> Fragment {
        let weights = self.weights();
        let children = self.children.snapshot();
        let implicit = weights.first().copied().unwrap_or(1.0);
        children
            .iter()
            .zip(&weights)
            .skip(1)
            .fold(
                Fragment::new(Self::NAME).with_attribute("weight", implicit),
                |fragment, (child, weight)| {
                    fragment.with_child(child.to_fragment().with_attribute("weight", weight))
                },
            )
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
        let drains = final_count.saturating_sub(context_count);
        let matching = self.matching(playlist, context_count, drains);
        let missing = matching.missing();
        log::trace!(
            "Partition {}: capacity {:?}, flow {:?}.",
            self.id,
            matching.capacity,
            matching.flow
        );

        let Some(source) = choose_source(&missing, &mut rand::thread_rng()) else {
            return TrackSet::new(universe, true);
        };
        let children = self.children.snapshot();
        let Some(child) = children.get(source) else {
            return TrackSet::new(universe, true);
        };

        {
            let mut pending = lock(&self.pending);
            debug_assert!(
                pending.is_none(),
                "matching_tracks called on bias {} while its result is outstanding",
                self.id
            );
            *pending = Some(PartPending {
                child: PendingChild::new(source),
                universe: Arc::clone(universe),
            });
        }
        log::debug!("Partition {} asks child {source} ({}).", self.id, child.name());
        let set = child.matching_tracks(playlist, context_count, final_count, universe);

        let mut guard = lock(&self.pending);
        let Some(pending) = guard.as_mut() else {
            return TrackSet::outstanding();
        };
        match pending.child.returned(set) {
            Some(set) => {
                *guard = None;
                set
            }
            None => TrackSet::outstanding(),
        }
    }

    fn track_matches(&self, position: usize, playlist: &[TrackPtr], context_count: usize) -> bool {
        if position < context_count {
            return true;
        }
        if position >= playlist.len() {
            return false;
        }
        let drains = playlist.len() - context_count;
        let matching = self.matching(playlist, context_count, drains);
        matching.drain_source[position - context_count].is_some()
    }

    fn energy(&self, playlist: &[TrackPtr], context_count: usize) -> f64 {
        let drains = playlist.len().saturating_sub(context_count);
        if drains == 0 {
            return 0.0;
        }
        let matching = self.matching(playlist, context_count, drains);
        1.0 - matching.matched() as f64 / drains as f64
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

impl CompositeBias for PartBias {
    fn biases(&self) -> Vec<BiasPtr> {
        self.children.snapshot()
    }

    fn append_bias(&self, bias: BiasPtr) {
        lock(&self.weights).push(0.0);
        self.children.push(bias.clone(), &self.listener());
        self.notifier.notify(self.id, &BiasEvent::BiasAppended(bias));
        self.structure_changed();
    }

    fn move_bias(&self, from: usize, to: usize) {
        if !self.children.move_bias(from, to) {
            return;
        }
        {
            let mut weights = lock(&self.weights);
            if from < weights.len() && to < weights.len() {
                let weight = weights.remove(from);
                weights.insert(to, weight);
            }
        }
        self.notifier.notify(self.id, &BiasEvent::BiasMoved { from, to });
        self.structure_changed();
    }
}

impl BiasListener for PartBias {
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
