//! Child management shared by the composite biases.

use super::{lock, Bias, BiasEvent, BiasId, BiasListener, BiasPtr, Notifier};
use std::sync::{Mutex, Weak};

/// A bias with an ordered list of children.
///
/// Children are removed by asking them to [`Bias::replace`] themselves with
/// `None`; the composite listens for that and updates its list.
pub trait CompositeBias: Bias {
    fn biases(&self) -> Vec<BiasPtr>;

    /// Takes `bias` as new last child.
    fn append_bias(&self, bias: BiasPtr);

    /// Moves the child at `from` to index `to`, shifting the ones between.
    fn move_bias(&self, from: usize, to: usize);

    fn remove_bias(&self, index: usize) {
        if let Some(child) = self.biases().get(index) {
            child.replace(None);
        }
    }
}

/// Ordered child handles with their listener wiring.
#[derive(Default)]
pub(crate) struct ChildList {
    children: Mutex<Vec<BiasPtr>>,
}

impl ChildList {
    pub(crate) fn snapshot(&self) -> Vec<BiasPtr> {
        lock(&self.children).clone()
    }

    pub(crate) fn len(&self) -> usize {
        lock(&self.children).len()
    }

    pub(crate) fn position(&self, id: BiasId) -> Option<usize> {
        lock(&self.children).iter().position(|child| child.id() == id)
    }

    /// Appends and subscribes `listener` to the new child. Returns its index.
    pub(crate) fn push(&self, bias: BiasPtr, listener: &Weak<dyn BiasListener>) -> usize {
        bias.notifier().subscribe(listener.clone());
        let mut children = lock(&self.children);
        children.push(bias);
        children.len() - 1
    }

    pub(crate) fn move_bias(&self, from: usize, to: usize) -> bool {
        let mut children = lock(&self.children);
        if from >= children.len() || to >= children.len() || from == to {
            return false;
        }
        let bias = children.remove(from);
        children.insert(to, bias);
        true
    }

    /// Puts `new_bias` in the place of the child `id`, or removes the child.
    /// Returns the index that changed.
    pub(crate) fn replace(
        &self,
        id: BiasId,
        new_bias: Option<BiasPtr>,
        listener: &Weak<dyn BiasListener>,
    ) -> Option<usize> {
        let (index, old) = {
            let mut children = lock(&self.children);
            let index = children.iter().position(|child| child.id() == id)?;
            let old = match &new_bias {
                Some(bias) => std::mem::replace(&mut children[index], bias.clone()),
                None => children.remove(index),
            };
            (index, old)
        };
        old.notifier().unsubscribe(listener);
        if let Some(bias) = new_bias {
            bias.notifier().subscribe(listener.clone());
        }
        Some(index)
    }
}

/// Sends the notifications describing a child replacement at `index`:
/// removal, then for a substitute an append followed by the move back into
/// place.
pub(crate) fn announce_replacement(
    notifier: &Notifier,
    id: BiasId,
    index: usize,
    new_bias: Option<&BiasPtr>,
    len: usize,
) {
    notifier.notify(id, &BiasEvent::BiasRemoved(index));
    if let Some(bias) = new_bias {
        notifier.notify(id, &BiasEvent::BiasAppended(bias.clone()));
        let last = len.saturating_sub(1);
        if last != index {
            notifier.notify(id, &BiasEvent::BiasMoved { from: last, to: index });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::Recorder;
    use super::super::{RandomBias, UniqueBias};
    use super::*;
    use std::sync::Arc;

    fn listener(recorder: &Arc<Recorder>) -> Weak<dyn BiasListener> {
        Arc::downgrade(recorder) as Weak<dyn BiasListener>
    }

    #[test]
    fn test_push_and_replace_rewire_listeners() {
        let recorder = Arc::new(Recorder::default());
        let weak = listener(&recorder);
        let list = ChildList::default();
        let random: BiasPtr = RandomBias::new();
        let unique: BiasPtr = UniqueBias::new();

        assert_eq!(list.push(random.clone(), &weak), 0);
        assert_eq!(random.notifier().listener_count(), 1);

        assert_eq!(list.replace(random.id(), Some(unique.clone()), &weak), Some(0));
        assert_eq!(random.notifier().listener_count(), 0);
        assert_eq!(unique.notifier().listener_count(), 1);
        assert_eq!(list.position(unique.id()), Some(0));

        assert_eq!(list.replace(unique.id(), None, &weak), Some(0));
        assert_eq!(list.len(), 0);
        assert_eq!(list.replace(unique.id(), None, &weak), None);
    }

    #[test]
    fn test_move() {
        let recorder = Arc::new(Recorder::default());
        let weak = listener(&recorder);
        let list = ChildList::default();
        let first: BiasPtr = RandomBias::new();
        let second: BiasPtr = UniqueBias::new();
        list.push(first.clone(), &weak);
        list.push(second.clone(), &weak);

        assert!(list.move_bias(1, 0));
        assert_eq!(list.position(second.id()), Some(0));
        assert!(!list.move_bias(0, 5));
        assert!(!list.move_bias(1, 1));
    }

    #[test]
    fn test_announce_replacement() {
        let source = RandomBias::new();
        let recorder = Recorder::attach(source.as_ref());
        let substitute: BiasPtr = UniqueBias::new();
        announce_replacement(source.notifier(), source.id(), 0, Some(&substitute), 3);
        assert_eq!(
            recorder.names(),
            vec!["BiasRemoved(0)", "BiasAppended(uniqueBias)", "BiasMoved(2 -> 0)"]
        );
    }
}
