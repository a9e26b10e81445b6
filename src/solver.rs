//! # Playlist generation
//!
//! A [`BiasedPlaylist`] owns the root of a bias tree. A [`BiasSolver`] fills
//! a playlist with it one position at a time: for every open slot it asks
//! the root for the acceptable tracks, waits for outstanding answers up to a
//! timeout, and draws one of them at random. Slots the tree cannot fill get
//! a random track of the whole universe.

use crate::bias::{lock, BiasEvent, BiasId, BiasListener, BiasPtr, Fragment, GroupBias};
use crate::factory::BiasFactory;
use crate::track::TrackPtr;
use crate::track_set::{TrackCollectionPtr, TrackSet};
use anyhow::{bail, Result};
use rand::Rng;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

/// Fragment tag of a saved playlist.
pub const PLAYLIST_TAG: &str = "playlist";

/// How long the solver waits for an outstanding result by default.
pub const DEFAULT_SOLVER_TIMEOUT: Duration = Duration::from_secs(5);

/// A titled bias tree.
///
/// The playlist listens to its root: when the root asks to be replaced the
/// playlist takes the substitute, and a removed root becomes an empty
/// [`GroupBias::and`].
pub struct BiasedPlaylist {
    me: Weak<BiasedPlaylist>,
    title: Mutex<String>,
    root: Mutex<BiasPtr>,
}

impl BiasedPlaylist {
    #[must_use]
    pub fn new(title: impl Into<String>, root: BiasPtr) -> Arc<Self> {
        let playlist = Arc::new_cyclic(|me: &Weak<BiasedPlaylist>| Self {
            me: me.clone(),
            title: Mutex::new(title.into()),
            root: Mutex::new(root.clone()),
        });
        root.notifier().subscribe(playlist.listener());
        playlist
    }

    /// Loads a `playlist` fragment, or treats any other fragment as a bare
    /// root bias.
    pub fn from_fragment(factory: &BiasFactory, fragment: &Fragment) -> Result<Arc<Self>> {
        if fragment.tag != PLAYLIST_TAG {
            return Ok(Self::new("", factory.from_fragment(fragment)));
        }
        let title = fragment.attribute("title").unwrap_or_default();
        let root: BiasPtr = match fragment.children.as_slice() {
            [] => GroupBias::and(Vec::new()),
            [root] => factory.from_fragment(root),
            _ => bail!("A playlist holds one root bias, found {}", fragment.children.len()),
        };
        Ok(Self::new(title, root))
    }

    #[must_use]
    pub fn to_fragment(&self) -> Fragment {
        Fragment::new(PLAYLIST_TAG)
            .with_attribute("title", self.title())
            .with_child(self.bias().to_fragment())
    }

    #[must_use]
    pub fn title(&self) -> String {
        lock(&self.title).clone()
    }

    pub fn set_title(&self, title: impl Into<String>) {
        *lock(&self.title) = title.into();
    }

    #[must_use]
    pub fn bias(&self) -> BiasPtr {
        lock(&self.root).clone()
    }

    pub fn set_bias(&self, bias: BiasPtr) {
        let old = std::mem::replace(&mut *lock(&self.root), bias.clone());
        old.notifier().unsubscribe(&self.listener());
        bias.notifier().subscribe(self.listener());
    }

    fn listener(&self) -> Weak<dyn BiasListener> {
        self.me.clone()
    }
}

impl BiasListener for BiasedPlaylist {
    fn bias_event(&self, source: BiasId, event: &BiasEvent) {
        let BiasEvent::Replaced(new_bias) = event else {
            return;
        };
        if self.bias().id() != source {
            return;
        }
        let bias: BiasPtr = match new_bias {
            Some(bias) => bias.clone(),
            None => GroupBias::and(Vec::new()),
        };
        log::debug!("Playlist root replaced by {}.", bias.name());
        self.set_bias(bias);
    }
}

/// Forwards root events to the waiting solver.
struct ChannelListener {
    root: BiasId,
    sender: Mutex<Sender<BiasEvent>>,
}

impl BiasListener for ChannelListener {
    fn bias_event(&self, source: BiasId, event: &BiasEvent) {
        if source != self.root {
            return;
        }
        if matches!(event, BiasEvent::ResultReady(_) | BiasEvent::Changed) {
            // the receiver is gone once the solver finished
            let _ = lock(&self.sender).send(event.clone());
        }
    }
}

/// Fills playlists from a bias tree.
pub struct BiasSolver {
    bias: BiasPtr,
    universe: TrackCollectionPtr,
    context: Vec<TrackPtr>,
    timeout: Duration,
}

impl BiasSolver {
    #[must_use]
    pub fn new(bias: BiasPtr, universe: TrackCollectionPtr) -> Self {
        Self {
            bias,
            universe,
            context: Vec::new(),
            timeout: DEFAULT_SOLVER_TIMEOUT,
        }
    }

    /// Tracks already played. They are judged by the biases but never
    /// changed.
    #[must_use]
    pub fn with_context(mut self, context: Vec<TrackPtr>) -> Self {
        self.context = context;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Generates `count` new tracks.
    #[must_use]
    pub fn solve(&self, count: usize) -> Vec<TrackPtr> {
        self.solve_with(count, &mut rand::thread_rng())
    }

    pub fn solve_with<R: Rng + ?Sized>(&self, count: usize, rng: &mut R) -> Vec<TrackPtr> {
        let started = Instant::now();
        let (sender, receiver) = mpsc::channel();
        let listener = Arc::new(ChannelListener {
            root: self.bias.id(),
            sender: Mutex::new(sender),
        });
        let weak = Arc::downgrade(&listener) as Weak<dyn BiasListener>;
        self.bias.notifier().subscribe(weak.clone());

        let context_count = self.context.len();
        let final_count = context_count + count;
        let mut playlist = self.context.clone();
        while playlist.len() < final_count {
            let candidates = self.candidates(&playlist, context_count, final_count, &receiver);
            let Some(track) = candidates
                .get_random_track(rng)
                .or_else(|| TrackSet::new(&self.universe, true).get_random_track(rng))
            else {
                log::warn!("The universe is empty, stopping after {} tracks.", playlist.len());
                break;
            };
            log::debug!("Slot {} gets {}.", playlist.len(), track.uid);
            playlist.push(track);
        }

        self.bias.notifier().unsubscribe(&weak);
        log::info!(
            "Generated {} tracks in {:?}, energy {:.3}.",
            playlist.len() - context_count,
            started.elapsed(),
            self.bias.energy(&playlist, context_count)
        );
        playlist.split_off(context_count)
    }

    /// Energy of the root bias for `tracks` placed after the context.
    #[must_use]
    pub fn energy(&self, tracks: &[TrackPtr]) -> f64 {
        let mut playlist = self.context.clone();
        playlist.extend_from_slice(tracks);
        self.bias.energy(&playlist, self.context.len())
    }

    /// Acceptable tracks for the next slot, or an empty set when the tree
    /// has none or did not answer in time.
    fn candidates(
        &self,
        playlist: &[TrackPtr],
        context_count: usize,
        final_count: usize,
        receiver: &Receiver<BiasEvent>,
    ) -> TrackSet {
        // leftovers of an abandoned request
        while receiver.try_recv().is_ok() {}

        let set = self
            .bias
            .matching_tracks(playlist, context_count, final_count, &self.universe);
        let set = if set.is_outstanding() {
            self.wait(receiver)
        } else {
            set
        };
        if set.is_empty() {
            log::debug!("No matching tracks for slot {}.", playlist.len());
        }
        set
    }

    fn wait(&self, receiver: &Receiver<BiasEvent>) -> TrackSet {
        let deadline = Instant::now() + self.timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match receiver.recv_timeout(remaining) {
                Ok(BiasEvent::ResultReady(set)) if set.belongs_to(&self.universe) => return set,
                Ok(BiasEvent::Changed) => {
                    log::debug!("Bias tree changed while waiting for a result.");
                    break;
                }
                Ok(_) => {}
                Err(RecvTimeoutError::Timeout) => {
                    log::warn!("No result after {:?}, picking at random.", self.timeout);
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        self.bias.invalidate();
        TrackSet::new(&self.universe, false)
    }
}
