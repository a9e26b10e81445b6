//! # Bias factory
//!
//! Biases are created by name through a registry of [`BiasProvider`]s. The
//! registry is open: providers can be added and removed at runtime.
//!
//! Loading a fragment whose tag has no provider (or whose provider fails)
//! yields a [`ReplacementBias`] that keeps the fragment. Registering a
//! provider later swaps every live replacement of that name for the real
//! bias, in place.
//!
//! ```no_run
//! use playbias::backend::MemoryBackend;
//! use playbias::factory::{BiasFactory, Services};
//!
//! let factory = BiasFactory::builder(Services::new(MemoryBackend::new(Vec::new())))
//!     .with_builtin()
//!     .build();
//! let bias = factory.create("andBias")?;
//! println!("{}", bias.describe());
//! # Ok::<(), anyhow::Error>(())
//! ```

use crate::backend::BackendPtr;
use crate::bias::simple_match::DEFAULT_CACHE_TTL;
use crate::bias::{
    lock, AlbumPlayBias, Bias, BiasPtr, CompositeBias, FollowMode, Fragment, GroupBias, GroupMode,
    IfElseBias, MetaFilter, PartBias, QuizField, QuizPlayBias, RandomBias, ReplacementBias,
    SearchQueryBias, SimilarArtistBias, SimilarMatch, TagMatchBias, UniqueBias,
};
use crate::similarity::{SimilarArtistCache, SimilarityService, SimilarityTable};
use anyhow::{anyhow, Context, Result};
use std::fmt;
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

/// How long similar artist answers stay valid unless configured otherwise.
pub const DEFAULT_SIMILAR_MAX_AGE: Duration = Duration::from_secs(7 * 24 * 3600);

/// Everything a bias may need to be constructed.
#[derive(Clone)]
pub struct Services {
    pub backend: BackendPtr,
    pub similarity: Arc<dyn SimilarityService>,
    pub similar_cache: Arc<SimilarArtistCache>,
    /// Lifetime of cached lookup results.
    pub cache_ttl: Duration,
}

impl Services {
    /// Services around `backend` with an empty similarity table.
    #[must_use]
    pub fn new(backend: BackendPtr) -> Self {
        Self {
            backend,
            similarity: Arc::new(SimilarityTable::default()),
            similar_cache: Arc::new(SimilarArtistCache::in_memory(DEFAULT_SIMILAR_MAX_AGE)),
            cache_ttl: DEFAULT_CACHE_TTL,
        }
    }

    #[must_use]
    pub fn with_similarity(
        mut self,
        similarity: Arc<dyn SimilarityService>,
        cache: Arc<SimilarArtistCache>,
    ) -> Self {
        self.similarity = similarity;
        self.similar_cache = cache;
        self
    }

    #[must_use]
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }
}

type CreateFn = dyn Fn(&Services) -> BiasPtr + Send + Sync;
type LoadFn = dyn Fn(&BiasFactory, &Fragment) -> Result<BiasPtr> + Send + Sync;

/// Knows how to make one type of bias.
#[derive(Clone)]
pub struct BiasProvider {
    name: String,
    display_name: String,
    description: String,
    create: Arc<CreateFn>,
    load: Arc<LoadFn>,
}

impl BiasProvider {
    pub fn new(
        name: impl Into<String>,
        display_name: impl Into<String>,
        description: impl Into<String>,
        create: impl Fn(&Services) -> BiasPtr + Send + Sync + 'static,
        load: impl Fn(&BiasFactory, &Fragment) -> Result<BiasPtr> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
            description: description.into(),
            create: Arc::new(create),
            load: Arc::new(load),
        }
    }

    /// Registered type name, also the fragment tag.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }
}

impl fmt::Debug for BiasProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BiasProvider")
            .field("name", &self.name)
            .field("display_name", &self.display_name)
            .finish_non_exhaustive()
    }
}

pub struct BiasFactoryBuilder {
    services: Services,
    providers: Vec<BiasProvider>,
}

impl BiasFactoryBuilder {
    /// Adds the providers of every bias this crate implements.
    #[must_use]
    pub fn with_builtin(mut self) -> Self {
        self.providers.extend(builtin_providers());
        self
    }

    #[must_use]
    pub fn provider(mut self, provider: BiasProvider) -> Self {
        self.providers.retain(|known| known.name != provider.name);
        self.providers.push(provider);
        self
    }

    #[must_use]
    pub fn build(self) -> Arc<BiasFactory> {
        log::debug!("Bias factory with {} providers.", self.providers.len());
        Arc::new(BiasFactory {
            services: self.services,
            providers: RwLock::new(self.providers),
            replacements: Mutex::new(Vec::new()),
        })
    }
}

/// Registry creating and loading biases by name.
pub struct BiasFactory {
    services: Services,
    providers: RwLock<Vec<BiasProvider>>,
    /// Stand-ins waiting for their provider.
    replacements: Mutex<Vec<Weak<ReplacementBias>>>,
}

impl BiasFactory {
    #[must_use]
    pub fn builder(services: Services) -> BiasFactoryBuilder {
        BiasFactoryBuilder {
            services,
            providers: Vec::new(),
        }
    }

    #[must_use]
    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Registered providers in registration order.
    #[must_use]
    pub fn providers(&self) -> Vec<BiasProvider> {
        self.providers
            .read()
            .map(|providers| providers.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    #[must_use]
    pub fn provider(&self, name: &str) -> Option<BiasProvider> {
        self.providers()
            .into_iter()
            .find(|provider| provider.name == name)
    }

    /// Adds or replaces a provider and resolves the live replacement biases
    /// waiting for it.
    pub fn register(&self, provider: BiasProvider) {
        log::info!("Registering bias provider `{}'.", provider.name);
        {
            let mut providers = self
                .providers
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            providers.retain(|known| known.name != provider.name);
            providers.push(provider.clone());
        }

        let waiting: Vec<Arc<ReplacementBias>> = {
            let mut replacements = lock(&self.replacements);
            replacements.retain(|weak| weak.strong_count() > 0);
            replacements
                .iter()
                .filter_map(Weak::upgrade)
                .filter(|replacement| replacement.name() == provider.name)
                .collect()
        };
        for replacement in waiting {
            match (provider.load)(self, replacement.fragment()) {
                Ok(bias) => {
                    log::debug!("Resolving replacement for `{}'.", provider.name);
                    replacement.replace(Some(bias));
                }
                Err(e) => log::warn!("Still cannot load `{}': {e:#}", provider.name),
            }
        }
    }

    /// Removes the provider called `name`. Returns whether there was one.
    pub fn unregister(&self, name: &str) -> bool {
        let mut providers = self
            .providers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = providers.len();
        providers.retain(|provider| provider.name != name);
        let removed = providers.len() != before;
        if removed {
            log::info!("Unregistered bias provider `{name}'.");
        }
        removed
    }

    /// A new bias of type `name` with default settings.
    pub fn create(&self, name: &str) -> Result<BiasPtr> {
        let provider = self
            .provider(name)
            .ok_or_else(|| anyhow!("Unknown bias type `{name}'"))?;
        Ok((provider.create)(&self.services))
    }

    /// Loads a bias tree. Never fails: unknown or broken parts become
    /// replacement biases.
    #[must_use]
    pub fn from_fragment(&self, fragment: &Fragment) -> BiasPtr {
        if let Some(provider) = self.provider(&fragment.tag) {
            match (provider.load)(self, fragment) {
                Ok(bias) => return bias,
                Err(e) => log::warn!("Failed to load bias `{}': {e:#}", fragment.tag),
            }
        } else {
            log::warn!("No provider for bias `{}'.", fragment.tag);
        }
        let replacement = ReplacementBias::new(fragment.clone());
        lock(&self.replacements).push(Arc::downgrade(&replacement));
        replacement
    }

    pub fn from_json(&self, json: &str) -> Result<BiasPtr> {
        let fragment = Fragment::from_json(json)?;
        Ok(self.from_fragment(&fragment))
    }

    /// Loads every child fragment and appends it to `composite`.
    fn load_children(&self, composite: &dyn CompositeBias, fragment: &Fragment) {
        for child in &fragment.children {
            composite.append_bias(self.from_fragment(child));
        }
    }
}

fn weight_of(fragment: &Fragment) -> Result<f64> {
    match fragment.attribute("weight") {
        None => Ok(0.0),
        Some(text) => text
            .trim()
            .parse()
            .with_context(|| format!("Invalid weight `{text}' on `{}'", fragment.tag)),
    }
}

fn group_provider(mode: GroupMode, display_name: &str, description: &str) -> BiasProvider {
    BiasProvider::new(
        mode.name(),
        display_name,
        description,
        move |_| GroupBias::new(mode),
        move |factory, fragment| {
            let bias = GroupBias::new(mode);
            factory.load_children(bias.as_ref(), fragment);
            Ok(bias)
        },
    )
}

fn builtin_providers() -> Vec<BiasProvider> {
    vec![
        BiasProvider::new(
            RandomBias::NAME,
            "Random",
            "Random tracks from the whole collection.",
            |_| RandomBias::new(),
            |_, _| Ok(RandomBias::new()),
        ),
        BiasProvider::new(
            UniqueBias::NAME,
            "Unique",
            "Every track only once.",
            |_| UniqueBias::new(),
            |_, _| Ok(UniqueBias::new()),
        ),
        BiasProvider::new(
            TagMatchBias::NAME,
            "Match meta tag",
            "Tracks whose meta data matches a condition.",
            |services| {
                TagMatchBias::with_ttl(
                    services.backend.clone(),
                    services.cache_ttl,
                    MetaFilter::default(),
                )
            },
            |factory, fragment| {
                let services = factory.services();
                let bias: BiasPtr =
                    TagMatchBias::from_fragment(services.backend.clone(), services.cache_ttl, fragment)?;
                Ok(bias)
            },
        ),
        BiasProvider::new(
            SearchQueryBias::NAME,
            "Search",
            "Tracks found by a search query.",
            |services| SearchQueryBias::with_ttl(services.backend.clone(), services.cache_ttl, ""),
            |factory, fragment| {
                let services = factory.services();
                Ok(SearchQueryBias::from_fragment(
                    services.backend.clone(),
                    services.cache_ttl,
                    fragment,
                ))
            },
        ),
        BiasProvider::new(
            AlbumPlayBias::NAME,
            "Album play",
            "Tracks that follow the previous one on its album.",
            |_| AlbumPlayBias::new(FollowMode::default()),
            |_, fragment| Ok(AlbumPlayBias::from_fragment(fragment)),
        ),
        BiasProvider::new(
            QuizPlayBias::NAME,
            "Quiz play",
            "Tracks whose title starts with the last character of the previous one.",
            |services| {
                QuizPlayBias::with_ttl(services.backend.clone(), services.cache_ttl, QuizField::default())
            },
            |factory, fragment| {
                let services = factory.services();
                Ok(QuizPlayBias::from_fragment(
                    services.backend.clone(),
                    services.cache_ttl,
                    fragment,
                ))
            },
        ),
        BiasProvider::new(
            SimilarArtistBias::NAME,
            "Similar artists",
            "Tracks by artists similar to the ones played.",
            |services| similar_bias(services, SimilarMatch::default()),
            |factory, fragment| {
                let mode = SimilarMatch::from_name(fragment.child_text("match").unwrap_or_default());
                Ok(similar_bias(factory.services(), mode))
            },
        ),
        group_provider(GroupMode::And, "And", "Tracks matching all of the sub biases."),
        group_provider(GroupMode::Or, "Or", "Tracks matching at least one of the sub biases."),
        group_provider(GroupMode::Not, "Not", "Tracks matching none of the sub biases."),
        BiasProvider::new(
            IfElseBias::NAME,
            "If Else",
            "Tracks of the first sub bias that has any.",
            |_| IfElseBias::new(Vec::new()),
            |factory, fragment| {
                let bias = IfElseBias::new(Vec::new());
                factory.load_children(bias.as_ref(), fragment);
                Ok(bias)
            },
        ),
        BiasProvider::new(
            PartBias::NAME,
            "Partition",
            "Shares the playlist between the sub biases by weight.",
            |_| PartBias::new(),
            |factory, fragment| {
                let mut parts = Vec::with_capacity(fragment.children.len());
                for child in &fragment.children {
                    parts.push((factory.from_fragment(child), weight_of(child)?));
                }
                Ok(PartBias::from_parts(weight_of(fragment)?, parts))
            },
        ),
    ]
}

fn similar_bias(services: &Services, mode: SimilarMatch) -> BiasPtr {
    SimilarArtistBias::with_ttl(
        services.backend.clone(),
        services.cache_ttl,
        services.similarity.clone(),
        services.similar_cache.clone(),
        mode,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::bias::{Condition, TagMatchBias};
    use crate::track::Field;

    fn factory() -> Arc<BiasFactory> {
        BiasFactory::builder(Services::new(MemoryBackend::new(Vec::new())))
            .with_builtin()
            .build()
    }

    #[test]
    fn test_create_every_builtin() -> Result<()> {
        let factory = factory();
        for provider in factory.providers() {
            let bias = factory.create(provider.name())?;
            assert_eq!(bias.name(), provider.name());
        }
        assert!(factory.create("noSuchBias").is_err());
        Ok(())
    }

    #[test]
    fn test_fragment_round_trip_of_a_tree() -> Result<()> {
        let factory = factory();
        let backend = factory.services().backend.clone();
        let part = PartBias::from_parts(
            0.2,
            vec![(
                TagMatchBias::new(backend, MetaFilter::text(Field::Genre, Condition::Equals, "Rock")),
                0.8,
            )],
        );
        let tree = GroupBias::and(vec![UniqueBias::new(), part]);

        let json = tree.to_fragment().to_json()?;
        let loaded = factory.from_json(&json)?;
        assert_eq!(loaded.to_fragment(), tree.to_fragment());
        Ok(())
    }

    #[test]
    fn test_unknown_tag_becomes_replacement() {
        let factory = factory();
        let fragment = Fragment::new("mysteryBias").with_attribute("level", 3);
        let bias = factory.from_fragment(&fragment);
        assert_eq!(bias.name(), "mysteryBias");
        assert_eq!(bias.to_fragment(), fragment);
        assert!(bias.describe().contains("mysteryBias"));
    }

    #[test]
    fn test_failed_load_becomes_replacement() {
        let factory = factory();
        let broken = Fragment::new(PartBias::NAME).with_attribute("weight", "heavy");
        let bias = factory.from_fragment(&broken);
        assert_eq!(bias.to_fragment(), broken);
    }

    #[test]
    fn test_register_resolves_replacements_in_place() {
        let factory = factory();
        let fragment = Fragment::new(GroupMode::And.name())
            .with_child(Fragment::new(RandomBias::NAME))
            .with_child(Fragment::new("laterBias"));
        let tree = factory.from_fragment(&fragment);
        let Some(composite) = tree.as_composite() else {
            panic!("andBias must be a composite");
        };
        assert_eq!(composite.biases()[1].name(), "laterBias");

        factory.register(BiasProvider::new(
            "laterBias",
            "Later",
            "Registered after loading.",
            |_| UniqueBias::new(),
            |_, _| Ok(UniqueBias::new()),
        ));
        assert_eq!(composite.biases()[1].name(), UniqueBias::NAME);
        assert!(factory.provider("laterBias").is_some());

        assert!(factory.unregister("laterBias"));
        assert!(!factory.unregister("laterBias"));
        assert!(factory.create("laterBias").is_err());
    }
}
