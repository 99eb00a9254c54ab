//! The share tracker.
//!
//! Peers announce the blocks of content they can serve. The tracker groups
//! those announcements into [`Listing`]s, one per [`ContentId`], deduplicates
//! encodings by their [`ShareMeta`], and keeps the host's catalog in sync
//! with what can currently be downloaded. All entry points serialize on one
//! lock, only the block transfers of a [`Fetch`] run outside of it.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use fnv::FnvHashSet;
use futures::future::AbortHandle;
use tokio::sync::broadcast;

use crate::catalog::Catalog;
use crate::content::{BlockAnnouncement, ContentId, Usage};
use crate::events::{Observation, ShareEvent};
use crate::fetch::{BlockTransport, Fetch, FetchJob, Progress};
use crate::listing::{Listing, ListingSummary};
use crate::peer::PeerHandle;
use crate::registry::{Lookup, Registry};
use crate::selection::{SourceSelection, SourceSelector};

/// The configuration for the `Tracker`.
///
/// The configuration is consumed by [`Tracker::with_config`].
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// block size every announcement must use
    pub block_size: Option<u32>,
    /// media type of shareable beatmap sets
    pub mime_type: Option<String>,
    /// how many observation events a slow subscriber may lag behind
    pub event_capacity: Option<usize>,
    /// how long a single block request may take, requires a tokio runtime
    pub block_timeout: Option<Duration>,
    /// how fetches choose their source
    pub source_selection: Option<SourceSelection>,
}

impl TrackerConfig {
    /// The block size the lobby server advertises.
    pub const DEFAULT_BLOCK_SIZE: u32 = 398;
    pub const DEFAULT_MIME_TYPE: &'static str = "application/json";
    pub const DEFAULT_EVENT_CAPACITY: usize = 64;
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            block_size: Some(Self::DEFAULT_BLOCK_SIZE),
            mime_type: Some(Self::DEFAULT_MIME_TYPE.to_owned()),
            event_capacity: Some(Self::DEFAULT_EVENT_CAPACITY),
            block_timeout: None,
            source_selection: Some(SourceSelection::default()),
        }
    }
}

/// Why an announcement was turned down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// The sender is not a connected participant.
    UnknownPeer,
    /// The sender splits content into blocks of a different size.
    BlockSize { expected: u32, got: u32 },
    /// Only beatmap sets can be shared.
    Usage(Usage),
    MimeType(String),
    /// Announced content has no bytes.
    EmptyContent,
    /// The catalog already holds content under the id that the tracker does
    /// not own.
    ForeignEntry,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::UnknownPeer => write!(f, "sender is not connected"),
            Rejection::BlockSize { expected, got } => {
                write!(f, "block size {} does not match {}", got, expected)
            }
            Rejection::Usage(usage) => write!(f, "unsupported usage {:?}", usage),
            Rejection::MimeType(mime_type) => write!(f, "unsupported mime type {:?}", mime_type),
            Rejection::EmptyContent => write!(f, "content is empty"),
            Rejection::ForeignEntry => write!(f, "id is taken by content the tracker does not own"),
        }
    }
}

/// The result of [`Tracker::process_announcement`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnnounceOutcome {
    /// A source was added or updated, or a retraction matched a source.
    Accepted,
    /// The announcement was not valid, nothing changed.
    Invalid(Rejection),
    /// A valid retraction for a block no tracked source asserts.
    NoMatch,
}

impl AnnounceOutcome {
    pub fn is_accepted(&self) -> bool {
        *self == AnnounceOutcome::Accepted
    }
}

struct TrackerState<C> {
    registry: Registry<C>,
    /// participants announcements are accepted from
    connected: FnvHashSet<PeerHandle>,
}

struct TrackerInner<C> {
    block_size: u32,
    mime_type: String,
    block_timeout: Option<Duration>,
    selector: Box<dyn SourceSelector>,
    transport: Arc<dyn BlockTransport>,
    events: broadcast::Sender<ShareEvent>,
    state: Mutex<TrackerState<C>>,
}

/// Tracks the content peers share and downloads it from them.
///
/// Cloning is cheap, clones operate on the same state.
pub struct Tracker<C> {
    inner: Arc<TrackerInner<C>>,
}

impl<C> Clone for Tracker<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C: Catalog + 'static> Tracker<C> {
    /// Creates a tracker with the default configuration.
    pub fn new<T: BlockTransport>(catalog: C, transport: T) -> Self {
        Self::with_config(TrackerConfig::default(), catalog, transport)
    }

    pub fn with_config<T: BlockTransport>(config: TrackerConfig, catalog: C, transport: T) -> Self {
        let selection = config.source_selection.unwrap_or_default();
        Self::with_selector(config, catalog, transport, selection)
    }

    /// Creates a tracker whose fetches pick their source with `selector`.
    pub fn with_selector<T, S>(config: TrackerConfig, catalog: C, transport: T, selector: S) -> Self
    where
        T: BlockTransport,
        S: SourceSelector + 'static,
    {
        let event_capacity = config
            .event_capacity
            .unwrap_or(TrackerConfig::DEFAULT_EVENT_CAPACITY)
            .max(1);
        let (events, _) = broadcast::channel(event_capacity);
        Self {
            inner: Arc::new(TrackerInner {
                block_size: config.block_size.unwrap_or(TrackerConfig::DEFAULT_BLOCK_SIZE),
                mime_type: config
                    .mime_type
                    .unwrap_or_else(|| TrackerConfig::DEFAULT_MIME_TYPE.to_owned()),
                block_timeout: config.block_timeout,
                selector: Box::new(selector),
                transport: Arc::new(transport),
                events,
                state: Mutex::new(TrackerState {
                    registry: Registry::new(catalog),
                    connected: FnvHashSet::default(),
                }),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, TrackerState<C>> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn block_size(&self) -> u32 {
        self.inner.block_size
    }

    pub fn mime_type(&self) -> &str {
        &self.inner.mime_type
    }

    /// Start accepting announcements from `peer`.
    ///
    /// Returns `false` if the peer was already connected.
    pub fn on_connect(&self, peer: PeerHandle) -> bool {
        let connected = self.state().connected.insert(peer);
        if connected {
            debug!("{} connected", peer);
        }
        connected
    }

    pub fn is_connected(&self, peer: PeerHandle) -> bool {
        self.state().connected.contains(&peer)
    }

    /// Forgets `peer` and every source it contributed, across all listings.
    ///
    /// Listings nobody else serves disappear, fetches from the peer are
    /// aborted. Returns the number of removed sources.
    pub fn on_disconnect(&self, peer: PeerHandle) -> usize {
        let mut state = self.state();
        state.connected.remove(&peer);
        let removed = state.registry.filter_sources(|_, source| source.peer() != peer);
        debug!("{} disconnected, dropped {} sources", peer, removed);
        removed
    }

    /// Feeds one inbound announcement from `peer` into the tracker.
    ///
    /// Subscribers get exactly one `ShareEvent` per call, whatever the
    /// outcome.
    pub fn process_announcement(
        &self,
        announcement: &BlockAnnouncement,
        peer: PeerHandle,
    ) -> AnnounceOutcome {
        let mut observation = Observation::new(&self.inner.events, announcement, peer);
        let outcome = self.intake(announcement, peer);
        observation.set_accepted(outcome.is_accepted());
        match &outcome {
            AnnounceOutcome::Accepted => trace!(
                "accepted block {} of {} from {}",
                announcement.offset,
                announcement.id,
                peer
            ),
            AnnounceOutcome::Invalid(rejection) => debug!(
                "rejected block {} of {} from {}: {}",
                announcement.offset, announcement.id, peer, rejection
            ),
            AnnounceOutcome::NoMatch => debug!(
                "retraction of block {} of {} from {} matched nothing",
                announcement.offset, announcement.id.name, peer
            ),
        }
        outcome
    }

    fn intake(&self, announcement: &BlockAnnouncement, peer: PeerHandle) -> AnnounceOutcome {
        let mut state = self.state();
        if !state.connected.contains(&peer) {
            return AnnounceOutcome::Invalid(Rejection::UnknownPeer);
        }
        if announcement.block_size != self.inner.block_size {
            return AnnounceOutcome::Invalid(Rejection::BlockSize {
                expected: self.inner.block_size,
                got: announcement.block_size,
            });
        }
        if announcement.is_retraction() {
            return self.retract(&mut state.registry, announcement, peer);
        }

        let id = &announcement.id;
        if id.usage != Usage::BeatmapSet {
            return AnnounceOutcome::Invalid(Rejection::Usage(id.usage));
        }
        if id.mime_type != self.inner.mime_type {
            return AnnounceOutcome::Invalid(Rejection::MimeType(id.mime_type.clone()));
        }
        if announcement.meta.byte_length < 1 {
            return AnnounceOutcome::Invalid(Rejection::EmptyContent);
        }

        match state.registry.lookup(id) {
            Lookup::Foreign => AnnounceOutcome::Invalid(Rejection::ForeignEntry),
            Lookup::Tracked(listing) => {
                let recorded = listing.record(&announcement.meta, peer);
                trace!("{} from {}: {:?}", id, peer, recorded);
                AnnounceOutcome::Accepted
            }
            Lookup::Vacant => {
                state
                    .registry
                    .insert(Listing::new(id.clone(), announcement.meta.clone(), peer));
                AnnounceOutcome::Accepted
            }
        }
    }

    /// Takes back one asserted block from every source `peer` has in the
    /// listing named by the retraction, then cascades.
    fn retract(
        &self,
        registry: &mut Registry<C>,
        announcement: &BlockAnnouncement,
        peer: PeerHandle,
    ) -> AnnounceOutcome {
        let target = ContentId::beatmap_set(announcement.id.name.clone(), self.inner.mime_type.clone());
        let mut matched = 0;
        registry.filter_sources(|id, source| {
            if source.peer() == peer && *id == target {
                matched += 1;
                source.retract_block();
            }
            true
        });
        if matched > 0 {
            AnnounceOutcome::Accepted
        } else {
            AnnounceOutcome::NoMatch
        }
    }

    /// Downloads the listing `id` from one of its sources.
    pub fn fetch(&self, id: &ContentId) -> Fetch {
        self.start_fetch(id, None)
    }

    /// Like [`Tracker::fetch`], calling `progress` with the number of blocks
    /// received after every block.
    pub fn fetch_with_progress<F>(&self, id: &ContentId, progress: F) -> Fetch
    where
        F: FnMut(u32) + Send + 'static,
    {
        self.start_fetch(id, Some(Box::new(progress)))
    }

    fn start_fetch(&self, id: &ContentId, progress: Option<Progress>) -> Fetch {
        let state = self.state();
        let pick = match state
            .registry
            .get(id)
            .and_then(|listing| self.inner.selector.select(listing))
        {
            Some(pick) => pick,
            None => return Fetch::unavailable(id),
        };
        let (abort, registration) = AbortHandle::new_pair();
        let ticket = state.registry.register_fetch(id, &pick, abort.clone());
        drop(state);

        debug!("fetching {} from {}", id, pick.peer);
        let job = FetchJob {
            id: id.clone(),
            pick,
            block_size: self.inner.block_size,
            block_timeout: self.inner.block_timeout,
            transport: self.inner.transport.clone(),
        };
        Fetch::start(job, abort, registration, ticket, progress)
    }

    /// Receives a `ShareEvent` for every announcement processed from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ShareEvent> {
        self.inner.events.subscribe()
    }

    /// Snapshot of every listing, in no particular order.
    pub fn listings(&self) -> Vec<ListingSummary> {
        self.state().registry.iter().map(ListingSummary::from).collect()
    }

    pub fn listing(&self, id: &ContentId) -> Option<ListingSummary> {
        self.state().registry.get(id).map(ListingSummary::from)
    }

    /// Number of fetches that have not resolved yet.
    pub fn in_flight(&self) -> usize {
        self.state().registry.in_flight()
    }

    /// Gives `f` access to the catalog while no listing can change.
    pub fn with_catalog<R, F: FnOnce(&C) -> R>(&self, f: F) -> R {
        f(self.state().registry.catalog())
    }

    /// Leaves the lobby: drops all listings, aborts all fetches and forgets
    /// every connected peer.
    ///
    /// Returns the number of withdrawn listings.
    pub fn clear(&self) -> usize {
        let mut state = self.state();
        state.connected.clear();
        let cleared = state.registry.clear();
        debug!("cleared {} listings", cleared);
        cleared
    }
}
