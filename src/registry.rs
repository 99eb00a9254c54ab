use std::sync::PoisonError;

use fnv::FnvHashMap;
use futures::future::AbortHandle;

use crate::catalog::{Catalog, CatalogEntry};
use crate::content::ContentId;
use crate::fetch::{FetchTicket, SharedFetchTable};
use crate::listing::Listing;
use crate::peer::Source;
use crate::selection::SourcePick;

/// Result of looking a `ContentId` up in the registry and its catalog.
#[derive(Debug)]
pub enum Lookup<'a> {
    /// A listing owned by the registry.
    Tracked(&'a mut Listing),
    /// The catalog holds an entry the registry does not own.
    Foreign,
    /// Nothing is stored under the id.
    Vacant,
}

/// All active listings, mirrored 1:1 into the host's catalog.
///
/// Every insertion and removal updates the catalog in the same call, so as
/// long as the registry is behind a single lock nobody can observe the two
/// disagreeing.
#[derive(Debug)]
pub struct Registry<C> {
    listings: FnvHashMap<ContentId, Listing>,
    catalog: C,
    /// fetches currently downloading from one of the listings
    fetches: SharedFetchTable,
}

impl<C: Catalog> Registry<C> {
    pub fn new(catalog: C) -> Self {
        Self {
            listings: FnvHashMap::default(),
            catalog,
            fetches: SharedFetchTable::default(),
        }
    }

    pub fn get(&self, id: &ContentId) -> Option<&Listing> {
        self.listings.get(id)
    }

    /// Resolves `id` against the catalog.
    ///
    /// Entries this registry did not publish are foreign, including `Shared`
    /// ones published by another registry on the same catalog.
    pub fn lookup(&mut self, id: &ContentId) -> Lookup<'_> {
        match self.catalog.entry(id) {
            Some(CatalogEntry::Local) => Lookup::Foreign,
            Some(CatalogEntry::Shared) => match self.listings.get_mut(id) {
                Some(listing) => Lookup::Tracked(listing),
                None => Lookup::Foreign,
            },
            None => match self.listings.get_mut(id) {
                Some(listing) => {
                    warn!("{} vanished from the catalog, publishing it again", id);
                    self.catalog.publish(id);
                    Lookup::Tracked(listing)
                }
                None => Lookup::Vacant,
            },
        }
    }

    /// Adds a new listing and publishes it to the catalog.
    pub fn insert(&mut self, listing: Listing) {
        assert!(!listing.is_empty(), "inserting an empty listing");
        let id = listing.id().clone();
        self.catalog.publish(&id);
        let previous = self.listings.insert(id.clone(), listing);
        assert!(previous.is_none(), "listing {} inserted twice", id);
        info!("published {}", id);
    }

    /// Applies `keep` to every source of every listing.
    ///
    /// `keep` may update the source it is handed. Sources it rejects, or that
    /// are left without asserted blocks, are removed, then empty variants
    /// and finally empty listings, which are withdrawn from the catalog.
    /// Fetches downloading from a removed source are aborted.
    ///
    /// Returns the number of removed sources.
    pub fn filter_sources<F>(&mut self, mut keep: F) -> usize
    where
        F: FnMut(&ContentId, &mut Source) -> bool,
    {
        let catalog = &mut self.catalog;
        let mut fetches = self.fetches.lock().unwrap_or_else(PoisonError::into_inner);
        let mut removed = 0;

        self.listings.retain(|id, listing| {
            let dropped = listing.retain_sources(|source| keep(id, source));
            for (meta, peer) in &dropped {
                let aborted = fetches.abort_source(id, meta, *peer);
                if aborted > 0 {
                    debug!("aborted {} fetches of {} from {}", aborted, id, peer);
                }
            }
            removed += dropped.len();

            if listing.is_empty() {
                withdraw(&mut *catalog, id);
                false
            } else {
                true
            }
        });
        removed
    }

    /// Drops every listing, withdrawing all of them from the catalog and
    /// aborting all fetches.
    pub fn clear(&mut self) -> usize {
        let aborted = self
            .fetches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .abort_all();
        if aborted > 0 {
            debug!("aborted {} fetches", aborted);
        }
        let cleared = self.listings.len();
        for (id, _) in self.listings.drain() {
            withdraw(&mut self.catalog, &id);
        }
        cleared
    }

    /// Registers a fetch downloading from `pick`, until the ticket is dropped.
    pub(crate) fn register_fetch(
        &self,
        id: &ContentId,
        pick: &SourcePick,
        abort: AbortHandle,
    ) -> FetchTicket {
        FetchTicket::register(&self.fetches, id.clone(), pick, abort)
    }

    /// Number of fetches currently registered.
    pub fn in_flight(&self) -> usize {
        self.fetches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Listing> {
        self.listings.values()
    }

    pub fn len(&self) -> usize {
        self.listings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listings.is_empty()
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }
}

/// Withdraws `id` unless the host replaced the entry in the meantime.
fn withdraw<C: Catalog>(catalog: &mut C, id: &ContentId) {
    match catalog.entry(id) {
        Some(CatalogEntry::Shared) => {
            catalog.withdraw(id);
            info!("withdrew {}", id);
        }
        other => warn!("not withdrawing {}, catalog holds {:?}", id, other),
    }
}
