use smallvec::SmallVec;

use crate::content::{ContentId, ShareMeta};
use crate::peer::{PeerHandle, Source};

/// What recording an announcement did to a listing.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Recorded {
    /// The metadata was new, a variant was appended.
    NewVariant,
    /// The peer joined an existing variant.
    NewSource,
    /// The peer's asserted block count grew to the contained value.
    Asserted(u32),
}

/// One distinct encoding of a listing's content and the peers serving it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variant {
    meta: ShareMeta,
    /// at most one source per peer, in the order peers joined
    sources: SmallVec<[Source; 4]>,
}

impl Variant {
    /// A variant with a single source for `peer`.
    pub fn new(meta: ShareMeta, peer: PeerHandle) -> Self {
        let mut sources = SmallVec::new();
        sources.push(Source::new(peer));
        Self { meta, sources }
    }

    pub fn meta(&self) -> &ShareMeta {
        &self.meta
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    /// Returns the `Source` the peer contributes to this variant
    pub fn source(&self, peer: PeerHandle) -> Option<&Source> {
        self.sources.iter().find(|source| source.peer() == peer)
    }

    #[cfg(test)]
    pub(crate) fn contains_peer(&self, peer: PeerHandle) -> bool {
        self.source(peer).is_some()
    }

    /// Count a block announcement by `peer`, adding a source if the peer is
    /// new to this variant.
    pub fn assert_block(&mut self, peer: PeerHandle) -> Recorded {
        if let Some(source) = self.sources.iter_mut().find(|source| source.peer() == peer) {
            Recorded::Asserted(source.assert_block())
        } else {
            self.sources.push(Source::new(peer));
            Recorded::NewSource
        }
    }

    /// Keeps only the sources `keep` returns `true` for.
    ///
    /// `keep` may update the source it is handed, sources left without
    /// asserted blocks are dropped regardless of the verdict. Returns the
    /// peers whose sources were dropped.
    pub(crate) fn retain_sources<F>(&mut self, mut keep: F) -> SmallVec<[PeerHandle; 4]>
    where
        F: FnMut(&mut Source) -> bool,
    {
        let mut dropped = SmallVec::new();
        self.sources.retain(|source| {
            if keep(source) && !source.is_exhausted() {
                true
            } else {
                dropped.push(source.peer());
                false
            }
        });
        dropped
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// A piece of content exposed as a single downloadable entry.
///
/// Variants are kept in the order they were first announced, the first one
/// is the default download target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    id: ContentId,
    variants: Vec<Variant>,
}

impl Listing {
    /// A listing with a single variant served by `peer`.
    pub fn new(id: ContentId, meta: ShareMeta, peer: PeerHandle) -> Self {
        Self {
            id,
            variants: vec![Variant::new(meta, peer)],
        }
    }

    pub fn id(&self) -> &ContentId {
        &self.id
    }

    pub fn variants(&self) -> &[Variant] {
        &self.variants
    }

    /// The variant whose metadata equals `meta`.
    pub fn variant(&self, meta: &ShareMeta) -> Option<&Variant> {
        self.variants.iter().find(|variant| variant.meta == *meta)
    }

    /// Records a block announcement by `peer` for the `meta` variant.
    pub fn record(&mut self, meta: &ShareMeta, peer: PeerHandle) -> Recorded {
        match self.variants.iter_mut().find(|variant| variant.meta == *meta) {
            Some(variant) => variant.assert_block(peer),
            None => {
                self.variants.push(Variant::new(meta.clone(), peer));
                Recorded::NewVariant
            }
        }
    }

    /// Applies `keep` to every source and drops variants left without one.
    ///
    /// Returns the `(metadata, peer)` pairs of all dropped sources.
    pub(crate) fn retain_sources<F>(&mut self, mut keep: F) -> Vec<(ShareMeta, PeerHandle)>
    where
        F: FnMut(&mut Source) -> bool,
    {
        let mut dropped = Vec::new();
        self.variants.retain_mut(|variant| {
            for peer in variant.retain_sources(&mut keep) {
                dropped.push((variant.meta.clone(), peer));
            }
            !variant.is_empty()
        });
        dropped
    }

    /// All peers serving at least one variant, without duplicates.
    #[cfg(test)]
    pub(crate) fn peers(&self) -> Vec<PeerHandle> {
        let mut peers: Vec<_> = self
            .variants
            .iter()
            .flat_map(|variant| variant.sources.iter().map(Source::peer))
            .collect();
        peers.sort();
        peers.dedup();
        peers
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }
}

/// Point in time copy of a listing, for display purposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingSummary {
    pub id: ContentId,
    pub variants: Vec<VariantSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantSummary {
    pub meta: ShareMeta,
    /// `(peer, asserted blocks)` in the order peers joined
    pub sources: Vec<(PeerHandle, u32)>,
}

impl From<&Listing> for ListingSummary {
    fn from(listing: &Listing) -> Self {
        Self {
            id: listing.id.clone(),
            variants: listing
                .variants
                .iter()
                .map(|variant| VariantSummary {
                    meta: variant.meta.clone(),
                    sources: variant
                        .sources
                        .iter()
                        .map(|source| (source.peer(), source.asserted()))
                        .collect(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn song() -> ContentId {
        ContentId::beatmap_set("songA", "application/json")
    }

    #[test]
    fn equal_metadata_shares_a_variant() {
        let meta = ShareMeta::with_length(100);
        let mut listing = Listing::new(song(), meta.clone(), PeerHandle(1));

        assert_eq!(listing.record(&meta, PeerHandle(2)), Recorded::NewSource);
        assert_eq!(listing.record(&meta, PeerHandle(2)), Recorded::Asserted(2));
        assert_eq!(listing.variants().len(), 1);

        let variant = listing.variant(&meta).unwrap();
        assert_eq!(variant.sources().len(), 2);
        assert_eq!(variant.source(PeerHandle(1)).unwrap().asserted(), 1);
        assert_eq!(variant.source(PeerHandle(2)).unwrap().asserted(), 2);
    }

    #[test]
    fn new_metadata_appends_a_variant() {
        let first = ShareMeta::with_length(100);
        let second = ShareMeta::with_length(200);
        let mut listing = Listing::new(song(), first.clone(), PeerHandle(1));

        assert_eq!(listing.record(&second, PeerHandle(1)), Recorded::NewVariant);
        let metas: Vec<_> = listing.variants().iter().map(|v| v.meta().clone()).collect();
        assert_eq!(metas, vec![first, second]);
        assert_eq!(listing.peers(), vec![PeerHandle(1)]);
    }

    #[test]
    fn exhausted_sources_and_empty_variants_are_dropped() {
        let first = ShareMeta::with_length(100);
        let second = ShareMeta::with_length(200);
        let mut listing = Listing::new(song(), first.clone(), PeerHandle(1));
        listing.record(&second, PeerHandle(2));
        listing.record(&second, PeerHandle(1));

        let dropped = listing.retain_sources(|source| {
            if source.peer() == PeerHandle(1) {
                source.retract_block();
            }
            true
        });

        assert_eq!(
            dropped,
            vec![(first, PeerHandle(1)), (second.clone(), PeerHandle(1))]
        );
        assert_eq!(listing.variants().len(), 1);
        assert_eq!(listing.variants()[0].meta(), &second);
        assert!(!listing.variants()[0].contains_peer(PeerHandle(1)));

        listing.retain_sources(|_| false);
        assert!(listing.is_empty());
    }

    #[test]
    fn summary_reflects_counts() {
        let meta = ShareMeta::with_length(100);
        let mut listing = Listing::new(song(), meta.clone(), PeerHandle(7));
        listing.record(&meta, PeerHandle(7));

        let summary = ListingSummary::from(&listing);
        assert_eq!(summary.id, song());
        assert_eq!(summary.variants[0].sources, vec![(PeerHandle(7), 2)]);
    }
}
