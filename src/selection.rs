use rand::seq::SliceRandom;

use crate::content::ShareMeta;
use crate::listing::Listing;
use crate::peer::PeerHandle;

/// The source a fetch will download from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePick {
    pub peer: PeerHandle,
    /// metadata of the variant the peer serves
    pub meta: ShareMeta,
}

/// Policy choosing which source of a listing a fetch talks to.
pub trait SourceSelector: Send + Sync {
    /// `None` if the listing offers nothing to download from.
    fn select(&self, listing: &Listing) -> Option<SourcePick>;
}

/// Built-in selection policies.
///
/// Both only consider the listing's first variant.
#[derive(Copy, Debug, Clone, Eq, PartialEq)]
pub enum SourceSelection {
    /// the peer that joined the variant first
    First,
    /// a uniformly random peer, spreads load when many clients fetch at once
    Random,
}

impl Default for SourceSelection {
    fn default() -> Self {
        SourceSelection::First
    }
}

impl SourceSelector for SourceSelection {
    fn select(&self, listing: &Listing) -> Option<SourcePick> {
        let variant = listing.variants().first()?;
        let source = match self {
            SourceSelection::First => variant.sources().first(),
            SourceSelection::Random => variant.sources().choose(&mut rand::thread_rng()),
        }?;
        Some(SourcePick {
            peer: source.peer(),
            meta: variant.meta().clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::ContentId;

    fn listing() -> Listing {
        let first = ShareMeta::with_length(100);
        let mut listing = Listing::new(
            ContentId::beatmap_set("songA", "application/json"),
            first.clone(),
            PeerHandle(1),
        );
        listing.record(&first, PeerHandle(2));
        listing.record(&ShareMeta::with_length(300), PeerHandle(3));
        listing
    }

    #[test]
    fn first_picks_first_source_of_first_variant() {
        let pick = SourceSelection::First.select(&listing()).unwrap();
        assert_eq!(pick.peer, PeerHandle(1));
        assert_eq!(pick.meta, ShareMeta::with_length(100));
    }

    #[test]
    fn random_stays_within_first_variant() {
        let listing = listing();
        for _ in 0..32 {
            let pick = SourceSelection::Random.select(&listing).unwrap();
            assert!(pick.peer == PeerHandle(1) || pick.peer == PeerHandle(2));
            assert_eq!(pick.meta.byte_length, 100);
        }
    }
}
