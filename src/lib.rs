//! Tracks which lobby participants can serve which beatmap sets and
//! downloads them block by block.

#[macro_use]
extern crate log;

pub mod catalog;
pub mod content;
pub mod error;
pub mod events;
pub mod fetch;
pub mod listing;
pub mod peer;
pub mod registry;
pub mod selection;
pub mod tracker;

pub use crate::catalog::{Catalog, CatalogEntry, MemoryCatalog};
pub use crate::content::{BlockAnnouncement, ContentId, ShareMeta, Usage};
pub use crate::error::{FetchError, TransportError};
pub use crate::events::ShareEvent;
pub use crate::fetch::{BlockTransport, Fetch, FetchHandle};
pub use crate::listing::{Listing, ListingSummary, Variant, VariantSummary};
pub use crate::peer::{PeerHandle, Source};
pub use crate::selection::{SourcePick, SourceSelection, SourceSelector};
pub use crate::tracker::{AnnounceOutcome, Rejection, Tracker, TrackerConfig};
