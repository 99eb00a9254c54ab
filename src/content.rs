use std::convert::TryFrom;
use std::fmt;

/// Length of the content digest carried in share metadata.
pub const DIGEST_LEN: usize = 32;

/// The kind of content a share announcement refers to.
///
/// `None` is not a content kind, announcements using it retract a
/// previously announced block.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Usage {
    None,
    BeatmapSet,
    Avatar,
    Other(u8),
}

impl Default for Usage {
    fn default() -> Self {
        Usage::None
    }
}

impl From<u8> for Usage {
    fn from(value: u8) -> Self {
        match value {
            0 => Usage::None,
            1 => Usage::BeatmapSet,
            2 => Usage::Avatar,
            other => Usage::Other(other),
        }
    }
}

impl From<Usage> for u8 {
    fn from(usage: Usage) -> u8 {
        match usage {
            Usage::None => 0,
            Usage::BeatmapSet => 1,
            Usage::Avatar => 2,
            Usage::Other(other) => other,
        }
    }
}

/// Identifies what is being shared.
///
/// Exactly one listing may exist per `ContentId` at a time, it is also the key
/// under which a listing appears in the host's catalog.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ContentId {
    /// level identifier of the content
    pub name: String,
    pub usage: Usage,
    /// media type describing how the content is encoded
    pub mime_type: String,
}

impl ContentId {
    pub fn new<N, M>(name: N, usage: Usage, mime_type: M) -> Self
    where
        N: Into<String>,
        M: Into<String>,
    {
        Self {
            name: name.into(),
            usage,
            mime_type: mime_type.into(),
        }
    }

    /// A `BeatmapSet` id, the only usage that produces listings.
    pub fn beatmap_set<N: Into<String>, M: Into<String>>(name: N, mime_type: M) -> Self {
        Self::new(name, Usage::BeatmapSet, mime_type)
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?}, {})", self.name, self.usage, self.mime_type)
    }
}

/// Describes one encoding of a piece of content.
///
/// Two announcements with equal metadata refer to the same variant, equality
/// is the only dedup key inside a listing.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ShareMeta {
    /// total length of the encoded content in bytes
    pub byte_length: u64,
    pub digest: [u8; DIGEST_LEN],
}

impl ShareMeta {
    pub fn new(byte_length: u64, digest: [u8; DIGEST_LEN]) -> Self {
        Self {
            byte_length,
            digest,
        }
    }

    /// Metadata without a digest.
    pub fn with_length(byte_length: u64) -> Self {
        Self::new(byte_length, [0; DIGEST_LEN])
    }

    /// Number of `block_size` blocks needed to carry the content.
    ///
    /// `None` if the block size is zero or the count does not fit a block
    /// offset.
    pub fn block_count(&self, block_size: u32) -> Option<u32> {
        if block_size == 0 {
            return None;
        }
        let block_size = u64::from(block_size);
        let count = self.byte_length / block_size + u64::from(self.byte_length % block_size != 0);
        u32::try_from(count).ok()
    }
}

/// A single inbound share message.
///
/// Announces that the sending peer can serve the block at `offset` of the
/// content described by `id` and `meta`. With `Usage::None` it retracts that
/// block instead.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockAnnouncement {
    pub id: ContentId,
    /// block size the sender splits content into
    pub block_size: u32,
    pub meta: ShareMeta,
    /// zero-based block index
    pub offset: u32,
}

impl BlockAnnouncement {
    pub fn new(id: ContentId, block_size: u32, meta: ShareMeta, offset: u32) -> Self {
        Self {
            id,
            block_size,
            meta,
            offset,
        }
    }

    /// A retraction of block `offset` for the content called `name`.
    pub fn retraction<N: Into<String>>(name: N, block_size: u32, offset: u32) -> Self {
        Self::new(
            ContentId::new(name, Usage::None, String::new()),
            block_size,
            ShareMeta::with_length(0),
            offset,
        )
    }

    pub fn is_retraction(&self) -> bool {
        self.id.usage == Usage::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_wire_values() {
        for raw in 0..=255u8 {
            assert_eq!(u8::from(Usage::from(raw)), raw);
        }
        assert_eq!(Usage::from(1), Usage::BeatmapSet);
        assert_eq!(Usage::default(), Usage::None);
    }

    #[test]
    fn block_count_rounds_up() {
        assert_eq!(ShareMeta::with_length(100).block_count(64), Some(2));
        assert_eq!(ShareMeta::with_length(128).block_count(64), Some(2));
        assert_eq!(ShareMeta::with_length(1).block_count(398), Some(1));
        assert_eq!(ShareMeta::with_length(0).block_count(64), Some(0));
        assert_eq!(ShareMeta::with_length(10).block_count(0), None);
        assert_eq!(ShareMeta::with_length(u64::MAX).block_count(1), None);
    }

    #[test]
    fn metadata_equality_includes_digest() {
        let a = ShareMeta::new(100, [1; DIGEST_LEN]);
        let b = ShareMeta::new(100, [2; DIGEST_LEN]);
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn retraction_carries_no_usage() {
        let retraction = BlockAnnouncement::retraction("songA", 64, 3);
        assert!(retraction.is_retraction());
        assert_eq!(retraction.id.name, "songA");
        assert_eq!(retraction.offset, 3);
    }
}
