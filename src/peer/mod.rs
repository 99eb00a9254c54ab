use std::fmt;

/// Opaque reference to a connected remote participant.
///
/// Handles are handed out by the session layer and stop being valid once
/// `Tracker::on_disconnect` has been called for them.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerHandle(pub u64);

impl From<u64> for PeerHandle {
    fn from(id: u64) -> Self {
        PeerHandle(id)
    }
}

impl fmt::Display for PeerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer#{}", self.0)
    }
}

/// A peer's claim to serve blocks of one variant.
///
/// A source only exists while `asserted` is non zero, the owning variant
/// drops it as soon as the last block is retracted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    /// the announcing peer
    peer: PeerHandle,
    /// accepted announcements net of retractions
    asserted: u32,
}

impl Source {
    /// A source for a peer that just announced its first block.
    pub fn new(peer: PeerHandle) -> Self {
        Self { peer, asserted: 1 }
    }

    pub fn peer(&self) -> PeerHandle {
        self.peer
    }

    /// Number of blocks the peer currently asserts to have.
    pub fn asserted(&self) -> u32 {
        self.asserted
    }

    /// Count another accepted announcement.
    ///
    /// Re-announcing an offset is not deduplicated.
    pub fn assert_block(&mut self) -> u32 {
        self.asserted = self.asserted.saturating_add(1);
        self.asserted
    }

    /// Count a retraction, returns the remaining asserted blocks.
    pub fn retract_block(&mut self) -> u32 {
        assert!(
            self.asserted > 0,
            "retracting a block from {} with no asserted blocks",
            self.peer
        );
        self.asserted -= 1;
        self.asserted
    }

    pub fn is_exhausted(&self) -> bool {
        self.asserted == 0
    }
}
