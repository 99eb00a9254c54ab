use std::io;
use std::time::Duration;

use snafu::Snafu;

use crate::content::ContentId;
use crate::peer::PeerHandle;

/// Errors a `BlockTransport` reports for a single block request.
#[derive(Debug, Snafu)]
pub enum TransportError {
    #[snafu(display("Peer {} is no longer reachable", peer))]
    PeerGone { peer: PeerHandle },
    #[snafu(display("IO Err {}", err))]
    Io { err: io::Error },
    #[snafu(display("Block request timed out after {:?}", after))]
    Timeout { after: Duration },
    #[snafu(display("Protocol error: {}", reason))]
    Protocol { reason: String },
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> TransportError {
        TransportError::Io { err }
    }
}

/// Why a fetch ended without content.
///
/// Never surfaced to callers of `Tracker::fetch`, which only see absence.
#[derive(Debug, Snafu)]
pub enum FetchError {
    #[snafu(display("No source available for {}", id))]
    NoSource { id: ContentId },
    #[snafu(display("Aborted before block {}", offset))]
    Aborted { offset: u32 },
    #[snafu(display("Transport error at block {}: {}", offset, err))]
    Transport { offset: u32, err: TransportError },
    #[snafu(display("Block {} has length {}, expected {}", offset, got, expected))]
    BlockLength {
        offset: u32,
        expected: usize,
        got: usize,
    },
    #[snafu(display("Assembled {} bytes, expected {}", got, expected))]
    TotalLength { expected: u64, got: u64 },
    #[snafu(display(
        "Content of {} bytes can't be split into blocks of {} bytes",
        byte_length,
        block_size
    ))]
    Oversized { byte_length: u64, block_size: u32 },
}

impl FetchError {
    pub(crate) fn transport(offset: u32, err: TransportError) -> FetchError {
        FetchError::Transport { offset, err }
    }
}
