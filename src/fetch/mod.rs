//! Block-by-block download of a listing from one of its sources.
//!
//! A [`Fetch`] is registered with the registry for as long as it runs. When
//! the source it downloads from disappears from the registry, the fetch is
//! aborted and resolves to `None`, exactly as if it had been cancelled through
//! its [`FetchHandle`].

use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use fnv::FnvHashMap;
use futures::future::{self, AbortHandle, AbortRegistration, Abortable, BoxFuture};
use futures::{Future, FutureExt};

use crate::content::{ContentId, ShareMeta};
use crate::error::{FetchError, TransportError};
use crate::peer::PeerHandle;
use crate::selection::SourcePick;

mod assembler;
mod transport;

pub use self::assembler::BlockAssembler;
pub use self::transport::BlockTransport;

/// Called with the number of blocks received so far.
pub type Progress = Box<dyn FnMut(u32) + Send>;

/// A fetch that is currently running against a source.
#[derive(Debug)]
struct InFlight {
    id: ContentId,
    meta: ShareMeta,
    peer: PeerHandle,
    abort: AbortHandle,
}

/// All running fetches, keyed by a unique fetch id.
#[derive(Debug, Default)]
pub(crate) struct FetchTable {
    next_fetch: u64,
    active: FnvHashMap<u64, InFlight>,
}

pub(crate) type SharedFetchTable = Arc<Mutex<FetchTable>>;

impl FetchTable {
    fn register(&mut self, id: ContentId, pick: &SourcePick, abort: AbortHandle) -> u64 {
        let fetch = self.next_fetch;
        self.next_fetch += 1;
        self.active.insert(
            fetch,
            InFlight {
                id,
                meta: pick.meta.clone(),
                peer: pick.peer,
                abort,
            },
        );
        fetch
    }

    fn finish(&mut self, fetch: u64) {
        self.active.remove(&fetch);
    }

    /// Aborts every fetch downloading the `meta` variant of `id` from `peer`.
    pub(crate) fn abort_source(&mut self, id: &ContentId, meta: &ShareMeta, peer: PeerHandle) -> usize {
        let before = self.active.len();
        self.active.retain(|_, fetch| {
            if fetch.peer == peer && fetch.id == *id && fetch.meta == *meta {
                fetch.abort.abort();
                false
            } else {
                true
            }
        });
        before - self.active.len()
    }

    pub(crate) fn abort_all(&mut self) -> usize {
        let aborted = self.active.len();
        for (_, fetch) in self.active.drain() {
            fetch.abort.abort();
        }
        aborted
    }

    pub(crate) fn len(&self) -> usize {
        self.active.len()
    }
}

/// Keeps a fetch registered until it is dropped.
pub(crate) struct FetchTicket {
    table: SharedFetchTable,
    fetch: u64,
}

impl FetchTicket {
    pub(crate) fn register(
        table: &SharedFetchTable,
        id: ContentId,
        pick: &SourcePick,
        abort: AbortHandle,
    ) -> Self {
        let fetch = table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .register(id, pick, abort);
        Self {
            table: table.clone(),
            fetch,
        }
    }
}

impl Drop for FetchTicket {
    fn drop(&mut self) {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .finish(self.fetch);
    }
}

/// Everything a running fetch needs, detached from the tracker's state.
pub(crate) struct FetchJob {
    pub(crate) id: ContentId,
    pub(crate) pick: SourcePick,
    pub(crate) block_size: u32,
    pub(crate) block_timeout: Option<Duration>,
    pub(crate) transport: Arc<dyn BlockTransport>,
}

impl FetchJob {
    async fn request(&self, offset: u32) -> Result<Bytes, TransportError> {
        let request = self
            .transport
            .request_block(self.pick.peer, &self.id, &self.pick.meta, offset);
        match self.block_timeout {
            Some(after) => match tokio::time::timeout(after, request).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout { after }),
            },
            None => request.await,
        }
    }

    /// Requests the blocks one after another in increasing offset order.
    ///
    /// `abort` is checked before every request and before the content is
    /// handed out, the wrapping `Abortable` only notices it between polls.
    async fn run(
        self,
        abort: AbortHandle,
        mut progress: Option<Progress>,
    ) -> Result<Bytes, FetchError> {
        let mut assembler = BlockAssembler::new(&self.pick.meta, self.block_size)?;
        while let Some(offset) = assembler.next_offset() {
            if abort.is_aborted() {
                return Err(FetchError::Aborted { offset });
            }
            let block = self
                .request(offset)
                .await
                .map_err(|err| FetchError::transport(offset, err))?;
            let received = assembler.push(offset, block)?;
            trace!(
                "block {}/{} of {} from {}",
                received,
                assembler.total_blocks(),
                self.id,
                self.pick.peer
            );
            if let Some(progress) = progress.as_mut() {
                progress(received);
            }
        }
        if abort.is_aborted() {
            return Err(FetchError::Aborted {
                offset: assembler.total_blocks(),
            });
        }
        assembler.finish()
    }
}

/// Cancels the fetch it was obtained from.
#[derive(Debug, Clone)]
pub struct FetchHandle {
    abort: AbortHandle,
}

impl FetchHandle {
    /// Stops the fetch, no further blocks are requested and it resolves to
    /// `None`. Has no effect on a fetch that already resolved.
    pub fn cancel(&self) {
        self.abort.abort();
    }
}

/// A download in progress.
///
/// Resolves to the complete content, or `None` if there was no source, the
/// transport failed, the source went away or the fetch was cancelled.
/// Dropping the future cancels the download.
pub struct Fetch {
    handle: FetchHandle,
    inner: BoxFuture<'static, Option<Bytes>>,
}

impl Fetch {
    /// A fetch that resolves to `None` right away.
    pub(crate) fn unavailable(id: &ContentId) -> Self {
        let (abort, _) = AbortHandle::new_pair();
        debug!("{}", FetchError::NoSource { id: id.clone() });
        Self {
            handle: FetchHandle { abort },
            inner: future::ready(None).boxed(),
        }
    }

    pub(crate) fn start(
        job: FetchJob,
        abort: AbortHandle,
        registration: AbortRegistration,
        ticket: FetchTicket,
        progress: Option<Progress>,
    ) -> Self {
        let handle = FetchHandle {
            abort: abort.clone(),
        };
        let inner = async move {
            let _ticket = ticket;
            let id = job.id.clone();
            let peer = job.pick.peer;
            match Abortable::new(job.run(abort, progress), registration).await {
                Ok(Ok(content)) => {
                    debug!("fetched {} bytes of {} from {}", content.len(), id, peer);
                    Some(content)
                }
                Ok(Err(err @ FetchError::Aborted { .. })) => {
                    debug!("fetching {} from {} aborted: {}", id, peer, err);
                    None
                }
                Ok(Err(err)) => {
                    warn!("fetching {} from {} failed: {}", id, peer, err);
                    None
                }
                Err(_) => {
                    debug!("fetching {} from {} aborted", id, peer);
                    None
                }
            }
        }
        .boxed();
        Self { handle, inner }
    }

    /// A handle that cancels this fetch, usable before it is first polled.
    pub fn handle(&self) -> FetchHandle {
        self.handle.clone()
    }
}

impl Future for Fetch {
    type Output = Option<Bytes>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.as_mut().poll(cx)
    }
}

impl fmt::Debug for Fetch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fetch").field("handle", &self.handle).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pick(peer: u64) -> SourcePick {
        SourcePick {
            peer: PeerHandle(peer),
            meta: ShareMeta::with_length(10),
        }
    }

    #[test]
    fn tickets_unregister_on_drop() {
        let table = SharedFetchTable::default();
        let id = ContentId::beatmap_set("songA", "application/json");
        let (abort, _) = AbortHandle::new_pair();

        let ticket = FetchTicket::register(&table, id, &pick(1), abort);
        assert_eq!(table.lock().unwrap().len(), 1);
        drop(ticket);
        assert_eq!(table.lock().unwrap().len(), 0);
    }

    #[test]
    fn aborts_only_matching_sources() {
        let mut table = FetchTable::default();
        let id = ContentId::beatmap_set("songA", "application/json");
        let other = ContentId::beatmap_set("songB", "application/json");
        table.register(id.clone(), &pick(1), AbortHandle::new_pair().0);
        table.register(id.clone(), &pick(2), AbortHandle::new_pair().0);
        table.register(other, &pick(1), AbortHandle::new_pair().0);

        assert_eq!(table.abort_source(&id, &ShareMeta::with_length(10), PeerHandle(1)), 1);
        assert_eq!(table.abort_source(&id, &ShareMeta::with_length(99), PeerHandle(2)), 0);
        assert_eq!(table.len(), 2);
        assert_eq!(table.abort_all(), 2);
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn unavailable_resolves_to_none() {
        let fetch = Fetch::unavailable(&ContentId::beatmap_set("songA", "application/json"));
        assert_eq!(futures::executor::block_on(fetch), None);
    }
}
