use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;

use crate::content::{ContentId, ShareMeta};
use crate::error::TransportError;
use crate::peer::PeerHandle;

/// Requests single blocks of shared content from remote peers.
///
/// Implemented by the session layer on top of its data fragment messages.
pub trait BlockTransport: Send + Sync + 'static {
    /// Ask `peer` for block `offset` of the `meta` variant of `id`.
    ///
    /// The returned future resolves to the block's payload. Dropping it
    /// abandons the request.
    fn request_block(
        &self,
        peer: PeerHandle,
        id: &ContentId,
        meta: &ShareMeta,
        offset: u32,
    ) -> BoxFuture<'static, Result<Bytes, TransportError>>;
}

impl<T: BlockTransport> BlockTransport for Arc<T> {
    fn request_block(
        &self,
        peer: PeerHandle,
        id: &ContentId,
        meta: &ShareMeta,
        offset: u32,
    ) -> BoxFuture<'static, Result<Bytes, TransportError>> {
        (**self).request_block(peer, id, meta, offset)
    }
}
