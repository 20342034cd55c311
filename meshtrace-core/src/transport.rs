//! Seam to the radio layer that actually emits traceroute requests.

use crate::{NodeNum, TransportError};
use std::sync::Arc;

/// Sends traceroute requests over the mesh.
///
/// Only the send is modelled here. The reply, if any, arrives later through
/// the ingestion path as a `ProbeResult`.
#[async_trait::async_trait]
pub trait ProbeTransport: Send + Sync {
    /// Ask the radio to traceroute from `from` (the local node) to `to`.
    async fn send_probe(&self, from: NodeNum, to: NodeNum) -> Result<(), TransportError>;
}

#[async_trait::async_trait]
impl<T: ProbeTransport + ?Sized> ProbeTransport for Arc<T> {
    async fn send_probe(&self, from: NodeNum, to: NodeNum) -> Result<(), TransportError> {
        (**self).send_probe(from, to).await
    }
}
