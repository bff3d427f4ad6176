use crdt_net::NetError;
use thiserror::Error;

use crate::codec::WireError;

/// Errors returned by [`SyncEngine`](crate::SyncEngine) operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The document was used before a session existed.
    #[error("shared data is not initialized; call init_shared_data or wait for a session")]
    NotInitialized,
    /// A session already exists on this node.
    #[error("shared data is already initialized")]
    AlreadyInitialized,
    /// A message could not be encoded.
    #[error(transparent)]
    Wire(#[from] WireError),
    /// The network refused an operation.
    #[error(transparent)]
    Net(#[from] NetError),
}
