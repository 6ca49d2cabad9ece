//! # Driftstore Sync Protocol
//!
//! Wire types exchanged with a remote sync endpoint and the persisted
//! bookkeeping records the engine keeps alongside them: outbox
//! mutation events, per-model sync cursors, page and mutation
//! request/response shapes, and subscription messages.
//!
//! Everything here is plain data. Processing logic lives in the sync
//! engine crate.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod compare;
mod error;
mod event;
mod messages;
mod metadata;

pub use compare::payload_matches;
pub use error::{ProtocolError, ProtocolResult};
pub use event::{MutationEvent, MutationOp};
pub use messages::{
    MutationErrorKind, MutationRequest, MutationResponse, PageRequest, PageResponse,
    SubscriptionEvent, SubscriptionMessage,
};
pub use metadata::ModelMetadata;
