//! The three sync workers: paged queries, outbox delivery, and live
//! subscriptions.

mod mutation;
mod subscription;
mod sync;

pub use mutation::{DrainOutcome, MutationProcessor};
pub use subscription::{ConnectionSignal, SubscriptionProcessor};
pub use sync::{ModelSyncOutcome, SyncProcessor, SyncReport};
