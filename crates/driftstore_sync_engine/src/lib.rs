//! # DriftStore Sync Engine
//!
//! Bidirectional synchronization between local storage and a remote
//! endpoint.
//!
//! This crate provides:
//! - The engine orchestrator with lifecycle control events
//! - A durable, coalescing mutation outbox
//! - Paged base and delta sync with per-model cursors
//! - Live subscription handling with pre-sync buffering
//! - Remote merge with pending-mutation suppression
//! - Retry with exponential backoff
//! - A remote client abstraction with a scriptable mock
//!
//! ## Architecture
//!
//! The engine runs three background workers over shared storage:
//! 1. A storage observer turning local writes into outbox mutations
//! 2. A subscription listener applying remote change notifications
//! 3. An orchestrator driving sync cycles and connectivity transitions
//!
//! ## Key Invariants
//!
//! - Local data is always readable and writable, online or offline
//! - Outbox mutations deliver strictly in order, head-first
//! - Remote records never overwrite records with pending local edits
//! - Subscription data buffers until the initial sync pass completes

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod connectivity;
mod engine;
mod error;
mod merger;
mod outbox;
mod processors;
mod registry;
mod remote;

pub use config::{RetryConfig, SyncConfig};
pub use connectivity::{ConnectivityMonitor, ConnectivityStatus};
pub use engine::{ControlEvent, EngineState, SyncEngine};
pub use error::{SyncError, SyncResult};
pub use merger::ModelMerger;
pub use outbox::{EnqueueOutcome, MutationOutbox};
pub use processors::{
    ConnectionSignal, DrainOutcome, ModelSyncOutcome, MutationProcessor, SubscriptionProcessor,
    SyncProcessor, SyncReport,
};
pub use registry::{BackgroundRegistry, ShutdownToken};
pub use remote::{MockRemote, RemoteClient};
