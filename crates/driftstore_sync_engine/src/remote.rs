//! Remote endpoint abstraction.

use crate::error::{SyncError, SyncResult};
use driftstore_model::Record;
use driftstore_sync_protocol::{
    MutationOp, MutationRequest, MutationResponse, PageRequest, PageResponse, SubscriptionMessage,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};

/// A client for the remote sync endpoint.
///
/// Abstracts the network layer so the engine can run against HTTP,
/// WebSocket, or mock implementations.
pub trait RemoteClient: Send + Sync {
    /// Requests one page of a model's sync query.
    fn sync_page(&self, request: &PageRequest) -> SyncResult<PageResponse>;

    /// Submits a mutation and returns the authoritative record.
    fn submit(&self, request: &MutationRequest) -> SyncResult<MutationResponse>;

    /// Opens the subscription channel for remote change notifications.
    fn subscribe(&self) -> SyncResult<Receiver<SubscriptionMessage>>;

    /// Returns true if the remote is reachable.
    fn is_connected(&self) -> bool;
}

/// A scriptable remote for testing.
///
/// Page responses are queued per model and consumed in order; once a
/// model's queue is empty, further requests get an empty final page
/// stamped with the current wall clock, the way a live service stamps
/// its sync queries.
/// Mutation results are consumed from a shared queue; with the queue
/// empty the mock acknowledges by echoing the request with a bumped
/// version. Every request is recorded.
#[derive(Default)]
pub struct MockRemote {
    connected: AtomicBool,
    pages: Mutex<HashMap<String, VecDeque<PageResponse>>>,
    failing_models: Mutex<HashSet<String>>,
    mutation_results: Mutex<VecDeque<SyncResult<MutationResponse>>>,
    page_requests: Mutex<Vec<PageRequest>>,
    submitted: Mutex<Vec<MutationRequest>>,
    subscription: Mutex<Option<Sender<SubscriptionMessage>>>,
}

impl MockRemote {
    /// Creates a connected mock with no scripted responses.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            ..Self::default()
        }
    }

    /// Queues a page response for a model.
    pub fn queue_page(&self, model: impl Into<String>, response: PageResponse) {
        self.pages
            .lock()
            .entry(model.into())
            .or_default()
            .push_back(response);
    }

    /// Queues a mutation result.
    pub fn queue_mutation_result(&self, result: SyncResult<MutationResponse>) {
        self.mutation_results.lock().push_back(result);
    }

    /// Makes sync pages for a model fail with a transport error.
    pub fn fail_pages_for(&self, model: impl Into<String>) {
        self.failing_models.lock().insert(model.into());
    }

    /// Sets the connected state.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Pushes a message onto the open subscription channel.
    ///
    /// Dropped silently if no subscriber is attached.
    pub fn push_message(&self, message: SubscriptionMessage) {
        if let Some(tx) = self.subscription.lock().as_ref() {
            let _ = tx.send(message);
        }
    }

    /// All page requests received so far.
    pub fn page_requests(&self) -> Vec<PageRequest> {
        self.page_requests.lock().clone()
    }

    /// All mutations received so far.
    pub fn submitted(&self) -> Vec<MutationRequest> {
        self.submitted.lock().clone()
    }

    fn echo_acknowledge(request: &MutationRequest) -> MutationResponse {
        let mut record = request.data.clone();
        record.set_version(request.version.unwrap_or(0) + 1);
        record.set_last_changed_at(0);
        if request.op == MutationOp::Delete {
            record.set_deleted(true);
        }
        MutationResponse { record }
    }
}

fn wall_clock_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

impl RemoteClient for MockRemote {
    fn sync_page(&self, request: &PageRequest) -> SyncResult<PageResponse> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }
        self.page_requests.lock().push(request.clone());

        if self.failing_models.lock().contains(&request.model) {
            return Err(SyncError::transport_retryable(format!(
                "scripted failure for {}",
                request.model
            )));
        }

        let mut pages = self.pages.lock();
        let response = pages
            .get_mut(&request.model)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| PageResponse::last_page(Vec::new(), wall_clock_ms()));
        Ok(response)
    }

    fn submit(&self, request: &MutationRequest) -> SyncResult<MutationResponse> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }
        self.submitted.lock().push(request.clone());

        match self.mutation_results.lock().pop_front() {
            Some(result) => result,
            None => Ok(Self::echo_acknowledge(request)),
        }
    }

    fn subscribe(&self) -> SyncResult<Receiver<SubscriptionMessage>> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }
        let (tx, rx) = mpsc::channel();
        *self.subscription.lock() = Some(tx);
        Ok(rx)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
