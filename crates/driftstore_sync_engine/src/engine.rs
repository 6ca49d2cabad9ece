//! The sync engine orchestrator.

use crate::config::SyncConfig;
use crate::connectivity::{ConnectivityMonitor, ConnectivityStatus};
use crate::error::{SyncError, SyncResult};
use crate::merger::ModelMerger;
use crate::outbox::MutationOutbox;
use crate::processors::{ConnectionSignal, MutationProcessor, SubscriptionProcessor, SyncProcessor};
use crate::registry::{BackgroundRegistry, ShutdownToken};
use crate::remote::RemoteClient;
use driftstore_model::{ModelDefinition, Record, MODEL_METADATA_MODEL, USER_NAMESPACE};
use driftstore_storage::{OpType, StorageAdapter, StorageChange, WriteOrigin};
use driftstore_sync_protocol::{ModelMetadata, MutationEvent, MutationOp};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Lifecycle and progress notifications from the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlEvent {
    /// The engine is observing local storage changes.
    StorageSubscribed,
    /// All subscription channels are established.
    SubscriptionsEstablished,
    /// A sync pass began over the listed models, in sync order.
    SyncQueriesStarted {
        /// Models about to be synced.
        models: Vec<String>,
    },
    /// One model's sync pass completed.
    ModelSynced {
        /// Model name.
        model: String,
        /// Whether this was a base sync.
        base: bool,
        /// Records inserted.
        new: usize,
        /// Records updated.
        updated: usize,
        /// Records deleted.
        deleted: usize,
    },
    /// The sync pass finished for every model.
    SyncQueriesReady,
    /// Initial sync is done and live processing is active.
    Ready,
    /// A local mutation entered the outbox.
    OutboxMutationEnqueued {
        /// Model of the mutation.
        model: String,
    },
    /// A mutation was acknowledged by the remote.
    OutboxMutationProcessed {
        /// Model of the mutation.
        model: String,
    },
    /// Outbox emptiness after a drain.
    OutboxStatus {
        /// True if no mutations are queued.
        is_empty: bool,
    },
    /// The subscription connection dropped; a resync is underway.
    ConnectionDisrupted,
    /// Connectivity changed. Remote work suspends while inactive and
    /// resumes with a resync when connectivity returns.
    NetworkStatus {
        /// True when the remote is reachable.
        active: bool,
    },
    /// A background failure that did not stop the engine.
    Error {
        /// Human-readable failure description.
        message: String,
    },
    /// The engine stopped.
    Stopped,
}

/// Engine lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Not running.
    Stopped,
    /// Attaching the local storage change observer.
    SubscribingStorage,
    /// Opening the remote subscription channel.
    EstablishingSubscriptions,
    /// A paged sync pass is in progress.
    RunningSync,
    /// Live: subscriptions applied, outbox drained as mutations arrive.
    Ready,
    /// Running but offline; local writes queue in the outbox.
    Paused,
    /// Stop requested, workers shutting down.
    Stopping,
}

/// Distributes control events to subscribers.
struct ControlFeed {
    subscribers: RwLock<Vec<Sender<ControlEvent>>>,
}

impl ControlFeed {
    fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
        }
    }

    fn subscribe(&self) -> Receiver<ControlEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    fn emit(&self, event: ControlEvent) {
        let mut subscribers = self.subscribers.write();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

/// The components every worker thread shares.
#[derive(Clone)]
struct EngineCore {
    storage: Arc<StorageAdapter>,
    outbox: Arc<MutationOutbox>,
    merger: Arc<ModelMerger>,
    sync: Arc<SyncProcessor>,
    mutations: Arc<MutationProcessor>,
    subscriptions: Arc<SubscriptionProcessor>,
    control: Arc<ControlFeed>,
}

impl EngineCore {
    /// Turns a locally-originated storage change into an outbox entry
    /// and, when live, drains the queue.
    fn handle_local_change(
        &self,
        change: StorageChange,
        live: bool,
        token: &ShutdownToken,
    ) -> SyncResult<()> {
        let schema = self.storage.schema()?;
        let definition = schema.user_model(&change.model)?;
        let model_id = change.record.identifier(definition)?;

        let op = match change.op_type {
            OpType::Insert => MutationOp::Create,
            OpType::Update => MutationOp::Update,
            OpType::Delete => MutationOp::Delete,
        };
        // Creates carry the full record; updates only the fields the
        // write changed; deletes only the key fields. The remote never
        // needs more, and the outbox coalesces these payloads as field
        // sets.
        let data = match change.op_type {
            OpType::Insert => change.record.clone(),
            OpType::Update => {
                changed_fields(definition, &change.record, change.previous.as_ref())
            }
            OpType::Delete => key_fields(definition, &change.record),
        };
        let version = change
            .record
            .version()
            .or_else(|| change.previous.as_ref().and_then(Record::version));
        let mut event =
            MutationEvent::new(&change.model, model_id, op, data).with_version(version);
        if let Some(condition) = change.condition {
            event = event.with_condition(condition);
        }

        self.storage
            .run_exclusive(|s| self.outbox.enqueue(s, event))?;
        self.control.emit(ControlEvent::OutboxMutationEnqueued {
            model: change.model.clone(),
        });

        if live {
            self.drain_outbox(token)?;
        }
        Ok(())
    }

    /// Drains the outbox and reports the results on the control feed.
    fn drain_outbox(&self, token: &ShutdownToken) -> SyncResult<()> {
        let outcome = self
            .mutations
            .drain(&self.storage, &self.outbox, &self.merger, token)?;
        for event in &outcome.processed {
            self.control.emit(ControlEvent::OutboxMutationProcessed {
                model: event.model.clone(),
            });
        }
        if !outcome.processed.is_empty() || !outcome.dropped.is_empty() {
            let is_empty = self
                .storage
                .run_exclusive(|s| self.outbox.is_empty(s))
                .unwrap_or(true);
            self.control.emit(ControlEvent::OutboxStatus { is_empty });
        }
        Ok(())
    }

    /// One full cycle: paged sync, buffered subscription flush, outbox
    /// drain.
    fn run_cycle(&self, token: &ShutdownToken) {
        let models = self.sync.sync_order(&self.storage).unwrap_or_default();
        self.control
            .emit(ControlEvent::SyncQueriesStarted { models });

        match self
            .sync
            .run(&self.storage, &self.outbox, &self.merger, now_ms())
        {
            Ok(report) => {
                for outcome in report.outcomes {
                    self.control.emit(ControlEvent::ModelSynced {
                        model: outcome.model,
                        base: outcome.base,
                        new: outcome.new,
                        updated: outcome.updated,
                        deleted: outcome.deleted,
                    });
                }
                for (model, error) in report.errors {
                    warn!(model = %model, error = %error, "sync pass error");
                }
            }
            Err(error) => {
                warn!(error = %error, "sync pass failed");
                self.control.emit(ControlEvent::Error {
                    message: error.to_string(),
                });
            }
        }
        self.control.emit(ControlEvent::SyncQueriesReady);

        if let Err(error) =
            self.subscriptions
                .start_draining(&self.storage, &self.outbox, &self.merger)
        {
            warn!(error = %error, "subscription buffer flush failed");
            self.control.emit(ControlEvent::Error {
                message: error.to_string(),
            });
        }
        if let Err(error) = self.drain_outbox(token) {
            warn!(error = %error, "outbox drain failed");
            self.control.emit(ControlEvent::Error {
                message: error.to_string(),
            });
        }
    }

    /// Epoch milliseconds when the earliest per-model full sync falls
    /// due, from the persisted cursors.
    fn next_full_sync_due(&self) -> Option<i64> {
        let records = self.storage.query(MODEL_METADATA_MODEL, None, None).ok()?;
        records
            .iter()
            .filter_map(|record| ModelMetadata::from_record(record).ok())
            .filter_map(|metadata| {
                metadata
                    .last_full_sync
                    .map(|at| at.saturating_add(metadata.full_sync_interval_ms as i64))
            })
            .min()
    }
}

/// Orchestrates bidirectional sync between local storage and a remote.
///
/// Owns the background workers: a storage observer feeding the outbox,
/// a subscription listener, and an orchestration loop driving sync
/// cycles and connectivity transitions. `start` and `stop` may be
/// called repeatedly; state is re-read from storage on every start.
pub struct SyncEngine {
    core: EngineCore,
    remote: Arc<dyn RemoteClient>,
    connectivity: Arc<ConnectivityMonitor>,
    state: Arc<RwLock<EngineState>>,
    registry: BackgroundRegistry,
    resync_needed: Arc<AtomicBool>,
}

impl SyncEngine {
    /// Creates an engine over initialized storage and a remote client.
    pub fn new(
        storage: Arc<StorageAdapter>,
        remote: Arc<dyn RemoteClient>,
        config: SyncConfig,
    ) -> Self {
        Self::with_connectivity(storage, remote, config, Arc::new(ConnectivityMonitor::new(true)))
    }

    /// Creates an engine driven by an external connectivity monitor.
    pub fn with_connectivity(
        storage: Arc<StorageAdapter>,
        remote: Arc<dyn RemoteClient>,
        config: SyncConfig,
        connectivity: Arc<ConnectivityMonitor>,
    ) -> Self {
        let core = EngineCore {
            storage,
            outbox: Arc::new(MutationOutbox::new()),
            merger: Arc::new(ModelMerger::new()),
            sync: Arc::new(SyncProcessor::new(Arc::clone(&remote), config.clone())),
            mutations: Arc::new(MutationProcessor::new(
                Arc::clone(&remote),
                config.retry.clone(),
            )),
            subscriptions: Arc::new(SubscriptionProcessor::new()),
            control: Arc::new(ControlFeed::new()),
        };
        Self {
            core,
            remote,
            connectivity,
            state: Arc::new(RwLock::new(EngineState::Stopped)),
            registry: BackgroundRegistry::new(),
            resync_needed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The current lifecycle state.
    pub fn state(&self) -> EngineState {
        *self.state.read()
    }

    /// Subscribes to control events.
    pub fn subscribe_control(&self) -> Receiver<ControlEvent> {
        self.core.control.subscribe()
    }

    /// Starts the engine.
    ///
    /// Spawns the background workers and begins the initial sync
    /// cycle. Returns a control receiver; [`ControlEvent::Ready`]
    /// marks the end of initial sync.
    pub fn start(&self) -> SyncResult<Receiver<ControlEvent>> {
        {
            let mut state = self.state.write();
            if *state != EngineState::Stopped {
                return Err(SyncError::AlreadyRunning);
            }
            *state = EngineState::SubscribingStorage;
        }
        info!("sync engine starting");

        let receiver = self.core.control.subscribe();
        self.registry.open();

        self.spawn_storage_observer();
        self.core.control.emit(ControlEvent::StorageSubscribed);
        *self.state.write() = EngineState::EstablishingSubscriptions;
        self.spawn_subscription_listener();
        self.spawn_orchestrator();

        Ok(receiver)
    }

    /// Stops the engine.
    ///
    /// New work is refused first, then every worker is joined, then
    /// the in-flight marker is dropped so the head mutation is resent
    /// on the next start.
    pub fn stop(&self) -> SyncResult<()> {
        {
            let mut state = self.state.write();
            if *state == EngineState::Stopped {
                return Err(SyncError::NotRunning);
            }
            *state = EngineState::Stopping;
        }

        self.registry.close();
        self.core.outbox.clear_in_flight();
        self.core.subscriptions.pause();

        *self.state.write() = EngineState::Stopped;
        self.core.control.emit(ControlEvent::Stopped);
        info!("sync engine stopped");
        Ok(())
    }

    fn spawn_storage_observer(&self) {
        let core = self.core.clone();
        let state = Arc::clone(&self.state);
        let connectivity = Arc::clone(&self.connectivity);
        let changes = self.core.storage.observe();

        self.registry.spawn(move |token| {
            while !token.is_stopped() {
                match changes.recv_timeout(POLL_INTERVAL) {
                    Ok(change) => {
                        if change.origin != WriteOrigin::Local
                            || change.namespace != USER_NAMESPACE
                        {
                            continue;
                        }
                        let live =
                            *state.read() == EngineState::Ready && connectivity.is_online();
                        if let Err(error) = core.handle_local_change(change, live, &token) {
                            warn!(error = %error, "failed to process local change");
                            core.control.emit(ControlEvent::Error {
                                message: error.to_string(),
                            });
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        });
    }

    fn spawn_subscription_listener(&self) {
        let messages = match self.remote.subscribe() {
            Ok(rx) => rx,
            Err(error) => {
                warn!(error = %error, "subscriptions unavailable");
                return;
            }
        };
        let core = self.core.clone();
        let resync_needed = Arc::clone(&self.resync_needed);

        self.registry.spawn(move |token| {
            while !token.is_stopped() {
                match messages.recv_timeout(POLL_INTERVAL) {
                    Ok(message) => {
                        let signal = core.subscriptions.handle(
                            &core.storage,
                            &core.outbox,
                            &core.merger,
                            message,
                        );
                        match signal {
                            Ok(Some(ConnectionSignal::Connected)) => {
                                core.control.emit(ControlEvent::SubscriptionsEstablished);
                            }
                            Ok(Some(ConnectionSignal::Disrupted)) => {
                                resync_needed.store(true, Ordering::SeqCst);
                                core.control.emit(ControlEvent::ConnectionDisrupted);
                            }
                            Ok(Some(ConnectionSignal::Disconnected)) | Ok(None) => {}
                            Err(error) => {
                                warn!(error = %error, "subscription message failed");
                            }
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        });
    }

    fn spawn_orchestrator(&self) {
        let core = self.core.clone();
        let state = Arc::clone(&self.state);
        let connectivity = Arc::clone(&self.connectivity);
        let resync_needed = Arc::clone(&self.resync_needed);
        let transitions = self.connectivity.subscribe();

        self.registry.spawn(move |token| {
            let mut full_sync_deadline = None;
            if connectivity.is_online() {
                *state.write() = EngineState::RunningSync;
                core.run_cycle(&token);
                *state.write() = EngineState::Ready;
                core.control.emit(ControlEvent::Ready);
                full_sync_deadline = core.next_full_sync_due();
            } else {
                *state.write() = EngineState::Paused;
                core.control
                    .emit(ControlEvent::NetworkStatus { active: false });
            }

            loop {
                if token.wait_timeout(POLL_INTERVAL) {
                    break;
                }

                // Periodic full resync per the persisted cursors.
                if full_sync_deadline.is_some_and(|deadline| now_ms() >= deadline) {
                    resync_needed.store(true, Ordering::SeqCst);
                    full_sync_deadline = None;
                }

                while let Ok(status) = transitions.try_recv() {
                    match status {
                        ConnectivityStatus::Offline => {
                            *state.write() = EngineState::Paused;
                            core.subscriptions.pause();
                            core.control
                                .emit(ControlEvent::NetworkStatus { active: false });
                        }
                        ConnectivityStatus::Online => {
                            resync_needed.store(true, Ordering::SeqCst);
                            core.control
                                .emit(ControlEvent::NetworkStatus { active: true });
                        }
                    }
                }

                if resync_needed.swap(false, Ordering::SeqCst)
                    && connectivity.is_online()
                    && !token.is_stopped()
                {
                    let was_paused = *state.read() == EngineState::Paused;
                    *state.write() = EngineState::RunningSync;
                    core.run_cycle(&token);
                    *state.write() = EngineState::Ready;
                    if was_paused {
                        core.control.emit(ControlEvent::Ready);
                    }
                    full_sync_deadline = core.next_full_sync_due();
                }
            }
        });
    }
}

/// The fields an update puts on the wire: everything that differs from
/// the stored record it replaced, plus the key fields.
fn changed_fields(
    definition: &ModelDefinition,
    record: &Record,
    previous: Option<&Record>,
) -> Record {
    let mut data = Record::new();
    for (name, value) in record.fields() {
        if Record::is_metadata_field(name) {
            continue;
        }
        let unchanged = previous.is_some_and(|prev| prev.get(name) == Some(value));
        if !unchanged {
            data.set(name.clone(), value.clone());
        }
    }
    copy_keys(definition, record, &mut data);
    data
}

/// Just the key fields, for delete mutations.
fn key_fields(definition: &ModelDefinition, record: &Record) -> Record {
    let mut data = Record::new();
    copy_keys(definition, record, &mut data);
    data
}

fn copy_keys(definition: &ModelDefinition, record: &Record, data: &mut Record) {
    for key in &definition.primary_key {
        if let Some(value) = record.get(key) {
            data.set(key.clone(), value.clone());
        }
    }
}

/// Current wall-clock time in epoch milliseconds.
fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
