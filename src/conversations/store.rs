//! Authoritative conversation store with optimistic mutations.
//!
//! Every UI surface (session dropdown, chat panel, extra tabs) reads and
//! writes the conversation list through one store instance. Mutations apply
//! locally first, confirm against the backend, and roll back on failure;
//! subscribers observe exactly one notification per logical state change.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info, warn};

use super::cache::SideCache;
use super::config::SyncConfig;
use super::error::{GatewayError, SyncError, SyncResult};
use super::gateway::{ConversationGateway, ConversationPatch};
use super::ids::ConversationId;
use super::record::ConversationRecord;

/// Snapshot delivered to subscribers.
#[derive(Clone, Debug, PartialEq)]
pub struct StoreSnapshot {
    /// Records sorted by recency (`updated_at` descending).
    pub records: Vec<ConversationRecord>,
    /// True while an initial refresh is in flight and nothing is cached yet.
    pub loading: bool,
    /// Last operation failure; cleared by the next successful operation.
    pub last_error: Option<SyncError>,
}

/// Lifecycle events surfaced alongside snapshots.
///
/// A consumer whose current selection was removed uses these to redirect;
/// navigation itself stays a UI concern.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreEvent {
    /// The conversation was removed from the list.
    Removed(ConversationId),
    /// A removal failed and the conversation is visible again.
    Restored(ConversationId),
}

type SnapshotCallback = Arc<dyn Fn(StoreSnapshot) + Send + Sync>;
type EventCallback = Arc<dyn Fn(StoreEvent) + Send + Sync>;

enum RegistryRef {
    Snapshots(Weak<DashMap<u64, SnapshotCallback>>),
    Events(Weak<DashMap<u64, EventCallback>>),
}

/// Handle deregistering a subscriber.
///
/// Dropping the handle unsubscribes. [`Subscription::unsubscribe`] is
/// idempotent and safe to call after the store itself is gone.
pub struct Subscription {
    registry: RegistryRef,
    id: u64,
}

impl Subscription {
    /// Deregister the callback.
    pub fn unsubscribe(&self) {
        match &self.registry {
            RegistryRef::Snapshots(weak) => {
                if let Some(map) = weak.upgrade() {
                    map.remove(&self.id);
                }
            }
            RegistryRef::Events(weak) => {
                if let Some(map) = weak.upgrade() {
                    map.remove(&self.id);
                }
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

#[derive(Default)]
struct StoreState {
    records: HashMap<ConversationId, ConversationRecord>,
    loading: bool,
    last_error: Option<SyncError>,
}

impl StoreState {
    fn snapshot(&self) -> StoreSnapshot {
        let mut records: Vec<ConversationRecord> = self.records.values().cloned().collect();
        records.sort_by(ConversationRecord::recency_order);
        StoreSnapshot {
            records,
            loading: self.loading,
            last_error: self.last_error.clone(),
        }
    }

    /// Merge fetched records, last-write-wins by `updated_at`.
    fn merge(&mut self, incoming: Vec<ConversationRecord>) -> usize {
        let mut applied = 0;
        for record in incoming {
            match self.records.get(&record.id) {
                Some(existing) if !existing.superseded_by(&record) => {}
                _ => {
                    self.records.insert(record.id.clone(), record);
                    applied += 1;
                }
            }
        }
        applied
    }
}

/// Single source of truth for the conversation list.
///
/// All reads and writes go through the store; consumers hold only the
/// snapshots it hands out. One instance is shared (`Arc`) between every UI
/// surface, constructed explicitly and torn down by dropping. The record map
/// survives the last unsubscribe so a remounted surface starts warm.
pub struct ConversationStore {
    gateway: Arc<dyn ConversationGateway>,
    cache: Arc<dyn SideCache>,
    config: SyncConfig,
    state: Mutex<StoreState>,
    snapshot_subscribers: Arc<DashMap<u64, SnapshotCallback>>,
    event_subscribers: Arc<DashMap<u64, EventCallback>>,
    next_subscriber: AtomicU64,
    mutation_seq: DashMap<ConversationId, u64>,
    refresh_inflight: Mutex<Option<broadcast::Sender<SyncResult<()>>>>,
}

impl ConversationStore {
    /// Create a store over the given gateway and side cache.
    #[must_use]
    pub fn new(
        gateway: Arc<dyn ConversationGateway>,
        cache: Arc<dyn SideCache>,
        config: SyncConfig,
    ) -> Self {
        Self {
            gateway,
            cache,
            config,
            state: Mutex::new(StoreState::default()),
            snapshot_subscribers: Arc::new(DashMap::new()),
            event_subscribers: Arc::new(DashMap::new()),
            next_subscriber: AtomicU64::new(1),
            mutation_seq: DashMap::new(),
            refresh_inflight: Mutex::new(None),
        }
    }

    /// Register a snapshot subscriber.
    ///
    /// The callback runs immediately with the current state, then once per
    /// logical state change. Callbacks execute synchronously on the mutating
    /// task: keep them cheap and do not call back into the store from inside
    /// one; hand the snapshot to a channel or equivalent instead.
    pub async fn subscribe(
        &self,
        callback: impl Fn(StoreSnapshot) + Send + Sync + 'static,
    ) -> Subscription {
        let callback: SnapshotCallback = Arc::new(callback);
        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);

        // Registration and the initial snapshot happen under the state lock
        // so no notification can slip between them.
        let state = self.state.lock().await;
        callback(state.snapshot());
        self.snapshot_subscribers.insert(id, callback);
        drop(state);

        Subscription {
            registry: RegistryRef::Snapshots(Arc::downgrade(&self.snapshot_subscribers)),
            id,
        }
    }

    /// Register a lifecycle-event subscriber.
    pub fn subscribe_events(
        &self,
        callback: impl Fn(StoreEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        self.event_subscribers.insert(id, Arc::new(callback));
        Subscription {
            registry: RegistryRef::Events(Arc::downgrade(&self.event_subscribers)),
            id,
        }
    }

    /// Look up a conversation. Pure read; no mutation, no network call.
    pub async fn get(&self, id: &ConversationId) -> Option<ConversationRecord> {
        self.state.lock().await.records.get(id).cloned()
    }

    /// Current snapshot without subscribing.
    pub async fn snapshot(&self) -> StoreSnapshot {
        self.state.lock().await.snapshot()
    }

    /// Refresh using the configured default limit.
    pub async fn refresh_latest(&self) -> SyncResult<()> {
        self.refresh(self.config.default_refresh_limit).await
    }

    /// Fetch the most recent `limit` conversations and reconcile.
    ///
    /// A refresh already in flight is joined rather than duplicated; joiners
    /// receive the leader's outcome. On failure the existing records stay
    /// visible (stale-but-available) and the error lands in `last_error`.
    pub async fn refresh(&self, limit: usize) -> SyncResult<()> {
        let joined = {
            let mut inflight = self.refresh_inflight.lock().await;
            if let Some(tx) = inflight.as_ref() {
                Some(tx.subscribe())
            } else {
                let (tx, _) = broadcast::channel(1);
                *inflight = Some(tx);
                None
            }
        };

        if let Some(mut rx) = joined {
            debug!("refresh already in flight; joining");
            return match rx.recv().await {
                Ok(outcome) => outcome,
                Err(_) => Ok(()),
            };
        }

        let outcome = self.run_refresh(limit).await;

        let tx = self.refresh_inflight.lock().await.take();
        if let Some(tx) = tx {
            let _ = tx.send(outcome.clone());
        }
        outcome
    }

    async fn run_refresh(&self, limit: usize) -> SyncResult<()> {
        {
            let mut state = self.state.lock().await;
            if state.records.is_empty() && !state.loading {
                state.loading = true;
                self.notify(&state.snapshot());
            }
        }

        match self.gateway.list(limit).await {
            Ok(items) => {
                let mut state = self.state.lock().await;
                let applied = state.merge(items);
                state.loading = false;
                state.last_error = None;
                debug!(total = state.records.len(), applied, "refresh reconciled");
                self.notify(&state.snapshot());
                Ok(())
            }
            Err(err) => {
                let err = SyncError::from(err);
                warn!(error = %err, "refresh failed; keeping stale records");
                let mut state = self.state.lock().await;
                state.loading = false;
                state.last_error = Some(err.clone());
                self.notify(&state.snapshot());
                Err(err)
            }
        }
    }

    /// Create a conversation via the gateway and insert it.
    ///
    /// Returns the new record so the caller can navigate to it.
    pub async fn create(&self) -> SyncResult<ConversationRecord> {
        match self.gateway.create().await {
            Ok(record) => {
                let mut state = self.state.lock().await;
                state.last_error = None;
                state.records.insert(record.id.clone(), record.clone());
                self.notify(&state.snapshot());
                drop(state);
                info!(id = %record.id, "conversation created");
                Ok(record)
            }
            Err(err) => {
                let err = SyncError::from(err);
                warn!(error = %err, "create rejected");
                let mut state = self.state.lock().await;
                state.last_error = Some(err.clone());
                self.notify(&state.snapshot());
                Err(err)
            }
        }
    }

    /// Rename a conversation, optimistically.
    ///
    /// The new title is visible to subscribers before the network round-trip
    /// completes. Empty-after-trim titles and unknown ids are silent no-ops.
    /// A response that arrives after a newer mutation for the same id is
    /// discarded outright.
    pub async fn rename(&self, id: &ConversationId, new_title: &str) -> SyncResult<()> {
        let title = new_title.trim();
        if title.is_empty() {
            debug!(%id, "rename ignored: empty title");
            return Ok(());
        }

        let seq;
        let previous_title;
        {
            let mut state = self.state.lock().await;
            let Some(record) = state.records.get_mut(id) else {
                debug!(%id, "rename ignored: unknown conversation");
                return Ok(());
            };
            previous_title = std::mem::replace(&mut record.title, title.to_string());
            seq = self.next_seq(id);
            self.notify(&state.snapshot());
        }

        let result = self
            .gateway
            .update(id.clone(), ConversationPatch::rename(title))
            .await;

        let mut state = self.state.lock().await;
        if self.current_seq(id) != seq {
            debug!(%id, "rename response superseded; discarding");
            return Ok(());
        }

        match result {
            Ok(confirmed) => {
                let mut changed = state.last_error.take().is_some();
                if let Some(record) = state.records.get_mut(id) {
                    if record.updated_at != confirmed.updated_at {
                        record.updated_at = confirmed.updated_at;
                        changed = true;
                    }
                    if record.extra != confirmed.extra {
                        record.extra = confirmed.extra;
                        changed = true;
                    }
                }
                if changed {
                    self.notify(&state.snapshot());
                }
                debug!(%id, title, "rename confirmed");
                Ok(())
            }
            Err(GatewayError::NotFound) => {
                // The record vanished remotely; undo quietly and let the next
                // refresh reconcile its absence.
                if let Some(record) = state.records.get_mut(id) {
                    record.title = previous_title;
                }
                self.notify(&state.snapshot());
                debug!(%id, "rename target gone; reverted");
                Ok(())
            }
            Err(err) => {
                let err = SyncError::from(err);
                warn!(%id, error = %err, "rename rejected; rolling back");
                if let Some(record) = state.records.get_mut(id) {
                    record.title = previous_title;
                }
                state.last_error = Some(err.clone());
                self.notify(&state.snapshot());
                Err(err)
            }
        }
    }

    /// Delete a conversation, optimistically.
    ///
    /// The removal (and a [`StoreEvent::Removed`]) is visible before the
    /// gateway confirms. Confirmed deletion clears every side-cache namespace
    /// for the id; failure re-inserts the record with its original
    /// `updated_at` and emits [`StoreEvent::Restored`]. Deleting an id that
    /// is already gone is a no-op, not an error.
    pub async fn delete(&self, id: &ConversationId) -> SyncResult<()> {
        let seq;
        let removed;
        {
            let mut state = self.state.lock().await;
            let Some(record) = state.records.remove(id) else {
                debug!(%id, "delete ignored: not present");
                return Ok(());
            };
            removed = record;
            seq = self.next_seq(id);
            self.notify(&state.snapshot());
            self.emit(&StoreEvent::Removed(id.clone()));
        }

        let result = self.gateway.delete(id.clone()).await;

        let mut state = self.state.lock().await;
        if self.current_seq(id) != seq {
            debug!(%id, "delete response superseded; discarding");
            return Ok(());
        }

        let confirmed: SyncResult<()> = match result {
            Ok(true) | Err(GatewayError::NotFound) => Ok(()),
            Ok(false) => Err(SyncError::Gateway(GatewayError::Rejected {
                status: 200,
                message: "backend declined the delete".to_string(),
            })),
            Err(err) => Err(SyncError::from(err)),
        };

        match confirmed {
            Ok(()) => {
                drop(state);
                match self.cache.clear(id).await {
                    Ok(()) => {
                        let mut state = self.state.lock().await;
                        if state.last_error.take().is_some() {
                            self.notify(&state.snapshot());
                        }
                        drop(state);
                        info!(%id, "conversation deleted; side caches cleared");
                        Ok(())
                    }
                    Err(err) => {
                        let err = SyncError::from(err);
                        warn!(%id, error = %err, "side-cache invalidation failed");
                        let mut state = self.state.lock().await;
                        state.last_error = Some(err.clone());
                        self.notify(&state.snapshot());
                        Err(err)
                    }
                }
            }
            Err(err) => {
                warn!(%id, error = %err, "delete rejected; restoring record");
                state.records.insert(id.clone(), removed);
                state.last_error = Some(err.clone());
                self.notify(&state.snapshot());
                self.emit(&StoreEvent::Restored(id.clone()));
                Err(err)
            }
        }
    }

    /// Issue the next mutation sequence number for `id`.
    fn next_seq(&self, id: &ConversationId) -> u64 {
        let mut entry = self.mutation_seq.entry(id.clone()).or_insert(0);
        *entry += 1;
        *entry
    }

    /// Latest issued sequence number for `id`.
    fn current_seq(&self, id: &ConversationId) -> u64 {
        self.mutation_seq.get(id).map_or(0, |entry| *entry)
    }

    /// Deliver a snapshot to every registered subscriber.
    fn notify(&self, snapshot: &StoreSnapshot) {
        let callbacks: Vec<SnapshotCallback> = self
            .snapshot_subscribers
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for callback in callbacks {
            callback(snapshot.clone());
        }
    }

    /// Deliver a lifecycle event to every registered subscriber.
    fn emit(&self, event: &StoreEvent) {
        let callbacks: Vec<EventCallback> = self
            .event_subscribers
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for callback in callbacks {
            callback(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::AtomicUsize;

    use serde_json::json;
    use tokio::sync::oneshot;

    use super::*;
    use crate::conversations::cache::{ArtifactKind, SqliteSideCache};
    use crate::conversations::error::GatewayResult;
    use crate::conversations::gateway::GatewayFuture;

    fn record(id: &str, title: &str, updated_at: i64) -> ConversationRecord {
        ConversationRecord {
            id: ConversationId::from(id),
            title: title.to_string(),
            created_at: updated_at,
            updated_at,
            extra: serde_json::Map::new(),
        }
    }

    /// Scripted response: ready immediately, or gated on a oneshot the test holds.
    enum Scripted<T> {
        Ready(GatewayResult<T>),
        Gated(oneshot::Receiver<GatewayResult<T>>),
    }

    impl<T> Scripted<T> {
        async fn resolve(self) -> GatewayResult<T> {
            match self {
                Self::Ready(result) => result,
                Self::Gated(rx) => rx.await.unwrap_or(Err(GatewayError::Timeout)),
            }
        }
    }

    #[derive(Default)]
    struct ScriptedGateway {
        list_responses: StdMutex<VecDeque<Scripted<Vec<ConversationRecord>>>>,
        create_responses: StdMutex<VecDeque<Scripted<ConversationRecord>>>,
        update_responses: StdMutex<VecDeque<Scripted<ConversationRecord>>>,
        delete_responses: StdMutex<VecDeque<Scripted<bool>>>,
        list_calls: AtomicUsize,
        last_list_limit: AtomicUsize,
        update_calls: AtomicUsize,
        delete_calls: AtomicUsize,
    }

    impl ScriptedGateway {
        fn push_list(&self, response: GatewayResult<Vec<ConversationRecord>>) {
            self.list_responses
                .lock()
                .expect("lock")
                .push_back(Scripted::Ready(response));
        }

        fn gate_list(&self) -> oneshot::Sender<GatewayResult<Vec<ConversationRecord>>> {
            let (tx, rx) = oneshot::channel();
            self.list_responses
                .lock()
                .expect("lock")
                .push_back(Scripted::Gated(rx));
            tx
        }

        fn push_create(&self, response: GatewayResult<ConversationRecord>) {
            self.create_responses
                .lock()
                .expect("lock")
                .push_back(Scripted::Ready(response));
        }

        fn push_update(&self, response: GatewayResult<ConversationRecord>) {
            self.update_responses
                .lock()
                .expect("lock")
                .push_back(Scripted::Ready(response));
        }

        fn gate_update(&self) -> oneshot::Sender<GatewayResult<ConversationRecord>> {
            let (tx, rx) = oneshot::channel();
            self.update_responses
                .lock()
                .expect("lock")
                .push_back(Scripted::Gated(rx));
            tx
        }

        fn push_delete(&self, response: GatewayResult<bool>) {
            self.delete_responses
                .lock()
                .expect("lock")
                .push_back(Scripted::Ready(response));
        }

        fn gate_delete(&self) -> oneshot::Sender<GatewayResult<bool>> {
            let (tx, rx) = oneshot::channel();
            self.delete_responses
                .lock()
                .expect("lock")
                .push_back(Scripted::Gated(rx));
            tx
        }
    }

    impl ConversationGateway for ScriptedGateway {
        fn list(&self, limit: usize) -> GatewayFuture<'_, GatewayResult<Vec<ConversationRecord>>> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            self.last_list_limit.store(limit, Ordering::SeqCst);
            let next = self.list_responses.lock().expect("lock").pop_front();
            Box::pin(async move {
                match next {
                    Some(scripted) => scripted.resolve().await,
                    None => Err(GatewayError::Network("unscripted list".to_string())),
                }
            })
        }

        fn create(&self) -> GatewayFuture<'_, GatewayResult<ConversationRecord>> {
            let next = self.create_responses.lock().expect("lock").pop_front();
            Box::pin(async move {
                match next {
                    Some(scripted) => scripted.resolve().await,
                    None => Err(GatewayError::Network("unscripted create".to_string())),
                }
            })
        }

        fn update(
            &self,
            _id: ConversationId,
            _patch: ConversationPatch,
        ) -> GatewayFuture<'_, GatewayResult<ConversationRecord>> {
            self.update_calls.fetch_add(1, Ordering::SeqCst);
            let next = self.update_responses.lock().expect("lock").pop_front();
            Box::pin(async move {
                match next {
                    Some(scripted) => scripted.resolve().await,
                    None => Err(GatewayError::Network("unscripted update".to_string())),
                }
            })
        }

        fn delete(&self, _id: ConversationId) -> GatewayFuture<'_, GatewayResult<bool>> {
            self.delete_calls.fetch_add(1, Ordering::SeqCst);
            let next = self.delete_responses.lock().expect("lock").pop_front();
            Box::pin(async move {
                match next {
                    Some(scripted) => scripted.resolve().await,
                    None => Err(GatewayError::Network("unscripted delete".to_string())),
                }
            })
        }
    }

    #[derive(Clone, Default)]
    struct SnapshotLog(Arc<StdMutex<Vec<StoreSnapshot>>>);

    impl SnapshotLog {
        fn recorder(&self) -> impl Fn(StoreSnapshot) + Send + Sync + 'static {
            let log = self.0.clone();
            move |snapshot| log.lock().expect("lock").push(snapshot)
        }

        fn len(&self) -> usize {
            self.0.lock().expect("lock").len()
        }

        fn last(&self) -> Option<StoreSnapshot> {
            self.0.lock().expect("lock").last().cloned()
        }

        fn last_titles(&self) -> Vec<String> {
            self.last()
                .map(|s| s.records.into_iter().map(|r| r.title).collect())
                .unwrap_or_default()
        }
    }

    #[derive(Clone, Default)]
    struct EventLog(Arc<StdMutex<Vec<StoreEvent>>>);

    impl EventLog {
        fn recorder(&self) -> impl Fn(StoreEvent) + Send + Sync + 'static {
            let log = self.0.clone();
            move |event| log.lock().expect("lock").push(event)
        }

        fn events(&self) -> Vec<StoreEvent> {
            self.0.lock().expect("lock").clone()
        }
    }

    async fn new_store(
        gateway: &Arc<ScriptedGateway>,
    ) -> (Arc<ConversationStore>, Arc<SqliteSideCache>) {
        let cache = Arc::new(SqliteSideCache::open_in_memory(16).await.expect("cache"));
        let store = ConversationStore::new(
            gateway.clone(),
            cache.clone(),
            SyncConfig::default(),
        );
        (Arc::new(store), cache)
    }

    /// Seed the store with records through a scripted refresh.
    async fn seed(store: &ConversationStore, gateway: &ScriptedGateway, records: Vec<ConversationRecord>) {
        gateway.push_list(Ok(records));
        let refreshed = store.refresh(50).await;
        assert!(refreshed.is_ok());
    }

    /// Give spawned tasks a chance to run up to their next suspension point.
    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_subscribe_delivers_immediate_snapshot() {
        let gateway = Arc::new(ScriptedGateway::default());
        let (store, _cache) = new_store(&gateway).await;
        seed(&store, &gateway, vec![record("1", "Sales Q1", 100)]).await;

        let log = SnapshotLog::default();
        let _sub = store.subscribe(log.recorder()).await;

        assert_eq!(log.len(), 1);
        assert_eq!(log.last_titles(), vec!["Sales Q1".to_string()]);
        let first = log.last().unwrap_or_else(|| panic!("missing snapshot"));
        assert!(!first.loading);
        assert_eq!(first.last_error, None);
    }

    #[tokio::test]
    async fn test_initial_refresh_reports_loading_then_records() {
        let gateway = Arc::new(ScriptedGateway::default());
        let (store, _cache) = new_store(&gateway).await;

        let log = SnapshotLog::default();
        let _sub = store.subscribe(log.recorder()).await;
        assert_eq!(log.len(), 1); // empty initial snapshot

        gateway.push_list(Ok(vec![
            record("1", "Sales Q1", 100),
            record("2", "Churn", 200),
        ]));
        let refreshed = store.refresh(20).await;
        assert!(refreshed.is_ok());

        let snapshots = log.0.lock().expect("lock").clone();
        assert_eq!(snapshots.len(), 3);
        assert!(snapshots[1].loading);
        assert!(snapshots[1].records.is_empty());
        assert!(!snapshots[2].loading);
        assert_eq!(
            snapshots[2]
                .records
                .iter()
                .map(|r| r.id.as_str())
                .collect::<Vec<_>>(),
            vec!["2", "1"]
        );
    }

    #[tokio::test]
    async fn test_concurrent_refreshes_share_one_list_request() {
        let gateway = Arc::new(ScriptedGateway::default());
        let (store, _cache) = new_store(&gateway).await;

        let release = gateway.gate_list();
        let first = tokio::spawn({
            let store = store.clone();
            async move { store.refresh(20).await }
        });
        settle().await;
        let second = tokio::spawn({
            let store = store.clone();
            async move { store.refresh(20).await }
        });
        settle().await;

        assert_eq!(gateway.list_calls.load(Ordering::SeqCst), 1);

        let sent = release.send(Ok(vec![record("1", "Sales Q1", 100)]));
        assert!(sent.is_ok());

        let first = first.await.expect("join");
        let second = second.await.expect("join");
        assert!(first.is_ok());
        assert!(second.is_ok());
        assert_eq!(gateway.list_calls.load(Ordering::SeqCst), 1);

        let snapshot = store.snapshot().await;
        assert_eq!(snapshot.records.len(), 1);
    }

    #[tokio::test]
    async fn test_refresh_failure_keeps_stale_records() {
        let gateway = Arc::new(ScriptedGateway::default());
        let (store, _cache) = new_store(&gateway).await;
        seed(&store, &gateway, vec![record("1", "Sales Q1", 100)]).await;

        let log = SnapshotLog::default();
        let _sub = store.subscribe(log.recorder()).await;

        gateway.push_list(Err(GatewayError::Network("connection reset".to_string())));
        let refreshed = store.refresh(20).await;
        assert!(refreshed.is_err());

        let last = log.last().unwrap_or_else(|| panic!("missing snapshot"));
        assert_eq!(log.len(), 2); // initial + failure, no loading flip over warm data
        assert_eq!(last.records.len(), 1);
        assert_eq!(last.records[0].title, "Sales Q1");
        assert!(last.last_error.is_some());
        assert!(!last.loading);
    }

    #[tokio::test]
    async fn test_refresh_merge_is_last_write_wins() {
        let gateway = Arc::new(ScriptedGateway::default());
        let (store, _cache) = new_store(&gateway).await;
        seed(
            &store,
            &gateway,
            vec![record("1", "Local newer", 300), record("2", "Old", 100)],
        )
        .await;

        gateway.push_list(Ok(vec![
            record("1", "Remote stale", 200),
            record("2", "Fresh", 400),
        ]));
        let refreshed = store.refresh(20).await;
        assert!(refreshed.is_ok());

        let snapshot = store.snapshot().await;
        let titles: Vec<&str> = snapshot.records.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["Fresh", "Local newer"]);
    }

    #[tokio::test]
    async fn test_rename_is_optimistic_and_rolls_back_on_failure() {
        let gateway = Arc::new(ScriptedGateway::default());
        let (store, _cache) = new_store(&gateway).await;
        seed(&store, &gateway, vec![record("1", "Sales Q1", 100)]).await;

        let log = SnapshotLog::default();
        let _sub = store.subscribe(log.recorder()).await;

        let release = gateway.gate_update();
        let rename = tokio::spawn({
            let store = store.clone();
            async move { store.rename(&ConversationId::from("1"), "Sales Q1 Final").await }
        });
        settle().await;

        // Optimistic title is visible before the gateway resolves.
        assert_eq!(log.last_titles(), vec!["Sales Q1 Final".to_string()]);
        let optimistic = log.last().unwrap_or_else(|| panic!("missing snapshot"));
        assert_eq!(optimistic.last_error, None);

        let sent = release.send(Err(GatewayError::Rejected {
            status: 500,
            message: "storage unavailable".to_string(),
        }));
        assert!(sent.is_ok());

        let outcome = rename.await.expect("join");
        assert!(outcome.is_err());

        let rolled_back = log.last().unwrap_or_else(|| panic!("missing snapshot"));
        assert_eq!(rolled_back.records[0].title, "Sales Q1");
        assert!(rolled_back.last_error.is_some());
    }

    #[tokio::test]
    async fn test_rename_round_trips_through_refresh() {
        let gateway = Arc::new(ScriptedGateway::default());
        let (store, _cache) = new_store(&gateway).await;
        seed(&store, &gateway, vec![record("1", "Sales Q1", 100)]).await;

        gateway.push_update(Ok(record("1", "Foo", 150)));
        let renamed = store.rename(&ConversationId::from("1"), "Foo").await;
        assert!(renamed.is_ok());

        gateway.push_list(Ok(vec![record("1", "Foo", 150)]));
        let refreshed = store.refresh(20).await;
        assert!(refreshed.is_ok());

        let snapshot = store.snapshot().await;
        assert_eq!(snapshot.records[0].title, "Foo");
        assert_eq!(snapshot.records[0].updated_at, 150);
    }

    #[tokio::test]
    async fn test_rename_with_empty_title_is_a_silent_noop() {
        let gateway = Arc::new(ScriptedGateway::default());
        let (store, _cache) = new_store(&gateway).await;
        seed(&store, &gateway, vec![record("1", "Sales Q1", 100)]).await;

        let log = SnapshotLog::default();
        let _sub = store.subscribe(log.recorder()).await;

        let renamed = store.rename(&ConversationId::from("1"), "   ").await;
        assert!(renamed.is_ok());

        assert_eq!(gateway.update_calls.load(Ordering::SeqCst), 0);
        assert_eq!(log.len(), 1); // no notification beyond the initial snapshot
        assert_eq!(log.last_titles(), vec!["Sales Q1".to_string()]);
    }

    #[tokio::test]
    async fn test_rename_of_unknown_id_is_a_noop() {
        let gateway = Arc::new(ScriptedGateway::default());
        let (store, _cache) = new_store(&gateway).await;

        let renamed = store.rename(&ConversationId::from("ghost"), "Anything").await;
        assert!(renamed.is_ok());
        assert_eq!(gateway.update_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stale_rename_response_never_clobbers_newer_title() {
        let gateway = Arc::new(ScriptedGateway::default());
        let (store, _cache) = new_store(&gateway).await;
        seed(&store, &gateway, vec![record("1", "Original", 100)]).await;

        let first_release = gateway.gate_update();
        let first = tokio::spawn({
            let store = store.clone();
            async move { store.rename(&ConversationId::from("1"), "First").await }
        });
        settle().await;

        let second_release = gateway.gate_update();
        let second = tokio::spawn({
            let store = store.clone();
            async move { store.rename(&ConversationId::from("1"), "Second").await }
        });
        settle().await;

        // The newer rename resolves first.
        let sent = second_release.send(Ok(record("1", "Second", 300)));
        assert!(sent.is_ok());
        let outcome = second.await.expect("join");
        assert!(outcome.is_ok());
        assert_eq!(store.snapshot().await.records[0].title, "Second");

        // The older response arrives late, as a success...
        let sent = first_release.send(Ok(record("1", "First", 250)));
        assert!(sent.is_ok());
        let outcome = first.await.expect("join");
        assert!(outcome.is_ok());

        // ...and is discarded: title and timestamp stay at the newer value.
        let snapshot = store.snapshot().await;
        assert_eq!(snapshot.records[0].title, "Second");
        assert_eq!(snapshot.records[0].updated_at, 300);
        assert_eq!(snapshot.last_error, None);
    }

    #[tokio::test]
    async fn test_stale_rename_failure_does_not_roll_back_newer_title() {
        let gateway = Arc::new(ScriptedGateway::default());
        let (store, _cache) = new_store(&gateway).await;
        seed(&store, &gateway, vec![record("1", "Original", 100)]).await;

        let first_release = gateway.gate_update();
        let first = tokio::spawn({
            let store = store.clone();
            async move { store.rename(&ConversationId::from("1"), "First").await }
        });
        settle().await;

        gateway.push_update(Ok(record("1", "Second", 300)));
        let renamed = store.rename(&ConversationId::from("1"), "Second").await;
        assert!(renamed.is_ok());

        let sent = first_release.send(Err(GatewayError::Timeout));
        assert!(sent.is_ok());
        let outcome = first.await.expect("join");
        assert!(outcome.is_ok()); // superseded, not an error

        let snapshot = store.snapshot().await;
        assert_eq!(snapshot.records[0].title, "Second");
        assert_eq!(snapshot.last_error, None);
    }

    #[tokio::test]
    async fn test_delete_is_optimistic_and_clears_side_caches() {
        let gateway = Arc::new(ScriptedGateway::default());
        let (store, cache) = new_store(&gateway).await;
        seed(&store, &gateway, vec![record("1", "Sales Q1", 100)]).await;

        let id = ConversationId::from("1");
        for kind in ArtifactKind::ALL {
            let stored = cache.put(kind, &id, json!({"derived": true})).await;
            assert!(stored.is_ok());
        }

        let log = SnapshotLog::default();
        let events = EventLog::default();
        let _sub = store.subscribe(log.recorder()).await;
        let _events = store.subscribe_events(events.recorder());

        let release = gateway.gate_delete();
        let delete = tokio::spawn({
            let store = store.clone();
            async move { store.delete(&ConversationId::from("1")).await }
        });
        settle().await;

        // Removal is visible before the gateway confirms.
        let optimistic = log.last().unwrap_or_else(|| panic!("missing snapshot"));
        assert!(optimistic.records.is_empty());
        assert_eq!(events.events(), vec![StoreEvent::Removed(id.clone())]);

        let sent = release.send(Ok(true));
        assert!(sent.is_ok());
        let outcome = delete.await.expect("join");
        assert!(outcome.is_ok());

        for kind in ArtifactKind::ALL {
            let loaded = cache.get(kind, &id).await.expect("get");
            assert_eq!(loaded, None, "{} should be cleared", kind.key(&id));
        }
    }

    #[tokio::test]
    async fn test_delete_failure_restores_record_in_place() {
        let gateway = Arc::new(ScriptedGateway::default());
        let (store, cache) = new_store(&gateway).await;
        seed(
            &store,
            &gateway,
            vec![record("1", "Older", 100), record("2", "Newer", 200)],
        )
        .await;

        let id = ConversationId::from("1");
        let stored = cache.put(ArtifactKind::Messages, &id, json!(["kept"])).await;
        assert!(stored.is_ok());

        let events = EventLog::default();
        let _events = store.subscribe_events(events.recorder());

        gateway.push_delete(Err(GatewayError::Network("gateway down".to_string())));
        let outcome = store.delete(&id).await;
        assert!(outcome.is_err());

        let snapshot = store.snapshot().await;
        let ids: Vec<&str> = snapshot.records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["2", "1"]); // original updated_at kept its sort slot
        assert_eq!(snapshot.records[1].updated_at, 100);
        assert!(snapshot.last_error.is_some());
        assert_eq!(
            events.events(),
            vec![StoreEvent::Removed(id.clone()), StoreEvent::Restored(id.clone())]
        );

        // The side cache was never touched.
        let kept = cache.get(ArtifactKind::Messages, &id).await.expect("get");
        assert_eq!(kept, Some(json!(["kept"])));
    }

    #[tokio::test]
    async fn test_declined_delete_rolls_back_like_a_failure() {
        let gateway = Arc::new(ScriptedGateway::default());
        let (store, _cache) = new_store(&gateway).await;
        seed(&store, &gateway, vec![record("1", "Sales Q1", 100)]).await;

        gateway.push_delete(Ok(false));
        let outcome = store.delete(&ConversationId::from("1")).await;
        assert!(outcome.is_err());

        let snapshot = store.snapshot().await;
        assert_eq!(snapshot.records.len(), 1);
        assert!(snapshot.last_error.is_some());
    }

    #[tokio::test]
    async fn test_refresh_latest_uses_the_configured_limit() {
        let gateway = Arc::new(ScriptedGateway::default());
        let cache = Arc::new(SqliteSideCache::open_in_memory(16).await.expect("cache"));
        let store = ConversationStore::new(
            gateway.clone(),
            cache,
            SyncConfig::default().with_refresh_limit(5),
        );

        gateway.push_list(Ok(vec![record("1", "Sales Q1", 100)]));
        let refreshed = store.refresh_latest().await;
        assert!(refreshed.is_ok());
        assert_eq!(gateway.last_list_limit.load(Ordering::SeqCst), 5);
        assert_eq!(store.snapshot().await.records.len(), 1);
    }

    #[tokio::test]
    async fn test_second_delete_after_success_is_a_noop() {
        let gateway = Arc::new(ScriptedGateway::default());
        let (store, _cache) = new_store(&gateway).await;
        seed(&store, &gateway, vec![record("1", "Sales Q1", 100)]).await;

        gateway.push_delete(Ok(true));
        let first = store.delete(&ConversationId::from("1")).await;
        assert!(first.is_ok());

        let second = store.delete(&ConversationId::from("1")).await;
        assert!(second.is_ok());
        assert_eq!(gateway.delete_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_delete_of_remotely_missing_record_counts_as_success() {
        let gateway = Arc::new(ScriptedGateway::default());
        let (store, cache) = new_store(&gateway).await;
        seed(&store, &gateway, vec![record("1", "Sales Q1", 100)]).await;

        let id = ConversationId::from("1");
        let stored = cache.put(ArtifactKind::Progress, &id, json!(0.4)).await;
        assert!(stored.is_ok());

        gateway.push_delete(Err(GatewayError::NotFound));
        let outcome = store.delete(&id).await;
        assert!(outcome.is_ok());

        assert!(store.snapshot().await.records.is_empty());
        let cleared = cache.get(ArtifactKind::Progress, &id).await.expect("get");
        assert_eq!(cleared, None);
    }

    #[tokio::test]
    async fn test_create_inserts_and_returns_the_record() {
        let gateway = Arc::new(ScriptedGateway::default());
        let (store, _cache) = new_store(&gateway).await;

        let log = SnapshotLog::default();
        let _sub = store.subscribe(log.recorder()).await;

        gateway.push_create(Ok(record("fresh", "Untitled Conversation", 500)));
        let created = store.create().await.expect("create");
        assert_eq!(created.id.as_str(), "fresh");

        assert_eq!(log.len(), 2);
        assert_eq!(log.last_titles(), vec!["Untitled Conversation".to_string()]);

        let found = store.get(&ConversationId::from("fresh")).await;
        assert_eq!(found.map(|r| r.updated_at), Some(500));
    }

    #[tokio::test]
    async fn test_create_failure_sets_last_error() {
        let gateway = Arc::new(ScriptedGateway::default());
        let (store, _cache) = new_store(&gateway).await;

        gateway.push_create(Err(GatewayError::Rejected {
            status: 403,
            message: "workspace is read-only".to_string(),
        }));
        let created = store.create().await;
        assert!(created.is_err());

        let snapshot = store.snapshot().await;
        assert!(snapshot.records.is_empty());
        assert!(snapshot.last_error.is_some());
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_notifications_and_is_idempotent() {
        let gateway = Arc::new(ScriptedGateway::default());
        let (store, _cache) = new_store(&gateway).await;

        let log = SnapshotLog::default();
        let sub = store.subscribe(log.recorder()).await;
        assert_eq!(log.len(), 1);

        sub.unsubscribe();
        sub.unsubscribe(); // second call is safe

        seed(&store, &gateway, vec![record("1", "Sales Q1", 100)]).await;
        assert_eq!(log.len(), 1); // nothing delivered after deregistration
    }

    #[tokio::test]
    async fn test_dropping_the_subscription_unsubscribes() {
        let gateway = Arc::new(ScriptedGateway::default());
        let (store, _cache) = new_store(&gateway).await;

        let log = SnapshotLog::default();
        {
            let _sub = store.subscribe(log.recorder()).await;
        }
        seed(&store, &gateway, vec![record("1", "Sales Q1", 100)]).await;
        assert_eq!(log.len(), 1);
    }

    #[tokio::test]
    async fn test_get_is_a_pure_read() {
        let gateway = Arc::new(ScriptedGateway::default());
        let (store, _cache) = new_store(&gateway).await;
        seed(&store, &gateway, vec![record("1", "Sales Q1", 100)]).await;

        let found = store.get(&ConversationId::from("1")).await;
        assert_eq!(found.map(|r| r.title), Some("Sales Q1".to_string()));
        assert_eq!(store.get(&ConversationId::from("nope")).await, None);
        assert_eq!(gateway.list_calls.load(Ordering::SeqCst), 1); // only the seed
    }
}
