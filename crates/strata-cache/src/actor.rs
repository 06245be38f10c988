//! The single-writer cache task.
//!
//! Each cache is one tokio task owning its memory store. Requests arrive on a
//! bounded mailbox and are answered on oneshot channels. Backend calls run on
//! the blocking pool and report back on a completion channel, so every state
//! change happens on the cache task itself. Backend writes go through one
//! writer task per cache and land in the order the cache issued them. Until
//! the backend handle is ready, requests wait in a bounded FIFO stash and are
//! replayed in arrival order.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use ahash::AHashMap;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

use crate::entity::{Entity, Source};
use crate::error::{BackendError, BackendResult, CacheError, CacheResult};
use crate::settings::CacheSettings;
use crate::store::MemoryStore;

/// When a put is acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WritePolicy {
    /// Reply once memory is updated; the backend write runs in the background
    #[default]
    WriteBehind,
    /// Reply after the backend write and carry its error; memory is updated
    /// only when the write succeeds
    WriteThrough,
    /// Memory only; whoever owns the data persists it
    MemoryOnly,
}

/// What a cache does when its backend handle cannot be built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SetupPolicy {
    /// Fail the stashed requests and stop
    #[default]
    Stop,
    /// Keep running and fail every request with the setup error
    FailRequests,
}

/// Why an entry left a memory store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementEventKind {
    /// Pushed out to make room
    Evicted,
    /// Removed on request
    Removed,
}

/// Notification about an entry leaving a memory store.
#[derive(Debug, Clone)]
pub struct ElementEvent<E: Entity> {
    /// Key of the entry
    pub key: E::Key,
    /// Value that was held
    pub value: E,
    /// Cause
    pub kind: ElementEventKind,
}

/// Receives element events on the cache task.
///
/// Listeners observe; they cannot touch the cache they listen to.
pub trait ElementListener<E: Entity>: Send + Sync + 'static {
    /// Called once per event.
    fn on_element(&self, event: &ElementEvent<E>);
}

/// Counters reported by [`CacheHandle::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Gets served from memory
    pub hits: u64,
    /// Gets not found in memory
    pub misses: u64,
    /// Backend fetches issued
    pub fetches: u64,
    /// Records sent to the backend
    pub writes: u64,
    /// Backend writes that failed
    pub write_failures: u64,
    /// Backend write calls not yet completed
    pub pending_writes: u64,
    /// Entries evicted or removed
    pub evictions: u64,
    /// Requests rejected because the stash was full
    pub stash_overflows: u64,
    /// Current number of entries in memory
    pub len: usize,
}

/// Behaviour of one cache.
#[derive(Debug, Clone)]
pub struct CacheOptions {
    /// Load from the backend on a memory miss; when false a miss is `None`
    pub fetch_on_miss: bool,
    /// Reject puts with [`CacheError::ReadOnly`]
    pub read_only: bool,
    /// Put acknowledgement
    pub write_policy: WritePolicy,
    /// Setup failure handling
    pub setup_policy: SetupPolicy,
    /// Bounded mailbox size
    pub mailbox_capacity: usize,
    /// Requests held while initializing
    pub stash_capacity: usize,
    /// Default request timeout of handles
    pub request_timeout: Duration,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self::from_settings(&CacheSettings::default())
    }
}

impl CacheOptions {
    /// Fetching, writable, write-behind options sized from `settings`.
    #[must_use]
    pub fn from_settings(settings: &CacheSettings) -> Self {
        Self {
            fetch_on_miss: true,
            read_only: false,
            write_policy: WritePolicy::WriteBehind,
            setup_policy: SetupPolicy::Stop,
            mailbox_capacity: settings.mailbox_capacity,
            stash_capacity: settings.stash_capacity,
            request_timeout: settings.request_timeout(),
        }
    }
}

type Reply<T> = oneshot::Sender<CacheResult<T>>;
type Entries<E> = Arc<Vec<(<E as Entity>::Key, E)>>;

enum Request<E: Entity> {
    Get { key: E::Key, reply: Reply<Option<E>> },
    Put { key: E::Key, value: E, reply: Reply<()> },
    Puts { values: Vec<E>, reply: Reply<()> },
    Evict { key: E::Key, reply: Reply<Option<E>> },
    Stats { reply: Reply<CacheStats> },
}

impl<E: Entity> Request<E> {
    // Callers that timed out have dropped their receiver; sends may fail.
    fn fail(self, error: CacheError) {
        match self {
            Self::Get { reply, .. } | Self::Evict { reply, .. } => {
                let _ = reply.send(Err(error));
            },
            Self::Put { reply, .. } | Self::Puts { reply, .. } => {
                let _ = reply.send(Err(error));
            },
            Self::Stats { reply } => {
                let _ = reply.send(Err(error));
            },
        }
    }
}

enum Completion<E: Entity> {
    Ready(BackendResult<Arc<dyn Source<E>>>),
    Fetched {
        key: E::Key,
        result: BackendResult<Option<E>>,
    },
    Stored {
        entries: Entries<E>,
        result: BackendResult<()>,
        reply: Option<Reply<()>>,
    },
}

struct WriteJob<E: Entity> {
    source: Arc<dyn Source<E>>,
    entries: Entries<E>,
    batch: bool,
    reply: Option<Reply<()>>,
}

enum State<E: Entity> {
    Initializing,
    Ready(Arc<dyn Source<E>>),
    Failed(String),
}

/// Configures and starts a cache task.
pub struct CacheBuilder<E: Entity> {
    options: CacheOptions,
    store: Box<dyn MemoryStore<E::Key, E>>,
    listener: Option<Arc<dyn ElementListener<E>>>,
}

impl<E: Entity> CacheBuilder<E> {
    /// Starts a builder with the given options and memory store.
    pub fn new(options: CacheOptions, store: impl MemoryStore<E::Key, E> + 'static) -> Self {
        Self {
            options,
            store: Box::new(store),
            listener: None,
        }
    }

    /// Routes element events to `listener`.
    pub fn listener(mut self, listener: Arc<dyn ElementListener<E>>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Spawns the cache task. `init` resolves to the backend source; requests
    /// sent before it resolves are stashed.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<F>(self, init: F) -> CacheHandle<E>
    where
        F: Future<Output = BackendResult<Arc<dyn Source<E>>>> + Send + 'static,
    {
        let (sender, requests) = mpsc::channel(self.options.mailbox_capacity.max(1));
        let (completions, completed) = mpsc::unbounded_channel();

        let ready = completions.clone();
        tokio::spawn(async move {
            let outcome = tokio::spawn(init).await.unwrap_or_else(|e| {
                Err(BackendError::Unavailable(format!("setup task failed: {e}")))
            });
            let _ = ready.send(Completion::Ready(outcome));
        });

        let (write_queue, jobs) = mpsc::unbounded_channel();
        tokio::spawn(write_back(jobs, completions.clone()));

        let handle = CacheHandle {
            sender,
            timeout: self.options.request_timeout,
        };
        let actor = CacheActor {
            options: self.options,
            state: State::Initializing,
            store: self.store,
            listener: self.listener,
            stash: VecDeque::new(),
            in_flight: AHashMap::new(),
            pending: AHashMap::new(),
            completions,
            write_queue,
            stats: CacheStats::default(),
            stopped: false,
        };
        info!("Starting {} cache", E::KIND);
        tokio::spawn(actor.run(requests, completed));
        handle
    }
}

struct CacheActor<E: Entity> {
    options: CacheOptions,
    state: State<E>,
    store: Box<dyn MemoryStore<E::Key, E>>,
    listener: Option<Arc<dyn ElementListener<E>>>,
    stash: VecDeque<Request<E>>,
    in_flight: AHashMap<E::Key, Vec<Reply<Option<E>>>>,
    /// Acknowledged write-behind values whose backend write has not landed,
    /// with the number of queued writes touching the key
    pending: AHashMap<E::Key, (E, usize)>,
    completions: mpsc::UnboundedSender<Completion<E>>,
    write_queue: mpsc::UnboundedSender<WriteJob<E>>,
    stats: CacheStats,
    stopped: bool,
}

impl<E: Entity> CacheActor<E> {
    async fn run(
        mut self,
        mut requests: mpsc::Receiver<Request<E>>,
        mut completed: mpsc::UnboundedReceiver<Completion<E>>,
    ) {
        while !self.stopped {
            tokio::select! {
                biased;
                Some(completion) = completed.recv() => self.complete(completion),
                request = requests.recv() => match request {
                    Some(request) => self.receive(request),
                    None => break,
                },
            }
        }
        info!("{} cache stopped", E::KIND);
    }

    fn receive(&mut self, request: Request<E>) {
        match &self.state {
            State::Ready(source) => {
                let source = Arc::clone(source);
                self.serve(request, &source);
            },
            State::Initializing => self.stash(request),
            State::Failed(reason) => request.fail(CacheError::Setup(reason.clone())),
        }
    }

    fn stash(&mut self, request: Request<E>) {
        let capacity = self.options.stash_capacity;
        if self.stash.len() >= capacity {
            self.stats.stash_overflows += 1;
            warn!("{} cache stash full ({capacity} queued), rejecting request", E::KIND);
            request.fail(CacheError::StashOverflow { capacity });
            return;
        }
        trace!("Stashing {} request ({} queued)", E::KIND, self.stash.len() + 1);
        self.stash.push_back(request);
    }

    fn complete(&mut self, completion: Completion<E>) {
        match completion {
            Completion::Ready(Ok(source)) => self.become_ready(source),
            Completion::Ready(Err(error)) => self.setup_failed(&error),
            Completion::Fetched { key, result } => self.fetched(key, result),
            Completion::Stored {
                entries,
                result,
                reply,
            } => self.stored(&entries, result, reply),
        }
    }

    fn become_ready(&mut self, source: Arc<dyn Source<E>>) {
        self.state = State::Ready(Arc::clone(&source));
        let stashed = std::mem::take(&mut self.stash);
        info!("{} cache ready", E::KIND);
        if !stashed.is_empty() {
            debug!("Replaying {} stashed {} requests", stashed.len(), E::KIND);
        }
        for request in stashed {
            self.serve(request, &source);
        }
    }

    fn setup_failed(&mut self, error: &BackendError) {
        let reason = error.to_string();
        warn!("{} cache setup failed: {reason}", E::KIND);
        for request in self.stash.drain(..) {
            request.fail(CacheError::Setup(reason.clone()));
        }
        match self.options.setup_policy {
            SetupPolicy::Stop => self.stopped = true,
            SetupPolicy::FailRequests => self.state = State::Failed(reason),
        }
    }

    fn serve(&mut self, request: Request<E>, source: &Arc<dyn Source<E>>) {
        match request {
            Request::Get { key, reply } => self.get(key, reply, source),
            Request::Put { key, value, reply } => {
                self.write(vec![(key, value)], false, reply, source);
            },
            Request::Puts { values, reply } => {
                let entries = values.into_iter().map(|value| (value.key(), value)).collect();
                self.write(entries, true, reply, source);
            },
            Request::Evict { key, reply } => {
                let removed = self.store.evict(&key);
                if let Some(value) = &removed {
                    self.stats.evictions += 1;
                    debug!("Removed {} {key:?}", E::KIND);
                    self.notify(key, value.clone(), ElementEventKind::Removed);
                }
                let _ = reply.send(Ok(removed));
            },
            Request::Stats { reply } => {
                let _ = reply.send(Ok(CacheStats {
                    len: self.store.len(),
                    ..self.stats
                }));
            },
        }
    }

    fn get(&mut self, key: E::Key, reply: Reply<Option<E>>, source: &Arc<dyn Source<E>>) {
        if let Some(value) = self.store.get(&key) {
            self.stats.hits += 1;
            trace!("{} hit {key:?}", E::KIND);
            let _ = reply.send(Ok(Some(value.clone())));
            return;
        }
        if let Some((value, _)) = self.pending.get(&key) {
            let value = value.clone();
            self.stats.hits += 1;
            trace!("{} hit {key:?} in the write queue", E::KIND);
            self.insert(key, value.clone());
            let _ = reply.send(Ok(Some(value)));
            return;
        }
        self.stats.misses += 1;
        if !self.options.fetch_on_miss {
            let _ = reply.send(Ok(None));
            return;
        }
        if let Some(waiters) = self.in_flight.get_mut(&key) {
            trace!("Joining in-flight fetch of {} {key:?}", E::KIND);
            waiters.push(reply);
            return;
        }

        self.in_flight.insert(key.clone(), vec![reply]);
        self.stats.fetches += 1;
        debug!("Fetching {} {key:?}", E::KIND);
        let source = Arc::clone(source);
        let job_key = key.clone();
        self.run_blocking(
            move || source.fetch(&job_key),
            move |result| Completion::Fetched { key, result },
        );
    }

    fn fetched(&mut self, key: E::Key, result: BackendResult<Option<E>>) {
        let waiters = self.in_flight.remove(&key).unwrap_or_default();
        match result {
            Ok(found) => {
                // A put that landed while the fetch ran is newer than the backend copy.
                let cached = self
                    .store
                    .get(&key)
                    .cloned()
                    .or_else(|| self.pending.get(&key).map(|(value, _)| value.clone()));
                let value = match (cached, found) {
                    (Some(newer), _) => Some(newer),
                    (None, Some(loaded)) => {
                        debug!("Loaded {} {key:?}", E::KIND);
                        self.insert(key, loaded.clone());
                        Some(loaded)
                    },
                    (None, None) => {
                        debug!("{} {key:?} not in backend", E::KIND);
                        None
                    },
                };
                for waiter in waiters {
                    let _ = waiter.send(Ok(value.clone()));
                }
            },
            Err(error) => {
                debug!("Fetching {} {key:?} failed: {error}", E::KIND);
                let error = Arc::new(error);
                for waiter in waiters {
                    let _ = waiter.send(Err(CacheError::backend_shared(
                        E::KIND,
                        &key,
                        Arc::clone(&error),
                    )));
                }
            },
        }
    }

    fn write(
        &mut self,
        entries: Vec<(E::Key, E)>,
        batch: bool,
        reply: Reply<()>,
        source: &Arc<dyn Source<E>>,
    ) {
        if self.options.read_only {
            let _ = reply.send(Err(CacheError::ReadOnly(E::KIND)));
            return;
        }
        let reply = match self.options.write_policy {
            WritePolicy::MemoryOnly => {
                for (key, value) in entries {
                    self.insert(key, value);
                }
                let _ = reply.send(Ok(()));
                return;
            },
            WritePolicy::WriteBehind => {
                for (key, value) in &entries {
                    self.insert(key.clone(), value.clone());
                    self.pending
                        .entry(key.clone())
                        .and_modify(|(held, queued)| {
                            *held = value.clone();
                            *queued += 1;
                        })
                        .or_insert_with(|| (value.clone(), 1));
                }
                let _ = reply.send(Ok(()));
                None
            },
            WritePolicy::WriteThrough => Some(reply),
        };

        self.stats.writes += entries.len() as u64;
        self.stats.pending_writes += 1;
        debug!("Queueing {} {} record(s) for the backend", entries.len(), E::KIND);
        let job = WriteJob {
            source: Arc::clone(source),
            entries: Arc::new(entries),
            batch,
            reply,
        };
        if let Err(mpsc::error::SendError(job)) = self.write_queue.send(job) {
            let closed = BackendError::Unavailable("write queue closed".into());
            self.stored(&job.entries, Err(closed), job.reply);
        }
    }

    fn stored(
        &mut self,
        entries: &[(E::Key, E)],
        result: BackendResult<()>,
        reply: Option<Reply<()>>,
    ) {
        self.stats.pending_writes = self.stats.pending_writes.saturating_sub(1);
        for (key, _) in entries {
            if let Some((_, queued)) = self.pending.get_mut(key) {
                *queued -= 1;
                if *queued == 0 {
                    self.pending.remove(key);
                }
            }
        }
        match result {
            Ok(()) => {
                if let Some(reply) = reply {
                    for (key, value) in entries {
                        self.insert(key.clone(), value.clone());
                    }
                    let _ = reply.send(Ok(()));
                }
            },
            Err(error) => {
                self.stats.write_failures += 1;
                warn!("Writing {} {} record(s) failed: {error}", entries.len(), E::KIND);
                if let Some(reply) = reply {
                    let error = match entries {
                        [(key, _)] => CacheError::backend(E::KIND, key, error),
                        all => {
                            let keys: Vec<&E::Key> = all.iter().map(|(key, _)| key).collect();
                            CacheError::backend(E::KIND, &keys, error)
                        },
                    };
                    let _ = reply.send(Err(error));
                }
            },
        }
    }

    /// Puts into memory, answering any fetch waiting on the same key.
    fn insert(&mut self, key: E::Key, value: E) {
        if let Some(waiters) = self.in_flight.remove(&key) {
            for waiter in waiters {
                let _ = waiter.send(Ok(Some(value.clone())));
            }
        }
        for (evicted_key, evicted) in self.store.put(key, value) {
            self.stats.evictions += 1;
            debug!("Evicted {} {evicted_key:?}", E::KIND);
            self.notify(evicted_key, evicted, ElementEventKind::Evicted);
        }
    }

    fn notify(&self, key: E::Key, value: E, kind: ElementEventKind) {
        if let Some(listener) = &self.listener {
            listener.on_element(&ElementEvent { key, value, kind });
        }
    }

    /// Runs a backend call on the blocking pool and feeds its outcome back to
    /// this task as a completion.
    fn run_blocking<T, J, D>(&self, job: J, done: D)
    where
        T: Send + 'static,
        J: FnOnce() -> BackendResult<T> + Send + 'static,
        D: FnOnce(BackendResult<T>) -> Completion<E> + Send + 'static,
    {
        let completions = self.completions.clone();
        tokio::spawn(async move {
            let result = tokio::task::spawn_blocking(job).await.unwrap_or_else(|e| {
                Err(BackendError::Unavailable(format!("backend task failed: {e}")))
            });
            let _ = completions.send(done(result));
        });
    }
}

/// Applies backend writes one at a time, in queue order, and reports each
/// outcome back to the cache task.
///
/// Ends once the cache task is gone and the queue is drained.
async fn write_back<E: Entity>(
    mut jobs: mpsc::UnboundedReceiver<WriteJob<E>>,
    completions: mpsc::UnboundedSender<Completion<E>>,
) {
    while let Some(WriteJob {
        source,
        entries,
        batch,
        reply,
    }) = jobs.recv().await
    {
        let job_entries = Arc::clone(&entries);
        let result = tokio::task::spawn_blocking(move || match job_entries.as_slice() {
            [(key, value)] if !batch => source.store(key, value),
            all => source.store_all(all),
        })
        .await
        .unwrap_or_else(|e| Err(BackendError::Unavailable(format!("backend task failed: {e}"))));
        // The cache task may have stopped; queued writes still land.
        let _ = completions.send(Completion::Stored {
            entries,
            result,
            reply,
        });
    }
}

/// Cloneable client of a cache task.
///
/// Every call is bounded by a timeout; on expiry the caller gets
/// [`CacheError::Timeout`] and the cache is unaffected.
pub struct CacheHandle<E: Entity> {
    sender: mpsc::Sender<Request<E>>,
    timeout: Duration,
}

impl<E: Entity> Clone for CacheHandle<E> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            timeout: self.timeout,
        }
    }
}

impl<E: Entity> std::fmt::Debug for CacheHandle<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheHandle")
            .field("kind", &E::KIND)
            .field("timeout", &self.timeout)
            .field("closed", &self.sender.is_closed())
            .finish()
    }
}

impl<E: Entity> CacheHandle<E> {
    /// Default timeout of this handle.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns a handle with a different default timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns true once the cache task has stopped.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Looks up `key`, loading it from the backend on a miss if the cache fetches.
    pub async fn get(&self, key: E::Key) -> CacheResult<Option<E>> {
        self.get_within(key, self.timeout).await
    }

    /// [`get`](Self::get) with an explicit timeout.
    pub async fn get_within(&self, key: E::Key, timeout: Duration) -> CacheResult<Option<E>> {
        self.call(timeout, |reply| Request::Get { key, reply }).await
    }

    /// Stores `value` under `key`.
    pub async fn put(&self, key: E::Key, value: E) -> CacheResult<()> {
        self.put_within(key, value, self.timeout).await
    }

    /// [`put`](Self::put) with an explicit timeout.
    pub async fn put_within(&self, key: E::Key, value: E, timeout: Duration) -> CacheResult<()> {
        self.call(timeout, |reply| Request::Put { key, value, reply })
            .await
    }

    /// Stores several values under their own keys with one backend write.
    pub async fn puts(&self, values: Vec<E>) -> CacheResult<()> {
        self.call(self.timeout, |reply| Request::Puts { values, reply })
            .await
    }

    /// Drops `key` from memory only. Returns the value that was held.
    pub async fn evict(&self, key: E::Key) -> CacheResult<Option<E>> {
        self.call(self.timeout, |reply| Request::Evict { key, reply })
            .await
    }

    /// Current counters.
    pub async fn stats(&self) -> CacheResult<CacheStats> {
        self.call(self.timeout, |reply| Request::Stats { reply }).await
    }

    async fn call<T>(
        &self,
        timeout: Duration,
        request: impl FnOnce(Reply<T>) -> Request<E>,
    ) -> CacheResult<T> {
        let (reply, response) = oneshot::channel();
        let exchange = async move {
            if self.sender.send(request(reply)).await.is_err() {
                return Err(CacheError::Closed);
            }
            response.await.unwrap_or(Err(CacheError::Closed))
        };
        match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout(timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::entity::{Record, RecordSource};
    use crate::store::{EternalStore, LruStore};
    use parking_lot::Mutex;
    use strata_common::{BlockPos, IdKind, ObjectId};
    use strata_world::MapObject;

    fn id(serial: u32) -> ObjectId {
        ObjectId::new(serial, IdKind::Object)
    }

    fn object(serial: u32, tag: u16) -> MapObject {
        MapObject::new(id(serial), tag, BlockPos::new(0, 1, 2, 3))
    }

    fn source(backend: &Arc<MemoryBackend>) -> Arc<dyn Source<MapObject>> {
        Arc::new(RecordSource::new(Arc::clone(backend)))
    }

    fn options() -> CacheOptions {
        CacheOptions {
            request_timeout: Duration::from_secs(2),
            ..CacheOptions::default()
        }
    }

    fn spawn_ready(backend: &Arc<MemoryBackend>, options: CacheOptions) -> CacheHandle<MapObject> {
        CacheBuilder::new(options, LruStore::new(8)).spawn(std::future::ready(Ok(source(backend))))
    }

    fn seed(backend: &MemoryBackend, value: &MapObject) {
        let bytes = value.encode().expect("encode");
        backend.insert(MapObject::KIND, &MapObject::key_bytes(&value.id), &bytes);
    }

    /// A cache whose setup completes when the returned sender fires.
    fn spawn_gated(
        ready: Arc<dyn Source<MapObject>>,
        options: CacheOptions,
    ) -> (CacheHandle<MapObject>, oneshot::Sender<BackendResult<()>>) {
        let (open, gate) = oneshot::channel::<BackendResult<()>>();
        let handle = CacheBuilder::new(options, LruStore::new(8)).spawn(async move {
            match gate.await {
                Ok(Ok(())) => Ok(ready),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(BackendError::Unavailable("gate dropped".into())),
            }
        });
        (handle, open)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    /// Waits until every queued backend write has completed.
    async fn drain(cache: &CacheHandle<MapObject>) {
        for _ in 0..500 {
            if cache.stats().await.expect("stats").pending_writes == 0 {
                return;
            }
            settle().await;
        }
        panic!("backend writes never drained");
    }

    /// Records the type tags it stores, in arrival order. Stores of
    /// `slow_tag` take a while.
    struct OrderedSource {
        inner: RecordSource<MemoryBackend>,
        stored: Mutex<Vec<u16>>,
        slow_tag: Option<u16>,
    }

    impl OrderedSource {
        fn new(backend: &Arc<MemoryBackend>, slow_tag: Option<u16>) -> Arc<Self> {
            Arc::new(Self {
                inner: RecordSource::new(Arc::clone(backend)),
                stored: Mutex::new(Vec::new()),
                slow_tag,
            })
        }

        fn stored(&self) -> Vec<u16> {
            self.stored.lock().clone()
        }

        fn record(&self, value: &MapObject) {
            if self.slow_tag == Some(value.type_tag) {
                std::thread::sleep(Duration::from_millis(200));
            }
            self.stored.lock().push(value.type_tag);
        }
    }

    impl Source<MapObject> for OrderedSource {
        fn fetch(&self, key: &ObjectId) -> BackendResult<Option<MapObject>> {
            self.inner.fetch(key)
        }

        fn store(&self, key: &ObjectId, value: &MapObject) -> BackendResult<()> {
            self.record(value);
            self.inner.store(key, value)
        }

        fn store_all(&self, values: &[(ObjectId, MapObject)]) -> BackendResult<()> {
            for (_, value) in values {
                self.record(value);
            }
            self.inner.store_all(values)
        }
    }

    #[tokio::test]
    async fn test_put_then_get_without_backend_fetch() {
        let backend = Arc::new(MemoryBackend::new());
        let cache = spawn_ready(&backend, options());
        let obj = object(42, 7);

        cache.put(id(42), obj.clone()).await.expect("put");
        assert_eq!(cache.get(id(42)).await.expect("get"), Some(obj));
        assert_eq!(backend.gets(), 0);

        let stats = cache.stats().await.expect("stats");
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.len, 1);
    }

    #[tokio::test]
    async fn test_miss_fetches_once() {
        let backend = Arc::new(MemoryBackend::new());
        let obj = object(99, 1);
        seed(&backend, &obj);
        let cache = spawn_ready(&backend, options());

        assert_eq!(cache.get(id(99)).await.expect("get"), Some(obj.clone()));
        assert_eq!(backend.gets(), 1);
        assert_eq!(cache.get(id(99)).await.expect("get"), Some(obj));
        assert_eq!(backend.gets(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_gets_share_one_fetch() {
        let backend = Arc::new(MemoryBackend::new());
        let obj = object(5, 1);
        seed(&backend, &obj);
        let cache = spawn_ready(&backend, options());

        let (a, b) = tokio::join!(cache.get(id(5)), cache.get(id(5)));
        assert_eq!(a.expect("get"), Some(obj.clone()));
        assert_eq!(b.expect("get"), Some(obj));
        assert_eq!(backend.gets(), 1);
    }

    #[tokio::test]
    async fn test_absent_record_is_none() {
        let backend = Arc::new(MemoryBackend::new());
        let cache = spawn_ready(&backend, options());
        assert_eq!(cache.get(id(3)).await.expect("get"), None);
        assert_eq!(backend.gets(), 1);
        assert_eq!(cache.stats().await.expect("stats").len, 0);
    }

    #[tokio::test]
    async fn test_eternal_cache_never_fetches() {
        let backend = Arc::new(MemoryBackend::new());
        seed(&backend, &object(1, 1));
        let cache = CacheBuilder::new(
            CacheOptions {
                fetch_on_miss: false,
                ..options()
            },
            EternalStore::new(),
        )
        .spawn(std::future::ready(Ok(source(&backend))));

        assert_eq!(cache.get(id(1)).await.expect("get"), None);
        assert_eq!(backend.gets(), 0);
        cache.put(id(1), object(1, 2)).await.expect("put");
        assert_eq!(cache.get(id(1)).await.expect("get").map(|o| o.type_tag), Some(2));
    }

    #[tokio::test]
    async fn test_backend_error_reaches_caller() {
        let backend = Arc::new(MemoryBackend::new());
        let obj = object(8, 1);
        seed(&backend, &obj);
        let cache = spawn_ready(&backend, options());

        backend.set_offline(true);
        match cache.get(id(8)).await {
            Err(CacheError::Backend { kind, .. }) => assert_eq!(kind, "object"),
            other => panic!("expected backend error, got {other:?}"),
        }

        backend.set_offline(false);
        assert_eq!(cache.get(id(8)).await.expect("get"), Some(obj));
    }

    #[tokio::test]
    async fn test_write_behind_reaches_backend() {
        let backend = Arc::new(MemoryBackend::new());
        let cache = spawn_ready(&backend, options());
        cache.put(id(1), object(1, 4)).await.expect("put");

        drain(&cache).await;
        assert_eq!(backend.sets(), 1);
        assert!(backend.peek("object", &MapObject::key_bytes(&id(1))).is_some());
    }

    #[tokio::test]
    async fn test_write_through_reports_backend_error() {
        let backend = Arc::new(MemoryBackend::new());
        let cache = spawn_ready(
            &backend,
            CacheOptions {
                write_policy: WritePolicy::WriteThrough,
                ..options()
            },
        );

        cache.put(id(1), object(1, 1)).await.expect("put");
        assert_eq!(backend.sets(), 1);

        backend.set_offline(true);
        assert!(matches!(
            cache.put(id(2), object(2, 1)).await,
            Err(CacheError::Backend { .. })
        ));
        backend.set_offline(false);
        assert_eq!(cache.get(id(2)).await.expect("get"), None);
        assert_eq!(cache.get(id(1)).await.expect("get").map(|o| o.id), Some(id(1)));
    }

    #[tokio::test]
    async fn test_puts_is_one_batch() {
        let backend = Arc::new(MemoryBackend::new());
        let cache = spawn_ready(
            &backend,
            CacheOptions {
                write_policy: WritePolicy::WriteThrough,
                ..options()
            },
        );

        cache
            .puts((1..=3).map(|n| object(n, 0)).collect())
            .await
            .expect("puts");
        assert_eq!(backend.batches(), 1);
        assert_eq!(backend.sets(), 3);
        for n in 1..=3 {
            assert!(cache.get(id(n)).await.expect("get").is_some());
        }
        assert_eq!(backend.gets(), 0);
    }

    #[tokio::test]
    async fn test_writes_land_in_issue_order() {
        let backend = Arc::new(MemoryBackend::new());
        let slow = OrderedSource::new(&backend, Some(1));
        let cache = CacheBuilder::new(options(), LruStore::new(8))
            .spawn(std::future::ready(Ok(slow.clone() as Arc<dyn Source<MapObject>>)));

        cache.put(id(1), object(1, 1)).await.expect("put");
        cache.put(id(1), object(1, 2)).await.expect("put");
        drain(&cache).await;
        assert_eq!(slow.stored(), vec![1, 2]);

        // Memory and backend agree on the newest value.
        cache.evict(id(1)).await.expect("evict");
        assert_eq!(cache.get(id(1)).await.expect("get").map(|o| o.type_tag), Some(2));
        assert_eq!(backend.gets(), 1);
    }

    #[tokio::test]
    async fn test_queued_write_answers_get_after_eviction() {
        let backend = Arc::new(MemoryBackend::new());
        seed(&backend, &object(1, 0));
        let slow = OrderedSource::new(&backend, Some(5));
        let cache = CacheBuilder::new(options(), LruStore::new(8))
            .spawn(std::future::ready(Ok(slow.clone() as Arc<dyn Source<MapObject>>)));

        cache.put(id(1), object(1, 5)).await.expect("put");
        cache.evict(id(1)).await.expect("evict");
        assert_eq!(cache.get(id(1)).await.expect("get").map(|o| o.type_tag), Some(5));
        assert_eq!(backend.gets(), 0);

        drain(&cache).await;
        assert_eq!(slow.stored(), vec![5]);
    }

    #[tokio::test]
    async fn test_write_through_applies_in_order() {
        let backend = Arc::new(MemoryBackend::new());
        let slow = OrderedSource::new(&backend, Some(1));
        let cache = CacheBuilder::new(
            CacheOptions {
                write_policy: WritePolicy::WriteThrough,
                ..options()
            },
            LruStore::new(8),
        )
        .spawn(std::future::ready(Ok(slow.clone() as Arc<dyn Source<MapObject>>)));

        let (first, second) = tokio::join!(
            cache.put(id(1), object(1, 1)),
            cache.put(id(1), object(1, 2)),
        );
        first.expect("put");
        second.expect("put");
        assert_eq!(slow.stored(), vec![1, 2]);
        assert_eq!(cache.get(id(1)).await.expect("get").map(|o| o.type_tag), Some(2));
    }

    #[tokio::test]
    async fn test_memory_only_never_writes() {
        let backend = Arc::new(MemoryBackend::new());
        let cache = spawn_ready(
            &backend,
            CacheOptions {
                write_policy: WritePolicy::MemoryOnly,
                ..options()
            },
        );

        cache.put(id(1), object(1, 3)).await.expect("put");
        cache.puts(vec![object(2, 3), object(3, 3)]).await.expect("puts");
        assert_eq!(cache.get(id(3)).await.expect("get").map(|o| o.type_tag), Some(3));

        let stats = cache.stats().await.expect("stats");
        assert_eq!(stats.pending_writes, 0);
        assert_eq!(stats.writes, 0);
        assert_eq!(backend.sets(), 0);
    }

    #[tokio::test]
    async fn test_stash_replays_in_order() {
        let backend = Arc::new(MemoryBackend::new());
        let recorded = OrderedSource::new(&backend, None);
        let (cache, open) = spawn_gated(
            recorded.clone(),
            CacheOptions {
                stash_capacity: 4,
                ..options()
            },
        );

        // join! polls each branch once in order on its first pass, so the
        // requests reach the mailbox in the order written here.
        let (put_a, get_a, put_b, get_b, overflow) = tokio::join!(
            cache.put(id(1), object(1, 10)),
            cache.get(id(1)),
            cache.put(id(1), object(1, 20)),
            cache.get(id(1)),
            async {
                // Overflows only once the four requests above are stashed.
                let overflow = cache.stats().await;
                open.send(Ok(())).expect("gate");
                overflow
            },
        );
        assert!(matches!(overflow, Err(CacheError::StashOverflow { capacity: 4 })));

        put_a.expect("put");
        put_b.expect("put");
        let tag = |r: CacheResult<Option<MapObject>>| r.expect("get").map(|o| o.type_tag);
        assert_eq!(tag(get_a), Some(10));
        assert_eq!(tag(get_b), Some(20));

        drain(&cache).await;
        assert_eq!(recorded.stored(), vec![10, 20]);
        assert_eq!(backend.gets(), 0);
    }

    #[tokio::test]
    async fn test_stash_overflow_is_recoverable() {
        let backend = Arc::new(MemoryBackend::new());
        let (cache, open) = spawn_gated(
            source(&backend),
            CacheOptions {
                stash_capacity: 2,
                ..options()
            },
        );

        let (first, second, overflow) = tokio::join!(
            cache.get(id(0)),
            cache.get(id(1)),
            async {
                let overflow = cache.get(id(9)).await;
                open.send(Ok(())).expect("gate");
                overflow
            },
        );
        assert!(matches!(overflow, Err(CacheError::StashOverflow { capacity: 2 })));
        assert_eq!(first.expect("get"), None);
        assert_eq!(second.expect("get"), None);

        let stats = cache.stats().await.expect("stats");
        assert_eq!(stats.stash_overflows, 1);
        assert_eq!(stats.fetches, 2);
    }

    #[tokio::test]
    async fn test_setup_failure_stops_cache() {
        let backend = Arc::new(MemoryBackend::new());
        let (cache, open) = spawn_gated(
            source(&backend),
            CacheOptions {
                stash_capacity: 1,
                ..options()
            },
        );

        let (stashed, overflow) = tokio::join!(cache.get(id(1)), async {
            let overflow = cache.get(id(2)).await;
            open.send(Err(BackendError::Unavailable("no disk".into())))
                .expect("gate");
            overflow
        });
        assert!(matches!(overflow, Err(CacheError::StashOverflow { capacity: 1 })));
        assert!(matches!(stashed, Err(CacheError::Setup(_))));

        assert!(matches!(cache.get(id(1)).await, Err(CacheError::Closed)));
        assert!(cache.is_closed());
    }

    async fn exploding_setup() -> BackendResult<Arc<dyn Source<MapObject>>> {
        panic!("backend handle exploded")
    }

    #[tokio::test]
    async fn test_setup_panic_fails_requests() {
        let cache = CacheBuilder::<MapObject>::new(
            CacheOptions {
                setup_policy: SetupPolicy::FailRequests,
                ..options()
            },
            LruStore::new(4),
        )
        .spawn(exploding_setup());

        match cache.get(id(1)).await {
            Err(CacheError::Setup(reason)) => assert!(reason.contains("setup task failed")),
            other => panic!("expected setup error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_setup_failure_fails_requests() {
        let cache: CacheHandle<MapObject> = CacheBuilder::new(
            CacheOptions {
                setup_policy: SetupPolicy::FailRequests,
                ..options()
            },
            LruStore::new(4),
        )
        .spawn(std::future::ready(Err(BackendError::Unavailable("no disk".into()))));

        for _ in 0..2 {
            match cache.get(id(1)).await {
                Err(CacheError::Setup(reason)) => assert!(reason.contains("no disk")),
                other => panic!("expected setup error, got {other:?}"),
            }
        }
        assert!(matches!(cache.put(id(1), object(1, 1)).await, Err(CacheError::Setup(_))));
    }

    #[tokio::test]
    async fn test_timeout_leaves_cache_usable() {
        let backend = Arc::new(MemoryBackend::new());
        let (cache, open) = spawn_gated(source(&backend), options());

        assert!(matches!(
            cache.get_within(id(1), Duration::from_millis(30)).await,
            Err(CacheError::Timeout(_))
        ));

        open.send(Ok(())).expect("gate");
        cache.put(id(1), object(1, 3)).await.expect("put");
        assert_eq!(cache.get(id(1)).await.expect("get").map(|o| o.type_tag), Some(3));
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<(ObjectId, ElementEventKind)>>,
    }

    impl ElementListener<MapObject> for Recorder {
        fn on_element(&self, event: &ElementEvent<MapObject>) {
            self.events.lock().push((event.key, event.kind));
        }
    }

    #[tokio::test]
    async fn test_eviction_events_reach_listener() {
        let backend = Arc::new(MemoryBackend::new());
        let recorder = Arc::new(Recorder::default());
        let cache = CacheBuilder::<MapObject>::new(options(), LruStore::new(2))
            .listener(recorder.clone())
            .spawn(std::future::ready(Ok(source(&backend))));

        cache.put(id(1), object(1, 0)).await.expect("put");
        cache.put(id(2), object(2, 0)).await.expect("put");
        cache.get(id(1)).await.expect("get");
        cache.put(id(3), object(3, 0)).await.expect("put");
        assert_eq!(*recorder.events.lock(), vec![(id(2), ElementEventKind::Evicted)]);

        assert!(cache.evict(id(1)).await.expect("evict").is_some());
        assert!(cache.evict(id(1)).await.expect("evict").is_none());
        assert_eq!(recorder.events.lock().last(), Some(&(id(1), ElementEventKind::Removed)));

        let stats = cache.stats().await.expect("stats");
        assert_eq!(stats.evictions, 2);
        assert_eq!(stats.len, 1);
    }

    #[tokio::test]
    async fn test_read_only_rejects_puts() {
        let backend = Arc::new(MemoryBackend::new());
        let cache = spawn_ready(
            &backend,
            CacheOptions {
                read_only: true,
                ..options()
            },
        );
        assert!(matches!(
            cache.put(id(1), object(1, 0)).await,
            Err(CacheError::ReadOnly("object"))
        ));
        assert_eq!(backend.sets(), 0);
    }
}
