//! Bounded-concurrency image loader with request deduplication.
//!
//! The loader owns a queue of load tasks keyed by `"path:W:H"`. A
//! dedicated dispatcher thread wakes every 10 ms and starts queued tasks on
//! detached worker threads while the running count is below the configured
//! cap. Requests for a path+size that is already queued are collapsed into
//! the existing task.

mod task;

pub use task::{LoadResult, LoadStatus, TryGetStatus};

use crate::cache::ImageCache;
use crate::decoder::{FileDecoder, PixelDecoder};
use crate::factory::ImageFactory;
use crate::image::{ClientImage, PixelSize};
use crate::resize::{NearestNeighborResizer, PixelResizer};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use task::{LoadCallback, LoadTask};
use tracing::{debug, trace};

/// How often the dispatcher scans the queue for startable tasks.
const DISPATCH_INTERVAL: Duration = Duration::from_millis(10);

/// Loader configuration.
#[derive(Debug, Clone, Copy)]
pub struct LoaderConfig {
    /// Maximum number of concurrent worker threads. `0` selects the
    /// implementation-defined default (available parallelism).
    pub max_threads: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            max_threads: default_thread_count(),
        }
    }
}

impl LoaderConfig {
    /// Creates a configuration with the default thread cap.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the worker thread cap.
    pub fn with_max_threads(mut self, max_threads: usize) -> Self {
        self.max_threads = max_threads;
        self
    }
}

fn default_thread_count() -> usize {
    thread::available_parallelism().map(|p| p.get()).unwrap_or(4)
}

/// State shared between the loader handle, the dispatcher and workers.
pub(crate) struct LoaderShared<I: ClientImage> {
    pub(crate) cache: ImageCache<I>,
    pub(crate) factory: Arc<dyn ImageFactory<I>>,
    pub(crate) decoder: Arc<dyn PixelDecoder>,
    pub(crate) resizer: Arc<dyn PixelResizer>,
    max_threads: AtomicUsize,
    running: AtomicUsize,
    abort: AtomicBool,
    queue: Mutex<BTreeMap<String, Arc<LoadTask<I>>>>,
}

impl<I: ClientImage> LoaderShared<I> {
    /// The effective thread cap, resolving `0` to the default.
    fn effective_max_threads(&self) -> usize {
        match self.max_threads.load(Ordering::Relaxed) {
            0 => default_thread_count(),
            n => n,
        }
    }

    /// Releases a finished task's queue slot and thread budget.
    ///
    /// Runs before the task's callback so capacity frees up promptly.
    pub(crate) fn signal_completed(&self, finished: &LoadTask<I>) {
        let mut queue = self.queue.lock().unwrap();
        queue.remove(finished.identifier());
        self.running.fetch_sub(1, Ordering::Relaxed);
    }
}

fn dispatch_loop<I: ClientImage>(shared: Arc<LoaderShared<I>>) {
    debug!("image loader dispatcher started");
    while !shared.abort.load(Ordering::Relaxed) {
        dispatch_pass(&shared);
        thread::sleep(DISPATCH_INTERVAL);
    }
    debug!("image loader dispatcher stopped");
}

/// One dispatcher pass: starts queued tasks while capacity remains.
///
/// The running count is snapshotted inside the queue lock. A worker may
/// decrement it between the read and a spawn, which only makes this pass
/// start fewer tasks than it could; the cap is never exceeded because
/// increments happen exclusively here, under the lock.
fn dispatch_pass<I: ClientImage>(shared: &Arc<LoaderShared<I>>) {
    let queue = shared.queue.lock().unwrap();

    let max = shared.effective_max_threads();
    let running = shared.running.load(Ordering::Relaxed);
    let available = max.saturating_sub(running);
    if available == 0 || queue.is_empty() {
        return;
    }

    let mut spawned = 0;
    for queued in queue.values() {
        if spawned == available {
            break;
        }
        if !queued.mark_started() {
            continue;
        }

        let count = shared.running.fetch_add(1, Ordering::Relaxed) + 1;
        debug_assert!(count <= max, "started worker {count} beyond the cap of {max}");
        spawned += 1;

        trace!(identifier = %queued.identifier(), running = count, "starting load task");
        let shared = Arc::clone(shared);
        let worker = Arc::clone(queued);
        thread::Builder::new()
            .name("pixelbank-worker".to_string())
            .spawn(move || worker.run(&shared))
            .expect("failed to spawn image load worker");
        // The join handle is dropped: workers are detached and report back
        // through signal_completed.
    }
}

/// Asynchronous image loader delivering results through callbacks.
///
/// Requests are deduplicated per path+size while queued, decoded at most
/// once per path thanks to the cache, and executed by at most
/// `max_threads` concurrent workers.
///
/// Dropping the loader stops the dispatcher; tasks already running on
/// worker threads finish and their callbacks may still fire afterwards, so
/// keep whatever the callbacks touch alive until all results have arrived.
pub struct ImageLoader<I: ClientImage> {
    shared: Arc<LoaderShared<I>>,
    dispatcher: Option<JoinHandle<()>>,
}

impl<I: ClientImage> ImageLoader<I> {
    /// Creates a loader with the default file decoder and resizer.
    pub fn new(
        cache: ImageCache<I>,
        factory: Arc<dyn ImageFactory<I>>,
        config: LoaderConfig,
    ) -> Self {
        Self::with_collaborators(
            cache,
            factory,
            Arc::new(FileDecoder::new()),
            Arc::new(NearestNeighborResizer::new()),
            config,
        )
    }

    /// Creates a loader with explicit decoder and resizer collaborators.
    pub fn with_collaborators(
        cache: ImageCache<I>,
        factory: Arc<dyn ImageFactory<I>>,
        decoder: Arc<dyn PixelDecoder>,
        resizer: Arc<dyn PixelResizer>,
        config: LoaderConfig,
    ) -> Self {
        let shared = Arc::new(LoaderShared {
            cache,
            factory,
            decoder,
            resizer,
            max_threads: AtomicUsize::new(config.max_threads),
            running: AtomicUsize::new(0),
            abort: AtomicBool::new(false),
            queue: Mutex::new(BTreeMap::new()),
        });

        let dispatcher_shared = Arc::clone(&shared);
        let dispatcher = thread::Builder::new()
            .name("pixelbank-dispatch".to_string())
            .spawn(move || dispatch_loop(dispatcher_shared))
            .expect("failed to spawn image loader dispatcher");

        Self {
            shared,
            dispatcher: Some(dispatcher),
        }
    }

    /// Requests the image at `path` at its native size.
    ///
    /// The callback is invoked exactly once on a worker thread, unless the
    /// request is collapsed into an already-queued task, in which case this
    /// returns [`TryGetStatus::TaskAlreadyExistsAndIsQueued`] and no
    /// callback is scheduled for this caller.
    pub fn try_get_image(
        &self,
        path: impl Into<PathBuf>,
        callback: impl FnOnce(LoadResult<I>) + Send + 'static,
    ) -> TryGetStatus {
        self.enqueue(path.into(), PixelSize::NATIVE, Box::new(callback))
    }

    /// Requests the image at `path` resized to `width` x `height`.
    ///
    /// See [`try_get_image`] for callback semantics.
    ///
    /// [`try_get_image`]: ImageLoader::try_get_image
    pub fn try_get_image_at_size(
        &self,
        path: impl Into<PathBuf>,
        width: u32,
        height: u32,
        callback: impl FnOnce(LoadResult<I>) + Send + 'static,
    ) -> TryGetStatus {
        self.enqueue(
            path.into(),
            PixelSize::new(width, height),
            Box::new(callback),
        )
    }

    fn enqueue(&self, path: PathBuf, size: PixelSize, callback: LoadCallback<I>) -> TryGetStatus {
        let identifier = format!("{}:{}", path.display(), size);
        let mut queue = self.shared.queue.lock().unwrap();

        if queue.contains_key(&identifier) {
            debug!(identifier = %identifier, "request collapsed into queued task");
            return TryGetStatus::TaskAlreadyExistsAndIsQueued;
        }

        trace!(identifier = %identifier, "load task queued");
        let queued = Arc::new(LoadTask::new(identifier.clone(), path, size, callback));
        queue.insert(identifier, queued);
        TryGetStatus::PlacedNewTaskInQueue
    }

    /// Sets the worker thread cap. `0` selects the implementation-defined
    /// default. Takes effect on the dispatcher's next pass.
    pub fn set_max_thread_count(&self, count: usize) {
        self.shared.max_threads.store(count, Ordering::Relaxed);
    }

    /// The configured worker thread cap (`0` = default).
    pub fn max_thread_count(&self) -> usize {
        self.shared.max_threads.load(Ordering::Relaxed)
    }

    /// Number of worker threads currently executing tasks.
    pub fn running_threads(&self) -> usize {
        self.shared.running.load(Ordering::Relaxed)
    }

    /// Number of tasks in the queue (queued or running).
    pub fn queued_tasks(&self) -> usize {
        self.shared.queue.lock().unwrap().len()
    }
}

impl<I: ClientImage> Drop for ImageLoader<I> {
    fn drop(&mut self) {
        self.shared.abort.store(true, Ordering::Relaxed);
        if let Some(dispatcher) = self.dispatcher.take() {
            if dispatcher.join().is_err() {
                tracing::warn!("image loader dispatcher thread panicked");
            }
        }
        // In-flight workers are detached; they hold their own Arc to the
        // shared state and finish independently.
    }
}

impl<I: ClientImage> std::fmt::Debug for ImageLoader<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageLoader")
            .field("max_threads", &self.max_thread_count())
            .field("running_threads", &self.running_threads())
            .field("queued_tasks", &self.queued_tasks())
            .finish()
    }
}
