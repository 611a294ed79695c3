//! The pending work item behind one image request.

use crate::cache::{ImageHandle, TryAddImageResult, TryAddVariantResult, TryGetImageResult};
use crate::image::{ClientImage, PixelSize, SourceImage};
use crate::loader::LoaderShared;
use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::{debug, trace, warn};

/// Outcome of submitting a request to the loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryGetStatus {
    /// A new task was queued; the callback will be invoked on completion.
    PlacedNewTaskInQueue,
    /// A task for the same path and size is already queued. The request is
    /// collapsed into it and this caller receives no callback.
    TaskAlreadyExistsAndIsQueued,
}

/// Final status of a load task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    /// The image is available via the result's handle.
    Success,
    /// The file was missing, unreadable or undecodable.
    FailedToLoad,
    /// Admitting the image would have exceeded the cache's memory budget.
    OutOfMemory,
}

/// Result delivered to a request's callback.
pub struct LoadResult<I: ClientImage> {
    /// Final status of the task.
    pub status: LoadStatus,
    /// Strong handle to the loaded image on success.
    pub image: Option<ImageHandle<I>>,
    /// Failure description, beginning with the requested path; empty on
    /// success.
    pub error_message: String,
}

impl<I: ClientImage> LoadResult<I> {
    pub(crate) fn success(image: ImageHandle<I>) -> Self {
        Self {
            status: LoadStatus::Success,
            image: Some(image),
            error_message: String::new(),
        }
    }

    pub(crate) fn failed(error_message: String) -> Self {
        Self {
            status: LoadStatus::FailedToLoad,
            image: None,
            error_message,
        }
    }

    pub(crate) fn out_of_memory(error_message: String) -> Self {
        Self {
            status: LoadStatus::OutOfMemory,
            image: None,
            error_message,
        }
    }
}

impl<I: ClientImage> fmt::Debug for LoadResult<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadResult")
            .field("status", &self.status)
            .field("image", &self.image.is_some())
            .field("error_message", &self.error_message)
            .finish()
    }
}

/// Completion callback for a load task. Invoked exactly once, on a worker
/// thread.
pub(crate) type LoadCallback<I> = Box<dyn FnOnce(LoadResult<I>) + Send>;

/// One queued request: lookup -> (decode?) -> resize -> publish.
///
/// Identified by `"path:W:H"`; native requests use `W = H = 0`. The task
/// sits in the loader's queue until the dispatcher starts it on a worker
/// thread.
pub(crate) struct LoadTask<I: ClientImage> {
    identifier: String,
    path: PathBuf,
    requested: PixelSize,
    started: AtomicBool,
    callback: Mutex<Option<LoadCallback<I>>>,
}

impl<I: ClientImage> LoadTask<I> {
    pub(crate) fn new(
        identifier: String,
        path: PathBuf,
        requested: PixelSize,
        callback: LoadCallback<I>,
    ) -> Self {
        Self {
            identifier,
            path,
            requested,
            started: AtomicBool::new(false),
            callback: Mutex::new(Some(callback)),
        }
    }

    pub(crate) fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Marks the task started. Returns true exactly once; the dispatcher
    /// calls this under the queue lock before spawning the worker.
    pub(crate) fn mark_started(&self) -> bool {
        !self.started.swap(true, Ordering::Relaxed)
    }

    /// Executes the task body on the worker thread, signals completion to
    /// the loader and delivers the result.
    ///
    /// The body runs behind a panic boundary: the decoder, factory and
    /// resizer are injected collaborators, and one of them violating its
    /// contract must not take the callback down with the worker. A panic
    /// becomes a [`LoadStatus::FailedToLoad`] result prefixed by the path.
    ///
    /// Completion is signalled before the callback so the queue slot and
    /// thread budget are released promptly even if the callback is slow.
    pub(crate) fn run(&self, shared: &LoaderShared<I>) {
        let result = catch_unwind(AssertUnwindSafe(|| self.execute(shared)))
            .unwrap_or_else(|payload| {
                warn!(identifier = %self.identifier, "load task panicked");
                LoadResult::failed(format!(
                    "{} {}",
                    self.path.display(),
                    panic_reason(payload.as_ref())
                ))
            });
        shared.signal_completed(self);

        debug!(
            identifier = %self.identifier,
            status = ?result.status,
            "load task completed"
        );
        self.deliver(result);
    }

    fn deliver(&self, result: LoadResult<I>) {
        let callback = self.callback.lock().unwrap().take();
        match callback {
            Some(callback) => callback(result),
            None => warn!(identifier = %self.identifier, "load task callback already consumed"),
        }
    }

    fn execute(&self, shared: &LoaderShared<I>) -> LoadResult<I> {
        let lookup = if self.requested.is_native() {
            shared.cache.lookup_native(&self.path)
        } else {
            shared
                .cache
                .lookup_at_size(&self.path, self.requested.width, self.requested.height)
        };

        match lookup {
            TryGetImageResult::FoundExactMatch { image, .. } => {
                trace!(identifier = %self.identifier, "cache hit");
                LoadResult::success(image)
            }
            TryGetImageResult::FoundSourceImageOfDifferentDimensions { source } => {
                let target = if self.requested.is_native() {
                    source.size()
                } else {
                    self.requested
                };
                self.resize_and_admit(shared, &source, target)
            }
            TryGetImageResult::NotFound => self.decode_and_admit(shared),
        }
    }

    /// Cold path: the file has not been decoded yet.
    fn decode_and_admit(&self, shared: &LoaderShared<I>) -> LoadResult<I> {
        let pixels = match shared.decoder.read_file(&self.path) {
            Ok(pixels) => pixels,
            Err(e) => {
                debug!(identifier = %self.identifier, error = %e, "decode failed");
                return LoadResult::failed(format!("{} {}", self.path.display(), e));
            }
        };

        // The decoder contract: dimensions of at least 1x1 and an RGBA8
        // buffer of exactly width * height * 4 bytes.
        let expected = u64::from(pixels.width) * u64::from(pixels.height) * 4;
        if pixels.width == 0 || pixels.height == 0 || pixels.rgba.len() as u64 != expected {
            warn!(
                identifier = %self.identifier,
                width = pixels.width,
                height = pixels.height,
                buffer_len = pixels.rgba.len(),
                "decoder returned invalid pixel data"
            );
            return LoadResult::failed(format!(
                "{} decoder returned invalid pixel data ({}x{}, {} bytes)",
                self.path.display(),
                pixels.width,
                pixels.height,
                pixels.rgba.len()
            ));
        }

        // A native request adopts the decoded dimensions from here on.
        let target = if self.requested.is_native() {
            PixelSize::new(pixels.width, pixels.height)
        } else {
            self.requested
        };

        let source = SourceImage::new(self.path.clone(), pixels.width, pixels.height, pixels.rgba);
        match shared.cache.try_add_source(source) {
            TryAddImageResult::Added => {}
            TryAddImageResult::NoChange => {
                // Another task decoded the same file first; the duplicate was
                // discarded and the resize runs against the winner's source.
                trace!(identifier = %self.identifier, "lost source admission race");
            }
            TryAddImageResult::OutOfMemory => {
                return LoadResult::out_of_memory(format!(
                    "{} image cache is out of memory",
                    self.path.display()
                ));
            }
        }

        match shared
            .cache
            .lookup_at_size(&self.path, target.width, target.height)
        {
            TryGetImageResult::FoundExactMatch { image, .. } => LoadResult::success(image),
            TryGetImageResult::FoundSourceImageOfDifferentDimensions { source } => {
                self.resize_and_admit(shared, &source, target)
            }
            TryGetImageResult::NotFound => {
                // Another task's variant for this path can be admitted and
                // dropped inside this window; that drop removes the whole
                // entry, source included.
                LoadResult::failed(format!(
                    "{} source image vanished from the cache",
                    self.path.display()
                ))
            }
        }
    }

    /// Produces the variant at `target` from cached source pixels and admits
    /// it, returning the strong handle on success.
    fn resize_and_admit(
        &self,
        shared: &LoaderShared<I>,
        source: &SourceImage,
        target: PixelSize,
    ) -> LoadResult<I> {
        let buffer = shared.resizer.resize(source, target.width, target.height);
        if buffer.len() as u64 != target.byte_len() {
            warn!(
                identifier = %self.identifier,
                expected = target.byte_len(),
                buffer_len = buffer.len(),
                "resizer produced a wrong-sized buffer"
            );
            return LoadResult::failed(format!(
                "{} resized buffer has {} bytes, expected {}",
                self.path.display(),
                buffer.len(),
                target.byte_len()
            ));
        }

        let image = shared
            .factory
            .construct_image(target.width, target.height, &self.path, buffer);
        let handle = shared.cache.make_handle(image);

        match shared.cache.try_add_variant(&handle) {
            TryAddVariantResult::AddedAsResizedImage => LoadResult::success(handle),
            TryAddVariantResult::NoChange { .. } => {
                // The lookup just said this slot was empty; a concurrent task
                // for another size key beat us to the same dimensions.
                warn!(identifier = %self.identifier, "variant admitted twice");
                LoadResult::failed(format!(
                    "{} resized image was already cached",
                    self.path.display()
                ))
            }
            TryAddVariantResult::OutOfMemory => LoadResult::out_of_memory(format!(
                "{} image cache is out of memory",
                self.path.display()
            )),
        }
    }
}

/// Extracts a printable reason from a panic payload.
fn panic_reason(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "load task panicked"
    }
}

impl<I: ClientImage> fmt::Debug for LoadTask<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadTask")
            .field("identifier", &self.identifier)
            .field("requested", &self.requested)
            .field("started", &self.started.load(Ordering::Relaxed))
            .finish()
    }
}
