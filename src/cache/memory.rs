//! Memory-bounded image cache with lifetime-driven eviction.
//!
//! The cache maps a filesystem path to an entry holding the decoded source
//! pixels and weak handles to resized variants. Admissions are bounded by a
//! byte budget; eviction is driven entirely by the lifetime of the strong
//! handles handed out to callers. When the last one for a variant drops,
//! its bytes are released, and an entry whose last variant disappears is
//! removed together with its source pixels.

use crate::cache::entry::{CacheEntry, VariantSlot};
use crate::cache::handle::{CachedImage, ImageHandle};
use crate::cache::types::{
    MemoryBudgetConfig, TryAddImageResult, TryAddVariantResult, TryGetImageResult,
};
use crate::image::{ClientImage, PixelSize, SourceImage};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, trace};

/// Cache state guarded by the cache mutex.
pub(crate) struct CacheInner<I: ClientImage> {
    max_memory: u64,
    current_usage: u64,
    entries: HashMap<PathBuf, CacheEntry<I>>,
}

/// Thread-safe two-level image cache: path -> entry -> size -> variant.
///
/// Cloning shares the underlying store, so one cache can be handed to the
/// loader, to handles and to observers alike.
pub struct ImageCache<I: ClientImage> {
    inner: Arc<Mutex<CacheInner<I>>>,
}

impl<I: ClientImage> ImageCache<I> {
    /// Creates a cache with the given budget configuration.
    pub fn new(config: MemoryBudgetConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CacheInner {
                max_memory: config.max_memory_bytes,
                current_usage: 0,
                entries: HashMap::new(),
            })),
        }
    }

    /// Creates a cache with an explicit budget in bytes.
    pub fn with_max_memory(bytes: u64) -> Self {
        Self::new(MemoryBudgetConfig::new().with_max_memory(bytes))
    }

    /// Sets the memory budget in bytes.
    ///
    /// Reducing the budget below the current usage does not evict anything:
    /// live handles keep their images alive, and admissions simply fail
    /// until enough handles have been dropped.
    pub fn set_max_memory(&self, bytes: u64) {
        let mut inner = self.inner.lock().unwrap();
        debug!(
            old = inner.max_memory,
            new = bytes,
            usage = inner.current_usage,
            "image cache budget updated"
        );
        inner.max_memory = bytes;
    }

    /// The configured memory budget in bytes.
    pub fn max_memory(&self) -> u64 {
        self.inner.lock().unwrap().max_memory
    }

    /// Bytes currently charged for cached sources and live variants.
    pub fn current_usage(&self) -> u64 {
        self.inner.lock().unwrap().current_usage
    }

    /// Number of per-path entries in the cache.
    pub fn entry_count(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    /// Looks up `path` for a variant at the source's own dimensions.
    ///
    /// This is the lookup used by native-size requests: once the source is
    /// known, "native" means a variant matching its decoded dimensions.
    ///
    /// A lookup that reaps the entry's last stale slot removes the entry as
    /// well and reports [`TryGetImageResult::NotFound`].
    pub fn lookup_native(&self, path: &Path) -> TryGetImageResult<I> {
        let mut inner = self.inner.lock().unwrap();
        let Some(entry) = inner.entries.get_mut(path) else {
            return TryGetImageResult::NotFound;
        };
        let size = entry.source().size();
        Self::lookup_in_entry(&mut inner, path, size)
    }

    /// Looks up `path` for a variant at exactly `width` x `height`.
    pub fn lookup_at_size(&self, path: &Path, width: u32, height: u32) -> TryGetImageResult<I> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.entries.contains_key(path) {
            return TryGetImageResult::NotFound;
        }
        Self::lookup_in_entry(&mut inner, path, PixelSize::new(width, height))
    }

    /// Probes the entry's slot at `size`, reaping a stale slot if found.
    ///
    /// Callers have already established that the entry exists.
    fn lookup_in_entry(
        inner: &mut CacheInner<I>,
        path: &Path,
        size: PixelSize,
    ) -> TryGetImageResult<I> {
        let entry = inner.entries.get_mut(path).expect("entry presence checked");
        let source = Arc::clone(entry.source());

        match entry.probe_variant(size) {
            VariantSlot::Live(image) => TryGetImageResult::FoundExactMatch { image, source },
            VariantSlot::Expired => {
                // The variant died but its eviction hook has not reached the
                // lock yet. Release the slot's bytes here; the hook finds the
                // slot gone and does nothing. If that was the entry's last
                // variant the entry goes too, exactly as the hook would have
                // removed it.
                inner.current_usage = inner.current_usage.saturating_sub(size.byte_len());
                trace!(path = %path.display(), %size, "reaped stale variant slot during lookup");

                let now_empty = !inner
                    .entries
                    .get(path)
                    .expect("entry presence checked")
                    .has_variants();
                if now_empty {
                    release_entry(inner, path);
                    return TryGetImageResult::NotFound;
                }
                TryGetImageResult::FoundSourceImageOfDifferentDimensions { source }
            }
            VariantSlot::Missing => {
                TryGetImageResult::FoundSourceImageOfDifferentDimensions { source }
            }
        }
    }

    /// Admits decoded source pixels, creating the entry for their path.
    ///
    /// Returns [`TryAddImageResult::NoChange`] when an entry already exists
    /// (the duplicate is discarded), [`TryAddImageResult::OutOfMemory`] when
    /// admission would exceed the budget.
    pub fn try_add_source(&self, source: SourceImage) -> TryAddImageResult {
        let mut inner = self.inner.lock().unwrap();

        if inner.entries.contains_key(source.path()) {
            // Another thread decoded the same file first; drop the duplicate.
            trace!(path = %source.path().display(), "source image already cached");
            return TryAddImageResult::NoChange;
        }

        let bytes = source.size_in_bytes();
        if inner.current_usage + bytes > inner.max_memory {
            debug!(
                path = %source.path().display(),
                requested = bytes,
                usage = inner.current_usage,
                budget = inner.max_memory,
                "source admission rejected: over budget"
            );
            return TryAddImageResult::OutOfMemory;
        }

        inner.current_usage += bytes;
        let key = source.path().to_path_buf();
        debug!(path = %key.display(), bytes, usage = inner.current_usage, "source image cached");
        inner.entries.insert(key, CacheEntry::new(source));
        TryAddImageResult::Added
    }

    /// Admits a resized variant into the entry for its path.
    ///
    /// The variant's entry must already exist; admitting a variant before
    /// its source is a programming error and panics. If a live variant
    /// already occupies the size slot the first writer wins and the existing
    /// handle is returned.
    pub fn try_add_variant(&self, handle: &ImageHandle<I>) -> TryAddVariantResult<I> {
        let mut inner = self.inner.lock().unwrap();
        let path = handle.path();
        let size = PixelSize::new(handle.width(), handle.height());

        if !inner.entries.contains_key(path) {
            panic!(
                "cannot add a resized variant before its source image: {}",
                path.display()
            );
        }

        // Split the borrow so the entry and the usage counter can be
        // touched together.
        let entry = inner.entries.get_mut(path).expect("entry presence checked");
        let mut reaped_last_slot = false;
        match entry.probe_variant(size) {
            VariantSlot::Live(existing) => {
                return TryAddVariantResult::NoChange { existing };
            }
            VariantSlot::Expired => {
                inner.current_usage = inner.current_usage.saturating_sub(size.byte_len());
                reaped_last_slot = !inner
                    .entries
                    .get(path)
                    .expect("entry presence checked")
                    .has_variants();
            }
            VariantSlot::Missing => {}
        }

        let bytes = handle.size_in_bytes();
        if inner.current_usage + bytes > inner.max_memory {
            debug!(
                path = %path.display(),
                %size,
                requested = bytes,
                usage = inner.current_usage,
                budget = inner.max_memory,
                "variant admission rejected: over budget"
            );
            // A reap that emptied the entry with nothing admitted in its
            // place releases the entry, exactly as the drop hook would have.
            if reaped_last_slot {
                release_entry(&mut inner, path);
            }
            return TryAddVariantResult::OutOfMemory;
        }

        let entry = inner.entries.get_mut(path).expect("entry presence checked");
        entry.insert_variant(handle);
        inner.current_usage += bytes;
        trace!(path = %path.display(), %size, bytes, usage = inner.current_usage, "variant cached");
        TryAddVariantResult::AddedAsResizedImage
    }

    /// Removes the variant slot matching `image`, releasing its bytes.
    ///
    /// When the removal leaves the entry without variants, the entry and its
    /// source pixels are released as well. Returns whether a slot was
    /// removed. The removal is identity-guarded: a slot occupied by a
    /// different image at the same dimensions is left alone.
    pub fn try_remove_variant(&self, image: &CachedImage<I>) -> bool {
        let mut inner = self.inner.lock().unwrap();
        remove_slot(&mut inner, image.path(), image_size(image), image as *const _)
    }

    /// Wraps a raw client image in a strong handle bound to this cache.
    ///
    /// Dropping the last strong handle removes the variant's slot from its
    /// entry and releases the bytes it was charged for, from whatever thread
    /// the drop happens on. The handle holds only a weak back-reference, so
    /// it outlives cache shutdown safely.
    pub fn make_handle(&self, image: I) -> ImageHandle<I> {
        Arc::new(CachedImage::new(image, Arc::downgrade(&self.inner)))
    }
}

impl<I: ClientImage> Clone for ImageCache<I> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<I: ClientImage> Default for ImageCache<I> {
    fn default() -> Self {
        Self::new(MemoryBudgetConfig::default())
    }
}

impl<I: ClientImage> std::fmt::Debug for ImageCache<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock().unwrap();
        f.debug_struct("ImageCache")
            .field("entries", &inner.entries.len())
            .field("current_usage", &inner.current_usage)
            .field("max_memory", &inner.max_memory)
            .finish()
    }
}

fn image_size<I: ClientImage>(image: &CachedImage<I>) -> PixelSize {
    PixelSize::new(image.width(), image.height())
}

/// Eviction entry point for [`CachedImage`]'s drop hook.
///
/// Runs on whatever thread drops the last strong handle. Uses a fallible
/// lock so a drop during unwinding never double-panics.
pub(crate) fn release_dropped<I: ClientImage>(
    inner: &Mutex<CacheInner<I>>,
    image: &CachedImage<I>,
) {
    let Ok(mut inner) = inner.lock() else {
        return;
    };
    remove_slot(&mut inner, image.path(), image_size(image), image as *const _);
}

/// Removes the slot at `(path, size)` if it still points at `target`,
/// releasing the slot's bytes and cascading to the entry when its variant
/// map becomes empty.
fn remove_slot<I: ClientImage>(
    inner: &mut CacheInner<I>,
    path: &Path,
    size: PixelSize,
    target: *const CachedImage<I>,
) -> bool {
    let Some(entry) = inner.entries.get_mut(path) else {
        return false;
    };
    if !entry.remove_variant_if(size, target) {
        return false;
    }

    inner.current_usage = inner.current_usage.saturating_sub(size.byte_len());
    trace!(path = %path.display(), %size, usage = inner.current_usage, "variant evicted");

    if !entry.has_variants() {
        release_entry(inner, path);
    }

    true
}

/// Removes `path`'s entry outright, releasing its source bytes.
///
/// Called whenever an entry's variant map has just become empty, whether
/// through the drop hook, an explicit removal or a stale-slot reap.
fn release_entry<I: ClientImage>(inner: &mut CacheInner<I>, path: &Path) {
    if let Some(entry) = inner.entries.remove(path) {
        let source_bytes = entry.source().size_in_bytes();
        inner.current_usage = inner.current_usage.saturating_sub(source_bytes);
        debug!(
            path = %path.display(),
            source_bytes,
            usage = inner.current_usage,
            "last variant gone, entry released"
        );
    }
}
