//! Reference-counted image handles with a cache eviction hook.

use crate::cache::memory::{self, CacheInner};
use crate::image::ClientImage;
use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Mutex, Weak};

/// Strong handle to a cached resized variant.
///
/// Cloning is cheap; the variant stays cached for as long as at least one
/// strong handle is alive.
pub type ImageHandle<I> = Arc<CachedImage<I>>;

/// A client image bound to the cache that admitted it.
///
/// Created by [`ImageCache::make_handle`]. When the last strong handle is
/// dropped, the wrapper removes its weak slot from the cache entry and
/// releases the bytes it was charged for. The hook holds only a weak
/// back-reference, so dropping a handle after the cache itself is gone is
/// a no-op.
///
/// [`ImageCache::make_handle`]: crate::cache::ImageCache::make_handle
pub struct CachedImage<I: ClientImage> {
    image: I,
    cache: Weak<Mutex<CacheInner<I>>>,
}

impl<I: ClientImage> CachedImage<I> {
    pub(crate) fn new(image: I, cache: Weak<Mutex<CacheInner<I>>>) -> Self {
        Self { image, cache }
    }

    /// The wrapped client image.
    pub fn image(&self) -> &I {
        &self.image
    }
}

impl<I: ClientImage> Deref for CachedImage<I> {
    type Target = I;

    fn deref(&self) -> &I {
        &self.image
    }
}

impl<I: ClientImage> Drop for CachedImage<I> {
    fn drop(&mut self) {
        // Last strong handle gone. The cache may already have been dropped,
        // and this may run on any thread.
        let Some(inner) = self.cache.upgrade() else {
            return;
        };
        memory::release_dropped(&inner, self);
    }
}

impl<I: ClientImage> fmt::Debug for CachedImage<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedImage")
            .field("path", &self.image.path())
            .field("width", &self.image.width())
            .field("height", &self.image.height())
            .finish()
    }
}
