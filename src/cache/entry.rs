//! Per-path cache entry: source pixels plus size-keyed weak variant slots.

use crate::cache::handle::{CachedImage, ImageHandle};
use crate::image::{ClientImage, PixelSize, SourceImage};
use std::collections::HashMap;
use std::sync::{Arc, Weak};

/// Result of probing an entry's variant slot.
pub(crate) enum VariantSlot<I: ClientImage> {
    /// No slot exists at the requested size.
    Missing,
    /// A live variant was upgraded to a strong handle.
    Live(ImageHandle<I>),
    /// The slot's variant was already dropped; the stale slot has been
    /// removed from the map and the caller must release its bytes.
    Expired,
}

/// The per-path record: one source image and zero or more weak handles to
/// resized variants. All methods are called with the cache lock held.
pub(crate) struct CacheEntry<I: ClientImage> {
    source: Arc<SourceImage>,
    variants: HashMap<PixelSize, Weak<CachedImage<I>>>,
}

impl<I: ClientImage> CacheEntry<I> {
    pub(crate) fn new(source: SourceImage) -> Self {
        Self {
            source: Arc::new(source),
            variants: HashMap::new(),
        }
    }

    pub(crate) fn source(&self) -> &Arc<SourceImage> {
        &self.source
    }

    /// Looks up the variant at `size`, upgrading its weak handle.
    ///
    /// A slot whose weak handle no longer upgrades is reaped here so later
    /// lookups never see it again.
    pub(crate) fn probe_variant(&mut self, size: PixelSize) -> VariantSlot<I> {
        match self.variants.get(&size).map(|slot| slot.upgrade()) {
            None => VariantSlot::Missing,
            Some(Some(handle)) => VariantSlot::Live(handle),
            Some(None) => {
                self.variants.remove(&size);
                VariantSlot::Expired
            }
        }
    }

    /// Stores a weak handle derived from `handle` at its dimensions.
    ///
    /// The caller has already established that no live variant occupies the
    /// slot; a stale slot is simply overwritten.
    pub(crate) fn insert_variant(&mut self, handle: &ImageHandle<I>) {
        let size = PixelSize::new(handle.width(), handle.height());
        self.variants.insert(size, Arc::downgrade(handle));
    }

    /// Removes the slot at `size` if it still refers to the image at
    /// `target`. Returns whether a slot was removed.
    ///
    /// The identity guard keeps a late-dropping duplicate from evicting the
    /// variant that won the admission race for the same dimensions.
    pub(crate) fn remove_variant_if(
        &mut self,
        size: PixelSize,
        target: *const CachedImage<I>,
    ) -> bool {
        let found = self
            .variants
            .get(&size)
            .is_some_and(|slot| std::ptr::eq(slot.as_ptr(), target));
        if found {
            self.variants.remove(&size);
        }
        found
    }

    pub(crate) fn has_variants(&self) -> bool {
        !self.variants.is_empty()
    }

    /// Bytes contributed by this entry: source bytes plus the bytes of every
    /// slot whose weak handle still upgrades.
    #[cfg(test)]
    pub(crate) fn total_live_bytes(&self) -> u64 {
        let live: u64 = self
            .variants
            .values()
            .filter_map(|slot| slot.upgrade())
            .map(|variant| variant.size_in_bytes())
            .sum();
        self.source.size_in_bytes() + live
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::BasicImage;
    use std::path::PathBuf;

    fn entry_with_source(w: u32, h: u32) -> CacheEntry<BasicImage> {
        let source = SourceImage::new(
            PathBuf::from("/img/a.png"),
            w,
            h,
            vec![0u8; (w * h * 4) as usize],
        );
        CacheEntry::new(source)
    }

    fn detached_handle(w: u32, h: u32) -> ImageHandle<BasicImage> {
        let image = BasicImage::new(PathBuf::from("/img/a.png"), w, h, vec![0u8; (w * h * 4) as usize]);
        Arc::new(CachedImage::new(image, Weak::new()))
    }

    #[test]
    fn test_probe_missing_slot() {
        let mut entry = entry_with_source(4, 4);
        assert!(matches!(
            entry.probe_variant(PixelSize::new(2, 2)),
            VariantSlot::Missing
        ));
    }

    #[test]
    fn test_insert_then_probe_live() {
        let mut entry = entry_with_source(4, 4);
        let handle = detached_handle(2, 2);
        entry.insert_variant(&handle);

        match entry.probe_variant(PixelSize::new(2, 2)) {
            VariantSlot::Live(found) => assert!(Arc::ptr_eq(&found, &handle)),
            _ => panic!("expected a live variant"),
        }
    }

    #[test]
    fn test_probe_reaps_expired_slot() {
        let mut entry = entry_with_source(4, 4);
        let handle = detached_handle(2, 2);
        entry.insert_variant(&handle);
        drop(handle);

        assert!(matches!(
            entry.probe_variant(PixelSize::new(2, 2)),
            VariantSlot::Expired
        ));
        // The stale slot is gone on the next probe.
        assert!(matches!(
            entry.probe_variant(PixelSize::new(2, 2)),
            VariantSlot::Missing
        ));
        assert!(!entry.has_variants());
    }

    #[test]
    fn test_remove_variant_identity_guard() {
        let mut entry = entry_with_source(4, 4);
        let winner = detached_handle(2, 2);
        entry.insert_variant(&winner);

        let impostor = detached_handle(2, 2);
        let size = PixelSize::new(2, 2);

        assert!(!entry.remove_variant_if(size, Arc::as_ptr(&impostor)));
        assert!(entry.has_variants());

        assert!(entry.remove_variant_if(size, Arc::as_ptr(&winner)));
        assert!(!entry.has_variants());
    }

    #[test]
    fn test_total_live_bytes_counts_source_and_live_variants() {
        let mut entry = entry_with_source(4, 4); // 64 bytes
        assert_eq!(entry.total_live_bytes(), 64);

        let handle = detached_handle(2, 2); // 16 bytes
        entry.insert_variant(&handle);
        assert_eq!(entry.total_live_bytes(), 80);

        drop(handle);
        assert_eq!(entry.total_live_bytes(), 64);
    }
}
