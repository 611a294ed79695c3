//! Result types and configuration for the image cache.

use crate::cache::handle::ImageHandle;
use crate::image::{ClientImage, SourceImage};
use std::sync::Arc;

/// Default memory budget: 256 MiB.
pub const DEFAULT_MAX_MEMORY_BYTES: u64 = 256 * 1024 * 1024;

/// Outcome of a cache lookup.
#[derive(Debug)]
pub enum TryGetImageResult<I: ClientImage> {
    /// No entry exists for the path.
    NotFound,

    /// A live resized variant exists at the requested dimensions.
    FoundExactMatch {
        /// Strong handle to the cached variant.
        image: ImageHandle<I>,
        /// The entry's decoded source pixels.
        source: Arc<SourceImage>,
    },

    /// The source pixels are cached but no live variant matches the
    /// requested dimensions.
    FoundSourceImageOfDifferentDimensions {
        /// The entry's decoded source pixels.
        source: Arc<SourceImage>,
    },
}

/// Outcome of admitting a source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryAddImageResult {
    /// A new entry was created and now owns the source image.
    Added,
    /// An entry already exists at the path; the duplicate was discarded.
    NoChange,
    /// Admission would exceed the memory budget.
    OutOfMemory,
}

/// Outcome of admitting a resized variant.
#[derive(Debug)]
pub enum TryAddVariantResult<I: ClientImage> {
    /// The variant's weak handle was stored in its entry.
    AddedAsResizedImage,
    /// A live variant already occupies the size slot; first writer wins.
    NoChange {
        /// The variant already cached at these dimensions.
        existing: ImageHandle<I>,
    },
    /// Admission would exceed the memory budget.
    OutOfMemory,
}

/// Memory budget configuration for the cache.
#[derive(Debug, Clone, Copy)]
pub struct MemoryBudgetConfig {
    /// Maximum bytes of decoded pixels the cache may hold (default: 256 MiB).
    pub max_memory_bytes: u64,
}

impl Default for MemoryBudgetConfig {
    fn default() -> Self {
        Self {
            max_memory_bytes: DEFAULT_MAX_MEMORY_BYTES,
        }
    }
}

impl MemoryBudgetConfig {
    /// Creates a configuration with the default budget.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the memory budget in bytes.
    pub fn with_max_memory(mut self, bytes: u64) -> Self {
        self.max_memory_bytes = bytes;
        self
    }
}
