//! Two-level keyed image cache with a memory budget and lifetime-driven
//! eviction.
//!
//! The first level maps a filesystem path to an entry owning the decoded
//! source pixels; the second level maps a target size to a weak handle on a
//! resized variant. Strong handles ([`ImageHandle`]) are handed to callers;
//! when the last one drops, the variant's bytes are released and an entry
//! left without variants is removed entirely.

mod entry;
mod handle;
mod memory;
mod types;

pub use handle::{CachedImage, ImageHandle};
pub use memory::ImageCache;
pub use types::{
    MemoryBudgetConfig, TryAddImageResult, TryAddVariantResult, TryGetImageResult,
    DEFAULT_MAX_MEMORY_BYTES,
};
