//! pixelbank - asynchronous, memory-bounded image loading and caching.
//!
//! Clients request an image by filesystem path, optionally at a target pixel
//! size; the service decodes the file at most once, caches the decoded
//! source pixels, and produces resized variants on demand. Results arrive
//! via completion callbacks on worker threads, and cached variants are
//! evicted automatically when the last strong handle to them is dropped.
//!
//! # Example
//!
//! ```no_run
//! use pixelbank::cache::{ImageCache, MemoryBudgetConfig};
//! use pixelbank::image::{BasicImage, BasicImageFactory, ClientImage};
//! use pixelbank::loader::{ImageLoader, LoaderConfig, LoadStatus};
//! use std::sync::Arc;
//!
//! let cache = ImageCache::<BasicImage>::new(
//!     MemoryBudgetConfig::new().with_max_memory(64 * 1024 * 1024),
//! );
//! let loader = ImageLoader::new(
//!     cache.clone(),
//!     Arc::new(BasicImageFactory),
//!     LoaderConfig::new().with_max_threads(4),
//! );
//!
//! loader.try_get_image_at_size("/images/photo.png", 256, 256, |result| {
//!     if result.status == LoadStatus::Success {
//!         let image = result.image.unwrap();
//!         println!("loaded {}x{}", image.width(), image.height());
//!     }
//! });
//! ```

pub mod cache;
pub mod decoder;
pub mod factory;
pub mod image;
pub mod loader;
pub mod logging;
pub mod resize;

/// Version of the pixelbank library.
///
/// The version is defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
