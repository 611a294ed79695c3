//! Image factory contract.

use crate::image::ClientImage;
use std::path::Path;

/// Constructs client-typed images from raw RGBA8 pixel data.
///
/// The factory is the seam between the loader and the client's image
/// representation: after a resize the loader hands the factory an owned
/// pixel buffer and receives whatever the client considers an image.
///
/// The buffer passed to [`construct_image`] is exactly
/// `width * height * 4` bytes and ownership transfers to the factory; the
/// produced image is responsible for it from then on.
///
/// [`construct_image`]: ImageFactory::construct_image
pub trait ImageFactory<I: ClientImage>: Send + Sync {
    /// Builds an image of the client type from 8-bit RGBA data.
    ///
    /// # Arguments
    ///
    /// * `width` - Width in pixels of the image.
    /// * `height` - Height in pixels of the image.
    /// * `path` - The path of the image's source data. This and the
    ///   dimensions identify the image in the cache.
    /// * `rgba` - Owned raw pixel data, `width * height * 4` bytes.
    fn construct_image(&self, width: u32, height: u32, path: &Path, rgba: Vec<u8>) -> I;
}
