//! Resize contract and the nearest-neighbour default implementation.

use crate::image::SourceImage;

/// Produces RGBA8 pixels at a target size from decoded source pixels.
///
/// Implementations must return a buffer of exactly
/// `width * height * 4` bytes that is independent of the source buffer, and
/// must never read outside the source pixels. The mapping must be
/// deterministic; visual quality is up to the implementation.
pub trait PixelResizer: Send + Sync {
    /// Resamples `source` to `width` x `height`.
    fn resize(&self, source: &SourceImage, width: u32, height: u32) -> Vec<u8>;
}

/// Nearest-neighbour resampler over raw RGBA8 rows.
#[derive(Debug, Default, Clone, Copy)]
pub struct NearestNeighborResizer;

impl NearestNeighborResizer {
    /// Creates a new nearest-neighbour resizer.
    pub fn new() -> Self {
        Self
    }
}

impl PixelResizer for NearestNeighborResizer {
    fn resize(&self, source: &SourceImage, width: u32, height: u32) -> Vec<u8> {
        let src_w = source.width() as u64;
        let src_h = source.height() as u64;
        let pixels = source.pixels();

        let mut out = Vec::with_capacity(width as usize * height as usize * 4);
        for y in 0..u64::from(height) {
            let sy = y * src_h / u64::from(height);
            for x in 0..u64::from(width) {
                let sx = x * src_w / u64::from(width);
                let offset = ((sy * src_w + sx) * 4) as usize;
                out.extend_from_slice(&pixels[offset..offset + 4]);
            }
        }

        out
    }
}
