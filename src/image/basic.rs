//! Default client image and factory implementations.

use super::types::ClientImage;
use crate::factory::ImageFactory;
use std::fmt;
use std::path::{Path, PathBuf};

/// Minimal owned-buffer image for clients without their own image type.
///
/// Holds the resized RGBA8 pixels directly. Useful for tests and for callers
/// that only need the raw bytes back.
pub struct BasicImage {
    path: PathBuf,
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl BasicImage {
    /// Creates an image from an owned RGBA8 buffer.
    pub fn new(path: PathBuf, width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self {
            path,
            width,
            height,
            pixels,
        }
    }

    /// The raw RGBA8 pixel data.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }
}

impl ClientImage for BasicImage {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Debug for BasicImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicImage")
            .field("path", &self.path)
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

/// Factory producing [`BasicImage`] values.
#[derive(Debug, Default, Clone, Copy)]
pub struct BasicImageFactory;

impl ImageFactory<BasicImage> for BasicImageFactory {
    fn construct_image(&self, width: u32, height: u32, path: &Path, rgba: Vec<u8>) -> BasicImage {
        BasicImage::new(path.to_path_buf(), width, height, rgba)
    }
}
