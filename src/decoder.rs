//! Pixel decoder contract and the file-based default implementation.
//!
//! The decoder is the collaborator that turns a filesystem path into raw
//! RGBA8 pixels. The loader only depends on the [`PixelDecoder`] trait, so
//! callers can inject their own decoding strategy (custom formats, mocks
//! for tests, ...).

use std::path::{Path, PathBuf};
use thiserror::Error;

use image::ImageFormat;

/// Raw decoded pixels with their dimensions.
///
/// The buffer is always RGBA8, `width * height * 4` bytes.
#[derive(Debug, Clone)]
pub struct DecodedPixels {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Raw RGBA8 data.
    pub rgba: Vec<u8>,
}

/// Errors produced while reading and decoding an image file.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The file does not exist.
    #[error("image file not found: {0}")]
    NotFound(PathBuf),

    /// I/O failure while reading the file.
    #[error("failed to read {path}: {source}")]
    Io {
        /// Path that failed to read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The file's format is not one the decoder accepts.
    #[error("unsupported image format for {0}")]
    UnsupportedFormat(PathBuf),

    /// The file's contents could not be decoded.
    #[error("failed to decode {path}: {reason}")]
    Decode {
        /// Path that failed to decode.
        path: PathBuf,
        /// Decoder-reported reason.
        reason: String,
    },
}

/// Reads image pixel data from a path.
pub trait PixelDecoder: Send + Sync {
    /// Reads and decodes the image file at `path`.
    ///
    /// Returns [`DecodeError::NotFound`] when the file is missing; other
    /// failures describe unreadable or malformed data.
    fn read_file(&self, path: &Path) -> Result<DecodedPixels, DecodeError>;
}

/// Default decoder backed by the `image` crate.
///
/// Accepts PNG, BMP, JPEG and TGA. Animated GIF and the more exotic formats
/// are deliberately excluded; every decode is converted to RGBA8 so the rest
/// of the pipeline deals with a single pixel layout.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileDecoder;

impl FileDecoder {
    const SUPPORTED: [ImageFormat; 4] = [
        ImageFormat::Png,
        ImageFormat::Bmp,
        ImageFormat::Jpeg,
        ImageFormat::Tga,
    ];

    /// Creates a new file decoder.
    pub fn new() -> Self {
        Self
    }

    /// Determines the format from the file contents, falling back to the
    /// extension for TGA, which has no magic bytes to sniff.
    fn detect_format(path: &Path, bytes: &[u8]) -> Option<ImageFormat> {
        if let Ok(format) = image::guess_format(bytes) {
            return Some(format);
        }

        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("tga") => Some(ImageFormat::Tga),
            _ => None,
        }
    }
}

impl PixelDecoder for FileDecoder {
    fn read_file(&self, path: &Path) -> Result<DecodedPixels, DecodeError> {
        if !path.exists() {
            return Err(DecodeError::NotFound(path.to_path_buf()));
        }

        let bytes = std::fs::read(path).map_err(|source| DecodeError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let format = Self::detect_format(path, &bytes)
            .filter(|format| Self::SUPPORTED.contains(format))
            .ok_or_else(|| DecodeError::UnsupportedFormat(path.to_path_buf()))?;

        let decoded = image::load_from_memory_with_format(&bytes, format)
            .map_err(|e| DecodeError::Decode {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?
            .to_rgba8();

        let (width, height) = decoded.dimensions();
        tracing::trace!(path = %path.display(), width, height, "decoded image file");

        Ok(DecodedPixels {
            width,
            height,
            rgba: decoded.into_raw(),
        })
    }
}
