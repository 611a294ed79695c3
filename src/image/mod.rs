//! Image value types: the client image contract, decoded source pixels and
//! the default image implementation.

mod basic;
mod types;

pub use basic::{BasicImage, BasicImageFactory};
pub use types::{ClientImage, PixelSize, SourceImage};
