//! In-process backends: text transforms, raster images and archives.

mod archive;
mod image;
mod text;

pub use archive::{list_entries, ArchiveOp, NativeArchiveBackend};
pub use image::NativeImageBackend;
pub use text::{DataFormat, NativeTextBackend, ProseFormat, TextTransform};
