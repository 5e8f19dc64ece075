//! Format registry: supported formats per category and alias normalization.

mod category;
mod registry;

pub use category::Category;
pub use registry::{format_of, normalize_format, ConverterDescriptor, FormatRegistry, FormatSet};
