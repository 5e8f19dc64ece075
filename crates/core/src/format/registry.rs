use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use super::Category;
use crate::convert::ConvertError;

const TEXT_INPUTS: &[&str] = &["txt", "md", "html", "xml", "json", "csv", "yaml"];
const TEXT_OUTPUTS: &[&str] = &["txt", "md", "html", "xml", "json", "csv", "yaml", "pdf"];

const DOCUMENT_INPUTS: &[&str] = &["pdf", "docx", "doc", "txt", "rtf", "odt", "html", "md"];
const DOCUMENT_OUTPUTS: &[&str] = &["pdf", "docx", "txt", "html", "md"];

const IMAGE_INPUTS: &[&str] = &[
    "jpg", "png", "gif", "bmp", "tiff", "webp", "svg", "ico", "heic",
];
const IMAGE_OUTPUTS: &[&str] = &["jpg", "png", "gif", "bmp", "tiff", "webp", "ico", "pdf"];

const AUDIO_INPUTS: &[&str] = &["mp3", "wav", "ogg", "flac", "aac", "m4a", "wma", "aiff"];
const AUDIO_OUTPUTS: &[&str] = &["mp3", "wav", "ogg", "flac", "aac", "m4a"];

const VIDEO_INPUTS: &[&str] = &[
    "mp4", "avi", "mkv", "mov", "wmv", "flv", "webm", "m4v", "3gp",
];
const VIDEO_OUTPUTS: &[&str] = &["mp4", "avi", "mkv", "mov", "webm", "gif"];

const COMPRESSED_INPUTS: &[&str] = &["zip", "tar", "gz", "bz2", "xz", "7z", "rar"];
const COMPRESSED_OUTPUTS: &[&str] = &["zip", "tar", "gz", "bz2", "xz", "7z"];

/// Normalizes a user- or filename-supplied format: lowercase, no leading
/// dot, aliases collapsed onto their canonical name.
pub fn normalize_format(raw: &str) -> String {
    let lowered = raw.trim().trim_start_matches('.').to_ascii_lowercase();
    match lowered.as_str() {
        "jpeg" => "jpg".to_string(),
        "yml" => "yaml".to_string(),
        "tif" => "tiff".to_string(),
        "tgz" => "gz".to_string(),
        "htm" => "html".to_string(),
        "markdown" => "md".to_string(),
        _ => lowered,
    }
}

/// Normalized format of a file, taken from its extension.
pub fn format_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(normalize_format)
        .filter(|ext| !ext.is_empty())
}

/// Input and output formats of one category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormatSet {
    pub inputs: BTreeSet<String>,
    pub outputs: BTreeSet<String>,
}

/// Static description of the converter serving a category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConverterDescriptor {
    pub category: Category,
    pub supported_input_formats: BTreeSet<String>,
    pub supported_output_formats: BTreeSet<String>,
}

impl ConverterDescriptor {
    fn from_tables(category: Category, inputs: &[&str], outputs: &[&str]) -> Self {
        Self {
            category,
            supported_input_formats: inputs.iter().map(|f| f.to_string()).collect(),
            supported_output_formats: outputs.iter().map(|f| f.to_string()).collect(),
        }
    }

    /// Whether `format` (already normalized) is accepted as input.
    pub fn accepts(&self, format: &str) -> bool {
        self.supported_input_formats.contains(format)
    }

    /// Whether `format` (already normalized) can be produced.
    pub fn produces(&self, format: &str) -> bool {
        self.supported_output_formats.contains(format)
    }
}

/// Registry of every category and its supported formats.
///
/// Built once at startup and shared read-only for the lifetime of the
/// process.
#[derive(Debug, Clone)]
pub struct FormatRegistry {
    descriptors: BTreeMap<Category, ConverterDescriptor>,
}

impl Default for FormatRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatRegistry {
    /// Creates the registry with the built-in format tables.
    pub fn new() -> Self {
        let tables: [(Category, &[&str], &[&str]); 6] = [
            (Category::Text, TEXT_INPUTS, TEXT_OUTPUTS),
            (Category::Document, DOCUMENT_INPUTS, DOCUMENT_OUTPUTS),
            (Category::Image, IMAGE_INPUTS, IMAGE_OUTPUTS),
            (Category::Audio, AUDIO_INPUTS, AUDIO_OUTPUTS),
            (Category::Video, VIDEO_INPUTS, VIDEO_OUTPUTS),
            (Category::Compressed, COMPRESSED_INPUTS, COMPRESSED_OUTPUTS),
        ];

        let descriptors = tables
            .into_iter()
            .map(|(category, inputs, outputs)| {
                (
                    category,
                    ConverterDescriptor::from_tables(category, inputs, outputs),
                )
            })
            .collect();

        Self { descriptors }
    }

    /// Descriptor for a category.
    pub fn descriptor(&self, category: Category) -> &ConverterDescriptor {
        // Every category is inserted in `new`.
        &self.descriptors[&category]
    }

    /// Looks up a category by name.
    pub fn lookup(&self, name: &str) -> Result<&ConverterDescriptor, ConvertError> {
        let category: Category = name.parse()?;
        Ok(self.descriptor(category))
    }

    /// Input and output formats of a category.
    pub fn supported_formats(&self, category: Category) -> FormatSet {
        let descriptor = self.descriptor(category);
        FormatSet {
            inputs: descriptor.supported_input_formats.clone(),
            outputs: descriptor.supported_output_formats.clone(),
        }
    }

    /// All registered categories.
    pub fn all_categories(&self) -> BTreeSet<Category> {
        self.descriptors.keys().copied().collect()
    }

    /// Full table, keyed by category. Serializes to the JSON shape handed
    /// to front ends.
    pub fn supported_formats_map(&self) -> BTreeMap<Category, FormatSet> {
        self.descriptors
            .keys()
            .map(|category| (*category, self.supported_formats(*category)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_aliases() {
        assert_eq!(normalize_format("JPEG"), "jpg");
        assert_eq!(normalize_format(".yml"), "yaml");
        assert_eq!(normalize_format("tif"), "tiff");
        assert_eq!(normalize_format("tgz"), "gz");
        assert_eq!(normalize_format("htm"), "html");
        assert_eq!(normalize_format("Markdown"), "md");
        assert_eq!(normalize_format("png"), "png");
    }

    #[test]
    fn test_format_of() {
        assert_eq!(format_of(Path::new("/a/b/photo.JPEG")).as_deref(), Some("jpg"));
        assert_eq!(format_of(Path::new("bundle.tar.gz")).as_deref(), Some("gz"));
        assert_eq!(format_of(Path::new("README")), None);
    }

    #[test]
    fn test_all_categories() {
        let registry = FormatRegistry::new();
        let categories = registry.all_categories();
        assert_eq!(categories.len(), 6);
        assert!(categories.contains(&Category::Compressed));
    }

    #[test]
    fn test_supported_formats() {
        let registry = FormatRegistry::new();
        let image = registry.supported_formats(Category::Image);
        assert!(image.inputs.contains("heic"));
        assert!(!image.outputs.contains("heic"));
        assert!(image.outputs.contains("pdf"));

        let compressed = registry.supported_formats(Category::Compressed);
        assert!(compressed.inputs.contains("rar"));
        assert!(!compressed.outputs.contains("rar"));
    }

    #[test]
    fn test_lookup_unknown_category() {
        let registry = FormatRegistry::new();
        assert!(matches!(
            registry.lookup("spreadsheet"),
            Err(ConvertError::UnknownCategory(_))
        ));
        assert_eq!(
            registry.lookup("video").unwrap().category,
            Category::Video
        );
    }

    #[test]
    fn test_formats_map_serializes() {
        let registry = FormatRegistry::new();
        let json = serde_json::to_value(registry.supported_formats_map()).unwrap();
        let outputs = json["text"]["outputs"].as_array().unwrap();
        assert!(outputs.iter().any(|f| f == "pdf"));
        assert!(json["audio"]["inputs"]
            .as_array()
            .unwrap()
            .iter()
            .any(|f| f == "aiff"));
    }
}
