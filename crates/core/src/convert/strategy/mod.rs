//! Per-category converters and their (input, target) dispatch tables.

mod archive;
mod audio;
mod document;
mod image;
mod text;
mod video;

pub use archive::CompressedConverter;
pub use audio::AudioConverter;
pub use document::DocumentConverter;
pub use image::ImageConverter;
pub use text::TextConverter;
pub use video::VideoConverter;

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use super::backend::{Backend, BackendChain, ExecContext};
use super::config::ToolsConfig;
use super::error::ConvertError;
use super::native::{NativeTextBackend, TextTransform};
use super::path::ExecutionPath;
use super::tools::{Tool, ToolBackend};
use crate::format::{format_of, normalize_format, Category, ConverterDescriptor, FormatRegistry};
use crate::storage::sanitize_basename;

/// Explicit routes keyed by (input, target), with target-only fallbacks.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    pairs: HashMap<(String, String), ExecutionPath>,
    targets: HashMap<String, ExecutionPath>,
}

impl RouteTable {
    /// Route for one (input, target) pair.
    pub fn insert_pair(&mut self, from: &str, to: &str, path: ExecutionPath) {
        self.pairs.insert((from.to_string(), to.to_string()), path);
    }

    /// Route for any input producing `to`.
    pub fn insert_target(&mut self, to: &str, path: ExecutionPath) {
        self.targets.insert(to.to_string(), path);
    }

    /// Pair routes win over target-only routes.
    pub fn lookup(&self, from: &str, to: &str) -> Option<&ExecutionPath> {
        self.pairs
            .get(&(from.to_string(), to.to_string()))
            .or_else(|| self.targets.get(to))
    }
}

pub(crate) fn tool(tool: Tool, tools: &ToolsConfig) -> Arc<dyn Backend> {
    Arc::new(ToolBackend::new(tool, tools))
}

pub(crate) fn native_text(transform: TextTransform) -> Arc<dyn Backend> {
    Arc::new(NativeTextBackend::new(transform))
}

pub(crate) fn descriptor_for(category: Category) -> ConverterDescriptor {
    FormatRegistry::new().descriptor(category).clone()
}

/// The converter serving one category.
pub enum ConverterStrategy {
    Text(TextConverter),
    Document(DocumentConverter),
    Image(ImageConverter),
    Audio(AudioConverter),
    Video(VideoConverter),
    Compressed(CompressedConverter),
}

impl ConverterStrategy {
    /// Builds the converter for `category` over the configured tools.
    pub fn for_category(category: Category, tools: &ToolsConfig) -> Self {
        match category {
            Category::Text => Self::Text(TextConverter::new(tools)),
            Category::Document => Self::Document(DocumentConverter::new(tools)),
            Category::Image => Self::Image(ImageConverter::new(tools)),
            Category::Audio => Self::Audio(AudioConverter::new(tools)),
            Category::Video => Self::Video(VideoConverter::new(tools)),
            Category::Compressed => Self::Compressed(CompressedConverter::new(tools)),
        }
    }

    pub fn category(&self) -> Category {
        self.descriptor().category
    }

    pub fn descriptor(&self) -> &ConverterDescriptor {
        match self {
            Self::Text(c) => &c.descriptor,
            Self::Document(c) => &c.descriptor,
            Self::Image(c) => &c.descriptor,
            Self::Audio(c) => &c.descriptor,
            Self::Video(c) => &c.descriptor,
            Self::Compressed(c) => &c.descriptor,
        }
    }

    pub fn supported_input_formats(&self) -> &BTreeSet<String> {
        &self.descriptor().supported_input_formats
    }

    pub fn supported_output_formats(&self) -> &BTreeSet<String> {
        &self.descriptor().supported_output_formats
    }

    fn routes_mut(&mut self) -> &mut RouteTable {
        match self {
            Self::Text(c) => &mut c.routes,
            Self::Document(c) => &mut c.routes,
            Self::Image(c) => &mut c.overrides,
            Self::Audio(c) => &mut c.routes,
            Self::Video(c) => &mut c.routes,
            Self::Compressed(c) => &mut c.overrides,
        }
    }

    /// Replaces (or adds) the route for one pair.
    pub fn with_route(mut self, from: &str, to: &str, path: ExecutionPath) -> Self {
        self.routes_mut()
            .insert_pair(&normalize_format(from), &normalize_format(to), path);
        self
    }

    /// Normalized (input, target) formats, or why the request is invalid.
    /// Only inspects the source's name.
    pub fn validate(&self, source: &Path, target: &str) -> Result<(String, String), ConvertError> {
        let from = format_of(source).unwrap_or_default();
        self.validate_formats(&from, target)
    }

    /// Same as [`validate`](Self::validate) for an explicit input format.
    pub fn validate_formats(
        &self,
        input: &str,
        target: &str,
    ) -> Result<(String, String), ConvertError> {
        let descriptor = self.descriptor();
        let from = normalize_format(input);
        let to = normalize_format(target);

        if !descriptor.accepts(&from) {
            return Err(ConvertError::unsupported_input(if from.is_empty() {
                "(none)".to_string()
            } else {
                from
            }));
        }
        if !descriptor.produces(&to) {
            return Err(ConvertError::unsupported_output(to));
        }
        if from == to {
            return Err(ConvertError::IdenticalFormat { format: to });
        }
        Ok((from, to))
    }

    /// Execution plan for a validated pair.
    pub fn route(&self, from: &str, to: &str) -> Result<ExecutionPath, ConvertError> {
        let path = match self {
            Self::Text(c) => c.route(from, to),
            Self::Document(c) => c.route(from, to),
            Self::Image(c) => c.route(from, to),
            Self::Audio(c) => c.route(from, to),
            Self::Video(c) => c.route(from, to),
            Self::Compressed(c) => c.route(from, to),
        };
        path.ok_or_else(|| ConvertError::unsupported_pair(from, to))
    }

    /// Converts `source` into `out_dir/<name>.<target>` and returns the
    /// produced path. Nothing is executed when validation or routing fails.
    pub async fn convert(
        &self,
        source: &Path,
        target: &str,
        output_name: Option<&str>,
        out_dir: &Path,
        ctx: &ExecContext,
    ) -> Result<PathBuf, ConvertError> {
        let (from, to) = self.validate(source, target)?;
        self.run(source, &from, &to, output_name, out_dir, ctx).await
    }

    /// Routes and executes an already validated pair.
    pub async fn run(
        &self,
        source: &Path,
        from: &str,
        to: &str,
        output_name: Option<&str>,
        out_dir: &Path,
        ctx: &ExecContext,
    ) -> Result<PathBuf, ConvertError> {
        let path = self.route(from, to)?;

        let stem = output_name
            .map(|name| {
                Path::new(name)
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default()
            })
            .or_else(|| {
                source
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
            })
            .unwrap_or_default();
        let output = out_dir.join(format!("{}.{}", sanitize_basename(&stem), to));

        tokio::fs::create_dir_all(out_dir).await?;

        info!(
            category = %self.category(),
            from = %from,
            to = %to,
            plan = %path.describe(),
            "Converting"
        );

        path.execute(source, from, to, &output, ctx).await?;
        Ok(output)
    }
}

/// Chain helper for the route tables.
pub(crate) fn chain(backends: Vec<Arc<dyn Backend>>) -> BackendChain {
    BackendChain::new(backends)
}
