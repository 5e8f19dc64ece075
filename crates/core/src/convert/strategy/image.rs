use std::sync::Arc;

use super::{chain, descriptor_for, tool, RouteTable};
use crate::convert::backend::BackendChain;
use crate::convert::config::ToolsConfig;
use crate::convert::native::NativeImageBackend;
use crate::convert::path::ExecutionPath;
use crate::convert::tools::Tool;
use crate::format::{Category, ConverterDescriptor};

/// Raster and vector images. Routing depends on the source kind first and
/// the target second.
pub struct ImageConverter {
    pub(super) descriptor: ConverterDescriptor,
    pub(super) overrides: RouteTable,
    vector: BackendChain,
    heic: BackendChain,
    to_pdf: BackendChain,
    raster: BackendChain,
}

impl ImageConverter {
    pub fn new(tools: &ToolsConfig) -> Self {
        Self {
            descriptor: descriptor_for(Category::Image),
            overrides: RouteTable::default(),
            vector: chain(vec![
                tool(Tool::Inkscape, tools),
                tool(Tool::RsvgConvert, tools),
                tool(Tool::Magick, tools),
            ]),
            heic: chain(vec![tool(Tool::Magick, tools), tool(Tool::Ffmpeg, tools)]),
            to_pdf: chain(vec![tool(Tool::Magick, tools), tool(Tool::Img2pdf, tools)]),
            raster: chain(vec![
                Arc::new(NativeImageBackend::new()),
                tool(Tool::Magick, tools),
            ]),
        }
    }

    pub(super) fn route(&self, from: &str, to: &str) -> Option<ExecutionPath> {
        if let Some(path) = self.overrides.lookup(from, to) {
            return Some(path.clone());
        }

        let selected = match (from, to) {
            ("svg", _) => &self.vector,
            ("heic", _) => &self.heic,
            (_, "pdf") => &self.to_pdf,
            _ => &self.raster,
        };
        Some(ExecutionPath::Direct(selected.clone()))
    }
}
