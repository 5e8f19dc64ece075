use std::sync::Arc;

use super::{descriptor_for, tool, RouteTable};
use crate::convert::config::ToolsConfig;
use crate::convert::ffmpeg::FfmpegPresetBackend;
use crate::convert::path::ExecutionPath;
use crate::convert::tools::Tool;
use crate::format::{Category, ConverterDescriptor};

/// Audio formats, all through ffmpeg.
pub struct AudioConverter {
    pub(super) descriptor: ConverterDescriptor,
    pub(super) routes: RouteTable,
}

impl AudioConverter {
    pub fn new(tools: &ToolsConfig) -> Self {
        let descriptor = descriptor_for(Category::Audio);
        let preset = Arc::new(FfmpegPresetBackend::audio(tools));
        let plain = tool(Tool::Ffmpeg, tools);

        let mut routes = RouteTable::default();
        for target in &descriptor.supported_output_formats {
            routes.insert_target(
                target,
                ExecutionPath::direct(vec![preset.clone(), plain.clone()]),
            );
        }

        Self { descriptor, routes }
    }

    pub(super) fn route(&self, from: &str, to: &str) -> Option<ExecutionPath> {
        self.routes.lookup(from, to).cloned()
    }
}
