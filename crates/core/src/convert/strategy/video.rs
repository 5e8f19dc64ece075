use std::sync::Arc;

use super::{descriptor_for, tool, RouteTable};
use crate::convert::config::ToolsConfig;
use crate::convert::ffmpeg::FfmpegPresetBackend;
use crate::convert::path::ExecutionPath;
use crate::convert::tools::Tool;
use crate::format::{Category, ConverterDescriptor};

/// Video containers, all through ffmpeg.
pub struct VideoConverter {
    pub(super) descriptor: ConverterDescriptor,
    pub(super) routes: RouteTable,
}

impl VideoConverter {
    pub fn new(tools: &ToolsConfig) -> Self {
        let descriptor = descriptor_for(Category::Video);
        let preset = Arc::new(FfmpegPresetBackend::video(tools));
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_target_has_a_route() {
        let converter = VideoConverter::new(&ToolsConfig::default());
        for target in ["mp4", "avi", "mkv", "mov", "webm", "gif"] {
            assert_eq!(
                converter.route("flv", target).unwrap().describe(),
                "direct[ffmpeg-preset, ffmpeg]"
            );
        }
    }
}
