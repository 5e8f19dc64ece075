//! Conversion strategies and the backends they drive.
//!
//! Each category is served by a [`ConverterStrategy`] variant that maps an
//! (input, target) pair to an [`ExecutionPath`]: a single fallback chain, a
//! chain through an intermediate format, or an archive re-pack. Backends are
//! either in-process ([`native`]) or external tools ([`ToolBackend`],
//! [`FfmpegPresetBackend`]).

mod backend;
mod capabilities;
mod config;
mod error;
mod ffmpeg;
pub mod native;
mod path;
mod strategy;
mod tools;

pub use backend::{Backend, BackendChain, BackendJob, ExecContext, OutputKind};
pub use capabilities::ToolAvailability;
pub use config::ToolsConfig;
pub use error::{BackendError, BackendFailure, ConvertError, FormatDirection};
pub use ffmpeg::{AudioPreset, FfmpegPresetBackend, MediaKind, VideoPreset};
pub use path::ExecutionPath;
pub use strategy::{
    AudioConverter, CompressedConverter, ConverterStrategy, DocumentConverter, ImageConverter,
    RouteTable, TextConverter, VideoConverter,
};
pub use tools::{Tool, ToolBackend};
