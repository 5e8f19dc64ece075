//! FFmpeg backend with per-format codec presets.

use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::time::Duration;

use super::backend::{Backend, BackendJob, ExecContext};
use super::config::ToolsConfig;
use super::error::BackendError;
use super::tools::{run_process, Invocation};

/// Palette-based GIF rendering: sample at 10 fps, 480px wide.
const GIF_FILTER: &str =
    "fps=10,scale=480:-1:flags=lanczos,split[s0][s1];[s0]palettegen[p];[s1][p]paletteuse";

/// Audio output presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioPreset {
    Mp3,
    Wav,
    Ogg,
    Flac,
    Aac,
    M4a,
}

impl AudioPreset {
    pub fn from_target(target: &str) -> Option<Self> {
        match target {
            "mp3" => Some(Self::Mp3),
            "wav" => Some(Self::Wav),
            "ogg" => Some(Self::Ogg),
            "flac" => Some(Self::Flac),
            "aac" => Some(Self::Aac),
            "m4a" => Some(Self::M4a),
            _ => None,
        }
    }

    /// Returns the ffmpeg codec name for this preset.
    pub fn ffmpeg_codec(&self) -> &'static str {
        match self {
            Self::Mp3 => "libmp3lame",
            Self::Wav => "pcm_s16le",
            Self::Ogg => "libvorbis",
            Self::Flac => "flac",
            Self::Aac | Self::M4a => "aac",
        }
    }

    /// Whether this preset is lossless.
    pub fn is_lossless(&self) -> bool {
        matches!(self, Self::Wav | Self::Flac)
    }

    /// Target bitrate for lossy presets.
    pub fn bitrate_kbps(&self) -> Option<u32> {
        if self.is_lossless() {
            None
        } else {
            Some(192)
        }
    }

    /// Explicit muxer, where the extension alone is ambiguous.
    pub fn muxer(&self) -> Option<&'static str> {
        match self {
            Self::Aac => Some("adts"),
            Self::M4a => Some("ipod"),
            _ => None,
        }
    }
}

/// Video container presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoPreset {
    Mp4,
    Avi,
    Mkv,
    Mov,
    Webm,
    Gif,
}

impl VideoPreset {
    pub fn from_target(target: &str) -> Option<Self> {
        match target {
            "mp4" => Some(Self::Mp4),
            "avi" => Some(Self::Avi),
            "mkv" => Some(Self::Mkv),
            "mov" => Some(Self::Mov),
            "webm" => Some(Self::Webm),
            "gif" => Some(Self::Gif),
            _ => None,
        }
    }

    /// Returns the ffmpeg video codec for this container.
    pub fn video_codec(&self) -> &'static str {
        match self {
            Self::Mp4 | Self::Mkv | Self::Mov => "libx264",
            Self::Avi => "mpeg4",
            Self::Webm => "libvpx-vp9",
            Self::Gif => "gif",
        }
    }

    /// Audio codec, or `None` when the container carries no audio.
    pub fn audio_codec(&self) -> Option<&'static str> {
        match self {
            Self::Mp4 | Self::Mov => Some("aac"),
            Self::Mkv => Some("libvorbis"),
            Self::Avi => Some("libmp3lame"),
            Self::Webm => Some("libopus"),
            Self::Gif => None,
        }
    }
}

/// Whether a preset backend serves audio or video routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
}

/// FFmpeg with codec presets picked from the target format.
pub struct FfmpegPresetBackend {
    kind: MediaKind,
    ffmpeg_path: PathBuf,
    log_level: String,
    extra_args: Vec<String>,
    process_timeout: Duration,
}

impl FfmpegPresetBackend {
    pub fn new(kind: MediaKind, tools: &ToolsConfig) -> Self {
        Self {
            kind,
            ffmpeg_path: tools.ffmpeg_path.clone(),
            log_level: tools.ffmpeg_log_level.clone(),
            extra_args: tools.extra_ffmpeg_args.clone(),
            process_timeout: Duration::from_secs(tools.process_timeout_secs),
        }
    }

    pub fn audio(tools: &ToolsConfig) -> Self {
        Self::new(MediaKind::Audio, tools)
    }

    pub fn video(tools: &ToolsConfig) -> Self {
        Self::new(MediaKind::Video, tools)
    }

    /// Builds ffmpeg arguments for audio conversion.
    fn build_audio_args(&self, input: &Path, output: &Path, preset: AudioPreset) -> Vec<String> {
        let mut args = vec![
            "-y".to_string(), // Overwrite output
            "-i".to_string(),
            input.to_string_lossy().to_string(),
            "-vn".to_string(),
        ];

        args.extend(["-c:a".to_string(), preset.ffmpeg_codec().to_string()]);

        if let Some(bitrate) = preset.bitrate_kbps() {
            args.extend(["-b:a".to_string(), format!("{}k", bitrate)]);
        }

        if let Some(muxer) = preset.muxer() {
            args.extend(["-f".to_string(), muxer.to_string()]);
        }

        args.extend(["-loglevel".to_string(), self.log_level.clone()]);
        args.extend(self.extra_args.iter().cloned());
        args.push(output.to_string_lossy().to_string());

        args
    }

    /// Builds ffmpeg arguments for video conversion.
    fn build_video_args(&self, input: &Path, output: &Path, preset: VideoPreset) -> Vec<String> {
        let mut args = vec![
            "-y".to_string(),
            "-i".to_string(),
            input.to_string_lossy().to_string(),
        ];

        match preset {
            VideoPreset::Gif => {
                args.extend([
                    "-vf".to_string(),
                    GIF_FILTER.to_string(),
                    "-an".to_string(),
                    "-loop".to_string(),
                    "0".to_string(),
                ]);
            }
            VideoPreset::Webm => {
                args.extend([
                    "-c:v".to_string(),
                    preset.video_codec().to_string(),
                    "-crf".to_string(),
                    "32".to_string(),
                    "-b:v".to_string(),
                    "0".to_string(),
                ]);
            }
            VideoPreset::Avi => {
                args.extend([
                    "-c:v".to_string(),
                    preset.video_codec().to_string(),
                    "-q:v".to_string(),
                    "5".to_string(),
                ]);
            }
            VideoPreset::Mp4 | VideoPreset::Mkv | VideoPreset::Mov => {
                args.extend([
                    "-c:v".to_string(),
                    preset.video_codec().to_string(),
                    "-preset".to_string(),
                    "medium".to_string(),
                    "-crf".to_string(),
                    "23".to_string(),
                    "-pix_fmt".to_string(),
                    "yuv420p".to_string(),
                ]);
            }
        }

        if let Some(audio) = preset.audio_codec() {
            args.extend(["-c:a".to_string(), audio.to_string()]);
        }

        if matches!(preset, VideoPreset::Mp4 | VideoPreset::Mov) {
            args.extend(["-movflags".to_string(), "+faststart".to_string()]);
        }

        args.extend(["-loglevel".to_string(), self.log_level.clone()]);
        args.extend(self.extra_args.iter().cloned());
        args.push(output.to_string_lossy().to_string());

        args
    }

    fn build_args(&self, job: &BackendJob) -> Result<Vec<String>, BackendError> {
        let target = job.target_format.as_str();
        let args = match self.kind {
            MediaKind::Audio => AudioPreset::from_target(target)
                .map(|preset| self.build_audio_args(&job.input, &job.output, preset)),
            MediaKind::Video => VideoPreset::from_target(target)
                .map(|preset| self.build_video_args(&job.input, &job.output, preset)),
        };
        args.ok_or_else(|| BackendError::failed(format!("no ffmpeg preset for {}", target)))
    }
}

#[async_trait]
impl Backend for FfmpegPresetBackend {
    fn name(&self) -> &str {
        "ffmpeg-preset"
    }

    async fn execute(&self, job: &BackendJob, _ctx: &ExecContext) -> Result<(), BackendError> {
        let args = self.build_args(job)?;
        let invocation = Invocation {
            program: self.ffmpeg_path.clone(),
            args: args.into_iter().map(OsString::from).collect(),
            cwd: None,
        };
        run_process("ffmpeg", &invocation, self.process_timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn audio_backend() -> FfmpegPresetBackend {
        FfmpegPresetBackend::audio(&ToolsConfig::default())
    }

    fn video_backend() -> FfmpegPresetBackend {
        FfmpegPresetBackend::video(&ToolsConfig::default())
    }

    #[test]
    fn test_audio_preset_codec() {
        assert_eq!(AudioPreset::Mp3.ffmpeg_codec(), "libmp3lame");
        assert_eq!(AudioPreset::Ogg.ffmpeg_codec(), "libvorbis");
        assert_eq!(AudioPreset::Wav.ffmpeg_codec(), "pcm_s16le");
        assert_eq!(AudioPreset::from_target("wma"), None);
    }

    #[test]
    fn test_audio_preset_lossless() {
        assert!(AudioPreset::Flac.is_lossless());
        assert!(AudioPreset::Flac.bitrate_kbps().is_none());
        assert_eq!(AudioPreset::Mp3.bitrate_kbps(), Some(192));
    }

    #[test]
    fn test_build_audio_args_mp3() {
        let args = audio_backend().build_audio_args(
            Path::new("/in/song.wav"),
            Path::new("/out/song.mp3"),
            AudioPreset::Mp3,
        );

        assert!(args.contains(&"-y".to_string()));
        assert!(args.windows(2).any(|w| w == ["-c:a", "libmp3lame"]));
        assert!(args.windows(2).any(|w| w == ["-b:a", "192k"]));
        assert_eq!(args.last().unwrap(), "/out/song.mp3");
    }

    #[test]
    fn test_build_audio_args_aac_uses_adts() {
        let args = audio_backend().build_audio_args(
            Path::new("/in/a.flac"),
            Path::new("/out/a.aac"),
            AudioPreset::Aac,
        );
        assert!(args.windows(2).any(|w| w == ["-f", "adts"]));
    }

    #[test]
    fn test_build_video_args_gif_uses_palette() {
        let args = video_backend().build_video_args(
            Path::new("/in/clip.mp4"),
            Path::new("/out/clip.gif"),
            VideoPreset::Gif,
        );
        let filter_index = args.iter().position(|a| a == "-vf").unwrap();
        assert!(args[filter_index + 1].contains("palettegen"));
        assert!(args.contains(&"-an".to_string()));
        assert!(!args.contains(&"-c:a".to_string()));
    }

    #[test]
    fn test_build_video_args_mp4() {
        let args = video_backend().build_video_args(
            Path::new("/in/clip.mkv"),
            Path::new("/out/clip.mp4"),
            VideoPreset::Mp4,
        );
        assert!(args.windows(2).any(|w| w == ["-c:v", "libx264"]));
        assert!(args.windows(2).any(|w| w == ["-c:a", "aac"]));
        assert!(args.windows(2).any(|w| w == ["-movflags", "+faststart"]));
    }

    #[test]
    fn test_audio_backend_rejects_video_target() {
        let job = BackendJob::file("/in/a.wav", "/out/a.mp4", "wav", "mp4");
        assert!(audio_backend().build_args(&job).is_err());
        assert!(video_backend().build_args(&job).is_ok());
    }

    #[test]
    fn test_extra_args_before_output() {
        let mut tools = ToolsConfig::default();
        tools.extra_ffmpeg_args = vec!["-threads".to_string(), "2".to_string()];
        let backend = FfmpegPresetBackend::audio(&tools);
        let args =
            backend.build_audio_args(Path::new("a.wav"), Path::new("a.ogg"), AudioPreset::Ogg);
        let n = args.len();
        assert_eq!(&args[n - 3..], ["-threads", "2", "a.ogg"]);
    }
}
