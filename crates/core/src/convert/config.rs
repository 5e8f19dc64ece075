//! Configuration for external conversion tools.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::tools::Tool;

/// Paths and options for the external tools backends shell out to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Path to ffmpeg binary.
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,

    /// Path to pandoc binary.
    #[serde(default = "default_pandoc_path")]
    pub pandoc_path: PathBuf,

    /// Path to wkhtmltopdf binary.
    #[serde(default = "default_wkhtmltopdf_path")]
    pub wkhtmltopdf_path: PathBuf,

    /// Path to the LibreOffice binary (run headless).
    #[serde(default = "default_libreoffice_path")]
    pub libreoffice_path: PathBuf,

    /// Path to pdftotext (poppler).
    #[serde(default = "default_pdftotext_path")]
    pub pdftotext_path: PathBuf,

    /// Path to pdftohtml (poppler).
    #[serde(default = "default_pdftohtml_path")]
    pub pdftohtml_path: PathBuf,

    /// Path to inkscape binary.
    #[serde(default = "default_inkscape_path")]
    pub inkscape_path: PathBuf,

    /// Path to rsvg-convert binary.
    #[serde(default = "default_rsvg_convert_path")]
    pub rsvg_convert_path: PathBuf,

    /// Path to ImageMagick 7 `magick` binary.
    #[serde(default = "default_magick_path")]
    pub magick_path: PathBuf,

    /// Path to img2pdf binary.
    #[serde(default = "default_img2pdf_path")]
    pub img2pdf_path: PathBuf,

    /// Path to 7z binary.
    #[serde(default = "default_seven_zip_path")]
    pub seven_zip_path: PathBuf,

    /// Path to unrar binary.
    #[serde(default = "default_unrar_path")]
    pub unrar_path: PathBuf,

    /// Path to tar binary.
    #[serde(default = "default_tar_path")]
    pub tar_path: PathBuf,

    /// Deadline for a single external process, in seconds.
    #[serde(default = "default_process_timeout")]
    pub process_timeout_secs: u64,

    /// FFmpeg log level (quiet, panic, fatal, error, warning, info, verbose, debug, trace).
    #[serde(default = "default_log_level")]
    pub ffmpeg_log_level: String,

    /// Additional global ffmpeg arguments.
    #[serde(default)]
    pub extra_ffmpeg_args: Vec<String>,
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_pandoc_path() -> PathBuf {
    PathBuf::from("pandoc")
}

fn default_wkhtmltopdf_path() -> PathBuf {
    PathBuf::from("wkhtmltopdf")
}

fn default_libreoffice_path() -> PathBuf {
    PathBuf::from("soffice")
}

fn default_pdftotext_path() -> PathBuf {
    PathBuf::from("pdftotext")
}

fn default_pdftohtml_path() -> PathBuf {
    PathBuf::from("pdftohtml")
}

fn default_inkscape_path() -> PathBuf {
    PathBuf::from("inkscape")
}

fn default_rsvg_convert_path() -> PathBuf {
    PathBuf::from("rsvg-convert")
}

fn default_magick_path() -> PathBuf {
    PathBuf::from("magick")
}

fn default_img2pdf_path() -> PathBuf {
    PathBuf::from("img2pdf")
}

fn default_seven_zip_path() -> PathBuf {
    PathBuf::from("7z")
}

fn default_unrar_path() -> PathBuf {
    PathBuf::from("unrar")
}

fn default_tar_path() -> PathBuf {
    PathBuf::from("tar")
}

fn default_process_timeout() -> u64 {
    300
}

fn default_log_level() -> String {
    "error".to_string()
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            pandoc_path: default_pandoc_path(),
            wkhtmltopdf_path: default_wkhtmltopdf_path(),
            libreoffice_path: default_libreoffice_path(),
            pdftotext_path: default_pdftotext_path(),
            pdftohtml_path: default_pdftohtml_path(),
            inkscape_path: default_inkscape_path(),
            rsvg_convert_path: default_rsvg_convert_path(),
            magick_path: default_magick_path(),
            img2pdf_path: default_img2pdf_path(),
            seven_zip_path: default_seven_zip_path(),
            unrar_path: default_unrar_path(),
            tar_path: default_tar_path(),
            process_timeout_secs: default_process_timeout(),
            ffmpeg_log_level: default_log_level(),
            extra_ffmpeg_args: Vec::new(),
        }
    }
}

impl ToolsConfig {
    /// Configured binary for a tool.
    pub fn program(&self, tool: Tool) -> &Path {
        match tool {
            Tool::Ffmpeg => &self.ffmpeg_path,
            Tool::Pandoc => &self.pandoc_path,
            Tool::Wkhtmltopdf => &self.wkhtmltopdf_path,
            Tool::LibreOffice => &self.libreoffice_path,
            Tool::Pdftotext => &self.pdftotext_path,
            Tool::Pdftohtml => &self.pdftohtml_path,
            Tool::Inkscape => &self.inkscape_path,
            Tool::RsvgConvert => &self.rsvg_convert_path,
            Tool::Magick => &self.magick_path,
            Tool::Img2pdf => &self.img2pdf_path,
            Tool::SevenZip => &self.seven_zip_path,
            Tool::Unrar => &self.unrar_path,
            Tool::Tar => &self.tar_path,
        }
    }

    /// Sets the ffmpeg path.
    pub fn with_ffmpeg(mut self, path: impl Into<PathBuf>) -> Self {
        self.ffmpeg_path = path.into();
        self
    }

    /// Sets the LibreOffice path.
    pub fn with_libreoffice(mut self, path: impl Into<PathBuf>) -> Self {
        self.libreoffice_path = path.into();
        self
    }

    /// Sets the ImageMagick path.
    pub fn with_magick(mut self, path: impl Into<PathBuf>) -> Self {
        self.magick_path = path.into();
        self
    }

    /// Sets the per-process timeout in seconds.
    pub fn with_process_timeout(mut self, timeout_secs: u64) -> Self {
        self.process_timeout_secs = timeout_secs;
        self
    }

    /// Points every tool at a directory, keeping binary names. Handy for
    /// bundled toolchains and for tests that want everything missing.
    pub fn with_bin_dir(mut self, dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        for tool in Tool::ALL {
            let name = tool.binary_name();
            *self.program_mut(tool) = dir.join(name);
        }
        self
    }

    fn program_mut(&mut self, tool: Tool) -> &mut PathBuf {
        match tool {
            Tool::Ffmpeg => &mut self.ffmpeg_path,
            Tool::Pandoc => &mut self.pandoc_path,
            Tool::Wkhtmltopdf => &mut self.wkhtmltopdf_path,
            Tool::LibreOffice => &mut self.libreoffice_path,
            Tool::Pdftotext => &mut self.pdftotext_path,
            Tool::Pdftohtml => &mut self.pdftohtml_path,
            Tool::Inkscape => &mut self.inkscape_path,
            Tool::RsvgConvert => &mut self.rsvg_convert_path,
            Tool::Magick => &mut self.magick_path,
            Tool::Img2pdf => &mut self.img2pdf_path,
            Tool::SevenZip => &mut self.seven_zip_path,
            Tool::Unrar => &mut self.unrar_path,
            Tool::Tar => &mut self.tar_path,
        }
    }
}
