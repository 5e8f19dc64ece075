//! External tool backends run as child processes.

use async_trait::async_trait;
use serde::Serialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::time::{timeout, Duration};
use tracing::debug;

use super::backend::{Backend, BackendJob, ExecContext, OutputKind};
use super::config::ToolsConfig;
use super::error::BackendError;

/// Lines of stderr kept in failure reports.
const STDERR_TAIL_LINES: usize = 8;

/// External programs the converters know how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tool {
    Ffmpeg,
    Pandoc,
    Wkhtmltopdf,
    LibreOffice,
    Pdftotext,
    Pdftohtml,
    Inkscape,
    RsvgConvert,
    Magick,
    Img2pdf,
    SevenZip,
    Unrar,
    Tar,
}

impl Tool {
    pub const ALL: [Tool; 13] = [
        Tool::Ffmpeg,
        Tool::Pandoc,
        Tool::Wkhtmltopdf,
        Tool::LibreOffice,
        Tool::Pdftotext,
        Tool::Pdftohtml,
        Tool::Inkscape,
        Tool::RsvgConvert,
        Tool::Magick,
        Tool::Img2pdf,
        Tool::SevenZip,
        Tool::Unrar,
        Tool::Tar,
    ];

    /// Backend name used in logs and failure reports.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ffmpeg => "ffmpeg",
            Self::Pandoc => "pandoc",
            Self::Wkhtmltopdf => "wkhtmltopdf",
            Self::LibreOffice => "libreoffice",
            Self::Pdftotext => "pdftotext",
            Self::Pdftohtml => "pdftohtml",
            Self::Inkscape => "inkscape",
            Self::RsvgConvert => "rsvg-convert",
            Self::Magick => "magick",
            Self::Img2pdf => "img2pdf",
            Self::SevenZip => "7z",
            Self::Unrar => "unrar",
            Self::Tar => "tar",
        }
    }

    /// Default executable name.
    pub fn binary_name(&self) -> &'static str {
        match self {
            Self::LibreOffice => "soffice",
            other => other.name(),
        }
    }

    /// Cheap argument that makes the tool print something and exit.
    pub(crate) fn probe_args(&self) -> &'static [&'static str] {
        match self {
            Self::Ffmpeg | Self::Magick => &["-version"],
            Self::Pdftotext | Self::Pdftohtml => &["-v"],
            Self::SevenZip => &["i"],
            Self::Unrar => &[],
            _ => &["--version"],
        }
    }
}

/// A fully built command line.
#[derive(Debug, Clone)]
pub(crate) struct Invocation {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub cwd: Option<PathBuf>,
}

impl Invocation {
    fn new(program: &Path) -> Self {
        Self {
            program: program.to_path_buf(),
            args: Vec::new(),
            cwd: None,
        }
    }

    fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }
}

fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

/// Runs a process to completion under `deadline`. The child is killed if
/// the deadline passes or the calling future is dropped.
pub(crate) async fn run_process(
    tool: &str,
    invocation: &Invocation,
    deadline: Duration,
) -> Result<(), BackendError> {
    let mut command = Command::new(&invocation.program);
    command
        .args(&invocation.args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(cwd) = &invocation.cwd {
        command.current_dir(cwd);
    }

    debug!(tool = %tool, program = %invocation.program.display(), args = ?invocation.args, "Spawning");

    let mut child = command.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            BackendError::Unavailable {
                tool: tool.to_string(),
                path: invocation.program.clone(),
            }
        } else {
            BackendError::Io(e)
        }
    })?;

    let mut stderr = child.stderr.take();
    let result = timeout(deadline, async {
        let mut captured = String::new();
        if let Some(stderr) = stderr.as_mut() {
            // Lossy stderr is fine; it only feeds error messages.
            let mut bytes = Vec::new();
            let _ = stderr.read_to_end(&mut bytes).await;
            captured = String::from_utf8_lossy(&bytes).into_owned();
        }
        let status = child.wait().await?;
        Ok::<_, std::io::Error>((status, captured))
    })
    .await;

    match result {
        Ok(Ok((status, _))) if status.success() => Ok(()),
        Ok(Ok((status, captured))) => Err(BackendError::failed_with_stderr(
            format!("{} exited with {}", tool, status),
            stderr_tail(&captured),
        )),
        Ok(Err(e)) => Err(BackendError::Io(e)),
        Err(_) => {
            let _ = child.kill().await;
            Err(BackendError::Timeout(deadline))
        }
    }
}

async fn top_level_entries(dir: &Path) -> std::io::Result<Vec<OsString>> {
    let mut entries = Vec::new();
    let mut read_dir = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = read_dir.next_entry().await? {
        entries.push(entry.file_name());
    }
    entries.sort();
    Ok(entries)
}

fn tar_compression_flag(format: &str) -> Option<&'static str> {
    match format {
        "gz" => Some("-z"),
        "bz2" => Some("-j"),
        "xz" => Some("-J"),
        _ => None,
    }
}

fn libreoffice_filter(target: &str) -> &str {
    match target {
        "txt" => "txt:Text",
        other => other,
    }
}

/// Backend that shells out to one external tool.
pub struct ToolBackend {
    tool: Tool,
    program: PathBuf,
    process_timeout: Duration,
}

impl ToolBackend {
    pub fn new(tool: Tool, tools: &ToolsConfig) -> Self {
        Self {
            tool,
            program: tools.program(tool).to_path_buf(),
            process_timeout: Duration::from_secs(tools.process_timeout_secs),
        }
    }

    pub fn tool(&self) -> Tool {
        self.tool
    }

    fn unsupported(&self, job: &BackendJob) -> BackendError {
        BackendError::failed(format!(
            "{} cannot convert {} to {}",
            self.tool.name(),
            if job.input_format.is_empty() {
                "directory"
            } else {
                job.input_format.as_str()
            },
            if job.target_format.is_empty() {
                "directory"
            } else {
                job.target_format.as_str()
            },
        ))
    }

    /// Builds the command line and the path the tool writes to, which may
    /// differ from `job.output` for tools that pick their own file names.
    pub(crate) async fn invocation(
        &self,
        job: &BackendJob,
    ) -> Result<(Invocation, PathBuf), BackendError> {
        let base = Invocation::new(&self.program);
        let input = job.input.as_os_str().to_os_string();
        let output = job.output.as_os_str().to_os_string();
        let target = job.target_format.as_str();

        let built = match self.tool {
            Tool::Ffmpeg => (
                base.args(["-y", "-loglevel", "error", "-i"])
                    .arg(input)
                    .arg(output),
                job.output.clone(),
            ),
            Tool::Pandoc => {
                let mut inv = base.arg(input);
                if job.input_format == "txt" {
                    inv = inv.args(["-f", "markdown"]);
                }
                inv = match target {
                    "txt" => inv.args(["-t", "plain"]),
                    "md" => inv.args(["-t", "gfm"]),
                    "html" => inv.arg("-s"),
                    _ => inv,
                };
                (inv.arg("-o").arg(output), job.output.clone())
            }
            Tool::Wkhtmltopdf => (
                base.arg("--quiet").arg(input).arg(output),
                job.output.clone(),
            ),
            Tool::LibreOffice => {
                let out_dir = job
                    .output
                    .parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| PathBuf::from("."));
                let stem = job.input.file_stem().unwrap_or_default().to_os_string();
                let mut produced_name = stem;
                produced_name.push(format!(".{}", target));

                let mut inv = base.arg("--headless");
                if job.input_format == "pdf" {
                    inv = inv.arg("--infilter=writer_pdf_import");
                }
                let inv = inv
                    .args(["--convert-to", libreoffice_filter(target), "--outdir"])
                    .arg(out_dir.as_os_str())
                    .arg(input);
                (inv, out_dir.join(produced_name))
            }
            Tool::Pdftotext => (
                base.arg("-layout").arg(input).arg(output),
                job.output.clone(),
            ),
            Tool::Pdftohtml => {
                // pdftohtml appends ".html" to the name it is given.
                let stem = job.output.with_extension("");
                (
                    base.args(["-s", "-noframes", "-q", "-i"])
                        .arg(input)
                        .arg(stem.as_os_str()),
                    stem.with_extension("html"),
                )
            }
            Tool::Inkscape => (
                base.arg(format!("--export-type={}", target))
                    .arg({
                        let mut flag = OsString::from("--export-filename=");
                        flag.push(&output);
                        flag
                    })
                    .arg(input),
                job.output.clone(),
            ),
            Tool::RsvgConvert => {
                if !matches!(target, "png" | "pdf") {
                    return Err(self.unsupported(job));
                }
                (
                    base.args(["-f", target, "-o"]).arg(output).arg(input),
                    job.output.clone(),
                )
            }
            Tool::Magick => {
                let mut inv = base.arg(input);
                inv = match target {
                    "jpg" => inv.args(["-background", "white", "-flatten"]),
                    "ico" => inv.args(["-resize", "256x256>"]),
                    _ => inv,
                };
                (inv.arg(output), job.output.clone())
            }
            Tool::Img2pdf => (
                base.arg(input).arg("-o").arg(output),
                job.output.clone(),
            ),
            Tool::SevenZip => match job.output_kind {
                OutputKind::Directory => {
                    let mut out_flag = OsString::from("-o");
                    out_flag.push(&output);
                    (
                        base.args(["x", "-y"]).arg(out_flag).arg(input),
                        job.output.clone(),
                    )
                }
                OutputKind::File => {
                    let archive_type = match target {
                        "zip" => "-tzip",
                        "7z" => "-t7z",
                        _ => return Err(self.unsupported(job)),
                    };
                    let archive = std::path::absolute(&job.output)?;
                    let entries = top_level_entries(&job.input).await?;
                    (
                        base.args(["a", "-y", archive_type])
                            .arg(archive.as_os_str())
                            .args(entries)
                            .current_dir(&job.input),
                        job.output.clone(),
                    )
                }
            },
            Tool::Unrar => match job.output_kind {
                OutputKind::Directory => {
                    let mut dest = output;
                    dest.push("/");
                    (
                        base.args(["x", "-o+", "-y"]).arg(input).arg(dest),
                        job.output.clone(),
                    )
                }
                OutputKind::File => return Err(self.unsupported(job)),
            },
            Tool::Tar => match job.output_kind {
                OutputKind::Directory => {
                    let mut inv = base.arg("-x");
                    if let Some(flag) = tar_compression_flag(&job.input_format) {
                        inv = inv.arg(flag);
                    }
                    (
                        inv.arg("-f").arg(input).arg("-C").arg(output),
                        job.output.clone(),
                    )
                }
                OutputKind::File => {
                    if !matches!(target, "tar" | "gz" | "bz2" | "xz") {
                        return Err(self.unsupported(job));
                    }
                    let entries = top_level_entries(&job.input).await?;
                    if entries.is_empty() {
                        return Err(BackendError::failed("nothing to pack"));
                    }
                    let mut inv = base.arg("-c");
                    if let Some(flag) = tar_compression_flag(target) {
                        inv = inv.arg(flag);
                    }
                    (
                        inv.arg("-f")
                            .arg(output)
                            .arg("-C")
                            .arg(job.input.as_os_str())
                            .args(entries),
                        job.output.clone(),
                    )
                }
            },
        };

        Ok(built)
    }
}

#[async_trait]
impl Backend for ToolBackend {
    fn name(&self) -> &str {
        self.tool.name()
    }

    async fn execute(&self, job: &BackendJob, ctx: &ExecContext) -> Result<(), BackendError> {
        let (mut invocation, produced) = self.invocation(job).await?;

        // Concurrent LibreOffice instances must not share a profile.
        let _profile = if self.tool == Tool::LibreOffice {
            let profile = ctx.scratch_dir("lo-profile-").await?;
            let mut flag = OsString::from("-env:UserInstallation=file://");
            flag.push(std::path::absolute(profile.path())?);
            invocation.args.insert(0, flag);
            Some(profile)
        } else {
            None
        };

        run_process(self.tool.name(), &invocation, self.process_timeout).await?;

        if produced != job.output {
            if !tokio::fs::try_exists(&produced).await? {
                return Err(BackendError::failed(format!(
                    "{} did not produce {}",
                    self.tool.name(),
                    produced.display()
                )));
            }
            tokio::fs::rename(&produced, &job.output).await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::WorkerPool;
    use tempfile::TempDir;

    fn backend(tool: Tool) -> ToolBackend {
        ToolBackend::new(tool, &ToolsConfig::default())
    }

    fn args_of(invocation: &Invocation) -> Vec<String> {
        invocation
            .args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[tokio::test]
    async fn test_pandoc_plain_text_target() {
        let job = BackendJob::file("/in/doc.docx", "/out/doc.txt", "docx", "txt");
        let (inv, produced) = backend(Tool::Pandoc).invocation(&job).await.unwrap();
        assert_eq!(
            args_of(&inv),
            vec!["/in/doc.docx", "-t", "plain", "-o", "/out/doc.txt"]
        );
        assert_eq!(produced, PathBuf::from("/out/doc.txt"));
    }

    #[tokio::test]
    async fn test_libreoffice_picks_its_own_name() {
        let job = BackendJob::file("/in/report.docx", "/out/staged.pdf", "docx", "pdf");
        let (inv, produced) = backend(Tool::LibreOffice).invocation(&job).await.unwrap();
        let args = args_of(&inv);
        assert!(args.contains(&"--headless".to_string()));
        assert!(args.windows(2).any(|w| w == ["--convert-to", "pdf"]));
        assert_eq!(produced, PathBuf::from("/out/report.pdf"));
    }

    #[tokio::test]
    async fn test_libreoffice_pdf_import_filter() {
        let job = BackendJob::file("/in/scan.pdf", "/out/scan.txt", "pdf", "txt");
        let (inv, _) = backend(Tool::LibreOffice).invocation(&job).await.unwrap();
        let args = args_of(&inv);
        assert!(args.contains(&"--infilter=writer_pdf_import".to_string()));
        assert!(args.contains(&"txt:Text".to_string()));
    }

    #[tokio::test]
    async fn test_pdftohtml_output_name() {
        let job = BackendJob::file("/in/a.pdf", "/out/a.html", "pdf", "html");
        let (inv, produced) = backend(Tool::Pdftohtml).invocation(&job).await.unwrap();
        assert_eq!(args_of(&inv).last().unwrap(), "/out/a");
        assert_eq!(produced, PathBuf::from("/out/a.html"));
    }

    #[tokio::test]
    async fn test_rsvg_rejects_jpg() {
        let job = BackendJob::file("/in/a.svg", "/out/a.jpg", "svg", "jpg");
        assert!(backend(Tool::RsvgConvert).invocation(&job).await.is_err());
    }

    #[tokio::test]
    async fn test_tar_extract_flags() {
        let job = BackendJob::extract("/in/a.tar.xz", "/scratch/contents", "xz");
        let (inv, _) = backend(Tool::Tar).invocation(&job).await.unwrap();
        assert_eq!(
            args_of(&inv),
            vec!["-x", "-J", "-f", "/in/a.tar.xz", "-C", "/scratch/contents"]
        );
    }

    #[tokio::test]
    async fn test_tar_pack_lists_entries() {
        let dir = TempDir::new().unwrap();
        let contents = dir.path().join("contents");
        std::fs::create_dir_all(contents.join("sub")).unwrap();
        std::fs::write(contents.join("b.txt"), "b").unwrap();
        std::fs::write(contents.join("a.txt"), "a").unwrap();

        let job = BackendJob::pack(&contents, "/out/x.tar.bz2", "bz2");
        let (inv, _) = backend(Tool::Tar).invocation(&job).await.unwrap();
        let args = args_of(&inv);
        assert_eq!(&args[..2], ["-c", "-j"]);
        assert_eq!(&args[args.len() - 3..], ["a.txt", "b.txt", "sub"]);
    }

    #[tokio::test]
    async fn test_seven_zip_pack_runs_in_contents_dir() {
        let dir = TempDir::new().unwrap();
        let contents = dir.path().join("contents");
        std::fs::create_dir_all(&contents).unwrap();
        std::fs::write(contents.join("a.txt"), "a").unwrap();

        let job = BackendJob::pack(&contents, dir.path().join("x.7z"), "7z");
        let (inv, _) = backend(Tool::SevenZip).invocation(&job).await.unwrap();
        assert_eq!(inv.cwd.as_deref(), Some(contents.as_path()));
        assert!(args_of(&inv).contains(&"-t7z".to_string()));
    }

    #[tokio::test]
    async fn test_missing_binary_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let tools = ToolsConfig::default().with_bin_dir(dir.path().join("nowhere"));
        let backend = ToolBackend::new(Tool::Pandoc, &tools);
        let input = dir.path().join("a.md");
        std::fs::write(&input, "# hi").unwrap();

        let ctx = ExecContext::new(WorkerPool::new(1), dir.path().join("scratch"));
        let job = BackendJob::file(&input, dir.path().join("a.html"), "md", "html");
        let err = backend.execute(&job, &ctx).await.unwrap_err();
        assert!(err.is_unavailable());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_timeout_kills_child() {
        let invocation = Invocation::new(Path::new("sleep")).arg("5");
        let started = std::time::Instant::now();
        let result = run_process("sleep", &invocation, Duration::from_millis(100)).await;
        assert!(matches!(result, Err(BackendError::Timeout(_))));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_failure() {
        let invocation = Invocation::new(Path::new("sh"))
            .arg("-c")
            .arg("echo broken input >&2; exit 3");
        let err = run_process("sh", &invocation, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(err.describe().contains("broken input"));
    }

    #[test]
    fn test_stderr_tail_keeps_last_lines() {
        let stderr = (0..20).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n");
        let tail = stderr_tail(&stderr);
        assert!(tail.starts_with("line 12"));
        assert!(tail.ends_with("line 19"));
    }
}
