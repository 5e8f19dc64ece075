use async_trait::async_trait;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Component, Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::convert::backend::{Backend, BackendJob, ExecContext, OutputKind};
use crate::convert::error::BackendError;

/// Archive operations handled in-process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveOp {
    ExtractZip,
    ExtractTar,
    ExtractTarGz,
    PackZip,
    PackTar,
    PackTarGz,
}

impl ArchiveOp {
    /// Extraction op for an archive format.
    pub fn extract(format: &str) -> Option<Self> {
        match format {
            "zip" => Some(Self::ExtractZip),
            "tar" => Some(Self::ExtractTar),
            "gz" => Some(Self::ExtractTarGz),
            _ => None,
        }
    }

    /// Packing op for an archive format.
    pub fn pack(format: &str) -> Option<Self> {
        match format {
            "zip" => Some(Self::PackZip),
            "tar" => Some(Self::PackTar),
            "gz" => Some(Self::PackTarGz),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::ExtractZip | Self::PackZip => "native-zip",
            Self::ExtractTar | Self::PackTar => "native-tar",
            Self::ExtractTarGz | Self::PackTarGz => "native-tar-gz",
        }
    }

    fn is_extract(&self) -> bool {
        matches!(
            self,
            Self::ExtractZip | Self::ExtractTar | Self::ExtractTarGz
        )
    }

    fn run(&self, input: &Path, output: &Path) -> Result<(), BackendError> {
        match self {
            Self::ExtractZip => extract_zip(input, output),
            Self::ExtractTar => extract_tar(BufReader::new(File::open(input)?), output),
            Self::ExtractTarGz => {
                extract_tar(GzDecoder::new(BufReader::new(File::open(input)?)), output)
            }
            Self::PackZip => pack_zip(input, output),
            Self::PackTar => {
                let writer = pack_tar(input, BufWriter::new(File::create(output)?))?;
                finish_writer(writer)
            }
            Self::PackTarGz => {
                let encoder = GzEncoder::new(
                    BufWriter::new(File::create(output)?),
                    Compression::default(),
                );
                let encoder = pack_tar(input, encoder)?;
                finish_writer(encoder.finish()?)
            }
        }
    }
}

fn finish_writer<W: Write>(writer: BufWriter<W>) -> Result<(), BackendError> {
    writer
        .into_inner()
        .map_err(|e| BackendError::Io(e.into_error()))?;
    Ok(())
}

/// Relative path of an archive entry. Absolute paths and `..` segments are
/// rejected so nothing lands outside the extraction directory.
fn sanitize_entry_path(entry: &Path) -> Result<PathBuf, BackendError> {
    if entry.is_absolute() {
        return Err(BackendError::failed(format!(
            "archive entry has an absolute path: {}",
            entry.display()
        )));
    }

    let mut sanitized = PathBuf::new();
    for component in entry.components() {
        match component {
            Component::Normal(segment) => sanitized.push(segment),
            Component::CurDir => {}
            _ => {
                return Err(BackendError::failed(format!(
                    "archive entry escapes the extraction directory: {}",
                    entry.display()
                )));
            }
        }
    }
    Ok(sanitized)
}

fn extract_zip(source: &Path, target: &Path) -> Result<(), BackendError> {
    let mut archive = ZipArchive::new(BufReader::new(File::open(source)?))
        .map_err(|e| BackendError::failed(format!("invalid zip archive: {}", e)))?;

    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| BackendError::failed(format!("unreadable zip entry: {}", e)))?;
        let relative = sanitize_entry_path(Path::new(entry.name()))?;
        if relative.as_os_str().is_empty() {
            continue;
        }
        let destination = target.join(&relative);

        if entry.is_dir() {
            fs::create_dir_all(&destination)?;
            continue;
        }
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut output = File::create(&destination)?;
        io::copy(&mut entry, &mut output)?;
    }

    Ok(())
}

fn extract_tar<R: Read>(reader: R, target: &Path) -> Result<(), BackendError> {
    let mut archive = tar::Archive::new(reader);
    let entries = archive
        .entries()
        .map_err(|e| BackendError::failed(format!("invalid tar archive: {}", e)))?;

    for entry in entries {
        let mut entry =
            entry.map_err(|e| BackendError::failed(format!("unreadable tar entry: {}", e)))?;
        let path = entry.path()?.into_owned();
        let relative = sanitize_entry_path(&path)?;
        if relative.as_os_str().is_empty() {
            continue;
        }
        let destination = target.join(&relative);

        let kind = entry.header().entry_type();
        if kind.is_dir() {
            fs::create_dir_all(&destination)?;
        } else if kind.is_file() {
            if let Some(parent) = destination.parent() {
                fs::create_dir_all(parent)?;
            }
            entry.unpack(&destination)?;
        } else {
            debug!(entry = %path.display(), kind = ?kind, "Skipping non-regular tar entry");
        }
    }

    Ok(())
}

/// Regular files under `root` with their `/`-separated relative names,
/// sorted for reproducible archives.
fn archive_members(root: &Path) -> Result<Vec<(PathBuf, String)>, BackendError> {
    let mut members = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            BackendError::failed(format!("cannot walk {}: {}", root.display(), e))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| BackendError::failed(e.to_string()))?;
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        members.push((entry.path().to_path_buf(), name));
    }
    Ok(members)
}

fn pack_zip(source_dir: &Path, output: &Path) -> Result<(), BackendError> {
    let mut zip = ZipWriter::new(BufWriter::new(File::create(output)?));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for (path, name) in archive_members(source_dir)? {
        zip.start_file(name.as_str(), options)
            .map_err(|e| BackendError::failed(format!("cannot add {} to zip: {}", name, e)))?;
        let mut file = File::open(&path)?;
        io::copy(&mut file, &mut zip)?;
    }

    let writer = zip
        .finish()
        .map_err(|e| BackendError::failed(format!("cannot finalize zip: {}", e)))?;
    finish_writer(writer)
}

fn pack_tar<W: Write>(source_dir: &Path, writer: W) -> Result<W, BackendError> {
    let mut builder = tar::Builder::new(writer);
    for (path, name) in archive_members(source_dir)? {
        builder.append_path_with_name(&path, &name)?;
    }
    Ok(builder.into_inner()?)
}

/// Regular-file entry names of an archive, in archive order.
pub fn list_entries(archive: &Path, format: &str) -> io::Result<Vec<String>> {
    fn tar_names<R: Read>(reader: R) -> io::Result<Vec<String>> {
        let mut archive = tar::Archive::new(reader);
        let mut names = Vec::new();
        for entry in archive.entries()? {
            let entry = entry?;
            if entry.header().entry_type().is_file() {
                names.push(entry.path()?.to_string_lossy().into_owned());
            }
        }
        Ok(names)
    }

    let file = BufReader::new(File::open(archive)?);
    match format {
        "zip" => {
            let mut zip = ZipArchive::new(file).map_err(io::Error::other)?;
            let mut names = Vec::new();
            for index in 0..zip.len() {
                let entry = zip.by_index(index).map_err(io::Error::other)?;
                if !entry.is_dir() {
                    names.push(entry.name().to_string());
                }
            }
            Ok(names)
        }
        "tar" => tar_names(file),
        "gz" => tar_names(GzDecoder::new(file)),
        other => Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("cannot list {} archives", other),
        )),
    }
}

/// In-process archive backend running on the worker pool.
pub struct NativeArchiveBackend {
    op: ArchiveOp,
}

impl NativeArchiveBackend {
    pub fn new(op: ArchiveOp) -> Self {
        Self { op }
    }
}

#[async_trait]
impl Backend for NativeArchiveBackend {
    fn name(&self) -> &str {
        self.op.name()
    }

    async fn execute(&self, job: &BackendJob, ctx: &ExecContext) -> Result<(), BackendError> {
        let extracting = job.output_kind == OutputKind::Directory;
        if extracting != self.op.is_extract() {
            return Err(BackendError::failed(format!(
                "{} cannot {} here",
                self.op.name(),
                if extracting { "extract" } else { "pack" }
            )));
        }

        let op = self.op;
        let input = job.input.clone();
        let output = job.output.clone();
        ctx.pool.run(move || op.run(&input, &output)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::WorkerPool;
    use tempfile::TempDir;

    fn populate(dir: &Path) {
        fs::create_dir_all(dir.join("docs/nested")).unwrap();
        fs::create_dir_all(dir.join("empty")).unwrap();
        fs::write(dir.join("readme.txt"), "hello").unwrap();
        fs::write(dir.join("docs/a.md"), "# a").unwrap();
        fs::write(dir.join("docs/nested/b.bin"), [1u8, 2, 3]).unwrap();
    }

    fn context(dir: &TempDir) -> ExecContext {
        ExecContext::new(WorkerPool::new(2), dir.path().join("scratch"))
    }

    #[test]
    fn test_sanitize_rejects_escapes() {
        assert!(sanitize_entry_path(Path::new("../evil")).is_err());
        assert!(sanitize_entry_path(Path::new("/etc/passwd")).is_err());
        assert_eq!(
            sanitize_entry_path(Path::new("./a/b.txt")).unwrap(),
            PathBuf::from("a/b.txt")
        );
    }

    #[test]
    fn test_members_use_forward_slashes_and_skip_dirs() {
        let dir = TempDir::new().unwrap();
        populate(dir.path());
        let names: Vec<String> = archive_members(dir.path())
            .unwrap()
            .into_iter()
            .map(|(_, name)| name)
            .collect();
        assert_eq!(names, vec!["docs/a.md", "docs/nested/b.bin", "readme.txt"]);
    }

    #[test]
    fn test_zip_pack_and_extract() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("source");
        populate(&source);
        let archive = dir.path().join("out.zip");

        ArchiveOp::PackZip.run(&source, &archive).unwrap();
        assert_eq!(
            list_entries(&archive, "zip").unwrap(),
            vec!["docs/a.md", "docs/nested/b.bin", "readme.txt"]
        );

        let extracted = dir.path().join("extracted");
        fs::create_dir_all(&extracted).unwrap();
        ArchiveOp::ExtractZip.run(&archive, &extracted).unwrap();
        assert_eq!(fs::read(extracted.join("docs/nested/b.bin")).unwrap(), [1, 2, 3]);
    }

    #[test]
    fn test_tar_gz_pack_and_extract() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("source");
        populate(&source);
        let archive = dir.path().join("out.tar.gz");

        ArchiveOp::PackTarGz.run(&source, &archive).unwrap();
        assert_eq!(
            list_entries(&archive, "gz").unwrap(),
            vec!["docs/a.md", "docs/nested/b.bin", "readme.txt"]
        );

        let extracted = dir.path().join("extracted");
        fs::create_dir_all(&extracted).unwrap();
        ArchiveOp::ExtractTarGz.run(&archive, &extracted).unwrap();
        assert_eq!(
            fs::read_to_string(extracted.join("readme.txt")).unwrap(),
            "hello"
        );
    }

    #[test]
    fn test_zip_with_escaping_entry_is_rejected() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("evil.zip");
        {
            let mut zip = ZipWriter::new(File::create(&archive).unwrap());
            zip.start_file("../outside.txt", SimpleFileOptions::default())
                .unwrap();
            zip.write_all(b"gotcha").unwrap();
            zip.finish().unwrap();
        }

        let extracted = dir.path().join("extracted");
        fs::create_dir_all(&extracted).unwrap();
        assert!(ArchiveOp::ExtractZip.run(&archive, &extracted).is_err());
        assert!(!dir.path().join("outside.txt").exists());
    }

    #[tokio::test]
    async fn test_backend_refuses_wrong_direction() {
        let dir = TempDir::new().unwrap();
        let backend = NativeArchiveBackend::new(ArchiveOp::PackZip);
        let job = BackendJob::extract("/in/a.zip", dir.path().join("contents"), "zip");
        assert!(backend.execute(&job, &context(&dir)).await.is_err());
    }

    #[tokio::test]
    async fn test_backend_packs_on_pool() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("source");
        populate(&source);
        let output = dir.path().join("out.tar");

        let backend = NativeArchiveBackend::new(ArchiveOp::PackTar);
        let job = BackendJob::pack(&source, &output, "tar");
        backend.execute(&job, &context(&dir)).await.unwrap();

        assert_eq!(list_entries(&output, "tar").unwrap().len(), 3);
    }
}
