//! Frame archive extraction.
//!
//! Turns an uploaded ZIP of screenshots into `frame_000.jpg`,
//! `frame_001.jpg`, ... in a destination directory, preserving archive
//! order. Two backends implement [`FrameExtractor`]: the in-process
//! [`ZipFrameExtractor`] and the subprocess [`UnzipCommandExtractor`].
//! [`ArchiveExtractor`] runs the first and falls back to the second when it
//! errors or finds no frames.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;

/// File extensions (case-insensitive) treated as frames.
pub const FRAME_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// printf-style pattern matching [`frame_file_name`], as consumed by ffmpeg.
pub const FRAME_PATTERN: &str = "frame_%03d.jpg";

/// Default timeout for the `unzip` fallback.
pub const DEFAULT_UNZIP_TIMEOUT: Duration = Duration::from_secs(120);

/// `unzip` exit status meaning "no files matched the patterns".
const UNZIP_NO_MATCH: i32 = 11;

/// Error type for archive extraction.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("failed to read archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("extraction utility failed (exit code {exit_code:?}): {stderr}")]
    CommandFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("extraction utility timed out after {0:?}")]
    Timeout(Duration),

    #[error("extraction task failed: {0}")]
    Task(String),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> ExtractError + '_ {
    move |source| ExtractError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Whether an archive entry name looks like a frame image.
pub fn is_frame_name(name: &str) -> bool {
    let Some((_, ext)) = name.rsplit_once('.') else {
        return false;
    };
    FRAME_EXTENSIONS
        .iter()
        .any(|allowed| ext.eq_ignore_ascii_case(allowed))
}

/// Zero-padded sequential frame name: `frame_007.jpg`.
pub fn frame_file_name(index: usize) -> String {
    format!("frame_{index:03}.jpg")
}

/// A backend capable of unpacking frames from an archive.
#[async_trait]
pub trait FrameExtractor: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Write frames from `archive` into `dest` under sequential names and
    /// return how many were written. Zero is a valid result.
    async fn extract(&self, archive: &Path, dest: &Path) -> Result<usize, ExtractError>;
}

// ---------------------------------------------------------------------------
// In-process ZIP backend
// ---------------------------------------------------------------------------

/// Reads the archive's central directory with the `zip` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZipFrameExtractor;

#[async_trait]
impl FrameExtractor for ZipFrameExtractor {
    fn name(&self) -> &'static str {
        "zip"
    }

    async fn extract(&self, archive: &Path, dest: &Path) -> Result<usize, ExtractError> {
        let archive = archive.to_path_buf();
        let dest = dest.to_path_buf();
        tokio::task::spawn_blocking(move || extract_zip(&archive, &dest))
            .await
            .map_err(|e| ExtractError::Task(e.to_string()))?
    }
}

fn extract_zip(archive: &Path, dest: &Path) -> Result<usize, ExtractError> {
    let file = std::fs::File::open(archive).map_err(io_err(archive))?;
    let mut zip = zip::ZipArchive::new(std::io::BufReader::new(file))?;

    let mut count = 0;
    for index in 0..zip.len() {
        let mut entry = zip.by_index(index)?;
        if entry.is_dir() || !is_frame_name(entry.name()) {
            continue;
        }
        if entry.enclosed_name().is_none() {
            tracing::warn!(entry = entry.name(), "Skipping archive entry with unsafe path");
            continue;
        }

        let out_path = dest.join(frame_file_name(count));
        let mut out = std::fs::File::create(&out_path).map_err(io_err(&out_path))?;
        std::io::copy(&mut entry, &mut out).map_err(io_err(&out_path))?;
        count += 1;
    }
    Ok(count)
}

// ---------------------------------------------------------------------------
// Subprocess backend
// ---------------------------------------------------------------------------

/// Shells out to `unzip`, then renames the results into sequence order.
#[derive(Debug, Clone)]
pub struct UnzipCommandExtractor {
    binary: PathBuf,
    timeout: Duration,
}

impl UnzipCommandExtractor {
    pub fn new(binary: PathBuf, timeout: Duration) -> Self {
        Self { binary, timeout }
    }

    /// Find `unzip` on `PATH`.
    pub fn locate(timeout: Duration) -> Option<Self> {
        which::which("unzip")
            .ok()
            .map(|binary| Self::new(binary, timeout))
    }
}

#[async_trait]
impl FrameExtractor for UnzipCommandExtractor {
    fn name(&self) -> &'static str {
        "unzip"
    }

    async fn extract(&self, archive: &Path, dest: &Path) -> Result<usize, ExtractError> {
        let raw_dir = dest.join(".unzipped");
        tokio::fs::create_dir_all(&raw_dir)
            .await
            .map_err(io_err(&raw_dir))?;

        let mut cmd = tokio::process::Command::new(&self.binary);
        // -j junks stored paths, -C matches patterns case-insensitively.
        cmd.args(["-o", "-j", "-C", "-qq"])
            .arg(archive)
            .args(FRAME_EXTENSIONS.iter().map(|ext| format!("*.{ext}")))
            .arg("-d")
            .arg(&raw_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| ExtractError::Timeout(self.timeout))?
            .map_err(io_err(&self.binary))?;

        let code = output.status.code();
        if !output.status.success() && code != Some(1) && code != Some(UNZIP_NO_MATCH) {
            return Err(ExtractError::CommandFailed {
                exit_code: code,
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }

        let count = sequence_frames(&raw_dir, dest).await?;
        let _ = tokio::fs::remove_dir_all(&raw_dir).await;
        Ok(count)
    }
}

/// Sort extracted files by name and rename them into the sequential scheme.
async fn sequence_frames(raw_dir: &Path, dest: &Path) -> Result<usize, ExtractError> {
    let mut names = Vec::new();
    let mut entries = tokio::fs::read_dir(raw_dir).await.map_err(io_err(raw_dir))?;
    while let Some(entry) = entries.next_entry().await.map_err(io_err(raw_dir))? {
        let name = entry.file_name().to_string_lossy().to_string();
        let is_file = entry
            .file_type()
            .await
            .map(|t| t.is_file())
            .unwrap_or(false);
        if is_file && is_frame_name(&name) {
            names.push(name);
        }
    }
    names.sort();

    for (index, name) in names.iter().enumerate() {
        let from = raw_dir.join(name);
        let to = dest.join(frame_file_name(index));
        tokio::fs::rename(&from, &to).await.map_err(io_err(&from))?;
    }
    Ok(names.len())
}

// ---------------------------------------------------------------------------
// Composite
// ---------------------------------------------------------------------------

/// Primary backend with an optional fallback for errors and empty results.
pub struct ArchiveExtractor {
    primary: Box<dyn FrameExtractor>,
    fallback: Option<Box<dyn FrameExtractor>>,
}

impl ArchiveExtractor {
    pub fn new(
        primary: Box<dyn FrameExtractor>,
        fallback: Option<Box<dyn FrameExtractor>>,
    ) -> Self {
        Self { primary, fallback }
    }

    /// In-process ZIP reader, with `unzip` as fallback when it is installed.
    pub fn detect() -> Self {
        let fallback = UnzipCommandExtractor::locate(DEFAULT_UNZIP_TIMEOUT);
        if fallback.is_none() {
            tracing::info!("unzip not found; archive extraction has no fallback");
        }
        Self::new(
            Box::new(ZipFrameExtractor),
            fallback.map(|f| Box::new(f) as Box<dyn FrameExtractor>),
        )
    }
}

#[async_trait]
impl FrameExtractor for ArchiveExtractor {
    fn name(&self) -> &'static str {
        self.primary.name()
    }

    async fn extract(&self, archive: &Path, dest: &Path) -> Result<usize, ExtractError> {
        let primary = self.primary.extract(archive, dest).await;
        match &primary {
            Ok(count) if *count > 0 => return Ok(*count),
            Ok(_) => tracing::info!(backend = self.primary.name(), "Archive yielded no frames"),
            Err(e) => tracing::warn!(
                backend = self.primary.name(),
                error = %e,
                "Primary archive extraction failed"
            ),
        }

        let Some(fallback) = &self.fallback else {
            return primary;
        };

        // Discard anything a failed primary run left behind.
        let _ = tokio::fs::remove_dir_all(dest).await;
        tokio::fs::create_dir_all(dest).await.map_err(io_err(dest))?;

        match fallback.extract(archive, dest).await {
            Ok(count) => {
                tracing::info!(backend = fallback.name(), count, "Fallback extraction finished");
                Ok(count)
            }
            Err(e) => {
                tracing::warn!(backend = fallback.name(), error = %e, "Fallback extraction failed");
                primary
            }
        }
    }
}
