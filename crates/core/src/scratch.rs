//! Per-upload scratch directory.
//!
//! Each upload gets an exclusive directory holding the received archive, the
//! extracted frames, and the encoder's working output. [`ScratchDir::remove`]
//! consumes the handle, so removal happens at most once; if a handle is
//! dropped without being removed (early return, panic unwinding) the
//! directory is deleted synchronously in `Drop`.

use std::io;
use std::path::{Path, PathBuf};

/// Exclusive scratch space for one pipeline run.
#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
    removed: bool,
}

impl ScratchDir {
    /// Create `root/upload_{user_key}_{timestamp}_{nonce}` and its `frames/`
    /// subdirectory.
    pub async fn create(root: &Path, user_key: &str, timestamp: i64) -> io::Result<Self> {
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        let path = root.join(format!("upload_{user_key}_{timestamp}_{}", &nonce[..8]));
        tokio::fs::create_dir_all(path.join("frames")).await?;
        Ok(Self {
            path,
            removed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Where the uploaded archive bytes are written.
    pub fn archive_path(&self) -> PathBuf {
        self.path.join("upload.zip")
    }

    /// Destination of the sequentially named frames.
    pub fn frames_dir(&self) -> PathBuf {
        self.path.join("frames")
    }

    /// Encoder output before it is moved into storage.
    pub fn encode_output_path(&self) -> PathBuf {
        self.path.join("output.mp4")
    }

    /// Delete the directory and everything in it.
    pub async fn remove(mut self) -> io::Result<()> {
        self.removed = true;
        match tokio::fs::remove_dir_all(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if !self.removed {
            let _ = std::fs::remove_dir_all(&self.path);
        }
    }
}
