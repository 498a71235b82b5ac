//! Numbered output files for a capture session
//!
//! Files are named `<prefix><NNN>.<ext>` under the data directory. The first
//! index with no existing video or motion file is taken, and the video file is
//! created on the spot so a second session can never pick the same index.

use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{RecorderError, Result};

/// Highest index a three-digit suffix can carry
pub const MAX_FILE_INDEX: u32 = 999;

/// How session files are named
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileNaming {
    pub prefix: String,
    pub extension: String,
    /// Extension of the motion-vector file; `None` when motion output is off
    pub motion_extension: Option<String>,
}

impl Default for FileNaming {
    fn default() -> Self {
        Self {
            prefix: "vid".to_string(),
            extension: "h264".to_string(),
            motion_extension: None,
        }
    }
}

impl FileNaming {
    fn path(&self, dir: &Path, index: u32, extension: &str) -> PathBuf {
        dir.join(format!("{}{:03}.{}", self.prefix, index, extension))
    }
}

/// Files owned by one capture session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionFiles {
    index: u32,
    video: PathBuf,
    motion: Option<PathBuf>,
}

impl SessionFiles {
    /// Claim the first free index under `dir`, creating `dir` if needed
    ///
    /// # Errors
    ///
    /// `OutputFilesExhausted` when every index up to 999 is taken, `Io` when
    /// the directory or the file cannot be created.
    pub fn allocate(dir: &Path, naming: &FileNaming) -> Result<Self> {
        std::fs::create_dir_all(dir)?;

        for index in 0..=MAX_FILE_INDEX {
            let video = naming.path(dir, index, &naming.extension);
            let motion = naming
                .motion_extension
                .as_deref()
                .map(|ext| naming.path(dir, index, ext));

            if motion.as_ref().is_some_and(|m| m.exists()) {
                continue;
            }

            match OpenOptions::new().write(true).create_new(true).open(&video) {
                Ok(_) => {
                    debug!("Allocated session files #{:03} in {}", index, dir.display());
                    return Ok(Self { index, video, motion });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Err(RecorderError::OutputFilesExhausted(dir.display().to_string()))
    }

    /// Numeric index shared by the session's files
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn video(&self) -> &Path {
        &self.video
    }

    /// Motion vector file, when the session records one
    pub fn motion(&self) -> Option<&Path> {
        self.motion.as_deref()
    }
}
