//! # rpicam-vid Encoder
//!
//! Runs `rpicam-vid` as a child process writing raw H.264 to the session file
//! and a `--save-pts` timestamp file next to it (`<video>.pts`, "timecode
//! format v2": a header line, then one millisecond timestamp per frame).
//!
//! Frame descriptors come from tailing the timestamp file: the line ordinal
//! is the frame index, and the stream size at that moment is the position.
//! Every line is reported, so frames that pile up between two polls all
//! get a descriptor.
//! Key frames are forced every `framerate` frames with `--intra`, so the frame
//! type follows from the index.

use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use tracing::{debug, info, warn};

use super::{CaptureParams, FrameDescriptor, SessionFiles, VideoEncoder};
use crate::error::{RecorderError, Result};
use crate::telemetry::event::FrameType;

/// Default capture binary on Raspberry Pi OS
pub const DEFAULT_COMMAND: &str = "rpicam-vid";

/// Extension of the timestamp file written next to the stream
pub const PTS_EXTENSION: &str = "pts";

/// Command line for one recording
pub fn build_args(files: &SessionFiles, params: &CaptureParams, pts: &Path) -> Vec<String> {
    let mut args = vec![
        "-t".to_string(),
        "0".to_string(), // Until stopped
        "-n".to_string(), // No preview window
        "--width".to_string(),
        params.width.to_string(),
        "--height".to_string(),
        params.height.to_string(),
        "--framerate".to_string(),
        params.framerate.to_string(),
        "--codec".to_string(),
        "h264".to_string(),
        "--inline".to_string(),
        "--intra".to_string(),
        params.framerate.to_string(),
        "--flush".to_string(),
        "-o".to_string(),
        files.video().display().to_string(),
        "--save-pts".to_string(),
        pts.display().to_string(),
    ];

    if params.bitrate > 0 {
        args.push("--bitrate".to_string());
        args.push(params.bitrate.to_string());
    }

    args
}

/// One line of the timestamp file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PtsEntry {
    pub index: u64,
    /// Microseconds; `None` for a negative or unreadable timestamp
    pub timestamp_us: Option<u64>,
}

/// Incremental reader over a growing timestamp file
#[derive(Debug)]
pub struct PtsTail {
    path: PathBuf,
    reader: Option<BufReader<File>>,
    partial: String,
    frames: u64,
    intra: u64,
    /// Parsed but not yet handed out
    ready: Vec<PtsEntry>,
}

impl PtsTail {
    /// # Arguments
    ///
    /// * `path` - Timestamp file written by `--save-pts`
    /// * `intra` - Key frame period in frames
    pub fn new(path: impl Into<PathBuf>, intra: u32) -> Self {
        Self {
            path: path.into(),
            reader: None,
            partial: String::new(),
            frames: 0,
            intra: u64::from(intra.max(1)),
            ready: Vec::new(),
        }
    }

    /// Every frame written since the last call, oldest first
    ///
    /// # Errors
    ///
    /// `Video` if the file cannot be read. Lines parsed before the failure
    /// are kept and returned by the next call.
    pub fn poll(&mut self) -> Result<Vec<PtsEntry>> {
        if self.reader.is_none() {
            match File::open(&self.path) {
                Ok(file) => self.reader = Some(BufReader::new(file)),
                // Not written yet
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
                Err(e) => {
                    return Err(RecorderError::Video(format!("Failed to open {}: {}", self.path.display(), e)))
                }
            }
        }
        let Some(reader) = self.reader.as_mut() else {
            return Ok(Vec::new());
        };

        loop {
            let read = reader
                .read_line(&mut self.partial)
                .map_err(|e| RecorderError::Video(format!("Failed to read {}: {}", self.path.display(), e)))?;
            if read == 0 || !self.partial.ends_with('\n') {
                // EOF, possibly mid-line; the rest arrives later
                break;
            }

            let line = std::mem::take(&mut self.partial);
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            // Still a frame, even when its timestamp is unreadable
            let timestamp_us = match line.parse::<f64>() {
                Ok(millis) if millis >= 0.0 => Some((millis * 1000.0).round() as u64),
                Ok(_) => None,
                Err(_) => {
                    warn!("Bad timestamp line in {}: {:?}", self.path.display(), line);
                    None
                }
            };

            self.ready.push(PtsEntry { index: self.frames, timestamp_us });
            self.frames += 1;
        }

        Ok(std::mem::take(&mut self.ready))
    }

    pub fn frame_type(&self, index: u64) -> FrameType {
        if index % self.intra == 0 {
            FrameType::KeyFrame
        } else {
            FrameType::Frame
        }
    }
}

/// `rpicam-vid` child process
pub struct RpicamEncoder {
    command: String,
    child: Option<Child>,
    video: Option<PathBuf>,
    pts: Option<PtsTail>,
}

impl std::fmt::Debug for RpicamEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpicamEncoder")
            .field("command", &self.command)
            .field("running", &self.child.is_some())
            .field("video", &self.video)
            .finish_non_exhaustive()
    }
}

impl Default for RpicamEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_COMMAND)
    }
}

impl RpicamEncoder {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            child: None,
            video: None,
            pts: None,
        }
    }

    fn stream_size(&self) -> u64 {
        self.video
            .as_ref()
            .and_then(|path| std::fs::metadata(path).ok())
            .map(|meta| meta.len())
            .unwrap_or(0)
    }
}

impl VideoEncoder for RpicamEncoder {
    fn start_recording(&mut self, files: &SessionFiles, params: &CaptureParams) -> Result<()> {
        if self.child.is_some() {
            return Err(RecorderError::Video("Recording already in progress".to_string()));
        }
        if params.motion_vectors {
            return Err(RecorderError::Video(format!("{} cannot write motion vectors", self.command)));
        }

        let pts = files.video().with_extension(PTS_EXTENSION);
        let args = build_args(files, params, &pts);
        debug!("{} args: {:?}", self.command, args);

        let child = Command::new(&self.command)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| RecorderError::Video(format!("Failed to spawn {}: {}", self.command, e)))?;

        info!("Started {} (pid {})", self.command, child.id());
        self.child = Some(child);
        self.video = Some(files.video().to_path_buf());
        self.pts = Some(PtsTail::new(pts, params.framerate));
        Ok(())
    }

    fn new_frames(&mut self) -> Result<Vec<FrameDescriptor>> {
        let Some(child) = self.child.as_mut() else {
            return Err(RecorderError::Video("Not recording".to_string()));
        };
        // Only the process exiting ends the session; anything else is retried
        match child.try_wait() {
            Ok(Some(status)) => {
                self.child = None;
                return Err(RecorderError::EncoderStopped(status.to_string()));
            }
            Ok(None) => {}
            Err(e) => return Err(RecorderError::Video(format!("Failed to query {}: {}", self.command, e))),
        }

        let Some(tail) = self.pts.as_mut() else {
            return Ok(Vec::new());
        };
        let entries: Vec<(PtsEntry, FrameType)> = tail
            .poll()?
            .into_iter()
            .map(|entry| (entry, tail.frame_type(entry.index)))
            .collect();
        if entries.is_empty() {
            return Ok(Vec::new());
        }

        // Frames that arrived together share the stream size seen now
        let position = self.stream_size();
        Ok(entries
            .into_iter()
            .map(|(entry, frame_type)| FrameDescriptor {
                index: entry.index,
                frame_type,
                timestamp_us: entry.timestamp_us,
                complete: true,
                position,
            })
            .collect())
    }

    fn stop_recording(&mut self) -> Result<()> {
        self.pts = None;
        if let Some(mut child) = self.child.take() {
            info!("Stopping {}", self.command);
            if let Err(e) = child.kill() {
                // Already exited on its own
                warn!("Failed to signal {}: {}", self.command, e);
            }
            child.wait()?;
        }
        Ok(())
    }
}

impl Drop for RpicamEncoder {
    fn drop(&mut self) {
        let _ = self.stop_recording();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::FileNaming;
    use std::io::Write;
    use tempfile::TempDir;

    fn session(dir: &TempDir) -> SessionFiles {
        SessionFiles::allocate(dir.path(), &FileNaming::default()).unwrap()
    }

    #[test]
    fn test_args_carry_capture_params() {
        let dir = TempDir::new().unwrap();
        let files = session(&dir);
        let pts = files.video().with_extension(PTS_EXTENSION);
        let args = build_args(&files, &CaptureParams::default(), &pts);

        let joined = args.join(" ");
        assert!(joined.contains("--width 1920 --height 1080 --framerate 30"));
        assert!(joined.contains("--intra 30"));
        assert!(joined.contains("--bitrate 25000000"));
        assert!(joined.ends_with("--bitrate 25000000"));
        assert!(args.contains(&files.video().display().to_string()));
        assert!(args.contains(&pts.display().to_string()));
    }

    #[test]
    fn test_zero_bitrate_leaves_encoder_default() {
        let dir = TempDir::new().unwrap();
        let files = session(&dir);
        let params = CaptureParams { bitrate: 0, ..CaptureParams::default() };
        let args = build_args(&files, &params, Path::new("x.pts"));
        assert!(!args.iter().any(|a| a == "--bitrate"));
    }

    #[test]
    fn test_pts_tail_follows_growing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vid000.pts");
        let mut tail = PtsTail::new(&path, 30);

        // Not created yet
        assert!(tail.poll().unwrap().is_empty());

        let mut file = File::create(&path).unwrap();
        writeln!(file, "# timecode format v2").unwrap();
        writeln!(file, "0.000").unwrap();
        file.flush().unwrap();
        assert_eq!(tail.poll().unwrap(), vec![PtsEntry { index: 0, timestamp_us: Some(0) }]);

        // A half-written line is held back until it is complete
        write!(file, "33.3").unwrap();
        file.flush().unwrap();
        assert!(tail.poll().unwrap().is_empty());

        writeln!(file, "33").unwrap();
        file.flush().unwrap();
        assert_eq!(tail.poll().unwrap(), vec![PtsEntry { index: 1, timestamp_us: Some(33_333) }]);
    }

    #[test]
    fn test_pts_tail_reports_every_frame_since_last_poll() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vid000.pts");
        std::fs::write(&path, "# timecode format v2\n0.000\n33.333\n66.667\n").unwrap();

        let mut tail = PtsTail::new(&path, 30);
        let entries = tail.poll().unwrap();
        assert_eq!(
            entries,
            vec![
                PtsEntry { index: 0, timestamp_us: Some(0) },
                PtsEntry { index: 1, timestamp_us: Some(33_333) },
                PtsEntry { index: 2, timestamp_us: Some(66_667) },
            ]
        );
        assert!(tail.poll().unwrap().is_empty());
    }

    #[test]
    fn test_pts_tail_keeps_frame_with_garbage_timestamp() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vid000.pts");
        std::fs::write(&path, "# timecode format v2\nnot-a-number\n33.333\n").unwrap();

        let mut tail = PtsTail::new(&path, 30);
        assert_eq!(
            tail.poll().unwrap(),
            vec![
                PtsEntry { index: 0, timestamp_us: None },
                PtsEntry { index: 1, timestamp_us: Some(33_333) },
            ]
        );
    }

    #[test]
    fn test_unreadable_pts_file_is_a_transient_fault() {
        let dir = TempDir::new().unwrap();
        // A directory opens but cannot be read as lines
        let path = dir.path().join("vid000.pts");
        std::fs::create_dir(&path).unwrap();

        let mut tail = PtsTail::new(&path, 30);
        let err = tail.poll().unwrap_err();
        assert!(matches!(err, RecorderError::Video(_)));
        assert!(err.is_transient());
    }

    #[test]
    fn test_key_frames_follow_intra_period() {
        let tail = PtsTail::new("unused.pts", 30);
        assert_eq!(tail.frame_type(0), FrameType::KeyFrame);
        assert_eq!(tail.frame_type(1), FrameType::Frame);
        assert_eq!(tail.frame_type(30), FrameType::KeyFrame);
    }

    #[test]
    fn test_missing_binary_fails_start() {
        let dir = TempDir::new().unwrap();
        let files = session(&dir);
        let mut encoder = RpicamEncoder::new("/nonexistent/rpicam-vid");

        let result = encoder.start_recording(&files, &CaptureParams::default());
        assert!(matches!(result, Err(RecorderError::Video(_))));
        assert!(matches!(encoder.new_frames(), Err(RecorderError::Video(_))));
    }

    #[test]
    fn test_motion_vectors_are_rejected() {
        let dir = TempDir::new().unwrap();
        let files = session(&dir);
        let mut encoder = RpicamEncoder::default();
        let params = CaptureParams { motion_vectors: true, ..CaptureParams::default() };
        assert!(encoder.start_recording(&files, &params).is_err());
    }

    #[test]
    fn test_exited_process_reports_encoder_stopped() {
        let dir = TempDir::new().unwrap();
        let files = session(&dir);
        // `true` ignores its arguments and exits at once
        let mut encoder = RpicamEncoder::new("true");
        encoder.start_recording(&files, &CaptureParams::default()).unwrap();

        let mut result = encoder.new_frames();
        for _ in 0..50 {
            if result.is_err() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
            result = encoder.new_frames();
        }
        assert!(matches!(result, Err(RecorderError::EncoderStopped(_))));
        assert!(encoder.stop_recording().is_ok());
    }
}
