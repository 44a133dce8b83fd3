//! Video frames from an ffmpeg subprocess.
//!
//! A worker thread pipes raw RGBA frames out of ffmpeg (throttled to real time
//! with `-re`) and keeps only the latest one. The render thread polls it
//! without blocking; each decoded frame carries a serial so consumers upload a
//! frame only once.

use std::ffi::OsString;
use std::fmt;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::{Deserialize, Serialize};

const RESPAWN_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    /// RGBA, row-major, top row first, tightly packed.
    pub bytes: Vec<u8>,
    /// Increments with every decoded frame.
    pub serial: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// Input file path or URL.
    pub file: String,
    /// Frames are scaled to this size by ffmpeg.
    pub width: u32,
    pub height: u32,
    #[serde(rename = "loop")]
    pub looped: bool,
    /// ffmpeg binary; falls back to `DOODLE_FFMPEG`, then `ffmpeg` on `PATH`.
    pub ffmpeg_path: Option<String>,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            file: String::new(),
            width: 640,
            height: 360,
            looped: true,
            ffmpeg_path: None,
        }
    }
}

impl VideoConfig {
    pub fn new(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            ..Self::default()
        }
    }

    fn validate(&self) -> Result<(), VideoError> {
        if self.file.trim().is_empty() {
            return Err(VideoError::InvalidConfig("no input file".into()));
        }
        if self.width == 0 || self.height == 0 {
            return Err(VideoError::InvalidConfig(format!(
                "frame size {}x{} is empty",
                self.width, self.height
            )));
        }
        Ok(())
    }

    fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }

    /// Arguments for a real-time decode of `file` into raw RGBA on stdout.
    pub fn ffmpeg_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = ["-hide_banner", "-loglevel", "error", "-re"]
            .iter()
            .map(OsString::from)
            .collect();
        if self.looped {
            args.extend(["-stream_loop", "-1"].iter().map(OsString::from));
        }
        args.push("-i".into());
        args.push(self.file.clone().into());
        args.push("-vf".into());
        args.push(format!("scale={}:{}", self.width, self.height).into());
        args.extend(["-pix_fmt", "rgba", "-f", "rawvideo", "pipe:1"].iter().map(OsString::from));
        args
    }

    pub fn ffmpeg_binary(&self) -> PathBuf {
        if let Some(p) = &self.ffmpeg_path {
            return PathBuf::from(p);
        }
        std::env::var_os("DOODLE_FFMPEG")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("ffmpeg"))
    }
}

#[derive(thiserror::Error, Debug)]
pub enum VideoError {
    #[error("video worker could not start: {0}")]
    Worker(#[from] io::Error),

    #[error("invalid video config: {0}")]
    InvalidConfig(String),
}

/// Latest-frame mailbox shared with the worker.
#[derive(Debug, Default)]
struct FrameSlot {
    inner: Mutex<SlotState>,
}

#[derive(Debug, Default)]
struct SlotState {
    latest: Option<VideoFrame>,
    serial: u64,
}

impl FrameSlot {
    fn state(&self) -> MutexGuard<'_, SlotState> {
        // A panicking writer can only leave a stale frame behind.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, width: u32, height: u32, bytes: &[u8]) {
        let mut state = self.state();
        state.serial += 1;
        let serial = state.serial;
        match &mut state.latest {
            Some(frame) if frame.bytes.len() == bytes.len() => {
                frame.bytes.copy_from_slice(bytes);
                frame.width = width;
                frame.height = height;
                frame.serial = serial;
            }
            slot => {
                *slot = Some(VideoFrame {
                    width,
                    height,
                    bytes: bytes.to_vec(),
                    serial,
                })
            }
        }
    }
}

pub struct VideoDecoder {
    cfg: VideoConfig,
    slot: Arc<FrameSlot>,
    stop: Arc<AtomicBool>,
    ended: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl fmt::Debug for VideoDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VideoDecoder")
            .field("file", &self.cfg.file)
            .field("size", &(self.cfg.width, self.cfg.height))
            .field("ended", &self.has_ended())
            .finish()
    }
}

impl VideoDecoder {
    pub fn from_config(cfg: VideoConfig) -> Result<Self, VideoError> {
        cfg.validate()?;

        let slot = Arc::new(FrameSlot::default());
        let stop = Arc::new(AtomicBool::new(false));
        let ended = Arc::new(AtomicBool::new(false));

        let mut worker = Worker {
            cfg: cfg.clone(),
            slot: Arc::clone(&slot),
            stop: Arc::clone(&stop),
        };
        let ended_flag = Arc::clone(&ended);
        let handle = thread::Builder::new()
            .name("doodle-video".into())
            .spawn(move || {
                worker.run();
                ended_flag.store(true, Ordering::SeqCst);
            })?;

        Ok(Self {
            cfg,
            slot,
            stop,
            ended,
            worker: Some(handle),
        })
    }

    pub fn config(&self) -> &VideoConfig {
        &self.cfg
    }

    /// True once the worker stopped (non-looping input finished or ffmpeg failed).
    pub fn has_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    /// The latest frame if it is newer than `seen`.
    pub fn frame_after(&self, seen: Option<u64>) -> Option<VideoFrame> {
        let state = self.slot.state();
        let frame = state.latest.as_ref()?;
        match seen {
            Some(s) if frame.serial <= s => None,
            _ => Some(frame.clone()),
        }
    }
}

impl Drop for VideoDecoder {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

enum StreamEnd {
    Stopped,
    Finished,
    SpawnFailed(io::Error),
}

struct Worker {
    cfg: VideoConfig,
    slot: Arc<FrameSlot>,
    stop: Arc<AtomicBool>,
}

impl Worker {
    fn stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    fn run(&mut self) {
        let mut spawn_failures = 0u32;
        while !self.stopped() {
            match self.stream_once() {
                StreamEnd::Stopped => return,
                StreamEnd::Finished if !self.cfg.looped => {
                    tracing::debug!(file = %self.cfg.file, "video stream ended");
                    return;
                }
                StreamEnd::Finished => {
                    spawn_failures = 0;
                    tracing::debug!(file = %self.cfg.file, "video stream ended; restarting");
                }
                StreamEnd::SpawnFailed(e) => {
                    if spawn_failures == 0 {
                        tracing::error!(
                            ffmpeg = %self.cfg.ffmpeg_binary().display(),
                            error = %e,
                            "failed to spawn ffmpeg"
                        );
                    }
                    spawn_failures += 1;
                    if !self.cfg.looped {
                        return;
                    }
                    thread::sleep(RESPAWN_DELAY);
                }
            }
        }
    }

    /// One ffmpeg process, from spawn to end of stream (or stop).
    fn stream_once(&mut self) -> StreamEnd {
        let mut child = match self.spawn() {
            Ok(c) => c,
            Err(e) => return StreamEnd::SpawnFailed(e),
        };
        let Some(stdout) = child.stdout.take() else {
            reap(&mut child);
            return StreamEnd::SpawnFailed(io::Error::new(io::ErrorKind::Other, "stdout not piped"));
        };
        tracing::debug!(
            file = %self.cfg.file,
            width = self.cfg.width,
            height = self.cfg.height,
            "video stream opened"
        );
        let end = self.pump(stdout);
        reap(&mut child);
        end
    }

    fn spawn(&self) -> io::Result<Child> {
        Command::new(self.cfg.ffmpeg_binary())
            .args(self.cfg.ffmpeg_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
    }

    fn pump(&self, mut stdout: ChildStdout) -> StreamEnd {
        let mut buf = vec![0u8; self.cfg.frame_len()];
        loop {
            if self.stopped() {
                return StreamEnd::Stopped;
            }
            if let Err(e) = stdout.read_exact(&mut buf) {
                tracing::trace!(reason = %e, "ffmpeg pipe closed");
                return StreamEnd::Finished;
            }
            self.slot.publish(self.cfg.width, self.cfg.height, &buf);
        }
    }
}

fn reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_from_json() {
        let cfg: VideoConfig = serde_json::from_str(r#"{ "file": "clip.mp4" }"#).unwrap();
        assert_eq!((cfg.width, cfg.height), (640, 360));
        assert!(cfg.looped);
        assert!(cfg.ffmpeg_path.is_none());
    }

    #[test]
    fn rejects_empty_file() {
        let err = VideoDecoder::from_config(VideoConfig::new("  ")).unwrap_err();
        assert!(matches!(err, VideoError::InvalidConfig(_)));
    }

    #[test]
    fn args_scale_and_loop() {
        let mut cfg = VideoConfig::new("clip.webm");
        cfg.width = 320;
        cfg.height = 240;
        let args: Vec<String> = cfg
            .ffmpeg_args()
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert!(args.windows(2).any(|w| w == ["-stream_loop", "-1"]));
        assert!(args.windows(2).any(|w| w == ["-i", "clip.webm"]));
        assert!(args.contains(&"scale=320:240".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("pipe:1"));

        cfg.looped = false;
        assert!(!cfg.ffmpeg_args().iter().any(|a| a == "-stream_loop"));
    }

    #[test]
    fn slot_serials_increase() {
        let slot = FrameSlot::default();
        slot.publish(1, 1, &[1, 2, 3, 4]);
        slot.publish(1, 1, &[5, 6, 7, 8]);
        let state = slot.state();
        let frame = state.latest.as_ref().unwrap();
        assert_eq!(frame.serial, 2);
        assert_eq!(frame.bytes, vec![5, 6, 7, 8]);
    }

    #[test]
    fn missing_ffmpeg_ends_one_shot_worker() {
        let mut cfg = VideoConfig::new("clip.mp4");
        cfg.looped = false;
        cfg.ffmpeg_path = Some("/nonexistent/ffmpeg".into());
        let dec = VideoDecoder::from_config(cfg).unwrap();
        for _ in 0..200 {
            if dec.has_ended() {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert!(dec.has_ended());
        assert!(dec.frame_after(None).is_none());
    }
}
