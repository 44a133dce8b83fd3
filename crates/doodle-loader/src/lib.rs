//! One-shot background work for doodle scenes.
//!
//! Everything the render thread waits on (shader text, audio bytes, images,
//! permission prompts) is started as a [`Pending`] job and polled once per
//! frame. A job carries the [`Liveness`] token of the object that asked for it;
//! once that object is disposed the result is dropped instead of delivered.

use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, Receiver, TryRecvError};
use image::RgbaImage;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("request {url}: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("decode image: {0}")]
    Image(#[from] image::ImageError),

    #[error("{0}")]
    Decode(String),

    #[error("worker exited without a result")]
    Disconnected,
}

/// Shared "still alive" flag. Cleared exactly once, on dispose.
#[derive(Clone)]
pub struct Liveness(Arc<AtomicBool>);

impl Liveness {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_alive(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn kill(&self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Liveness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Liveness").field(&self.is_alive()).finish()
    }
}

enum State<T> {
    Waiting(Receiver<Result<T, LoadError>>),
    Ready(Result<T, LoadError>),
    Taken,
}

/// Result of a one-shot job, consumed on the render thread.
pub struct Pending<T> {
    label: String,
    liveness: Liveness,
    state: State<T>,
}

impl<T> fmt::Debug for Pending<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state {
            State::Waiting(_) => "waiting",
            State::Ready(_) => "ready",
            State::Taken => "taken",
        };
        f.debug_struct("Pending")
            .field("label", &self.label)
            .field("alive", &self.liveness.is_alive())
            .field("state", &state)
            .finish()
    }
}

impl<T: Send + 'static> Pending<T> {
    /// Run `job` on a worker thread. The job is skipped if `liveness` is already
    /// cleared when the thread starts, and its result is discarded if it is
    /// cleared by the time the job finishes.
    pub fn spawn<F>(liveness: Liveness, label: impl Into<String>, job: F) -> Self
    where
        F: FnOnce() -> Result<T, LoadError> + Send + 'static,
    {
        let label = label.into();
        let (tx, rx) = bounded(1);
        let guard = liveness.clone();
        let thread_label = label.clone();

        let spawned = thread::Builder::new()
            .name(format!("doodle-load:{thread_label}"))
            .spawn(move || {
                if !guard.is_alive() {
                    tracing::debug!(job = %thread_label, "owner disposed before start; skipping");
                    return;
                }
                let result = job();
                if guard.is_alive() {
                    let _ = tx.send(result);
                } else {
                    tracing::debug!(job = %thread_label, "owner disposed; dropping result");
                }
            });

        let state = match spawned {
            Ok(_) => State::Waiting(rx),
            Err(e) => State::Ready(Err(LoadError::Io {
                path: PathBuf::from(&label),
                source: e,
            })),
        };

        Self {
            label,
            liveness,
            state,
        }
    }
}

impl<T> Pending<T> {
    /// An already-resolved job (synchronous sources, tests).
    pub fn ready(liveness: Liveness, label: impl Into<String>, result: Result<T, LoadError>) -> Self {
        Self {
            label: label.into(),
            liveness,
            state: State::Ready(result),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_done(&self) -> bool {
        matches!(self.state, State::Taken)
    }

    /// Non-blocking. Yields the result once; `None` while running, after it was
    /// taken, or when the owner has been disposed.
    pub fn try_take(&mut self) -> Option<Result<T, LoadError>> {
        if !self.liveness.is_alive() {
            self.state = State::Taken;
            return None;
        }
        let state = std::mem::replace(&mut self.state, State::Taken);
        match state {
            State::Ready(r) => Some(r),
            State::Waiting(rx) => match rx.try_recv() {
                Ok(r) => Some(r),
                Err(TryRecvError::Empty) => {
                    self.state = State::Waiting(rx);
                    None
                }
                Err(TryRecvError::Disconnected) => Some(Err(LoadError::Disconnected)),
            },
            State::Taken => None,
        }
    }
}

pub fn is_remote(src: &str) -> bool {
    src.starts_with("http://") || src.starts_with("https://")
}

/// Single-attempt GET for remote sources, plain read for local paths.
pub fn fetch_bytes(src: &str) -> Result<Vec<u8>, LoadError> {
    if is_remote(src) {
        let response = reqwest::blocking::get(src)
            .and_then(|r| r.error_for_status())
            .map_err(|e| LoadError::Http {
                url: src.to_string(),
                source: e,
            })?;
        let bytes = response.bytes().map_err(|e| LoadError::Http {
            url: src.to_string(),
            source: e,
        })?;
        return Ok(bytes.to_vec());
    }

    let path = PathBuf::from(src.strip_prefix("file://").unwrap_or(src));
    fs::read(&path).map_err(|e| LoadError::Io { path, source: e })
}

pub fn fetch_text(src: &str) -> Result<String, LoadError> {
    let bytes = fetch_bytes(src)?;
    String::from_utf8(bytes).map_err(|e| LoadError::Decode(format!("{src}: not utf-8: {e}")))
}

pub fn decode_image(bytes: &[u8]) -> Result<RgbaImage, LoadError> {
    Ok(image::load_from_memory(bytes)?.to_rgba8())
}

pub fn load_image(src: &str) -> Result<RgbaImage, LoadError> {
    decode_image(&fetch_bytes(src)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn wait_for<T>(p: &mut Pending<T>) -> Option<Result<T, LoadError>> {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if let Some(r) = p.try_take() {
                return Some(r);
            }
            thread::sleep(Duration::from_millis(5));
        }
        None
    }

    #[test]
    fn spawned_result_is_delivered_once() {
        let mut p = Pending::spawn(Liveness::new(), "answer", || Ok(42));
        let r = wait_for(&mut p).expect("job finishes");
        assert_eq!(r.unwrap(), 42);
        assert!(p.try_take().is_none());
        assert!(p.is_done());
    }

    #[test]
    fn disposed_owner_never_sees_result() {
        let live = Liveness::new();
        let (go_tx, go_rx) = bounded::<()>(1);
        let mut p = Pending::spawn(live.clone(), "late", move || {
            let _ = go_rx.recv();
            Ok("late")
        });
        live.kill();
        let _ = go_tx.send(());
        thread::sleep(Duration::from_millis(20));
        assert!(p.try_take().is_none());
    }

    #[test]
    fn local_fetch_round_trip() {
        let mut path = std::env::temp_dir();
        path.push(format!("doodle_loader_{}.frag", std::process::id()));
        fs::write(&path, "void main(){}").unwrap();

        let text = fetch_text(path.to_str().unwrap()).unwrap();
        assert_eq!(text, "void main(){}");

        let missing = fetch_text("/definitely/not/here.frag").unwrap_err();
        assert!(matches!(missing, LoadError::Io { .. }));
        let _ = fs::remove_file(path);
    }
}
