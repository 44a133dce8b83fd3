use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WebcamError {
    #[error("webcam support not enabled (build with feature: doodle-input-webcam/native)")]
    NotEnabled,

    #[error("{0}")]
    Backend(String),
}

#[derive(Clone, Debug)]
pub struct RgbaFrame {
    pub width: u32,
    pub height: u32,
    pub bytes: Vec<u8>, // RGBA8
    pub serial: u64,
}

pub struct Webcam {
    #[cfg(feature = "native")]
    cam: nokhwa::Camera,
}

impl std::fmt::Debug for Webcam {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Webcam").finish_non_exhaustive()
    }
}

impl Webcam {
    /// Open webcam `index` and best-effort set the requested resolution.
    pub fn open(index: u32, width: u32, height: u32) -> Result<Self, WebcamError> {
        #[cfg(not(feature = "native"))]
        {
            let _ = (index, width, height);
            Err(WebcamError::NotEnabled)
        }

        #[cfg(feature = "native")]
        {
            use nokhwa::{
                pixel_format::RgbFormat,
                utils::{CameraIndex, RequestedFormat, RequestedFormatType, Resolution},
                Camera,
            };

            let idx = CameraIndex::Index(index);
            let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate);

            let mut cam =
                Camera::new(idx, requested).map_err(|e| WebcamError::Backend(e.to_string()))?;

            cam.open_stream()
                .map_err(|e| WebcamError::Backend(e.to_string()))?;

            // Best-effort; drivers may reject it.
            let _ = cam.set_resolution(Resolution::new(width, height));

            Ok(Self { cam })
        }
    }

    /// Block until the next frame and return it as RGBA8 (serial left at 0).
    pub fn capture(&mut self) -> Result<RgbaFrame, WebcamError> {
        #[cfg(not(feature = "native"))]
        {
            Err(WebcamError::NotEnabled)
        }

        #[cfg(feature = "native")]
        {
            use nokhwa::pixel_format::RgbAFormat;

            let buf = self
                .cam
                .frame()
                .map_err(|e| WebcamError::Backend(e.to_string()))?;

            let res = buf.resolution();
            let img = buf
                .decode_image::<RgbAFormat>()
                .map_err(|e| WebcamError::Backend(e.to_string()))?;

            Ok(RgbaFrame {
                width: res.width_x,
                height: res.height_y,
                bytes: img.into_raw(),
                serial: 0,
            })
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    latest: Option<RgbaFrame>,
    error: Option<String>,
    next_serial: u64,
}

/// Camera captured on a worker thread; the render thread polls the latest frame.
pub struct WebcamFeed {
    shared: Arc<Mutex<Shared>>,
    stop: Arc<AtomicBool>,
    worker: Option<thread::JoinHandle<()>>,
}

impl std::fmt::Debug for WebcamFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebcamFeed")
            .field("stopped", &self.stop.load(Ordering::Relaxed))
            .finish()
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl WebcamFeed {
    /// Start capturing from `index`. Opening happens on the worker; failures
    /// surface through [`WebcamFeed::error`].
    pub fn start(index: u32, width: u32, height: u32) -> Result<Self, WebcamError> {
        let shared = Arc::new(Mutex::new(Shared::default()));
        let stop = Arc::new(AtomicBool::new(false));

        let shared_for_thread = Arc::clone(&shared);
        let stop_for_thread = Arc::clone(&stop);

        let worker = thread::Builder::new()
            .name("doodle-webcam".into())
            .spawn(move || capture_loop(index, width, height, &shared_for_thread, &stop_for_thread))
            .map_err(|e| WebcamError::Backend(e.to_string()))?;

        Ok(Self {
            shared,
            stop,
            worker: Some(worker),
        })
    }

    /// The latest frame if it is newer than `seen`.
    pub fn frame_after(&self, seen: Option<u64>) -> Option<RgbaFrame> {
        let guard = lock(&self.shared);
        let frame = guard.latest.as_ref()?;
        match seen {
            Some(s) if frame.serial <= s => None,
            _ => Some(frame.clone()),
        }
    }

    /// Open or capture failure, if the worker gave up.
    pub fn error(&self) -> Option<String> {
        lock(&self.shared).error.clone()
    }
}

impl Drop for WebcamFeed {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

fn capture_loop(index: u32, width: u32, height: u32, shared: &Mutex<Shared>, stop: &AtomicBool) {
    let mut cam = match Webcam::open(index, width, height) {
        Ok(cam) => cam,
        Err(e) => {
            tracing::warn!(index, error = %e, "webcam unavailable");
            lock(shared).error = Some(e.to_string());
            return;
        }
    };
    tracing::debug!(index, "webcam opened");

    while !stop.load(Ordering::SeqCst) {
        match cam.capture() {
            Ok(mut frame) => {
                let mut s = lock(shared);
                s.next_serial += 1;
                frame.serial = s.next_serial;
                s.latest = Some(frame);
            }
            Err(e) => {
                tracing::warn!(index, error = %e, "webcam capture failed");
                lock(shared).error = Some(e.to_string());
                return;
            }
        }
    }
}

#[cfg(all(test, not(feature = "native")))]
mod tests {
    use super::*;

    #[test]
    fn without_native_feature_the_feed_reports_an_error() {
        let feed = WebcamFeed::start(0, 640, 480).unwrap();
        for _ in 0..200 {
            if feed.error().is_some() {
                break;
            }
            thread::sleep(std::time::Duration::from_millis(5));
        }
        assert!(feed.error().is_some());
        assert!(feed.frame_after(None).is_none());
    }
}
