//! Camera lifecycle management.
//!
//! A [`VideoSource`] opens a camera and hands back a [`CaptureDevice`], which
//! publishes decoded frames on a watch channel until it is stopped. The
//! [`CameraLifecycle`] wrapper guarantees at most one device is held at a time
//! and that releasing is idempotent.
//!
//! The production source drives `nokhwa` on a blocking thread because the
//! camera type is not `Send`.

use std::future::Future;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use image::RgbImage;
use nokhwa::{
    Camera,
    pixel_format::RgbFormat,
    utils::{
        ApiBackend, CameraFormat, CameraIndex, FrameFormat, RequestedFormat,
        RequestedFormatType, Resolution,
    },
};
use regex::Regex;
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, warn};

use crate::{OurError, OurResult};

const MAX_CONSECUTIVE_FAILURES: u32 = 100;

/// Latest decoded frame, shared with whoever samples it.
pub type SharedFrame = Arc<RgbImage>;

/// The live video surface. `None` until the device has produced a frame.
pub type FrameSurface = watch::Receiver<Option<SharedFrame>>;

#[allow(clippy::expect_used)]
static PERMISSION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)permission|denied|not authori[sz]ed|access is denied|EACCES")
        .expect("permission pattern is a valid regex")
});

/// Which way the requested camera should face
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Facing {
    User,
    Environment,
}

/// What to ask the platform for when opening a camera
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConstraints {
    pub camera_index: u32,
    pub width: u32,
    pub height: u32,
    pub facing: Facing,
    pub audio: bool,
}

impl StreamConstraints {
    pub fn user_facing(camera_index: u32, width: u32, height: u32) -> Self {
        Self {
            camera_index,
            width,
            height,
            facing: Facing::User,
            audio: false,
        }
    }
}

/// An acquired camera stream.
pub trait CaptureDevice: Send + 'static {
    /// Receiver for the latest decoded frame.
    fn surface(&self) -> FrameSurface;

    /// Signal capture to stop without waiting. Must be safe to call more
    /// than once.
    fn stop(&mut self);

    /// Stop capturing and wait until the hardware has been let go.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// Something that can open cameras.
pub trait VideoSource: Send + 'static {
    type Device: CaptureDevice;

    fn acquire(
        &mut self,
        constraints: &StreamConstraints,
    ) -> impl Future<Output = OurResult<Self::Device>> + Send;
}

/// Owns at most one capture device on behalf of a session.
pub struct CameraLifecycle<V: VideoSource> {
    source: V,
    device: Option<V::Device>,
}

impl<V: VideoSource> CameraLifecycle<V> {
    pub fn new(source: V) -> Self {
        Self {
            source,
            device: None,
        }
    }

    /// Open the camera and return its video surface.
    ///
    /// A device that is still held is fully released first.
    pub async fn acquire(&mut self, constraints: &StreamConstraints) -> OurResult<FrameSurface> {
        self.release().await;

        let device = self.source.acquire(constraints).await.map_err(|e| {
            warn!("Camera acquisition failed: {e}");
            e
        })?;
        let surface = device.surface();
        self.device = Some(device);
        info!(
            "Acquired camera {} ({}x{} requested)",
            constraints.camera_index, constraints.width, constraints.height
        );
        Ok(surface)
    }

    /// Stop the held device, if any, and wait for it to close. Returns
    /// whether anything was released.
    pub async fn release(&mut self) -> bool {
        match self.device.take() {
            Some(mut device) => {
                device.close().await;
                info!("Released camera");
                true
            }
            None => false,
        }
    }

    pub fn is_held(&self) -> bool {
        self.device.is_some()
    }
}

impl<V: VideoSource> Drop for CameraLifecycle<V> {
    fn drop(&mut self) {
        // Cannot wait here; the capture thread finishes on its own
        if let Some(mut device) = self.device.take() {
            device.stop();
        }
    }
}

/// Sort a platform error into permission or availability failures.
pub fn classify_camera_error(message: &str) -> OurError {
    if PERMISSION_PATTERN.is_match(message) {
        OurError::PermissionDenied(message.to_string())
    } else {
        OurError::DeviceUnavailable(message.to_string())
    }
}

/// Opens local cameras through `nokhwa`.
pub struct NokhwaVideoSource {
    backend: ApiBackend,
}

impl NokhwaVideoSource {
    pub fn new() -> OurResult<Self> {
        Ok(Self {
            backend: Self::select_best_backend()?,
        })
    }

    /// Select the best API backend for the current platform
    fn select_best_backend() -> OurResult<ApiBackend> {
        #[cfg(target_os = "linux")]
        return Ok(ApiBackend::Video4Linux);

        #[cfg(target_os = "windows")]
        return Ok(ApiBackend::MediaFoundation);

        #[cfg(target_os = "macos")]
        return Ok(ApiBackend::AVFoundation);

        #[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
        {
            error!("Unsupported platform for camera access");
            Err(OurError::DeviceUnavailable(
                "Unsupported platform for camera access".to_string(),
            ))
        }
    }
}

impl VideoSource for NokhwaVideoSource {
    type Device = NokhwaDevice;

    async fn acquire(&mut self, constraints: &StreamConstraints) -> OurResult<NokhwaDevice> {
        if constraints.facing != Facing::User {
            debug!("Facing mode is not selectable on this backend; using camera index only");
        }

        let backend = self.backend;
        let index = constraints.camera_index;
        let resolution = Resolution::new(constraints.width, constraints.height);
        let (frame_tx, frame_rx) = watch::channel(None);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (opened_tx, opened_rx) = oneshot::channel();

        let worker = tokio::task::spawn_blocking(move || {
            capture_thread(backend, index, resolution, frame_tx, shutdown_rx, opened_tx)
        });

        match opened_rx.await {
            Ok(Ok(())) => Ok(NokhwaDevice {
                surface: frame_rx,
                shutdown: shutdown_tx,
                worker: Some(worker),
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(OurError::DeviceUnavailable(
                "Capture thread exited before opening the camera".to_string(),
            )),
        }
    }
}

/// Runs on a blocking thread for the lifetime of the device.
fn capture_thread(
    backend: ApiBackend,
    index: u32,
    resolution: Resolution,
    frame_tx: watch::Sender<Option<SharedFrame>>,
    shutdown_rx: watch::Receiver<bool>,
    opened_tx: oneshot::Sender<OurResult<()>>,
) {
    let camera_format = CameraFormat::new(resolution, FrameFormat::MJPEG, 30);
    let format = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(camera_format));

    let mut camera = match Camera::with_backend(CameraIndex::Index(index), format, backend) {
        Ok(camera) => camera,
        Err(e) => {
            error!("Failed to create camera {index}: {e}");
            let _ = opened_tx.send(Err(classify_camera_error(&e.to_string())));
            return;
        }
    };

    if let Err(e) = camera.open_stream() {
        error!("Failed to open camera {index} stream: {e}");
        let _ = opened_tx.send(Err(classify_camera_error(&e.to_string())));
        return;
    }

    let actual = camera.camera_format().resolution();
    info!(
        "Camera {index} streaming at {}x{}",
        actual.width_x, actual.height_y
    );
    if opened_tx.send(Ok(())).is_err() {
        debug!("Camera opener went away; closing stream");
        if let Err(e) = camera.stop_stream() {
            warn!("Failed to stop camera stream: {e}");
        }
        return;
    }

    let mut failures = 0u32;
    while !*shutdown_rx.borrow() {
        match camera.frame() {
            Ok(buffer) => match buffer.decode_image::<RgbFormat>() {
                Ok(image) => {
                    failures = 0;
                    frame_tx.send_replace(Some(Arc::new(image)));
                }
                Err(e) => warn!("Failed to decode camera frame: {e}"),
            },
            Err(e) => {
                failures += 1;
                if failures >= MAX_CONSECUTIVE_FAILURES {
                    // Dropping the sender closes the surface and ends the session
                    error!("Camera {index} stopped delivering frames: {e}");
                    break;
                }
                warn!("Failed to capture camera frame: {e}");
                std::thread::sleep(Duration::from_millis(50));
            }
        }
    }

    if let Err(e) = camera.stop_stream() {
        warn!("Failed to stop camera stream: {e}");
    }
    info!("Camera {index} capture stopped");
}

/// A camera opened by [`NokhwaVideoSource`].
pub struct NokhwaDevice {
    surface: FrameSurface,
    shutdown: watch::Sender<bool>,
    worker: Option<tokio::task::JoinHandle<()>>,
}

impl CaptureDevice for NokhwaDevice {
    fn surface(&self) -> FrameSurface {
        self.surface.clone()
    }

    fn stop(&mut self) {
        if !self.shutdown.send_replace(true) {
            debug!("Signalled capture thread to stop");
        }
    }

    async fn close(&mut self) {
        self.stop();
        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                warn!("Capture thread did not exit cleanly: {e}");
            }
            debug!("Capture thread exited");
        }
    }
}

impl Drop for NokhwaDevice {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_classify_camera_error() {
        assert!(matches!(
            classify_camera_error("Permission denied (os error 13)"),
            OurError::PermissionDenied(_)
        ));
        assert!(matches!(
            classify_camera_error("Camera access is not authorized"),
            OurError::PermissionDenied(_)
        ));
        assert!(matches!(
            classify_camera_error("Could not open device index 3"),
            OurError::DeviceUnavailable(_)
        ));
    }

    /// Hardware that takes `close_delay` to let go after being stopped.
    #[derive(Default)]
    struct Counters {
        stops: AtomicUsize,
        open: AtomicUsize,
        max_open: AtomicUsize,
    }

    struct CountingDevice {
        counters: Arc<Counters>,
        surface: FrameSurface,
        close_delay: Duration,
        stopped: bool,
        closed: bool,
    }

    impl CaptureDevice for CountingDevice {
        fn surface(&self) -> FrameSurface {
            self.surface.clone()
        }

        fn stop(&mut self) {
            if !self.stopped {
                self.stopped = true;
                self.counters.stops.fetch_add(1, Ordering::SeqCst);
            }
        }

        async fn close(&mut self) {
            self.stop();
            if !self.closed {
                tokio::time::sleep(self.close_delay).await;
                self.closed = true;
                self.counters.open.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }

    struct CountingSource {
        counters: Arc<Counters>,
        close_delay: Duration,
        fail: bool,
    }

    impl CountingSource {
        fn new(close_delay: Duration, fail: bool) -> (Self, Arc<Counters>) {
            let counters = Arc::new(Counters::default());
            let source = Self {
                counters: counters.clone(),
                close_delay,
                fail,
            };
            (source, counters)
        }
    }

    impl VideoSource for CountingSource {
        type Device = CountingDevice;

        async fn acquire(&mut self, _constraints: &StreamConstraints) -> OurResult<CountingDevice> {
            if self.fail {
                return Err(OurError::PermissionDenied("denied".into()));
            }
            let open = self.counters.open.fetch_add(1, Ordering::SeqCst) + 1;
            self.counters.max_open.fetch_max(open, Ordering::SeqCst);
            let (_tx, surface) = watch::channel(None);
            Ok(CountingDevice {
                counters: self.counters.clone(),
                surface,
                close_delay: self.close_delay,
                stopped: false,
                closed: false,
            })
        }
    }

    #[tokio::test]
    async fn test_lifecycle_release_is_idempotent() {
        let (source, counters) = CountingSource::new(Duration::ZERO, false);
        let mut camera = CameraLifecycle::new(source);
        let constraints = StreamConstraints::user_facing(0, 1280, 720);

        assert!(!camera.release().await);
        camera.acquire(&constraints).await.expect("Failed to acquire");
        assert!(camera.is_held());

        // Re-acquiring drops the previous device first
        camera.acquire(&constraints).await.expect("Failed to acquire");
        assert_eq!(counters.stops.load(Ordering::SeqCst), 1);

        assert!(camera.release().await);
        assert!(!camera.release().await);
        assert!(!camera.is_held());
        assert_eq!(counters.stops.load(Ordering::SeqCst), 2);
        assert_eq!(counters.open.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reacquire_waits_for_slow_close() {
        let (source, counters) = CountingSource::new(Duration::from_millis(250), false);
        let mut camera = CameraLifecycle::new(source);
        let constraints = StreamConstraints::user_facing(0, 1280, 720);

        for _ in 0..3 {
            camera.acquire(&constraints).await.expect("Failed to acquire");
        }
        assert!(camera.release().await);

        assert_eq!(counters.max_open.load(Ordering::SeqCst), 1);
        assert_eq!(counters.open.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_dropping_lifecycle_signals_stop() {
        let (source, counters) = CountingSource::new(Duration::ZERO, false);
        let mut camera = CameraLifecycle::new(source);
        camera
            .acquire(&StreamConstraints::user_facing(0, 1280, 720))
            .await
            .expect("Failed to acquire");

        drop(camera);
        assert_eq!(counters.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_lifecycle_failed_acquire_holds_nothing() {
        let (source, counters) = CountingSource::new(Duration::ZERO, true);
        let mut camera = CameraLifecycle::new(source);
        let result = camera
            .acquire(&StreamConstraints::user_facing(0, 1280, 720))
            .await;
        assert!(matches!(result, Err(OurError::PermissionDenied(_))));
        assert!(!camera.is_held());
        assert_eq!(counters.open.load(Ordering::SeqCst), 0);
    }
}
