//! Fake camera and inference backend shared by the integration tests
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use image::RgbImage;
use isl_live::camera_manager::{
    CaptureDevice, FrameSurface, SharedFrame, StreamConstraints, VideoSource,
};
use isl_live::capture::FramePayload;
use isl_live::inference::InferenceBackend;
use isl_live::protocol::{Domain, PredictOutcome};
use isl_live::session::{SessionHandle, SessionOptions, spawn_session};
use isl_live::{OurError, OurResult};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

pub fn test_frame() -> SharedFrame {
    Arc::new(RgbImage::from_pixel(16, 12, image::Rgb([200, 120, 40])))
}

/// Shared bookkeeping for [`FakeCamera`]
#[derive(Default)]
pub struct CameraState {
    held: AtomicUsize,
    max_held: AtomicUsize,
    acquisitions: AtomicUsize,
    releases: AtomicUsize,
    deny_permission: AtomicBool,
    warm: AtomicBool,
    release_delay: Mutex<Duration>,
    feed: Mutex<Option<watch::Sender<Option<SharedFrame>>>>,
}

impl CameraState {
    /// A camera that has a frame ready as soon as it opens
    pub fn warm() -> Arc<Self> {
        let state = Self::default();
        state.warm.store(true, Ordering::SeqCst);
        Arc::new(state)
    }

    /// A warm camera whose hardware lets go `delay` after being stopped
    pub fn slow_to_release(delay: Duration) -> Arc<Self> {
        let state = Self::default();
        state.warm.store(true, Ordering::SeqCst);
        *state.release_delay.lock().expect("delay lock") = delay;
        Arc::new(state)
    }

    /// A camera that produces nothing until frames are pushed
    pub fn cold() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn deny_permission(&self, deny: bool) {
        self.deny_permission.store(deny, Ordering::SeqCst);
    }

    pub fn held(&self) -> usize {
        self.held.load(Ordering::SeqCst)
    }

    pub fn max_held(&self) -> usize {
        self.max_held.load(Ordering::SeqCst)
    }

    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    /// Deliver a frame to the open device. Returns false when nothing is open.
    pub fn push_frame(&self) -> bool {
        match self.feed.lock().expect("feed lock").as_ref() {
            Some(feed) => {
                feed.send_replace(Some(test_frame()));
                true
            }
            None => false,
        }
    }

    /// Simulate the camera being unplugged
    pub fn disconnect(&self) {
        self.feed.lock().expect("feed lock").take();
    }
}

pub struct FakeCamera {
    pub state: Arc<CameraState>,
}

pub struct FakeDevice {
    state: Arc<CameraState>,
    surface: FrameSurface,
    stopped: bool,
    teardown: Option<tokio::task::JoinHandle<()>>,
}

impl CameraState {
    fn let_go(&self) {
        self.held.fetch_sub(1, Ordering::SeqCst);
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

impl CaptureDevice for FakeDevice {
    fn surface(&self) -> FrameSurface {
        self.surface.clone()
    }

    /// Detaches the feed at once; the hardware lets go after the release delay
    fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.state.feed.lock().expect("feed lock").take();

        let delay = *self.state.release_delay.lock().expect("delay lock");
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) if !delay.is_zero() => {
                let state = self.state.clone();
                self.teardown = Some(runtime.spawn(async move {
                    tokio::time::sleep(delay).await;
                    state.let_go();
                }));
            }
            _ => self.state.let_go(),
        }
    }

    async fn close(&mut self) {
        self.stop();
        if let Some(teardown) = self.teardown.take() {
            teardown.await.expect("teardown task panicked");
        }
    }
}

impl Drop for FakeDevice {
    fn drop(&mut self) {
        self.stop();
    }
}

impl VideoSource for FakeCamera {
    type Device = FakeDevice;

    async fn acquire(&mut self, constraints: &StreamConstraints) -> OurResult<FakeDevice> {
        assert!(!constraints.audio, "audio must never be requested");
        self.state.acquisitions.fetch_add(1, Ordering::SeqCst);

        if self.state.deny_permission.load(Ordering::SeqCst) {
            return Err(OurError::PermissionDenied("user dismissed prompt".into()));
        }

        let initial = self
            .state
            .warm
            .load(Ordering::SeqCst)
            .then(test_frame);
        let (feed, surface) = watch::channel(initial);
        *self.state.feed.lock().expect("feed lock") = Some(feed);

        let held = self.state.held.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_held.fetch_max(held, Ordering::SeqCst);

        Ok(FakeDevice {
            state: self.state.clone(),
            surface,
            stopped: false,
            teardown: None,
        })
    }
}

/// What the fake service does with one request
pub enum Reply {
    /// Answer after a delay unless cancelled first
    Respond {
        after: Duration,
        answer: Answer,
    },
    /// Answer after a delay even if cancelled
    IgnoreCancel {
        after: Duration,
        answer: Answer,
    },
    /// Never answer; resolve only on cancellation
    Hang,
}

pub enum Answer {
    Label(&'static str),
    NoDetection(&'static str),
    Transport,
}

impl Answer {
    fn into_result(self) -> OurResult<PredictOutcome> {
        match self {
            Answer::Label(label) => Ok(PredictOutcome::Label(label.to_string())),
            Answer::NoDetection(detail) => Ok(PredictOutcome::NoDetection(detail.to_string())),
            Answer::Transport => Err(OurError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            ))),
        }
    }
}

pub fn respond(answer: Answer) -> Reply {
    Reply::Respond {
        after: Duration::from_millis(100),
        answer,
    }
}

pub struct Call {
    pub domain: Domain,
    pub token: CancellationToken,
}

/// Scripted stand-in for the inference service. Requests past the end of the
/// script hang until cancelled.
#[derive(Default)]
pub struct FakeBackend {
    calls: Mutex<Vec<Call>>,
    script: Mutex<VecDeque<Reply>>,
    overlapping: AtomicUsize,
}

impl FakeBackend {
    pub fn scripted(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(replies.into()),
            ..Default::default()
        })
    }

    pub fn hanging() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("calls lock").len()
    }

    pub fn domains(&self) -> Vec<Domain> {
        self.calls
            .lock()
            .expect("calls lock")
            .iter()
            .map(|call| call.domain)
            .collect()
    }

    pub fn all_but_last_cancelled(&self) -> bool {
        let calls = self.calls.lock().expect("calls lock");
        let settled = calls.len().saturating_sub(1);
        calls[..settled].iter().all(|call| call.token.is_cancelled())
    }

    pub fn last_cancelled(&self) -> bool {
        self.calls
            .lock()
            .expect("calls lock")
            .last()
            .is_some_and(|call| call.token.is_cancelled())
    }

    /// Number of requests that started while an earlier one was still live
    pub fn overlapping(&self) -> usize {
        self.overlapping.load(Ordering::SeqCst)
    }
}

impl InferenceBackend for FakeBackend {
    async fn predict_frame(
        &self,
        payload: FramePayload,
        cancel: CancellationToken,
    ) -> OurResult<PredictOutcome> {
        let reply = {
            let mut calls = self.calls.lock().expect("calls lock");
            if calls.iter().any(|call| !call.token.is_cancelled()) {
                self.overlapping.fetch_add(1, Ordering::SeqCst);
            }
            calls.push(Call {
                domain: payload.domain,
                token: cancel.clone(),
            });
            self.script
                .lock()
                .expect("script lock")
                .pop_front()
                .unwrap_or(Reply::Hang)
        };

        match reply {
            Reply::Respond { after, answer } => {
                tokio::select! {
                    _ = cancel.cancelled() => Err(OurError::Cancelled),
                    _ = tokio::time::sleep(after) => answer.into_result(),
                }
            }
            Reply::IgnoreCancel { after, answer } => {
                tokio::time::sleep(after).await;
                answer.into_result()
            }
            Reply::Hang => {
                cancel.cancelled().await;
                Err(OurError::Cancelled)
            }
        }
    }
}

pub fn spawn_fake_session(camera: Arc<CameraState>, backend: Arc<FakeBackend>) -> SessionHandle {
    spawn_fake_session_with(camera, backend, SessionOptions::default())
}

pub fn spawn_fake_session_with(
    camera: Arc<CameraState>,
    backend: Arc<FakeBackend>,
    options: SessionOptions,
) -> SessionHandle {
    spawn_session(FakeCamera { state: camera }, backend, options)
}
