//! The live capture-predict session.
//!
//! [`SessionController`] is an actor that owns the camera, the capture and
//! telemetry timers, and the inference coordinator. Everything it owns is
//! mutated from its own loop only; the rest of the program talks to it
//! through a cloneable [`SessionHandle`] and watches its state through a
//! [`SessionSnapshot`] watch channel.
//!
//! All timers of a live session sit in one [`LiveTimers`] value, so ending the
//! session drops them together and nothing scheduled for the old session can
//! fire afterwards.

use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::camera_manager::{
    CameraLifecycle, FrameSurface, StreamConstraints, VideoSource,
};
use crate::capture::sample_frame;
use crate::config::Settings;
use crate::coordinator::{Completion, InferenceCoordinator};
use crate::inference::InferenceBackend;
use crate::protocol::{
    CAMERA_UNAVAILABLE_MESSAGE, Domain, SessionSnapshot, SessionStatus, Visibility,
};
use crate::telemetry::{FrameRateMeter, PerformanceGauges};
use crate::{OurError, OurResult};

/// Timing and capture parameters for a session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub constraints: StreamConstraints,
    pub capture_interval: Duration,
    pub telemetry_interval: Duration,
    pub frame_rate_window: Duration,
    pub jpeg_quality: u8,
    pub domain: Domain,
}

impl SessionOptions {
    /// Reject timings the session timers cannot run with.
    pub fn validate(&self) -> OurResult<()> {
        let intervals = [
            ("capture interval", self.capture_interval),
            ("telemetry interval", self.telemetry_interval),
            ("frame-rate window", self.frame_rate_window),
        ];
        for (name, interval) in intervals {
            if interval.is_zero() {
                return Err(OurError::Config(format!("The {name} must be non-zero")));
            }
        }
        Ok(())
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for SessionOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            constraints: StreamConstraints::user_facing(
                settings.camera_index,
                settings.preferred_width,
                settings.preferred_height,
            ),
            capture_interval: settings.capture_interval,
            telemetry_interval: settings.telemetry_interval,
            frame_rate_window: settings.frame_rate_window,
            jpeg_quality: settings.jpeg_quality,
            domain: settings.default_domain,
        }
    }
}

#[derive(Debug)]
pub enum SessionRequest {
    Start {
        respond_to: oneshot::Sender<OurResult<()>>,
    },
    End {
        respond_to: oneshot::Sender<()>,
    },
    SetDomain(Domain),
    Visibility(Visibility),
    Shutdown {
        respond_to: oneshot::Sender<()>,
    },
}

/// Handle for communicating with a running session
#[derive(Clone)]
pub struct SessionHandle {
    request_sender: mpsc::UnboundedSender<SessionRequest>,
    snapshot: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    fn send(&self, request: SessionRequest) -> OurResult<()> {
        self.request_sender
            .send(request)
            .map_err(|_| OurError::Session("Session has shut down".to_string()))
    }

    /// Acquire the camera and go live.
    pub async fn start(&self) -> OurResult<()> {
        let (sender, receiver) = oneshot::channel();
        self.send(SessionRequest::Start { respond_to: sender })?;
        receiver
            .await
            .map_err(|_| OurError::Session("Session dropped the start request".to_string()))?
    }

    /// Stop capturing and release the camera.
    pub async fn end(&self) -> OurResult<()> {
        let (sender, receiver) = oneshot::channel();
        self.send(SessionRequest::End { respond_to: sender })?;
        receiver
            .await
            .map_err(|_| OurError::Session("Session dropped the end request".to_string()))
    }

    pub fn set_domain(&self, domain: Domain) -> OurResult<()> {
        self.send(SessionRequest::SetDomain(domain))
    }

    pub fn set_visibility(&self, visibility: Visibility) -> OurResult<()> {
        self.send(SessionRequest::Visibility(visibility))
    }

    /// End the session and stop the actor.
    pub async fn shutdown(&self) -> OurResult<()> {
        let (sender, receiver) = oneshot::channel();
        self.send(SessionRequest::Shutdown { respond_to: sender })?;
        receiver
            .await
            .map_err(|_| OurError::Session("Session dropped the shutdown request".to_string()))
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }
}

/// Timers and the frame surface of a live session.
struct LiveTimers {
    capture: Interval,
    telemetry: Interval,
    surface: FrameSurface,
    frame_rate: FrameRateMeter,
}

enum LiveEvent {
    Capture,
    Telemetry,
    Frame,
    DeviceLost,
}

impl LiveTimers {
    fn new(surface: FrameSurface, options: &SessionOptions) -> Self {
        let now = Instant::now();

        // First capture tick completes immediately
        let mut capture = tokio::time::interval(options.capture_interval);
        capture.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut telemetry = tokio::time::interval_at(
            now + options.telemetry_interval,
            options.telemetry_interval,
        );
        telemetry.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Self {
            capture,
            telemetry,
            surface,
            frame_rate: FrameRateMeter::new(now, options.frame_rate_window),
        }
    }

    async fn next_event(&mut self) -> LiveEvent {
        tokio::select! {
            _ = self.capture.tick() => LiveEvent::Capture,
            _ = self.telemetry.tick() => LiveEvent::Telemetry,
            changed = self.surface.changed() => match changed {
                Ok(()) => LiveEvent::Frame,
                Err(_) => LiveEvent::DeviceLost,
            },
        }
    }
}

async fn next_live_event(live: Option<&mut LiveTimers>) -> LiveEvent {
    match live {
        Some(live) => live.next_event().await,
        None => pending().await,
    }
}

pub struct SessionController<V: VideoSource, B: InferenceBackend> {
    options: SessionOptions,
    camera: CameraLifecycle<V>,
    coordinator: InferenceCoordinator<B>,
    completions: mpsc::UnboundedReceiver<Completion>,
    request_receiver: mpsc::UnboundedReceiver<SessionRequest>,
    state: watch::Sender<SessionSnapshot>,
    gauges: PerformanceGauges,
    live: Option<LiveTimers>,
}

impl<V: VideoSource, B: InferenceBackend> SessionController<V, B> {
    /// Create a new idle session and return a handle for communication
    pub fn new(source: V, backend: Arc<B>, options: SessionOptions) -> (Self, SessionHandle) {
        let (request_sender, request_receiver) = mpsc::unbounded_channel();
        let (state, snapshot) = watch::channel(SessionSnapshot::new(options.domain));
        let (coordinator, completions) = InferenceCoordinator::new(backend);

        let controller = Self {
            options,
            camera: CameraLifecycle::new(source),
            coordinator,
            completions,
            request_receiver,
            state,
            gauges: PerformanceGauges::default(),
            live: None,
        };
        let handle = SessionHandle {
            request_sender,
            snapshot,
        };

        (controller, handle)
    }

    /// Run the session event loop until shutdown or until every handle is dropped
    pub async fn run(mut self) -> OurResult<()> {
        info!("Session controller started");

        loop {
            tokio::select! {
                biased;
                request = self.request_receiver.recv() => match request {
                    Some(request) => {
                        if !self.handle_request(request).await {
                            break;
                        }
                    }
                    None => {
                        debug!("All session handles dropped");
                        break;
                    }
                },
                Some(completion) = self.completions.recv() => self.handle_completion(completion),
                event = next_live_event(self.live.as_mut()) => self.handle_live_event(event).await,
            }
        }

        self.end().await;
        info!("Session controller stopped");
        Ok(())
    }

    /// Returns false once the actor should stop.
    async fn handle_request(&mut self, request: SessionRequest) -> bool {
        match request {
            SessionRequest::Start { respond_to } => {
                let result = self.start().await;
                if respond_to.send(result).is_err() {
                    debug!("Failed to send session start response");
                }
            }
            SessionRequest::End { respond_to } => {
                self.end().await;
                if respond_to.send(()).is_err() {
                    debug!("Failed to send session end response");
                }
            }
            SessionRequest::SetDomain(domain) => {
                info!("Domain set to {domain}");
                self.update(|s| s.domain = domain);
            }
            SessionRequest::Visibility(Visibility::Hidden) => {
                if self.live.is_some() {
                    info!("Host hidden; ending live session");
                    self.end().await;
                }
            }
            SessionRequest::Visibility(Visibility::Visible) => {
                // The user restarts explicitly
                debug!("Host visible");
            }
            SessionRequest::Shutdown { respond_to } => {
                self.end().await;
                if respond_to.send(()).is_err() {
                    debug!("Failed to send session shutdown response");
                }
                return false;
            }
        }
        true
    }

    #[instrument(skip(self))]
    async fn start(&mut self) -> OurResult<()> {
        if self.live.is_some() {
            debug!("Session already live");
            return Ok(());
        }

        if let Err(e) = self.options.validate() {
            warn!("Refusing to start session: {e}");
            self.update(|s| s.last_error = Some(e.to_string()));
            return Err(e);
        }

        self.coordinator.cancel();
        self.update(|s| {
            s.current_label.clear();
            s.frame_rate = 0;
            s.in_flight = false;
        });

        match self.camera.acquire(&self.options.constraints).await {
            Ok(surface) => {
                self.live = Some(LiveTimers::new(surface, &self.options));
                let session_id = Uuid::new_v4();
                self.update(|s| {
                    s.session_id = session_id;
                    s.status = SessionStatus::Live;
                    s.device_held = true;
                    s.last_error = None;
                });
                info!(%session_id, "Session live");
                Ok(())
            }
            Err(e) => {
                let message = e.camera_message();
                self.update(|s| s.last_error = Some(message.to_string()));
                Err(e)
            }
        }
    }

    /// Tear down timers, cancel pending work and release the camera. Returns
    /// once the camera has closed.
    async fn end(&mut self) {
        let cancelled = self.coordinator.cancel();
        let was_live = self.live.take().is_some();
        let released = self.camera.release().await;

        if was_live || released || cancelled {
            info!(was_live, released, cancelled, "Session ended");
        }

        self.update(|s| {
            s.status = SessionStatus::Idle;
            s.in_flight = false;
            s.device_held = false;
        });
    }

    fn handle_completion(&mut self, completion: Completion) {
        if let Some(result) = self.coordinator.accept(completion) {
            if let Err(e) = &result {
                warn!("Inference request failed: {e}");
            }
            self.update(|s| s.apply_inference(result));
        }
    }

    async fn handle_live_event(&mut self, event: LiveEvent) {
        match event {
            LiveEvent::Capture => self.capture().await,
            LiveEvent::Telemetry => {
                self.gauges.jitter();
                let gauges = self.gauges;
                // Close a window that no frame arrived to close
                let stalled = self
                    .live
                    .as_mut()
                    .and_then(|live| live.frame_rate.poll(Instant::now()));
                self.update(|s| {
                    s.processing_load = gauges.processing_load;
                    s.memory_usage = gauges.memory_usage;
                    if let Some(frame_rate) = stalled {
                        s.frame_rate = frame_rate;
                    }
                });
            }
            LiveEvent::Frame => {
                let published = self
                    .live
                    .as_mut()
                    .and_then(|live| live.frame_rate.record_frame(Instant::now()));
                if let Some(frame_rate) = published {
                    self.update(|s| s.frame_rate = frame_rate);
                }
            }
            LiveEvent::DeviceLost => {
                warn!("Camera stopped delivering frames; ending session");
                self.end().await;
                self.update(|s| s.last_error = Some(CAMERA_UNAVAILABLE_MESSAGE.to_string()));
            }
        }
    }

    /// One tick of the capture loop.
    async fn capture(&mut self) {
        let Some(surface) = self.live.as_ref().map(|live| live.surface.clone()) else {
            return;
        };
        let domain = self.state.borrow().domain;

        match sample_frame(&surface, domain, self.options.jpeg_quality).await {
            Ok(Some(payload)) => {
                self.coordinator.submit(payload);
                self.update(|s| s.in_flight = true);
            }
            Ok(None) => debug!("Video not warmed up yet; skipping capture"),
            Err(e) => warn!("Failed to encode frame: {e}"),
        }
    }

    fn update(&self, modify: impl FnOnce(&mut SessionSnapshot)) {
        self.state.send_modify(|snapshot| {
            modify(snapshot);
            snapshot.updated_at = Utc::now();
        });
    }
}

/// Spawn a session actor on the current runtime.
pub fn spawn_session<V: VideoSource, B: InferenceBackend>(
    source: V,
    backend: Arc<B>,
    options: SessionOptions,
) -> SessionHandle {
    let (controller, handle) = SessionController::new(source, backend, options);

    tokio::spawn(async move {
        if let Err(e) = controller.run().await {
            warn!("Session controller error: {e}");
        }
    });

    handle
}
