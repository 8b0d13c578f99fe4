//! Keeps at most one inference request in flight.
//!
//! Every submission gets a fresh [`CancellationToken`] and generation number.
//! Submitting again, or calling [`InferenceCoordinator::cancel`], cancels the
//! previous token. Completions travel back over a channel and are only
//! accepted when they belong to the current, uncancelled generation, so a
//! superseded request can never touch session state.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::OurResult;
use crate::capture::FramePayload;
use crate::inference::InferenceBackend;
use crate::protocol::PredictOutcome;

/// A finished request, tagged with the generation that issued it.
#[derive(Debug)]
pub struct Completion {
    pub generation: u64,
    pub result: OurResult<PredictOutcome>,
}

#[derive(Debug)]
struct InFlight {
    generation: u64,
    token: CancellationToken,
}

pub struct InferenceCoordinator<B: InferenceBackend> {
    backend: Arc<B>,
    generation: u64,
    in_flight: Option<InFlight>,
    completions: mpsc::UnboundedSender<Completion>,
}

impl<B: InferenceBackend> InferenceCoordinator<B> {
    pub fn new(backend: Arc<B>) -> (Self, mpsc::UnboundedReceiver<Completion>) {
        let (completions, receiver) = mpsc::unbounded_channel();
        let coordinator = Self {
            backend,
            generation: 0,
            in_flight: None,
            completions,
        };
        (coordinator, receiver)
    }

    /// Cancel whatever is pending and issue a new request for `payload`.
    ///
    /// Returns the generation of the new request. Must be called from within
    /// a tokio runtime.
    pub fn submit(&mut self, payload: FramePayload) -> u64 {
        self.cancel();

        self.generation += 1;
        let generation = self.generation;
        let token = CancellationToken::new();
        self.in_flight = Some(InFlight {
            generation,
            token: token.clone(),
        });

        let backend = Arc::clone(&self.backend);
        let completions = self.completions.clone();
        debug!(generation, domain = %payload.domain, "Submitting frame");

        tokio::spawn(async move {
            let result = backend.predict_frame(payload, token.clone()).await;
            if token.is_cancelled() || matches!(&result, Err(e) if e.is_cancelled()) {
                debug!(generation, "Dropping cancelled inference result");
                return;
            }
            if completions.send(Completion { generation, result }).is_err() {
                warn!(generation, "Session went away before inference completed");
            }
        });

        generation
    }

    /// Cancel the pending request. Returns whether one was pending.
    pub fn cancel(&mut self) -> bool {
        match self.in_flight.take() {
            Some(in_flight) => {
                in_flight.token.cancel();
                debug!(generation = in_flight.generation, "Cancelled inference request");
                true
            }
            None => false,
        }
    }

    /// Take a completion off the channel and decide whether it may be shown.
    pub fn accept(&mut self, completion: Completion) -> Option<OurResult<PredictOutcome>> {
        match &self.in_flight {
            Some(in_flight)
                if in_flight.generation == completion.generation
                    && !in_flight.token.is_cancelled() =>
            {
                self.in_flight = None;
                Some(completion.result)
            }
            _ => {
                debug!(
                    generation = completion.generation,
                    "Ignoring stale inference result"
                );
                None
            }
        }
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl<B: InferenceBackend> Drop for InferenceCoordinator<B> {
    fn drop(&mut self) {
        self.cancel();
    }
}
