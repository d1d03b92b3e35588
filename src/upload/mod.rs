//! Fire-and-forget delivery of frames and liveness probes

pub mod liveness;
pub mod transport;

use std::sync::Arc;
use std::time::Instant;

use reqwest::StatusCode;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::encode::EncodedPayload;
use crate::endpoint::EndpointConfig;

pub use liveness::LivenessTracker;
pub use transport::{HttpTransport, Request, Transport, TransportError};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UploadError {
    /// No response at all; the endpoint is considered down
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),
    /// A response arrived but with a non-success status; the endpoint is still up
    #[error("server answered {0}")]
    Http(StatusCode),
}

/// Result of one completed network call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success(StatusCode),
    Failure(UploadError),
}

impl Outcome {
    /// Any response, whatever its status, counts as reachable
    pub fn reachable(&self) -> bool {
        !matches!(self, Outcome::Failure(UploadError::Transport(_)))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }
}

impl From<Result<StatusCode, TransportError>> for Outcome {
    fn from(result: Result<StatusCode, TransportError>) -> Self {
        match result {
            Ok(status) if status.is_success() => Outcome::Success(status),
            Ok(status) => Outcome::Failure(UploadError::Http(status)),
            Err(err) => Outcome::Failure(err.into()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Kind {
    Probe,
    Delivery,
}

/// Dispatches probes and frame deliveries onto the runtime and folds each
/// outcome into the shared [`LivenessTracker`].
///
/// Calls never block: the endpoint is snapshotted, a task is spawned, and the
/// caller gets a handle it may await or ignore. Calls are independent of each
/// other and there is no retry.
#[derive(Clone)]
pub struct UploadClient {
    transport: Arc<dyn Transport>,
    endpoint: Arc<EndpointConfig>,
    liveness: Arc<LivenessTracker>,
    runtime: Handle,
}

impl UploadClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        endpoint: Arc<EndpointConfig>,
        liveness: Arc<LivenessTracker>,
        runtime: Handle,
    ) -> Self {
        Self {
            transport,
            endpoint,
            liveness,
            runtime,
        }
    }

    pub fn liveness(&self) -> &Arc<LivenessTracker> {
        &self.liveness
    }

    pub fn endpoint(&self) -> &Arc<EndpointConfig> {
        &self.endpoint
    }

    /// `GET <endpoint>`; any response marks the endpoint reachable
    pub fn probe(&self) -> JoinHandle<Outcome> {
        let url = self.endpoint.snapshot();
        info!(%url, "Checking server connection");
        self.dispatch(Kind::Probe, Request::Probe { url })
    }

    /// `POST <endpoint>` with the payload's JSON body
    pub fn deliver(&self, payload: EncodedPayload) -> JoinHandle<Outcome> {
        let url = self.endpoint.snapshot();
        info!(%url, jpeg_bytes = payload.jpeg_len(), "Sending frame");
        self.dispatch(
            Kind::Delivery,
            Request::Deliver {
                url,
                body: payload.body(),
                content_type: payload.content_type(),
            },
        )
    }

    fn dispatch(&self, kind: Kind, request: Request) -> JoinHandle<Outcome> {
        let transport = self.transport.clone();
        let liveness = self.liveness.clone();

        self.runtime.spawn(async move {
            let url = request.url().clone();
            let start = Instant::now();
            let outcome = Outcome::from(transport.send(request).await);
            let elapsed_ms = start.elapsed().as_millis() as u64;

            // Last completion wins
            let reachable = outcome.reachable();
            let was = liveness.set(reachable);
            if was != reachable {
                info!(%url, connected = reachable, "Connection state changed");
            }

            record(kind, &url, &outcome, elapsed_ms);
            outcome
        })
    }
}

fn record(kind: Kind, url: &url::Url, outcome: &Outcome, elapsed_ms: u64) {
    let label = match kind {
        Kind::Probe => "probe",
        Kind::Delivery => "delivery",
    };
    match outcome {
        Outcome::Success(status) => {
            metrics::counter!("upload_success_total", "kind" => label).increment(1);
            info!(%url, status = status.as_u16(), elapsed_ms, "{label} succeeded");
        }
        Outcome::Failure(UploadError::Http(status)) => {
            metrics::counter!("upload_http_error_total", "kind" => label).increment(1);
            warn!(%url, status = status.as_u16(), elapsed_ms, "{label} rejected by server");
        }
        Outcome::Failure(UploadError::Transport(err)) => {
            metrics::counter!("upload_transport_error_total", "kind" => label).increment(1);
            warn!(%url, error = %err, elapsed_ms, "{label} failed");
        }
    }
}
