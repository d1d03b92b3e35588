//! Capture loop: gate, encode, dispatch

pub mod gate;
pub mod stats;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::capture::{CaptureError, Frame, FrameSource};
use crate::encode::{EncodingError, FrameEncoder};
use crate::upload::{Outcome, UploadClient};

pub use gate::{Admission, FrameGate};
pub use stats::{PipelineStats, StatsSnapshot};

/// What happened to one frame
#[derive(Debug)]
pub enum Step {
    RateLimited,
    Disconnected,
    EncodeFailed(EncodingError),
    /// Upload in flight; awaiting the handle is optional
    Dispatched(JoinHandle<Outcome>),
}

impl Step {
    pub fn admission(&self) -> Admission {
        match self {
            Step::RateLimited => Admission::DropRateLimited,
            Step::Disconnected => Admission::DropDisconnected,
            Step::EncodeFailed(_) | Step::Dispatched(_) => Admission::Process,
        }
    }
}

/// Sequential frame pipeline. Lives on the capture thread; only uploads leave it.
pub struct Pipeline {
    gate: FrameGate,
    encoder: FrameEncoder,
    uploader: UploadClient,
    stats: Arc<PipelineStats>,
}

impl Pipeline {
    pub fn new(gate: FrameGate, encoder: FrameEncoder, uploader: UploadClient) -> Self {
        Self {
            gate,
            encoder,
            uploader,
            stats: Arc::new(PipelineStats::new()),
        }
    }

    pub fn stats(&self) -> Arc<PipelineStats> {
        self.stats.clone()
    }

    pub fn gate(&self) -> &FrameGate {
        &self.gate
    }

    /// Run one frame through the pipeline. The frame is released before this returns.
    pub fn process(&mut self, frame: Frame) -> Step {
        let step = self.step(&frame);
        drop(frame);
        self.stats.record(&step);
        step
    }

    fn step(&mut self, frame: &Frame) -> Step {
        match self.gate.admit(frame, frame.timestamp) {
            Admission::DropRateLimited => Step::RateLimited,
            Admission::DropDisconnected => {
                debug!(sequence = frame.meta.sequence, "Not connected, skipping frame");
                Step::Disconnected
            }
            Admission::Process => match self.encoder.encode(frame) {
                Ok(payload) => Step::Dispatched(self.uploader.deliver(payload)),
                Err(err) => {
                    warn!(sequence = frame.meta.sequence, error = %err, "Frame processing failed");
                    Step::EncodeFailed(err)
                }
            },
        }
    }

    /// Pull frames until the source ends or `shutdown` is set.
    ///
    /// Nothing a single frame does can stop the loop; capture errors are
    /// logged and retried after a short pause.
    pub fn run<S: FrameSource>(&mut self, source: &mut S, shutdown: &AtomicBool) -> StatsSnapshot {
        info!(
            interval_ms = self.gate.interval().as_millis() as u64,
            quality = self.encoder.quality(),
            "Pipeline running"
        );

        while !shutdown.load(Ordering::Relaxed) {
            match source.next_frame() {
                Ok(Some(frame)) => {
                    self.process(frame);
                }
                Ok(None) => {
                    info!("Frame source ended");
                    break;
                }
                Err(CaptureError::Timeout(waited)) => {
                    debug!(?waited, "No frame yet");
                }
                Err(e) => {
                    error!("Capture error: {}", e);
                    std::thread::sleep(Duration::from_millis(10));
                }
            }
        }

        let stats = self.stats.snapshot();
        info!(?stats, "Pipeline stopped");
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::frame::{FrameMetadata, Plane};
    use crate::endpoint::EndpointConfig;
    use crate::upload::testing::{Scripted, ScriptedTransport};
    use crate::upload::LivenessTracker;
    use bytes::Bytes;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;
    use tokio::runtime::Handle;

    const INTERVAL: Duration = Duration::from_millis(66);

    struct Harness {
        pipeline: Pipeline,
        liveness: Arc<LivenessTracker>,
        transport: Arc<ScriptedTransport>,
        released: Arc<AtomicUsize>,
    }

    fn harness() -> Harness {
        let liveness = Arc::new(LivenessTracker::new());
        let transport = ScriptedTransport::new(Scripted::ok(0));
        let endpoint = Arc::new(EndpointConfig::parse("http://10.0.0.2:5000/video_feed").unwrap());
        let uploader = UploadClient::new(
            transport.clone(),
            endpoint,
            liveness.clone(),
            Handle::current(),
        );
        Harness {
            pipeline: Pipeline::new(
                FrameGate::new(INTERVAL, liveness.clone()),
                FrameEncoder::default(),
                uploader,
            ),
            liveness,
            transport,
            released: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn frame(released: &Arc<AtomicUsize>, at: Instant, luma_len: usize) -> Frame {
        let counter = released.clone();
        Frame::new(
            FrameMetadata {
                sequence: 0,
                width: 16,
                height: 16,
                device_timestamp: None,
            },
            [
                Plane::packed(Bytes::from(vec![128u8; luma_len]), 16),
                Plane::packed(vec![128u8; 64], 8),
                Plane::packed(vec![128u8; 64], 8),
            ],
            at,
        )
        .with_release(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test(start_paused = true)]
    async fn every_exit_path_releases_the_frame() {
        let mut h = harness();
        let t0 = Instant::now();

        // Disconnected
        assert!(matches!(
            h.pipeline.process(frame(&h.released, t0, 256)),
            Step::Disconnected
        ));

        h.liveness.set(true);
        // Admitted but malformed
        assert!(matches!(
            h.pipeline.process(frame(&h.released, t0, 255)),
            Step::EncodeFailed(_)
        ));
        // Rate limited
        assert!(matches!(
            h.pipeline.process(frame(&h.released, t0 + Duration::from_millis(10), 256)),
            Step::RateLimited
        ));
        // Dispatched
        let step = h.pipeline.process(frame(&h.released, t0 + INTERVAL, 256));
        assert_eq!(h.released.load(Ordering::SeqCst), 4);

        match step {
            Step::Dispatched(handle) => assert!(handle.await.unwrap().is_success()),
            other => panic!("expected dispatch, got {other:?}"),
        }
        assert_eq!(h.transport.seen().len(), 1);

        let stats = h.pipeline.stats().snapshot();
        assert_eq!(stats.captured, 4);
        assert_eq!(stats.disconnected, 1);
        assert_eq!(stats.encode_failed, 1);
        assert_eq!(stats.rate_limited, 1);
        assert_eq!(stats.dispatched, 1);
        assert_eq!(stats.admitted(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn encode_failure_still_moves_the_clock() {
        let mut h = harness();
        h.liveness.set(true);
        let t0 = Instant::now();

        assert!(matches!(
            h.pipeline.process(frame(&h.released, t0, 10)),
            Step::EncodeFailed(_)
        ));
        assert_eq!(h.pipeline.gate().last_processed_at(), Some(t0));
        assert!(h.transport.seen().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn run_drains_source_and_stops() {
        let mut h = harness();
        h.liveness.set(true);
        let mut source = crate::capture::TestPatternSource::new(32, 16, 15)
            .unpaced()
            .with_limit(5);

        let shutdown = AtomicBool::new(false);
        let stats = h.pipeline.run(&mut source, &shutdown);
        assert_eq!(stats.captured, 5);
        // Unpaced frames arrive well inside one interval of each other
        assert_eq!(stats.dispatched, 1);
        assert_eq!(stats.rate_limited, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_flag_stops_before_first_frame() {
        let mut h = harness();
        let mut source = crate::capture::TestPatternSource::new(32, 16, 15).unpaced();
        let shutdown = AtomicBool::new(true);
        assert_eq!(h.pipeline.run(&mut source, &shutdown).captured, 0);
    }
}
