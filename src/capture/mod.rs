//! Frame sources feeding the upload pipeline

pub mod frame;
pub mod synthetic;
#[cfg(feature = "v4l2")]
pub mod v4l2;

use std::time::Duration;

use flume::{Receiver, RecvTimeoutError, Sender, TrySendError};
use thiserror::Error;
use tracing::debug;

pub use frame::{Frame, FrameMetadata, Plane};
pub use synthetic::TestPatternSource;
#[cfg(feature = "v4l2")]
pub use v4l2::V4l2Capture;

/// Capture-related errors.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Device error: {0}")]
    Device(#[from] std::io::Error),
    #[error("Unsupported capture format: {0}")]
    Format(String),
    #[error("Capture stream not started")]
    NotStarted,
    #[error("No frame within {0:?}")]
    Timeout(Duration),
}

/// Anything that yields raw frames, one at a time.
///
/// Frames are released when dropped; the pipeline drops every frame it
/// receives before asking for the next one.
pub trait FrameSource {
    /// Next frame, or `None` once the source has ended
    fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        (**self).next_frame()
    }
}

/// Bounded hand-off between a capture thread and the pipeline.
///
/// The producer side never waits: when the pipeline is behind, the newest
/// frame is discarded (and released) instead of queueing.
pub fn channel(capacity: usize) -> (FrameSender, ChannelSource) {
    let (tx, rx) = flume::bounded(capacity.max(1));
    (
        FrameSender { tx },
        ChannelSource {
            rx,
            poll: Duration::from_millis(250),
        },
    )
}

#[derive(Clone)]
pub struct FrameSender {
    tx: Sender<Frame>,
}

impl FrameSender {
    /// Returns false if the frame was discarded
    pub fn offer(&self, frame: Frame) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(frame)) => {
                debug!(sequence = frame.meta.sequence, "Frame dropped (pipeline behind)");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

/// Receiving end of [`channel`]
pub struct ChannelSource {
    rx: Receiver<Frame>,
    poll: Duration,
}

impl FrameSource for ChannelSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        match self.rx.recv_timeout(self.poll) {
            Ok(frame) => Ok(Some(frame)),
            Err(RecvTimeoutError::Timeout) => Err(CaptureError::Timeout(self.poll)),
            Err(RecvTimeoutError::Disconnected) => Ok(None),
        }
    }
}
