//! Capture and encode tasks
//!
//! Two long-lived units drive the pipeline: a blocking capture loop that
//! owns the device and copies frames into a single-slot channel, and an
//! async encode task that owns the encoder and the dispatcher. The
//! capture loop never waits on anything downstream; when the slot is
//! occupied the frame is dropped.

use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::capture::{CaptureError, FrameSource};
use crate::distributor::Dispatcher;
use crate::encode::{EncodeError, FrameEncoder};

/// How long one capture cycle waits for the device before logging and
/// retrying
pub const FRAME_WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Capacity of the capture-to-encode handoff. One frame may be queued
/// while the previous one is still encoding; anything beyond that is
/// dropped.
pub const FRAME_SLOT_CAPACITY: usize = 1;

/// Rolling frame-rate meter over ten-second windows.
///
/// Purely observational; the rate is logged, and printed to stdout when
/// requested.
pub struct FpsMeter {
    window: Duration,
    started: Instant,
    frames: u64,
    print: bool,
}

impl FpsMeter {
    pub fn new(print: bool) -> Self {
        Self {
            window: Duration::from_secs(10),
            started: Instant::now(),
            frames: 0,
            print,
        }
    }

    /// Counts one frame; closes the window and reports the rate when it
    /// has run longer than ten seconds
    pub fn tick(&mut self) -> Option<f64> {
        self.tick_at(Instant::now())
    }

    fn tick_at(&mut self, now: Instant) -> Option<f64> {
        self.frames += 1;

        let elapsed = now.saturating_duration_since(self.started);
        if elapsed <= self.window {
            return None;
        }

        let rate = self.frames as f64 / elapsed.as_secs_f64();
        if self.print {
            println!("{} fps", rate);
        }
        debug!(rate, "frame rate");

        self.started = now;
        self.frames = 0;
        Some(rate)
    }
}

/// Drives the capture device until the encode side goes away or the device
/// fails.
///
/// Per cycle: wait for a frame (timeouts are logged and retried), read it,
/// skip empty frames silently, skip read failures with a warning, and offer
/// the copy to the encode task without blocking. Any other device error is
/// fatal and ends the loop.
///
/// Runs on a blocking thread; the device never crosses an await point.
pub fn run_capture<S: FrameSource>(
    mut source: S,
    frames: mpsc::Sender<Vec<u8>>,
    mut fps: FpsMeter,
) -> Result<(), CaptureError> {
    let mut captured: u64 = 0;
    let mut dropped: u64 = 0;

    loop {
        match source.wait_frame(FRAME_WAIT_TIMEOUT) {
            Ok(()) => {}
            Err(CaptureError::Timeout) => {
                warn!("timed out waiting for frame");
                continue;
            }
            Err(e) => {
                info!(captured, dropped, "capture stopped");
                return Err(e);
            }
        }

        let frame = match source.read_frame() {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "frame read failed");
                continue;
            }
        };
        if frame.is_empty() {
            continue;
        }

        fps.tick();

        match frames.try_send(frame) {
            Ok(()) => captured += 1,
            // Encoder still busy with the previous frame
            Err(mpsc::error::TrySendError::Full(_)) => dropped += 1,
            // Encode side gone, clean shutdown
            Err(mpsc::error::TrySendError::Closed(_)) => break,
        }
    }

    info!(captured, dropped, "capture stopped");
    Ok(())
}

/// Encodes frames and dispatches the images until the capture side or the
/// last client handle goes away.
///
/// Strictly sequential: the next frame is not taken off the slot before
/// the previous image finished dispatching, so at most one image is in
/// flight for broadcast at a time.
pub async fn run_encoder(
    mut encoder: FrameEncoder,
    mut frames: mpsc::Receiver<Vec<u8>>,
    mut dispatcher: Dispatcher,
) -> Result<(), EncodeError> {
    let mut images: u64 = 0;

    while let Some(frame) = frames.recv().await {
        let image: Bytes = encoder.encode(&frame)?;

        if dispatcher.dispatch(image).await.is_err() {
            // All client handles dropped, clean shutdown
            break;
        }

        images += 1;
        if images % 100 == 0 {
            let stats = dispatcher.stats();
            debug!(
                images,
                deliveries = stats.deliveries,
                idle_handoffs = stats.idle_handoffs,
                "encode progress"
            );
        }
    }

    info!(images, "encoder stopped");
    Ok(())
}
