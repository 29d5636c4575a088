//! End-to-end pipeline test: scripted capture source through encode and
//! distribution to a subscribed client

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::mpsc;
use webcam_http::capture::{CaptureError, FrameSource, PixelFormat};
use webcam_http::distributor::{self, DistributorClosed, DEFAULT_FANOUT_LIMIT};
use webcam_http::pipeline::{self, FpsMeter, FRAME_SLOT_CAPACITY};
use webcam_http::FrameEncoder;

enum Step {
    Timeout,
    Frame(Vec<u8>),
    Empty,
}

/// Capture source that replays a fixed script, pacing one cycle per 20 ms,
/// and fails hard once the script runs out
struct ScriptedSource {
    steps: VecDeque<Step>,
}

impl FrameSource for ScriptedSource {
    fn pixel_format(&self) -> PixelFormat {
        PixelFormat::Mjpg
    }

    fn dimensions(&self) -> (u32, u32) {
        (640, 480)
    }

    fn wait_frame(&mut self, _timeout: Duration) -> Result<(), CaptureError> {
        std::thread::sleep(Duration::from_millis(20));
        match self.steps.front() {
            Some(Step::Timeout) => {
                self.steps.pop_front();
                Err(CaptureError::Timeout)
            }
            Some(_) => Ok(()),
            None => Err(CaptureError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "script exhausted",
            ))),
        }
    }

    fn read_frame(&mut self) -> Result<Vec<u8>, CaptureError> {
        match self.steps.pop_front() {
            Some(Step::Frame(frame)) => Ok(frame),
            Some(Step::Empty) => Ok(Vec::new()),
            _ => unreachable!("wait_frame consumed these"),
        }
    }
}

#[tokio::test]
async fn test_pipeline_delivers_frames_across_transient_errors() {
    let first = vec![0xFF, 0xD8, 0x01, 0xFF, 0xD9];
    let second = vec![0xFF, 0xD8, 0x02, 0xFF, 0xD9];

    let source = ScriptedSource {
        steps: VecDeque::from([
            Step::Timeout,
            Step::Frame(first.clone()),
            Step::Empty,
            Step::Frame(second.clone()),
        ]),
    };

    let (frame_tx, frame_rx) = mpsc::channel(FRAME_SLOT_CAPACITY);
    let (distributor, dispatcher) = distributor::channel(DEFAULT_FANOUT_LIMIT);
    let encoder = FrameEncoder::new(PixelFormat::Mjpg, 640, 480);

    // Client connects before any frame flows; its drain swallows the first
    // image, so the first image it uses is the second one produced
    let client = tokio::spawn({
        let distributor = distributor.clone();
        async move {
            let subscription = distributor.subscribe().await.unwrap();
            subscription.next().await.unwrap()
        }
    });
    drop(distributor);

    let capture =
        tokio::task::spawn_blocking(move || pipeline::run_capture(source, frame_tx, FpsMeter::new(false)));
    let encode = tokio::spawn(pipeline::run_encoder(encoder, frame_rx, dispatcher));

    let used = client.await.unwrap();
    assert_eq!(&used[..], &second[..]);

    // The timeout and the empty frame were survived; only the scripted
    // device failure ends the capture loop
    let capture_result = capture.await.unwrap();
    assert!(matches!(capture_result, Err(CaptureError::Io(_))));

    // Capture winding down closes the frame slot, the encoder drains out
    encode.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_pipeline_shutdown_propagates_to_clients() {
    let source = ScriptedSource {
        steps: VecDeque::from([Step::Frame(vec![0xFF, 0xD8, 0xFF, 0xD9])]),
    };

    let (frame_tx, frame_rx) = mpsc::channel(FRAME_SLOT_CAPACITY);
    let (distributor, dispatcher) = distributor::channel(DEFAULT_FANOUT_LIMIT);
    let encoder = FrameEncoder::new(PixelFormat::Mjpg, 640, 480);

    let subscription = {
        let subscribe = tokio::spawn({
            let distributor = distributor.clone();
            async move { distributor.subscribe().await.unwrap() }
        });

        tokio::task::spawn_blocking(move || {
            pipeline::run_capture(source, frame_tx, FpsMeter::new(false))
        });
        tokio::spawn(pipeline::run_encoder(encoder, frame_rx, dispatcher));

        subscribe.await.unwrap()
    };

    // The single scripted frame fed the drain; after the pipeline dies the
    // subscription reports closure instead of hanging
    assert_eq!(subscription.next().await, Err(DistributorClosed));
}
