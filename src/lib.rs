//! HTTP snapshot and MJPEG live-stream service for V4L2 video devices
//!
//! This library turns a single V4L2 capture device into an HTTP camera with:
//! - `GET /image` — one fresh JPEG snapshot, optionally resized
//! - `GET /video` — an unbounded `multipart/x-mixed-replace` MJPEG stream
//! - A single-producer broadcast core that never blocks the capture loop
//! - Zero-copy image sharing between clients using `bytes::Bytes`
//!
//! # Example
//!
//! ```no_run
//! use webcam_http::distributor;
//!
//! # async fn demo() {
//! let (handle, dispatcher) = distributor::channel(distributor::DEFAULT_FANOUT_LIMIT);
//! // ... encode a JPEG frame
//! // dispatcher.dispatch(jpeg_bytes).await?;
//! # let _ = (handle, dispatcher);
//! # }
//! ```

pub mod capture;
pub mod config;
pub mod distributor;
pub mod encode;
pub mod pipeline;
pub mod server;

// Re-exports for convenience
pub use capture::{CaptureError, FrameSource, PixelFormat, V4l2Source};
pub use config::Config;
pub use distributor::{Dispatcher, Distributor, DistributorClosed, Subscription};
pub use encode::{EncodeError, FrameEncoder};
