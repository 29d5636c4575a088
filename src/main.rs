//! Webcam HTTP service CLI application

// Use jemalloc for better memory management (optional feature)
#[cfg(feature = "jemalloc")]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};
use webcam_http::config::Config;
use webcam_http::pipeline::{self, FpsMeter, FRAME_SLOT_CAPACITY};
use webcam_http::{distributor, server, FrameEncoder, FrameSource, V4l2Source};

#[derive(Parser, Debug)]
#[command(name = "webcam-http")]
#[command(about = "HTTP snapshot and MJPEG live-stream service for V4L2 video devices")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Video device to use
    #[arg(short, long)]
    device: Option<String>,

    /// Pixel format to use (fourcc or driver description), default first
    /// supported
    #[arg(short, long)]
    format: Option<String>,

    /// Frame size to use as WIDTHxHEIGHT, default largest one
    #[arg(short, long)]
    size: Option<String>,

    /// Address to listen on
    #[arg(short, long)]
    listen: Option<String>,

    /// Print fps info to stdout
    #[arg(short, long)]
    print_fps: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    /// Command line flags win over the configuration file
    fn apply(&self, config: &mut Config) {
        if let Some(device) = &self.device {
            config.device = device.clone();
        }
        if let Some(format) = &self.format {
            config.format = Some(format.clone());
        }
        if let Some(size) = &self.size {
            config.size = Some(size.clone());
        }
        if let Some(listen) = &self.listen {
            config.listen = listen.clone();
        }
        if self.print_fps {
            config.print_fps = true;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    fmt().with_env_filter(filter).with_target(false).init();

    info!("Webcam HTTP service starting");

    let mut config = Config::load_or_default(&cli.config)
        .with_context(|| format!("loading {}", cli.config))?;
    cli.apply(&mut config);
    config.validate()?;

    let source = V4l2Source::open(&config)
        .with_context(|| format!("negotiating capture on {}", config.device))?;
    let format = source.pixel_format();
    let (width, height) = source.dimensions();
    info!(format = %format, width, height, "capture negotiated");

    let encoder = FrameEncoder::new(format, width, height);
    let (frame_tx, frame_rx) = mpsc::channel(FRAME_SLOT_CAPACITY);
    let (distributor, dispatcher) = distributor::channel(config.fanout_limit);

    let fps = FpsMeter::new(config.print_fps);
    let capture = tokio::task::spawn_blocking(move || pipeline::run_capture(source, frame_tx, fps));
    let encode = tokio::spawn(pipeline::run_encoder(encoder, frame_rx, dispatcher));

    let listener = TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("binding {}", config.listen))?;
    info!(addr = %config.listen, "listening");

    let http = server::serve(listener, distributor);

    tokio::select! {
        res = capture => res.context("capture task failed")??,
        res = encode => res.context("encode task failed")??,
        res = http => res.context("http server failed")?,
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
    }

    Ok(())
}
