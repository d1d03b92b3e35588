//! Uplink: capture frames, throttle, JPEG-encode and POST them to a server

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use color_eyre::{eyre::eyre, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use uplink::capture::{self, FrameSource, TestPatternSource};
use uplink::upload::HttpTransport;
use uplink::pipeline::PipelineStats;
use uplink::{Config, Session};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SourceKind {
    /// Scrolling colour bars
    Synthetic,
    /// V4L2 webcam (needs the `v4l2` feature)
    V4l2,
}

#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Configuration file (toml)
    #[arg(short, long, env = "UPLINK_CONFIG", default_value = "uplink.toml")]
    config: PathBuf,

    /// Frame source
    #[arg(short, long, value_enum, default_value_t = SourceKind::Synthetic)]
    source: SourceKind,

    /// Stop after this many captured frames
    #[arg(long)]
    frames: Option<u64>,

    /// Switch to this endpoint on startup (persisted like any reconfiguration)
    #[arg(long)]
    endpoint: Option<String>,
}

fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("uplink=info")),
        )
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .init();

    let args = Args::parse();
    info!("Uplink Launching...");

    let config = Config::load(Some(&args.config))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.upload.worker_threads.max(1))
        .enable_all()
        .build()?;

    let result = runtime.block_on(run(args, config));
    // A pending stdin read would otherwise hold shutdown open
    runtime.shutdown_timeout(Duration::from_millis(500));
    result
}

async fn run(args: Args, config: Config) -> Result<()> {
    let transport = Arc::new(HttpTransport::new(config.upload.request_timeout())?);
    let (session, _probe) = Session::start(config, transport, tokio::runtime::Handle::current())?;
    let session = Arc::new(session);

    if let Some(endpoint) = &args.endpoint {
        session.reconfigure(endpoint)?;
    }

    let source = open_source(&args, session.config())?;

    // Keep-only-latest hand-off from the capture thread to the pipeline
    let (tx, mut frames) = capture::channel(1);
    let shutdown = Arc::new(AtomicBool::new(false));

    let producer_shutdown = shutdown.clone();
    let producer = thread::Builder::new()
        .name("capture".into())
        .spawn(move || produce(source, tx, &producer_shutdown))?;

    let mut pipeline = session.pipeline();
    let stats = pipeline.stats();
    let consumer_shutdown = shutdown.clone();
    let consumer = thread::Builder::new()
        .name("pipeline".into())
        .spawn(move || pipeline.run(&mut frames, &consumer_shutdown))?;

    info!("Type an endpoint URL to switch server, 'probe' to re-check, 'status' for counters");
    control(BufReader::new(tokio::io::stdin()), &session, &stats, || consumer.is_finished()).await?;

    shutdown.store(true, Ordering::Relaxed);
    let stats = tokio::task::spawn_blocking(move || {
        join_capture(producer);
        consumer.join()
    })
    .await?
    .map_err(|_| eyre!("pipeline thread panicked"))?;

    info!(?stats, "Uplink shutting down");
    Ok(())
}

/// Serve operator commands from `input` until ctrl-c or until `finished` reports
/// the pipeline is done. Closing `input` only disables commands.
async fn control<R>(input: R, session: &Session, stats: &PipelineStats, finished: impl Fn() -> bool) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    let mut input_open = true;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                return Ok(());
            }
            _ = tokio::time::sleep(Duration::from_millis(250)) => {}
            line = lines.next_line(), if input_open => match line? {
                // Detached (daemon, `</dev/null`): keep running without commands
                None => {
                    info!("stdin closed, commands disabled");
                    input_open = false;
                }
                Some(line) => command(line.trim(), session, stats),
            },
        }

        if finished() {
            return Ok(());
        }
    }
}

fn command(line: &str, session: &Session, stats: &PipelineStats) {
    match line {
        "" => {}
        "probe" => {
            session.probe();
        }
        "status" => {
            let snapshot = stats.snapshot();
            info!(
                connected = session.connected(),
                endpoint = %session.endpoint(),
                ?snapshot,
                "Status"
            );
        }
        url => {
            if let Err(e) = session.reconfigure(url) {
                warn!("Reconfiguration rejected: {}", e);
            }
        }
    }
}

fn produce(mut source: Box<dyn FrameSource + Send>, tx: capture::FrameSender, shutdown: &AtomicBool) {
    while !shutdown.load(Ordering::Relaxed) {
        match source.next_frame() {
            Ok(Some(frame)) => {
                tx.offer(frame);
            }
            Ok(None) => break,
            Err(e) => {
                error!("Capture error: {}", e);
                thread::sleep(Duration::from_millis(10));
            }
        }
    }
}

/// Wait for the capture thread, reporting whether it exited cleanly
fn join_capture(producer: thread::JoinHandle<()>) -> bool {
    match producer.join() {
        Ok(()) => true,
        Err(_) => {
            error!("Capture thread panicked");
            false
        }
    }
}

fn open_source(args: &Args, config: &Config) -> Result<Box<dyn FrameSource + Send>> {
    let settings = &config.capture;
    match args.source {
        SourceKind::Synthetic => {
            let mut source = TestPatternSource::new(settings.width, settings.height, settings.fps);
            if let Some(frames) = args.frames {
                source = source.with_limit(frames);
            }
            Ok(Box::new(source))
        }
        #[cfg(feature = "v4l2")]
        SourceKind::V4l2 => {
            let mut capture_config = settings.clone();
            if capture_config.device.is_empty() {
                capture_config.device = capture::v4l2::auto_detect_device()
                    .ok_or_else(|| eyre!("No suitable capture device found"))?;
            }
            let mut camera = capture::V4l2Capture::new(capture_config)?;
            camera.start_stream()?;
            match args.frames {
                Some(frames) => Ok(Box::new(Limited { inner: camera, left: frames })),
                None => Ok(Box::new(camera)),
            }
        }
        #[cfg(not(feature = "v4l2"))]
        SourceKind::V4l2 => Err(eyre!("built without the `v4l2` feature")),
    }
}

#[cfg(feature = "v4l2")]
struct Limited<S> {
    inner: S,
    left: u64,
}

#[cfg(feature = "v4l2")]
impl<S: FrameSource> FrameSource for Limited<S> {
    fn next_frame(&mut self) -> std::result::Result<Option<uplink::Frame>, capture::CaptureError> {
        if self.left == 0 {
            return Ok(None);
        }
        self.left -= 1;
        self.inner.next_frame()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;
    use uplink::upload::transport::SendFuture;
    use uplink::upload::{Request, Transport};

    struct Answer;

    impl Transport for Answer {
        fn send(&self, _request: Request) -> SendFuture<'_> {
            Box::pin(async { Ok(reqwest::StatusCode::OK) })
        }
    }

    fn session() -> Session {
        let url = url::Url::parse(uplink::DEFAULT_ENDPOINT).unwrap();
        Session::new(Config::default(), url, Arc::new(Answer), tokio::runtime::Handle::current())
    }

    #[test]
    fn synthetic_source_runs_at_configured_rate() {
        let args = Args::parse_from(["uplink", "--frames", "3"]);
        let mut config = Config::default();
        config.capture.fps = 5;
        config.capture.width = 16;
        config.capture.height = 16;

        let mut source = open_source(&args, &config).unwrap();
        let start = std::time::Instant::now();
        let mut frames = 0;
        while let Some(_frame) = source.next_frame().unwrap() {
            frames += 1;
        }
        assert_eq!(frames, 3);
        // Two 200 ms intervals between three frames
        assert!(start.elapsed() >= Duration::from_millis(400));
    }

    #[test]
    fn capture_panic_is_reported() {
        let clean = thread::spawn(|| {});
        assert!(join_capture(clean));

        let crashed = thread::spawn(|| panic!("camera vanished"));
        assert!(!join_capture(crashed));
    }

    #[tokio::test(start_paused = true)]
    async fn closed_input_keeps_running_until_pipeline_finishes() {
        let session = session();
        let stats = PipelineStats::new();
        let deadline = Instant::now() + Duration::from_secs(5);

        control(&b""[..], &session, &stats, || Instant::now() >= deadline)
            .await
            .unwrap();
        assert!(Instant::now() >= deadline);
    }

    #[tokio::test(start_paused = true)]
    async fn endpoint_line_reconfigures() {
        let session = session();
        let stats = PipelineStats::new();
        let input = &b"status\nhttp://10.0.0.9:5000/video_feed\nnot a url\n"[..];
        let deadline = Instant::now() + Duration::from_secs(1);

        control(input, &session, &stats, || Instant::now() >= deadline)
            .await
            .unwrap();
        assert_eq!(session.endpoint().as_str(), "http://10.0.0.9:5000/video_feed");
    }
}
