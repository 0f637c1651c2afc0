//! textcam: live camera text recognition in the terminal

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use color_eyre::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

use textcam::capture::{FrameSource, SyntheticSource};
use textcam::recognition::TesseractRecognizer;
use textcam::sink::ChannelSink;
use textcam::{utils, CaptureBackend, Config, PipelineController, PipelineState};

/// Results buffered between the worker and the terminal
const RESULT_BACKLOG: usize = 8;

#[derive(Debug, Parser)]
#[command(version, about = "Recognize text from a live camera feed")]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Start recognizing immediately instead of waiting for Enter
    #[arg(long)]
    autostart: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    utils::init_tracing("textcam=info");

    let args = Args::parse();
    info!("textcam launching...");

    let config = Config::load(args.config.as_deref())?;
    info!("Capture backend: {:?}", config.capture.backend);

    match config.capture.backend {
        CaptureBackend::Synthetic => {
            let source = SyntheticSource::new(config.capture.clone());
            run(source, config, args.autostart).await
        }
        #[cfg(feature = "v4l2")]
        CaptureBackend::V4l2 => {
            let source = textcam::capture::V4l2Source::new(config.capture.clone());
            run(source, config, args.autostart).await
        }
        #[cfg(not(feature = "v4l2"))]
        CaptureBackend::V4l2 => Err(color_eyre::eyre::eyre!(
            "the v4l2 capture backend requires building with `--features v4l2`"
        )),
    }
}

async fn run<S: FrameSource>(source: S, config: Config, autostart: bool) -> Result<()> {
    let recognizer = TesseractRecognizer::new(config.recognition.clone());
    let (sink, results) = ChannelSink::bounded(RESULT_BACKLOG);
    let mut controller = PipelineController::new(
        source,
        recognizer,
        Arc::new(sink),
        config.recognition.timeout(),
    );
    let faults = controller.faults();

    if autostart {
        if let Err(e) = controller.start() {
            error!("Could not start recognition: {}", e);
        }
    }
    info!("Press Enter to toggle recognition, Ctrl-C to quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stats_tick = tokio::time::interval(config.pipeline.stats_interval());
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Interrupted");
                break;
            }
            line = lines.next_line() => match line? {
                Some(_) => match controller.toggle().await {
                    Ok(state) => info!("Recognition {}", match state {
                        PipelineState::Running => "started",
                        PipelineState::Stopped => "stopped",
                    }),
                    // Camera refused to start; stay stopped, Enter retries
                    Err(e) => error!("Could not start recognition: {}", e),
                },
                None => break,
            },
            Ok(result) = results.recv_async() => {
                if result.is_failure() {
                    warn!("{result}");
                } else {
                    println!("{result}");
                }
            }
            Ok(fault) = faults.recv_async() => {
                warn!("Camera fault: {}", fault);
            }
            _ = stats_tick.tick() => {
                if controller.state() == PipelineState::Running {
                    let stats = controller.stats();
                    info!(
                        captured = stats.captured,
                        dropped = stats.dropped,
                        recognized = stats.recognized,
                        empty = stats.empty,
                        failed = stats.failed,
                        "Pipeline stats ({:.0}% dropped)",
                        stats.drop_ratio() * 100.0
                    );
                }
            }
        }
    }

    controller.stop().await;
    info!("textcam shutting down");
    Ok(())
}
