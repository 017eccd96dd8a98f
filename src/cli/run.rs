use std::{
    error::Error,
    fs::File,
    io::{self, BufWriter, Write},
    path::PathBuf,
};

use clap::ValueEnum;

use crate::{
    capture::CaptureWriter,
    cli::ConfigArgs,
    input::{
        actor::CaptureSink,
        dispatch::sink::{InjectionSink, JsonLinesSink, LogSink},
        engine::Engine,
        pipeline::Pipeline,
        source::{
            hidraw::{HidRawDevice, HidRawSource},
            ReportDevice,
        },
        Side,
    },
};

#[derive(clap::Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
    /// Hidraw device of the left trackpad, e.g. /dev/hidraw3
    #[arg(long)]
    pub left: Option<String>,
    /// Hidraw device of the right trackpad
    #[arg(long)]
    pub right: Option<String>,
    /// Further hidraw devices. Their side comes from the configuration.
    pub devices: Vec<String>,
    /// Record every raw report to the given capture file
    #[arg(long)]
    pub capture: Option<PathBuf>,
    /// How dispatch events are emitted
    #[arg(long, value_enum, default_value_t = OutputFormat::Log)]
    pub output: OutputFormat,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Log each event
    Log,
    /// Print each event as a JSON line on stdout
    Json,
}

/// An opened device waiting for its reader thread
struct OpenedDevice {
    path: String,
    side: Option<Side>,
    device: HidRawDevice,
}

pub async fn handle_run(args: RunArgs) -> Result<(), Box<dyn Error + Send + Sync>> {
    let (config, layout, keymap) = args.config.load()?;
    let engine = Engine::new(config, layout, keymap)?;

    let mut paths: Vec<(String, Option<Side>)> = Vec::new();
    if let Some(path) = args.left.as_ref() {
        paths.push((path.clone(), Some(Side::Left)));
    }
    if let Some(path) = args.right.as_ref() {
        paths.push((path.clone(), Some(Side::Right)));
    }
    paths.extend(args.devices.iter().map(|path| (path.clone(), None)));
    if paths.is_empty() {
        return Err("no devices given, use --left, --right or device paths".into());
    }

    let mut devices = Vec::with_capacity(paths.len());
    for (path, side) in paths {
        let side = side.or_else(|| engine.config().decoder.side_for(&path));
        if side.is_none() {
            log::warn!("No side configured for {path}, reports will be routed to the left side");
        }
        let device = HidRawDevice::open(&path)?;
        devices.push(OpenedDevice { path, side, device });
    }

    let capture = match args.capture.as_ref() {
        Some(path) => {
            let descriptor = |wanted: Side| {
                devices
                    .iter()
                    .find(|opened| opened.side == Some(wanted))
                    .map(|opened| opened.device.descriptor())
                    .unwrap_or_default()
            };
            let file: Box<dyn Write + Send> = Box::new(BufWriter::new(File::create(path)?));
            let capture: CaptureSink =
                CaptureWriter::new(file, descriptor(Side::Left), descriptor(Side::Right))?;
            log::info!("Capturing raw reports to {path:?}");
            Some(capture)
        }
        None => None,
    };

    match args.output {
        OutputFormat::Log => run_pipeline(engine, LogSink, capture, devices).await,
        OutputFormat::Json => {
            let sink = JsonLinesSink::new(io::stdout());
            run_pipeline(engine, sink, capture, devices).await
        }
    }
}

/// Run until interrupted, then stop the readers and drain the pipeline
async fn run_pipeline<S: InjectionSink>(
    engine: Engine,
    sink: S,
    capture: Option<CaptureSink>,
    devices: Vec<OpenedDevice>,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let pipeline = Pipeline::start(engine, sink, capture);
    let sources: Vec<HidRawSource> = devices
        .into_iter()
        .map(|opened| HidRawSource::start(&opened.path, opened.side, opened.device, pipeline.client()))
        .collect();

    tokio::signal::ctrl_c().await?;
    log::info!("Shutting down");

    for source in sources.iter() {
        source.stop();
    }
    for source in sources {
        let path = source.path().to_string();
        match source.join().await {
            Ok(count) => log::info!("Read {count} reports from {path}"),
            Err(e) => log::warn!("Reader for {path} failed: {e}"),
        }
    }

    let metrics = pipeline.shutdown().await;
    log::info!("Final metrics: {}", serde_json::to_string(&metrics)?);
    Ok(())
}
