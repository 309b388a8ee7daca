//! Recognizer - document and barcode scanning CLI
//!
//! With an image argument the file is recognized once as a still. Without
//! one, frames are read from the configured capture source until Ctrl+C.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};

use recognizer_api::Image;
use recognizer_capture::{open_source, FrameSource};
use recognizer_core::colored_logger::{init_component_logger, Component};
use recognizer_core::config::Config;
use recognizer_core::console;
use recognizer_core::scanner::{build_scanner, load_still, ScanOptions, Scanner};

/// Process status for setup failures (-1 as a status byte)
const SETUP_FAILURE: u8 = 255;

#[derive(Parser)]
#[command(name = "recognizer")]
#[command(about = "Recognize travel documents, driver's licenses and barcodes")]
#[command(version)]
struct Cli {
    /// Image to recognize once; omit to scan the capture source continuously
    image: Option<PathBuf>,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    /// Replay script driving the engine (overrides the config)
    #[arg(long)]
    script: Option<PathBuf>,

    /// Directory receiving a PNG of every successful scan
    #[arg(long)]
    save_dir: Option<PathBuf>,
}

/// What to scan, resolved during setup
enum Input {
    Still(PathBuf, Image<'static>),
    Live(Box<dyn FrameSource>),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let component = if cli.image.is_some() {
        Component::Still
    } else {
        Component::Live
    };
    if let Err(e) = init_component_logger(component, cli.verbose) {
        eprintln!("failed to initialize logging: {}", e);
    }

    let (mut scanner, input) = match setup(&cli) {
        Ok(ready) => ready,
        Err(e) => {
            error!("setup failed: {:#}", e);
            return ExitCode::from(SETUP_FAILURE);
        }
    };

    let outcome = match input {
        Input::Still(path, image) => cmd_still(&mut scanner, &path, image, cli.json),
        Input::Live(mut source) => cmd_live(&mut scanner, source.as_mut()),
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn setup(cli: &Cli) -> Result<(Scanner, Input)> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(script) = &cli.script {
        config.engine.script = Some(script.clone());
    }
    if let Some(dir) = &cli.save_dir {
        config.live.save_dir = Some(dir.clone());
    }

    let input = match &cli.image {
        Some(path) => Input::Still(path.clone(), load_still(path)?),
        None => Input::Live(
            open_source(&config.capture.source, config.capture.looping)
                .with_context(|| format!("failed to open capture source {:?}", config.capture.source))?,
        ),
    };

    let mut options = ScanOptions::from_config(&config);
    options.json = cli.json;
    info!("enabled recognizers: {:?}", config.recognizers.enabled);

    let scanner = build_scanner(&config, options)?;
    info!(
        "recognizer ready on '{}' backend",
        scanner.recognizer().backend_name()
    );
    Ok((scanner, input))
}

fn cmd_still(scanner: &mut Scanner, path: &Path, image: Image<'static>, json: bool) -> Result<()> {
    let outcome = scanner.scan_still(path, image)?;
    console::print_report(&outcome.report, json)?;
    Ok(())
}

fn cmd_live(scanner: &mut Scanner, source: &mut dyn FrameSource) -> Result<()> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        info!("received shutdown signal");
        r.store(false, Ordering::SeqCst);
    })?;

    let summary = scanner.run_live(source, running)?;
    info!(
        "scanned {} frames with {} successful scans",
        summary.frames, summary.successful_scans
    );
    Ok(())
}
