//! Frame-processing loop: wrap, dewarp, recognize, report
//!
//! The live variant pulls frames from a capture source as a video stream and
//! resets the session after each successful scan. The still variant
//! recognizes a single image file.

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

use recognizer_api::{
    BarrelDewarper, Callbacks, Detection, FrameMode, Image, RawLayout, Recognizer, ResultList,
    ShowImageType,
};
use recognizer_capture::{CapturedFrame, FrameSource};

use crate::config::Config;
use crate::console::{self, ScanReport};

const MAX_CONSECUTIVE_ERRORS: u32 = 10;
const PROGRESS_LOG_INTERVAL: u64 = 100;

/// Loop behaviour taken from the configuration
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub fps: f64,
    pub reset_after_result: bool,
    pub save_dir: Option<PathBuf>,
    pub max_frames: Option<u64>,
    pub json: bool,
}

impl ScanOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            fps: config.capture.fps,
            reset_after_result: config.live.reset_after_result,
            save_dir: config.live.save_dir.clone(),
            max_frames: config.live.max_frames,
            json: false,
        }
    }
}

/// Outcome of one processed frame
pub struct FrameOutcome {
    pub report: ScanReport,
    /// Image of a successful scan: the engine's dewarped crop when it showed
    /// one, the corrected frame otherwise
    pub scan_image: Option<Image<'static>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveSummary {
    pub frames: u64,
    pub successful_scans: u64,
    pub errors: u64,
}

pub struct Scanner {
    recognizer: Recognizer,
    dewarper: BarrelDewarper,
    options: ScanOptions,
}

impl Scanner {
    pub fn new(recognizer: Recognizer, dewarper: BarrelDewarper, options: ScanOptions) -> Self {
        Self {
            recognizer,
            dewarper,
            options,
        }
    }

    pub fn recognizer(&self) -> &Recognizer {
        &self.recognizer
    }

    /// Recognize a loaded image file as an independent still
    pub fn scan_still(&mut self, path: &Path, image: Image<'static>) -> Result<FrameOutcome> {
        info!(
            "scanning {:?} ({}x{} {})",
            path,
            image.width(),
            image.height(),
            image.layout().as_str()
        );

        let (list, shown) = self.recognize(&image, FrameMode::Still)?;
        let report = ScanReport {
            source: path.display().to_string(),
            frame: 0,
            timestamp: Utc::now(),
            results: list.into_iter().collect(),
        };
        let scan_image = if report.valid_count() > 0 {
            Some(shown.unwrap_or_else(|| image.into_owned()))
        } else {
            None
        };

        if let (Some(dir), Some(scan)) = (&self.options.save_dir, &scan_image) {
            save_scan(dir, 0, scan)?;
        }
        Ok(FrameOutcome { report, scan_image })
    }

    /// Wrap a captured frame, correct it and recognize it as part of a stream
    pub fn process_frame(&mut self, frame: &CapturedFrame) -> Result<FrameOutcome> {
        let layout = RawLayout::from_channels(frame.channels as u32)
            .ok_or_else(|| anyhow!("unsupported frame with {} channels", frame.channels))?;
        let image = Image::from_raw(&frame.data, frame.width, frame.height, frame.stride, layout)?;
        let corrected = self.dewarper.dewarp(&image)?;
        trace!(
            "frame {} corrected to {}x{}",
            frame.sequence,
            corrected.width(),
            corrected.height()
        );

        let (list, shown) = self.recognize(&corrected, FrameMode::Video)?;
        let report = ScanReport {
            source: "live".to_string(),
            frame: frame.sequence,
            timestamp: frame.timestamp,
            results: list.into_iter().collect(),
        };

        if report.valid_count() == 0 {
            return Ok(FrameOutcome {
                report,
                scan_image: None,
            });
        }

        let scan_image = shown.unwrap_or(corrected);
        if let Some(dir) = &self.options.save_dir {
            save_scan(dir, frame.sequence, &scan_image)?;
        }
        if self.options.reset_after_result {
            self.recognizer.reset()?;
        }
        Ok(FrameOutcome {
            report,
            scan_image: Some(scan_image),
        })
    }

    /// Run the live loop until interrupted, the source ends or the frame limit
    pub fn run_live(
        &mut self,
        source: &mut dyn FrameSource,
        running: Arc<AtomicBool>,
    ) -> Result<LiveSummary> {
        info!(
            "starting live scan of {} at {} FPS",
            source.describe(),
            self.options.fps
        );

        let frame_interval = Duration::from_secs_f64(1.0 / self.options.fps.max(0.1));
        let mut last_frame = Instant::now();
        let mut summary = LiveSummary::default();
        let mut consecutive_errors = 0u32;

        while running.load(Ordering::SeqCst) {
            if let Some(max) = self.options.max_frames {
                if summary.frames >= max {
                    info!("reached frame limit of {}", max);
                    break;
                }
            }

            let elapsed = last_frame.elapsed();
            if elapsed < frame_interval {
                std::thread::sleep(frame_interval - elapsed);
            }
            last_frame = Instant::now();

            let result = match source.next_frame() {
                Ok(Some(frame)) => self.process_frame(&frame),
                Ok(None) => {
                    info!("capture source exhausted");
                    break;
                }
                Err(e) => Err(anyhow!(e).context("failed to read frame")),
            };

            match result {
                Ok(outcome) => {
                    consecutive_errors = 0;
                    summary.frames += 1;
                    if outcome.scan_image.is_some() {
                        summary.successful_scans += 1;
                        console::print_report(&outcome.report, self.options.json)?;
                    }
                }
                Err(e) => {
                    error!("frame error: {:#}", e);
                    summary.errors += 1;
                    consecutive_errors += 1;
                    if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                        return Err(e.context("too many consecutive frame errors"));
                    }
                }
            }

            if summary.frames > 0 && summary.frames % PROGRESS_LOG_INTERVAL == 0 {
                info!(
                    "processed {} frames, {} successful scans",
                    summary.frames, summary.successful_scans
                );
            }
        }

        info!(
            "live scan stopped. frames: {}, successful scans: {}, errors: {}",
            summary.frames, summary.successful_scans, summary.errors
        );
        Ok(summary)
    }

    /// Recognize with logging callbacks, keeping a copy of the engine's
    /// dewarped crop
    fn recognize(
        &mut self,
        image: &Image<'_>,
        mode: FrameMode,
    ) -> Result<(ResultList, Option<Image<'static>>)> {
        let mut shown: Option<Image<'static>> = None;
        let list = {
            let mut callbacks = Callbacks::new()
                .on_detected_object(|detection: &Detection| {
                    debug!(
                        "detected object ({} points): {}",
                        detection.points.len(),
                        detection.status.description()
                    );
                    true
                })
                .on_detection_failed(|| trace!("nothing detected"))
                .on_show_image(|img, kind, name| {
                    if kind == ShowImageType::Dewarped {
                        debug!("engine showed dewarped image '{}'", name);
                        shown = Some(img.to_owned_image());
                    }
                });
            self.recognizer.recognize(image, mode, Some(&mut callbacks))?
        };
        Ok((list, shown))
    }
}

/// Decode the image file given to the still variant
pub fn load_still(path: &Path) -> Result<Image<'static>> {
    Image::from_file(path).with_context(|| format!("failed to load {:?}", path))
}

/// Write a scan image as `scan_<frame>_<time>.png`
fn save_scan(dir: &Path, frame: u64, image: &Image<'_>) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).with_context(|| format!("failed to create {:?}", dir))?;
    let name = format!("scan_{:06}_{}.png", frame, Utc::now().format("%H-%M-%S"));
    let path = dir.join(name);
    image
        .to_rgba_image()
        .save(&path)
        .with_context(|| format!("failed to save {:?}", path))?;
    debug!("saved scan to {:?}", path);
    Ok(path)
}

/// Create a scanner from configuration; any failure here is a setup failure
pub fn build_scanner(config: &Config, options: ScanOptions) -> Result<Scanner> {
    let settings = config.to_settings()?;
    let backend = config.backend()?;
    let recognizer =
        Recognizer::create(&settings, &backend).context("failed to create recognizer")?;
    let dewarper = config.dewarper()?;
    if dewarper.coefficients().is_identity() {
        warn!("lens correction disabled");
    }
    Ok(Scanner::new(recognizer, dewarper, options))
}
