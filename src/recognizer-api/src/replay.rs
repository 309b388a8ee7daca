//! Scripted recognition engine.
//!
//! A [`ReplayScript`] lists, frame by frame, what the engine "sees": the
//! detection outcome, the progress it reports and the results it returns.
//! Scripts are JSON documents:
//!
//! ```json
//! {
//!   "license": { "licensee": "Demo Licensee", "key": "ABCD-1234" },
//!   "repeat": false,
//!   "frames": [
//!     { "detection": null },
//!     {
//!       "detection": { "status": "success", "points": [{"x": 10, "y": 10}, {"x": 200, "y": 120}] },
//!       "progress": [20, 60, 100],
//!       "results": [{ "valid": true, "payload": { "barcode": { "barcode_type": "qr_code", "text": "hello" } } }]
//!     }
//!   ]
//! }
//! ```
//!
//! Every recognize call consumes one frame. The frame cursor and the count of
//! accumulated video frames are cleared by `reset`.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::callback::{
    CallbackEvent, Detection, DetectionStatus, Events, Point, ShowImageType, Size,
};
use crate::engine::{Backend, Engine, FrameMode};
use crate::error::{RecognizerError, Result};
use crate::raw_image::{Image, RawLayout};
use crate::result::{ResultEntry, ResultKind};
use crate::settings::Settings;

/// License the scripted engine accepts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptedLicense {
    pub licensee: String,
    pub key: String,
    #[serde(default)]
    pub expired: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptedDetection {
    pub status: DetectionStatus,
    #[serde(default)]
    pub points: Vec<Point>,
}

/// What the engine reports for one frame; no detection means detection failed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayFrame {
    pub detection: Option<ScriptedDetection>,
    pub progress: Vec<u8>,
    pub results: Vec<ResultEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayScript {
    pub license: Option<ScriptedLicense>,
    pub frames: Vec<ReplayFrame>,
    /// Start over after the last frame instead of failing detection
    pub repeat: bool,
}

impl ReplayScript {
    /// Script that never detects anything
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| RecognizerError::io(path, e))?;
        let script = Self::from_json(&json)?;
        info!("loaded replay script {:?} with {} frames", path, script.frames.len());
        Ok(script)
    }
}

/// Backend producing [`ReplayEngine`]s that share one script
#[derive(Debug, Clone)]
pub struct ReplayBackend {
    script: Arc<ReplayScript>,
}

impl ReplayBackend {
    pub fn new(script: ReplayScript) -> Self {
        Self {
            script: Arc::new(script),
        }
    }

    pub fn script(&self) -> &ReplayScript {
        &self.script
    }

    fn check_license(&self, settings: &Settings) -> Result<()> {
        let Some(expected) = &self.script.license else {
            return Ok(());
        };
        let Some(license) = &settings.license else {
            return Err(RecognizerError::License("no license key was set".to_string()));
        };
        if license.licensee != expected.licensee || license.key != expected.key {
            return Err(RecognizerError::License(format!(
                "license key is not valid for licensee '{}'",
                license.licensee
            )));
        }
        if expected.expired {
            return Err(RecognizerError::License("license has expired".to_string()));
        }
        Ok(())
    }
}

impl Backend for ReplayBackend {
    fn name(&self) -> &str {
        "replay"
    }

    fn create_engine(&self, settings: &Settings) -> Result<Box<dyn Engine>> {
        self.check_license(settings)?;
        let processors = settings.device_info.unwrap_or_default().processors;
        debug!("replay engine using up to {} worker threads", processors);

        Ok(Box::new(ReplayEngine::new(self.script.clone(), settings)))
    }
}

/// Which result kinds the session settings allow
#[derive(Debug, Clone, Copy)]
struct Recognizers {
    mrtd: bool,
    usdl: bool,
    barcode: bool,
}

impl Recognizers {
    fn from_settings(settings: &Settings) -> Self {
        Self {
            mrtd: settings.mrtd.is_some(),
            usdl: settings.usdl.is_some(),
            barcode: settings.pdf417.is_some()
                || settings.zxing.is_some()
                || settings.bar_decoder.is_some(),
        }
    }

    fn allows(&self, kind: ResultKind) -> bool {
        match kind {
            ResultKind::Mrtd => self.mrtd,
            ResultKind::Usdl => self.usdl,
            ResultKind::Barcode => self.barcode,
            ResultKind::Invalid => true,
        }
    }
}

pub struct ReplayEngine {
    script: Arc<ReplayScript>,
    cursor: usize,
    accumulated: usize,
    recognizers: Recognizers,
}

impl ReplayEngine {
    fn new(script: Arc<ReplayScript>, settings: &Settings) -> Self {
        Self {
            script,
            cursor: 0,
            accumulated: 0,
            recognizers: Recognizers::from_settings(settings),
        }
    }

    /// Video frames seen since the last reset
    pub fn accumulated_frames(&self) -> usize {
        self.accumulated
    }

    fn next_frame(&mut self) -> Option<&ReplayFrame> {
        let frames = &self.script.frames;
        if frames.is_empty() {
            return None;
        }
        if self.cursor >= frames.len() {
            if !self.script.repeat {
                return None;
            }
            self.cursor = 0;
        }
        let frame = frames.get(self.cursor);
        self.cursor += 1;
        frame
    }
}

impl Engine for ReplayEngine {
    fn recognize(
        &mut self,
        image: &Image<'_>,
        mode: FrameMode,
        events: &mut Events<'_, '_>,
    ) -> Result<Vec<ResultEntry>> {
        if mode.is_video() {
            self.accumulated += 1;
        }
        let recognizers = self.recognizers;
        let size = Size {
            width: image.width(),
            height: image.height(),
        };

        events.detection_started();
        let Some(frame) = self.next_frame().cloned() else {
            events.detection_failed();
            return Ok(Vec::new());
        };
        let Some(scripted) = frame.detection else {
            events.detection_failed();
            return Ok(Vec::new());
        };

        let detection = Detection {
            points: scripted.points,
            image_size: size,
            status: scripted.status,
        };
        if !events.detected_object(&detection) || detection.status != DetectionStatus::Success {
            return Ok(Vec::new());
        }

        events.recognition_started();
        if events.is_registered(CallbackEvent::ShowImage) {
            if let Some(crop) = crop_to_points(image, &detection.points)? {
                events.show_image(&crop, ShowImageType::Dewarped, "document");
            }
        }

        for percent in frame.progress {
            if events.should_stop() {
                debug!("replay stopped at {}%", percent);
                events.recognition_finished();
                return Ok(Vec::new());
            }
            events.progress(percent);
        }
        events.recognition_finished();

        let total = frame.results.len();
        let results: Vec<ResultEntry> = frame
            .results
            .into_iter()
            .filter(|r| recognizers.allows(r.kind()))
            .collect();
        if results.len() < total {
            warn!(
                "dropped {} scripted results for disabled recognizers",
                total - results.len()
            );
        }
        Ok(results)
    }

    fn reset(&mut self) {
        debug!(
            "replay engine reset after {} frames ({} accumulated)",
            self.cursor, self.accumulated
        );
        self.cursor = 0;
        self.accumulated = 0;
    }

    fn release(&mut self) {
        debug!("replay engine released");
    }
}

/// Copy the bounding box of `points` out of `image`
fn crop_to_points(image: &Image<'_>, points: &[Point]) -> Result<Option<Image<'static>>> {
    if points.is_empty() {
        return Ok(None);
    }
    let clamp_x = |v: i32| v.clamp(0, image.width() as i32) as u32;
    let clamp_y = |v: i32| v.clamp(0, image.height() as i32) as u32;

    let mut x0 = points.iter().map(|p| clamp_x(p.x)).min().unwrap_or(0);
    let mut y0 = points.iter().map(|p| clamp_y(p.y)).min().unwrap_or(0);
    let mut x1 = points.iter().map(|p| clamp_x(p.x)).max().unwrap_or(0);
    let mut y1 = points.iter().map(|p| clamp_y(p.y)).max().unwrap_or(0);

    let layout = image.layout();
    if layout == RawLayout::Nv21 {
        x0 &= !1;
        y0 &= !1;
        x1 &= !1;
        y1 &= !1;
    }
    if x1 <= x0 || y1 <= y0 {
        return Ok(None);
    }

    let (width, height) = (x1 - x0, y1 - y0);
    let bpp = layout.bytes_per_pixel();
    let row_bytes = layout.min_stride(width);
    let mut data = Vec::with_capacity(row_bytes * layout.buffer_rows(height));

    for y in y0..y1 {
        let row = image.buffer_row(y as usize);
        let start = x0 as usize * bpp;
        data.extend_from_slice(&row[start..start + row_bytes]);
    }
    if layout == RawLayout::Nv21 {
        // interleaved VU rows below the luma plane, one per two luma rows
        let luma_rows = image.height() as usize;
        for y in (y0 / 2)..(y1 / 2) {
            let row = image.buffer_row(luma_rows + y as usize);
            let start = x0 as usize;
            data.extend_from_slice(&row[start..start + width as usize]);
        }
    }

    Image::derived(data, width, height, row_bytes, layout).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::Callbacks;
    use crate::result::{BarcodeData, BarcodeType, ResultPayload};
    use crate::settings::{License, ZxingSettings};

    const SCRIPT: &str = r#"{
        "frames": [
            { "detection": null },
            {
                "detection": { "status": "success", "points": [{"x": 2, "y": 2}, {"x": 6, "y": 5}] },
                "progress": [30, 100],
                "results": [
                    { "valid": true, "payload": { "barcode": { "barcode_type": "qr_code", "text": "hello" } } },
                    { "valid": true, "payload": { "mrtd": { "document_code": "P" } } }
                ]
            }
        ]
    }"#;

    fn settings() -> Settings {
        let mut settings = Settings::new();
        settings.set_license("Demo Licensee", "ABCD-1234").set_zxing(Some(ZxingSettings {
            scan_qr_code: true,
            ..Default::default()
        }));
        settings
    }

    fn engine(script: ReplayScript) -> Box<dyn Engine> {
        ReplayBackend::new(script).create_engine(&settings()).unwrap()
    }

    #[test]
    fn test_frames_play_in_order() {
        let mut engine = engine(ReplayScript::from_json(SCRIPT).unwrap());
        let pixels = vec![7u8; 8 * 8];
        let image = Image::from_raw(&pixels, 8, 8, 8, RawLayout::Gray).unwrap();

        let first = engine
            .recognize(&image, FrameMode::Video, &mut Events::silent())
            .unwrap();
        assert!(first.is_empty());

        let mut shown = Vec::new();
        let mut progress = Vec::new();
        let second = {
            let mut callbacks = Callbacks::new()
                .on_show_image(|img, kind, name| {
                    shown.push((img.width(), img.height(), kind, name.to_string()))
                })
                .on_progress(|p| progress.push(p));
            let mut events = Events::new(Some(&mut callbacks));
            engine.recognize(&image, FrameMode::Video, &mut events).unwrap()
        };

        // mrtd result dropped: recognizer not enabled
        assert_eq!(second.len(), 1);
        assert_eq!(
            second[0].payload,
            ResultPayload::Barcode(BarcodeData {
                barcode_type: BarcodeType::QrCode,
                text: "hello".to_string(),
                raw: Vec::new(),
                uncertain: false,
            })
        );
        assert_eq!(shown, vec![(4, 3, ShowImageType::Dewarped, "document".to_string())]);
        assert_eq!(progress, vec![30, 100]);

        let exhausted = engine
            .recognize(&image, FrameMode::Video, &mut Events::silent())
            .unwrap();
        assert!(exhausted.is_empty());
    }

    #[test]
    fn test_reset_rewinds_cursor() {
        let mut script = ReplayScript::from_json(SCRIPT).unwrap();
        script.frames.swap(0, 1);
        let mut engine = engine(script);
        let pixels = vec![7u8; 8 * 8];
        let image = Image::from_raw(&pixels, 8, 8, 8, RawLayout::Gray).unwrap();

        let first = engine
            .recognize(&image, FrameMode::Video, &mut Events::silent())
            .unwrap();
        assert_eq!(first.len(), 1);
        engine.reset();
        let again = engine
            .recognize(&image, FrameMode::Video, &mut Events::silent())
            .unwrap();
        assert_eq!(again, first);
    }

    #[test]
    fn test_stop_request_cancels() {
        let mut script = ReplayScript::from_json(SCRIPT).unwrap();
        script.repeat = true;
        script.frames.remove(0);
        let mut engine = engine(script);
        let pixels = vec![7u8; 8 * 8];
        let image = Image::from_raw(&pixels, 8, 8, 8, RawLayout::Gray).unwrap();

        let mut finished = false;
        let results = {
            let mut callbacks = Callbacks::new()
                .on_should_stop_recognition(|| true)
                .on_recognition_finished(|| finished = true);
            let mut events = Events::new(Some(&mut callbacks));
            engine.recognize(&image, FrameMode::Still, &mut events).unwrap()
        };
        assert!(results.is_empty());
        assert!(finished);
    }

    #[test]
    fn test_license_check() {
        let script = ReplayScript {
            license: Some(ScriptedLicense {
                licensee: "Demo Licensee".to_string(),
                key: "ABCD-1234".to_string(),
                expired: false,
            }),
            ..Default::default()
        };
        let backend = ReplayBackend::new(script);
        assert!(backend.create_engine(&settings()).is_ok());

        let mut wrong = settings();
        wrong.license = Some(License::new("Demo Licensee", "WXYZ-0000"));
        let err = backend.create_engine(&wrong).err().unwrap();
        assert_eq!(err.status(), crate::error::Status::LicenseError);
    }

    #[test]
    fn test_only_video_frames_accumulate() {
        let mut script = ReplayScript::from_json(SCRIPT).unwrap();
        script.repeat = true;
        let mut engine = ReplayEngine::new(Arc::new(script), &settings());
        let pixels = vec![7u8; 8 * 8];
        let image = Image::from_raw(&pixels, 8, 8, 8, RawLayout::Gray).unwrap();

        engine
            .recognize(&image, FrameMode::Still, &mut Events::silent())
            .unwrap();
        assert_eq!(engine.accumulated_frames(), 0);

        for _ in 0..3 {
            engine
                .recognize(&image, FrameMode::Video, &mut Events::silent())
                .unwrap();
        }
        assert_eq!(engine.accumulated_frames(), 3);

        engine.reset();
        assert_eq!(engine.accumulated_frames(), 0);
        // cursor rewound as well: the first scripted frame detects nothing
        let first = engine
            .recognize(&image, FrameMode::Video, &mut Events::silent())
            .unwrap();
        assert!(first.is_empty());
        assert_eq!(engine.accumulated_frames(), 1);
    }

    #[test]
    fn test_hooks_do_not_change_results() {
        let pixels = vec![7u8; 8 * 8];
        let image = Image::from_raw(&pixels, 8, 8, 8, RawLayout::Gray).unwrap();

        let mut bare = engine(ReplayScript::from_json(SCRIPT).unwrap());
        let bare_results: Vec<_> = (0..3)
            .map(|_| {
                bare.recognize(&image, FrameMode::Video, &mut Events::silent())
                    .unwrap()
            })
            .collect();

        let mut hooked = engine(ReplayScript::from_json(SCRIPT).unwrap());
        let mut calls = 0;
        let hooked_results: Vec<_> = {
            let mut callbacks = Callbacks::new()
                .on_detection_started(|| calls += 1)
                .on_detected_object(|_| true)
                .on_detection_failed(|| {})
                .on_recognition_started(|| {})
                .on_progress(|_| {})
                .on_show_image(|_, _, _| {})
                .on_should_stop_recognition(|| false)
                .on_recognition_finished(|| {});
            (0..3)
                .map(|_| {
                    let mut events = Events::new(Some(&mut callbacks));
                    hooked.recognize(&image, FrameMode::Video, &mut events).unwrap()
                })
                .collect()
        };

        assert_eq!(calls, 3);
        assert_eq!(bare_results, hooked_results);
        assert_eq!(bare_results[1].len(), 1);
    }

    #[test]
    fn test_malformed_script() {
        let err = ReplayScript::from_json("{ \"frames\": 3 }").unwrap_err();
        assert_eq!(err.status(), crate::error::Status::ConfigError);
    }

    #[test]
    fn test_crop_nv21_keeps_even_dims() {
        let pixels = vec![16u8; 8 * 12];
        let image = Image::from_raw(&pixels, 8, 8, 8, RawLayout::Nv21).unwrap();
        let crop = crop_to_points(&image, &[Point { x: 1, y: 1 }, Point { x: 7, y: 6 }])
            .unwrap()
            .unwrap();
        assert_eq!((crop.width(), crop.height()), (6, 6));
        assert_eq!(crop.bytes().len(), 6 * 9);
    }
}
