//! Recognition session: owns an engine and drives one recognize call at a time

use tracing::{debug, info, warn};

use crate::callback::{Callbacks, Events};
use crate::engine::{Backend, Engine, FrameMode};
use crate::error::{RecognizerError, Result};
use crate::raw_image::Image;
use crate::result::{ResultEntry, ResultList};
use crate::settings::Settings;

/// Lifecycle state of a [`Recognizer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created or reset, nothing accumulated yet
    Created,
    /// At least one frame processed since the last reset
    Ready,
    /// A recognize call is in flight
    Recognizing,
    Destroyed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Created => "created",
            SessionState::Ready => "ready",
            SessionState::Recognizing => "recognizing",
            SessionState::Destroyed => "destroyed",
        }
    }
}

/// A recognition session created from a settings snapshot
pub struct Recognizer {
    engine: Box<dyn Engine>,
    backend: String,
    state: SessionState,
    output_multiple_results: bool,
    enabled: Vec<&'static str>,
    frames_processed: u64,
}

impl Recognizer {
    /// Validate the settings and build a session on the given backend.
    ///
    /// The settings are only read; changing them afterwards has no effect on
    /// the session.
    pub fn create(settings: &Settings, backend: &dyn Backend) -> Result<Self> {
        settings.validate()?;
        let engine = backend.create_engine(settings)?;
        let enabled = settings.enabled_recognizers();

        info!(
            "recognizer created on '{}' backend with {:?} (multiple results: {})",
            backend.name(),
            enabled,
            settings.output_multiple_results
        );

        Ok(Self {
            engine,
            backend: backend.name().to_string(),
            state: SessionState::Created,
            output_multiple_results: settings.output_multiple_results,
            enabled,
            frames_processed: 0,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn backend_name(&self) -> &str {
        &self.backend
    }

    pub fn enabled_recognizers(&self) -> &[&'static str] {
        &self.enabled
    }

    pub fn outputs_multiple_results(&self) -> bool {
        self.output_multiple_results
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }

    /// Recognize one frame.
    ///
    /// Success does not mean something was found: with multiple results
    /// disabled the list always holds exactly one entry, which is invalid
    /// when nothing usable was recognized.
    pub fn recognize(
        &mut self,
        image: &Image<'_>,
        mode: FrameMode,
        callbacks: Option<&mut Callbacks<'_>>,
    ) -> Result<ResultList> {
        match self.state {
            SessionState::Destroyed => {
                return Err(RecognizerError::InvalidState(
                    "recognize called on a destroyed session".to_string(),
                ));
            }
            SessionState::Recognizing => {
                return Err(RecognizerError::InvalidState(
                    "previous recognize call did not complete".to_string(),
                ));
            }
            SessionState::Created | SessionState::Ready => {}
        }

        self.state = SessionState::Recognizing;
        let mut events = Events::new(callbacks);
        let outcome = self.engine.recognize(image, mode, &mut events);
        events.finish();
        self.state = SessionState::Ready;
        self.frames_processed += 1;

        let mut entries = match outcome {
            Ok(entries) => entries,
            Err(e) => {
                warn!("engine failed on frame {}: {}", self.frames_processed, e);
                return Err(e);
            }
        };

        if events.is_vetoed() {
            debug!("detection vetoed, discarding {} results", entries.len());
            entries.clear();
        }
        if events.is_stop_requested() {
            debug!("recognition stopped early with {} results", entries.len());
        }

        if !self.output_multiple_results {
            if entries.len() > 1 {
                debug!("keeping first of {} results", entries.len());
                entries.truncate(1);
            }
            if entries.is_empty() {
                entries.push(ResultEntry::empty());
            }
        }

        debug!(
            "{:?} frame {} produced {} results ({} valid)",
            mode,
            self.frames_processed,
            entries.len(),
            entries.iter().filter(|e| e.is_valid()).count()
        );
        Ok(ResultList::new(entries))
    }

    /// Clear cross-frame accumulation without touching the configuration
    pub fn reset(&mut self) -> Result<()> {
        match self.state {
            SessionState::Destroyed => Err(RecognizerError::InvalidState(
                "reset called on a destroyed session".to_string(),
            )),
            SessionState::Recognizing => Err(RecognizerError::InvalidState(
                "reset called during recognition".to_string(),
            )),
            SessionState::Created | SessionState::Ready => {
                self.engine.reset();
                debug!("recognizer reset from {} state", self.state.as_str());
                self.state = SessionState::Created;
                Ok(())
            }
        }
    }

    /// Release the engine; every later operation returns `InvalidState`
    pub fn destroy(&mut self) -> Result<()> {
        if self.state == SessionState::Destroyed {
            return Err(RecognizerError::InvalidState(
                "session already destroyed".to_string(),
            ));
        }
        self.engine.release();
        self.state = SessionState::Destroyed;
        info!("recognizer destroyed after {} frames", self.frames_processed);
        Ok(())
    }
}

impl Drop for Recognizer {
    fn drop(&mut self) {
        if self.state != SessionState::Destroyed {
            self.engine.release();
            self.state = SessionState::Destroyed;
        }
    }
}

impl std::fmt::Debug for Recognizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recognizer")
            .field("backend", &self.backend)
            .field("state", &self.state.as_str())
            .field("output_multiple_results", &self.output_multiple_results)
            .field("frames_processed", &self.frames_processed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::{Detection, DetectionStatus, Point, Size};
    use crate::dewarp::BarrelDewarper;
    use crate::error::Status;
    use crate::raw_image::RawLayout;
    use crate::replay::{ReplayBackend, ReplayScript};
    use crate::result::{BarcodeData, BarcodeType, ResultKind, ResultPayload};
    use crate::settings::{MrtdSettings, OcrModel, ZxingSettings};
    use std::cell::RefCell;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn barcode(text: &str) -> ResultEntry {
        ResultEntry::new(
            true,
            ResultPayload::Barcode(BarcodeData {
                barcode_type: BarcodeType::QrCode,
                text: text.to_string(),
                raw: text.as_bytes().to_vec(),
                uncertain: false,
            }),
        )
    }

    /// Engine that detects on every frame and returns fixed results
    struct FixedEngine {
        results: Vec<ResultEntry>,
        resets: Arc<AtomicUsize>,
        releases: Arc<AtomicUsize>,
    }

    impl Engine for FixedEngine {
        fn recognize(
            &mut self,
            image: &Image<'_>,
            _mode: FrameMode,
            events: &mut Events<'_, '_>,
        ) -> Result<Vec<ResultEntry>> {
            events.detection_started();
            let detection = Detection {
                points: vec![Point { x: 0, y: 0 }, Point { x: 3, y: 3 }],
                image_size: Size {
                    width: image.width(),
                    height: image.height(),
                },
                status: DetectionStatus::Success,
            };
            if !events.detected_object(&detection) {
                return Ok(Vec::new());
            }
            events.recognition_started();
            events.progress(50);
            Ok(self.results.clone())
        }

        fn reset(&mut self) {
            self.resets.fetch_add(1, Ordering::SeqCst);
        }

        fn release(&mut self) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct FixedBackend {
        results: Vec<ResultEntry>,
        resets: Arc<AtomicUsize>,
        releases: Arc<AtomicUsize>,
    }

    impl Backend for FixedBackend {
        fn name(&self) -> &str {
            "fixed"
        }

        fn create_engine(&self, _settings: &Settings) -> Result<Box<dyn Engine>> {
            Ok(Box::new(FixedEngine {
                results: self.results.clone(),
                resets: self.resets.clone(),
                releases: self.releases.clone(),
            }))
        }
    }

    fn settings() -> Settings {
        let mut settings = Settings::new();
        settings.set_license("Demo Licensee", "ABCD-1234").set_zxing(Some(ZxingSettings {
            scan_qr_code: true,
            ..Default::default()
        }));
        settings
    }

    fn gray_frame() -> Vec<u8> {
        vec![128u8; 8 * 8]
    }

    #[test]
    fn test_single_result_mode_caps_length() {
        let backend = FixedBackend {
            results: vec![barcode("a"), barcode("b"), barcode("c")],
            ..Default::default()
        };
        let pixels = gray_frame();
        let image = Image::from_raw(&pixels, 8, 8, 8, RawLayout::Gray).unwrap();

        let mut single = Recognizer::create(&settings(), &backend).unwrap();
        let list = single.recognize(&image, FrameMode::Still, None).unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list.get(0).unwrap().barcode().unwrap().text, "a");

        let mut multi_settings = settings();
        multi_settings.set_output_multiple_results(true);
        let mut multi = Recognizer::create(&multi_settings, &backend).unwrap();
        let list = multi.recognize(&image, FrameMode::Still, None).unwrap();
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn test_invalid_license_creates_no_session() {
        let backend = ReplayBackend::new(ReplayScript::empty());
        let mut no_key = settings();
        no_key.license = None;
        let err = Recognizer::create(&no_key, &backend).unwrap_err();
        assert_eq!(err.status(), Status::LicenseError);

        let script = ReplayScript::from_json(
            r#"{"license": {"licensee": "Demo Licensee", "key": "ABCD-1234", "expired": true}}"#,
        )
        .unwrap();
        let expired = ReplayBackend::new(script);
        let err = Recognizer::create(&settings(), &expired).unwrap_err();
        assert_eq!(err.status(), Status::LicenseError);
    }

    #[test]
    fn test_destroyed_session_rejects_calls() {
        let backend = FixedBackend {
            results: vec![barcode("a")],
            ..Default::default()
        };
        let releases = backend.releases.clone();
        let pixels = gray_frame();
        let image = Image::from_raw(&pixels, 8, 8, 8, RawLayout::Gray).unwrap();

        let mut recognizer = Recognizer::create(&settings(), &backend).unwrap();
        recognizer.destroy().unwrap();
        assert_eq!(recognizer.state(), SessionState::Destroyed);

        let err = recognizer.recognize(&image, FrameMode::Still, None).unwrap_err();
        assert_eq!(err.status(), Status::InvalidState);
        assert_eq!(recognizer.reset().unwrap_err().status(), Status::InvalidState);
        assert_eq!(recognizer.destroy().unwrap_err().status(), Status::InvalidState);

        drop(recognizer);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_releases_engine() {
        let backend = FixedBackend::default();
        let releases = backend.releases.clone();
        {
            let _recognizer = Recognizer::create(&settings(), &backend).unwrap();
        }
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_state_transitions_and_reset() {
        let backend = FixedBackend::default();
        let resets = backend.resets.clone();
        let pixels = gray_frame();
        let image = Image::from_raw(&pixels, 8, 8, 8, RawLayout::Gray).unwrap();

        let mut recognizer = Recognizer::create(&settings(), &backend).unwrap();
        assert_eq!(recognizer.state(), SessionState::Created);
        recognizer.recognize(&image, FrameMode::Video, None).unwrap();
        assert_eq!(recognizer.state(), SessionState::Ready);
        assert_eq!(recognizer.frames_processed(), 1);

        recognizer.reset().unwrap();
        assert_eq!(recognizer.state(), SessionState::Created);
        assert_eq!(resets.load(Ordering::SeqCst), 1);
        assert_eq!(recognizer.enabled_recognizers(), &["zxing"]);
    }

    #[test]
    fn test_veto_empties_results() {
        let backend = FixedBackend {
            results: vec![barcode("a")],
            ..Default::default()
        };
        let pixels = gray_frame();
        let image = Image::from_raw(&pixels, 8, 8, 8, RawLayout::Gray).unwrap();
        let mut recognizer = Recognizer::create(&settings(), &backend).unwrap();

        let log = RefCell::new(Vec::new());
        let mut callbacks = Callbacks::new()
            .on_detected_object(|_| false)
            .on_recognition_started(|| log.borrow_mut().push("recognition_started"))
            .on_recognition_finished(|| log.borrow_mut().push("recognition_finished"));
        let list = recognizer
            .recognize(&image, FrameMode::Still, Some(&mut callbacks))
            .unwrap();

        assert_eq!(list.len(), 1);
        assert!(!list.has_valid());
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_open_recognition_phase_is_closed() {
        let backend = FixedBackend::default();
        let pixels = gray_frame();
        let image = Image::from_raw(&pixels, 8, 8, 8, RawLayout::Gray).unwrap();
        let mut recognizer = Recognizer::create(&settings(), &backend).unwrap();

        let mut finished = 0;
        {
            let mut callbacks = Callbacks::new().on_recognition_finished(|| finished += 1);
            recognizer
                .recognize(&image, FrameMode::Still, Some(&mut callbacks))
                .unwrap();
        }
        assert_eq!(finished, 1);
    }

    #[test]
    fn test_still_frame_without_document() {
        let backend = ReplayBackend::new(ReplayScript::empty());
        let pixels = vec![0u8; 32 * 24 * 3];
        let image = Image::from_raw(&pixels, 32, 24, 32 * 3, RawLayout::Bgr).unwrap();
        let mut recognizer = Recognizer::create(&settings(), &backend).unwrap();

        let detected = RefCell::new(0);
        let failed = RefCell::new(0);
        let mut callbacks = Callbacks::new()
            .on_detected_object(|_| {
                *detected.borrow_mut() += 1;
                true
            })
            .on_detection_failed(|| *failed.borrow_mut() += 1);
        let list = recognizer
            .recognize(&image, FrameMode::Still, Some(&mut callbacks))
            .unwrap();

        assert_eq!(*detected.borrow(), 0);
        assert_eq!(*failed.borrow(), 1);
        assert_eq!(list.len(), 1);
        let entry = list.get(0).unwrap();
        assert!(!entry.is_valid());
        assert!(entry.is_kind(ResultKind::Invalid));
        assert_eq!(entry.mrtd().unwrap_err().status(), Status::KindMismatch);
        assert_eq!(entry.usdl().unwrap_err().status(), Status::KindMismatch);
        assert_eq!(entry.barcode().unwrap_err().status(), Status::KindMismatch);
    }

    /// Engine recording the frame modes and resets the session forwards
    struct ModeLogEngine {
        log: Arc<std::sync::Mutex<Vec<String>>>,
    }

    impl Engine for ModeLogEngine {
        fn recognize(
            &mut self,
            _image: &Image<'_>,
            mode: FrameMode,
            _events: &mut Events<'_, '_>,
        ) -> Result<Vec<ResultEntry>> {
            self.log.lock().unwrap().push(format!("{:?}", mode));
            Ok(Vec::new())
        }

        fn reset(&mut self) {
            self.log.lock().unwrap().push("reset".to_string());
        }
    }

    struct ModeLogBackend {
        log: Arc<std::sync::Mutex<Vec<String>>>,
    }

    impl Backend for ModeLogBackend {
        fn name(&self) -> &str {
            "mode-log"
        }

        fn create_engine(&self, _settings: &Settings) -> Result<Box<dyn Engine>> {
            Ok(Box::new(ModeLogEngine {
                log: self.log.clone(),
            }))
        }
    }

    #[test]
    fn test_frame_modes_and_reset_reach_engine() {
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let backend = ModeLogBackend { log: log.clone() };
        let pixels = gray_frame();
        let image = Image::from_raw(&pixels, 8, 8, 8, RawLayout::Gray).unwrap();

        let mut recognizer = Recognizer::create(&settings(), &backend).unwrap();
        recognizer.recognize(&image, FrameMode::Video, None).unwrap();
        recognizer.recognize(&image, FrameMode::Video, None).unwrap();
        recognizer.reset().unwrap();
        recognizer.recognize(&image, FrameMode::Still, None).unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["Video", "Video", "reset", "Still"]);
        assert_eq!(recognizer.state(), SessionState::Ready);
    }

    #[test]
    fn test_passive_callbacks_keep_outcome() {
        let script = r#"{
            "frames": [
                { "detection": null },
                {
                    "detection": { "status": "success", "points": [{"x": 1, "y": 1}, {"x": 6, "y": 6}] },
                    "progress": [50, 100],
                    "results": [{ "valid": true, "payload": { "barcode": { "barcode_type": "qr_code", "text": "hi" } } }]
                },
                { "detection": { "status": "camera_at_angle", "points": [] } }
            ]
        }"#;
        let pixels = gray_frame();
        let image = Image::from_raw(&pixels, 8, 8, 8, RawLayout::Gray).unwrap();

        let backend = ReplayBackend::new(ReplayScript::from_json(script).unwrap());
        let mut without = Recognizer::create(&settings(), &backend).unwrap();
        let mut with = Recognizer::create(&settings(), &backend).unwrap();

        let mut callbacks = Callbacks::new()
            .on_detection_started(|| {})
            .on_detected_object(|_| true)
            .on_detection_failed(|| {})
            .on_recognition_started(|| {})
            .on_progress(|_| {})
            .on_show_image(|_, _, _| {})
            .on_should_stop_recognition(|| false)
            .on_recognition_finished(|| {});

        for _ in 0..3 {
            let plain = without.recognize(&image, FrameMode::Video, None).unwrap();
            let hooked = with
                .recognize(&image, FrameMode::Video, Some(&mut callbacks))
                .unwrap();
            assert_eq!(plain, hooked);
        }
    }

    #[test]
    fn test_dewarped_frame_pipeline() {
        let (width, height) = (1279u32, 723u32);
        let pixels: Vec<u8> = (0..(width * height * 3) as usize).map(|i| (i % 251) as u8).collect();
        let image =
            Image::from_raw(&pixels, width, height, width as usize * 3, RawLayout::Bgr).unwrap();
        let dewarper = BarrelDewarper::new(-3.6e-7, -7.0e-14, 0.0, 0.0, 0.0, 0.9).unwrap();
        let corrected = dewarper.dewarp(&image).unwrap();
        assert_eq!(corrected.layout(), RawLayout::Bgr);
        assert!(corrected.height() as f32 >= height as f32 * 0.9);
        assert!(corrected.height() <= height);

        let mut settings = settings();
        settings
            .set_ocr_model(OcrModel::from_bytes(vec![0u8; 4]))
            .set_mrtd(Some(MrtdSettings {
                detect_mrz_position: true,
                show_full_document: true,
                show_mrz: false,
            }));
        let backend = ReplayBackend::new(ReplayScript::empty());
        let mut recognizer = Recognizer::create(&settings, &backend).unwrap();
        let list = recognizer.recognize(&corrected, FrameMode::Video, None).unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(pixels.len(), (width * height * 3) as usize);
    }
}
