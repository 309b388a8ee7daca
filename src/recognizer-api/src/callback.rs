//! Progress and cancellation hooks invoked during a single recognize call
//!
//! [`Callbacks`] is the caller-facing registry: every hook is optional and an
//! unset hook is simply skipped. [`Events`] is the engine-facing side used by
//! backends to report progress; it keeps the hooks in their fixed order
//! (detection started, detected object or detection failed, recognition
//! started, progress, recognition finished) no matter what the engine emits.
//! Recognition only starts on a detected region or when the engine skipped
//! detection altogether, and intermediate images are only shown while
//! recognition is running.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::raw_image::Image;

/// Integer pixel position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

/// Outcome reported together with a detected object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionStatus {
    Success,
    Fail,
    PartialObject,
    CameraAtAngle,
    CameraTooHigh,
    CameraTooNear,
}

impl DetectionStatus {
    pub fn description(&self) -> &'static str {
        match self {
            DetectionStatus::Success => "detection has succeeded",
            DetectionStatus::Fail => "detection has failed",
            DetectionStatus::PartialObject => "some parts of object are not visible",
            DetectionStatus::CameraAtAngle => "camera is at angle",
            DetectionStatus::CameraTooHigh => "camera is too high",
            DetectionStatus::CameraTooNear => "camera is too near",
        }
    }
}

/// Candidate region found by the detection phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Detection {
    pub points: Vec<Point>,
    pub image_size: Size,
    pub status: DetectionStatus,
}

/// Purpose of an intermediate image exposed by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShowImageType {
    Original,
    Dewarped,
    SuccessfulScan,
}

/// Hook points of the callback registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackEvent {
    DetectionStarted,
    DetectedObject,
    DetectionFailed,
    RecognitionStarted,
    Progress,
    ShowImage,
    ShouldStopRecognition,
    RecognitionFinished,
}

type Hook<'cb> = Box<dyn FnMut() + 'cb>;

/// Optional handlers invoked synchronously on the thread calling `recognize`
#[derive(Default)]
pub struct Callbacks<'cb> {
    detection_started: Option<Hook<'cb>>,
    detected_object: Option<Box<dyn FnMut(&Detection) -> bool + 'cb>>,
    detection_failed: Option<Hook<'cb>>,
    recognition_started: Option<Hook<'cb>>,
    progress: Option<Box<dyn FnMut(u8) + 'cb>>,
    show_image: Option<Box<dyn FnMut(&Image<'_>, ShowImageType, &str) + 'cb>>,
    should_stop: Option<Box<dyn FnMut() -> bool + 'cb>>,
    recognition_finished: Option<Hook<'cb>>,
}

impl<'cb> Callbacks<'cb> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_detection_started(mut self, f: impl FnMut() + 'cb) -> Self {
        self.detection_started = Some(Box::new(f));
        self
    }

    /// Returning `false` vetoes the rest of the recognition
    pub fn on_detected_object(mut self, f: impl FnMut(&Detection) -> bool + 'cb) -> Self {
        self.detected_object = Some(Box::new(f));
        self
    }

    pub fn on_detection_failed(mut self, f: impl FnMut() + 'cb) -> Self {
        self.detection_failed = Some(Box::new(f));
        self
    }

    pub fn on_recognition_started(mut self, f: impl FnMut() + 'cb) -> Self {
        self.recognition_started = Some(Box::new(f));
        self
    }

    /// Percent complete, never decreasing within one call
    pub fn on_progress(mut self, f: impl FnMut(u8) + 'cb) -> Self {
        self.progress = Some(Box::new(f));
        self
    }

    /// The image is only valid during the call; copy it to keep it
    pub fn on_show_image(mut self, f: impl FnMut(&Image<'_>, ShowImageType, &str) + 'cb) -> Self {
        self.show_image = Some(Box::new(f));
        self
    }

    /// Polled by long running recognizers; `true` requests cancellation
    pub fn on_should_stop_recognition(mut self, f: impl FnMut() -> bool + 'cb) -> Self {
        self.should_stop = Some(Box::new(f));
        self
    }

    pub fn on_recognition_finished(mut self, f: impl FnMut() + 'cb) -> Self {
        self.recognition_finished = Some(Box::new(f));
        self
    }

    pub fn is_registered(&self, event: CallbackEvent) -> bool {
        match event {
            CallbackEvent::DetectionStarted => self.detection_started.is_some(),
            CallbackEvent::DetectedObject => self.detected_object.is_some(),
            CallbackEvent::DetectionFailed => self.detection_failed.is_some(),
            CallbackEvent::RecognitionStarted => self.recognition_started.is_some(),
            CallbackEvent::Progress => self.progress.is_some(),
            CallbackEvent::ShowImage => self.show_image.is_some(),
            CallbackEvent::ShouldStopRecognition => self.should_stop.is_some(),
            CallbackEvent::RecognitionFinished => self.recognition_finished.is_some(),
        }
    }
}

impl std::fmt::Debug for Callbacks<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("detection_started", &self.detection_started.is_some())
            .field("detected_object", &self.detected_object.is_some())
            .field("detection_failed", &self.detection_failed.is_some())
            .field("recognition_started", &self.recognition_started.is_some())
            .field("progress", &self.progress.is_some())
            .field("show_image", &self.show_image.is_some())
            .field("should_stop", &self.should_stop.is_some())
            .field("recognition_finished", &self.recognition_finished.is_some())
            .finish()
    }
}

/// Phase reached within one recognize call
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Phase {
    Idle,
    Detecting,
    Detected,
    Recognizing,
    Finished,
}

/// Result of the detection phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionOutcome {
    Detected,
    Failed,
}

/// Engine-facing event sink for one recognize call
pub struct Events<'a, 'cb> {
    callbacks: Option<&'a mut Callbacks<'cb>>,
    phase: Phase,
    outcome: Option<DetectionOutcome>,
    vetoed: bool,
    progress: u8,
    stop_requested: bool,
}

impl<'a, 'cb> Events<'a, 'cb> {
    pub(crate) fn new(callbacks: Option<&'a mut Callbacks<'cb>>) -> Self {
        Self {
            callbacks,
            phase: Phase::Idle,
            outcome: None,
            vetoed: false,
            progress: 0,
            stop_requested: false,
        }
    }

    /// Event sink with no registered hooks
    pub fn silent() -> Self {
        Self::new(None)
    }

    pub fn detection_started(&mut self) {
        if self.phase != Phase::Idle {
            trace!("dropping late detection-started event");
            return;
        }
        self.phase = Phase::Detecting;
        if let Some(f) = self.hooks().and_then(|c| c.detection_started.as_mut()) {
            f();
        }
    }

    /// Report the primary detection; returns whether recognition should go on
    pub fn detected_object(&mut self, detection: &Detection) -> bool {
        if self.outcome.is_some() || self.phase > Phase::Detecting {
            trace!("dropping repeated detection outcome");
            return !self.vetoed;
        }
        self.phase = Phase::Detected;
        self.outcome = Some(DetectionOutcome::Detected);
        debug!(
            "detected object with {} points: {}",
            detection.points.len(),
            detection.status.description()
        );

        let proceed = match self.hooks().and_then(|c| c.detected_object.as_mut()) {
            Some(f) => f(detection),
            None => true,
        };
        if !proceed {
            debug!("caller vetoed recognition after detection");
            self.vetoed = true;
        }
        proceed
    }

    pub fn detection_failed(&mut self) {
        if self.outcome.is_some() || self.phase > Phase::Detecting {
            trace!("dropping repeated detection outcome");
            return;
        }
        self.phase = Phase::Detected;
        self.outcome = Some(DetectionOutcome::Failed);
        debug!("detection failed");
        if let Some(f) = self.hooks().and_then(|c| c.detection_failed.as_mut()) {
            f();
        }
    }

    pub fn recognition_started(&mut self) {
        if self.vetoed
            || self.phase >= Phase::Recognizing
            || self.outcome == Some(DetectionOutcome::Failed)
        {
            trace!("dropping recognition-started event");
            return;
        }
        self.phase = Phase::Recognizing;
        if let Some(f) = self.hooks().and_then(|c| c.recognition_started.as_mut()) {
            f();
        }
    }

    /// Report progress; values are clamped to 100 and never go backwards
    pub fn progress(&mut self, percent: u8) {
        if self.phase != Phase::Recognizing {
            return;
        }
        let percent = percent.min(100).max(self.progress);
        self.progress = percent;
        if let Some(f) = self.hooks().and_then(|c| c.progress.as_mut()) {
            f(percent);
        }
    }

    /// Expose an intermediate image for the duration of this call
    pub fn show_image(&mut self, image: &Image<'_>, show_type: ShowImageType, name: &str) {
        if self.phase != Phase::Recognizing {
            trace!("dropping '{}' image shown outside recognition", name);
            return;
        }
        trace!("showing {:?} image '{}' ({}x{})", show_type, name, image.width(), image.height());
        if let Some(f) = self.hooks().and_then(|c| c.show_image.as_mut()) {
            f(image, show_type, name);
        }
    }

    /// Poll for cooperative cancellation; once requested it stays requested
    pub fn should_stop(&mut self) -> bool {
        if self.stop_requested || self.vetoed {
            return true;
        }
        let stop = match self.hooks().and_then(|c| c.should_stop.as_mut()) {
            Some(f) => f(),
            None => false,
        };
        if stop {
            debug!("caller requested recognition stop");
            self.stop_requested = true;
        }
        stop
    }

    pub fn recognition_finished(&mut self) {
        if self.phase != Phase::Recognizing {
            return;
        }
        self.phase = Phase::Finished;
        if let Some(f) = self.hooks().and_then(|c| c.recognition_finished.as_mut()) {
            f();
        }
    }

    pub fn outcome(&self) -> Option<DetectionOutcome> {
        self.outcome
    }

    /// Whether the caller rejected the detected object
    pub fn is_vetoed(&self) -> bool {
        self.vetoed
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested
    }

    /// Whether the caller listens for `event`; lets engines skip work nobody sees
    pub fn is_registered(&self, event: CallbackEvent) -> bool {
        self.callbacks
            .as_deref()
            .is_some_and(|c| c.is_registered(event))
    }

    /// Close a recognition phase the engine left open
    pub(crate) fn finish(&mut self) {
        if self.phase == Phase::Recognizing {
            trace!("closing recognition phase left open by engine");
            self.recognition_finished();
        }
    }

    fn hooks(&mut self) -> Option<&mut Callbacks<'cb>> {
        self.callbacks.as_deref_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raw_image::RawLayout;
    use std::cell::RefCell;

    fn detection() -> Detection {
        Detection {
            points: vec![Point { x: 1, y: 2 }, Point { x: 30, y: 2 }],
            image_size: Size { width: 64, height: 48 },
            status: DetectionStatus::Success,
        }
    }

    fn recording(log: &RefCell<Vec<String>>) -> Callbacks<'_> {
        Callbacks::new()
            .on_detection_started(|| log.borrow_mut().push("detection_started".into()))
            .on_detected_object(|_| {
                log.borrow_mut().push("detected_object".into());
                true
            })
            .on_detection_failed(|| log.borrow_mut().push("detection_failed".into()))
            .on_recognition_started(|| log.borrow_mut().push("recognition_started".into()))
            .on_progress(|p| log.borrow_mut().push(format!("progress {}", p)))
            .on_recognition_finished(|| log.borrow_mut().push("recognition_finished".into()))
    }

    #[test]
    fn test_detection_outcomes_are_exclusive() {
        let log = RefCell::new(Vec::new());
        let mut callbacks = recording(&log);
        {
            let mut events = Events::new(Some(&mut callbacks));
            events.detection_started();
            events.detection_failed();
            assert!(events.detected_object(&detection()));
            events.detection_failed();
            assert_eq!(events.outcome(), Some(DetectionOutcome::Failed));
        }
        assert_eq!(*log.borrow(), vec!["detection_started", "detection_failed"]);
    }

    #[test]
    fn test_out_of_order_events_are_dropped() {
        let log = RefCell::new(Vec::new());
        let mut callbacks = recording(&log);
        {
            let mut events = Events::new(Some(&mut callbacks));
            events.progress(10);
            events.recognition_finished();
            events.detection_started();
            events.detected_object(&detection());
            events.recognition_started();
            events.detection_started();
            events.progress(60);
            events.progress(40);
            events.progress(250);
            events.finish();
        }
        assert_eq!(
            *log.borrow(),
            vec![
                "detection_started",
                "detected_object",
                "recognition_started",
                "progress 60",
                "progress 60",
                "progress 100",
                "recognition_finished",
            ]
        );
    }

    #[test]
    fn test_veto_suppresses_recognition() {
        let mut started = false;
        {
            let mut callbacks = Callbacks::new()
                .on_detected_object(|_| false)
                .on_recognition_started(|| started = true);
            let mut events = Events::new(Some(&mut callbacks));
            assert!(!events.detected_object(&detection()));
            events.recognition_started();
            assert!(events.is_vetoed());
            assert!(events.should_stop());
        }
        assert!(!started);
    }

    #[test]
    fn test_stop_request_is_sticky() {
        let mut polls = 0;
        {
            let mut callbacks = Callbacks::new().on_should_stop_recognition(|| {
                polls += 1;
                true
            });
            let mut events = Events::new(Some(&mut callbacks));
            assert!(events.should_stop());
            assert!(events.should_stop());
        }
        assert_eq!(polls, 1);
    }

    #[test]
    fn test_show_image_copy_outlives_call() {
        let mut kept = None;
        {
            let mut callbacks = Callbacks::new().on_show_image(|image, kind, _name| {
                if kind == ShowImageType::Dewarped {
                    kept = Some(image.to_owned_image());
                }
            });
            let mut events = Events::new(Some(&mut callbacks));
            let pixels = vec![9u8; 16];
            let image = Image::from_raw(&pixels, 4, 4, 4, RawLayout::Gray).unwrap();
            events.detection_started();
            events.detected_object(&detection());
            events.recognition_started();
            events.show_image(&image, ShowImageType::Dewarped, "document");
        }
        assert_eq!(kept.unwrap().bytes(), &[9u8; 16][..]);
    }

    #[test]
    fn test_no_recognition_after_failed_detection() {
        let log = RefCell::new(Vec::new());
        let mut callbacks = recording(&log);
        {
            let mut events = Events::new(Some(&mut callbacks));
            events.detection_started();
            events.detection_failed();
            events.recognition_started();
            events.progress(50);
            events.recognition_finished();
        }
        assert_eq!(*log.borrow(), vec!["detection_started", "detection_failed"]);
    }

    #[test]
    fn test_recognition_without_detection_phase() {
        let log = RefCell::new(Vec::new());
        let mut callbacks = recording(&log);
        {
            let mut events = Events::new(Some(&mut callbacks));
            events.recognition_started();
            events.finish();
        }
        assert_eq!(*log.borrow(), vec!["recognition_started", "recognition_finished"]);
    }

    #[test]
    fn test_show_image_only_during_recognition() {
        let shown = RefCell::new(Vec::new());
        {
            let mut callbacks = Callbacks::new()
                .on_show_image(|_, _, name| shown.borrow_mut().push(name.to_string()));
            let mut events = Events::new(Some(&mut callbacks));
            let pixels = vec![0u8; 4];
            let image = Image::from_raw(&pixels, 2, 2, 2, RawLayout::Gray).unwrap();
            events.show_image(&image, ShowImageType::Original, "idle");
            events.detection_started();
            events.show_image(&image, ShowImageType::Original, "detecting");
            events.detected_object(&detection());
            events.recognition_started();
            events.show_image(&image, ShowImageType::Dewarped, "recognizing");
            events.recognition_finished();
            events.show_image(&image, ShowImageType::Dewarped, "finished");
        }
        assert_eq!(*shown.borrow(), vec!["recognizing"]);
    }

    #[test]
    fn test_silent_events() {
        let mut events = Events::silent();
        events.detection_started();
        assert!(events.detected_object(&detection()));
        assert!(!events.should_stop());
        assert!(!events.is_registered(CallbackEvent::ShowImage));
        assert!(!Callbacks::new().is_registered(CallbackEvent::Progress));
        assert!(Callbacks::new()
            .on_progress(|_| {})
            .is_registered(CallbackEvent::Progress));
    }
}
