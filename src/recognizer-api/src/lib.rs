//! Recognition session boundary
//!
//! Wraps caller frames as typed images, corrects lens distortion, drives a
//! recognition engine through a session state machine with optional progress
//! hooks, and exposes typed results (travel documents, US driver's licenses,
//! barcodes).

mod callback;
mod dewarp;
mod engine;
mod error;
mod raw_image;
mod replay;
mod result;
mod session;
mod settings;

pub use callback::{
    CallbackEvent, Callbacks, Detection, DetectionOutcome, DetectionStatus, Events, Point,
    ShowImageType, Size,
};
pub use dewarp::{BarrelDewarper, DewarpCoefficients};
pub use engine::{Backend, Engine, FrameMode};
pub use error::{RecognizerError, Result, Status};
pub use raw_image::{Image, ImageOrigin, RawLayout};
pub use replay::{ReplayBackend, ReplayEngine, ReplayFrame, ReplayScript, ScriptedDetection, ScriptedLicense};
pub use result::{
    BarcodeData, BarcodeType, DateKind, MrtdFields, MrzDate, ResultEntry, ResultKind, ResultList,
    ResultPayload, UsdlField, UsdlFields,
};
pub use session::{Recognizer, SessionState};
pub use settings::{
    BarDecoderSettings, DeviceInfo, License, MrtdSettings, OcrModel, Pdf417Settings, Settings,
    UsdlSettings, ZxingSettings,
};

/// Human readable description of a status code
pub fn status_to_str(status: Status) -> &'static str {
    status.as_str()
}
