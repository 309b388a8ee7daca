//! Recognizer settings consumed once when a session is created

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{RecognizerError, Result};

/// Licensee and license key pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct License {
    pub licensee: String,
    pub key: String,
}

impl License {
    pub fn new(licensee: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            licensee: licensee.into(),
            key: key.into(),
        }
    }

    fn is_blank(&self) -> bool {
        self.licensee.trim().is_empty() || self.key.trim().is_empty()
    }
}

/// Device capability hint: how many worker threads the engine may use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub processors: usize,
}

impl DeviceInfo {
    pub fn new(processors: usize) -> Self {
        Self { processors }
    }
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            processors: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }
}

/// Machine readable travel document recognizer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MrtdSettings {
    /// Locate the machine readable zone before OCR
    pub detect_mrz_position: bool,
    /// Expose the dewarped full document through the show-image callback
    pub show_full_document: bool,
    /// Expose the dewarped machine readable zone through the show-image callback
    pub show_mrz: bool,
}

/// US driver's license (PDF417 payload) recognizer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsdlSettings {
    pub use_auto_scale: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Pdf417Settings {
    pub use_auto_scale: bool,
    pub should_scan_uncertain: bool,
    pub null_quiet_zone_allowed: bool,
}

/// General purpose barcode recognizer; each flag enables one symbology
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZxingSettings {
    pub scan_aztec: bool,
    pub scan_code128: bool,
    pub scan_code39: bool,
    pub scan_data_matrix: bool,
    pub scan_ean13: bool,
    pub scan_ean8: bool,
    pub scan_itf: bool,
    pub scan_qr_code: bool,
    pub scan_upca: bool,
    pub scan_upce: bool,
}

impl ZxingSettings {
    fn any_enabled(&self) -> bool {
        self.scan_aztec
            || self.scan_code128
            || self.scan_code39
            || self.scan_data_matrix
            || self.scan_ean13
            || self.scan_ean8
            || self.scan_itf
            || self.scan_qr_code
            || self.scan_upca
            || self.scan_upce
    }
}

/// 1D barcode recognizer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BarDecoderSettings {
    pub scan_code128: bool,
    pub scan_code39: bool,
    pub use_auto_scale: bool,
    pub try_harder: bool,
}

/// OCR model blob handed to the engine untouched
#[derive(Clone, PartialEq, Eq)]
pub struct OcrModel {
    bytes: Arc<[u8]>,
}

impl OcrModel {
    pub fn from_bytes(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    /// Load a model file into memory
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| RecognizerError::io(path, e))?;
        info!("loaded OCR model {:?} ({} bytes)", path, bytes.len());
        Ok(Self::from_bytes(bytes))
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl std::fmt::Debug for OcrModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OcrModel").field("len", &self.bytes.len()).finish()
    }
}

/// Aggregate recognizer configuration.
///
/// A recognizer kind is disabled by leaving its settings as `None`. Session
/// creation snapshots the settings, so later changes do not affect sessions
/// that already exist.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub license: Option<License>,
    pub device_info: Option<DeviceInfo>,
    pub mrtd: Option<MrtdSettings>,
    pub usdl: Option<UsdlSettings>,
    pub pdf417: Option<Pdf417Settings>,
    pub zxing: Option<ZxingSettings>,
    pub bar_decoder: Option<BarDecoderSettings>,
    pub ocr_model: Option<OcrModel>,
    pub output_multiple_results: bool,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_license(&mut self, licensee: impl Into<String>, key: impl Into<String>) -> &mut Self {
        self.license = Some(License::new(licensee, key));
        self
    }

    pub fn set_device_info(&mut self, info: DeviceInfo) -> &mut Self {
        self.device_info = Some(info);
        self
    }

    pub fn set_ocr_model(&mut self, model: OcrModel) -> &mut Self {
        self.ocr_model = Some(model);
        self
    }

    pub fn set_mrtd(&mut self, mrtd: Option<MrtdSettings>) -> &mut Self {
        self.mrtd = mrtd;
        self
    }

    pub fn set_usdl(&mut self, usdl: Option<UsdlSettings>) -> &mut Self {
        self.usdl = usdl;
        self
    }

    pub fn set_pdf417(&mut self, pdf417: Option<Pdf417Settings>) -> &mut Self {
        self.pdf417 = pdf417;
        self
    }

    pub fn set_zxing(&mut self, zxing: Option<ZxingSettings>) -> &mut Self {
        self.zxing = zxing;
        self
    }

    pub fn set_bar_decoder(&mut self, bar_decoder: Option<BarDecoderSettings>) -> &mut Self {
        self.bar_decoder = bar_decoder;
        self
    }

    pub fn set_output_multiple_results(&mut self, enabled: bool) -> &mut Self {
        self.output_multiple_results = enabled;
        self
    }

    /// Names of the enabled recognizers
    pub fn enabled_recognizers(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.mrtd.is_some() {
            names.push("mrtd");
        }
        if self.usdl.is_some() {
            names.push("usdl");
        }
        if self.pdf417.is_some() {
            names.push("pdf417");
        }
        if self.zxing.is_some() {
            names.push("zxing");
        }
        if self.bar_decoder.is_some() {
            names.push("bar_decoder");
        }
        names
    }

    /// Structural checks performed before any backend sees the settings
    pub fn validate(&self) -> Result<()> {
        match &self.license {
            None => {
                return Err(RecognizerError::License("no license key was set".to_string()));
            }
            Some(license) if license.is_blank() => {
                return Err(RecognizerError::License(
                    "licensee and license key must not be empty".to_string(),
                ));
            }
            Some(_) => {}
        }

        if let Some(info) = &self.device_info {
            if info.processors == 0 {
                return Err(RecognizerError::Config(
                    "device info must report at least one processor".to_string(),
                ));
            }
        }

        let enabled = self.enabled_recognizers();
        if enabled.is_empty() {
            return Err(RecognizerError::Config("no recognizer is enabled".to_string()));
        }

        if let Some(mrtd) = &self.mrtd {
            if self.ocr_model.as_ref().map_or(true, |m| m.is_empty()) {
                return Err(RecognizerError::Config(
                    "MRTD recognizer requires an OCR model".to_string(),
                ));
            }
            if (mrtd.show_full_document || mrtd.show_mrz) && !mrtd.detect_mrz_position {
                return Err(RecognizerError::Config(
                    "showing MRTD images requires detect_mrz_position".to_string(),
                ));
            }
        }

        if let Some(zxing) = &self.zxing {
            if !zxing.any_enabled() {
                return Err(RecognizerError::Config(
                    "ZXing recognizer enabled without any symbology".to_string(),
                ));
            }
        }

        if let Some(bar) = &self.bar_decoder {
            if !bar.scan_code128 && !bar.scan_code39 {
                return Err(RecognizerError::Config(
                    "1D barcode recognizer enabled without any symbology".to_string(),
                ));
            }
        }

        debug!("settings valid, enabled recognizers: {:?}", enabled);
        Ok(())
    }
}
