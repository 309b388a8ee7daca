//! Configuration management
//!
//! TOML configuration for the recognizer tool: license credentials, the OCR
//! model, enabled recognizers, lens correction and the capture loop.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use recognizer_api::{
    BarDecoderSettings, BarrelDewarper, DeviceInfo, DewarpCoefficients, MrtdSettings, OcrModel,
    Pdf417Settings, ReplayBackend, ReplayScript, Settings, UsdlSettings, ZxingSettings,
};

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub license: LicenseConfig,

    #[serde(default)]
    pub model: ModelConfig,

    #[serde(default)]
    pub device: DeviceConfig,

    #[serde(default)]
    pub recognizers: RecognizersConfig,

    #[serde(default)]
    pub dewarp: DewarpConfig,

    #[serde(default)]
    pub capture: CaptureConfig,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub live: LiveConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LicenseConfig {
    #[serde(default)]
    pub licensee: String,
    #[serde(default)]
    pub key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// OCR model file, resolved relative to the working directory
    #[serde(default = "default_model_path")]
    pub path: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Worker thread hint for the engine (None = available parallelism)
    pub processors: Option<usize>,
}

/// Recognizer selection and per-recognizer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognizersConfig {
    /// Names of the recognizers to enable: mrtd, usdl, pdf417, zxing, bar_decoder
    pub enabled: Vec<String>,
    pub output_multiple_results: bool,
    pub mrtd: MrtdSettings,
    pub usdl: UsdlSettings,
    pub pdf417: Pdf417Settings,
    pub zxing: ZxingSettings,
    pub bar_decoder: BarDecoderSettings,
}

/// Barrel distortion correction applied to every live frame
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DewarpConfig {
    pub enabled: bool,
    pub k1: f32,
    pub k2: f32,
    pub p1: f32,
    pub p2: f32,
    pub k3: f32,
    pub scale: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Image file or directory of frames standing in for the camera
    #[serde(default = "default_capture_source")]
    pub source: PathBuf,

    /// Frames per second for the live loop
    #[serde(default = "default_fps")]
    pub fps: f64,

    /// Start over when the source is exhausted
    #[serde(default = "default_true")]
    pub looping: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// JSON replay script driving the engine (None = nothing is ever detected)
    pub script: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveConfig {
    /// Reset the session after a valid result so the next document starts fresh
    #[serde(default = "default_true")]
    pub reset_after_result: bool,

    /// Directory receiving a PNG of every successful scan
    pub save_dir: Option<PathBuf>,

    /// Stop after this many frames (None = until interrupted or exhausted)
    pub max_frames: Option<u64>,
}

// Default value functions
fn default_model_path() -> PathBuf {
    PathBuf::from("ocr_model.zzip")
}
fn default_capture_source() -> PathBuf {
    PathBuf::from("frames")
}
fn default_fps() -> f64 {
    10.0
}
fn default_true() -> bool {
    true
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: default_model_path(),
        }
    }
}

impl Default for RecognizersConfig {
    fn default() -> Self {
        Self {
            enabled: vec!["mrtd".to_string()],
            output_multiple_results: false,
            mrtd: MrtdSettings {
                detect_mrz_position: true,
                show_full_document: true,
                show_mrz: false,
            },
            usdl: UsdlSettings::default(),
            pdf417: Pdf417Settings::default(),
            zxing: ZxingSettings::default(),
            bar_decoder: BarDecoderSettings::default(),
        }
    }
}

impl Default for DewarpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            k1: -3.6e-7,
            k2: -7.0e-14,
            p1: 0.0,
            p2: 0.0,
            k3: 0.0,
            scale: 0.9,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            source: default_capture_source(),
            fps: default_fps(),
            looping: true,
        }
    }
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            reset_after_result: true,
            save_dir: None,
            max_frames: None,
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("failed to read config file {:?}", path.as_ref()))?;
        toml::from_str(&content).context("failed to parse config TOML")
    }

    /// Default config location: `<config dir>/Recognizer/recognizer.toml`
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Recognizer")
            .join("recognizer.toml")
    }

    /// Load an explicit config file, or the default one when it exists
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                info!("loading config from {:?}", path);
                Self::from_file(path)
            }
            None => {
                let path = Self::default_path();
                if path.is_file() {
                    info!("loading config from {:?}", path);
                    Self::from_file(&path)
                } else {
                    debug!("no config at {:?}, using defaults", path);
                    Ok(Self::default())
                }
            }
        }
    }

    /// Build session settings, loading the OCR model when a recognizer needs it
    pub fn to_settings(&self) -> Result<Settings> {
        let mut settings = Settings::new();
        settings
            .set_license(self.license.licensee.clone(), self.license.key.clone())
            .set_output_multiple_results(self.recognizers.output_multiple_results);

        if let Some(processors) = self.device.processors {
            settings.set_device_info(DeviceInfo::new(processors));
        } else {
            settings.set_device_info(DeviceInfo::default());
        }

        for name in &self.recognizers.enabled {
            match name.as_str() {
                "mrtd" => settings.set_mrtd(Some(self.recognizers.mrtd.clone())),
                "usdl" => settings.set_usdl(Some(self.recognizers.usdl.clone())),
                "pdf417" => settings.set_pdf417(Some(self.recognizers.pdf417.clone())),
                "zxing" => settings.set_zxing(Some(self.recognizers.zxing.clone())),
                "bar_decoder" => settings.set_bar_decoder(Some(self.recognizers.bar_decoder.clone())),
                other => bail!("unknown recognizer '{}' in config", other),
            };
        }

        if settings.mrtd.is_some() {
            let model = OcrModel::load(&self.model.path)
                .with_context(|| format!("failed to load OCR model {:?}", self.model.path))?;
            settings.set_ocr_model(model);
        }

        Ok(settings)
    }

    /// Lens correction for live frames; identity when disabled
    pub fn dewarper(&self) -> Result<BarrelDewarper> {
        if !self.dewarp.enabled {
            return Ok(BarrelDewarper::identity());
        }
        let d = &self.dewarp;
        let dewarper = BarrelDewarper::from_coefficients(DewarpCoefficients {
            k1: d.k1,
            k2: d.k2,
            p1: d.p1,
            p2: d.p2,
            k3: d.k3,
            scale: d.scale,
        })
        .context("invalid dewarp coefficients")?;
        Ok(dewarper)
    }

    /// Engine backend: the configured replay script, or one that never detects
    pub fn backend(&self) -> Result<ReplayBackend> {
        let script = match &self.engine.script {
            Some(path) => ReplayScript::load(path)
                .with_context(|| format!("failed to load replay script {:?}", path))?,
            None => {
                info!("no replay script configured, engine will not detect anything");
                ReplayScript::empty()
            }
        };
        Ok(ReplayBackend::new(script))
    }
}
