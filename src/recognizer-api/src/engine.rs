//! Seam between the session state machine and a recognition engine

use serde::{Deserialize, Serialize};

use crate::callback::Events;
use crate::error::Result;
use crate::raw_image::Image;
use crate::result::ResultEntry;
use crate::settings::Settings;

/// How a frame relates to the frames before it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameMode {
    /// Independent single-shot analysis
    #[default]
    Still,
    /// Part of a continuous stream; the engine may accumulate across frames
    Video,
}

impl FrameMode {
    pub fn is_video(&self) -> bool {
        matches!(self, FrameMode::Video)
    }
}

/// Factory for engines, consulted once per session
pub trait Backend {
    fn name(&self) -> &str;

    /// Check license and configuration, then build an engine for the settings.
    ///
    /// The settings have already passed [`Settings::validate`].
    fn create_engine(&self, settings: &Settings) -> Result<Box<dyn Engine>>;
}

/// A live recognition engine owned by one session
pub trait Engine: Send {
    /// Run detection and recognition on one frame, reporting through `events`
    fn recognize(
        &mut self,
        image: &Image<'_>,
        mode: FrameMode,
        events: &mut Events<'_, '_>,
    ) -> Result<Vec<ResultEntry>>;

    /// Drop any state accumulated across video frames
    fn reset(&mut self);

    /// Free engine resources; called exactly once
    fn release(&mut self) {}
}
