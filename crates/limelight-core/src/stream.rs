//! Stream configuration presets handed to the streaming launcher.

use crate::error::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Enumerated resolution/framerate presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamPreset {
    #[serde(rename = "720p30")]
    Hd720p30,
    #[serde(rename = "720p60")]
    Hd720p60,
    #[serde(rename = "1080p30")]
    FullHd1080p30,
    #[serde(rename = "1080p60")]
    FullHd1080p60,
}

impl StreamPreset {
    /// All presets, lowest bandwidth first.
    pub const ALL: [StreamPreset; 4] = [
        StreamPreset::Hd720p30,
        StreamPreset::Hd720p60,
        StreamPreset::FullHd1080p30,
        StreamPreset::FullHd1080p60,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StreamPreset::Hd720p30 => "720p30",
            StreamPreset::Hd720p60 => "720p60",
            StreamPreset::FullHd1080p30 => "1080p30",
            StreamPreset::FullHd1080p60 => "1080p60",
        }
    }

    pub fn config(&self) -> StreamConfig {
        StreamConfig::from_preset(*self)
    }
}

impl Default for StreamPreset {
    fn default() -> Self {
        StreamPreset::Hd720p60
    }
}

impl fmt::Display for StreamPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StreamPreset {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StreamPreset::ALL
            .iter()
            .copied()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseError::InvalidValue(format!("unknown stream preset: {}", s)))
    }
}

/// Immutable stream parameters for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamConfig {
    width: u32,
    height: u32,
    fps: u32,
    /// Target bitrate in kbit/s.
    bitrate_kbps: u32,
}

impl StreamConfig {
    pub fn from_preset(preset: StreamPreset) -> Self {
        let (width, height, fps, bitrate_kbps) = match preset {
            StreamPreset::Hd720p30 => (1280, 720, 30, 5_000),
            StreamPreset::Hd720p60 => (1280, 720, 60, 10_000),
            StreamPreset::FullHd1080p30 => (1920, 1080, 30, 10_000),
            StreamPreset::FullHd1080p60 => (1920, 1080, 60, 20_000),
        };
        Self {
            width,
            height,
            fps,
            bitrate_kbps,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    pub fn bitrate_kbps(&self) -> u32 {
        self.bitrate_kbps
    }
}

impl From<StreamPreset> for StreamConfig {
    fn from(preset: StreamPreset) -> Self {
        StreamConfig::from_preset(preset)
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        StreamConfig::from_preset(StreamPreset::default())
    }
}
