//! On-disk clip format used by the CLI.
//!
//! A JSON document holding a decoded pixel volume together with the
//! container metadata the analysis needs. Container decoding itself happens
//! upstream; this is the hand-off point.

use std::path::Path;

use anyhow::Context;
use ceuslab_common::FrameTimingMetadata;
use ceuslab_volume_model::{PixelVolume, RegionDescriptor, VendorHint};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClipFile {
    pub volume: PixelVolume,
    #[serde(default)]
    pub regions: Vec<RegionDescriptor>,
    #[serde(default)]
    pub vendor: VendorHint,
    #[serde(default)]
    pub timing: FrameTimingMetadata,
}

impl ClipFile {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Clip file not found: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse clip {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string(self)?;
        std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
    }
}
