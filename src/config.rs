//! Configuration for the feature extraction pipeline.
//!
//! All fields have defaults, so an empty JSON object (`{}`) is a valid config.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;

use crate::error::{ExtractError, Result};

// ============================================================================
// Window Configuration
// ============================================================================

/// Fixed-width window layout shared by every feature family.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowConfig {
    /// Start of the first window on every contig
    #[serde(default = "default_first_start")]
    pub first_start: usize,
    /// Window width in bases
    #[serde(default = "default_window_size")]
    pub size: usize,
    /// Scanning stops after the window that leaves this many bases or fewer
    #[serde(default = "default_min_tail")]
    pub min_tail: usize,
}

fn default_first_start() -> usize { 300 }
fn default_window_size() -> usize { 100 }
fn default_min_tail() -> usize { 300 }

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            first_start: default_first_start(),
            size: default_window_size(),
            min_tail: default_min_tail(),
        }
    }
}

// ============================================================================
// Read Signal Thresholds
// ============================================================================

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq)]
pub struct ReadThresholds {
    /// A read counts as clipped when its soft-clipped bases exceed this
    #[serde(default = "default_clip_min")]
    pub clip_min: usize,
    /// A supplementary read is counted when its hard-clipped bases exceed this
    #[serde(default = "default_hard_clip_min")]
    pub hard_clip_min: usize,
    /// Proper fragment sizes lie within median +/- multiplier * MAD
    #[serde(default = "default_mad_multiplier")]
    pub mad_multiplier: f64,
}

fn default_clip_min() -> usize { 20 }
fn default_hard_clip_min() -> usize { 20 }
fn default_mad_multiplier() -> f64 { 3.0 }

impl Default for ReadThresholds {
    fn default() -> Self {
        Self {
            clip_min: default_clip_min(),
            hard_clip_min: default_hard_clip_min(),
            mad_multiplier: default_mad_multiplier(),
        }
    }
}

// ============================================================================
// KAD Thresholds
// ============================================================================

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq)]
pub struct KadConfig {
    /// K-mer length of the count tables
    #[serde(default = "default_k")]
    pub k: usize,
    /// |KAD| above this is abnormal
    #[serde(default = "default_abnormal_threshold")]
    pub abnormal_threshold: f64,
    /// Read k-mers counted above this feed the fallback depth estimate
    #[serde(default = "default_depth_fallback_min_count")]
    pub depth_fallback_min_count: u32,
}

fn default_k() -> usize { 25 }
fn default_abnormal_threshold() -> f64 { 0.5 }
fn default_depth_fallback_min_count() -> u32 { 5 }

impl Default for KadConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            abnormal_threshold: default_abnormal_threshold(),
            depth_fallback_min_count: default_depth_fallback_min_count(),
        }
    }
}

// ============================================================================
// Extraction Configuration
// ============================================================================

/// Main extraction configuration
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct ExtractConfig {
    /// Contigs shorter than this are excluded from every feature family
    #[serde(default = "default_min_length")]
    pub min_length: usize,
    /// Worker threads; 1 runs everything sequentially
    #[serde(default = "default_threads")]
    pub threads: usize,
    #[serde(default)]
    pub window: WindowConfig,
    #[serde(default)]
    pub reads: ReadThresholds,
    #[serde(default)]
    pub kad: KadConfig,
}

fn default_min_length() -> usize { 5000 }
fn default_threads() -> usize { 1 }

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            min_length: default_min_length(),
            threads: default_threads(),
            window: WindowConfig::default(),
            reads: ReadThresholds::default(),
            kad: KadConfig::default(),
        }
    }
}

impl ExtractConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &str) -> Result<Self> {
        let file = File::open(path).map_err(|e| ExtractError::io(e, path))?;
        let config: ExtractConfig = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| ExtractError::Config(format!("{}: {}", path, e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject layouts that would make windowing or k-mer mapping meaningless.
    pub fn validate(&self) -> Result<()> {
        if self.window.size == 0 {
            return Err(ExtractError::Config("window.size must be positive".into()));
        }
        if self.kad.k == 0 {
            return Err(ExtractError::Config("kad.k must be positive".into()));
        }
        if self.threads == 0 {
            return Err(ExtractError::Config("threads must be at least 1".into()));
        }
        if !(self.reads.mad_multiplier >= 0.0) {
            return Err(ExtractError::Config(
                "reads.mad_multiplier must be non-negative".into(),
            ));
        }
        Ok(())
    }

    /// True when a contig passes the minimum length filter.
    pub fn keeps(&self, length: usize) -> bool {
        length >= self.min_length
    }
}
