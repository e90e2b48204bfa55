//! Configuration for the network-free stages
//!
//! Values are constructed once by the caller and passed into each stage;
//! nothing here reads process-wide state.

use std::path::PathBuf;

const MB: usize = 1024 * 1024;

/// Thresholds used by the image conditioner
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionerConfig {
    /// Encoded size the adaptive downscale aims for
    pub target_size_bytes: usize,
    /// Hard payload limit of the OCR service
    pub hard_limit_bytes: usize,
    /// Downscaling never goes below this many pixels per side
    pub min_dimension: u32,
    /// Maximum extra downscale passes after the first estimate
    pub max_resize_iterations: u32,
    /// Working ceiling for the longest side
    pub max_dimension: u32,
    /// Grayscale standard deviation below which an image is low contrast
    pub low_contrast: f32,
    /// Grayscale standard deviation above which an image is high contrast
    pub high_contrast: f32,
    /// Re-compress when the result is within this many bytes of the hard limit
    pub final_margin_bytes: usize,
    /// Scale applied by the final re-compression
    pub final_scale: f32,
    /// JPEG quality used to estimate encoded size
    pub estimate_quality: u8,
    /// Smallest acceptable side for OCR submission
    pub min_side: u32,
    /// Largest acceptable side for OCR submission
    pub max_side: u32,
}

impl Default for ConditionerConfig {
    fn default() -> Self {
        Self {
            target_size_bytes: 3 * MB + MB / 2,
            hard_limit_bytes: 4 * MB,
            min_dimension: 800,
            max_resize_iterations: 5,
            max_dimension: 3000,
            low_contrast: 20.0,
            high_contrast: 40.0,
            final_margin_bytes: MB / 5,
            final_scale: 0.95,
            estimate_quality: 85,
            min_side: 50,
            max_side: 10_000,
        }
    }
}

/// Rules applied to a document before any stage runs
#[derive(Debug, Clone, PartialEq)]
pub struct IntakePolicy {
    /// Lowercase extensions including the dot
    pub allowed_extensions: Vec<String>,
    pub max_file_size: usize,
    /// Directory for staged temp files (system temp dir when `None`)
    pub staging_dir: Option<PathBuf>,
}

impl Default for IntakePolicy {
    fn default() -> Self {
        Self {
            allowed_extensions: [".jpg", ".jpeg", ".png", ".bmp", ".tiff", ".pdf"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_file_size: 10 * MB,
            staging_dir: None,
        }
    }
}
