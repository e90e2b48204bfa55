//! Error types for the rxscan pipeline
//!
//! [`PipelineError`] is what a caller of the orchestrator sees. Every variant
//! maps onto one user-visible [`Outcome`], so "no text could be read",
//! "no medicines recognized" and "internal processing error" never collapse
//! into one generic failure.

use std::path::PathBuf;
use thiserror::Error;

/// Failure to load an input image
#[derive(Debug, Error)]
pub enum ImageLoadError {
    #[error("Image not found: '{path}'")]
    NotFound { path: PathBuf },

    #[error("Failed to load image '{path}': {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

/// A conditioned image that the OCR service would refuse
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageRejection {
    #[error("Image size {size} bytes exceeds the {limit} byte API limit")]
    TooLarge { size: usize, limit: usize },

    #[error("Image dimensions {width}x{height} outside [{min}, {max}] px")]
    BadDimensions {
        width: u32,
        height: u32,
        min: u32,
        max: u32,
    },
}

/// All errors returned by a pipeline invocation
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid file type '{extension}'. Allowed: {allowed}")]
    UnsupportedFileType { extension: String, allowed: String },

    #[error("File too large: {size} bytes (maximum {limit} bytes)")]
    FileTooLarge { size: usize, limit: usize },

    #[error("Unreadable file '{path}': {detail}")]
    UnreadableFile { path: PathBuf, detail: String },

    #[error("No text could be extracted from the document")]
    NoTextExtracted,

    #[error("No medicines were recognized in the document")]
    NoMedicinesFound,

    #[error("Candidate extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// User-visible classification of a pipeline result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Rejected before any stage ran
    InvalidInput,
    /// Image or OCR stage produced nothing readable
    NoTextFound,
    /// Text was read but no medicine candidate survived
    NoMedicinesRecognized,
    /// Anything else
    ProcessingError,
}

impl Outcome {
    pub fn user_message(&self) -> &'static str {
        match self {
            Outcome::InvalidInput => "The uploaded file was rejected.",
            Outcome::NoTextFound => "No text could be read from the document.",
            Outcome::NoMedicinesRecognized => "No medicines were recognized in the document.",
            Outcome::ProcessingError => "An internal error occurred while processing the document.",
        }
    }
}

impl PipelineError {
    pub fn outcome(&self) -> Outcome {
        match self {
            PipelineError::UnsupportedFileType { .. } | PipelineError::FileTooLarge { .. } => {
                Outcome::InvalidInput
            }
            PipelineError::UnreadableFile { .. } | PipelineError::NoTextExtracted => {
                Outcome::NoTextFound
            }
            PipelineError::NoMedicinesFound => Outcome::NoMedicinesRecognized,
            PipelineError::ExtractionFailed(_) | PipelineError::Internal(_) => {
                Outcome::ProcessingError
            }
        }
    }
}

impl From<ImageLoadError> for PipelineError {
    fn from(err: ImageLoadError) -> Self {
        let path = match &err {
            ImageLoadError::NotFound { path } | ImageLoadError::Decode { path, .. } => path.clone(),
        };
        PipelineError::UnreadableFile {
            path,
            detail: err.to_string(),
        }
    }
}
