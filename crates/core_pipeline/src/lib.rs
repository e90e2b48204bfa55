//! Core pipeline for rxscan
//!
//! This crate provides the data structures and the network-free stages
//! for turning scanned prescriptions into validated medicine records:
//! document intake, image conditioning, OCR text correction, and the
//! clinical fact lookup used during enrichment.

pub mod clinical;
pub mod config;
pub mod correct;
pub mod error;
pub mod intake;
pub mod preprocess;
pub mod types;

pub use clinical::{ClinicalFactSource, ClinicalFacts, StaticFactTable};
pub use config::{ConditionerConfig, IntakePolicy};
pub use correct::correct;
pub use error::{ImageLoadError, ImageRejection, Outcome, PipelineError};
pub use intake::StagedDocument;
pub use preprocess::{ConditionedImage, ContrastStrategy, ImageConditioner, ImageStats};
pub use types::*;
