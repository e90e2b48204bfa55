//! Core types for the rxscan pipeline
//!
//! This module defines the typed records handed from one pipeline stage
//! to the next. Every stage boundary produces one of these, never a loose
//! JSON map.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Confidence assigned to candidates recovered from a well-formed JSON array
pub const STRUCTURED_CONFIDENCE: u8 = 95;

/// Confidence assigned to candidates recovered by splitting on commas
pub const FALLBACK_CONFIDENCE: u8 = 90;

/// Unique identifier for one pipeline invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of document handed to the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    /// Raster image (JPEG, PNG, BMP, TIFF)
    Image,
    /// PDF document, submitted to OCR without conditioning
    Pdf,
}

impl DocumentKind {
    /// Detect the kind from a file extension (case-insensitive, with or without dot)
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "jpg" | "jpeg" | "png" | "bmp" | "tiff" | "tif" => Some(Self::Image),
            _ => None,
        }
    }

    /// Content type used when submitting this kind to the OCR service
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Image => "application/octet-stream",
            Self::Pdf => "application/pdf",
        }
    }
}

/// An input document: a local path plus its detected kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDocument {
    pub path: PathBuf,
    pub kind: DocumentKind,
}

impl RawDocument {
    /// Build a document from a path, detecting the kind from its extension
    pub fn from_path(path: impl AsRef<Path>) -> Option<Self> {
        let path = path.as_ref();
        let kind = DocumentKind::from_extension(path.extension()?.to_str()?)?;
        Some(Self {
            path: path.to_path_buf(),
            kind,
        })
    }
}

/// How a candidate was recovered from the generative model's reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    /// Parsed from a JSON array of `{name, position}` objects
    Structured,
    /// Recovered by splitting the raw reply on commas
    CommaSplit,
}

impl ExtractionMethod {
    /// Fixed confidence constant for this extraction path
    pub fn confidence(&self) -> u8 {
        match self {
            Self::Structured => STRUCTURED_CONFIDENCE,
            Self::CommaSplit => FALLBACK_CONFIDENCE,
        }
    }
}

/// A medicine mention proposed by the candidate extractor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedicineCandidate {
    /// Name as produced by the extractor
    pub original_name: String,
    /// Name used for terminology lookups (empty means "nothing to validate")
    pub matched_name: String,
    /// Fixed confidence constant (0-100) tied to `method`
    pub confidence_score: u8,
    /// Approximate location in the source text, e.g. "line 3"
    pub source_position: String,
    /// Extraction path that produced this candidate
    pub method: ExtractionMethod,
}

impl MedicineCandidate {
    pub fn new(name: impl Into<String>, position: impl Into<String>, method: ExtractionMethod) -> Self {
        let name = name.into();
        Self {
            original_name: name.clone(),
            matched_name: name,
            confidence_score: method.confidence(),
            source_position: position.into(),
            method,
        }
    }
}

/// A candidate after terminology validation
///
/// Exactly one of the primary (RxNorm) and fallback paths populates its
/// fields; the other keeps its unvalidated defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedMedicine {
    #[serde(flatten)]
    pub candidate: MedicineCandidate,
    pub rxnorm_validated: bool,
    pub rxcui: Option<String>,
    /// Approximate-match score reported by the terminology service (0-100)
    pub rxnorm_score: f64,
    pub rxnorm_name: Option<String>,
    pub fallback_validated: bool,
    pub fallback_url: Option<String>,
    pub fallback_status: Option<u16>,
}

impl ValidatedMedicine {
    /// A candidate that neither validation path accepted
    pub fn unvalidated(candidate: MedicineCandidate) -> Self {
        Self {
            candidate,
            rxnorm_validated: false,
            rxcui: None,
            rxnorm_score: 0.0,
            rxnorm_name: None,
            fallback_validated: false,
            fallback_url: None,
            fallback_status: None,
        }
    }

    /// A candidate accepted by the primary terminology lookup
    pub fn from_rxnorm(
        candidate: MedicineCandidate,
        rxcui: String,
        score: f64,
        name: Option<String>,
    ) -> Self {
        Self {
            rxnorm_validated: true,
            rxcui: Some(rxcui),
            rxnorm_score: score,
            rxnorm_name: name,
            ..Self::unvalidated(candidate)
        }
    }

    /// A candidate confirmed only by the weak-signal fallback lookup
    pub fn from_fallback(candidate: MedicineCandidate, url: String, status: u16) -> Self {
        Self {
            fallback_validated: true,
            fallback_url: Some(url),
            fallback_status: Some(status),
            ..Self::unvalidated(candidate)
        }
    }

    /// The identifier to enrich with, present only on the validated path
    pub fn validated_rxcui(&self) -> Option<&str> {
        if self.rxnorm_validated {
            self.rxcui.as_deref()
        } else {
            None
        }
    }
}

/// Basic concept properties of the matched RxCUI
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BasicInfo {
    pub name: String,
    pub synonym: String,
    pub tty: String,
}

/// An active ingredient reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ingredient {
    pub name: String,
    pub rxcui: String,
}

/// Composition and strength details of a concept
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Composition {
    pub basic_info: Option<BasicInfo>,
    /// "RxNorm Name" property
    pub name: Option<String>,
    /// "Prescribable Name" property
    pub prescribable_name: Option<String>,
    pub strength: Option<String>,
    pub ingredients: Vec<Ingredient>,
}

/// Clinical metadata attached to a validated medicine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MedicineDetails {
    pub composition: Composition,
    /// Deduplicated, in order of first appearance
    pub brand_names: Vec<String>,
    /// Deduplicated, in order of first appearance
    pub generic_names: Vec<String>,
    /// Deduplicated, in order of first appearance
    pub dosage_forms: Vec<String>,
    /// Distinct interaction descriptions, at most five
    pub drug_interactions: Vec<String>,
    pub indications: Vec<String>,
    pub contraindications: Vec<String>,
    pub side_effects: Vec<String>,
    pub mechanism_of_action: String,
}

/// Terminal record handed back to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedMedicine {
    #[serde(flatten)]
    pub validated: ValidatedMedicine,
    /// Present only when `rxnorm_validated` is true
    pub details: Option<MedicineDetails>,
}

impl EnrichedMedicine {
    pub fn original_name(&self) -> &str {
        &self.validated.candidate.original_name
    }

    pub fn matched_name(&self) -> &str {
        &self.validated.candidate.matched_name
    }
}

/// Final result of one successful pipeline invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionReport {
    pub run_id: RunId,
    pub success: bool,
    pub message: String,
    /// Text after OCR correction
    pub extracted_text: String,
    pub medicines: Vec<EnrichedMedicine>,
    /// Wall-clock seconds, rounded to hundredths
    pub processing_time_secs: f64,
    /// Number of medicines with a non-empty matched name
    pub total_medicines_found: usize,
}

impl ExtractionReport {
    pub fn new(
        run_id: RunId,
        extracted_text: String,
        medicines: Vec<EnrichedMedicine>,
        elapsed: std::time::Duration,
    ) -> Self {
        let total_medicines_found = medicines
            .iter()
            .filter(|m| !m.matched_name().is_empty())
            .count();
        Self {
            run_id,
            success: true,
            message: "Medicine extraction completed successfully".to_string(),
            extracted_text,
            medicines,
            processing_time_secs: (elapsed.as_secs_f64() * 100.0).round() / 100.0,
            total_medicines_found,
        }
    }
}
