//! Prescription pipeline orchestrator
//!
//! Runs the stages strictly in order for one document:
//! conditioning (images only), recognition, correction, extraction,
//! validation and enrichment. An empty result at any stage ends the run
//! with that stage's own error.

use crate::chat::ChatClient;
use crate::config::BridgeConfig;
use crate::enrich::DetailEnricher;
use crate::extract::CandidateExtractor;
use crate::ocr::ReadClient;
use crate::rxnorm::RxNormClient;
use crate::sleep::{Sleeper, TokioSleeper};
use crate::validate::{FallbackProbe, SiteSearchProbe, TerminologyValidator};
use anyhow::Result;
use core_pipeline::{
    correct, ClinicalFactSource, DocumentKind, ExtractionReport, ImageConditioner, IntakePolicy,
    PipelineError, RawDocument, RunId, StagedDocument, StaticFactTable,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, info_span, warn, Instrument};

/// Receives one unit of usage per successful invocation
pub trait UsageRecorder: Send + Sync {
    fn record_usage(&self, run_id: RunId);
}

/// Usage recorder that only logs
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingUsageRecorder;

impl UsageRecorder for LoggingUsageRecorder {
    fn record_usage(&self, run_id: RunId) {
        info!(%run_id, "Recorded one unit of usage");
    }
}

/// Replaceable collaborators of the pipeline
pub struct PipelineParts {
    pub sleeper: Arc<dyn Sleeper>,
    pub facts: Arc<dyn ClinicalFactSource>,
    /// `None` uses [`SiteSearchProbe`] when the fallback is enabled
    pub probe: Option<Arc<dyn FallbackProbe>>,
    pub usage: Arc<dyn UsageRecorder>,
}

impl Default for PipelineParts {
    fn default() -> Self {
        Self {
            sleeper: Arc::new(TokioSleeper),
            facts: Arc::new(StaticFactTable),
            probe: None,
            usage: Arc::new(LoggingUsageRecorder),
        }
    }
}

pub struct PrescriptionPipeline {
    intake: IntakePolicy,
    conditioner: ImageConditioner,
    reader: ReadClient,
    extractor: CandidateExtractor,
    validator: TerminologyValidator,
    enricher: DetailEnricher,
    usage: Arc<dyn UsageRecorder>,
}

impl PrescriptionPipeline {
    /// Production pipeline with real delays and the built-in fact table
    pub fn from_config(config: &BridgeConfig) -> Result<Self> {
        Self::with_parts(config, PipelineParts::default())
    }

    pub fn with_parts(config: &BridgeConfig, parts: PipelineParts) -> Result<Self> {
        let rxnorm = Arc::new(RxNormClient::new(config.rxnorm.clone())?);
        let probe = if config.fallback.enabled {
            let probe: Arc<dyn FallbackProbe> = match parts.probe {
                Some(probe) => probe,
                None => Arc::new(SiteSearchProbe::new(config.fallback.clone())?),
            };
            Some(probe)
        } else {
            None
        };

        Ok(Self {
            intake: config.intake.clone(),
            conditioner: ImageConditioner::new(config.conditioner.clone()),
            reader: ReadClient::new(config.ocr.clone(), parts.sleeper.clone())?,
            extractor: CandidateExtractor::new(ChatClient::new(
                config.chat.clone(),
                parts.sleeper.clone(),
            )?),
            validator: TerminologyValidator::new(rxnorm.clone(), probe, parts.sleeper.clone()),
            enricher: DetailEnricher::new(rxnorm, parts.facts, parts.sleeper),
            usage: parts.usage,
        })
    }

    pub fn intake(&self) -> &IntakePolicy {
        &self.intake
    }

    /// Check, stage and process an uploaded document
    ///
    /// The staged temp file is removed before this returns, whatever the
    /// outcome.
    pub async fn process_upload(
        &self,
        filename: &str,
        bytes: &[u8],
    ) -> Result<ExtractionReport, PipelineError> {
        let staged = StagedDocument::stage(&self.intake, filename, bytes)?;
        self.process(staged.document(), staged.filename()).await
    }

    /// Process a document already on local storage
    pub async fn process_file(
        &self,
        document: &RawDocument,
    ) -> Result<ExtractionReport, PipelineError> {
        let name = document
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.process(document, &name).await
    }

    async fn process(
        &self,
        document: &RawDocument,
        name: &str,
    ) -> Result<ExtractionReport, PipelineError> {
        let run_id = RunId::new();
        let span = info_span!("pipeline", %run_id, file = %name);
        async {
            let started = Instant::now();
            let result = self.run(document, run_id, started).await;
            match &result {
                Ok(report) => {
                    info!(
                        "Processing completed in {:.2} seconds ({} medicines)",
                        report.processing_time_secs, report.total_medicines_found
                    );
                    self.usage.record_usage(run_id);
                }
                Err(e) => warn!(outcome = ?e.outcome(), "Processing stopped: {}", e),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn run(
        &self,
        document: &RawDocument,
        run_id: RunId,
        started: Instant,
    ) -> Result<ExtractionReport, PipelineError> {
        let recognized = match document.kind {
            DocumentKind::Image => {
                info!("Step 1: Conditioning image for OCR");
                let conditioner = self.conditioner.clone();
                let path = document.path.clone();
                let conditioned = tokio::task::spawn_blocking(move || conditioner.condition(&path))
                    .await
                    .map_err(|e| {
                        PipelineError::Internal(format!("Image conditioning task failed: {e}"))
                    })??;

                if let Err(rejection) = conditioned.validate(self.conditioner.config()) {
                    return Err(PipelineError::UnreadableFile {
                        path: document.path.clone(),
                        detail: rejection.to_string(),
                    });
                }

                info!("Step 2: Recognizing text");
                self.reader.recognize_image(&conditioned).await
            }
            DocumentKind::Pdf => {
                info!("Step 2: Recognizing text from PDF (no conditioning)");
                self.reader.recognize_pdf(&document.path).await
            }
        };

        let recognized = recognized
            .filter(|text| !text.trim().is_empty())
            .ok_or(PipelineError::NoTextExtracted)?;

        info!("Step 3: Correcting OCR text ({} chars)", recognized.len());
        let text = correct(&recognized);

        info!("Step 4: Extracting medicine candidates");
        let candidates = self
            .extractor
            .extract(&text)
            .await
            .map_err(|e| PipelineError::ExtractionFailed(format!("{e:#}")))?;
        if candidates.iter().all(|c| c.matched_name.trim().is_empty()) {
            return Err(PipelineError::NoMedicinesFound);
        }

        info!("Step 5: Validating {} candidates", candidates.len());
        let validated = self.validator.validate(candidates).await;

        info!("Step 6: Fetching medicine details");
        let medicines = self.enricher.enrich(validated).await;

        Ok(ExtractionReport::new(run_id, text, medicines, started.elapsed()))
    }
}
