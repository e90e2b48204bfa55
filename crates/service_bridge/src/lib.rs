//! Service bridge for rxscan
//!
//! Integrates the external services a prescription run depends on: the
//! Azure Read API for text recognition, an OpenRouter chat model for
//! candidate extraction, and RxNav for terminology validation and drug
//! details. Also hosts the orchestrator that chains every stage.
//!
//! Copyright (c) 2025 Michael A Wright

pub mod chat;
pub mod config;
pub mod enrich;
pub mod extract;
pub mod ocr;
pub mod pipeline;
pub mod rxnorm;
pub mod sleep;
pub mod validate;

pub use chat::{ChatClient, ChatConfig};
pub use config::BridgeConfig;
pub use enrich::DetailEnricher;
pub use extract::CandidateExtractor;
pub use ocr::{OcrConfig, ReadClient, ReadPhase};
pub use pipeline::{LoggingUsageRecorder, PipelineParts, PrescriptionPipeline, UsageRecorder};
pub use rxnorm::{RxNormClient, RxNormConfig};
pub use sleep::{InstantSleeper, Sleeper, TokioSleeper};
pub use validate::{FallbackConfig, FallbackProbe, SiteSearchProbe, TerminologyValidator};
