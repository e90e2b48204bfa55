//! End-to-end tests for the prescription pipeline.
//!
//! OCR, chat and RxNav are all served by one wiremock server; delays run
//! through `InstantSleeper`, so the full schedules finish immediately.

use core_pipeline::{Outcome, RawDocument};
use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
use serde_json::json;
use service_bridge::{
    BridgeConfig, InstantSleeper, PipelineParts, PrescriptionPipeline, UsageRecorder,
};
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{header, method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ── Helpers ──────────────────────────────────────────────────────────────────

#[derive(Default)]
struct CountingRecorder(AtomicUsize);

impl UsageRecorder for CountingRecorder {
    fn record_usage(&self, _run_id: core_pipeline::RunId) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

struct Harness {
    server: MockServer,
    staging: tempfile::TempDir,
    sleeper: Arc<InstantSleeper>,
    usage: Arc<CountingRecorder>,
    pipeline: PrescriptionPipeline,
}

async fn harness() -> Harness {
    let server = MockServer::start().await;
    let staging = tempfile::tempdir().unwrap();

    let mut config = BridgeConfig::default();
    config.ocr.endpoint = server.uri();
    config.ocr.subscription_key = "test-key".to_string();
    config.chat.base_url = format!("{}/chat/completions", server.uri());
    config.chat.api_key = "sk-test".to_string();
    config.rxnorm.base_url = format!("{}/REST", server.uri());
    config.fallback.search_url = format!("{}/search/all", server.uri());
    config.intake.staging_dir = Some(staging.path().to_path_buf());

    let sleeper = Arc::new(InstantSleeper::new());
    let usage = Arc::new(CountingRecorder::default());
    let parts = PipelineParts {
        sleeper: sleeper.clone(),
        usage: usage.clone(),
        ..PipelineParts::default()
    };
    let pipeline = PrescriptionPipeline::with_parts(&config, parts).unwrap();

    Harness {
        server,
        staging,
        sleeper,
        usage,
        pipeline,
    }
}

async fn mount_ocr(server: &MockServer, lines: &[&str]) {
    Mock::given(method("POST"))
        .and(path("/vision/v3.2/read/analyze"))
        .and(header("Ocp-Apim-Subscription-Key", "test-key"))
        .respond_with(
            ResponseTemplate::new(202)
                .insert_header("Operation-Location", format!("{}/operations/1", server.uri())),
        )
        .mount(server)
        .await;

    let lines: Vec<_> = lines.iter().map(|l| json!({"text": l})).collect();
    Mock::given(method("GET"))
        .and(path("/operations/1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "succeeded",
            "analyzeResult": {"readResults": [{"lines": lines}]}
        })))
        .mount(server)
        .await;
}

async fn mount_chat(server: &MockServer, content: &str) {
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": content}}]
        })))
        .mount(server)
        .await;
}

/// Metoprolol resolves to RxCUI 6918; every other term has no match
async fn mount_rxnorm(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/REST/approximateTerm.json"))
        .and(query_param("term", "Metoprolol 50mg"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "approximateGroup": {"candidate": [
                {"rxcui": "6918", "score": "11.2", "name": "metoprolol"}
            ]}
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/REST/rxcui/6918/allrelated.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "allRelatedGroup": {"conceptGroup": [
                {"tty": "BN", "conceptProperties": [{"rxcui": "1", "name": "Lopressor"}]},
                {"tty": "IN", "conceptProperties": [{"rxcui": "6918", "name": "metoprolol"}]}
            ]}
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/REST/approximateTerm.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"approximateGroup": {}})))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex("^/REST/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(server)
        .await;
}

async fn mount_fallback(server: &MockServer, body_len: usize) {
    Mock::given(method("GET"))
        .and(path("/search/all"))
        .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(body_len)))
        .mount(server)
        .await;
}

fn png_bytes() -> Vec<u8> {
    let img = ImageBuffer::from_fn(200, 120, |x, _| {
        let v = 100 + (x % 100) as u8;
        Rgb([v, v, v])
    });
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

fn staged_files(dir: &Path) -> usize {
    std::fs::read_dir(dir).unwrap().count()
}

// ── Scenarios ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_image_upload_end_to_end() {
    let h = harness().await;
    mount_ocr(&h.server, &["City Clinic", "Metoprolol 50mg twice daily", "Crocin 650"]).await;
    mount_chat(
        &h.server,
        r#"[{"name": "Metoprolol 50mg", "position": "line 2"},
            {"name": "Crocin 650", "position": "line 3"}]"#,
    )
    .await;
    mount_rxnorm(&h.server).await;
    mount_fallback(&h.server, 2048).await;

    let report = h
        .pipeline
        .process_upload("prescription.png", &png_bytes())
        .await
        .unwrap();

    assert!(report.success);
    assert!(report.extracted_text.contains("Metoprolol 50mg"));
    assert_eq!(report.medicines.len(), 2);
    assert_eq!(report.total_medicines_found, 2);

    let metoprolol = &report.medicines[0];
    assert!(metoprolol.validated.rxnorm_validated);
    assert_eq!(metoprolol.validated.rxcui.as_deref(), Some("6918"));
    let details = metoprolol.details.as_ref().unwrap();
    assert_eq!(details.brand_names, vec!["Lopressor"]);
    assert_eq!(details.generic_names, vec!["metoprolol"]);
    assert!(details.indications.contains(&"Hypertension".to_string()));

    let crocin = &report.medicines[1];
    assert!(!crocin.validated.rxnorm_validated);
    assert!(crocin.validated.rxcui.is_none());
    assert!(crocin.validated.fallback_validated);
    assert!(crocin.details.is_none());

    assert_eq!(h.usage.0.load(Ordering::SeqCst), 1);
    assert_eq!(staged_files(h.staging.path()), 0);
    assert!(h.sleeper.requested().contains(&Duration::from_millis(500)));
    assert!(h.sleeper.requested().contains(&Duration::from_millis(200)));
}

#[tokio::test]
async fn test_pdf_skips_conditioning() {
    let h = harness().await;
    Mock::given(method("POST"))
        .and(path("/vision/v3.2/read/analyze"))
        .and(header("Content-Type", "application/pdf"))
        .respond_with(
            ResponseTemplate::new(202)
                .insert_header("Operation-Location", format!("{}/operations/1", h.server.uri())),
        )
        .expect(1)
        .mount(&h.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/operations/1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "succeeded",
            "analyzeResult": {"readResults": [
                {"lines": [{"text": "Take 10mg of Paracetamol daily"}]}
            ]}
        })))
        .mount(&h.server)
        .await;
    mount_chat(&h.server, r#"[{"name":"Paracetamol 500mg","position":"line 1"}]"#).await;
    mount_rxnorm(&h.server).await;
    mount_fallback(&h.server, 10).await;

    let dir = tempfile::tempdir().unwrap();
    let pdf = dir.path().join("scan.pdf");
    std::fs::write(&pdf, b"%PDF-1.4 fake").unwrap();
    let document = RawDocument::from_path(&pdf).unwrap();

    let report = h.pipeline.process_file(&document).await.unwrap();
    assert!(report.extracted_text.contains("10mg"));
    assert!(report.extracted_text.contains("daily"));

    let paracetamol = &report.medicines[0];
    assert_eq!(paracetamol.original_name(), "Paracetamol 500mg");
    assert_eq!(paracetamol.matched_name(), "Paracetamol 500mg");
    assert_eq!(paracetamol.validated.candidate.confidence_score, 95);
    assert!(!paracetamol.validated.rxnorm_validated);
    assert!(!paracetamol.validated.fallback_validated);
    assert!(paracetamol.details.is_none());
}

#[tokio::test]
async fn test_unsupported_upload_rejected_before_any_stage() {
    let h = harness().await;

    let err = h
        .pipeline
        .process_upload("notes.docx", b"PK\x03\x04")
        .await
        .unwrap_err();

    assert_eq!(err.outcome(), Outcome::InvalidInput);
    assert!(h.server.received_requests().await.unwrap().is_empty());
    assert_eq!(staged_files(h.staging.path()), 0);
    assert_eq!(h.usage.0.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_oversize_upload_rejected() {
    let h = harness().await;
    let big = vec![0u8; h.pipeline.intake().max_file_size + 1];

    let err = h.pipeline.process_upload("scan.jpg", &big).await.unwrap_err();
    assert_eq!(err.outcome(), Outcome::InvalidInput);
    assert!(h.server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_empty_extraction_is_no_medicines() {
    let h = harness().await;
    mount_ocr(&h.server, &["Patient: J. Doe", "Follow up in two weeks"]).await;
    mount_chat(&h.server, "[]").await;

    let err = h
        .pipeline
        .process_upload("rx.png", &png_bytes())
        .await
        .unwrap_err();

    assert_eq!(err.outcome(), Outcome::NoMedicinesRecognized);
    assert_eq!(staged_files(h.staging.path()), 0);
}

#[tokio::test]
async fn test_failed_analysis_is_no_text() {
    let h = harness().await;
    Mock::given(method("POST"))
        .and(path("/vision/v3.2/read/analyze"))
        .respond_with(
            ResponseTemplate::new(202)
                .insert_header("Operation-Location", format!("{}/operations/1", h.server.uri())),
        )
        .mount(&h.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/operations/1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "failed",
            "error": {"message": "InvalidImage"}
        })))
        .mount(&h.server)
        .await;

    let err = h
        .pipeline
        .process_upload("rx.png", &png_bytes())
        .await
        .unwrap_err();

    assert_eq!(err.outcome(), Outcome::NoTextFound);
    assert_eq!(staged_files(h.staging.path()), 0);
}

#[tokio::test]
async fn test_undecodable_image_is_no_text() {
    let h = harness().await;

    let err = h
        .pipeline
        .process_upload("rx.png", b"this is not a png")
        .await
        .unwrap_err();

    assert_eq!(err.outcome(), Outcome::NoTextFound);
    assert!(h.server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_chat_outage_is_processing_error() {
    let h = harness().await;
    mount_ocr(&h.server, &["Amoxicillin 250mg"]).await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&h.server)
        .await;

    let err = h
        .pipeline
        .process_upload("rx.png", &png_bytes())
        .await
        .unwrap_err();

    assert_eq!(err.outcome(), Outcome::ProcessingError);
    assert_eq!(
        h.sleeper
            .requested()
            .iter()
            .filter(|d| **d == Duration::from_secs(2))
            .count(),
        2
    );
    assert_eq!(h.usage.0.load(Ordering::SeqCst), 0);
}
