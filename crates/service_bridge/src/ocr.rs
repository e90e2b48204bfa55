//! Remote text recognition via the Azure Read API (v3.2)
//!
//! A document is submitted once and the returned operation handle is polled
//! on a fixed backoff schedule. The submit/poll sequence is modelled as an
//! explicit [`ReadPhase`] state machine driven by [`ReadClient`].

use crate::sleep::Sleeper;
use anyhow::{Context, Result};
use core_pipeline::preprocess::encode_jpeg;
use core_pipeline::{ConditionedImage, DocumentKind};
use image::RgbImage;
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const MB: usize = 1024 * 1024;
const SUBSCRIPTION_HEADER: &str = "Ocp-Apim-Subscription-Key";
const ANALYZE_PATH: &str = "vision/v3.2/read/analyze";

/// Configuration for the Read API client
#[derive(Clone)]
pub struct OcrConfig {
    /// Cognitive Services endpoint, e.g. https://<name>.cognitiveservices.azure.com/
    pub endpoint: String,
    pub subscription_key: String,
    /// Delay before each poll of the operation handle
    pub poll_schedule: Vec<Duration>,
    /// Encoded size the JPEG quality selection aims for
    pub jpeg_target_bytes: usize,
    /// Payloads above this are refused before submission
    pub hard_limit_bytes: usize,
    /// Timeout in seconds for each HTTP request
    pub timeout_secs: u64,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            subscription_key: String::new(),
            poll_schedule: [500, 1000, 2000, 3000, 4000, 5000]
                .into_iter()
                .map(Duration::from_millis)
                .collect(),
            jpeg_target_bytes: 3 * MB + 4 * MB / 5,
            hard_limit_bytes: 4 * MB,
            timeout_secs: 60,
        }
    }
}

impl fmt::Debug for OcrConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OcrConfig")
            .field("endpoint", &self.endpoint)
            .field("subscription_key", &"<redacted>")
            .field("poll_schedule", &self.poll_schedule)
            .field("jpeg_target_bytes", &self.jpeg_target_bytes)
            .field("hard_limit_bytes", &self.hard_limit_bytes)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl OcrConfig {
    fn analyze_url(&self) -> String {
        format!("{}/{}", self.endpoint.trim_end_matches('/'), ANALYZE_PATH)
    }
}

/// State of one read operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadPhase {
    /// Accepted by the service; `operation` is the handle to poll
    Submitted { operation: String },
    /// Waiting for the `attempt`-th poll (zero based)
    Polling { operation: String, attempt: usize },
    /// Recognized lines, newline-joined in document order
    Succeeded(String),
    Failed(String),
}

impl ReadPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReadPhase::Succeeded(_) | ReadPhase::Failed(_))
    }

    /// Transition after a poll; `response` is `None` when the poll itself
    /// returned a non-success status, which just moves on to the next slot
    pub fn after_poll(operation: String, attempt: usize, response: Option<AnalyzeResponse>) -> Self {
        let next = ReadPhase::Polling {
            operation,
            attempt: attempt + 1,
        };
        let Some(response) = response else {
            return next;
        };
        match response.status {
            ReadStatus::Succeeded => ReadPhase::Succeeded(response.text()),
            ReadStatus::Failed => ReadPhase::Failed(
                response
                    .error
                    .map(|e| e.message)
                    .unwrap_or_else(|| "Unknown error".to_string()),
            ),
            ReadStatus::NotStarted | ReadStatus::Running | ReadStatus::Unknown => next,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReadStatus {
    NotStarted,
    Running,
    Succeeded,
    Failed,
    #[serde(other)]
    Unknown,
}

/// Body of a poll response
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeResponse {
    pub status: ReadStatus,
    #[serde(default)]
    pub analyze_result: Option<AnalyzeResult>,
    #[serde(default)]
    pub error: Option<ApiError>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeResult {
    #[serde(default)]
    pub read_results: Vec<ReadResult>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReadResult {
    #[serde(default)]
    pub lines: Vec<TextLine>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TextLine {
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiError {
    #[serde(default)]
    pub message: String,
}

impl AnalyzeResponse {
    /// All lines across all pages, newline-joined
    pub fn text(&self) -> String {
        self.analyze_result
            .iter()
            .flat_map(|r| &r.read_results)
            .flat_map(|page| &page.lines)
            .map(|line| line.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string()
    }
}

/// Quality candidates for a given pixel count, lowest first
pub fn quality_candidates(pixel_count: u64) -> [u8; 3] {
    if pixel_count > 2_000_000 {
        [75, 80, 85]
    } else if pixel_count > 1_000_000 {
        [80, 85, 90]
    } else {
        [85, 90, 95]
    }
}

/// Encode with the highest candidate quality that fits `target_bytes`,
/// falling back to the lowest candidate
pub fn encode_for_submission(image: &RgbImage, target_bytes: usize) -> Result<(u8, Vec<u8>)> {
    let candidates = quality_candidates(image.width() as u64 * image.height() as u64);
    for quality in candidates.into_iter().rev() {
        let bytes = encode_jpeg(image, quality).context("Failed to encode image")?;
        if bytes.len() <= target_bytes {
            info!(
                "Selected JPEG quality: {}% (Size: {:.2}MB)",
                quality,
                bytes.len() as f64 / MB as f64
            );
            return Ok((quality, bytes));
        }
    }
    let quality = candidates[0];
    info!("Using minimum quality: {}%", quality);
    let bytes = encode_jpeg(image, quality).context("Failed to encode image")?;
    Ok((quality, bytes))
}

/// Read API client
pub struct ReadClient {
    config: OcrConfig,
    client: reqwest::Client,
    sleeper: Arc<dyn Sleeper>,
}

impl ReadClient {
    /// Create a new client; endpoint and subscription key are required
    pub fn new(config: OcrConfig, sleeper: Arc<dyn Sleeper>) -> Result<Self> {
        anyhow::ensure!(
            !config.endpoint.is_empty() && !config.subscription_key.is_empty(),
            "Azure subscription key and endpoint are required"
        );
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            config,
            client,
            sleeper,
        })
    }

    /// Recognize text in a conditioned image; `None` on any failure
    pub async fn recognize_image(&self, image: &ConditionedImage) -> Option<String> {
        let result = async {
            let pixels = image.image.clone();
            let target = self.config.jpeg_target_bytes;
            let (_, bytes) =
                tokio::task::spawn_blocking(move || encode_for_submission(&pixels, target))
                    .await
                    .context("JPEG encoding task failed")??;
            self.recognize_bytes(bytes, DocumentKind::Image).await
        }
        .await;
        Self::into_option(result)
    }

    /// Recognize text in a PDF, submitting the raw file bytes
    pub async fn recognize_pdf(&self, path: &Path) -> Option<String> {
        let result = async {
            let bytes = tokio::fs::read(path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            self.recognize_bytes(bytes, DocumentKind::Pdf).await
        }
        .await;
        Self::into_option(result)
    }

    fn into_option(result: Result<String>) -> Option<String> {
        match result {
            Ok(text) => Some(text),
            Err(e) => {
                warn!("Error during recognition: {:#}", e);
                None
            }
        }
    }

    /// Submit a payload and drive the read operation to a terminal phase
    pub async fn recognize_bytes(&self, bytes: Vec<u8>, kind: DocumentKind) -> Result<String> {
        let size = bytes.len();
        debug!("Sending payload: {:.2}MB", size as f64 / MB as f64);
        anyhow::ensure!(
            size <= self.config.hard_limit_bytes,
            "Payload size {:.2}MB exceeds API limit of {}MB",
            size as f64 / MB as f64,
            self.config.hard_limit_bytes / MB
        );

        let mut phase = ReadPhase::Submitted {
            operation: self.submit(bytes, kind).await?,
        };
        info!("Document submitted; waiting for results");

        loop {
            phase = match self.step(phase).await {
                ReadPhase::Succeeded(text) => {
                    info!("Text recognition completed ({} chars)", text.len());
                    return Ok(text);
                }
                ReadPhase::Failed(reason) => anyhow::bail!("Analysis failed: {}", reason),
                next => next,
            };
        }
    }

    async fn step(&self, phase: ReadPhase) -> ReadPhase {
        match phase {
            ReadPhase::Submitted { operation } => ReadPhase::Polling {
                operation,
                attempt: 0,
            },
            ReadPhase::Polling { operation, attempt } => {
                let Some(delay) = self.config.poll_schedule.get(attempt) else {
                    return ReadPhase::Failed(format!(
                        "No result after {} polls",
                        self.config.poll_schedule.len()
                    ));
                };
                self.sleeper.sleep(*delay).await;
                match self.poll(&operation).await {
                    Ok(response) => {
                        debug!("Poll {} status: {:?}", attempt + 1, response.as_ref().map(|r| r.status));
                        ReadPhase::after_poll(operation, attempt, response)
                    }
                    Err(e) => ReadPhase::Failed(format!("{:#}", e)),
                }
            }
            terminal => terminal,
        }
    }

    async fn submit(&self, bytes: Vec<u8>, kind: DocumentKind) -> Result<String> {
        let response = self
            .client
            .post(self.config.analyze_url())
            .header(SUBSCRIPTION_HEADER, &self.config.subscription_key)
            .header(reqwest::header::CONTENT_TYPE, kind.content_type())
            .body(bytes)
            .send()
            .await
            .context("Failed to submit document for analysis")?;

        let status = response.status();
        if status != reqwest::StatusCode::ACCEPTED {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Read API error: {} - {}", status, body);
        }

        let location = response
            .headers()
            .get("Operation-Location")
            .context("Read API response missing Operation-Location header")?
            .to_str()
            .context("Operation-Location header is not valid text")?;
        Ok(location.to_string())
    }

    /// `Ok(None)` when the poll returned a non-success status
    async fn poll(&self, operation: &str) -> Result<Option<AnalyzeResponse>> {
        let response = self
            .client
            .get(operation)
            .header(SUBSCRIPTION_HEADER, &self.config.subscription_key)
            .send()
            .await
            .context("Failed to poll read operation")?;

        if !response.status().is_success() {
            warn!("Error polling: {}", response.status());
            return Ok(None);
        }

        let analysis = response
            .json::<AnalyzeResponse>()
            .await
            .context("Malformed read operation response")?;
        Ok(Some(analysis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sleep::InstantSleeper;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn succeeded_body() -> serde_json::Value {
        json!({
            "status": "succeeded",
            "analyzeResult": {
                "readResults": [
                    {"lines": [{"text": "Rx"}, {"text": "Metoprolol 50mg"}]},
                    {"lines": [{"text": "Take daily"}]}
                ]
            }
        })
    }

    fn client_for(server: &MockServer, sleeper: Arc<InstantSleeper>) -> ReadClient {
        let config = OcrConfig {
            endpoint: format!("{}/", server.uri()),
            subscription_key: "test-key".to_string(),
            ..OcrConfig::default()
        };
        ReadClient::new(config, sleeper).unwrap()
    }

    async fn mount_submit(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/vision/v3.2/read/analyze"))
            .and(header("Ocp-Apim-Subscription-Key", "test-key"))
            .respond_with(
                ResponseTemplate::new(202)
                    .insert_header("Operation-Location", format!("{}/operations/42", server.uri())),
            )
            .mount(server)
            .await;
    }

    #[test]
    fn test_ocr_config_default() {
        let config = OcrConfig::default();
        assert_eq!(config.poll_schedule.len(), 6);
        assert_eq!(config.poll_schedule[0], Duration::from_millis(500));
        assert_eq!(config.hard_limit_bytes, 4 * MB);
    }

    #[test]
    fn test_debug_redacts_key() {
        let config = OcrConfig {
            subscription_key: "super-secret".to_string(),
            ..OcrConfig::default()
        };
        let printed = format!("{:?}", config);
        assert!(!printed.contains("super-secret"));
    }

    #[test]
    fn test_client_requires_credentials() {
        assert!(ReadClient::new(OcrConfig::default(), Arc::new(InstantSleeper::new())).is_err());
    }

    #[test]
    fn test_quality_candidates_by_size() {
        assert_eq!(quality_candidates(3_000_000), [75, 80, 85]);
        assert_eq!(quality_candidates(1_500_000), [80, 85, 90]);
        assert_eq!(quality_candidates(640 * 480), [85, 90, 95]);
    }

    #[test]
    fn test_encode_for_submission_picks_best_fit() {
        let image = RgbImage::from_pixel(64, 64, image::Rgb([200, 200, 200]));
        let (quality, bytes) = encode_for_submission(&image, MB).unwrap();
        assert_eq!(quality, 95);
        assert!(!bytes.is_empty());

        let (quality, _) = encode_for_submission(&image, 1).unwrap();
        assert_eq!(quality, 85);
    }

    #[test]
    fn test_after_poll_transitions() {
        let running: AnalyzeResponse = serde_json::from_value(json!({"status": "running"})).unwrap();
        assert_eq!(
            ReadPhase::after_poll("op".into(), 0, Some(running)),
            ReadPhase::Polling {
                operation: "op".into(),
                attempt: 1
            }
        );

        let failed: AnalyzeResponse =
            serde_json::from_value(json!({"status": "failed", "error": {"message": "bad page"}})).unwrap();
        assert_eq!(
            ReadPhase::after_poll("op".into(), 2, Some(failed)),
            ReadPhase::Failed("bad page".into())
        );

        let done: AnalyzeResponse = serde_json::from_value(succeeded_body()).unwrap();
        assert_eq!(
            ReadPhase::after_poll("op".into(), 0, Some(done)),
            ReadPhase::Succeeded("Rx\nMetoprolol 50mg\nTake daily".into())
        );

        assert!(matches!(
            ReadPhase::after_poll("op".into(), 3, None),
            ReadPhase::Polling { attempt: 4, .. }
        ));
    }

    #[test]
    fn test_unknown_status_keeps_polling() {
        let odd: AnalyzeResponse = serde_json::from_value(json!({"status": "queued"})).unwrap();
        assert_eq!(odd.status, ReadStatus::Unknown);

        let phase = ReadPhase::after_poll("op".to_string(), 0, Some(odd));
        assert_eq!(
            phase,
            ReadPhase::Polling {
                operation: "op".to_string(),
                attempt: 1
            }
        );
        assert!(!phase.is_terminal());
    }

    #[tokio::test]
    async fn test_recognize_image_submits_jpeg() {
        let server = MockServer::start().await;
        mount_submit(&server).await;
        Mock::given(method("GET"))
            .and(path("/operations/42"))
            .respond_with(ResponseTemplate::new(200).set_body_json(succeeded_body()))
            .mount(&server)
            .await;

        let conditioned = core_pipeline::ImageConditioner::default().condition_image(
            image::DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 64, image::Rgb([120, 120, 120]))),
        );
        let client = client_for(&server, Arc::new(InstantSleeper::new()));
        let text = client.recognize_image(&conditioned).await;
        assert_eq!(text.as_deref(), Some("Rx\nMetoprolol 50mg\nTake daily"));

        let requests = server.received_requests().await.unwrap();
        let submitted = requests.iter().find(|r| r.method.as_str() == "POST").unwrap();
        assert_eq!(&submitted.body[..2], &[0xFF, 0xD8]);
        assert_eq!(
            submitted.headers.get("content-type").unwrap().to_str().unwrap(),
            "application/octet-stream"
        );
    }

    #[tokio::test]
    async fn test_recognize_after_running_polls() {
        let server = MockServer::start().await;
        mount_submit(&server).await;
        Mock::given(method("GET"))
            .and(path("/operations/42"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "running"})))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/operations/42"))
            .respond_with(ResponseTemplate::new(200).set_body_json(succeeded_body()))
            .mount(&server)
            .await;

        let sleeper = Arc::new(InstantSleeper::new());
        let client = client_for(&server, sleeper.clone());
        let text = client
            .recognize_bytes(b"%PDF-1.4".to_vec(), DocumentKind::Pdf)
            .await
            .unwrap();

        assert_eq!(text, "Rx\nMetoprolol 50mg\nTake daily");
        assert_eq!(
            sleeper.requested(),
            vec![
                Duration::from_millis(500),
                Duration::from_secs(1),
                Duration::from_secs(2)
            ]
        );
    }

    #[tokio::test]
    async fn test_schedule_exhaustion_is_failure() {
        let server = MockServer::start().await;
        mount_submit(&server).await;
        Mock::given(method("GET"))
            .and(path("/operations/42"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "running"})))
            .mount(&server)
            .await;

        let sleeper = Arc::new(InstantSleeper::new());
        let client = client_for(&server, sleeper.clone());
        let result = client.recognize_bytes(vec![1, 2, 3], DocumentKind::Image).await;

        assert!(result.is_err());
        assert_eq!(sleeper.requested().len(), 6);
        assert_eq!(sleeper.total(), Duration::from_millis(15_500));
    }

    #[tokio::test]
    async fn test_rejected_submission_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/vision/v3.2/read/analyze"))
            .respond_with(ResponseTemplate::new(401).set_body_string("Access denied"))
            .mount(&server)
            .await;

        let sleeper = Arc::new(InstantSleeper::new());
        let client = client_for(&server, sleeper.clone());
        let dir = tempfile::tempdir().unwrap();
        let pdf = dir.path().join("rx.pdf");
        std::fs::write(&pdf, b"%PDF-1.4").unwrap();

        assert!(client.recognize_pdf(&pdf).await.is_none());
        assert!(sleeper.requested().is_empty());
    }

    #[tokio::test]
    async fn test_oversize_payload_not_submitted() {
        let server = MockServer::start().await;
        let sleeper = Arc::new(InstantSleeper::new());
        let config = OcrConfig {
            endpoint: server.uri(),
            subscription_key: "test-key".to_string(),
            hard_limit_bytes: 4,
            ..OcrConfig::default()
        };
        let client = ReadClient::new(config, sleeper).unwrap();

        let result = client.recognize_bytes(vec![0; 5], DocumentKind::Image).await;
        assert!(result.is_err());
        assert!(server.received_requests().await.unwrap_or_default().is_empty());
    }
}
