//! Terminology validation of medicine candidates
//!
//! Each candidate is looked up against RxNorm's approximate-match endpoint.
//! When that yields nothing usable, a [`FallbackProbe`] may confirm that a
//! consumer drug-reference site knows the name. The probe is only a weak
//! existence signal and its acceptance rule lives in [`FallbackConfig`].

use crate::rxnorm::RxNormClient;
use crate::sleep::Sleeper;
use anyhow::{Context, Result};
use async_trait::async_trait;
use core_pipeline::{MedicineCandidate, ValidatedMedicine};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Settings for the site-search fallback
#[derive(Debug, Clone)]
pub struct FallbackConfig {
    pub enabled: bool,
    pub search_url: String,
    pub query_param: String,
    pub user_agent: String,
    /// A 200 response must be strictly longer than this to count
    pub min_content_length: usize,
    pub timeout_secs: u64,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            search_url: "https://www.1mg.com/search/all".to_string(),
            query_param: "name".to_string(),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36"
                .to_string(),
            min_content_length: 500,
            timeout_secs: 10,
        }
    }
}

/// Evidence returned by a successful fallback probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackHit {
    pub url: String,
    pub status: u16,
}

/// Weak-signal check that a medicine name exists somewhere
#[async_trait]
pub trait FallbackProbe: Send + Sync {
    async fn probe(&self, name: &str) -> Option<FallbackHit>;
}

/// Searches a consumer drug-reference site and accepts any page that is
/// long enough
pub struct SiteSearchProbe {
    config: FallbackConfig,
    client: reqwest::Client,
}

impl SiteSearchProbe {
    pub fn new(config: FallbackConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self { config, client })
    }

    async fn search(&self, name: &str) -> Result<(reqwest::Url, u16, usize)> {
        let url = reqwest::Url::parse_with_params(
            &self.config.search_url,
            &[(self.config.query_param.as_str(), name.trim())],
        )
        .context("Invalid fallback search URL")?;

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .context("Fallback search failed")?;
        let status = response.status().as_u16();
        let body = response.text().await.context("Failed to read fallback page")?;
        Ok((url, status, body.len()))
    }
}

#[async_trait]
impl FallbackProbe for SiteSearchProbe {
    async fn probe(&self, name: &str) -> Option<FallbackHit> {
        match self.search(name).await {
            Ok((url, status, length)) => {
                debug!("Fallback search for '{}': {} ({} bytes)", name, status, length);
                (status == 200 && length > self.config.min_content_length).then(|| FallbackHit {
                    url: url.to_string(),
                    status,
                })
            }
            Err(e) => {
                warn!("Fallback validation error for '{}': {:#}", name, e);
                None
            }
        }
    }
}

/// Validates candidates, producing exactly one result per input, in order
pub struct TerminologyValidator {
    rxnorm: Arc<RxNormClient>,
    probe: Option<Arc<dyn FallbackProbe>>,
    sleeper: Arc<dyn Sleeper>,
}

impl TerminologyValidator {
    pub fn new(
        rxnorm: Arc<RxNormClient>,
        probe: Option<Arc<dyn FallbackProbe>>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            rxnorm,
            probe,
            sleeper,
        }
    }

    pub async fn validate(&self, candidates: Vec<MedicineCandidate>) -> Vec<ValidatedMedicine> {
        let mut validated = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            validated.push(self.validate_one(candidate).await);
        }

        let primary = validated.iter().filter(|m| m.rxnorm_validated).count();
        let fallback = validated.iter().filter(|m| m.fallback_validated).count();
        info!(
            "Validated {} candidates ({} RxNorm, {} fallback)",
            validated.len(),
            primary,
            fallback
        );
        validated
    }

    async fn validate_one(&self, candidate: MedicineCandidate) -> ValidatedMedicine {
        let name = candidate.matched_name.trim().to_string();
        if name.is_empty() {
            return ValidatedMedicine::unvalidated(candidate);
        }

        let lookup = self.rxnorm.approximate_term(&name).await;
        self.sleeper.sleep(self.rxnorm.config().lookup_delay).await;

        match lookup {
            Ok(Some(best)) => match best.rxcui.filter(|id| !id.is_empty()) {
                Some(rxcui) => {
                    debug!("'{}' matched RxCUI {} (score {})", name, rxcui, best.score);
                    return ValidatedMedicine::from_rxnorm(candidate, rxcui, best.score, best.name);
                }
                None => debug!("'{}' best match has no RxCUI", name),
            },
            Ok(None) => debug!("No RxNorm match for '{}'", name),
            Err(e) => warn!("RxNorm validation error for '{}': {:#}", name, e),
        }

        let Some(probe) = &self.probe else {
            return ValidatedMedicine::unvalidated(candidate);
        };
        let hit = probe.probe(&name).await;
        self.sleeper.sleep(self.rxnorm.config().lookup_delay).await;

        match hit {
            Some(hit) => ValidatedMedicine::from_fallback(candidate, hit.url, hit.status),
            None => ValidatedMedicine::unvalidated(candidate),
        }
    }
}
