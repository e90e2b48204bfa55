//! RxNav REST client for the RxNorm terminology
//!
//! Every response is decoded into a typed struct. Missing optional keys
//! default to empty, so an unknown concept reads the same as an empty
//! result.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use std::time::Duration;
use tracing::debug;

/// Configuration for the RxNav client
#[derive(Debug, Clone)]
pub struct RxNormConfig {
    pub base_url: String,
    /// Courtesy delay after each approximate-match lookup
    pub lookup_delay: Duration,
    /// Courtesy delay after each detail call
    pub detail_delay: Duration,
    pub timeout_secs: u64,
}

impl Default for RxNormConfig {
    fn default() -> Self {
        Self {
            base_url: "https://rxnav.nlm.nih.gov/REST".to_string(),
            lookup_delay: Duration::from_millis(500),
            detail_delay: Duration::from_millis(200),
            timeout_secs: 10,
        }
    }
}

/// Best approximate match for a term
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ApproximateCandidate {
    #[serde(default)]
    pub rxcui: Option<String>,
    #[serde(default, deserialize_with = "score_from_any")]
    pub score: f64,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApproximateResponse {
    #[serde(default)]
    approximate_group: ApproximateGroup,
}

#[derive(Debug, Default, Deserialize)]
struct ApproximateGroup {
    #[serde(default)]
    candidate: Vec<ApproximateCandidate>,
}

/// Basic properties of a concept
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ConceptProperties {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub synonym: String,
    #[serde(default)]
    pub tty: String,
}

#[derive(Debug, Default, Deserialize)]
struct PropertiesResponse {
    #[serde(default)]
    properties: Option<ConceptProperties>,
}

/// One named property of a concept
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropConcept {
    #[serde(default)]
    pub prop_name: String,
    #[serde(default)]
    pub prop_value: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AllPropertiesResponse {
    #[serde(default)]
    prop_concept_group: Option<PropConceptGroup>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PropConceptGroup {
    #[serde(default)]
    prop_concept: Vec<PropConcept>,
}

/// Related concepts sharing one concept-type code
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConceptGroup {
    #[serde(default)]
    pub tty: String,
    #[serde(default)]
    pub concept_properties: Vec<RelatedConcept>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RelatedConcept {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub rxcui: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AllRelatedResponse {
    #[serde(default)]
    all_related_group: Option<AllRelatedGroup>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AllRelatedGroup {
    #[serde(default)]
    concept_group: Vec<ConceptGroup>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InteractionResponse {
    #[serde(default)]
    interaction_type_group: Vec<InteractionTypeGroup>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InteractionTypeGroup {
    #[serde(default)]
    interaction_type: Vec<InteractionType>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InteractionType {
    #[serde(default)]
    interaction_pair: Vec<InteractionPair>,
}

#[derive(Debug, Default, Deserialize)]
struct InteractionPair {
    #[serde(default)]
    description: String,
}

/// RxNav reports scores as strings; accept numbers as well
fn score_from_any<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Score {
        Number(f64),
        Text(String),
    }

    Ok(match Option::<Score>::deserialize(deserializer)? {
        Some(Score::Number(n)) => n,
        Some(Score::Text(s)) => s.trim().parse().unwrap_or(0.0),
        None => 0.0,
    })
}

/// RxNav API client
pub struct RxNormClient {
    config: RxNormConfig,
    client: reqwest::Client,
}

impl RxNormClient {
    pub fn new(config: RxNormConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &RxNormConfig {
        &self.config
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let url = format!("{}/{}", self.config.base_url.trim_end_matches('/'), path);
        debug!("GET {}", url);

        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", url))?;

        if !response.status().is_success() {
            anyhow::bail!("RxNav error {} for {}", response.status(), path);
        }

        response
            .json::<T>()
            .await
            .with_context(|| format!("Malformed RxNav response for {}", path))
    }

    /// Top-ranked approximate match for `term`, if any
    pub async fn approximate_term(&self, term: &str) -> Result<Option<ApproximateCandidate>> {
        let response: ApproximateResponse = self
            .get_json("approximateTerm.json", &[("term", term.trim())])
            .await?;
        Ok(response.approximate_group.candidate.into_iter().next())
    }

    pub async fn properties(&self, rxcui: &str) -> Result<Option<ConceptProperties>> {
        let response: PropertiesResponse = self
            .get_json(&format!("rxcui/{}/properties.json", rxcui), &[])
            .await?;
        Ok(response.properties)
    }

    pub async fn all_properties(&self, rxcui: &str) -> Result<Vec<PropConcept>> {
        let response: AllPropertiesResponse = self
            .get_json(&format!("rxcui/{}/allProperties.json", rxcui), &[("prop", "all")])
            .await?;
        Ok(response
            .prop_concept_group
            .map(|g| g.prop_concept)
            .unwrap_or_default())
    }

    pub async fn all_related(&self, rxcui: &str) -> Result<Vec<ConceptGroup>> {
        let response: AllRelatedResponse = self
            .get_json(&format!("rxcui/{}/allrelated.json", rxcui), &[])
            .await?;
        Ok(response
            .all_related_group
            .map(|g| g.concept_group)
            .unwrap_or_default())
    }

    /// Every interaction description, in response order (may repeat)
    pub async fn interactions(&self, rxcui: &str) -> Result<Vec<String>> {
        let response: InteractionResponse = self
            .get_json("interaction/interaction.json", &[("rxcui", rxcui)])
            .await?;
        Ok(response
            .interaction_type_group
            .into_iter()
            .flat_map(|g| g.interaction_type)
            .flat_map(|t| t.interaction_pair)
            .map(|p| p.description)
            .collect())
    }
}
