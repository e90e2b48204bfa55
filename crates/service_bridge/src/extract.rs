//! Medicine candidate extraction with a chat model

use crate::chat::ChatClient;
use anyhow::Result;
use core_pipeline::{ExtractionMethod, MedicineCandidate};
use serde::Deserialize;
use tracing::{info, warn};

const EXTRACTION_PROMPT: &str = r#"Extract only valid medicine names along with their dosages from the given text.

Strictly follow these rules:
1. Ignore all unrelated content such as names, addresses, contact info, instructions, manufacturer details, pharmacy details, and appointment-related data.
2. Discard words or phrases that are likely noise: single words or 2-4 letter tokens that do not resemble medicines or dosages.
3. Only include items that clearly indicate a medicine and optionally its strength or dosage, e.g., "Paracetamol 500mg", "Insulin 30/70", "Amoxicillin 250 mg/5ml".
4. Correct minor OCR errors or misspellings if the intended medicine is clear.
5. Be 90% certain before including an item. If unsure, discard it.
6. Return output as a JSON array. Each entry must include:
   - "name": cleaned and corrected medicine name with dosage.
   - "position": approximate location like "line 4" or "paragraph 2".

Example output:
[
  {"name": "Paracetamol 500mg", "position": "line 3"},
  {"name": "Ciprofloxacin 250mg", "position": "paragraph 1"}
]"#;

/// One entry of the model's JSON array
#[derive(Debug, Deserialize)]
struct RawCandidate {
    #[serde(default)]
    name: String,
    #[serde(default)]
    position: Option<String>,
}

/// Proposes medicine candidates from recognized text
pub struct CandidateExtractor {
    client: ChatClient,
}

impl CandidateExtractor {
    pub fn new(client: ChatClient) -> Self {
        Self { client }
    }

    /// Build the full prompt for `text`, cut to the configured word budget
    pub fn prompt(&self, text: &str) -> String {
        let text = truncate_words(text, self.client.config().word_budget);
        format!("{EXTRACTION_PROMPT}\n\nText to analyze:\n{text}")
    }

    /// Extract candidates from `text`
    ///
    /// Malformed replies degrade to the comma-split parse; only an API that
    /// keeps failing after its retry budget is an error.
    pub async fn extract(&self, text: &str) -> Result<Vec<MedicineCandidate>> {
        let prompt = self.prompt(text);
        let reply = self.client.complete(&prompt).await?;

        let candidates = match reply {
            Some(content) => parse_candidates(&content),
            None => Vec::new(),
        };
        info!("Extracted {} medicine candidates", candidates.len());
        Ok(candidates)
    }
}

/// Keep at most `budget` whitespace-separated words
pub fn truncate_words(text: &str, budget: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() > budget {
        words[..budget].join(" ")
    } else {
        text.to_string()
    }
}

/// Parse a model reply into candidates
///
/// The span from the first `[` to the last `]` (or the whole reply when
/// there is no such span) is decoded as an array of `{name, position}`
/// objects. If that fails the reply is split on commas instead.
pub fn parse_candidates(content: &str) -> Vec<MedicineCandidate> {
    let content = content.trim();
    let span = match (content.find('['), content.rfind(']')) {
        (Some(start), Some(end)) if end > start => &content[start..=end],
        _ => content,
    };

    match serde_json::from_str::<Vec<RawCandidate>>(span) {
        Ok(entries) => entries
            .into_iter()
            .enumerate()
            .map(|(idx, entry)| {
                let position = entry
                    .position
                    .unwrap_or_else(|| format!("position {}", idx + 1));
                MedicineCandidate::new(entry.name.trim(), position, ExtractionMethod::Structured)
            })
            .collect(),
        Err(e) => {
            warn!("Could not parse model reply as JSON ({}); splitting on commas", e);
            content
                .split(',')
                .map(str::trim)
                .enumerate()
                .filter(|(_, name)| !name.is_empty())
                .map(|(idx, name)| {
                    MedicineCandidate::new(
                        name,
                        format!("position {}", idx + 1),
                        ExtractionMethod::CommaSplit,
                    )
                })
                .collect()
        }
    }
}
