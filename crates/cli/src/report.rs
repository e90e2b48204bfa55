//! Result files and the human-readable report

use anyhow::{Context, Result};
use core_pipeline::{Composition, EnrichedMedicine, ExtractionReport};
use serde::Serialize;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

pub const TEXT_FILE: &str = "extracted_text.txt";
pub const DETAILS_FILE: &str = "detailed_medicines.json";
pub const SUMMARY_FILE: &str = "medicine_summary.json";

/// Entry of `medicine_summary.json`, one per RxNorm-validated medicine
#[derive(Debug, Serialize)]
pub struct SummaryItem {
    pub original_name: String,
    pub matched_name: String,
    pub rxcui: String,
    pub confidence: String,
    #[serde(flatten)]
    pub details: Option<SummaryDetails>,
}

#[derive(Debug, Serialize)]
pub struct SummaryDetails {
    pub generic_names: Vec<String>,
    pub brand_names: Vec<String>,
    pub dosage_forms: Vec<String>,
    pub indications: Vec<String>,
    pub side_effects: Vec<String>,
    pub mechanism_of_action: String,
    pub drug_interactions_count: usize,
    pub composition: Composition,
}

pub fn summarize(medicines: &[EnrichedMedicine]) -> Vec<SummaryItem> {
    medicines
        .iter()
        .filter(|m| !m.matched_name().is_empty())
        .filter_map(|m| {
            let rxcui = m.validated.validated_rxcui()?;
            Some(SummaryItem {
                original_name: m.original_name().to_string(),
                matched_name: m.matched_name().to_string(),
                rxcui: rxcui.to_string(),
                confidence: format!("{:.1}%", m.validated.rxnorm_score),
                details: m.details.as_ref().map(|d| SummaryDetails {
                    generic_names: d.generic_names.clone(),
                    brand_names: d.brand_names.clone(),
                    dosage_forms: d.dosage_forms.clone(),
                    indications: d.indications.clone(),
                    side_effects: d.side_effects.clone(),
                    mechanism_of_action: d.mechanism_of_action.clone(),
                    drug_interactions_count: d.drug_interactions.len(),
                    composition: d.composition.clone(),
                }),
            })
        })
        .collect()
}

/// Write the three result files into `dir`, creating it if needed
pub fn write_exports(dir: &Path, report: &ExtractionReport) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;

    fs::write(dir.join(TEXT_FILE), &report.extracted_text)?;
    fs::write(
        dir.join(DETAILS_FILE),
        serde_json::to_string_pretty(&report.medicines)?,
    )?;
    fs::write(
        dir.join(SUMMARY_FILE),
        serde_json::to_string_pretty(&summarize(&report.medicines))?,
    )?;
    Ok(())
}

fn first(items: &[String], n: usize) -> String {
    items.iter().take(n).cloned().collect::<Vec<_>>().join(", ")
}

/// Render the report for a terminal
pub fn render(report: &ExtractionReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Processing completed in {:.2} seconds", report.processing_time_secs);
    let _ = writeln!(out, "\nExtracted Text:\n{}", report.extracted_text);
    let _ = writeln!(out, "\nExtracted Medicine Names with Details:");

    for (idx, medicine) in report.medicines.iter().enumerate() {
        let candidate = &medicine.validated.candidate;
        let matched = !candidate.matched_name.is_empty();
        let _ = writeln!(
            out,
            "\n{}. {} {} -> {} ({}%)",
            idx + 1,
            if matched { "[x]" } else { "[ ]" },
            candidate.original_name,
            if matched { candidate.matched_name.as_str() } else { "No match" },
            candidate.confidence_score
        );

        if let Some(rxcui) = medicine.validated.validated_rxcui() {
            let _ = writeln!(
                out,
                "   Verified in RxNorm (RxCUI: {}, Score: {:.1}%)",
                rxcui, medicine.validated.rxnorm_score
            );
        } else if medicine.validated.fallback_validated {
            let _ = writeln!(out, "   Not found in RxNorm; listed by fallback search");
        } else if matched {
            let _ = writeln!(out, "   Not found in RxNorm");
        }

        let Some(details) = &medicine.details else {
            continue;
        };
        if !details.generic_names.is_empty() {
            let _ = writeln!(out, "   Active Ingredients: {}", first(&details.generic_names, 3));
        }
        if !details.brand_names.is_empty() {
            let _ = writeln!(out, "   Brand Names: {}", first(&details.brand_names, 3));
        }
        if !details.dosage_forms.is_empty() {
            let _ = writeln!(out, "   Dosage Forms: {}", first(&details.dosage_forms, 3));
        }
        if !details.mechanism_of_action.is_empty() {
            let _ = writeln!(out, "   Mechanism: {}", details.mechanism_of_action);
        }
        if !details.indications.is_empty() {
            let _ = writeln!(out, "   Used For: {}", details.indications.join(", "));
        }
        if !details.side_effects.is_empty() {
            let _ = writeln!(out, "   Side Effects: {}", first(&details.side_effects, 5));
        }
        if !details.drug_interactions.is_empty() {
            let _ = writeln!(out, "   Interactions: {} found", details.drug_interactions.len());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_pipeline::{
        ExtractionMethod, MedicineCandidate, MedicineDetails, RunId, ValidatedMedicine,
    };
    use std::time::Duration;

    fn sample_report() -> ExtractionReport {
        let validated = ValidatedMedicine::from_rxnorm(
            MedicineCandidate::new("Metoprolol 50mg", "line 2", ExtractionMethod::Structured),
            "6918".to_string(),
            11.24,
            Some("metoprolol".to_string()),
        );
        let details = MedicineDetails {
            generic_names: vec!["metoprolol".to_string()],
            brand_names: ["Lopressor", "Toprol", "Betaloc", "Seloken"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            drug_interactions: vec!["one".to_string(), "two".to_string()],
            mechanism_of_action: "Selective beta-1 adrenergic receptor blocker".to_string(),
            ..MedicineDetails::default()
        };
        let unmatched = ValidatedMedicine::unvalidated(MedicineCandidate::new(
            "Crocin 650",
            "line 3",
            ExtractionMethod::CommaSplit,
        ));

        ExtractionReport::new(
            RunId::new(),
            "Metoprolol 50mg\nCrocin 650".to_string(),
            vec![
                EnrichedMedicine {
                    validated,
                    details: Some(details),
                },
                EnrichedMedicine {
                    validated: unmatched,
                    details: None,
                },
            ],
            Duration::from_millis(1234),
        )
    }

    #[test]
    fn test_summary_only_validated() {
        let report = sample_report();
        let summary = summarize(&report.medicines);
        assert_eq!(summary.len(), 1);
        assert_eq!(summary[0].rxcui, "6918");
        assert_eq!(summary[0].confidence, "11.2%");

        let json = serde_json::to_value(&summary[0]).unwrap();
        assert_eq!(json["drug_interactions_count"], 2);
        assert_eq!(json["generic_names"][0], "metoprolol");
    }

    #[test]
    fn test_render_report() {
        let text = render(&sample_report());
        assert!(text.contains("Processing completed in 1.23 seconds"));
        assert!(text.contains("1. [x] Metoprolol 50mg -> Metoprolol 50mg (95%)"));
        assert!(text.contains("Verified in RxNorm (RxCUI: 6918"));
        assert!(text.contains("Brand Names: Lopressor, Toprol, Betaloc\n"));
        assert!(text.contains("Interactions: 2 found"));
        assert!(text.contains("2. [x] Crocin 650 -> Crocin 650 (90%)"));
        assert!(text.contains("   Not found in RxNorm"));
    }

    #[test]
    fn test_write_exports() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("results");
        write_exports(&out, &sample_report()).unwrap();

        assert_eq!(
            fs::read_to_string(out.join(TEXT_FILE)).unwrap(),
            "Metoprolol 50mg\nCrocin 650"
        );
        let details: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(out.join(DETAILS_FILE)).unwrap()).unwrap();
        assert_eq!(details.as_array().unwrap().len(), 2);
        assert!(details[1]["details"].is_null());

        let summary: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(out.join(SUMMARY_FILE)).unwrap()).unwrap();
        assert_eq!(summary.as_array().unwrap().len(), 1);
    }
}
