//! Clinical fact lookup
//!
//! The enricher only depends on [`ClinicalFactSource`]; the built-in
//! [`StaticFactTable`] covers a handful of common drugs and can be swapped
//! for a richer store without touching the enrichment algorithm.

/// Known clinical facts for an ingredient
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClinicalFacts {
    pub indications: Vec<String>,
    pub contraindications: Vec<String>,
    pub side_effects: Vec<String>,
    pub mechanism_of_action: String,
}

/// Given an ingredient name, return known clinical facts or none
pub trait ClinicalFactSource: Send + Sync {
    fn lookup(&self, ingredient: &str) -> Option<ClinicalFacts>;
}

struct FactEntry {
    key: &'static str,
    indications: &'static [&'static str],
    side_effects: &'static [&'static str],
    mechanism_of_action: &'static str,
}

const KNOWN_DRUGS: &[FactEntry] = &[
    FactEntry {
        key: "metoprolol",
        indications: &["Hypertension", "Heart failure", "Angina", "Post-myocardial infarction"],
        side_effects: &["Fatigue", "Dizziness", "Depression", "Cold hands/feet", "Slow heart rate"],
        mechanism_of_action: "Selective beta-1 adrenergic receptor blocker",
    },
    FactEntry {
        key: "dorzolamide",
        indications: &["Glaucoma", "Ocular hypertension"],
        side_effects: &["Eye irritation", "Bitter taste", "Blurred vision", "Eye pain"],
        mechanism_of_action: "Carbonic anhydrase inhibitor - reduces aqueous humor production",
    },
    FactEntry {
        key: "cimetidine",
        indications: &["Peptic ulcer", "GERD", "Heartburn", "Zollinger-Ellison syndrome"],
        side_effects: &["Diarrhea", "Dizziness", "Drowsiness", "Headache", "Gynecomastia"],
        mechanism_of_action: "H2 receptor antagonist - reduces stomach acid production",
    },
    FactEntry {
        key: "oxprenolol",
        indications: &["Hypertension", "Angina", "Arrhythmias", "Anxiety"],
        side_effects: &["Fatigue", "Dizziness", "Cold extremities", "Sleep disturbances"],
        mechanism_of_action: "Non-selective beta-adrenergic receptor blocker with ISA",
    },
];

/// Built-in table of a few well-known drugs
///
/// Matches when a table key occurs anywhere in the ingredient name,
/// ignoring case, so "Metoprolol Tartrate" resolves to metoprolol.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticFactTable;

impl ClinicalFactSource for StaticFactTable {
    fn lookup(&self, ingredient: &str) -> Option<ClinicalFacts> {
        let name = ingredient.to_lowercase();
        let entry = KNOWN_DRUGS.iter().find(|e| name.contains(e.key))?;
        let owned = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
        Some(ClinicalFacts {
            indications: owned(entry.indications),
            contraindications: Vec::new(),
            side_effects: owned(entry.side_effects),
            mechanism_of_action: entry.mechanism_of_action.to_string(),
        })
    }
}
