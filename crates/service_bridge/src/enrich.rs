//! Detail enrichment for validated medicines

use crate::rxnorm::{ConceptGroup, PropConcept, RxNormClient};
use crate::sleep::Sleeper;
use anyhow::Result;
use core_pipeline::{
    BasicInfo, ClinicalFactSource, Composition, EnrichedMedicine, Ingredient, MedicineDetails,
    ValidatedMedicine,
};
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

/// Maximum number of interaction descriptions kept per medicine
pub const MAX_INTERACTIONS: usize = 5;

const BRAND_TTYS: &[&str] = &["BN", "BPCK", "SBD", "SBDC"];
const INGREDIENT_TTYS: &[&str] = &["IN", "PIN", "MIN"];
const DOSE_FORM_TTYS: &[&str] = &["DF"];

const RXNORM_NAME: &str = "RxNorm Name";
const PRESCRIBABLE_NAME: &str = "Prescribable Name";

/// Related concepts sorted by role
#[derive(Debug, Default, PartialEq)]
pub struct Classified {
    pub brand_names: Vec<String>,
    pub generic_names: Vec<String>,
    pub dosage_forms: Vec<String>,
    pub ingredients: Vec<Ingredient>,
}

fn push_unique<T: PartialEq>(list: &mut Vec<T>, item: T) {
    if !list.contains(&item) {
        list.push(item);
    }
}

/// Sort related concepts into brand names, ingredients and dosage forms
pub fn classify(groups: &[ConceptGroup]) -> Classified {
    let mut out = Classified::default();
    for group in groups {
        let tty = group.tty.as_str();
        for concept in &group.concept_properties {
            let name = concept.name.trim();
            if name.is_empty() {
                continue;
            }
            if BRAND_TTYS.contains(&tty) {
                push_unique(&mut out.brand_names, name.to_string());
            } else if INGREDIENT_TTYS.contains(&tty) {
                push_unique(&mut out.generic_names, name.to_string());
                push_unique(
                    &mut out.ingredients,
                    Ingredient {
                        name: name.to_string(),
                        rxcui: concept.rxcui.clone(),
                    },
                );
            } else if DOSE_FORM_TTYS.contains(&tty) {
                push_unique(&mut out.dosage_forms, name.to_string());
            }
        }
    }
    out
}

/// Name, prescribable name and strength from the full property set
pub fn composition_from(props: &[PropConcept]) -> Composition {
    let mut composition = Composition::default();
    for prop in props {
        if prop.prop_name == RXNORM_NAME {
            composition.name = Some(prop.prop_value.clone());
        } else if prop.prop_name == PRESCRIBABLE_NAME {
            composition.prescribable_name = Some(prop.prop_value.clone());
        } else if prop.prop_name.to_lowercase().contains("strength") {
            composition.strength = Some(prop.prop_value.clone());
        }
    }
    composition
}

/// First `limit` distinct, non-empty descriptions
pub fn distinct_interactions(descriptions: Vec<String>, limit: usize) -> Vec<String> {
    let mut out = Vec::new();
    for description in descriptions {
        if out.len() == limit {
            break;
        }
        if !description.is_empty() {
            push_unique(&mut out, description);
        }
    }
    out
}

/// Attaches clinical metadata to RxNorm-validated medicines
pub struct DetailEnricher {
    rxnorm: Arc<RxNormClient>,
    facts: Arc<dyn ClinicalFactSource>,
    sleeper: Arc<dyn Sleeper>,
}

impl DetailEnricher {
    pub fn new(
        rxnorm: Arc<RxNormClient>,
        facts: Arc<dyn ClinicalFactSource>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            rxnorm,
            facts,
            sleeper,
        }
    }

    /// Enrich each entry; only RxNorm-validated entries get details
    pub async fn enrich(&self, validated: Vec<ValidatedMedicine>) -> Vec<EnrichedMedicine> {
        let mut enriched = Vec::with_capacity(validated.len());
        for medicine in validated {
            let details = match medicine.validated_rxcui() {
                Some(rxcui) => {
                    info!("Fetching details for {}", medicine.candidate.original_name);
                    Some(self.details(rxcui).await)
                }
                None => None,
            };
            enriched.push(EnrichedMedicine {
                validated: medicine,
                details,
            });
        }
        enriched
    }

    /// Run one lookup, then the courtesy delay; failures degrade to `None`
    async fn paced<T>(
        &self,
        what: &str,
        rxcui: &str,
        call: impl Future<Output = Result<T>>,
    ) -> Option<T> {
        let result = call.await;
        self.sleeper.sleep(self.rxnorm.config().detail_delay).await;
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Error fetching {} for {}: {:#}", what, rxcui, e);
                None
            }
        }
    }

    async fn details(&self, rxcui: &str) -> MedicineDetails {
        let basic = self
            .paced("properties", rxcui, self.rxnorm.properties(rxcui))
            .await
            .flatten();
        let props = self
            .paced("all properties", rxcui, self.rxnorm.all_properties(rxcui))
            .await
            .unwrap_or_default();
        let related = self
            .paced("related concepts", rxcui, self.rxnorm.all_related(rxcui))
            .await
            .unwrap_or_default();
        let interactions = self
            .paced("interactions", rxcui, self.rxnorm.interactions(rxcui))
            .await
            .unwrap_or_default();

        let classified = classify(&related);
        let mut composition = composition_from(&props);
        composition.basic_info = basic.map(|p| BasicInfo {
            name: p.name,
            synonym: p.synonym,
            tty: p.tty,
        });
        composition.ingredients = classified.ingredients;

        let mut generic_names = classified.generic_names;
        if generic_names.is_empty() {
            if let Some(name) = composition.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
                generic_names.push(name.to_string());
            }
        }

        let mut details = MedicineDetails {
            composition,
            brand_names: classified.brand_names,
            generic_names,
            dosage_forms: classified.dosage_forms,
            drug_interactions: distinct_interactions(interactions, MAX_INTERACTIONS),
            ..MedicineDetails::default()
        };

        if let Some(facts) = details.generic_names.first().and_then(|n| self.facts.lookup(n)) {
            details.indications = facts.indications;
            details.contraindications = facts.contraindications;
            details.side_effects = facts.side_effects;
            details.mechanism_of_action = facts.mechanism_of_action;
        }
        details
    }
}
