use serde::Serialize;
use serde_json::Value;

use crate::curated::ResearchRecord;

/// Fixed facet vocabularies. Facet options are derived by keyword-matching
/// curated tags and custom-field values against these lists, so curators do
/// not need a schema migration to surface a new facet value.
pub const ORGANISM_VOCAB: &[&str] = &[
    "Arabidopsis",
    "Mouse",
    "Human",
    "Drosophila",
    "C. elegans",
    "Yeast",
    "E. coli",
    "Zebrafish",
    "Rat",
    "Tardigrade",
];

pub const MISSION_VOCAB: &[&str] = &[
    "ISS",
    "SpaceX CRS",
    "Space Shuttle",
    "Bion",
    "Artemis",
    "Rodent Research",
    "Veggie",
    "Twins Study",
];

pub const RESEARCH_AREA_VOCAB: &[&str] = &[
    "Plant Biology",
    "Human Research",
    "Microbiology",
    "Animal Models",
    "Cell Biology",
    "Radiation Biology",
    "Neuroscience",
    "Immunology",
];

pub const EXPERIMENT_TYPE_VOCAB: &[&str] = &[
    "RNA Sequencing",
    "Microarray",
    "Proteomics",
    "Metabolomics",
    "Imaging",
    "Behavioral",
    "Histology",
];

pub const TISSUE_VOCAB: &[&str] = &[
    "Muscle",
    "Bone",
    "Liver",
    "Brain",
    "Heart",
    "Blood",
    "Retina",
    "Skin",
    "Root",
    "Leaf",
];

/// Category keyword sets used for the statistics snapshot. A study counts
/// toward a category when any keyword appears in its title, abstract, or
/// tags (case-insensitive substring).
pub const CATEGORY_VOCAB: &[(&str, &[&str])] = &[
    (
        "Plant Biology",
        &["plant", "arabidopsis", "root", "seedling", "photosynthesis"],
    ),
    (
        "Human Research",
        &["human", "astronaut", "crew", "cardiovascular"],
    ),
    (
        "Microbiology",
        &["microb", "bacteria", "bacterial", "biofilm", "fungal"],
    ),
    (
        "Animal Models",
        &["mouse", "mice", "rodent", "rat", "drosophila", "zebrafish"],
    ),
    ("Cell Biology", &["cell", "culture", "stem cell", "tissue"]),
    ("Radiation Biology", &["radiation", "cosmic ray", "ionizing"]),
];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FacetOptions {
    pub organisms: Vec<String>,
    pub missions: Vec<String>,
    pub research_areas: Vec<String>,
    pub experiment_types: Vec<String>,
    pub tissue_types: Vec<String>,
    pub all_tags: Vec<String>,
}

/// Derives the selectable facet options from curated records.
pub fn facet_options(records: &[ResearchRecord]) -> FacetOptions {
    let haystack = curated_terms(records);
    FacetOptions {
        organisms: matched(ORGANISM_VOCAB, &haystack),
        missions: matched(MISSION_VOCAB, &haystack),
        research_areas: matched(RESEARCH_AREA_VOCAB, &haystack),
        experiment_types: matched(EXPERIMENT_TYPE_VOCAB, &haystack),
        tissue_types: matched(TISSUE_VOCAB, &haystack),
        all_tags: all_tags(records),
    }
}

/// All tag spellings plus custom-field string/array values, lowercased.
fn curated_terms(records: &[ResearchRecord]) -> Vec<String> {
    let mut terms = Vec::new();
    for record in records {
        for tag in &record.tags {
            terms.push(tag.to_lowercase());
        }
        if let Some(fields) = &record.custom_fields {
            for value in fields.values() {
                collect_custom_values(value, &mut terms);
            }
        }
    }
    terms
}

fn collect_custom_values(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(text) => {
            if !text.trim().is_empty() {
                out.push(text.to_lowercase());
            }
        }
        Value::Array(items) => {
            for item in items {
                if let Some(text) = item.as_str() {
                    if !text.trim().is_empty() {
                        out.push(text.to_lowercase());
                    }
                }
            }
        }
        _ => {}
    }
}

fn matched(vocab: &[&str], haystack: &[String]) -> Vec<String> {
    vocab
        .iter()
        .filter(|entry| {
            let needle = entry.to_lowercase();
            haystack.iter().any(|term| term.contains(&needle))
        })
        .map(|entry| entry.to_string())
        .collect()
}

fn all_tags(records: &[ResearchRecord]) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for record in records {
        for tag in &record.tags {
            let tag = tag.trim();
            if tag.is_empty() {
                continue;
            }
            if !tags.iter().any(|existing| existing.eq_ignore_ascii_case(tag)) {
                tags.push(tag.to_string());
            }
        }
    }
    tags.sort_by_key(|tag| tag.to_lowercase());
    tags
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::curated::ResearchRecord;

    fn record_with(tags: &[&str], custom: Option<Value>) -> ResearchRecord {
        ResearchRecord {
            id: "1".to_string(),
            title: "Curated entry".to_string(),
            description: "Curated entry description".to_string(),
            year: None,
            authors: None,
            institution: None,
            osd_study_number: None,
            tags: tags.iter().map(|tag| tag.to_string()).collect(),
            nasa_osdr_links: Vec::new(),
            custom_fields: custom.and_then(|value| match value {
                Value::Object(map) => Some(map),
                _ => None,
            }),
            published: true,
            created_by: None,
            created_at: "2025-01-01T00:00:00Z".to_string(),
            updated_at: "2025-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn derives_options_from_tags_and_custom_fields() {
        let records = vec![
            record_with(&["Arabidopsis thaliana", "rodent research"], None),
            record_with(
                &[],
                Some(json!({ "platform": ["ISS expedition 64"], "focus": "bone density" })),
            ),
        ];
        let options = facet_options(&records);
        assert!(options.organisms.contains(&"Arabidopsis".to_string()));
        assert!(options.missions.contains(&"ISS".to_string()));
        assert!(options.missions.contains(&"Rodent Research".to_string()));
        assert!(options.tissue_types.contains(&"Bone".to_string()));
    }

    #[test]
    fn all_tags_dedups_case_insensitively() {
        let records = vec![
            record_with(&["Microgravity", "bone"], None),
            record_with(&["microgravity"], None),
        ];
        let options = facet_options(&records);
        assert_eq!(options.all_tags.len(), 2);
    }
}
