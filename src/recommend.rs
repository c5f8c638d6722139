use std::collections::HashSet;

use tracing::warn;

use crate::curated::{CuratedStore, study_view};
use crate::domain::{SortOptions, Study};
use crate::osdr::OsdrClient;
use crate::search::sort_studies;

const PER_INTEREST_LIMIT: usize = 5;
const FALLBACK_LIMIT: usize = 10;
const MAX_RESULTS: usize = 20;

/// Assembles a recommendation list from the user's interest tags.
///
/// Best-effort by contract: every upstream failure degrades (skip the
/// interest, fall back to recent studies, ultimately an empty list) and the
/// function never returns an error.
pub fn recommend<C: OsdrClient + ?Sized>(
    client: &C,
    store: &dyn CuratedStore,
    interests: &[String],
    sort: Option<SortOptions>,
) -> Vec<Study> {
    let mut collected: Vec<Study> = Vec::new();

    for interest in interests {
        match client.by_interest_tag(interest, PER_INTEREST_LIMIT) {
            Ok(studies) => collected.extend(studies),
            Err(err) => warn!(interest, error = %err, "interest lookup failed, skipping"),
        }
    }

    if collected.is_empty() {
        collected = client.recent(FALLBACK_LIMIT).unwrap_or_else(|err| {
            warn!(error = %err, "recent fallback failed");
            Vec::new()
        });
    }

    match store.all_records(true) {
        Ok(records) => {
            for record in &records {
                if tags_intersect(&record.tags, interests) {
                    collected.push(study_view(record));
                }
            }
        }
        Err(err) => warn!(error = %err, "curated lookup failed, skipping"),
    }

    let mut seen = HashSet::new();
    collected.retain(|study| seen.insert(study.id.clone()));
    collected.truncate(MAX_RESULTS);

    if let Some(sort) = sort {
        sort_studies(&mut collected, &sort);
    }

    collected
}

/// Case-insensitive substring intersection, both directions: the tag
/// "plant biology" matches the interest "plant" and vice versa.
fn tags_intersect(tags: &[String], interests: &[String]) -> bool {
    tags.iter().any(|tag| {
        let tag = tag.to_lowercase();
        interests.iter().any(|interest| {
            let interest = interest.to_lowercase();
            tag.contains(&interest) || interest.contains(&tag)
        })
    })
}
