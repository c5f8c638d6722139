use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::thread;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::StudyCache;
use crate::curated::{CuratedStore, SearchLogEntry, study_view};
use crate::domain::{
    FilterSet, PublicationStatus, SortBy, SortOptions, SortOrder, Study, first_year_in,
};
use crate::error::AstroError;
use crate::osdr::OsdrClient;
use crate::recommend::recommend;

/// At most this many values per facet are fanned out to the remote client,
/// bounding the request count for pathological filter sets.
const FACET_FAN_OUT_CAP: usize = 2;
const FACET_SEARCH_LIMIT: usize = 25;
const TERM_SEARCH_LIMIT: usize = 50;
const DEFAULT_POOL_LIMIT: usize = 20;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchRequest {
    pub query: Option<String>,
    pub filters: FilterSet,
    pub sort: SortOptions,
    /// If present, short-circuits into the recommendation assembler.
    pub interests: Option<Vec<String>>,
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub query: Option<String>,
    pub filters: FilterSet,
    pub results: Vec<Study>,
    pub total_count: usize,
}

pub struct SearchService<C: OsdrClient> {
    cache: StudyCache<C>,
    store: Arc<dyn CuratedStore>,
    /// Handle of the in-flight history write, joined by
    /// [`Self::flush_search_log`] so short-lived processes do not exit
    /// before the entry lands on disk.
    log_writer: Mutex<Option<thread::JoinHandle<()>>>,
}

impl<C: OsdrClient + 'static> SearchService<C> {
    pub fn new(cache: StudyCache<C>, store: Arc<dyn CuratedStore>) -> Self {
        Self {
            cache,
            store,
            log_writer: Mutex::new(None),
        }
    }

    pub fn cache(&self) -> &StudyCache<C> {
        &self.cache
    }

    pub fn store(&self) -> &Arc<dyn CuratedStore> {
        &self.store
    }

    pub fn search(&self, request: SearchRequest) -> Result<SearchResponse, AstroError> {
        if let Some(interests) = request
            .interests
            .as_ref()
            .filter(|interests| !interests.is_empty())
        {
            let results = recommend(
                self.cache.client(),
                self.store.as_ref(),
                interests,
                Some(request.sort),
            );
            return Ok(SearchResponse {
                query: request.query,
                filters: request.filters,
                total_count: results.len(),
                results,
            });
        }

        let filters = request.filters.clone().normalized();
        let query = request
            .query
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(str::to_string);

        let mut candidates = self.remote_candidates(query.as_deref(), &filters);

        // Unpublished drafts stay searchable here; the publicationStatus
        // facet is what narrows them out later.
        let records = self.store.all_records(false)?;
        candidates.extend(records.iter().map(study_view));

        let merged = dedup_by_id(candidates);
        let mut results = apply_filters(merged, query.as_deref(), &filters);
        sort_studies(&mut results, &request.sort);

        self.log_search(&request, query.clone(), &filters, &results);

        Ok(SearchResponse {
            query,
            filters,
            total_count: results.len(),
            results,
        })
    }

    /// Remote candidate sourcing. Upstream failures degrade to an empty
    /// remote pool so the search still answers from curated records.
    fn remote_candidates(&self, query: Option<&str>, filters: &FilterSet) -> Vec<Study> {
        let client = self.cache.client();
        let mut candidates = Vec::new();

        if filters.has_facet_filters() {
            for organism in filters.organisms.iter().take(FACET_FAN_OUT_CAP) {
                collect_or_warn(
                    &mut candidates,
                    client.search_by_filters(Some(organism), None, FACET_SEARCH_LIMIT),
                    "organism facet search failed",
                );
            }
            for assay in filters.experiment_types.iter().take(FACET_FAN_OUT_CAP) {
                collect_or_warn(
                    &mut candidates,
                    client.search_by_filters(None, Some(assay), FACET_SEARCH_LIMIT),
                    "experiment-type facet search failed",
                );
            }
            for mission in filters.missions.iter().take(FACET_FAN_OUT_CAP) {
                collect_or_warn(
                    &mut candidates,
                    client.search_by_term(mission, FACET_SEARCH_LIMIT),
                    "mission facet search failed",
                );
            }
            for tissue in filters.tissue_types.iter().take(FACET_FAN_OUT_CAP) {
                collect_or_warn(
                    &mut candidates,
                    client.search_by_term(tissue, FACET_SEARCH_LIMIT),
                    "tissue facet search failed",
                );
            }
        } else if let Some(query) = query {
            collect_or_warn(
                &mut candidates,
                client.search_by_term(query, TERM_SEARCH_LIMIT),
                "term search failed",
            );
        } else {
            collect_or_warn(
                &mut candidates,
                client.recent(DEFAULT_POOL_LIMIT),
                "recent-pool fetch failed",
            );
        }

        debug!(count = candidates.len(), "remote candidates sourced");
        candidates
    }

    /// Persists the search event off-thread; a failed write never fails the
    /// search response.
    fn log_search(
        &self,
        request: &SearchRequest,
        query: Option<String>,
        filters: &FilterSet,
        results: &[Study],
    ) {
        let entry = SearchLogEntry {
            user_id: request.user_id.clone(),
            query,
            filters: filters.clone(),
            results: results.to_vec(),
            logged_at: chrono::Utc::now().to_rfc3339(),
        };
        let store = Arc::clone(&self.store);
        let handle = thread::spawn(move || {
            if let Err(err) = store.log_search(&entry) {
                warn!(error = %err, "search history write failed");
            }
        });
        let mut slot = self
            .log_writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // At most one pending write: finish the previous one before
        // parking the new handle.
        if let Some(previous) = slot.replace(handle) {
            let _ = previous.join();
        }
    }

    /// Waits for the most recent history write to land. The response is
    /// already produced by the time this runs, so the search path itself
    /// stays non-blocking; call this before process exit.
    pub fn flush_search_log(&self) {
        let handle = self
            .log_writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

fn collect_or_warn(
    candidates: &mut Vec<Study>,
    result: Result<Vec<Study>, AstroError>,
    context: &str,
) {
    match result {
        Ok(studies) => candidates.extend(studies),
        Err(err) => warn!(error = %err, "{context}"),
    }
}

/// First occurrence wins, preserving order; remote entries precede curated
/// ones in the merged list, so they take precedence on (improbable) id
/// collisions.
pub fn dedup_by_id(studies: Vec<Study>) -> Vec<Study> {
    let mut seen = HashSet::new();
    studies
        .into_iter()
        .filter(|study| seen.insert(study.id.clone()))
        .collect()
}

/// Applies the filter set in a fixed order. Each filter is a pure narrowing
/// predicate, so the order does not affect the result set; it is fixed only
/// for determinism of implementation.
pub fn apply_filters(studies: Vec<Study>, query: Option<&str>, filters: &FilterSet) -> Vec<Study> {
    let mut results = studies;

    // 1. Year window, either a bucket or explicit start/end dates.
    if let Some(range) = filters.year_range {
        results.retain(|study| range.contains(study.year));
    } else {
        let start = filters.start_date.as_deref().and_then(first_year_in);
        let end = filters.end_date.as_deref().and_then(first_year_in);
        if start.is_some() || end.is_some() {
            results.retain(|study| {
                let Some(year) = study.year else { return false };
                start.map(|s| year >= s).unwrap_or(true) && end.map(|e| year <= e).unwrap_or(true)
            });
        }
    }

    // 2. Facet lists, OR'd within each list.
    facet_retain(&mut results, &filters.organisms, |study| {
        study.organism.as_deref()
    });
    facet_retain(&mut results, &filters.experiment_types, |study| {
        study.assay_type.as_deref()
    });
    facet_retain(&mut results, &filters.missions, |study| {
        study.mission_name.as_deref()
    });
    facet_retain(&mut results, &filters.tissue_types, |study| {
        study.tissue_type.as_deref()
    });
    facet_retain(&mut results, &filters.research_areas, |_| None);

    // 3. Free-text query across the full field set.
    if let Some(query) = query {
        let needle = query.to_lowercase();
        results.retain(|study| text_matches(study, &needle));
    }

    // 4. Keyword list: OR across fields AND across nothing — each keyword
    // independently can match any field, so keywords behave as an extra
    // free-text query rather than a conjunctive tag filter.
    if !filters.keywords.is_empty() {
        let needles: Vec<String> = filters
            .keywords
            .iter()
            .map(|keyword| keyword.to_lowercase())
            .collect();
        results.retain(|study| needles.iter().any(|needle| text_matches(study, needle)));
    }

    // 5. OSD study-number substring.
    if let Some(osd) = &filters.osd_study_number {
        let needle = osd.to_lowercase();
        results.retain(|study| {
            study
                .osd_study_number
                .as_deref()
                .map(|number| number.to_lowercase().contains(&needle))
                .unwrap_or(false)
                || study.id.to_lowercase().contains(&needle)
                || study.title.to_lowercase().contains(&needle)
        });
    }

    // 6. Publication status.
    match filters.publication_status {
        PublicationStatus::All => {}
        PublicationStatus::Published => {
            results.retain(|study| !study.is_admin_created || study.published == Some(true));
        }
        PublicationStatus::Unpublished => {
            results.retain(|study| study.is_admin_created && study.published == Some(false));
        }
    }

    results
}

fn facet_retain<F>(results: &mut Vec<Study>, values: &[String], field: F)
where
    F: Fn(&Study) -> Option<&str>,
{
    if values.is_empty() {
        return;
    }
    let needles: Vec<String> = values.iter().map(|value| value.to_lowercase()).collect();
    results.retain(|study| {
        needles.iter().any(|needle| {
            field(study)
                .map(|value| value.to_lowercase().contains(needle))
                .unwrap_or(false)
                || study.title.to_lowercase().contains(needle)
                || study.abstract_text.to_lowercase().contains(needle)
                || study
                    .tags
                    .iter()
                    .any(|tag| tag.to_lowercase().contains(needle))
                || custom_field_matches(study, needle)
        })
    });
}

/// Free-text match across title, abstract, tags, authors, institution,
/// stringified year, external links, and curated custom fields.
fn text_matches(study: &Study, needle: &str) -> bool {
    study.title.to_lowercase().contains(needle)
        || study.abstract_text.to_lowercase().contains(needle)
        || study
            .tags
            .iter()
            .any(|tag| tag.to_lowercase().contains(needle))
        || study
            .authors
            .iter()
            .any(|author| author.to_lowercase().contains(needle))
        || study
            .institution
            .as_deref()
            .map(|institution| institution.to_lowercase().contains(needle))
            .unwrap_or(false)
        || study
            .year
            .map(|year| year.to_string().contains(needle))
            .unwrap_or(false)
        || study
            .nasa_osdr_links
            .iter()
            .any(|link| link.to_lowercase().contains(needle))
        || custom_field_matches(study, needle)
}

/// Ad hoc facet fallback: curators attach arbitrary string/array custom
/// fields, matched only on admin-created studies.
fn custom_field_matches(study: &Study, needle: &str) -> bool {
    if !study.is_admin_created {
        return false;
    }
    let Some(fields) = &study.custom_fields else {
        return false;
    };
    fields.values().any(|value| match value {
        serde_json::Value::String(text) => text.to_lowercase().contains(needle),
        serde_json::Value::Array(items) => items.iter().any(|item| {
            item.as_str()
                .map(|text| text.to_lowercase().contains(needle))
                .unwrap_or(false)
        }),
        _ => false,
    })
}

/// Stable sort: ties under the primary key fall through to the secondary
/// comparator; with no secondary, original relative order is preserved.
pub fn sort_studies(studies: &mut [Study], sort: &SortOptions) {
    studies.sort_by(|a, b| {
        let mut ordering = compare_by(a, b, sort.sort_by);
        if ordering == Ordering::Equal {
            if let Some(secondary) = sort.secondary_sort {
                ordering = compare_by(a, b, secondary);
            }
        }
        match sort.sort_order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        }
    });
}

fn compare_by(a: &Study, b: &Study, key: SortBy) -> Ordering {
    match key {
        // Relevance keeps candidate order; citations compare equal because
        // no citation data source exists yet.
        SortBy::Relevance | SortBy::Citations => Ordering::Equal,
        SortBy::Date => a.year.unwrap_or(i32::MIN).cmp(&b.year.unwrap_or(i32::MIN)),
        SortBy::Title => a.title.to_lowercase().cmp(&b.title.to_lowercase()),
        SortBy::Author => first_author(a).cmp(&first_author(b)),
    }
}

fn first_author(study: &Study) -> String {
    study
        .authors
        .first()
        .map(|author| author.to_lowercase())
        .unwrap_or_default()
}
