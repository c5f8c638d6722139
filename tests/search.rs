use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use astrobio_discovery::cache::StudyCache;
use astrobio_discovery::curated::{
    CuratedStore, NewRecord, RecordPatch, ResearchRecord, SearchLogEntry,
};
use astrobio_discovery::domain::{
    FilterSet, PublicationStatus, SortBy, SortOptions, SortOrder, Study, YearRange,
};
use astrobio_discovery::error::AstroError;
use astrobio_discovery::osdr::OsdrClient;
use astrobio_discovery::search::{
    SearchRequest, SearchService, apply_filters, dedup_by_id, sort_studies,
};

fn study(id: &str, title: &str, year: Option<i32>) -> Study {
    Study {
        id: id.to_string(),
        title: title.to_string(),
        abstract_text: format!("Research abstract for {title}, describing methods and findings."),
        year,
        authors: vec!["Smith J".to_string()],
        institution: None,
        organism: None,
        assay_type: None,
        mission_name: None,
        tissue_type: None,
        data_type: None,
        release_date: year.map(|y| format!("{y}-03-01")),
        tags: vec!["NASA OSDR".to_string()],
        url: String::new(),
        is_admin_created: false,
        custom_fields: None,
        nasa_osdr_links: Vec::new(),
        osd_study_number: None,
        published: None,
    }
}

fn record(id: &str, title: &str, published: bool) -> ResearchRecord {
    ResearchRecord {
        id: id.to_string(),
        title: title.to_string(),
        description: format!("Curated description for {title}."),
        year: Some("2023".to_string()),
        authors: Some("Curator A".to_string()),
        institution: None,
        osd_study_number: None,
        tags: vec!["Space Biology".to_string()],
        nasa_osdr_links: Vec::new(),
        custom_fields: None,
        published,
        created_by: None,
        created_at: "2023-01-01T00:00:00Z".to_string(),
        updated_at: "2023-01-01T00:00:00Z".to_string(),
    }
}

#[derive(Clone, Copy)]
enum RemoteMode {
    Ok,
    Fail,
}

struct MockState {
    mode: Mutex<RemoteMode>,
    term_queries: Mutex<Vec<String>>,
    filter_queries: AtomicUsize,
    recent_calls: AtomicUsize,
    term_results: Mutex<Vec<Study>>,
}

#[derive(Clone)]
struct MockOsdr {
    state: Arc<MockState>,
}

impl MockOsdr {
    fn returning(results: Vec<Study>) -> Self {
        Self {
            state: Arc::new(MockState {
                mode: Mutex::new(RemoteMode::Ok),
                term_queries: Mutex::new(Vec::new()),
                filter_queries: AtomicUsize::new(0),
                recent_calls: AtomicUsize::new(0),
                term_results: Mutex::new(results),
            }),
        }
    }

    fn failing() -> Self {
        let mock = Self::returning(Vec::new());
        *mock.state.mode.lock().unwrap() = RemoteMode::Fail;
        mock
    }

    fn term_queries(&self) -> Vec<String> {
        self.state.term_queries.lock().unwrap().clone()
    }

    fn filter_queries(&self) -> usize {
        self.state.filter_queries.load(Ordering::SeqCst)
    }

    fn recent_calls(&self) -> usize {
        self.state.recent_calls.load(Ordering::SeqCst)
    }

    fn results(&self) -> Result<Vec<Study>, AstroError> {
        match *self.state.mode.lock().unwrap() {
            RemoteMode::Ok => Ok(self.state.term_results.lock().unwrap().clone()),
            RemoteMode::Fail => Err(AstroError::OsdrHttp("boom".to_string())),
        }
    }
}

impl OsdrClient for MockOsdr {
    fn search_by_term(&self, term: &str, _limit: usize) -> Result<Vec<Study>, AstroError> {
        self.state
            .term_queries
            .lock()
            .unwrap()
            .push(term.to_string());
        self.results()
    }

    fn search_by_filters(
        &self,
        _organism: Option<&str>,
        _assay_type: Option<&str>,
        _limit: usize,
    ) -> Result<Vec<Study>, AstroError> {
        self.state.filter_queries.fetch_add(1, Ordering::SeqCst);
        self.results()
    }

    fn search_with_pagination(
        &self,
        _term: &str,
        _offset: usize,
        _page_size: usize,
    ) -> Result<Vec<Study>, AstroError> {
        self.results()
    }

    fn by_interest_tag(&self, interest: &str, limit: usize) -> Result<Vec<Study>, AstroError> {
        self.search_by_term(interest, limit)
    }

    fn recent(&self, _limit: usize) -> Result<Vec<Study>, AstroError> {
        self.state.recent_calls.fetch_add(1, Ordering::SeqCst);
        self.results()
    }
}

#[derive(Default)]
struct MemoryStore {
    records: Mutex<Vec<ResearchRecord>>,
    log: Mutex<Vec<SearchLogEntry>>,
}

impl MemoryStore {
    fn with_records(records: Vec<ResearchRecord>) -> Self {
        Self {
            records: Mutex::new(records),
            log: Mutex::new(Vec::new()),
        }
    }

    fn log_len(&self) -> usize {
        self.log.lock().unwrap().len()
    }
}

impl CuratedStore for MemoryStore {
    fn all_records(&self, published_only: bool) -> Result<Vec<ResearchRecord>, AstroError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|record| !published_only || record.published)
            .cloned()
            .collect())
    }

    fn record(&self, id: &str) -> Result<Option<ResearchRecord>, AstroError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .find(|record| record.id == id)
            .cloned())
    }

    fn create(&self, _input: NewRecord) -> Result<ResearchRecord, AstroError> {
        Err(AstroError::Storage("read-only mock".to_string()))
    }

    fn update(&self, id: &str, _patch: RecordPatch) -> Result<ResearchRecord, AstroError> {
        Err(AstroError::RecordNotFound(id.to_string()))
    }

    fn delete(&self, id: &str) -> Result<(), AstroError> {
        Err(AstroError::RecordNotFound(id.to_string()))
    }

    fn log_search(&self, entry: &SearchLogEntry) -> Result<(), AstroError> {
        self.log.lock().unwrap().push(entry.clone());
        Ok(())
    }
}

fn service(
    client: MockOsdr,
    store: Arc<MemoryStore>,
) -> SearchService<MockOsdr> {
    SearchService::new(StudyCache::with_defaults(client), store)
}

#[test]
fn query_search_merges_remote_and_curated() {
    let client = MockOsdr::returning(vec![study(
        "OSD-10",
        "Microgravity muscle atrophy in mice",
        Some(2022),
    )]);
    let store = Arc::new(MemoryStore::with_records(vec![record(
        "1",
        "Curated microgravity overview",
        true,
    )]));
    let service = service(client.clone(), Arc::clone(&store));

    let response = service
        .search(SearchRequest {
            query: Some("microgravity".to_string()),
            ..SearchRequest::default()
        })
        .unwrap();

    assert_eq!(response.total_count, 2);
    assert_eq!(response.results[0].id, "OSD-10");
    assert_eq!(response.results[1].id, "admin-1");
    assert!(response.results[1].is_admin_created);
    assert_eq!(client.term_queries(), vec!["microgravity"]);
}

#[test]
fn facet_fan_out_is_capped_at_two_per_facet() {
    let client = MockOsdr::returning(Vec::new());
    let store = Arc::new(MemoryStore::default());
    let service = service(client.clone(), store);

    let filters = FilterSet {
        organisms: vec![
            "Mus musculus".to_string(),
            "Arabidopsis thaliana".to_string(),
            "Homo sapiens".to_string(),
        ],
        ..FilterSet::default()
    };
    service
        .search(SearchRequest {
            filters,
            ..SearchRequest::default()
        })
        .unwrap();

    assert_eq!(client.filter_queries(), 2);
    assert!(client.term_queries().is_empty());
    assert_eq!(client.recent_calls(), 0);
}

#[test]
fn no_query_and_no_facets_uses_recent_pool() {
    let client = MockOsdr::returning(vec![study("OSD-1", "Recent spaceflight study", Some(2026))]);
    let store = Arc::new(MemoryStore::default());
    let service = service(client.clone(), store);

    let response = service.search(SearchRequest::default()).unwrap();

    assert_eq!(client.recent_calls(), 1);
    assert_eq!(response.results[0].id, "OSD-1");
}

#[test]
fn remote_failure_degrades_to_curated_results() {
    let client = MockOsdr::failing();
    let store = Arc::new(MemoryStore::with_records(vec![record(
        "7",
        "Curated radiation biology survey",
        true,
    )]));
    let service = service(client, Arc::clone(&store));

    let response = service
        .search(SearchRequest {
            query: Some("radiation".to_string()),
            ..SearchRequest::default()
        })
        .unwrap();

    assert_eq!(response.total_count, 1);
    assert_eq!(response.results[0].id, "admin-7");
}

#[test]
fn duplicate_candidates_keep_first_occurrence() {
    let a = study("OSD-1", "First occurrence study title", Some(2020));
    let mut b = study("OSD-1", "Second occurrence study title", Some(2021));
    b.abstract_text = "different".to_string();
    let deduped = dedup_by_id(vec![a.clone(), b, study("OSD-2", "Another study", Some(2022))]);
    assert_eq!(deduped.len(), 2);
    assert_eq!(deduped[0].title, "First occurrence study title");
}

#[test]
fn keywords_are_or_matched_not_conjunctive() {
    let studies = vec![
        study("OSD-1", "Mouse bone density in orbit", Some(2021)),
        study("OSD-2", "Plant root growth on the ISS", Some(2022)),
        study("OSD-3", "Yeast fermentation baseline", Some(2023)),
    ];
    let filters = FilterSet {
        keywords: vec!["mouse".to_string(), "plant".to_string()],
        ..FilterSet::default()
    };

    let kept = apply_filters(studies, None, &filters.normalized());

    // OSD-1 matches only "mouse", OSD-2 only "plant": one keyword hit is
    // enough, so both survive.
    let ids: Vec<&str> = kept.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["OSD-1", "OSD-2"]);
}

#[test]
fn query_matches_in_abstract_alone() {
    let mut studies = vec![study("OSD-1", "Gene expression changes in orbit", Some(2021))];
    studies[0].abstract_text =
        "Osteoblast differentiation was profiled across flight and ground controls.".to_string();

    let kept = apply_filters(studies, Some("osteoblast"), &FilterSet::default());
    assert_eq!(kept.len(), 1);
}

#[test]
fn default_status_keeps_unpublished_curated_records() {
    let client = MockOsdr::returning(Vec::new());
    let store = Arc::new(MemoryStore::with_records(vec![record(
        "3",
        "Unpublished curated draft radiation notes",
        false,
    )]));
    let service = service(client, Arc::clone(&store));

    let response = service
        .search(SearchRequest {
            query: Some("radiation".to_string()),
            ..SearchRequest::default()
        })
        .unwrap();

    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].published, Some(false));
}

#[test]
fn year_range_excludes_undated_studies() {
    let studies = vec![
        study("OSD-1", "Dated study inside the window", Some(2021)),
        study("OSD-2", "Undated archival study entry", None),
        study("OSD-3", "Dated study outside the window", Some(2016)),
    ];
    let filters = FilterSet {
        year_range: Some("2020-2024".parse::<YearRange>().unwrap()),
        ..FilterSet::default()
    };

    let kept = apply_filters(studies, None, &filters);
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].id, "OSD-1");
}

#[test]
fn date_bounds_without_range_still_filter() {
    let studies = vec![
        study("OSD-1", "Twenty twenty one study", Some(2021)),
        study("OSD-2", "Twenty eighteen study", Some(2018)),
    ];
    let filters = FilterSet {
        start_date: Some("2020-01-01".to_string()),
        ..FilterSet::default()
    };

    let kept = apply_filters(studies, None, &filters);
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].id, "OSD-1");
}

#[test]
fn facet_values_match_study_field_or_text() {
    let mut tagged = study("OSD-1", "Muscle gene expression study", Some(2021));
    tagged.organism = Some("Mus musculus".to_string());
    let text_only = study("OSD-2", "Comparative mus musculus growth notes", Some(2022));
    let unrelated = study("OSD-3", "Unrelated yeast experiment", Some(2023));

    let filters = FilterSet {
        organisms: vec!["Mus musculus".to_string()],
        ..FilterSet::default()
    };
    let kept = apply_filters(vec![tagged, text_only, unrelated], None, &filters);
    let ids: Vec<&str> = kept.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["OSD-1", "OSD-2"]);
}

#[test]
fn osd_number_filter_is_substring_insensitive() {
    let mut with_number = study("OSD-1", "Numbered curated entry title", Some(2021));
    with_number.osd_study_number = Some("OSD-379".to_string());
    let by_id = study("osd-379-extra", "Synthesized identifier entry", Some(2022));
    let miss = study("OSD-3", "No matching number anywhere", Some(2023));

    let filters = FilterSet {
        osd_study_number: Some("osd-379".to_string()),
        ..FilterSet::default()
    };
    let kept = apply_filters(vec![with_number, by_id, miss], None, &filters);
    assert_eq!(kept.len(), 2);
}

#[test]
fn adding_filters_never_widens_results() {
    let mut mouse_bone = study("OSD-1", "Mouse bone density in orbit", Some(2021));
    mouse_bone.organism = Some("Mus musculus".to_string());
    let mut mouse_muscle = study("OSD-2", "Mouse muscle atrophy baseline", Some(2022));
    mouse_muscle.organism = Some("Mus musculus".to_string());
    let mut draft = study("admin-1", "Mouse bone draft notes", Some(2023));
    draft.organism = Some("Mus musculus".to_string());
    draft.is_admin_created = true;
    draft.published = Some(false);
    let yeast = study("OSD-3", "Yeast fermentation baseline", Some(2023));
    let pool = vec![mouse_bone, mouse_muscle, draft, yeast];

    let base = FilterSet {
        organisms: vec!["Mus musculus".to_string()],
        ..FilterSet::default()
    };
    let narrowed = FilterSet {
        keywords: vec!["bone".to_string()],
        publication_status: PublicationStatus::Published,
        ..base.clone()
    };

    let base_ids: HashSet<String> = apply_filters(pool.clone(), None, &base)
        .into_iter()
        .map(|s| s.id)
        .collect();
    let narrowed_ids: HashSet<String> = apply_filters(pool, None, &narrowed)
        .into_iter()
        .map(|s| s.id)
        .collect();

    // Every filter is a pure predicate, so a superset of constraints can
    // only shrink the result set.
    assert!(narrowed_ids.is_subset(&base_ids));
    assert_eq!(base_ids.len(), 3);
    assert_eq!(
        narrowed_ids,
        HashSet::from(["OSD-1".to_string()])
    );
}

#[test]
fn publication_status_narrows_admin_records() {
    let remote = study("OSD-1", "Remote repository study entry", Some(2021));
    let mut draft = study("admin-1", "Unpublished curated draft entry", Some(2022));
    draft.is_admin_created = true;
    draft.published = Some(false);
    let mut live = study("admin-2", "Published curated live entry", Some(2023));
    live.is_admin_created = true;
    live.published = Some(true);

    let published_only = FilterSet {
        publication_status: PublicationStatus::Published,
        ..FilterSet::default()
    };
    let kept = apply_filters(
        vec![remote.clone(), draft.clone(), live.clone()],
        None,
        &published_only,
    );
    let ids: Vec<&str> = kept.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["OSD-1", "admin-2"]);

    let unpublished_only = FilterSet {
        publication_status: PublicationStatus::Unpublished,
        ..FilterSet::default()
    };
    let kept = apply_filters(vec![remote, draft, live], None, &unpublished_only);
    let ids: Vec<&str> = kept.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["admin-1"]);
}

#[test]
fn sort_by_title_is_case_insensitive() {
    let mut studies = vec![
        study("OSD-1", "zebrafish development", Some(2021)),
        study("OSD-2", "Arabidopsis growth", Some(2022)),
        study("OSD-3", "mouse physiology", Some(2023)),
    ];
    sort_studies(
        &mut studies,
        &SortOptions {
            sort_by: SortBy::Title,
            sort_order: SortOrder::Asc,
            secondary_sort: None,
        },
    );
    let ids: Vec<&str> = studies.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["OSD-2", "OSD-3", "OSD-1"]);
}

#[test]
fn secondary_sort_breaks_primary_ties_only() {
    let mut studies = vec![
        study("OSD-1", "Beta study of equal year", Some(2021)),
        study("OSD-2", "Alpha study of equal year", Some(2021)),
        study("OSD-3", "Gamma study of newer year", Some(2023)),
    ];
    sort_studies(
        &mut studies,
        &SortOptions {
            sort_by: SortBy::Date,
            sort_order: SortOrder::Desc,
            secondary_sort: Some(SortBy::Title),
        },
    );
    let ids: Vec<&str> = studies.iter().map(|s| s.id.as_str()).collect();
    // 2023 first; the two 2021 entries fall back to title order, reversed
    // along with the primary direction.
    assert_eq!(ids, vec!["OSD-3", "OSD-1", "OSD-2"]);
}

#[test]
fn relevance_sort_preserves_candidate_order() {
    let mut studies = vec![
        study("OSD-2", "Second by arrival", Some(2019)),
        study("OSD-1", "First by arrival", Some(2024)),
    ];
    sort_studies(&mut studies, &SortOptions::default());
    let ids: Vec<&str> = studies.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["OSD-2", "OSD-1"]);
}

#[test]
fn search_writes_history_without_blocking() {
    let client = MockOsdr::returning(vec![study("OSD-1", "Logged search result entry", Some(2021))]);
    let store = Arc::new(MemoryStore::default());
    let service = service(client, Arc::clone(&store));

    service
        .search(SearchRequest {
            query: Some("logged".to_string()),
            user_id: Some("user-9".to_string()),
            ..SearchRequest::default()
        })
        .unwrap();

    let mut logged = false;
    for _ in 0..100 {
        if store.log_len() > 0 {
            logged = true;
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(logged, "search log entry never arrived");
    let entry = store.log.lock().unwrap()[0].clone();
    assert_eq!(entry.user_id.as_deref(), Some("user-9"));
    assert_eq!(entry.query.as_deref(), Some("logged"));
    assert_eq!(entry.results.len(), 1);
}

#[test]
fn flush_makes_history_write_durable() {
    let client = MockOsdr::returning(vec![study("OSD-1", "Flushed search result entry", Some(2021))]);
    let store = Arc::new(MemoryStore::default());
    let service = service(client, Arc::clone(&store));

    service
        .search(SearchRequest {
            query: Some("flushed".to_string()),
            ..SearchRequest::default()
        })
        .unwrap();
    service.flush_search_log();

    // No polling: after the flush the entry must already be in the store,
    // which is what lets a short-lived process exit without losing it.
    assert_eq!(store.log_len(), 1);
}

#[test]
fn interests_delegate_to_recommendations() {
    let client = MockOsdr::returning(vec![study(
        "OSD-1",
        "Recommended genetics study entry",
        Some(2024),
    )]);
    let store = Arc::new(MemoryStore::default());
    let service = service(client.clone(), store);

    let response = service
        .search(SearchRequest {
            interests: Some(vec!["genetics".to_string()]),
            ..SearchRequest::default()
        })
        .unwrap();

    assert_eq!(response.results.len(), 1);
    assert_eq!(client.term_queries(), vec!["genetics"]);
}
