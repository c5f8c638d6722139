use std::collections::HashMap;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{Datelike, Utc};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;
use tracing::debug;

use crate::domain::{Study, first_year_in};
use crate::error::AstroError;

pub const OSDR_BASE_URL: &str = "https://osdr.nasa.gov";

/// Provenance markers attached to every normalized remote study.
pub const SOURCE_TAGS: [&str; 2] = ["NASA OSDR", "Space Biology"];

const DEFAULT_AUTHOR: &str = "Unknown Researcher";
const MAX_AUTHORS: usize = 4;
const FALLBACK_SCAN_SIZE: usize = 100;

/// Prioritized field aliases per concept. Multiple historical naming
/// conventions coexist in OSDR hits; first non-empty alias wins.
const ID_ALIASES: &[&str] = &["Study Identifier", "Accession", "identifier", "id"];
const TITLE_ALIASES: &[&str] = &["Study Title", "title"];
const ABSTRACT_ALIASES: &[&str] = &["Study Description", "description", "abstract"];
const DATE_ALIASES: &[&str] = &[
    "Study Public Release Date",
    "Study Submission Date",
    "release_date",
];
const AUTHOR_ALIASES: &[&str] = &[
    "Study Publication Author List",
    "Study Person",
    "Study Contact",
    "authors",
];
const INSTITUTION_ALIASES: &[&str] = &[
    "Study Funding Agency",
    "Study Grant Agency",
    "institution",
];
const ORGANISM_ALIASES: &[&str] = &["organism", "Study Organism", "Organism"];
const ASSAY_ALIASES: &[&str] = &[
    "Study Assay Technology Type",
    "Study Assay Measurement Type",
    "assay_type",
];
const MISSION_ALIASES: &[&str] = &["Mission Name", "Flight Program", "mission"];
const TISSUE_ALIASES: &[&str] = &["Material Type", "Study Tissue", "tissue"];
const DATA_TYPE_ALIASES: &[&str] = &["Data Source Type", "Study Data Type", "data_type"];

/// Interest keys understood by the discovery surface, each mapped to a few
/// candidate search terms so repeated calls surface varied results.
const INTEREST_TERMS: &[(&str, &[&str])] = &[
    (
        "plant-biology",
        &["plant growth", "arabidopsis", "plant gravitropism"],
    ),
    (
        "human-physiology",
        &["human physiology", "astronaut health", "cardiovascular"],
    ),
    (
        "microbiology",
        &["microbial", "bacteria spaceflight", "microbiome"],
    ),
    ("genetics", &["gene expression", "genomics", "transcriptome"]),
    ("radiation", &["radiation", "cosmic radiation", "radiation biology"]),
    (
        "microgravity",
        &["microgravity", "simulated microgravity", "weightlessness"],
    ),
    ("neuroscience", &["neural", "brain spaceflight", "neuroscience"]),
    ("bone-health", &["bone loss", "bone density", "musculoskeletal"]),
    ("immunology", &["immune response", "immunology", "T cell"]),
    ("cell-biology", &["cell culture", "cell biology", "stem cell"]),
];

pub trait OsdrClient: Send + Sync {
    fn search_by_term(&self, term: &str, limit: usize) -> Result<Vec<Study>, AstroError>;

    fn search_by_filters(
        &self,
        organism: Option<&str>,
        assay_type: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Study>, AstroError>;

    fn search_with_pagination(
        &self,
        term: &str,
        offset: usize,
        page_size: usize,
    ) -> Result<Vec<Study>, AstroError>;

    fn by_interest_tag(&self, interest: &str, limit: usize) -> Result<Vec<Study>, AstroError>;

    fn recent(&self, limit: usize) -> Result<Vec<Study>, AstroError>;
}

#[derive(Clone)]
pub struct OsdrHttpClient {
    client: Client,
    base_url: String,
}

impl OsdrHttpClient {
    pub fn new() -> Result<Self, AstroError> {
        Self::with_base_url(OSDR_BASE_URL)
    }

    pub fn with_base_url(base_url: &str) -> Result<Self, AstroError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("astrobio/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| AstroError::OsdrHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| AstroError::OsdrHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn search_url(&self) -> String {
        format!("{}/osdr/data/search", self.base_url)
    }

    fn handle_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, AstroError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "OSDR request failed".to_string());
        Err(AstroError::OsdrStatus { status, message })
    }

    fn send_with_retries<F>(
        &self,
        mut make_req: F,
    ) -> Result<reqwest::blocking::Response, AstroError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            let response = make_req().send();
            match response {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(AstroError::OsdrHttp(err.to_string()));
                }
            }
        }
    }

    fn fetch_hits(&self, params: &[(&str, String)]) -> Result<Vec<Value>, AstroError> {
        let url = self.search_url();
        let response = self.send_with_retries(|| self.client.get(&url).query(params))?;
        Self::parse_hits(response)
    }

    /// Single-attempt fetch for callers that own their retry policy, such
    /// as the cache crawl loop.
    fn fetch_hits_once(&self, params: &[(&str, String)]) -> Result<Vec<Value>, AstroError> {
        let response = self
            .client
            .get(self.search_url())
            .query(params)
            .send()
            .map_err(|err| AstroError::OsdrHttp(err.to_string()))?;
        Self::parse_hits(response)
    }

    fn parse_hits(response: reqwest::blocking::Response) -> Result<Vec<Value>, AstroError> {
        let response = Self::handle_status(response)?;
        let raw: Value = response
            .json()
            .map_err(|err| AstroError::OsdrHttp(err.to_string()))?;
        Ok(extract_hits(&raw))
    }

    fn normalize_all(hits: &[Value]) -> Vec<Study> {
        let current_year = Utc::now().year();
        hits.iter()
            .filter_map(|hit| study_from_hit(hit, current_year))
            .collect()
    }

    /// Unfiltered listing scan used when a term query comes back empty or
    /// non-2xx; matching then happens client-side.
    fn scan_and_filter(&self, term: &str, limit: usize) -> Result<Vec<Study>, AstroError> {
        let params = vec![
            ("from", "0".to_string()),
            ("size", FALLBACK_SCAN_SIZE.to_string()),
            ("type", "cgene".to_string()),
        ];
        let hits = self.fetch_hits(&params)?;
        let needle = term.to_lowercase();
        let mut studies: Vec<Study> = Self::normalize_all(&hits)
            .into_iter()
            .filter(|study| {
                study.title.to_lowercase().contains(&needle)
                    || study.abstract_text.to_lowercase().contains(&needle)
                    || study
                        .tags
                        .iter()
                        .any(|tag| tag.to_lowercase().contains(&needle))
            })
            .collect();
        studies.truncate(limit);
        Ok(studies)
    }
}

impl OsdrClient for OsdrHttpClient {
    fn search_by_term(&self, term: &str, limit: usize) -> Result<Vec<Study>, AstroError> {
        let params = vec![
            ("term", term.to_string()),
            ("from", "0".to_string()),
            ("size", limit.to_string()),
            ("type", "cgene".to_string()),
        ];
        match self.fetch_hits(&params) {
            Ok(hits) if !hits.is_empty() => {
                let mut studies = Self::normalize_all(&hits);
                studies.truncate(limit);
                Ok(studies)
            }
            Ok(_) => {
                debug!(term, "empty OSDR result, scanning unfiltered listing");
                self.scan_and_filter(term, limit)
            }
            Err(AstroError::OsdrStatus { status, .. }) => {
                debug!(term, status, "OSDR term query failed, scanning unfiltered listing");
                self.scan_and_filter(term, limit)
            }
            Err(err) => Err(err),
        }
    }

    fn search_by_filters(
        &self,
        organism: Option<&str>,
        assay_type: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Study>, AstroError> {
        let mut params = vec![
            ("from", "0".to_string()),
            ("size", limit.to_string()),
            ("type", "cgene".to_string()),
        ];
        if let Some(organism) = organism {
            params.push(("ffield", "organism".to_string()));
            params.push(("fvalue", organism.to_string()));
        }
        if let Some(assay_type) = assay_type {
            params.push(("ffield", "Study Assay Technology Type".to_string()));
            params.push(("fvalue", assay_type.to_string()));
        }
        let hits = self.fetch_hits(&params)?;
        let mut studies = Self::normalize_all(&hits);
        studies.truncate(limit);
        Ok(studies)
    }

    fn search_with_pagination(
        &self,
        term: &str,
        offset: usize,
        page_size: usize,
    ) -> Result<Vec<Study>, AstroError> {
        let params = vec![
            ("term", term.to_string()),
            ("from", offset.to_string()),
            ("size", page_size.to_string()),
            ("type", "cgene".to_string()),
        ];
        let hits = self.fetch_hits_once(&params)?;
        Ok(Self::normalize_all(&hits))
    }

    fn by_interest_tag(&self, interest: &str, limit: usize) -> Result<Vec<Study>, AstroError> {
        let term = match interest_terms(interest) {
            Some(terms) => pick_term(terms).to_string(),
            None => interest.replace('-', " "),
        };
        self.search_by_term(&term, limit)
    }

    fn recent(&self, limit: usize) -> Result<Vec<Study>, AstroError> {
        let current_year = Utc::now().year().to_string();
        let terms = [current_year.as_str(), "ISS", "spaceflight", "International Space Station"];
        let mut merged: HashMap<String, Study> = HashMap::new();
        for term in terms {
            for study in self.search_by_term(term, limit)? {
                merged.entry(study.id.clone()).or_insert(study);
            }
        }
        let mut studies: Vec<Study> = merged.into_values().collect();
        studies.sort_by(|a, b| b.year.unwrap_or(i32::MIN).cmp(&a.year.unwrap_or(i32::MIN)));
        studies.truncate(limit);
        Ok(studies)
    }
}

/// Candidate search terms for a known interest key, if recognized.
pub fn interest_terms(interest: &str) -> Option<&'static [&'static str]> {
    let key = interest.trim().to_lowercase();
    INTEREST_TERMS
        .iter()
        .find(|(name, _)| *name == key)
        .map(|(_, terms)| *terms)
}

/// Clock-derived pick, isolated here so transform logic stays deterministic.
fn pick_term<'a>(terms: &[&'a str]) -> &'a str {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as usize)
        .unwrap_or(0);
    terms[nanos % terms.len()]
}

/// Pulls the per-hit source objects out of the search response envelope.
pub fn extract_hits(raw: &Value) -> Vec<Value> {
    raw.get("hits")
        .and_then(|hits| hits.get("hits"))
        .and_then(|hits| hits.as_array())
        .map(|hits| {
            hits.iter()
                .map(|hit| hit.get("_source").unwrap_or(hit).clone())
                .collect()
        })
        .unwrap_or_default()
}

/// Normalizes one raw hit into a canonical `Study`. Returns `None` when the
/// record fails the content-quality gate (title > 10 chars, abstract > 50
/// chars) — the system's only such gate; callers must not re-check.
pub fn study_from_hit(hit: &Value, current_year: i32) -> Option<Study> {
    let title = first_string(hit, TITLE_ALIASES)?;
    let abstract_text = first_string(hit, ABSTRACT_ALIASES)?;
    if title.trim().len() <= 10 || abstract_text.trim().len() <= 50 {
        return None;
    }

    let id = first_string(hit, ID_ALIASES).unwrap_or_else(|| synthesized_id(&title));
    let release_date = first_string(hit, DATE_ALIASES);
    let year = release_date
        .as_deref()
        .and_then(first_year_in)
        .filter(|year| *year >= 2000 && *year <= current_year + 1);

    let organism = first_string(hit, ORGANISM_ALIASES);
    let assay_type = first_string(hit, ASSAY_ALIASES);
    let mission_name = first_string(hit, MISSION_ALIASES);
    let tissue_type = first_string(hit, TISSUE_ALIASES);

    let mut tags = Vec::new();
    for value in [&organism, &assay_type, &mission_name, &tissue_type] {
        if let Some(value) = value {
            push_tag(&mut tags, value);
        }
    }
    for marker in SOURCE_TAGS {
        push_tag(&mut tags, marker);
    }

    Some(Study {
        url: format!("{OSDR_BASE_URL}/bio/repo/data/studies/{id}"),
        id,
        title,
        abstract_text,
        year,
        authors: parse_authors(first_string(hit, AUTHOR_ALIASES).as_deref()),
        institution: first_string(hit, INSTITUTION_ALIASES),
        organism,
        assay_type,
        mission_name,
        tissue_type,
        data_type: first_string(hit, DATA_TYPE_ALIASES),
        release_date,
        tags,
        is_admin_created: false,
        custom_fields: None,
        nasa_osdr_links: Vec::new(),
        osd_study_number: None,
        published: None,
    })
}

/// First non-empty string for a prioritized alias list. Array values yield
/// their first non-empty element; numbers are stringified.
fn first_string(hit: &Value, aliases: &[&str]) -> Option<String> {
    for alias in aliases {
        let Some(value) = hit.get(alias) else {
            continue;
        };
        let found = match value {
            Value::String(text) => {
                let text = text.trim();
                (!text.is_empty()).then(|| text.to_string())
            }
            Value::Array(items) => items.iter().find_map(|item| {
                item.as_str()
                    .map(str::trim)
                    .filter(|text| !text.is_empty())
                    .map(|text| text.to_string())
            }),
            Value::Number(number) => Some(number.to_string()),
            _ => None,
        };
        if found.is_some() {
            return found;
        }
    }
    None
}

pub(crate) fn parse_authors(raw: Option<&str>) -> Vec<String> {
    let authors: Vec<String> = raw
        .unwrap_or("")
        .split(',')
        .map(|author| author.trim().to_string())
        .filter(|author| !author.is_empty())
        .take(MAX_AUTHORS)
        .collect();
    if authors.is_empty() {
        vec![DEFAULT_AUTHOR.to_string()]
    } else {
        authors
    }
}

fn push_tag(tags: &mut Vec<String>, tag: &str) {
    let tag = tag.trim();
    if tag.is_empty() {
        return;
    }
    if !tags.iter().any(|existing| existing.eq_ignore_ascii_case(tag)) {
        tags.push(tag.to_string());
    }
}

fn synthesized_id(title: &str) -> String {
    let slug: String = title
        .to_lowercase()
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() { ch } else { '-' })
        .collect();
    let slug = slug.trim_matches('-').to_string();
    let mut compact = String::new();
    let mut last_dash = false;
    for ch in slug.chars().take(40) {
        if ch == '-' {
            if !last_dash {
                compact.push(ch);
            }
            last_dash = true;
        } else {
            compact.push(ch);
            last_dash = false;
        }
    }
    format!("osdr-{compact}")
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interest_vocabulary_lookup() {
        assert!(interest_terms("plant-biology").is_some());
        assert!(interest_terms("Plant-Biology").is_some());
        assert!(interest_terms("numismatics").is_none());
    }

    #[test]
    fn synthesized_id_is_slugged() {
        let id = synthesized_id("Spaceflight Effects on Mouse Liver!");
        assert!(id.starts_with("osdr-spaceflight-effects"));
        assert!(!id.contains("--"));
        assert!(!id.contains(' '));
    }

    #[test]
    fn author_parsing_caps_and_defaults() {
        let authors = parse_authors(Some("Smith J, Doe A, Lee K, Park M, Extra N"));
        assert_eq!(authors.len(), 4);
        assert_eq!(authors[0], "Smith J");
        assert_eq!(parse_authors(None), vec![DEFAULT_AUTHOR.to_string()]);
        assert_eq!(parse_authors(Some("  ,  ")), vec![DEFAULT_AUTHOR.to_string()]);
    }
}
