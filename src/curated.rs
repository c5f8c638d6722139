use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::{FilterSet, Study, first_year_in};
use crate::error::AstroError;
use crate::osdr::parse_authors;

/// Id prefix for curated records in Study form, so curated ids can never
/// collide with remote accession codes.
pub const ADMIN_ID_PREFIX: &str = "admin-";

/// An admin-authored research entry stored in the application's own
/// database, distinct from remote-repository-sourced studies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchRecord {
    pub id: String,
    pub title: String,
    pub description: String,
    pub year: Option<String>,
    /// Comma-joined author list, split on read into Study form.
    pub authors: Option<String>,
    pub institution: Option<String>,
    pub osd_study_number: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub nasa_osdr_links: Vec<String>,
    #[serde(default)]
    pub custom_fields: Option<Map<String, Value>>,
    pub published: bool,
    pub created_by: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NewRecord {
    pub title: String,
    pub description: String,
    pub year: Option<String>,
    pub authors: Option<String>,
    pub institution: Option<String>,
    pub osd_study_number: Option<String>,
    pub tags: Vec<String>,
    pub nasa_osdr_links: Vec<String>,
    pub custom_fields: Option<Map<String, Value>>,
    pub published: bool,
    pub created_by: Option<String>,
}

/// Partial-field patch: only supplied fields overwrite.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecordPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub year: Option<String>,
    pub authors: Option<String>,
    pub institution: Option<String>,
    pub osd_study_number: Option<String>,
    pub tags: Option<Vec<String>>,
    pub nasa_osdr_links: Option<Vec<String>>,
    pub custom_fields: Option<Map<String, Value>>,
    pub published: Option<bool>,
}

impl RecordPatch {
    fn apply(self, record: &mut ResearchRecord) {
        if let Some(title) = self.title {
            record.title = title;
        }
        if let Some(description) = self.description {
            record.description = description;
        }
        if let Some(year) = self.year {
            record.year = Some(year);
        }
        if let Some(authors) = self.authors {
            record.authors = Some(authors);
        }
        if let Some(institution) = self.institution {
            record.institution = Some(institution);
        }
        if let Some(osd) = self.osd_study_number {
            record.osd_study_number = Some(osd);
        }
        if let Some(tags) = self.tags {
            record.tags = tags;
        }
        if let Some(links) = self.nasa_osdr_links {
            record.nasa_osdr_links = links;
        }
        if let Some(fields) = self.custom_fields {
            record.custom_fields = Some(fields);
        }
        if let Some(published) = self.published {
            record.published = published;
        }
    }
}

/// Search event persisted for later personalization features. Writing it is
/// fire-and-forget; a failed write never fails the search.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchLogEntry {
    pub user_id: Option<String>,
    pub query: Option<String>,
    pub filters: FilterSet,
    pub results: Vec<Study>,
    pub logged_at: String,
}

pub trait CuratedStore: Send + Sync {
    fn all_records(&self, published_only: bool) -> Result<Vec<ResearchRecord>, AstroError>;
    fn record(&self, id: &str) -> Result<Option<ResearchRecord>, AstroError>;
    fn create(&self, input: NewRecord) -> Result<ResearchRecord, AstroError>;
    fn update(&self, id: &str, patch: RecordPatch) -> Result<ResearchRecord, AstroError>;
    fn delete(&self, id: &str) -> Result<(), AstroError>;
    fn log_search(&self, entry: &SearchLogEntry) -> Result<(), AstroError>;
}

/// JSON-file-backed store: one file per record under `records/`, search log
/// entries under `search-log/`. Writes go through a temp file and rename.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: Utf8PathBuf,
}

impl FileStore {
    pub fn new() -> Result<Self, AstroError> {
        let root = BaseDirs::new()
            .and_then(|dirs| {
                Utf8PathBuf::from_path_buf(
                    dirs.home_dir()
                        .join(".local")
                        .join("share")
                        .join("astrobio-discovery"),
                )
                .ok()
            })
            .ok_or_else(|| AstroError::Storage("unable to resolve data directory".to_string()))?;
        Ok(Self { root })
    }

    pub fn new_with_root(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    fn records_dir(&self) -> Utf8PathBuf {
        self.root.join("records")
    }

    fn record_path(&self, id: &str) -> Utf8PathBuf {
        self.records_dir().join(format!("{id}.json"))
    }

    fn log_dir(&self) -> Utf8PathBuf {
        self.root.join("search-log")
    }

    fn write_json_atomic<T: Serialize>(path: &Utf8Path, value: &T) -> Result<(), AstroError> {
        let parent = path
            .parent()
            .ok_or_else(|| AstroError::Storage("invalid store path".to_string()))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| AstroError::Storage(err.to_string()))?;
        let content = serde_json::to_vec_pretty(value)
            .map_err(|err| AstroError::Storage(err.to_string()))?;
        let temp = tempfile::Builder::new()
            .prefix("astrobio-record")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| AstroError::Storage(err.to_string()))?;
        fs::write(temp.path(), &content).map_err(|err| AstroError::Storage(err.to_string()))?;
        temp.persist(path.as_std_path())
            .map_err(|err| AstroError::Storage(err.to_string()))?;
        Ok(())
    }

    fn next_id(&self) -> Result<String, AstroError> {
        let dir = self.records_dir();
        if !dir.as_std_path().exists() {
            return Ok("1".to_string());
        }
        let mut max = 0u64;
        let entries =
            fs::read_dir(dir.as_std_path()).map_err(|err| AstroError::Storage(err.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|err| AstroError::Storage(err.to_string()))?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(stem) = name.strip_suffix(".json") {
                if let Ok(id) = stem.parse::<u64>() {
                    max = max.max(id);
                }
            }
        }
        Ok((max + 1).to_string())
    }
}

impl CuratedStore for FileStore {
    fn all_records(&self, published_only: bool) -> Result<Vec<ResearchRecord>, AstroError> {
        let dir = self.records_dir();
        if !dir.as_std_path().exists() {
            return Ok(Vec::new());
        }
        let mut records = Vec::new();
        let entries =
            fs::read_dir(dir.as_std_path()).map_err(|err| AstroError::Storage(err.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|err| AstroError::Storage(err.to_string()))?;
            let path = entry.path();
            if path.extension().map(|ext| ext == "json").unwrap_or(false) {
                let content = fs::read_to_string(&path)
                    .map_err(|err| AstroError::Storage(err.to_string()))?;
                let record: ResearchRecord = serde_json::from_str(&content)
                    .map_err(|err| AstroError::Storage(err.to_string()))?;
                if !published_only || record.published {
                    records.push(record);
                }
            }
        }
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(records)
    }

    fn record(&self, id: &str) -> Result<Option<ResearchRecord>, AstroError> {
        let path = self.record_path(id);
        if !path.as_std_path().exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| AstroError::Storage(err.to_string()))?;
        let record = serde_json::from_str(&content)
            .map_err(|err| AstroError::Storage(err.to_string()))?;
        Ok(Some(record))
    }

    fn create(&self, input: NewRecord) -> Result<ResearchRecord, AstroError> {
        let now = chrono::Utc::now().to_rfc3339();
        let record = ResearchRecord {
            id: self.next_id()?,
            title: input.title,
            description: input.description,
            year: input.year,
            authors: input.authors,
            institution: input.institution,
            osd_study_number: input.osd_study_number,
            tags: input.tags,
            nasa_osdr_links: input.nasa_osdr_links,
            custom_fields: input.custom_fields,
            published: input.published,
            created_by: input.created_by,
            created_at: now.clone(),
            updated_at: now,
        };
        Self::write_json_atomic(&self.record_path(&record.id), &record)?;
        Ok(record)
    }

    fn update(&self, id: &str, patch: RecordPatch) -> Result<ResearchRecord, AstroError> {
        let mut record = self
            .record(id)?
            .ok_or_else(|| AstroError::RecordNotFound(id.to_string()))?;
        patch.apply(&mut record);
        record.updated_at = chrono::Utc::now().to_rfc3339();
        Self::write_json_atomic(&self.record_path(id), &record)?;
        Ok(record)
    }

    fn delete(&self, id: &str) -> Result<(), AstroError> {
        let path = self.record_path(id);
        if !path.as_std_path().exists() {
            return Err(AstroError::RecordNotFound(id.to_string()));
        }
        fs::remove_file(path.as_std_path()).map_err(|err| AstroError::Storage(err.to_string()))
    }

    fn log_search(&self, entry: &SearchLogEntry) -> Result<(), AstroError> {
        let stamp = chrono::Utc::now().timestamp_micros();
        let path = self.log_dir().join(format!("{stamp}.json"));
        Self::write_json_atomic(&path, entry)
    }
}

/// Pure mapping of a curated record into the canonical Study view.
pub fn study_view(record: &ResearchRecord) -> Study {
    let year = record.year.as_deref().and_then(first_year_in);
    let url = record
        .nasa_osdr_links
        .first()
        .cloned()
        .unwrap_or_default();
    let mut tags = Vec::new();
    for tag in &record.tags {
        let tag = tag.trim();
        if !tag.is_empty() && !tags.iter().any(|existing: &String| existing.eq_ignore_ascii_case(tag))
        {
            tags.push(tag.to_string());
        }
    }
    Study {
        id: format!("{ADMIN_ID_PREFIX}{}", record.id),
        title: record.title.clone(),
        abstract_text: record.description.clone(),
        year,
        authors: parse_authors(record.authors.as_deref()),
        institution: record.institution.clone(),
        organism: None,
        assay_type: None,
        mission_name: None,
        tissue_type: None,
        data_type: None,
        release_date: record.year.clone(),
        tags,
        url,
        is_admin_created: true,
        custom_fields: record.custom_fields.clone(),
        nasa_osdr_links: record.nasa_osdr_links.clone(),
        osd_study_number: record.osd_study_number.clone(),
        published: Some(record.published),
    }
}
