use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use clap::ValueEnum;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::AstroError;

/// Canonical research-record view used throughout search and recommend
/// flows, regardless of origin (OSDR or curated). Derived, never persisted
/// verbatim from the remote source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Study {
    pub id: String,
    pub title: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub year: Option<i32>,
    pub authors: Vec<String>,
    pub institution: Option<String>,
    pub organism: Option<String>,
    pub assay_type: Option<String>,
    pub mission_name: Option<String>,
    pub tissue_type: Option<String>,
    pub data_type: Option<String>,
    /// Raw source date string, kept for the monthly histogram.
    pub release_date: Option<String>,
    pub tags: Vec<String>,
    pub url: String,
    pub is_admin_created: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_fields: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nasa_osdr_links: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub osd_study_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SortBy {
    Relevance,
    Date,
    Title,
    Author,
    Citations,
}

impl fmt::Display for SortBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortBy::Relevance => write!(f, "relevance"),
            SortBy::Date => write!(f, "date"),
            SortBy::Title => write!(f, "title"),
            SortBy::Author => write!(f, "author"),
            SortBy::Citations => write!(f, "citations"),
        }
    }
}

impl FromStr for SortBy {
    type Err = AstroError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "relevance" => Ok(SortBy::Relevance),
            "date" => Ok(SortBy::Date),
            "title" => Ok(SortBy::Title),
            "author" => Ok(SortBy::Author),
            "citations" => Ok(SortBy::Citations),
            _ => Err(AstroError::InvalidSortField(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl FromStr for SortOrder {
    type Err = AstroError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "asc" | "ascending" => Ok(SortOrder::Asc),
            "desc" | "descending" => Ok(SortOrder::Desc),
            _ => Err(AstroError::InvalidSortOrder(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortOptions {
    pub sort_by: SortBy,
    pub sort_order: SortOrder,
    #[serde(default)]
    pub secondary_sort: Option<SortBy>,
}

impl Default for SortOptions {
    fn default() -> Self {
        Self {
            sort_by: SortBy::Relevance,
            sort_order: SortOrder::Desc,
            secondary_sort: None,
        }
    }
}

/// Inclusive year window, parsed from bucket strings such as "2020-2024".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearRange {
    pub start: i32,
    pub end: i32,
}

impl YearRange {
    /// Studies without an accepted year never fall inside a range.
    pub fn contains(&self, year: Option<i32>) -> bool {
        year.map(|y| y >= self.start && y <= self.end).unwrap_or(false)
    }
}

impl FromStr for YearRange {
    type Err = AstroError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let mut years = four_digit_runs(value);
        let start = years.next();
        let end = years.next();
        match (start, end) {
            (Some(start), Some(end)) if start <= end => Ok(Self { start, end }),
            _ => Err(AstroError::InvalidYearRange(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum, Default)]
#[serde(rename_all = "lowercase")]
pub enum PublicationStatus {
    #[default]
    All,
    Published,
    Unpublished,
}

impl FromStr for PublicationStatus {
    type Err = AstroError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "all" | "all status" => Ok(PublicationStatus::All),
            "published" => Ok(PublicationStatus::Published),
            "unpublished" => Ok(PublicationStatus::Unpublished),
            _ => Err(AstroError::InvalidPublicationStatus(value.to_string())),
        }
    }
}

/// Request-scoped filter set. Every field is independently optional; absence
/// normalizes to the empty/default form before use and never errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct FilterSet {
    pub year_range: Option<YearRange>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub organisms: Vec<String>,
    pub experiment_types: Vec<String>,
    pub missions: Vec<String>,
    pub tissue_types: Vec<String>,
    pub research_areas: Vec<String>,
    pub keywords: Vec<String>,
    pub publication_status: PublicationStatus,
    pub osd_study_number: Option<String>,
}

impl FilterSet {
    /// Drops blank entries so downstream predicates only see real values.
    pub fn normalized(mut self) -> Self {
        let clean = |values: Vec<String>| -> Vec<String> {
            values
                .into_iter()
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .collect()
        };
        self.organisms = clean(self.organisms);
        self.experiment_types = clean(self.experiment_types);
        self.missions = clean(self.missions);
        self.tissue_types = clean(self.tissue_types);
        self.research_areas = clean(self.research_areas);
        self.keywords = clean(self.keywords);
        self.osd_study_number = self
            .osd_study_number
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        self.start_date = self.start_date.filter(|value| !value.trim().is_empty());
        self.end_date = self.end_date.filter(|value| !value.trim().is_empty());
        self
    }

    pub fn has_facet_filters(&self) -> bool {
        !self.organisms.is_empty()
            || !self.experiment_types.is_empty()
            || !self.missions.is_empty()
            || !self.tissue_types.is_empty()
    }
}

fn year_regex() -> &'static Regex {
    static YEAR_RE: OnceLock<Regex> = OnceLock::new();
    YEAR_RE.get_or_init(|| Regex::new(r"\d{4}").expect("static year pattern"))
}

fn four_digit_runs(text: &str) -> impl Iterator<Item = i32> + '_ {
    year_regex()
        .find_iter(text)
        .filter_map(|m| m.as_str().parse::<i32>().ok())
}

/// First 4-digit run in a free-form date string, if any.
pub fn first_year_in(text: &str) -> Option<i32> {
    four_digit_runs(text).next()
}
