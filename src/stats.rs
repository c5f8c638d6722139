use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::domain::Study;
use crate::facets::CATEGORY_VOCAB;
use crate::osdr::SOURCE_TAGS;

/// Month tokens matched by containment against raw date strings. String
/// scanning is an accepted approximation here; source dates are too
/// inconsistent for strict parsing to pay off.
const MONTH_TOKENS: &[(&str, &str)] = &[
    ("January", "-01-"),
    ("February", "-02-"),
    ("March", "-03-"),
    ("April", "-04-"),
    ("May", "-05-"),
    ("June", "-06-"),
    ("July", "-07-"),
    ("August", "-08-"),
    ("September", "-09-"),
    ("October", "-10-"),
    ("November", "-11-"),
    ("December", "-12-"),
];

/// Yearly trends always span at least this window, even on sparse data.
const TREND_FLOOR_START: i32 = 2018;
const TREND_FLOOR_END: i32 = 2025;

const TOP_TREND_COUNT: usize = 8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatisticsSnapshot {
    pub total_studies: usize,
    pub category_stats: Vec<CategoryCount>,
    pub yearly_trends: Vec<YearCount>,
    pub recent_studies_count: usize,
    pub monthly_data: Vec<MonthCount>,
    pub research_trends: Vec<TrendCount>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryCount {
    pub category: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YearCount {
    pub year: i32,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthCount {
    pub month: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendCount {
    pub area: String,
    pub count: usize,
}

pub fn derive_statistics(studies: &[Study], current_year: i32) -> StatisticsSnapshot {
    StatisticsSnapshot {
        total_studies: studies.len(),
        category_stats: category_stats(studies),
        yearly_trends: yearly_trends(studies),
        recent_studies_count: studies
            .iter()
            .filter(|study| study.year.map(|y| y >= current_year - 1).unwrap_or(false))
            .count(),
        monthly_data: monthly_data(studies),
        research_trends: research_trends(studies),
    }
}

fn category_stats(studies: &[Study]) -> Vec<CategoryCount> {
    CATEGORY_VOCAB
        .iter()
        .map(|(category, keywords)| CategoryCount {
            category: category.to_string(),
            count: studies
                .iter()
                .filter(|study| matches_category(study, keywords))
                .count(),
        })
        .collect()
}

fn matches_category(study: &Study, keywords: &[&str]) -> bool {
    let title = study.title.to_lowercase();
    let abstract_text = study.abstract_text.to_lowercase();
    keywords.iter().any(|keyword| {
        title.contains(keyword)
            || abstract_text.contains(keyword)
            || study
                .tags
                .iter()
                .any(|tag| tag.to_lowercase().contains(keyword))
    })
}

fn yearly_trends(studies: &[Study]) -> Vec<YearCount> {
    let mut counts: HashMap<i32, usize> = HashMap::new();
    for study in studies {
        if let Some(year) = study.year {
            *counts.entry(year).or_default() += 1;
        }
    }
    let observed_min = counts.keys().min().copied().unwrap_or(TREND_FLOOR_START);
    let observed_max = counts.keys().max().copied().unwrap_or(TREND_FLOOR_END);
    let start = observed_min.min(TREND_FLOOR_START);
    let end = observed_max.max(TREND_FLOOR_END);
    (start..=end)
        .map(|year| YearCount {
            year,
            count: counts.get(&year).copied().unwrap_or(0),
        })
        .collect()
}

fn monthly_data(studies: &[Study]) -> Vec<MonthCount> {
    MONTH_TOKENS
        .iter()
        .map(|(month, numeric)| MonthCount {
            month: month.to_string(),
            count: studies
                .iter()
                .filter_map(|study| study.release_date.as_deref())
                .filter(|date| {
                    date.to_lowercase().contains(&month.to_lowercase()) || date.contains(numeric)
                })
                .count(),
        })
        .collect()
}

fn research_trends(studies: &[Study]) -> Vec<TrendCount> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for study in studies {
        for tag in &study.tags {
            if SOURCE_TAGS.iter().any(|marker| marker.eq_ignore_ascii_case(tag)) {
                continue;
            }
            *counts.entry(tag.clone()).or_default() += 1;
        }
    }
    let mut trends: Vec<TrendCount> = counts
        .into_iter()
        .map(|(area, count)| TrendCount { area, count })
        .collect();
    trends.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.area.cmp(&b.area)));
    trends.truncate(TOP_TREND_COUNT);
    trends
}
