use std::io::{self, Write};

use serde::Serialize;

use crate::curated::ResearchRecord;
use crate::domain::Study;
use crate::facets::FacetOptions;
use crate::search::SearchResponse;
use crate::stats::StatisticsSnapshot;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshSummary {
    pub refreshed_studies: usize,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_refresh(summary: &RefreshSummary) -> io::Result<()> {
        Self::print_json(summary)
    }

    pub fn print_search(response: &SearchResponse) -> io::Result<()> {
        Self::print_json(response)
    }

    pub fn print_studies(studies: &[Study]) -> io::Result<()> {
        Self::print_json(&studies)
    }

    pub fn print_statistics(snapshot: &StatisticsSnapshot) -> io::Result<()> {
        Self::print_json(snapshot)
    }

    pub fn print_facets(facets: &FacetOptions) -> io::Result<()> {
        Self::print_json(facets)
    }

    pub fn print_record(record: &ResearchRecord) -> io::Result<()> {
        Self::print_json(record)
    }

    pub fn print_records(records: &[ResearchRecord]) -> io::Result<()> {
        Self::print_json(&records)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value)
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}
