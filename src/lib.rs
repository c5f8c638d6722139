pub mod cache;
pub mod config;
pub mod curated;
pub mod domain;
pub mod error;
pub mod facets;
pub mod osdr;
pub mod output;
pub mod recommend;
pub mod search;
pub mod stats;
