// src/lib.rs

//! Region-by-region real-estate market metrics: scrape rental and for-sale
//! feeds, reconcile them per address, compute rent statistics, annotate
//! properties with projected returns and persist every artifact.

pub mod config;
pub mod db;
pub mod domain;
pub mod errors;
pub mod pipeline;
pub mod scraper;

#[cfg(test)]
mod tests;
