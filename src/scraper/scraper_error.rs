// src/scraper/scraper_error.rs
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScraperError {
    #[error("network error: {0}")]
    Network(String),

    #[error("blocked by site: {0}")]
    Blocked(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("JSON parse error: {0}")]
    JsonParse(String),

    #[error("unexpected data shape: {0}")]
    UnexpectedShape(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for ScraperError {
    fn from(e: reqwest::Error) -> Self {
        ScraperError::Network(e.to_string())
    }
}

impl From<serde_json::Error> for ScraperError {
    fn from(e: serde_json::Error) -> Self {
        ScraperError::JsonParse(e.to_string())
    }
}
