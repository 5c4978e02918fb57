//! Shared test support: an in-memory fetcher so resolution tests never
//! touch the network or filesystem.

use std::collections::HashMap;

use arbor_schemas::fetcher::{default_urljoin, Fetcher};
use arbor_schemas::FetchError;

pub struct MemFetcher {
    files: HashMap<String, String>,
}

impl MemFetcher {
    pub fn new(files: &[(&str, &str)]) -> MemFetcher {
        MemFetcher {
            files: files
                .iter()
                .map(|(url, text)| (url.to_string(), text.to_string()))
                .collect(),
        }
    }

    pub fn boxed(files: &[(&str, &str)]) -> Box<MemFetcher> {
        Box::new(MemFetcher::new(files))
    }
}

impl Fetcher for MemFetcher {
    fn fetch_text(&mut self, url: &str) -> Result<String, FetchError> {
        self.files.get(url).cloned().ok_or_else(|| FetchError::Io {
            url: url.to_string(),
            reason: "not found".to_string(),
        })
    }

    fn check_exists(&mut self, url: &str) -> bool {
        self.files.contains_key(url)
    }

    fn urljoin(&self, base_url: &str, url: &str) -> Result<String, FetchError> {
        default_urljoin(base_url, url)
    }
}
