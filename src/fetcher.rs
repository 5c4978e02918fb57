//! Resource fetching.
//!
//! The resolver never touches the network or filesystem directly; it goes
//! through the [`Fetcher`] capability so callers can swap in caching,
//! sandboxed, or purely in-memory implementations. [`DefaultFetcher`]
//! covers `http`/`https` via a blocking client and `file` via direct reads,
//! with an in-memory text cache that can be preloaded.

use std::collections::HashMap;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use crate::error::FetchError;
use crate::uri::{percent_decode, UriSplit};

/// Matches a drive-letter path prefix like `/D:`.
static DRIVE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^/([a-zA-Z]):").unwrap());

/// Capability interface for retrieving resources by URL.
pub trait Fetcher {
    /// Retrieve the given resource as a string.
    fn fetch_text(&mut self, url: &str) -> Result<String, FetchError>;

    /// Non-throwing existence probe.
    fn check_exists(&mut self, url: &str) -> bool;

    /// Scheme-aware relative-URL resolution.
    fn urljoin(&self, base_url: &str, url: &str) -> Result<String, FetchError>;

    fn supported_schemes(&self) -> Vec<String> {
        vec![
            "file".to_string(),
            "http".to_string(),
            "https".to_string(),
            "mailto".to_string(),
        ]
    }
}

enum CacheEntry {
    Text(String),
    // something exists at the URL, contents unknown
    Exists,
}

/// The default [`Fetcher`]: blocking HTTP plus local files, memoized in
/// memory.
pub struct DefaultFetcher {
    cache: HashMap<String, CacheEntry>,
    client: reqwest::blocking::Client,
}

impl DefaultFetcher {
    pub fn new() -> DefaultFetcher {
        DefaultFetcher {
            cache: HashMap::new(),
            client: reqwest::blocking::Client::new(),
        }
    }

    /// Seed the text cache, bypassing retrieval for `url`.
    pub fn preload(&mut self, url: impl Into<String>, text: impl Into<String>) {
        self.cache.insert(url.into(), CacheEntry::Text(text.into()));
    }
}

impl Default for DefaultFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Fetcher for DefaultFetcher {
    fn fetch_text(&mut self, url: &str) -> Result<String, FetchError> {
        if let Some(CacheEntry::Text(text)) = self.cache.get(url) {
            return Ok(text.clone());
        }
        let split = UriSplit::parse(url);
        match split.scheme.as_str() {
            "http" | "https" => self
                .client
                .get(url)
                .send()
                .and_then(|r| r.error_for_status())
                .and_then(|r| r.text())
                .map_err(|e| FetchError::Http {
                    url: url.to_string(),
                    reason: e.to_string(),
                }),
            "file" => {
                let path = file_url_path(&split);
                std::fs::read_to_string(&path).map_err(|e| FetchError::Io {
                    url: url.to_string(),
                    reason: e.to_string(),
                })
            }
            _ => Err(FetchError::UnsupportedScheme(url.to_string())),
        }
    }

    fn check_exists(&mut self, url: &str) -> bool {
        if self.cache.contains_key(url) {
            return true;
        }
        let split = UriSplit::parse(url);
        match split.scheme.as_str() {
            "http" | "https" => {
                let ok = self
                    .client
                    .head(url)
                    .send()
                    .map(|r| r.status().is_success())
                    .unwrap_or(false);
                if ok {
                    self.cache.insert(url.to_string(), CacheEntry::Exists);
                }
                ok
            }
            "file" => Path::new(&file_url_path(&split)).exists(),
            "mailto" => true,
            other => {
                tracing::warn!("cannot check existence of scheme '{}' url: {}", other, url);
                false
            }
        }
    }

    fn urljoin(&self, base_url: &str, url: &str) -> Result<String, FetchError> {
        default_urljoin(base_url, url)
    }
}

/// Scheme-aware relative-URL resolution with the standard safety rules:
/// remote documents may not pull in `file:` references, drive-relative
/// Windows paths are never misread as absolute URLs, and drive letters are
/// preserved when joining rootless paths against `file:///X:/…` bases.
pub fn default_urljoin(base_url: &str, url: &str) -> Result<String, FetchError> {
    if url.starts_with("_:") {
        return Ok(url.to_string());
    }
    let base = UriSplit::parse(base_url);
    let split = UriSplit::parse(url);

    if !base.scheme.is_empty() && base.scheme != "file" && split.scheme == "file" {
        return Err(FetchError::RemoteExploit {
            url: url.to_string(),
            base: base_url.to_string(),
        });
    }

    let has_drive = split.scheme.len() == 1;
    if base.scheme == "file" {
        if has_drive {
            // "C:/Users/fred" is a path with a drive, not a C-scheme URL
            let netloc = if split.netloc.is_empty() {
                base.netloc.clone()
            } else {
                split.netloc.clone()
            };
            let joined = UriSplit {
                scheme: "file".to_string(),
                netloc,
                path: format!("{}:{}", split.scheme, split.path),
                query: split.query,
                fragment: split.fragment,
            };
            return Ok(joined.unsplit());
        }
        if split.scheme.is_empty() && split.netloc.is_empty() && split.path.starts_with('/') {
            let base_drive = DRIVE_RE.captures(&base.path);
            let drive = DRIVE_RE.captures(&split.path);
            if let (Some(bd), None) = (base_drive, drive) {
                // keep the drive letter from the base
                let joined = UriSplit {
                    scheme: "file".to_string(),
                    netloc: if split.netloc.is_empty() {
                        base.netloc.clone()
                    } else {
                        split.netloc.clone()
                    },
                    path: format!("/{}:{}", &bd[1], split.path),
                    query: split.query,
                    fragment: split.fragment,
                };
                return Ok(joined.unsplit());
            }
        }
    } else if has_drive && !base.scheme.is_empty() {
        return Err(FetchError::RemoteExploit {
            url: url.to_string(),
            base: base_url.to_string(),
        });
    }

    match Url::parse(base_url) {
        Ok(b) => b
            .join(url)
            .map(|u| u.to_string())
            .map_err(|e| FetchError::Http {
                url: url.to_string(),
                reason: e.to_string(),
            }),
        Err(_) => Ok(url.to_string()),
    }
}

/// Turn a `file:` URL split into a local filesystem path.
fn file_url_path(split: &UriSplit) -> String {
    let mut path = percent_decode(&split.path);
    // "/D:/x" means drive path "D:/x"
    if DRIVE_RE.is_match(&path) {
        path.remove(0);
    }
    path
}

/// Convert a filesystem path into a `file://` URL, minimally escaped.
pub fn file_uri(path: &str) -> String {
    if path.starts_with("file://") {
        return path.to_string();
    }
    let escaped = path.replace('%', "%25").replace(' ', "%20").replace('#', "%23");
    if escaped.starts_with("//") {
        format!("file:{}", escaped)
    } else {
        format!("file://{}", escaped)
    }
}

/// Extract the filesystem path of a `file:` URI.
pub fn uri_file_path(url: &str) -> Option<String> {
    let split = UriSplit::parse(url);
    if split.scheme != "file" {
        return None;
    }
    let mut path = file_url_path(&split);
    if !split.fragment.is_empty() {
        path.push('#');
        path.push_str(&percent_decode(&split.fragment));
    }
    Some(path)
}
