//! Mapping between public URLs and storage keys.

use url::Url;

/// Path prefix under which stored media is served.
pub const MEDIA_PATH_PREFIX: &str = "/media/";

/// Resolves public URLs back to storage keys.
#[derive(Debug, Clone)]
pub struct KeyResolver {
    base_url: String,
}

impl KeyResolver {
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self { base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url_for(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key.trim_start_matches('/'))
    }

    /// Normalize `url` into a storage key.
    ///
    /// Accepts URLs under the configured base, absolute URLs whose path is under
    /// `/media/`, and bare relative paths. Other absolute URLs are foreign.
    pub fn key_for_url(&self, url: &str) -> Option<String> {
        let url = url.trim();
        if url.is_empty() {
            return None;
        }

        if !self.base_url.is_empty()
            && let Some(rest) = url.strip_prefix(&self.base_url)
            && (rest.is_empty() || rest.starts_with('/'))
        {
            return non_empty(strip_query(rest).trim_start_matches('/'));
        }

        if let Some(rest) = strip_query(url).strip_prefix(MEDIA_PATH_PREFIX) {
            return non_empty(rest);
        }

        if url.starts_with("http://") || url.starts_with("https://") {
            let parsed = Url::parse(url).ok()?;
            return parsed
                .path()
                .strip_prefix(MEDIA_PATH_PREFIX)
                .and_then(non_empty);
        }

        if url.contains("://") || url.starts_with("data:") {
            return None;
        }

        non_empty(strip_query(url).trim_start_matches('/'))
    }
}

fn strip_query(s: &str) -> &str {
    s.split(['?', '#']).next().unwrap_or(s)
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}
