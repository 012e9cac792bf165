//! Per-worker cookie storage
//!
//! Cookies are keyed by host. Attributes other than the name/value pair are
//! not interpreted; the whole jar is emptied periodically instead.

use reqwest::header::{COOKIE, HeaderMap, HeaderValue, SET_COOKIE};
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use url::Url;

#[derive(Debug, Default)]
pub struct CookieJar {
    hosts: RwLock<HashMap<String, BTreeMap<String, String>>>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember the cookies set by a response
    pub fn store_from_headers(&self, url: &Url, headers: &HeaderMap) {
        let Some(host) = url.host_str() else {
            return;
        };

        let parsed: Vec<(String, String)> = headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .filter_map(|value| {
                let pair = value.split(';').next()?;
                let (name, value) = pair.split_once('=')?;
                let name = name.trim();
                (!name.is_empty()).then(|| (name.to_string(), value.trim().to_string()))
            })
            .collect();

        if parsed.is_empty() {
            return;
        }

        let mut hosts = self.hosts.write().unwrap_or_else(|e| e.into_inner());
        hosts.entry(host.to_string()).or_default().extend(parsed);
    }

    /// `Cookie` header value for a request to `url`
    pub fn header_for(&self, url: &Url) -> Option<HeaderValue> {
        let host = url.host_str()?;
        let hosts = self.hosts.read().unwrap_or_else(|e| e.into_inner());
        let cookies = hosts.get(host).filter(|cookies| !cookies.is_empty())?;
        let rendered = cookies
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ");
        HeaderValue::from_str(&rendered).ok()
    }

    /// Attach stored cookies to outgoing request headers
    pub fn apply(&self, url: &Url, headers: &mut HeaderMap) {
        if let Some(value) = self.header_for(url) {
            headers.insert(COOKIE, value);
        }
    }

    /// Drop every cookie, returning how many were held
    pub fn clear(&self) -> usize {
        let mut hosts = self.hosts.write().unwrap_or_else(|e| e.into_inner());
        let count = hosts.values().map(BTreeMap::len).sum();
        hosts.clear();
        count
    }

    pub fn len(&self) -> usize {
        let hosts = self.hosts.read().unwrap_or_else(|e| e.into_inner());
        hosts.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(raw: &str) -> Url {
        Url::parse(raw).unwrap()
    }

    #[test]
    fn test_cookies_round_trip_per_host() {
        let jar = CookieJar::new();
        let mut headers = HeaderMap::new();
        headers.append(SET_COOKIE, HeaderValue::from_static("session=abc; Path=/; HttpOnly"));
        headers.append(SET_COOKIE, HeaderValue::from_static("lang=en"));
        jar.store_from_headers(&url("https://example.com/login"), &headers);

        assert_eq!(
            jar.header_for(&url("https://example.com/next")).unwrap(),
            "lang=en; session=abc"
        );
        assert!(jar.header_for(&url("https://other.com/")).is_none());
        assert_eq!(jar.len(), 2);
    }

    #[test]
    fn test_clear_empties_jar() {
        let jar = CookieJar::new();
        let mut headers = HeaderMap::new();
        headers.insert(SET_COOKIE, HeaderValue::from_static("a=1"));
        jar.store_from_headers(&url("https://example.com/"), &headers);

        assert_eq!(jar.clear(), 1);
        assert!(jar.is_empty());
        assert!(jar.header_for(&url("https://example.com/")).is_none());
    }
}
