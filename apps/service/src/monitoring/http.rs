use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::checker::{Checker, elapsed_ms, remaining, resolve_timed};
use super::types::{CheckOutcome, HttpDetails, Timings};
use crate::database::models::{KeywordMatch, Monitor};

pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

/// Stored response bodies keep at most this many characters
pub const BODY_LIMIT_CHARS: usize = 5000;

/// HTTP and keyword checker
pub struct HttpChecker {
    client: reqwest::Client,
}

impl HttpChecker {
    pub fn new() -> anyhow::Result<Self> {
        // Per-request timeouts come from the monitor
        let client = reqwest::Client::builder().pool_max_idle_per_host(0).build()?;
        Ok(Self { client })
    }
}

/// Whether `code` satisfies the expected set.
///
/// Entries are exact codes (`"204"`) or classes (`"2xx"`). An empty set
/// accepts any 2xx response.
pub fn status_matches(expected: &[String], code: u16) -> bool {
    if expected.iter().all(|pattern| pattern.trim().is_empty()) {
        return (200..300).contains(&code);
    }

    expected.iter().any(|pattern| {
        let pattern = pattern.trim().to_ascii_lowercase();
        match pattern.strip_suffix("xx") {
            Some(class) => class.parse::<u16>().map(|c| c == code / 100).unwrap_or(false),
            None => pattern.parse::<u16>().map(|c| c == code).unwrap_or(false),
        }
    })
}

/// Keyword rule result, `None` when the body passes
pub fn keyword_error(body: &str, keyword: Option<&str>, mode: Option<KeywordMatch>) -> Option<String> {
    let keyword = keyword.filter(|k| !k.is_empty())?;
    let found = body.contains(keyword);

    match mode.unwrap_or(KeywordMatch::Exists) {
        KeywordMatch::Exists if !found => Some(format!("Keyword \"{keyword}\" not found")),
        KeywordMatch::NotExists if found => Some(format!("Keyword \"{keyword}\" should not exist")),
        _ => None,
    }
}

/// First `limit` characters of `text`, cut on a char boundary
pub fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

fn request_headers(monitor: &Monitor) -> BTreeMap<String, String> {
    let mut headers = BTreeMap::from([
        ("User-Agent".to_string(), USER_AGENT.to_string()),
        ("Accept".to_string(), "*/*".to_string()),
        ("Connection".to_string(), "close".to_string()),
    ]);
    for (key, value) in &monitor.headers {
        // Caller headers replace the defaults regardless of case
        headers.retain(|existing, _| !existing.eq_ignore_ascii_case(key));
        headers.insert(key.clone(), value.clone());
    }
    headers
}

fn to_header_map(headers: &BTreeMap<String, String>) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (key, value) in headers {
        match (HeaderName::from_bytes(key.as_bytes()), HeaderValue::from_str(value)) {
            (Ok(name), Ok(value)) => {
                map.insert(name, value);
            }
            _ => tracing::debug!(header = %key, "Skipping invalid request header"),
        }
    }
    map
}

fn collect_response_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut collected = BTreeMap::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        collected
            .entry(name.as_str().to_string())
            .and_modify(|existing: &mut String| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }
    collected
}

fn timeout_message(limit: Duration) -> String {
    format!("Request timeout after {}ms", limit.as_millis())
}

#[async_trait::async_trait]
impl Checker for HttpChecker {
    async fn check(&self, monitor: &Monitor) -> CheckOutcome {
        let start = Instant::now();
        let limit = monitor.timeout();
        let headers = request_headers(monitor);
        let mut timings = Timings::default();

        let fail = |error: String, timings: Timings, status: Option<u16>| {
            CheckOutcome::failure(elapsed_ms(start), error).with_timings(timings).with_http(HttpDetails {
                status,
                request_headers: headers.clone(),
                ..HttpDetails::default()
            })
        };

        let url = match url::Url::parse(monitor.url.trim()) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => url,
            Ok(url) => return fail(format!("Unsupported URL scheme `{}`", url.scheme()), timings, None),
            Err(e) => return fail(format!("Invalid URL: {e}"), timings, None),
        };
        let Some(host) = url.host_str().map(|h| h.trim_start_matches('[').trim_end_matches(']').to_string())
        else {
            return fail("URL has no host".to_string(), timings, None);
        };
        let port = url.port_or_known_default().unwrap_or(80);

        let addrs = match resolve_timed(&host, port, limit).await {
            Ok((addrs, dns_ms)) => {
                timings.dns_lookup_ms = Some(dns_ms);
                addrs
            }
            Err(e) => return fail(e, timings, None),
        };

        let connect_start = Instant::now();
        match timeout(remaining(limit, start), TcpStream::connect(addrs.as_slice())).await {
            Ok(Ok(_stream)) => timings.connect_ms = Some(elapsed_ms(connect_start)),
            Ok(Err(e)) => return fail(format!("Connection failed: {e}"), timings, None),
            Err(_) => return fail("Connection timeout".to_string(), timings, None),
        }

        let method = reqwest::Method::from_bytes(monitor.method.trim().to_ascii_uppercase().as_bytes())
            .unwrap_or(reqwest::Method::GET);
        let mut request = self.client.request(method.clone(), url.clone()).headers(to_header_map(&headers));
        if let Some(body) = &monitor.body {
            if method != reqwest::Method::GET && method != reqwest::Method::HEAD {
                request = request.body(body.clone());
            }
        }

        let request_budget = remaining(limit, start);
        let response = match timeout(request_budget, request.timeout(request_budget).send()).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) if e.is_timeout() => return fail(timeout_message(limit), timings, None),
            Ok(Err(e)) => return fail(format!("Request failed: {e}"), timings, None),
            Err(_) => return fail(timeout_message(limit), timings, None),
        };

        let status = response.status().as_u16();
        let response_headers = collect_response_headers(response.headers());

        let download_start = Instant::now();
        let bytes = match timeout(remaining(limit, start), response.bytes()).await {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) => return fail(format!("Failed to read response body: {e}"), timings, Some(status)),
            Err(_) => return fail(timeout_message(limit), timings, Some(status)),
        };
        timings.download_ms = Some(elapsed_ms(download_start));

        let text = String::from_utf8_lossy(&bytes);
        let mut errors = Vec::new();
        if !status_matches(&monitor.expected_status, status) {
            errors.push(format!("Unexpected status {status}"));
        }
        if let Some(error) = keyword_error(&text, monitor.keyword.as_deref(), monitor.keyword_match) {
            errors.push(error);
        }

        let error = (!errors.is_empty()).then(|| errors.join("; "));
        CheckOutcome::from_error(elapsed_ms(start), error).with_timings(timings).with_http(HttpDetails {
            status: Some(status),
            request_headers: headers,
            response_headers: Some(response_headers),
            body: Some(truncate_chars(&text, BODY_LIMIT_CHARS)),
            size_bytes: Some(bytes.len() as u64),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codes(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_status_class_matching() {
        let expected = codes(&["2xx"]);
        assert!(status_matches(&expected, 204));
        assert!(status_matches(&expected, 200));
        assert!(!status_matches(&expected, 301));
        assert!(!status_matches(&expected, 500));
    }

    #[test]
    fn test_status_exact_and_mixed() {
        let expected = codes(&["301", "4XX"]);
        assert!(status_matches(&expected, 301));
        assert!(status_matches(&expected, 404));
        assert!(!status_matches(&expected, 302));
    }

    #[test]
    fn test_empty_expected_accepts_2xx_only() {
        assert!(status_matches(&[], 200));
        assert!(status_matches(&[], 299));
        assert!(!status_matches(&[], 302));
    }

    #[test]
    fn test_keyword_rules() {
        assert_eq!(keyword_error("all systems go", Some("go"), None), None);
        assert_eq!(
            keyword_error("all systems go", Some("down"), Some(KeywordMatch::Exists)),
            Some("Keyword \"down\" not found".to_string())
        );
        assert_eq!(
            keyword_error("error: down", Some("down"), Some(KeywordMatch::NotExists)),
            Some("Keyword \"down\" should not exist".to_string())
        );
        assert_eq!(keyword_error("anything", Some(""), Some(KeywordMatch::Exists)), None);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let text = "é".repeat(6000);
        let truncated = truncate_chars(&text, BODY_LIMIT_CHARS);
        assert_eq!(truncated.chars().count(), BODY_LIMIT_CHARS);
        assert_eq!(truncate_chars("short", BODY_LIMIT_CHARS), "short");
    }

    #[test]
    fn test_caller_headers_override_defaults() {
        let mut monitor = Monitor::new(uuid::Uuid::new_v4(), "https://example.com", crate::database::models::MonitorType::Http);
        monitor.headers.insert("user-agent".into(), "probe/1.0".into());
        let headers = request_headers(&monitor);
        assert_eq!(headers.get("user-agent").map(String::as_str), Some("probe/1.0"));
        assert!(!headers.contains_key("User-Agent"));
        assert_eq!(headers.get("Connection").map(String::as_str), Some("close"));
    }
}
