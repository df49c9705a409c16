use std::time::{Duration, Instant};

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::checker::remaining;

const IANA_SERVER: &str = "whois.iana.org";
const WHOIS_PORT: u16 = 43;
/// Responses larger than this are cut off
const MAX_RESPONSE_BYTES: u64 = 256 * 1024;

/// Expiry labels in the order they are tried
const EXPIRY_LABELS: [&str; 5] = [
    "Registry Expiry Date",
    "Registrar Registration Expiration Date",
    "Expiration Date",
    "Expiry Date",
    "paid-till",
];

/// WHOIS client following the IANA referral to the registry server
pub struct WhoisClient {
    root: String,
    port: u16,
    referral: Regex,
    expiry_patterns: Vec<Regex>,
}

impl WhoisClient {
    pub fn new() -> anyhow::Result<Self> {
        let expiry_patterns = EXPIRY_LABELS
            .iter()
            .map(|label| Regex::new(&format!(r"(?im)^\s*{}:\s*(.+?)\s*$", regex::escape(label))))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            root: IANA_SERVER.to_string(),
            port: WHOIS_PORT,
            referral: Regex::new(r"(?im)^\s*(?:refer|whois):\s*(\S+)")?,
            expiry_patterns,
        })
    }

    /// Start lookups at `root` instead of IANA; referrals use the same port
    pub fn with_root(mut self, root: impl Into<String>, port: u16) -> Self {
        self.root = root.into();
        self.port = port;
        self
    }

    /// Full WHOIS text for `domain`, from the referred registry when the root names one.
    ///
    /// Both queries share `limit`.
    pub async fn lookup(&self, domain: &str, limit: Duration) -> Result<String, String> {
        let start = Instant::now();
        let root = query(&self.root, self.port, domain, limit).await?;
        match self.referral.captures(&root).and_then(|caps| caps.get(1)) {
            Some(server) if !server.as_str().eq_ignore_ascii_case(&self.root) => {
                query(server.as_str(), self.port, domain, remaining(limit, start)).await
            }
            _ => Ok(root),
        }
    }

    /// First parsable expiry date among the known labels
    pub fn parse_expiry(&self, text: &str) -> Option<DateTime<Utc>> {
        self.expiry_patterns.iter().find_map(|pattern| {
            pattern
                .captures_iter(text)
                .filter_map(|caps| caps.get(1))
                .find_map(|value| parse_date(value.as_str()))
        })
    }
}

async fn query(server: &str, port: u16, domain: &str, limit: Duration) -> Result<String, String> {
    let exchange = async {
        let mut stream = TcpStream::connect((server, port)).await?;
        stream.write_all(format!("{domain}\r\n").as_bytes()).await?;

        let mut buf = Vec::new();
        stream.take(MAX_RESPONSE_BYTES).read_to_end(&mut buf).await?;
        Ok::<_, std::io::Error>(String::from_utf8_lossy(&buf).into_owned())
    };

    timeout(limit, exchange)
        .await
        .map_err(|_| format!("WHOIS timeout ({server})"))?
        .map_err(|e| format!("WHOIS query to {server} failed: {e}"))
}

/// Parse the date formats registries commonly emit
pub fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(date) = DateTime::parse_from_rfc3339(raw) {
        return Some(date.with_timezone(&Utc));
    }

    // Some registries append a zone name, e.g. "2025-08-13 04:00:00 UTC"
    let trimmed = raw.trim_end_matches(" UTC").trim_end_matches('Z').trim_end_matches('.');
    const DATETIME_FORMATS: [&str; 4] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S", "%Y.%m.%d %H:%M:%S", "%d-%b-%Y %H:%M:%S"];
    for format in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(naive.and_utc());
        }
    }

    const DATE_FORMATS: [&str; 6] = ["%Y-%m-%d", "%Y.%m.%d", "%Y/%m/%d", "%d-%b-%Y", "%d.%m.%Y", "%d/%m/%Y"];
    let date_part = trimmed.split_whitespace().next().unwrap_or(trimmed);
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(date_part, format).ok())
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone};

    /// Root server that answers the first connection with a referral after
    /// `delay` and never answers anything after that
    async fn referring_root(delay: Duration) -> u16 {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut first, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 256];
            let _ = first.read(&mut request).await;
            tokio::time::sleep(delay).await;
            first.write_all(b"refer: 127.0.0.1\n").await.unwrap();
            drop(first);

            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });
        port
    }

    #[tokio::test]
    async fn test_referral_shares_the_time_budget() {
        let port = referring_root(Duration::from_millis(600)).await;
        let client = WhoisClient::new().unwrap().with_root("localhost", port);

        let start = Instant::now();
        let result = client.lookup("example.com", Duration::from_millis(1000)).await;
        let elapsed = start.elapsed();

        assert_eq!(result.unwrap_err(), "WHOIS timeout (127.0.0.1)");
        assert!(elapsed < Duration::from_millis(1300), "took {elapsed:?}");
    }

    #[test]
    fn test_registry_expiry_date() {
        let client = WhoisClient::new().unwrap();
        let text = "Domain Name: EXAMPLE.COM\n   Registry Expiry Date: 2025-08-13T04:00:00Z\nRegistrar: RESERVED-IANA\n";
        assert_eq!(
            client.parse_expiry(text),
            Some(Utc.with_ymd_and_hms(2025, 8, 13, 4, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_fallback_labels() {
        let client = WhoisClient::new().unwrap();
        let text = "domain: EXAMPLE.RU\npaid-till: 2026.03.01\n";
        assert_eq!(client.parse_expiry(text).map(|d| (d.year(), d.month(), d.day())), Some((2026, 3, 1)));

        let text = "Registrar Registration Expiration Date: 2027-01-15 12:30:00\n";
        assert_eq!(client.parse_expiry(text).map(|d| d.year()), Some(2027));
    }

    #[test]
    fn test_skips_unparsable_values() {
        let client = WhoisClient::new().unwrap();
        let text = "Expiry Date: not disclosed\nExpiration Date: 14-Feb-2030\n";
        assert_eq!(client.parse_expiry(text).map(|d| d.year()), Some(2030));
        assert_eq!(client.parse_expiry("No match for domain"), None);
    }
}
