use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tokio::time::timeout;

use super::types::CheckOutcome;
use crate::database::models::Monitor;

/// Checker trait for the different monitor protocols
///
/// Implementations never fail: transport errors, timeouts and mismatches are
/// reported as a DOWN outcome with an error message.
#[async_trait::async_trait]
pub trait Checker: Send + Sync {
    async fn check(&self, monitor: &Monitor) -> CheckOutcome;
}

/// Milliseconds elapsed since `start`
pub(crate) fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

/// Split a monitor target into host and port.
///
/// Accepts full URLs (`https://example.com:8443/path`), `host:port`, bracketed
/// IPv6 literals and bare hosts. An explicit `port` wins over the one in the
/// target; `default_port` applies when neither has one.
pub(crate) fn host_and_port(target: &str, port: Option<u16>, default_port: Option<u16>) -> Option<(String, u16)> {
    let target = target.trim();
    if target.is_empty() {
        return None;
    }

    let (host, embedded_port) = if target.contains("://") {
        let url = url::Url::parse(target).ok()?;
        let host = url.host_str()?.trim_start_matches('[').trim_end_matches(']').to_string();
        (host, url.port_or_known_default())
    } else {
        let authority = target.split(['/', '?', '#']).next().unwrap_or(target);
        if let Some(rest) = authority.strip_prefix('[') {
            let (host, tail) = rest.split_once(']')?;
            let port = tail.strip_prefix(':').and_then(|p| p.parse().ok());
            (host.to_string(), port)
        } else if authority.matches(':').count() == 1 {
            let (host, port) = authority.split_once(':')?;
            (host.to_string(), port.parse().ok())
        } else {
            (authority.to_string(), None)
        }
    };

    if host.is_empty() {
        return None;
    }
    let port = port.or(embedded_port).or(default_port)?;
    Some((host, port))
}

/// Host part of a target, without port or scheme
pub(crate) fn host_of(target: &str) -> Option<String> {
    host_and_port(target, None, Some(0)).map(|(host, _)| host)
}

/// Resolve `host:port`, returning the addresses and the lookup time in ms
pub(crate) async fn resolve_timed(
    host: &str,
    port: u16,
    limit: Duration,
) -> Result<(Vec<SocketAddr>, u64), String> {
    let start = Instant::now();
    let addrs = timeout(limit, tokio::net::lookup_host((host, port)))
        .await
        .map_err(|_| "DNS lookup timeout".to_string())?
        .map_err(|e| format!("DNS lookup failed: {e}"))?
        .collect::<Vec<_>>();

    if addrs.is_empty() {
        return Err(format!("DNS lookup returned no addresses for {host}"));
    }
    Ok((addrs, elapsed_ms(start)))
}

/// Time left of `limit` since `start`, never zero
pub(crate) fn remaining(limit: Duration, start: Instant) -> Duration {
    limit.saturating_sub(start.elapsed()).max(Duration::from_millis(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_and_port_from_url() {
        assert_eq!(
            host_and_port("https://example.com/health", None, None),
            Some(("example.com".to_string(), 443))
        );
        assert_eq!(
            host_and_port("http://example.com:8080", None, None),
            Some(("example.com".to_string(), 8080))
        );
    }

    #[test]
    fn test_host_and_port_explicit_port_wins() {
        assert_eq!(
            host_and_port("db.internal:5432", Some(6432), None),
            Some(("db.internal".to_string(), 6432))
        );
        assert_eq!(host_and_port("db.internal", None, None), None);
        assert_eq!(
            host_and_port("db.internal", None, Some(443)),
            Some(("db.internal".to_string(), 443))
        );
    }

    #[test]
    fn test_host_and_port_ipv6() {
        assert_eq!(host_and_port("[::1]:22", None, None), Some(("::1".to_string(), 22)));
        assert_eq!(host_of("::1"), Some("::1".to_string()));
    }

    #[tokio::test]
    async fn test_resolve_localhost() {
        let (addrs, _) = resolve_timed("127.0.0.1", 80, Duration::from_secs(1)).await.unwrap();
        assert_eq!(addrs[0].port(), 80);
    }
}
