use std::str::FromStr;
use std::time::Instant;

use futures::future::join_all;
use hickory_resolver::TokioAsyncResolver;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::proto::rr::RecordType;
use tokio::time::timeout;

use super::checker::{Checker, elapsed_ms, host_of};
use super::types::{CheckDetails, CheckOutcome, DnsRecordResult, Timings};
use crate::database::models::{DnsRecordExpectation, Monitor};

const SUPPORTED_TYPES: [&str; 9] = ["A", "AAAA", "CNAME", "MX", "TXT", "NS", "SOA", "SRV", "PTR"];

/// DNS record checker
pub struct DnsChecker {
    resolver: TokioAsyncResolver,
}

impl DnsChecker {
    pub fn new() -> Self {
        let resolver = TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Falling back to default resolver configuration");
            TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default())
        });
        Self { resolver }
    }

    async fn resolve(&self, host: &str, expectation: &DnsRecordExpectation) -> Result<DnsRecordResult, String> {
        let type_name = expectation.record_type.trim().to_ascii_uppercase();
        if !SUPPORTED_TYPES.contains(&type_name.as_str()) {
            return Err(format!("Unsupported DNS record type {}", expectation.record_type));
        }
        let record_type = RecordType::from_str(&type_name)
            .map_err(|e| format!("Unsupported DNS record type {type_name}: {e}"))?;

        let lookup = self
            .resolver
            .lookup(host, record_type)
            .await
            .map_err(|e| format!("{type_name} lookup failed: {e}"))?;

        let values: Vec<String> = lookup.iter().map(|data| data.to_string()).collect();
        Ok(DnsRecordResult {
            record_type: type_name,
            expected: expectation.value.clone(),
            matched: record_matches(&values, &expectation.value),
            values,
        })
    }
}

impl Default for DnsChecker {
    fn default() -> Self {
        Self::new()
    }
}

/// Case-insensitive containment against the serialized record set
pub fn record_matches(values: &[String], expected: &str) -> bool {
    let serialized = serde_json::to_string(values).unwrap_or_default().to_lowercase();
    serialized.contains(&expected.trim().to_lowercase())
}

#[async_trait::async_trait]
impl Checker for DnsChecker {
    async fn check(&self, monitor: &Monitor) -> CheckOutcome {
        let start = Instant::now();
        let Some(host) = host_of(&monitor.url) else {
            return CheckOutcome::failure(0, format!("Invalid hostname: {}", monitor.url));
        };

        if monitor.dns_records.is_empty() {
            // Nothing to compare, so the name just has to resolve
            return match timeout(monitor.timeout(), self.resolver.lookup_ip(host.as_str())).await {
                Ok(Ok(ips)) if ips.iter().next().is_some() => CheckOutcome::success(elapsed_ms(start)),
                Ok(Ok(_)) => CheckOutcome::failure(elapsed_ms(start), "No addresses found"),
                Ok(Err(e)) => CheckOutcome::failure(elapsed_ms(start), format!("DNS lookup failed: {e}")),
                Err(_) => CheckOutcome::failure(elapsed_ms(start), "DNS timeout"),
            }
            .with_timings(Timings { dns_lookup_ms: Some(elapsed_ms(start)), ..Timings::default() });
        }

        let lookups = monitor.dns_records.iter().map(|expectation| self.resolve(&host, expectation));
        let results = match timeout(monitor.timeout(), join_all(lookups)).await {
            Ok(results) => results,
            Err(_) => return CheckOutcome::failure(elapsed_ms(start), "DNS timeout"),
        };

        let timings = Timings { dns_lookup_ms: Some(elapsed_ms(start)), ..Timings::default() };
        let mut records = Vec::with_capacity(results.len());
        let mut first_error = None;
        for result in results {
            match result {
                Ok(record) => records.push(record),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        let error = first_error.or_else(|| {
            (!records.iter().all(|r| r.matched)).then(|| "One or more DNS records not found".to_string())
        });

        CheckOutcome::from_error(elapsed_ms(start), error)
            .with_timings(timings)
            .with_details(CheckDetails::Dns { records })
    }
}
