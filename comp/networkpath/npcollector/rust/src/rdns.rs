// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2025-present Datadog, Inc.

//! Reverse DNS enrichment of network paths.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use dd_agent_telemetry::Telemetry;
use log::{debug, trace};

use crate::metrics;
use crate::payload::NetworkPath;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReverseDnsResult {
    /// Empty when the address has no name.
    pub hostname: String,
    pub error: Option<String>,
}

#[async_trait]
pub trait ReverseDnsQuerier: Send + Sync {
    /// Look up every address in `ips`. Addresses missing from the result
    /// were not resolved.
    async fn get_hostnames(&self, ips: &[String]) -> HashMap<String, ReverseDnsResult>;
}

/// Never resolves anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReverseDns;

#[async_trait]
impl ReverseDnsQuerier for NoopReverseDns {
    async fn get_hostnames(&self, _ips: &[String]) -> HashMap<String, ReverseDnsResult> {
        HashMap::new()
    }
}

fn lookup_result(
    ip: &str,
    results: &HashMap<String, ReverseDnsResult>,
    telemetry: &Telemetry,
) -> Option<String> {
    let Some(result) = results.get(ip) else {
        telemetry.count(&metrics::name(metrics::RDNS_FAILURES), 1, &[("reason", "absent")]);
        trace!("reverse DNS lookup failed for IP {ip}");
        return None;
    };
    if let Some(error) = &result.error {
        telemetry.count(&metrics::name(metrics::RDNS_FAILURES), 1, &[("reason", "error")]);
        trace!("reverse DNS lookup failed for IP {ip}: {error}");
        return None;
    }
    let status = if result.hostname.is_empty() {
        "empty"
    } else {
        "found"
    };
    telemetry.count(&metrics::name(metrics::RDNS_SUCCESSES), 1, &[("status", status)]);
    (!result.hostname.is_empty()).then(|| result.hostname.clone())
}

/// Fill hop hostnames and the destination reverse DNS name of `path`.
///
/// `known_dest_hostname` is the name the connections check already saw for
/// the destination; when set, the destination is not looked up. The whole
/// lookup is bounded by `timeout`; a timed out lookup resolves nothing.
pub async fn enrich_path(
    path: &mut NetworkPath,
    known_dest_hostname: &str,
    querier: &dyn ReverseDnsQuerier,
    timeout: Duration,
    telemetry: &Telemetry,
) {
    let mut ips = BTreeSet::new();
    if known_dest_hostname.is_empty() {
        ips.insert(path.destination.ip_address.clone());
    }
    for hop in path.hops.iter().filter(|hop| hop.reachable) {
        ips.insert(hop.ip_address.clone());
    }
    let ips: Vec<String> = ips.into_iter().collect();

    let results = match tokio::time::timeout(timeout, querier.get_hostnames(&ips)).await {
        Ok(results) => results,
        Err(_) => {
            debug!("reverse DNS lookup timed out after {timeout:?}");
            HashMap::new()
        }
    };
    if results.len() != ips.len() {
        telemetry.count(
            &metrics::name(metrics::RDNS_RESULTS_LENGTH_MISMATCH),
            1,
            &[],
        );
        debug!(
            "reverse DNS lookup returned {} results for {} addresses in path from {} to {}",
            results.len(),
            ips.len(),
            path.source.hostname,
            path.destination.hostname
        );
    }

    if !known_dest_hostname.is_empty() {
        path.destination.reverse_dns_hostname = known_dest_hostname.to_string();
    } else if let Some(hostname) = lookup_result(&path.destination.ip_address, &results, telemetry)
    {
        path.destination.reverse_dns_hostname = hostname;
    }

    for hop in path.hops.iter_mut().filter(|hop| hop.reachable) {
        if let Some(hostname) = lookup_result(&hop.ip_address, &results, telemetry) {
            hop.hostname = hostname;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::payload::{NetworkPathDestination, NetworkPathHop, Protocol};
    use dd_agent_telemetry::MemoryRecorder;

    struct MapQuerier(HashMap<String, ReverseDnsResult>);

    #[async_trait]
    impl ReverseDnsQuerier for MapQuerier {
        async fn get_hostnames(&self, ips: &[String]) -> HashMap<String, ReverseDnsResult> {
            ips.iter()
                .filter_map(|ip| self.0.get(ip).map(|r| (ip.clone(), r.clone())))
                .collect()
        }
    }

    struct StalledQuerier;

    #[async_trait]
    impl ReverseDnsQuerier for StalledQuerier {
        async fn get_hostnames(&self, _ips: &[String]) -> HashMap<String, ReverseDnsResult> {
            std::future::pending().await
        }
    }

    fn found(name: &str) -> ReverseDnsResult {
        ReverseDnsResult {
            hostname: name.to_string(),
            error: None,
        }
    }

    fn hop(ttl: i32, ip: &str, reachable: bool) -> NetworkPathHop {
        NetworkPathHop {
            ttl,
            ip_address: ip.to_string(),
            reachable,
            ..Default::default()
        }
    }

    fn path() -> NetworkPath {
        let mut path = NetworkPath::new(Protocol::Tcp);
        path.destination = NetworkPathDestination {
            hostname: "8.8.8.8".to_string(),
            ip_address: "8.8.8.8".to_string(),
            port: 443,
            ..Default::default()
        };
        path.hops = vec![
            hop(1, "10.0.0.1", true),
            hop(2, "unknown", false),
            hop(3, "10.0.0.3", true),
            hop(4, "8.8.8.8", true),
        ];
        path
    }

    fn telemetry() -> (MemoryRecorder, Telemetry) {
        let recorder = MemoryRecorder::new();
        (recorder.clone(), Telemetry::with_recorder(recorder))
    }

    const MISMATCH: &str = "datadog.network_path.collector.reverse_dns_lookup.results_length_mismatch";
    const FAILURES: &str = "datadog.network_path.collector.reverse_dns_lookup.failures";
    const SUCCESSES: &str = "datadog.network_path.collector.reverse_dns_lookup.successes";

    #[tokio::test]
    async fn test_enrich_hops_and_destination() {
        let mut results = HashMap::new();
        results.insert("10.0.0.1".to_string(), found("gw.local"));
        results.insert("10.0.0.3".to_string(), found(""));
        results.insert("8.8.8.8".to_string(), found("dns.google"));
        let (recorder, telemetry) = telemetry();

        let mut path = path();
        enrich_path(&mut path, "", &MapQuerier(results), Duration::from_secs(1), &telemetry).await;

        assert_eq!(path.destination.reverse_dns_hostname, "dns.google");
        assert_eq!(path.hops[0].hostname, "gw.local");
        assert_eq!(path.hops[1].hostname, "");
        assert_eq!(path.hops[2].hostname, "");
        assert_eq!(path.hops[3].hostname, "dns.google");
        assert_eq!(recorder.count_total(MISMATCH), 0);
        assert_eq!(recorder.count_value(SUCCESSES, &[("status", "found")]), 3);
        assert_eq!(recorder.count_value(SUCCESSES, &[("status", "empty")]), 1);
    }

    #[tokio::test]
    async fn test_known_destination_is_not_looked_up() {
        let mut results = HashMap::new();
        results.insert("8.8.8.8".to_string(), found("dns.google"));
        let (recorder, telemetry) = telemetry();

        let mut path = path();
        enrich_path(
            &mut path,
            "resolver.example",
            &MapQuerier(results),
            Duration::from_secs(1),
            &telemetry,
        )
        .await;

        assert_eq!(path.destination.reverse_dns_hostname, "resolver.example");
        // The last hop is still resolved on its own.
        assert_eq!(path.hops[3].hostname, "dns.google");
    }

    #[tokio::test]
    async fn test_errors_and_absent_results() {
        let mut results = HashMap::new();
        results.insert(
            "10.0.0.1".to_string(),
            ReverseDnsResult {
                hostname: String::new(),
                error: Some("SERVFAIL".to_string()),
            },
        );
        let (recorder, telemetry) = telemetry();

        let mut path = path();
        enrich_path(&mut path, "", &MapQuerier(results), Duration::from_secs(1), &telemetry).await;

        assert!(path.destination.reverse_dns_hostname.is_empty());
        assert!(path.hops.iter().all(|hop| hop.hostname.is_empty()));
        assert_eq!(recorder.count_total(MISMATCH), 1);
        assert_eq!(recorder.count_value(FAILURES, &[("reason", "error")]), 1);
        // destination and hops 3 and 4
        assert_eq!(recorder.count_value(FAILURES, &[("reason", "absent")]), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_deadline() {
        let (recorder, telemetry) = telemetry();
        let mut path = path();
        enrich_path(&mut path, "", &StalledQuerier, Duration::from_millis(500), &telemetry).await;
        assert!(path.destination.reverse_dns_hostname.is_empty());
        assert_eq!(recorder.count_total(MISMATCH), 1);
    }
}
