// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2025-present Datadog, Inc.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

mod helpers;

use std::collections::HashMap;
use std::time::Duration;

use dd_npcollector::connection::{
    ConnectionDirection, ConnectionFamily, ConnectionType, DnsEntry, DnsMap, IpTranslation,
};
use dd_npcollector::forwarder::EventType;
use dd_npcollector::{CollectorConfig, Error, Protocol, TcpMethod};
use helpers::*;

fn skipped(harness: &Harness, reason: &str) -> u64 {
    harness
        .telemetry
        .count_value(&metric("schedule.conns_skipped"), &[("reason", reason)])
}

// ============================================================================
// Scheduling
// ============================================================================

#[test]
fn test_full_input_channel_drops_without_blocking() {
    let harness = harness(CollectorConfig {
        input_chan_size: 1,
        ..enabled_config()
    });

    // Nothing drains the input channel.
    harness
        .collector
        .schedule_conns(&[tcp("1.1.1.1", 443), tcp("2.2.2.2", 443)], &DnsMap::new());

    let telemetry = &harness.telemetry;
    assert_eq!(telemetry.count_total(&metric("schedule.conns_received")), 2);
    assert_eq!(telemetry.count_total(&metric("schedule.pathtest_count")), 2);
    assert_eq!(
        telemetry.count_total(&metric("schedule.pathtest_processed")),
        1
    );
    assert_eq!(
        telemetry.count_value(
            &metric("schedule.pathtest_dropped"),
            &[("reason", "input_chan_full")]
        ),
        1
    );
}

#[test]
fn test_disabled_collection_schedules_nothing() {
    let harness = harness(CollectorConfig::default());
    harness
        .collector
        .schedule_conns(&[tcp("1.1.1.1", 443)], &DnsMap::new());
    assert!(harness.telemetry.samples().is_empty());
}

#[test]
fn test_skip_reasons() {
    let harness = harness(enabled_config());

    let mut intra_host = tcp("1.1.1.1", 443);
    intra_host.intra_host = true;
    let mut incoming = tcp("1.1.1.1", 443);
    incoming.direction = ConnectionDirection::Incoming;
    let mut ipv6 = tcp("2001:db8::1", 443);
    ipv6.family = ConnectionFamily::V6;

    harness
        .collector
        .schedule_conns(&[intra_host, incoming, ipv6], &DnsMap::new());

    assert_eq!(skipped(&harness, "skip_intra_host"), 1);
    assert_eq!(skipped(&harness, "skip_incoming"), 1);
    assert_eq!(skipped(&harness, "skip_ipv6"), 1);
    assert_eq!(
        harness
            .telemetry
            .count_total(&metric("schedule.pathtest_count")),
        0
    );
}

#[test]
fn test_cidr_filters() {
    let mut dest_excludes = HashMap::new();
    dest_excludes.insert("10.0.0.0/8".to_string(), vec![]);
    let mut source_excludes = HashMap::new();
    source_excludes.insert("*".to_string(), vec!["tcp 22".to_string()]);
    let harness = harness(CollectorConfig {
        dest_excludes,
        source_excludes,
        ..enabled_config()
    });

    let mut bad_source = tcp("1.1.1.1", 443);
    bad_source.laddr.ip = "garbage".to_string();
    let bad_dest = tcp("not-an-ip", 443);
    // The translated destination is what the filters see.
    let mut natted = tcp("1.2.3.4", 443);
    natted.ip_translation = Some(IpTranslation {
        repl_dst_ip: "10.1.1.1".to_string(),
        ..Default::default()
    });
    let mut ssh = tcp("8.8.8.8", 443);
    ssh.laddr.port = 22;
    let allowed = tcp("8.8.8.8", 443);

    harness
        .collector
        .schedule_conns(&[bad_source, bad_dest, natted, ssh, allowed], &DnsMap::new());

    assert_eq!(skipped(&harness, "failed_parse_source_ip"), 1);
    assert_eq!(skipped(&harness, "failed_parse_dest_ip"), 1);
    assert_eq!(skipped(&harness, "skip_cidr_excluded"), 2);
    assert_eq!(
        harness
            .telemetry
            .count_total(&metric("schedule.pathtest_processed")),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn test_intra_vpc_traffic_is_skipped() {
    let harness = harness_with(
        CollectorConfig {
            disable_intra_vpc_collection: true,
            ..enabled_config()
        },
        FakeTraceroute::default(),
        FakeReverseDns::default(),
        vec!["172.31.0.0/16".parse().unwrap()],
    );
    harness.collector.start().await.unwrap();

    harness.collector.schedule_conns(
        &[tcp("172.31.4.5", 443), tcp("8.8.8.8", 443)],
        &DnsMap::new(),
    );
    assert_eq!(skipped(&harness, "skip_intra_vpc"), 1);
    assert_eq!(
        harness
            .telemetry
            .count_total(&metric("schedule.pathtest_processed")),
        1
    );

    harness.collector.stop().await;
}

// ============================================================================
// End to end
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_connection_to_network_path_event() {
    let mut rdns = HashMap::new();
    rdns.insert("10.0.0.1".to_string(), "gw.local".to_string());
    let mut harness = harness_with(
        CollectorConfig {
            tcp_method: "prefer_sack".to_string(),
            ..enabled_config()
        },
        FakeTraceroute::default(),
        FakeReverseDns(rdns),
        vec![],
    );
    let mut dns = DnsMap::new();
    dns.insert(
        "1.2.3.4".to_string(),
        DnsEntry {
            names: vec!["api.example.com".to_string()],
        },
    );

    harness.collector.start().await.unwrap();
    // Same fingerprint twice: one traceroute.
    harness
        .collector
        .schedule_conns(&[tcp("1.2.3.4", 443), tcp("1.2.3.4", 443)], &dns);

    let (event, event_type) = next_event(&mut harness).await;
    assert_eq!(event_type, EventType::NetworkPath);
    assert_eq!(event["protocol"], "TCP");
    assert_eq!(event["origin"], "network_traffic");
    assert_eq!(event["namespace"], "default");
    assert_eq!(event["source"]["container_id"], "cid-1");
    assert_eq!(event["destination"]["port"], 443);
    assert_eq!(
        event["destination"]["reverse_dns_hostname"],
        "api.example.com"
    );
    assert_eq!(event["hops"][0]["hostname"], "gw.local");
    assert!(event["hops"][1].get("hostname").is_none());

    assert_eq!(harness.collector.received_pathtest_count(), 2);
    assert_eq!(harness.collector.store_len(), 1);
    assert_eq!(harness.collector.processed_traceroute_count(), 1);
    assert_eq!(
        harness
            .telemetry
            .count_total(&metric("worker.pathtest_processed")),
        1
    );
    assert_eq!(
        harness
            .telemetry
            .histogram_values(&metric("worker.task_duration"))
            .len(),
        1
    );

    let calls = harness.traceroute.calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].dest_hostname, "1.2.3.4");
    assert_eq!(calls[0].dest_port, 443);
    assert_eq!(calls[0].protocol, Protocol::Tcp);
    assert_eq!(calls[0].tcp_method, TcpMethod::PreferSack);
    assert_eq!(calls[0].max_ttl, 30);
    assert_eq!(calls[0].reverse_dns_hint, "api.example.com");

    harness.collector.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_udp_pathtest_has_no_port() {
    let mut harness = harness(enabled_config());
    harness.collector.start().await.unwrap();
    harness.collector.schedule_conns(
        &[outgoing(ConnectionType::Udp, "9.9.9.9", 53)],
        &DnsMap::new(),
    );

    let (event, _) = next_event(&mut harness).await;
    assert_eq!(event["protocol"], "UDP");
    assert_eq!(event["destination"]["port"], 0);
    assert_eq!(harness.traceroute.calls.lock().unwrap()[0].dest_port, 0);

    harness.collector.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_full_processing_channel_drops_at_flush() {
    let harness = harness(CollectorConfig {
        processing_chan_size: 1,
        workers: 1,
        ..enabled_config()
    });
    harness.collector.start().await.unwrap();
    harness.collector.schedule_conns(
        &[tcp("1.1.1.1", 443), tcp("2.2.2.2", 443), tcp("3.3.3.3", 443)],
        &DnsMap::new(),
    );

    // First flush happens one flush interval after start.
    tokio::time::sleep(Duration::from_millis(10_500)).await;

    let telemetry = &harness.telemetry;
    assert_eq!(telemetry.count_total(&metric("flush.pathtest_count")), 3);
    assert_eq!(
        telemetry.count_total(&metric("flush.pathtest_processed")),
        1
    );
    assert_eq!(
        telemetry.count_value(
            &metric("flush.pathtest_dropped"),
            &[("reason", "processing_chan_full")]
        ),
        2
    );
    assert_eq!(telemetry.gauge_value(&metric("workers"), &[]), Some(1.0));
    assert_eq!(
        telemetry.gauge_value(&metric("pathtest_store_size"), &[]),
        Some(3.0)
    );

    harness.collector.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_traceroute_failure_is_logged_and_skipped() {
    let mut harness = harness_with(
        enabled_config(),
        FakeTraceroute {
            fail: true,
            ..Default::default()
        },
        FakeReverseDns::default(),
        vec![],
    );
    harness.collector.start().await.unwrap();
    harness
        .collector
        .schedule_conns(&[tcp("1.1.1.1", 443)], &DnsMap::new());

    tokio::time::sleep(Duration::from_secs(11)).await;

    assert_eq!(harness.traceroute.calls.lock().unwrap().len(), 1);
    assert!(harness.events.try_recv().is_err());
    assert_eq!(harness.collector.processed_traceroute_count(), 1);

    harness.collector.stop().await;
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_start_stop() {
    let harness = harness(enabled_config());

    // Stop before start is fine.
    harness.collector.stop().await;

    harness.collector.start().await.unwrap();
    assert!(harness.collector.is_running());
    let err = harness.collector.start().await.unwrap_err();
    assert_eq!(err, Error::AlreadyStarted);
    assert_eq!(err.to_string(), "server already started");

    harness.collector.stop().await;
    assert!(!harness.collector.is_running());
    harness.collector.stop().await;

    // A stopped collector can be started again.
    harness.collector.start().await.unwrap();
    harness.collector.stop().await;
}
