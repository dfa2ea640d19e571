// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2025-present Datadog, Inc.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dd_agent_telemetry::{MemoryRecorder, Telemetry};
use dd_npcollector::connection::{
    Addr, Connection, ConnectionDirection, ConnectionFamily, ConnectionType,
};
use dd_npcollector::filter::Cidr;
use dd_npcollector::forwarder::{EventType, Forwarder};
use dd_npcollector::payload::{NetworkPathDestination, NetworkPathHop};
use dd_npcollector::rdns::{ReverseDnsQuerier, ReverseDnsResult};
use dd_npcollector::subnets::StaticSubnets;
use dd_npcollector::traceroute::{Traceroute, TracerouteConfig};
use dd_npcollector::{CollectorConfig, Dependencies, Error, NetworkPath, NpCollector};
use tokio::sync::mpsc;

pub const EVENT_TIMEOUT: Duration = Duration::from_secs(60);

// ============================================================================
// Fakes
// ============================================================================

/// Returns a two hop path ending at the requested destination.
#[derive(Default)]
pub struct FakeTraceroute {
    pub calls: Mutex<Vec<TracerouteConfig>>,
    pub fail: bool,
}

#[async_trait]
impl Traceroute for FakeTraceroute {
    async fn run(&self, config: &TracerouteConfig) -> Result<NetworkPath, Error> {
        self.calls.lock().unwrap().push(config.clone());
        if self.fail {
            return Err(Error::Traceroute("no route to host".to_string()));
        }
        let mut path = NetworkPath::new(config.protocol);
        path.source.hostname = "agent-host".to_string();
        path.destination = NetworkPathDestination {
            hostname: config.dest_hostname.clone(),
            ip_address: config.dest_hostname.clone(),
            port: config.dest_port,
            ..Default::default()
        };
        path.hops = vec![
            NetworkPathHop {
                ttl: 1,
                ip_address: "10.0.0.1".to_string(),
                rtt: 0.5,
                reachable: true,
                ..Default::default()
            },
            NetworkPathHop {
                ttl: 2,
                ip_address: config.dest_hostname.clone(),
                rtt: 12.0,
                reachable: true,
                ..Default::default()
            },
        ];
        Ok(path)
    }
}

#[derive(Default)]
pub struct FakeReverseDns(pub HashMap<String, String>);

#[async_trait]
impl ReverseDnsQuerier for FakeReverseDns {
    async fn get_hostnames(&self, ips: &[String]) -> HashMap<String, ReverseDnsResult> {
        ips.iter()
            .filter_map(|ip| {
                self.0.get(ip).map(|name| {
                    (
                        ip.clone(),
                        ReverseDnsResult {
                            hostname: name.clone(),
                            error: None,
                        },
                    )
                })
            })
            .collect()
    }
}

/// Hands every forwarded event to the test.
pub struct ChannelForwarder(pub mpsc::UnboundedSender<(serde_json::Value, EventType)>);

#[async_trait]
impl Forwarder for ChannelForwarder {
    async fn send_blocking(&self, payload: Vec<u8>, event_type: EventType) -> Result<(), Error> {
        let json = serde_json::from_slice(&payload).map_err(|e| Error::Forwarder(e.to_string()))?;
        self.0
            .send((json, event_type))
            .map_err(|e| Error::Forwarder(e.to_string()))
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub collector: Arc<NpCollector>,
    pub telemetry: MemoryRecorder,
    pub traceroute: Arc<FakeTraceroute>,
    pub events: mpsc::UnboundedReceiver<(serde_json::Value, EventType)>,
}

pub fn enabled_config() -> CollectorConfig {
    CollectorConfig {
        connections_monitoring_enabled: true,
        ..CollectorConfig::default()
    }
}

pub fn harness(config: CollectorConfig) -> Harness {
    harness_with(config, FakeTraceroute::default(), FakeReverseDns::default(), vec![])
}

pub fn harness_with(
    config: CollectorConfig,
    traceroute: FakeTraceroute,
    rdns: FakeReverseDns,
    subnets: Vec<Cidr>,
) -> Harness {
    let telemetry = MemoryRecorder::new();
    let traceroute = Arc::new(traceroute);
    let (tx, events) = mpsc::unbounded_channel();
    let collector = NpCollector::new(
        config,
        Dependencies {
            traceroute: traceroute.clone(),
            rdns: Arc::new(rdns),
            forwarder: Arc::new(ChannelForwarder(tx)),
            subnets: Arc::new(StaticSubnets(subnets)),
            telemetry: Telemetry::with_recorder(telemetry.clone()),
        },
    );
    Harness {
        collector: Arc::new(collector),
        telemetry,
        traceroute,
        events,
    }
}

// ============================================================================
// Connections
// ============================================================================

pub fn outgoing(conn_type: ConnectionType, raddr: &str, port: i32) -> Connection {
    Connection {
        laddr: Addr {
            ip: "10.0.0.5".to_string(),
            port: 40000,
            container_id: "cid-1".to_string(),
        },
        raddr: Addr {
            ip: raddr.to_string(),
            port,
            container_id: String::new(),
        },
        conn_type,
        family: ConnectionFamily::V4,
        direction: ConnectionDirection::Outgoing,
        intra_host: false,
        ip_translation: None,
    }
}

pub fn tcp(raddr: &str, port: i32) -> Connection {
    outgoing(ConnectionType::Tcp, raddr, port)
}

pub fn metric(suffix: &str) -> String {
    format!("datadog.network_path.collector.{suffix}")
}

pub async fn next_event(harness: &mut Harness) -> (serde_json::Value, EventType) {
    tokio::time::timeout(EVENT_TIMEOUT, harness.events.recv())
        .await
        .expect("timed out waiting for a network path event")
        .expect("forwarder channel closed")
}
