// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2025-present Datadog, Inc.

//! Network path event payload, as sent to the event platform.

use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Protocol keywords from the IANA protocol numbers registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
    Icmp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
            Protocol::Icmp => "ICMP",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a TCP traceroute probes the remote end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TcpMethod {
    /// SYN probes only.
    #[default]
    Syn,
    /// SACK probes only.
    Sack,
    /// SACK, falling back to SYN when the remote does not support it.
    PreferSack,
    /// SYN through a TCP socket with socket options (windows only).
    SynSocket,
}

impl TcpMethod {
    /// Case-insensitive parse of the configured method. Unknown values fall
    /// back to [`TcpMethod::Syn`].
    pub fn from_config(method: &str) -> Self {
        match method.trim().to_lowercase().as_str() {
            "sack" => TcpMethod::Sack,
            "prefer_sack" => TcpMethod::PreferSack,
            "syn_socket" => TcpMethod::SynSocket,
            _ => TcpMethod::Syn,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TcpMethod::Syn => "syn",
            TcpMethod::Sack => "sack",
            TcpMethod::PreferSack => "prefer_sack",
            TcpMethod::SynSocket => "syn_socket",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathOrigin {
    /// Traffic observed by network performance monitoring.
    #[default]
    NetworkTraffic,
    /// Paths configured through the network_path integration.
    NetworkPathIntegration,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NetworkPathHop {
    pub ttl: i32,
    pub ip_address: String,
    /// Reverse DNS of `ip_address`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hostname: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub rtt: f64,
    pub reachable: bool,
}

fn is_zero(value: &f64) -> bool {
    *value == 0.0
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Subnet {
    pub alias: String,
}

/// How the source host reaches the network, e.g. the subnet it sits in.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Via {
    pub subnet: Subnet,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NetworkPathSource {
    pub hostname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub via: Option<Via>,
    /// VPC id when the host runs in a cloud network.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub network_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub container_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NetworkPathDestination {
    pub hostname: String,
    pub ip_address: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reverse_dns_hostname: String,
}

/// A path between two hosts as mapped by one traceroute.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NetworkPath {
    /// Unix epoch, nanoseconds.
    pub timestamp: i64,
    pub agent_version: String,
    /// Namespace used to resolve network device resources.
    pub namespace: String,
    pub pathtrace_id: String,
    pub origin: PathOrigin,
    pub protocol: Protocol,
    pub source: NetworkPathSource,
    pub destination: NetworkPathDestination,
    pub hops: Vec<NetworkPathHop>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl NetworkPath {
    /// An empty path stamped with the current time, this agent's version and
    /// a fresh pathtrace id.
    pub fn new(protocol: Protocol) -> Self {
        let timestamp = i64::try_from(OffsetDateTime::now_utc().unix_timestamp_nanos())
            .unwrap_or(i64::MAX);
        Self {
            timestamp,
            agent_version: env!("CARGO_PKG_VERSION").to_string(),
            pathtrace_id: Uuid::new_v4().to_string(),
            protocol,
            ..Self::default()
        }
    }
}
