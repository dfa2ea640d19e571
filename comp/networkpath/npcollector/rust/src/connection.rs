// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2025-present Datadog, Inc.

//! Connections as reported by the connections check.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::payload::Protocol;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    #[default]
    Tcp,
    Udp,
}

impl ConnectionType {
    pub fn protocol(&self) -> Protocol {
        match self {
            ConnectionType::Tcp => Protocol::Tcp,
            ConnectionType::Udp => Protocol::Udp,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionFamily {
    #[default]
    V4,
    V6,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionDirection {
    #[default]
    Unspecified,
    Incoming,
    Outgoing,
    Local,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Addr {
    pub ip: String,
    pub port: i32,
    #[serde(default)]
    pub container_id: String,
}

/// NAT translation observed on the connection.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IpTranslation {
    pub repl_src_ip: String,
    pub repl_dst_ip: String,
    pub repl_src_port: i32,
    pub repl_dst_port: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Connection {
    pub laddr: Addr,
    pub raddr: Addr,
    #[serde(rename = "type")]
    pub conn_type: ConnectionType,
    pub family: ConnectionFamily,
    pub direction: ConnectionDirection,
    #[serde(default)]
    pub intra_host: bool,
    #[serde(default)]
    pub ip_translation: Option<IpTranslation>,
}

impl Connection {
    /// Destination IP, preferring the NAT-translated address when known.
    pub fn translated_dest_ip(&self) -> &str {
        match &self.ip_translation {
            Some(translation) if !translation.repl_dst_ip.is_empty() => &translation.repl_dst_ip,
            _ => &self.raddr.ip,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DnsEntry {
    pub names: Vec<String>,
}

/// Reverse DNS names seen by the connections check, keyed by IP.
pub type DnsMap = HashMap<String, DnsEntry>;
