// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2025-present Datadog, Inc.

use std::hash::{DefaultHasher, Hash, Hasher};

use crate::connection::{Connection, DnsMap};
use crate::payload::Protocol;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct PathtestMetadata {
    /// Name already known for the destination, from the connections check.
    pub reverse_dns_hostname: String,
}

/// One traceroute job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Pathtest {
    pub hostname: String,
    pub port: u16,
    pub protocol: Protocol,
    pub source_container_id: String,
    pub metadata: PathtestMetadata,
}

impl Pathtest {
    /// Deduplication key of the pathtest.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }

    /// Build the pathtest for a connection, using the connections check
    /// DNS map to fill the reverse DNS hint.
    pub fn from_connection(conn: &Connection, dns: &DnsMap) -> Self {
        let protocol = conn.conn_type.protocol();
        let reverse_dns_hostname = dns
            .get(&conn.raddr.ip)
            .and_then(|entry| entry.names.first())
            .cloned()
            .unwrap_or_default();

        // UDP traces never target the active port.
        let port = if protocol == Protocol::Udp {
            0
        } else {
            u16::try_from(conn.raddr.port).unwrap_or(0)
        };

        Self {
            hostname: conn.raddr.ip.clone(),
            port,
            protocol,
            source_container_id: conn.laddr.container_id.clone(),
            metadata: PathtestMetadata {
                reverse_dns_hostname,
            },
        }
    }
}
