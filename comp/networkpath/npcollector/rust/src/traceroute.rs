// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2025-present Datadog, Inc.

use std::time::Duration;

use async_trait::async_trait;

use crate::errors::Error;
use crate::payload::{NetworkPath, Protocol, TcpMethod};

/// Parameters of a single traceroute run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracerouteConfig {
    pub dest_hostname: String,
    pub dest_port: u16,
    pub max_ttl: u8,
    /// Per-hop probe timeout.
    pub timeout: Duration,
    pub protocol: Protocol,
    pub tcp_method: TcpMethod,
    pub tcp_syn_paris_traceroute_mode: bool,
    pub reverse_dns_hint: String,
}

impl TracerouteConfig {
    /// Upper bound for a whole run: one probe timeout per hop.
    pub fn deadline(&self) -> Duration {
        self.timeout
            .saturating_mul(u32::from(self.max_ttl.max(1)))
    }
}

/// Runs traceroutes. The system-probe backed implementation lives outside
/// this crate.
#[async_trait]
pub trait Traceroute: Send + Sync {
    async fn run(&self, config: &TracerouteConfig) -> Result<NetworkPath, Error>;
}
