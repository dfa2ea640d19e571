// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2025-present Datadog, Inc.

//! CIDR and port based connection exclusion.
//!
//! Filters are configured as a map from an address (`*`, an IP or a CIDR) to
//! a list of port specs. A port spec is `*`, a port or an inclusive
//! `low-high` range, optionally prefixed by `tcp` or `udp`. An empty port
//! list matches every port.

use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use log::warn;

use crate::connection::ConnectionType;
use crate::errors::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cidr {
    addr: IpAddr,
    prefix: u8,
}

impl Cidr {
    pub fn new(addr: IpAddr, prefix: u8) -> Result<Self, Error> {
        let max = if addr.is_ipv4() { 32 } else { 128 };
        if prefix > max {
            return Err(Error::InvalidCidr(format!("{addr}/{prefix}")));
        }
        Ok(Self { addr, prefix })
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (self.addr, ip) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = u32::MAX
                    .checked_shl(32u32.saturating_sub(u32::from(self.prefix)))
                    .unwrap_or(0);
                u32::from(net) & mask == u32::from(*ip) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = u128::MAX
                    .checked_shl(128u32.saturating_sub(u32::from(self.prefix)))
                    .unwrap_or(0);
                u128::from(net) & mask == u128::from(*ip) & mask
            }
            _ => false,
        }
    }
}

impl FromStr for Cidr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || Error::InvalidCidr(s.to_string());
        match s.split_once('/') {
            Some((addr, prefix)) => {
                let addr: IpAddr = addr.parse().map_err(|_| invalid())?;
                let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
                Cidr::new(addr, prefix).map_err(|_| invalid())
            }
            None => {
                let addr: IpAddr = s.parse().map_err(|_| invalid())?;
                let prefix = if addr.is_ipv4() { 32 } else { 128 };
                Ok(Self { addr, prefix })
            }
        }
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

/// Whether any of `subnets` contains `ip`.
pub fn subnets_contain(subnets: &[Cidr], ip: &IpAddr) -> bool {
    subnets.iter().any(|subnet| subnet.contains(ip))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PortRange {
    conn_type: Option<ConnectionType>,
    low: u16,
    high: u16,
}

impl PortRange {
    fn matches(&self, conn_type: ConnectionType, port: u16) -> bool {
        self.conn_type.is_none_or(|t| t == conn_type) && self.low <= port && port <= self.high
    }
}

impl FromStr for PortRange {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidPortFilter(s.to_string());
        let lower = s.trim().to_lowercase();
        let (conn_type, ports) = match lower.split_once(char::is_whitespace) {
            Some(("tcp", rest)) => (Some(ConnectionType::Tcp), rest.trim()),
            Some(("udp", rest)) => (Some(ConnectionType::Udp), rest.trim()),
            Some(_) => return Err(invalid()),
            None => (None, lower.as_str()),
        };
        let (low, high) = if ports == "*" {
            (0, u16::MAX)
        } else if let Some((low, high)) = ports.split_once('-') {
            let low: u16 = low.trim().parse().map_err(|_| invalid())?;
            let high: u16 = high.trim().parse().map_err(|_| invalid())?;
            if low > high {
                return Err(invalid());
            }
            (low, high)
        } else {
            let port: u16 = ports.parse().map_err(|_| invalid())?;
            (port, port)
        };
        Ok(Self {
            conn_type,
            low,
            high,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionFilter {
    /// `None` matches any address.
    ip: Option<Cidr>,
    ports: Vec<PortRange>,
}

impl ConnectionFilter {
    pub fn parse(address: &str, ports: &[String]) -> Result<Self, Error> {
        let ip = match address.trim() {
            "*" => None,
            address => Some(address.parse()?),
        };
        let ports = ports
            .iter()
            .map(|p| p.parse())
            .collect::<Result<Vec<PortRange>, Error>>()?;
        Ok(Self { ip, ports })
    }

    pub fn matches(&self, conn_type: ConnectionType, addr: &SocketAddr) -> bool {
        if let Some(cidr) = &self.ip
            && !cidr.contains(&addr.ip())
        {
            return false;
        }
        self.ports.is_empty()
            || self
                .ports
                .iter()
                .any(|range| range.matches(conn_type, addr.port()))
    }
}

/// Parse the configured filters. Invalid entries are logged and skipped.
pub fn parse_connection_filters(config: &HashMap<String, Vec<String>>) -> Vec<ConnectionFilter> {
    let mut entries: Vec<_> = config.iter().collect();
    entries.sort();
    entries
        .into_iter()
        .filter_map(|(address, ports)| match ConnectionFilter::parse(address, ports) {
            Ok(filter) => Some(filter),
            Err(e) => {
                warn!("ignoring connection filter for {address:?}: {e}");
                None
            }
        })
        .collect()
}

/// The parts of a connection the exclusion filters look at.
#[derive(Debug, Clone, Copy)]
pub struct FilterableConnection {
    pub conn_type: ConnectionType,
    pub source: SocketAddr,
    pub dest: SocketAddr,
}

pub fn is_excluded_connection(
    source_excludes: &[ConnectionFilter],
    dest_excludes: &[ConnectionFilter],
    conn: &FilterableConnection,
) -> bool {
    source_excludes
        .iter()
        .any(|f| f.matches(conn.conn_type, &conn.source))
        || dest_excludes
            .iter()
            .any(|f| f.matches(conn.conn_type, &conn.dest))
}
