// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2025-present Datadog, Inc.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("server already started")]
    AlreadyStarted,
    #[error("invalid CIDR {0:?}")]
    InvalidCidr(String),
    #[error("invalid port filter {0:?}")]
    InvalidPortFilter(String),
    #[error("run traceroute error: {0}")]
    Traceroute(String),
    #[error("traceroute to {0} timed out")]
    TracerouteTimeout(String),
    #[error("failed to send event to forwarder: {0}")]
    Forwarder(String),
    #[error("failed to get VPC subnets: {0}")]
    Subnets(String),
}
