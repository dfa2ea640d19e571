// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2025-present Datadog, Inc.

use async_trait::async_trait;

use crate::errors::Error;
use crate::filter::Cidr;

/// Source of the VPC subnets of the host, usually the cloud provider
/// metadata endpoint.
#[async_trait]
pub trait SubnetProvider: Send + Sync {
    async fn vpc_subnets(&self) -> Result<Vec<Cidr>, Error>;
}

/// A fixed list of subnets.
#[derive(Debug, Default, Clone)]
pub struct StaticSubnets(pub Vec<Cidr>);

#[async_trait]
impl SubnetProvider for StaticSubnets {
    async fn vpc_subnets(&self) -> Result<Vec<Cidr>, Error> {
        Ok(self.0.clone())
    }
}
