// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2025-present Datadog, Inc.

use thiserror::Error;

use crate::types::EntityId;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("entity {0} not found")]
    EntityUnknown(EntityId),
    #[error("malformed entity id: {0:?}")]
    InvalidEntityId(String),
    #[error("unsupported tag cardinality: {0:?}")]
    InvalidCardinality(String),
    #[error("could not parse origin data {data:?}: {context}")]
    InvalidOriginData { data: String, context: String },
    #[error("no container found for {0}")]
    ContainerNotFound(String),
    #[error("container resolution timed out for {0}")]
    ResolutionTimeout(String),
    #[error("tagger is not running")]
    NotStarted,
    #[error("tagger already started")]
    AlreadyStarted,
}
