// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2025-present Datadog, Inc.

//! Origin hints attached to incoming telemetry.

use crate::errors::Error;

const SOCKET_PREFIX: &str = "container_id://";
const LEGACY_SOCKET_PREFIX: &str = "ci-";

const LOCAL_CONTAINER_ID_PREFIX: &str = "ci-";
const LOCAL_INODE_PREFIX: &str = "in-";
const LOCAL_POD_UID_PREFIX: &str = "pu-";
const LEGACY_CONTAINER_ID_PREFIX: &str = "cid-";

const EXTERNAL_INIT_PREFIX: &str = "it-";
const EXTERNAL_CONTAINER_NAME_PREFIX: &str = "cn-";
const EXTERNAL_POD_UID_PREFIX: &str = "pu-";

/// Product that produced the telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProductOrigin {
    #[default]
    Unknown,
    DogStatsD,
    DogStatsDLegacy,
    Apm,
}

/// Origin data the client generated locally.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalData {
    pub container_id: String,
    pub inode: u64,
    pub pod_uid: String,
}

impl LocalData {
    /// Parse `ci-<id>,in-<inode>,pu-<uid>`. An item without a known prefix is
    /// a container id in the legacy format.
    pub fn parse(raw: &str) -> Result<Self, Error> {
        let mut data = LocalData::default();
        for item in raw.split(',').map(str::trim).filter(|i| !i.is_empty()) {
            if let Some(id) = item.strip_prefix(LOCAL_CONTAINER_ID_PREFIX) {
                data.container_id = id.to_string();
            } else if let Some(inode) = item.strip_prefix(LOCAL_INODE_PREFIX) {
                data.inode = inode.parse().map_err(|e| Error::InvalidOriginData {
                    data: raw.to_string(),
                    context: format!("invalid inode {inode:?}: {e}"),
                })?;
            } else if let Some(uid) = item.strip_prefix(LOCAL_POD_UID_PREFIX) {
                data.pod_uid = uid.to_string();
            } else {
                let id = item.strip_prefix(LEGACY_CONTAINER_ID_PREFIX).unwrap_or(item);
                data.container_id = id.to_string();
            }
        }
        Ok(data)
    }
}

/// Origin data injected by the admission controller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExternalData {
    pub init: bool,
    pub container_name: String,
    pub pod_uid: String,
}

impl ExternalData {
    /// Parse `it-<bool>,cn-<name>,pu-<uid>`. Unknown items are ignored.
    pub fn parse(raw: &str) -> Result<Self, Error> {
        let mut data = ExternalData::default();
        for item in raw.split(',').map(str::trim).filter(|i| !i.is_empty()) {
            if let Some(init) = item.strip_prefix(EXTERNAL_INIT_PREFIX) {
                data.init = init.parse().map_err(|e| Error::InvalidOriginData {
                    data: raw.to_string(),
                    context: format!("invalid init flag {init:?}: {e}"),
                })?;
            } else if let Some(name) = item.strip_prefix(EXTERNAL_CONTAINER_NAME_PREFIX) {
                data.container_name = name.to_string();
            } else if let Some(uid) = item.strip_prefix(EXTERNAL_POD_UID_PREFIX) {
                data.pod_uid = uid.to_string();
            }
        }
        Ok(data)
    }

    pub fn is_empty(&self) -> bool {
        self.container_name.is_empty() && self.pod_uid.is_empty()
    }
}

/// Every hint available to resolve where a payload came from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OriginInfo {
    /// Container id found through the UDS peer credentials, as
    /// `container_id://<id>`. Empty when unknown.
    pub container_id_from_socket: String,
    pub local_data: LocalData,
    pub external_data: ExternalData,
    /// Requested cardinality, empty for the configured default.
    pub cardinality: String,
    pub product_origin: ProductOrigin,
}

impl OriginInfo {
    /// Container id carried by the socket hint. Both `container_id://<id>`
    /// and `ci-<id>` are accepted.
    pub fn socket_container_id(&self) -> Option<&str> {
        let raw = self.container_id_from_socket.as_str();
        let id = raw
            .strip_prefix(SOCKET_PREFIX)
            .or_else(|| raw.strip_prefix(LEGACY_SOCKET_PREFIX))
            .unwrap_or(raw);
        (!id.is_empty()).then_some(id)
    }

    /// Drop every hint. Used when origin detection is disabled.
    pub fn clear(&mut self) {
        self.container_id_from_socket.clear();
        self.local_data = LocalData::default();
        self.external_data = ExternalData::default();
    }
}
