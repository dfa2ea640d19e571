// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2025-present Datadog, Inc.

//! Durable record of installed packages.
//!
//! Values in `packages` are JSON documents keyed by package name. Keys in
//! `hook_markers` are `<package>:<hook>` and map to the version the hook
//! last completed for.

use std::path::Path;

use log::debug;
use redb::{Database, DatabaseError, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};

use crate::errors::InstallerError;
use crate::hooks::Hook;

const PACKAGES: TableDefinition<&str, &[u8]> = TableDefinition::new("packages");
const HOOK_MARKERS: TableDefinition<&str, &str> = TableDefinition::new("hook_markers");

macro_rules! db_err {
    () => {
        |e| InstallerError::Database(e.to_string())
    };
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallMethod {
    #[default]
    Manual,
    Remote,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRecord {
    pub name: String,
    pub version: String,
    pub digest: String,
    #[serde(default)]
    pub install_method: InstallMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experiment_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experiment_digest: Option<String>,
}

impl PackageRecord {
    pub fn new(name: &str, version: &str, digest: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            digest: digest.to_string(),
            install_method: InstallMethod::Manual,
            experiment_version: None,
            experiment_digest: None,
        }
    }

    pub fn clear_experiment(&mut self) {
        self.experiment_version = None;
        self.experiment_digest = None;
    }
}

fn marker_key(package: &str, hook: Hook) -> String {
    format!("{package}:{}", hook.as_str())
}

pub struct PackagesDb {
    db: Database,
}

impl PackagesDb {
    /// Open or create the database. Fails with
    /// [`InstallerError::DatabaseAlreadyOpen`] if this process holds it.
    pub fn open(path: &Path) -> Result<Self, InstallerError> {
        let db = Database::create(path).map_err(|e| match e {
            DatabaseError::DatabaseAlreadyOpen => InstallerError::DatabaseAlreadyOpen,
            other => InstallerError::Database(other.to_string()),
        })?;
        let txn = db.begin_write().map_err(db_err!())?;
        txn.open_table(PACKAGES).map_err(db_err!())?;
        txn.open_table(HOOK_MARKERS).map_err(db_err!())?;
        txn.commit().map_err(db_err!())?;
        debug!("opened packages database at {}", path.display());
        Ok(Self { db })
    }

    pub fn set_package(&self, record: &PackageRecord) -> Result<(), InstallerError> {
        let value = serde_json::to_vec(record).map_err(db_err!())?;
        let txn = self.db.begin_write().map_err(db_err!())?;
        {
            let mut table = txn.open_table(PACKAGES).map_err(db_err!())?;
            table
                .insert(record.name.as_str(), value.as_slice())
                .map_err(db_err!())?;
        }
        txn.commit().map_err(db_err!())
    }

    pub fn get_package(&self, name: &str) -> Result<Option<PackageRecord>, InstallerError> {
        let txn = self.db.begin_read().map_err(db_err!())?;
        let table = txn.open_table(PACKAGES).map_err(db_err!())?;
        match table.get(name).map_err(db_err!())? {
            Some(guard) => Ok(Some(
                serde_json::from_slice(guard.value()).map_err(db_err!())?,
            )),
            None => Ok(None),
        }
    }

    pub fn list_packages(&self) -> Result<Vec<PackageRecord>, InstallerError> {
        let txn = self.db.begin_read().map_err(db_err!())?;
        let table = txn.open_table(PACKAGES).map_err(db_err!())?;
        let mut records = Vec::new();
        for entry in table.iter().map_err(db_err!())? {
            let (_, value) = entry.map_err(db_err!())?;
            records.push(serde_json::from_slice(value.value()).map_err(db_err!())?);
        }
        Ok(records)
    }

    /// Forget a package and its hook markers. Returns whether it existed.
    pub fn delete_package(&self, name: &str) -> Result<bool, InstallerError> {
        let prefix = format!("{name}:");
        let txn = self.db.begin_write().map_err(db_err!())?;
        let existed;
        {
            let mut table = txn.open_table(PACKAGES).map_err(db_err!())?;
            existed = table.remove(name).map_err(db_err!())?.is_some();

            let mut markers = txn.open_table(HOOK_MARKERS).map_err(db_err!())?;
            markers
                .retain(|key, _| !key.starts_with(&prefix))
                .map_err(db_err!())?;
        }
        txn.commit().map_err(db_err!())?;
        Ok(existed)
    }

    pub fn set_hook_marker(
        &self,
        package: &str,
        hook: Hook,
        version: &str,
    ) -> Result<(), InstallerError> {
        let key = marker_key(package, hook);
        let txn = self.db.begin_write().map_err(db_err!())?;
        {
            let mut table = txn.open_table(HOOK_MARKERS).map_err(db_err!())?;
            table.insert(key.as_str(), version).map_err(db_err!())?;
        }
        txn.commit().map_err(db_err!())
    }

    pub fn hook_marker(&self, package: &str, hook: Hook) -> Result<Option<String>, InstallerError> {
        let key = marker_key(package, hook);
        let txn = self.db.begin_read().map_err(db_err!())?;
        let table = txn.open_table(HOOK_MARKERS).map_err(db_err!())?;
        Ok(table
            .get(key.as_str())
            .map_err(db_err!())?
            .map(|guard| guard.value().to_string()))
    }
}
