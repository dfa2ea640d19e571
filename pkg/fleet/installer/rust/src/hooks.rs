// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2025-present Datadog, Inc.

//! Package lifecycle hooks. Every hook must be idempotent.

use std::fmt;

use async_trait::async_trait;
use log::info;
use serde::{Deserialize, Serialize};

use crate::errors::InstallerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Hook {
    PreInstall,
    PostInstall,
    PreRemove,
    PreStartExperiment,
    PostStartExperiment,
    PreStopExperiment,
    PostStopExperiment,
    PrePromoteExperiment,
    PostPromoteExperiment,
    PostStartConfigExperiment,
    PreStopConfigExperiment,
    PostPromoteConfigExperiment,
}

impl Hook {
    pub fn as_str(&self) -> &'static str {
        match self {
            Hook::PreInstall => "preInstall",
            Hook::PostInstall => "postInstall",
            Hook::PreRemove => "preRemove",
            Hook::PreStartExperiment => "preStartExperiment",
            Hook::PostStartExperiment => "postStartExperiment",
            Hook::PreStopExperiment => "preStopExperiment",
            Hook::PostStopExperiment => "postStopExperiment",
            Hook::PrePromoteExperiment => "prePromoteExperiment",
            Hook::PostPromoteExperiment => "postPromoteExperiment",
            Hook::PostStartConfigExperiment => "postStartConfigExperiment",
            Hook::PreStopConfigExperiment => "preStopConfigExperiment",
            Hook::PostPromoteConfigExperiment => "postPromoteConfigExperiment",
        }
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageType {
    #[default]
    Oci,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookContext {
    pub package: String,
    pub package_type: PackageType,
    pub upgrade: bool,
    /// Extra installer arguments, only meaningful to `PostInstall`.
    pub win_args: Vec<String>,
}

impl HookContext {
    pub fn new(package: &str) -> Self {
        Self {
            package: package.to_string(),
            package_type: PackageType::Oci,
            upgrade: false,
            win_args: Vec::new(),
        }
    }

    pub fn upgrade(mut self, upgrade: bool) -> Self {
        self.upgrade = upgrade;
        self
    }

    pub fn win_args(mut self, args: &[String]) -> Self {
        self.win_args = args.to_vec();
        self
    }
}

#[async_trait]
pub trait Hooks: Send + Sync {
    async fn run(&self, hook: Hook, ctx: &HookContext) -> Result<(), InstallerError>;
}

/// Logs every hook and does nothing else.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogHooks;

#[async_trait]
impl Hooks for LogHooks {
    async fn run(&self, hook: Hook, ctx: &HookContext) -> Result<(), InstallerError> {
        info!(
            "running {hook} hook for {} (upgrade={})",
            ctx.package, ctx.upgrade
        );
        Ok(())
    }
}
