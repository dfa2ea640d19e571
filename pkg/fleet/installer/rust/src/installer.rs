// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2025-present Datadog, Inc.

//! Package lifecycle: install, experiment, promote, remove.
//!
//! Operations are serialized by an operation lock. Payload directories are
//! never modified once a link points to them; every state change is a link
//! swap followed by a database update.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use log::{debug, info, warn};
use serde::Serialize;

use crate::config::{
    ConfigSlotState, ConfigSlots, merge_configs, validate_version, write_config,
    write_config_symlinks,
};
use crate::db::{PackageRecord, PackagesDb};
use crate::downloader::{DownloadedPackage, Downloader};
use crate::errors::InstallerError;
use crate::hooks::{Hook, HookContext, Hooks};
use crate::repository::{PayloadSwap, Repositories, Repository, digest_dir_name, remove_link};

pub const DB_FILE: &str = "packages.db";
pub const DEFAULT_ROOT: &str = "/opt/datadog-packages";
pub const DEFAULT_USER_CONFIG_DIR: &str = "/etc/datadog-agent";
const CONFIG_SLOTS_DIR: &str = "config";

/// Installed versions of one package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageState {
    pub stable: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experiment: Option<String>,
}

impl From<&PackageRecord> for PackageState {
    fn from(record: &PackageRecord) -> Self {
        Self {
            stable: record.version.clone(),
            experiment: record.experiment_version.clone(),
        }
    }
}

pub struct Installer {
    root: PathBuf,
    user_config_dir: PathBuf,
    repositories: Repositories,
    db: Mutex<Option<PackagesDb>>,
    op_lock: tokio::sync::Mutex<()>,
    downloader: Arc<dyn Downloader>,
    hooks: Arc<dyn Hooks>,
}

impl Installer {
    /// Create the root if needed and open its packages database.
    pub fn new(
        root: impl Into<PathBuf>,
        downloader: Arc<dyn Downloader>,
        hooks: Arc<dyn Hooks>,
    ) -> Result<Self, InstallerError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(InstallerError::io("creating", &root))?;
        let db = PackagesDb::open(&root.join(DB_FILE))?;
        Ok(Self {
            repositories: Repositories::new(&root),
            root,
            user_config_dir: PathBuf::from(DEFAULT_USER_CONFIG_DIR),
            db: Mutex::new(Some(db)),
            op_lock: tokio::sync::Mutex::new(()),
            downloader,
            hooks,
        })
    }

    /// Directory receiving configuration examples and override links.
    pub fn with_user_config_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.user_config_dir = dir.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn with_db<T>(
        &self,
        f: impl FnOnce(&PackagesDb) -> Result<T, InstallerError>,
    ) -> Result<T, InstallerError> {
        let guard = self
            .db
            .lock()
            .map_err(|_| InstallerError::Database("database lock poisoned".to_string()))?;
        match guard.as_ref() {
            Some(db) => f(db),
            None => Err(InstallerError::DatabaseClosed),
        }
    }

    fn user_dir(&self, package: &str) -> PathBuf {
        self.user_config_dir.join(package)
    }

    fn config_slots(&self, package: &str) -> ConfigSlots {
        ConfigSlots::new(self.repositories.get(package).path().join(CONFIG_SLOTS_DIR))
    }

    fn installed(&self, package: &str) -> Result<PackageRecord, InstallerError> {
        self.with_db(|db| db.get_package(package))?
            .ok_or_else(|| InstallerError::PackageNotInstalled(package.to_string()))
    }

    async fn run_hook(&self, hook: Hook, ctx: &HookContext) -> Result<(), InstallerError> {
        debug!("running {hook} for {}", ctx.package);
        self.hooks.run(hook, ctx).await.map_err(|e| match e {
            e @ InstallerError::Hook { .. } => e,
            other => InstallerError::Hook {
                hook,
                package: ctx.package.clone(),
                message: other.to_string(),
            },
        })
    }

    async fn copy_config_examples(&self, package: &DownloadedPackage) -> Result<(), InstallerError> {
        let dest = self.user_dir(&package.name);
        if self.downloader.extract_config(package, &dest).await? {
            debug!("copied {} configuration examples to {}", package.name, dest.display());
        }
        Ok(())
    }

    // -- packages --

    /// Install the package behind `url` as stable. A no-op when the same
    /// digest is already stable.
    pub async fn install(&self, url: &str, args: &[String]) -> Result<(), InstallerError> {
        self.install_package(url, args, false).await
    }

    /// Install the package behind `url`, extracting it again even when the
    /// same digest is already stable.
    pub async fn force_install(&self, url: &str, args: &[String]) -> Result<(), InstallerError> {
        self.install_package(url, args, true).await
    }

    async fn install_package(
        &self,
        url: &str,
        args: &[String],
        force: bool,
    ) -> Result<(), InstallerError> {
        let _op = self.op_lock.lock().await;
        self.with_db(|_| Ok(()))?;

        let package = self.downloader.download(url).await?;
        let name = package.name.clone();
        let repo = self.repositories.get(&name);
        let previous = self.with_db(|db| db.get_package(&name))?;
        let current_stable = repo.state().stable;

        let same_digest = previous.as_ref().is_some_and(|p| p.digest == package.digest)
            && current_stable.as_deref() == Some(digest_dir_name(&package.digest).as_str());
        if same_digest && !force {
            return self.complete_install(&package, args).await;
        }

        let upgrade = previous.is_some();
        let ctx = HookContext::new(&name).upgrade(upgrade);
        info!(
            "installing {name} {} ({}){}",
            package.version,
            package.digest,
            if upgrade { " as an upgrade" } else { "" }
        );
        let mut swap = None;
        if let Err(e) = self
            .install_payload(&package, &repo, previous.as_ref(), &ctx, args, &mut swap)
            .await
        {
            warn!("installing {name} failed, rolling back: {e}");
            self.rollback_install(
                &package,
                &repo,
                previous.as_ref(),
                current_stable.as_deref(),
                swap,
            )
            .await;
            return Err(e);
        }
        if let Some(swap) = swap {
            swap.finish();
        }
        repo.cleanup()
    }

    /// Re-run `PostInstall` for an already extracted package unless it
    /// already completed for this version.
    async fn complete_install(
        &self,
        package: &DownloadedPackage,
        args: &[String],
    ) -> Result<(), InstallerError> {
        let marker = self.with_db(|db| db.hook_marker(&package.name, Hook::PostInstall))?;
        if marker.as_deref() == Some(package.version.as_str()) {
            info!("{} {} is already installed", package.name, package.version);
            return Ok(());
        }
        let ctx = HookContext::new(&package.name).win_args(args);
        self.run_hook(Hook::PostInstall, &ctx).await?;
        self.with_db(|db| db.set_hook_marker(&package.name, Hook::PostInstall, &package.version))
    }

    async fn install_payload(
        &self,
        package: &DownloadedPackage,
        repo: &Repository,
        previous: Option<&PackageRecord>,
        ctx: &HookContext,
        args: &[String],
        swap: &mut Option<PayloadSwap>,
    ) -> Result<(), InstallerError> {
        if ctx.upgrade {
            self.run_hook(Hook::PreRemove, ctx).await?;
        }
        self.run_hook(Hook::PreInstall, ctx).await?;

        let staged = repo.stage_payload(&package.digest)?;
        self.downloader
            .extract_payload(package, staged.path())
            .await?;
        *swap = Some(repo.commit_payload(staged)?);
        repo.set_stable(&package.digest)?;
        self.copy_config_examples(package).await?;

        let mut record = PackageRecord::new(&package.name, &package.version, &package.digest);
        if let Some(previous) = previous {
            record.install_method = previous.install_method;
            record.experiment_version = previous.experiment_version.clone();
            record.experiment_digest = previous.experiment_digest.clone();
        }
        self.with_db(|db| db.set_package(&record))?;

        self.run_hook(Hook::PostInstall, &ctx.clone().win_args(args))
            .await?;
        self.with_db(|db| db.set_hook_marker(&package.name, Hook::PostInstall, &package.version))
    }

    async fn rollback_install(
        &self,
        package: &DownloadedPackage,
        repo: &Repository,
        previous: Option<&PackageRecord>,
        previous_stable: Option<&str>,
        swap: Option<PayloadSwap>,
    ) {
        if let Err(e) = repo.restore_stable(previous_stable) {
            warn!("could not restore stable link of {}: {e}", package.name);
        }
        restore_payload(repo, &package.digest, swap);
        if let Err(e) = self
            .run_hook(Hook::PreRemove, &HookContext::new(&package.name))
            .await
        {
            warn!("cleanup after failed install of {}: {e}", package.name);
        }
        let restored = self.with_db(|db| match previous {
            Some(record) => db.set_package(record),
            None => db.delete_package(&package.name).map(|_| ()),
        });
        if let Err(e) = restored {
            warn!("could not restore database record of {}: {e}", package.name);
        }
    }

    /// Remove a package and everything under its directory. Removing an
    /// absent package is a no-op.
    pub async fn remove(&self, package: &str) -> Result<(), InstallerError> {
        let _op = self.op_lock.lock().await;
        let record = self.with_db(|db| db.get_package(package))?;
        let repo = self.repositories.get(package);
        if record.is_none() && !repo.exists() {
            info!("{package} is not installed, nothing to remove");
            return Ok(());
        }
        self.run_hook(Hook::PreRemove, &HookContext::new(package))
            .await?;
        repo.delete()?;
        self.with_db(|db| db.delete_package(package))?;
        info!("removed {package}");
        Ok(())
    }

    // -- experiments --

    /// Stage the package behind `url` next to the installed stable.
    pub async fn install_experiment(&self, url: &str) -> Result<(), InstallerError> {
        let _op = self.op_lock.lock().await;
        self.with_db(|_| Ok(()))?;

        let package = self.downloader.download(url).await?;
        let name = package.name.clone();
        let mut record = self.installed(&name)?;
        if record.digest == package.digest {
            return Err(InstallerError::ExperimentSameAsStable {
                package: name,
                digest: package.digest,
            });
        }
        let repo = self.repositories.get(&name);
        let ctx = HookContext::new(&name);
        info!("starting experiment {name} {}", package.version);

        self.run_hook(Hook::PreStartExperiment, &ctx).await?;
        let previous_record = record.clone();
        let previous_experiment = repo.state().experiment;
        let mut swap = None;
        let started = async {
            self.stage_experiment(&package, &repo, &mut swap).await?;
            record.experiment_version = Some(package.version.clone());
            record.experiment_digest = Some(package.digest.clone());
            self.with_db(|db| db.set_package(&record))?;
            self.run_hook(Hook::PostStartExperiment, &ctx).await
        }
        .await;
        if let Err(e) = started {
            warn!("starting experiment for {name} failed, rolling back: {e}");
            let restored = match previous_experiment.as_deref() {
                Some(previous) => repo.set_experiment(previous),
                None => repo.delete_experiment().map(|_| ()),
            };
            if let Err(e) = restored {
                warn!("could not restore experiment link of {name}: {e}");
            }
            restore_payload(&repo, &package.digest, swap);
            if let Err(e) = self.with_db(|db| db.set_package(&previous_record)) {
                warn!("could not restore database record of {name}: {e}");
            }
            if let Err(e) = repo.cleanup() {
                warn!("cleanup after failed experiment of {name}: {e}");
            }
            return Err(e);
        }
        if let Some(swap) = swap {
            swap.finish();
        }
        repo.cleanup()
    }

    async fn stage_experiment(
        &self,
        package: &DownloadedPackage,
        repo: &Repository,
        swap: &mut Option<PayloadSwap>,
    ) -> Result<(), InstallerError> {
        let staged = repo.stage_payload(&package.digest)?;
        self.downloader
            .extract_payload(package, staged.path())
            .await?;
        *swap = Some(repo.commit_payload(staged)?);
        repo.set_experiment(&package.digest)?;
        self.copy_config_examples(package).await
    }

    /// Drop the running experiment. A no-op when there is none.
    pub async fn remove_experiment(&self, package: &str) -> Result<(), InstallerError> {
        let _op = self.op_lock.lock().await;
        let mut record = self.installed(package)?;
        let repo = self.repositories.get(package);
        if record.experiment_digest.is_none() && repo.state().experiment.is_none() {
            debug!("{package} has no experiment to remove");
            return Ok(());
        }
        let ctx = HookContext::new(package);
        self.run_hook(Hook::PreStopExperiment, &ctx).await?;
        repo.delete_experiment()?;
        repo.cleanup()?;
        record.clear_experiment();
        self.with_db(|db| db.set_package(&record))?;
        self.run_hook(Hook::PostStopExperiment, &ctx).await?;
        info!("stopped experiment of {package}");
        Ok(())
    }

    /// Make the running experiment the new stable.
    pub async fn promote_experiment(&self, package: &str) -> Result<(), InstallerError> {
        let _op = self.op_lock.lock().await;
        let mut record = self.installed(package)?;
        let (Some(version), Some(digest)) = (
            record.experiment_version.clone(),
            record.experiment_digest.clone(),
        ) else {
            return Err(InstallerError::NoExperiment(package.to_string()));
        };
        let repo = self.repositories.get(package);
        let ctx = HookContext::new(package);

        self.run_hook(Hook::PrePromoteExperiment, &ctx).await?;
        let previous_record = record.clone();
        let previous_stable = repo.state().stable;
        repo.promote_experiment()?;

        record.version = version;
        record.digest = digest.clone();
        record.clear_experiment();
        let promoted = async {
            self.with_db(|db| db.set_package(&record))?;
            self.run_hook(Hook::PostPromoteExperiment, &ctx).await
        }
        .await;
        if let Err(e) = promoted {
            warn!("promoting {package} failed, rolling back: {e}");
            let restored = repo
                .set_experiment(&digest)
                .and_then(|()| repo.restore_stable(previous_stable.as_deref()));
            if let Err(e) = restored {
                warn!("could not restore links of {package}: {e}");
            }
            if let Err(e) = self.with_db(|db| db.set_package(&previous_record)) {
                warn!("could not restore database record of {package}: {e}");
            }
            return Err(e);
        }
        self.with_db(|db| db.set_hook_marker(package, Hook::PostInstall, &record.version))?;
        repo.cleanup()?;
        info!("promoted {package} {}", record.version);
        Ok(())
    }

    // -- config experiments --

    /// Merge `docs` into a new configuration slot and expose it as the
    /// experiment. Nothing is written when the documents are rejected.
    pub async fn install_config_experiment<S: AsRef<str>>(
        &self,
        package: &str,
        version: &str,
        docs: &[S],
    ) -> Result<(), InstallerError> {
        let _op = self.op_lock.lock().await;
        validate_version(version)?;
        self.installed(package)?;
        let files = merge_configs(docs)?;

        let slots = self.config_slots(package);
        let dir = slots.version_path(version);
        if dir.exists() {
            fs::remove_dir_all(&dir).map_err(InstallerError::io("removing", &dir))?;
        }
        fs::create_dir_all(&dir).map_err(InstallerError::io("creating", &dir))?;
        write_config(&dir, &files)?;
        slots.set_experiment(version)?;
        write_config_symlinks(&self.user_dir(package), &slots.experiment_path())?;

        self.run_hook(Hook::PostStartConfigExperiment, &HookContext::new(package))
            .await?;
        info!("started config experiment {version} for {package}");
        Ok(())
    }

    /// Drop the configuration experiment and expose stable again.
    pub async fn remove_config_experiment(&self, package: &str) -> Result<(), InstallerError> {
        let _op = self.op_lock.lock().await;
        self.installed(package)?;
        let slots = self.config_slots(package);
        if slots.state().experiment.is_none() {
            debug!("{package} has no config experiment to remove");
            return Ok(());
        }
        self.run_hook(Hook::PreStopConfigExperiment, &HookContext::new(package))
            .await?;
        slots.delete_experiment()?;
        write_config_symlinks(&self.user_dir(package), &slots.stable_path())?;
        slots.cleanup()
    }

    /// Make the configuration experiment the new stable slot.
    pub async fn promote_config_experiment(&self, package: &str) -> Result<(), InstallerError> {
        let _op = self.op_lock.lock().await;
        self.installed(package)?;
        let slots = self.config_slots(package);
        let state = slots.state();
        let Some(version) = state.experiment else {
            return Err(InstallerError::NoExperiment(package.to_string()));
        };

        slots.set_stable(&version)?;
        if let Err(e) = slots.delete_experiment() {
            let restored = match state.stable.as_deref() {
                Some(previous) => slots.set_stable(previous),
                None => remove_link(&slots.stable_path()).map(|_| ()),
            };
            if let Err(restore) = restored {
                warn!("could not restore config stable link of {package}: {restore}");
            }
            return Err(e);
        }
        write_config_symlinks(&self.user_dir(package), &slots.stable_path())?;
        slots.cleanup()?;
        self.run_hook(Hook::PostPromoteConfigExperiment, &HookContext::new(package))
            .await?;
        info!("promoted config {version} for {package}");
        Ok(())
    }

    // -- state --

    pub fn is_installed(&self, package: &str) -> Result<bool, InstallerError> {
        Ok(self.with_db(|db| db.get_package(package))?.is_some())
    }

    pub fn state(&self, package: &str) -> Result<PackageState, InstallerError> {
        Ok(PackageState::from(&self.installed(package)?))
    }

    pub fn states(&self) -> Result<BTreeMap<String, PackageState>, InstallerError> {
        Ok(self
            .with_db(|db| db.list_packages())?
            .iter()
            .map(|record| (record.name.clone(), PackageState::from(record)))
            .collect())
    }

    pub fn config_state(&self, package: &str) -> Result<ConfigSlotState, InstallerError> {
        self.with_db(|_| Ok(()))?;
        Ok(self.config_slots(package).state())
    }

    /// Close the database and delete every installed package. Later calls
    /// fail with [`InstallerError::DatabaseClosed`].
    pub async fn purge(&self) -> Result<(), InstallerError> {
        let _op = self.op_lock.lock().await;
        let db = self
            .db
            .lock()
            .map_err(|_| InstallerError::Database("database lock poisoned".to_string()))?
            .take();
        drop(db);

        let db_path = self.root.join(DB_FILE);
        match fs::remove_file(&db_path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(InstallerError::io("removing", &db_path)(e)),
        }
        match fs::remove_dir_all(&self.root) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(InstallerError::io("removing", &self.root)(e)),
        }
        info!("purged {}", self.root.display());
        Ok(())
    }
}

/// Undo a payload commit, then drop whatever of `digest` no link points to.
fn restore_payload(repo: &Repository, digest: &str, swap: Option<PayloadSwap>) {
    if let Some(swap) = swap
        && let Err(e) = swap.revert()
    {
        warn!("could not restore payload {digest}: {e}");
    }
    if let Err(e) = repo.discard_staged(digest) {
        warn!("could not remove staged payload {digest}: {e}");
    }
    let dir = digest_dir_name(digest);
    let referenced = repo.state();
    if referenced.stable.as_deref() != Some(dir.as_str())
        && referenced.experiment.as_deref() != Some(dir.as_str())
    {
        let path = repo.digest_path(digest);
        if let Err(e) = fs::remove_dir_all(&path)
            && e.kind() != io::ErrorKind::NotFound
        {
            warn!("could not remove {}: {e}", path.display());
        }
    }
}
