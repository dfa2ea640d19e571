// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2025-present Datadog, Inc.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dd_installer::{
    DownloadedPackage, Downloader, Hook, HookContext, Hooks, Installer, InstallerError,
    LocalDownloader,
};
use tempfile::TempDir;

// ============================================================================
// Fakes
// ============================================================================

/// Records every hook call and fails the configured one.
#[derive(Default)]
pub struct RecordingHooks {
    calls: Mutex<Vec<(Hook, bool)>>,
    fail_on: Mutex<Option<Hook>>,
}

impl RecordingHooks {
    pub fn fail_on(&self, hook: Option<Hook>) {
        *self.fail_on.lock().unwrap() = hook;
    }

    pub fn calls(&self) -> Vec<Hook> {
        self.calls.lock().unwrap().iter().map(|(h, _)| *h).collect()
    }

    /// Calls with their `upgrade` flag.
    pub fn detailed_calls(&self) -> Vec<(Hook, bool)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }
}

#[async_trait]
impl Hooks for RecordingHooks {
    async fn run(&self, hook: Hook, ctx: &HookContext) -> Result<(), InstallerError> {
        self.calls.lock().unwrap().push((hook, ctx.upgrade));
        if *self.fail_on.lock().unwrap() == Some(hook) {
            return Err(InstallerError::Hook {
                hook,
                package: ctx.package.clone(),
                message: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

/// [`LocalDownloader`] whose payload extraction can be made to fail after
/// writing part of the payload.
#[derive(Default)]
pub struct FlakyDownloader {
    inner: LocalDownloader,
    fail_extract: AtomicBool,
}

impl FlakyDownloader {
    pub fn fail_extract(&self, fail: bool) {
        self.fail_extract.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Downloader for FlakyDownloader {
    async fn download(&self, url: &str) -> Result<DownloadedPackage, InstallerError> {
        self.inner.download(url).await
    }

    async fn extract_payload(
        &self,
        package: &DownloadedPackage,
        dest: &Path,
    ) -> Result<(), InstallerError> {
        if self.fail_extract.load(Ordering::SeqCst) {
            fs::write(dest.join("partial"), "").unwrap();
            return Err(InstallerError::Download {
                url: package.location.display().to_string(),
                message: "extraction interrupted".to_string(),
            });
        }
        self.inner.extract_payload(package, dest).await
    }

    async fn extract_config(
        &self,
        package: &DownloadedPackage,
        dest: &Path,
    ) -> Result<bool, InstallerError> {
        self.inner.extract_config(package, dest).await
    }
}

// ============================================================================
// Fixtures
// ============================================================================

/// Package sources laid out for [`LocalDownloader`].
pub struct PackageSource {
    dir: TempDir,
}

impl PackageSource {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    /// Write a package with a `VERSION` file plus `files`, returning its URL.
    pub fn package(&self, name: &str, version: &str, files: &[(&str, &str)]) -> String {
        self.package_with_config(name, version, files, &[])
    }

    pub fn package_with_config(
        &self,
        name: &str,
        version: &str,
        files: &[(&str, &str)],
        config: &[(&str, &str)],
    ) -> String {
        let dir = self.dir.path().join(format!("{name}-{version}"));
        write_files(&dir.join("payload"), &[("VERSION", version)]);
        write_files(&dir.join("payload"), files);
        if !config.is_empty() {
            write_files(&dir.join("config"), config);
        }
        fs::write(
            dir.join("package.json"),
            format!(r#"{{"name": "{name}", "version": "{version}"}}"#),
        )
        .unwrap();
        format!("file://{}", dir.display())
    }

    /// Same as [`package`](Self::package) but with a pinned digest.
    pub fn package_with_digest(&self, name: &str, version: &str, digest: &str) -> String {
        let url = self.package(name, version, &[]);
        let dir = PathBuf::from(url.trim_start_matches("file://"));
        fs::write(
            dir.join("package.json"),
            format!(r#"{{"name": "{name}", "version": "{version}", "digest": "{digest}"}}"#),
        )
        .unwrap();
        url
    }
}

pub fn write_files(dir: &Path, files: &[(&str, &str)]) {
    for (path, contents) in files {
        let target = dir.join(path);
        fs::create_dir_all(target.parent().unwrap()).unwrap();
        fs::write(target, contents).unwrap();
    }
}

// ============================================================================
// Harness
// ============================================================================

pub const AGENT: &str = "datadog-agent";

pub struct Harness {
    _dir: TempDir,
    pub root: PathBuf,
    pub user_config: PathBuf,
    pub hooks: Arc<RecordingHooks>,
    pub downloader: Arc<FlakyDownloader>,
    pub sources: PackageSource,
    installer: Option<Installer>,
}

impl Harness {
    pub fn installer(&self) -> &Installer {
        self.installer.as_ref().unwrap()
    }

    fn open(
        root: &Path,
        user_config: &Path,
        downloader: Arc<FlakyDownloader>,
        hooks: Arc<RecordingHooks>,
    ) -> Installer {
        Installer::new(root, downloader, hooks)
            .unwrap()
            .with_user_config_dir(user_config)
    }

    /// Drop the installer, delete its database and open a fresh one on the
    /// same root.
    pub fn wipe_database(&mut self) {
        self.installer = None;
        fs::remove_file(self.root.join("packages.db")).unwrap();
        self.installer = Some(Self::open(
            &self.root,
            &self.user_config,
            self.downloader.clone(),
            self.hooks.clone(),
        ));
    }

    pub fn repo(&self, package: &str) -> PathBuf {
        self.root.join(package)
    }

    pub fn stable_file(&self, package: &str, file: &str) -> String {
        fs::read_to_string(self.repo(package).join("stable").join(file)).unwrap()
    }

    pub fn experiment_file(&self, package: &str, file: &str) -> String {
        fs::read_to_string(self.repo(package).join("experiment").join(file)).unwrap()
    }

    /// Names of the payload directories of `package`.
    pub fn digest_dirs(&self, package: &str) -> Vec<String> {
        let mut dirs: Vec<String> = fs::read_dir(self.repo(package))
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with("sha256-"))
            .collect();
        dirs.sort();
        dirs
    }
}

pub fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("packages");
    let user_config = dir.path().join("etc");
    let hooks = Arc::new(RecordingHooks::default());
    let downloader = Arc::new(FlakyDownloader::default());
    let installer = Harness::open(&root, &user_config, downloader.clone(), hooks.clone());
    Harness {
        _dir: dir,
        root,
        user_config,
        hooks,
        downloader,
        sources: PackageSource::new(),
        installer: Some(installer),
    }
}
