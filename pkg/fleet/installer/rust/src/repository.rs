// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2025-present Datadog, Inc.

//! Content-addressed package directories.
//!
//! ```text
//! <root>/<name>/
//!    stable     -> <digest dir>
//!    experiment -> <digest dir>   (optional)
//!    sha256-.../                  (immutable payloads)
//! ```
//!
//! Links are relative and replaced atomically (new link, then rename).

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::errors::InstallerError;

pub const STABLE_LINK: &str = "stable";
pub const EXPERIMENT_LINK: &str = "experiment";
const DIGEST_DIR_PREFIX: &str = "sha256-";
const STAGING_SUFFIX: &str = "tmp";
const BACKUP_SUFFIX: &str = "old";

/// Directory name holding the payload of `digest`.
pub fn digest_dir_name(digest: &str) -> String {
    digest.replace(':', "-")
}

/// Point `link` at `target`, replacing any previous link in one rename.
pub fn replace_link(link: &Path, target: &Path) -> Result<(), InstallerError> {
    let file_name = link
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = link.with_file_name(format!(".{file_name}.tmp"));
    match fs::remove_file(&tmp) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(InstallerError::io("removing stale link", &tmp)(e)),
    }
    symlink(target, &tmp).map_err(InstallerError::io("creating link", &tmp))?;
    fs::rename(&tmp, link).map_err(InstallerError::io("replacing link", link))
}

/// Remove `link` if present. Returns whether it existed.
pub fn remove_link(link: &Path) -> Result<bool, InstallerError> {
    match fs::remove_file(link) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(InstallerError::io("removing link", link)(e)),
    }
}

fn remove_dir_if_exists(dir: &Path) -> Result<(), InstallerError> {
    match fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(InstallerError::io("removing", dir)(e)),
    }
}

fn read_link_name(link: &Path) -> Option<String> {
    fs::read_link(link)
        .ok()
        .and_then(|target| target.file_name().map(|n| n.to_string_lossy().into_owned()))
}

/// Directories of every installed package.
#[derive(Debug, Clone)]
pub struct Repositories {
    root: PathBuf,
}

impl Repositories {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn get(&self, name: &str) -> Repository {
        Repository {
            path: self.root.join(name),
        }
    }

    /// Stable and experiment digest dirs of every package with a stable link.
    pub fn states(&self) -> Result<BTreeMap<String, RepositoryState>, InstallerError> {
        let mut states = BTreeMap::new();
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(states),
            Err(e) => return Err(InstallerError::io("listing", &self.root)(e)),
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            let state = self.get(&name).state();
            if state.stable.is_some() {
                states.insert(name, state);
            }
        }
        Ok(states)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepositoryState {
    pub stable: Option<String>,
    pub experiment: Option<String>,
}

/// Directory of one package.
#[derive(Debug, Clone)]
pub struct Repository {
    path: PathBuf,
}

impl Repository {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_dir()
    }

    pub fn digest_path(&self, digest: &str) -> PathBuf {
        self.path.join(digest_dir_name(digest))
    }

    pub fn stable_path(&self) -> PathBuf {
        self.path.join(STABLE_LINK)
    }

    pub fn experiment_path(&self) -> PathBuf {
        self.path.join(EXPERIMENT_LINK)
    }

    /// Digest dir names the links point to.
    pub fn state(&self) -> RepositoryState {
        RepositoryState {
            stable: read_link_name(&self.stable_path()),
            experiment: read_link_name(&self.experiment_path()),
        }
    }

    /// Create an empty staging directory next to the payload of `digest`.
    /// Nothing a link points to is touched until [`commit_payload`].
    ///
    /// [`commit_payload`]: Self::commit_payload
    pub fn stage_payload(&self, digest: &str) -> Result<StagedPayload, InstallerError> {
        let dir = self.hidden_path(digest, STAGING_SUFFIX);
        remove_dir_if_exists(&dir)?;
        fs::create_dir_all(&dir).map_err(InstallerError::io("creating", &dir))?;
        Ok(StagedPayload {
            digest: digest.to_string(),
            dir,
        })
    }

    /// Drop the staging directory of `digest`, if any.
    pub fn discard_staged(&self, digest: &str) -> Result<(), InstallerError> {
        remove_dir_if_exists(&self.hidden_path(digest, STAGING_SUFFIX))
    }

    /// Move a staged payload to its digest directory. A payload already
    /// there is renamed aside, never emptied in place, and comes back with
    /// [`PayloadSwap::revert`].
    pub fn commit_payload(&self, staged: StagedPayload) -> Result<PayloadSwap, InstallerError> {
        let dir = self.digest_path(&staged.digest);
        let backup = if dir.exists() {
            let backup = self.hidden_path(&staged.digest, BACKUP_SUFFIX);
            remove_dir_if_exists(&backup)?;
            debug!("moving existing payload {} aside", dir.display());
            fs::rename(&dir, &backup).map_err(InstallerError::io("renaming", &dir))?;
            Some(backup)
        } else {
            None
        };
        if let Err(e) = fs::rename(&staged.dir, &dir) {
            if let Some(backup) = &backup
                && let Err(restore) = fs::rename(backup, &dir)
            {
                warn!("could not restore {}: {restore}", dir.display());
            }
            return Err(InstallerError::io("renaming", &staged.dir)(e));
        }
        Ok(PayloadSwap { dir, backup })
    }

    fn hidden_path(&self, digest: &str, suffix: &str) -> PathBuf {
        self.path
            .join(format!(".{}.{suffix}", digest_dir_name(digest)))
    }

    pub fn set_stable(&self, digest: &str) -> Result<(), InstallerError> {
        replace_link(&self.stable_path(), Path::new(&digest_dir_name(digest)))
    }

    pub fn set_experiment(&self, digest: &str) -> Result<(), InstallerError> {
        replace_link(&self.experiment_path(), Path::new(&digest_dir_name(digest)))
    }

    /// Point stable back at `digest` (or its directory name), or drop the link
    /// when `None`.
    pub fn restore_stable(&self, digest: Option<&str>) -> Result<(), InstallerError> {
        match digest {
            Some(digest) => self.set_stable(digest),
            None => remove_link(&self.stable_path()).map(|_| ()),
        }
    }

    pub fn delete_experiment(&self) -> Result<bool, InstallerError> {
        remove_link(&self.experiment_path())
    }

    /// Make the experiment the new stable. Either both links change or
    /// neither does.
    pub fn promote_experiment(&self) -> Result<(), InstallerError> {
        let experiment = self.experiment_path();
        let target = fs::read_link(&experiment)
            .map_err(InstallerError::io("reading experiment link", &experiment))?;
        let previous = fs::read_link(self.stable_path()).ok();

        replace_link(&self.stable_path(), &target)?;
        if let Err(e) = remove_link(&experiment) {
            warn!("rolling back promotion in {}: {e}", self.path.display());
            match previous {
                Some(previous) => replace_link(&self.stable_path(), &previous)?,
                None => {
                    remove_link(&self.stable_path())?;
                }
            }
            return Err(e);
        }
        Ok(())
    }

    /// Remove every digest dir no link points to, along with leftover
    /// staging and backup dirs.
    pub fn cleanup(&self) -> Result<(), InstallerError> {
        let state = self.state();
        let entries = match fs::read_dir(&self.path) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(InstallerError::io("listing", &self.path)(e)),
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            let leftover = name
                .strip_prefix('.')
                .is_some_and(|n| n.starts_with(DIGEST_DIR_PREFIX));
            if leftover {
                debug!("removing leftover {name}");
                remove_dir_if_exists(&entry.path())?;
                continue;
            }
            if !name.starts_with(DIGEST_DIR_PREFIX)
                || state.stable.as_deref() == Some(name.as_str())
                || state.experiment.as_deref() == Some(name.as_str())
            {
                continue;
            }
            debug!("removing unreferenced payload {name}");
            let path = entry.path();
            fs::remove_dir_all(&path).map_err(InstallerError::io("removing", &path))?;
        }
        Ok(())
    }

    pub fn delete(&self) -> Result<(), InstallerError> {
        remove_dir_if_exists(&self.path)
    }
}

/// A payload extracted into a hidden sibling of its digest directory.
#[derive(Debug)]
pub struct StagedPayload {
    digest: String,
    dir: PathBuf,
}

impl StagedPayload {
    pub fn path(&self) -> &Path {
        &self.dir
    }
}

/// A committed payload, with the copy it replaced kept until the operation
/// either finishes or reverts.
#[derive(Debug)]
#[must_use]
pub struct PayloadSwap {
    dir: PathBuf,
    backup: Option<PathBuf>,
}

impl PayloadSwap {
    /// Drop the replaced copy.
    pub fn finish(self) {
        if let Some(backup) = self.backup
            && let Err(e) = remove_dir_if_exists(&backup)
        {
            warn!("could not remove {}: {e}", backup.display());
        }
    }

    /// Put the replaced copy back, or drop the new payload when there was
    /// none.
    pub fn revert(self) -> Result<(), InstallerError> {
        remove_dir_if_exists(&self.dir)?;
        if let Some(backup) = &self.backup {
            fs::rename(backup, &self.dir).map_err(InstallerError::io("restoring", backup))?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn repo_with(digests: &[&str]) -> (tempfile::TempDir, Repository) {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repositories::new(dir.path()).get("datadog-agent");
        for digest in digests {
            let staged = repo.stage_payload(digest).unwrap();
            fs::write(staged.path().join("version"), digest).unwrap();
            repo.commit_payload(staged).unwrap().finish();
        }
        (dir, repo)
    }

    // -- links --

    #[test]
    fn test_stable_and_experiment_links() {
        let (_dir, repo) = repo_with(&["sha256:aa", "sha256:bb"]);
        repo.set_stable("sha256:aa").unwrap();
        repo.set_experiment("sha256:bb").unwrap();

        assert_eq!(
            repo.state(),
            RepositoryState {
                stable: Some("sha256-aa".to_string()),
                experiment: Some("sha256-bb".to_string()),
            }
        );
        assert_eq!(
            fs::read_to_string(repo.stable_path().join("version")).unwrap(),
            "sha256:aa"
        );

        repo.promote_experiment().unwrap();
        assert_eq!(repo.state().stable.as_deref(), Some("sha256-bb"));
        assert!(repo.state().experiment.is_none());
    }

    #[test]
    fn test_promote_without_experiment_fails() {
        let (_dir, repo) = repo_with(&["sha256:aa"]);
        repo.set_stable("sha256:aa").unwrap();
        assert!(repo.promote_experiment().is_err());
        assert_eq!(repo.state().stable.as_deref(), Some("sha256-aa"));
    }

    // -- cleanup --

    #[test]
    fn test_cleanup_keeps_referenced_dirs() {
        let (_dir, repo) = repo_with(&["sha256:aa", "sha256:bb", "sha256:cc"]);
        fs::create_dir_all(repo.path().join("config")).unwrap();
        repo.set_stable("sha256:aa").unwrap();
        repo.set_experiment("sha256:cc").unwrap();

        repo.cleanup().unwrap();

        assert!(repo.digest_path("sha256:aa").is_dir());
        assert!(!repo.digest_path("sha256:bb").exists());
        assert!(repo.digest_path("sha256:cc").is_dir());
        assert!(repo.path().join("config").is_dir());
    }

    #[test]
    fn test_states_lists_installed_packages() {
        let (dir, repo) = repo_with(&["sha256:aa"]);
        repo.set_stable("sha256:aa").unwrap();
        fs::create_dir_all(dir.path().join("half-installed")).unwrap();

        let states = Repositories::new(dir.path()).states().unwrap();
        assert_eq!(states.len(), 1);
        assert_eq!(
            states.get("datadog-agent").unwrap().stable.as_deref(),
            Some("sha256-aa")
        );
    }

    // -- payloads --

    #[test]
    fn test_commit_over_referenced_payload_can_revert() {
        let (_dir, repo) = repo_with(&["sha256:aa"]);
        repo.set_stable("sha256:aa").unwrap();

        let staged = repo.stage_payload("sha256:aa").unwrap();
        assert!(repo.stable_path().join("version").exists());
        fs::write(staged.path().join("version"), "again").unwrap();
        let swap = repo.commit_payload(staged).unwrap();
        assert_eq!(
            fs::read_to_string(repo.stable_path().join("version")).unwrap(),
            "again"
        );

        swap.revert().unwrap();
        assert_eq!(
            fs::read_to_string(repo.stable_path().join("version")).unwrap(),
            "sha256:aa"
        );
    }

    #[test]
    fn test_cleanup_removes_leftover_staging() {
        let (_dir, repo) = repo_with(&["sha256:aa"]);
        repo.set_stable("sha256:aa").unwrap();
        let staged = repo.stage_payload("sha256:bb").unwrap();
        let leftover = staged.path().to_path_buf();

        repo.cleanup().unwrap();
        assert!(!leftover.exists());
        assert!(repo.digest_path("sha256:aa").is_dir());
    }
}
