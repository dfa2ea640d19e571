// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2025-present Datadog, Inc.

//! Package sources.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::debug;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::errors::InstallerError;

const MANIFEST_FILE: &str = "package.json";
const PAYLOAD_DIR: &str = "payload";
const CONFIG_DIR: &str = "config";

/// A package fetched from its source, ready to be extracted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedPackage {
    pub name: String,
    pub version: String,
    pub digest: String,
    /// Where the downloader keeps the fetched content.
    pub location: PathBuf,
}

#[async_trait]
pub trait Downloader: Send + Sync {
    /// Fetch and verify the package behind `url`.
    async fn download(&self, url: &str) -> Result<DownloadedPackage, InstallerError>;

    /// Write the package payload into `dest`, which exists and is empty.
    async fn extract_payload(
        &self,
        package: &DownloadedPackage,
        dest: &Path,
    ) -> Result<(), InstallerError>;

    /// Write the package configuration examples into `dest`. Returns false
    /// when the package ships none.
    async fn extract_config(
        &self,
        package: &DownloadedPackage,
        dest: &Path,
    ) -> Result<bool, InstallerError>;
}

#[derive(Debug, Deserialize)]
struct Manifest {
    name: String,
    version: String,
    #[serde(default)]
    digest: Option<String>,
}

/// Reads packages laid out on the local filesystem:
///
/// ```text
/// <dir>/package.json   {"name": ..., "version": ..., "digest": optional}
/// <dir>/payload/...
/// <dir>/config/...     optional
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalDownloader;

impl LocalDownloader {
    pub fn new() -> Self {
        Self
    }

    fn source_dir(url: &str) -> Result<PathBuf, InstallerError> {
        let path = url
            .strip_prefix("file://")
            .ok_or_else(|| InstallerError::InvalidUrl(url.to_string()))?;
        if path.is_empty() {
            return Err(InstallerError::InvalidUrl(url.to_string()));
        }
        Ok(PathBuf::from(path))
    }
}

#[async_trait]
impl Downloader for LocalDownloader {
    async fn download(&self, url: &str) -> Result<DownloadedPackage, InstallerError> {
        let dir = Self::source_dir(url)?;
        let download_err = |message: String| InstallerError::Download {
            url: url.to_string(),
            message,
        };

        let raw = fs::read(dir.join(MANIFEST_FILE))
            .map_err(|e| download_err(format!("reading {MANIFEST_FILE}: {e}")))?;
        let manifest: Manifest = serde_json::from_slice(&raw)
            .map_err(|e| download_err(format!("parsing {MANIFEST_FILE}: {e}")))?;

        let payload = dir.join(PAYLOAD_DIR);
        if !payload.is_dir() {
            return Err(download_err(format!("missing {PAYLOAD_DIR} directory")));
        }
        let digest = tree_digest(&payload)?;
        if let Some(expected) = manifest.digest
            && expected != digest
        {
            return Err(InstallerError::DigestMismatch {
                package: manifest.name,
                expected,
                actual: digest,
            });
        }

        debug!("downloaded {} {} ({digest})", manifest.name, manifest.version);
        Ok(DownloadedPackage {
            name: manifest.name,
            version: manifest.version,
            digest,
            location: dir,
        })
    }

    async fn extract_payload(
        &self,
        package: &DownloadedPackage,
        dest: &Path,
    ) -> Result<(), InstallerError> {
        copy_tree(&package.location.join(PAYLOAD_DIR), dest)
    }

    async fn extract_config(
        &self,
        package: &DownloadedPackage,
        dest: &Path,
    ) -> Result<bool, InstallerError> {
        let config = package.location.join(CONFIG_DIR);
        if !config.is_dir() {
            return Ok(false);
        }
        copy_tree(&config, dest)?;
        Ok(true)
    }
}

/// `sha256:<hex>` over the sorted relative paths and contents of the regular
/// files under `root`.
pub fn tree_digest(root: &Path) -> Result<String, InstallerError> {
    let mut hasher = Sha256::new();
    let walker = WalkDir::new(root).sort_by_file_name().follow_links(false);
    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            InstallerError::io("walking", path)(e.into())
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        hasher.update(relative.to_string_lossy().as_bytes());
        hasher.update([0u8]);

        let mut file =
            fs::File::open(entry.path()).map_err(InstallerError::io("opening", entry.path()))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)
            .map_err(InstallerError::io("reading", entry.path()))?;
        hasher.update((buf.len() as u64).to_le_bytes());
        hasher.update(&buf);
    }
    Ok(format!("sha256:{}", hex::encode(hasher.finalize())))
}

/// Copy directories, regular files and symlinks from `src` into `dest`.
pub(crate) fn copy_tree(src: &Path, dest: &Path) -> Result<(), InstallerError> {
    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(src).to_path_buf();
            InstallerError::io("walking", path)(e.into())
        })?;
        let Ok(relative) = entry.path().strip_prefix(src) else {
            continue;
        };
        let target = dest.join(relative);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target).map_err(InstallerError::io("creating", &target))?;
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path())
                .map_err(InstallerError::io("reading link", entry.path()))?;
            if target.symlink_metadata().is_ok() {
                fs::remove_file(&target).map_err(InstallerError::io("replacing", &target))?;
            }
            std::os::unix::fs::symlink(link, &target)
                .map_err(InstallerError::io("creating link", &target))?;
        } else {
            fs::copy(entry.path(), &target).map_err(InstallerError::io("copying", &target))?;
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn write_package(dir: &Path, manifest: &str) {
        fs::create_dir_all(dir.join("payload/bin")).unwrap();
        fs::write(dir.join("package.json"), manifest).unwrap();
        fs::write(dir.join("payload/bin/agent"), "#!/bin/sh\n").unwrap();
        fs::write(dir.join("payload/VERSION"), "7.60.0").unwrap();
    }

    // -- digest --

    #[test]
    fn test_tree_digest_depends_on_paths_and_contents() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        fs::write(a.path().join("one"), "x").unwrap();
        fs::write(b.path().join("one"), "x").unwrap();
        assert_eq!(tree_digest(a.path()).unwrap(), tree_digest(b.path()).unwrap());

        fs::write(b.path().join("two"), "").unwrap();
        assert_ne!(tree_digest(a.path()).unwrap(), tree_digest(b.path()).unwrap());

        let digest = tree_digest(a.path()).unwrap();
        assert!(digest.starts_with("sha256:"));
        assert_eq!(digest.len(), "sha256:".len() + 64);
    }

    // -- downloads --

    #[tokio::test]
    async fn test_download_and_extract() {
        let src = tempfile::tempdir().unwrap();
        write_package(src.path(), r#"{"name": "datadog-agent", "version": "7.60.0"}"#);
        let url = format!("file://{}", src.path().display());

        let downloader = LocalDownloader::new();
        let package = downloader.download(&url).await.unwrap();
        assert_eq!(package.name, "datadog-agent");
        assert_eq!(package.version, "7.60.0");
        assert_eq!(package.digest, tree_digest(&src.path().join("payload")).unwrap());

        let dest = tempfile::tempdir().unwrap();
        downloader.extract_payload(&package, dest.path()).await.unwrap();
        assert_eq!(
            fs::read_to_string(dest.path().join("bin/agent")).unwrap(),
            "#!/bin/sh\n"
        );
        assert!(!downloader.extract_config(&package, dest.path()).await.unwrap());
    }

    #[tokio::test]
    async fn test_digest_mismatch() {
        let src = tempfile::tempdir().unwrap();
        write_package(
            src.path(),
            r#"{"name": "datadog-agent", "version": "7.60.0", "digest": "sha256:00"}"#,
        );
        let url = format!("file://{}", src.path().display());
        let err = LocalDownloader::new().download(&url).await.unwrap_err();
        assert!(matches!(err, InstallerError::DigestMismatch { .. }), "{err}");
    }

    #[tokio::test]
    async fn test_invalid_urls() {
        let downloader = LocalDownloader::new();
        for url in ["oci://registry/datadog-agent", "file://"] {
            assert!(matches!(
                downloader.download(url).await,
                Err(InstallerError::InvalidUrl(_))
            ));
        }
        assert!(matches!(
            downloader.download("file:///does/not/exist").await,
            Err(InstallerError::Download { .. })
        ));
    }
}
