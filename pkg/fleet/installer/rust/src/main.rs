// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2025-present Datadog, Inc.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use dd_installer::installer::{DEFAULT_ROOT, DEFAULT_USER_CONFIG_DIR};
use dd_installer::{Installer, LocalDownloader, LogHooks};

#[derive(Parser, Debug)]
#[command(name = "dd-installer")]
#[command(about = "Installs and experiments with Datadog packages", long_about = None)]
struct Args {
    /// Directory holding the packages and their database
    #[arg(long, env = "DD_INSTALLER_ROOT", default_value = DEFAULT_ROOT)]
    root: PathBuf,

    /// Directory receiving configuration examples and override links
    #[arg(long, env = "DD_INSTALLER_CONFIG_DIR", default_value = DEFAULT_USER_CONFIG_DIR)]
    config_dir: PathBuf,

    #[arg(long, env = "DD_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Install a package as stable
    Install { url: String, args: Vec<String> },
    /// Install a package even if the same digest is already stable
    ForceInstall { url: String, args: Vec<String> },
    /// Remove a package
    Remove { package: String },
    /// Stage a package next to its stable version
    InstallExperiment { url: String },
    RemoveExperiment { package: String },
    PromoteExperiment { package: String },
    /// Print installed packages as JSON
    State { package: Option<String> },
    /// Remove every package and the database
    Purge,
}

#[allow(clippy::print_stdout, clippy::print_stderr)]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    dd_agent_log::Builder::new()
        .logger_name("INSTALLER")
        .level(dd_agent_log::parse_level(&args.log_level)?)
        .init()?;

    let installer = Installer::new(&args.root, Arc::new(LocalDownloader::new()), Arc::new(LogHooks))
        .with_context(|| format!("opening installer root {}", args.root.display()))?
        .with_user_config_dir(&args.config_dir);

    match args.command {
        Command::Install { url, args } => installer.install(&url, &args).await?,
        Command::ForceInstall { url, args } => installer.force_install(&url, &args).await?,
        Command::Remove { package } => installer.remove(&package).await?,
        Command::InstallExperiment { url } => installer.install_experiment(&url).await?,
        Command::RemoveExperiment { package } => installer.remove_experiment(&package).await?,
        Command::PromoteExperiment { package } => installer.promote_experiment(&package).await?,
        Command::State { package } => {
            let json = match package {
                Some(package) => serde_json::to_string_pretty(&installer.state(&package)?)?,
                None => serde_json::to_string_pretty(&installer.states()?)?,
            };
            println!("{json}");
        }
        Command::Purge => installer.purge().await?,
    }
    Ok(())
}
