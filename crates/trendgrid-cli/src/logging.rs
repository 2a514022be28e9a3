// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result, anyhow};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "TRENDGRID_LOG";

/// Sends tracing output to the log file; the terminal belongs to the grid.
pub fn init(path: &Path, configured_level: &str) -> Result<PathBuf> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("create log directory {}", parent.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| {
            format!(
                "open log file {} -- set [log].file to a writable path",
                path.display()
            )
        })?;

    tracing_subscriber::fmt()
        .with_ansi(false)
        .with_target(false)
        .with_env_filter(filter(configured_level)?)
        .with_writer(Mutex::new(file))
        .try_init()
        .map_err(|error| anyhow!("install log subscriber: {error}"))?;
    Ok(path.to_path_buf())
}

/// `TRENDGRID_LOG` wins over `RUST_LOG`, which wins over the config file.
fn filter(configured_level: &str) -> Result<EnvFilter> {
    match EnvFilter::try_from_env(LOG_ENV).or_else(|_| EnvFilter::try_from_default_env()) {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(configured_level)
            .with_context(|| format!("invalid log level {configured_level:?}")),
    }
}
