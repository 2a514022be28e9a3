// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use trendgrid_app::{ChoiceRole, GridSchema, MultiChoiceField, TableName};

const CONFIG_VERSION: i64 = 1;
const DEFAULT_REQUEST_TIMEOUT: &str = "15s";
const MIN_REQUEST_TIMEOUT: Duration = Duration::from_secs(1);
const MAX_REQUEST_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const DEFAULT_LOG_LEVEL: &str = "info";
const LOG_LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "error", "off"];

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub version: i64,
    #[serde(default)]
    pub storage: Storage,
    #[serde(default)]
    pub grid: Grid,
    #[serde(default)]
    pub log: Log,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            storage: Storage::default(),
            grid: Grid::default(),
            log: Log::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Storage {
    pub db_path: Option<String>,
}

/// Overrides for the built-in business-trends schema. Anything left out
/// keeps its default.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Grid {
    pub tables: Option<Vec<String>>,
    pub locked_columns: Option<Vec<String>>,
    pub request_timeout: Option<String>,
    /// Replaces the default choice roles when non-empty.
    #[serde(default, rename = "choice")]
    pub choices: Vec<ChoiceRole>,
    pub multi_choice: Option<MultiChoiceField>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Log {
    pub level: Option<String>,
    pub file: Option<String>,
}

impl Config {
    pub fn default_path() -> Result<PathBuf> {
        if let Some(path) = env::var_os("TRENDGRID_CONFIG_PATH") {
            return Ok(PathBuf::from(path));
        }

        let config_root = dirs::config_dir().ok_or_else(|| {
            anyhow!(
                "cannot resolve config directory; set TRENDGRID_CONFIG_PATH to the config file"
            )
        })?;

        let app_dir = config_root.join(trendgrid_db::APP_NAME);
        fs::create_dir_all(&app_dir)
            .with_context(|| format!("create config directory {}", app_dir.display()))?;
        Ok(app_dir.join("config.toml"))
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        let value: toml::Value = toml::from_str(&raw)
            .with_context(|| format!("parse TOML config {}", path.display()))?;

        let version = value
            .get("version")
            .and_then(toml::Value::as_integer)
            .ok_or_else(|| {
                anyhow!(
                    "config file {} is not versioned. Add `version = 1` and put values under [storage], [grid], and [log]",
                    path.display()
                )
            })?;

        if version != CONFIG_VERSION {
            bail!(
                "unsupported config version {} in {}; expected version = 1",
                version,
                path.display()
            );
        }

        let config: Config = value
            .try_into()
            .with_context(|| format!("decode config {}", path.display()))?;
        config.validate(path)?;
        Ok(config)
    }

    fn validate(&self, path: &Path) -> Result<()> {
        if let Some(db_path) = &self.storage.db_path {
            trendgrid_db::validate_db_path(db_path)
                .with_context(|| format!("storage.db_path in {}", path.display()))?;
        }

        if let Some(timeout) = &self.grid.request_timeout {
            let parsed = parse_duration(timeout)
                .with_context(|| format!("grid.request_timeout in {}", path.display()))?;
            if !(MIN_REQUEST_TIMEOUT..=MAX_REQUEST_TIMEOUT).contains(&parsed) {
                bail!(
                    "grid.request_timeout in {} must be between 1s and 5m, got {}",
                    path.display(),
                    timeout
                );
            }
        }

        self.schema()
            .with_context(|| format!("invalid [grid] section in {}", path.display()))?;

        if let Some(level) = &self.log.level
            && !LOG_LEVELS.contains(&level.as_str())
        {
            bail!(
                "log.level in {} must be one of {}, got {:?}",
                path.display(),
                LOG_LEVELS.join(", "),
                level
            );
        }

        Ok(())
    }

    /// The grid schema with this file's overrides applied, validated.
    pub fn schema(&self) -> Result<GridSchema> {
        let mut schema = GridSchema::business_trends();
        if let Some(tables) = &self.grid.tables {
            schema.tables = tables.iter().map(|table| TableName::from(table.as_str())).collect();
        }
        if let Some(locked) = &self.grid.locked_columns {
            schema.locked_columns = locked.clone();
        }
        if self.grid.choices.is_empty() {
            let tables = schema.tables.clone();
            schema
                .choices
                .retain(|role| role.table.as_ref().is_none_or(|table| tables.contains(table)));
        } else {
            schema.choices = self.grid.choices.clone();
        }
        if let Some(multi) = &self.grid.multi_choice {
            schema.multi_choice = Some(multi.clone());
        } else if let Some(multi) = &schema.multi_choice
            && !schema.manages(&multi.table)
        {
            schema.multi_choice = None;
        }
        schema.validate()?;
        Ok(schema)
    }

    pub fn db_path(&self) -> Result<PathBuf> {
        match &self.storage.db_path {
            Some(path) => Ok(PathBuf::from(path)),
            None => trendgrid_db::default_db_path(),
        }
    }

    pub fn request_timeout(&self) -> Result<Duration> {
        parse_duration(
            self.grid
                .request_timeout
                .as_deref()
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT),
        )
    }

    pub fn log_level(&self) -> &str {
        self.log.level.as_deref().unwrap_or(DEFAULT_LOG_LEVEL)
    }

    pub fn log_path(&self) -> Result<PathBuf> {
        if let Some(file) = &self.log.file {
            return Ok(PathBuf::from(file));
        }
        let data_root = dirs::data_local_dir().ok_or_else(|| {
            anyhow!("cannot resolve data directory; set [log].file to a writable path")
        })?;
        Ok(data_root
            .join(trendgrid_db::APP_NAME)
            .join(format!("{}.log", trendgrid_db::APP_NAME)))
    }

    pub fn example_config(path: &Path) -> String {
        format!(
            "# trendgrid config\n# Place this file at: {}\n\nversion = 1\n\n[storage]\n# Optional. Default is the platform data dir (for example ~/.local/share/trendgrid/trendgrid.db)\n# db_path = \"/absolute/path/to/trendgrid.db\"\n\n[grid]\ntables = [\"users\", \"ideas\", \"user_ideas_submissions\", \"trendingideas\"]\nlocked_columns = [\"id\", \"user_id\", \"submission_id\", \"idea_id\", \"created_at\"]\nrequest_timeout = \"{}\"\n\n# Replaces the built-in choice roles when present.\n# [[grid.choice]]\n# column = \"status\"\n# table = \"users\"\n# options = [\"standard\", \"plus\", \"admin\"]\n\n# [grid.multi_choice]\n# table = \"user_ideas_submissions\"\n# column = \"tags\"\n# options = [\"Retail\", \"Services\"]\n\n[log]\nlevel = \"{}\"\n# file = \"/absolute/path/to/trendgrid.log\"\n",
            path.display(),
            DEFAULT_REQUEST_TIMEOUT,
            DEFAULT_LOG_LEVEL,
        )
    }
}

fn parse_duration(raw: &str) -> Result<Duration> {
    if let Some(value) = raw.strip_suffix("ms") {
        let millis: u64 = value
            .parse()
            .with_context(|| format!("invalid timeout duration {raw:?}"))?;
        return Ok(Duration::from_millis(millis));
    }
    if let Some(value) = raw.strip_suffix('s') {
        let secs: u64 = value
            .parse()
            .with_context(|| format!("invalid timeout duration {raw:?}"))?;
        return Ok(Duration::from_secs(secs));
    }
    if let Some(value) = raw.strip_suffix('m') {
        let mins: u64 = value
            .parse()
            .with_context(|| format!("invalid timeout duration {raw:?}"))?;
        return Ok(Duration::from_secs(mins * 60));
    }

    bail!("invalid duration {raw:?}; use one of: <N>ms, <N>s, <N>m (for example 500ms or 15s)")
}

/// Serializes tests that touch process environment variables.
#[cfg(test)]
pub(crate) fn env_lock() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::{Mutex, OnceLock};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    match ENV_LOCK.get_or_init(|| Mutex::new(())).lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
