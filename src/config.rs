use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::domain::Protocol;
use crate::error::KiraError;
use crate::session::LastQuery;

pub const CONFIG_FILE: &str = "kira-seqdb.json";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub store_root: Option<String>,
    #[serde(default)]
    pub series_only: Option<bool>,
    #[serde(default)]
    pub protocols: Vec<String>,
    #[serde(default)]
    pub last_query: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub store_root: Option<Utf8PathBuf>,
    pub series_only: bool,
    pub protocols: BTreeSet<Protocol>,
    pub last_query: Option<Utf8PathBuf>,
}

/// Command-line values that take precedence over the config file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub store_root: Option<Utf8PathBuf>,
    pub series_only: bool,
    pub protocols: Vec<String>,
    pub last_query: Option<Utf8PathBuf>,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// An explicit path must be readable. Without one, `kira-seqdb.json` in the current
    /// directory is used if present and defaults apply otherwise.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, KiraError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| KiraError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| KiraError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, KiraError> {
        let protocols = parse_protocols(&config.protocols)?;

        Ok(ResolvedConfig {
            store_root: config.store_root.map(Utf8PathBuf::from),
            series_only: config.series_only.unwrap_or(false),
            protocols,
            last_query: config.last_query.map(Utf8PathBuf::from),
        })
    }
}

impl ResolvedConfig {
    pub fn apply(mut self, overrides: ConfigOverrides) -> Result<Self, KiraError> {
        if let Some(root) = overrides.store_root {
            self.store_root = Some(root);
        }
        if overrides.series_only {
            self.series_only = true;
        }
        if !overrides.protocols.is_empty() {
            self.protocols = parse_protocols(&overrides.protocols)?;
        }
        if let Some(path) = overrides.last_query {
            self.last_query = Some(path);
        }
        Ok(self)
    }

    pub fn require_store_root(&self) -> Result<&Utf8PathBuf, KiraError> {
        self.store_root.as_ref().ok_or(KiraError::MissingStoreRoot)
    }

    pub fn last_query(&self) -> Result<LastQuery, KiraError> {
        match &self.last_query {
            Some(path) => Ok(LastQuery::new(path.clone())),
            None => Ok(LastQuery::new(LastQuery::default_path()?)),
        }
    }
}

/// Accepts repeated values as well as comma-separated lists.
pub fn parse_protocols(values: &[String]) -> Result<BTreeSet<Protocol>, KiraError> {
    values
        .iter()
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| value.parse::<Protocol>())
        .collect()
}
