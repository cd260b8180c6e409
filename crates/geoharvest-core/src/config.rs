//! Configuration types for geoharvest components.
//!
//! Process-wide settings (`HttpConfig`, `HarvestSettings`, `DbConfig`) and
//! the `harvesters.toml` node file. Node entries are converted into
//! [`HarvesterDraft`]s and only become live through the config store.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::node::{HarvesterDraft, QueryScope, SearchCriteria};

/// Database connection pool configuration.
pub struct DbConfig {
    pub max_connections: u32,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self { max_connections: 5 }
    }
}

/// HTTP client configuration for catalog requests.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_base_delay: Duration::from_millis(500),
            user_agent: format!("geoharvest/{} (catalog-harvester)", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl HttpConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries.max(1);
        self
    }

    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }
}

/// Settings shared by every harvest run.
#[derive(Debug, Clone)]
pub struct HarvestSettings {
    /// Records requested per page.
    pub page_size: u32,
    /// Emit a progress event every this many records.
    pub report_interval: usize,
    /// Delete records no longer offered after a complete LOCAL pass.
    pub remove_unseen: bool,
}

impl HarvestSettings {
    pub const MAX_PAGE_SIZE: u32 = 500;

    pub fn with_page_size(mut self, size: u32) -> Self {
        self.page_size = size.clamp(1, Self::MAX_PAGE_SIZE);
        self
    }

    pub fn with_report_interval(mut self, interval: usize) -> Self {
        self.report_interval = interval.max(1);
        self
    }

    pub fn without_removal(mut self) -> Self {
        self.remove_unseen = false;
        self
    }
}

impl Default for HarvestSettings {
    fn default() -> Self {
        Self {
            page_size: 50,
            report_interval: 25,
            remove_unseen: true,
        }
    }
}

// =============================================================================
// Harvester nodes (harvesters.toml)
// =============================================================================

fn default_enabled() -> bool {
    true
}

fn default_reject_duplicates() -> bool {
    true
}

/// Root configuration structure for harvesters.toml.
///
/// # Example
///
/// ```toml
/// [[harvesters]]
/// id = "geocat"
/// name = "geocat.ch"
/// endpoint = "https://www.geocat.ch/geonetwork/srv/eng/csw"
/// every_minutes = 360
///
/// [[harvesters.searches]]
/// free_text = "water"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestersConfig {
    #[serde(default)]
    pub harvesters: Vec<HarvesterEntry>,
}

impl HarvestersConfig {
    /// Returns only enabled harvesters.
    pub fn enabled(&self) -> Vec<&HarvesterEntry> {
        self.harvesters.iter().filter(|h| h.enabled).collect()
    }

    /// Find a harvester by id or name (case-insensitive).
    pub fn find(&self, key: &str) -> Option<&HarvesterEntry> {
        self.harvesters
            .iter()
            .find(|h| h.id.eq_ignore_ascii_case(key) || h.name.eq_ignore_ascii_case(key))
    }
}

/// A single harvester node in the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HarvesterEntry {
    pub id: String,
    pub name: String,
    /// CSW service URL.
    pub endpoint: String,
    pub icon: Option<String>,
    /// Provenance source owning this node's records. Defaults to `id`, so
    /// ownership is stable across restarts.
    pub source_id: Option<String>,
    #[serde(default = "default_reject_duplicates")]
    pub reject_duplicate_resource: bool,
    #[serde(default)]
    pub query_scope: QueryScope,
    #[serde(default)]
    pub hop_count: i64,
    /// Harvest interval for `geoharvest watch`.
    pub every_minutes: Option<u64>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub searches: Vec<SearchCriteria>,
}

impl HarvesterEntry {
    /// Converts the entry into a draft for a new node.
    pub fn to_draft(&self) -> HarvesterDraft {
        let mut draft = HarvesterDraft::new(&self.id, &self.name, &self.endpoint)
            .with_reject_duplicates(self.reject_duplicate_resource)
            .with_query_scope(self.query_scope, self.hop_count);
        draft.icon = self.icon.clone();
        draft.source_id = Some(self.source_id.clone().unwrap_or_else(|| self.id.clone()));
        draft.searches = self.searches.clone();
        draft.every = self.every_minutes.map(|m| Duration::from_secs(m * 60));
        draft
    }
}

/// Default configuration file name.
pub const CONFIG_FILE_NAME: &str = "harvesters.toml";

/// Returns the default configuration directory path: `~/.config/geoharvest/`
pub fn default_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("geoharvest"))
}

/// Returns the default configuration file path.
pub fn default_config_path() -> Option<PathBuf> {
    default_config_dir().map(|p| p.join(CONFIG_FILE_NAME))
}

const DEFAULT_CONFIG_TEMPLATE: &str = r#"# geoharvest harvester configuration
#
# Usage:
#   geoharvest harvest              # Harvest all enabled nodes once
#   geoharvest harvest --node geocat
#   geoharvest watch                # Harvest on each node's schedule
#
# query_scope = "local" harvests records held by the catalog itself.
# query_scope = "hierarchy" also asks for records it harvested elsewhere;
# with hop_count > 0, linked catalogs are harvested too.

[[harvesters]]
id = "geocat"
name = "geocat.ch"
endpoint = "https://www.geocat.ch/geonetwork/srv/eng/csw"
reject_duplicate_resource = true
query_scope = "local"
hop_count = 0
every_minutes = 360

[[harvesters.searches]]
free_text = "water"
"#;

/// Load harvester configuration from a TOML file.
///
/// # Returns
/// * `Ok(Some(config))` - Configuration loaded successfully
/// * `Ok(None)` - No configuration directory could be determined
/// * `Err(e)` - A custom path is missing, or the file is invalid
///
/// A missing file at the default path is replaced by a commented template.
pub fn load_harvesters_config(path: Option<PathBuf>) -> Result<Option<HarvestersConfig>, AppError> {
    let using_default_path = path.is_none();
    let config_path = match path {
        Some(p) => p,
        None => match default_config_path() {
            Some(p) => p,
            None => return Ok(None),
        },
    };

    if !config_path.exists() {
        if using_default_path {
            if let Err(e) = create_default_config(&config_path) {
                tracing::warn!("Could not create default config template: {}", e);
                return Ok(None);
            }
        } else {
            return Err(AppError::ConfigError(format!(
                "Config file not found: {}",
                config_path.display()
            )));
        }
    }

    let content = std::fs::read_to_string(&config_path).map_err(|e| {
        AppError::ConfigError(format!(
            "Failed to read config file '{}': {}",
            config_path.display(),
            e
        ))
    })?;

    let config = parse_harvesters_config(&content).map_err(|e| match e {
        AppError::ConfigError(msg) => {
            AppError::ConfigError(format!("{}: {}", config_path.display(), msg))
        }
        other => other,
    })?;

    Ok(Some(config))
}

/// Parses harvesters.toml content and rejects duplicate node ids.
pub fn parse_harvesters_config(content: &str) -> Result<HarvestersConfig, AppError> {
    let config: HarvestersConfig = toml::from_str(content)
        .map_err(|e| AppError::ConfigError(format!("Invalid TOML: {}", e)))?;

    let mut ids = std::collections::HashSet::new();
    for entry in &config.harvesters {
        if !ids.insert(entry.id.to_lowercase()) {
            return Err(AppError::ConfigError(format!(
                "Duplicate harvester id: '{}'",
                entry.id
            )));
        }
    }

    Ok(config)
}

fn create_default_config(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    std::fs::write(path, DEFAULT_CONFIG_TEMPLATE)?;
    tracing::info!("Created default config template at: {}", path.display());

    Ok(())
}
