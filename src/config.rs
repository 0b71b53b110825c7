//! Runtime configuration.
//!
//! Settings come from defaults, an optional TOML file and CLI flags, in that
//! order. Every setting also has a compact key (`apirequesttimeout`,
//! `usenonpreferredapis`, ...) accepted by [`RuntimeConfig::set`].

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{CloudqlError, CloudqlResult};

const DEFAULT_DIR_NAME: &str = ".cloudql";
const DEFAULT_CONFIG_FILE: &str = "config.toml";

/// Result rendering format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Table,
    Json,
    Csv,
    Text,
}

/// Where errors are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPresentation {
    /// Errors go to stderr.
    Stderr,
    /// Errors are rendered as a result record.
    Record,
}

/// Session-wide settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Per-request HTTP timeout in seconds.
    #[serde(alias = "apirequesttimeout")]
    pub api_request_timeout: u64,

    /// Maximum number of cached metadata documents.
    #[serde(alias = "cachekeycount")]
    pub cache_key_count: usize,

    /// Discovery document lifetime in hours.
    #[serde(alias = "metadatattl")]
    pub metadata_ttl: u64,

    #[serde(alias = "colorscheme")]
    pub color_scheme: String,

    #[serde(alias = "configfile")]
    pub config_file: Option<PathBuf>,

    #[serde(alias = "hideheaders")]
    pub hide_headers: bool,

    pub delimiter: char,

    /// Build plans and show the requests without sending them.
    #[serde(alias = "dryrun")]
    pub dry_run: bool,

    #[serde(alias = "errorpresentation")]
    pub error_presentation: ErrorPresentation,

    pub infile: Option<PathBuf>,

    /// Service account key file.
    #[serde(alias = "keyfilepath")]
    pub key_file_path: Option<PathBuf>,

    #[serde(alias = "loglevel")]
    pub log_level: String,

    pub outfile: Option<PathBuf>,

    pub output: OutputFormat,

    /// Root directory for cached discovery documents.
    #[serde(alias = "providerroot")]
    pub provider_root: PathBuf,

    /// Default provider for unqualified table names.
    pub provider: String,

    /// Capacity of the plan cache.
    #[serde(alias = "querycachesize")]
    pub query_cache_size: usize,

    #[serde(alias = "usenonpreferredapis")]
    pub use_non_preferred_apis: bool,

    pub verbose: bool,

    /// Never fetch discovery documents over the network.
    pub offline: bool,

    /// Seconds between polls of a long-running operation.
    #[serde(alias = "pollinterval")]
    pub poll_interval: u64,

    /// Page size hint sent as `maxResults` on list calls; 0 leaves it unset.
    #[serde(alias = "maxresults")]
    pub max_results: u64,

    /// Maximum pages fetched per SELECT; 0 fetches every page.
    #[serde(alias = "pagelimit")]
    pub page_limit: u64,
}

fn default_root() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(DEFAULT_DIR_NAME)
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            api_request_timeout: 45,
            cache_key_count: 100,
            metadata_ttl: 24,
            color_scheme: "default".to_string(),
            config_file: None,
            hide_headers: false,
            delimiter: ',',
            dry_run: false,
            error_presentation: ErrorPresentation::Stderr,
            infile: None,
            key_file_path: None,
            log_level: "warn".to_string(),
            outfile: None,
            output: OutputFormat::Table,
            provider_root: default_root(),
            provider: "google".to_string(),
            query_cache_size: 10_000,
            use_non_preferred_apis: false,
            verbose: false,
            offline: false,
            poll_interval: 10,
            max_results: 0,
            page_limit: 0,
        }
    }
}

impl RuntimeConfig {
    /// Create a new configuration builder
    pub fn builder() -> RuntimeConfigBuilder {
        RuntimeConfigBuilder::default()
    }

    /// Default location of the config file.
    pub fn default_config_path() -> PathBuf {
        default_root().join(DEFAULT_CONFIG_FILE)
    }

    /// Load settings from a TOML file; missing keys keep their defaults.
    pub fn load(path: &Path) -> CloudqlResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CloudqlError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let mut config: RuntimeConfig = toml::from_str(&content).map_err(|e| {
            CloudqlError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        config.config_file = Some(path.to_path_buf());
        tracing::debug!("Loaded runtime config from {}", path.display());
        Ok(config)
    }

    /// Load the default config file if it exists, defaults otherwise.
    pub fn load_default() -> CloudqlResult<Self> {
        let path = Self::default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Set a value by its compact key name.
    pub fn set(&mut self, key: &str, value: &str) -> CloudqlResult<()> {
        match key.to_ascii_lowercase().as_str() {
            "apirequesttimeout" => self.api_request_timeout = parse_value(key, value)?,
            "cachekeycount" => self.cache_key_count = parse_value(key, value)?,
            "metadatattl" => self.metadata_ttl = parse_value(key, value)?,
            "colorscheme" => self.color_scheme = value.to_string(),
            "configfile" => self.config_file = Some(PathBuf::from(value)),
            "hideheaders" => self.hide_headers = parse_value(key, value)?,
            "delimiter" => self.delimiter = parse_value(key, value)?,
            "dryrun" => self.dry_run = parse_value(key, value)?,
            "errorpresentation" => {
                self.error_presentation = match value.to_ascii_lowercase().as_str() {
                    "stderr" => ErrorPresentation::Stderr,
                    "record" => ErrorPresentation::Record,
                    other => return Err(invalid(key, other)),
                }
            }
            "infile" => self.infile = Some(PathBuf::from(value)),
            "keyfilepath" => self.key_file_path = Some(PathBuf::from(value)),
            "loglevel" => self.log_level = value.to_string(),
            "outfile" => self.outfile = Some(PathBuf::from(value)),
            "output" => {
                self.output = match value.to_ascii_lowercase().as_str() {
                    "table" => OutputFormat::Table,
                    "json" => OutputFormat::Json,
                    "csv" => OutputFormat::Csv,
                    "text" => OutputFormat::Text,
                    other => return Err(invalid(key, other)),
                }
            }
            "providerroot" => self.provider_root = PathBuf::from(value),
            "provider" => self.provider = value.to_string(),
            "querycachesize" => self.query_cache_size = parse_value(key, value)?,
            "usenonpreferredapis" => self.use_non_preferred_apis = parse_value(key, value)?,
            "verbose" => self.verbose = parse_value(key, value)?,
            "offline" => self.offline = parse_value(key, value)?,
            "pollinterval" => self.poll_interval = parse_value(key, value)?,
            "maxresults" => self.max_results = parse_value(key, value)?,
            "pagelimit" => self.page_limit = parse_value(key, value)?,
            _ => return Err(CloudqlError::Config(format!("unknown config key '{}'", key))),
        }
        Ok(())
    }

    /// HTTP request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.api_request_timeout)
    }

    /// Interval between operation polls.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }

    /// Discovery document lifetime.
    pub fn metadata_ttl(&self) -> Duration {
        Duration::from_secs(self.metadata_ttl * 3600)
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> CloudqlResult<T> {
    value.trim().parse().map_err(|_| invalid(key, value))
}

fn invalid(key: &str, value: &str) -> CloudqlError {
    CloudqlError::Config(format!("invalid value '{}' for '{}'", value, key))
}

/// Builder for RuntimeConfig
#[derive(Debug, Default)]
pub struct RuntimeConfigBuilder {
    config: RuntimeConfig,
}

impl RuntimeConfigBuilder {
    /// Set the default provider
    pub fn provider(mut self, provider: impl Into<String>) -> Self {
        self.config.provider = provider.into();
        self
    }

    /// Set the discovery cache root
    pub fn provider_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.provider_root = root.into();
        self
    }

    /// Set the service account key file
    pub fn key_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.key_file_path = Some(path.into());
        self
    }

    /// Set the operation poll interval
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval.as_secs();
        self
    }

    /// Set the plan cache capacity
    pub fn query_cache_size(mut self, size: usize) -> Self {
        self.config.query_cache_size = size;
        self
    }

    /// Allow non-preferred service versions
    pub fn use_non_preferred_apis(mut self, enabled: bool) -> Self {
        self.config.use_non_preferred_apis = enabled;
        self
    }

    /// Set the page size hint
    pub fn max_results(mut self, max: u64) -> Self {
        self.config.max_results = max;
        self
    }

    /// Never fetch discovery documents
    pub fn offline(mut self, offline: bool) -> Self {
        self.config.offline = offline;
        self
    }

    /// Build requests without sending them
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.config.dry_run = dry_run;
        self
    }

    /// Build the configuration
    pub fn build(self) -> RuntimeConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.poll_interval(), Duration::from_secs(10));
        assert_eq!(config.provider, "google");
        assert_eq!(config.output, OutputFormat::Table);
    }

    #[test]
    fn test_set_by_key() {
        let mut config = RuntimeConfig::default();
        config.set("apirequesttimeout", "90").unwrap();
        config.set("usenonpreferredapis", "true").unwrap();
        config.set("output", "JSON").unwrap();
        assert_eq!(config.api_request_timeout, 90);
        assert!(config.use_non_preferred_apis);
        assert_eq!(config.output, OutputFormat::Json);
    }

    #[test]
    fn test_set_rejects_unknown_and_invalid() {
        let mut config = RuntimeConfig::default();
        assert!(config.set("nosuchkey", "1").is_err());
        assert!(config.set("querycachesize", "lots").is_err());
    }

    #[test]
    fn test_toml_with_compact_keys() {
        let config: RuntimeConfig =
            toml::from_str("pollinterval = 2\nprovider = \"google\"\noutput = \"csv\"").unwrap();
        assert_eq!(config.poll_interval, 2);
        assert_eq!(config.output, OutputFormat::Csv);
        assert_eq!(config.api_request_timeout, 45);
    }

    #[test]
    fn test_builder() {
        let config = RuntimeConfig::builder()
            .poll_interval(Duration::ZERO)
            .query_cache_size(4)
            .offline(true)
            .build();
        assert_eq!(config.poll_interval, 0);
        assert_eq!(config.query_cache_size, 4);
        assert!(config.offline);
    }
}
