use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::{Deserialize, Serialize};
use anyhow::{bail, Context, Result};
use shared::types::{CheckStrategy, ServiceDefinition};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub settings: CheckSettings,
    #[serde(default)]
    pub api: ApiConfig,
    pub services: Vec<ServiceConfig>,
    /// Legacy top-level interval from single-file server configs; overrides `settings`
    #[serde(default, alias = "checkInterval")]
    pub check_interval: Option<u64>,
    /// Legacy top-level timeout; overrides `settings`
    #[serde(default)]
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all(serialize = "camelCase"))]
pub struct CheckSettings {
    #[serde(
        default = "default_check_interval",
        alias = "refresh_interval_ms",
        alias = "checkInterval",
        alias = "refreshInterval"
    )]
    pub check_interval_ms: u64,
    #[serde(default = "default_timeout", alias = "timeout")]
    pub timeout_ms: u64,
    #[serde(default = "default_slow_threshold", alias = "slowThreshold")]
    pub slow_threshold_ms: u64,
    /// Delay between consecutive probes in serialized mode
    #[serde(default = "default_probe_spacing", alias = "probeSpacing")]
    pub probe_spacing_ms: u64,
    #[serde(default)]
    pub mode: SweepMode,
    /// Relays for intermediated checks, tried in order. Empty means the built-in list.
    #[serde(default, alias = "corsProxies", alias = "cors_proxies")]
    pub intermediaries: Vec<IntermediaryConfig>,
}

/// How probes within one sweep are scheduled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SweepMode {
    /// All services probed in parallel; the sweep ends when every probe has.
    #[default]
    Concurrent,
    /// One probe at a time, separated by `probe_spacing_ms`.
    Serialized,
}

/// How the target address is handed to an intermediary and how its answer is read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntermediaryStyle {
    /// Raw address appended to the relay URL; any success response counts.
    #[default]
    Prefix,
    /// Percent-encoded address appended; the upstream status is read from the JSON body.
    Wrapped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "IntermediaryEntry", rename_all(serialize = "camelCase"))]
pub struct IntermediaryConfig {
    pub url: String,
    pub style: IntermediaryStyle,
    /// JSON pointer to the upstream status code, for `wrapped` relays
    pub status_pointer: String,
}

/// Either a bare relay URL or a full table.
#[derive(Deserialize)]
#[serde(untagged)]
enum IntermediaryEntry {
    Url(String),
    Full {
        url: String,
        #[serde(default)]
        style: IntermediaryStyle,
        #[serde(default = "default_status_pointer")]
        status_pointer: String,
    },
}

impl From<IntermediaryEntry> for IntermediaryConfig {
    fn from(entry: IntermediaryEntry) -> Self {
        match entry {
            IntermediaryEntry::Url(url) => IntermediaryConfig::from_url(url),
            IntermediaryEntry::Full { url, style, status_pointer } => {
                IntermediaryConfig { url, style, status_pointer }
            }
        }
    }
}

impl IntermediaryConfig {
    /// Bare relay URLs are prefix style, except allorigins which wraps its answer.
    pub fn from_url(url: impl Into<String>) -> Self {
        let url = url.into();
        let style = if url.contains("allorigins") {
            IntermediaryStyle::Wrapped
        } else {
            IntermediaryStyle::Prefix
        };
        Self {
            url,
            style,
            status_pointer: default_status_pointer(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

/// A service as written in the config file. `url` is the legacy single-address form.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default, alias = "checkMethod", alias = "check_strategy")]
    pub check_method: CheckStrategy,
}

impl ServiceConfig {
    fn addresses(&self) -> Vec<String> {
        if self.urls.is_empty() {
            self.url.iter().cloned().collect()
        } else {
            self.urls.clone()
        }
    }
}

/// Names that collide with fixed paths under the status endpoint
const RESERVED_SERVICE_NAMES: &[&str] = &["hash"];

const DEFAULT_INTERMEDIARIES: &[&str] = &[
    "https://api.codetabs.com/v1/proxy?quest=",
    "https://thingproxy.freeboard.io/fetch/",
    "https://api.allorigins.win/get?url=",
];

fn default_check_interval() -> u64 {
    30_000
}

fn default_timeout() -> u64 {
    10_000
}

fn default_slow_threshold() -> u64 {
    5_000
}

fn default_probe_spacing() -> u64 {
    500
}

fn default_status_pointer() -> String {
    "/status/http_code".to_string()
}

fn default_listen() -> String {
    "[::]:3000".to_string()
}

impl Default for CheckSettings {
    fn default() -> Self {
        Self {
            check_interval_ms: default_check_interval(),
            timeout_ms: default_timeout(),
            slow_threshold_ms: default_slow_threshold(),
            probe_spacing_ms: default_probe_spacing(),
            mode: SweepMode::default(),
            intermediaries: Vec::new(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

impl CheckSettings {
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn slow_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_threshold_ms)
    }

    pub fn probe_spacing(&self) -> Duration {
        Duration::from_millis(self.probe_spacing_ms)
    }
}

impl Config {
    /// Load configuration from a TOML file, or JSON when the extension is `.json`.
    /// The result is validated and has the built-in relays filled in when none are set.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config: Config = if is_json(path) {
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        };

        if let Some(interval) = config.check_interval.take() {
            config.settings.check_interval_ms = interval;
        }
        if let Some(timeout) = config.timeout.take() {
            config.settings.timeout_ms = timeout;
        }

        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;

        if config.settings.intermediaries.is_empty() {
            config.settings.intermediaries = DEFAULT_INTERMEDIARIES
                .iter()
                .map(|url| IntermediaryConfig::from_url(*url))
                .collect();
        }

        Ok(config)
    }

    /// Reject anything that would leave the checker partially configured.
    pub fn validate(&self) -> Result<()> {
        if self.services.is_empty() {
            bail!("no services configured");
        }

        let settings = &self.settings;
        if settings.check_interval_ms == 0 {
            bail!("check_interval_ms must be greater than zero");
        }
        if settings.timeout_ms == 0 {
            bail!("timeout_ms must be greater than zero");
        }

        let mut seen = HashSet::new();
        for service in &self.services {
            if service.name.trim().is_empty() {
                bail!("service name must not be empty");
            }
            if RESERVED_SERVICE_NAMES.contains(&service.name.as_str()) {
                bail!("service name {} is reserved", service.name);
            }
            if !seen.insert(service.name.as_str()) {
                bail!("duplicate service name: {}", service.name);
            }
            let addresses = service.addresses();
            if addresses.is_empty() {
                bail!("service {} has no url or urls", service.name);
            }
            if addresses.iter().any(|a| a.trim().is_empty()) {
                bail!("service {} has an empty address", service.name);
            }
        }

        for relay in &settings.intermediaries {
            if relay.url.trim().is_empty() {
                bail!("intermediary url must not be empty");
            }
            if relay.style == IntermediaryStyle::Wrapped && !relay.status_pointer.starts_with('/') {
                bail!("status_pointer for {} must be a JSON pointer", relay.url);
            }
        }

        Ok(())
    }

    /// Immutable service definitions, in configuration order.
    pub fn service_definitions(&self) -> Vec<ServiceDefinition> {
        self.services
            .iter()
            .map(|service| ServiceDefinition {
                name: service.name.clone(),
                description: service.description.clone(),
                addresses: service.addresses(),
                check_strategy: service.check_method,
            })
            .collect()
    }
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

/// Default config path when none is given on the command line
pub fn default_path() -> PathBuf {
    PathBuf::from("statusboard.toml")
}
