//! Configuration loading, env overrides, and validation.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Top-level Foxden configuration.
///
/// Loadable from a JSON5 file; every recognized option can also be set (and
/// overridden) through `FOXDEN_*` / `PROXY_*` environment variables, which is
/// how container deployments configure the service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool: Option<PoolConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<StatusConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker: Option<WorkerConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxyConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

/// Worker pool sizing and timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Number of worker slots (default: 3).
    #[serde(default = "default_pool_size")]
    pub size: usize,

    /// First fixed external port; slot `i` publishes on `base_port + i`
    /// (default: 3001).
    #[serde(default = "default_base_port")]
    pub base_port: u16,

    /// Delay between consecutive slot launches in ms (default: 1500).
    #[serde(default = "default_launch_delay_ms")]
    pub launch_delay_ms: u64,

    /// How long to wait for a worker to advertise its endpoint in ms
    /// (default: 30000).
    #[serde(default = "default_discovery_timeout_ms")]
    pub discovery_timeout_ms: u64,

    /// Grace period for SIGTERM before escalating to kill, in ms
    /// (default: 5000).
    #[serde(default = "default_terminate_grace_ms")]
    pub terminate_grace_ms: u64,

    /// Path of the plain-text file holding the primary slot's published
    /// endpoint (default: /tmp/foxden-endpoint).
    #[serde(default = "default_endpoint_file")]
    pub endpoint_file: String,

    /// External TCP forwarding utility (default: "socat").
    #[serde(default = "default_forwarder")]
    pub forwarder: String,
}

fn default_pool_size() -> usize {
    3
}

fn default_base_port() -> u16 {
    3001
}

fn default_launch_delay_ms() -> u64 {
    1500
}

fn default_discovery_timeout_ms() -> u64 {
    30_000
}

fn default_terminate_grace_ms() -> u64 {
    5_000
}

fn default_endpoint_file() -> String {
    "/tmp/foxden-endpoint".into()
}

fn default_forwarder() -> String {
    "socat".into()
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: default_pool_size(),
            base_port: default_base_port(),
            launch_delay_ms: default_launch_delay_ms(),
            discovery_timeout_ms: default_discovery_timeout_ms(),
            terminate_grace_ms: default_terminate_grace_ms(),
            endpoint_file: default_endpoint_file(),
            forwarder: default_forwarder(),
        }
    }
}

/// Status service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusConfig {
    #[serde(default = "default_status_port")]
    pub port: u16,

    #[serde(default = "default_bind")]
    pub bind: String,

    /// Host (or host:port) substituted into listed endpoints so external
    /// callers get a reachable address instead of loopback.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advertise_host: Option<String>,
}

fn default_status_port() -> u16 {
    8080
}

fn default_bind() -> String {
    "0.0.0.0".into()
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            port: default_status_port(),
            bind: default_bind(),
            advertise_host: None,
        }
    }
}

/// Launch configuration for the browser engine subprocess.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Program to execute (default: "python3").
    #[serde(default = "default_worker_program")]
    pub program: String,

    /// Arguments before any flags foxden appends
    /// (default: ["-m", "camoufox", "server"]).
    #[serde(default = "default_worker_args")]
    pub args: Vec<String>,

    /// Run the engine headless (default: true).
    #[serde(default = "default_true")]
    pub headless: bool,

    /// Ask the engine to match its fingerprint geography to the proxy exit.
    /// Only honored when a proxy upstream is configured.
    #[serde(default)]
    pub geoip: bool,
}

fn default_worker_program() -> String {
    "python3".into()
}

fn default_worker_args() -> Vec<String> {
    vec!["-m".into(), "camoufox".into(), "server".into()]
}

fn default_true() -> bool {
    true
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            program: default_worker_program(),
            args: default_worker_args(),
            headless: default_true(),
            geoip: false,
        }
    }
}

/// Upstream proxy the workers egress through.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub server: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username_env: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_env: Option<String>,
}

impl ProxyConfig {
    pub fn resolve_username(&self) -> Option<String> {
        resolve_secret_field(&self.username, &self.username_env)
    }

    pub fn resolve_password(&self) -> Option<String> {
        resolve_secret_field(&self.password, &self.password_env)
    }

    /// Username with the slot's sticky-session token embedded, so repeated
    /// connections from one slot route through a consistent egress point.
    pub fn sticky_username(&self, slot_id: &str) -> Option<String> {
        self.resolve_username()
            .map(|user| format!("{user}-session-{}", session_token(slot_id)))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

fn default_log_format() -> String {
    "plain".into()
}

/// Resolve a secret: check the direct value first, then the env-var reference.
pub fn resolve_secret_field(direct: &Option<String>, env_var: &Option<String>) -> Option<String> {
    if let Some(val) = direct {
        if !val.is_empty() {
            return Some(val.clone());
        }
    }
    if let Some(env) = env_var {
        if let Ok(val) = std::env::var(env) {
            if !val.is_empty() {
                return Some(val);
            }
        }
    }
    None
}

/// Deterministic, bounded-length session token for a slot id.
pub fn session_token(slot_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(slot_id.as_bytes());
    let digest = hasher.finalize();
    let hex = format!("{digest:x}");
    hex[..12].to_string()
}

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> String {
    let re = regex::Regex::new(r"\$\{([^}]+)\}").unwrap();
    re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_default()
    })
    .into_owned()
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    /// A missing file yields the defaults.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(crate::error::FoxdenError::Io)?;
        let substituted = substitute_env_vars(&raw);

        let config: Config = json5::from_str(&substituted)
            .map_err(|e| crate::error::FoxdenError::Config(e.to_string()))?;

        Ok(config)
    }

    /// Overlay the recognized environment variables on top of the loaded
    /// config. This is the surface container deployments use.
    pub fn apply_env(&mut self) {
        let pool = self.pool.get_or_insert_with(PoolConfig::default);
        if let Some(v) = env_parse::<usize>("FOXDEN_POOL_SIZE") {
            pool.size = v;
        }
        if let Some(v) = env_parse::<u16>("FOXDEN_BASE_PORT") {
            pool.base_port = v;
        }
        if let Some(v) = env_var("FOXDEN_ENDPOINT_FILE") {
            pool.endpoint_file = v;
        }

        let status = self.status.get_or_insert_with(StatusConfig::default);
        if let Some(v) = env_parse::<u16>("FOXDEN_STATUS_PORT") {
            status.port = v;
        }
        if let Some(v) = env_var("FOXDEN_ADVERTISE_HOST") {
            status.advertise_host = Some(v);
        }

        let worker = self.worker.get_or_insert_with(WorkerConfig::default);
        if let Some(v) = env_bool("FOXDEN_HEADLESS") {
            worker.headless = v;
        }
        if let Some(v) = env_bool("FOXDEN_GEOIP") {
            worker.geoip = v;
        }

        if let Some(server) = env_var("PROXY_SERVER") {
            let proxy = self.proxy.get_or_insert_with(ProxyConfig::default);
            proxy.server = server;
            if let Some(user) = env_var("PROXY_USERNAME") {
                proxy.username = Some(user);
            }
            if let Some(pass) = env_var("PROXY_PASSWORD") {
                proxy.password = Some(pass);
            }
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool.as_ref().map(|p| p.size).unwrap_or_else(default_pool_size)
    }

    pub fn base_port(&self) -> u16 {
        self.pool
            .as_ref()
            .map(|p| p.base_port)
            .unwrap_or_else(default_base_port)
    }

    pub fn launch_delay(&self) -> Duration {
        Duration::from_millis(
            self.pool
                .as_ref()
                .map(|p| p.launch_delay_ms)
                .unwrap_or_else(default_launch_delay_ms),
        )
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(
            self.pool
                .as_ref()
                .map(|p| p.discovery_timeout_ms)
                .unwrap_or_else(default_discovery_timeout_ms),
        )
    }

    pub fn terminate_grace(&self) -> Duration {
        Duration::from_millis(
            self.pool
                .as_ref()
                .map(|p| p.terminate_grace_ms)
                .unwrap_or_else(default_terminate_grace_ms),
        )
    }

    pub fn endpoint_file(&self) -> String {
        self.pool
            .as_ref()
            .map(|p| p.endpoint_file.clone())
            .unwrap_or_else(default_endpoint_file)
    }

    pub fn forwarder(&self) -> String {
        self.pool
            .as_ref()
            .map(|p| p.forwarder.clone())
            .unwrap_or_else(default_forwarder)
    }

    pub fn status_port(&self) -> u16 {
        self.status
            .as_ref()
            .map(|s| s.port)
            .unwrap_or_else(default_status_port)
    }

    pub fn status_bind(&self) -> String {
        self.status
            .as_ref()
            .map(|s| s.bind.clone())
            .unwrap_or_else(default_bind)
    }

    pub fn advertise_host(&self) -> Option<String> {
        self.status.as_ref().and_then(|s| s.advertise_host.clone())
    }

    pub fn worker(&self) -> WorkerConfig {
        self.worker.clone().unwrap_or_default()
    }

    /// GeoIP is only meaningful behind a proxy; without one it is disabled.
    pub fn geoip_enabled(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| w.geoip) && self.proxy.is_some()
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        if self.pool_size() == 0 {
            errors.push("Pool size must be at least 1".to_string());
        }

        if self.status_port() == 0 {
            errors.push("Status port cannot be 0".to_string());
        }

        if self.base_port() < 1024 {
            warnings.push(format!(
                "Base port {} is in the privileged range",
                self.base_port()
            ));
        }

        let base = self.base_port() as u32;
        let status = self.status_port() as u32;
        if status >= base && status < base + self.pool_size() as u32 {
            warnings.push(format!(
                "Status port {status} falls inside the pool's external port range"
            ));
        }

        if self.worker.as_ref().is_some_and(|w| w.geoip) && self.proxy.is_none() {
            warnings.push("GeoIP requested but no proxy configured - disabling GeoIP".to_string());
        }

        if let Some(proxy) = &self.proxy {
            if proxy.server.is_empty() {
                errors.push("Proxy configured with an empty server URL".to_string());
            }
            if proxy.resolve_username().is_some() && proxy.resolve_password().is_none() {
                warnings.push("Proxy username set without a password".to_string());
            }
        }

        (warnings, errors)
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env_var(name).and_then(|v| v.parse().ok())
}

fn env_bool(name: &str) -> Option<bool> {
    env_var(name).map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
}
