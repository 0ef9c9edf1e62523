use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Public listen port
pub const ENV_PUBLIC_PORT: &str = "PORT";
/// State directory holding the configuration marker and the token file
pub const ENV_STATE_DIR: &str = "OPENCLAW_STATE_DIR";
/// Workspace directory handed to the gateway
pub const ENV_WORKSPACE_DIR: &str = "OPENCLAW_WORKSPACE_DIR";
/// Explicit gateway token override
pub const ENV_GATEWAY_TOKEN: &str = "OPENCLAW_GATEWAY_TOKEN";
/// Loopback port the gateway listens on
pub const ENV_GATEWAY_PORT: &str = "INTERNAL_GATEWAY_PORT";
/// Full gateway command line, split with shell quoting rules
pub const ENV_ENTRY_COMMAND: &str = "OPENCLAW_ENTRY";
/// Readiness timeout in milliseconds
pub const ENV_STARTUP_TIMEOUT_MS: &str = "GATEWAY_STARTUP_TIMEOUT_MS";
/// Loopback address of the onboarding service
pub const ENV_SETUP_UPSTREAM: &str = "SETUP_UPSTREAM";

/// Global configuration for the gateway supervisor
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    /// Public listener configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Persistent state layout
    #[serde(default)]
    pub state: StateConfig,

    /// Supervised gateway process
    #[serde(default)]
    pub gateway: GatewayConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Public port (default: 8080)
    #[serde(default = "default_listen_port")]
    pub port: u16,

    /// Bind address (default: 0.0.0.0)
    #[serde(default = "default_bind_address")]
    pub bind: String,

    /// Path prefix owned by the setup surface (default: /setup)
    #[serde(default = "default_setup_path")]
    pub setup_path: String,

    /// Loopback `host:port` of the onboarding service, if one is attached
    pub setup_upstream: Option<String>,

    /// Max seconds to wait for the gateway's response head (default: 120)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Maximum idle connections kept to the gateway (default: 10)
    #[serde(default = "default_pool_max_idle_per_host")]
    pub pool_max_idle_per_host: usize,

    /// Idle connection timeout in seconds (default: 90)
    #[serde(default = "default_pool_idle_timeout")]
    pub pool_idle_timeout_secs: u64,
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.bind, self.port)
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid bind address {}:{}: {}", self.bind, self.port, e))
    }

    /// Parsed onboarding service address
    pub fn setup_target(&self) -> anyhow::Result<Option<ProxyTarget>> {
        self.setup_upstream
            .as_deref()
            .map(|addr| {
                addr.parse::<SocketAddr>()
                    .map(ProxyTarget::new)
                    .map_err(|e| anyhow::anyhow!("Invalid setup_upstream '{}': {}", addr, e))
            })
            .transpose()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_listen_port(),
            bind: default_bind_address(),
            setup_path: default_setup_path(),
            setup_upstream: None,
            request_timeout_secs: default_request_timeout(),
            pool_max_idle_per_host: default_pool_max_idle_per_host(),
            pool_idle_timeout_secs: default_pool_idle_timeout(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StateConfig {
    /// State directory (default: ~/.openclaw)
    pub state_dir: Option<PathBuf>,

    /// Workspace directory (default: <state_dir>/workspace)
    pub workspace_dir: Option<PathBuf>,

    /// Configuration marker written by onboarding, relative to the state directory
    #[serde(default = "default_config_file")]
    pub config_file: String,

    /// Persisted gateway token, relative to the state directory
    #[serde(default = "default_token_file")]
    pub token_file: String,
}

impl StateConfig {
    pub fn state_dir(&self) -> PathBuf {
        self.state_dir.clone().unwrap_or_else(|| {
            dirs_next::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".openclaw")
        })
    }

    pub fn workspace_dir(&self) -> PathBuf {
        self.workspace_dir
            .clone()
            .unwrap_or_else(|| self.state_dir().join("workspace"))
    }

    pub fn config_path(&self) -> PathBuf {
        self.state_dir().join(&self.config_file)
    }

    pub fn token_path(&self) -> PathBuf {
        self.state_dir().join(&self.token_file)
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            state_dir: None,
            workspace_dir: None,
            config_file: default_config_file(),
            token_file: default_token_file(),
        }
    }
}

/// Configuration for the supervised gateway process
///
/// # Security Warning
///
/// `command` and `args` are executed directly with the permissions of this
/// process. Configuration files and the environment must come from a trusted
/// source.
#[derive(Debug, Deserialize, Clone)]
pub struct GatewayConfig {
    /// Program to execute
    #[serde(default = "default_gateway_command")]
    pub command: String,

    /// Arguments to pass to the command
    #[serde(default = "default_gateway_args")]
    pub args: Vec<String>,

    /// Working directory for the command
    pub working_dir: Option<String>,

    /// Extra environment variables
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Loopback address the gateway binds to
    #[serde(default = "default_gateway_host")]
    pub host: IpAddr,

    /// Port the gateway listens on
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Explicit token; takes precedence over the persisted one and is never written to disk
    pub token: Option<String>,

    /// Candidate health endpoints in priority order
    #[serde(default = "default_health_paths")]
    pub health_paths: Vec<String>,

    /// Overall readiness timeout in milliseconds
    #[serde(default = "default_startup_timeout_ms")]
    pub startup_timeout_ms: u64,

    /// Delay between readiness rounds in milliseconds
    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,

    /// Timeout for a single health request in milliseconds
    #[serde(default = "default_probe_request_timeout_ms")]
    pub probe_request_timeout_ms: u64,

    /// Grace period in seconds between SIGTERM and SIGKILL
    #[serde(default = "default_shutdown_grace_period")]
    pub shutdown_grace_period_secs: u64,
}

impl GatewayConfig {
    pub fn target(&self) -> ProxyTarget {
        ProxyTarget::new(SocketAddr::new(self.host, self.port))
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn probe_request_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_request_timeout_ms)
    }

    pub fn shutdown_grace_period(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_period_secs)
    }

    /// Replace command and args from a single shell-quoted command line
    pub fn set_command_line(&mut self, line: &str) -> anyhow::Result<()> {
        let mut words = shell_words::split(line)
            .map_err(|e| anyhow::anyhow!("Invalid gateway command line '{}': {}", line, e))?;
        if words.is_empty() {
            anyhow::bail!("Gateway command line is empty");
        }
        self.command = words.remove(0);
        self.args = words;
        Ok(())
    }

    fn validate(&self, errors: &mut Vec<String>) {
        if self.command.trim().is_empty() {
            errors.push("gateway: 'command' must not be empty".to_string());
        }
        if self.port == 0 {
            errors.push("gateway: 'port' must be greater than 0".to_string());
        }
        if !self.host.is_loopback() {
            errors.push(format!(
                "gateway: 'host' must be a loopback address, got {}",
                self.host
            ));
        }
        if self.health_paths.is_empty() {
            errors.push("gateway: 'health_paths' must list at least one path".to_string());
        }
        for path in &self.health_paths {
            if !path.starts_with('/') {
                errors.push(format!("gateway: health path '{}' must start with '/'", path));
            }
        }
        if self.probe_interval_ms == 0 {
            errors.push("gateway: 'probe_interval_ms' must be greater than 0".to_string());
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            command: default_gateway_command(),
            args: default_gateway_args(),
            working_dir: None,
            env: HashMap::new(),
            host: default_gateway_host(),
            port: default_gateway_port(),
            token: None,
            health_paths: default_health_paths(),
            startup_timeout_ms: default_startup_timeout_ms(),
            probe_interval_ms: default_probe_interval_ms(),
            probe_request_timeout_ms: default_probe_request_timeout_ms(),
            shutdown_grace_period_secs: default_shutdown_grace_period(),
        }
    }
}

/// Loopback address of the gateway; fixed for the process lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxyTarget {
    addr: SocketAddr,
}

impl ProxyTarget {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    pub fn loopback(port: u16) -> Self {
        Self::new(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port))
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Absolute URI on the target for a path and optional query
    pub fn uri(&self, path_and_query: &str) -> String {
        format!("http://{}{}", self.addr, path_and_query)
    }
}

impl fmt::Display for ProxyTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.addr)
    }
}

// Default value functions
fn default_listen_port() -> u16 {
    8080
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_setup_path() -> String {
    "/setup".to_string()
}

fn default_request_timeout() -> u64 {
    120
}

fn default_pool_max_idle_per_host() -> usize {
    10
}

fn default_pool_idle_timeout() -> u64 {
    90
}

fn default_config_file() -> String {
    "openclaw.json".to_string()
}

fn default_token_file() -> String {
    "gateway.token".to_string()
}

fn default_gateway_command() -> String {
    "openclaw".to_string()
}

fn default_gateway_args() -> Vec<String> {
    vec!["gateway".to_string(), "run".to_string()]
}

fn default_gateway_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn default_gateway_port() -> u16 {
    18789
}

fn default_health_paths() -> Vec<String> {
    vec!["/health".to_string(), "/".to_string(), "/openclaw".to_string()]
}

fn default_startup_timeout_ms() -> u64 {
    20_000
}

fn default_probe_interval_ms() -> u64 {
    250
}

fn default_probe_request_timeout_ms() -> u64 {
    1_000
}

fn default_shutdown_grace_period() -> u64 {
    10 // 10 seconds between SIGTERM and SIGKILL
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load the optional file, apply process environment overrides, then validate
    pub fn resolve(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from an environment lookup; empty values are ignored
    pub fn apply_env<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(port) = get(ENV_PUBLIC_PORT) {
            self.server.port = port
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid {}='{}': {}", ENV_PUBLIC_PORT, port, e))?;
        }
        if let Some(dir) = get(ENV_STATE_DIR) {
            self.state.state_dir = Some(PathBuf::from(dir));
        }
        if let Some(dir) = get(ENV_WORKSPACE_DIR) {
            self.state.workspace_dir = Some(PathBuf::from(dir));
        }
        if let Some(token) = get(ENV_GATEWAY_TOKEN) {
            self.gateway.token = Some(token);
        }
        if let Some(port) = get(ENV_GATEWAY_PORT) {
            self.gateway.port = port
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid {}='{}': {}", ENV_GATEWAY_PORT, port, e))?;
        }
        if let Some(line) = get(ENV_ENTRY_COMMAND) {
            self.gateway.set_command_line(&line)?;
        }
        if let Some(ms) = get(ENV_STARTUP_TIMEOUT_MS) {
            self.gateway.startup_timeout_ms = ms.parse().map_err(|e| {
                anyhow::anyhow!("Invalid {}='{}': {}", ENV_STARTUP_TIMEOUT_MS, ms, e)
            })?;
        }
        if let Some(addr) = get(ENV_SETUP_UPSTREAM) {
            self.server.setup_upstream = Some(addr);
        }

        Ok(())
    }

    /// Validate all configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut errors = Vec::new();

        if !self.server.setup_path.starts_with('/') || self.server.setup_path.len() < 2 {
            errors.push(format!(
                "server: 'setup_path' must be a non-root path starting with '/', got '{}'",
                self.server.setup_path
            ));
        }
        if let Err(e) = self.server.setup_target() {
            errors.push(format!("server: {}", e));
        }
        self.gateway.validate(&mut errors);

        if !errors.is_empty() {
            anyhow::bail!("Configuration errors:\n  - {}", errors.join("\n  - "));
        }

        Ok(())
    }
}
