use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Log level enum (replaces stringly-typed field)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

/// Log format enum (replaces stringly-typed field)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Pretty => write!(f, "pretty"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub firewall: FirewallConfig,
    #[serde(default)]
    pub bans: BanStoreConfig,
    #[serde(default)]
    pub ports: PortsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SecurityConfig {
    /// HMAC secret for capability tokens. Also settable via STREAMGATE_SECRET.
    #[serde(default)]
    pub secret_key: Option<String>,
    /// CSRF token maximum age in seconds
    #[serde(default = "default_csrf_max_age")]
    pub csrf_max_age: u64,
    /// Login attempts allowed per window before lockout
    #[serde(default = "default_login_max_attempts")]
    pub login_max_attempts: u32,
    /// Login rate-limit window in seconds
    #[serde(default = "default_login_window")]
    pub login_window: u64,
    /// Default capability token TTL in seconds
    #[serde(default = "default_token_ttl")]
    pub token_ttl: u64,
    /// Reject capability tokens presented from an IP other than the issuing one
    #[serde(default)]
    pub strict_token_ip: bool,
    /// Argon2id memory cost in KiB (default 65536 = 64 MiB)
    #[serde(default = "default_argon2_memory_cost")]
    pub argon2_memory_cost: u32,
    /// Argon2id time cost / iterations (default 4)
    #[serde(default = "default_argon2_time_cost")]
    pub argon2_time_cost: u32,
    /// Argon2id parallelism / lanes (default 2)
    #[serde(default = "default_argon2_parallelism")]
    pub argon2_parallelism: u32,
    /// Minimum length for new passwords
    #[serde(default = "default_min_password_length")]
    pub min_password_length: usize,
    /// Maximum number of tracked rate-limit keys (oldest evicted beyond this)
    #[serde(default = "default_rate_limit_max_keys")]
    pub rate_limit_max_keys: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            secret_key: None,
            csrf_max_age: default_csrf_max_age(),
            login_max_attempts: default_login_max_attempts(),
            login_window: default_login_window(),
            token_ttl: default_token_ttl(),
            strict_token_ip: false,
            argon2_memory_cost: default_argon2_memory_cost(),
            argon2_time_cost: default_argon2_time_cost(),
            argon2_parallelism: default_argon2_parallelism(),
            min_password_length: default_min_password_length(),
            rate_limit_max_keys: default_rate_limit_max_keys(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: LogLevel,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    /// Directory for category audit logs (auth.log, security.log, ...)
    #[serde(default = "default_audit_log_dir")]
    pub audit_log_dir: PathBuf,
    /// Rotation threshold per category file, in MiB
    #[serde(default = "default_audit_max_size_mb")]
    pub audit_max_size_mb: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            audit_log_dir: default_audit_log_dir(),
            audit_max_size_mb: default_audit_max_size_mb(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FirewallConfig {
    #[serde(default = "default_ufw_path")]
    pub ufw_path: PathBuf,
    #[serde(default = "default_fail2ban_client_path")]
    pub fail2ban_client_path: PathBuf,
    #[serde(default = "default_sudo_path")]
    pub sudo_path: PathBuf,
    /// Hard timeout for any external tool invocation, in seconds
    #[serde(default = "default_command_timeout")]
    pub command_timeout: u64,
}

impl Default for FirewallConfig {
    fn default() -> Self {
        Self {
            ufw_path: default_ufw_path(),
            fail2ban_client_path: default_fail2ban_client_path(),
            sudo_path: default_sudo_path(),
            command_timeout: default_command_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BanStoreConfig {
    /// Ban/whitelist state file (atomic JSON)
    #[serde(default = "default_ban_state_path")]
    pub state_path: PathBuf,
}

impl Default for BanStoreConfig {
    fn default() -> Self {
        Self {
            state_path: default_ban_state_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PortsConfig {
    /// Persisted port assignment record written at provisioning time
    #[serde(default = "default_ports_path")]
    pub config_path: PathBuf,
}

impl Default for PortsConfig {
    fn default() -> Self {
        Self {
            config_path: default_ports_path(),
        }
    }
}

fn default_csrf_max_age() -> u64 {
    3600
}

fn default_login_max_attempts() -> u32 {
    5
}

fn default_login_window() -> u64 {
    900
}

fn default_token_ttl() -> u64 {
    3600
}

fn default_argon2_memory_cost() -> u32 {
    65536
}

fn default_argon2_time_cost() -> u32 {
    4
}

fn default_argon2_parallelism() -> u32 {
    2
}

fn default_min_password_length() -> usize {
    8
}

fn default_rate_limit_max_keys() -> usize {
    100_000
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

fn default_audit_log_dir() -> PathBuf {
    PathBuf::from("/var/lib/streamgate/logs")
}

fn default_audit_max_size_mb() -> u64 {
    10
}

fn default_ufw_path() -> PathBuf {
    PathBuf::from("/usr/sbin/ufw")
}

fn default_fail2ban_client_path() -> PathBuf {
    PathBuf::from("/usr/bin/fail2ban-client")
}

fn default_sudo_path() -> PathBuf {
    PathBuf::from("/usr/bin/sudo")
}

fn default_command_timeout() -> u64 {
    30
}

fn default_ban_state_path() -> PathBuf {
    PathBuf::from("/var/lib/streamgate/bans.json")
}

fn default_ports_path() -> PathBuf {
    PathBuf::from("/var/lib/streamgate/ports.json")
}
