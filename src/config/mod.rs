pub mod types;

use anyhow::{Context, Result};
use std::path::Path;
use types::AppConfig;

/// Maximum config file size (1 MB)
const MAX_CONFIG_SIZE: u64 = 1_048_576;

/// Load and validate configuration from a TOML file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let metadata = std::fs::metadata(path)
        .with_context(|| format!("reading config metadata: {}", path.display()))?;
    if metadata.len() > MAX_CONFIG_SIZE {
        anyhow::bail!(
            "config file too large: {} bytes (max {} bytes)",
            metadata.len(),
            MAX_CONFIG_SIZE
        );
    }

    // Check file permissions on Unix (warn if group/other readable)
    check_config_file_permissions(path);

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading config: {}", path.display()))?;
    parse_config(&content)
}

/// On Unix, warn if the config file is readable by group or others,
/// since it may contain the token signing secret.
#[cfg(unix)]
fn check_config_file_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    match std::fs::metadata(path) {
        Ok(meta) => {
            let mode = meta.permissions().mode();
            if mode & 0o077 != 0 {
                tracing::warn!(
                    path = %path.display(),
                    mode = format!("{:04o}", mode & 0o7777),
                    "Config file is readable by group/others. \
                     Consider restricting permissions to 0600 (owner read/write only) \
                     since it may contain the signing secret."
                );
            }
        }
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "Could not check config file permissions"
            );
        }
    }
}

#[cfg(not(unix))]
fn check_config_file_permissions(_path: &Path) {
    // Permission checks are only available on Unix systems
}

/// Parse configuration from a TOML string
pub fn parse_config(content: &str) -> Result<AppConfig> {
    let config: AppConfig = toml::from_str(content).context("parsing TOML configuration")?;
    validate_config(&config)?;
    Ok(config)
}

/// Resolve the token signing secret: config value, then STREAMGATE_SECRET env.
pub fn resolve_secret(config: &AppConfig) -> Result<String> {
    if let Some(ref secret) = config.security.secret_key {
        if !secret.is_empty() {
            return Ok(secret.clone());
        }
    }
    match std::env::var("STREAMGATE_SECRET") {
        Ok(s) if !s.is_empty() => Ok(s),
        _ => anyhow::bail!(
            "no token signing secret configured \
             (set [security].secret_key or the STREAMGATE_SECRET env var)"
        ),
    }
}

/// Validate configuration values
fn validate_config(config: &AppConfig) -> Result<()> {
    let sec = &config.security;
    if sec.login_max_attempts == 0 {
        anyhow::bail!("security.login_max_attempts must be at least 1");
    }
    if sec.login_window == 0 {
        anyhow::bail!("security.login_window must be at least 1 second");
    }
    if sec.token_ttl == 0 {
        anyhow::bail!("security.token_ttl must be at least 1 second");
    }
    if sec.argon2_memory_cost < 8 * sec.argon2_parallelism {
        anyhow::bail!(
            "security.argon2_memory_cost must be at least 8 * parallelism KiB (got {})",
            sec.argon2_memory_cost
        );
    }
    if sec.argon2_time_cost == 0 || sec.argon2_parallelism == 0 {
        anyhow::bail!("argon2 time cost and parallelism must both be at least 1");
    }
    if sec.min_password_length < 4 {
        anyhow::bail!("security.min_password_length must be at least 4");
    }
    if config.logging.audit_max_size_mb == 0 {
        anyhow::bail!("logging.audit_max_size_mb must be at least 1");
    }
    if config.firewall.command_timeout == 0 {
        anyhow::bail!("firewall.command_timeout must be at least 1 second");
    }
    Ok(())
}
