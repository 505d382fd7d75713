use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;

use anyhow::{bail, Result};
use serde::Serialize;
use tracing::{info, warn};

use super::runner::{CommandOutput, ProcessRunner};

#[derive(Debug, Clone, Default, Serialize)]
pub struct Fail2banStatus {
    pub jails: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct JailStatus {
    pub name: String,
    pub currently_failed: u64,
    pub total_failed: u64,
    pub currently_banned: u64,
    pub total_banned: u64,
    pub banned_ips: Vec<String>,
}

/// Wrapper over `fail2ban-client`. Jail names are validated before use so
/// operator input cannot smuggle extra arguments.
pub struct Fail2ban {
    runner: Arc<dyn ProcessRunner>,
    client_path: String,
}

impl Fail2ban {
    pub fn new(runner: Arc<dyn ProcessRunner>, client_path: impl Into<String>) -> Self {
        Self {
            runner,
            client_path: client_path.into(),
        }
    }

    pub async fn status(&self) -> Result<Fail2banStatus> {
        let out = self.run(&["status"]).await?;
        if !out.success() {
            bail!("fail2ban-client status failed: {}", out.stderr.trim());
        }
        Ok(parse_status(&out.stdout))
    }

    pub async fn jail_status(&self, jail: &str) -> Result<JailStatus> {
        validate_jail_name(jail)?;
        let out = self.run(&["status", jail]).await?;
        if !out.success() {
            bail!("no such jail: {}", jail);
        }
        Ok(parse_jail_status(jail, &out.stdout))
    }

    pub async fn ban_in_jail(&self, jail: &str, ip: IpAddr) -> Result<CommandOutput> {
        validate_jail_name(jail)?;
        let ip = ip.to_string();
        let out = self.run(&["set", jail, "banip", &ip]).await?;
        info!(jail = %jail, ip = %ip, success = out.success(), "fail2ban ban requested");
        Ok(out)
    }

    pub async fn unban_from_jail(&self, jail: &str, ip: IpAddr) -> Result<CommandOutput> {
        validate_jail_name(jail)?;
        let ip = ip.to_string();
        self.run(&["set", jail, "unbanip", &ip]).await
    }

    pub async fn reload(&self) -> Result<CommandOutput> {
        let out = self.run(&["reload"]).await?;
        info!(success = out.success(), "fail2ban reload requested");
        Ok(out)
    }

    /// Banned addresses across every jail, mapped to the jails holding
    /// them. Jails that fail to report are skipped with a warning.
    pub async fn all_banned(&self) -> Result<BTreeMap<String, Vec<String>>> {
        let status = self.status().await?;
        let mut banned: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for jail in &status.jails {
            match self.jail_status(jail).await {
                Ok(js) => {
                    for ip in js.banned_ips {
                        banned.entry(ip).or_default().push(jail.clone());
                    }
                }
                Err(e) => warn!(jail = %jail, error = %e, "Failed to read jail status"),
            }
        }
        Ok(banned)
    }

    async fn run(&self, args: &[&str]) -> Result<CommandOutput> {
        self.runner.run(&self.client_path, args).await
    }
}

fn validate_jail_name(jail: &str) -> Result<()> {
    let ok = !jail.is_empty()
        && jail
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
    if !ok {
        bail!("invalid jail name: {:?}", jail);
    }
    Ok(())
}

/// Pull the value after `label:` from a `fail2ban-client` tree line, e.g.
/// `` `- Jail list:\tsshd, nginx ``.
fn field<'a>(output: &'a str, label: &str) -> Option<&'a str> {
    output.lines().find_map(|line| {
        let idx = line.find(label)?;
        Some(line[idx + label.len()..].trim_start_matches(':').trim())
    })
}

fn field_u64(output: &str, label: &str) -> u64 {
    field(output, label)
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

pub fn parse_status(output: &str) -> Fail2banStatus {
    let jails = field(output, "Jail list")
        .map(|list| {
            list.split(',')
                .map(|j| j.trim().to_string())
                .filter(|j| !j.is_empty())
                .collect()
        })
        .unwrap_or_default();
    Fail2banStatus { jails }
}

pub fn parse_jail_status(name: &str, output: &str) -> JailStatus {
    let banned_ips = field(output, "Banned IP list")
        .map(|list| {
            list.split_whitespace()
                .map(|ip| ip.to_string())
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    JailStatus {
        name: name.to_string(),
        currently_failed: field_u64(output, "Currently failed"),
        total_failed: field_u64(output, "Total failed"),
        currently_banned: field_u64(output, "Currently banned"),
        total_banned: field_u64(output, "Total banned"),
        banned_ips,
    }
}
