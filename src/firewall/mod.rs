pub mod fail2ban;
pub mod runner;
pub mod ufw;

use std::net::IpAddr;
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::warn;

use crate::config::types::FirewallConfig;
use fail2ban::{Fail2ban, Fail2banStatus, JailStatus};
use runner::{CommandOutput, ProcessRunner, SystemRunner};
use ufw::{RuleAction, Ufw, UfwStatus};

/// Outcome of a firewall mutation, shaped for the admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct OpResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OpResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: Some(output.into()),
            error: None,
        }
    }

    pub fn err(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error.into()),
        }
    }

    fn from_command(out: CommandOutput) -> Self {
        if out.success() {
            Self::ok(out.combined())
        } else {
            Self {
                success: false,
                output: Some(out.stdout),
                error: Some(if out.stderr.is_empty() {
                    format!("command exited with status {:?}", out.status)
                } else {
                    out.stderr
                }),
            }
        }
    }
}

/// Aggregated view over ufw and fail2ban for the admin dashboard.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SecurityStats {
    pub ufw_installed: bool,
    pub ufw_active: bool,
    pub ufw_rule_count: usize,
    pub fail2ban_installed: bool,
    pub fail2ban_running: bool,
    pub jails: Vec<JailStatus>,
    pub total_banned: u64,
    pub currently_banned: u64,
}

/// Coordinates ufw and fail2ban behind one interface.
///
/// Mutations are serialized through one async lock so concurrent admin
/// requests cannot interleave rule changes; reads run unserialized. A ban
/// is fanned out to ufw and every jail, and partial failure is reported
/// rather than rolled back since the sinks reconverge on retry.
pub struct FirewallOrchestrator {
    runner: Arc<dyn ProcessRunner>,
    ufw: Ufw,
    ufw_path: String,
    fail2ban: Fail2ban,
    fail2ban_path: String,
    mutate: Mutex<()>,
}

impl FirewallOrchestrator {
    pub fn new(config: &FirewallConfig) -> Self {
        let runner: Arc<dyn ProcessRunner> = Arc::new(SystemRunner::new(
            config.sudo_path.to_string_lossy().into_owned(),
            config.command_timeout,
        ));
        Self::with_runner(runner, config)
    }

    pub fn with_runner(runner: Arc<dyn ProcessRunner>, config: &FirewallConfig) -> Self {
        let ufw_path = config.ufw_path.to_string_lossy().into_owned();
        let fail2ban_path = config.fail2ban_client_path.to_string_lossy().into_owned();
        Self {
            ufw: Ufw::new(Arc::clone(&runner), ufw_path.clone()),
            fail2ban: Fail2ban::new(Arc::clone(&runner), fail2ban_path.clone()),
            runner,
            ufw_path,
            fail2ban_path,
            mutate: Mutex::new(()),
        }
    }

    fn ufw_installed(&self) -> bool {
        self.runner.is_installed(&self.ufw_path)
    }

    fn fail2ban_installed(&self) -> bool {
        self.runner.is_installed(&self.fail2ban_path)
    }

    pub async fn ufw_status(&self) -> Result<UfwStatus> {
        self.ufw.status().await
    }

    pub async fn fail2ban_status(&self) -> Result<Fail2banStatus> {
        self.fail2ban.status().await
    }

    pub async fn jail_status(&self, jail: &str) -> Result<JailStatus> {
        self.fail2ban.jail_status(jail).await
    }

    pub async fn enable_ufw(&self) -> OpResult {
        if !self.ufw_installed() {
            return OpResult::err("ufw is not installed");
        }
        let _guard = self.mutate.lock().await;
        self.op(self.ufw.enable().await)
    }

    pub async fn disable_ufw(&self) -> OpResult {
        if !self.ufw_installed() {
            return OpResult::err("ufw is not installed");
        }
        let _guard = self.mutate.lock().await;
        self.op(self.ufw.disable().await)
    }

    pub async fn add_rule(
        &self,
        action: RuleAction,
        port: u16,
        proto: &str,
        source: Option<&str>,
    ) -> OpResult {
        if !self.ufw_installed() {
            return OpResult::err("ufw is not installed");
        }
        let _guard = self.mutate.lock().await;
        self.op(self.ufw.add_rule(action, port, proto, source).await)
    }

    pub async fn delete_rule(&self, action: RuleAction, port: u16, proto: &str) -> OpResult {
        if !self.ufw_installed() {
            return OpResult::err("ufw is not installed");
        }
        let _guard = self.mutate.lock().await;
        self.op(self.ufw.delete_rule(action, port, proto).await)
    }

    /// Block an address in ufw and register it with every jail. The ufw
    /// rule is the authoritative block; jail registration failures degrade
    /// to a warning in the result.
    pub async fn ban_ip(&self, ip: IpAddr) -> OpResult {
        if !self.ufw_installed() {
            return OpResult::err("ufw is not installed");
        }
        let _guard = self.mutate.lock().await;
        let ufw_result = match self.ufw.ban_ip(ip).await {
            Ok(out) if out.success() => out,
            Ok(out) => return OpResult::from_command(out),
            Err(e) => return OpResult::err(e.to_string()),
        };

        let failures = self.for_each_jail(|jail| format!("jail {}", jail), ip, true).await;
        if failures.is_empty() {
            OpResult::ok(ufw_result.combined())
        } else {
            OpResult {
                success: true,
                output: Some(ufw_result.combined()),
                error: Some(format!("ban not registered in: {}", failures.join(", "))),
            }
        }
    }

    pub async fn unban_ip(&self, ip: IpAddr) -> OpResult {
        if !self.ufw_installed() {
            return OpResult::err("ufw is not installed");
        }
        let _guard = self.mutate.lock().await;
        let ufw_result = match self.ufw.unban_ip(ip).await {
            Ok(out) => out,
            Err(e) => return OpResult::err(e.to_string()),
        };
        let failures = self.for_each_jail(|jail| format!("jail {}", jail), ip, false).await;
        let mut result = OpResult::from_command(ufw_result);
        if !failures.is_empty() {
            result.error = Some(format!("unban not applied in: {}", failures.join(", ")));
        }
        result
    }

    pub async fn reload_fail2ban(&self) -> OpResult {
        if !self.fail2ban_installed() {
            return OpResult::err("fail2ban is not installed");
        }
        let _guard = self.mutate.lock().await;
        self.op(self.fail2ban.reload().await)
    }

    /// Dashboard rollup. Unreachable jails are skipped with a warning so a
    /// stopped fail2ban does not blank the whole page.
    pub async fn security_stats(&self) -> SecurityStats {
        let mut stats = SecurityStats {
            ufw_installed: self.ufw_installed(),
            fail2ban_installed: self.fail2ban_installed(),
            ..SecurityStats::default()
        };
        if stats.ufw_installed {
            match self.ufw.status().await {
                Ok(status) => {
                    stats.ufw_active = status.active;
                    stats.ufw_rule_count = status.rules.len();
                }
                Err(e) => warn!(error = %e, "Failed to read ufw status"),
            }
        }
        if !stats.fail2ban_installed {
            return stats;
        }
        let jails = match self.fail2ban.status().await {
            Ok(s) => {
                stats.fail2ban_running = true;
                s.jails
            }
            Err(e) => {
                warn!(error = %e, "Failed to read fail2ban status");
                Vec::new()
            }
        };
        for jail in &jails {
            match self.fail2ban.jail_status(jail).await {
                Ok(js) => {
                    stats.total_banned += js.total_banned;
                    stats.currently_banned += js.currently_banned;
                    stats.jails.push(js);
                }
                Err(e) => warn!(jail = %jail, error = %e, "Failed to read jail status"),
            }
        }
        stats
    }

    async fn for_each_jail(
        &self,
        describe: impl Fn(&str) -> String,
        ip: IpAddr,
        ban: bool,
    ) -> Vec<String> {
        let jails = match self.fail2ban.status().await {
            Ok(s) => s.jails,
            Err(e) => return vec![format!("fail2ban status: {}", e)],
        };
        let mut failures = Vec::new();
        for jail in &jails {
            let result = if ban {
                self.fail2ban.ban_in_jail(jail, ip).await
            } else {
                self.fail2ban.unban_from_jail(jail, ip).await
            };
            match result {
                Ok(out) if out.success() => {}
                Ok(_) | Err(_) => {
                    warn!(jail = %jail, ip = %ip, "Jail update failed");
                    failures.push(describe(jail));
                }
            }
        }
        failures
    }

    fn op(&self, result: Result<CommandOutput>) -> OpResult {
        match result {
            Ok(out) => OpResult::from_command(out),
            Err(e) => OpResult::err(e.to_string()),
        }
    }
}
