use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use crate::audit::AccessLogger;
use crate::bans::BanStore;
use crate::firewall::ufw::RuleAction;
use crate::firewall::{FirewallOrchestrator, OpResult};
use crate::session::SessionContext;
use crate::token::TokenService;

fn default_proto() -> String {
    "tcp".to_string()
}

/// Admin requests, tagged by `action` in the JSON body.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AdminAction {
    EnableUfw,
    DisableUfw,
    AddUfwRule {
        port: u16,
        #[serde(default = "default_proto")]
        proto: String,
        #[serde(default)]
        source: Option<String>,
        #[serde(default)]
        deny: bool,
    },
    DeleteUfwRule {
        port: u16,
        #[serde(default = "default_proto")]
        proto: String,
        #[serde(default)]
        deny: bool,
    },
    BanIp {
        ip: String,
        #[serde(default)]
        reason: String,
        #[serde(default)]
        duration_secs: Option<u64>,
    },
    UnbanIp {
        ip: String,
    },
    WhitelistIp {
        ip: String,
        #[serde(default)]
        reason: String,
    },
    ReloadFail2ban,
    GetStats,
    GetJailStatus {
        jail: String,
    },
}

impl AdminAction {
    fn name(&self) -> &'static str {
        match self {
            AdminAction::EnableUfw => "enable_ufw",
            AdminAction::DisableUfw => "disable_ufw",
            AdminAction::AddUfwRule { .. } => "add_ufw_rule",
            AdminAction::DeleteUfwRule { .. } => "delete_ufw_rule",
            AdminAction::BanIp { .. } => "ban_ip",
            AdminAction::UnbanIp { .. } => "unban_ip",
            AdminAction::WhitelistIp { .. } => "whitelist_ip",
            AdminAction::ReloadFail2ban => "reload_fail2ban",
            AdminAction::GetStats => "get_stats",
            AdminAction::GetJailStatus { .. } => "get_jail_status",
        }
    }

    /// Security-event classification for mutating actions. Read-only
    /// actions return `None` and stay out of the security log.
    fn security_event(&self) -> Option<(&'static str, String)> {
        match self {
            AdminAction::EnableUfw => Some(("FIREWALL_ENABLED", String::new())),
            AdminAction::DisableUfw => Some(("FIREWALL_DISABLED", String::new())),
            AdminAction::AddUfwRule { port, proto, .. } => {
                Some(("FIREWALL_RULE_ADDED", format!("{}/{}", port, proto)))
            }
            AdminAction::DeleteUfwRule { port, proto, .. } => {
                Some(("FIREWALL_RULE_DELETED", format!("{}/{}", port, proto)))
            }
            AdminAction::BanIp { ip, .. } => Some(("IP_BANNED", ip.clone())),
            AdminAction::UnbanIp { ip } => Some(("IP_UNBANNED", ip.clone())),
            AdminAction::WhitelistIp { ip, .. } => Some(("IP_WHITELISTED", ip.clone())),
            AdminAction::ReloadFail2ban => Some(("FAIL2BAN_RELOADED", String::new())),
            AdminAction::GetStats | AdminAction::GetJailStatus { .. } => None,
        }
    }
}

/// Unified response envelope for consistent JSON output.
#[derive(Debug, Serialize)]
pub struct AdminResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AdminResponse {
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }

    fn from_op(op: OpResult) -> Self {
        Self {
            success: op.success,
            data: op.output.map(|o| json!({ "output": o })),
            error: op.error,
        }
    }
}

/// Dispatches admin actions after the CSRF gate.
///
/// Every request validates the session's CSRF token before touching any
/// subsystem. Bans write to two sinks, the ban store first and then the
/// firewall, and a lagging firewall is reported in the response rather
/// than unwinding the store.
pub struct AdminService {
    tokens: Arc<TokenService>,
    firewall: Arc<FirewallOrchestrator>,
    bans: Arc<BanStore>,
    audit: Arc<AccessLogger>,
    csrf_max_age: Duration,
}

impl AdminService {
    pub fn new(
        tokens: Arc<TokenService>,
        firewall: Arc<FirewallOrchestrator>,
        bans: Arc<BanStore>,
        audit: Arc<AccessLogger>,
        csrf_max_age: Duration,
    ) -> Self {
        Self {
            tokens,
            firewall,
            bans,
            audit,
            csrf_max_age,
        }
    }

    pub async fn dispatch(
        &self,
        session: &mut SessionContext,
        csrf_token: &str,
        client_ip: &str,
        action: AdminAction,
    ) -> AdminResponse {
        if !self
            .tokens
            .validate_csrf(session, csrf_token, self.csrf_max_age)
        {
            warn!(ip = %client_ip, action = action.name(), "Admin request with invalid CSRF token");
            self.audit
                .log_security_event("CSRF_FAILURE", client_ip, action.name(), "");
            return AdminResponse::err("Invalid CSRF token");
        }

        let action_name = action.name();
        let security_event = action.security_event();
        let response = self.handle(client_ip, action).await;
        // Failed actions are logged too; the trail records attempts
        let detail = match (response.success, &response.error) {
            (true, None) => "ok".to_string(),
            (true, Some(e)) => format!("ok with warning: {}", e),
            (false, _) => format!(
                "failed: {}",
                response.error.as_deref().unwrap_or("unknown error")
            ),
        };
        self.audit.log_admin_action(action_name, client_ip, &detail);
        if let Some((kind, target)) = security_event {
            self.audit.log(
                crate::audit::Category::Security,
                kind,
                &[
                    ("ip", client_ip.to_string()),
                    ("target", target),
                    ("detail", detail),
                ],
            );
        }
        response
    }

    async fn handle(&self, client_ip: &str, action: AdminAction) -> AdminResponse {
        match action {
            AdminAction::EnableUfw => AdminResponse::from_op(self.firewall.enable_ufw().await),
            AdminAction::DisableUfw => AdminResponse::from_op(self.firewall.disable_ufw().await),
            AdminAction::AddUfwRule {
                port,
                proto,
                source,
                deny,
            } => {
                let rule_action = if deny { RuleAction::Deny } else { RuleAction::Allow };
                AdminResponse::from_op(
                    self.firewall
                        .add_rule(rule_action, port, &proto, source.as_deref())
                        .await,
                )
            }
            AdminAction::DeleteUfwRule { port, proto, deny } => {
                let rule_action = if deny { RuleAction::Deny } else { RuleAction::Allow };
                AdminResponse::from_op(self.firewall.delete_rule(rule_action, port, &proto).await)
            }
            AdminAction::BanIp {
                ip,
                reason,
                duration_secs,
            } => self.ban_ip(client_ip, &ip, &reason, duration_secs).await,
            AdminAction::UnbanIp { ip } => self.unban_ip(&ip).await,
            AdminAction::WhitelistIp { ip, reason } => {
                self.whitelist_ip(client_ip, &ip, &reason).await
            }
            AdminAction::ReloadFail2ban => {
                AdminResponse::from_op(self.firewall.reload_fail2ban().await)
            }
            AdminAction::GetStats => self.get_stats().await,
            AdminAction::GetJailStatus { jail } => match self.firewall.jail_status(&jail).await {
                Ok(js) => AdminResponse::ok(json!(js)),
                Err(e) => AdminResponse::err(e.to_string()),
            },
        }
    }

    async fn ban_ip(
        &self,
        client_ip: &str,
        target: &str,
        reason: &str,
        duration_secs: Option<u64>,
    ) -> AdminResponse {
        let addr: IpAddr = match target.trim().parse() {
            Ok(ip) => ip,
            Err(_) => return AdminResponse::err(format!("invalid IP address: {}", target)),
        };
        let duration = duration_secs.map(Duration::from_secs);
        let record = match self.bans.ban(target, reason, duration, client_ip) {
            Ok(r) => r,
            Err(e) => return AdminResponse::err(e.to_string()),
        };

        let op = self.firewall.ban_ip(addr).await;
        AdminResponse {
            success: true,
            data: Some(json!({ "ban": record })),
            // Firewall lag is visible to the operator but the ban stands
            error: op.error.or_else(|| {
                if op.success {
                    None
                } else {
                    Some("firewall rule not applied".to_string())
                }
            }),
        }
    }

    async fn unban_ip(&self, target: &str) -> AdminResponse {
        let addr: IpAddr = match target.trim().parse() {
            Ok(ip) => ip,
            Err(_) => return AdminResponse::err(format!("invalid IP address: {}", target)),
        };
        let removed = match self.bans.unban(target) {
            Ok(r) => r,
            Err(e) => return AdminResponse::err(e.to_string()),
        };
        let op = self.firewall.unban_ip(addr).await;
        AdminResponse {
            success: true,
            data: Some(json!({ "removed": removed })),
            error: op.error,
        }
    }

    // Whitelisting is a store-level decision; standing firewall rules are
    // left for the operator to clear explicitly with unban.
    async fn whitelist_ip(&self, client_ip: &str, target: &str, reason: &str) -> AdminResponse {
        let record = match self.bans.whitelist(target, reason, client_ip) {
            Ok(r) => r,
            Err(e) => return AdminResponse::err(e.to_string()),
        };
        AdminResponse::ok(json!({ "whitelisted": record }))
    }

    async fn get_stats(&self) -> AdminResponse {
        if let Err(e) = self.bans.clean_expired() {
            warn!(error = %e, "Failed to clean expired bans");
        }
        let stats = self.firewall.security_stats().await;
        AdminResponse::ok(json!({
            "firewall": stats,
            "bans": self.bans.active_bans(),
            "whitelist": self.bans.whitelisted(),
            "recent_security_events": self.audit.recent_events(crate::audit::Category::Security, 20),
        }))
    }
}
