use std::net::IpAddr;
use std::sync::Arc;

use anyhow::{bail, Result};
use ipnet::IpNet;
use serde::Serialize;
use tracing::info;

use super::runner::{CommandOutput, ProcessRunner};

/// Action column of a ufw rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RuleAction {
    Allow,
    Deny,
    Reject,
    Limit,
}

impl RuleAction {
    fn parse(token: &str) -> Option<Self> {
        match token {
            "ALLOW" => Some(RuleAction::Allow),
            "DENY" => Some(RuleAction::Deny),
            "REJECT" => Some(RuleAction::Reject),
            "LIMIT" => Some(RuleAction::Limit),
            _ => None,
        }
    }

    fn as_command(&self) -> &'static str {
        match self {
            RuleAction::Allow => "allow",
            RuleAction::Deny => "deny",
            RuleAction::Reject => "reject",
            RuleAction::Limit => "limit",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UfwRule {
    /// Destination column, e.g. `7777/tcp` or `Anywhere`
    pub to: String,
    pub action: RuleAction,
    /// Source column, e.g. `Anywhere` or `1.2.3.4`
    pub from: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UfwStatus {
    pub active: bool,
    pub rules: Vec<UfwRule>,
}

/// Thin wrapper over the `ufw` CLI. All inputs are validated before they
/// reach the command line; the runner prepends sudo.
pub struct Ufw {
    runner: Arc<dyn ProcessRunner>,
    ufw_path: String,
}

impl Ufw {
    pub fn new(runner: Arc<dyn ProcessRunner>, ufw_path: impl Into<String>) -> Self {
        Self {
            runner,
            ufw_path: ufw_path.into(),
        }
    }

    pub async fn status(&self) -> Result<UfwStatus> {
        let out = self.run(&["status"]).await?;
        Ok(parse_status(&out.stdout))
    }

    pub async fn enable(&self) -> Result<CommandOutput> {
        // --force skips the interactive ssh-disruption prompt
        let out = self.run(&["--force", "enable"]).await?;
        info!(success = out.success(), "ufw enable requested");
        Ok(out)
    }

    pub async fn disable(&self) -> Result<CommandOutput> {
        let out = self.run(&["disable"]).await?;
        info!(success = out.success(), "ufw disable requested");
        Ok(out)
    }

    /// Add a port rule, optionally restricted to a source IP or CIDR.
    pub async fn add_rule(
        &self,
        action: RuleAction,
        port: u16,
        proto: &str,
        source: Option<&str>,
    ) -> Result<CommandOutput> {
        let spec = rule_spec(port, proto)?;
        match source {
            Some(src) => {
                let src = validate_source(src)?;
                self.run(&[
                    action.as_command(),
                    "from",
                    &src,
                    "to",
                    "any",
                    "port",
                    &port.to_string(),
                    "proto",
                    proto,
                ])
                .await
            }
            None => self.run(&[action.as_command(), &spec]).await,
        }
    }

    pub async fn delete_rule(
        &self,
        action: RuleAction,
        port: u16,
        proto: &str,
    ) -> Result<CommandOutput> {
        let spec = rule_spec(port, proto)?;
        self.run(&["delete", action.as_command(), &spec]).await
    }

    /// Insert a deny rule at position 1 so it beats existing allows.
    pub async fn ban_ip(&self, ip: IpAddr) -> Result<CommandOutput> {
        let ip = ip.to_string();
        let out = self
            .run(&["insert", "1", "deny", "from", &ip, "to", "any"])
            .await?;
        info!(ip = %ip, success = out.success(), "ufw ban requested");
        Ok(out)
    }

    pub async fn unban_ip(&self, ip: IpAddr) -> Result<CommandOutput> {
        let ip = ip.to_string();
        self.run(&["delete", "deny", "from", &ip, "to", "any"]).await
    }

    async fn run(&self, args: &[&str]) -> Result<CommandOutput> {
        self.runner.run(&self.ufw_path, args).await
    }
}

fn rule_spec(port: u16, proto: &str) -> Result<String> {
    if port == 0 {
        bail!("port must be 1-65535");
    }
    if proto != "tcp" && proto != "udp" {
        bail!("protocol must be tcp or udp, got {:?}", proto);
    }
    Ok(format!("{}/{}", port, proto))
}

fn validate_source(source: &str) -> Result<String> {
    if source.parse::<IpNet>().is_ok() || source.parse::<IpAddr>().is_ok() {
        Ok(source.to_string())
    } else {
        bail!("invalid source address: {:?}", source)
    }
}

/// Parse `ufw status` output. Inactive firewalls report no rules; header
/// and separator lines are skipped.
pub fn parse_status(output: &str) -> UfwStatus {
    let mut status = UfwStatus::default();
    for line in output.lines() {
        let line = line.trim();
        if let Some(state) = line.strip_prefix("Status:") {
            status.active = state.trim() == "active";
            continue;
        }
        let tokens: Vec<&str> = line.split_whitespace().collect();
        // The destination may carry a trailing "(v6)" marker, so locate the
        // action token instead of assuming a fixed column
        let Some(pos) = tokens.iter().position(|t| RuleAction::parse(t).is_some()) else {
            continue;
        };
        if pos == 0 {
            continue;
        }
        let action = RuleAction::parse(tokens[pos]).unwrap_or(RuleAction::Allow);
        let to = tokens[..pos].join(" ");
        // "ALLOW IN" style output carries a direction token before the source
        let rest = match &tokens[pos + 1..] {
            ["IN", rest @ ..] | ["OUT", rest @ ..] => rest,
            other => other,
        };
        let from = rest.join(" ");
        status.rules.push(UfwRule {
            to,
            action,
            from: if from.is_empty() {
                "Anywhere".to_string()
            } else {
                from
            },
        });
    }
    status
}

#[cfg(test)]
mod tests {
    use super::super::runner::testing::FakeRunner;
    use super::*;

    #[test]
    fn test_parse_active_status() {
        let out = "Status: active\n\n\
                   To                         Action      From\n\
                   --                         ------      ----\n\
                   7777/tcp                   ALLOW       Anywhere\n\
                   8000/tcp                   DENY        10.0.0.0/24\n\
                   1935/tcp (v6)              ALLOW       Anywhere (v6)\n";
        let status = parse_status(out);
        assert!(status.active);
        assert_eq!(status.rules.len(), 3);
        assert_eq!(status.rules[2].to, "1935/tcp (v6)");
        assert_eq!(status.rules[0].to, "7777/tcp");
        assert_eq!(status.rules[0].action, RuleAction::Allow);
        assert_eq!(status.rules[0].from, "Anywhere");
        assert_eq!(status.rules[1].action, RuleAction::Deny);
        assert_eq!(status.rules[1].from, "10.0.0.0/24");
    }

    #[test]
    fn test_parse_inactive_status() {
        let status = parse_status("Status: inactive\n");
        assert!(!status.active);
        assert!(status.rules.is_empty());
    }

    #[test]
    fn test_parse_verbose_direction_tokens() {
        let out = "Status: active\n22/tcp                     ALLOW IN    Anywhere\n";
        let status = parse_status(out);
        assert_eq!(status.rules[0].from, "Anywhere");
    }

    #[tokio::test]
    async fn test_add_rule_builds_expected_command() {
        let runner = Arc::new(FakeRunner::new(vec![FakeRunner::ok("Rule added")]));
        let ufw = Ufw::new(runner.clone(), "/usr/sbin/ufw");
        ufw.add_rule(RuleAction::Allow, 7777, "tcp", None).await.unwrap();
        assert_eq!(runner.recorded_calls(), vec!["/usr/sbin/ufw allow 7777/tcp"]);
    }

    #[tokio::test]
    async fn test_add_rule_with_source() {
        let runner = Arc::new(FakeRunner::new(vec![FakeRunner::ok("Rule added")]));
        let ufw = Ufw::new(runner.clone(), "/usr/sbin/ufw");
        ufw.add_rule(RuleAction::Deny, 8000, "udp", Some("10.0.0.0/24"))
            .await
            .unwrap();
        assert_eq!(
            runner.recorded_calls(),
            vec!["/usr/sbin/ufw deny from 10.0.0.0/24 to any port 8000 proto udp"]
        );
    }

    #[tokio::test]
    async fn test_rule_validation_rejects_bad_input() {
        let runner = Arc::new(FakeRunner::new(vec![FakeRunner::ok("")]));
        let ufw = Ufw::new(runner.clone(), "/usr/sbin/ufw");
        assert!(ufw.add_rule(RuleAction::Allow, 0, "tcp", None).await.is_err());
        assert!(ufw.add_rule(RuleAction::Allow, 80, "icmp", None).await.is_err());
        assert!(ufw
            .add_rule(RuleAction::Allow, 80, "tcp", Some("$(reboot)"))
            .await
            .is_err());
        // Nothing reached the command line
        assert!(runner.recorded_calls().is_empty());
    }

    #[tokio::test]
    async fn test_ban_ip_inserts_at_top() {
        let runner = Arc::new(FakeRunner::new(vec![FakeRunner::ok("Rule inserted")]));
        let ufw = Ufw::new(runner.clone(), "/usr/sbin/ufw");
        ufw.ban_ip("1.2.3.4".parse().unwrap()).await.unwrap();
        assert_eq!(
            runner.recorded_calls(),
            vec!["/usr/sbin/ufw insert 1 deny from 1.2.3.4 to any"]
        );
    }
}
