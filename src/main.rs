use anyhow::Result;
use clap::Parser;

use streamgate::auth::password;
use streamgate::bans::BanStore;
use streamgate::cli::{Cli, Command};
use streamgate::config;
use streamgate::firewall::FirewallOrchestrator;
use streamgate::ports::{PortAllocator, PortAssignment};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Command::HashPassword { password } => {
            let password = match password {
                Some(p) => p.clone(),
                None => read_password_from_stdin()?,
            };
            let hash = password::hash_password(&password)?;
            println!("{}", hash);
            if password::rate_strength(&password) == password::Strength::Weak {
                eprintln!("warning: password has low character-class diversity");
            }
            Ok(())
        }
        Command::GeneratePassword { length } => {
            let generated = password::generate_password(*length);
            let hash = password::hash_password(&generated)?;
            println!("password: {}", generated);
            println!("hash:     {}", hash);
            Ok(())
        }
        Command::CheckConfig => {
            let cfg = config::load_config(&cli.config)?;
            println!("Configuration is valid.");
            println!("  Audit log dir: {}", cfg.logging.audit_log_dir.display());
            println!("  Ban state:     {}", cfg.bans.state_path.display());
            println!("  Login limit:   {} per {}s", cfg.security.login_max_attempts, cfg.security.login_window);
            match config::resolve_secret(&cfg) {
                Ok(_) => println!("  Token secret:  configured"),
                Err(_) => println!("  Token secret:  MISSING (set secret_key or STREAMGATE_SECRET)"),
            }
            Ok(())
        }
        Command::AllocatePorts { save } => {
            let cfg = load_config_or_default(&cli);
            let assignment = PortAllocator::new().allocate_triple()?;
            println!("web:    {}", assignment.web_port);
            println!("stream: {}", assignment.stream_port);
            println!("rtmp:   {}", assignment.rtmp_port);
            if *save {
                assignment.save(&cfg.ports.config_path)?;
                println!("saved to {}", cfg.ports.config_path.display());
            }
            Ok(())
        }
        Command::Status => {
            let cfg = load_config_or_default(&cli);
            streamgate::logging::setup_logging(
                cli.log_level.as_deref().unwrap_or(&cfg.logging.level.to_string()),
                cfg.logging.format,
            );
            let firewall = FirewallOrchestrator::new(&cfg.firewall);
            let stats = firewall.security_stats().await;
            let bans = BanStore::open(&cfg.bans.state_path);
            let assignment = PortAssignment::load(&cfg.ports.config_path);
            let report = serde_json::json!({
                "firewall": stats,
                "bans": bans.active_bans(),
                "whitelist": bans.whitelisted(),
                "ports": assignment,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
    }
}

fn load_config_or_default(cli: &Cli) -> streamgate::config::types::AppConfig {
    match config::load_config(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("note: {} ({}), using defaults", e, cli.config.display());
            streamgate::config::types::AppConfig::default()
        }
    }
}

fn read_password_from_stdin() -> Result<String> {
    eprintln!("Enter password: ");
    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}
