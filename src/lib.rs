pub mod admin;
pub mod audit;
pub mod auth;
pub mod bans;
pub mod cli;
pub mod config;
pub mod firewall;
pub mod logging;
pub mod ports;
pub mod ratelimit;
pub mod session;
pub mod token;

pub use admin::{AdminAction, AdminResponse, AdminService};
pub use audit::{AccessLogger, Category};
pub use auth::{LoginOutcome, LoginService};
pub use bans::{BanRecord, BanStore};
pub use firewall::FirewallOrchestrator;
pub use ports::{PortAllocator, PortAssignment};
pub use ratelimit::RateLimiter;
pub use session::SessionContext;
pub use token::TokenService;
