use std::io::Write;
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::time::Duration;

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

/// HTTPS ports proxied by Cloudflare, preferred for the web panel.
const CLOUDFLARE_SSL_PORTS: [u16; 5] = [2053, 2083, 2087, 2096, 8443];

const CONNECT_PROBE_TIMEOUT: Duration = Duration::from_millis(200);

#[derive(Debug, Error)]
pub enum PortAllocError {
    #[error("no available port for {role}")]
    Exhausted { role: &'static str },
    #[error("failed to persist port assignment: {0}")]
    Persist(#[from] std::io::Error),
}

/// Persisted port layout for one deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortAssignment {
    #[serde(default = "default_web_port")]
    pub web_port: u16,
    #[serde(default = "default_stream_port")]
    pub stream_port: u16,
    #[serde(default = "default_rtmp_port")]
    pub rtmp_port: u16,
}

fn default_web_port() -> u16 {
    7777
}

fn default_stream_port() -> u16 {
    8000
}

fn default_rtmp_port() -> u16 {
    1935
}

impl Default for PortAssignment {
    fn default() -> Self {
        Self {
            web_port: default_web_port(),
            stream_port: default_stream_port(),
            rtmp_port: default_rtmp_port(),
        }
    }
}

impl PortAssignment {
    /// Load from a JSON file. Missing or corrupt files fall back to the
    /// defaults, corrupt ones with a warning.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(data) => match serde_json::from_str(&data) {
                Ok(assignment) => {
                    debug!(path = %path.display(), "Port assignment loaded");
                    assignment
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Corrupt port assignment, using defaults");
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    /// Atomic write: temp file, fsync, rename.
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let tmp_path = path.with_extension("tmp");
        let mut file = std::fs::File::create(&tmp_path)?;
        file.write_all(data.as_bytes())?;
        file.sync_all()?;
        std::fs::rename(&tmp_path, path)?;
        debug!(path = %path.display(), "Port assignment saved");
        Ok(())
    }
}

/// Probe a port with two independent checks: the port must accept a local
/// bind, and nothing may answer a loopback connect. Either signal alone
/// misses services bound to a single interface.
pub fn is_port_available(port: u16) -> bool {
    let bind_free = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).is_ok();
    if !bind_free {
        return false;
    }
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    let connect_refused = TcpStream::connect_timeout(&addr, CONNECT_PROBE_TIMEOUT).is_err();
    connect_refused
}

/// Picks free ports for the three listener roles. The availability probe
/// is injectable so allocation logic can be tested without sockets.
pub struct PortAllocator {
    probe: Box<dyn Fn(u16) -> bool + Send + Sync>,
}

impl PortAllocator {
    pub fn new() -> Self {
        Self {
            probe: Box::new(is_port_available),
        }
    }

    pub fn with_probe(probe: impl Fn(u16) -> bool + Send + Sync + 'static) -> Self {
        Self {
            probe: Box::new(probe),
        }
    }

    /// Pick an available port from `candidates`, trying them in random
    /// order so parallel provisioners spread across the pool.
    pub fn pick_port(&self, candidates: &[u16], exclude: &[u16]) -> Option<u16> {
        let mut pool: Vec<u16> = candidates
            .iter()
            .copied()
            .filter(|p| !exclude.contains(p))
            .collect();
        pool.shuffle(&mut rand::thread_rng());
        pool.into_iter().find(|p| (self.probe)(*p))
    }

    /// Web panel port: Cloudflare-compatible SSL ports first, then the
    /// general 8000-8999 range.
    pub fn pick_web_port(&self, exclude: &[u16]) -> Option<u16> {
        self.pick_port(&CLOUDFLARE_SSL_PORTS, exclude)
            .or_else(|| self.pick_port(&range(8000, 8999), exclude))
    }

    /// HLS delivery port: same pools as the web panel.
    pub fn pick_stream_port(&self, exclude: &[u16]) -> Option<u16> {
        self.pick_web_port(exclude)
    }

    /// RTMP ingest port: drawn at random from the 1935-1999 and 8000-8999
    /// ranges so concurrent deployments do not all converge on 1935.
    pub fn pick_rtmp_port(&self, exclude: &[u16]) -> Option<u16> {
        let mut pool = range(1935, 1999);
        pool.extend(range(8000, 8999));
        self.pick_port(&pool, exclude)
    }

    /// Allocate three distinct ports, one per role. The probe reserves
    /// nothing, so callers should bind the ports promptly.
    pub fn allocate_triple(&self) -> Result<PortAssignment, PortAllocError> {
        let web_port = self
            .pick_web_port(&[])
            .ok_or(PortAllocError::Exhausted { role: "web" })?;
        let stream_port = self
            .pick_stream_port(&[web_port])
            .ok_or(PortAllocError::Exhausted { role: "stream" })?;
        let rtmp_port = self
            .pick_rtmp_port(&[web_port, stream_port])
            .ok_or(PortAllocError::Exhausted { role: "rtmp" })?;
        let assignment = PortAssignment {
            web_port,
            stream_port,
            rtmp_port,
        };
        info!(
            web = assignment.web_port,
            stream = assignment.stream_port,
            rtmp = assignment.rtmp_port,
            "Ports allocated"
        );
        Ok(assignment)
    }
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new()
    }
}

fn range(start: u16, end: u16) -> Vec<u16> {
    (start..=end).collect()
}
