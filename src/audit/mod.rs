use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::{debug, error};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const MAX_FIELD_LEN: usize = 100;

/// Audit log categories, one file per category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Auth,
    StreamAccess,
    Security,
    Uploads,
    PasswordChanges,
    AdminActions,
}

impl Category {
    pub fn filename(&self) -> &'static str {
        match self {
            Category::Auth => "auth.log",
            Category::StreamAccess => "stream-access.log",
            Category::Security => "security.log",
            Category::Uploads => "uploads.log",
            Category::PasswordChanges => "password-changes.log",
            Category::AdminActions => "admin-actions.log",
        }
    }
}

/// Append-only audit logger writing category files under a single directory.
///
/// Lines have the form `[YYYY-MM-DD HH:MM:SS] PREFIX - k: v, k: v`. Appends
/// never return errors to callers; a failed write is reported through
/// `tracing::error` and the request proceeds. When a file crosses the size
/// limit it is renamed with a timestamp suffix and gzip-compressed.
pub struct AccessLogger {
    dir: PathBuf,
    max_size_bytes: u64,
    // Serializes append + rotation across all categories
    write_lock: Mutex<()>,
}

impl AccessLogger {
    pub fn new(dir: impl Into<PathBuf>, max_size_mb: u64) -> Self {
        let dir = dir.into();
        if let Err(e) = fs::create_dir_all(&dir) {
            error!(dir = %dir.display(), error = %e, "Failed to create audit log directory");
        }
        Self {
            dir,
            max_size_bytes: max_size_mb * 1024 * 1024,
            write_lock: Mutex::new(()),
        }
    }

    pub fn log_login_success(&self, username: &str, ip: &str) {
        self.log(
            Category::Auth,
            "LOGIN_SUCCESS",
            &[("user", username.to_string()), ("ip", ip.to_string())],
        );
    }

    /// Failed logins land in the auth log and are mirrored into the
    /// security log, which is what intrusion tooling tails.
    pub fn log_login_failure(&self, username: &str, ip: &str) {
        self.log(
            Category::Auth,
            "LOGIN_FAILURE",
            &[("user", username.to_string()), ("ip", ip.to_string())],
        );
        self.log(
            Category::Security,
            "LOGIN_FAILURE",
            &[("user", truncate(username)), ("ip", ip.to_string())],
        );
    }

    pub fn log_rate_limit_trip(&self, key: &str, ip: &str) {
        self.log(
            Category::Security,
            "RATE_LIMIT",
            &[("key", truncate(key)), ("ip", ip.to_string())],
        );
    }

    pub fn log_stream_access(&self, stream_id: u64, user_id: u64, ip: &str, granted: bool) {
        self.log(
            Category::StreamAccess,
            if granted { "STREAM_GRANT" } else { "STREAM_DENY" },
            &[
                ("stream", stream_id.to_string()),
                ("user", user_id.to_string()),
                ("ip", ip.to_string()),
            ],
        );
    }

    /// Security events carry the request URI and user agent, both truncated
    /// so a hostile client cannot bloat the log with a single request.
    pub fn log_security_event(&self, kind: &str, ip: &str, uri: &str, user_agent: &str) {
        self.log(
            Category::Security,
            kind,
            &[
                ("ip", ip.to_string()),
                ("uri", truncate(uri)),
                ("ua", truncate(user_agent)),
            ],
        );
    }

    pub fn log_upload(&self, user_id: u64, filename: &str, size_bytes: u64, accepted: bool) {
        self.log(
            Category::Uploads,
            if accepted { "UPLOAD_ACCEPT" } else { "UPLOAD_REJECT" },
            &[
                ("user", user_id.to_string()),
                ("file", truncate(filename)),
                ("bytes", size_bytes.to_string()),
            ],
        );
    }

    pub fn log_password_change(&self, user_id: u64, ip: &str) {
        self.log(
            Category::PasswordChanges,
            "PASSWORD_CHANGE",
            &[("user", user_id.to_string()), ("ip", ip.to_string())],
        );
    }

    pub fn log_admin_action(&self, action: &str, ip: &str, detail: &str) {
        self.log(
            Category::AdminActions,
            "ADMIN_ACTION",
            &[
                ("action", action.to_string()),
                ("ip", ip.to_string()),
                ("detail", truncate(detail)),
            ],
        );
    }

    /// Append one line to the category file. Never fails from the caller's
    /// point of view.
    pub fn log(&self, category: Category, prefix: &str, fields: &[(&str, String)]) {
        let timestamp = Local::now().format(TIMESTAMP_FORMAT);
        let body = fields
            .iter()
            .map(|(k, v)| format!("{}: {}", k, sanitize(v)))
            .collect::<Vec<_>>()
            .join(", ");
        let line = format!("[{}] {} - {}\n", timestamp, prefix, body);

        let guard = self.write_lock.lock().unwrap();
        let path = self.dir.join(category.filename());
        if let Err(e) = self.append_line(&path, &line) {
            error!(path = %path.display(), error = %e, "Failed to write audit log");
        }
        drop(guard);
    }

    fn append_line(&self, path: &Path, line: &str) -> std::io::Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(line.as_bytes())?;
        file.flush()?;

        let size = file.metadata()?.len();
        drop(file);
        if self.max_size_bytes > 0 && size >= self.max_size_bytes {
            self.rotate(path)?;
        }
        Ok(())
    }

    /// Rename the full file with a timestamp suffix and gzip it.
    fn rotate(&self, path: &Path) -> std::io::Result<()> {
        let stamp = Local::now().format("%Y-%m-%d-%H%M%S");
        let rotated = PathBuf::from(format!("{}.{}", path.display(), stamp));
        fs::rename(path, &rotated)?;

        let gz_path = PathBuf::from(format!("{}.gz", rotated.display()));
        let mut input = File::open(&rotated)?;
        let output = File::create(&gz_path)?;
        let mut encoder = GzEncoder::new(output, Compression::default());
        std::io::copy(&mut input, &mut encoder)?;
        encoder.finish()?.flush()?;
        fs::remove_file(&rotated)?;
        debug!(path = %gz_path.display(), "Rotated audit log");
        Ok(())
    }

    /// Return up to `max` lines from the end of a category file, newest
    /// first. Missing files yield an empty list.
    pub fn recent_events(&self, category: Category, max: usize) -> Vec<String> {
        let path = self.dir.join(category.filename());
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(_) => return Vec::new(),
        };
        let lines: Vec<String> = BufReader::new(file)
            .lines()
            .map_while(Result::ok)
            .collect();
        lines.into_iter().rev().take(max).collect()
    }

    /// Count LOGIN_FAILURE entries for `ip` within the trailing `window`,
    /// by scanning the auth log.
    pub fn failed_login_attempts(&self, ip: &str, window: Duration) -> usize {
        let cutoff = Local::now().naive_local()
            - chrono::Duration::from_std(window).unwrap_or(chrono::Duration::zero());
        let needle = format!("ip: {}", ip);
        self.recent_events(Category::Auth, usize::MAX)
            .iter()
            .filter(|line| {
                line.contains("LOGIN_FAILURE")
                    && line.contains(&needle)
                    && parse_line_timestamp(line).is_some_and(|ts| ts >= cutoff)
            })
            .count()
    }
}

fn parse_line_timestamp(line: &str) -> Option<NaiveDateTime> {
    let end = line.find(']')?;
    let raw = line.get(1..end)?;
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT).ok()
}

/// Strip newlines so a crafted value cannot forge extra log lines.
fn sanitize(value: &str) -> String {
    value.replace(['\n', '\r'], " ")
}

fn truncate(value: &str) -> String {
    sanitize(&value.chars().take(MAX_FIELD_LEN).collect::<String>())
}
