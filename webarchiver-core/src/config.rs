// Runtime configuration, read from the environment

use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;
use webarchiver_mirror::MirrorOptions;

pub const DEFAULT_MAX_DEPTH: u32 = 5;
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_DIR_PERMS: u32 = 0o750;
pub const DEFAULT_FILE_PERMS: u32 = 0o600;
pub const DEFAULT_WAYBACK_API_URL: &str = "https://web.archive.org/cdx/search/cdx";
pub const DEFAULT_WAYBACK_WEB_URL: &str = "https://web.archive.org/web";
pub const DEFAULT_OUTPUT_DIR: &str = "downloads";
pub const DEFAULT_WORKERS: usize = 8;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub http_timeout: Duration,
    pub max_depth: u32,
    pub dir_perms: u32,
    pub file_perms: u32,
    /// CDX endpoint used to list snapshots.
    pub wayback_api_url: String,
    /// Prefix snapshot pages are served from (`<prefix>/<timestamp>/<url>`).
    pub wayback_web_url: String,
    pub output_dir: PathBuf,
    pub log_level: Level,
    pub workers: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            max_depth: DEFAULT_MAX_DEPTH,
            dir_perms: DEFAULT_DIR_PERMS,
            file_perms: DEFAULT_FILE_PERMS,
            wayback_api_url: DEFAULT_WAYBACK_API_URL.to_string(),
            wayback_web_url: DEFAULT_WAYBACK_WEB_URL.to_string(),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            log_level: Level::INFO,
            workers: DEFAULT_WORKERS,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup. Unset, empty or
    /// unparsable values keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Config::default();

        Self {
            http_timeout: get("HTTP_TIMEOUT")
                .and_then(|v| parse_duration(&v))
                .unwrap_or(defaults.http_timeout),
            max_depth: get("MAX_DEPTH")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.max_depth),
            dir_perms: get("DIR_PERMS")
                .and_then(|v| parse_mode(&v))
                .unwrap_or(defaults.dir_perms),
            file_perms: get("FILE_PERMS")
                .and_then(|v| parse_mode(&v))
                .unwrap_or(defaults.file_perms),
            wayback_api_url: get("WAYBACK_API_URL").unwrap_or(defaults.wayback_api_url),
            wayback_web_url: get("WAYBACK_WEB_URL").unwrap_or(defaults.wayback_web_url),
            output_dir: get("OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            log_level: get("LOG_LEVEL")
                .and_then(|v| parse_level(&v))
                .unwrap_or(defaults.log_level),
            workers: get("WORKERS")
                .and_then(|v| v.trim().parse().ok())
                .filter(|w| *w > 0)
                .unwrap_or(defaults.workers),
        }
    }

    pub fn mirror_options(&self) -> MirrorOptions {
        MirrorOptions::default()
            .with_timeout(self.http_timeout)
            .with_max_depth(self.max_depth)
            .with_workers(self.workers)
            .with_permissions(self.dir_perms, self.file_perms)
    }
}

/// Parse durations such as `500ms`, `30s`, `2m`, `1h30m` or a bare number of seconds.
pub fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let mut total = Duration::ZERO;
    let mut rest = value;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .unwrap_or(rest.len());
        if digits == 0 {
            return None;
        }
        let amount: f64 = rest[..digits].parse().ok()?;
        rest = &rest[digits..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(rest.len());
        let seconds = match &rest[..unit_len] {
            "ms" => amount / 1000.0,
            "s" => amount,
            "m" => amount * 60.0,
            "h" => amount * 3600.0,
            _ => return None,
        };
        rest = &rest[unit_len..];
        total = total.checked_add(Duration::try_from_secs_f64(seconds).ok()?)?;
    }
    Some(total)
}

/// Octal permission bits, with or without a leading `0`/`0o`.
pub fn parse_mode(value: &str) -> Option<u32> {
    let value = value.trim();
    let digits = value.strip_prefix("0o").unwrap_or(value);
    u32::from_str_radix(digits, 8).ok().filter(|m| *m <= 0o7777)
}

pub fn parse_level(value: &str) -> Option<Level> {
    match value.trim().to_ascii_uppercase().as_str() {
        "DEBUG" => Some(Level::DEBUG),
        "INFO" => Some(Level::INFO),
        "WARN" => Some(Level::WARN),
        "ERROR" => Some(Level::ERROR),
        _ => None,
    }
}
