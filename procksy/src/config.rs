//! Configuration loading: defaults -> config file -> CLI overrides,
//! each layer merging onto the one before it.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use log::{error, info, warn};
use serde::Deserialize;

use crate::auth::{Authenticator, RawAuthenticator};
use crate::cli::ServeArgs;
use crate::filter::{AddressFilter, FilterMode, RawFilter};

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1";
pub const DEFAULT_BIND_PORT: u16 = 9050;
pub const DEFAULT_BUFFER_SIZE: usize = 2048;
pub const DEFAULT_MAX_THREADS: usize = 200;
pub const DEFAULT_SOCK_TIMEOUT_SECS: u64 = 5;

const CONFIG_FILENAME: &str = "procksy.json";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub bind_port: u16,
    pub buffer_size: usize,
    pub max_threads: usize,
    pub sock_timeout_secs: u64,
    pub client_filter: AddressFilter,
    pub target_filter: AddressFilter,
    pub authenticator: Authenticator,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            bind_port: DEFAULT_BIND_PORT,
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_threads: DEFAULT_MAX_THREADS,
            sock_timeout_secs: DEFAULT_SOCK_TIMEOUT_SECS,
            client_filter: AddressFilter::default(),
            target_filter: AddressFilter::default(),
            authenticator: Authenticator::default(),
        }
    }
}

/// Raw JSON tree, every field optional; an absent key falls through to
/// `ServerConfig::default()` in `from_raw`.
#[derive(Debug, Deserialize, Default)]
struct RawConfig {
    bind_addr: Option<String>,
    bind_port: Option<u16>,
    buffer_size: Option<usize>,
    max_threads: Option<usize>,
    sock_timeout: Option<u64>,
    client_filter: Option<RawFilter>,
    target_filter: Option<RawFilter>,
    authenticator: Option<RawAuthenticator>,
}

fn default_locations() -> Vec<PathBuf> {
    let mut locations = vec![PathBuf::from(CONFIG_FILENAME)];
    if let Some(home) = dirs_home() {
        locations.push(home.join(".config").join("procksy").join(CONFIG_FILENAME));
    }
    locations.push(PathBuf::from("/etc/procksy").join(CONFIG_FILENAME));
    locations
}

/// Minimal `$HOME` lookup; procksy does not otherwise need a directories
/// crate for this single path.
fn dirs_home() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

impl ServerConfig {
    /// Search the documented locations in order; the first file found wins.
    /// No file found at all falls back to defaults.
    pub fn from_default_locations() -> Self {
        for path in default_locations() {
            if path.is_file() {
                return Self::from_filepath(&path);
            }
        }
        warn!("using default configuration");
        Self::default()
    }

    pub fn from_filepath(path: &Path) -> Self {
        info!("loading configuration from {}", path.display());
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) => {
                error!("error while loading configuration data: {err}");
                return Self::default();
            }
        };
        let raw: RawConfig = match serde_json::from_str(&text) {
            Ok(raw) => raw,
            Err(err) => {
                error!("error while decoding configuration data: {err}");
                return Self::default();
            }
        };
        Self::from_raw(raw)
    }

    /// Like [`ServerConfig::from_filepath`], but for an operator-supplied
    /// `--config` path: a missing or unreadable file is a fatal startup
    /// error rather than a silent fallback to defaults, since the operator
    /// asked for this exact file.
    pub fn from_required_filepath(path: &Path) -> Result<Self, crate::error::ProcksyError> {
        info!("loading configuration from {}", path.display());
        let text =
            std::fs::read_to_string(path).map_err(|source| crate::error::ProcksyError::Config {
                path: path.display().to_string(),
                source,
            })?;
        let raw: RawConfig = serde_json::from_str(&text).map_err(|err| {
            crate::error::ProcksyError::Config {
                path: path.display().to_string(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidData, err),
            }
        })?;
        Ok(Self::from_raw(raw))
    }

    fn from_raw(raw: RawConfig) -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: raw.bind_addr.unwrap_or(defaults.bind_addr),
            bind_port: raw.bind_port.unwrap_or(defaults.bind_port),
            buffer_size: raw.buffer_size.unwrap_or(defaults.buffer_size),
            max_threads: raw.max_threads.unwrap_or(defaults.max_threads),
            sock_timeout_secs: raw.sock_timeout.unwrap_or(defaults.sock_timeout_secs),
            client_filter: raw
                .client_filter
                .map(AddressFilter::from_raw)
                .unwrap_or(defaults.client_filter),
            target_filter: raw
                .target_filter
                .map(AddressFilter::from_raw)
                .unwrap_or(defaults.target_filter),
            authenticator: raw
                .authenticator
                .map(Authenticator::from_raw)
                .unwrap_or(defaults.authenticator),
        }
    }

    /// Apply `serve` CLI flags on top of an already-loaded config. Only
    /// flags the operator actually passed override; absent flags keep
    /// whatever the config file (or defaults) already set, matching
    /// `override()`'s `args.bind_addr or self.bind_addr` pattern.
    pub fn apply_cli(&mut self, args: &ServeArgs) {
        if let Some(filter_spec) = &args.client_filter {
            self.client_filter = parse_filter_spec(filter_spec);
        }
        if let Some(filter_spec) = &args.target_filter {
            self.target_filter = parse_filter_spec(filter_spec);
        }
        if !args.users.is_empty() {
            let users = args
                .users
                .iter()
                .filter_map(|entry| entry.split_once(':'))
                .map(|(user, digest)| (user.as_bytes().to_vec(), digest.to_string()))
                .collect();
            self.authenticator = Authenticator::new(true, users);
        }
        if let Some(addr) = &args.bind_addr {
            self.bind_addr = addr.clone();
        }
        if let Some(port) = args.bind_port {
            self.bind_port = port;
        }
        if let Some(size) = args.buffer_size {
            self.buffer_size = size;
        }
        if let Some(max) = args.max_threads {
            self.max_threads = max;
        }
        if let Some(timeout) = args.sock_timeout {
            self.sock_timeout_secs = timeout;
        }
    }
}

/// Parses `mode:v1,v2,...` into an [`AddressFilter`].
fn parse_filter_spec(spec: &str) -> AddressFilter {
    let Some((mode, values)) = spec.split_once(':') else {
        warn!("ignoring malformed filter spec: {spec}");
        return AddressFilter::default();
    };
    let mode = match mode {
        "none" => FilterMode::None,
        "allow" => FilterMode::Allow,
        "deny" => FilterMode::Deny,
        other => {
            warn!("unknown filter mode {other:?}, treating as none");
            FilterMode::None
        }
    };
    let values: HashSet<String> = values
        .split(',')
        .map(|v| v.trim().to_lowercase())
        .filter(|v| !v.is_empty())
        .collect();
    AddressFilter::new(mode, values)
}
