//! Load config from file and environment.

use anyhow::Context;
use serde::Deserialize;
use std::path::PathBuf;

/// Daemon configuration. File: ~/.config/bluchat/config.toml or /etc/bluchat/config.toml.
/// Env overrides: BLUCHAT_DISCOVERY_PORT, BLUCHAT_TRANSPORT_PORT, BLUCHAT_ROOM,
/// BLUCHAT_HANDLE_FILE, BLUCHAT_LOG.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Discovery UDP port (default 45680).
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    /// Transport TCP port (default 45681).
    #[serde(default = "default_transport_port")]
    pub transport_port: u16,
    /// Room joined at startup.
    #[serde(default = "default_room")]
    pub room: String,
    /// File holding the persisted handle.
    #[serde(default = "default_handle_file")]
    pub handle_file: PathBuf,
    /// Seconds an inbound connection waits for the session to accept it.
    #[serde(default = "default_invitation_timeout")]
    pub invitation_timeout_secs: u64,
    #[serde(default = "default_auto_accept")]
    pub auto_accept_invitations: bool,
    /// Remember at most this many message ids (unset: unbounded).
    #[serde(default)]
    pub seen_capacity: Option<usize>,
    /// Log filter used when RUST_LOG is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_discovery_port() -> u16 {
    45680
}
fn default_transport_port() -> u16 {
    45681
}
fn default_room() -> String {
    blu_core::session::DEFAULT_ROOM.to_string()
}
fn default_handle_file() -> PathBuf {
    config_dir()
        .map(|d| d.join("handle"))
        .unwrap_or_else(|| PathBuf::from(".bluchat-handle"))
}
fn default_invitation_timeout() -> u64 {
    10
}
fn default_auto_accept() -> bool {
    true
}
fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            discovery_port: default_discovery_port(),
            transport_port: default_transport_port(),
            room: default_room(),
            handle_file: default_handle_file(),
            invitation_timeout_secs: default_invitation_timeout(),
            auto_accept_invitations: default_auto_accept(),
            seen_capacity: None,
            log_level: default_log_level(),
        }
    }
}

impl Config {
    pub fn session_config(&self) -> blu_core::SessionConfig {
        blu_core::SessionConfig {
            room: self.room.clone(),
            auto_accept_invitations: self.auto_accept_invitations,
            seen_capacity: self.seen_capacity,
        }
    }
}

/// Load config: merge default, then config file (if present), then env vars.
/// A file that cannot be used is returned as a problem for the caller to log once
/// logging is up; defaults stand in for it.
pub fn load() -> (Config, Option<anyhow::Error>) {
    load_from(&config_paths(), |k| std::env::var(k).ok())
}

fn load_from(
    paths: &[PathBuf],
    var: impl Fn(&str) -> Option<String>,
) -> (Config, Option<anyhow::Error>) {
    let (mut c, problem) = match load_file(paths) {
        Ok(file) => (file.unwrap_or_default(), None),
        Err(e) => (Config::default(), Some(e)),
    };
    apply_env(&mut c, var);
    (c, problem)
}

fn apply_env(c: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(p) = var("BLUCHAT_DISCOVERY_PORT").and_then(|s| s.parse::<u16>().ok()) {
        c.discovery_port = p;
    }
    if let Some(p) = var("BLUCHAT_TRANSPORT_PORT").and_then(|s| s.parse::<u16>().ok()) {
        c.transport_port = p;
    }
    if let Some(room) = var("BLUCHAT_ROOM").filter(|s| !s.trim().is_empty()) {
        c.room = room;
    }
    if let Some(path) = var("BLUCHAT_HANDLE_FILE") {
        c.handle_file = PathBuf::from(path);
    }
    if let Some(level) = var("BLUCHAT_LOG") {
        c.log_level = level;
    }
}

fn config_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config/bluchat"))
}

fn config_paths() -> Vec<PathBuf> {
    let mut out = Vec::new();
    if let Some(d) = config_dir() {
        out.push(d.join("config.toml"));
    }
    out.push(PathBuf::from("/etc/bluchat/config.toml"));
    out
}

fn load_file(paths: &[PathBuf]) -> anyhow::Result<Option<Config>> {
    let Some(path) = paths.iter().find(|p| p.exists()) else {
        return Ok(None);
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("could not read config {}", path.display()))?;
    let c = toml::from_str::<Config>(&text)
        .with_context(|| format!("invalid config {}, using defaults", path.display()))?;
    Ok(Some(c))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn partial_file_uses_defaults() {
        let c: Config = toml::from_str("room = \"lobby\"\nseen_capacity = 500\n").unwrap();
        assert_eq!(c.room, "lobby");
        assert_eq!(c.seen_capacity, Some(500));
        assert_eq!(c.discovery_port, 45680);
        assert!(c.auto_accept_invitations);
    }

    #[test]
    fn unknown_keys_rejected() {
        assert!(toml::from_str::<Config>("proxy_port = 3128\n").is_err());
    }

    #[test]
    fn unusable_file_is_reported_not_logged() {
        let path = std::env::temp_dir()
            .join(format!("bluchat-config-{}.toml", std::process::id()));
        std::fs::write(&path, "room = \"lobby\"\nproxy_port = 3128\n").unwrap();
        let (c, problem) = load_from(&[path.clone()], |_| None);
        std::fs::remove_file(&path).unwrap();
        assert_eq!(c.room, "bitchat");
        let problem = problem.expect("invalid file reported");
        assert!(problem.to_string().contains("invalid config"));
    }

    #[test]
    fn missing_file_is_not_a_problem() {
        let path = std::env::temp_dir().join("bluchat-config-does-not-exist.toml");
        let (c, problem) =
            load_from(&[path], |k| (k == "BLUCHAT_LOG").then(|| "debug".to_string()));
        assert!(problem.is_none());
        assert_eq!(c.log_level, "debug");
    }

    #[test]
    fn env_overrides_file() {
        let env: HashMap<&str, &str> = [
            ("BLUCHAT_TRANSPORT_PORT", "5000"),
            ("BLUCHAT_DISCOVERY_PORT", "not-a-port"),
            ("BLUCHAT_ROOM", "   "),
        ]
        .into_iter()
        .collect();
        let mut c = Config::default();
        apply_env(&mut c, |k| env.get(k).map(|v| v.to_string()));
        assert_eq!(c.transport_port, 5000);
        assert_eq!(c.discovery_port, 45680);
        assert_eq!(c.room, "bitchat");
    }
}
