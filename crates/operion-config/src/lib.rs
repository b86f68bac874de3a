//! Process configuration, loaded from environment variables with documented
//! defaults. One [`Config`] is shared across the three process kinds
//! (provider-manager, activator, worker); each reads only the fields it
//! needs.

mod error;

pub use error::ConfigError;

use std::path::PathBuf;
use std::time::Duration;

/// Env var names, centralized so `--help`-equivalent documentation and the
/// loader never drift apart.
pub mod env {
  pub const BUS_URL: &str = "OPERION_BUS_URL";
  pub const DATABASE_URL: &str = "OPERION_DATABASE_URL";
  pub const WEBHOOK_PORT: &str = "OPERION_WEBHOOK_PORT";
  pub const DATA_DIR: &str = "OPERION_DATA_DIR";
  pub const PLUGIN_DIR: &str = "OPERION_PLUGIN_DIR";
  pub const RESTART_BACKOFF_MS: &str = "OPERION_RESTART_BACKOFF_MS";
  pub const RESTART_MAX_ATTEMPTS: &str = "OPERION_RESTART_MAX_ATTEMPTS";
  pub const LOG: &str = "OPERION_LOG";
}

/// Fully resolved process configuration.
#[derive(Debug, Clone)]
pub struct Config {
  /// `memory://` for the in-process bus, or a `kafka://host:port` broker
  /// list consumed by the kafka transport. Default `memory://`.
  pub bus_url: String,
  /// `sqlite://path` (or `memory://` for the in-memory repositories).
  /// Default `memory://`.
  pub database_url: String,
  /// Port the shared webhook HTTP listener binds to. Default `8080`.
  pub webhook_port: u16,
  /// Root directory for persisted process state (sqlite files, etc).
  /// Default `~/.local/share/operion` (platform `dirs::data_dir()`).
  pub data_dir: PathBuf,
  /// Root directory scanned for loadable WASM node plugins at startup.
  /// Default `{data_dir}/plugins`.
  pub plugin_dir: PathBuf,
  /// Linear backoff step between provider restart attempts. Default `1000ms`.
  pub restart_backoff: Duration,
  /// Consecutive restart attempts before a provider binding is abandoned.
  /// Default `5`, matching the provider manager's restart/backoff note.
  pub restart_max_attempts: u32,
}

impl Config {
  /// Loads configuration from environment variables, falling back to
  /// documented defaults for anything unset. Malformed numeric/url values
  /// are reported as [`ConfigError::Invalid`] rather than silently defaulted.
  pub fn from_env() -> Result<Self, ConfigError> {
    let data_dir = match std::env::var(env::DATA_DIR) {
      Ok(v) => PathBuf::from(v),
      Err(_) => dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("operion"),
    };
    let plugin_dir = match std::env::var(env::PLUGIN_DIR) {
      Ok(v) => PathBuf::from(v),
      Err(_) => data_dir.join("plugins"),
    };

    Ok(Self {
      bus_url: std::env::var(env::BUS_URL).unwrap_or_else(|_| "memory://".to_string()),
      database_url: std::env::var(env::DATABASE_URL).unwrap_or_else(|_| "memory://".to_string()),
      webhook_port: parse_env(env::WEBHOOK_PORT, 8080)?,
      data_dir,
      plugin_dir,
      restart_backoff: Duration::from_millis(parse_env(env::RESTART_BACKOFF_MS, 1000)?),
      restart_max_attempts: parse_env(env::RESTART_MAX_ATTEMPTS, 5)?,
    })
  }
}

fn parse_env<T>(name: &str, default: T) -> Result<T, ConfigError>
where
  T: std::str::FromStr,
  T::Err: std::fmt::Display,
{
  match std::env::var(name) {
    Ok(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
      name: name.to_string(),
      message: e.to_string(),
    }),
    Err(_) => Ok(default),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Mutex;

  static ENV_LOCK: Mutex<()> = Mutex::new(());

  #[test]
  fn defaults_apply_when_unset() {
    let _guard = ENV_LOCK.lock().unwrap();
    for key in [
      env::BUS_URL,
      env::DATABASE_URL,
      env::WEBHOOK_PORT,
      env::DATA_DIR,
      env::PLUGIN_DIR,
      env::RESTART_BACKOFF_MS,
      env::RESTART_MAX_ATTEMPTS,
    ] {
      unsafe { std::env::remove_var(key) };
    }
    let config = Config::from_env().unwrap();
    assert_eq!(config.bus_url, "memory://");
    assert_eq!(config.webhook_port, 8080);
    assert_eq!(config.restart_max_attempts, 5);
  }

  #[test]
  fn invalid_port_is_reported() {
    let _guard = ENV_LOCK.lock().unwrap();
    unsafe { std::env::set_var(env::WEBHOOK_PORT, "not-a-port") };
    let result = Config::from_env();
    unsafe { std::env::remove_var(env::WEBHOOK_PORT) };
    assert!(matches!(result, Err(ConfigError::Invalid { .. })));
  }
}
