//! User-configurable settings (spec §4.8 `config`).
//!
//! Grounded on `examples/original_source/src/diskwatcher/utils/config.py`'s
//! `OPTIONS` registry (key, parser, default, description, choices), ported
//! from a JSON-on-disk store to TOML via the teacher's existing `toml`
//! dependency, and from a free-form dict to a typed `UserConfig` struct.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{DiskWatcherError, Result};

pub const CONFIG_ENV_VAR: &str = "DISKWATCHER_CONFIG_DIR";
const CONFIG_FILENAME: &str = "config.toml";

pub const LOG_LEVEL_VALUES: &[&str] = &["debug", "info", "warning", "error", "critical"];

/// Metadata for one known config key, independent of whether the user has
/// set it (spec §4.8 `ListConfig`).
#[derive(Debug, Clone, Serialize)]
pub struct OptionInfo {
	pub key: &'static str,
	pub value: toml::Value,
	pub default: toml::Value,
	pub description: &'static str,
	pub value_type: &'static str,
	pub choices: Option<&'static [&'static str]>,
	pub source: &'static str,
}

/// On-disk user overrides, keyed by dotted option name (spec §4.8).
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct UserConfig {
	#[serde(flatten)]
	values: BTreeMap<String, toml::Value>,
}

/// Resolve `$DISKWATCHER_CONFIG_DIR`, falling back to `~/.diskwatcher`.
pub fn config_dir() -> PathBuf {
	if let Ok(override_dir) = std::env::var(CONFIG_ENV_VAR) {
		if !override_dir.is_empty() {
			return shell_expand_home(&override_dir);
		}
	}
	dirs_home().join(".diskwatcher")
}

pub fn config_path() -> PathBuf {
	config_dir().join(CONFIG_FILENAME)
}

fn dirs_home() -> PathBuf {
	std::env::var("HOME").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("."))
}

fn shell_expand_home(raw: &str) -> PathBuf {
	if let Some(rest) = raw.strip_prefix("~/") {
		return dirs_home().join(rest);
	}
	PathBuf::from(raw)
}

/// `log.level`: default log level when `--log-level` is not passed on the CLI.
pub fn parse_log_level(value: &str) -> Result<String> {
	const ALIASES: &[(&str, &str)] = &[("warn", "warning")];
	let normalized = value.trim().to_lowercase();
	let normalized = ALIASES.iter().find(|(from, _)| *from == normalized).map(|(_, to)| to.to_string()).unwrap_or(normalized);
	if !LOG_LEVEL_VALUES.contains(&normalized.as_str()) {
		return Err(DiskWatcherError::config(
			"log.level",
			format!("unsupported log level '{value}', choose from {}", LOG_LEVEL_VALUES.join(", ")),
		));
	}
	Ok(normalized)
}

fn parse_bool(value: &str) -> Result<bool> {
	match value.trim().to_lowercase().as_str() {
		"1" | "true" | "yes" | "on" => Ok(true),
		"0" | "false" | "no" | "off" => Ok(false),
		_ => Err(DiskWatcherError::config("<boolean>", "expected a boolean (true/false)")),
	}
}

fn load_user_config(path: &Path) -> Result<UserConfig> {
	if !path.exists() {
		return Ok(UserConfig::default());
	}
	let raw = std::fs::read_to_string(path)?;
	toml::from_str(&raw).map_err(|e| DiskWatcherError::config("config_file", format!("{path:?} is not valid TOML: {e}")))
}

fn write_user_config(path: &Path, config: &UserConfig) -> Result<()> {
	if let Some(parent) = path.parent() {
		std::fs::create_dir_all(parent)?;
	}
	let serialized =
		toml::to_string_pretty(config).map_err(|e| DiskWatcherError::config("config_file", e.to_string()))?;
	std::fs::write(path, serialized)?;
	Ok(())
}

/// Every key's current value (user override or default) with provenance
/// (spec §4.8 `ListConfig`).
pub fn list_config() -> Result<Vec<OptionInfo>> {
	let user = load_user_config(&config_path())?;
	let mut out = Vec::new();

	let log_level_default = toml::Value::String("info".to_string());
	out.push(option_entry(&user, "log.level", log_level_default, "Default log level when --log-level is not provided.", "string", Some(LOG_LEVEL_VALUES)));

	let auto_scan_default = toml::Value::Boolean(true);
	out.push(option_entry(&user, "run.auto_scan", auto_scan_default, "Control whether the run command performs the initial archival scan.", "boolean", None));

	let polling_interval_default = toml::Value::Integer(30);
	out.push(option_entry(&user, "run.polling_interval", polling_interval_default, "Polling interval in seconds used by the fallback watch backend.", "integer", None));

	let exclude_patterns_default = toml::Value::Array(Vec::new());
	out.push(option_entry(&user, "run.exclude_patterns", exclude_patterns_default, "Glob patterns excluded from scanning and live watching.", "array", None));

	let auto_discover_roots_default = toml::Value::Array(Vec::new());
	out.push(option_entry(&user, "run.auto_discover_roots", auto_discover_roots_default, "Parent directories whose mounted children are auto-discovered.", "array", None));

	let max_scan_workers_default = toml::Value::Integer(0);
	out.push(option_entry(&user, "run.max_scan_workers", max_scan_workers_default, "Maximum concurrent initial-scan workers (0 = host parallelism).", "integer", None));

	Ok(out)
}

fn option_entry(
	user: &UserConfig, key: &'static str, default: toml::Value, description: &'static str, value_type: &'static str,
	choices: Option<&'static [&'static str]>,
) -> OptionInfo {
	match user.values.get(key) {
		Some(value) => OptionInfo { key, value: value.clone(), default, description, value_type, choices, source: "user" },
		None => OptionInfo { key, value: default.clone(), default, description, value_type, choices, source: "default" },
	}
}

/// Look up one key's effective value, validating it is a known key (spec
/// §4.8 `GetValue`).
pub fn get_value(key: &str) -> Result<toml::Value> {
	let entries = list_config()?;
	entries
		.into_iter()
		.find(|e| e.key == key)
		.map(|e| e.value)
		.ok_or_else(|| DiskWatcherError::config(key, "unknown config key"))
}

pub fn get_log_level() -> String {
	get_value("log.level").ok().and_then(|v| v.as_str().map(str::to_string)).unwrap_or_else(|| "info".to_string())
}

pub fn get_auto_scan() -> bool {
	get_value("run.auto_scan").ok().and_then(|v| v.as_bool()).unwrap_or(true)
}

pub fn get_polling_interval() -> u64 {
	get_value("run.polling_interval").ok().and_then(|v| v.as_integer()).filter(|n| *n > 0).unwrap_or(30) as u64
}

pub fn get_exclude_patterns() -> Vec<String> {
	get_value("run.exclude_patterns")
		.ok()
		.and_then(|v| v.as_array().cloned())
		.unwrap_or_default()
		.into_iter()
		.filter_map(|v| v.as_str().map(str::to_string))
		.collect()
}

pub fn get_auto_discover_roots() -> Vec<PathBuf> {
	get_value("run.auto_discover_roots")
		.ok()
		.and_then(|v| v.as_array().cloned())
		.unwrap_or_default()
		.into_iter()
		.filter_map(|v| v.as_str().map(PathBuf::from))
		.collect()
}

pub fn get_max_scan_workers() -> Option<usize> {
	let value = get_value("run.max_scan_workers").ok().and_then(|v| v.as_integer()).unwrap_or(0);
	if value > 0 {
		Some(value as usize)
	} else {
		None
	}
}

const KNOWN_KEYS: &[&str] =
	&["log.level", "run.auto_scan", "run.polling_interval", "run.exclude_patterns", "run.auto_discover_roots", "run.max_scan_workers"];

/// Validate and persist `raw_value` under `key` (spec §4.8 `SetValue`).
/// Array-valued keys accept a comma-separated list.
pub fn set_value(key: &str, raw_value: &str) -> Result<toml::Value> {
	let path = config_path();
	let mut user = load_user_config(&path)?;

	let parsed = match key {
		"log.level" => toml::Value::String(parse_log_level(raw_value)?),
		"run.auto_scan" => toml::Value::Boolean(parse_bool(raw_value)?),
		"run.polling_interval" | "run.max_scan_workers" => {
			let parsed: i64 = raw_value
				.trim()
				.parse()
				.map_err(|_| DiskWatcherError::config(key, "expected a non-negative integer"))?;
			if parsed < 0 {
				return Err(DiskWatcherError::config(key, "expected a non-negative integer"));
			}
			toml::Value::Integer(parsed)
		}
		"run.exclude_patterns" | "run.auto_discover_roots" => toml::Value::Array(
			raw_value.split(',').map(str::trim).filter(|s| !s.is_empty()).map(|s| toml::Value::String(s.to_string())).collect(),
		),
		_ => return Err(DiskWatcherError::config(key, "unknown config key")),
	};

	user.values.insert(key.to_string(), parsed.clone());
	write_user_config(&path, &user)?;
	Ok(parsed)
}

/// Remove a user override, reverting `key` to its default (spec §4.8
/// `UnsetValue`). A no-op if no override existed.
pub fn unset_value(key: &str) -> Result<()> {
	if !KNOWN_KEYS.contains(&key) {
		return Err(DiskWatcherError::config(key, "unknown config key"));
	}
	let path = config_path();
	let mut user = load_user_config(&path)?;
	if user.values.remove(key).is_some() {
		write_user_config(&path, &user)?;
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use serial_test::serial;

	fn with_temp_config_dir<T>(f: impl FnOnce() -> T) -> T {
		let dir = tempfile::tempdir().unwrap();
		std::env::set_var(CONFIG_ENV_VAR, dir.path());
		let result = f();
		std::env::remove_var(CONFIG_ENV_VAR);
		result
	}

	#[test]
	#[serial]
	fn set_then_get_round_trips() {
		with_temp_config_dir(|| {
			set_value("log.level", "debug").unwrap();
			assert_eq!(get_log_level(), "debug");
		});
	}

	#[test]
	#[serial]
	fn unset_reverts_to_default() {
		with_temp_config_dir(|| {
			set_value("run.auto_scan", "false").unwrap();
			assert!(!get_auto_scan());
			unset_value("run.auto_scan").unwrap();
			assert!(get_auto_scan());
		});
	}

	#[test]
	fn unknown_key_is_rejected() {
		assert!(get_value("nonexistent.key").is_err());
	}

	#[test]
	fn warn_aliases_to_warning() {
		assert_eq!(parse_log_level("WARN").unwrap(), "warning");
	}

	#[test]
	fn invalid_log_level_is_rejected() {
		assert!(parse_log_level("verbose").is_err());
	}
}
