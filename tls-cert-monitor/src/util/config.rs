// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use std::{fs, io};

use clap::Parser;
use serde::Deserialize;

const DEFAULT_PORT: u16 = 9090;
const DEFAULT_BIND: &str = "0.0.0.0";
const DEFAULT_SCAN_INTERVAL_SECS: u64 = 300;
const DEFAULT_WORKERS: usize = 4;
const DEFAULT_CACHE_TTL_SECS: u64 = 3600;
const DEFAULT_CACHE_MAX_BYTES: u64 = 10 * 1024 * 1024;
const DEFAULT_LOG_LEVEL: &str = "info";

/// Configuration for the certificate monitor. Values merge from the YAML
/// config file, then CLI arguments / `TLS_MONITOR_*` environment variables
/// on top.
#[derive(Clone, Debug)]
pub(crate) struct Config {
	pub port: u16,
	pub bind: IpAddr,
	pub tls_cert: Option<PathBuf>,
	pub tls_key: Option<PathBuf>,
	pub include_dirs: Vec<PathBuf>,
	pub exclude_dirs: Vec<PathBuf>,
	pub scan_interval: Duration,
	pub workers: usize,
	pub cache_dir: PathBuf,
	pub cache_ttl: Duration,
	pub cache_max_bytes: u64,
	pub p12_passwords: Vec<String>,
	pub hot_reload: bool,
	pub log_level: String,
	pub log_file: Option<PathBuf>,
	pub config_file: Option<PathBuf>,
}

/// The effective configuration, shared across components. Hot reload swaps
/// the inner `Arc`; readers always see one coherent configuration.
pub(crate) type SharedConfig = std::sync::Arc<std::sync::RwLock<std::sync::Arc<Config>>>;

impl Config {
	pub fn socket_addr(&self) -> SocketAddr {
		SocketAddr::new(self.bind, self.port)
	}

	pub fn tls_enabled(&self) -> bool {
		self.tls_cert.is_some() && self.tls_key.is_some()
	}

	#[cfg(test)]
	pub fn for_tests() -> Self {
		Self {
			port: DEFAULT_PORT,
			bind: DEFAULT_BIND.parse().unwrap(),
			tls_cert: None,
			tls_key: None,
			include_dirs: Vec::new(),
			exclude_dirs: Vec::new(),
			scan_interval: Duration::from_secs(DEFAULT_SCAN_INTERVAL_SECS),
			workers: DEFAULT_WORKERS,
			cache_dir: std::env::temp_dir().join("tls-cert-monitor-test-cache"),
			cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
			cache_max_bytes: DEFAULT_CACHE_MAX_BYTES,
			p12_passwords: vec![String::new()],
			hot_reload: false,
			log_level: DEFAULT_LOG_LEVEL.to_string(),
			log_file: None,
			config_file: None,
		}
	}
}

/// A builder for `Config`.
#[derive(Default)]
struct ConfigBuilder {
	port: Option<u16>,
	bind: Option<String>,
	tls_cert: Option<String>,
	tls_key: Option<String>,
	include_dirs: Option<Vec<String>>,
	exclude_dirs: Option<Vec<String>>,
	scan_interval_secs: Option<u64>,
	workers: Option<usize>,
	cache_dir: Option<String>,
	cache_ttl_secs: Option<u64>,
	cache_max_bytes: Option<u64>,
	p12_passwords: Option<Vec<String>>,
	hot_reload: Option<bool>,
	log_level: Option<String>,
	log_file: Option<String>,
	config_file: Option<PathBuf>,
}

impl ConfigBuilder {
	fn merge_yaml(&mut self, yaml: YamlConfig) {
		self.port = yaml.port.or(self.port);
		self.bind = yaml.bind.or(self.bind.clone());
		self.tls_cert = yaml.tls_cert.or(self.tls_cert.clone());
		self.tls_key = yaml.tls_key.or(self.tls_key.clone());
		self.include_dirs = yaml.include_dirs.or(self.include_dirs.clone());
		self.exclude_dirs = yaml.exclude_dirs.or(self.exclude_dirs.clone());
		self.scan_interval_secs = yaml.scan_interval.or(self.scan_interval_secs);
		self.workers = yaml.workers.or(self.workers);
		self.cache_dir = yaml.cache_dir.or(self.cache_dir.clone());
		self.cache_ttl_secs = yaml.cache_ttl.or(self.cache_ttl_secs);
		self.cache_max_bytes = yaml.cache_max_bytes.or(self.cache_max_bytes);
		self.p12_passwords = yaml.p12_passwords.or(self.p12_passwords.clone());
		self.hot_reload = yaml.hot_reload.or(self.hot_reload);
		self.log_level = yaml.log_level.or(self.log_level.clone());
		self.log_file = yaml.log_file.or(self.log_file.clone());
	}

	fn merge_args(&mut self, args: &ArgsConfig) {
		if let Some(port) = args.port {
			self.port = Some(port);
		}
		if let Some(bind) = &args.bind {
			self.bind = Some(bind.clone());
		}
		if let Some(tls_cert) = &args.tls_cert {
			self.tls_cert = Some(tls_cert.clone());
		}
		if let Some(tls_key) = &args.tls_key {
			self.tls_key = Some(tls_key.clone());
		}
		if let Some(include_dirs) = &args.include_dirs {
			self.include_dirs = Some(include_dirs.clone());
		}
		if let Some(exclude_dirs) = &args.exclude_dirs {
			self.exclude_dirs = Some(exclude_dirs.clone());
		}
		if let Some(scan_interval) = args.scan_interval {
			self.scan_interval_secs = Some(scan_interval);
		}
		if let Some(workers) = args.workers {
			self.workers = Some(workers);
		}
		if let Some(cache_dir) = &args.cache_dir {
			self.cache_dir = Some(cache_dir.clone());
		}
		if let Some(cache_ttl) = args.cache_ttl {
			self.cache_ttl_secs = Some(cache_ttl);
		}
		if let Some(cache_max_bytes) = args.cache_max_bytes {
			self.cache_max_bytes = Some(cache_max_bytes);
		}
		if let Some(p12_passwords) = &args.p12_passwords {
			self.p12_passwords = Some(p12_passwords.clone());
		}
		if let Some(hot_reload) = args.hot_reload {
			self.hot_reload = Some(hot_reload);
		}
		if let Some(log_level) = &args.log_level {
			self.log_level = Some(log_level.clone());
		}
		if let Some(log_file) = &args.log_file {
			self.log_file = Some(log_file.clone());
		}
	}

	fn build(self) -> io::Result<Config> {
		let port = self.port.unwrap_or(DEFAULT_PORT);
		if port == 0 {
			return Err(io::Error::new(
				io::ErrorKind::InvalidInput,
				"Invalid `port`: must be between 1 and 65535.".to_string(),
			));
		}

		let bind = self
			.bind
			.unwrap_or_else(|| DEFAULT_BIND.to_string())
			.parse::<IpAddr>()
			.map_err(|e| {
				io::Error::new(io::ErrorKind::InvalidInput, format!("Invalid `bind` address: {}", e))
			})?;

		let include_dirs: Vec<PathBuf> = self
			.include_dirs
			.filter(|dirs| !dirs.is_empty())
			.ok_or_else(|| missing_field_err("include_dirs"))?
			.into_iter()
			.map(PathBuf::from)
			.collect();
		for dir in &include_dirs {
			if !dir.is_dir() {
				return Err(io::Error::new(
					io::ErrorKind::InvalidInput,
					format!("Include root does not exist: {}", dir.display()),
				));
			}
		}
		let exclude_dirs: Vec<PathBuf> =
			self.exclude_dirs.unwrap_or_default().into_iter().map(PathBuf::from).collect();

		let (tls_cert, tls_key) = match (self.tls_cert, self.tls_key) {
			(Some(cert), Some(key)) => {
				for path in [&cert, &key] {
					fs::metadata(path).map_err(|e| {
						io::Error::new(
							io::ErrorKind::InvalidInput,
							format!("Unreadable TLS material '{}': {}", path, e),
						)
					})?;
				}
				(Some(PathBuf::from(cert)), Some(PathBuf::from(key)))
			},
			(None, None) => (None, None),
			_ => {
				return Err(io::Error::new(
					io::ErrorKind::InvalidInput,
					"`tls_cert` and `tls_key` must be configured together.".to_string(),
				));
			},
		};

		let scan_interval_secs = self.scan_interval_secs.unwrap_or(DEFAULT_SCAN_INTERVAL_SECS);
		if scan_interval_secs == 0 {
			return Err(io::Error::new(
				io::ErrorKind::InvalidInput,
				"Invalid `scan_interval`: must be at least one second.".to_string(),
			));
		}

		let workers = self.workers.unwrap_or(DEFAULT_WORKERS);
		if workers == 0 {
			return Err(io::Error::new(
				io::ErrorKind::InvalidInput,
				"Invalid `workers`: must be at least 1.".to_string(),
			));
		}

		let log_level = self.log_level.unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());
		tracing::level_filters::LevelFilter::from_str(&log_level).map_err(|_| {
			io::Error::new(
				io::ErrorKind::InvalidInput,
				format!("Invalid `log_level`: {}", log_level),
			)
		})?;

		let cache_dir = self
			.cache_dir
			.map(PathBuf::from)
			.unwrap_or_else(|| std::env::temp_dir().join("tls-cert-monitor"));

		let mut p12_passwords = self.p12_passwords.unwrap_or_default();
		if p12_passwords.is_empty() {
			p12_passwords.push(String::new());
		}

		Ok(Config {
			port,
			bind,
			tls_cert,
			tls_key,
			include_dirs,
			exclude_dirs,
			scan_interval: Duration::from_secs(scan_interval_secs),
			workers,
			cache_dir,
			cache_ttl: Duration::from_secs(self.cache_ttl_secs.unwrap_or(DEFAULT_CACHE_TTL_SECS)),
			cache_max_bytes: self.cache_max_bytes.unwrap_or(DEFAULT_CACHE_MAX_BYTES),
			p12_passwords,
			hot_reload: self.hot_reload.unwrap_or(true),
			log_level,
			log_file: self.log_file.map(PathBuf::from),
			config_file: self.config_file,
		})
	}
}

/// Configuration loaded from a YAML file.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct YamlConfig {
	port: Option<u16>,
	bind: Option<String>,
	tls_cert: Option<String>,
	tls_key: Option<String>,
	include_dirs: Option<Vec<String>>,
	exclude_dirs: Option<Vec<String>>,
	scan_interval: Option<u64>,
	workers: Option<usize>,
	cache_dir: Option<String>,
	cache_ttl: Option<u64>,
	cache_max_bytes: Option<u64>,
	p12_passwords: Option<Vec<String>>,
	hot_reload: Option<bool>,
	log_level: Option<String>,
	log_file: Option<String>,
}

#[derive(Parser, Debug, Default)]
#[command(
	version,
	about = "TLS certificate monitor",
	long_about = None,
	override_usage = "tls-cert-monitor [config_path]"
)]
pub(crate) struct ArgsConfig {
	#[arg(required = false, help = "The YAML configuration file for the monitor.")]
	pub config_file: Option<String>,

	#[arg(long, env = "TLS_MONITOR_PORT", help = "The port the HTTP endpoint listens on.")]
	pub port: Option<u16>,

	#[arg(long, env = "TLS_MONITOR_BIND", help = "The address the HTTP endpoint binds to.")]
	pub bind: Option<String>,

	#[arg(long, env = "TLS_MONITOR_TLS_CERT", help = "Server TLS certificate path (PEM).")]
	pub tls_cert: Option<String>,

	#[arg(long, env = "TLS_MONITOR_TLS_KEY", help = "Server TLS private key path (PEM).")]
	pub tls_key: Option<String>,

	#[arg(
		long,
		env = "TLS_MONITOR_INCLUDE_DIRS",
		value_delimiter = ',',
		help = "Comma-separated directories to scan for certificates."
	)]
	pub include_dirs: Option<Vec<String>>,

	#[arg(
		long,
		env = "TLS_MONITOR_EXCLUDE_DIRS",
		value_delimiter = ',',
		help = "Comma-separated directories to exclude from scanning."
	)]
	pub exclude_dirs: Option<Vec<String>>,

	#[arg(long, env = "TLS_MONITOR_SCAN_INTERVAL", help = "Seconds between periodic scans.")]
	pub scan_interval: Option<u64>,

	#[arg(long, env = "TLS_MONITOR_WORKERS", help = "Number of parallel parse workers.")]
	pub workers: Option<usize>,

	#[arg(long, env = "TLS_MONITOR_CACHE_DIR", help = "Directory for the persistent cache.")]
	pub cache_dir: Option<String>,

	#[arg(long, env = "TLS_MONITOR_CACHE_TTL", help = "Cache entry time-to-live in seconds.")]
	pub cache_ttl: Option<u64>,

	#[arg(long, env = "TLS_MONITOR_CACHE_MAX_BYTES", help = "Cache size budget in bytes.")]
	pub cache_max_bytes: Option<u64>,

	#[arg(
		long,
		env = "TLS_MONITOR_P12_PASSWORDS",
		value_delimiter = ',',
		help = "Comma-separated passwords tried against PKCS#12 bundles."
	)]
	pub p12_passwords: Option<Vec<String>>,

	#[arg(long, env = "TLS_MONITOR_HOT_RELOAD", help = "Watch the filesystem for changes.")]
	pub hot_reload: Option<bool>,

	#[arg(long, env = "TLS_MONITOR_LOG_LEVEL", help = "Log level (error/warn/info/debug/trace).")]
	pub log_level: Option<String>,

	#[arg(long, env = "TLS_MONITOR_LOG_FILE", help = "Optional log file path.")]
	pub log_file: Option<String>,
}

pub(crate) fn load_config(args: &ArgsConfig) -> io::Result<Config> {
	let mut builder = ConfigBuilder::default();

	if let Some(path) = &args.config_file {
		let path = PathBuf::from(path);
		let content = fs::read_to_string(&path).map_err(|e| {
			io::Error::new(e.kind(), format!("Failed to read config file '{:?}': {}", path, e))
		})?;
		let yaml_config: YamlConfig = serde_yaml::from_str(&content).map_err(|e| {
			io::Error::new(
				io::ErrorKind::InvalidData,
				format!("Config file contains invalid YAML: {}", e),
			)
		})?;
		builder.merge_yaml(yaml_config);
		builder.config_file = Some(path);
	}

	builder.merge_args(args);

	builder.build()
}

fn missing_field_err(field: &str) -> io::Error {
	io::Error::new(
		io::ErrorKind::InvalidInput,
		format!(
			"Missing `{}`. Please provide it via config file, CLI argument, or environment variable.",
			field
		),
	)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn write_config(name: &str, content: &str) -> ArgsConfig {
		let path = std::env::temp_dir().join(name);
		fs::write(&path, content).unwrap();
		ArgsConfig { config_file: Some(path.to_string_lossy().to_string()), ..Default::default() }
	}

	fn default_yaml(include_dir: &str) -> String {
		format!(
			r#"
port: 9443
bind: "127.0.0.1"
include_dirs:
  - {include_dir}
exclude_dirs:
  - {include_dir}/private
scan_interval: 60
workers: 8
cache_ttl: 600
cache_max_bytes: 1048576
p12_passwords: ["", "changeit"]
hot_reload: false
log_level: debug
"#
		)
	}

	#[test]
	fn test_config_from_file() {
		let include = tempfile::tempdir().unwrap();
		let args = write_config(
			"test_config_from_file.yaml",
			&default_yaml(&include.path().to_string_lossy()),
		);

		let config = load_config(&args).unwrap();
		assert_eq!(config.port, 9443);
		assert_eq!(config.bind, "127.0.0.1".parse::<IpAddr>().unwrap());
		assert_eq!(config.include_dirs, vec![include.path().to_path_buf()]);
		assert_eq!(config.exclude_dirs.len(), 1);
		assert_eq!(config.scan_interval, Duration::from_secs(60));
		assert_eq!(config.workers, 8);
		assert_eq!(config.cache_ttl, Duration::from_secs(600));
		assert_eq!(config.cache_max_bytes, 1048576);
		assert_eq!(config.p12_passwords, vec![String::new(), "changeit".to_string()]);
		assert!(!config.hot_reload);
		assert_eq!(config.log_level, "debug");
		assert!(config.tls_cert.is_none());
		assert_eq!(config.socket_addr().to_string(), "127.0.0.1:9443");
	}

	#[test]
	fn test_args_override_file() {
		let include = tempfile::tempdir().unwrap();
		let other_include = tempfile::tempdir().unwrap();
		let mut args = write_config(
			"test_args_override_file.yaml",
			&default_yaml(&include.path().to_string_lossy()),
		);
		args.port = Some(9999);
		args.include_dirs = Some(vec![other_include.path().to_string_lossy().to_string()]);
		args.workers = Some(2);

		let config = load_config(&args).unwrap();
		assert_eq!(config.port, 9999);
		assert_eq!(config.include_dirs, vec![other_include.path().to_path_buf()]);
		assert_eq!(config.workers, 2);
		// Untouched values still come from the file.
		assert_eq!(config.scan_interval, Duration::from_secs(60));
	}

	#[test]
	fn test_missing_include_dirs() {
		let args = ArgsConfig::default();
		let err = load_config(&args).unwrap_err();
		assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
		assert!(err.to_string().contains("include_dirs"), "{}", err);
	}

	#[test]
	fn test_nonexistent_include_root() {
		let mut args = ArgsConfig::default();
		args.include_dirs = Some(vec!["/definitely/not/a/real/dir".to_string()]);
		let err = load_config(&args).unwrap_err();
		assert!(err.to_string().contains("does not exist"), "{}", err);
	}

	#[test]
	fn test_tls_requires_both_paths() {
		let include = tempfile::tempdir().unwrap();
		let mut args = ArgsConfig::default();
		args.include_dirs = Some(vec![include.path().to_string_lossy().to_string()]);
		args.tls_cert = Some("/some/cert.pem".to_string());
		let err = load_config(&args).unwrap_err();
		assert!(err.to_string().contains("configured together"), "{}", err);
	}

	#[test]
	fn test_unreadable_tls_material() {
		let include = tempfile::tempdir().unwrap();
		let mut args = ArgsConfig::default();
		args.include_dirs = Some(vec![include.path().to_string_lossy().to_string()]);
		args.tls_cert = Some("/missing/cert.pem".to_string());
		args.tls_key = Some("/missing/key.pem".to_string());
		let err = load_config(&args).unwrap_err();
		assert!(err.to_string().contains("Unreadable TLS material"), "{}", err);
	}

	#[test]
	fn test_invalid_values_are_rejected() {
		let include = tempfile::tempdir().unwrap();
		let include_str = include.path().to_string_lossy().to_string();

		let mut args = ArgsConfig::default();
		args.include_dirs = Some(vec![include_str.clone()]);
		args.bind = Some("not-an-ip".to_string());
		assert!(load_config(&args).is_err());

		let mut args = ArgsConfig::default();
		args.include_dirs = Some(vec![include_str.clone()]);
		args.workers = Some(0);
		assert!(load_config(&args).is_err());

		let mut args = ArgsConfig::default();
		args.include_dirs = Some(vec![include_str.clone()]);
		args.scan_interval = Some(0);
		assert!(load_config(&args).is_err());

		let mut args = ArgsConfig::default();
		args.include_dirs = Some(vec![include_str]);
		args.log_level = Some("chatty".to_string());
		assert!(load_config(&args).is_err());
	}

	#[test]
	fn test_defaults() {
		let include = tempfile::tempdir().unwrap();
		let mut args = ArgsConfig::default();
		args.include_dirs = Some(vec![include.path().to_string_lossy().to_string()]);

		let config = load_config(&args).unwrap();
		assert_eq!(config.port, DEFAULT_PORT);
		assert_eq!(config.workers, DEFAULT_WORKERS);
		assert_eq!(config.scan_interval, Duration::from_secs(DEFAULT_SCAN_INTERVAL_SECS));
		assert_eq!(config.p12_passwords, vec![String::new()]);
		assert!(config.hot_reload);
		assert!(!config.tls_enabled());
	}

	#[test]
	fn test_invalid_yaml_is_rejected() {
		let args = write_config("test_invalid_yaml.yaml", "port: [not a port");
		let err = load_config(&args).unwrap_err();
		assert_eq!(err.kind(), io::ErrorKind::InvalidData);
	}
}
