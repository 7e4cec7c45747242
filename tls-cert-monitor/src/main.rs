mod api;
mod cert;
mod health;
mod io;
mod metrics;
mod scanner;
mod service;
#[cfg(test)]
mod testutil;
mod util;

use std::sync::{Arc, RwLock};
use std::time::Duration;

use clap::Parser;
use tokio::net::{TcpListener, TcpStream};
use tokio::signal::unix::SignalKind;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use hyper::server::conn::http1;
use hyper_util::rt::{TokioIo, TokioTimer};
use tokio_rustls::TlsAcceptor;

use crate::health::{ComponentStatus, HealthState};
use crate::io::cache::CertCache;
use crate::io::persist;
use crate::metrics::MetricsAggregator;
use crate::scanner::{watcher, ScanTrigger, Scanner, SnapshotHandle};
use crate::service::MonitorService;
use crate::util::config::{load_config, ArgsConfig, Config, SharedConfig};

const HEADER_READ_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(60);
const CACHE_FLUSH_INTERVAL: Duration = Duration::from_secs(60);
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

fn main() {
	let args = ArgsConfig::parse();

	let config = match load_config(&args) {
		Ok(config) => config,
		Err(e) => {
			eprintln!("Invalid configuration: {}", e);
			std::process::exit(1);
		},
	};

	if let Err(e) = util::logging::init(&config.log_level, config.log_file.as_deref()) {
		eprintln!("{}", e);
		std::process::exit(1);
	}

	// TLS material is part of the configuration: refuse to start on bad input.
	let tls_config = match (&config.tls_cert, &config.tls_key) {
		(Some(cert_path), Some(key_path)) => {
			match util::tls::load_tls_config(cert_path, key_path) {
				Ok(tls_config) => Some(Arc::new(tls_config)),
				Err(e) => {
					eprintln!("Invalid TLS configuration: {}", e);
					std::process::exit(1);
				},
			}
		},
		_ => None,
	};

	let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
		Ok(runtime) => runtime,
		Err(e) => {
			eprintln!("Failed to set up tokio runtime: {}", e);
			std::process::exit(2);
		},
	};

	let shared_config: SharedConfig = Arc::new(RwLock::new(Arc::new(config.clone())));
	let cache = Arc::new(CertCache::new(config.cache_ttl, config.cache_max_bytes));
	match persist::load(&config.cache_dir) {
		Ok(entries) => {
			let count = entries.len();
			for (path, entry) in entries {
				cache.insert_entry(&path, entry);
			}
			if count > 0 {
				info!(entries = count, "restored persisted cache");
			}
		},
		Err(e) => warn!(error = %e, "discarding unusable persisted cache"),
	}

	let health = Arc::new(HealthState::new());
	health.set(
		"scanner",
		ComponentStatus::Degraded,
		"initial scan not yet completed".to_string(),
	);
	health.set("cache", ComponentStatus::Healthy, "persistence active".to_string());

	let snapshot = Arc::new(SnapshotHandle::new());
	let (scanner, trigger_rx) =
		Scanner::new(Arc::clone(&shared_config), Arc::clone(&cache), Arc::clone(&snapshot), Arc::clone(&health));
	let aggregator = Arc::new(MetricsAggregator::new(Arc::clone(&snapshot)));

	runtime.block_on(async {
		let mut sigterm_stream = match tokio::signal::unix::signal(SignalKind::terminate()) {
			Ok(stream) => stream,
			Err(e) => {
				error!(error = %e, "failed to register for SIGTERM");
				std::process::exit(2);
			},
		};

		let listener = match TcpListener::bind(config.socket_addr()).await {
			Ok(listener) => listener,
			Err(e) => {
				error!(addr = %config.socket_addr(), error = %e, "failed to bind HTTP endpoint");
				std::process::exit(2);
			},
		};
		info!(
			addr = %config.socket_addr(),
			tls = config.tls_enabled(),
			"certificate monitor listening"
		);

		let (shutdown_tx, shutdown_rx) = watch::channel(false);
		let (reload_tx, reload_rx) = mpsc::channel::<()>(1);
		let (config_version_tx, config_version_rx) = watch::channel(0u64);

		let scan_loop =
			tokio::spawn(Arc::clone(&scanner).run(trigger_rx, shutdown_rx.clone()));
		tokio::spawn(scan_ticker(
			Arc::clone(&shared_config),
			Arc::clone(&scanner),
			shutdown_rx.clone(),
		));
		tokio::spawn(cache_flush_loop(
			Arc::clone(&cache),
			Arc::clone(&shared_config),
			Arc::clone(&health),
			shutdown_rx.clone(),
		));

		if config.hot_reload {
			let spawned = watcher::spawn(
				Arc::clone(&shared_config),
				Arc::clone(&cache),
				Arc::clone(&scanner),
				Arc::clone(&health),
				reload_tx.clone(),
				config_version_rx,
				shutdown_rx.clone(),
			);
			if let Err(e) = spawned {
				warn!(error = %e, "filesystem observer unavailable; scanning on interval only");
				health.set("watcher", ComponentStatus::Degraded, e.to_string());
			}
		} else {
			health.set(
				"watcher",
				ComponentStatus::Healthy,
				"hot reload disabled by configuration".to_string(),
			);
		}

		tokio::spawn(reload_loop(
			args,
			Arc::clone(&shared_config),
			config_version_tx,
			Arc::clone(&scanner),
			reload_rx,
			shutdown_rx.clone(),
		));

		scanner.request_scan(ScanTrigger::Startup);

		let monitor_service = MonitorService::new(
			Arc::clone(&scanner),
			Arc::clone(&cache),
			Arc::clone(&aggregator),
			Arc::clone(&health),
			Arc::clone(&shared_config),
		);
		let tls_acceptor = tls_config.map(TlsAcceptor::from);
		let mut connections: JoinSet<()> = JoinSet::new();

		loop {
			tokio::select! {
				result = listener.accept() => match result {
					Ok((stream, _)) => {
						let service = monitor_service.clone();
						let acceptor = tls_acceptor.clone();
						let shutdown = shutdown_rx.clone();
						connections.spawn(async move {
							handle_connection(stream, acceptor, service, shutdown).await;
						});
					},
					Err(e) => warn!(error = %e, "failed to accept connection"),
				},
				// Reap finished connection tasks so the set stays small.
				Some(_) = connections.join_next(), if !connections.is_empty() => {},
				_ = tokio::signal::ctrl_c() => {
					info!("received SIGINT, shutting down");
					break;
				},
				_ = sigterm_stream.recv() => {
					info!("received SIGTERM, shutting down");
					break;
				},
			}
		}

		let _ = shutdown_tx.send(true);
		let drain = async {
			let _ = scan_loop.await;
			while connections.join_next().await.is_some() {}
			final_cache_flush(&cache, &shared_config).await;
		};
		if tokio::time::timeout(SHUTDOWN_TIMEOUT, drain).await.is_err() {
			error!("shutdown did not complete within {:?}", SHUTDOWN_TIMEOUT);
			std::process::exit(3);
		}
		info!("shutdown complete");
	});
}

/// Serves one connection, optionally behind TLS. The connection is asked to
/// finish in-flight requests on shutdown and is bounded by a hard timeout.
async fn handle_connection(
	stream: TcpStream, tls_acceptor: Option<TlsAcceptor>, service: MonitorService,
	shutdown: watch::Receiver<bool>,
) {
	match tls_acceptor {
		Some(acceptor) => match acceptor.accept(stream).await {
			Ok(tls_stream) => serve_io(tls_stream, service, shutdown).await,
			Err(e) => debug!(error = %e, "TLS handshake failed"),
		},
		None => serve_io(stream, service, shutdown).await,
	}
}

async fn serve_io<I>(io: I, service: MonitorService, mut shutdown: watch::Receiver<bool>)
where
	I: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
	let mut builder = http1::Builder::new();
	builder.timer(TokioTimer::new());
	builder.header_read_timeout(HEADER_READ_TIMEOUT);
	let conn = builder.serve_connection(TokioIo::new(io), service);
	tokio::pin!(conn);

	tokio::select! {
		result = conn.as_mut() => {
			if let Err(e) = result {
				debug!(error = %e, "failed to serve connection");
			}
		},
		_ = shutdown.changed() => {
			conn.as_mut().graceful_shutdown();
			let _ = conn.as_mut().await;
		},
		_ = tokio::time::sleep(CONNECTION_TIMEOUT) => {
			debug!("connection timed out");
		},
	}
}

/// Periodic scan trigger. Re-reads the interval every round so a reload
/// takes effect without restarting the loop.
async fn scan_ticker(
	config: SharedConfig, scanner: Arc<Scanner>, mut shutdown: watch::Receiver<bool>,
) {
	loop {
		let interval = {
			let guard = config.read().expect("config lock poisoned");
			guard.scan_interval
		};
		tokio::select! {
			_ = shutdown.changed() => break,
			_ = tokio::time::sleep(interval) => {
				scanner.request_scan(ScanTrigger::Tick);
			},
		}
	}
}

async fn cache_flush_loop(
	cache: Arc<CertCache>, config: SharedConfig, health: Arc<HealthState>,
	mut shutdown: watch::Receiver<bool>,
) {
	loop {
		tokio::select! {
			_ = shutdown.changed() => break,
			_ = tokio::time::sleep(CACHE_FLUSH_INTERVAL) => {
				flush_cache(&cache, &config, Some(&health)).await;
			},
		}
	}
}

async fn final_cache_flush(cache: &Arc<CertCache>, config: &SharedConfig) {
	flush_cache(cache, config, None).await;
}

/// Persists the live cache entries off the hot path. A failed flush leaves
/// the cache running in memory and degrades `/healthz`.
async fn flush_cache(cache: &Arc<CertCache>, config: &SharedConfig, health: Option<&Arc<HealthState>>) {
	let entries = cache.live_entries();
	let cache_dir = {
		let guard = config.read().expect("config lock poisoned");
		guard.cache_dir.clone()
	};
	let count = entries.len();
	let result =
		tokio::task::spawn_blocking(move || persist::save(&cache_dir, &entries)).await;
	match result {
		Ok(Ok(())) => {
			debug!(entries = count, "cache flushed to disk");
			if let Some(health) = health {
				health.set("cache", ComponentStatus::Healthy, "persistence active".to_string());
			}
		},
		Ok(Err(e)) => {
			warn!(error = %e, "cache flush failed; continuing in-memory only");
			if let Some(health) = health {
				health.set("cache", ComponentStatus::Degraded, e.to_string());
			}
		},
		Err(e) => warn!(error = %e, "cache flush task failed"),
	}
}

/// Applies a settled config-file change. Mutable settings take effect for
/// the next scan; settings that would need a restart keep their running
/// values and are called out in the log.
async fn reload_loop(
	args: ArgsConfig, config: SharedConfig, config_version_tx: watch::Sender<u64>,
	scanner: Arc<Scanner>, mut reload_rx: mpsc::Receiver<()>, mut shutdown: watch::Receiver<bool>,
) {
	loop {
		tokio::select! {
			_ = shutdown.changed() => break,
			maybe_reload = reload_rx.recv() => {
				if maybe_reload.is_none() {
					break;
				}
				match load_config(&args) {
					Ok(incoming) => {
						apply_reload(&config, incoming);
						config_version_tx.send_modify(|version| *version += 1);
						scanner.request_scan(ScanTrigger::FileEvent);
					},
					Err(e) => {
						warn!(error = %e, "configuration reload failed; keeping previous configuration");
					},
				}
			},
		}
	}
}

fn apply_reload(shared: &SharedConfig, mut incoming: Config) {
	let mut guard = shared.write().expect("config lock poisoned");
	let current = Arc::clone(&guard);

	let mut restart_required = Vec::new();
	if incoming.port != current.port || incoming.bind != current.bind {
		restart_required.push("bind/port");
		incoming.port = current.port;
		incoming.bind = current.bind;
	}
	if incoming.tls_cert != current.tls_cert || incoming.tls_key != current.tls_key {
		restart_required.push("tls material");
		incoming.tls_cert = current.tls_cert.clone();
		incoming.tls_key = current.tls_key.clone();
	}
	if incoming.cache_dir != current.cache_dir
		|| incoming.cache_ttl != current.cache_ttl
		|| incoming.cache_max_bytes != current.cache_max_bytes
	{
		restart_required.push("cache settings");
		incoming.cache_dir = current.cache_dir.clone();
		incoming.cache_ttl = current.cache_ttl;
		incoming.cache_max_bytes = current.cache_max_bytes;
	}
	if incoming.log_level != current.log_level || incoming.log_file != current.log_file {
		restart_required.push("logging");
		incoming.log_level = current.log_level.clone();
		incoming.log_file = current.log_file.clone();
	}
	if !restart_required.is_empty() {
		warn!(
			settings = restart_required.join(", "),
			"changed settings need a restart to take effect"
		);
	}

	*guard = Arc::new(incoming);
	drop(guard);
	info!("configuration reloaded");
}
