//! Debounced filesystem observer feeding the scanner.
//!
//! Events from the platform watcher land in a debounce buffer keyed by
//! path. A change only fires once the path has been quiet for the debounce
//! window and two consecutive stats agree, so half-written files are never
//! processed. Settled changes invalidate the cache entry and poke the
//! scanner's coalescing trigger; a settled config-file change notifies the
//! reload hook instead.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, UNIX_EPOCH};

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::health::{ComponentStatus, HealthState};
use crate::io::cache::CertCache;
use crate::scanner::discovery::{self, PathClass};
use crate::scanner::{ScanTrigger, Scanner};
use crate::util::config::SharedConfig;

pub(crate) const DEBOUNCE_WINDOW: Duration = Duration::from_secs(2);
const SWEEP_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, thiserror::Error)]
pub(crate) enum WatcherError {
	#[error("filesystem watcher failed: {0}")]
	Notify(#[from] notify::Error),
}

/// A change that survived the debounce/stability window.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum SettledChange {
	/// The path exists with stable stat keys.
	Changed(PathBuf),
	/// The path is gone (delete or move-out).
	Removed(PathBuf),
}

impl SettledChange {
	pub fn path(&self) -> &Path {
		match self {
			SettledChange::Changed(path) | SettledChange::Removed(path) => path,
		}
	}
}

struct PendingChange {
	last_event: Instant,
	last_stat: Option<(u64, u64)>,
}

/// The debounce buffer. Pure bookkeeping over `stat`, separated from the
/// event source so the settle rule is testable on its own.
pub(crate) struct DebounceBuffer {
	window: Duration,
	pending: HashMap<PathBuf, PendingChange>,
}

fn stat_keys(path: &Path) -> Option<(u64, u64)> {
	let meta = std::fs::metadata(path).ok()?;
	let mtime_ns = meta
		.modified()
		.ok()
		.and_then(|t| t.duration_since(UNIX_EPOCH).ok())
		.map(|d| d.as_nanos() as u64)
		.unwrap_or(0);
	Some((mtime_ns, meta.len()))
}

impl DebounceBuffer {
	pub fn new(window: Duration) -> Self {
		Self { window, pending: HashMap::new() }
	}

	/// Records an event for `path`, restarting its quiet window.
	pub fn note(&mut self, path: PathBuf) {
		let stat = stat_keys(&path);
		self.pending.insert(path, PendingChange { last_event: Instant::now(), last_stat: stat });
	}

	pub fn is_empty(&self) -> bool {
		self.pending.is_empty()
	}

	/// Emits every entry that has been idle for the window and whose stat
	/// matches the previous probe. Entries that changed since the last probe
	/// get a fresh window.
	pub fn sweep(&mut self) -> Vec<SettledChange> {
		let mut settled = Vec::new();
		let window = self.window;
		let mut restarted: Vec<(PathBuf, PendingChange)> = Vec::new();

		self.pending.retain(|path, entry| {
			if entry.last_event.elapsed() < window {
				return true;
			}
			let current = stat_keys(path);
			if current == entry.last_stat {
				settled.push(match current {
					Some(_) => SettledChange::Changed(path.clone()),
					None => SettledChange::Removed(path.clone()),
				});
				false
			} else {
				restarted.push((
					path.clone(),
					PendingChange { last_event: Instant::now(), last_stat: current },
				));
				false
			}
		});
		for (path, entry) in restarted {
			self.pending.insert(path, entry);
		}
		settled
	}
}

/// Starts the observer over every include root (and the config file's parent
/// directory, so atomic-rename updates are seen). Returns an error when the
/// platform event source cannot be constructed; the caller degrades to
/// periodic-only scanning in that case.
pub(crate) fn spawn(
	config: SharedConfig, cache: Arc<CertCache>, scanner: Arc<Scanner>, health: Arc<HealthState>,
	reload_tx: mpsc::Sender<()>, mut config_version: watch::Receiver<u64>,
	mut shutdown: watch::Receiver<bool>,
) -> Result<tokio::task::JoinHandle<()>, WatcherError> {
	let (event_tx, mut event_rx) = mpsc::unbounded_channel();
	let mut fs_watcher = RecommendedWatcher::new(
		move |result: notify::Result<notify::Event>| {
			let _ = event_tx.send(result);
		},
		notify::Config::default(),
	)?;

	let (roots, config_file) = {
		let guard = config.read().expect("config lock poisoned");
		let roots: Vec<PathBuf> =
			guard.include_dirs.iter().map(|p| discovery::normalize_path(p)).collect();
		(roots, guard.config_file.clone())
	};
	for root in &roots {
		fs_watcher.watch(root, RecursiveMode::Recursive)?;
	}
	if let Some(config_path) = &config_file {
		if let Some(parent) = config_path.parent() {
			// Watch the directory, not the file: editors and config
			// management tools replace files via rename.
			fs_watcher.watch(parent, RecursiveMode::NonRecursive)?;
		}
	}
	info!(roots = roots.len(), "filesystem observer started");
	health.set("watcher", ComponentStatus::Healthy, "filesystem events active".to_string());

	let handle = tokio::spawn(async move {
		// The watcher must stay alive for as long as the task runs.
		let mut fs_watcher = fs_watcher;
		let mut watched_roots = roots;
		let config_file = config_file.map(|p| discovery::normalize_path(&p));
		let mut buffer = DebounceBuffer::new(DEBOUNCE_WINDOW);
		let mut sweep = tokio::time::interval(SWEEP_INTERVAL);

		loop {
			tokio::select! {
				_ = shutdown.changed() => break,
				_ = config_version.changed() => {
					resync_watches(&mut fs_watcher, &mut watched_roots, &config);
				},
				maybe_event = event_rx.recv() => {
					let Some(result) = maybe_event else { break };
					match result {
						Ok(event) => note_event(&mut buffer, &event, config_file.as_deref()),
						Err(e) => warn!(error = %e, "filesystem watcher error"),
					}
				},
				_ = sweep.tick() => {
					if buffer.is_empty() {
						continue;
					}
					let mut dirty = false;
					for change in buffer.sweep() {
						let path = change.path().to_path_buf();
						if config_file.as_deref() == Some(path.as_path()) {
							info!(path = %path.display(), "configuration file settled; requesting reload");
							let _ = reload_tx.try_send(());
							continue;
						}
						debug!(?change, "filesystem change settled");
						cache.invalidate(&path.to_string_lossy());
						dirty = true;
					}
					if dirty {
						scanner.request_scan(ScanTrigger::FileEvent);
					}
				},
			}
		}
	});
	Ok(handle)
}

fn note_event(buffer: &mut DebounceBuffer, event: &notify::Event, config_file: Option<&Path>) {
	use notify::event::{CreateKind, RemoveKind};

	let dir_event = match event.kind {
		EventKind::Create(CreateKind::Folder) | EventKind::Remove(RemoveKind::Folder) => true,
		EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) => false,
		_ => return,
	};
	for path in &event.paths {
		let normalized = discovery::normalize_path(path);
		let interesting = config_file == Some(normalized.as_path())
			|| dir_event
			|| normalized.is_dir()
			|| normalized
				.file_name()
				.and_then(|name| name.to_str())
				.map(|name| discovery::classify_basename(name) != PathClass::Ignored)
				.unwrap_or(false);
		if interesting {
			buffer.note(normalized);
		}
	}
}

/// Brings the watched root set in line with the (possibly reloaded)
/// configuration. Roots that fail to watch are logged and skipped.
fn resync_watches(
	fs_watcher: &mut RecommendedWatcher, watched_roots: &mut Vec<PathBuf>, config: &SharedConfig,
) {
	let desired: Vec<PathBuf> = {
		let guard = config.read().expect("config lock poisoned");
		guard.include_dirs.iter().map(|p| discovery::normalize_path(p)).collect()
	};
	for stale in watched_roots.iter().filter(|root| !desired.contains(root)) {
		if let Err(e) = fs_watcher.unwatch(stale) {
			warn!(root = %stale.display(), error = %e, "failed to unwatch removed include root");
		}
	}
	for added in desired.iter().filter(|root| !watched_roots.contains(root)) {
		match fs_watcher.watch(added, RecursiveMode::Recursive) {
			Ok(()) => info!(root = %added.display(), "watching new include root"),
			Err(e) => warn!(root = %added.display(), error = %e, "failed to watch include root"),
		}
	}
	*watched_roots = desired;
}
