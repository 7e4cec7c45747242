//! Scan coordination: discovery, the parse worker pool, and snapshot
//! publication.
//!
//! Scans are serialized by the trigger channel: one scan runs at a time and
//! at most one follow-up is queued. Whoever triggers a scan while the queue
//! is full is coalesced into the pending one. Only this module ever writes
//! the published snapshot.

pub(crate) mod discovery;
pub(crate) mod watcher;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::UNIX_EPOCH;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::cert::{parser, CertificateRecord};
use crate::health::{ComponentStatus, HealthState};
use crate::io::cache::CertCache;
use crate::util::config::SharedConfig;

/// The immutable result of one completed scan; the unit of atomic
/// publication.
#[derive(Clone, Debug)]
pub(crate) struct ScanSnapshot {
	pub generation: u64,
	pub started_at: DateTime<Utc>,
	pub finished_at: DateTime<Utc>,
	/// Records keyed by `source_path`.
	pub records: BTreeMap<String, CertificateRecord>,
	/// Fingerprints occurring at two or more distinct source paths.
	pub duplicate_groups: BTreeMap<String, u64>,
	pub files_seen: u64,
	pub parsed_ok: u64,
	pub parse_errors: u64,
	pub private_keys_skipped: u64,
}

impl ScanSnapshot {
	pub fn empty() -> Self {
		let epoch = DateTime::<Utc>::UNIX_EPOCH;
		Self {
			generation: 0,
			started_at: epoch,
			finished_at: epoch,
			records: BTreeMap::new(),
			duplicate_groups: BTreeMap::new(),
			files_seen: 0,
			parsed_ok: 0,
			parse_errors: 0,
			private_keys_skipped: 0,
		}
	}

	pub fn duration_seconds(&self) -> f64 {
		(self.finished_at - self.started_at).num_milliseconds().max(0) as f64 / 1000.0
	}
}

/// Single-writer, many-reader handle to the published snapshot. Readers get
/// an `Arc` clone and can never observe a partially built snapshot.
pub(crate) struct SnapshotHandle {
	current: RwLock<Arc<ScanSnapshot>>,
}

impl SnapshotHandle {
	pub fn new() -> Self {
		Self { current: RwLock::new(Arc::new(ScanSnapshot::empty())) }
	}

	pub fn load(&self) -> Arc<ScanSnapshot> {
		Arc::clone(&self.current.read().expect("snapshot lock poisoned"))
	}

	fn store(&self, snapshot: Arc<ScanSnapshot>) {
		*self.current.write().expect("snapshot lock poisoned") = snapshot;
	}

	#[cfg(test)]
	pub fn publish_for_tests(&self, snapshot: Arc<ScanSnapshot>) {
		self.store(snapshot);
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ScanTrigger {
	Startup,
	Tick,
	Manual,
	FileEvent,
}

/// What happened to a scan request: either it was queued (and will run as
/// `generation`) or it coalesced into an already-pending scan.
#[derive(Clone, Copy, Debug)]
pub(crate) struct ScanRequestOutcome {
	pub generation: u64,
	pub coalesced: bool,
}

enum FileOutcome {
	Parsed(Vec<CertificateRecord>),
	Failed,
}

pub(crate) struct Scanner {
	config: SharedConfig,
	cache: Arc<CertCache>,
	snapshot: Arc<SnapshotHandle>,
	health: Arc<HealthState>,
	generation: AtomicU64,
	trigger_tx: mpsc::Sender<ScanTrigger>,
}

impl Scanner {
	pub fn new(
		config: SharedConfig, cache: Arc<CertCache>, snapshot: Arc<SnapshotHandle>,
		health: Arc<HealthState>,
	) -> (Arc<Self>, mpsc::Receiver<ScanTrigger>) {
		// Capacity 1: one scan can be pending while another runs; every
		// further trigger coalesces.
		let (trigger_tx, trigger_rx) = mpsc::channel(1);
		let scanner = Arc::new(Self {
			config,
			cache,
			snapshot,
			health,
			generation: AtomicU64::new(0),
			trigger_tx,
		});
		(scanner, trigger_rx)
	}

	pub fn snapshot(&self) -> Arc<ScanSnapshot> {
		self.snapshot.load()
	}

	/// Requests a scan through the coalescing trigger.
	pub fn request_scan(&self, trigger: ScanTrigger) -> ScanRequestOutcome {
		let next = self.generation.load(Ordering::SeqCst) + 1;
		match self.trigger_tx.try_send(trigger) {
			Ok(()) => ScanRequestOutcome { generation: next, coalesced: false },
			Err(TrySendError::Full(_)) => {
				debug!(?trigger, "scan already running and one queued; trigger dropped");
				ScanRequestOutcome { generation: next, coalesced: true }
			},
			Err(TrySendError::Closed(_)) => {
				debug!(?trigger, "scan loop stopped; trigger dropped");
				ScanRequestOutcome { generation: self.generation.load(Ordering::SeqCst), coalesced: true }
			},
		}
	}

	/// The scan loop. Runs until shutdown is signalled or every trigger
	/// sender is gone. A shutdown mid-scan discards the partial results and
	/// leaves the previously published snapshot in place.
	pub async fn run(
		self: Arc<Self>, mut trigger_rx: mpsc::Receiver<ScanTrigger>,
		mut shutdown: tokio::sync::watch::Receiver<bool>,
	) {
		loop {
			let trigger = tokio::select! {
				_ = shutdown.changed() => break,
				maybe_trigger = trigger_rx.recv() => match maybe_trigger {
					Some(trigger) => trigger,
					None => break,
				},
			};

			let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
			debug!(?trigger, generation, "scan starting");

			let snapshot = tokio::select! {
				_ = shutdown.changed() => {
					info!(generation, "scan cancelled by shutdown");
					break;
				},
				snapshot = self.scan_once(generation) => snapshot,
			};

			info!(
				generation,
				files_seen = snapshot.files_seen,
				parsed_ok = snapshot.parsed_ok,
				parse_errors = snapshot.parse_errors,
				duplicates = snapshot.duplicate_groups.len(),
				duration_seconds = snapshot.duration_seconds(),
				"scan complete"
			);
			self.snapshot.store(Arc::new(snapshot));
			self.health.set(
				"scanner",
				ComponentStatus::Healthy,
				format!("generation {} published", generation),
			);
		}
	}

	/// Runs one full scan and builds its snapshot. Never fails: per-file
	/// problems are counted and logged.
	async fn scan_once(&self, generation: u64) -> ScanSnapshot {
		let config = {
			let guard = self.config.read().expect("config lock poisoned");
			Arc::clone(&guard)
		};
		let includes: Vec<PathBuf> =
			config.include_dirs.iter().map(|p| discovery::normalize_path(p)).collect();
		let excludes: Vec<PathBuf> =
			config.exclude_dirs.iter().map(|p| discovery::normalize_path(p)).collect();
		let workers = config.workers.max(1);
		let started_at = Utc::now();

		let (path_tx, path_rx) = mpsc::channel::<PathBuf>(2 * workers);
		let path_rx = Arc::new(AsyncMutex::new(path_rx));
		let (result_tx, mut result_rx) = mpsc::channel::<FileOutcome>(2 * workers);

		for _ in 0..workers {
			let paths = Arc::clone(&path_rx);
			let results = result_tx.clone();
			let cache = Arc::clone(&self.cache);
			let passwords = config.p12_passwords.clone();
			tokio::spawn(scan_worker(paths, results, cache, passwords));
		}
		drop(result_tx);

		let walker = tokio::task::spawn_blocking(move || {
			discovery::walk_roots(&includes, &excludes, |path| path_tx.blocking_send(path).is_ok())
		});

		let mut records: BTreeMap<String, CertificateRecord> = BTreeMap::new();
		let mut parsed_ok = 0u64;
		let mut parse_errors = 0u64;
		while let Some(outcome) = result_rx.recv().await {
			match outcome {
				FileOutcome::Parsed(file_records) => {
					parsed_ok += 1;
					for record in file_records {
						records.insert(record.source_path.clone(), record);
					}
				},
				FileOutcome::Failed => parse_errors += 1,
			}
		}

		let counts = match walker.await {
			Ok(counts) => counts,
			Err(e) => {
				warn!(error = %e, "directory walker task failed");
				discovery::DiscoveryCounts::default()
			},
		};

		let mut fingerprints: BTreeMap<String, u64> = BTreeMap::new();
		for record in records.values() {
			*fingerprints.entry(record.fingerprint_sha256.clone()).or_insert(0) += 1;
		}
		let duplicate_groups =
			fingerprints.into_iter().filter(|(_, count)| *count >= 2).collect();

		ScanSnapshot {
			generation,
			started_at,
			finished_at: Utc::now(),
			records,
			duplicate_groups,
			files_seen: counts.files_seen,
			parsed_ok,
			parse_errors,
			private_keys_skipped: counts.private_keys_skipped,
		}
	}
}

async fn scan_worker(
	paths: Arc<AsyncMutex<mpsc::Receiver<PathBuf>>>, results: mpsc::Sender<FileOutcome>,
	cache: Arc<CertCache>, p12_passwords: Vec<String>,
) {
	loop {
		let path = {
			let mut rx = paths.lock().await;
			rx.recv().await
		};
		let Some(path) = path else { break };
		let outcome = process_file(&path, &cache, &p12_passwords).await;
		if results.send(outcome).await.is_err() {
			break;
		}
	}
}

async fn process_file(
	path: &PathBuf, cache: &CertCache, p12_passwords: &[String],
) -> FileOutcome {
	let path_str = path.to_string_lossy().into_owned();

	let meta = match tokio::fs::metadata(path).await {
		Ok(meta) => meta,
		Err(e) => {
			warn!(path = %path.display(), error = %e, "failed to stat candidate file");
			return FileOutcome::Failed;
		},
	};
	let mtime_ns = meta
		.modified()
		.ok()
		.and_then(|t| t.duration_since(UNIX_EPOCH).ok())
		.map(|d| d.as_nanos() as u64)
		.unwrap_or(0);
	let size_bytes = meta.len();

	if let Some(records) = cache.get(&path_str, mtime_ns, size_bytes) {
		return FileOutcome::Parsed(records);
	}

	let bytes = match tokio::fs::read(path).await {
		Ok(bytes) => bytes,
		Err(e) => {
			warn!(path = %path.display(), error = %e, "failed to read candidate file");
			return FileOutcome::Failed;
		},
	};

	match parser::parse_file(&bytes, &path_str, p12_passwords) {
		Ok(parsed) => {
			let records = parsed.into_records();
			cache.put(&path_str, mtime_ns, size_bytes, records.clone());
			FileOutcome::Parsed(records)
		},
		Err(e) => {
			warn!(path = %path.display(), kind = %e.kind, detail = %e.detail, "unparseable certificate file");
			FileOutcome::Failed
		},
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testutil;
	use crate::util::config::Config;
	use std::fs;
	use std::path::Path;
	use std::time::Duration;

	fn shared_config(include: &Path, excludes: Vec<PathBuf>) -> SharedConfig {
		let mut config = Config::for_tests();
		config.include_dirs = vec![include.to_path_buf()];
		config.exclude_dirs = excludes;
		config.workers = 2;
		Arc::new(RwLock::new(Arc::new(config)))
	}

	fn new_scanner(
		config: SharedConfig,
	) -> (Arc<Scanner>, Arc<CertCache>, mpsc::Receiver<ScanTrigger>) {
		let cache = Arc::new(CertCache::new(Duration::from_secs(3600), u64::MAX));
		let snapshot = Arc::new(SnapshotHandle::new());
		let health = Arc::new(HealthState::new());
		let (scanner, trigger_rx) = Scanner::new(config, Arc::clone(&cache), snapshot, health);
		(scanner, cache, trigger_rx)
	}

	#[tokio::test]
	async fn basic_scan_publishes_records() {
		let dir = tempfile::tempdir().unwrap();
		let (cert, _key) = testutil::make_rsa_cert("s1.example.com", 2048, 30);
		fs::write(dir.path().join("a.pem"), testutil::cert_pem(&cert)).unwrap();

		let (scanner, _cache, _trigger_rx) = new_scanner(shared_config(dir.path(), Vec::new()));
		let snapshot = scanner.scan_once(1).await;

		assert_eq!(snapshot.files_seen, 1);
		assert_eq!(snapshot.parsed_ok, 1);
		assert_eq!(snapshot.parse_errors, 0);
		assert_eq!(snapshot.records.len(), 1);
		let record = snapshot.records.values().next().unwrap();
		assert_eq!(record.common_name, "s1.example.com");
		assert!(!record.weak_key);
		assert!(snapshot.duplicate_groups.is_empty());
	}

	#[tokio::test]
	async fn weak_and_deprecated_certificates_are_flagged() {
		let dir = tempfile::tempdir().unwrap();
		fs::write(dir.path().join("weak.pem"), testutil::make_weak_md5_cert_pem("weak.example.com"))
			.unwrap();

		let (scanner, _cache, _trigger_rx) = new_scanner(shared_config(dir.path(), Vec::new()));
		let snapshot = scanner.scan_once(1).await;

		let record = snapshot.records.values().next().unwrap();
		assert!(record.weak_key);
		assert!(record.deprecated_sig);
	}

	#[tokio::test]
	async fn duplicate_groups_by_fingerprint() {
		let dir = tempfile::tempdir().unwrap();
		let (cert, _key) = testutil::make_rsa_cert("dup.example.com", 2048, 30);
		let pem = testutil::cert_pem(&cert);
		fs::write(dir.path().join("b.pem"), &pem).unwrap();
		fs::write(dir.path().join("c.pem"), &pem).unwrap();

		let (scanner, _cache, _trigger_rx) = new_scanner(shared_config(dir.path(), Vec::new()));
		let snapshot = scanner.scan_once(1).await;

		assert_eq!(snapshot.records.len(), 2);
		assert_eq!(snapshot.duplicate_groups.len(), 1);
		let (fingerprint, count) = snapshot.duplicate_groups.iter().next().unwrap();
		assert_eq!(*count, 2);
		assert_eq!(fingerprint.len(), 64);
	}

	#[tokio::test]
	async fn excluded_directories_are_not_scanned() {
		let dir = tempfile::tempdir().unwrap();
		fs::create_dir(dir.path().join("private")).unwrap();
		let (cert, _key) = testutil::make_rsa_cert("s4.example.com", 2048, 30);
		let pem = testutil::cert_pem(&cert);
		fs::write(dir.path().join("x.pem"), &pem).unwrap();
		fs::write(dir.path().join("private").join("y.pem"), &pem).unwrap();

		let excludes = vec![discovery::normalize_path(&dir.path().join("private"))];
		let (scanner, _cache, _trigger_rx) = new_scanner(shared_config(dir.path(), excludes));
		let snapshot = scanner.scan_once(1).await;

		assert_eq!(snapshot.files_seen, 1);
		assert_eq!(snapshot.records.len(), 1);
		assert!(snapshot.records.keys().all(|path| path.ends_with("x.pem")));
	}

	#[tokio::test]
	async fn unchanged_files_hit_the_cache() {
		let dir = tempfile::tempdir().unwrap();
		let (cert, _key) = testutil::make_rsa_cert("cached.example.com", 2048, 30);
		fs::write(dir.path().join("a.pem"), testutil::cert_pem(&cert)).unwrap();

		let (scanner, cache, _trigger_rx) = new_scanner(shared_config(dir.path(), Vec::new()));
		let first = scanner.scan_once(1).await;
		let second = scanner.scan_once(2).await;
		assert_eq!(first.parsed_ok, 1);
		assert_eq!(second.parsed_ok, 1);

		let stats = cache.stats();
		assert_eq!(stats.misses, 1, "only the first scan may parse");
		assert_eq!(stats.hits, 1);
	}

	#[tokio::test]
	async fn cache_clear_forces_reparse() {
		let dir = tempfile::tempdir().unwrap();
		let (cert, _key) = testutil::make_rsa_cert("cleared.example.com", 2048, 30);
		fs::write(dir.path().join("a.pem"), testutil::cert_pem(&cert)).unwrap();

		let (scanner, cache, _trigger_rx) = new_scanner(shared_config(dir.path(), Vec::new()));
		scanner.scan_once(1).await;
		cache.clear();
		scanner.scan_once(2).await;

		assert_eq!(cache.stats().misses, 2);
	}

	#[tokio::test]
	async fn parse_failures_do_not_abort_the_scan() {
		let dir = tempfile::tempdir().unwrap();
		let (cert, _key) = testutil::make_rsa_cert("ok.example.com", 2048, 30);
		fs::write(dir.path().join("good.pem"), testutil::cert_pem(&cert)).unwrap();
		fs::write(dir.path().join("bad.der"), [0xde, 0xad, 0xbe, 0xef]).unwrap();

		let (scanner, _cache, _trigger_rx) = new_scanner(shared_config(dir.path(), Vec::new()));
		let snapshot = scanner.scan_once(1).await;

		assert_eq!(snapshot.files_seen, 2);
		assert_eq!(snapshot.parsed_ok, 1);
		assert_eq!(snapshot.parse_errors, 1);
		assert_eq!(
			snapshot.files_seen,
			snapshot.parsed_ok + snapshot.parse_errors + snapshot.private_keys_skipped
		);
	}

	#[tokio::test]
	async fn triggers_coalesce_beyond_one_queued() {
		let dir = tempfile::tempdir().unwrap();
		let (scanner, _cache, _trigger_rx) = new_scanner(shared_config(dir.path(), Vec::new()));

		// Nothing is draining the channel, so the first request queues and
		// every later one coalesces.
		let first = scanner.request_scan(ScanTrigger::Manual);
		assert!(!first.coalesced);
		let second = scanner.request_scan(ScanTrigger::Manual);
		assert!(second.coalesced);
		let third = scanner.request_scan(ScanTrigger::FileEvent);
		assert!(third.coalesced);
	}

	#[tokio::test]
	async fn pkcs12_bundle_records_are_suffixed() {
		let dir = tempfile::tempdir().unwrap();
		let (cert, key) = testutil::make_rsa_cert("p12.example.com", 2048, 30);
		fs::write(dir.path().join("bundle.p12"), testutil::make_p12(&cert, &key, &[], "changeit"))
			.unwrap();

		let config = shared_config(dir.path(), Vec::new());
		{
			let mut guard = config.write().unwrap();
			let mut updated = (**guard).clone();
			updated.p12_passwords = vec![String::new(), "changeit".to_string()];
			*guard = Arc::new(updated);
		}
		let (scanner, _cache, _trigger_rx) = new_scanner(config);
		let snapshot = scanner.scan_once(1).await;

		assert_eq!(snapshot.parsed_ok, 1);
		assert_eq!(snapshot.records.len(), 1);
		assert!(snapshot.records.keys().next().unwrap().ends_with("bundle.p12#0"));
	}
}
