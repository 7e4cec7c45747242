// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Builds the Prometheus text exposition from the published snapshot.
//!
//! Families that identify individual certificates are rebuilt from scratch
//! on every scrape, so label sets for paths that vanished from the latest
//! snapshot disappear with it. `*_total` families are snapshot-level
//! gauges, not monotonic counters.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use sysinfo::{Pid, ProcessesToUpdate, System};

use crate::scanner::SnapshotHandle;

pub(crate) const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

struct Series {
	labels: Vec<(&'static str, String)>,
	value: f64,
}

impl Series {
	fn bare(value: f64) -> Self {
		Self { labels: Vec::new(), value }
	}

	fn labeled(labels: Vec<(&'static str, String)>, value: f64) -> Self {
		Self { labels, value }
	}
}

pub(crate) struct MetricsAggregator {
	snapshot: Arc<SnapshotHandle>,
	hostname: String,
	system: Mutex<System>,
	pid: Option<Pid>,
}

impl MetricsAggregator {
	pub fn new(snapshot: Arc<SnapshotHandle>) -> Self {
		let hostname = hostname::get()
			.map(|name| name.to_string_lossy().into_owned())
			.unwrap_or_else(|_| "unknown".to_string());
		Self {
			snapshot,
			hostname,
			system: Mutex::new(System::new()),
			pid: sysinfo::get_current_pid().ok(),
		}
	}

	/// Renders the full exposition for the currently published snapshot.
	pub fn render(&self) -> String {
		let snapshot = self.snapshot.load();
		let mut buffer = String::with_capacity(4096);

		let mut expiration = Vec::new();
		let mut san_count = Vec::new();
		let mut info = Vec::new();
		let mut issuer_code: BTreeMap<(String, String, String), f64> = BTreeMap::new();
		let mut weak_keys = 0u64;
		let mut deprecated_sigs = 0u64;

		for record in snapshot.records.values() {
			expiration.push(Series::labeled(
				vec![
					("path", record.source_path.clone()),
					("subject", record.subject.clone()),
					("issuer", record.issuer.clone()),
				],
				record.not_after.timestamp() as f64,
			));
			san_count.push(Series::labeled(
				vec![("path", record.source_path.clone())],
				record.san_count as f64,
			));
			info.push(Series::labeled(
				vec![
					("path", record.source_path.clone()),
					("subject", record.subject.clone()),
					("issuer", record.issuer.clone()),
					("serial", record.serial.clone()),
					("signature_algorithm", record.sig_algorithm.clone()),
				],
				1.0,
			));
			// Several records in one bundle can share all three labels;
			// the label set must stay unique in the exposition.
			issuer_code.insert(
				(
					record.issuer.clone(),
					record.common_name.clone(),
					record.file_name().to_string(),
				),
				record.issuer_code as f64,
			);
			if record.weak_key {
				weak_keys += 1;
			}
			if record.deprecated_sig {
				deprecated_sigs += 1;
			}
		}

		write_family(
			&mut buffer,
			"ssl_cert_expiration_timestamp",
			"Unix timestamp when the certificate expires",
			expiration,
		);
		write_family(
			&mut buffer,
			"ssl_cert_san_count",
			"Number of subject alternative name entries",
			san_count,
		);
		write_family(&mut buffer, "ssl_cert_info", "Certificate details", info);
		write_family(
			&mut buffer,
			"ssl_cert_duplicate_count",
			"Certificates sharing the same SHA-256 fingerprint",
			snapshot
				.duplicate_groups
				.iter()
				.map(|(fingerprint, count)| {
					Series::labeled(vec![("fingerprint", fingerprint.clone())], *count as f64)
				})
				.collect(),
		);
		write_family(
			&mut buffer,
			"ssl_cert_issuer_code",
			"Issuer taxonomy code (30 DigiCert, 31 Amazon, 32 other, 33 self-signed)",
			issuer_code
				.into_iter()
				.map(|((issuer, common_name, file_name), value)| {
					Series::labeled(
						vec![
							("issuer", issuer),
							("common_name", common_name),
							("file_name", file_name),
						],
						value,
					)
				})
				.collect(),
		);
		write_family(
			&mut buffer,
			"ssl_cert_weak_key_total",
			"Certificates with weak public keys in the last scan",
			vec![Series::bare(weak_keys as f64)],
		);
		write_family(
			&mut buffer,
			"ssl_cert_deprecated_sigalg_total",
			"Certificates with deprecated signature algorithms in the last scan",
			vec![Series::bare(deprecated_sigs as f64)],
		);
		write_family(
			&mut buffer,
			"ssl_cert_files_total",
			"Certificate-shaped files seen by the last scan",
			vec![Series::bare(snapshot.files_seen as f64)],
		);
		write_family(
			&mut buffer,
			"ssl_certs_parsed_total",
			"Files parsed successfully by the last scan",
			vec![Series::bare(snapshot.parsed_ok as f64)],
		);
		write_family(
			&mut buffer,
			"ssl_cert_parse_errors_total",
			"Files that failed to parse in the last scan",
			vec![Series::bare(snapshot.parse_errors as f64)],
		);
		write_family(
			&mut buffer,
			"ssl_cert_scan_duration_seconds",
			"Wall time of the last scan",
			vec![Series::bare(snapshot.duration_seconds())],
		);
		write_family(
			&mut buffer,
			"ssl_cert_last_scan_timestamp",
			"Unix timestamp when the last scan finished",
			vec![Series::bare(snapshot.finished_at.timestamp() as f64)],
		);
		write_family(
			&mut buffer,
			"ssl_cert_monitor_hostname_info",
			"Host running the monitor",
			vec![Series::labeled(vec![("hostname", self.hostname.clone())], 1.0)],
		);

		self.write_process_metrics(&mut buffer);
		buffer
	}

	fn write_process_metrics(&self, buffer: &mut String) {
		let (memory, cpu, threads) = match self.pid {
			Some(pid) => {
				let mut system = self.system.lock().expect("sysinfo lock poisoned");
				system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
				match system.process(pid) {
					Some(process) => (
						process.memory(),
						process.cpu_usage() as f64,
						process.tasks().map(|tasks| tasks.len() as u64).unwrap_or(0),
					),
					None => (0, 0.0, 0),
				}
			},
			None => (0, 0.0, 0),
		};

		write_family(
			&mut *buffer,
			"app_memory_bytes",
			"Resident memory of the monitor process",
			vec![Series::bare(memory as f64)],
		);
		write_family(
			&mut *buffer,
			"app_cpu_percent",
			"CPU usage of the monitor process",
			vec![Series::bare(cpu)],
		);
		write_family(
			&mut *buffer,
			"app_thread_count",
			"Thread count of the monitor process",
			vec![Series::bare(threads as f64)],
		);
		write_family(
			&mut *buffer,
			"app_info",
			"Monitor build information",
			vec![Series::labeled(
				vec![("version", env!("CARGO_PKG_VERSION").to_string())],
				1.0,
			)],
		);
	}
}

fn write_family(buffer: &mut String, name: &str, help_text: &str, series: Vec<Series>) {
	buffer.push_str(&format!("# HELP {} {}\n", name, help_text));
	buffer.push_str(&format!("# TYPE {} gauge\n", name));
	for entry in series {
		if entry.labels.is_empty() {
			buffer.push_str(&format!("{} {}\n", name, format_value(entry.value)));
		} else {
			let labels = entry
				.labels
				.iter()
				.map(|(key, value)| format!("{}=\"{}\"", key, escape_label_value(value)))
				.collect::<Vec<_>>()
				.join(",");
			buffer.push_str(&format!("{}{{{}}} {}\n", name, labels, format_value(entry.value)));
		}
	}
}

fn escape_label_value(value: &str) -> String {
	let mut escaped = String::with_capacity(value.len());
	for ch in value.chars() {
		match ch {
			'\\' => escaped.push_str("\\\\"),
			'"' => escaped.push_str("\\\""),
			'\n' => escaped.push_str("\\n"),
			other => escaped.push(other),
		}
	}
	escaped
}

fn format_value(value: f64) -> String {
	if value.fract() == 0.0 && value.abs() < 9.0e15 {
		format!("{}", value as i64)
	} else {
		format!("{}", value)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::cert::CertificateRecord;
	use crate::scanner::ScanSnapshot;
	use chrono::{TimeZone, Utc};
	use std::collections::BTreeMap;

	fn record(path: &str, weak: bool) -> CertificateRecord {
		CertificateRecord {
			source_path: path.to_string(),
			subject: "CN=a.example.com".to_string(),
			issuer: "CN=Example CA".to_string(),
			common_name: "a.example.com".to_string(),
			serial: "0102".to_string(),
			sig_algorithm: if weak {
				"md5WithRSAEncryption".to_string()
			} else {
				"sha256WithRSAEncryption".to_string()
			},
			public_key_algorithm: "RSA".to_string(),
			key_size_bits: if weak { 1024 } else { 2048 },
			not_before: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
			not_after: Utc.timestamp_opt(1_800_000_000, 0).unwrap(),
			san_count: 2,
			san_dns: vec!["a.example.com".to_string()],
			fingerprint_sha256: "ab".repeat(32),
			weak_key: weak,
			deprecated_sig: weak,
			expired: false,
			self_signed: false,
			issuer_code: 32,
		}
	}

	fn snapshot_with(records: Vec<CertificateRecord>) -> ScanSnapshot {
		let mut snapshot = ScanSnapshot::empty();
		snapshot.generation = 1;
		snapshot.started_at = Utc.timestamp_opt(1_750_000_000, 0).unwrap();
		snapshot.finished_at = Utc.timestamp_opt(1_750_000_002, 0).unwrap();
		snapshot.files_seen = records.len() as u64;
		snapshot.parsed_ok = records.len() as u64;
		let mut by_path = BTreeMap::new();
		for r in records {
			by_path.insert(r.source_path.clone(), r);
		}
		snapshot.records = by_path;
		snapshot
	}

	fn aggregator_with(snapshot: ScanSnapshot) -> (MetricsAggregator, Arc<SnapshotHandle>) {
		let handle = Arc::new(SnapshotHandle::new());
		handle.publish_for_tests(Arc::new(snapshot));
		(MetricsAggregator::new(Arc::clone(&handle)), handle)
	}

	#[test]
	fn renders_per_certificate_series() {
		let (aggregator, _) =
			aggregator_with(snapshot_with(vec![record("/r/a.pem", false), record("/r/b.pem", true)]));
		let exposition = aggregator.render();

		assert!(exposition.contains(
			"ssl_cert_expiration_timestamp{path=\"/r/a.pem\",subject=\"CN=a.example.com\",issuer=\"CN=Example CA\"} 1800000000"
		));
		assert!(exposition.contains("ssl_cert_san_count{path=\"/r/a.pem\"} 2"));
		assert!(exposition.contains("ssl_cert_weak_key_total 1\n"));
		assert!(exposition.contains("ssl_cert_deprecated_sigalg_total 1\n"));
		assert!(exposition.contains("ssl_cert_files_total 2\n"));
		assert!(exposition.contains("ssl_certs_parsed_total 2\n"));
		assert!(exposition.contains("ssl_cert_parse_errors_total 0\n"));
		assert!(exposition.contains("ssl_cert_scan_duration_seconds 2\n"));
		assert!(exposition.contains("ssl_cert_last_scan_timestamp 1750000002\n"));
		assert!(exposition.contains("# TYPE ssl_cert_info gauge"));
		assert!(exposition.contains("app_info{version=\""));
	}

	#[test]
	fn duplicate_groups_are_exported_by_fingerprint() {
		let mut snapshot = snapshot_with(vec![record("/r/a.pem", false), record("/r/b.pem", false)]);
		snapshot.duplicate_groups.insert("ab".repeat(32), 2);
		let (aggregator, _) = aggregator_with(snapshot);
		let exposition = aggregator.render();
		assert!(exposition
			.contains(&format!("ssl_cert_duplicate_count{{fingerprint=\"{}\"}} 2", "ab".repeat(32))));
	}

	#[test]
	fn vanished_paths_leave_no_series_behind() {
		let (aggregator, handle) =
			aggregator_with(snapshot_with(vec![record("/r/a.pem", false), record("/r/b.pem", false)]));
		assert!(aggregator.render().contains("/r/b.pem"));

		let mut next = snapshot_with(vec![record("/r/a.pem", false)]);
		next.generation = 2;
		handle.publish_for_tests(Arc::new(next));
		let exposition = aggregator.render();
		assert!(exposition.contains("/r/a.pem"));
		assert!(!exposition.contains("/r/b.pem"));
	}

	#[test]
	fn label_values_are_escaped() {
		assert_eq!(escape_label_value("plain"), "plain");
		assert_eq!(escape_label_value("with \"quotes\""), "with \\\"quotes\\\"");
		assert_eq!(escape_label_value("back\\slash"), "back\\\\slash");
		assert_eq!(escape_label_value("new\nline"), "new\\nline");
	}

	#[test]
	fn integer_values_render_without_fraction() {
		assert_eq!(format_value(3.0), "3");
		assert_eq!(format_value(0.0), "0");
		assert_eq!(format_value(2.5), "2.5");
	}
}
