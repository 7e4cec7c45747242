// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

/// Initializes the global tracing subscriber. The configured level is the
/// default; `RUST_LOG` overrides it for targeted debugging.
pub(crate) fn init(log_level: &str, log_file: Option<&Path>) -> Result<(), String> {
	let filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

	match log_file {
		Some(path) => {
			let file = OpenOptions::new()
				.create(true)
				.append(true)
				.open(path)
				.map_err(|e| format!("Failed to open log file '{}': {}", path.display(), e))?;
			tracing_subscriber::fmt()
				.with_env_filter(filter)
				.with_writer(Mutex::new(file))
				.with_ansi(false)
				.try_init()
				.map_err(|e| format!("Failed to install logger: {}", e))
		},
		None => tracing_subscriber::fmt()
			.with_env_filter(filter)
			.try_init()
			.map_err(|e| format!("Failed to install logger: {}", e)),
	}
}
