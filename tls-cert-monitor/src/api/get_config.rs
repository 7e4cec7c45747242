// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::{Response, StatusCode};

use crate::api::json_response;
use crate::service::Context;

pub(crate) const CONFIG_PATH: &str = "/config";

/// The effective configuration with secrets redacted: PKCS#12 passwords are
/// masked, key material paths are shown but never their contents.
pub(crate) fn handle_config_request(context: &Context) -> Response<Full<Bytes>> {
	let config = {
		let guard = context.config.read().expect("config lock poisoned");
		std::sync::Arc::clone(&guard)
	};

	let body = serde_json::json!({
		"port": config.port,
		"bind": config.bind.to_string(),
		"tls_cert": config.tls_cert.as_ref().map(|p| p.display().to_string()),
		"tls_key": config.tls_key.as_ref().map(|p| p.display().to_string()),
		"include_dirs": config.include_dirs.iter().map(|p| p.display().to_string()).collect::<Vec<_>>(),
		"exclude_dirs": config.exclude_dirs.iter().map(|p| p.display().to_string()).collect::<Vec<_>>(),
		"scan_interval": config.scan_interval.as_secs(),
		"workers": config.workers,
		"cache_dir": config.cache_dir.display().to_string(),
		"cache_ttl": config.cache_ttl.as_secs(),
		"cache_max_bytes": config.cache_max_bytes,
		"p12_passwords": config.p12_passwords.iter().map(|_| "***").collect::<Vec<_>>(),
		"hot_reload": config.hot_reload,
		"log_level": config.log_level,
		"log_file": config.log_file.as_ref().map(|p| p.display().to_string()),
	});
	json_response(StatusCode::OK, &body)
}
