// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

pub(crate) mod cache_clear;
pub(crate) mod cache_stats;
pub(crate) mod error;
pub(crate) mod get_config;
pub(crate) mod healthz;
pub(crate) mod index;
pub(crate) mod metrics;
pub(crate) mod scan;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::{Response, StatusCode};

/// Builds a JSON response. Serialization of handler-built values cannot
/// fail; a failure here is a programming error worth a 500.
pub(crate) fn json_response(status: StatusCode, value: &serde_json::Value) -> Response<Full<Bytes>> {
	let body = serde_json::to_vec(value).unwrap_or_else(|_| b"{}".to_vec());
	Response::builder()
		.status(status)
		.header("content-type", "application/json")
		.body(Full::new(Bytes::from(body)))
		// unwrap safety: body only errors when previous chained calls failed.
		.unwrap()
}
