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

pub(crate) const CACHE_STATS_PATH: &str = "/cache/stats";

pub(crate) fn handle_cache_stats_request(context: &Context) -> Response<Full<Bytes>> {
	let stats = context.cache.stats();
	let body = serde_json::to_value(stats).unwrap_or_else(|_| serde_json::json!({}));
	json_response(StatusCode::OK, &body)
}
