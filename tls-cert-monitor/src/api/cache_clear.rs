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
use tracing::info;

use crate::api::json_response;
use crate::service::Context;

pub(crate) const CACHE_CLEAR_PATH: &str = "/cache/clear";

pub(crate) fn handle_cache_clear_request(context: &Context) -> Response<Full<Bytes>> {
	let cleared = context.cache.clear();
	info!(cleared, "cache cleared via HTTP");
	json_response(StatusCode::OK, &serde_json::json!({ "cleared": cleared }))
}
