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

pub(crate) fn not_found(path: &str) -> Response<Full<Bytes>> {
	json_response(
		StatusCode::NOT_FOUND,
		&serde_json::json!({ "error": format!("Unknown request: {}", path) }),
	)
}

pub(crate) fn method_not_allowed(path: &str) -> Response<Full<Bytes>> {
	json_response(
		StatusCode::METHOD_NOT_ALLOWED,
		&serde_json::json!({ "error": format!("Method not allowed for: {}", path) }),
	)
}
