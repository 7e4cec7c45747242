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
use crate::scanner::ScanTrigger;
use crate::service::Context;

pub(crate) const SCAN_PATH: &str = "/scan";

/// Triggers a manual scan. Returns immediately with the generation that is
/// about to run, or the pending one when the request coalesced.
pub(crate) fn handle_scan_request(context: &Context) -> Response<Full<Bytes>> {
	let outcome = context.scanner.request_scan(ScanTrigger::Manual);
	json_response(
		StatusCode::OK,
		&serde_json::json!({
			"generation": outcome.generation,
			"status": if outcome.coalesced { "coalesced" } else { "started" },
		}),
	)
}
