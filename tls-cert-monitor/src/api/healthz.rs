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
use crate::health::ComponentStatus;
use crate::service::Context;

pub(crate) const HEALTHZ_PATH: &str = "/healthz";

/// Aggregated component health. `healthy` and `degraded` answer 200 so
/// orchestrators keep routing to a monitor that is still serving metrics;
/// only `unhealthy` answers 503.
pub(crate) fn handle_healthz_request(context: &Context) -> Response<Full<Bytes>> {
	let overall = context.health.overall();
	let status = match overall {
		ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
		_ => StatusCode::OK,
	};

	let checks: Vec<serde_json::Value> = context
		.health
		.checks()
		.into_iter()
		.map(|(name, component)| {
			serde_json::json!({
				"name": name,
				"status": component.status.as_str(),
				"message": component.message,
			})
		})
		.collect();

	let snapshot = context.scanner.snapshot();
	let body = serde_json::json!({
		"status": overall.as_str(),
		"timestamp": chrono::Utc::now().to_rfc3339(),
		"checks": checks,
		"metadata": {
			"version": env!("CARGO_PKG_VERSION"),
			"generation": snapshot.generation,
		},
	});
	json_response(status, &body)
}
