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
use hyper::Response;

use crate::metrics;
use crate::service::Context;

pub(crate) const METRICS_PATH: &str = "/metrics";

pub(crate) fn handle_metrics_request(context: &Context) -> Response<Full<Bytes>> {
	let exposition = context.metrics.render();
	Response::builder()
		.header("content-type", metrics::CONTENT_TYPE)
		.body(Full::new(Bytes::from(exposition)))
		// unwrap safety: body only errors when previous chained calls failed.
		.unwrap()
}
