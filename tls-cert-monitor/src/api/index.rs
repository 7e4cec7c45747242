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

pub(crate) const INDEX_PATH: &str = "/";

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head><title>tls-cert-monitor</title></head>
<body>
<h1>tls-cert-monitor</h1>
<ul>
<li><a href="/metrics">/metrics</a> - Prometheus exposition</li>
<li><a href="/healthz">/healthz</a> - component health</li>
<li><a href="/scan">/scan</a> - trigger a scan</li>
<li><a href="/config">/config</a> - effective configuration</li>
<li><a href="/cache/stats">/cache/stats</a> - cache statistics</li>
<li>POST /cache/clear - drop all cached parse results</li>
</ul>
</body>
</html>
"#;

pub(crate) fn handle_index_request() -> Response<Full<Bytes>> {
	Response::builder()
		.header("content-type", "text/html; charset=utf-8")
		.body(Full::new(Bytes::from(INDEX_HTML)))
		// unwrap safety: body only errors when previous chained calls failed.
		.unwrap()
}
