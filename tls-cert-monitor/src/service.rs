use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::service::Service;
use hyper::{Method, Request, Response};

use crate::api::cache_clear::{handle_cache_clear_request, CACHE_CLEAR_PATH};
use crate::api::cache_stats::{handle_cache_stats_request, CACHE_STATS_PATH};
use crate::api::error::{method_not_allowed, not_found};
use crate::api::get_config::{handle_config_request, CONFIG_PATH};
use crate::api::healthz::{handle_healthz_request, HEALTHZ_PATH};
use crate::api::index::{handle_index_request, INDEX_PATH};
use crate::api::metrics::{handle_metrics_request, METRICS_PATH};
use crate::api::scan::{handle_scan_request, SCAN_PATH};
use crate::health::HealthState;
use crate::io::cache::CertCache;
use crate::metrics::MetricsAggregator;
use crate::scanner::Scanner;
use crate::util::config::SharedConfig;

#[derive(Clone)]
pub(crate) struct MonitorService {
	scanner: Arc<Scanner>,
	cache: Arc<CertCache>,
	metrics: Arc<MetricsAggregator>,
	health: Arc<HealthState>,
	config: SharedConfig,
}

impl MonitorService {
	pub(crate) fn new(
		scanner: Arc<Scanner>, cache: Arc<CertCache>, metrics: Arc<MetricsAggregator>,
		health: Arc<HealthState>, config: SharedConfig,
	) -> Self {
		Self { scanner, cache, metrics, health, config }
	}
}

pub(crate) struct Context {
	pub(crate) scanner: Arc<Scanner>,
	pub(crate) cache: Arc<CertCache>,
	pub(crate) metrics: Arc<MetricsAggregator>,
	pub(crate) health: Arc<HealthState>,
	pub(crate) config: SharedConfig,
}

impl Service<Request<Incoming>> for MonitorService {
	type Response = Response<Full<Bytes>>;
	type Error = hyper::Error;
	type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

	fn call(&self, req: Request<Incoming>) -> Self::Future {
		let context = Context {
			scanner: Arc::clone(&self.scanner),
			cache: Arc::clone(&self.cache),
			metrics: Arc::clone(&self.metrics),
			health: Arc::clone(&self.health),
			config: Arc::clone(&self.config),
		};
		let method = req.method().clone();
		let path = req.uri().path().to_string();

		Box::pin(async move {
			let response = match path.as_str() {
				METRICS_PATH if method == Method::GET => handle_metrics_request(&context),
				HEALTHZ_PATH if method == Method::GET => handle_healthz_request(&context),
				SCAN_PATH if method == Method::GET => handle_scan_request(&context),
				CONFIG_PATH if method == Method::GET => handle_config_request(&context),
				CACHE_STATS_PATH if method == Method::GET => handle_cache_stats_request(&context),
				CACHE_CLEAR_PATH if method == Method::POST => {
					handle_cache_clear_request(&context)
				},
				INDEX_PATH if method == Method::GET => handle_index_request(),
				METRICS_PATH | HEALTHZ_PATH | SCAN_PATH | CONFIG_PATH | CACHE_STATS_PATH
				| CACHE_CLEAR_PATH | INDEX_PATH => method_not_allowed(&path),
				other => not_found(other),
			};
			Ok(response)
		})
	}
}
