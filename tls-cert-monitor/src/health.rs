//! Component health registry backing `/healthz`.

use std::collections::BTreeMap;
use std::sync::RwLock;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum ComponentStatus {
	Healthy,
	Degraded,
	Unhealthy,
}

impl ComponentStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			ComponentStatus::Healthy => "healthy",
			ComponentStatus::Degraded => "degraded",
			ComponentStatus::Unhealthy => "unhealthy",
		}
	}
}

#[derive(Clone, Debug)]
pub(crate) struct ComponentHealth {
	pub status: ComponentStatus,
	pub message: String,
}

/// Shared registry of per-component statuses. The worst component status
/// determines the overall health.
pub(crate) struct HealthState {
	components: RwLock<BTreeMap<&'static str, ComponentHealth>>,
}

impl HealthState {
	pub fn new() -> Self {
		Self { components: RwLock::new(BTreeMap::new()) }
	}

	pub fn set(&self, component: &'static str, status: ComponentStatus, message: String) {
		let mut components = self.components.write().expect("health lock poisoned");
		components.insert(component, ComponentHealth { status, message });
	}

	pub fn overall(&self) -> ComponentStatus {
		let components = self.components.read().expect("health lock poisoned");
		components
			.values()
			.map(|component| component.status)
			.max()
			.unwrap_or(ComponentStatus::Healthy)
	}

	pub fn checks(&self) -> Vec<(&'static str, ComponentHealth)> {
		let components = self.components.read().expect("health lock poisoned");
		components.iter().map(|(name, health)| (*name, health.clone())).collect()
	}
}
