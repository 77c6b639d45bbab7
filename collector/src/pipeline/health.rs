//! Component liveness.
//!
//! Every queue, router and destination registers a [`HealthHandle`] under a
//! name such as `queue:traces`, `router:logs` or `destination:tempo` and
//! updates it as it runs. The registry folds the components into an overall
//! status for `GET /health`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, RwLock};

/// Status of one component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    /// Running normally.
    Up,
    /// Running, but recent work failed.
    Degraded,
    /// Stopped.
    Down,
}

impl ComponentStatus {
    const fn to_u8(self) -> u8 {
        match self {
            Self::Up => 0,
            Self::Degraded => 1,
            Self::Down => 2,
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Up,
            1 => Self::Degraded,
            _ => Self::Down,
        }
    }
}

/// Overall process status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    /// Every component is up.
    Healthy,
    /// Some destination is failing; data is still accepted.
    Degraded,
    /// A queue or router is down.
    Unhealthy,
    /// Shutdown has begun.
    Draining,
}

/// Handle through which one component reports its status.
#[derive(Debug, Clone)]
pub struct HealthHandle {
    status: Arc<AtomicU8>,
}

impl HealthHandle {
    /// Sets the status.
    pub fn set(&self, status: ComponentStatus) {
        self.status.store(status.to_u8(), Ordering::Release);
    }

    /// Returns the status.
    #[must_use]
    pub fn get(&self) -> ComponentStatus {
        ComponentStatus::from_u8(self.status.load(Ordering::Acquire))
    }
}

/// Status of every component at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Overall status.
    pub status: OverallStatus,
    /// Service name.
    pub service: String,
    /// Service version.
    pub version: String,
    /// Per component.
    pub components: BTreeMap<String, ComponentStatus>,
}

impl HealthReport {
    /// Returns true if the process should receive traffic.
    #[must_use]
    pub fn is_serving(&self) -> bool {
        matches!(self.status, OverallStatus::Healthy | OverallStatus::Degraded)
    }
}

/// Registry of component health.
#[derive(Debug, Default)]
pub struct HealthRegistry {
    components: RwLock<BTreeMap<String, HealthHandle>>,
    draining: AtomicBool,
}

impl HealthRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a component, initially up.
    pub fn register(&self, name: impl Into<String>) -> HealthHandle {
        let handle = HealthHandle {
            status: Arc::new(AtomicU8::new(ComponentStatus::Up.to_u8())),
        };
        self.components
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(name.into(), handle.clone());
        handle
    }

    /// Returns the status of component `name`.
    #[must_use]
    pub fn component(&self, name: &str) -> Option<ComponentStatus> {
        self.components
            .read()
            .ok()
            .and_then(|components| components.get(name).map(HealthHandle::get))
    }

    /// Marks the start of shutdown.
    pub fn set_draining(&self) {
        self.draining.store(true, Ordering::Release);
    }

    /// Folds every component into a report.
    #[must_use]
    pub fn report(&self) -> HealthReport {
        let components: BTreeMap<String, ComponentStatus> = self
            .components
            .read()
            .map(|components| {
                components
                    .iter()
                    .map(|(name, handle)| (name.clone(), handle.get()))
                    .collect()
            })
            .unwrap_or_default();

        let core_down = components.iter().any(|(name, status)| {
            *status == ComponentStatus::Down && !name.starts_with("destination:")
        });
        let status = if self.draining.load(Ordering::Acquire) {
            OverallStatus::Draining
        } else if core_down {
            OverallStatus::Unhealthy
        } else if components.values().all(|s| *s == ComponentStatus::Up) {
            OverallStatus::Healthy
        } else {
            OverallStatus::Degraded
        };

        HealthReport {
            status,
            service: "tributary-collector".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            components,
        }
    }
}
