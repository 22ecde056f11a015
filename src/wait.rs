//! Wait timeouts with debugging context
//!
//! When a readiness or deletion wait gives up, the error says what the
//! resource looked like the last time it was polled, plus the latest events
//! recorded against it.
//!
//! ```ignore
//! if let Err(HarnessError::WaitTimeout(err)) =
//!     deployment.wait_until_ready(Duration::from_secs(20)).await
//! {
//!     eprintln!("{} stuck at: {}", err.resource, err.last_state);
//! }
//! ```

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Endpoints, Event, Pod, Service};
use k8s_openapi::api::networking::v1::Ingress;
use std::fmt;
use std::time::Duration;

/// Event attached to a [`WaitError`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitEvent {
    /// e.g. `Pulling`, `BackOff`, `FailedScheduling`
    pub reason: String,
    pub message: String,
    /// `HH:MM:SS` of the last occurrence
    pub timestamp: Option<String>,
}

impl From<&Event> for WaitEvent {
    fn from(event: &Event) -> Self {
        let at = event
            .last_timestamp
            .as_ref()
            .map(|t| t.0)
            .or_else(|| event.event_time.as_ref().map(|t| t.0));
        Self {
            reason: event.reason.clone().unwrap_or_default(),
            message: event.message.clone().unwrap_or_default(),
            timestamp: at.map(|t| t.format("%H:%M:%S").to_string()),
        }
    }
}

/// A wait that did not converge before its timeout
#[derive(Debug, Clone)]
pub struct WaitError {
    /// kubectl-style reference, e.g. `deployment/echo`
    pub resource: String,
    pub last_state: String,
    pub elapsed: Duration,
    pub timeout: Duration,
    /// Newest last
    pub events: Vec<WaitEvent>,
}

impl WaitError {
    pub fn new(resource: impl Into<String>, timeout: Duration, elapsed: Duration) -> Self {
        Self {
            resource: resource.into(),
            last_state: "not observed".to_string(),
            elapsed,
            timeout,
            events: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.last_state = state.into();
        self
    }

    #[must_use]
    pub fn with_events(mut self, events: Vec<WaitEvent>) -> Self {
        self.events = events;
        self
    }
}

impl fmt::Display for WaitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "timed out after {:.1}s waiting for {} (timeout {:?})\n  last observed: {}",
            self.elapsed.as_secs_f64(),
            self.resource,
            self.timeout,
            self.last_state
        )?;

        if !self.events.is_empty() {
            write!(f, "\n  events:")?;
            for event in &self.events {
                write!(
                    f,
                    "\n    {} {}: {}",
                    event.timestamp.as_deref().unwrap_or("--:--:--"),
                    event.reason,
                    event.message
                )?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for WaitError {}

/// One-line summary of an object's observed state, used in timeouts
pub trait ResourceState {
    fn state_description(&self) -> String;
}

impl ResourceState for Deployment {
    fn state_description(&self) -> String {
        let desired = self.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
        let (available, ready, unavailable) = self.status.as_ref().map_or((0, 0, 0), |s| {
            (
                s.available_replicas.unwrap_or(0),
                s.ready_replicas.unwrap_or(0),
                s.unavailable_replicas.unwrap_or(0),
            )
        });

        let mut state = format!("{available}/{desired} available, {ready} ready");
        if unavailable > 0 {
            state.push_str(&format!(", {unavailable} unavailable"));
        }
        state
    }
}

impl ResourceState for Pod {
    fn state_description(&self) -> String {
        let status = self.status.as_ref();
        let phase = status.and_then(|s| s.phase.as_deref()).unwrap_or("Unknown");
        let statuses = status
            .and_then(|s| s.container_statuses.as_deref())
            .unwrap_or_default();

        if statuses.is_empty() {
            return format!("{phase}, no container status yet");
        }

        let ready = statuses.iter().filter(|c| c.ready).count();
        let mut state = format!("{phase}, {ready}/{} containers ready", statuses.len());

        let waiting: Vec<String> = statuses
            .iter()
            .filter_map(|c| {
                let reason = c.state.as_ref()?.waiting.as_ref()?.reason.as_deref()?;
                Some(format!("{} {reason}", c.name))
            })
            .collect();
        if !waiting.is_empty() {
            state.push_str(&format!(" ({})", waiting.join(", ")));
        }
        state
    }
}

impl ResourceState for Ingress {
    fn state_description(&self) -> String {
        let addresses: Vec<&str> = self
            .status
            .iter()
            .filter_map(|s| s.load_balancer.as_ref())
            .filter_map(|lb| lb.ingress.as_ref())
            .flatten()
            .filter_map(|e| e.ip.as_deref().or(e.hostname.as_deref()))
            .collect();

        if addresses.is_empty() {
            "waiting for load balancer address".to_string()
        } else {
            format!("load balancer at {}", addresses.join(", "))
        }
    }
}

impl ResourceState for Service {
    fn state_description(&self) -> String {
        let spec = self.spec.as_ref();
        format!(
            "{} {}",
            spec.and_then(|s| s.type_.as_deref()).unwrap_or("ClusterIP"),
            spec.and_then(|s| s.cluster_ip.as_deref()).unwrap_or("(no cluster IP)")
        )
    }
}

impl ResourceState for Endpoints {
    fn state_description(&self) -> String {
        let mut ready = 0;
        let mut pending = 0;
        for subset in self.subsets.iter().flatten() {
            ready += subset.addresses.as_ref().map_or(0, Vec::len);
            pending += subset.not_ready_addresses.as_ref().map_or(0, Vec::len);
        }
        format!("endpoints {ready} ready, {pending} pending")
    }
}

impl ResourceState for ConfigMap {
    fn state_description(&self) -> String {
        let keys = self.data.as_ref().map_or(0, |d| d.len())
            + self.binary_data.as_ref().map_or(0, |d| d.len());
        format!("{keys} data keys")
    }
}
