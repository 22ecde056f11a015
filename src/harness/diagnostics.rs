use super::Harness;
use crate::diagnostics::Diagnostics;
use tracing::warn;

impl Harness {
    /// Gather container logs, namespace events and registered resource states
    ///
    /// Never fails; whatever can't be read is left out and logged. Called by
    /// the test attribute when a test fails.
    pub async fn collect_diagnostics(&self) -> Diagnostics {
        let mut diag = Diagnostics::new(self.namespace.clone());
        diag.kept = self.config.keep_namespace || !self.owns_namespace;

        diag.resources = self
            .registered()
            .iter()
            .map(|r| (r.reference(), format!("{:?}", r.lifecycle())))
            .collect();

        match self.get_pods().await {
            Ok(pods) => {
                for pod in &pods {
                    for container in &pod.get_containers() {
                        let key = format!("{}/{}", pod.name(), container.name());
                        let logs = container
                            .get_logs()
                            .await
                            .unwrap_or_else(|e| format!("[error getting logs: {e}]"));
                        diag.container_logs.insert(key, logs);
                    }
                }
            }
            Err(e) => warn!(error = %e, "Failed to list pods for diagnostics"),
        }

        match self.get_namespace_events().await {
            Ok(events) => diag.events = events,
            Err(e) => warn!(error = %e, "Failed to collect events for diagnostics"),
        }

        diag
    }
}
