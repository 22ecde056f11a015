//! Failure report printed when a harness-backed test panics or errors
//!
//! Everything here is best effort: a report is still produced when logs or
//! events can't be read.

use k8s_openapi::api::core::v1::Event;
use std::collections::BTreeMap;
use std::fmt;

const WIDTH: usize = 80;
const MAX_LOG_LINES: usize = 50;
const MAX_MESSAGE_CHARS: usize = 60;

/// What the cluster looked like when a test failed
#[derive(Debug, Default)]
pub struct Diagnostics {
    pub namespace: String,
    /// The namespace survives the test
    pub kept: bool,
    /// `pod/container` -> log text
    pub container_logs: BTreeMap<String, String>,
    /// Registered resource reference -> lifecycle at failure
    pub resources: Vec<(String, String)>,
    /// Namespace events, oldest first
    pub events: Vec<Event>,
}

impl Diagnostics {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    fn rule(f: &mut fmt::Formatter<'_>, ch: char) -> fmt::Result {
        writeln!(f, "{}", ch.to_string().repeat(WIDTH))
    }

    fn section(f: &mut fmt::Formatter<'_>, title: &str) -> fmt::Result {
        let head = format!("── {title} ");
        let fill = WIDTH.saturating_sub(head.chars().count());
        writeln!(f)?;
        writeln!(f, "{head}{}", "─".repeat(fill))
    }
}

fn truncate(message: &str, max: usize) -> String {
    if message.chars().count() <= max {
        return message.to_string();
    }
    let cut: String = message.chars().take(max).collect();
    format!("{cut}...")
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f)?;
        Self::rule(f, '━')?;
        writeln!(f, "  KUBETEST TEST FAILED")?;
        Self::rule(f, '━')?;
        if self.kept {
            writeln!(f, "  Namespace: {} (kept for debugging)", self.namespace)?;
        } else {
            writeln!(f, "  Namespace: {}", self.namespace)?;
        }

        if !self.resources.is_empty() {
            Self::section(f, "Registered resources")?;
            for (reference, state) in &self.resources {
                writeln!(f, "  {reference:40} {state}")?;
            }
        }

        if !self.container_logs.is_empty() {
            Self::section(f, "Container logs")?;
            for (container, logs) in &self.container_logs {
                writeln!(f, "[{container}]")?;
                let lines: Vec<&str> = logs.lines().collect();
                if lines.is_empty() {
                    writeln!(f, "  (no logs)")?;
                    continue;
                }
                // tail, the end of the log is where failures show up
                let skip = lines.len().saturating_sub(MAX_LOG_LINES);
                if skip > 0 {
                    writeln!(f, "  ... ({skip} earlier lines)")?;
                }
                for line in &lines[skip..] {
                    writeln!(f, "  {line}")?;
                }
            }
        }

        if !self.events.is_empty() {
            Self::section(f, &format!("Events ({})", self.events.len()))?;
            for event in &self.events {
                let at = event
                    .last_timestamp
                    .as_ref()
                    .map_or_else(|| "--:--:--".to_string(), |t| t.0.format("%H:%M:%S").to_string());
                let object = format!(
                    "{}/{}",
                    event.involved_object.kind.as_deref().unwrap_or("?"),
                    event.involved_object.name.as_deref().unwrap_or("?")
                );
                writeln!(
                    f,
                    "  {at}  {:8} {object:32} {:18} {}",
                    event.type_.as_deref().unwrap_or(""),
                    event.reason.as_deref().unwrap_or("Unknown"),
                    truncate(event.message.as_deref().unwrap_or(""), MAX_MESSAGE_CHARS)
                )?;
            }
        }

        Self::section(f, "Next steps")?;
        writeln!(f, "  kubectl -n {} get all", self.namespace)?;
        writeln!(f, "  kubectl -n {} get events --sort-by=.lastTimestamp", self.namespace)?;
        if self.kept {
            writeln!(f, "  kubectl delete namespace {}", self.namespace)?;
        }
        Self::rule(f, '━')
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ObjectReference;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use k8s_openapi::chrono::{TimeZone, Utc};

    #[test]
    fn test_minimal_report() {
        let output = Diagnostics::new("kubetest-0a1b2c3d").to_string();

        assert!(output.contains("KUBETEST TEST FAILED"));
        assert!(output.contains("Namespace: kubetest-0a1b2c3d\n"));
        assert!(output.contains("kubectl -n kubetest-0a1b2c3d get all"));
        assert!(!output.contains("kubectl delete namespace"));
        assert!(!output.contains("Container logs"));
    }

    #[test]
    fn test_kept_namespace_gets_cleanup_hint() {
        let mut diag = Diagnostics::new("kubetest-0a1b2c3d");
        diag.kept = true;
        let output = diag.to_string();

        assert!(output.contains("(kept for debugging)"));
        assert!(output.contains("kubectl delete namespace kubetest-0a1b2c3d"));
    }

    #[test]
    fn test_logs_are_tailed() {
        let mut diag = Diagnostics::new("ns");
        let logs: Vec<String> = (1..=60).map(|i| format!("line {i}")).collect();
        diag.container_logs
            .insert("echo-7d9f/echo".to_string(), logs.join("\n"));
        diag.container_logs
            .insert("echo-7d9f/sidecar".to_string(), String::new());

        let output = diag.to_string();
        assert!(output.contains("[echo-7d9f/echo]"));
        assert!(output.contains("... (10 earlier lines)"));
        assert!(!output.contains("  line 10\n"));
        assert!(output.contains("  line 60"));
        assert!(output.contains("(no logs)"));
    }

    #[test]
    fn test_events_and_resources() {
        let mut diag = Diagnostics::new("ns");
        diag.resources
            .push(("deployment/echo-deployment".to_string(), "Created".to_string()));
        diag.events.push(Event {
            type_: Some("Warning".to_string()),
            reason: Some("FailedScheduling".to_string()),
            message: Some("0/1 nodes are available: insufficient cpu. ".repeat(3)),
            involved_object: ObjectReference {
                kind: Some("Pod".to_string()),
                name: Some("echo-7d9f".to_string()),
                ..Default::default()
            },
            last_timestamp: Some(Time(Utc.with_ymd_and_hms(2024, 1, 15, 10, 42, 1).unwrap())),
            ..Default::default()
        });

        let output = diag.to_string();
        assert!(output.contains("Registered resources"));
        assert!(output.contains("deployment/echo-deployment"));
        assert!(output.contains("Events (1)"));
        assert!(output.contains("10:42:01"));
        assert!(output.contains("Pod/echo-7d9f"));
        assert!(output.contains("FailedScheduling"));
        assert!(output.contains("..."));
    }

    #[test]
    fn test_truncate_is_char_safe() {
        assert_eq!(truncate("héllo", 10), "héllo");
        assert_eq!(truncate("héllo wörld", 4), "héll...");
    }
}
