//! Readiness of label-selected workloads, judged from `kubectl get -o jsonpath` output.

use std::fmt;

/// Workload kind a [`ReadinessCheck`] waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Workload {
    /// Every selected daemonset has as many ready pods as it has scheduled.
    DaemonSet,
    /// Every selected pod is running (or has completed).
    Pod,
}

impl Workload {
    /// Resource name passed to `kubectl get`.
    pub fn resource(self) -> &'static str {
        match self {
            Workload::DaemonSet => "daemonset",
            Workload::Pod => "pods",
        }
    }

    /// Output template printing one line per selected object.
    pub fn jsonpath(self) -> &'static str {
        match self {
            Workload::DaemonSet => {
                r#"jsonpath={range .items[*]}{.status.desiredNumberScheduled}{" "}{.status.numberReady}{"\n"}{end}"#
            }
            Workload::Pod => r#"jsonpath={range .items[*]}{.status.phase}{"\n"}{end}"#,
        }
    }

    /// Whether `output` (rendered with [`Workload::jsonpath`]) describes a ready set.
    ///
    /// An empty selection is never ready.
    pub fn is_ready(self, output: &str) -> bool {
        let mut lines = output.lines().map(str::trim).filter(|line| !line.is_empty());
        let mut seen = false;
        let all_ready = lines.all(|line| {
            seen = true;
            match self {
                Workload::DaemonSet => daemonset_ready(line),
                Workload::Pod => matches!(line, "Running" | "Succeeded"),
            }
        });
        seen && all_ready
    }
}

impl fmt::Display for Workload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.resource())
    }
}

// `numberReady` is omitted by the API server while it is zero.
fn daemonset_ready(line: &str) -> bool {
    let mut fields = line.split_whitespace().map(str::parse::<u64>);
    match (fields.next(), fields.next()) {
        (Some(Ok(desired)), Some(Ok(ready))) => ready >= desired,
        (Some(Ok(desired)), None) => desired == 0,
        _ => false,
    }
}

/// Workloads in one namespace selected by a label selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessCheck {
    pub workload: Workload,
    pub namespace: String,
    pub selector: String,
}

impl ReadinessCheck {
    /// Parse `<namespace>/<selector>`, e.g. `kube-system/k8s-app=canal`.
    pub fn parse(workload: Workload, target: &str) -> Result<Self, String> {
        match target.split_once('/') {
            Some((namespace, selector)) if !namespace.is_empty() && !selector.is_empty() => {
                Ok(Self {
                    workload,
                    namespace: namespace.to_string(),
                    selector: selector.to_string(),
                })
            }
            _ => Err(format!(
                "invalid {workload} check '{target}' (expected <namespace>/<selector>)"
            )),
        }
    }
}

impl fmt::Display for ReadinessCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.workload, self.namespace, self.selector)
    }
}
