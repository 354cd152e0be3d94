//! Small naming and timing helpers shared by test suites.

use std::time::Duration;

/// Hostname for the node at `index`: `<base>-NNN`.
///
/// An empty base becomes `empty` and negative indexes clamp to zero.
pub fn node_hostname(base: &str, index: i64) -> String {
    let base = if base.is_empty() { "empty" } else { base };
    format!("{base}-{:03}", index.max(0))
}

/// Multiply `timeout` by an integer scale given as text.
///
/// Missing or non-numeric scales leave the timeout unchanged.
pub fn scale_timeout(timeout: Duration, scale: Option<&str>) -> Duration {
    match scale.map(str::trim).map(str::parse::<u32>) {
        Some(Ok(factor)) => timeout.saturating_mul(factor),
        _ => timeout,
    }
}
