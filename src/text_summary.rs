//! Text summary builder for CLI output.

use crate::model::{LaunchOutcome, LaunchRecord};

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

fn secs(ms: Option<u64>) -> String {
    match ms {
        Some(ms) => format!("{:.1}s", ms as f64 / 1000.0),
        None => "-".to_string(),
    }
}

pub(crate) fn build_text_summary(record: &LaunchRecord) -> TextSummary {
    let mut lines = Vec::new();

    match &record.outcome {
        LaunchOutcome::Ready => lines.push("Status: ready".to_string()),
        LaunchOutcome::Failed { reason } => lines.push(format!("Status: failed ({reason})")),
        LaunchOutcome::Cancelled => lines.push("Status: cancelled".to_string()),
    }

    lines.push(format!("Install: {}", record.base_dir.display()));

    if let Some(endpoint) = record.endpoint.as_ref() {
        lines.push(format!("URL: {}", endpoint.url));
        lines.push(format!("Port: {}", endpoint.port));
    } else if let Some(port) = record.port {
        lines.push(format!("Port: {port}"));
    }

    lines.push(format!(
        "Waited: port {} url {}",
        secs(record.port_wait_ms),
        secs(record.url_wait_ms)
    ));

    if let Some(outcome) = record.start_script.as_ref() {
        lines.push(format!("Start script: {}", outcome.describe()));
    }

    match record.url_reachable {
        Some(true) => lines.push("URL check: reachable".to_string()),
        Some(false) => lines.push("URL check: no answer".to_string()),
        None => {}
    }

    TextSummary { lines }
}
