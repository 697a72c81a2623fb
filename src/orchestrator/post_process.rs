//! Post-cycle processing utilities.
//!
//! Handles auto-save, exports, and history refresh after a launch cycle completes.

use crate::cli::Cli;
use crate::model::LaunchRecord;
use crate::storage;

/// Result of post-cycle processing, ready for presentation layers.
pub(crate) struct ProcessedLaunch {
    pub export_messages: Vec<String>,
    pub history: Vec<LaunchRecord>,
    pub auto_saved_path: Option<std::path::PathBuf>,
}

/// Process a completed launch cycle: auto-save, export, and reload history.
pub(crate) fn process_launch_completion(
    args: &Cli,
    history_load: usize,
    auto_save: bool,
    record: &LaunchRecord,
) -> ProcessedLaunch {
    let auto_saved_path = if auto_save {
        match storage::save_record(record) {
            Ok(p) => Some(p),
            Err(e) => {
                tracing::warn!(error = %format!("{e:#}"), "auto-save failed");
                None
            }
        }
    } else {
        None
    };

    let mut export_messages = Vec::new();
    if let Some(export_path) = args.export_json.as_deref() {
        match storage::export_json(export_path, record) {
            Ok(_) => export_messages.push(format!("Exported JSON: {}", export_path.display())),
            Err(e) => export_messages.push(format!("Export JSON failed: {e:#}")),
        }
    }

    let history = storage::load_recent(history_load).unwrap_or_default();

    ProcessedLaunch {
        export_messages,
        history,
        auto_saved_path,
    }
}
