//! Application-level orchestration utilities.
//!
//! This module owns launch lifecycle control (start/restart/stop) and post-cycle processing
//! such as auto-save, exports, and history refresh. UI/CLI layers call into this module to
//! keep responsibilities separated.

mod controller;
mod post_process;

pub(crate) use controller::{run_controller, UiCommand};
pub(crate) use post_process::process_launch_completion;
