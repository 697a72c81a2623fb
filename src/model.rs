use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Relative location of the server scripts and sentinel files inside an install.
pub const BIN_DIR: &str = "bin";
pub const PORT_SENTINEL: &str = "PORT";
pub const URL_SENTINEL: &str = "url.txt";
pub const SERVER_SCRIPT: &str = "che.sh";
pub const SELECTOR_SCRIPT: &str = "workspace.sh";

/// A shell script plus the arguments it is invoked with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptCommand {
    pub script: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
}

impl ScriptCommand {
    pub fn new(script: impl Into<PathBuf>, args: &[&str]) -> Self {
        Self {
            script: script.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// Human-readable form used in logs and UI messages.
    pub fn display(&self) -> String {
        let mut out = self.script.display().to_string();
        for a in &self.args {
            out.push(' ');
            out.push_str(a);
        }
        out
    }
}

/// Filesystem layout of one install, computed once from the resolved base directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchPaths {
    pub base_dir: PathBuf,
    pub bin_dir: PathBuf,
    pub selector: ScriptCommand,
    pub start: ScriptCommand,
    pub stop: ScriptCommand,
    pub port_file: PathBuf,
    pub url_file: PathBuf,
}

impl LaunchPaths {
    /// Derive the fixed `bin/` layout below `base_dir`.
    pub fn from_base(base_dir: &Path) -> Self {
        let bin_dir = base_dir.join(BIN_DIR);
        let server = bin_dir.join(SERVER_SCRIPT);
        Self {
            base_dir: base_dir.to_path_buf(),
            selector: ScriptCommand::new(bin_dir.join(SELECTOR_SCRIPT), &[]),
            start: ScriptCommand::new(server.clone(), &["start"]),
            stop: ScriptCommand::new(server, &["stop"]),
            port_file: bin_dir.join(PORT_SENTINEL),
            url_file: bin_dir.join(URL_SENTINEL),
            bin_dir,
        }
    }

    /// Replace the selector script, resolving relative paths against `bin/`.
    pub fn with_selector(mut self, script: &Path) -> Self {
        let script = if script.is_absolute() {
            script.to_path_buf()
        } else {
            self.bin_dir.join(script)
        };
        self.selector = ScriptCommand::new(script, &[]);
        self
    }
}

/// What to do when the port sentinel holds something that is not a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum MalformedPortPolicy {
    /// Fail the launch cycle.
    #[default]
    Abort,
    /// Discard the file and keep waiting for a valid one.
    Retry,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchConfig {
    pub paths: LaunchPaths,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// `None` waits forever.
    #[serde(with = "humantime_serde")]
    pub port_timeout: Option<Duration>,
    #[serde(with = "humantime_serde")]
    pub url_timeout: Option<Duration>,
    pub malformed_port: MalformedPortPolicy,
    pub skip_selector: bool,
    /// Let scripts write to our stdout/stderr instead of discarding their output.
    pub inherit_script_output: bool,
    pub verify_url: bool,
    #[serde(with = "humantime_serde")]
    pub verify_timeout: Duration,
    pub probe_timeout_ms: u64,
    #[serde(with = "humantime_serde")]
    pub stop_timeout: Duration,
    pub user_agent: String,
}

/// Where the workspace server can be reached once it is ready.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerEndpoint {
    pub port: u16,
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LaunchPhase {
    Idle,
    SelectorLaunched,
    PortDiscovered,
    ServerStarting,
    UrlDiscovered,
    Ready,
    Failed,
    Cancelled,
}

impl LaunchPhase {
    /// The happy-path ladder, in order.
    pub const LADDER: [LaunchPhase; 6] = [
        LaunchPhase::Idle,
        LaunchPhase::SelectorLaunched,
        LaunchPhase::PortDiscovered,
        LaunchPhase::ServerStarting,
        LaunchPhase::UrlDiscovered,
        LaunchPhase::Ready,
    ];

    pub fn label(self) -> &'static str {
        match self {
            LaunchPhase::Idle => "Idle",
            LaunchPhase::SelectorLaunched => "Workspace selector launched",
            LaunchPhase::PortDiscovered => "Port discovered",
            LaunchPhase::ServerStarting => "Server starting",
            LaunchPhase::UrlDiscovered => "URL discovered",
            LaunchPhase::Ready => "Ready",
            LaunchPhase::Failed => "Failed",
            LaunchPhase::Cancelled => "Cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            LaunchPhase::Ready | LaunchPhase::Failed | LaunchPhase::Cancelled
        )
    }

    /// Position on the ladder; terminal failure states have none.
    pub fn ladder_index(self) -> Option<usize> {
        Self::LADDER.iter().position(|p| *p == self)
    }
}

/// Which sentinel a wait is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sentinel {
    Port,
    Url,
}

impl Sentinel {
    pub fn file_name(self) -> &'static str {
        match self {
            Sentinel::Port => PORT_SENTINEL,
            Sentinel::Url => URL_SENTINEL,
        }
    }

    pub fn path(self, paths: &LaunchPaths) -> &Path {
        match self {
            Sentinel::Port => &paths.port_file,
            Sentinel::Url => &paths.url_file,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScriptKind {
    Selector,
    Start,
    Stop,
}

impl ScriptKind {
    pub fn label(self) -> &'static str {
        match self {
            ScriptKind::Selector => "workspace selector",
            ScriptKind::Start => "server start",
            ScriptKind::Stop => "server stop",
        }
    }
}

/// Observable completion of a background shell invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptOutcome {
    pub success: bool,
    /// `None` when the process was killed by a signal or never ran.
    pub exit_code: Option<i32>,
    /// Killed after overrunning its time limit.
    #[serde(default)]
    pub timed_out: bool,
}

impl ScriptOutcome {
    pub fn from_status(status: std::process::ExitStatus) -> Self {
        Self {
            success: status.success(),
            exit_code: status.code(),
            timed_out: false,
        }
    }

    pub fn not_run() -> Self {
        Self {
            success: false,
            exit_code: None,
            timed_out: false,
        }
    }

    pub fn timed_out() -> Self {
        Self {
            success: false,
            exit_code: None,
            timed_out: true,
        }
    }

    pub fn describe(&self) -> String {
        if self.timed_out {
            return "timed out and was killed".to_string();
        }
        match (self.success, self.exit_code) {
            (true, _) => "succeeded".to_string(),
            (false, Some(code)) => format!("failed with exit status {code}"),
            (false, None) => "failed without an exit status".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LaunchEvent {
    PhaseChanged {
        phase: LaunchPhase,
    },
    /// Emitted once per poll while a sentinel is still missing.
    Waiting {
        sentinel: Sentinel,
        elapsed_ms: u64,
    },
    PortDiscovered {
        port: u16,
    },
    UrlDiscovered {
        url: String,
    },
    ScriptFinished {
        kind: ScriptKind,
        outcome: ScriptOutcome,
    },
    Info(InfoEvent),
    CycleCompleted {
        // Boxed to keep the event small.
        record: Box<LaunchRecord>,
    },
}

/// Structured info events emitted by the engine and consumed by UI/CLI layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum InfoEvent {
    Message(String),
    BasePath { path: PathBuf },
    SelectorSkipped,
    SentinelCleanupFailed { path: PathBuf, error: String },
    MalformedPortDiscarded { raw: String },
    ProbeResult { reachable: bool, status: Option<u16> },
}

impl InfoEvent {
    /// Render a human-readable message for UI/CLI layers.
    pub fn to_message(&self) -> String {
        match self {
            InfoEvent::Message(msg) => msg.clone(),
            InfoEvent::BasePath { path } => format!("Install directory: {}", path.display()),
            InfoEvent::SelectorSkipped => "Workspace selector skipped".to_string(),
            InfoEvent::SentinelCleanupFailed { path, error } => {
                format!("Could not remove {}: {}", path.display(), error)
            }
            InfoEvent::MalformedPortDiscarded { raw } => {
                format!("Ignoring malformed port file contents {:?}", raw)
            }
            InfoEvent::ProbeResult { reachable, status } => match (reachable, status) {
                (true, Some(s)) => format!("URL answered with HTTP {s}"),
                (true, None) => "URL is reachable".to_string(),
                (false, Some(s)) => format!("URL still failing (HTTP {s})"),
                (false, None) => "URL did not answer before the verify timeout".to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum LaunchOutcome {
    Ready,
    Failed { reason: String },
    Cancelled,
}

impl LaunchOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, LaunchOutcome::Ready)
    }
}

/// Summary of one launch cycle, as printed in JSON mode and kept in history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchRecord {
    #[serde(default)]
    pub timestamp_utc: String,
    pub launch_id: String,
    pub base_dir: PathBuf,
    pub outcome: LaunchOutcome,
    #[serde(default)]
    pub endpoint: Option<ServerEndpoint>,
    /// Port read from the sentinel even if the cycle later failed.
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub port_wait_ms: Option<u64>,
    #[serde(default)]
    pub url_wait_ms: Option<u64>,
    #[serde(default)]
    pub start_script: Option<ScriptOutcome>,
    #[serde(default)]
    pub url_reachable: Option<bool>,
    /// Whether the start script was invoked, so quitting knows to run stop.
    #[serde(default)]
    pub server_started: bool,
}
