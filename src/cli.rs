use crate::engine::{self, EngineControl, LaunchEngine};
use crate::model::{LaunchConfig, LaunchEvent, LaunchPaths, LaunchRecord, MalformedPortPolicy};
use anyhow::{Context, Result};
use clap::Parser;
use rand::RngCore;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "workspace-launcher",
    version,
    about = "Start a local workspace server and wait until it publishes its URL"
)]
pub struct Cli {
    /// Install directory holding bin/ (defaults to the directory above this executable)
    #[arg(long)]
    pub base_dir: Option<PathBuf>,

    /// Workspace selector script, relative to bin/ unless absolute
    #[arg(long)]
    pub selector_script: Option<PathBuf>,

    /// Do not run the workspace selector; wait for bin/PORT directly
    #[arg(long)]
    pub skip_selector: bool,

    /// Print JSON launch record and exit (no TUI)
    #[arg(long)]
    pub json: bool,

    /// Print text summary and exit (no TUI)
    #[arg(long)]
    pub text: bool,

    /// Run silently: suppress all output except errors (for scripting)
    #[arg(long)]
    pub silent: bool,

    /// Interval between sentinel file checks
    #[arg(long, default_value = "2s")]
    pub poll_interval: humantime::Duration,

    /// How long to wait for bin/PORT (0s waits forever)
    #[arg(long, default_value = "10m")]
    pub port_timeout: humantime::Duration,

    /// How long to wait for bin/url.txt after the server start (0s waits forever)
    #[arg(long, default_value = "5m")]
    pub url_timeout: humantime::Duration,

    /// What to do when bin/PORT does not hold a valid port
    #[arg(long, value_enum, default_value_t = MalformedPortPolicy::Abort)]
    pub malformed_port: MalformedPortPolicy,

    /// Probe the discovered URL over HTTP before reporting it ready
    #[arg(long)]
    pub verify_url: bool,

    /// How long to keep probing the URL
    #[arg(long, default_value = "30s")]
    pub verify_timeout: humantime::Duration,

    /// Per-request timeout for URL probes in milliseconds
    #[arg(long, default_value_t = 2000)]
    pub probe_timeout_ms: u64,

    /// How long the stop script may run
    #[arg(long, default_value = "60s")]
    pub stop_timeout: humantime::Duration,

    /// Use --stop-on-exit true or --stop-on-exit false to override
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub stop_on_exit: bool,

    /// In text/JSON mode, keep running after the server is ready until Ctrl-C
    #[arg(long)]
    pub wait: bool,

    /// Only run the stop script and exit
    #[arg(long)]
    pub stop: bool,

    /// Open the ready URL in the system browser
    #[arg(long)]
    pub open: bool,

    /// Export the launch record as JSON
    #[arg(long)]
    pub export_json: Option<PathBuf>,

    /// Use --auto-save true or --auto-save false to override
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub auto_save: bool,

    /// Write logs to this file (the TUI otherwise keeps logging off)
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

impl Cli {
    /// Whether the terminal UI will own the screen.
    pub fn uses_tui(&self) -> bool {
        cfg!(feature = "tui") && !self.silent && !self.json && !self.text && !self.stop
    }
}

pub async fn run(args: Cli) -> Result<()> {
    // Validate that --silent can only be used with --json
    if args.silent && !args.json {
        return Err(anyhow::anyhow!(
            "--silent can only be used with --json. Use --silent --json together."
        ));
    }

    if args.stop {
        return run_stop(args).await;
    }

    // Silent mode takes precedence over other output modes
    if args.silent {
        return run_json(args, true).await;
    }

    if !args.json && !args.text {
        #[cfg(feature = "tui")]
        {
            return crate::tui::run(args).await;
        }
        #[cfg(not(feature = "tui"))]
        {
            // Fallback when built without TUI support.
            return run_text(args).await;
        }
    }

    if args.json {
        return run_json(args, false).await;
    }

    run_text(args).await
}

/// Generate a random identifier for one launch cycle.
pub(crate) fn gen_launch_id() -> String {
    let mut b = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut b);
    u64::from_le_bytes(b).to_string()
}

/// `0s` on the command line means no limit.
fn optional_timeout(d: humantime::Duration) -> Option<Duration> {
    let d = Duration::from(d);
    if d.is_zero() {
        None
    } else {
        Some(d)
    }
}

/// Resolve the install directory and build a `LaunchConfig` from CLI arguments.
pub fn build_config(args: &Cli) -> Result<LaunchConfig> {
    let base_dir = engine::paths::resolve_base_path(args.base_dir.as_deref())
        .context("cannot continue without an install directory")?;
    let mut paths = LaunchPaths::from_base(&base_dir);
    if let Some(selector) = args.selector_script.as_deref() {
        paths = paths.with_selector(selector);
    }

    Ok(LaunchConfig {
        paths,
        poll_interval: Duration::from(args.poll_interval),
        port_timeout: optional_timeout(args.port_timeout),
        url_timeout: optional_timeout(args.url_timeout),
        malformed_port: args.malformed_port,
        skip_selector: args.skip_selector,
        inherit_script_output: args.text,
        verify_url: args.verify_url,
        verify_timeout: Duration::from(args.verify_timeout),
        probe_timeout_ms: args.probe_timeout_ms,
        stop_timeout: Duration::from(args.stop_timeout),
        user_agent: format!("workspace-launcher/{}", env!("CARGO_PKG_VERSION")),
    })
}

/// Run one launch cycle, feeding every event to `on_event`. Ctrl-C cancels the cycle.
async fn drive_cycle(cfg: LaunchConfig, on_event: impl FnMut(LaunchEvent)) -> Result<LaunchRecord> {
    drive_cycle_until(cfg, ctrl_c_pressed(), on_event).await
}

/// Resolves on the first Ctrl-C; never resolves if the handler cannot be installed.
async fn ctrl_c_pressed() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "cannot listen for Ctrl-C");
        futures::future::pending::<()>().await;
    }
}

/// Like `drive_cycle`, but cancels when `interrupt` resolves. The interrupt future
/// lives across loop turns so a signal between two events is not lost.
async fn drive_cycle_until(
    cfg: LaunchConfig,
    interrupt: impl std::future::Future<Output = ()>,
    mut on_event: impl FnMut(LaunchEvent),
) -> Result<LaunchRecord> {
    let (evt_tx, mut evt_rx) = mpsc::unbounded_channel::<LaunchEvent>();
    let (ctrl_tx, ctrl_rx) = mpsc::unbounded_channel::<EngineControl>();

    let engine = LaunchEngine::new(cfg);
    let launch_id = gen_launch_id();
    let handle = tokio::spawn(async move { engine.run(launch_id, evt_tx, ctrl_rx).await });

    tokio::pin!(interrupt);
    let mut interrupted = false;
    loop {
        tokio::select! {
            ev = evt_rx.recv() => match ev {
                Some(ev) => on_event(ev),
                None => break,
            },
            _ = &mut interrupt, if !interrupted => {
                interrupted = true;
                tracing::info!("interrupt received, cancelling launch");
                let _ = ctrl_tx.send(EngineControl::Cancel);
            }
        }
    }

    handle.await.context("launch task failed")
}

/// A cycle that ended short of Ready may still have invoked the start script;
/// stop that server unless `--stop-on-exit false` was given.
async fn stop_after_failure(
    args: &Cli,
    cfg: &LaunchConfig,
    record: &LaunchRecord,
    out_tx: Option<&mpsc::UnboundedSender<OutputLine>>,
) {
    if !(args.stop_on_exit && record.server_started) {
        return;
    }
    let outcome = engine::stop_server_background(cfg).wait().await;
    if let Some(tx) = out_tx {
        let _ = tx.send(OutputLine::Stderr(format!(
            "Server stop {}",
            outcome.describe()
        )));
    }
}

/// After a ready launch: open the URL if asked and, with `--wait`, stay until Ctrl-C
/// and then run the stop script.
async fn after_ready(
    args: &Cli,
    cfg: &LaunchConfig,
    record: &LaunchRecord,
    out_tx: Option<&mpsc::UnboundedSender<OutputLine>>,
) -> Result<()> {
    let say = |msg: String| {
        if let Some(tx) = out_tx {
            let _ = tx.send(OutputLine::Stderr(msg));
        }
    };

    if args.open {
        if let Some(endpoint) = record.endpoint.as_ref() {
            match crate::browser::open_url(&endpoint.url) {
                Ok(()) => say(format!("Opened {}", endpoint.url)),
                Err(e) => say(format!("Could not open browser: {e:#}")),
            }
        }
    }

    if args.wait {
        say("Server running; press Ctrl-C to stop it.".into());
        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for Ctrl-C")?;
        if args.stop_on_exit {
            let outcome = engine::stop_server_background(cfg).wait().await;
            say(format!("Server stop {}", outcome.describe()));
            if !outcome.success {
                return Err(anyhow::anyhow!("stop script {}", outcome.describe()));
            }
        }
    }

    Ok(())
}

fn failure(record: &LaunchRecord) -> anyhow::Error {
    match &record.outcome {
        crate::model::LaunchOutcome::Failed { reason } => anyhow::anyhow!("launch failed: {reason}"),
        crate::model::LaunchOutcome::Cancelled => anyhow::anyhow!("launch cancelled"),
        crate::model::LaunchOutcome::Ready => anyhow::anyhow!("launch succeeded"),
    }
}

/// JSON mode. `silent` suppresses everything except errors.
async fn run_json(args: Cli, silent: bool) -> Result<()> {
    let cfg = build_config(&args)?;
    let (out_tx, out_handle) = if silent {
        (None, None)
    } else {
        let (tx, handle) = spawn_output_writer();
        (Some(tx), Some(handle))
    };

    // Events are only consumed; the record is the output.
    let record = drive_cycle(cfg.clone(), |_ev| {}).await?;

    let processed = crate::orchestrator::process_launch_completion(&args, 0, args.auto_save, &record);
    if silent {
        if let Some(msg) = processed.export_messages.iter().find(|m| m.contains("failed")) {
            return Err(anyhow::anyhow!("{msg}"));
        }
    }

    if let Some(tx) = out_tx.as_ref() {
        let out = serde_json::to_string_pretty(&record)?;
        let _ = tx.send(OutputLine::Stdout(out));
        for msg in processed.export_messages {
            let _ = tx.send(OutputLine::Stderr(msg));
        }
        if let Some(p) = processed.auto_saved_path.as_ref() {
            let _ = tx.send(OutputLine::Stderr(format!("Saved: {}", p.display())));
        }
    }

    let res = if record.outcome.is_ready() {
        after_ready(&args, &cfg, &record, out_tx.as_ref()).await
    } else {
        stop_after_failure(&args, &cfg, &record, out_tx.as_ref()).await;
        Err(failure(&record))
    };

    if let Some(tx) = out_tx {
        drop(tx);
    }
    if let Some(handle) = out_handle {
        let _ = handle.await;
    }

    res
}

async fn run_text(args: Cli) -> Result<()> {
    let cfg = build_config(&args)?;
    let (out_tx, out_handle) = spawn_output_writer();

    let progress_tx = out_tx.clone();
    let mut last_wait_report: Option<(crate::model::Sentinel, u64)> = None;
    let record = drive_cycle(cfg.clone(), move |ev| match ev {
        LaunchEvent::PhaseChanged { phase } => {
            let _ = progress_tx.send(OutputLine::Stderr(format!("== {} ==", phase.label())));
        }
        LaunchEvent::Waiting {
            sentinel,
            elapsed_ms,
        } => {
            // Report roughly every ten seconds rather than every poll.
            let bucket = elapsed_ms / 10_000;
            if last_wait_report != Some((sentinel, bucket)) {
                last_wait_report = Some((sentinel, bucket));
                let _ = progress_tx.send(OutputLine::Stderr(format!(
                    "Waiting for {} ({}s)",
                    sentinel.file_name(),
                    elapsed_ms / 1000
                )));
            }
        }
        LaunchEvent::PortDiscovered { port } => {
            let _ = progress_tx.send(OutputLine::Stderr(format!("Port: {port}")));
        }
        LaunchEvent::UrlDiscovered { url } => {
            let _ = progress_tx.send(OutputLine::Stderr(format!("URL: {url}")));
        }
        LaunchEvent::ScriptFinished { kind, outcome } => {
            let _ = progress_tx.send(OutputLine::Stderr(format!(
                "{} script {}",
                kind.label(),
                outcome.describe()
            )));
        }
        LaunchEvent::Info(info) => {
            let _ = progress_tx.send(OutputLine::Stderr(info.to_message()));
        }
        LaunchEvent::CycleCompleted { .. } => {}
    })
    .await?;

    let processed = crate::orchestrator::process_launch_completion(&args, 0, args.auto_save, &record);
    let summary = crate::text_summary::build_text_summary(&record);
    for line in summary.lines {
        let _ = out_tx.send(OutputLine::Stdout(line));
    }
    for msg in processed.export_messages {
        let _ = out_tx.send(OutputLine::Stderr(msg));
    }
    if let Some(p) = processed.auto_saved_path.as_ref() {
        let _ = out_tx.send(OutputLine::Stderr(format!("Saved: {}", p.display())));
    }

    let res = if record.outcome.is_ready() {
        after_ready(&args, &cfg, &record, Some(&out_tx)).await
    } else {
        stop_after_failure(&args, &cfg, &record, Some(&out_tx)).await;
        Err(failure(&record))
    };

    drop(out_tx);
    let _ = out_handle.await;
    res
}

/// `--stop`: run the stop script once and report its outcome.
async fn run_stop(args: Cli) -> Result<()> {
    let cfg = build_config(&args)?;
    let outcome = engine::stop_server_background(&cfg).wait().await;
    if outcome.success {
        if !args.silent {
            eprintln!("Server stop {}", outcome.describe());
        }
        Ok(())
    } else {
        Err(anyhow::anyhow!(
            "{} {}",
            cfg.paths.stop.display(),
            outcome.describe()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Cli {
        let mut argv = vec!["workspace-launcher"];
        argv.extend_from_slice(extra);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn defaults_match_documented_values() {
        let args = parse(&[]);
        assert_eq!(Duration::from(args.poll_interval), Duration::from_secs(2));
        assert_eq!(Duration::from(args.port_timeout), Duration::from_secs(600));
        assert_eq!(args.malformed_port, MalformedPortPolicy::Abort);
        assert!(args.stop_on_exit);
        assert!(args.auto_save);
    }

    #[test]
    fn zero_timeout_means_forever() {
        let dir = tempfile::TempDir::new().unwrap();
        let base = dir.path().to_str().unwrap();
        let args = parse(&["--base-dir", base, "--port-timeout", "0s", "--url-timeout", "90s"]);

        let cfg = build_config(&args).unwrap();
        assert_eq!(cfg.port_timeout, None);
        assert_eq!(cfg.url_timeout, Some(Duration::from_secs(90)));
        assert_eq!(cfg.paths.base_dir, std::fs::canonicalize(dir.path()).unwrap());
    }

    #[test]
    fn selector_override_and_policy() {
        let dir = tempfile::TempDir::new().unwrap();
        let base = dir.path().to_str().unwrap();
        let args = parse(&[
            "--base-dir",
            base,
            "--selector-script",
            "workspace-mac.sh",
            "--malformed-port",
            "retry",
        ]);

        let cfg = build_config(&args).unwrap();
        assert!(cfg.paths.selector.script.ends_with("bin/workspace-mac.sh"));
        assert_eq!(cfg.malformed_port, MalformedPortPolicy::Retry);
    }

    #[test]
    fn unresolvable_base_dir_is_reported() {
        let args = parse(&["--base-dir", "/definitely/not/here/ide"]);
        let err = build_config(&args).unwrap_err();
        assert!(format!("{err:#}").contains("/definitely/not/here/ide"));
    }

    #[tokio::test]
    async fn silent_requires_json() {
        let err = run(parse(&["--silent"])).await.unwrap_err();
        assert!(err.to_string().contains("--silent"));
    }

    const SERVER: &str = "case \"$1\" in\n  start) exit 0 ;;\n  stop) touch stopped ;;\nesac\n";

    /// Install whose server starts but never publishes url.txt.
    fn stalled_install() -> tempfile::TempDir {
        let dir = tempfile::TempDir::new().unwrap();
        let bin = dir.path().join("bin");
        std::fs::create_dir(&bin).unwrap();
        std::fs::write(bin.join("che.sh"), SERVER).unwrap();
        std::fs::write(bin.join("PORT"), "8080").unwrap();
        dir
    }

    fn stalled_args(base: &str, stop_on_exit: &str) -> Cli {
        parse(&[
            "--base-dir",
            base,
            "--json",
            "--silent",
            "--skip-selector",
            "--poll-interval",
            "50ms",
            "--url-timeout",
            "300ms",
            "--auto-save",
            "false",
            "--stop-on-exit",
            stop_on_exit,
        ])
    }

    #[tokio::test]
    async fn failed_launch_stops_started_server() {
        let dir = stalled_install();
        let args = stalled_args(dir.path().to_str().unwrap(), "true");

        let err = run(args).await.unwrap_err();
        assert!(err.to_string().contains("launch failed"), "{err:#}");
        assert!(dir.path().join("bin").join("stopped").exists());
    }

    #[tokio::test]
    async fn failed_launch_leaves_server_when_asked() {
        let dir = stalled_install();
        let args = stalled_args(dir.path().to_str().unwrap(), "false");

        assert!(run(args).await.is_err());
        assert!(!dir.path().join("bin").join("stopped").exists());
    }

    #[tokio::test]
    async fn interrupt_cancels_between_wait_ticks() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("bin")).unwrap();
        let args = parse(&[
            "--base-dir",
            dir.path().to_str().unwrap(),
            "--skip-selector",
            "--poll-interval",
            "10ms",
            "--port-timeout",
            "0s",
        ]);
        let cfg = build_config(&args).unwrap();

        let mut ticks = 0;
        let record = tokio::time::timeout(
            Duration::from_secs(5),
            drive_cycle_until(cfg, tokio::time::sleep(Duration::from_millis(150)), |ev| {
                if matches!(ev, LaunchEvent::Waiting { .. }) {
                    ticks += 1;
                }
            }),
        )
        .await
        .expect("interrupt must end the cycle")
        .unwrap();

        assert_eq!(record.outcome, crate::model::LaunchOutcome::Cancelled);
        assert!(ticks > 3, "expected the loop to turn several times, got {ticks}");
    }

    #[test]
    fn launch_ids_differ() {
        assert_ne!(gen_launch_id(), gen_launch_id());
    }
}
