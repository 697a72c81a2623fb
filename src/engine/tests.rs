//! Launch-cycle scenarios against throwaway install trees.

use super::*;
use crate::model::{LaunchPaths, LaunchPhase};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const NOOP_SERVER: &str = "case \"$1\" in\n  start) exit 0 ;;\n  stop) touch stopped ;;\nesac\n";

/// Build `<tmp>/bin` with a selector and a server script.
fn install(selector: &str, server: &str) -> TempDir {
    let dir = TempDir::new().unwrap();
    let bin = dir.path().join("bin");
    fs::create_dir(&bin).unwrap();
    fs::write(bin.join("workspace.sh"), selector).unwrap();
    fs::write(bin.join("che.sh"), server).unwrap();
    dir
}

fn config(base: &Path) -> LaunchConfig {
    LaunchConfig {
        paths: LaunchPaths::from_base(base),
        poll_interval: Duration::from_millis(25),
        port_timeout: Some(Duration::from_secs(10)),
        url_timeout: Some(Duration::from_secs(10)),
        malformed_port: MalformedPortPolicy::Abort,
        skip_selector: false,
        inherit_script_output: false,
        verify_url: false,
        verify_timeout: Duration::from_secs(1),
        probe_timeout_ms: 200,
        stop_timeout: Duration::from_secs(5),
        user_agent: "workspace-launcher-test".into(),
    }
}

async fn run_cycle(cfg: LaunchConfig) -> (LaunchRecord, Vec<LaunchEvent>) {
    let (evt_tx, mut evt_rx) = mpsc::unbounded_channel();
    let (_ctrl_tx, ctrl_rx) = mpsc::unbounded_channel();
    let record = LaunchEngine::new(cfg)
        .run("test".into(), evt_tx, ctrl_rx)
        .await;
    let mut events = Vec::new();
    while let Ok(ev) = evt_rx.try_recv() {
        events.push(ev);
    }
    (record, events)
}

fn phases(events: &[LaunchEvent]) -> Vec<LaunchPhase> {
    events
        .iter()
        .filter_map(|ev| match ev {
            LaunchEvent::PhaseChanged { phase } => Some(*phase),
            _ => None,
        })
        .collect()
}

fn write_later(path: PathBuf, contents: &'static str, after: Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(after).await;
        fs::write(path, contents).unwrap();
    });
}

#[tokio::test]
async fn discovers_port_then_url() {
    let dir = install("exit 0\n", NOOP_SERVER);
    let cfg = config(dir.path());
    let port_file = cfg.paths.port_file.clone();
    let url_file = cfg.paths.url_file.clone();

    write_later(port_file.clone(), "8080", Duration::from_millis(100));
    write_later(
        url_file.clone(),
        "http://localhost:8080/workspace",
        Duration::from_millis(300),
    );

    let (record, events) = run_cycle(cfg).await;

    assert_eq!(record.outcome, LaunchOutcome::Ready);
    assert_eq!(
        record.endpoint,
        Some(ServerEndpoint {
            port: 8080,
            url: "http://localhost:8080/workspace".into(),
        })
    );
    assert!(record.server_started);
    assert!(!port_file.exists());
    assert!(!url_file.exists());
    assert_eq!(phases(&events), LaunchPhase::LADDER.to_vec());
}

#[tokio::test]
async fn selector_can_publish_the_port() {
    let dir = install("printf 4000 > PORT\n", NOOP_SERVER);
    let cfg = config(dir.path());
    write_later(
        cfg.paths.url_file.clone(),
        "http://127.0.0.1:4000/",
        Duration::from_millis(200),
    );

    let (record, _) = run_cycle(cfg).await;

    assert_eq!(record.port, Some(4000));
    assert_eq!(record.outcome, LaunchOutcome::Ready);
}

#[tokio::test]
async fn start_script_runs_only_after_port() {
    // The start script records whether PORT had already been consumed.
    let server = "case \"$1\" in\n  start) if [ -e PORT ]; then echo early > order; else echo after > order; fi ;;\nesac\n";
    let dir = install("exit 0\n", server);
    let cfg = config(dir.path());
    let bin = cfg.paths.bin_dir.clone();
    write_later(cfg.paths.port_file.clone(), "8080", Duration::from_millis(100));
    write_later(cfg.paths.url_file.clone(), "http://localhost:8080/", Duration::from_millis(400));

    let (record, events) = run_cycle(cfg).await;

    assert_eq!(record.outcome, LaunchOutcome::Ready);
    assert_eq!(fs::read_to_string(bin.join("order")).unwrap().trim(), "after");

    let port_at = events
        .iter()
        .position(|e| matches!(e, LaunchEvent::PortDiscovered { .. }))
        .unwrap();
    let starting_at = events
        .iter()
        .position(|e| matches!(e, LaunchEvent::PhaseChanged { phase: LaunchPhase::ServerStarting }))
        .unwrap();
    let selector_at = events
        .iter()
        .position(|e| matches!(e, LaunchEvent::PhaseChanged { phase: LaunchPhase::SelectorLaunched }))
        .unwrap();
    let first_port_wait = events
        .iter()
        .position(|e| matches!(e, LaunchEvent::Waiting { sentinel: Sentinel::Port, .. }))
        .unwrap();
    assert!(selector_at < first_port_wait);
    assert!(port_at < starting_at);
}

#[tokio::test]
async fn malformed_port_aborts_by_default() {
    let dir = install("exit 0\n", NOOP_SERVER);
    let cfg = config(dir.path());
    let port_file = cfg.paths.port_file.clone();
    fs::write(&port_file, "abc").unwrap();

    let (record, events) = run_cycle(cfg).await;

    assert_eq!(record.port, None);
    assert!(!record.server_started);
    assert!(!port_file.exists());
    match record.outcome {
        LaunchOutcome::Failed { reason } => assert!(reason.contains("abc"), "{reason}"),
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(phases(&events).last(), Some(&LaunchPhase::Failed));
}

#[tokio::test]
async fn malformed_port_can_be_retried() {
    let dir = install("exit 0\n", NOOP_SERVER);
    let mut cfg = config(dir.path());
    cfg.malformed_port = MalformedPortPolicy::Retry;
    fs::write(&cfg.paths.port_file, "abc").unwrap();
    write_later(cfg.paths.port_file.clone(), "9000", Duration::from_millis(150));
    write_later(cfg.paths.url_file.clone(), "http://localhost:9000/", Duration::from_millis(300));

    let (record, events) = run_cycle(cfg).await;

    assert_eq!(record.outcome, LaunchOutcome::Ready);
    assert_eq!(record.port, Some(9000));
    assert!(events.iter().any(|e| matches!(
        e,
        LaunchEvent::Info(InfoEvent::MalformedPortDiscarded { raw }) if raw == "abc"
    )));
}

#[tokio::test]
async fn missing_port_times_out() {
    let dir = install("exit 0\n", NOOP_SERVER);
    let mut cfg = config(dir.path());
    cfg.port_timeout = Some(Duration::from_millis(150));

    let (record, _) = run_cycle(cfg).await;

    match record.outcome {
        LaunchOutcome::Failed { reason } => {
            assert!(reason.contains("timed out"), "{reason}");
            assert!(reason.contains("PORT"), "{reason}");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn failing_start_script_ends_url_wait() {
    let server = "case \"$1\" in\n  start) exit 7 ;;\nesac\n";
    let dir = install("exit 0\n", server);
    let mut cfg = config(dir.path());
    cfg.url_timeout = None;
    fs::write(&cfg.paths.port_file, "8080").unwrap();

    let (record, events) = run_cycle(cfg).await;

    assert_eq!(
        record.start_script,
        Some(ScriptOutcome {
            success: false,
            exit_code: Some(7),
            timed_out: false,
        })
    );
    assert!(matches!(record.outcome, LaunchOutcome::Failed { .. }));
    assert!(events.iter().any(|e| matches!(
        e,
        LaunchEvent::ScriptFinished {
            kind: ScriptKind::Start,
            ..
        }
    )));
}

#[tokio::test]
async fn empty_url_file_fails() {
    let dir = install("exit 0\n", NOOP_SERVER);
    let cfg = config(dir.path());
    fs::write(&cfg.paths.port_file, "8080").unwrap();
    fs::write(&cfg.paths.url_file, "\n").unwrap();

    let (record, _) = run_cycle(cfg).await;

    assert_eq!(
        record.outcome,
        LaunchOutcome::Failed {
            reason: LaunchError::InvalidUrl.to_string()
        }
    );
}

#[tokio::test]
async fn missing_bin_dir_fails_selector_spawn() {
    let dir = TempDir::new().unwrap();
    let (record, events) = run_cycle(config(dir.path())).await;

    match record.outcome {
        LaunchOutcome::Failed { reason } => assert!(reason.contains("workspace selector"), "{reason}"),
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(!phases(&events).contains(&LaunchPhase::SelectorLaunched));
}

#[tokio::test]
async fn missing_selector_script_fails_fast() {
    let dir = TempDir::new().unwrap();
    fs::create_dir(dir.path().join("bin")).unwrap();
    fs::write(dir.path().join("bin").join("che.sh"), NOOP_SERVER).unwrap();
    let mut cfg = config(dir.path());
    cfg.port_timeout = None;

    let (record, events) = tokio::time::timeout(Duration::from_secs(5), run_cycle(cfg))
        .await
        .expect("missing selector must not wait for PORT");

    match record.outcome {
        LaunchOutcome::Failed { reason } => {
            assert!(reason.contains("workspace selector"), "{reason}");
            assert!(reason.contains("workspace.sh"), "{reason}");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(phases(&events), [LaunchPhase::Idle, LaunchPhase::Failed]);
    assert!(!record.server_started);
}

#[tokio::test]
async fn cancel_stops_an_unbounded_wait() {
    let dir = install("exit 0\n", NOOP_SERVER);
    let mut cfg = config(dir.path());
    cfg.port_timeout = None;
    cfg.poll_interval = Duration::from_secs(30);

    let (evt_tx, _evt_rx) = mpsc::unbounded_channel();
    let (ctrl_tx, ctrl_rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(LaunchEngine::new(cfg).run("test".into(), evt_tx, ctrl_rx));

    tokio::time::sleep(Duration::from_millis(100)).await;
    ctrl_tx.send(EngineControl::Cancel).unwrap();

    let record = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("engine should stop promptly")
        .unwrap();
    assert_eq!(record.outcome, LaunchOutcome::Cancelled);
}

#[tokio::test]
async fn skipped_selector_still_waits_for_port() {
    let dir = TempDir::new().unwrap();
    fs::create_dir(dir.path().join("bin")).unwrap();
    fs::write(dir.path().join("bin").join("che.sh"), NOOP_SERVER).unwrap();
    let mut cfg = config(dir.path());
    cfg.skip_selector = true;
    fs::write(&cfg.paths.port_file, "8123").unwrap();
    fs::write(&cfg.paths.url_file, "http://localhost:8123/").unwrap();

    let (record, events) = run_cycle(cfg).await;

    assert_eq!(record.outcome, LaunchOutcome::Ready);
    assert!(events
        .iter()
        .any(|e| matches!(e, LaunchEvent::Info(InfoEvent::SelectorSkipped))));
}

#[tokio::test]
async fn stop_runs_stop_action() {
    let dir = install("exit 0\n", NOOP_SERVER);
    let cfg = config(dir.path());

    let outcome = stop_server_background(&cfg).wait().await;

    assert!(outcome.success);
    assert!(cfg.paths.bin_dir.join("stopped").exists());
}
