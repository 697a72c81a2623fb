//! Launch lifecycle controller.
//!
//! Owns start/restart/stop orchestration and emits events for presentation layers.

use crate::cli::gen_launch_id;
use crate::engine::script::ScriptTask;
use crate::engine::{self, EngineControl, LaunchEngine};
use crate::model::{InfoEvent, LaunchConfig, LaunchEvent, LaunchRecord, ScriptKind};
use anyhow::Result;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::time::Duration;

/// Commands emitted by UI layers to control the launcher.
#[derive(Debug, Clone)]
pub(crate) enum UiCommand {
    Restart,
    StopServer,
    Quit,
}

/// Internal handle for a running launch cycle.
struct CycleCtx {
    ctrl_tx: UnboundedSender<EngineControl>,
    handle: Option<tokio::task::JoinHandle<LaunchRecord>>,
}

/// Spawn a new launch cycle and return its control handle.
fn start_cycle(cfg: &LaunchConfig, event_tx: UnboundedSender<LaunchEvent>) -> CycleCtx {
    let (ctrl_tx, ctrl_rx) = tokio::sync::mpsc::unbounded_channel::<EngineControl>();
    let engine = LaunchEngine::new(cfg.clone());
    let launch_id = gen_launch_id();
    tracing::info!(launch_id = %launch_id, "starting launch cycle");
    let handle = tokio::spawn(async move { engine.run(launch_id, event_tx, ctrl_rx).await });
    CycleCtx {
        ctrl_tx,
        handle: Some(handle),
    }
}

fn info(event_tx: &UnboundedSender<LaunchEvent>, msg: impl Into<String>) {
    let _ = event_tx.send(LaunchEvent::Info(InfoEvent::Message(msg.into())));
}

/// Orchestrate launch cycles based on UI commands and emit events back to presentation layers.
pub(crate) async fn run_controller(
    cfg: &LaunchConfig,
    stop_on_exit: bool,
    event_tx: UnboundedSender<LaunchEvent>,
    mut cmd_rx: UnboundedReceiver<UiCommand>,
) -> Result<()> {
    let mut cycle_ctx = Some(start_cycle(cfg, event_tx.clone()));
    let mut stop_task: Option<ScriptTask> = None;
    // Set once any cycle got as far as invoking the start script.
    let mut server_started = false;
    let mut restart_pending = false;
    let mut quit_pending = false;
    // A closed command channel counts as quit; stop polling it afterwards.
    let mut cmd_closed = false;
    // Cancel watchdog: if a cancel takes too long, emit a status message to keep UI feedback alive.
    let mut cancel_deadline: Option<tokio::time::Instant> = None;
    let mut watchdog = tokio::time::interval(Duration::from_millis(500));

    let res = loop {
        tokio::select! {
            cmd = cmd_rx.recv(), if !cmd_closed => {
                match cmd {
                    Some(UiCommand::Restart) => {
                        // Serialized: cancel the active cycle, start the next once it reports back.
                        restart_pending = true;
                        if let Some(ctx) = &cycle_ctx {
                            let _ = ctx.ctrl_tx.send(EngineControl::Cancel);
                            info(&event_tx, "Cancelling…");
                            cancel_deadline = Some(tokio::time::Instant::now() + Duration::from_secs(3));
                        } else {
                            cycle_ctx = Some(start_cycle(cfg, event_tx.clone()));
                            restart_pending = false;
                            info(&event_tx, "Restarting…");
                        }
                    }
                    Some(UiCommand::StopServer) => {
                        if cycle_ctx.is_some() {
                            info(&event_tx, "Launch in progress; restart or quit to cancel it first");
                        } else if stop_task.is_some() {
                            info(&event_tx, "Stop already in progress");
                        } else {
                            info(&event_tx, format!("Running {}", cfg.paths.stop.display()));
                            stop_task = Some(engine::stop_server_background(cfg));
                            server_started = false;
                        }
                    }
                    Some(UiCommand::Quit) | None => {
                        cmd_closed |= cmd.is_none();
                        // Quit waits for the active cycle to wind down, then optionally stops the server.
                        quit_pending = true;
                        if let Some(ctx) = &cycle_ctx {
                            let _ = ctx.ctrl_tx.send(EngineControl::Cancel);
                            cancel_deadline = Some(tokio::time::Instant::now() + Duration::from_secs(3));
                        } else if stop_on_exit && server_started && stop_task.is_none() {
                            stop_task = Some(engine::stop_server_background(cfg));
                            server_started = false;
                        } else if stop_task.is_none() {
                            break Ok(());
                        }
                    }
                }
            }
            // Do not take the JoinHandle before this branch wins; otherwise it can be dropped
            // if another select branch is chosen, and we'll never observe completion.
            maybe_done = async {
                if let Some(ctx) = &mut cycle_ctx {
                    if let Some(h) = ctx.handle.as_mut() {
                        return Some(h.await);
                    }
                }
                futures::future::pending().await
            } => {
                if let Some(join_res) = maybe_done {
                    if let Some(ctx) = &mut cycle_ctx {
                        ctx.handle.take();
                    }
                    match join_res {
                        Ok(record) => {
                            server_started |= record.server_started;
                            let _ = event_tx.send(LaunchEvent::CycleCompleted { record: Box::new(record) });
                        }
                        Err(e) => {
                            info(&event_tx, format!("Launch task failed: {e}"));
                        }
                    }
                    cycle_ctx = None;
                    cancel_deadline = None;
                    if quit_pending {
                        if stop_on_exit && server_started && stop_task.is_none() {
                            info(&event_tx, "Stopping server before exit…");
                            stop_task = Some(engine::stop_server_background(cfg));
                            server_started = false;
                        } else if stop_task.is_none() {
                            break Ok(());
                        }
                    } else if restart_pending {
                        cycle_ctx = Some(start_cycle(cfg, event_tx.clone()));
                        restart_pending = false;
                    }
                }
            }
            outcome = async {
                match stop_task.as_mut() {
                    Some(t) => t.wait().await,
                    None => futures::future::pending().await,
                }
            } => {
                stop_task = None;
                let _ = event_tx.send(LaunchEvent::ScriptFinished { kind: ScriptKind::Stop, outcome });
                info(&event_tx, format!("Server stop {}", outcome.describe()));
                if quit_pending && cycle_ctx.is_none() {
                    break Ok(());
                }
            }
            // If cancel stalls (e.g., a script still in flight), keep the user informed.
            _ = watchdog.tick() => {
                if let Some(deadline) = cancel_deadline {
                    if tokio::time::Instant::now() >= deadline && cycle_ctx.is_some() {
                        info(&event_tx, "Still cancelling…");
                        cancel_deadline = None;
                    }
                }
            }
        }
    };

    res
}
