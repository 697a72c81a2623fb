pub(crate) mod paths;
mod readiness;
pub(crate) mod script;
mod sentinel;
#[cfg(test)]
mod tests;

use crate::model::{
    InfoEvent, LaunchConfig, LaunchEvent, LaunchOutcome, LaunchPhase, LaunchRecord,
    MalformedPortPolicy, ScriptKind, ScriptOutcome, Sentinel, ServerEndpoint,
};
use script::ScriptTask;
use sentinel::SentinelWait;
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;

pub(crate) use sentinel::parse_port;

#[derive(Debug, Clone)]
pub enum EngineControl {
    /// Abandon the launch cycle at the next wait point.
    Cancel,
}

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("cannot resolve install directory {}: {source}", path.display())]
    BasePath {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to spawn {} script `{command}`: {source}", kind.label())]
    Spawn {
        kind: ScriptKind,
        command: String,
        source: std::io::Error,
    },

    #[error("{} script {}", kind.label(), outcome.describe())]
    ScriptFailed {
        kind: ScriptKind,
        outcome: ScriptOutcome,
    },

    #[error("port file does not hold a valid port: {raw:?}")]
    InvalidPort { raw: String },

    #[error("url file was empty")]
    InvalidUrl,

    #[error(
        "timed out after {} waiting for {} (server not ready)",
        humantime::format_duration(*waited),
        sentinel.file_name()
    )]
    TimedOut { sentinel: Sentinel, waited: Duration },

    #[error("launch cancelled")]
    Cancelled,

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// One-shot cancellation flag that async waits can race against.
#[derive(Debug, Default)]
pub struct CancelToken {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once `cancel` has been called.
    pub async fn cancelled(&self) {
        loop {
            // Register before checking the flag so a concurrent cancel is not missed.
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

pub struct LaunchEngine {
    cfg: LaunchConfig,
}

impl LaunchEngine {
    pub fn new(cfg: LaunchConfig) -> Self {
        Self { cfg }
    }

    /// Run one launch cycle to completion. Failures end up in the record's outcome.
    pub async fn run(
        self,
        launch_id: String,
        event_tx: mpsc::UnboundedSender<LaunchEvent>,
        mut control_rx: mpsc::UnboundedReceiver<EngineControl>,
    ) -> LaunchRecord {
        let cancel = Arc::new(CancelToken::default());

        let cancel2 = cancel.clone();
        let control_handle = tokio::spawn(async move {
            while let Some(msg) = control_rx.recv().await {
                match msg {
                    EngineControl::Cancel => {
                        cancel2.cancel();
                        break;
                    }
                }
            }
        });

        let mut record = LaunchRecord {
            timestamp_utc: time::OffsetDateTime::now_utc()
                .format(&time::format_description::well_known::Rfc3339)
                .unwrap_or_else(|_| "now".into()),
            launch_id,
            base_dir: self.cfg.paths.base_dir.clone(),
            outcome: LaunchOutcome::Cancelled,
            endpoint: None,
            port: None,
            port_wait_ms: None,
            url_wait_ms: None,
            start_script: None,
            url_reachable: None,
            server_started: false,
        };

        let result = self.launch(&event_tx, &cancel, &mut record).await;

        // Dropping a JoinHandle does not stop the task; abort it explicitly.
        control_handle.abort();

        match result {
            Ok(endpoint) => {
                tracing::info!(port = endpoint.port, url = %endpoint.url, "workspace server ready");
                record.endpoint = Some(endpoint);
                record.outcome = LaunchOutcome::Ready;
            }
            Err(LaunchError::Cancelled) => {
                tracing::info!("launch cycle cancelled");
                record.outcome = LaunchOutcome::Cancelled;
                let _ = event_tx.send(LaunchEvent::PhaseChanged {
                    phase: LaunchPhase::Cancelled,
                });
            }
            Err(e) => {
                tracing::error!(error = %e, "launch cycle failed");
                let _ = event_tx.send(LaunchEvent::Info(InfoEvent::Message(format!(
                    "Launch failed: {e}"
                ))));
                record.outcome = LaunchOutcome::Failed {
                    reason: e.to_string(),
                };
                let _ = event_tx.send(LaunchEvent::PhaseChanged {
                    phase: LaunchPhase::Failed,
                });
            }
        }

        record
    }

    async fn launch(
        &self,
        event_tx: &mpsc::UnboundedSender<LaunchEvent>,
        cancel: &CancelToken,
        record: &mut LaunchRecord,
    ) -> Result<ServerEndpoint, LaunchError> {
        let paths = &self.cfg.paths;
        let inherit = self.cfg.inherit_script_output;

        let _ = event_tx.send(LaunchEvent::PhaseChanged {
            phase: LaunchPhase::Idle,
        });
        let _ = event_tx.send(LaunchEvent::Info(InfoEvent::BasePath {
            path: paths.base_dir.clone(),
        }));

        if self.cfg.skip_selector {
            let _ = event_tx.send(LaunchEvent::Info(InfoEvent::SelectorSkipped));
        } else {
            script::launch_workspace_selector(&paths.selector, &paths.bin_dir, inherit)?;
        }
        let _ = event_tx.send(LaunchEvent::PhaseChanged {
            phase: LaunchPhase::SelectorLaunched,
        });

        let port_started = Instant::now();
        let port = self.await_port(event_tx, cancel, port_started).await?;
        record.port = Some(port);
        record.port_wait_ms = Some(port_started.elapsed().as_millis() as u64);
        tracing::info!(port, "port sentinel consumed");
        let _ = event_tx.send(LaunchEvent::PortDiscovered { port });
        let _ = event_tx.send(LaunchEvent::PhaseChanged {
            phase: LaunchPhase::PortDiscovered,
        });

        let mut start_task = script::run_in_background(
            ScriptKind::Start,
            &paths.start,
            &paths.bin_dir,
            inherit,
            None,
        );
        record.server_started = true;
        let _ = event_tx.send(LaunchEvent::PhaseChanged {
            phase: LaunchPhase::ServerStarting,
        });

        let url_started = Instant::now();
        let url = self
            .await_url(event_tx, cancel, url_started, &mut start_task, record)
            .await?;
        record.url_wait_ms = Some(url_started.elapsed().as_millis() as u64);
        tracing::info!(url = %url, "url sentinel consumed");
        let _ = event_tx.send(LaunchEvent::UrlDiscovered { url: url.clone() });
        let _ = event_tx.send(LaunchEvent::PhaseChanged {
            phase: LaunchPhase::UrlDiscovered,
        });

        if self.cfg.verify_url {
            let reachable = readiness::verify_url(&url, &self.cfg, cancel, event_tx).await?;
            record.url_reachable = Some(reachable);
        }

        let _ = event_tx.send(LaunchEvent::PhaseChanged {
            phase: LaunchPhase::Ready,
        });
        Ok(ServerEndpoint { port, url })
    }

    async fn await_port(
        &self,
        event_tx: &mpsc::UnboundedSender<LaunchEvent>,
        cancel: &CancelToken,
        started: Instant,
    ) -> Result<u16, LaunchError> {
        let deadline = self.cfg.port_timeout.map(|t| started + t);
        loop {
            let raw = sentinel::await_sentinel(SentinelWait {
                sentinel: Sentinel::Port,
                path: &self.cfg.paths.port_file,
                poll_interval: self.cfg.poll_interval,
                started,
                deadline,
                cancel,
                event_tx,
            })
            .await?;

            let port = parse_port(&raw);
            if port != 0 {
                return Ok(port);
            }
            match self.cfg.malformed_port {
                MalformedPortPolicy::Abort => {
                    return Err(LaunchError::InvalidPort {
                        raw: raw.trim().to_string(),
                    })
                }
                MalformedPortPolicy::Retry => {
                    tracing::warn!(raw = %raw.trim(), "discarding malformed port file");
                    let _ = event_tx.send(LaunchEvent::Info(InfoEvent::MalformedPortDiscarded {
                        raw: raw.trim().to_string(),
                    }));
                }
            }
        }
    }

    /// Wait for the url sentinel while watching the start script; a failing
    /// start script ends the wait early.
    async fn await_url(
        &self,
        event_tx: &mpsc::UnboundedSender<LaunchEvent>,
        cancel: &CancelToken,
        started: Instant,
        start_task: &mut ScriptTask,
        record: &mut LaunchRecord,
    ) -> Result<String, LaunchError> {
        let wait = sentinel::await_sentinel(SentinelWait {
            sentinel: Sentinel::Url,
            path: &self.cfg.paths.url_file,
            poll_interval: self.cfg.poll_interval,
            started,
            deadline: self.cfg.url_timeout.map(|t| started + t),
            cancel,
            event_tx,
        });
        tokio::pin!(wait);

        let mut script_done = false;
        let raw = loop {
            tokio::select! {
                contents = &mut wait => break contents?,
                outcome = start_task.wait(), if !script_done => {
                    script_done = true;
                    record.start_script = Some(outcome);
                    let _ = event_tx.send(LaunchEvent::ScriptFinished {
                        kind: ScriptKind::Start,
                        outcome,
                    });
                    if !outcome.success {
                        return Err(LaunchError::ScriptFailed {
                            kind: ScriptKind::Start,
                            outcome,
                        });
                    }
                }
            }
        };

        let url = raw.trim();
        if url.is_empty() {
            return Err(LaunchError::InvalidUrl);
        }
        Ok(url.to_string())
    }
}

/// Run the stop script in the background, bounded by the configured stop timeout.
pub fn stop_server_background(cfg: &LaunchConfig) -> ScriptTask {
    tracing::info!(command = %cfg.paths.stop.display(), "stopping workspace server");
    script::run_in_background(
        ScriptKind::Stop,
        &cfg.paths.stop,
        &cfg.paths.bin_dir,
        cfg.inherit_script_output,
        Some(cfg.stop_timeout),
    )
}
