use super::{CancelToken, LaunchError};
use crate::model::{InfoEvent, LaunchConfig, LaunchEvent};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Probe the discovered URL until it answers with a non-5xx status or the
/// verify timeout passes. Only cancellation is an error; an unreachable URL
/// is reported as `Ok(false)`.
pub(crate) async fn verify_url(
    url: &str,
    cfg: &LaunchConfig,
    cancel: &CancelToken,
    event_tx: &mpsc::UnboundedSender<LaunchEvent>,
) -> Result<bool, LaunchError> {
    let client = match reqwest::Client::builder()
        .user_agent(cfg.user_agent.clone())
        .timeout(Duration::from_millis(cfg.probe_timeout_ms))
        .build()
    {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(error = %e, "cannot build HTTP client for readiness probe");
            let _ = event_tx.send(LaunchEvent::Info(InfoEvent::ProbeResult {
                reachable: false,
                status: None,
            }));
            return Ok(false);
        }
    };

    let deadline = Instant::now() + cfg.verify_timeout;
    let mut last_status = None;

    loop {
        if cancel.is_cancelled() {
            return Err(LaunchError::Cancelled);
        }

        match client.get(url).send().await {
            Ok(resp) if !resp.status().is_server_error() => {
                let status = resp.status().as_u16();
                tracing::info!(url, status, "workspace URL answered");
                let _ = event_tx.send(LaunchEvent::Info(InfoEvent::ProbeResult {
                    reachable: true,
                    status: Some(status),
                }));
                return Ok(true);
            }
            Ok(resp) => {
                tracing::debug!(url, status = resp.status().as_u16(), "workspace URL not ready");
                last_status = Some(resp.status().as_u16());
            }
            Err(e) => {
                tracing::debug!(url, error = %e, "workspace URL probe failed");
            }
        }

        let now = Instant::now();
        if now >= deadline {
            tracing::warn!(url, "workspace URL did not answer before the verify timeout");
            let _ = event_tx.send(LaunchEvent::Info(InfoEvent::ProbeResult {
                reachable: false,
                status: last_status,
            }));
            return Ok(false);
        }

        tokio::select! {
            _ = tokio::time::sleep(cfg.poll_interval.min(deadline - now)) => {}
            _ = cancel.cancelled() => return Err(LaunchError::Cancelled),
        }
    }
}
