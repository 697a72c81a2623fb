use super::{CancelToken, LaunchError};
use crate::model::{InfoEvent, LaunchEvent, Sentinel};
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Parameters for one sentinel polling loop.
pub(crate) struct SentinelWait<'a> {
    pub sentinel: Sentinel,
    pub path: &'a Path,
    pub poll_interval: Duration,
    /// Start of the overall wait; reported in ticks and timeouts.
    pub started: Instant,
    pub deadline: Option<Instant>,
    pub cancel: &'a CancelToken,
    pub event_tx: &'a mpsc::UnboundedSender<LaunchEvent>,
}

/// Poll until the sentinel exists, then consume it and return its contents.
pub(crate) async fn await_sentinel(params: SentinelWait<'_>) -> Result<String, LaunchError> {
    let SentinelWait {
        sentinel,
        path,
        poll_interval,
        started,
        deadline,
        cancel,
        event_tx,
    } = params;

    tracing::debug!(path = %path.display(), "waiting for sentinel");

    loop {
        if cancel.is_cancelled() {
            return Err(LaunchError::Cancelled);
        }

        if let Some(contents) = try_consume(path, event_tx).await? {
            return Ok(contents);
        }

        let _ = event_tx.send(LaunchEvent::Waiting {
            sentinel,
            elapsed_ms: started.elapsed().as_millis() as u64,
        });

        let now = Instant::now();
        let nap = match deadline {
            Some(d) if now >= d => {
                return Err(LaunchError::TimedOut {
                    sentinel,
                    waited: Duration::from_millis(started.elapsed().as_millis() as u64),
                });
            }
            Some(d) => poll_interval.min(d - now),
            None => poll_interval,
        };

        tokio::select! {
            _ = tokio::time::sleep(nap) => {}
            _ = cancel.cancelled() => return Err(LaunchError::Cancelled),
        }
    }
}

/// Read and delete the sentinel if present. `Ok(None)` means not written yet.
pub(crate) async fn try_consume(
    path: &Path,
    event_tx: &mpsc::UnboundedSender<LaunchEvent>,
) -> Result<Option<String>, LaunchError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(LaunchError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    // Consumed at most once: remove before handing the contents out.
    if let Err(e) = tokio::fs::remove_file(path).await {
        tracing::warn!(path = %path.display(), error = %e, "could not remove sentinel file");
        let _ = event_tx.send(LaunchEvent::Info(InfoEvent::SentinelCleanupFailed {
            path: path.to_path_buf(),
            error: e.to_string(),
        }));
    }

    Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
}

/// Parse the port sentinel. Anything that is not a base-10 port yields `0`.
pub(crate) fn parse_port(contents: &str) -> u16 {
    contents.trim().parse::<u16>().unwrap_or(0)
}
