//! Hand a ready workspace URL to the platform's default browser.

use anyhow::{bail, Context, Result};
use std::process::{Command, ExitStatus, Stdio};
use std::thread::JoinHandle;

fn check_url(url: &str) -> Result<&str> {
    let url = url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        bail!("refusing to open non-http URL {url:?}");
    }
    Ok(url)
}

pub fn open_url(url: &str) -> Result<()> {
    let url = check_url(url)?;
    tracing::info!(url, "opening workspace in browser");

    #[cfg(target_os = "linux")]
    let command = {
        let mut c = Command::new("xdg-open");
        c.arg(url);
        c
    };

    #[cfg(target_os = "macos")]
    let command = {
        let mut c = Command::new("open");
        c.arg(url);
        c
    };

    #[cfg(target_os = "windows")]
    let command = {
        let mut c = Command::new("cmd");
        c.args(["/C", "start", "", url]);
        c
    };

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        bail!("opening a browser is unsupported on this platform");
    }

    #[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
    {
        spawn_reaped(command)
            .map(|_| ())
            .with_context(|| format!("failed to launch browser for {url}"))
    }
}

/// Spawn the opener with null stdio and reap it on a background thread so it
/// does not linger as a zombie.
fn spawn_reaped(mut command: Command) -> std::io::Result<JoinHandle<Option<ExitStatus>>> {
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;
    Ok(std::thread::spawn(move || match child.wait() {
        Ok(status) => {
            if !status.success() {
                tracing::warn!(code = ?status.code(), "browser opener exited with an error");
            }
            Some(status)
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to reap browser opener");
            None
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_http_urls_are_opened() {
        assert_eq!(check_url(" http://localhost:8080/ ").unwrap(), "http://localhost:8080/");
        assert!(check_url("https://example.test").is_ok());
        assert!(check_url("file:///etc/passwd").is_err());
        assert!(check_url("").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn opener_is_reaped() {
        let mut command = Command::new("sh");
        command.args(["-c", "exit 0"]);

        let status = spawn_reaped(command).unwrap().join().unwrap();
        assert!(status.is_some_and(|s| s.success()));
    }
}
