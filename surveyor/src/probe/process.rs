//! Background tool processes with guaranteed teardown

use super::{ProbeError, ToolCommand};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Child;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// A long-running child whose stdout is drained in the background.
///
/// The child is killed when this value is dropped, so an early return or a panic in the caller
/// never leaves it running. [`ScopedProcess::terminate`] is the orderly way out.
pub struct ScopedProcess {
    name: String,
    child: Child,
    reader: Option<JoinHandle<String>>,
}

impl ScopedProcess {
    pub fn spawn(tool: &ToolCommand, args: &[String]) -> Result<Self, ProbeError> {
        let mut cmd = tool.command(args);
        cmd.stdout(Stdio::piped()).stderr(Stdio::null());

        let mut child = cmd.spawn().map_err(|e| ProbeError::from_spawn(tool, e))?;
        let mut stdout = child.stdout.take().ok_or_else(|| ProbeError::Spawn {
            tool: tool.name().to_string(),
            source: std::io::Error::other("stdout was not captured"),
        })?;

        let reader = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Err(e) = stdout.read_to_end(&mut buf).await {
                debug!("Background output read ended early: {}", e);
            }
            String::from_utf8_lossy(&buf).into_owned()
        });

        debug!("Started background {} (pid {:?})", tool.name(), child.id());

        Ok(Self {
            name: tool.name().to_string(),
            child,
            reader: Some(reader),
        })
    }

    /// Ask the process to exit, force-kill it after `grace`, and return everything it printed
    pub async fn terminate(mut self, grace: Duration) -> String {
        self.send_terminate();

        if tokio::time::timeout(grace, self.child.wait()).await.is_err() {
            warn!("{} did not exit within {:?}, killing it", self.name, grace);
            if let Err(e) = self.child.kill().await {
                warn!("Failed to kill {}: {}", self.name, e);
            }
        }

        let Some(reader) = self.reader.take() else {
            return String::new();
        };
        match tokio::time::timeout(grace, reader).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                warn!("Output reader for {} failed: {}", self.name, e);
                String::new()
            }
            Err(_) => {
                warn!("Output of {} still open after exit, discarding", self.name);
                String::new()
            }
        }
    }

    #[cfg(unix)]
    fn send_terminate(&mut self) {
        match self.child.id() {
            // SAFETY: plain kill(2) on a pid we spawned and have not reaped yet
            Some(pid) => unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            },
            None => debug!("{} already exited", self.name),
        }
    }

    #[cfg(not(unix))]
    fn send_terminate(&mut self) {
        if let Err(e) = self.child.start_kill() {
            debug!("{} already exited: {}", self.name, e);
        }
    }
}

impl Drop for ScopedProcess {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}
