// SPDX-FileCopyrightText: 2026 goforge contributors
// SPDX-License-Identifier: MIT

use std::process::Output;

use log::debug;
use tokio::process::Command;
use tokio::sync::Semaphore;

use crate::FetchError;

/// At most this many auxiliary subprocesses run at once, independent of
/// build parallelism.
const MAX_AUX_COMMANDS: usize = 3;

/// Concurrency budget for auxiliary subprocesses: module resolution,
/// package listing, SDK bookkeeping. Build subprocesses themselves are
/// scheduled by the coordinator and never take a permit here.
pub struct AuxCommands {
    permits: Semaphore,
}

impl Default for AuxCommands {
    fn default() -> Self {
        AuxCommands {
            permits: Semaphore::new(MAX_AUX_COMMANDS),
        }
    }
}

impl AuxCommands {
    /// Take a permit without running a subprocess, for downloads that
    /// should count against the same budget.
    pub async fn throttle(&self) -> tokio::sync::SemaphorePermit<'_> {
        self.permits
            .acquire()
            .await
            .expect("aux command semaphore is never closed")
    }

    /// Run `cmd` under the shared permit, capturing output. Non-zero exit
    /// status is returned as `Ok`; spawn failures are errors.
    pub async fn run(&self, mut cmd: Command, what: &str) -> Result<Output, FetchError> {
        let _permit = self.throttle().await;
        debug!("running {what}: {:?}", cmd.as_std());
        cmd.kill_on_drop(true);
        cmd.output()
            .await
            .map_err(|e| FetchError::io(format!("running {what}"), e))
    }
}

/// Render a failed command output into a [`FetchError::Command`].
pub(crate) fn command_failed(what: &str, output: &Output) -> FetchError {
    FetchError::Command {
        cmd: what.to_string(),
        status: output.status.to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// With three permits, ten sleeping commands never run more than three
    /// at a time.
    #[tokio::test]
    async fn test_aux_limit() {
        let aux = Arc::new(AuxCommands::default());
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let aux = aux.clone();
            let running = running.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                let _permit = aux.permits.acquire().await.unwrap();
                let cur = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(cur, Ordering::SeqCst);
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= MAX_AUX_COMMANDS);
    }

    #[tokio::test]
    async fn test_run_captures_output() {
        let aux = AuxCommands::default();
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo out; echo err >&2; exit 3");
        let output = aux.run(cmd, "sh test").await.unwrap();
        assert_eq!(output.status.code(), Some(3));
        assert_eq!(output.stdout, b"out\n");
        let err = command_failed("sh test", &output);
        assert!(err.to_string().contains("err"));
    }
}
