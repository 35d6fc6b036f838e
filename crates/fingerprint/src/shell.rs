//! Interactive shell sessions
//!
//! SSH and telnet honeypots emulate a login shell. Both are driven through
//! the same two traits so the step runner and the session isolation probe
//! don't care which transport sits underneath.

use async_trait::async_trait;
use std::net::IpAddr;
use std::time::Duration;
use tracing::debug;

use honeysift_common::{ProbeResult, SignatureStep, StepOutcome, StepRun};

use crate::matcher::matches_step;

/// A live shell on the target.
#[async_trait]
pub trait ShellSession: Send {
    /// Write raw bytes to the shell.
    async fn send(&mut self, data: &[u8]) -> ProbeResult<()>;

    /// Collect everything the shell prints until `settle` has elapsed.
    ///
    /// Returns the bytes read so far if the peer closes mid-window and an
    /// error if it closes before printing anything.
    async fn read_settled(&mut self, settle: Duration) -> ProbeResult<Vec<u8>>;

    /// Best-effort orderly shutdown.
    async fn close(self: Box<Self>);
}

/// Opens authenticated shells against a host.
#[async_trait]
pub trait ShellConnector: Send + Sync {
    async fn connect(&self, host: IpAddr, port: u16) -> ProbeResult<Box<dyn ShellSession>>;
}

/// Send each step to the shell and compare what it prints back.
///
/// With `append_newline` the input is submitted as a command line; without it
/// the bytes go out untouched. A transport error ends the run and keeps the
/// outcomes gathered before it.
pub async fn run_shell_steps(
    session: &mut dyn ShellSession,
    steps: &[SignatureStep],
    settle: Duration,
    append_newline: bool,
) -> StepRun {
    let mut outcomes = Vec::with_capacity(steps.len());

    for (index, step) in steps.iter().enumerate() {
        let mut input = step.input.as_bytes().to_vec();
        if append_newline {
            input.push(b'\n');
        }

        if let Err(e) = session.send(&input).await {
            return StepRun::aborted(outcomes, e);
        }

        let response = match session.read_settled(settle).await {
            Ok(response) => response,
            Err(e) => return StepRun::aborted(outcomes, e),
        };

        let matched = matches_step(step, &response);
        debug!("Shell step {}: {} bytes, matched={}", index, response.len(), matched);
        outcomes.push(StepOutcome::new(index, matched, response));
    }

    StepRun::completed(outcomes)
}

#[cfg(test)]
pub(crate) mod fake {
    //! In-memory shell used by tests.

    use super::*;
    use honeysift_common::ProbeError;
    use std::collections::BTreeSet;
    use std::sync::{Arc, Mutex};

    /// Understands `touch`, `rm -f`, `ls` and `echo`; anything else is echoed.
    pub struct FakeShell {
        files: Arc<Mutex<BTreeSet<String>>>,
        pending: Vec<u8>,
        fail_after: Option<usize>,
        sent: usize,
    }

    impl FakeShell {
        pub fn new(files: Arc<Mutex<BTreeSet<String>>>) -> Self {
            Self {
                files,
                pending: b"root@svr04:~# ".to_vec(),
                fail_after: None,
                sent: 0,
            }
        }

        pub fn failing_after(mut self, sends: usize) -> Self {
            self.fail_after = Some(sends);
            self
        }
    }

    #[async_trait]
    impl ShellSession for FakeShell {
        async fn send(&mut self, data: &[u8]) -> ProbeResult<()> {
            if self.fail_after == Some(self.sent) {
                return Err(ProbeError::ConnectionReset("fake shell hung up".into()));
            }
            self.sent += 1;

            let line = String::from_utf8_lossy(data).trim().to_string();
            let mut files = self.files.lock().unwrap();
            let output = if let Some(name) = line.strip_prefix("touch ") {
                files.insert(name.to_string());
                String::new()
            } else if let Some(name) = line.strip_prefix("rm -f ") {
                files.remove(name);
                String::new()
            } else if line == "ls" {
                files.iter().cloned().collect::<Vec<_>>().join("  ") + "\r\n"
            } else if let Some(text) = line.strip_prefix("echo ") {
                format!("{text}\r\n")
            } else {
                format!("{line}\r\n")
            };
            self.pending.extend_from_slice(output.as_bytes());
            self.pending.extend_from_slice(b"root@svr04:~# ");
            Ok(())
        }

        async fn read_settled(&mut self, _settle: Duration) -> ProbeResult<Vec<u8>> {
            Ok(std::mem::take(&mut self.pending))
        }

        async fn close(self: Box<Self>) {}
    }

    /// Hands out fake shells that either share one filesystem or get a fresh one each.
    pub struct FakeConnector {
        shared: Option<Arc<Mutex<BTreeSet<String>>>>,
    }

    impl FakeConnector {
        pub fn shared() -> Self {
            Self {
                shared: Some(Arc::new(Mutex::new(BTreeSet::new()))),
            }
        }

        pub fn isolated() -> Self {
            Self { shared: None }
        }
    }

    #[async_trait]
    impl ShellConnector for FakeConnector {
        async fn connect(&self, _host: IpAddr, _port: u16) -> ProbeResult<Box<dyn ShellSession>> {
            let files = match &self.shared {
                Some(files) => Arc::clone(files),
                None => Arc::new(Mutex::new(BTreeSet::new())),
            };
            Ok(Box::new(FakeShell::new(files)))
        }
    }
}
