mod subprocess;

pub use subprocess::SubprocessRunner;

use crate::error::Result;
use crate::model::{CommandInvocation, OutputLine};
use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

pub type OutputSink = mpsc::UnboundedSender<OutputLine>;

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitReport {
    /// `None` when the process was killed by a signal.
    pub code: Option<i32>,
    /// Set when the run was stopped by a shutdown request.
    pub terminated: bool,
}

impl ExitReport {
    pub fn exited(code: Option<i32>) -> Self {
        Self {
            code,
            terminated: false,
        }
    }

    pub fn terminated(code: Option<i32>) -> Self {
        Self {
            code,
            terminated: true,
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Exit code for the host process to forward.
    pub fn host_code(&self) -> i32 {
        match self.code {
            Some(c) => c,
            None if self.terminated => 130,
            None => 1,
        }
    }
}

/// Per-run plumbing handed to a runner.
pub struct RunContext {
    pub sink: OutputSink,
    pub shutdown: watch::Receiver<bool>,
}

impl RunContext {
    /// Resolves once shutdown has been requested. Never resolves if the
    /// requesting side went away without asking.
    pub async fn shutdown_requested(&mut self) {
        loop {
            if *self.shutdown.borrow_and_update() {
                return;
            }
            if self.shutdown.changed().await.is_err() {
                futures::future::pending::<()>().await;
            }
        }
    }
}

/// Anything that can execute an engine invocation: run the given args/env,
/// stream output to the sink and report how it exited.
#[async_trait]
pub trait EngineRunner: Send + Sync {
    async fn run(&self, invocation: &CommandInvocation, ctx: RunContext) -> Result<ExitReport>;
}
