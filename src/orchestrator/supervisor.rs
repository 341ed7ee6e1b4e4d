//! Child process launching and shutdown fan-out.

use crate::engine::{EngineRunner, ExitReport, OutputSink, RunContext};
use crate::error::{Error, Result};
use crate::model::CommandInvocation;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Handle to one launched invocation.
pub struct ProcessHandle {
    label: String,
    task: JoinHandle<Result<ExitReport>>,
}

impl ProcessHandle {
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Wait for the run to finish. Cancel-safe: can be polled again from a
    /// later `select!` if another branch wins.
    pub async fn wait(&mut self) -> Result<ExitReport> {
        match (&mut self.task).await {
            Ok(res) => res,
            Err(e) => Err(Error::Process {
                program: self.label.clone(),
                source: std::io::Error::other(e),
            }),
        }
    }
}

/// Launches invocations through an [`EngineRunner`] and terminates all of
/// them on request.
pub struct Supervisor {
    runner: Arc<dyn EngineRunner>,
    sink: OutputSink,
    shutdown: watch::Sender<bool>,
}

impl Supervisor {
    pub fn new(runner: Arc<dyn EngineRunner>, sink: OutputSink) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            runner,
            sink,
            shutdown,
        }
    }

    /// Start `invocation` in the background; never waits for the child.
    pub fn launch(&self, label: impl Into<String>, invocation: CommandInvocation) -> ProcessHandle {
        let label = label.into();
        let ctx = RunContext {
            sink: self.sink.clone(),
            shutdown: self.shutdown.subscribe(),
        };
        let runner = self.runner.clone();
        info!(process = %label, program = %invocation.executable, "launching");
        let task_label = label.clone();
        let task = tokio::spawn(async move {
            let res = runner.run(&invocation, ctx).await;
            if let Err(e) = &res {
                error!(process = %task_label, error = %e, "process failed");
            }
            res
        });
        ProcessHandle { label, task }
    }

    /// Ask every launched process to stop. Processes launched afterwards are
    /// stopped as soon as they start.
    pub fn terminate_all(&self) {
        self.shutdown.send_replace(true);
    }
}

/// Run one invocation until it exits or `shutdown_signal` fires.
pub async fn run_to_completion<S>(
    supervisor: &Supervisor,
    label: &str,
    invocation: CommandInvocation,
    shutdown_signal: S,
) -> Result<ExitReport>
where
    S: Future<Output = ()>,
{
    let mut handle = supervisor.launch(label, invocation);
    tokio::select! {
        res = handle.wait() => res,
        _ = shutdown_signal => {
            info!(process = %label, "shutdown requested, terminating");
            supervisor.terminate_all();
            handle.wait().await
        }
    }
}
