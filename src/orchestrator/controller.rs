//! `serve` lifecycle: the engine web server and the UI dev-server run side by
//! side, a browser is opened after a fixed settle delay, and both are torn
//! down together on shutdown.

use super::supervisor::Supervisor;
use crate::command::ServePlan;
use crate::engine::{ExitReport, OutputSink};
use crate::error::Result;
use crate::model::OutputLine;
use crate::platform::PlatformProfile;
use std::future::Future;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Time between launching the server and opening the browser. This is not a
/// readiness check.
pub const BROWSER_SETTLE_DELAY: Duration = Duration::from_secs(3);

pub trait BrowserOpener: Send + Sync {
    fn open(&self, url: &str);
}

/// Opens URLs with the platform's default browser command.
pub struct SystemBrowser {
    profile: PlatformProfile,
    sink: OutputSink,
}

impl SystemBrowser {
    pub fn new(profile: PlatformProfile, sink: OutputSink) -> Self {
        Self { profile, sink }
    }
}

impl BrowserOpener for SystemBrowser {
    fn open(&self, url: &str) {
        let (program, args) = self.profile.browser_command(url);
        let spawned = tokio::process::Command::new(&program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
        match spawned {
            Ok(_) => info!(url, "opened browser"),
            Err(e) => {
                warn!(program = %program, error = %e, "could not open browser");
                let _ = self
                    .sink
                    .send(OutputLine::Stdout(format!("Server running at {url}")));
            }
        }
    }
}

#[derive(Debug)]
pub struct ServeOutcome {
    pub server: Result<ExitReport>,
    pub ui: Result<ExitReport>,
}

impl ServeOutcome {
    /// Non-zero if the server failed to start or exited badly on its own.
    pub fn host_code(&self) -> i32 {
        match &self.server {
            Ok(r) if r.terminated || r.success() => 0,
            Ok(r) => r.host_code(),
            Err(_) => 1,
        }
    }
}

/// Launch both processes and supervise them until they exit or
/// `shutdown_signal` fires.
pub async fn run_serve<S>(
    supervisor: &Supervisor,
    plan: ServePlan,
    opener: Arc<dyn BrowserOpener>,
    browser_delay: Duration,
    shutdown_signal: S,
) -> ServeOutcome
where
    S: Future<Output = ()>,
{
    let mut server = supervisor.launch("server", plan.server);
    let mut ui = supervisor.launch("ui", plan.ui);

    // One-shot; measured from launch, not from server readiness.
    let browser = plan.browser_url.map(|url| {
        tokio::spawn(async move {
            tokio::time::sleep(browser_delay).await;
            info!(url = %url, "opening browser");
            opener.open(&url);
        })
    });

    tokio::pin!(shutdown_signal);
    let mut server_res: Option<Result<ExitReport>> = None;
    let mut ui_res: Option<Result<ExitReport>> = None;

    while server_res.is_none() || ui_res.is_none() {
        tokio::select! {
            res = server.wait(), if server_res.is_none() => {
                info!(process = server.label(), code = ?res.as_ref().ok().and_then(|r| r.code), "process exited");
                let failed = res.is_err();
                server_res = Some(res);
                // No UI without an engine behind it.
                if failed {
                    warn!("engine server failed, stopping ui");
                    supervisor.terminate_all();
                    break;
                }
            }
            res = ui.wait(), if ui_res.is_none() => {
                info!(process = ui.label(), code = ?res.as_ref().ok().and_then(|r| r.code), "process exited");
                ui_res = Some(res);
            }
            _ = &mut shutdown_signal => {
                info!("shutdown requested, stopping server and ui");
                supervisor.terminate_all();
                break;
            }
        }
    }

    let server = match server_res {
        Some(res) => res,
        None => server.wait().await,
    };
    let ui = match ui_res {
        Some(res) => res,
        None => ui.wait().await,
    };
    if let Some(task) = browser {
        task.abort();
    }
    ServeOutcome { server, ui }
}
