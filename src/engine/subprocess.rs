use super::{EngineRunner, ExitReport, OutputSink, RunContext};
use crate::error::{Error, Result};
use crate::model::{CommandInvocation, OutputLine};
use crate::platform::PlatformProfile;
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, error, warn};

/// How long output may keep flowing after the child is gone. Anything still
/// holding the pipes past this belongs to a leftover descendant.
const RELAY_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Runs invocations as real child processes.
#[derive(Debug, Clone)]
pub struct SubprocessRunner {
    profile: PlatformProfile,
}

impl SubprocessRunner {
    pub fn new(profile: &PlatformProfile) -> Self {
        Self {
            profile: profile.clone(),
        }
    }

    fn command(&self, invocation: &CommandInvocation) -> Command {
        let mut cmd = if self.profile.needs_shell(&invocation.executable) {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(&invocation.executable);
            c
        } else {
            Command::new(&invocation.executable)
        };
        cmd.args(&invocation.args)
            .env_clear()
            .envs(&invocation.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own group, so the whole tree can be signalled at once.
        #[cfg(unix)]
        cmd.process_group(0);
        cmd
    }
}

/// Kill `pid` and everything it spawned.
#[cfg(unix)]
async fn kill_process_tree(pid: u32, program: &str) {
    let Ok(pgid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: killpg only sends a signal; the group was created at spawn.
    if unsafe { libc::killpg(pgid, libc::SIGKILL) } != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            warn!(program = %program, pgid, error = %err, "failed to kill process group");
        }
    }
}

/// Kill `pid` and everything it spawned.
#[cfg(windows)]
async fn kill_process_tree(pid: u32, program: &str) {
    let status = Command::new("taskkill")
        .args(["/T", "/F", "/PID", &pid.to_string()])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    match status {
        Ok(s) if s.success() => {}
        Ok(s) => debug!(program = %program, pid, code = ?s.code(), "taskkill reported failure"),
        Err(e) => warn!(program = %program, pid, error = %e, "failed to run taskkill"),
    }
}

#[cfg(not(any(unix, windows)))]
async fn kill_process_tree(_pid: u32, _program: &str) {}

/// Forward a child stream to the sink one line at a time. Invalid UTF-8 is
/// replaced rather than dropping the line.
async fn relay<R>(reader: R, sink: OutputSink, wrap: fn(String) -> OutputLine)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                while matches!(buf.last(), Some(b'\n' | b'\r')) {
                    buf.pop();
                }
                let line = String::from_utf8_lossy(&buf).into_owned();
                if sink.send(wrap(line)).is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!(error = %e, "output stream closed with error");
                break;
            }
        }
    }
}

#[async_trait]
impl EngineRunner for SubprocessRunner {
    async fn run(&self, invocation: &CommandInvocation, mut ctx: RunContext) -> Result<ExitReport> {
        let program = invocation.executable.clone();
        let mut child = self.command(invocation).spawn().map_err(|source| {
            error!(program = %program, error = %source, "failed to launch engine process");
            Error::Launch {
                program: program.clone(),
                source,
            }
        })?;
        let pid = child.id();
        debug!(program = %program, pid = ?pid, args = ?invocation.args, "process started");

        let mut relays = Vec::with_capacity(2);
        if let Some(out) = child.stdout.take() {
            relays.push(tokio::spawn(relay(out, ctx.sink.clone(), OutputLine::Stdout)));
        }
        if let Some(err) = child.stderr.take() {
            relays.push(tokio::spawn(relay(err, ctx.sink.clone(), OutputLine::Stderr)));
        }

        let report = tokio::select! {
            status = child.wait() => {
                let status = status.map_err(|source| Error::Process { program: program.clone(), source })?;
                ExitReport::exited(status.code())
            }
            _ = ctx.shutdown_requested() => {
                if let Some(pid) = pid {
                    kill_process_tree(pid, &program).await;
                }
                if let Err(e) = child.kill().await {
                    warn!(program = %program, error = %e, "failed to terminate process");
                }
                let code = child.try_wait().ok().flatten().and_then(|s| s.code());
                ExitReport::terminated(code)
            }
        };

        let drained = tokio::time::timeout(RELAY_DRAIN_TIMEOUT, async {
            for handle in relays.iter_mut() {
                let _ = handle.await;
            }
        })
        .await;
        if drained.is_err() {
            warn!(program = %program, "descendants still hold the output pipes, killing them");
            if let Some(pid) = pid {
                kill_process_tree(pid, &program).await;
            }
            for handle in &relays {
                handle.abort();
            }
        }
        debug!(program = %program, code = ?report.code, terminated = report.terminated, "process finished");
        Ok(report)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::platform::HostOs;
    use std::collections::BTreeMap;
    use std::path::Path;
    use tokio::sync::{mpsc, watch};

    fn runner() -> SubprocessRunner {
        SubprocessRunner::new(&PlatformProfile::for_os(
            HostOs::Linux,
            Path::new("/tmp"),
            None,
        ))
    }

    fn sh(script: &str) -> CommandInvocation {
        let mut env = BTreeMap::new();
        env.insert("GREETING".to_string(), "hello".to_string());
        if let Ok(path) = std::env::var("PATH") {
            env.insert("PATH".to_string(), path);
        }
        CommandInvocation {
            executable: "sh".into(),
            args: vec!["-c".into(), script.into()],
            env,
        }
    }

    #[tokio::test]
    async fn relays_both_streams_and_exit_code() {
        let (sink, mut rx) = mpsc::unbounded_channel();
        let (_tx, shutdown) = watch::channel(false);
        let report = runner()
            .run(
                &sh("echo \"$GREETING\"; echo one; echo oops 1>&2; exit 4"),
                RunContext { sink, shutdown },
            )
            .await
            .unwrap();
        assert_eq!(report, ExitReport::exited(Some(4)));

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        while let Ok(line) = rx.try_recv() {
            match line {
                OutputLine::Stdout(l) => stdout.push(l),
                OutputLine::Stderr(l) => stderr.push(l),
            }
        }
        assert_eq!(stdout, vec!["hello", "one"]);
        assert_eq!(stderr, vec!["oops"]);
    }

    #[tokio::test]
    async fn missing_executable_is_a_launch_error() {
        let (sink, _rx) = mpsc::unbounded_channel();
        let (_tx, shutdown) = watch::channel(false);
        let inv = CommandInvocation {
            executable: "definitely-not-a-real-binary-4821".into(),
            args: vec![],
            env: BTreeMap::new(),
        };
        let err = runner()
            .run(&inv, RunContext { sink, shutdown })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Launch { .. }));
    }

    #[tokio::test]
    async fn shutdown_kills_child() {
        let (sink, _rx) = mpsc::unbounded_channel();
        let (tx, shutdown) = watch::channel(false);
        let handle = tokio::spawn(async move {
            runner()
                .run(&sh("exec sleep 30"), RunContext { sink, shutdown })
                .await
        });
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        tx.send_replace(true);
        let report = tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(report.terminated);
    }

    #[tokio::test]
    async fn shutdown_kills_forked_descendants() {
        let (sink, _rx) = mpsc::unbounded_channel();
        let (tx, shutdown) = watch::channel(false);
        let handle = tokio::spawn(async move {
            runner()
                .run(&sh("sleep 30 & wait"), RunContext { sink, shutdown })
                .await
        });
        tokio::time::sleep(Duration::from_millis(200)).await;
        tx.send_replace(true);
        let report = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("run should return once the process tree is killed")
            .unwrap()
            .unwrap();
        assert!(report.terminated);
    }

    #[tokio::test]
    async fn leftover_descendant_does_not_hold_up_exit() {
        let (sink, mut rx) = mpsc::unbounded_channel();
        let (_tx, shutdown) = watch::channel(false);
        let report = tokio::time::timeout(
            RELAY_DRAIN_TIMEOUT + Duration::from_secs(3),
            runner().run(&sh("sleep 30 & echo done"), RunContext { sink, shutdown }),
        )
        .await
        .expect("run should not wait on a backgrounded descendant")
        .unwrap();
        assert_eq!(report, ExitReport::exited(Some(0)));
        assert!(matches!(rx.try_recv(), Ok(OutputLine::Stdout(l)) if l == "done"));
    }
}
