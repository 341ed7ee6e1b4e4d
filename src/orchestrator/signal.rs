use tracing::{debug, warn};

/// Resolves on the first host shutdown request: Ctrl-C everywhere, SIGTERM
/// and SIGHUP (terminal closed) on unix, console close on Windows.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => debug!("received Ctrl-C"),
            Err(e) => {
                warn!(error = %e, "failed to listen for Ctrl-C");
                futures::future::pending::<()>().await;
            }
        }
    };
    tokio::select! {
        _ = ctrl_c => {}
        _ = platform_signal() => {}
    }
}

#[cfg(unix)]
async fn unix_signal(kind: tokio::signal::unix::SignalKind, name: &'static str) {
    match tokio::signal::unix::signal(kind) {
        Ok(mut s) => {
            s.recv().await;
            debug!(signal = name, "received signal");
        }
        Err(e) => {
            warn!(signal = name, error = %e, "failed to install signal handler");
            futures::future::pending::<()>().await;
        }
    }
}

#[cfg(unix)]
async fn platform_signal() {
    use tokio::signal::unix::SignalKind;
    tokio::select! {
        _ = unix_signal(SignalKind::terminate(), "SIGTERM") => {}
        _ = unix_signal(SignalKind::hangup(), "SIGHUP") => {}
    }
}

#[cfg(windows)]
async fn platform_signal() {
    match tokio::signal::windows::ctrl_close() {
        Ok(mut s) => {
            s.recv().await;
            debug!("console closed");
        }
        Err(e) => {
            warn!(error = %e, "failed to listen for console close");
            futures::future::pending::<()>().await;
        }
    }
}

#[cfg(not(any(unix, windows)))]
async fn platform_signal() {
    futures::future::pending::<()>().await;
}
