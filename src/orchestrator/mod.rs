//! Process orchestration.
//!
//! This module owns child lifecycles (launch, output relay, shutdown) and the
//! `serve` controller that pairs the engine server with the UI dev-server.
//! CLI code builds invocations and hands them here.

mod controller;
mod signal;
mod supervisor;

pub(crate) use controller::{run_serve, BrowserOpener, SystemBrowser, BROWSER_SETTLE_DELAY};
pub(crate) use signal::shutdown_signal;
pub(crate) use supervisor::{run_to_completion, Supervisor};
