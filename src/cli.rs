use crate::api::{SearchClient, DEFAULT_SERVER_URL};
use crate::command::{
    parse_archive_list, CommandBuilder, SaveOptions, SearchFormat, SearchOptions, ServeOptions,
    StatsFormat, StatsOptions, ThreadFormat, ThreadOptions, DEFAULT_ARCHIVES, DEFAULT_HOST,
    DEFAULT_PORT,
};
use crate::engine::{OutputSink, SubprocessRunner};
use crate::environment::{host_env, EngineConfig, EnvironmentBuilder};
use crate::logging;
use crate::model::{OutputLine, SearchRequest};
use crate::orchestrator::{
    run_serve, run_to_completion, shutdown_signal, BrowserOpener, Supervisor, SystemBrowser,
    BROWSER_SETTLE_DELAY,
};
use crate::platform::PlatformProfile;
use crate::text_summary::build_text_summary;
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (OutputSink, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "forarchives",
    version,
    about = "ForArchives CLI - search 4chan archives from the terminal"
)]
pub struct Cli {
    /// Directory holding the search engine (server.py, search/)
    #[arg(long, global = true, env = "FORARCHIVES_ENGINE_DIR")]
    pub engine_dir: Option<PathBuf>,

    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Commands {
    /// Search archives for posts
    Search(SearchArgs),
    /// Start the web server and UI
    #[command(disable_help_flag = true)]
    Serve(ServeArgs),
    /// Show archive statistics
    Stats(StatsArgs),
    /// Fetch a full thread
    Thread(ThreadArgs),
    /// Search through a running server and summarize the results
    Query(QueryArgs),
}

#[derive(Debug, Args, Clone)]
pub struct SearchArgs {
    /// Search query
    pub query: String,

    /// Comma-separated archive indices (0=desuarchive, 1=palanq, 2=moe, 3=4plebs, 4=b4k)
    #[arg(short, long, default_value = DEFAULT_ARCHIVES)]
    pub archives: String,

    /// Board to search (`_` for all boards)
    #[arg(short, long, default_value = "_")]
    pub board: String,

    /// Maximum results per archive
    #[arg(short, long, default_value_t = 100)]
    pub limit: u32,

    /// Also match against thread subjects
    #[arg(short, long)]
    pub subject: Option<String>,

    /// Seconds to wait between archive requests
    #[arg(short, long, default_value_t = 3)]
    pub delay: u64,

    /// Match case exactly
    #[arg(short, long)]
    pub case_sensitive: bool,

    #[arg(long, value_enum, default_value_t = SearchFormat::Json)]
    pub format: SearchFormat,

    /// Save results to a file
    #[arg(long)]
    pub save: bool,

    /// Output path for --save
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Show the automation browser while searching
    #[arg(long)]
    pub show_browser: bool,
}

#[derive(Debug, Args, Clone)]
pub struct ServeArgs {
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Run in desktop mode
    #[arg(short, long)]
    pub desktop: bool,

    #[arg(short = 'h', long, default_value = DEFAULT_HOST)]
    pub host: String,

    /// Don't open a browser once the server is up
    #[arg(long)]
    pub no_open: bool,

    /// Use the development UI build and server reload
    #[arg(long)]
    pub dev: bool,

    /// Print help
    #[arg(long, action = clap::ArgAction::Help)]
    pub help: Option<bool>,
}

#[derive(Debug, Args, Clone)]
pub struct StatsArgs {
    #[arg(short, long, default_value = DEFAULT_ARCHIVES)]
    pub archives: String,

    #[arg(short, long)]
    pub board: Option<String>,

    /// Date range, YYYY-MM-DD:YYYY-MM-DD
    #[arg(short, long)]
    pub date: Option<String>,

    #[arg(long, value_enum, default_value_t = StatsFormat::Text)]
    pub format: StatsFormat,
}

#[derive(Debug, Args, Clone)]
pub struct ThreadArgs {
    pub thread_id: String,

    /// Archive index holding the thread
    #[arg(short, long, default_value_t = 0)]
    pub archive: u32,

    #[arg(short, long)]
    pub board: Option<String>,

    #[arg(long, value_enum, default_value_t = ThreadFormat::Text)]
    pub format: ThreadFormat,

    #[arg(long)]
    pub save: bool,

    #[arg(long)]
    pub output: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum QueryFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Args, Clone)]
pub struct QueryArgs {
    pub query: String,

    #[arg(short, long, default_value = DEFAULT_ARCHIVES)]
    pub archives: String,

    /// Base URL of a running `forarchives serve`
    #[arg(long, default_value = DEFAULT_SERVER_URL)]
    pub server: String,

    #[arg(long, value_enum, default_value_t = QueryFormat::Text)]
    pub format: QueryFormat,
}

impl SearchArgs {
    fn to_options(&self) -> SearchOptions {
        SearchOptions {
            query: self.query.clone(),
            archives: self.archives.clone(),
            board: self.board.clone(),
            limit: self.limit,
            subject: self.subject.clone(),
            delay: self.delay,
            case_sensitive: self.case_sensitive,
            format: self.format,
            save: SaveOptions {
                save: self.save,
                output: self.output.clone(),
            },
        }
    }
}

impl ServeArgs {
    fn to_options(&self) -> ServeOptions {
        ServeOptions {
            port: self.port,
            host: self.host.clone(),
            desktop: self.desktop,
            dev: self.dev,
            open_browser: !self.no_open,
        }
    }
}

impl StatsArgs {
    fn to_options(&self) -> StatsOptions {
        StatsOptions {
            archives: self.archives.clone(),
            board: self.board.clone(),
            date: self.date.clone(),
            format: self.format,
        }
    }
}

impl ThreadArgs {
    fn to_options(&self) -> ThreadOptions {
        ThreadOptions {
            thread_id: self.thread_id.clone(),
            archive: self.archive,
            board: self.board.clone(),
            format: self.format,
            save: SaveOptions {
                save: self.save,
                output: self.output.clone(),
            },
        }
    }
}

/// `--engine-dir`, else `<exe dir>/../server`, else `./server`.
fn resolve_engine_root(explicit: Option<PathBuf>) -> PathBuf {
    let root = explicit
        .or_else(|| {
            std::env::current_exe()
                .ok()
                .and_then(|exe| exe.parent().map(|dir| dir.join("..").join("server")))
                .filter(|p| p.is_dir())
        })
        .unwrap_or_else(|| PathBuf::from("server"));
    std::fs::canonicalize(&root).unwrap_or(root)
}

/// Everything the engine process needs, shared by every engine subcommand.
struct EngineSetup {
    profile: PlatformProfile,
    config: EngineConfig,
    env: BTreeMap<String, String>,
}

impl EngineSetup {
    fn new(profile: &PlatformProfile, engine_dir: Option<PathBuf>, show_browser: bool) -> Self {
        let base = host_env();
        let config = EngineConfig::from_base_env(resolve_engine_root(engine_dir), &base)
            .with_show_browser(show_browser);
        let child = EnvironmentBuilder::new(profile, &config).build(&base);
        debug!(
            engine_root = %config.engine_root.display(),
            vars = child.vars.len(),
            warnings = child.warnings.len(),
            "prepared engine environment"
        );
        Self {
            profile: profile.clone(),
            config,
            env: child.vars,
        }
    }

    fn builder(&self) -> CommandBuilder<'_> {
        CommandBuilder::new(&self.profile, &self.config.engine_root, self.env.clone())
    }

    fn supervisor(&self, sink: &OutputSink) -> Supervisor {
        Supervisor::new(Arc::new(SubprocessRunner::new(&self.profile)), sink.clone())
    }
}

pub async fn run(args: Cli) -> Result<i32> {
    let profile = PlatformProfile::detect().context("failed to determine platform directories")?;
    let log_dir = profile.ensure_log_dir();
    logging::init_tracing(args.verbose, log_dir.as_ref().ok().copied());
    if let Err(e) = &log_dir {
        warn!(error = %e, "log directory unavailable");
    }

    let (out_tx, out_handle) = spawn_output_writer();
    let result = dispatch(args, &profile, &out_tx).await;
    drop(out_tx);
    let _ = out_handle.await;
    result
}

async fn dispatch(args: Cli, profile: &PlatformProfile, out: &OutputSink) -> Result<i32> {
    match args.command {
        Commands::Search(search) => {
            let setup = EngineSetup::new(profile, args.engine_dir, search.show_browser);
            let invocation = setup.builder().search(&search.to_options())?;
            let supervisor = setup.supervisor(out);
            let report = run_to_completion(&supervisor, "search", invocation, shutdown_signal())
                .await
                .context("search failed")?;
            Ok(report.host_code())
        }
        Commands::Serve(serve) => {
            let setup = EngineSetup::new(profile, args.engine_dir, false);
            let plan = setup.builder().serve(&serve.to_options())?;
            let supervisor = setup.supervisor(out);
            let opener: Arc<dyn BrowserOpener> =
                Arc::new(SystemBrowser::new(profile.clone(), out.clone()));
            let outcome = run_serve(
                &supervisor,
                plan,
                opener,
                BROWSER_SETTLE_DELAY,
                shutdown_signal(),
            )
            .await;
            if let Err(e) = &outcome.ui {
                warn!(error = %e, "ui dev-server did not run");
            }
            let code = outcome.host_code();
            outcome.server.context("engine server failed")?;
            Ok(code)
        }
        Commands::Stats(stats) => {
            let setup = EngineSetup::new(profile, args.engine_dir, false);
            let invocation = setup.builder().stats(&stats.to_options())?;
            let supervisor = setup.supervisor(out);
            let report = run_to_completion(&supervisor, "stats", invocation, shutdown_signal())
                .await
                .context("stats failed")?;
            Ok(report.host_code())
        }
        Commands::Thread(thread) => {
            let setup = EngineSetup::new(profile, args.engine_dir, false);
            let invocation = setup.builder().thread(&thread.to_options())?;
            let supervisor = setup.supervisor(out);
            let report = run_to_completion(&supervisor, "thread", invocation, shutdown_signal())
                .await
                .context("thread fetch failed")?;
            Ok(report.host_code())
        }
        Commands::Query(query) => {
            let request = SearchRequest::new(query.query, parse_archive_list(&query.archives)?);
            let client = SearchClient::new(query.server)?;
            let set = client
                .search(&request)
                .await
                .with_context(|| format!("search via {} failed", client.endpoint()))?;
            match query.format {
                QueryFormat::Json => {
                    let json = serde_json::to_string_pretty(&set)?;
                    let _ = out.send(OutputLine::Stdout(json));
                }
                QueryFormat::Text => {
                    for line in build_text_summary(&set).lines {
                        let _ = out.send(OutputLine::Stdout(line));
                    }
                }
            }
            Ok(0)
        }
    }
}
