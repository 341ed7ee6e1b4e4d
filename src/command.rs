//! Maps user commands onto engine invocations.
//!
//! Nothing here starts a process: every builder returns descriptors (or a
//! validation error) so the supervisor stays the only place with side effects.

use crate::error::{Error, Result};
use crate::model::{CommandInvocation, SearchRequest};
use crate::platform::PlatformProfile;
use clap::ValueEnum;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

pub const DEFAULT_ARCHIVES: &str = "0,1,2,3";
pub const DEFAULT_PORT: u16 = 8888;
pub const DEFAULT_HOST: &str = "localhost";
const UI_DEV_SERVER: &str = "nx";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum SearchFormat {
    #[default]
    Json,
    Text,
    Stats,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum StatsFormat {
    Json,
    #[default]
    Text,
    Csv,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum ThreadFormat {
    Json,
    #[default]
    Text,
}

impl SearchFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            SearchFormat::Json => "json",
            SearchFormat::Text => "text",
            SearchFormat::Stats => "stats",
        }
    }
}

impl StatsFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            StatsFormat::Json => "json",
            StatsFormat::Text => "text",
            StatsFormat::Csv => "csv",
        }
    }
}

impl ThreadFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            ThreadFormat::Json => "json",
            ThreadFormat::Text => "text",
        }
    }
}

/// `--save` / `--output`; the output path is only forwarded when saving.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveOptions {
    pub save: bool,
    pub output: Option<PathBuf>,
}

impl SaveOptions {
    fn push_args(&self, args: &mut Vec<String>) {
        if self.save {
            args.push("--save".into());
            if let Some(out) = &self.output {
                args.push("--output".into());
                args.push(out.to_string_lossy().into_owned());
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchOptions {
    pub query: String,
    /// Raw comma-separated archive indices.
    pub archives: String,
    pub board: String,
    pub limit: u32,
    pub subject: Option<String>,
    pub delay: u64,
    pub case_sensitive: bool,
    pub format: SearchFormat,
    pub save: SaveOptions,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            query: String::new(),
            archives: DEFAULT_ARCHIVES.to_string(),
            board: "_".to_string(),
            limit: 100,
            subject: None,
            delay: 3,
            case_sensitive: false,
            format: SearchFormat::Json,
            save: SaveOptions::default(),
        }
    }
}

impl SearchOptions {
    pub fn to_request(&self) -> Result<SearchRequest> {
        Ok(SearchRequest {
            query: self.query.clone(),
            archive_ids: parse_archive_list(&self.archives)?,
            board: self.board.clone(),
            limit: self.limit,
            delay_seconds: self.delay,
            case_sensitive: self.case_sensitive,
            subject: self.subject.clone().filter(|s| !s.is_empty()),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServeOptions {
    pub port: u16,
    pub host: String,
    pub desktop: bool,
    pub dev: bool,
    pub open_browser: bool,
}

impl Default for ServeOptions {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            host: DEFAULT_HOST.to_string(),
            desktop: false,
            dev: false,
            open_browser: true,
        }
    }
}

/// The two processes behind `serve`, plus where to point the browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServePlan {
    pub server: CommandInvocation,
    pub ui: CommandInvocation,
    pub browser_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsOptions {
    pub archives: String,
    pub board: Option<String>,
    /// `YYYY-MM-DD:YYYY-MM-DD`, forwarded untouched.
    pub date: Option<String>,
    pub format: StatsFormat,
}

impl Default for StatsOptions {
    fn default() -> Self {
        Self {
            archives: DEFAULT_ARCHIVES.to_string(),
            board: None,
            date: None,
            format: StatsFormat::Text,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThreadOptions {
    pub thread_id: String,
    pub archive: u32,
    pub board: Option<String>,
    pub format: ThreadFormat,
    pub save: SaveOptions,
}

/// Parse `"0, 2,1"` into an archive index set.
pub fn parse_archive_list(raw: &str) -> Result<BTreeSet<u32>> {
    if raw.trim().is_empty() {
        return Err(Error::invalid("archives", "must not be empty"));
    }
    raw.split(',')
        .map(|part| {
            let part = part.trim();
            part.parse::<u32>().map_err(|_| {
                Error::invalid(
                    "archives",
                    format!("`{part}` is not an archive index (expected e.g. 0,1,2,3)"),
                )
            })
        })
        .collect()
}

pub struct CommandBuilder<'a> {
    profile: &'a PlatformProfile,
    engine_root: &'a Path,
    env: BTreeMap<String, String>,
}

impl<'a> CommandBuilder<'a> {
    pub fn new(
        profile: &'a PlatformProfile,
        engine_root: &'a Path,
        env: BTreeMap<String, String>,
    ) -> Self {
        Self {
            profile,
            engine_root,
            env,
        }
    }

    fn script(&self, rel: &[&str]) -> String {
        let mut path = self.engine_root.to_path_buf();
        path.extend(rel);
        path.to_string_lossy().into_owned()
    }

    fn python(&self, script: &[&str], flags: Vec<String>) -> CommandInvocation {
        let mut args = Vec::with_capacity(flags.len() + 1);
        args.push(self.script(script));
        args.extend(flags);
        CommandInvocation {
            executable: self.profile.python_executable(),
            args,
            env: self.env.clone(),
        }
    }

    pub fn search(&self, opts: &SearchOptions) -> Result<CommandInvocation> {
        let request = opts.to_request()?;
        self.search_request(&request, opts.format, &opts.save)
    }

    pub fn search_request(
        &self,
        request: &SearchRequest,
        format: SearchFormat,
        save: &SaveOptions,
    ) -> Result<CommandInvocation> {
        request.validate()?;
        let archives = serde_json::to_string(&request.archive_ids)?;
        let mut args = vec![
            "--query".to_string(),
            request.query.clone(),
            "--archives".to_string(),
            archives,
            "--board".to_string(),
            request.board.clone(),
            "--limit".to_string(),
            request.limit.to_string(),
            "--delay".to_string(),
            request.delay_seconds.to_string(),
            "--format".to_string(),
            format.as_str().to_string(),
        ];
        if let Some(subject) = &request.subject {
            args.push("--subject".into());
            args.push(subject.clone());
        }
        if request.case_sensitive {
            args.push("--case-sensitive".into());
        }
        save.push_args(&mut args);
        Ok(self.python(&["search", "cli_search.py"], args))
    }

    pub fn serve(&self, opts: &ServeOptions) -> Result<ServePlan> {
        if opts.host.trim().is_empty() {
            return Err(Error::invalid("host", "must not be empty"));
        }
        if opts.port == 0 {
            return Err(Error::invalid("port", "must be between 1 and 65535"));
        }
        let mut args = vec!["--port".to_string(), opts.port.to_string()];
        if opts.desktop {
            args.push("--desktop".into());
        }
        args.push("--host".into());
        args.push(opts.host.clone());
        if opts.dev {
            args.push("--dev".into());
        }
        let server = self.python(&["server.py"], args);

        let configuration = if opts.dev {
            "--configuration=development"
        } else {
            "--configuration=production"
        };
        let ui = CommandInvocation {
            executable: UI_DEV_SERVER.to_string(),
            args: vec!["serve".to_string(), configuration.to_string()],
            env: self.env.clone(),
        };

        let browser_url = opts
            .open_browser
            .then(|| format!("http://{}:{}", opts.host, opts.port));
        Ok(ServePlan {
            server,
            ui,
            browser_url,
        })
    }

    pub fn stats(&self, opts: &StatsOptions) -> Result<CommandInvocation> {
        parse_archive_list(&opts.archives)?;
        let mut args = vec![
            "--archives".to_string(),
            opts.archives.trim().to_string(),
            "--format".to_string(),
            opts.format.as_str().to_string(),
        ];
        if let Some(board) = &opts.board {
            args.push("--board".into());
            args.push(board.clone());
        }
        if let Some(date) = &opts.date {
            args.push("--date".into());
            args.push(date.clone());
        }
        Ok(self.python(&["search", "cli_stats.py"], args))
    }

    pub fn thread(&self, opts: &ThreadOptions) -> Result<CommandInvocation> {
        if opts.thread_id.trim().is_empty() {
            return Err(Error::invalid("thread_id", "must not be empty"));
        }
        let mut args = vec![
            "--thread".to_string(),
            opts.thread_id.clone(),
            "--archive".to_string(),
            opts.archive.to_string(),
            "--format".to_string(),
            opts.format.as_str().to_string(),
        ];
        if let Some(board) = &opts.board {
            args.push("--board".into());
            args.push(board.clone());
        }
        opts.save.push_args(&mut args);
        Ok(self.python(&["search", "cli_thread.py"], args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::HostOs;

    fn profile(os: HostOs) -> PlatformProfile {
        PlatformProfile::for_os(os, Path::new("/home/u"), Some(Path::new("/appdata")))
    }

    fn env() -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert("FORARCHIVES_LOG_DIR".to_string(), "/logs".to_string());
        env
    }

    fn search_opts(query: &str, archives: &str) -> SearchOptions {
        SearchOptions {
            query: query.to_string(),
            archives: archives.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn search_defaults() {
        let p = profile(HostOs::Linux);
        let root = Path::new("/srv/engine");
        let inv = CommandBuilder::new(&p, root, env())
            .search(&search_opts("cats", DEFAULT_ARCHIVES))
            .unwrap();
        assert_eq!(inv.executable, "python3");
        assert_eq!(
            inv.args,
            vec![
                "/srv/engine/search/cli_search.py",
                "--query",
                "cats",
                "--archives",
                "[0,1,2,3]",
                "--board",
                "_",
                "--limit",
                "100",
                "--delay",
                "3",
                "--format",
                "json",
            ]
        );
        assert_eq!(inv.env["FORARCHIVES_LOG_DIR"], "/logs");
    }

    #[test]
    fn archives_json_is_order_independent() {
        let p = profile(HostOs::Linux);
        let root = Path::new("/srv");
        let builder = CommandBuilder::new(&p, root, env());
        let a = builder.search(&search_opts("q", "3,1, 0")).unwrap();
        let b = builder.search(&search_opts("q", "0,1,3")).unwrap();
        let decode = |inv: &CommandInvocation| -> BTreeSet<u32> {
            serde_json::from_str(inv.flag_value("--archives").unwrap()).unwrap()
        };
        assert_eq!(decode(&a), BTreeSet::from([0, 1, 3]));
        assert_eq!(decode(&a), decode(&b));
        assert_eq!(a.flag_value("--query"), Some("q"));
    }

    #[test]
    fn search_rejects_bad_archive_lists() {
        let p = profile(HostOs::Linux);
        let root = Path::new("/srv");
        let builder = CommandBuilder::new(&p, root, env());
        for bad in ["", "  ", "0,,1", "a,b", "1;2", "-1"] {
            let err = builder.search(&search_opts("q", bad)).unwrap_err();
            assert!(
                matches!(err, Error::InvalidArgument { name: "archives", .. }),
                "{bad:?} gave {err}"
            );
        }
    }

    #[test]
    fn empty_request_archives_fail_before_building() {
        let p = profile(HostOs::Linux);
        let root = Path::new("/srv");
        let request = SearchRequest::new("q", BTreeSet::new());
        let res = CommandBuilder::new(&p, root, env()).search_request(
            &request,
            SearchFormat::Json,
            &SaveOptions::default(),
        );
        assert!(matches!(res, Err(Error::InvalidArgument { .. })));
    }

    #[test]
    fn search_optional_flags() {
        let p = profile(HostOs::Linux);
        let root = Path::new("/srv");
        let opts = SearchOptions {
            subject: Some("general".into()),
            case_sensitive: true,
            format: SearchFormat::Text,
            save: SaveOptions {
                save: true,
                output: Some(PathBuf::from("out.txt")),
            },
            ..search_opts("q", "2")
        };
        let inv = CommandBuilder::new(&p, root, env()).search(&opts).unwrap();
        let tail: Vec<&str> = inv.args[13..].iter().map(String::as_str).collect();
        assert_eq!(
            tail,
            vec![
                "--subject",
                "general",
                "--case-sensitive",
                "--save",
                "--output",
                "out.txt"
            ]
        );
        assert_eq!(inv.flag_value("--format"), Some("text"));
    }

    #[test]
    fn output_without_save_is_dropped() {
        let p = profile(HostOs::Linux);
        let root = Path::new("/srv");
        let opts = SearchOptions {
            save: SaveOptions {
                save: false,
                output: Some(PathBuf::from("out.txt")),
            },
            ..search_opts("q", "0")
        };
        let inv = CommandBuilder::new(&p, root, env()).search(&opts).unwrap();
        assert!(!inv.has_flag("--output"));
        assert!(!inv.has_flag("--save"));
    }

    #[test]
    fn serve_builds_server_and_ui() {
        let p = profile(HostOs::Linux);
        let root = Path::new("/srv");
        let plan = CommandBuilder::new(&p, root, env())
            .serve(&ServeOptions::default())
            .unwrap();
        assert_eq!(
            plan.server.args,
            vec!["/srv/server.py", "--port", "8888", "--host", "localhost"]
        );
        assert_eq!(plan.ui.executable, "nx");
        assert_eq!(plan.ui.args, vec!["serve", "--configuration=production"]);
        assert_eq!(plan.browser_url.as_deref(), Some("http://localhost:8888"));
    }

    #[test]
    fn serve_dev_desktop_no_open() {
        let p = profile(HostOs::Linux);
        let root = Path::new("/srv");
        let opts = ServeOptions {
            port: 9000,
            host: "0.0.0.0".into(),
            desktop: true,
            dev: true,
            open_browser: false,
        };
        let plan = CommandBuilder::new(&p, root, env()).serve(&opts).unwrap();
        assert_eq!(
            plan.server.args,
            vec![
                "/srv/server.py",
                "--port",
                "9000",
                "--desktop",
                "--host",
                "0.0.0.0",
                "--dev"
            ]
        );
        assert_eq!(plan.ui.args[1], "--configuration=development");
        assert!(plan.browser_url.is_none());
    }

    #[test]
    fn windows_runs_native_python_and_shims_ui() {
        let p = profile(HostOs::Windows);
        let root = Path::new("/srv");
        let inv = CommandBuilder::new(&p, root, env())
            .search(&search_opts("q", "0"))
            .unwrap();
        assert_eq!(inv.executable, "python.exe");
        assert!(!p.needs_shell(&inv.executable));

        let plan = CommandBuilder::new(&p, root, env())
            .serve(&ServeOptions::default())
            .unwrap();
        assert_eq!(plan.ui.executable, "nx");
        assert!(p.needs_shell(&plan.ui.executable));
    }

    #[test]
    fn stats_passes_literal_archives_and_raw_date() {
        let p = profile(HostOs::Linux);
        let root = Path::new("/srv");
        let opts = StatsOptions {
            archives: "1,0".into(),
            board: Some("a".into()),
            date: Some("2024-13-01:nonsense".into()),
            format: StatsFormat::Csv,
        };
        let inv = CommandBuilder::new(&p, root, env()).stats(&opts).unwrap();
        assert_eq!(
            inv.args,
            vec![
                "/srv/search/cli_stats.py",
                "--archives",
                "1,0",
                "--format",
                "csv",
                "--board",
                "a",
                "--date",
                "2024-13-01:nonsense"
            ]
        );
    }

    #[test]
    fn stats_defaults() {
        let p = profile(HostOs::Linux);
        let root = Path::new("/srv");
        let inv = CommandBuilder::new(&p, root, env())
            .stats(&StatsOptions::default())
            .unwrap();
        assert_eq!(inv.flag_value("--archives"), Some("0,1,2,3"));
        assert_eq!(inv.flag_value("--format"), Some("text"));
        assert!(!inv.has_flag("--board"));
    }

    #[test]
    fn thread_command() {
        let p = profile(HostOs::Linux);
        let root = Path::new("/srv");
        let opts = ThreadOptions {
            thread_id: "123456".into(),
            board: Some("jp".into()),
            save: SaveOptions {
                save: true,
                output: None,
            },
            ..Default::default()
        };
        let inv = CommandBuilder::new(&p, root, env()).thread(&opts).unwrap();
        assert_eq!(
            inv.args,
            vec![
                "/srv/search/cli_thread.py",
                "--thread",
                "123456",
                "--archive",
                "0",
                "--format",
                "text",
                "--board",
                "jp",
                "--save"
            ]
        );
    }

    #[test]
    fn thread_requires_id() {
        let p = profile(HostOs::Linux);
        let root = Path::new("/srv");
        let res = CommandBuilder::new(&p, root, env()).thread(&ThreadOptions::default());
        assert!(matches!(
            res,
            Err(Error::InvalidArgument {
                name: "thread_id",
                ..
            })
        ));
    }
}
