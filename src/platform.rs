//! Host-specific facts needed to launch the engine and open a browser.

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostOs {
    Windows,
    MacOs,
    Linux,
}

impl HostOs {
    pub fn current() -> Self {
        Self::from_name(std::env::consts::OS)
    }

    /// Unknown platforms get the Linux profile.
    pub fn from_name(name: &str) -> Self {
        match name {
            "windows" | "win32" => HostOs::Windows,
            "macos" | "darwin" => HostOs::MacOs,
            _ => HostOs::Linux,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformProfile {
    pub os: HostOs,
    pub executable_suffix: &'static str,
    pub path_list_separator: char,
    pub log_dir: PathBuf,
    /// Program and leading arguments; the URL is appended last.
    pub browser_open_command: (&'static str, &'static [&'static str]),
    pub python: &'static str,
    /// Windows resolves `.cmd` shims (e.g. `nx`) only through the shell.
    pub spawn_via_shell: bool,
}

impl PlatformProfile {
    /// Build the profile for `os` from explicit directories.
    pub fn for_os(os: HostOs, home: &Path, appdata: Option<&Path>) -> Self {
        match os {
            HostOs::Windows => Self {
                os,
                executable_suffix: ".exe",
                path_list_separator: ';',
                log_dir: appdata
                    .map(Path::to_path_buf)
                    .unwrap_or_default()
                    .join("ForArchives")
                    .join("logs"),
                browser_open_command: ("cmd", &["/c", "start"]),
                python: "python",
                spawn_via_shell: true,
            },
            HostOs::MacOs => Self {
                os,
                executable_suffix: "",
                path_list_separator: ':',
                log_dir: home.join("Library").join("Logs").join("ForArchives"),
                browser_open_command: ("open", &[]),
                python: "python3",
                spawn_via_shell: false,
            },
            HostOs::Linux => Self {
                os,
                executable_suffix: "",
                path_list_separator: ':',
                log_dir: home
                    .join(".local")
                    .join("share")
                    .join("forarchives")
                    .join("logs"),
                browser_open_command: ("xdg-open", &[]),
                python: "python3",
                spawn_via_shell: false,
            },
        }
    }

    /// Profile for the running host.
    pub fn detect() -> Result<Self> {
        let home = dirs::home_dir().ok_or(Error::NoHomeDir)?;
        let appdata = std::env::var_os("APPDATA").map(PathBuf::from);
        Ok(Self::for_os(HostOs::current(), &home, appdata.as_deref()))
    }

    /// Create the log directory if needed and return it.
    pub fn ensure_log_dir(&self) -> Result<&Path> {
        std::fs::create_dir_all(&self.log_dir)?;
        Ok(&self.log_dir)
    }

    /// Interpreter executable used to run the engine scripts.
    pub fn python_executable(&self) -> String {
        self.executable(self.python)
    }

    /// File name of a native binary on this host.
    pub fn executable(&self, name: &str) -> String {
        format!("{name}{}", self.executable_suffix)
    }

    /// Whether `program` must be started through the shell. On Windows only
    /// native binaries spawn directly; script shims like `nx.cmd` do not.
    pub fn needs_shell(&self, program: &str) -> bool {
        self.spawn_via_shell
            && (self.executable_suffix.is_empty()
                || !program
                    .to_ascii_lowercase()
                    .ends_with(self.executable_suffix))
    }

    /// Program and full argv that open `url` in the default browser.
    pub fn browser_command(&self, url: &str) -> (String, Vec<String>) {
        let (program, leading) = self.browser_open_command;
        let mut args: Vec<String> = leading.iter().map(|s| s.to_string()).collect();
        args.push(url.to_string());
        (program.to_string(), args)
    }

    pub fn path_entries<'a>(&self, value: &'a str) -> impl Iterator<Item = &'a str> {
        value.split(self.path_list_separator).filter(|s| !s.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_os_falls_back_to_linux() {
        assert_eq!(HostOs::from_name("freebsd"), HostOs::Linux);
        assert_eq!(HostOs::from_name("darwin"), HostOs::MacOs);
        assert_eq!(HostOs::from_name("win32"), HostOs::Windows);
    }

    #[test]
    fn linux_profile() {
        let p = PlatformProfile::for_os(HostOs::Linux, Path::new("/home/u"), None);
        assert_eq!(p.path_list_separator, ':');
        assert_eq!(
            p.log_dir,
            PathBuf::from("/home/u/.local/share/forarchives/logs")
        );
        assert_eq!(p.python_executable(), "python3");
        assert!(!p.needs_shell("nx"));
        assert_eq!(
            p.browser_command("http://localhost:8888"),
            (
                "xdg-open".to_string(),
                vec!["http://localhost:8888".to_string()]
            )
        );
    }

    #[test]
    fn windows_profile() {
        let p = PlatformProfile::for_os(
            HostOs::Windows,
            Path::new("C:/Users/u"),
            Some(Path::new("C:/Users/u/AppData/Roaming")),
        );
        assert_eq!(p.path_list_separator, ';');
        assert!(p.log_dir.ends_with("ForArchives/logs"));
        assert_eq!(p.python_executable(), "python.exe");
        assert!(!p.needs_shell("python.exe"));
        assert!(!p.needs_shell("C:/Python312/PYTHON.EXE"));
        assert!(p.needs_shell("nx"));
        let (program, args) = p.browser_command("http://h:1");
        assert_eq!(program, "cmd");
        assert_eq!(args, vec!["/c", "start", "http://h:1"]);
    }

    #[test]
    fn macos_profile() {
        let p = PlatformProfile::for_os(HostOs::MacOs, Path::new("/Users/u"), None);
        assert_eq!(p.log_dir, PathBuf::from("/Users/u/Library/Logs/ForArchives"));
        assert_eq!(p.browser_command("u").0, "open");
    }

    #[test]
    fn log_dir_creation_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let p = PlatformProfile::for_os(HostOs::Linux, tmp.path(), None);
        let first = p.ensure_log_dir().unwrap().to_path_buf();
        let second = p.ensure_log_dir().unwrap().to_path_buf();
        assert_eq!(first, second);
        assert!(first.is_dir());
    }
}
