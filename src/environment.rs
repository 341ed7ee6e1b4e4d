//! Child process environment derivation.

use crate::platform::PlatformProfile;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::warn;

pub const SEARCH_PATH_VAR: &str = "PYTHONPATH";
pub const LOG_DIR_VAR: &str = "FORARCHIVES_LOG_DIR";
pub const CAPTCHA_KEY_VAR: &str = "TWOCAPTCHA_API_KEY";
pub const SHOW_BROWSER_VAR: &str = "SHOW_BROWSER";

/// Settings for the engine that would otherwise travel through ambient
/// process state. Variable names only appear when the child env is built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineConfig {
    /// Directory holding `server.py` and the `search/` package.
    pub engine_root: PathBuf,
    pub captcha_api_key: Option<String>,
    pub show_browser: bool,
}

impl EngineConfig {
    /// Read the captcha credential once from the host environment.
    pub fn from_base_env(engine_root: PathBuf, base: &BTreeMap<String, String>) -> Self {
        Self {
            engine_root,
            captcha_api_key: base
                .get(CAPTCHA_KEY_VAR)
                .filter(|v| !v.trim().is_empty())
                .cloned(),
            show_browser: false,
        }
    }

    pub fn with_show_browser(mut self, show: bool) -> Self {
        self.show_browser = show;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvWarning {
    MissingCaptchaKey,
}

impl EnvWarning {
    pub fn to_message(&self) -> String {
        match self {
            EnvWarning::MissingCaptchaKey => format!(
                "No 2captcha API key found. Set {CAPTCHA_KEY_VAR} environment variable for captcha solving."
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildEnv {
    pub vars: BTreeMap<String, String>,
    pub warnings: Vec<EnvWarning>,
}

pub struct EnvironmentBuilder<'a> {
    profile: &'a PlatformProfile,
    config: &'a EngineConfig,
}

impl<'a> EnvironmentBuilder<'a> {
    pub fn new(profile: &'a PlatformProfile, config: &'a EngineConfig) -> Self {
        Self { profile, config }
    }

    pub fn build(&self, base: &BTreeMap<String, String>) -> ChildEnv {
        let mut vars = base.clone();
        let mut warnings = Vec::new();

        let engine_path = self.config.engine_root.to_string_lossy().into_owned();
        let current = vars.get(SEARCH_PATH_VAR).cloned().unwrap_or_default();
        if !self.profile.path_entries(&current).any(|p| p == engine_path) {
            let joined = if current.is_empty() {
                engine_path
            } else {
                format!("{engine_path}{}{current}", self.profile.path_list_separator)
            };
            vars.insert(SEARCH_PATH_VAR.to_string(), joined);
        }

        vars.insert(
            LOG_DIR_VAR.to_string(),
            self.profile.log_dir.to_string_lossy().into_owned(),
        );

        match &self.config.captcha_api_key {
            Some(key) => {
                vars.insert(CAPTCHA_KEY_VAR.to_string(), key.clone());
            }
            None => {
                let w = EnvWarning::MissingCaptchaKey;
                warn!("{}", w.to_message());
                warnings.push(w);
            }
        }

        if self.config.show_browser {
            vars.insert(SHOW_BROWSER_VAR.to_string(), "true".to_string());
        }

        ChildEnv { vars, warnings }
    }
}

/// Snapshot of the host environment, skipping non-UTF-8 entries.
pub fn host_env() -> BTreeMap<String, String> {
    std::env::vars_os()
        .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
        .collect()
}
