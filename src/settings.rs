//! Runtime settings for plangate.
//!
//! Settings are layered: defaults, then `.plangate/settings.toml`, then the
//! environment, then CLI flags (applied by the command handlers).
//!
//! ```toml
//! lock_provider = "sqlite"
//! lock_db = ".plangate/locks.db"
//! run_db = ".plangate/runs.db"
//! plan_storage_dir = ".plangate/plans"
//! poll_interval_secs = 60
//!
//! [ci]
//! workflow = "plangate.yml"
//! git_ref = "main"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::vcs::github::DEFAULT_GITHUB_API_URL;

pub const SETTINGS_DIR: &str = ".plangate";
pub const SETTINGS_FILE: &str = "settings.toml";

/// Which lock store backs the project locks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockProvider {
    None,
    Memory,
    #[default]
    Sqlite,
}

impl LockProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockProvider::None => "none",
            LockProvider::Memory => "memory",
            LockProvider::Sqlite => "sqlite",
        }
    }
}

impl std::fmt::Display for LockProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LockProvider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "noop" => Ok(LockProvider::None),
            "memory" => Ok(LockProvider::Memory),
            "sqlite" => Ok(LockProvider::Sqlite),
            _ => anyhow::bail!(
                "Invalid lock provider '{}'. Valid values: sqlite, memory, none",
                s
            ),
        }
    }
}

/// GitHub Actions workflow used to run triggered stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CiSection {
    pub workflow: String,
    pub git_ref: String,
}

impl Default for CiSection {
    fn default() -> Self {
        Self {
            workflow: "plangate.yml".to_string(),
            git_ref: "main".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub lock_provider: LockProvider,
    /// Overrides `lock_provider` with the no-op store.
    pub disable_locking: bool,
    pub lock_db: PathBuf,
    pub run_db: PathBuf,
    pub plan_storage_dir: PathBuf,
    pub github_api_url: String,
    #[serde(skip_serializing)]
    pub github_token: Option<String>,
    pub backend_url: Option<String>,
    #[serde(skip_serializing)]
    pub backend_token: Option<String>,
    pub poll_interval_secs: u64,
    pub ci: CiSection,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            lock_provider: LockProvider::default(),
            disable_locking: false,
            lock_db: PathBuf::from(SETTINGS_DIR).join("locks.db"),
            run_db: PathBuf::from(SETTINGS_DIR).join("runs.db"),
            plan_storage_dir: PathBuf::from(SETTINGS_DIR).join("plans"),
            github_api_url: DEFAULT_GITHUB_API_URL.to_string(),
            github_token: None,
            backend_url: None,
            backend_token: None,
            poll_interval_secs: 60,
            ci: CiSection::default(),
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse settings.toml")
    }

    /// Load `.plangate/settings.toml` under `project_dir`, or defaults if absent.
    pub fn load_or_default(project_dir: &Path) -> Result<Self> {
        let path = project_dir.join(SETTINGS_DIR).join(SETTINGS_FILE);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// File settings overlaid with the process environment.
    pub fn resolve(project_dir: &Path) -> Result<Self> {
        let mut settings = Self::load_or_default(project_dir)?;
        settings.apply_env_from(|key| std::env::var(key).ok())?;
        settings.rebase(project_dir);
        Ok(settings)
    }

    /// Overlay environment values obtained through `lookup`.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(provider) = lookup("LOCK_PROVIDER") {
            self.lock_provider = provider.parse()?;
        }
        if let Some(disable) = lookup("DISABLE_LOCKING") {
            self.disable_locking = disable.eq_ignore_ascii_case("true") || disable == "1";
        }
        if let Some(path) = lookup("PLANGATE_LOCK_DB") {
            self.lock_db = PathBuf::from(path);
        }
        if let Some(path) = lookup("PLANGATE_RUN_DB") {
            self.run_db = PathBuf::from(path);
        }
        if let Some(path) = lookup("PLAN_STORAGE_DIR") {
            self.plan_storage_dir = PathBuf::from(path);
        }
        if let Some(token) = lookup("GITHUB_TOKEN") {
            self.github_token = Some(token);
        }
        if let Some(url) = lookup("GITHUB_API_URL") {
            self.github_api_url = url;
        }
        if let Some(url) = lookup("PLANGATE_BACKEND_URL") {
            self.backend_url = Some(url);
        }
        if let Some(token) = lookup("PLANGATE_BACKEND_TOKEN") {
            self.backend_token = Some(token);
        }
        if let Some(secs) = lookup("PLANGATE_POLL_INTERVAL_SECS") {
            self.poll_interval_secs = secs
                .parse()
                .with_context(|| format!("Invalid PLANGATE_POLL_INTERVAL_SECS '{}'", secs))?;
        }
        Ok(())
    }

    /// Make relative storage paths relative to `project_dir`.
    pub fn rebase(&mut self, project_dir: &Path) {
        for path in [
            &mut self.lock_db,
            &mut self.run_db,
            &mut self.plan_storage_dir,
        ] {
            if path.is_relative() {
                *path = project_dir.join(&*path);
            }
        }
    }

    /// Effective lock provider after `disable_locking`.
    pub fn lock_provider(&self) -> LockProvider {
        if self.disable_locking {
            LockProvider::None
        } else {
            self.lock_provider
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.poll_interval_secs == 0 {
            warnings.push("poll_interval_secs is 0; using 1 second".to_string());
        }
        if self.lock_provider() == LockProvider::Memory {
            warnings.push(
                "lock_provider 'memory' does not protect against other processes".to_string(),
            );
        }
        if self.backend_url.is_some() && self.backend_token.is_none() {
            warnings.push("backend_url is set without PLANGATE_BACKEND_TOKEN".to_string());
        }
        warnings
    }
}
