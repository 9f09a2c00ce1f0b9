//! Persisted environments and the per-invocation session context.
//!
//! Environments live in a dotenv-style file, one `ENV_<name>='<json>'` line
//! per environment plus a `DEFAULT_ENV='<name>'` line. Dashes in names are
//! stored as dots so every key stays a valid dotenv key.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{GscError, Result};
use crate::models::ScopeId;

pub const DEFAULT_ENV: &str = "DEFAULT_ENV";
/// Written by older releases to remember the session env; ignored now.
pub const SESSION_ENV: &str = "SESSION_ENV";
/// Overrides the directory holding the environment file.
pub const CONFIG_DIR_VAR: &str = "GSC_CONFIG_DIR";

const ENV_FILE_NAME: &str = "environments.env";
const ENV_KEY_PREFIX: &str = "ENV_";

/// Code hosting platform an environment points at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[default]
    #[value(name = "gitlab")]
    GitLab,
    #[value(name = "github")]
    GitHub,
}

impl Platform {
    pub fn name(self) -> &'static str {
        match self {
            Platform::GitLab => "GitLab",
            Platform::GitHub => "GitHub",
        }
    }

    /// Search calls allowed per period.
    pub fn search_rate_limit(self) -> (u32, Duration) {
        match self {
            Platform::GitLab => (60, Duration::from_secs(60)),
            Platform::GitHub => (30, Duration::from_secs(60)),
        }
    }

    pub fn default_host(self) -> &'static str {
        match self {
            Platform::GitLab => "https://gitlab.com",
            Platform::GitHub => "https://api.github.com",
        }
    }
}

/// A named set of credentials for one GitLab or GitHub host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Env {
    pub name: String,
    #[serde(default)]
    pub platform: Platform,
    pub host_name: String,
    pub private_token: String,
    #[serde(default = "default_verify_ssl")]
    pub verify_ssl: bool,
}

fn default_verify_ssl() -> bool {
    true
}

impl Env {
    /// Token with everything past the first 4 characters hidden.
    pub fn masked_token(&self) -> String {
        let visible: String = self.private_token.chars().take(4).collect();
        let hidden = self.private_token.chars().count().saturating_sub(4);
        format!("{}{}", visible, "*".repeat(hidden))
    }
}

/// Environment names may only contain letters, digits, underscores and dashes.
pub fn validate_env_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(GscError::Validation(format!(
            "Environment name \"{}\" is invalid. It may only contain letters, numbers, underscores and dashes.",
            name
        )))
    }
}

fn env_key(name: &str) -> String {
    format!("{}{}", ENV_KEY_PREFIX, name.replace('-', "."))
}

/// Dotenv-backed store of [`Env`] records.
#[derive(Debug)]
pub struct EnvStore {
    path: PathBuf,
    entries: Vec<(String, String)>,
}

impl EnvStore {
    /// `$GSC_CONFIG_DIR/environments.env`, else `<config dir>/gsc/environments.env`.
    pub fn default_path() -> Result<PathBuf> {
        if let Some(dir) = std::env::var_os(CONFIG_DIR_VAR).filter(|d| !d.is_empty()) {
            return Ok(PathBuf::from(dir).join(ENV_FILE_NAME));
        }
        dirs::config_dir()
            .map(|dir| dir.join("gsc").join(ENV_FILE_NAME))
            .ok_or_else(|| {
                GscError::Config(format!(
                    "Cannot locate a configuration directory, set {}",
                    CONFIG_DIR_VAR
                ))
            })
    }

    /// Load the store at `path`; a missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut entries = Vec::new();

        if path.exists() {
            // from_path and friends write into the process environment; the store
            // only needs the parsed pairs.
            #[allow(deprecated)]
            let iter = dotenv::from_path_iter(&path).map_err(|e| {
                GscError::Config(format!("Cannot read {}: {}", path.display(), e))
            })?;
            for item in iter {
                let (key, value) = item.map_err(|e| {
                    GscError::Config(format!("Malformed line in {}: {}", path.display(), e))
                })?;
                entries.push((key, value));
            }
        }
        debug!("Loaded {} config entries from {}", entries.len(), path.display());

        Ok(Self { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn value(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn set_value(&mut self, key: String, value: String) {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    fn remove_value(&mut self, key: &str) {
        self.entries.retain(|(k, _)| k != key);
    }

    /// All environments, in file order.
    pub fn envs(&self) -> Vec<Env> {
        self.entries
            .iter()
            .filter(|(key, value)| key.starts_with(ENV_KEY_PREFIX) && !value.is_empty())
            .filter_map(|(key, value)| match serde_json::from_str::<Env>(value) {
                Ok(env) => Some(env),
                Err(e) => {
                    warn!("Ignoring unreadable environment entry {}: {}", key, e);
                    None
                }
            })
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<Env> {
        let raw = self.value(&env_key(name))?;
        serde_json::from_str(raw).ok()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Create or replace an environment. The first one becomes the default.
    pub fn upsert(&mut self, env: Env) -> Result<()> {
        validate_env_name(&env.name)?;
        let json = serde_json::to_string(&env)
            .map_err(|e| GscError::Config(format!("Cannot encode environment: {}", e)))?;
        if json.contains('\'') {
            return Err(GscError::Validation(
                "Host name and token must not contain single quotes".to_string(),
            ));
        }

        if self.envs().is_empty() {
            self.set_value(DEFAULT_ENV.to_string(), env.name.clone());
        }
        self.set_value(env_key(&env.name), json);
        self.save()
    }

    /// Remove an environment, promoting the first remaining one if it was the default.
    pub fn remove(&mut self, name: &str) -> Result<bool> {
        if !self.contains(name) {
            return Ok(false);
        }
        let was_default = self.is_default(name);
        self.remove_value(&env_key(name));

        if was_default {
            match self.envs().first() {
                Some(next) => self.set_value(DEFAULT_ENV.to_string(), next.name.clone()),
                None => self.remove_value(DEFAULT_ENV),
            }
        }
        self.save()?;
        Ok(true)
    }

    pub fn default_env(&self) -> Option<Env> {
        self.value(DEFAULT_ENV).and_then(|name| self.get(name))
    }

    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.contains(name) {
            return Err(GscError::Config(format!(
                "\"{}\" is not existed in your environment list.",
                name
            )));
        }
        self.set_value(DEFAULT_ENV.to_string(), name.to_string());
        self.save()
    }

    pub fn is_default(&self, name: &str) -> bool {
        self.value(DEFAULT_ENV) == Some(name)
    }

    /// Pick the environment for this invocation: the named one, else the default.
    pub fn resolve(&self, requested: Option<&str>) -> Result<Env> {
        match requested {
            Some(name) => self.get(name).ok_or_else(|| {
                GscError::Config(format!(
                    "\"{}\" is not existed in your environment list.\nTry `gsc env --new <environment_name>` before searching.",
                    name
                ))
            }),
            None => self.default_env().ok_or_else(|| {
                GscError::Config(
                    "There is no environment.\nTry `gsc env --new <environment_name>` before searching."
                        .to_string(),
                )
            }),
        }
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("env.tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            for (key, value) in &self.entries {
                if key == SESSION_ENV {
                    continue;
                }
                writeln!(file, "{}='{}'", key, value)?;
            }
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        debug!("Saved environments to {}", self.path.display());
        Ok(())
    }
}

/// What a search run covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchTarget {
    /// One project or repository.
    Scope(ScopeId),
    /// Every scope of a group or owner; `None` means the caller's own scopes.
    Group(Option<String>),
}

impl SearchTarget {
    pub fn is_multi_scope(&self) -> bool {
        matches!(self, SearchTarget::Group(_))
    }
}

/// Everything one search invocation needs, resolved up front by the CLI.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub env: Env,
    pub keyword: String,
    pub target: SearchTarget,
    pub output_path: Option<PathBuf>,
    pub code_preview: bool,
    pub ignore_no_result: bool,
    pub debug: bool,
    /// Size of the worker pool and of the per-scope concurrency bound.
    pub workers: usize,
}
