use crate::error::{EtlError, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "etl.toml";

/// What to do with a student whose contact_info cannot be decomposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactPolicy {
    /// Fail the whole run before anything is written.
    #[default]
    AbortBatch,
    /// Drop the student from this batch; it is re-extracted next run.
    RejectRecord,
}

impl std::str::FromStr for ContactPolicy {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "abort_batch" => Ok(ContactPolicy::AbortBatch),
            "reject_record" => Ok(ContactPolicy::RejectRecord),
            other => Err(EtlError::Config(format!(
                "unknown contact policy '{other}' (expected abort_batch or reject_record)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub dir: PathBuf,
    pub file_level: String,
    pub console_level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("log"),
            file_level: "debug".to_string(),
            console_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EtlConfig {
    pub dev_db: PathBuf,
    pub build_db: PathBuf,
    pub analytics_csv: PathBuf,
    pub contact_policy: ContactPolicy,
    pub logging: LoggingConfig,
}

impl Default for EtlConfig {
    fn default() -> Self {
        Self {
            dev_db: PathBuf::from("dev/cademycode.db"),
            build_db: PathBuf::from("build/cademycode_build.db"),
            analytics_csv: PathBuf::from("build/cademycode_build.csv"),
            contact_policy: ContactPolicy::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl EtlConfig {
    /// Defaults, then the TOML file, then `CADEMY_*` environment overrides.
    ///
    /// An explicit `path` must exist; without one, `etl.toml` is read only if present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            EtlError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("CADEMY_DEV_DB") {
            self.dev_db = PathBuf::from(v);
        }
        if let Some(v) = lookup("CADEMY_BUILD_DB") {
            self.build_db = PathBuf::from(v);
        }
        if let Some(v) = lookup("CADEMY_ANALYTICS_CSV") {
            self.analytics_csv = PathBuf::from(v);
        }
        if let Some(v) = lookup("CADEMY_LOG_DIR") {
            self.logging.dir = PathBuf::from(v);
        }
    }
}
