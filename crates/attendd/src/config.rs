use attend_core::matcher::{DEFAULT_ENCODING_DIM, DEFAULT_MATCH_THRESHOLD};
use attend_core::{Calendar, FaceMatcher, MatcherConfigError};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("bad config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("UTC offset {0} minutes is out of range")]
    InvalidOffset(i32),
    #[error(transparent)]
    Matcher(#[from] MatcherConfigError),
}

/// Daemon configuration.
///
/// Built from defaults, then an optional TOML file named by `ATTEND_CONFIG`,
/// then `ATTEND_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the SQLite ledger.
    pub db_path: PathBuf,
    /// Root directory for evidence images.
    pub evidence_dir: PathBuf,
    /// Maximum Euclidean distance accepted as a match (inclusive).
    pub match_threshold: f64,
    /// Expected encoding dimension.
    pub encoding_dim: usize,
    /// Upper bound on a caller-supplied capture step.
    pub capture_timeout_secs: u64,
    /// Reference timezone for work dates, minutes east of UTC.
    pub utc_offset_minutes: i32,
    /// Serve on the session bus instead of the system bus (development).
    pub session_bus: bool,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("attend");

        Self {
            db_path: data_dir.join("attendance.db"),
            evidence_dir: data_dir.join("evidence"),
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            encoding_dim: DEFAULT_ENCODING_DIM,
            capture_timeout_secs: 10,
            utc_offset_minutes: 0,
            session_bus: false,
        }
    }
}

impl Config {
    /// Load configuration from the optional file and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var_os("ATTEND_CONFIG") {
            Some(path) => {
                let path = PathBuf::from(path);
                let text = std::fs::read_to_string(&path)
                    .map_err(|source| ConfigError::Read { path: path.clone(), source })?;
                tracing::info!(path = %path.display(), "loaded config file");
                Self::from_toml(&text)?
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Overlay `ATTEND_*` values. Unparseable values are ignored with a warning.
    pub fn apply_overrides(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(v) = get("ATTEND_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        if let Some(v) = get("ATTEND_EVIDENCE_DIR") {
            self.evidence_dir = PathBuf::from(v);
        }
        override_parsed(&get, "ATTEND_MATCH_THRESHOLD", &mut self.match_threshold);
        override_parsed(&get, "ATTEND_ENCODING_DIM", &mut self.encoding_dim);
        override_parsed(&get, "ATTEND_CAPTURE_TIMEOUT_SECS", &mut self.capture_timeout_secs);
        override_parsed(&get, "ATTEND_UTC_OFFSET_MINUTES", &mut self.utc_offset_minutes);
        if let Some(v) = get("ATTEND_SESSION_BUS") {
            self.session_bus = v != "0";
        }
    }

    pub fn matcher(&self) -> Result<FaceMatcher, ConfigError> {
        Ok(FaceMatcher::new(self.match_threshold, self.encoding_dim)?)
    }

    pub fn calendar(&self) -> Result<Calendar, ConfigError> {
        Calendar::from_offset_minutes(self.utc_offset_minutes)
            .ok_or(ConfigError::InvalidOffset(self.utc_offset_minutes))
    }

    pub fn capture_timeout(&self) -> Duration {
        Duration::from_secs(self.capture_timeout_secs)
    }
}

fn override_parsed<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) {
    let Some(raw) = get(key) else {
        return;
    };
    match raw.parse() {
        Ok(v) => *slot = v,
        Err(_) => tracing::warn!(key, value = %raw, "ignoring unparseable config override"),
    }
}
