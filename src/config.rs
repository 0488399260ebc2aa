use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::prelude::*;

pub const DEFAULT_CONFIG_PATH: &str = "on-repeat.toml";

/// The recently-played endpoint refuses to return more than this many items per request.
pub const MAX_HISTORY_LIMIT: usize = 50;

#[derive(Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub playlist: PlaylistConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub spotify: SpotifyConfig,
}

pub trait Mergeable {
    fn merge(&self, other: &Self) -> Self;
}

impl Config {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, human_errors::Error> {
        let path = path.into();
        let contents = std::fs::read_to_string(&path).wrap_err_as_user(
            format!("We could not read your config file '{}'.", path.display()),
            &[
                "Ensure the file exists and is readable.",
                "Check that you have the necessary permissions to read the file.",
            ],
        )?;

        Self::parse(&contents)
    }

    /// Loads the config file at `path` when one was given explicitly. Otherwise the
    /// default file is used if present, falling back to the built-in defaults.
    pub fn discover(path: Option<&Path>) -> Result<Self, human_errors::Error> {
        match path {
            Some(path) => Self::load(path),
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => Self::load(DEFAULT_CONFIG_PATH),
            None => {
                debug!("No '{DEFAULT_CONFIG_PATH}' found, using the default configuration.");
                Ok(Self::default())
            }
        }
    }

    pub fn parse(contents: &str) -> Result<Self, human_errors::Error> {
        let config: Config = toml::from_str(contents).wrap_err_as_user(
            "Your configuration file could not be loaded.",
            &[
                "Ensure that the file is valid TOML.",
                "Make sure that you are using the correct configuration file format.",
            ],
        )?;

        config.validate()?;
        Ok(config)
    }

    /// Applies `SPOTIFY_*` environment variables on top of the file's Spotify settings.
    pub fn with_env_overrides(mut self) -> Self {
        self.spotify = self.spotify.merge(&SpotifyConfig::from_env());
        self
    }

    fn validate(&self) -> Result<(), human_errors::Error> {
        if self.playlist.size == 0 {
            return Err(human_errors::user(
                "The playlist size in your configuration must be greater than zero.",
                &["Set 'playlist.size' to the number of tracks you want in the playlist (e.g. 30)."],
            ));
        }

        if self.history.limit == 0 || self.history.limit > MAX_HISTORY_LIMIT {
            return Err(human_errors::user(
                format!(
                    "The history limit must be between 1 and {MAX_HISTORY_LIMIT}, but it was set to {}.",
                    self.history.limit
                ),
                &["Update 'history.limit' in your configuration file."],
            ));
        }

        Ok(())
    }
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub backup_dir: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("on-repeat.sqlite"),
            backup_dir: PathBuf::from("backups"),
        }
    }
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Number of recently played items requested per run.
    pub limit: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            limit: MAX_HISTORY_LIMIT,
        }
    }
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct PlaylistConfig {
    pub name: String,
    pub size: usize,
    pub public: bool,
    pub description: Option<String>,
}

impl Default for PlaylistConfig {
    fn default() -> Self {
        Self {
            name: "the better On Repeat".into(),
            size: 30,
            public: true,
            description: Some("Automatically generated based on your most played tracks".into()),
        }
    }
}

#[derive(Clone, Deserialize, Default)]
#[serde(default)]
pub struct RetentionConfig {
    /// When set, play events older than this many days are purged after each ingestion.
    pub days: Option<u32>,
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub cron: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            cron: "*/30 * * * *".into(),
        }
    }
}

impl ScheduleConfig {
    pub fn parse(&self) -> Result<croner::Cron, human_errors::Error> {
        self.cron.parse().wrap_err_as_user(
            format!("The cron schedule '{}' could not be parsed.", self.cron),
            &["Set 'schedule.cron' to a valid cron expression such as '*/30 * * * *'."],
        )
    }
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct SpotifyConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub refresh_token: Option<String>,
    pub api_url: String,
    pub auth_url: String,
    pub token_url: String,
}

impl Default for SpotifyConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            refresh_token: None,
            api_url: "https://api.spotify.com/v1".into(),
            auth_url: "https://accounts.spotify.com/authorize".into(),
            token_url: "https://accounts.spotify.com/api/token".into(),
        }
    }
}

impl SpotifyConfig {
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());

        Self {
            client_id: var("SPOTIFY_CLIENT_ID"),
            client_secret: var("SPOTIFY_CLIENT_SECRET"),
            refresh_token: var("SPOTIFY_REFRESH_TOKEN"),
            ..Default::default()
        }
    }
}

impl Mergeable for SpotifyConfig {
    /// Only the credentials are overridable, endpoints always come from `self`.
    fn merge(&self, other: &Self) -> Self {
        SpotifyConfig {
            client_id: other.client_id.clone().or_else(|| self.client_id.clone()),
            client_secret: other.client_secret.clone().or_else(|| self.client_secret.clone()),
            refresh_token: other.refresh_token.clone().or_else(|| self.refresh_token.clone()),
            api_url: self.api_url.clone(),
            auth_url: self.auth_url.clone(),
            token_url: self.token_url.clone(),
        }
    }
}
