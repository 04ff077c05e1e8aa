use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use time::UtcOffset;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite connection url
    pub database_url: String,
    pub host: String,
    pub port: u16,
    /// Directory for daily rolling log files, stdout when unset
    pub log_dir: Option<PathBuf>,
    /// Reported by the health check
    pub environment: String,
    /// Lifetime of issued access tokens
    pub token_ttl_days: i64,
    /// Offset used to decide calendar days for study streaks
    pub utc_offset_hours: i8,
    #[serde(skip_serializing)]
    pub jwt_secret: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite://database/vocab.db?mode=rwc".to_string(),
            host: "127.0.0.1".to_string(),
            port: 4000,
            log_dir: None,
            environment: "development".to_string(),
            token_ttl_days: 30,
            utc_offset_hours: 0,
            jwt_secret: String::new(),
        }
    }
}

impl Config {
    /// Reads the TOML file if given, then takes `JWT_SECRET` from the
    /// environment (or a `.env` file) when it is set there.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("read config {}", path.display()))?;
                toml::from_str(&text).with_context(|| format!("parse config {}", path.display()))?
            }
            None => Config::default(),
        };
        let _ = dotenvy::dotenv();
        if let Ok(secret) = dotenvy::var("JWT_SECRET") {
            config.jwt_secret = secret;
        }
        if config.jwt_secret.is_empty() {
            anyhow::bail!("JWT_SECRET is not set");
        }
        if !(-12..=14).contains(&config.utc_offset_hours) {
            anyhow::bail!(
                "utc_offset_hours must be between -12 and 14, got {}",
                config.utc_offset_hours
            );
        }
        Ok(config)
    }

    pub fn utc_offset(&self) -> UtcOffset {
        UtcOffset::from_hms(self.utc_offset_hours, 0, 0).unwrap_or(UtcOffset::UTC)
    }

    pub fn token_ttl(&self) -> time::Duration {
        time::Duration::days(self.token_ttl_days)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "port = 8088\nutc_offset_hours = 8\njwt_secret = \"from-file\""
        )
        .unwrap();
        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.port, 8088);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.token_ttl_days, 30);
        assert_eq!(config.utc_offset().whole_hours(), 8);
    }

    #[test]
    fn out_of_range_offset_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "utc_offset_hours = 20\njwt_secret = \"from-file\"").unwrap();
        let err = Config::load(Some(file.path())).unwrap_err();
        assert!(err.to_string().contains("utc_offset_hours"), "{err}");
    }

    #[test]
    fn bad_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "port = \"not a number\"").unwrap();
        assert!(Config::load(Some(file.path())).is_err());
    }
}
