use std::{
    env,
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::config::{Config, Settings};

pub trait ConfigService: Send + Sync {
    fn port(&self) -> u16;
    fn values(&self) -> &Config;
}

pub struct ConfigServiceImpl {
    config: Arc<Config>,
}

impl ConfigServiceImpl {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

impl ConfigService for ConfigServiceImpl {
    fn port(&self) -> u16 {
        self.config.port
    }

    fn values(&self) -> &Config {
        &self.config
    }
}

/// Outcome of looking for a `.env` file. Built before tracing is up, so it
/// is logged afterwards with [`EnvFile::log`].
#[derive(Debug)]
pub enum EnvFile {
    Loaded(PathBuf),
    Missing(PathBuf),
    Unreadable { path: PathBuf, error: dotenvy::Error },
    NoWorkingDir(std::io::Error),
}

impl EnvFile {
    pub fn log(&self) {
        match self {
            Self::Loaded(path) => tracing::debug!(path = %path.display(), "loaded .env"),
            Self::Missing(path) => tracing::debug!(path = %path.display(), "no .env file"),
            Self::Unreadable { path, error } => {
                tracing::warn!(path = %path.display(), error = %error, "ignoring unreadable .env file")
            }
            Self::NoWorkingDir(err) => {
                tracing::warn!(error = %err, "cannot resolve working directory, skipping .env")
            }
        }
    }
}

/// Loads `<dir>/.env` into the process environment. Variables already set
/// in the environment are left untouched.
pub fn load_env_file_from(dir: &Path) -> EnvFile {
    let path = dir.join(".env");
    match dotenvy::from_path(&path) {
        Ok(()) => EnvFile::Loaded(path),
        Err(err) if err.not_found() => EnvFile::Missing(path),
        Err(error) => EnvFile::Unreadable { path, error },
    }
}

pub fn load_env_file() -> EnvFile {
    match env::current_dir() {
        Ok(dir) => load_env_file_from(&dir),
        Err(err) => EnvFile::NoWorkingDir(err),
    }
}

/// Snapshot of the process environment. Never fails.
pub fn load_settings() -> Settings {
    Settings::from_lookup(|key| env::var(key).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn missing_env_file_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(load_env_file_from(dir.path()), EnvFile::Missing(_)));

        let settings = load_settings();
        assert_eq!(settings.database_url, env::var("DATABASE_URL").ok());
    }

    #[test]
    fn present_env_file_feeds_the_environment() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(".env"),
            "AUTH_SERVICE_TEST_FROM_FILE=from-file\n",
        )
        .unwrap();

        let outcome = load_env_file_from(dir.path());
        assert!(matches!(outcome, EnvFile::Loaded(ref path) if path == &dir.path().join(".env")));
        assert_eq!(
            env::var("AUTH_SERVICE_TEST_FROM_FILE").as_deref(),
            Ok("from-file")
        );
    }

    #[test]
    fn process_environment_wins_over_env_file() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(".env"),
            "AUTH_SERVICE_TEST_PRECEDENCE=from-file\n",
        )
        .unwrap();
        env::set_var("AUTH_SERVICE_TEST_PRECEDENCE", "from-process");

        assert!(matches!(load_env_file_from(dir.path()), EnvFile::Loaded(_)));
        assert_eq!(
            env::var("AUTH_SERVICE_TEST_PRECEDENCE").as_deref(),
            Ok("from-process")
        );
    }

    #[test]
    fn malformed_env_file_is_reported_and_loading_goes_on() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(".env"), "NOT A VALID LINE\n").unwrap();

        assert!(matches!(
            load_env_file_from(dir.path()),
            EnvFile::Unreadable { .. }
        ));
        let _ = load_settings();
    }

    #[test]
    fn config_service_exposes_port() {
        let settings = Settings {
            port: Some("4000".to_string()),
            database_url: Some("postgres://localhost/auth".to_string()),
            jwt_access_secret: Some("a".to_string()),
            jwt_refresh_secret: Some("r".to_string()),
            ..Settings::default()
        };
        let service = ConfigServiceImpl::new(settings.validate().unwrap());
        assert_eq!(service.port(), 4000);
        assert_eq!(service.values().jwt_access_secret, "a");
    }
}
