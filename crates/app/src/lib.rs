//! Tally App
//!
//! Initialization shared by Tally binaries (logging and settings), the
//! `tallyd` daemon wiring, and the `tallyctl` client.

pub mod config;
pub mod ctl;
pub mod daemon;
pub mod rpc;

pub use config::TallySettings;
pub use ctl::{DaemonStatus, TallyClient};
pub use rpc::TallyRpc;

use std::path::Path;

use serde::{de::DeserializeOwned, Serialize};
use tally_logging::LogLevel;
use tally_settings::{Settings, SettingsError};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Initialization failed: {0}")]
    InitError(String),
    #[error("Settings error: {0}")]
    SettingsError(#[from] SettingsError),
    #[error("Store error: {0}")]
    StoreError(#[from] tally_store::StoreError),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("IPC error: {0}")]
    IpcError(#[from] tally_ipc::IpcError),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Application type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppType {
    Cli,
    Daemon,
}

impl AppType {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Cli => "CLI",
            Self::Daemon => "Daemon",
        }
    }
}

/// Initialized application context
pub struct App<T> {
    pub service: String,
    pub app_type: AppType,
    pub settings: Settings<T>,
}

/// Builder for constructing an App with configurable options.
pub struct AppBuilder<T> {
    service: String,
    app_type: AppType,
    log_level: LogLevel,
    skip_logging: bool,
    skip_banner: bool,
    config_path: Option<String>,
    _phantom: std::marker::PhantomData<T>,
}

impl<T: Serialize + DeserializeOwned + Default> AppBuilder<T> {
    pub fn new(service: &str) -> Self {
        Self {
            service: service.to_string(),
            app_type: AppType::Cli,
            log_level: LogLevel::Info,
            skip_logging: false,
            skip_banner: false,
            config_path: None,
            _phantom: std::marker::PhantomData,
        }
    }

    pub fn app_type(mut self, app_type: AppType) -> Self {
        self.app_type = app_type;
        self
    }

    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.log_level = LogLevel::from_verbose(verbose);
        self
    }

    pub fn skip_logging(mut self) -> Self {
        self.skip_logging = true;
        self
    }

    pub fn skip_banner(mut self) -> Self {
        self.skip_banner = true;
        self
    }

    pub fn config_path(mut self, path: &str) -> Self {
        self.config_path = Some(path.to_string());
        self
    }

    pub fn build(self) -> Result<App<T>, AppError> {
        if !self.skip_logging {
            let _ = tally_logging::try_init(self.log_level);
        }

        let config_path = self.config_path.as_deref().map(Path::new);
        let settings = Settings::load_or_default(&self.service, config_path)?;

        if !self.skip_banner {
            info!(
                "{} {} ({}) starting, settings at {}",
                self.service,
                env!("CARGO_PKG_VERSION"),
                self.app_type.name(),
                settings.path().display(),
            );
        }

        Ok(App {
            service: self.service,
            app_type: self.app_type,
            settings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_type_name() {
        assert_eq!(AppType::Cli.name(), "CLI");
        assert_eq!(AppType::Daemon.name(), "Daemon");
    }

    #[test]
    fn test_app_builder_creates_default_settings() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("settings.json");

        let app: App<TallySettings> = AppBuilder::new("tallyd-test")
            .app_type(AppType::Daemon)
            .skip_logging()
            .skip_banner()
            .config_path(config_path.to_str().unwrap())
            .build()
            .unwrap();

        assert_eq!(app.service, "tallyd-test");
        assert_eq!(app.app_type, AppType::Daemon);
        assert_eq!(app.settings.config, TallySettings::default());
        assert!(config_path.exists());
    }
}
