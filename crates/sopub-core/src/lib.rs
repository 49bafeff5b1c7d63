pub mod accounts;
pub mod app_config;
mod config;
pub mod domain;

#[cfg(test)]
mod accounts_test;

pub use accounts::{load_accounts, AccountSeed, AccountStatus, AccountsFile, TriggerType};
pub use app_config::{AppConfig, Environment};
pub use config::{load_app_config, load_app_config_from_env};
pub use domain::{next_publish_time, ApprovedPost, GroupStatus, PostStatus, PreparedContent};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for environment variable {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },

    #[error("failed to read accounts file {path}: {source}")]
    AccountsFileIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse accounts file: {0}")]
    AccountsFileParse(#[from] serde_yaml::Error),

    #[error("account config validation failed: {0}")]
    Validation(String),
}
