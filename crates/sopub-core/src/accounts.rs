use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// How an account turns approved forum posts into platform publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    /// Publish each post on its own, as soon as it is rendered.
    Immediate,
    /// Accumulate posts and publish them as one carousel at a fixed hour.
    Scheduled,
    /// Accumulate posts and publish a carousel once `batch_size` is reached.
    BatchCount,
}

impl TriggerType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            TriggerType::Immediate => "immediate",
            TriggerType::Scheduled => "scheduled",
            TriggerType::BatchCount => "batch_count",
        }
    }

    /// Parse the database representation back into a variant.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "immediate" => Some(TriggerType::Immediate),
            "scheduled" => Some(TriggerType::Scheduled),
            "batch_count" => Some(TriggerType::BatchCount),
            _ => None,
        }
    }
}

impl std::fmt::Display for TriggerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Disabled,
    Error,
}

impl AccountStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Disabled => "disabled",
            AccountStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_batch_size() -> i32 {
    1
}

fn default_status() -> AccountStatus {
    AccountStatus::Active
}

/// One destination account as declared in `config/accounts.yaml`.
///
/// Accounts are admin-managed; the engine only reads them. `school_id` is
/// `None` for network-wide accounts that receive every cross-school
/// announcement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSeed {
    pub name: String,
    pub platform: String,
    pub school_id: Option<i64>,
    pub trigger: TriggerType,
    #[serde(default = "default_batch_size")]
    pub batch_size: i32,
    pub schedule_hour: Option<i16>,
    pub default_template_id: i64,
    #[serde(default = "default_status")]
    pub status: AccountStatus,
    pub caption_header: Option<String>,
    pub caption_footer: Option<String>,
    #[serde(default)]
    pub hashtags: Vec<String>,
}

impl AccountSeed {
    /// Generate a URL-safe slug from the account name.
    #[must_use]
    pub fn slug(&self) -> String {
        self.name
            .to_lowercase()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' {
                    c
                } else if c == ' ' {
                    '-'
                } else {
                    '\0'
                }
            })
            .filter(|&c| c != '\0')
            .collect::<String>()
            .split('-')
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("-")
    }
}

#[derive(Debug, Deserialize)]
pub struct AccountsFile {
    pub accounts: Vec<AccountSeed>,
}

/// Load and validate the accounts configuration from a YAML file.
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read, parsed, or fails validation.
pub fn load_accounts(path: &Path) -> Result<AccountsFile, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::AccountsFileIo {
        path: path.display().to_string(),
        source: e,
    })?;

    let accounts_file: AccountsFile = serde_yaml::from_str(&content)?;

    validate_accounts(&accounts_file)?;

    Ok(accounts_file)
}

fn validate_accounts(accounts_file: &AccountsFile) -> Result<(), ConfigError> {
    let mut seen_slugs = HashSet::new();

    for account in &accounts_file.accounts {
        validate_account(account)?;

        if !seen_slugs.insert(account.slug()) {
            return Err(ConfigError::Validation(format!(
                "duplicate account slug: {}",
                account.slug()
            )));
        }
    }

    Ok(())
}

/// Validate a single account's trigger configuration.
///
/// Rejected combinations never reach the engine: a `batch_count` account with
/// `batch_size = 1` must be configured as `immediate` instead, and a
/// `scheduled` account must name its publish hour.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] describing the offending account.
pub fn validate_account(account: &AccountSeed) -> Result<(), ConfigError> {
    if account.name.trim().is_empty() {
        return Err(ConfigError::Validation(
            "account name must be non-empty".to_string(),
        ));
    }

    if account.platform.trim().is_empty() {
        return Err(ConfigError::Validation(format!(
            "account '{}': platform must be non-empty",
            account.name
        )));
    }

    if account.default_template_id <= 0 {
        return Err(ConfigError::Validation(format!(
            "account '{}': default_template_id is mandatory",
            account.name
        )));
    }

    if account.batch_size < 1 {
        return Err(ConfigError::Validation(format!(
            "account '{}': batch_size must be >= 1",
            account.name
        )));
    }

    match account.trigger {
        TriggerType::Immediate => {}
        TriggerType::Scheduled => {
            let Some(hour) = account.schedule_hour else {
                return Err(ConfigError::Validation(format!(
                    "account '{}': scheduled trigger requires schedule_hour",
                    account.name
                )));
            };
            if !(0..=23).contains(&hour) {
                return Err(ConfigError::Validation(format!(
                    "account '{}': schedule_hour must be in 0..=23, got {hour}",
                    account.name
                )));
            }
        }
        TriggerType::BatchCount => {
            if account.batch_size < 2 {
                return Err(ConfigError::Validation(format!(
                    "account '{}': batch_count with batch_size 1 must use the immediate trigger",
                    account.name
                )));
            }
        }
    }

    Ok(())
}
