use super::accounts::*;
use crate::ConfigError;

fn base_account(name: &str) -> AccountSeed {
    AccountSeed {
        name: name.to_string(),
        platform: "instagram".to_string(),
        school_id: Some(12),
        trigger: TriggerType::Immediate,
        batch_size: 1,
        schedule_hour: None,
        default_template_id: 3,
        status: AccountStatus::Active,
        caption_header: None,
        caption_footer: None,
        hashtags: vec![],
    }
}

#[test]
fn slug_simple_name() {
    let account = base_account("North High Robotics");
    assert_eq!(account.slug(), "north-high-robotics");
}

#[test]
fn slug_special_characters() {
    let account = base_account("St. Mary's Falcons");
    assert_eq!(account.slug(), "st-marys-falcons");
}

#[test]
fn immediate_account_is_valid() {
    assert!(validate_account(&base_account("ok")).is_ok());
}

#[test]
fn scheduled_account_requires_hour() {
    let mut account = base_account("evening digest");
    account.trigger = TriggerType::Scheduled;
    account.schedule_hour = None;

    let result = validate_account(&account);
    assert!(
        matches!(result, Err(ConfigError::Validation(ref msg)) if msg.contains("schedule_hour")),
        "expected schedule_hour validation error, got: {result:?}"
    );

    account.schedule_hour = Some(18);
    assert!(validate_account(&account).is_ok());
}

#[test]
fn scheduled_hour_out_of_range_is_rejected() {
    let mut account = base_account("late digest");
    account.trigger = TriggerType::Scheduled;
    account.schedule_hour = Some(24);

    let result = validate_account(&account);
    assert!(
        matches!(result, Err(ConfigError::Validation(ref msg)) if msg.contains("0..=23")),
        "expected range validation error, got: {result:?}"
    );
}

#[test]
fn batch_count_of_one_is_rejected() {
    let mut account = base_account("weekly roundup");
    account.trigger = TriggerType::BatchCount;
    account.batch_size = 1;

    let result = validate_account(&account);
    assert!(
        matches!(result, Err(ConfigError::Validation(ref msg)) if msg.contains("immediate")),
        "expected batch_size validation error, got: {result:?}"
    );

    account.batch_size = 3;
    assert!(validate_account(&account).is_ok());
}

#[test]
fn missing_template_is_rejected() {
    let mut account = base_account("no template");
    account.default_template_id = 0;

    let result = validate_account(&account);
    assert!(
        matches!(result, Err(ConfigError::Validation(ref msg)) if msg.contains("default_template_id")),
        "expected template validation error, got: {result:?}"
    );
}

#[test]
fn accounts_yaml_parses_with_defaults() {
    let yaml = r##"
accounts:
  - name: North High Robotics
    platform: instagram
    school_id: 12
    trigger: immediate
    default_template_id: 3
  - name: District Digest
    platform: instagram
    trigger: scheduled
    schedule_hour: 18
    default_template_id: 3
    hashtags: ["#district", "#news"]
"##;
    let file: AccountsFile = serde_yaml::from_str(yaml).expect("yaml should parse");
    assert_eq!(file.accounts.len(), 2);
    assert_eq!(file.accounts[0].batch_size, 1);
    assert_eq!(file.accounts[0].status, AccountStatus::Active);
    assert!(file.accounts[1].school_id.is_none());
    assert_eq!(file.accounts[1].hashtags.len(), 2);
}

#[test]
fn trigger_type_round_trips_through_db_strings() {
    for trigger in [
        TriggerType::Immediate,
        TriggerType::Scheduled,
        TriggerType::BatchCount,
    ] {
        assert_eq!(TriggerType::parse(trigger.as_str()), Some(trigger));
    }
    assert_eq!(TriggerType::parse("hourly"), None);
}
