use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a single social post row.
///
/// `pending` → `queued` → `processing` → `published` | `failed`. Posts that
/// belong to a carousel stay `pending` while their group collects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    Pending,
    Processing,
    Queued,
    Published,
    Failed,
}

impl PostStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            PostStatus::Pending => "pending",
            PostStatus::Processing => "processing",
            PostStatus::Queued => "queued",
            PostStatus::Published => "published",
            PostStatus::Failed => "failed",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PostStatus::Pending),
            "processing" => Some(PostStatus::Processing),
            "queued" => Some(PostStatus::Queued),
            "published" => Some(PostStatus::Published),
            "failed" => Some(PostStatus::Failed),
            _ => None,
        }
    }

    /// Terminal statuses are never revisited by the engine.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, PostStatus::Published)
    }
}

impl std::fmt::Display for PostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a carousel group.
///
/// `collecting` → `queued` → `publishing` → `published` | `failed`. The
/// `collecting` → `queued` transition happens at most once per group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupStatus {
    Collecting,
    Queued,
    Publishing,
    Published,
    Failed,
}

impl GroupStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            GroupStatus::Collecting => "collecting",
            GroupStatus::Queued => "queued",
            GroupStatus::Publishing => "publishing",
            GroupStatus::Published => "published",
            GroupStatus::Failed => "failed",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "collecting" => Some(GroupStatus::Collecting),
            "queued" => Some(GroupStatus::Queued),
            "publishing" => Some(GroupStatus::Publishing),
            "published" => Some(GroupStatus::Published),
            "failed" => Some(GroupStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for GroupStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An approved forum post handed to the dispatcher by the forum layer.
///
/// The forum's own tables are not ours; this is the complete contract
/// between the two systems.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovedPost {
    pub forum_post_id: i64,
    /// School the post was published under; `None` for district-level posts.
    pub school_id: Option<i64>,
    /// Cross-school announcements fan out to every active account.
    pub cross_school_announcement: bool,
    pub title: String,
    pub body: String,
}

impl ApprovedPost {
    /// Scope rule for account matching: school-specific accounts require a
    /// matching school, network-wide accounts (no school) take district
    /// posts, and cross-school announcements match everything.
    #[must_use]
    pub fn matches_account_scope(&self, account_school_id: Option<i64>) -> bool {
        self.cross_school_announcement || account_school_id == self.school_id
    }
}

/// Output of a successful content render for one post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreparedContent {
    /// Storage reference for the rendered image (opaque to the engine).
    pub image_ref: String,
    /// Full caption used when the post publishes on its own.
    pub caption: String,
    /// Short per-item body used inside a combined carousel caption.
    pub caption_fragment: String,
}

/// Next publish slot for a scheduled-trigger account: today at
/// `schedule_hour` if that is still ahead, otherwise tomorrow.
///
/// `schedule_hour` must already be validated into `0..=23`
/// (see [`crate::accounts::validate_account`]).
#[must_use]
pub fn next_publish_time(schedule_hour: i16, now: DateTime<Utc>) -> DateTime<Utc> {
    #[allow(clippy::cast_sign_loss)]
    let hour = u32::from(schedule_hour.clamp(0, 23) as u16);

    let today_slot = now
        .date_naive()
        .and_hms_opt(hour, 0, 0)
        .expect("validated hour is always in range")
        .and_utc();

    if today_slot > now {
        today_slot
    } else {
        today_slot + Duration::days(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, h, m, 0).unwrap()
    }

    #[test]
    fn next_publish_time_later_today() {
        let slot = next_publish_time(18, at(9, 30));
        assert_eq!(slot, at(18, 0));
    }

    #[test]
    fn next_publish_time_rolls_to_tomorrow_when_past() {
        let slot = next_publish_time(18, at(19, 5));
        assert_eq!(slot, Utc.with_ymd_and_hms(2026, 3, 11, 18, 0, 0).unwrap());
    }

    #[test]
    fn next_publish_time_exact_hour_rolls_over() {
        // A post approved exactly at the slot goes to tomorrow's carousel.
        let slot = next_publish_time(18, at(18, 0));
        assert_eq!(slot, Utc.with_ymd_and_hms(2026, 3, 11, 18, 0, 0).unwrap());
    }

    #[test]
    fn scope_matching() {
        let post = ApprovedPost {
            forum_post_id: 1,
            school_id: Some(12),
            cross_school_announcement: false,
            title: "Robotics finals".to_string(),
            body: "We made it!".to_string(),
        };
        assert!(post.matches_account_scope(Some(12)));
        assert!(!post.matches_account_scope(Some(13)));
        assert!(!post.matches_account_scope(None));
    }

    #[test]
    fn announcements_match_every_scope() {
        let post = ApprovedPost {
            forum_post_id: 2,
            school_id: None,
            cross_school_announcement: true,
            title: "Snow day".to_string(),
            body: "All schools closed.".to_string(),
        };
        assert!(post.matches_account_scope(Some(12)));
        assert!(post.matches_account_scope(None));
    }

    #[test]
    fn post_status_round_trips() {
        for s in [
            PostStatus::Pending,
            PostStatus::Processing,
            PostStatus::Queued,
            PostStatus::Published,
            PostStatus::Failed,
        ] {
            assert_eq!(PostStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(PostStatus::parse("archived"), None);
    }

    #[test]
    fn group_status_round_trips() {
        for s in [
            GroupStatus::Collecting,
            GroupStatus::Queued,
            GroupStatus::Publishing,
            GroupStatus::Published,
            GroupStatus::Failed,
        ] {
            assert_eq!(GroupStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(GroupStatus::parse("draft"), None);
    }
}
