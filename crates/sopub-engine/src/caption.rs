//! Combined caption assembly for carousel publishes.
//!
//! Assembled exactly once per publish attempt, for the whole member set,
//! before the platform call — never re-derived per member afterwards.

use sopub_db::AccountRow;

/// Inputs for one combined caption.
#[derive(Debug, Clone, Default)]
pub struct CaptionParts<'a> {
    pub header: Option<&'a str>,
    /// Per-item bodies, in carousel position order.
    pub fragments: Vec<&'a str>,
    pub footer: Option<&'a str>,
    pub hashtags: &'a [String],
}

impl<'a> CaptionParts<'a> {
    /// Caption parts for an account's carousel: header/footer/hashtags from
    /// the account config, fragments from the members (position order).
    #[must_use]
    pub fn for_account(account: &'a AccountRow, fragments: Vec<&'a str>) -> Self {
        Self {
            header: account.caption_header.as_deref(),
            fragments,
            footer: account.caption_footer.as_deref(),
            hashtags: &account.hashtags,
        }
    }
}

/// Assembles the combined caption: header, numbered per-item bodies,
/// footer, hashtags — blank-line separated, omitting absent sections.
#[must_use]
pub fn assemble_carousel_caption(parts: &CaptionParts<'_>) -> String {
    let mut sections: Vec<String> = Vec::new();

    if let Some(header) = parts.header {
        if !header.trim().is_empty() {
            sections.push(header.trim().to_owned());
        }
    }

    if !parts.fragments.is_empty() {
        let body = parts
            .fragments
            .iter()
            .enumerate()
            .map(|(i, fragment)| format!("{}. {}", i + 1, fragment.trim()))
            .collect::<Vec<_>>()
            .join("\n");
        sections.push(body);
    }

    if let Some(footer) = parts.footer {
        if !footer.trim().is_empty() {
            sections.push(footer.trim().to_owned());
        }
    }

    if !parts.hashtags.is_empty() {
        sections.push(parts.hashtags.join(" "));
    }

    sections.join("\n\n")
}
