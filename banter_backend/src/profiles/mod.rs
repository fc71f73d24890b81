//! Per-user behavioral profiles, their JSON persistence and AI enrichment.

pub mod enrichment;
pub mod store;

pub use enrichment::{enrich, regenerate_all, should_enrich, EnrichmentAnalysis, RegenerationReport};
pub use store::{ChatReaction, ChatReactionLog, ProfileStore};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Bumped whenever the on-disk layout of profiles or reaction logs changes.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

pub const INTEREST_CAP: usize = 10;
pub const TRAIT_CAP: usize = 5;

fn default_schema_version() -> u32 {
    CURRENT_SCHEMA_VERSION
}

fn default_language() -> String {
    "en".to_string()
}

fn default_unknown() -> String {
    "unknown".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeakingStyle {
    #[serde(default = "default_tone")]
    pub tone: String,
    #[serde(default = "default_medium")]
    pub vocabulary_level: String,
    #[serde(default = "default_emoji_usage")]
    pub emoji_usage: String,
    #[serde(default = "default_medium")]
    pub message_length: String,
    #[serde(default = "default_low")]
    pub typo_frequency: String,
}

fn default_tone() -> String {
    "neutral".to_string()
}

fn default_medium() -> String {
    "medium".to_string()
}

fn default_emoji_usage() -> String {
    "moderate".to_string()
}

fn default_low() -> String {
    "low".to_string()
}

impl Default for SpeakingStyle {
    fn default() -> Self {
        Self {
            tone: default_tone(),
            vocabulary_level: default_medium(),
            emoji_usage: default_emoji_usage(),
            message_length: default_medium(),
            typo_frequency: default_low(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserWeaknesses {
    #[serde(default)]
    pub technical: Vec<String>,
    #[serde(default)]
    pub personal: Vec<String>,
    #[serde(default)]
    pub social: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserPatterns {
    #[serde(default)]
    pub common_mistakes: Vec<String>,
    #[serde(default)]
    pub repeated_behaviors: Vec<String>,
    #[serde(default)]
    pub contradictions: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoastHistory {
    #[serde(default)]
    pub successful_roasts: u64,
    #[serde(default)]
    pub topics_hit: Vec<String>,
    #[serde(default)]
    pub last_roasted: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReactionPatterns {
    /// emoji -> times used
    #[serde(default)]
    pub favorite_reactions: BTreeMap<String, u64>,
    /// positive / negative / thoughtful / neutral -> count
    #[serde(default)]
    pub emotional_responses: BTreeMap<String, u64>,
    /// Kinds of content reacted to, de-duplicated
    #[serde(default)]
    pub reaction_targets: Vec<String>,
    #[serde(default)]
    pub total_reactions: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub user_id: i64,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub first_seen: DateTime<Utc>,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(default)]
    pub message_count: u64,
    #[serde(default)]
    pub chats: Vec<i64>,

    #[serde(default)]
    pub interests: Vec<String>,
    #[serde(default)]
    pub speaking_style: SpeakingStyle,
    #[serde(default = "default_unknown")]
    pub humor_type: String,
    #[serde(default = "default_language")]
    pub language_preference: String,

    #[serde(default)]
    pub weaknesses: UserWeaknesses,
    #[serde(default)]
    pub patterns: UserPatterns,
    #[serde(default)]
    pub embarrassing_moments: Vec<String>,

    #[serde(default)]
    pub roast_history: RoastHistory,
    #[serde(default)]
    pub reaction_patterns: ReactionPatterns,
}

impl UserProfile {
    pub fn new(user_id: i64) -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            user_id,
            username: String::new(),
            first_name: String::new(),
            last_name: String::new(),
            first_seen: Utc::now(),
            last_seen: None,
            message_count: 0,
            chats: Vec::new(),
            interests: Vec::new(),
            speaking_style: SpeakingStyle::default(),
            humor_type: default_unknown(),
            language_preference: default_language(),
            weaknesses: UserWeaknesses::default(),
            patterns: UserPatterns::default(),
            embarrassing_moments: Vec::new(),
            roast_history: RoastHistory::default(),
            reaction_patterns: ReactionPatterns::default(),
        }
    }

    pub fn display_name(&self) -> &str {
        if !self.first_name.is_empty() {
            &self.first_name
        } else if !self.username.is_empty() {
            &self.username
        } else {
            "User"
        }
    }

    /// Compact roast material for the comment prompt; `None` when nothing is known.
    pub fn roast_summary(&self) -> Option<String> {
        let mut parts = Vec::new();

        if !self.weaknesses.technical.is_empty() {
            parts.push(format!(
                "Technical weaknesses: {}",
                join_top(&self.weaknesses.technical, 3)
            ));
        }
        if !self.weaknesses.personal.is_empty() {
            parts.push(format!(
                "Personal traits: {}",
                join_top(&self.weaknesses.personal, 3)
            ));
        }
        if !self.patterns.common_mistakes.is_empty() {
            parts.push(format!(
                "Common mistakes: {}",
                join_top(&self.patterns.common_mistakes, 3)
            ));
        }
        if !self.embarrassing_moments.is_empty() {
            parts.push(format!(
                "Past embarrassments: {}",
                join_top(&self.embarrassing_moments, 2)
            ));
        }

        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n"))
        }
    }

    /// Human-readable overview used by admin tooling and merged context.
    pub fn summary(&self) -> String {
        let mut parts = vec![
            format!("User: {} (@{})", self.first_name, self.username),
            format!("Messages: {}", self.message_count),
            format!("Language: {}", self.language_preference),
        ];

        if !self.interests.is_empty() {
            parts.push(format!("Interests: {}", join_top(&self.interests, 5)));
        }
        if !self.weaknesses.technical.is_empty() {
            parts.push(format!(
                "Technical weaknesses: {}",
                join_top(&self.weaknesses.technical, 3)
            ));
        }
        if !self.weaknesses.personal.is_empty() {
            parts.push(format!(
                "Personal weaknesses: {}",
                join_top(&self.weaknesses.personal, 3)
            ));
        }
        if !self.patterns.common_mistakes.is_empty() {
            parts.push(format!(
                "Common mistakes: {}",
                join_top(&self.patterns.common_mistakes, 3)
            ));
        }

        parts.join("\n")
    }
}

fn join_top(items: &[String], limit: usize) -> String {
    items
        .iter()
        .take(limit)
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Append unseen, non-empty items then keep only the newest `cap` entries.
pub(crate) fn merge_capped(existing: &mut Vec<String>, incoming: &[String], cap: usize) {
    for item in incoming {
        let item = item.trim();
        if item.is_empty() || existing.iter().any(|e| e == item) {
            continue;
        }
        existing.push(item.to_string());
    }
    if existing.len() > cap {
        let overflow = existing.len() - cap;
        existing.drain(..overflow);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn merge_capped_dedupes_and_keeps_newest() {
        let mut list = strings(&["a", "b", "c", "d"]);
        merge_capped(&mut list, &strings(&["b", "e", "", "f", "g"]), 5);
        assert_eq!(list, strings(&["c", "d", "e", "f", "g"]));
    }

    #[test]
    fn roast_summary_limits_each_category() {
        let mut profile = UserProfile::new(7);
        assert!(profile.roast_summary().is_none());

        profile.weaknesses.technical = strings(&["git", "regex", "css", "yaml"]);
        profile.embarrassing_moments = strings(&["one", "two", "three"]);
        let summary = profile.roast_summary().expect("has material");

        assert!(summary.contains("Technical weaknesses: git, regex, css"));
        assert!(!summary.contains("yaml"));
        assert!(summary.contains("Past embarrassments: one, two"));
        assert!(!summary.contains("three"));
    }

    #[test]
    fn legacy_profile_without_version_defaults_fields() {
        let raw = r#"{"user_id": 5, "first_seen": "2024-01-01T00:00:00Z", "message_count": 3}"#;
        let profile: UserProfile = serde_json::from_str(raw).expect("legacy profile parses");

        assert_eq!(profile.schema_version, CURRENT_SCHEMA_VERSION);
        assert_eq!(profile.language_preference, "en");
        assert_eq!(profile.humor_type, "unknown");
        assert_eq!(profile.speaking_style.tone, "neutral");
        assert_eq!(profile.message_count, 3);
    }
}
