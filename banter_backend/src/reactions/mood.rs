use anyhow::Result;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::lexicon::{self, Sentiment};
use crate::profiles::ProfileStore;

pub const MOOD_LOOKBACK_HOURS: i64 = 24;
const TOP_FAVORITES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Mood {
    VeryPositive,
    Positive,
    Negative,
    Mixed,
    Neutral,
    Unknown,
}

impl Mood {
    pub fn label(self) -> &'static str {
        match self {
            Mood::VeryPositive => "Very Positive",
            Mood::Positive => "Positive",
            Mood::Negative => "Negative",
            Mood::Mixed => "Mixed",
            Mood::Neutral => "Neutral",
            Mood::Unknown => "Unknown",
        }
    }

    /// Thresholds are checked in order; the first match wins.
    pub fn from_percentages(positive_pct: f64, negative_pct: f64) -> Self {
        if positive_pct > 60.0 {
            Mood::VeryPositive
        } else if positive_pct > 40.0 {
            Mood::Positive
        } else if negative_pct > 40.0 {
            Mood::Negative
        } else if positive_pct > 25.0 {
            Mood::Mixed
        } else {
            Mood::Neutral
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MoodReport {
    pub overall_mood: Mood,
    pub positive_pct: f64,
    pub negative_pct: f64,
    pub neutral_pct: f64,
    pub active_users: usize,
    pub recent_reaction_count: usize,
    pub message: String,
}

impl MoodReport {
    pub fn unknown(message: impl Into<String>) -> Self {
        Self {
            overall_mood: Mood::Unknown,
            positive_pct: 0.0,
            negative_pct: 0.0,
            neutral_pct: 0.0,
            active_users: 0,
            recent_reaction_count: 0,
            message: message.into(),
        }
    }
}

/// Where the decision engine gets a chat's current mood from.
pub trait MoodSource: Send + Sync {
    fn group_mood(&self, chat_id: i64) -> Result<MoodReport>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FavoriteReaction {
    pub emoji: String,
    pub count: u64,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReactionStats {
    pub total_reactions: u64,
    pub favorite_reactions: Vec<FavoriteReaction>,
    pub emotional_distribution: BTreeMap<String, f64>,
    pub reaction_targets: BTreeMap<String, f64>,
    pub personality_insights: Vec<String>,
    pub reaction_rate: f64,
}

impl ReactionStats {
    fn empty() -> Self {
        Self {
            total_reactions: 0,
            favorite_reactions: Vec::new(),
            emotional_distribution: BTreeMap::new(),
            reaction_targets: BTreeMap::new(),
            personality_insights: vec!["No reaction data available".to_string()],
            reaction_rate: 0.0,
        }
    }
}

pub struct ReactionAnalytics {
    store: Arc<ProfileStore>,
}

impl ReactionAnalytics {
    pub fn new(store: Arc<ProfileStore>) -> Self {
        Self { store }
    }

    pub fn group_mood(&self, chat_id: i64) -> MoodReport {
        let reactions = self
            .store
            .recent_chat_reactions(chat_id, MOOD_LOOKBACK_HOURS);
        if reactions.is_empty() {
            return MoodReport::unknown("No recent reactions to analyze");
        }

        let total = reactions.len();
        let (mut positive, mut negative, mut neutral) = (0usize, 0usize, 0usize);
        for reaction in &reactions {
            match lexicon::classify_mood_sentiment(&reaction.emoji) {
                Sentiment::Positive => positive += 1,
                Sentiment::Negative => negative += 1,
                Sentiment::Neutral => neutral += 1,
            }
        }

        let positive_pct = percent(positive as f64, total as f64);
        let negative_pct = percent(negative as f64, total as f64);
        let neutral_pct = percent(neutral as f64, total as f64);
        let overall_mood = Mood::from_percentages(positive_pct, negative_pct);
        let active_users = reactions
            .iter()
            .map(|reaction| reaction.user_id)
            .collect::<HashSet<_>>()
            .len();

        MoodReport {
            overall_mood,
            positive_pct: round_to(positive_pct, 1),
            negative_pct: round_to(negative_pct, 1),
            neutral_pct: round_to(neutral_pct, 1),
            active_users,
            recent_reaction_count: total,
            message: mood_insight(overall_mood, positive_pct, negative_pct, total),
        }
    }

    pub fn user_reaction_stats(&self, user_id: i64) -> ReactionStats {
        let profile = self.store.load(user_id);
        let patterns = &profile.reaction_patterns;
        if patterns.total_reactions == 0 {
            return ReactionStats::empty();
        }

        let mut favorites: Vec<(&String, &u64)> = patterns.favorite_reactions.iter().collect();
        // Stable sort keeps BTreeMap order for ties
        favorites.sort_by(|a, b| b.1.cmp(a.1));

        let favorite_reactions = favorites
            .iter()
            .take(TOP_FAVORITES)
            .map(|(emoji, count)| FavoriteReaction {
                emoji: (*emoji).clone(),
                count: **count,
                percentage: round_to(
                    percent(**count as f64, patterns.total_reactions as f64),
                    1,
                ),
            })
            .collect();

        let total_emotions: u64 = patterns.emotional_responses.values().sum();
        let emotional_distribution = if total_emotions > 0 {
            patterns
                .emotional_responses
                .iter()
                .map(|(emotion, count)| {
                    (
                        emotion.clone(),
                        round_to(percent(*count as f64, total_emotions as f64), 1),
                    )
                })
                .collect()
        } else {
            BTreeMap::new()
        };

        let target_count = patterns.reaction_targets.len();
        let reaction_targets = patterns
            .reaction_targets
            .iter()
            .map(|target| {
                (
                    target.clone(),
                    round_to(percent(1.0, target_count as f64), 1),
                )
            })
            .collect();

        let top_emoji = favorites.first().map(|(emoji, _)| emoji.as_str());
        let personality_insights = personality_insights(
            top_emoji,
            &patterns.emotional_responses,
            &patterns.reaction_targets,
        );

        let reaction_rate = if profile.message_count == 0 {
            0.0
        } else {
            round_to(
                patterns.total_reactions as f64 / profile.message_count as f64,
                2,
            )
        };

        ReactionStats {
            total_reactions: patterns.total_reactions,
            favorite_reactions,
            emotional_distribution,
            reaction_targets,
            personality_insights,
            reaction_rate,
        }
    }
}

impl MoodSource for ReactionAnalytics {
    fn group_mood(&self, chat_id: i64) -> Result<MoodReport> {
        Ok(ReactionAnalytics::group_mood(self, chat_id))
    }
}

fn mood_insight(mood: Mood, positive_pct: f64, negative_pct: f64, total: usize) -> String {
    match mood {
        Mood::VeryPositive => format!(
            "🎉 The group is in great spirits with {:.1}% positive reactions!",
            positive_pct
        ),
        Mood::Positive => format!(
            "😊 The mood is generally positive with {:.1}% positive reactions.",
            positive_pct
        ),
        Mood::Negative => format!(
            "😞 The group seems down with {:.1}% negative reactions.",
            negative_pct
        ),
        Mood::Mixed => format!(
            "😐 Mixed feelings in the group - {:.1}% positive, {:.1}% negative.",
            positive_pct, negative_pct
        ),
        Mood::Neutral | Mood::Unknown => {
            format!("🤔 Neutral mood overall from {} recent reactions.", total)
        }
    }
}

fn personality_insights(
    top_emoji: Option<&str>,
    emotional_responses: &BTreeMap<String, u64>,
    reaction_targets: &[String],
) -> Vec<String> {
    let mut insights = Vec::new();

    if let Some(top) = top_emoji {
        let insight = if lexicon::emoji_in(lexicon::HUMOR_EMOJI, top) {
            Some("Has a great sense of humor and appreciates jokes")
        } else if lexicon::emoji_in(lexicon::AFFECTION_EMOJI, top) {
            Some("Very affectionate and shows appreciation often")
        } else if lexicon::emoji_in(lexicon::SUPPORT_EMOJI, top) {
            Some("Supportive and encouraging of others")
        } else if lexicon::emoji_in(lexicon::THOUGHT_EMOJI, top) {
            Some("Thoughtful and contemplative")
        } else {
            None
        };
        insights.extend(insight.map(str::to_string));
    }

    let count = |key: &str| emotional_responses.get(key).copied().unwrap_or(0) as f64;
    let positive = count("positive");
    let thoughtful = count("thoughtful");
    // Neutral reactions do not take part in this ratio
    let total = positive + count("negative") + thoughtful;
    if total > 0.0 {
        if positive / total > 0.7 {
            insights.push("Overwhelmingly positive and upbeat".to_string());
        } else if thoughtful / total > 0.4 {
            insights.push("Tends to think deeply about content".to_string());
        }
    }

    if reaction_targets.iter().any(|t| t == lexicon::TARGET_HUMOR) {
        insights.push("Really enjoys humorous content".to_string());
    }
    if reaction_targets.iter().any(|t| t == lexicon::TARGET_QUESTIONS) {
        insights.push("Engages with thoughtful questions".to_string());
    }

    if insights.is_empty() {
        insights.push("Reaction patterns still developing".to_string());
    }
    insights
}

fn percent(part: f64, total: f64) -> f64 {
    if total == 0.0 {
        0.0
    } else {
        part / total * 100.0
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profiles::ChatReaction;
    use chrono::{Duration, Utc};

    fn analytics() -> (tempfile::TempDir, Arc<ProfileStore>, ReactionAnalytics) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(ProfileStore::open(dir.path()).expect("open"));
        let analytics = ReactionAnalytics::new(store.clone());
        (dir, store, analytics)
    }

    #[test]
    fn empty_chat_reports_unknown_sentinel() {
        let (_dir, _store, analytics) = analytics();
        let report = analytics.group_mood(-1);
        assert_eq!(report, MoodReport::unknown("No recent reactions to analyze"));
        assert_eq!(report.overall_mood.label(), "Unknown");
    }

    #[test]
    fn mood_thresholds_apply_in_order() {
        assert_eq!(Mood::from_percentages(61.0, 0.0), Mood::VeryPositive);
        assert_eq!(Mood::from_percentages(60.0, 0.0), Mood::Positive);
        assert_eq!(Mood::from_percentages(41.0, 59.0), Mood::Positive);
        assert_eq!(Mood::from_percentages(30.0, 45.0), Mood::Negative);
        assert_eq!(Mood::from_percentages(30.0, 40.0), Mood::Mixed);
        assert_eq!(Mood::from_percentages(25.0, 10.0), Mood::Neutral);
    }

    #[test]
    fn group_mood_percentages_sum_to_hundred() {
        let (_dir, store, analytics) = analytics();
        for (user, emoji) in [(1, "👍"), (2, "😢"), (3, "🦄")] {
            store.track_reaction_in_chat(-1, user, emoji, "");
        }

        let report = analytics.group_mood(-1);
        let sum = report.positive_pct + report.negative_pct + report.neutral_pct;
        assert!((sum - 100.0).abs() <= 0.15, "sum was {}", sum);
        assert_eq!(report.positive_pct, 33.3);
        assert_eq!(report.overall_mood, Mood::Mixed);
        assert_eq!(report.active_users, 3);
        assert_eq!(report.recent_reaction_count, 3);
        assert!(report.message.starts_with("😐 Mixed feelings"));
    }

    #[test]
    fn stale_reactions_do_not_affect_mood() {
        let (_dir, store, analytics) = analytics();
        store.track_reaction_in_chat(-1, 1, "❤️", "");
        for _ in 0..5 {
            store.record_chat_reaction(
                -1,
                ChatReaction {
                    user_id: 2,
                    emoji: "👎".to_string(),
                    timestamp: Utc::now() - Duration::hours(25),
                    target_message_text: String::new(),
                },
            );
        }

        let report = analytics.group_mood(-1);
        assert_eq!(report.overall_mood, Mood::VeryPositive);
        assert_eq!(report.recent_reaction_count, 1);
        assert_eq!(
            report.message,
            "🎉 The group is in great spirits with 100.0% positive reactions!"
        );
    }

    #[test]
    fn user_stats_without_reactions_are_empty() {
        let (_dir, _store, analytics) = analytics();
        let stats = analytics.user_reaction_stats(9);
        assert_eq!(stats.total_reactions, 0);
        assert_eq!(stats.personality_insights, vec!["No reaction data available"]);
        assert_eq!(stats.reaction_rate, 0.0);
    }

    #[test]
    fn user_stats_rank_favorites_and_derive_insights() {
        let (_dir, store, analytics) = analytics();
        for _ in 0..3 {
            store.track_reaction(1, "😂", "haha that joke");
        }
        store.track_reaction(1, "🤔", "why?");
        store.with_profile(1, |p| p.message_count = 3);

        let stats = analytics.user_reaction_stats(1);
        assert_eq!(stats.total_reactions, 4);
        assert_eq!(stats.favorite_reactions[0].emoji, "😂");
        assert_eq!(stats.favorite_reactions[0].count, 3);
        assert_eq!(stats.favorite_reactions[0].percentage, 75.0);
        assert_eq!(stats.emotional_distribution.get("positive"), Some(&75.0));
        assert_eq!(stats.reaction_targets.get("humor"), Some(&50.0));
        assert_eq!(stats.reaction_rate, 1.33);
        assert_eq!(
            stats.personality_insights,
            vec![
                "Has a great sense of humor and appreciates jokes",
                "Overwhelmingly positive and upbeat",
                "Really enjoys humorous content",
                "Engages with thoughtful questions",
            ]
        );
    }

    #[test]
    fn insights_fall_back_when_nothing_matches() {
        let responses = BTreeMap::from([("neutral".to_string(), 4u64)]);
        assert_eq!(
            personality_insights(Some("🦄"), &responses, &[]),
            vec!["Reaction patterns still developing"]
        );
    }
}
