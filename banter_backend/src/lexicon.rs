//! Fixed keyword and emoji tables used for every heuristic classification.
//!
//! Everything here is matched by plain substring or set membership against
//! lower-cased text. The order of rule tables is significant: the first rule
//! that matches wins.

// ── Reaction emotion (per-user profile) ────────────────────

pub const PROFILE_POSITIVE_EMOJI: &[&str] = &["👍", "❤", "🔥", "😊", "😂", "🎉", "✅", "💯"];
pub const PROFILE_NEGATIVE_EMOJI: &[&str] = &["👎", "😠", "😢", "💔", "❌"];
pub const PROFILE_THOUGHTFUL_EMOJI: &[&str] = &["🤔", "💭", "🧐"];

// ── Group mood sentiment ───────────────────────────────────

pub const MOOD_POSITIVE_EMOJI: &[&str] = &[
    "👍", "❤", "🔥", "😊", "😂", "🎉", "✅", "💯", "😄", "😍", "🥰", "🤗",
];
pub const MOOD_NEGATIVE_EMOJI: &[&str] = &[
    "👎", "😠", "😢", "💔", "❌", "😞", "😔", "😕", "😣", "😖",
];

// ── Personality insight groups (top emoji) ─────────────────

pub const HUMOR_EMOJI: &[&str] = &["😂", "😄", "🤣"];
pub const AFFECTION_EMOJI: &[&str] = &["❤", "🥰", "😍"];
pub const SUPPORT_EMOJI: &[&str] = &["👍", "✅", "💯"];
pub const THOUGHT_EMOJI: &[&str] = &["🤔", "💭", "🧐"];

// ── Reaction target buckets ────────────────────────────────

pub const TARGET_HUMOR: &str = "humor";
pub const TARGET_NEWS: &str = "news";
pub const TARGET_QUESTIONS: &str = "questions";

pub const REACTION_TARGET_RULES: &[(&str, &[&str])] = &[
    (TARGET_HUMOR, &["joke", "funny", "😂", "😄", "haha", "lol"]),
    (TARGET_NEWS, &["news", "update", "announcement"]),
    (TARGET_QUESTIONS, &["?", "question", "how", "what", "why"]),
];

// ── Bot reaction selection ─────────────────────────────────

pub const REACTION_SELECTION_RULES: &[(&str, &[&str])] = &[
    ("😂", &["lol", "haha", "lmao", "funny", "joke", "😂", "🤣"]),
    ("😱", &["wtf", "wow", "omg", "!", "shocking"]),
    ("👍", &["good", "great", "awesome", "perfect", "nice", "👍"]),
    ("🔥", &["fire", "amazing", "incredible", "🔥"]),
    ("🤔", &["hmm", "think", "?", "question"]),
    ("👀", &["watch", "see", "look", "👀"]),
    ("💯", &["100", "exactly", "agree", "true"]),
    ("🎯", &["right", "correct", "spot on", "exactly"]),
];

pub const FALLBACK_REACTION: &str = "👍";

// ── Conversation opportunity heuristics ────────────────────

pub const TROUBLE_KEYWORDS: &[&str] = &["help", "error", "bug", "problem", "why", "how"];

/// Sentiment bucket a reaction contributes to in a user's profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactionEmotion {
    Positive,
    Negative,
    Thoughtful,
    Neutral,
}

impl ReactionEmotion {
    pub fn as_str(self) -> &'static str {
        match self {
            ReactionEmotion::Positive => "positive",
            ReactionEmotion::Negative => "negative",
            ReactionEmotion::Thoughtful => "thoughtful",
            ReactionEmotion::Neutral => "neutral",
        }
    }
}

/// Sentiment bucket a reaction contributes to in the group mood.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
}

/// Telegram delivers some emoji with a trailing variation selector (U+FE0F).
pub fn normalize_emoji(emoji: &str) -> &str {
    emoji.trim().trim_end_matches('\u{fe0f}')
}

pub fn emoji_in(set: &[&str], emoji: &str) -> bool {
    let emoji = normalize_emoji(emoji);
    set.iter().any(|candidate| *candidate == emoji)
}

pub fn classify_reaction_emotion(emoji: &str) -> ReactionEmotion {
    if emoji_in(PROFILE_POSITIVE_EMOJI, emoji) {
        ReactionEmotion::Positive
    } else if emoji_in(PROFILE_NEGATIVE_EMOJI, emoji) {
        ReactionEmotion::Negative
    } else if emoji_in(PROFILE_THOUGHTFUL_EMOJI, emoji) {
        ReactionEmotion::Thoughtful
    } else {
        ReactionEmotion::Neutral
    }
}

pub fn classify_mood_sentiment(emoji: &str) -> Sentiment {
    if emoji_in(MOOD_POSITIVE_EMOJI, emoji) {
        Sentiment::Positive
    } else if emoji_in(MOOD_NEGATIVE_EMOJI, emoji) {
        Sentiment::Negative
    } else {
        Sentiment::Neutral
    }
}

/// Bucket for the content a user reacted to, if any rule matches.
pub fn classify_reaction_target(text: &str) -> Option<&'static str> {
    let lower = text.to_lowercase();
    first_matching_rule(REACTION_TARGET_RULES, &lower)
}

/// Emoji picked by the keyword cascade, if any rule matches.
pub fn heuristic_reaction(text: &str) -> Option<&'static str> {
    let lower = text.to_lowercase();
    first_matching_rule(REACTION_SELECTION_RULES, &lower)
}

fn first_matching_rule(
    rules: &'static [(&'static str, &'static [&'static str])],
    haystack_lower: &str,
) -> Option<&'static str> {
    rules
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|kw| haystack_lower.contains(kw)))
        .map(|(label, _)| *label)
}

pub fn contains_trouble_keyword(text_lower: &str) -> bool {
    TROUBLE_KEYWORDS.iter().any(|kw| text_lower.contains(kw))
}

/// `???` or the same ASCII letter three times in a row.
pub fn has_typo_pattern(text: &str) -> bool {
    if text.contains("???") {
        return true;
    }
    let chars: Vec<char> = text.chars().collect();
    chars.windows(3).any(|w| {
        w[0].is_ascii_lowercase() && w[0] == w[1] && w[1] == w[2]
    })
}

/// True when the text contains any character from the Cyrillic block.
pub fn contains_cyrillic(text: &str) -> bool {
    text.chars().any(|c| ('\u{0400}'..='\u{04FF}').contains(&c))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn humor_rule_wins_over_later_rules() {
        assert_eq!(heuristic_reaction("this is so funny lol"), Some("😂"));
        assert_eq!(heuristic_reaction("wow, great job!"), Some("😱"));
        assert_eq!(heuristic_reaction("That is AMAZING"), Some("🔥"));
        assert_eq!(heuristic_reaction("spot on"), Some("🎯"));
        assert_eq!(heuristic_reaction("zzz"), None);
    }

    #[test]
    fn reaction_targets_follow_rule_order() {
        assert_eq!(classify_reaction_target("why does this happen"), Some(TARGET_QUESTIONS));
        assert_eq!(classify_reaction_target("Funny news?"), Some(TARGET_HUMOR));
        assert_eq!(classify_reaction_target("release announcement"), Some(TARGET_NEWS));
        assert_eq!(classify_reaction_target("ok"), None);
    }

    #[test]
    fn emoji_classification_boundaries() {
        assert_eq!(classify_reaction_emotion("👍"), ReactionEmotion::Positive);
        assert_eq!(classify_reaction_emotion("❤\u{fe0f}"), ReactionEmotion::Positive);
        assert_eq!(classify_reaction_emotion("💔"), ReactionEmotion::Negative);
        assert_eq!(classify_reaction_emotion("🧐"), ReactionEmotion::Thoughtful);
        assert_eq!(classify_reaction_emotion("🦄"), ReactionEmotion::Neutral);

        assert_eq!(classify_mood_sentiment("🥰"), Sentiment::Positive);
        assert_eq!(classify_mood_sentiment("😖"), Sentiment::Negative);
        assert_eq!(classify_mood_sentiment("🤔"), Sentiment::Neutral);
    }

    #[test]
    fn typo_and_language_heuristics() {
        assert!(has_typo_pattern("sooo good"));
        assert!(has_typo_pattern("what???"));
        assert!(!has_typo_pattern("book keeper"));
        assert!(contains_cyrillic("привет"));
        assert!(!contains_cyrillic("hello"));
    }
}
