//! Reaction analytics (group mood, per-user stats) and the bot's own reaction picker.

pub mod mood;
pub mod selector;

pub use mood::{FavoriteReaction, Mood, MoodReport, MoodSource, ReactionAnalytics, ReactionStats};
pub use selector::ReactionSelector;
