use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::ReactionSystemConfig;
use crate::lexicon;
use crate::lock_unpoisoned;

/// Decides whether the bot reacts to a message and with which emoji.
pub struct ReactionSelector {
    config: ReactionSystemConfig,
    last_reaction: Mutex<HashMap<i64, Instant>>,
}

impl ReactionSelector {
    pub fn new(config: ReactionSystemConfig) -> Self {
        Self {
            config,
            last_reaction: Mutex::new(HashMap::new()),
        }
    }

    fn cooldown(&self) -> Duration {
        Duration::from_secs(self.config.min_time_between_reactions_seconds)
    }

    pub fn should_react(&self, chat_id: i64) -> bool {
        if !self.config.enabled || !self.config.add_own_reactions {
            return false;
        }

        if let Some(last) = lock_unpoisoned(&self.last_reaction).get(&chat_id) {
            if last.elapsed() < self.cooldown() {
                return false;
            }
        }

        rand::random::<f64>() < self.config.reaction_probability
    }

    /// First keyword rule that matches wins; otherwise a random configured emoji.
    pub fn choose_reaction(&self, text: &str) -> String {
        if let Some(emoji) = lexicon::heuristic_reaction(text) {
            return emoji.to_string();
        }

        self.config
            .reaction_types
            .choose(&mut rand::thread_rng())
            .cloned()
            .unwrap_or_else(|| lexicon::FALLBACK_REACTION.to_string())
    }

    pub fn mark_reacted(&self, chat_id: i64) {
        lock_unpoisoned(&self.last_reaction).insert(chat_id, Instant::now());
    }
}
