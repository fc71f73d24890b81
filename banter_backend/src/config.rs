use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

pub const CONFIG_FILE_NAME: &str = "banter_config.toml";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BotSettings {
    #[serde(default)]
    pub telegram_token: String,
    #[serde(default)]
    pub bot_username: String,
    #[serde(default)]
    pub admin_user_ids: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiSettings {
    // OpenAI-compatible endpoint: Ollama, LM Studio, Groq, OpenRouter, etc.
    #[serde(default = "default_llm_url")]
    pub api_url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_context_messages_count")]
    pub context_messages_count: usize,
}

fn default_llm_url() -> String {
    "http://localhost:11434/v1".to_string()
}

fn default_llm_model() -> String {
    "llama3.2".to_string()
}

fn default_context_messages_count() -> usize {
    10
}

impl Default for AiSettings {
    fn default() -> Self {
        Self {
            api_url: default_llm_url(),
            model: default_llm_model(),
            api_key: None,
            context_messages_count: default_context_messages_count(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutonomousCommentingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_min_messages_between_comments")]
    pub min_messages_between_comments: u32,
    #[serde(default = "default_max_messages_between_comments")]
    pub max_messages_between_comments: u32,
    #[serde(default = "default_comment_probability")]
    pub comment_probability: f64,
    #[serde(default = "default_min_time_between_comments_seconds")]
    pub min_time_between_comments_seconds: u64,
    #[serde(default = "default_true")]
    pub use_intelligent_decision: bool,
    #[serde(default = "default_true")]
    pub use_ai_decision: bool,
    #[serde(default = "default_true")]
    pub prefer_replies: bool,
    #[serde(default = "default_standalone_probability")]
    pub standalone_probability: f64,
    #[serde(default = "default_true")]
    pub roasting_enabled: bool,
    #[serde(default = "default_roasting_aggression")]
    pub roasting_aggression: f64,
    #[serde(default = "default_target_weaknesses_probability")]
    pub target_weaknesses_probability: f64,
}

fn default_true() -> bool {
    true
}

fn default_min_messages_between_comments() -> u32 {
    8
}

fn default_max_messages_between_comments() -> u32 {
    20
}

fn default_comment_probability() -> f64 {
    0.3
}

fn default_min_time_between_comments_seconds() -> u64 {
    120
}

fn default_standalone_probability() -> f64 {
    0.3
}

fn default_roasting_aggression() -> f64 {
    0.7
}

fn default_target_weaknesses_probability() -> f64 {
    0.6
}

impl Default for AutonomousCommentingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_messages_between_comments: default_min_messages_between_comments(),
            max_messages_between_comments: default_max_messages_between_comments(),
            comment_probability: default_comment_probability(),
            min_time_between_comments_seconds: default_min_time_between_comments_seconds(),
            use_intelligent_decision: true,
            use_ai_decision: true,
            prefer_replies: true,
            standalone_probability: default_standalone_probability(),
            roasting_enabled: true,
            roasting_aggression: default_roasting_aggression(),
            target_weaknesses_probability: default_target_weaknesses_probability(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfilingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_profile_directory")]
    pub profile_directory: String,
    #[serde(default = "default_enrichment_interval_messages")]
    pub enrichment_interval_messages: u64,
    #[serde(default = "default_autosave_interval_seconds")]
    pub auto_save_interval_seconds: u64,
}

fn default_profile_directory() -> String {
    "profiles".to_string()
}

fn default_enrichment_interval_messages() -> u64 {
    10
}

fn default_autosave_interval_seconds() -> u64 {
    300
}

impl Default for UserProfilingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            profile_directory: default_profile_directory(),
            enrichment_interval_messages: default_enrichment_interval_messages(),
            auto_save_interval_seconds: default_autosave_interval_seconds(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMonitoringConfig {
    #[serde(default = "default_context_window_size")]
    pub context_window_size: usize,
    #[serde(default = "default_true")]
    pub uncensored_mode: bool,
    #[serde(default = "default_history_directory")]
    pub history_directory: String,
    #[serde(default = "default_history_max_messages")]
    pub history_max_messages: usize,
    #[serde(default = "default_history_expiration_hours")]
    pub history_expiration_hours: i64,
    #[serde(default = "default_autosave_interval_seconds")]
    pub history_autosave_interval_seconds: u64,
}

fn default_context_window_size() -> usize {
    15
}

fn default_history_directory() -> String {
    "context_history".to_string()
}

fn default_history_max_messages() -> usize {
    100
}

fn default_history_expiration_hours() -> i64 {
    24
}

impl Default for ConversationMonitoringConfig {
    fn default() -> Self {
        Self {
            context_window_size: default_context_window_size(),
            uncensored_mode: true,
            history_directory: default_history_directory(),
            history_max_messages: default_history_max_messages(),
            history_expiration_hours: default_history_expiration_hours(),
            history_autosave_interval_seconds: default_autosave_interval_seconds(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionSystemConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub track_reactions: bool,
    #[serde(default = "default_true")]
    pub add_own_reactions: bool,
    #[serde(default = "default_reaction_probability")]
    pub reaction_probability: f64,
    #[serde(default = "default_min_time_between_reactions_seconds")]
    pub min_time_between_reactions_seconds: u64,
    #[serde(default = "default_reaction_types")]
    pub reaction_types: Vec<String>,
}

fn default_reaction_probability() -> f64 {
    0.15
}

fn default_min_time_between_reactions_seconds() -> u64 {
    60
}

fn default_reaction_types() -> Vec<String> {
    ["👍", "😂", "🔥", "😱", "🤔", "👀", "💯", "🎯"]
        .iter()
        .map(|emoji| emoji.to_string())
        .collect()
}

impl Default for ReactionSystemConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            track_reactions: true,
            add_own_reactions: true,
            reaction_probability: default_reaction_probability(),
            min_time_between_reactions_seconds: default_min_time_between_reactions_seconds(),
            reaction_types: default_reaction_types(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemPromptsConfig {
    #[serde(default = "default_autonomous_comment_prompt")]
    pub autonomous_comment: String,
    #[serde(default = "default_ai_decision_prompt")]
    pub ai_decision: String,
    #[serde(default = "default_profile_analysis_prompt")]
    pub profile_analysis: String,
}

fn default_autonomous_comment_prompt() -> String {
    "You are an observational bot.".to_string()
}

fn default_ai_decision_prompt() -> String {
    "You are a conversation analyst. Respond with YES or NO.".to_string()
}

fn default_profile_analysis_prompt() -> String {
    "You analyze chat messages and describe the author. Respond with JSON only.".to_string()
}

impl Default for SystemPromptsConfig {
    fn default() -> Self {
        Self {
            autonomous_comment: default_autonomous_comment_prompt(),
            ai_decision: default_ai_decision_prompt(),
            profile_analysis: default_profile_analysis_prompt(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BotConfig {
    #[serde(default)]
    pub excluded_chats: Vec<i64>,
    #[serde(default)]
    pub bot: BotSettings,
    #[serde(default)]
    pub ai: AiSettings,
    #[serde(default)]
    pub autonomous_commenting: AutonomousCommentingConfig,
    #[serde(default)]
    pub user_profiling: UserProfilingConfig,
    #[serde(default)]
    pub conversation_monitoring: ConversationMonitoringConfig,
    #[serde(default)]
    pub reaction_system: ReactionSystemConfig,
    #[serde(default)]
    pub system_prompts: SystemPromptsConfig,
}

impl BotConfig {
    /// Get the directory containing the executable
    fn get_base_dir() -> PathBuf {
        match std::env::current_exe() {
            Ok(exe_path) => exe_path
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".")),
            Err(_) => PathBuf::from("."),
        }
    }

    pub fn config_path() -> PathBuf {
        Self::get_base_dir().join(CONFIG_FILE_NAME)
    }

    /// Load config from banter_config.toml (next to executable), then apply env overrides.
    pub fn load() -> Self {
        let path = Self::config_path();

        if let Ok(contents) = fs::read_to_string(&path) {
            match toml::from_str::<BotConfig>(&contents) {
                Ok(mut config) => {
                    tracing::info!("Loaded config from {:?}", path);
                    config.apply_env_overrides();
                    return config;
                }
                Err(e) => {
                    tracing::error!("Failed to parse {:?}: {}", path, e);
                }
            }
        }

        tracing::warn!("No usable config file, using defaults + env vars");
        Self::from_env()
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path();

        let toml_string = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&path, toml_string)
            .with_context(|| format!("Failed to write config to {:?}", path))?;

        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }

    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(token) = env::var("TELEGRAM_BOT_TOKEN") {
            if !token.trim().is_empty() {
                self.bot.telegram_token = token.trim().to_string();
            }
        }

        if let Ok(username) = env::var("BOT_USERNAME") {
            if !username.trim().is_empty() {
                self.bot.bot_username = username.trim().to_string();
            }
        }

        if let Ok(url) = env::var("LLM_API_URL") {
            self.ai.api_url = url;
        }

        if let Ok(model) = env::var("LLM_MODEL") {
            self.ai.model = model;
        }

        if let Ok(key) = env::var("LLM_API_KEY") {
            self.ai.api_key = Some(key);
        }

        if let Ok(dir) = env::var("BANTER_PROFILE_DIR") {
            if !dir.trim().is_empty() {
                self.user_profiling.profile_directory = dir;
            }
        }

        if let Ok(dir) = env::var("BANTER_HISTORY_DIR") {
            if !dir.trim().is_empty() {
                self.conversation_monitoring.history_directory = dir;
            }
        }
    }

    /// Reject settings the engine cannot operate with.
    pub fn validate(&self) -> Result<()> {
        let ac = &self.autonomous_commenting;
        if ac.min_messages_between_comments > ac.max_messages_between_comments {
            anyhow::bail!(
                "min_messages_between_comments ({}) exceeds max_messages_between_comments ({})",
                ac.min_messages_between_comments,
                ac.max_messages_between_comments
            );
        }

        let probabilities = [
            ("comment_probability", ac.comment_probability),
            ("standalone_probability", ac.standalone_probability),
            ("roasting_aggression", ac.roasting_aggression),
            ("target_weaknesses_probability", ac.target_weaknesses_probability),
            (
                "reaction_probability",
                self.reaction_system.reaction_probability,
            ),
        ];
        for (name, value) in probabilities {
            if !(0.0..=1.0).contains(&value) {
                anyhow::bail!("{} must be within [0, 1], got {}", name, value);
            }
        }

        if self.conversation_monitoring.context_window_size == 0 {
            anyhow::bail!("context_window_size must be at least 1");
        }
        if self.user_profiling.enrichment_interval_messages == 0 {
            anyhow::bail!("enrichment_interval_messages must be at least 1");
        }

        Ok(())
    }

    pub fn is_admin(&self, user_id: i64) -> bool {
        self.bot.admin_user_ids.contains(&user_id)
    }

    pub fn is_excluded_chat(&self, chat_id: i64) -> bool {
        self.excluded_chats.contains(&chat_id)
    }
}
