use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::{merge_capped, ProfileStore, UserProfile, INTEREST_CAP, TRAIT_CAP};
use crate::history::{ContextHistory, MessageHistory};
use crate::llm_client::{parse_json_reply, AiClient, Message};

pub const SPEAKING_TONES: &[&str] = &["casual", "formal", "sarcastic", "aggressive", "friendly"];
pub const HUMOR_TYPES: &[&str] = &["sarcastic", "witty", "silly", "dark", "wholesome", "unknown"];

const PROMPT_INPUT_MAX_CHARS: usize = 1000;
const ENRICHMENT_TEMPERATURE: f32 = 0.7;
const ENRICHMENT_MAX_TOKENS: u32 = 2000;

/// Most recent history entries per chat considered by a bulk rebuild.
const REGENERATION_SCAN_LIMIT: usize = 100;
const REGENERATION_MIN_MESSAGES: usize = 5;
const REGENERATION_SAMPLE: usize = 30;

/// Reply expected from the model. Every key is required.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EnrichmentAnalysis {
    pub interests: Vec<String>,
    pub technical_weaknesses: Vec<String>,
    pub personal_weaknesses: Vec<String>,
    pub speaking_tone: String,
    pub humor_type: String,
    pub common_mistakes: Vec<String>,
    pub embarrassing_moments: Vec<String>,
}

impl EnrichmentAnalysis {
    /// Parse and validate a model reply; nothing partial is ever returned.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut analysis: Self =
            parse_json_reply(raw).context("Enrichment reply does not match the expected schema")?;

        analysis.speaking_tone = canonical_choice(&analysis.speaking_tone, SPEAKING_TONES)
            .with_context(|| format!("Unexpected speaking_tone {:?}", analysis.speaking_tone))?;
        analysis.humor_type = canonical_choice(&analysis.humor_type, HUMOR_TYPES)
            .with_context(|| format!("Unexpected humor_type {:?}", analysis.humor_type))?;

        Ok(analysis)
    }

    pub fn merge_into(&self, profile: &mut UserProfile) {
        merge_capped(&mut profile.interests, &self.interests, INTEREST_CAP);
        merge_capped(
            &mut profile.weaknesses.technical,
            &self.technical_weaknesses,
            TRAIT_CAP,
        );
        merge_capped(
            &mut profile.weaknesses.personal,
            &self.personal_weaknesses,
            TRAIT_CAP,
        );
        merge_capped(
            &mut profile.patterns.common_mistakes,
            &self.common_mistakes,
            TRAIT_CAP,
        );
        merge_capped(
            &mut profile.embarrassing_moments,
            &self.embarrassing_moments,
            TRAIT_CAP,
        );
        profile.speaking_style.tone = self.speaking_tone.clone();
        profile.humor_type = self.humor_type.clone();
    }
}

fn canonical_choice(value: &str, allowed: &[&str]) -> Option<String> {
    let value = value.trim();
    allowed
        .iter()
        .find(|candidate| candidate.eq_ignore_ascii_case(value))
        .map(|candidate| candidate.to_string())
}

pub fn build_enrichment_prompt(recent_messages: &str) -> String {
    let sample: String = recent_messages.chars().take(PROMPT_INPUT_MAX_CHARS).collect();

    format!(
        "Analyze the following messages written by one chat user and extract what they reveal about the person.\n\n\
         ## Messages\n{}\n\n\
         Analyze only the REAL messages above. Do not copy the example values and do not invent facts.\n\n\
         Respond with ONLY a JSON object of this shape:\n\
         {{\n  \
           \"interests\": [],\n  \
           \"technical_weaknesses\": [],\n  \
           \"personal_weaknesses\": [],\n  \
           \"speaking_tone\": \"casual\",\n  \
           \"humor_type\": \"unknown\",\n  \
           \"common_mistakes\": [],\n  \
           \"embarrassing_moments\": []\n\
         }}\n\n\
         Rules:\n\
         - interests: topics the person talks about\n\
         - technical_weaknesses: technical problems they mentioned\n\
         - personal_weaknesses: visible personal weak spots\n\
         - speaking_tone: exactly one of {}\n\
         - humor_type: exactly one of {}\n\
         - common_mistakes: recurring mistakes in speech or behavior\n\
         - embarrassing_moments: awkward situations they mentioned\n\
         Use an empty array [] when there is no evidence.",
        sample,
        SPEAKING_TONES.join(", "),
        HUMOR_TYPES.join(", "),
    )
}

/// True exactly when `message_count` lands on a multiple of `interval`.
pub fn should_enrich(message_count: u64, interval: u64) -> bool {
    interval > 0 && message_count > 0 && message_count % interval == 0
}

/// Ask the model about a user's recent messages and merge the result.
///
/// Never fails: provider and parse errors are logged and leave the profile
/// untouched. Returns whether the profile changed.
pub async fn enrich(
    store: &ProfileStore,
    user_id: i64,
    recent_messages: &str,
    ai: &dyn AiClient,
    system_prompt: &str,
) -> bool {
    if recent_messages.trim().is_empty() {
        tracing::debug!("No messages to enrich profile for user {}", user_id);
        return false;
    }

    let messages = vec![
        Message::system(system_prompt),
        Message::user(build_enrichment_prompt(recent_messages)),
    ];

    let raw = match ai
        .generate_text(messages, ENRICHMENT_TEMPERATURE, ENRICHMENT_MAX_TOKENS)
        .await
    {
        Ok(raw) => raw,
        Err(e) => {
            tracing::error!("Error enriching profile for user {}: {:#}", user_id, e);
            return false;
        }
    };

    let analysis = match EnrichmentAnalysis::parse(&raw) {
        Ok(analysis) => analysis,
        Err(e) => {
            tracing::warn!(
                "Failed to parse profile analysis for user {}: {:#}",
                user_id,
                e
            );
            return false;
        }
    };

    store.with_profile(user_id, |profile| analysis.merge_into(profile));
    tracing::info!("AI-enriched profile for user {}", user_id);
    true
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegenerationReport {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub total: usize,
}

#[derive(Default)]
struct CollectedUser {
    username: String,
    first_name: String,
    texts: Vec<String>,
}

/// Re-enrich every user with enough messages in the retained history.
pub async fn regenerate_all(
    store: &ProfileStore,
    history: &MessageHistory,
    ai: &dyn AiClient,
    system_prompt: &str,
) -> RegenerationReport {
    let mut order: Vec<i64> = Vec::new();
    let mut users: HashMap<i64, CollectedUser> = HashMap::new();

    for chat_id in history.all_chat_ids() {
        let entries = history.recent_messages(chat_id);
        let start = entries.len().saturating_sub(REGENERATION_SCAN_LIMIT);

        for entry in &entries[start..] {
            if entry.user_id == 0 || entry.text.is_empty() || entry.is_command() {
                continue;
            }
            let collected = users.entry(entry.user_id).or_insert_with(|| {
                order.push(entry.user_id);
                CollectedUser {
                    username: entry.username.clone(),
                    first_name: entry.first_name.clone(),
                    texts: Vec::new(),
                }
            });
            collected.texts.push(entry.text.clone());
        }
    }

    let mut report = RegenerationReport {
        total: order.len(),
        ..RegenerationReport::default()
    };
    if order.is_empty() {
        tracing::warn!("No user messages found in context history");
        return report;
    }
    tracing::info!("Regenerating profiles for {} users", report.total);

    for user_id in order {
        let Some(collected) = users.remove(&user_id) else {
            continue;
        };
        if collected.texts.len() < REGENERATION_MIN_MESSAGES {
            tracing::info!(
                "Skipping user {} (only {} messages)",
                user_id,
                collected.texts.len()
            );
            report.skipped += 1;
            continue;
        }

        store.with_profile(user_id, |profile| {
            if !collected.username.is_empty() {
                profile.username = collected.username.clone();
            }
            if !collected.first_name.is_empty() && collected.first_name != "Unknown" {
                profile.first_name = collected.first_name.clone();
            }
        });

        let sample = collected
            .texts
            .iter()
            .take(REGENERATION_SAMPLE)
            .cloned()
            .collect::<Vec<_>>()
            .join("\n");

        if enrich(store, user_id, &sample, ai, system_prompt).await {
            store.save(user_id);
            report.processed += 1;
        } else {
            report.failed += 1;
        }
    }

    tracing::info!(
        "Profile regeneration complete: processed {}, skipped {}, failed {}, total {}",
        report.processed,
        report.skipped,
        report.failed,
        report.total
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::HistoryEntry;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct ScriptedAi {
        replies: Mutex<Vec<Result<String>>>,
        calls: AtomicUsize,
    }

    impl ScriptedAi {
        fn new(replies: Vec<Result<String>>) -> Self {
            Self {
                replies: Mutex::new(replies),
                calls: AtomicUsize::new(0),
            }
        }

        fn repeating(reply: &str, times: usize) -> Self {
            Self::new((0..times).map(|_| Ok(reply.to_string())).collect())
        }
    }

    #[async_trait]
    impl AiClient for ScriptedAi {
        async fn generate_text(&self, _: Vec<Message>, _: f32, _: u32) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut replies = self.replies.lock().expect("lock");
            if replies.is_empty() {
                anyhow::bail!("no scripted reply left");
            }
            replies.remove(0)
        }
    }

    fn reply(technical: &[&str]) -> String {
        serde_json::json!({
            "interests": ["rust", "chess"],
            "technical_weaknesses": technical,
            "personal_weaknesses": ["impatient"],
            "speaking_tone": "Sarcastic",
            "humor_type": "dark",
            "common_mistakes": ["their/there"],
            "embarrassing_moments": []
        })
        .to_string()
    }

    fn store() -> (tempfile::TempDir, ProfileStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ProfileStore::open(dir.path()).expect("open");
        (dir, store)
    }

    #[test]
    fn parse_accepts_fenced_reply_and_normalizes_enums() {
        let raw = format!("```json\n{}\n```", reply(&["git"]));
        let analysis = EnrichmentAnalysis::parse(&raw).expect("valid");
        assert_eq!(analysis.speaking_tone, "sarcastic");
        assert_eq!(analysis.humor_type, "dark");
    }

    #[test]
    fn parse_rejects_missing_keys_wrong_types_and_bad_enums() {
        let missing = r#"{"interests": [], "technical_weaknesses": []}"#;
        assert!(EnrichmentAnalysis::parse(missing).is_err());

        let mut value: serde_json::Value = serde_json::from_str(&reply(&[])).expect("json");
        value["interests"] = serde_json::json!("rust");
        assert!(EnrichmentAnalysis::parse(&value.to_string()).is_err());

        let mut value: serde_json::Value = serde_json::from_str(&reply(&[])).expect("json");
        value["speaking_tone"] = serde_json::json!("poetic");
        assert!(EnrichmentAnalysis::parse(&value.to_string()).is_err());
    }

    #[test]
    fn prompt_truncates_input() {
        let long = "a".repeat(5000);
        let prompt = build_enrichment_prompt(&long);
        assert!(prompt.contains(&"a".repeat(1000)));
        assert!(!prompt.contains(&"a".repeat(1001)));
    }

    #[test]
    fn should_enrich_only_on_multiples() {
        assert!(!should_enrich(9, 10));
        assert!(should_enrich(10, 10));
        assert!(!should_enrich(11, 10));
        assert!(should_enrich(20, 10));
        assert!(!should_enrich(0, 10));
        assert!(!should_enrich(10, 0));
    }

    #[tokio::test]
    async fn enrich_merges_and_respects_caps() {
        let (_dir, store) = store();
        let ai = ScriptedAi::new(vec![
            Ok(reply(&["a", "b", "c"])),
            Ok(reply(&["d", "e", "f", "g"])),
        ]);

        assert!(enrich(&store, 1, "some text", &ai, "sys").await);
        assert!(enrich(&store, 1, "more text", &ai, "sys").await);

        let profile = store.load(1);
        assert_eq!(profile.weaknesses.technical, vec!["c", "d", "e", "f", "g"]);
        assert_eq!(profile.interests, vec!["rust", "chess"]);
        assert_eq!(profile.speaking_style.tone, "sarcastic");
        assert_eq!(profile.humor_type, "dark");
        assert!(profile.weaknesses.personal.len() <= TRAIT_CAP);
    }

    #[tokio::test]
    async fn malformed_reply_or_provider_error_leaves_profile_unchanged() {
        let (_dir, store) = store();
        store.with_profile(2, |p| p.interests.push("golf".to_string()));
        let before = store.load(2);

        let ai = ScriptedAi::new(vec![
            Ok("not json at all".to_string()),
            Err(anyhow::anyhow!("provider down")),
            Ok(r#"{"interests": ["x"]}"#.to_string()),
        ]);
        assert!(!enrich(&store, 2, "text", &ai, "sys").await);
        assert!(!enrich(&store, 2, "text", &ai, "sys").await);
        assert!(!enrich(&store, 2, "text", &ai, "sys").await);

        assert_eq!(store.load(2), before);
        assert_eq!(ai.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn empty_input_skips_the_model() {
        let (_dir, store) = store();
        let ai = ScriptedAi::new(Vec::new());
        assert!(!enrich(&store, 3, "   ", &ai, "sys").await);
        assert_eq!(ai.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn regenerate_all_skips_sparse_users_and_backfills_identity() {
        let profiles_dir = tempfile::tempdir().expect("tempdir");
        let history_dir = tempfile::tempdir().expect("tempdir");
        let store = ProfileStore::open(profiles_dir.path()).expect("open");
        let history = MessageHistory::open(history_dir.path(), 100, 24).expect("open");

        let push = |user_id: i64, message_id: i64, text: &str| {
            history.add_entry(
                -1,
                HistoryEntry {
                    user_id,
                    username: format!("u{}", user_id),
                    first_name: format!("First{}", user_id),
                    text: text.to_string(),
                    message_id,
                    timestamp: Utc::now(),
                },
            );
        };
        for i in 0..6 {
            push(10, i, &format!("talkative {}", i));
        }
        push(10, 50, "/command ignored");
        for i in 0..3 {
            push(20, 100 + i, "quiet");
        }
        push(0, 200, "system message");

        let ai = ScriptedAi::repeating(&reply(&["git"]), 1);
        let report = regenerate_all(&store, &history, &ai, "sys").await;

        assert_eq!(
            report,
            RegenerationReport {
                processed: 1,
                skipped: 1,
                failed: 0,
                total: 2
            }
        );
        let profile = store.load(10);
        assert_eq!(profile.first_name, "First10");
        assert_eq!(profile.username, "u10");
        assert_eq!(profile.weaknesses.technical, vec!["git"]);
        assert!(profiles_dir.path().join("users/user_10.json").exists());
    }
}
