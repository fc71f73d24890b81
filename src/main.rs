mod telegram;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use banter_backend::config::BotConfig;
use banter_backend::llm_client::LlmClient;
use banter_backend::runtime::BotRuntime;
use telegram::TelegramBridge;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,banter=debug,banter_backend=debug")),
        )
        .init();

    tracing::info!("Banter starting...");

    let config = BotConfig::load();
    if !BotConfig::config_path().exists() {
        if let Err(e) = config.save() {
            tracing::warn!("Could not write default config: {:#}", e);
        }
    }
    config.validate().context("invalid configuration")?;
    if config.bot.telegram_token.trim().is_empty() {
        anyhow::bail!("TELEGRAM_BOT_TOKEN is not set and no token is configured");
    }

    let rt = tokio::runtime::Runtime::new().context("failed to start tokio runtime")?;
    rt.block_on(run(config))
}

async fn run(config: BotConfig) -> Result<()> {
    let ai = LlmClient::new(
        config.ai.api_url.clone(),
        config.ai.api_key.clone().unwrap_or_default(),
        config.ai.model.clone(),
    )
    .with_decision_prompt(config.system_prompts.ai_decision.clone())
    .with_persona_prompt(config.system_prompts.autonomous_comment.clone());
    tracing::info!("LLM endpoint: {} (model {})", config.ai.api_url, ai.model());

    let bridge = Arc::new(TelegramBridge::new(&config.bot.telegram_token));
    let me = bridge.get_me().await.context("failed to reach Telegram getMe")?;
    tracing::info!(
        "Connected as @{} (id {})",
        me.username.as_deref().unwrap_or("unknown"),
        me.id
    );
    if !me.is_bot {
        tracing::warn!("Telegram token does not belong to a bot account");
    }
    let configured = config.bot.bot_username.trim_start_matches('@');
    if !configured.is_empty() && me.username.as_deref() != Some(configured) {
        tracing::warn!(
            "Configured bot_username @{} does not match the token's account",
            configured
        );
    }

    let runtime = Arc::new(
        BotRuntime::bootstrap(config, Arc::new(ai), bridge.clone(), me.id)
            .context("failed to bootstrap bot runtime")?,
    );
    runtime.spawn_background_tasks();

    tokio::select! {
        _ = bridge.run(runtime.clone()) => {}
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
            tracing::info!("Shutdown requested");
        }
    }

    runtime.shutdown();
    Ok(())
}
