//! `steerclaw compress`: compact a saved conversation.

use std::path::Path;
use std::sync::Arc;

use steerclaw_agent::{CompressionResult, ContextManager};
use steerclaw_config::AppConfig;
use steerclaw_core::message::Message;
use steerclaw_providers::ModelRouter;

pub async fn run(
    config: &AppConfig,
    file: &Path,
    system: &str,
    model: Option<&str>,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let messages = load_history(file)?;
    let router = Arc::new(ModelRouter::from_config(&config.router));
    let manager = ContextManager::new(&config.agent, config.context.clone()).with_router(router);

    let model = model.unwrap_or(&config.agent.model);
    let budget = manager.budget(Some(model));
    let result = manager.compress_history(&messages, system, Some(model));

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print!("{}", render(&result, messages.len(), budget));
    }
    Ok(())
}

pub fn load_history(file: &Path) -> Result<Vec<Message>, Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(file)
        .map_err(|e| format!("Failed to read {}: {e}", file.display()))?;
    let messages = serde_json::from_str(&content)
        .map_err(|e| format!("{} is not a JSON array of messages: {e}", file.display()))?;
    Ok(messages)
}

pub fn render(result: &CompressionResult, original_count: usize, budget: usize) -> String {
    let strategy = result
        .strategy_used
        .map(|s| s.to_string())
        .unwrap_or_else(|| "none (already fits)".into());
    let mut out = format!(
        "Strategy: {strategy}\nMessages: {original_count} -> {} ({} removed)\nTokens:   {} -> {} (budget {budget})\nRatio:    {:.2}\n",
        result.messages.len(),
        result.removed_messages,
        result.original_token_count,
        result.compressed_token_count,
        result.compression_ratio,
    );
    if !result.fits(budget) {
        out.push_str("Warning:  history is still over budget\n");
    }
    out
}
