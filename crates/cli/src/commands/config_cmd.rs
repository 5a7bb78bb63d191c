//! `steerclaw config`: configuration management commands.

use steerclaw_config::{AppConfig, ApprovalMode};

pub async fn validate() -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Validating configuration...");

    match AppConfig::load() {
        Ok(config) => {
            println!("   ✅ Config parsed successfully");

            let warnings = warnings(&config);
            if warnings.is_empty() {
                println!("   ✅ All checks passed");
            } else {
                println!();
                for w in &warnings {
                    println!("   ⚠️  {w}");
                }
            }

            println!();
            print!("{}", summary(&config));
        }
        Err(e) => {
            println!("   ❌ Config error: {e}");
            return Err(e.into());
        }
    }

    Ok(())
}

/// Settings that load fine but are probably not what the user meant.
pub fn warnings(config: &AppConfig) -> Vec<&'static str> {
    let mut warnings = Vec::new();

    if config.approval.mode == ApprovalMode::Auto && config.agent.allow_dangerous_tools {
        warnings.push("Dangerous tools are allowed and approvals are automatic");
    }
    if config.approval.mode == ApprovalMode::Deny && config.agent.require_approval {
        warnings.push("Every tool requires approval but approval mode is deny");
    }
    if config.memory.enabled && config.memory.recall_limit == 0 && !config.memory.auto_save {
        warnings.push("Memory is enabled but neither recalls nor saves anything");
    }
    if !config.router.models.is_empty() && !config.router.models.iter().any(|m| m.id == config.agent.model) {
        warnings.push("agent.model is not in the [router] model table");
    }

    warnings
}

pub fn summary(config: &AppConfig) -> String {
    let models = if config.router.models.is_empty() {
        "built-in table".to_string()
    } else {
        format!("{} configured", config.router.models.len())
    };
    format!(
        "   Model:      {}\n   Context:    {} tokens ({} reserved)\n   Turns:      {} max, {} tool calls\n   Compaction: {}\n   Planner:    {}\n   Router:     {models}\n   Approval:   {}\n   Memory:     {}\n",
        config.agent.model,
        config.agent.max_context_tokens,
        config.agent.reserved_tokens,
        config.agent.max_turns,
        config.agent.max_tool_calls,
        config.context.strategy,
        if config.planner.enabled { "on" } else { "off" },
        approval_label(config.approval.mode),
        if config.memory.enabled { "on" } else { "off" },
    )
}

fn approval_label(mode: ApprovalMode) -> &'static str {
    match mode {
        ApprovalMode::Auto => "auto",
        ApprovalMode::Deny => "deny",
        ApprovalMode::Timed => "timed",
    }
}

pub async fn show() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

pub async fn path() -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", AppConfig::config_path().display());
    Ok(())
}
