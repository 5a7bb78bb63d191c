//! `steerclaw route`: pick a model for a task.

use steerclaw_config::AppConfig;
use steerclaw_providers::{ModelRouter, ModelSelection, ModelTask};

pub async fn run(config: &AppConfig, task: &ModelTask, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let router = ModelRouter::from_config(&config.router);
    let selection = router.select_model(task)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&selection)?);
    } else {
        print!("{}", render(&selection, router.required_tokens(task)));
    }
    Ok(())
}

pub fn render(selection: &ModelSelection, required_tokens: usize) -> String {
    format!(
        "Model:     {}\nReason:    {}\nWindow:    {} tokens ({} needed)\nEst. cost: ${:.4}\n",
        selection.model_id, selection.reason, selection.context_window, required_tokens, selection.estimated_cost
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_lists_selection() {
        let selection = ModelSelection {
            model_id: "ollama/llama3.1:8b".into(),
            reason: "local".into(),
            estimated_cost: 0.0,
            context_window: 8192,
        };
        let out = render(&selection, 1650);
        assert!(out.contains("Model:     ollama/llama3.1:8b"));
        assert!(out.contains("8192 tokens (1650 needed)"));
        assert!(out.contains("$0.0000"));
    }
}
