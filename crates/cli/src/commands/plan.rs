//! `steerclaw plan`: planning decision for a prompt.

use steerclaw_agent::{PlanDecision, TaskPlanner};
use steerclaw_config::AppConfig;

pub async fn run(config: &AppConfig, prompt: &str, system: &str) -> Result<(), Box<dyn std::error::Error>> {
    let planner = TaskPlanner::new(&config.agent, config.planner.clone());
    let decision = planner.should_plan(prompt, system);
    print!("{}", render_decision(&decision));

    if decision.should_plan {
        println!();
        print!("{}", planner.create_plan(prompt).render());
    }
    Ok(())
}

pub fn render_decision(decision: &PlanDecision) -> String {
    let mut out = format!(
        "Plan needed: {}\nReason:      {}\nTokens:      {} prompt + {} system (threshold {})\n",
        if decision.should_plan { "yes" } else { "no" },
        decision.reason,
        decision.prompt_tokens,
        decision.system_tokens,
        decision.threshold_tokens,
    );
    if !decision.matched_keywords.is_empty() {
        out.push_str(&format!("Keywords:    {}\n", decision.matched_keywords.join(", ")));
    }
    out
}
