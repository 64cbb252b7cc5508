use console::style;
use std::fmt::Write;

use crate::context::{AgentState, AgentStatus, SharedContext};
use crate::orchestrator::{RunResult, RunState, RunStatus};
use crate::storage::RunSummary;

pub struct Output;

impl Output {
    pub fn new() -> Self {
        Self
    }

    pub fn success(&self, message: &str) {
        println!("{} {}", style("✓").green(), message);
    }

    pub fn error(&self, message: &str) {
        eprintln!("{} {}", style("✗").red(), message);
    }

    pub fn warning(&self, message: &str) {
        println!("{} {}", style("⚠").yellow(), message);
    }

    pub fn info(&self, message: &str) {
        println!("{} {}", style("ℹ").blue(), message);
    }

    pub fn header(&self, message: &str) {
        println!("\n{}", style(message).bold().underlined());
    }

    pub fn section(&self, message: &str) {
        println!("\n{}", style(message).bold());
        println!("{}", "─".repeat(40));
    }

    /// One progress block per status change
    pub fn run_status(&self, status: &RunStatus) {
        println!(
            "{} {} {}",
            style(format!("[{:>3.0}%]", status.percentage)).dim(),
            state_label(status.state),
            style(status.run_id.as_str()).dim()
        );
        for (role, agent) in &status.agents {
            println!(
                "    {} {:<22} {}",
                agent_marker(agent.state),
                role.display_name(),
                agent_detail(agent)
            );
        }
    }

    /// Full human-readable report of a finished run
    pub fn report(&self, result: &RunResult) {
        self.header(&format!("Threat model {}", result.run_id));
        println!("State:     {}", state_label(result.final_state));
        if let Some(failure) = &result.failure {
            println!(
                "Failure:   {} ({})",
                style(failure.reason.to_string()).red(),
                failure.message
            );
        }
        println!("Completed: {}", result.completed_at.to_rfc3339());

        let ctx = &result.shared_context_snapshot;
        self.section("Assets");
        print!("{}", render_assets(ctx));
        self.section("Attack paths");
        print!("{}", render_paths(ctx));
        self.section("Control gaps");
        print!("{}", render_gaps(ctx));
        self.section("Recommendations");
        print!("{}", render_recommendations(ctx));

        if !result.flagged_for_review.is_empty() {
            self.section("Flagged for review");
            for flag in &result.flagged_for_review {
                self.warning(&format!(
                    "{} (confidence {:.2}, model {})",
                    flag.agent.display_name(),
                    flag.confidence,
                    flag.source_model
                ));
            }
        }

        self.section("Usage");
        println!("{}", result.usage_summary.display());
    }

    pub fn runs(&self, runs: &[RunSummary]) {
        if runs.is_empty() {
            self.info("No persisted runs.");
            return;
        }
        println!(
            "{}",
            style(format!(
                "{:<38} {:<12} {:<26} {}",
                "RUN", "STATE", "COMPLETED", "FAILURE"
            ))
            .bold()
        );
        for run in runs {
            println!(
                "{:<38} {:<12} {:<26} {}",
                run.run_id.as_str(),
                run.final_state,
                run.completed_at,
                run.failure_reason.as_deref().unwrap_or("-")
            );
        }
    }
}

impl Default for Output {
    fn default() -> Self {
        Self::new()
    }
}

fn state_label(state: RunState) -> String {
    let label = style(state.as_str());
    match state {
        RunState::Completed => label.green().bold().to_string(),
        RunState::Failed => label.red().bold().to_string(),
        _ => label.cyan().to_string(),
    }
}

fn agent_marker(state: AgentState) -> String {
    match state {
        AgentState::Pending => style("·").dim().to_string(),
        AgentState::Running => style("▸").cyan().to_string(),
        AgentState::Succeeded => style("✓").green().to_string(),
        AgentState::Failed => style("✗").red().to_string(),
        AgentState::Skipped => style("-").yellow().to_string(),
    }
}

fn agent_detail(agent: &AgentStatus) -> String {
    let mut detail = agent.state.to_string();
    if let Some(confidence) = agent.confidence {
        let _ = write!(detail, " (confidence {:.2})", confidence);
    }
    if let Some(message) = &agent.message {
        let _ = write!(detail, ": {}", message);
    }
    detail
}

fn render_assets(ctx: &SharedContext) -> String {
    if ctx.assets.is_empty() {
        return "  (none)\n".to_string();
    }
    let mut out = String::new();
    for asset in &ctx.assets {
        let _ = writeln!(
            out,
            "  {:<8} {} [{}]",
            asset.criticality, asset.name, asset.asset_type
        );
    }
    for entry in &ctx.entry_points {
        let _ = writeln!(out, "  entry    {}", entry.name);
    }
    out
}

fn render_paths(ctx: &SharedContext) -> String {
    if ctx.attack_paths.is_empty() {
        return "  (none)\n".to_string();
    }
    let mut out = String::new();
    for path in &ctx.attack_paths {
        let _ = writeln!(
            out,
            "  {} priority {:.2} {}",
            path.id,
            path.effective_priority(),
            path.technique_sequence.join(" → ")
        );
        if let Some(coverage) = path.control_coverage {
            let _ = writeln!(out, "         coverage {:.0}%", coverage * 100.0);
        }
        if !path.rationale.is_empty() {
            let _ = writeln!(out, "         {}", path.rationale);
        }
    }
    out
}

fn render_gaps(ctx: &SharedContext) -> String {
    if ctx.control_gaps.is_empty() {
        return "  (none)\n".to_string();
    }
    let mut out = String::new();
    for gap in &ctx.control_gaps {
        let _ = writeln!(
            out,
            "  {:<8} {} {}: {}",
            gap.severity, gap.attack_path_id, gap.technique_id, gap.description
        );
    }
    out
}

fn render_recommendations(ctx: &SharedContext) -> String {
    if ctx.recommendations.is_empty() {
        return "  (none)\n".to_string();
    }
    let mut out = String::new();
    for rec in &ctx.recommendations {
        let _ = writeln!(
            out,
            "  {:<8} {} ({})",
            rec.priority, rec.description, rec.mapped_technique_id
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{AttackPath, ControlGap, Severity};
    use crate::types::RunId;

    fn context() -> SharedContext {
        SharedContext::new(RunId::new("run-1"), "Web app".into(), None)
    }

    #[test]
    fn test_empty_sections_say_none() {
        let ctx = context();
        assert_eq!(render_assets(&ctx), "  (none)\n");
        assert_eq!(render_recommendations(&ctx), "  (none)\n");
    }

    #[test]
    fn test_paths_show_effective_priority_and_coverage() {
        let mut ctx = context();
        ctx.attack_paths.push(AttackPath {
            id: "AP-001".into(),
            technique_sequence: vec!["T1190".into(), "T1005".into()],
            priority_score: 0.8,
            rationale: String::new(),
            targeted_assets: vec![],
            control_coverage: Some(0.5),
            intel_priority: Some(0.86),
        });
        let rendered = render_paths(&ctx);
        assert!(rendered.contains("AP-001 priority 0.86 T1190 → T1005"));
        assert!(rendered.contains("coverage 50%"));
    }

    #[test]
    fn test_gap_lines_carry_severity() {
        let mut ctx = context();
        ctx.control_gaps.push(ControlGap {
            attack_path_id: "AP-001".into(),
            technique_id: "T1190".into(),
            severity: Severity::High,
            description: "No WAF".into(),
        });
        assert!(render_gaps(&ctx).contains("high     AP-001 T1190: No WAF"));
    }

    #[test]
    fn test_agent_detail_includes_message() {
        let detail = agent_detail(&AgentStatus::failed("Timeout"));
        assert_eq!(detail, "failed: Timeout");
        let detail = agent_detail(&AgentStatus::succeeded(0.75));
        assert_eq!(detail, "succeeded (confidence 0.75)");
    }
}
