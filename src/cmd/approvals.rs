//! Approval decisions: `playbook approve`, `playbook reject`.

use anyhow::Result;
use uuid::Uuid;

use playbook::engine::Decision;
use playbook::ui::{icons, step_status};

use super::AppContext;
use super::runs::print_advance;

pub async fn cmd_decide(
    ctx: &AppContext,
    step_run_id: Uuid,
    decision: Decision,
    notes: Option<&str>,
) -> Result<()> {
    let result = ctx
        .engine
        .decide(step_run_id, decision, notes, &ctx.actor)
        .await?;

    if ctx.json {
        return ctx.print_json(&result);
    }
    let icon = match decision {
        Decision::Approve => &icons::CHECK,
        Decision::Reject => &icons::SKIP,
    };
    println!(
        "{}Step '{}' {} by {} ({})",
        icon,
        result.step_run.step_id,
        match decision {
            Decision::Approve => "approved",
            Decision::Reject => "rejected",
        },
        ctx.actor,
        step_status(result.step_run.status)
    );
    print_advance(ctx, &result.advance)
}
