//! Run commands: start, advance, cancel/abort, show, list, sweep.

use anyhow::Result;
use chrono::Utc;
use console::style;
use uuid::Uuid;

use playbook::engine::{AdvanceResult, RunDetail, StartRun};
use playbook::ui::{self, icons, short_id};
use playbook_common::{Run, RunState, RunStatus, RunVariant, StepRun};

use super::AppContext;

pub async fn cmd_start(
    ctx: &AppContext,
    playbook_id: Uuid,
    suite: bool,
    metrics: &[(String, f64)],
    notes: &[String],
    advance: bool,
) -> Result<()> {
    let mut state = RunState::new();
    for (name, value) in metrics {
        state = state.with_metric(name, *value);
    }
    for note in notes {
        state = state.with_note(note);
    }
    let variant = if suite {
        RunVariant::Suite
    } else {
        RunVariant::Playbook
    };

    let run = ctx.engine.start_run(
        playbook_id,
        StartRun::new(&ctx.actor)
            .with_variant(variant)
            .with_state(state),
    )?;

    if advance {
        let result = ctx.engine.advance(run.id).await?;
        return print_advance(ctx, &result);
    }

    if ctx.json {
        return ctx.print_json(&run);
    }
    println!(
        "{}Started run {} of '{}'",
        icons::SPARKLE,
        style(run.id).bold(),
        run.definition.name
    );
    println!("  Run `playbook advance {}` to begin", run.id);
    Ok(())
}

pub async fn cmd_advance(ctx: &AppContext, run_id: Uuid) -> Result<()> {
    let result = ctx.engine.advance(run_id).await?;
    print_advance(ctx, &result)
}

pub fn cmd_cancel(ctx: &AppContext, run_id: Uuid, reason: &str, abort: bool) -> Result<()> {
    let run = if abort {
        ctx.engine.abort(run_id, reason, &ctx.actor)?
    } else {
        ctx.engine.cancel(run_id, reason, &ctx.actor)?
    };

    if ctx.json {
        return ctx.print_json(&run);
    }
    println!(
        "{}Run {} {}: {}",
        icons::STOP,
        run.id,
        ui::run_status(run.status),
        reason
    );
    Ok(())
}

pub fn cmd_show(ctx: &AppContext, run_id: Uuid) -> Result<()> {
    let detail = ctx.engine.get_run(run_id)?;
    if ctx.json {
        return ctx.print_json(&detail);
    }
    print_run(&detail);
    Ok(())
}

pub fn cmd_runs(ctx: &AppContext, status: Option<RunStatus>) -> Result<()> {
    let runs = ctx.engine.list_runs(status)?;

    if ctx.json {
        return ctx.print_json(&runs);
    }
    if runs.is_empty() {
        println!("No runs found");
        return Ok(());
    }

    println!(
        "{:<10} {:<28} {:<18} {:>4} {:>4} {:>4} {:>6}  CREATED",
        "RUN", "PLAYBOOK", "STATUS", "OK", "FAIL", "SKIP", "RISK"
    );
    for run in &runs {
        println!(
            "{:<10} {:<28} {:<18} {:>4} {:>4} {:>4} {:>6}  {}",
            short_id(&run.id),
            run.definition.name,
            ui::run_status(run.status),
            run.steps_completed,
            run.steps_failed,
            run.steps_skipped,
            ui::score(run.risk_score),
            run.created_at.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}

pub async fn cmd_sweep(ctx: &AppContext) -> Result<()> {
    let report = ctx.engine.sweep(Utc::now()).await?;

    if ctx.json {
        return ctx.print_json(&report);
    }
    println!(
        "{}Swept {} run(s), {} failure(s)",
        icons::CLOCK,
        report.advanced.len(),
        report.failures.len()
    );
    for result in &report.advanced {
        println!(
            "  {}{} {}",
            icons::run_icon(result.run.status),
            short_id(&result.run.id),
            ui::run_status(result.run.status)
        );
    }
    for failure in &report.failures {
        println!("  {}{} {}", icons::CROSS, short_id(&failure.run_id), style(&failure.error).red());
    }
    Ok(())
}

pub fn print_advance(ctx: &AppContext, result: &AdvanceResult) -> Result<()> {
    if ctx.json {
        return ctx.print_json(result);
    }

    print_header(&result.run);
    if result.processed.is_empty() {
        println!("  No steps changed");
    }
    for step in &result.processed {
        print_step(step);
    }
    print_footer(&result.run, result.next_pending.as_ref());
    Ok(())
}

pub fn print_run(detail: &RunDetail) {
    print_header(&detail.run);
    for step in &detail.steps {
        print_step(step);
    }
    print_footer(&detail.run, detail.steps.iter().find(|s| !s.is_terminal()));
}

fn print_header(run: &Run) {
    println!();
    println!(
        "{}{} {} [{}]",
        icons::run_icon(run.status),
        style(&run.definition.name).bold(),
        style(run.id).dim(),
        ui::run_status(run.status)
    );
}

fn print_step(step: &StepRun) {
    let mut line = format!(
        "  {}{:<3} {:<24} {}",
        icons::step_icon(step.status),
        step.position,
        step.step_id,
        ui::step_status(step.status)
    );
    if let Some(error) = &step.error {
        line.push_str(&format!("  {}", style(error).red()));
    } else if let Some(summary) = step.outcome.as_ref().and_then(|o| o.summary.as_ref()) {
        line.push_str(&format!("  {}", style(summary).dim()));
    }
    println!("{}", line);
}

fn print_footer(run: &Run, next: Option<&StepRun>) {
    println!();
    println!(
        "  completed {}  failed {}  skipped {}  risk {}  confidence {}",
        run.steps_completed,
        run.steps_failed,
        run.steps_skipped,
        ui::score(run.risk_score),
        ui::score(run.confidence_score)
    );
    if let Some(error) = &run.error {
        println!("  error: {}", style(error).red());
    }
    if let Some(narrative) = &run.narrative {
        println!();
        println!("  {}", narrative);
    }
    if run.status == RunStatus::AwaitingApproval
        && let Some(step) = next
    {
        println!();
        println!(
            "{}Step '{}' awaits approval: `playbook approve {}` or `playbook reject {}`",
            icons::GATE,
            step.step_id,
            step.id,
            step.id
        );
    }
}
