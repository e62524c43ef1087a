//! Audit trail view and export: `playbook audit`.

use anyhow::Result;
use console::style;
use uuid::Uuid;

use playbook::audit::{AuditExport, export_run};
use playbook::init::AUDIT_DIR;
use playbook::ui::icons;

use super::AppContext;

pub fn cmd_audit(ctx: &AppContext, run_id: Uuid, export: bool) -> Result<()> {
    let detail = ctx.engine.get_run(run_id)?;
    let events = ctx.engine.audit_events(run_id)?;

    if export {
        let dir = ctx.config.playbook_dir.join(AUDIT_DIR);
        let snapshot = AuditExport::new(detail.run, detail.steps, events.clone());
        let path = export_run(&dir, &snapshot)?;
        if !ctx.json {
            println!("{}Exported audit trail to {}", icons::FILE_NEW, path.display());
        }
    }

    if ctx.json {
        return ctx.print_json(&events);
    }
    for event in &events {
        println!(
            "{:>4}  {}  {:<22} {:<10} {}",
            event.seq,
            event.created_at.format("%Y-%m-%d %H:%M:%S"),
            style(event.event_type).bold(),
            event.actor,
            style(&event.payload).dim()
        );
    }
    Ok(())
}
