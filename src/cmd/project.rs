//! Project initialization: `playbook init`.

use anyhow::Result;

pub fn cmd_init(project_dir: &std::path::Path) -> Result<()> {
    use playbook::init::{init_project, is_initialized};

    let was_initialized = is_initialized(project_dir);

    let result = init_project(project_dir)?;

    if result.created {
        println!(
            "Initialized playbook project at {}",
            result.playbook_dir.display()
        );
        println!();
        println!("Created directory structure:");
        println!("  .playbook/");
        println!("  ├── playbook.toml          # Engine configuration");
        println!("  ├── audit/                 # Audit exports");
        println!("  └── playbooks/example.yaml # Sample playbook");
        println!();
        println!("Next steps:");
        println!("  1. Run `playbook import .playbook/playbooks/example.yaml`");
        println!("  2. Run `playbook start <playbook-id> --advance`");
        println!("  3. Run `playbook approve <step-run-id>` when a step awaits approval");
    } else if was_initialized {
        println!(
            "Playbook project already initialized at {}",
            result.playbook_dir.display()
        );
        println!("Directory structure verified.");
    } else {
        println!(
            "Completed playbook initialization at {}",
            result.playbook_dir.display()
        );
    }

    Ok(())
}
