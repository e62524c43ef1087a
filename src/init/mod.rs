//! Project initialization.
//!
//! `playbook init` creates the `.playbook/` directory in a project:
//!
//! ```text
//! .playbook/
//! ├── playbook.toml        # Engine configuration (defaults)
//! ├── playbook.db          # Created on first use
//! ├── audit/               # JSON exports written by `playbook audit --export`
//! └── playbooks/
//!     └── example.yaml     # Sample playbook for `playbook import`
//! ```

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::{CONFIG_FILE_NAME, PROJECT_DIR_NAME, PlaybookToml};

pub const AUDIT_DIR: &str = "audit";
pub const PLAYBOOKS_DIR: &str = "playbooks";
pub const EXAMPLE_PLAYBOOK_FILE: &str = "example.yaml";

/// A small containment playbook exercising conditions, approval and skip-on-failure.
pub const EXAMPLE_PLAYBOOK: &str = r#"name: phishing-containment
description: Contain a reported phishing email
steps:
  - id: triage
    position: 1
    action:
      kind: simulate
      params:
        summary: "Reported email contains credential harvesting link"
        impact: { severity: 7 }
        entries:
          - { category: phishing, severity: high }
  - id: block_sender
    position: 2
    depends_on: [triage]
    condition:
      type: metric_threshold
      params: { field: severity, threshold: 5 }
    action:
      kind: simulate
      params:
        summary: "Sender domain blocked at gateway"
        impact: { exposure: -3 }
  - id: purge_mailboxes
    position: 3
    depends_on: [block_sender]
    requires_approval: true
    action:
      kind: simulate
      params:
        summary: "Purged 14 copies from user mailboxes"
        impact: { exposure: -5, coverage: 14 }
  - id: notify_users
    position: 4
    depends_on: [purge_mailboxes]
    skip_on_failure: true
    action:
      kind: simulate
      params: { summary: "Users notified" }
"#;

/// Result of initializing a playbook project.
#[derive(Debug)]
pub struct InitResult {
    /// Path to the .playbook directory
    pub playbook_dir: PathBuf,
    /// Whether the directory was newly created (false if it already existed)
    pub created: bool,
}

/// Initialize a playbook project in the given directory.
///
/// Re-running on an existing project fills in anything missing and never
/// overwrites existing files.
pub fn init_project(project_dir: &Path) -> Result<InitResult> {
    let playbook_dir = project_dir.join(PROJECT_DIR_NAME);
    let created = !playbook_dir.exists();

    std::fs::create_dir_all(&playbook_dir)
        .with_context(|| format!("Failed to create directory: {}", playbook_dir.display()))?;
    ensure_directory_structure(&playbook_dir)?;

    Ok(InitResult {
        playbook_dir,
        created,
    })
}

fn ensure_directory_structure(playbook_dir: &Path) -> Result<()> {
    for sub in [AUDIT_DIR, PLAYBOOKS_DIR] {
        let dir = playbook_dir.join(sub);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
    }

    let config_file = playbook_dir.join(CONFIG_FILE_NAME);
    if !config_file.exists() {
        PlaybookToml::default().save(&config_file)?;
    }

    let example = playbook_dir.join(PLAYBOOKS_DIR).join(EXAMPLE_PLAYBOOK_FILE);
    if !example.exists() {
        std::fs::write(&example, EXAMPLE_PLAYBOOK)
            .with_context(|| format!("Failed to write {}", example.display()))?;
    }

    Ok(())
}

/// Check if a project is already initialized.
pub fn is_initialized(project_dir: &Path) -> bool {
    project_dir
        .join(PROJECT_DIR_NAME)
        .join(CONFIG_FILE_NAME)
        .exists()
}
