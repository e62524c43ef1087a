//! Playbook registration and listing: `playbook import`, `playbook playbooks`.

use std::path::Path;

use anyhow::{Context, Result};
use console::style;

use playbook::dag::DagBuilder;
use playbook::ui::{icons, short_id};
use playbook_common::PlaybookDefinition;

use super::AppContext;

/// Parse a playbook file. `.json` files are read as JSON, anything else as YAML.
pub fn load_definition(file: &Path) -> Result<PlaybookDefinition> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read playbook file: {}", file.display()))?;
    let is_json = file
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if is_json {
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse playbook JSON: {}", file.display()))
    } else {
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse playbook YAML: {}", file.display()))
    }
}

pub fn cmd_import(ctx: &AppContext, file: &Path) -> Result<()> {
    let definition = load_definition(file)?;
    let playbook = ctx.engine.register_playbook(definition)?;

    if ctx.json {
        return ctx.print_json(&playbook);
    }
    println!(
        "{}Registered playbook '{}' ({} steps)",
        icons::CHECK,
        style(&playbook.name).bold(),
        playbook.steps.len()
    );
    println!("  id: {}", playbook.id);

    let graph = DagBuilder::new(&playbook).build()?;
    println!();
    println!("Execution plan:");
    for (i, wave) in graph.compute_waves().iter().enumerate() {
        println!("  wave {}: {}", i, wave.join(", "));
    }
    Ok(())
}

pub fn cmd_playbooks(ctx: &AppContext) -> Result<()> {
    let playbooks = ctx.engine.list_playbooks()?;

    if ctx.json {
        return ctx.print_json(&playbooks);
    }
    if playbooks.is_empty() {
        println!("No playbooks registered for org '{}'", ctx.engine.org_id());
        return Ok(());
    }

    println!("{:<10} {:<32} {:>5}  ID", "SHORT", "NAME", "STEPS");
    for playbook in &playbooks {
        println!(
            "{:<10} {:<32} {:>5}  {}",
            short_id(&playbook.id),
            playbook.name,
            playbook.steps.len(),
            style(playbook.id).dim()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_definition_yaml_and_json() {
        let dir = tempdir().unwrap();
        let yaml = dir.path().join("contain.yaml");
        std::fs::write(&yaml, playbook::init::EXAMPLE_PLAYBOOK).unwrap();
        let definition = load_definition(&yaml).unwrap();
        assert_eq!(definition.name, "phishing-containment");

        let json = dir.path().join("contain.JSON");
        std::fs::write(&json, serde_json::to_string(&definition).unwrap()).unwrap();
        assert_eq!(load_definition(&json).unwrap(), definition);
    }

    #[test]
    fn test_load_definition_reports_parse_errors() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("broken.yaml");
        std::fs::write(&file, "name: [unclosed").unwrap();
        let err = load_definition(&file).unwrap_err();
        assert!(err.to_string().contains("broken.yaml"));
    }
}
