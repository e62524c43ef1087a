//! Step dependency graph.
//!
//! Playbook steps form a directed acyclic graph through `depends_on`. This
//! module validates that graph when a playbook is registered or a run starts,
//! and answers readiness questions while a run is advanced.
//!
//! ## Example
//!
//! ```no_run
//! use playbook::dag::DagBuilder;
//! use playbook_common::{ActionDescriptor, PlaybookDefinition, StepDefinition};
//!
//! # fn example() -> Result<(), playbook::errors::DefinitionError> {
//! let action = ActionDescriptor::new("simulate", serde_json::json!({}));
//! let playbook = PlaybookDefinition::new("acme", "phishing", vec![
//!     StepDefinition::new("triage", 1, action.clone()),
//!     StepDefinition::new("isolate", 2, action.clone()).with_depends_on(&["triage"]),
//!     StepDefinition::new("notify", 3, action).with_depends_on(&["triage"]),
//! ]);
//!
//! let graph = DagBuilder::new(&playbook).build()?;
//! // Wave 0: [triage]
//! // Wave 1: [isolate, notify]
//! let waves = graph.compute_waves();
//! # Ok(())
//! # }
//! ```

mod builder;
mod scheduler;

pub use builder::{DagBuilder, StepGraph, StepIndex, validate};
pub use scheduler::dependencies_satisfied;
