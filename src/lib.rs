//! Playbook run engine.
//!
//! Playbooks are dependency-ordered sets of steps. A run of a playbook is
//! advanced in passes: each pass admits every step whose dependencies are
//! done, evaluates its trigger condition, parks it for human approval when
//! required, and otherwise hands its action to an executor. A run that has
//! nothing left to do is scored and finalized.
//!
//! The main entry point is [`engine::Engine`].

pub mod action;
pub mod audit;
pub mod condition;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod init;
pub mod logging;
pub mod narrator;
pub mod store;
pub mod ui;
