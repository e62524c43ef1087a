//! Configuration for the playbook engine.
//!
//! Settings are read from `.playbook/playbook.toml` and layered:
//! file → environment (`PLAYBOOK_*`, `.env` via dotenvy) → CLI flags.
//!
//! # Configuration File Format
//!
//! ```toml
//! [engine]
//! org_id = "acme"
//! database = "playbook.db"
//! claim_lease_secs = 300
//!
//! [retry]
//! max_attempts = 3
//!
//! [scoring]
//! failure_weight = 25.0
//! negative_impact_weight = 1.0
//! positive_impact_weight = 1.0
//! max_score = 100.0
//!
//! [narrator]
//! enabled = true
//! endpoint = "http://localhost:8080/narrate"
//! timeout_secs = 30
//!
//! [logging]
//! level = "info"
//! format = "pretty"
//! directory = "logs"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name of the per-project directory holding config, database and logs.
pub const PROJECT_DIR_NAME: &str = ".playbook";
pub const CONFIG_FILE_NAME: &str = "playbook.toml";

pub const ENV_ORG_ID: &str = "PLAYBOOK_ORG_ID";
pub const ENV_DATABASE: &str = "PLAYBOOK_DATABASE";
pub const ENV_NARRATOR_ENDPOINT: &str = "PLAYBOOK_NARRATOR_ENDPOINT";
pub const ENV_MAX_ATTEMPTS: &str = "PLAYBOOK_MAX_ATTEMPTS";

/// Tenant and storage settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSection {
    /// Organization every operation is scoped to
    #[serde(default = "default_org_id")]
    pub org_id: String,
    /// SQLite database path, relative to `.playbook/` unless absolute
    #[serde(default = "default_database")]
    pub database: String,
    /// How long an advancer's claim on a run lasts without renewal
    #[serde(default = "default_claim_lease_secs")]
    pub claim_lease_secs: u64,
}

fn default_org_id() -> String {
    "default".to_string()
}

fn default_database() -> String {
    "playbook.db".to_string()
}

fn default_claim_lease_secs() -> u64 {
    300
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            org_id: default_org_id(),
            database: default_database(),
            claim_lease_secs: default_claim_lease_secs(),
        }
    }
}

/// How many times a transiently failing step may be attempted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first. `1` disables retries.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_max_attempts() -> u32 {
    1
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
        }
    }
}

impl RetryPolicy {
    /// Whether another attempt is allowed after `attempts_made` failures.
    pub fn allows_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }
}

/// Weights for the risk and confidence scores computed at finalization.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Risk added per failed step
    #[serde(default = "default_failure_weight")]
    pub failure_weight: f64,
    /// Risk added per unit of accumulated negative impact
    #[serde(default = "default_unit_weight")]
    pub negative_impact_weight: f64,
    /// Confidence added per unit of accumulated positive impact
    #[serde(default = "default_unit_weight")]
    pub positive_impact_weight: f64,
    /// Upper bound for both scores
    #[serde(default = "default_max_score")]
    pub max_score: f64,
}

fn default_failure_weight() -> f64 {
    25.0
}

fn default_unit_weight() -> f64 {
    1.0
}

fn default_max_score() -> f64 {
    100.0
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            failure_weight: default_failure_weight(),
            negative_impact_weight: default_unit_weight(),
            positive_impact_weight: default_unit_weight(),
            max_score: default_max_score(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarratorConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_narrator_timeout")]
    pub timeout_secs: u64,
}

fn default_narrator_timeout() -> u64 {
    30
}

impl Default for NarratorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: None,
            timeout_secs: default_narrator_timeout(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    /// Daily-rolling JSON log files go here, relative to `.playbook/`
    #[serde(default)]
    pub directory: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            directory: None,
        }
    }
}

/// Root of `playbook.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlaybookToml {
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub narrator: NarratorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl PlaybookToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse playbook.toml")
    }

    /// Load from `<dir>/playbook.toml`, or defaults if the file doesn't exist.
    pub fn load_or_default(playbook_dir: &Path) -> Result<Self> {
        let config_path = playbook_dir.join(CONFIG_FILE_NAME);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize playbook.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Overlay environment variables read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(org_id) = lookup(ENV_ORG_ID).filter(|v| !v.is_empty()) {
            self.engine.org_id = org_id;
        }
        if let Some(database) = lookup(ENV_DATABASE).filter(|v| !v.is_empty()) {
            self.engine.database = database;
        }
        if let Some(endpoint) = lookup(ENV_NARRATOR_ENDPOINT).filter(|v| !v.is_empty()) {
            self.narrator.endpoint = Some(endpoint);
            self.narrator.enabled = true;
        }
        if let Some(attempts) = lookup(ENV_MAX_ATTEMPTS).and_then(|v| v.parse().ok()) {
            self.retry.max_attempts = attempts;
        }
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.engine.org_id.trim().is_empty() {
            warnings.push("engine.org_id is empty".to_string());
        }
        if self.engine.claim_lease_secs == 0 {
            warnings.push(
                "engine.claim_lease_secs is 0: concurrent advancers will not exclude each other"
                    .to_string(),
            );
        }
        if self.retry.max_attempts == 0 {
            warnings.push(
                "retry.max_attempts is 0: steps will still be attempted once".to_string(),
            );
        }
        let scoring = &self.scoring;
        if scoring.max_score <= 0.0 {
            warnings.push(format!(
                "scoring.max_score must be positive, got {}",
                scoring.max_score
            ));
        }
        for (name, weight) in [
            ("failure_weight", scoring.failure_weight),
            ("negative_impact_weight", scoring.negative_impact_weight),
            ("positive_impact_weight", scoring.positive_impact_weight),
        ] {
            if weight < 0.0 {
                warnings.push(format!("scoring.{} is negative ({})", name, weight));
            }
        }
        if self.narrator.enabled && self.narrator.endpoint.is_none() {
            warnings.push("narrator.enabled is set but narrator.endpoint is missing".to_string());
        }
        if tracing_subscriber::EnvFilter::try_new(&self.logging.level).is_err() {
            warnings.push(format!(
                "Invalid logging.level '{}': expected a tracing filter such as 'info' or 'playbook=debug'",
                self.logging.level
            ));
        }

        warnings
    }
}

/// Resolved runtime configuration.
///
/// It merges settings from:
/// 1. playbook.toml file
/// 2. Environment variables
/// 3. CLI arguments
#[derive(Debug, Clone)]
pub struct PlaybookConfig {
    pub project_dir: PathBuf,
    /// Path to the .playbook directory
    pub playbook_dir: PathBuf,
    pub toml: PlaybookToml,
    /// CLI override: verbose logging
    pub verbose: bool,
}

impl PlaybookConfig {
    /// Load config for a project directory, applying the process environment.
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let playbook_dir = project_dir.join(PROJECT_DIR_NAME);
        let mut toml = PlaybookToml::load_or_default(&playbook_dir)?;
        toml.apply_env(|key| std::env::var(key).ok());

        Ok(Self {
            project_dir,
            playbook_dir,
            toml,
            verbose: false,
        })
    }

    /// Create a PlaybookConfig with CLI overrides.
    pub fn with_cli_args(project_dir: PathBuf, verbose: bool, org: Option<String>) -> Result<Self> {
        let mut config = Self::new(project_dir)?;
        config.verbose = verbose;
        if let Some(org) = org {
            config.toml.engine.org_id = org;
        }
        Ok(config)
    }

    pub fn is_initialized(&self) -> bool {
        self.config_file().exists()
    }

    pub fn config_file(&self) -> PathBuf {
        self.playbook_dir.join(CONFIG_FILE_NAME)
    }

    pub fn org_id(&self) -> &str {
        &self.toml.engine.org_id
    }

    /// Database path, resolved against `.playbook/`.
    pub fn database_path(&self) -> PathBuf {
        self.resolve(&self.toml.engine.database)
    }

    pub fn log_dir(&self) -> Option<PathBuf> {
        self.toml.logging.directory.as_deref().map(|d| self.resolve(d))
    }

    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.playbook_dir.join(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = PlaybookToml::default();
        assert_eq!(config.engine.org_id, "default");
        assert_eq!(config.engine.database, "playbook.db");
        assert_eq!(config.engine.claim_lease_secs, 300);
        assert_eq!(config.retry.max_attempts, 1);
        assert_eq!(config.scoring.failure_weight, 25.0);
        assert_eq!(config.scoring.max_score, 100.0);
        assert!(!config.narrator.enabled);
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_parse_partial_file() {
        let config = PlaybookToml::parse(
            r#"
[engine]
org_id = "acme"

[retry]
max_attempts = 3

[logging]
format = "json"
"#,
        )
        .unwrap();
        assert_eq!(config.engine.org_id, "acme");
        assert_eq!(config.engine.database, "playbook.db");
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.scoring, ScoringConfig::default());
    }

    #[test]
    fn test_parse_rejects_bad_types() {
        let result = PlaybookToml::parse("[retry]\nmax_attempts = \"three\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        let mut config = PlaybookToml::default();
        config.engine.org_id = "globex".to_string();
        config.narrator.endpoint = Some("http://narrator".to_string());
        config.save(&path).unwrap();

        let loaded = PlaybookToml::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempdir().unwrap();
        let config = PlaybookToml::load_or_default(dir.path()).unwrap();
        assert_eq!(config, PlaybookToml::default());
    }

    #[test]
    fn test_apply_env_overrides_file() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_ORG_ID, "initech"),
            (ENV_NARRATOR_ENDPOINT, "http://narrator/summarize"),
            (ENV_MAX_ATTEMPTS, "4"),
            (ENV_DATABASE, ""),
        ]);
        let mut config = PlaybookToml::default();
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.engine.org_id, "initech");
        assert_eq!(config.engine.database, "playbook.db");
        assert!(config.narrator.enabled);
        assert_eq!(config.retry.max_attempts, 4);
    }

    #[test]
    fn test_validate_warnings() {
        let mut config = PlaybookToml::default();
        config.engine.claim_lease_secs = 0;
        config.retry.max_attempts = 0;
        config.scoring.failure_weight = -1.0;
        config.narrator.enabled = true;
        config.logging.level = "playbook=loud".to_string();

        let warnings = config.validate();
        assert_eq!(warnings.len(), 5);
        assert!(warnings.iter().any(|w| w.contains("claim_lease_secs")));
        assert!(warnings.iter().any(|w| w.contains("max_attempts")));
        assert!(warnings.iter().any(|w| w.contains("failure_weight")));
        assert!(warnings.iter().any(|w| w.contains("narrator.endpoint")));
        assert!(warnings.iter().any(|w| w.contains("logging.level")));
    }

    #[test]
    fn test_retry_policy() {
        let policy = RetryPolicy { max_attempts: 3 };
        assert!(policy.allows_retry(1));
        assert!(policy.allows_retry(2));
        assert!(!policy.allows_retry(3));
        assert!(!RetryPolicy::default().allows_retry(1));
    }

    #[test]
    fn test_runtime_paths_resolve_against_playbook_dir() {
        let dir = tempdir().unwrap();
        let config = PlaybookConfig::with_cli_args(dir.path().to_path_buf(), true, Some("acme".into()))
            .unwrap();
        assert!(config.verbose);
        assert_eq!(config.org_id(), "acme");
        assert!(config.database_path().ends_with(".playbook/playbook.db"));
        assert!(config.log_dir().is_none());
        assert!(!config.is_initialized());
    }
}
