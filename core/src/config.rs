//! Configuration Management Module
//!
//! Pipeline configuration with file-based loading (TOML or JSON),
//! environment variable overrides, and validation.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Auto-apply gating mode for review-driven repairs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AutoApplyMode {
    #[default]
    Off,
    Safe,
    Aggressive,
    All,
}

impl std::str::FromStr for AutoApplyMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "off" => Ok(AutoApplyMode::Off),
            "safe" => Ok(AutoApplyMode::Safe),
            "aggressive" => Ok(AutoApplyMode::Aggressive),
            "all" => Ok(AutoApplyMode::All),
            _ => Err(anyhow!("unsupported auto-apply mode: {}", s)),
        }
    }
}

impl std::fmt::Display for AutoApplyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AutoApplyMode::Off => "off",
            AutoApplyMode::Safe => "safe",
            AutoApplyMode::Aggressive => "aggressive",
            AutoApplyMode::All => "all",
        };
        write!(f, "{}", s)
    }
}

/// Naming scheme for published section files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FilenameStyle {
    /// `<id>-<clean_title>.md`
    #[default]
    Id,
    /// `sec-<ci>-<gi>-<si>-<title_slug>.md` when indices parse from the id
    Structured,
}

/// LLM provider family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// OpenAI-compatible chat-completions endpoint
    #[serde(alias = "openai_compat")]
    Openai,
    /// Gemini-family generateContent endpoint
    Gemini,
}

/// One named LLM endpoint (`llms.{key}` in config)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmEntry {
    pub provider: ProviderKind,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_temperature() -> f64 {
    0.7
}

fn default_max_tokens() -> u32 {
    8192
}

/// Main pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Global concurrency bound for all LLM calls
    pub max_parallel_requests: usize,
    /// Global default retry count
    pub retry_times: u32,
    /// Global default inter-attempt delay (seconds)
    pub retry_delay: f64,

    /// Per-call retries for generation
    pub generate_point_retries: u32,
    /// Per-call timeout for generation (seconds)
    pub generate_point_timeout: u64,

    /// Per-call retries for review
    pub review_point_retries: u32,
    /// Per-call timeout for review (seconds)
    pub review_point_timeout: u64,
    /// Inter-attempt delay for review (seconds)
    pub review_retry_delay: f64,

    pub skip_content_review: bool,
    pub skip_fixes: bool,

    pub auto_apply_mode: AutoApplyMode,
    /// Majors below this confidence block aggressive auto-apply
    pub auto_apply_threshold_major: f64,
    /// Whether verdicts whose issues are all `uncategorized` may be auto-applied
    pub auto_apply_uncategorized: bool,

    /// Fail instead of force-releasing stalled toolbox dependency waves
    pub strict_dependencies: bool,

    pub sanitize_mermaid: bool,
    pub filename_style: FilenameStyle,

    /// Intermediate artifacts root (`output/<slug>/...`)
    pub output_root: PathBuf,
    /// Published content root
    pub published_root: PathBuf,

    /// Per-stage attempt count
    pub stage_attempts: u32,
    /// Per-stage timeout (seconds)
    pub stage_timeout: u64,
    /// Inter-attempt delay between stage retries (seconds)
    pub stage_retry_delay: f64,

    /// Role key → llm entry name
    pub node_llm: HashMap<String, String>,
    /// Named LLM endpoints
    pub llms: HashMap<String, LlmEntry>,

    pub debug: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_parallel_requests: 4,
            retry_times: 3,
            retry_delay: 1.0,
            generate_point_retries: 3,
            generate_point_timeout: 300,
            review_point_retries: 2,
            review_point_timeout: 180,
            review_retry_delay: 1.0,
            skip_content_review: false,
            skip_fixes: false,
            auto_apply_mode: AutoApplyMode::Off,
            auto_apply_threshold_major: 0.8,
            auto_apply_uncategorized: false,
            strict_dependencies: false,
            sanitize_mermaid: true,
            filename_style: FilenameStyle::Id,
            output_root: PathBuf::from("output"),
            published_root: PathBuf::from("published"),
            stage_attempts: 2,
            stage_timeout: 3600,
            stage_retry_delay: 5.0,
            node_llm: HashMap::new(),
            llms: HashMap::new(),
            debug: false,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from a TOML or JSON file (by extension)
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| anyhow!("failed to read config file {:?}: {}", path, e))?;

        let mut config: PipelineConfig = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content)
                .map_err(|e| anyhow!("failed to parse JSON config: {}", e))?,
            _ => toml::from_str(&content)
                .map_err(|e| anyhow!("failed to parse TOML config: {}", e))?,
        };

        config.apply_env_overrides();
        config.validate()?;
        info!("loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var("COURSEFORGE_MAX_PARALLEL") {
            if let Ok(parsed) = value.parse::<usize>() {
                self.max_parallel_requests = parsed;
                debug!("applied env override for max_parallel_requests");
            }
        }

        if let Ok(value) = std::env::var("COURSEFORGE_DEBUG") {
            self.debug = value.to_lowercase() == "true" || value == "1";
            debug!("applied env override for debug");
        }

        // Per-entry API keys: COURSEFORGE_<NAME>_API_KEY
        let names: Vec<String> = self.llms.keys().cloned().collect();
        for name in names {
            let var = format!("COURSEFORGE_{}_API_KEY", name.to_uppercase().replace('-', "_"));
            if let Ok(key) = std::env::var(&var) {
                if let Some(entry) = self.llms.get_mut(&name) {
                    entry.api_key = Some(key);
                    debug!("applied env override for {} API key", name);
                }
            }
        }
    }

    /// Validate configuration bounds
    pub fn validate(&self) -> Result<()> {
        if self.max_parallel_requests == 0 {
            return Err(anyhow!("max_parallel_requests must be at least 1"));
        }

        if !(0.0..=1.0).contains(&self.auto_apply_threshold_major) {
            return Err(anyhow!(
                "auto_apply_threshold_major must be in [0,1], got: {}",
                self.auto_apply_threshold_major
            ));
        }

        if self.generate_point_timeout == 0 || self.review_point_timeout == 0 {
            return Err(anyhow!("per-call timeouts must be greater than 0"));
        }

        if self.stage_attempts == 0 {
            return Err(anyhow!("stage_attempts must be at least 1"));
        }

        for (name, entry) in &self.llms {
            if entry.model.is_empty() {
                return Err(anyhow!("llm entry '{}' has empty model name", name));
            }
            if !(0.0..=2.0).contains(&entry.temperature) {
                return Err(anyhow!(
                    "llm entry '{}' has invalid temperature: {}",
                    name,
                    entry.temperature
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_config_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.max_parallel_requests, 4);
        assert_eq!(config.auto_apply_mode, AutoApplyMode::Off);
        assert!(config.sanitize_mermaid);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_auto_apply_mode_from_str() {
        assert_eq!(
            "safe".parse::<AutoApplyMode>().unwrap(),
            AutoApplyMode::Safe
        );
        assert_eq!(
            "AGGRESSIVE".parse::<AutoApplyMode>().unwrap(),
            AutoApplyMode::Aggressive
        );
        assert!("maybe".parse::<AutoApplyMode>().is_err());
    }

    #[test]
    fn test_validation_rejects_bad_bounds() {
        let mut config = PipelineConfig::default();
        config.max_parallel_requests = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.auto_apply_threshold_major = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_toml_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("courseforge.toml");
        fs::write(
            &path,
            r#"
max_parallel_requests = 8
auto_apply_mode = "safe"
skip_content_review = true

[node_llm]
default = "main"

[llms.main]
provider = "openai"
model = "gpt-4o-mini"
api_key = "sk-test"
"#,
        )
        .unwrap();

        let config = PipelineConfig::load(&path).unwrap();
        assert_eq!(config.max_parallel_requests, 8);
        assert_eq!(config.auto_apply_mode, AutoApplyMode::Safe);
        assert!(config.skip_content_review);
        assert_eq!(config.node_llm.get("default").unwrap(), "main");
        assert_eq!(config.llms.get("main").unwrap().model, "gpt-4o-mini");
    }

    #[test]
    fn test_load_json_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("courseforge.json");
        fs::write(
            &path,
            r#"{
                "max_parallel_requests": 2,
                "llms": {
                    "gem": {"provider": "gemini", "model": "gemini-pro", "api_key": "k"}
                }
            }"#,
        )
        .unwrap();

        let config = PipelineConfig::load(&path).unwrap();
        assert_eq!(config.max_parallel_requests, 2);
        assert_eq!(
            config.llms.get("gem").unwrap().provider,
            ProviderKind::Gemini
        );
    }

    #[test]
    fn test_invalid_llm_entry_rejected() {
        let mut config = PipelineConfig::default();
        config.llms.insert(
            "bad".to_string(),
            LlmEntry {
                provider: ProviderKind::Openai,
                model: String::new(),
                api_key: None,
                base_url: None,
                temperature: 0.7,
                max_tokens: 1024,
            },
        );
        assert!(config.validate().is_err());
    }
}
