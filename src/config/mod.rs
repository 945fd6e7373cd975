use crate::{Result, SpiralError};
use serde::{Deserialize, Serialize};
use std::env;

/// Runtime configuration for the coordination engine.
///
/// Only one environment variable is contractually required: the LLM
/// provider's API key. Its absence on any path that would invoke the
/// adapter is a fatal, fail-fast error at startup rather than a deferred
/// runtime failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub llm: LlmConfig,
    pub supervisor: SupervisorConfig,
    pub evidence: EvidenceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Worker agent slots available if the agent registry does not dictate one.
    pub default_agent_slots: usize,
    /// Max retry attempts for a transient error before a SYNC blocker is raised.
    pub max_transient_retries: u32,
    /// Max tactical interventions per task before a SYNC blocker is raised.
    pub max_interventions: u32,
    pub working_hours_per_day: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceConfig {
    pub require_coverage: bool,
    pub min_coverage: f64,
    pub allow_skipped_tests: bool,
    pub min_pass_rate: f64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            default_agent_slots: 4,
            max_transient_retries: 3,
            max_interventions: 2,
            working_hours_per_day: 8.0,
        }
    }
}

impl Default for EvidenceConfig {
    fn default() -> Self {
        Self {
            require_coverage: true,
            min_coverage: 85.0,
            allow_skipped_tests: false,
            min_pass_rate: 100.0,
        }
    }
}

impl Config {
    /// Load configuration from the environment, failing fast on a missing or
    /// malformed LLM API key.
    pub fn load() -> Result<Self> {
        match dotenvy::dotenv() {
            Ok(path) => tracing::info!("Loaded .env file from: {:?}", path),
            Err(e) => tracing::debug!("No .env file loaded: {}", e),
        }

        let api_key = env::var("LLM_API_KEY").map_err(|_| {
            SpiralError::ConfigurationError(
                "LLM_API_KEY environment variable is required to invoke the LLM adapter"
                    .to_string(),
            )
        })?;

        if api_key.trim().is_empty() {
            return Err(SpiralError::ConfigurationError(
                "LLM_API_KEY cannot be empty".to_string(),
            ));
        }

        let llm = LlmConfig {
            api_key,
            base_url: env::var("LLM_BASE_URL")
                .unwrap_or_else(|_| "https://api.anthropic.com".to_string()),
            model: env::var("LLM_MODEL").unwrap_or_else(|_| "claude-3-5-sonnet".to_string()),
            max_tokens: env::var("LLM_MAX_TOKENS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(4096),
            temperature: env::var("LLM_TEMPERATURE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0.7),
        };

        let supervisor = SupervisorConfig {
            default_agent_slots: env::var("SUPERVISOR_AGENT_SLOTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(4),
            max_transient_retries: env::var("SUPERVISOR_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3),
            max_interventions: env::var("SUPERVISOR_MAX_INTERVENTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(2),
            working_hours_per_day: env::var("SUPERVISOR_WORKING_HOURS_PER_DAY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8.0),
        };

        let evidence = EvidenceConfig {
            require_coverage: env::var("EVIDENCE_REQUIRE_COVERAGE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(true),
            min_coverage: env::var("EVIDENCE_MIN_COVERAGE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(85.0),
            allow_skipped_tests: env::var("EVIDENCE_ALLOW_SKIPPED_TESTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
            min_pass_rate: env::var("EVIDENCE_MIN_PASS_RATE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(100.0),
        };

        Ok(Config {
            llm,
            supervisor,
            evidence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    #[test]
    #[serial]
    fn load_fails_without_api_key() {
        env::remove_var("LLM_API_KEY");
        let result = Config::load();
        assert!(result.is_err());
    }

    #[test]
    #[serial]
    fn load_succeeds_with_api_key() {
        env::set_var("LLM_API_KEY", "sk-test-key-0123456789");
        let config = Config::load().expect("config should load");
        assert_eq!(config.llm.api_key, "sk-test-key-0123456789");
        assert_eq!(config.supervisor.max_interventions, 2);
        env::remove_var("LLM_API_KEY");
    }
}
