//! Error types for the checkout suite

use thiserror::Error;

#[derive(Error, Debug)]
pub enum E2eError {
    #[error("Staging site unreachable at {url} after {attempts} attempts")]
    SiteUnreachable { url: String, attempts: u32 },

    #[error("Playwright not found. Install with: npm install playwright && npx playwright install")]
    PlaywrightNotFound,

    #[error("Playwright error: {0}")]
    Playwright(String),

    #[error("Playwright bridge closed unexpectedly")]
    BridgeClosed,

    #[error("Scenario parse error: {0}")]
    SpecParse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Fixture not found: {kind} '{name}'")]
    FixtureNotFound { kind: &'static str, name: String },

    #[error("Step failed: {step} - {reason}")]
    StepFailed { step: String, reason: String },

    #[error("Assertion failed: {0}")]
    AssertionFailed(String),

    #[error(
        "Action '{action}' exhausted {attempts} attempt(s) in {elapsed_ms} ms at {location}{}",
        last_error_suffix(.last_error)
    )]
    ActionExhausted {
        action: String,
        attempts: u32,
        elapsed_ms: u64,
        location: String,
        last_error: Option<String>,
    },

    #[error("Condition '{condition}' could not be evaluated: {reason}")]
    ConditionEvaluation { condition: String, reason: String },

    #[error("Deadline exceeded waiting for {what} after {elapsed_ms} ms ({probes} probe(s)) at {location}")]
    DeadlineExceeded {
        what: String,
        elapsed_ms: u64,
        probes: u32,
        location: String,
    },

    #[error("Timeout waiting for: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML write error: {0}")]
    TomlWrite(#[from] toml::ser::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),
}

pub type E2eResult<T> = Result<T, E2eError>;

fn last_error_suffix(last_error: &Option<String>) -> String {
    last_error
        .as_deref()
        .map(|e| format!(" (last error: {e})"))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_exhausted_message_carries_diagnostics() {
        let err = E2eError::ActionExhausted {
            action: "click Bayar Sekarang".to_string(),
            attempts: 3,
            elapsed_ms: 45_000,
            location: "https://stg.sfshop.id/checkout".to_string(),
            last_error: Some("element detached".to_string()),
        };
        let msg = err.to_string();
        assert!(msg.contains("click Bayar Sekarang"));
        assert!(msg.contains("3 attempt(s)"));
        assert!(msg.contains("in 45000 ms"));
        assert!(msg.contains("/checkout"));
        assert!(msg.contains("element detached"));
    }

    #[test]
    fn test_action_exhausted_without_last_error() {
        let err = E2eError::ActionExhausted {
            action: "click".to_string(),
            attempts: 1,
            elapsed_ms: 200,
            location: "about:blank".to_string(),
            last_error: None,
        };
        assert_eq!(err.to_string(), "Action 'click' exhausted 1 attempt(s) in 200 ms at about:blank");
    }
}
