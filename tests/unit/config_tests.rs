//! Unit tests for engine configuration parsing and validation.

use std::time::Duration;

use agent_accord::{AppError, EngineConfig};

#[test]
fn empty_toml_yields_documented_defaults() {
    let config = EngineConfig::from_toml_str("").expect("empty config must parse");

    assert_eq!(config.negotiation.max_rounds, 10);
    assert_eq!(config.negotiation.llm_retries, 2);
    assert_eq!(config.negotiation.round_timeout_seconds, 60);
    assert_eq!(config.negotiation.code_generation_timeout_seconds, 60);
    assert_eq!(config.code_path.to_str(), Some("generated_protocols"));
}

#[test]
fn negotiation_overrides_are_applied() {
    let raw = r#"
code_path = "out/protocols"

[negotiation]
max_rounds = 4
llm_retries = 1
round_timeout_seconds = 5
llm_timeout_seconds = 30
code_generation_timeout_seconds = 10
"#;
    let config = EngineConfig::from_toml_str(raw).expect("config must parse");

    assert_eq!(config.negotiation.max_rounds, 4);
    assert_eq!(config.negotiation.llm_retries, 1);
    assert_eq!(config.negotiation.round_timeout(), Duration::from_secs(5));
    assert_eq!(config.negotiation.llm_timeout(), Duration::from_secs(30));
    assert_eq!(
        config.negotiation.code_generation_timeout(),
        Duration::from_secs(10)
    );
    assert_eq!(config.code_path.to_str(), Some("out/protocols"));
}

#[test]
fn llm_section_overrides_are_applied() {
    let raw = r#"
[llm]
base_url = "http://localhost:11434/v1"
model = "llama3"
"#;
    let config = EngineConfig::from_toml_str(raw).expect("config must parse");

    assert_eq!(config.llm.base_url, "http://localhost:11434/v1");
    assert_eq!(config.llm.model, "llama3");
    assert!(config.llm.api_key.is_empty(), "api key never comes from TOML");
}

#[test]
fn zero_max_rounds_is_rejected() {
    let raw = "[negotiation]\nmax_rounds = 0\n";
    let err = EngineConfig::from_toml_str(raw).expect_err("zero rounds must fail validation");
    assert!(matches!(err, AppError::Config(_)), "got {err:?}");
}

#[test]
fn zero_round_timeout_is_rejected() {
    let raw = "[negotiation]\nround_timeout_seconds = 0\n";
    let err = EngineConfig::from_toml_str(raw).expect_err("zero timeout must fail validation");
    assert!(matches!(err, AppError::Config(_)), "got {err:?}");
}

#[test]
fn malformed_toml_is_a_config_error() {
    let err = EngineConfig::from_toml_str("not toml at all [").expect_err("must fail");
    assert!(matches!(err, AppError::Config(_)), "got {err:?}");
}
